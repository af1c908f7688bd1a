use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

const CHARSET: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ+/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnpackError {
	#[error("packed script argument tuple not found")]
	MalformedArguments,
	#[error("radix {0} outside the supported range")]
	RadixOutOfRange(usize),
	#[error("symbol table holds {found} entries, script declares {declared}")]
	SymtabMismatch { declared: usize, found: usize },
}

lazy_static! {
	static ref SIGNATURE: Regex =
		Regex::new(r"eval[ ]*\([ ]*function[ ]*\([ ]*p[ ]*,[ ]*a[ ]*,[ ]*c[ ]*,[ ]*k[ ]*,[ ]*e[ ]*,").unwrap();
	static ref WORD: Regex = Regex::new(r"\b\w+\b").unwrap();
}

pub fn detect(script: &str) -> bool {
	SIGNATURE.is_match(script)
}

/// Re-expands a p,a,c,k,e,d-packed script by substituting every base-N token
/// with its symbol table entry. Scripts without the packed signature pass
/// through unchanged; that is not an error.
pub fn unpack(script: &str) -> Result<String, UnpackError> {
	if !detect(script) {
		return Ok(script.to_string());
	}

	let (payload, symtab, radix, count) = filter_args(script)?;
	if count != symtab.len() {
		return Err(UnpackError::SymtabMismatch {
			declared: count,
			found: symtab.len(),
		});
	}
	if !(2..=CHARSET.len()).contains(&radix) {
		return Err(UnpackError::RadixOutOfRange(radix));
	}

	let payload = payload.replace(r"\\", r"\").replace(r"\'", "'");
	let expanded = WORD.replace_all(&payload, |caps: &regex::Captures| {
		let word = &caps[0];
		match unbase(word, radix) {
			Some(index) if index < symtab.len() && !symtab[index].is_empty() => {
				symtab[index].clone()
			}
			_ => word.to_string(),
		}
	});

	Ok(expanded.into_owned())
}

fn filter_args(source: &str) -> Result<(String, Vec<String>, usize, usize), UnpackError> {
	lazy_static! {
		static ref JUICERS: [Regex; 2] = [
			RegexBuilder::new(
				r"}\('(.*)', *(\d+|\[\]), *(\d+), *'(.*)'\.split\('\|'\), *(\d+), *(.*)\)\)"
			)
			.dot_matches_new_line(true)
			.build()
			.unwrap(),
			RegexBuilder::new(r"}\('(.*)', *(\d+|\[\]), *(\d+), *'(.*)'\.split\('\|'\)")
				.dot_matches_new_line(true)
				.build()
				.unwrap(),
		];
	}

	for juicer in JUICERS.iter() {
		if let Some(args) = juicer.captures(source) {
			let payload = args[1].to_string();
			let radix = match &args[2] {
				// Some packer builds pass `[]` where the radix belongs; they
				// always encode base 62.
				"[]" => 62,
				text => text.parse().map_err(|_| UnpackError::MalformedArguments)?,
			};
			let count = args[3]
				.parse()
				.map_err(|_| UnpackError::MalformedArguments)?;
			let symtab = args[4].split('|').map(str::to_string).collect();
			return Ok((payload, symtab, radix, count));
		}
	}

	Err(UnpackError::MalformedArguments)
}

fn unbase(word: &str, radix: usize) -> Option<usize> {
	if word.is_empty() {
		return None;
	}
	let mut value = 0usize;
	for ch in word.chars() {
		let digit = CHARSET.chars().position(|c| c == ch)?;
		if digit >= radix {
			return None;
		}
		value = value.checked_mul(radix)?.checked_add(digit)?;
	}
	Some(value)
}

#[cfg(test)]
pub(crate) mod packer {
	use super::{CHARSET, WORD};
	use std::collections::HashMap;

	fn int_to_base(mut x: usize, base: usize) -> String {
		if x == 0 {
			return "0".to_string();
		}
		let mut digits = Vec::new();
		while x != 0 {
			digits.push(CHARSET.chars().nth(x % base).unwrap());
			x /= base;
		}
		digits.reverse();
		digits.into_iter().collect()
	}

	// Reference packer: every word becomes the base-N token of its symbol
	// table index, mirroring what the real packer ships.
	pub(crate) fn pack(source: &str, radix: usize) -> String {
		let mut symtab: Vec<String> = Vec::new();
		let mut indexes: HashMap<String, usize> = HashMap::new();

		for word in WORD.find_iter(source) {
			if !indexes.contains_key(word.as_str()) {
				indexes.insert(word.as_str().to_string(), symtab.len());
				symtab.push(word.as_str().to_string());
			}
		}

		let payload = WORD.replace_all(source, |caps: &regex::Captures| {
			int_to_base(indexes[&caps[0]], radix)
		});
		let payload = payload.replace('\\', r"\\").replace('\'', r"\'");

		format!(
			"eval(function(p,a,c,k,e,d){{while(c--)if(k[c])p=p.replace(new RegExp('\\\\b'+e(c)+'\\\\b','g'),k[c]);return p}}('{}',{},{},'{}'.split('|'),0,{{}}))",
			payload,
			radix,
			symtab.len(),
			symtab.join("|"),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_detect() {
		assert!(detect("eval(function(p,a,c,k,e,r"));
		assert!(detect("eval ( function(p, a, c, k, e, d"));
		assert!(!detect("var player = jwplayer('vid');"));
		assert!(!detect(""));
	}

	#[test]
	fn test_non_packed_passes_through() {
		let script = "const source = 'https://cdn.example/master.m3u8';";
		assert_eq!(unpack(script).unwrap(), script);
	}

	#[test]
	fn test_unpack_reference_fixture() {
		let packed = "eval(function(p,a,c,k,e,r){e=String;if(!''.replace(/^/,String)){while(c--)r[c]=k[c]||c;k=[function(e){return r[e]}];e=function(){return'\\\\w+'};c=1};while(c--)if(k[c])p=p.replace(new RegExp('\\\\b'+e(c)+'\\\\b','g'),k[c]);return p}('0 2=1',62,3,'var||a'.split('|'),0,{}))";
		assert_eq!(unpack(packed).unwrap(), "var a=1");
	}

	#[test]
	fn test_unpack_bracket_radix() {
		let packed = "eval(function(p,a,c,k,e,r){}('0 2=1',[],3,'var||a'.split('|'),0,{}))";
		assert_eq!(unpack(packed).unwrap(), "var a=1");
	}

	#[test]
	fn test_round_trip() {
		let source = r#"var player=jwplayer("kwik-player");player.setup({file:"https://vault-05.example.org/stream/05/08/uwu.m3u8",autostart:true});"#;
		for radix in [36, 62] {
			let packed = packer::pack(source, radix);
			assert!(detect(&packed));
			assert_eq!(unpack(&packed).unwrap(), source, "radix {radix}");
		}
	}

	#[test]
	fn test_symtab_mismatch() {
		let packed = "eval(function(p,a,c,k,e,r){}('0 2=1',62,9,'var||a'.split('|'),0,{}))";
		assert_eq!(
			unpack(packed).unwrap_err(),
			UnpackError::SymtabMismatch {
				declared: 9,
				found: 3
			}
		);
	}

	#[test]
	fn test_radix_out_of_range() {
		let packed = "eval(function(p,a,c,k,e,r){}('0 2=1',99,3,'var||a'.split('|'),0,{}))";
		assert_eq!(unpack(packed).unwrap_err(), UnpackError::RadixOutOfRange(99));
	}
}
