use lazy_static::lazy_static;
use regex::Regex;

use crate::CryptoError;

lazy_static! {
	// `case 0x12: h = P, f = Q;` sites inside the player script's dispatch
	// switch. The captured names are the variables holding offset and length.
	static ref CASE_PAIR: Regex =
		Regex::new(r"case\s*0x[0-9a-fA-F]+:\s*\w+\s*=\s*(\w+)\s*,\s*\w+\s*=\s*(\w+);").unwrap();
}

/// Recovers the (offset, length) pairs the player script uses to splice the
/// secret out of the ciphertext, in their order of appearance.
///
/// An empty result means the backend rewrote its obfuscation scheme, which is
/// a hard failure: no amount of retrying will make the pairs reappear.
pub fn extract_offsets(script: &str) -> Result<Vec<(usize, usize)>, CryptoError> {
	let mut pairs = Vec::new();

	for caps in CASE_PAIR.captures_iter(script) {
		if caps[0].contains("partKey") {
			continue;
		}
		let offset = resolve_literal(&caps[1], script, 0);
		let length = resolve_literal(&caps[2], script, 0);
		if let (Some(offset), Some(length)) = (offset, length) {
			pairs.push((offset, length));
		}
	}

	if pairs.is_empty() {
		return Err(CryptoError::SchemeChanged(
			"no offset assignment sites in player script",
		));
	}

	Ok(pairs)
}

// A case site references either a numeric literal or a variable whose value
// lives in a `,name=0x1f` assignment elsewhere in the script, possibly
// through another variable. Identifiers cannot start with a digit, which is
// what tells the two apart.
fn resolve_literal(name: &str, script: &str, depth: u8) -> Option<usize> {
	if depth > 3 {
		return None;
	}
	if name.starts_with(|c: char| c.is_ascii_digit()) {
		return parse_numeric(name);
	}

	let assignment = Regex::new(&format!(r",{}=(\w+)", regex::escape(name))).ok()?;
	let token = assignment.captures(script)?.get(1)?.as_str();
	if token == name {
		return None;
	}
	resolve_literal(token, script, depth + 1)
}

// Hexadecimal when the `0x` prefix or a hex letter says so, decimal otherwise.
fn parse_numeric(token: &str) -> Option<usize> {
	if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
		return usize::from_str_radix(hex, 16).ok();
	}
	if token.bytes().all(|b| b.is_ascii_digit()) {
		return token.parse().ok();
	}
	usize::from_str_radix(token, 16).ok()
}

/// Splits the raw `sources` string into the spliced-in secret and the real
/// ciphertext. The cursor advances by the total length consumed so far, so
/// each pair's offset is relative to the end of the previous extraction.
pub fn derive_secret_and_ciphertext(raw: &str, pairs: &[(usize, usize)]) -> (String, String) {
	let chars: Vec<char> = raw.chars().collect();
	let mut consumed = vec![false; chars.len()];
	let mut secret = String::new();
	let mut cursor = 0;

	for &(offset, length) in pairs {
		let start = cursor + offset;
		for index in start..start + length {
			if index < chars.len() && !consumed[index] {
				secret.push(chars[index]);
				consumed[index] = true;
			}
		}
		cursor += length;
	}

	let stripped = chars
		.iter()
		.zip(&consumed)
		.filter(|(_, used)| !**used)
		.map(|(c, _)| *c)
		.collect();

	(secret, stripped)
}

pub fn decrypt(ciphertext_b64: &str, secret: &str) -> Result<String, CryptoError> {
	crate::evp::decrypt(ciphertext_b64, secret)
}

#[cfg(test)]
mod tests {
	use super::*;

	const PLAYER_SCRIPT: &str = concat!(
		"(function(){var c=prompt();switch(c){",
		"case 0x9:g=w,v=b;break;",
		"case 0xa:g=partKey;break;",
		"case 0xb:g=p,v=q;break;",
		"case 0xc:g=0x2,v=10;break;",
		"default:g=null;}",
		"var a=0x0,w=0x4,b=0x8,p=x2,q=12;var z=0x1,x2=0x6;})();",
	);

	#[test]
	fn test_extract_offsets() {
		let pairs = extract_offsets(PLAYER_SCRIPT).unwrap();
		assert_eq!(pairs, vec![(4, 8), (6, 12), (2, 10)]);
	}

	#[test]
	fn test_extract_offsets_rejects_unknown_scheme() {
		let err = extract_offsets("var player = jwplayer('vid');").unwrap_err();
		assert!(matches!(err, CryptoError::SchemeChanged(_)));
	}

	#[test]
	fn test_derive_secret_and_ciphertext() {
		// "ab" ++ "KEY" ++ "cd" ++ "XY" ++ "ef" with [(2, 3), (4, 2)]:
		// the first pair consumes indexes 2..5, the second 7..9.
		let (secret, stripped) = derive_secret_and_ciphertext("abKEYcdXYef", &[(2, 3), (4, 2)]);
		assert_eq!(secret, "KEYXY");
		assert_eq!(stripped, "abcdef");
	}

	#[test]
	fn test_derive_tolerates_out_of_range_pairs() {
		let (secret, stripped) = derive_secret_and_ciphertext("abc", &[(10, 4)]);
		assert_eq!(secret, "");
		assert_eq!(stripped, "abc");
	}

	#[test]
	fn test_splice_then_decrypt() {
		// The fixture from `evp::tests`, with the secret spliced into the
		// ciphertext at the offsets below.
		let raw = "U2FsUk9MTHpYQdGnJ3ZUtVkX1NcVZMYQ9qMfDCiFsZ7QAVXzYPprwDSN52kptDscwZHbxtX7/YpkD5NbDETHGdp48gXBUsHZIrNBTB4YGlEh+roe0EB0Iy9dvi+AGHTtvUs+6vWVL97VIa+bMbCIft";
		let pairs = [(4, 5), (4, 4), (6, 6), (10, 7)];

		let (secret, stripped) = derive_secret_and_ciphertext(raw, &pairs);
		assert_eq!(secret, "Uk9MTHpYQnJ3ZUtNcVZMYQ");

		let plaintext = decrypt(&stripped, &secret).unwrap();
		assert_eq!(
			plaintext,
			r#"[{"file":"https://vault-10.example.org/stream/10/05/master.m3u8","type":"hls"}]"#
		);
	}
}
