use kuchikiki::traits::*;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{error::ResolveError, fetch::HttpClient, unpacker, ResolvedMedia};

lazy_static! {
	static ref FILE_LITERAL: Regex =
		Regex::new(r#"(?:file|src)\s*:\s*"([^"]+\.m3u8[^"]*)""#).unwrap();
	static ref QUOTED_LITERAL: Regex =
		Regex::new(r#"["'](https?://[^"']+\.m3u8[^"']*)["']"#).unwrap();
}

/// The embed ships its player setup as a packed script with the manifest url
/// as a literal inside; unpack and pull it out.
pub(crate) async fn resolve(
	http: &HttpClient,
	embed_url: &str,
) -> Result<ResolvedMedia, ResolveError> {
	let html = http.get_text(embed_url, &[]).await?;
	let script = media_script(&html).ok_or_else(|| {
		ResolveError::SchemeChanged("embed page has no script mentioning a manifest".to_string())
	})?;

	let unpacked = unpacker::unpack(&script)?;
	let manifest = manifest_literal(&unpacked).ok_or(ResolveError::NoSourceFound)?;

	Ok(ResolvedMedia::from_manifest(manifest))
}

fn media_script(html: &str) -> Option<String> {
	let document = kuchikiki::parse_html().one(html);
	document
		.select("script")
		.ok()?
		.map(|script| script.text_contents())
		.find(|text| text.contains("m3u8"))
}

fn manifest_literal(script: &str) -> Option<String> {
	if let Some(caps) = FILE_LITERAL.captures(script) {
		return Some(caps[1].to_string());
	}
	QUOTED_LITERAL
		.captures(script)
		.map(|caps| caps[1].to_string())
}
