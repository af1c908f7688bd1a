use std::time::Duration;

use anyhow::Context as _;
use futures::{stream, StreamExt as _};
use kuchikiki::traits::*;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::{
	error::ResolveError, fetch::HttpClient, unpacker, Episode, ResolvedMedia, SearchResult,
	Server, ServerKind,
};

const BASE_URL: &str = "https://animepahe.ru";

lazy_static! {
	static ref SESSION_ID: Regex = Regex::new(r#"let id = "(.*)";"#).unwrap();
	static ref MANIFEST: Regex = Regex::new(r#"https://[^'"\s]+\.m3u8[^'"\s]*"#).unwrap();
}

/// The site sits behind ddos-guard; a check-js probe hands out the cookie
/// every later request must carry.
pub(crate) async fn create_client(timeout: Duration) -> Result<HttpClient, ResolveError> {
	let res = reqwest::get("https://check.ddos-guard.net/check.js")
		.await
		.map_err(|err| ResolveError::Transport(err.to_string()))?;

	let etag = res
		.headers()
		.get(header::ETAG)
		.and_then(|value| value.to_str().ok())
		.ok_or_else(|| {
			ResolveError::SchemeChanged("ddos-guard check response has no etag".to_string())
		})?;
	let cookie = format!("__ddg2_={etag};");

	let mut headers = HeaderMap::new();
	headers.insert(
		header::COOKIE,
		HeaderValue::from_str(&cookie)
			.map_err(|err| ResolveError::Transport(err.to_string()))?,
	);
	headers.insert(
		header::REFERER,
		HeaderValue::from_static("https://animepahe.ru/"),
	);

	HttpClient::with_default_headers(timeout, headers)
}

pub(crate) async fn search(
	client: &HttpClient,
	query: &str,
) -> Result<Vec<SearchResult>, anyhow::Error> {
	let json = client
		.get_json(
			&format!("{BASE_URL}/api?m=search&q={}", urlencoding::encode(query)),
			&[],
		)
		.await?;
	let results = serde_json::from_value(json["data"].clone())?;
	Ok(results)
}

pub(crate) async fn episodes(
	client: &HttpClient,
	id: &str,
) -> Result<Vec<Episode>, anyhow::Error> {
	let html = client.get_text(&format!("{BASE_URL}/a/{id}"), &[]).await?;
	let session = parse_session(&html).context("failed to find the release session")?;

	let json = client
		.get_json(
			&format!("{BASE_URL}/api?m=release&id={session}&page=1"),
			&[],
		)
		.await?;
	let last_page = json["last_page"].as_u64().context("no last page")?;
	let mut episodes: Vec<Episode> = serde_json::from_value(json["data"].clone())?;

	let pages = stream::iter((2..=last_page).map(|page| {
		let session = session.clone();
		async move {
			let json = client
				.get_json(
					&format!("{BASE_URL}/api?m=release&id={session}&page={page}"),
					&[],
				)
				.await?;
			let data: Vec<Episode> = serde_json::from_value(json["data"].clone())?;
			Ok::<_, anyhow::Error>(data)
		}
	}))
	.buffer_unordered(10)
	.collect::<Vec<_>>()
	.await;

	for page in pages {
		episodes.extend(page?);
	}

	episodes.sort_by_key(|episode| episode.number);
	episodes.iter_mut().for_each(|episode| {
		episode.title = format!("Episode {}", episode.number);
		episode.id = format!("{session}/{}", episode.id);
	});

	Ok(episodes)
}

fn parse_session(html: &str) -> Option<String> {
	let document = kuchikiki::parse_html().one(html);
	let script = document
		.select("script")
		.ok()?
		.find(|script| script.text_contents().contains("let id ="))?
		.text_contents();

	SESSION_ID
		.captures(&script)
		.and_then(|caps| caps.get(1))
		.map(|session| session.as_str().to_string())
}

pub(crate) async fn servers(
	client: &HttpClient,
	ep_id: &str,
) -> Result<Vec<Server>, ResolveError> {
	let html = client
		.get_text(&format!("{BASE_URL}/play/{ep_id}"), &[])
		.await?;
	parse_servers(&html)
}

fn parse_servers(html: &str) -> Result<Vec<Server>, ResolveError> {
	let document = kuchikiki::parse_html().one(html);
	let buttons = document
		.select("#resolutionMenu button")
		.map_err(|_| ResolveError::SchemeChanged("resolution menu markup changed".to_string()))?;

	let mut servers: Vec<Server> = buttons
		.filter_map(|button| {
			let attributes = button.attributes.borrow();
			let url = attributes.get("data-src")?.to_string();
			let fansub = attributes.get("data-fansub").unwrap_or("unknown");
			let resolution = attributes.get("data-resolution").unwrap_or("?");
			let kind = match attributes.get("data-audio") {
				Some("eng") => ServerKind::Dub,
				_ => ServerKind::Sub,
			};

			Some(Server {
				name: format!("{fansub} · {resolution}p {kind}"),
				kind,
				url,
			})
		})
		.collect();

	// The menu lists lowest resolution first; callers want the opposite.
	servers.reverse();
	Ok(servers)
}

/// Kwik pages bury the player setup in a packed script whose expansion holds
/// the manifest url as a plain literal.
pub(crate) async fn resolve_embed(
	client: &HttpClient,
	embed_url: &str,
) -> Result<ResolvedMedia, ResolveError> {
	let html = client
		.get_text(embed_url, &[(header::REFERER, "https://animepahe.ru/")])
		.await?;

	let script = packed_script(&html).ok_or_else(|| {
		ResolveError::SchemeChanged("kwik page carries no packed player script".to_string())
	})?;
	let unpacked = unpacker::unpack(&script)?;
	let manifest = MANIFEST
		.find(&unpacked)
		.ok_or(ResolveError::NoSourceFound)?
		.as_str()
		.to_string();

	Ok(ResolvedMedia::from_manifest(manifest))
}

fn packed_script(html: &str) -> Option<String> {
	let document = kuchikiki::parse_html().one(html);
	document
		.select("script")
		.ok()?
		.map(|script| script.text_contents())
		.find(|text| unpacker::detect(text))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::unpacker::packer;

	#[test]
	fn test_parse_session() {
		let html = r#"
			<html><head>
				<script>let url = "/a/4";</script>
				<script>let id = "9c5b1a3f-31ea-b881-0a10-e1b6fe9c22fe";</script>
			</head></html>
		"#;
		assert_eq!(
			parse_session(html).as_deref(),
			Some("9c5b1a3f-31ea-b881-0a10-e1b6fe9c22fe")
		);
		assert_eq!(parse_session("<html></html>"), None);
	}

	#[test]
	fn test_parse_servers_reverses_resolution_order() {
		let html = r#"
			<div id="resolutionMenu">
				<button data-src="https://kwik.si/e/wkp5wNBEkkwE" data-fansub="HorribleSubs" data-resolution="720" data-audio="jpn">720p</button>
				<button data-src="https://kwik.si/e/InzZMv1U52OE" data-fansub="HorribleSubs" data-resolution="1080" data-audio="jpn">1080p</button>
			</div>
		"#;
		let servers = parse_servers(html).unwrap();
		assert_eq!(
			servers,
			vec![
				Server {
					name: "HorribleSubs · 1080p Sub".to_string(),
					kind: ServerKind::Sub,
					url: "https://kwik.si/e/InzZMv1U52OE".to_string(),
				},
				Server {
					name: "HorribleSubs · 720p Sub".to_string(),
					kind: ServerKind::Sub,
					url: "https://kwik.si/e/wkp5wNBEkkwE".to_string(),
				},
			]
		);
	}

	#[test]
	fn test_packed_script_extraction() {
		let source = r#"const source='https://vault-05.example.org/stream/05/08/uwu.m3u8';const player=new Plyr(el);"#;
		let html = format!(
			"<html><script>var x = 1;</script><script>{}</script></html>",
			packer::pack(source, 62)
		);

		let script = packed_script(&html).unwrap();
		let unpacked = unpacker::unpack(&script).unwrap();
		assert_eq!(
			MANIFEST.find(&unpacked).unwrap().as_str(),
			"https://vault-05.example.org/stream/05/08/uwu.m3u8"
		);
	}
}
