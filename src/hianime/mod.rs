use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use euglena_cryptography::sources::megacloud;
use kuchikiki::traits::*;
use reqwest::header::{self, HeaderName};
use serde_json::Value;
use tracing::debug;

use crate::{
	error::ResolveError, fetch::HttpClient, Episode, ManifestSource, ResolvedMedia, SearchResult,
	Server, ServerKind, SkipMarker, SubtitleTrack,
};

const BASE_URL: &str = "https://hianime.to";
const MEGACLOUD_BASE: &str = "https://megacloud.tv";

pub(crate) async fn search(
	http: &HttpClient,
	query: &str,
) -> Result<Vec<SearchResult>, anyhow::Error> {
	let html = http
		.get_text(
			&format!("{BASE_URL}/search?keyword={}", urlencoding::encode(query)),
			&[],
		)
		.await?;
	parse_search(&html)
}

fn parse_search(html: &str) -> Result<Vec<SearchResult>, anyhow::Error> {
	let document = kuchikiki::parse_html().one(html);
	let items = document
		.select(".flw-item")
		.map_err(|_| anyhow::anyhow!("failed to select items"))?;

	let mut results = Vec::new();
	for item in items {
		let qtip = item
			.as_node()
			.select_first(".item-qtip")
			.map_err(|_| anyhow::anyhow!("item without qtip"))?;
		let poster = item
			.as_node()
			.select_first(".film-poster-img")
			.map_err(|_| anyhow::anyhow!("item without poster"))?;

		let attributes = qtip.attributes.borrow();
		let title = attributes.get("title").context("missing title")?.to_string();
		let id = attributes.get("data-id").context("missing id")?.to_string();

		let attributes = poster.attributes.borrow();
		let poster = attributes.get("data-src").unwrap_or_default().to_string();

		results.push(SearchResult { title, poster, id });
	}

	Ok(results)
}

pub(crate) async fn episodes(http: &HttpClient, id: &str) -> Result<Vec<Episode>, anyhow::Error> {
	let json = http
		.get_json(&format!("{BASE_URL}/ajax/v2/episode/list/{id}"), &[])
		.await?;
	let html = json["html"].as_str().context("episode list has no html")?;

	let document = kuchikiki::parse_html().one(html);
	let episodes = document
		.select(".ep-item")
		.map_err(|_| anyhow::anyhow!("failed to select episodes"))?;

	let mut episode_list = Vec::new();
	for episode in episodes {
		let attributes = episode.attributes.borrow();
		let title = attributes
			.get("title")
			.context("episode without title")?
			.replace("&#39;", "'");
		let id = attributes
			.get("data-id")
			.context("episode without id")?
			.to_string();
		let number = attributes
			.get("data-number")
			.context("episode without number")?
			.parse()
			.context("episode number is not numeric")?;

		episode_list.push(Episode { title, id, number });
	}

	Ok(episode_list)
}

/// Lists the alternate hosting backends for one episode, each with its embed
/// url resolved through the sources ajax endpoint.
pub(crate) async fn servers(http: &HttpClient, ep_id: &str) -> Result<Vec<Server>, ResolveError> {
	let json = http
		.get_json(
			&format!("{BASE_URL}/ajax/v2/episode/servers?episodeId={ep_id}"),
			&[],
		)
		.await?;
	let html = json["html"].as_str().ok_or_else(|| {
		ResolveError::SchemeChanged("servers payload has no html field".to_string())
	})?;

	let mut server_list = Vec::new();
	for (name, kind, server_id) in parse_server_items(html)? {
		let json = http
			.get_json(
				&format!("{BASE_URL}/ajax/v2/episode/sources?id={server_id}"),
				&[],
			)
			.await?;
		let Some(url) = json["link"].as_str() else {
			debug!(server = %name, "server without an embed link, skipping");
			continue;
		};

		server_list.push(Server {
			name: format!("{} · {kind}", name.trim()),
			kind,
			url: url.to_string(),
		});
	}

	Ok(server_list)
}

fn parse_server_items(html: &str) -> Result<Vec<(String, ServerKind, String)>, ResolveError> {
	let document = kuchikiki::parse_html().one(html);
	let servers = document
		.select(".server-item")
		.map_err(|_| ResolveError::SchemeChanged("server list markup changed".to_string()))?;

	let mut items = Vec::new();
	for server in servers {
		let name = server.text_contents().trim().to_string();
		let attributes = server.attributes.borrow();
		let Some(server_id) = attributes.get("data-id") else {
			continue;
		};
		let kind = match attributes.get("data-type") {
			Some("dub") => ServerKind::Dub,
			Some("raw") => ServerKind::Raw,
			_ => ServerKind::Sub,
		};
		items.push((name, kind, server_id.to_string()));
	}

	Ok(items)
}

/// Resolves a megacloud embed into playable sources. When the payload comes
/// back encrypted, the secret is spliced out of the ciphertext at offsets
/// recovered from the player script, then the remainder is decrypted.
pub(crate) async fn resolve_embed(
	http: &HttpClient,
	embed_url: &str,
) -> Result<ResolvedMedia, ResolveError> {
	let xrax = embed_id(embed_url).ok_or_else(|| {
		ResolveError::SchemeChanged(format!("embed url carries no id: {embed_url}"))
	})?;

	let headers = [
		(header::REFERER, BASE_URL),
		(
			HeaderName::from_static("x-requested-with"),
			"XMLHttpRequest",
		),
	];
	let payload = http
		.get_json(
			&format!("{MEGACLOUD_BASE}/embed-2/ajax/e-1/getSources?id={xrax}"),
			&headers,
		)
		.await?;

	let sources_value = &payload["sources"];
	let encrypted = payload["encrypted"].as_bool().unwrap_or(false);

	let sources = if sources_value.is_array() && !encrypted {
		sources_from_value(sources_value)?
	} else {
		let ciphertext = sources_value.as_str().ok_or_else(|| {
			ResolveError::SchemeChanged(
				"sources field is neither an array nor a ciphertext string".to_string(),
			)
		})?;

		let script = http.get_text(&player_script_url(), &[]).await?;
		let pairs = megacloud::extract_offsets(&script)?;
		let (secret, stripped) = megacloud::derive_secret_and_ciphertext(ciphertext, &pairs);
		let decrypted = megacloud::decrypt(&stripped, &secret)?;
		let value: Value = serde_json::from_str(&decrypted).map_err(|err| {
			ResolveError::Decrypt(format!("decrypted sources are not valid JSON: {err}"))
		})?;
		sources_from_value(&value)?
	};

	media_from_payload(&payload, sources)
}

fn embed_id(url: &str) -> Option<String> {
	let tail = url.rsplit('/').next()?;
	let id = tail.split('?').next()?;
	(!id.is_empty()).then(|| id.to_string())
}

// Cache-busted the same way the player requests it.
fn player_script_url() -> String {
	let stamp = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis())
		.unwrap_or_default();
	format!("{MEGACLOUD_BASE}/js/player/a/prod/e1-player.min.js?v={stamp}")
}

fn sources_from_value(value: &Value) -> Result<Vec<ManifestSource>, ResolveError> {
	serde_json::from_value(value.clone())
		.map_err(|err| ResolveError::SchemeChanged(format!("source list shape changed: {err}")))
}

fn media_from_payload(
	payload: &Value,
	sources: Vec<ManifestSource>,
) -> Result<ResolvedMedia, ResolveError> {
	if sources.is_empty() {
		return Err(ResolveError::NoSourceFound);
	}

	let mut tracks: Vec<SubtitleTrack> =
		serde_json::from_value(payload["tracks"].clone()).unwrap_or_default();
	tracks.retain(|track| track.kind != "thumbnails");

	Ok(ResolvedMedia {
		sources,
		tracks,
		intro: SkipMarker::from_value(&payload["intro"]),
		outro: SkipMarker::from_value(&payload["outro"]),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_embed_id() {
		assert_eq!(
			embed_id("https://megacloud.tv/embed-2/e-1/8NyPAIUPqSHl?k=1").as_deref(),
			Some("8NyPAIUPqSHl")
		);
		assert_eq!(embed_id("https://megacloud.tv/embed-2/e-1/"), None);
	}

	#[test]
	fn test_parse_search() {
		let html = r#"
			<div class="flw-item">
				<img class="film-poster-img" data-src="https://img.example/100.jpg">
				<a class="item-qtip" title="One Piece" data-id="100"></a>
			</div>
			<div class="flw-item">
				<img class="film-poster-img" data-src="https://img.example/200.jpg">
				<a class="item-qtip" title="One Pace" data-id="200"></a>
			</div>
		"#;
		let results = parse_search(html).unwrap();
		assert_eq!(results.len(), 2);
		assert_eq!(results[0].title, "One Piece");
		assert_eq!(results[0].id, "100");
		assert_eq!(results[1].poster, "https://img.example/200.jpg");
	}

	#[test]
	fn test_parse_server_items() {
		let html = r#"
			<div class="server-item" data-type="sub" data-id="41"><a class="btn">HD-1</a></div>
			<div class="server-item" data-type="dub" data-id="42"><a class="btn">HD-2</a></div>
			<div class="server-item" data-type="raw" data-id="43"><a class="btn">HD-3</a></div>
		"#;
		let items = parse_server_items(html).unwrap();
		assert_eq!(
			items,
			vec![
				("HD-1".to_string(), ServerKind::Sub, "41".to_string()),
				("HD-2".to_string(), ServerKind::Dub, "42".to_string()),
				("HD-3".to_string(), ServerKind::Raw, "43".to_string()),
			]
		);
	}

	#[test]
	fn test_media_from_payload_filters_thumbnails_and_maps_markers() {
		let payload = json!({
			"tracks": [
				{ "file": "https://cc.example/en.vtt", "label": "English", "kind": "captions", "default": true },
				{ "file": "https://cc.example/thumbs.vtt", "kind": "thumbnails" }
			],
			"intro": { "start": 90, "end": 115 },
			"outro": { "start": 0, "end": 0 }
		});
		let sources = vec![ManifestSource {
			url: "https://cdn.example/master.m3u8".to_string(),
			mime_type: "hls".to_string(),
			is_backup: false,
		}];

		let media = media_from_payload(&payload, sources).unwrap();
		assert_eq!(media.tracks.len(), 1);
		assert_eq!(media.tracks[0].label.as_deref(), Some("English"));
		assert!(media.tracks[0].is_default);
		assert_eq!(
			media.intro,
			Some(SkipMarker {
				start: 90.0,
				end: 115.0
			})
		);
		assert_eq!(media.outro, None);
	}

	#[test]
	fn test_media_from_payload_requires_sources() {
		let err = media_from_payload(&json!({}), Vec::new()).unwrap_err();
		assert!(matches!(err, ResolveError::NoSourceFound));
	}

	#[test]
	fn test_sources_from_value() {
		let value = json!([
			{ "file": "https://cdn.example/master.m3u8", "type": "hls" }
		]);
		let sources = sources_from_value(&value).unwrap();
		assert_eq!(sources[0].url, "https://cdn.example/master.m3u8");
		assert_eq!(sources[0].mime_type, "hls");
		assert!(!sources[0].is_backup);
	}
}
