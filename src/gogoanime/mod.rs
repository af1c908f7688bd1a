mod gogocdn;
mod streamwish;

use std::time::Duration;

use anyhow::Context as _;
use kuchikiki::traits::*;
use tracing::debug;

use crate::{
	error::ResolveError,
	fetch::HttpClient,
	interception::{self, BlockedResource},
	Episode, ResolvedMedia, SearchResult, Server, ServerKind,
};

const BASE_URL: &str = "https://anitaku.pe";

pub(crate) async fn search(
	http: &HttpClient,
	query: &str,
) -> Result<Vec<SearchResult>, anyhow::Error> {
	let html = http
		.get_text(
			&format!(
				"{BASE_URL}/search.html?keyword={}",
				urlencoding::encode(query)
			),
			&[],
		)
		.await?;
	parse_search(&html)
}

fn parse_search(html: &str) -> Result<Vec<SearchResult>, anyhow::Error> {
	let document = kuchikiki::parse_html().one(html);
	let items = document
		.select(".items li")
		.map_err(|_| anyhow::anyhow!("failed to select items"))?;

	let mut results = Vec::new();
	for item in items {
		let anchor = item
			.as_node()
			.select_first(".name a")
			.map_err(|_| anyhow::anyhow!("item without name"))?;
		let title = anchor.text_contents().trim().to_string();

		let attributes = anchor.attributes.borrow();
		let href = attributes.get("href").context("item without href")?;
		let id = href
			.rsplit('/')
			.next()
			.context("item href without slug")?
			.to_string();
		drop(attributes);

		let poster = item
			.as_node()
			.select_first("img")
			.ok()
			.and_then(|img| {
				let attributes = img.attributes.borrow();
				attributes.get("src").map(str::to_string)
			})
			.unwrap_or_default();

		results.push(SearchResult { title, poster, id });
	}

	Ok(results)
}

/// Episode ids follow the `{slug}-episode-{n}` convention; the category page
/// only tells us how many there are.
pub(crate) async fn episodes(http: &HttpClient, id: &str) -> Result<Vec<Episode>, anyhow::Error> {
	let html = http
		.get_text(&format!("{BASE_URL}/category/{id}"), &[])
		.await?;
	let last = parse_episode_count(&html).context("failed to read the episode range")?;

	let episodes = (1..=last)
		.map(|number| Episode {
			title: format!("Episode {number}"),
			number,
			id: format!("{id}-episode-{number}"),
		})
		.collect();

	Ok(episodes)
}

fn parse_episode_count(html: &str) -> Option<u32> {
	let document = kuchikiki::parse_html().one(html);
	let pages = document.select("#episode_page a").ok()?;

	pages
		.filter_map(|anchor| {
			let attributes = anchor.attributes.borrow();
			attributes.get("ep_end").and_then(|end| end.parse().ok())
		})
		.max()
}

pub(crate) async fn servers(
	http: &HttpClient,
	episode_key: &str,
) -> Result<Vec<Server>, ResolveError> {
	let html = http
		.get_text(&format!("{BASE_URL}/{episode_key}"), &[])
		.await?;
	parse_servers(&html)
}

fn parse_servers(html: &str) -> Result<Vec<Server>, ResolveError> {
	let document = kuchikiki::parse_html().one(html);
	let anchors = document
		.select(".anime_muti_link ul li a")
		.map_err(|_| ResolveError::SchemeChanged("server list markup changed".to_string()))?;

	let mut servers = Vec::new();
	for anchor in anchors {
		let name = anchor
			.text_contents()
			.replace("Choose this server", "")
			.trim()
			.to_string();
		let attributes = anchor.attributes.borrow();
		let Some(embed) = attributes.get("data-video") else {
			continue;
		};
		if name.is_empty() || embed.is_empty() {
			continue;
		}

		// Scheme-relative embeds are common here.
		let url = if embed.starts_with("//") {
			format!("https:{embed}")
		} else {
			embed.to_string()
		};

		servers.push(Server {
			name,
			kind: ServerKind::Sub,
			url,
		});
	}

	Ok(servers)
}

/// Static pipeline selection per hosting backend; embeds nobody has written
/// an extractor for go through browser interception instead.
pub(crate) async fn resolve_server(
	http: &HttpClient,
	server: &Server,
	interception_timeout: Duration,
	block_list: &[BlockedResource],
) -> Result<ResolvedMedia, ResolveError> {
	match server.name.to_ascii_lowercase().as_str() {
		"vidstreaming" | "gogo server" => gogocdn::resolve(http, &server.url).await,
		"streamwish" => streamwish::resolve(http, &server.url).await,
		_ => {
			debug!(backend = %server.name, "no static extractor, using network interception");
			let manifest =
				interception::resolve_via_interception(&server.url, interception_timeout, block_list)
					.await?;
			Ok(ResolvedMedia::from_manifest(manifest))
		}
	}
}

/// Resolution for a bare embed reference, where only the url tells us which
/// strategy applies.
pub(crate) async fn resolve_embed_url(
	http: &HttpClient,
	embed_url: &str,
	interception_timeout: Duration,
	block_list: &[BlockedResource],
) -> Result<ResolvedMedia, ResolveError> {
	if embed_url.contains("wish") {
		return streamwish::resolve(http, embed_url).await;
	}
	if gogocdn::query_param(embed_url, "id").is_some() {
		return gogocdn::resolve(http, embed_url).await;
	}
	let manifest =
		interception::resolve_via_interception(embed_url, interception_timeout, block_list).await?;
	Ok(ResolvedMedia::from_manifest(manifest))
}
