mod animepahe;
mod cache;
mod dispatch;
mod error;
mod fetch;
mod gogoanime;
mod hianime;
mod interception;
mod mal;
mod markers;
mod unpacker;

use std::{cmp::min, fmt, str::Chars, str::FromStr, time::Duration};

use serde::{
	de::{self, MapAccess, Visitor},
	Deserialize, Deserializer, Serialize,
};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

pub use cache::ResolutionCache;
pub use dispatch::BackendReport;
pub use error::ResolveError;
pub use fetch::HttpClient;
pub use interception::BlockedResource;
pub use mal::MalAnime;
pub use markers::{SkipKind, SkipTimes};
pub use unpacker::{detect, unpack, UnpackError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Provider {
	HiAnime,
	Gogoanime,
	AnimePahe,
}

impl Provider {
	pub fn as_str(&self) -> &'static str {
		match self {
			Provider::HiAnime => "hianime",
			Provider::Gogoanime => "gogoanime",
			Provider::AnimePahe => "animepahe",
		}
	}
}

impl fmt::Display for Provider {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Provider {
	type Err = ResolveError;

	/// Fails fast on identifiers nobody wrote a pipeline for; no request
	/// leaves the process for an unsupported provider.
	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value.to_ascii_lowercase().as_str() {
			"hianime" | "zoro" => Ok(Provider::HiAnime),
			"gogoanime" | "gogo" => Ok(Provider::Gogoanime),
			"animepahe" => Ok(Provider::AnimePahe),
			other => Err(ResolveError::UnsupportedProvider(other.to_string())),
		}
	}
}

/// Opaque handle on one episode's embed page at one hosting backend.
#[derive(Clone, Debug)]
pub struct EmbedReference {
	pub provider: Provider,
	pub url: String,
	pub episode_key: String,
}

impl EmbedReference {
	pub fn new(provider: Provider, url: impl Into<String>, episode_key: impl Into<String>) -> Self {
		Self {
			provider,
			url: url.into(),
			episode_key: episode_key.into(),
		}
	}
}

#[derive(Debug)]
pub struct SearchResults {
	pub closest_match: Option<SearchResult>,
	pub results: Vec<SearchResult>,
}

#[derive(Clone, Debug)]
pub struct SearchResult {
	pub title: String,
	pub poster: String,
	pub id: String,
}

impl<'de> Deserialize<'de> for SearchResult {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		struct SearchResultVisitor;

		impl<'de> Visitor<'de> for SearchResultVisitor {
			type Value = SearchResult;

			fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
				formatter.write_str("a map with title, poster, and id fields")
			}

			fn visit_map<M>(self, mut map: M) -> Result<SearchResult, M::Error>
			where
				M: MapAccess<'de>,
			{
				let mut title = None;
				let mut poster = None;
				let mut id = None;

				while let Some(key) = map.next_key::<String>()? {
					match key.as_str() {
						"title" => title = Some(map.next_value()?),
						"poster" => poster = Some(map.next_value()?),
						// Some providers hand out numeric ids, others strings.
						"id" => match map.next_value::<Value>()? {
							Value::Number(number) => id = Some(number.to_string()),
							Value::String(text) => id = Some(text),
							_ => return Err(de::Error::custom("id is neither number nor string")),
						},
						_ => {
							map.next_value::<de::IgnoredAny>()?;
						}
					}
				}

				let title = title.ok_or_else(|| de::Error::missing_field("title"))?;
				let poster = poster.ok_or_else(|| de::Error::missing_field("poster"))?;
				let id = id.ok_or_else(|| de::Error::missing_field("id"))?;

				Ok(SearchResult { title, poster, id })
			}
		}

		deserializer.deserialize_map(SearchResultVisitor)
	}
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Episode {
	pub title: String,
	#[serde(alias = "episode")]
	pub number: u32,
	#[serde(rename = "session")]
	pub id: String,
}

/// One alternate hosting backend serving an episode.
#[derive(Clone, Debug, PartialEq)]
pub struct Server {
	pub name: String,
	pub kind: ServerKind,
	pub url: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServerKind {
	#[default]
	Sub,
	Dub,
	Raw,
}

impl fmt::Display for ServerKind {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ServerKind::Sub => write!(f, "Sub"),
			ServerKind::Dub => write!(f, "Dub"),
			ServerKind::Raw => write!(f, "Raw"),
		}
	}
}

/// One playable stream variant.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ManifestSource {
	#[serde(alias = "file")]
	pub url: String,
	#[serde(rename = "type", default = "default_mime_type")]
	pub mime_type: String,
	#[serde(default)]
	pub is_backup: bool,
}

fn default_mime_type() -> String {
	"hls".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SubtitleTrack {
	#[serde(alias = "file")]
	pub url: String,
	#[serde(default)]
	pub label: Option<String>,
	pub kind: String,
	#[serde(rename = "default", default)]
	pub is_default: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct SkipMarker {
	pub start: f32,
	pub end: f32,
}

impl SkipMarker {
	// Backends report zero-width markers instead of omitting them.
	pub(crate) fn from_value(value: &Value) -> Option<SkipMarker> {
		let start = value["start"].as_f64()? as f32;
		let end = value["end"].as_f64()? as f32;
		(end > start).then_some(SkipMarker { start, end })
	}
}

/// Canonical output of a resolution pipeline. `sources` is never empty on
/// success; a run without sources is a failure, not a partial value. Cached
/// and returned by copy so no pipeline state leaks out.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResolvedMedia {
	pub sources: Vec<ManifestSource>,
	pub tracks: Vec<SubtitleTrack>,
	pub intro: Option<SkipMarker>,
	pub outro: Option<SkipMarker>,
}

impl ResolvedMedia {
	pub(crate) fn from_manifest(url: String) -> Self {
		ResolvedMedia {
			sources: vec![ManifestSource {
				url,
				mime_type: default_mime_type(),
				is_backup: false,
			}],
			..Default::default()
		}
	}
}

#[derive(Clone, Debug)]
pub struct ResolverConfig {
	pub http_timeout: Duration,
	pub cache_ttl: Duration,
	pub interception_timeout: Duration,
	pub backend_concurrency: usize,
	pub resource_block_list: Vec<BlockedResource>,
}

impl Default for ResolverConfig {
	fn default() -> Self {
		Self {
			http_timeout: Duration::from_secs(10),
			cache_ttl: Duration::from_secs(3600),
			interception_timeout: Duration::from_secs(30),
			backend_concurrency: 4,
			resource_block_list: interception::default_block_list(),
		}
	}
}

/// Entry point of the resolution engine. Owns the HTTP clients and shares
/// one explicitly constructed cache across every pipeline invocation.
pub struct Resolver {
	config: ResolverConfig,
	cache: ResolutionCache,
	http: HttpClient,
	animepahe_client: OnceCell<HttpClient>,
}

impl Resolver {
	pub fn new(config: ResolverConfig, cache: ResolutionCache) -> Result<Self, ResolveError> {
		let http = HttpClient::new(config.http_timeout)?;
		Ok(Self {
			config,
			cache,
			http,
			animepahe_client: OnceCell::new(),
		})
	}

	async fn animepahe_client(&self) -> Result<&HttpClient, ResolveError> {
		self.animepahe_client
			.get_or_try_init(|| animepahe::create_client(self.config.http_timeout))
			.await
	}

	pub async fn search(
		&self,
		provider: Provider,
		query: &str,
	) -> Result<SearchResults, anyhow::Error> {
		let results = match provider {
			Provider::HiAnime => hianime::search(&self.http, query).await?,
			Provider::Gogoanime => gogoanime::search(&self.http, query).await?,
			Provider::AnimePahe => {
				animepahe::search(self.animepahe_client().await?, query).await?
			}
		};

		let closest_match = get_closest_match(query, &results).cloned();
		Ok(SearchResults {
			closest_match,
			results,
		})
	}

	pub async fn episodes(
		&self,
		provider: Provider,
		anime_id: &str,
	) -> Result<Vec<Episode>, anyhow::Error> {
		match provider {
			Provider::HiAnime => hianime::episodes(&self.http, anime_id).await,
			Provider::Gogoanime => gogoanime::episodes(&self.http, anime_id).await,
			Provider::AnimePahe => {
				animepahe::episodes(self.animepahe_client().await?, anime_id).await
			}
		}
	}

	/// Lists the alternate backends serving one episode.
	pub async fn servers(
		&self,
		provider: Provider,
		episode_key: &str,
	) -> Result<Vec<Server>, ResolveError> {
		match provider {
			Provider::HiAnime => hianime::servers(&self.http, episode_key).await,
			Provider::Gogoanime => gogoanime::servers(&self.http, episode_key).await,
			Provider::AnimePahe => {
				animepahe::servers(self.animepahe_client().await?, episode_key).await
			}
		}
	}

	/// Resolves one episode across all of its backends concurrently. Partial
	/// success is a success: the report lists what resolved and what failed
	/// with which kind. Only a total miss is an error.
	pub async fn resolve(
		&self,
		provider: Provider,
		anime_id: &str,
		episode_key: &str,
	) -> Result<BackendReport, ResolveError> {
		let servers = self.servers(provider, episode_key).await?;
		if servers.is_empty() {
			return Err(ResolveError::NoSourceFound);
		}

		let report = dispatch::run_backends(
			servers,
			self.config.backend_concurrency,
			|server| async move {
				self.resolve_server(provider, anime_id, episode_key, &server)
					.await
			},
		)
		.await;

		if report.resolved.is_empty() {
			return Err(ResolveError::NoSourceFound);
		}
		Ok(report)
	}

	/// Resolves a single embed reference, bypassing server discovery.
	pub async fn resolve_embed(
		&self,
		embed: &EmbedReference,
	) -> Result<ResolvedMedia, ResolveError> {
		let key = cache::source_key(embed.provider, "embed", &embed.episode_key, None);
		if let Some(media) = self.cache.get(&key).await {
			debug!(%key, "serving resolved sources from cache");
			return Ok(media);
		}

		let media = match embed.provider {
			Provider::HiAnime => hianime::resolve_embed(&self.http, &embed.url).await?,
			Provider::Gogoanime => {
				gogoanime::resolve_embed_url(
					&self.http,
					&embed.url,
					self.config.interception_timeout,
					&self.config.resource_block_list,
				)
				.await?
			}
			Provider::AnimePahe => {
				animepahe::resolve_embed(self.animepahe_client().await?, &embed.url).await?
			}
		};

		self.cache
			.set(key, media.clone(), self.config.cache_ttl)
			.await;
		Ok(media)
	}

	async fn resolve_server(
		&self,
		provider: Provider,
		anime_id: &str,
		episode_key: &str,
		server: &Server,
	) -> Result<ResolvedMedia, ResolveError> {
		let key = cache::source_key(provider, anime_id, episode_key, Some(&server.name));
		if let Some(media) = self.cache.get(&key).await {
			debug!(%key, "serving resolved sources from cache");
			return Ok(media);
		}

		let media = match provider {
			Provider::HiAnime => hianime::resolve_embed(&self.http, &server.url).await?,
			Provider::Gogoanime => {
				gogoanime::resolve_server(
					&self.http,
					server,
					self.config.interception_timeout,
					&self.config.resource_block_list,
				)
				.await?
			}
			Provider::AnimePahe => {
				animepahe::resolve_embed(self.animepahe_client().await?, &server.url).await?
			}
		};

		self.cache
			.set(key, media.clone(), self.config.cache_ttl)
			.await;
		Ok(media)
	}

	/// Community skip windows for an episode, looked up by title.
	pub async fn skip_times(
		&self,
		title: &str,
		ep_number: u16,
		ep_length: u32,
	) -> Result<Vec<SkipTimes>, anyhow::Error> {
		markers::skip_times(&self.http, title, ep_number, ep_length).await
	}
}

// https://github.com/rapidfuzz/strsim-rs/blob/main/src/lib.rs#L166
struct StringWrapper<'a>(&'a str);

impl<'b> IntoIterator for &StringWrapper<'b> {
	type Item = char;
	type IntoIter = Chars<'b>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.chars()
	}
}

// https://github.com/rapidfuzz/strsim-rs/blob/main/src/lib.rs#L233
fn generic_levenshtein<'a, 'b, Iter1, Iter2, Elem1, Elem2>(a: &'a Iter1, b: &'b Iter2) -> usize
where
	&'a Iter1: IntoIterator<Item = Elem1>,
	&'b Iter2: IntoIterator<Item = Elem2>,
	Elem1: PartialEq<Elem2>,
{
	let b_len = b.into_iter().count();

	let mut cache: Vec<usize> = (1..b_len + 1).collect();

	let mut result = b_len;

	for (i, a_elem) in a.into_iter().enumerate() {
		result = i + 1;
		let mut distance_b = i;

		for (j, b_elem) in b.into_iter().enumerate() {
			let cost = usize::from(a_elem != b_elem);
			let distance_a = distance_b + cost;
			distance_b = cache[j];
			result = min(result + 1, min(distance_a, distance_b + 1));
			cache[j] = result;
		}
	}

	result
}

fn levenshtein(a: &str, b: &str) -> usize {
	generic_levenshtein(&StringWrapper(a), &StringWrapper(b))
}

// https://github.com/rapidfuzz/strsim-rs/blob/main/src/lib.rs#L285
pub(crate) fn normalized_levenshtein(a: &str, b: &str) -> f64 {
	if a.is_empty() && b.is_empty() {
		return 1.0;
	}
	1.0 - (levenshtein(a, b) as f64) / (a.chars().count().max(b.chars().count()) as f64)
}

pub fn get_closest_match<'a>(query: &str, results: &'a [SearchResult]) -> Option<&'a SearchResult> {
	results.iter().max_by(|a, b| {
		normalized_levenshtein(query, &a.title).total_cmp(&normalized_levenshtein(query, &b.title))
	})
}
