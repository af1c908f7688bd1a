use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::RwLock, time::Instant};
use tracing::debug;

use crate::{Provider, ResolvedMedia};

/// Memoizes resolved sources so repeated requests skip the expensive
/// extraction pipelines. Entries expire by TTL only; there is no upstream
/// invalidation. The handle is cheap to clone and safe to share across
/// concurrent pipeline runs (last writer wins).
#[derive(Clone, Default)]
pub struct ResolutionCache {
	inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

struct CacheEntry {
	value: ResolvedMedia,
	expires_at: Instant,
}

impl ResolutionCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn has(&self, key: &str) -> bool {
		let entries = self.inner.read().await;
		entries
			.get(key)
			.is_some_and(|entry| entry.expires_at > Instant::now())
	}

	/// Returns a copy of the cached value, or nothing if the entry is absent
	/// or expired. Expired entries are dropped on the way out so the map does
	/// not grow without bound.
	pub async fn get(&self, key: &str) -> Option<ResolvedMedia> {
		{
			let entries = self.inner.read().await;
			match entries.get(key) {
				Some(entry) if entry.expires_at > Instant::now() => {
					return Some(entry.value.clone())
				}
				Some(_) => {}
				None => return None,
			}
		}

		let mut entries = self.inner.write().await;
		if let Some(entry) = entries.get(key) {
			if entry.expires_at > Instant::now() {
				return Some(entry.value.clone());
			}
			debug!(%key, "evicting expired cache entry");
			entries.remove(key);
		}
		None
	}

	pub async fn set(&self, key: String, value: ResolvedMedia, ttl: Duration) {
		let entry = CacheEntry {
			value,
			expires_at: Instant::now() + ttl,
		};
		self.inner.write().await.insert(key, entry);
	}
}

/// Deterministic cache key: identical requests always address the same entry.
pub(crate) fn source_key(
	provider: Provider,
	anime_id: &str,
	episode_key: &str,
	server: Option<&str>,
) -> String {
	match server {
		Some(server) => format!("{provider}:sources:{anime_id}:{episode_key}:{server}"),
		None => format!("{provider}:sources:{anime_id}:{episode_key}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ManifestSource;

	fn media(url: &str) -> ResolvedMedia {
		ResolvedMedia {
			sources: vec![ManifestSource {
				url: url.to_string(),
				mime_type: "hls".to_string(),
				is_backup: false,
			}],
			..Default::default()
		}
	}

	#[tokio::test]
	async fn test_set_then_get() {
		let cache = ResolutionCache::new();
		let value = media("https://cdn.example/master.m3u8");
		cache
			.set("k".to_string(), value.clone(), Duration::from_secs(1))
			.await;
		assert!(cache.has("k").await);
		assert_eq!(cache.get("k").await, Some(value));
	}

	#[tokio::test(start_paused = true)]
	async fn test_entries_expire_by_ttl() {
		let cache = ResolutionCache::new();
		cache
			.set(
				"k".to_string(),
				media("https://cdn.example/master.m3u8"),
				Duration::from_secs(1),
			)
			.await;

		tokio::time::advance(Duration::from_millis(1500)).await;

		assert!(!cache.has("k").await);
		assert_eq!(cache.get("k").await, None);
	}

	#[tokio::test]
	async fn test_last_writer_wins() {
		let cache = ResolutionCache::new();
		let first = media("https://cdn.example/a.m3u8");
		let second = media("https://cdn.example/b.m3u8");
		cache
			.set("k".to_string(), first, Duration::from_secs(60))
			.await;
		cache
			.set("k".to_string(), second.clone(), Duration::from_secs(60))
			.await;
		assert_eq!(cache.get("k").await, Some(second));
	}

	#[test]
	fn test_source_key_shape() {
		assert_eq!(
			source_key(Provider::HiAnime, "100", "2142", Some("HD-1")),
			"hianime:sources:100:2142:HD-1"
		);
		assert_eq!(
			source_key(Provider::AnimePahe, "4", "abc/def", None),
			"animepahe:sources:4:abc/def"
		);
	}
}
