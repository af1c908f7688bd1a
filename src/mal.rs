use anyhow::Context as _;
use serde_json::Value;

use crate::fetch::HttpClient;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalAnime {
	pub title: String,
	pub id: String,
}

/// Prefix search against MyAnimeList, returning the entry whose title sits
/// closest to the query.
pub(crate) async fn search(http: &HttpClient, query: &str) -> Result<MalAnime, anyhow::Error> {
	let json = http
		.get_json(
			&format!(
				"https://myanimelist.net/search/prefix.json?type=anime&keyword={}",
				urlencoding::encode(query)
			),
			&[],
		)
		.await?;
	best_match(&json, query)
}

fn best_match(json: &Value, query: &str) -> Result<MalAnime, anyhow::Error> {
	let items = json["categories"][0]["items"]
		.as_array()
		.context("no items")?;

	let results: Vec<MalAnime> = items
		.iter()
		.filter_map(|item| {
			let title = item["name"].as_str()?;
			let id = item["id"].as_u64()?;
			Some(MalAnime {
				title: title.to_string(),
				id: id.to_string(),
			})
		})
		.collect();

	let best = results
		.iter()
		.max_by(|a, b| {
			crate::normalized_levenshtein(&a.title, query)
				.total_cmp(&crate::normalized_levenshtein(&b.title, query))
		})
		.context("no results")?;

	Ok(best.clone())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_best_match_picks_closest_title() {
		let json = json!({
			"categories": [{
				"type": "anime",
				"items": [
					{ "name": "One Piece Film: Red", "id": 50410 },
					{ "name": "One Piece", "id": 21 },
					{ "name": "One Piece: Episode of Merry", "id": 19123 }
				]
			}]
		});
		let best = best_match(&json, "One Piece").unwrap();
		assert_eq!(
			best,
			MalAnime {
				title: "One Piece".to_string(),
				id: "21".to_string(),
			}
		);
	}

	#[test]
	fn test_best_match_requires_items() {
		assert!(best_match(&json!({}), "query").is_err());
	}
}
