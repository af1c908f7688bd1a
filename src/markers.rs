use anyhow::Context as _;
use serde_json::Value;

use crate::{fetch::HttpClient, mal, SkipMarker};

#[derive(Debug, PartialEq)]
pub struct SkipTimes {
	pub marker: SkipMarker,
	pub kind: SkipKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipKind {
	Opening,
	Ending,
	Recap,
}

/// Community-sourced intro/outro windows, for providers whose payloads do
/// not carry their own markers.
pub(crate) async fn skip_times(
	http: &HttpClient,
	title: &str,
	ep_number: u16,
	ep_length: u32,
) -> Result<Vec<SkipTimes>, anyhow::Error> {
	let mal_id = mal::search(http, title).await?.id;
	let json = http
		.get_json(
			&format!(
				"https://api.aniskip.com/v2/skip-times/{mal_id}/{ep_number}\
				?types[]=ed&types[]=mixed-ed&types[]=mixed-op&types[]=op&types[]=recap\
				&episodeLength={ep_length}"
			),
			&[],
		)
		.await?;
	parse_skip_times(&json)
}

fn parse_skip_times(json: &Value) -> Result<Vec<SkipTimes>, anyhow::Error> {
	let results = json["results"].as_array().context("no results")?;

	let skip_times = results
		.iter()
		.filter_map(|result| {
			let start = result["interval"]["startTime"].as_f64()? as f32;
			let end = result["interval"]["endTime"].as_f64()? as f32;
			let kind = match result["skipType"].as_str()? {
				"ed" | "mixed-ed" => SkipKind::Ending,
				"op" | "mixed-op" => SkipKind::Opening,
				"recap" => SkipKind::Recap,
				_ => return None,
			};

			Some(SkipTimes {
				marker: SkipMarker { start, end },
				kind,
			})
		})
		.collect();

	Ok(skip_times)
}
