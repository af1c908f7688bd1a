use std::collections::BTreeMap;
use std::future::Future;

use futures::{stream, StreamExt as _};
use tracing::warn;

use crate::{error::ResolveError, ResolvedMedia, Server};

/// Outcome of resolving one episode across its alternate backends. Partial
/// success is a valid result: failures are reported per backend instead of
/// poisoning the whole episode.
#[derive(Debug, Default)]
pub struct BackendReport {
	pub resolved: BTreeMap<String, ResolvedMedia>,
	pub failed: BTreeMap<String, ResolveError>,
}

impl BackendReport {
	pub fn is_empty(&self) -> bool {
		self.resolved.is_empty() && self.failed.is_empty()
	}
}

/// Runs every backend's pipeline concurrently and merges the outcomes keyed
/// by backend name. One backend failing neither cancels nor contaminates the
/// others.
pub(crate) async fn run_backends<F, Fut>(
	servers: Vec<Server>,
	concurrency: usize,
	run: F,
) -> BackendReport
where
	F: Fn(Server) -> Fut,
	Fut: Future<Output = Result<ResolvedMedia, ResolveError>>,
{
	let outcomes = stream::iter(servers.into_iter().map(|server| {
		let name = server.name.clone();
		let fut = run(server);
		async move { (name, fut.await) }
	}))
	.buffer_unordered(concurrency.max(1))
	.collect::<Vec<_>>()
	.await;

	let mut report = BackendReport::default();
	for (name, outcome) in outcomes {
		match outcome {
			Ok(media) => {
				report.resolved.insert(name, media);
			}
			Err(error) => {
				warn!(backend = %name, kind = error.kind(), %error, "backend pipeline failed");
				report.failed.insert(name, error);
			}
		}
	}
	report
}
