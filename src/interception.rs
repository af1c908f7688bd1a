use std::time::Duration;

use chromiumoxide::{
	cdp::browser_protocol::{
		fetch::{
			ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams,
			RequestPattern, RequestStage,
		},
		network::{ErrorReason, ResourceType},
	},
	Browser, BrowserConfig, Page,
};
use futures::StreamExt as _;
use tokio::{sync::oneshot, task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use crate::error::ResolveError;

const MANIFEST_MARKER: &str = ".m3u8";
const TELEMETRY_MARKER: &str = "ping.gif";
const PLAYBACK_POLL: Duration = Duration::from_millis(250);

// Many embeds only request the manifest once playback starts, so poke every
// play affordance we know of and the media element itself.
const ACTIVATE_PLAYBACK: &str = r#"(() => {
	const affordance = document.querySelector(
		'.jw-icon-display, .vjs-big-play-button, .plyr__control--overlaid, #start, .play-button'
	);
	if (affordance) affordance.click();
	const video = document.querySelector('video');
	if (video) {
		video.muted = true;
		const attempt = video.play();
		if (attempt && attempt.catch) attempt.catch(() => {});
	}
	return true;
})()"#;

const IS_PLAYING: &str = r#"(() => {
	const video = document.querySelector('video');
	return !!video && !video.paused && !video.ended;
})()"#;

/// Resource classes the session refuses to load. Blocking stays active for
/// the whole session lifetime, independent of the capture latch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockedResource {
	Image,
	Stylesheet,
	Font,
}

impl BlockedResource {
	fn as_cdp(self) -> ResourceType {
		match self {
			BlockedResource::Image => ResourceType::Image,
			BlockedResource::Stylesheet => ResourceType::Stylesheet,
			BlockedResource::Font => ResourceType::Font,
		}
	}
}

pub(crate) fn default_block_list() -> Vec<BlockedResource> {
	vec![
		BlockedResource::Image,
		BlockedResource::Stylesheet,
		BlockedResource::Font,
	]
}

#[derive(Debug, PartialEq, Eq)]
enum RequestVerdict {
	Allow,
	Abort,
}

fn request_verdict(resource_type: &ResourceType, block_list: &[ResourceType]) -> RequestVerdict {
	if block_list.contains(resource_type) {
		RequestVerdict::Abort
	} else {
		RequestVerdict::Allow
	}
}

/// Latches the first manifest-looking URL that is not telemetry. Observation
/// never withholds a request; requests seen after the latch, including the
/// one that set it, proceed untouched.
#[derive(Debug, Default)]
struct ManifestLatch {
	captured: Option<String>,
}

impl ManifestLatch {
	fn matches(url: &str) -> bool {
		url.contains(MANIFEST_MARKER) && !url.contains(TELEMETRY_MARKER)
	}

	fn observe(&mut self, url: &str) -> Option<String> {
		if self.captured.is_none() && Self::matches(url) {
			self.captured = Some(url.to_string());
			return self.captured.clone();
		}
		None
	}
}

/// Drives a disposable browser session to the embed page and reports the
/// first manifest URL the page requests. The session is torn down on every
/// exit path, including cancellation of the deadline.
pub(crate) async fn resolve_via_interception(
	embed_url: &str,
	timeout: Duration,
	block_list: &[BlockedResource],
) -> Result<String, ResolveError> {
	let mut session = InterceptSession::launch().await?;
	let outcome = session.capture(embed_url, timeout, block_list).await;
	session.shutdown().await;
	outcome
}

struct InterceptSession {
	browser: Browser,
	handler: JoinHandle<()>,
	interceptor: Option<JoinHandle<()>>,
}

impl InterceptSession {
	async fn launch() -> Result<Self, ResolveError> {
		let config = BrowserConfig::builder()
			.args(vec![
				"--autoplay-policy=no-user-gesture-required",
				"--mute-audio",
				"--no-first-run",
				"--disable-background-networking",
			])
			.build()
			.map_err(ResolveError::Transport)?;

		let (browser, mut handler) = Browser::launch(config).await.map_err(cdp)?;
		let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

		Ok(Self {
			browser,
			handler,
			interceptor: None,
		})
	}

	async fn capture(
		&mut self,
		embed_url: &str,
		timeout: Duration,
		block_list: &[BlockedResource],
	) -> Result<String, ResolveError> {
		let page = self.browser.new_page("about:blank").await.map_err(cdp)?;

		page.execute(EnableParams {
			patterns: Some(vec![RequestPattern {
				url_pattern: Some("*".to_string()),
				resource_type: None,
				request_stage: Some(RequestStage::Request),
			}]),
			handle_auth_requests: None,
		})
		.await
		.map_err(cdp)?;

		let mut requests = page
			.event_listener::<EventRequestPaused>()
			.await
			.map_err(cdp)?;

		let (capture_tx, capture_rx) = oneshot::channel();
		let interceptor_page = page.clone();
		let blocked: Vec<ResourceType> = block_list.iter().map(|b| b.as_cdp()).collect();
		self.interceptor = Some(tokio::spawn(async move {
			let mut latch = ManifestLatch::default();
			let mut capture_tx = Some(capture_tx);
			while let Some(event) = requests.next().await {
				let request_id = event.request_id.clone();
				if request_verdict(&event.resource_type, &blocked) == RequestVerdict::Abort {
					let _ = interceptor_page
						.execute(FailRequestParams::new(
							request_id,
							ErrorReason::BlockedByClient,
						))
						.await;
					continue;
				}
				if let Some(url) = latch.observe(&event.request.url) {
					debug!(%url, "captured manifest request");
					if let Some(tx) = capture_tx.take() {
						let _ = tx.send(url);
					}
				}
				let _ = interceptor_page
					.execute(ContinueRequestParams::new(request_id))
					.await;
			}
		}));

		page.goto(embed_url).await.map_err(cdp)?;
		let _ = page.wait_for_navigation().await;

		if let Err(err) = page.evaluate(ACTIVATE_PLAYBACK).await {
			debug!(error = %err, "play affordance activation failed");
		}

		await_capture(&page, capture_rx, timeout).await
	}

	async fn shutdown(mut self) {
		if let Some(interceptor) = self.interceptor.take() {
			interceptor.abort();
		}
		if let Err(err) = self.browser.close().await {
			debug!(error = %err, "browser close failed");
		}
		let _ = self.browser.wait().await;
		self.handler.abort();
	}
}

impl Drop for InterceptSession {
	fn drop(&mut self) {
		self.handler.abort();
		if let Some(interceptor) = &self.interceptor {
			interceptor.abort();
		}
	}
}

async fn await_capture(
	page: &Page,
	capture: oneshot::Receiver<String>,
	timeout: Duration,
) -> Result<String, ResolveError> {
	let deadline = sleep(timeout);
	tokio::pin!(deadline);
	let playback = wait_for_playback(page);
	tokio::pin!(playback);
	let mut capture = capture;
	let mut playing = false;

	loop {
		tokio::select! {
			url = &mut capture => {
				return url.map_err(|_| ResolveError::InterceptionTimeout);
			}
			_ = &mut playback, if !playing => {
				playing = true;
				debug!("media element reports playback; waiting for the manifest request");
			}
			_ = &mut deadline => {
				warn!(%playing, "interception deadline elapsed without a manifest capture");
				return Err(ResolveError::InterceptionTimeout);
			}
		}
	}
}

async fn wait_for_playback(page: &Page) {
	loop {
		let playing = match page.evaluate(IS_PLAYING).await {
			Ok(result) => result.into_value::<bool>().unwrap_or(false),
			Err(_) => false,
		};
		if playing {
			return;
		}
		sleep(PLAYBACK_POLL).await;
	}
}

fn cdp(err: chromiumoxide::error::CdpError) -> ResolveError {
	ResolveError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_first_non_telemetry_manifest_wins_and_nothing_is_withheld() {
		let stream = [
			("https://embed.example/js/player.min.js", ResourceType::Script),
			("https://tracker.example/ping.gif?file=master.m3u8", ResourceType::Image),
			("https://cdn-a.example/hls/master.m3u8", ResourceType::Xhr),
			("https://cdn-b.example/hls/index-720.m3u8", ResourceType::Xhr),
			("https://cdn-c.example/hls/index-1080.m3u8", ResourceType::Xhr),
		];

		let mut latch = ManifestLatch::default();
		let mut captures = Vec::new();
		for (url, resource_type) in &stream {
			// Latch observation is independent of the block verdict; no
			// request is ever dropped because of the capture itself.
			assert_eq!(request_verdict(resource_type, &[]), RequestVerdict::Allow);
			if let Some(url) = latch.observe(url) {
				captures.push(url);
			}
		}

		assert_eq!(captures, vec!["https://cdn-a.example/hls/master.m3u8"]);
		assert_eq!(latch.captured.as_deref(), Some("https://cdn-a.example/hls/master.m3u8"));
	}

	#[test]
	fn test_blocked_resource_types_abort_for_the_whole_session() {
		let blocked: Vec<ResourceType> =
			default_block_list().iter().map(|b| b.as_cdp()).collect();

		assert_eq!(
			request_verdict(&ResourceType::Image, &blocked),
			RequestVerdict::Abort
		);
		assert_eq!(
			request_verdict(&ResourceType::Stylesheet, &blocked),
			RequestVerdict::Abort
		);
		assert_eq!(
			request_verdict(&ResourceType::Xhr, &blocked),
			RequestVerdict::Allow
		);
		assert_eq!(
			request_verdict(&ResourceType::Document, &blocked),
			RequestVerdict::Allow
		);
	}

	#[test]
	fn test_telemetry_pattern_is_excluded_even_with_manifest_marker() {
		let mut latch = ManifestLatch::default();
		assert_eq!(latch.observe("https://t.example/ping.gif?u=a.m3u8"), None);
		assert!(latch.observe("https://cdn.example/a.m3u8").is_some());
	}
}
