use euglena_cryptography::CryptoError;
use thiserror::Error;

use crate::unpacker::UnpackError;

/// Every failure a resolution pipeline can surface. Internal errors are
/// converted to one of these kinds at the pipeline boundary; nothing else
/// escapes to callers.
#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("unsupported provider `{0}`")]
	UnsupportedProvider(String),
	#[error("extraction scheme changed: {0}")]
	SchemeChanged(String),
	#[error(transparent)]
	Unpack(#[from] UnpackError),
	#[error("failed to decrypt sources: {0}")]
	Decrypt(String),
	#[error("timed out waiting for a manifest request")]
	InterceptionTimeout,
	#[error("transport failure: {0}")]
	Transport(String),
	#[error("upstream responded with status {0}")]
	UpstreamStatus(u16),
	#[error("no playable source found")]
	NoSourceFound,
}

impl ResolveError {
	/// Transient failures are worth retrying with backoff; a changed scheme
	/// or a malformed payload is not going to fix itself.
	pub fn is_retryable(&self) -> bool {
		match self {
			ResolveError::Transport(_) | ResolveError::InterceptionTimeout => true,
			ResolveError::UpstreamStatus(status) => *status >= 500,
			_ => false,
		}
	}

	pub fn kind(&self) -> &'static str {
		match self {
			ResolveError::UnsupportedProvider(_) => "unsupported-provider",
			ResolveError::SchemeChanged(_) => "scheme-changed",
			ResolveError::Unpack(_) => "unpack",
			ResolveError::Decrypt(_) => "decrypt",
			ResolveError::InterceptionTimeout => "interception-timeout",
			ResolveError::Transport(_) => "transport",
			ResolveError::UpstreamStatus(_) => "upstream-status",
			ResolveError::NoSourceFound => "no-source-found",
		}
	}
}

impl From<CryptoError> for ResolveError {
	fn from(err: CryptoError) -> Self {
		match err {
			CryptoError::SchemeChanged(what) => ResolveError::SchemeChanged(what.to_string()),
			CryptoError::Decrypt(what) => ResolveError::Decrypt(what),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_retryable_classification() {
		assert!(ResolveError::Transport("connection reset".to_string()).is_retryable());
		assert!(ResolveError::InterceptionTimeout.is_retryable());
		assert!(ResolveError::UpstreamStatus(503).is_retryable());
		assert!(!ResolveError::UpstreamStatus(404).is_retryable());
		assert!(!ResolveError::SchemeChanged("player rewrite".to_string()).is_retryable());
		assert!(!ResolveError::Decrypt("bad padding".to_string()).is_retryable());
	}
}
