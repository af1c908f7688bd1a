pub mod evp;
pub mod sources;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
	#[error("extraction scheme changed: {0}")]
	SchemeChanged(&'static str),
	#[error("failed to decrypt payload: {0}")]
	Decrypt(String),
}
