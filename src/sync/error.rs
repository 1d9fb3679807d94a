use thiserror::Error;

/// Errors from setting up or talking to a sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
	#[error("invalid events URL: {0}")]
	InvalidUrl(#[from] url::ParseError),

	#[error("failed to build HTTP client: {0}")]
	Client(#[from] reqwest::Error),

	#[error("sync engine is closed")]
	EngineClosed,
}
