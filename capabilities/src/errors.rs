#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability not configured")]
    NotConfigured,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    BadResponse { status: u16, body: String },
    #[error("failed to parse provider response: {0}")]
    Parse(#[from] serde_json::Error),
}
