//! Error types for node label resolution.

use std::time::Duration;

use thiserror::Error;

pub type LabelResult<T> = Result<T, LabelError>;

/// Errors from resolving cluster access or reading the node object.
///
/// All of these are startup configuration errors; none occur mid-scrape.
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("required NODE_NAME environment variable is not set")]
    NodeNameMissing,

    #[error("no cluster configuration found: {0}")]
    NoClusterConfig(String),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("node lookup failed: {0}")]
    NodeFetch(String),

    #[error("node lookup timed out after {0:?}")]
    Timeout(Duration),
}
