//! spotwatch-labels — static gauge labels from the Kubernetes node object.
//!
//! When the exporter runs as a DaemonSet it can decorate every gauge with
//! the labels of the node it sits on. That decoration happens exactly once,
//! at startup: resolve cluster access, read the node object named by
//! `$NODE_NAME`, sanitize the label names, and hand the frozen map to the
//! collector. Nothing here runs during a scrape.
//!
//! Cluster access resolution tries an explicit kubeconfig path first,
//! then in-cluster service account credentials, then the default
//! kubeconfig.

pub mod error;
pub mod kubeconfig;
pub mod node;

use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

pub use error::{LabelError, LabelResult};
pub use kubeconfig::{ClusterAccess, ClusterAuth};
pub use node::{fetch_node_labels, sanitize_label_name};

/// Resolve the static label set for the node this process runs on.
///
/// Requires the `NODE_NAME` environment variable. Any failure here is a
/// configuration error; callers treat it as fatal at startup.
pub async fn resolve_node_labels(kubeconfig: Option<&Path>) -> LabelResult<BTreeMap<String, String>> {
    let node_name = std::env::var("NODE_NAME").map_err(|_| LabelError::NodeNameMissing)?;
    let access = ClusterAccess::resolve(kubeconfig)?;

    info!(node = %node_name, server = %access.server, "looking up node labels");
    fetch_node_labels(&access, &node_name).await
}
