//! The node object read and label sanitization.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bytes::Bytes;
use http::{StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use regex::Regex;
use rustls::pki_types::ServerName;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::{LabelError, LabelResult};
use crate::kubeconfig::{ClusterAccess, ClusterAuth};

/// Overall time limit for the single node read at startup.
const NODE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch and sanitize the labels of one node.
pub async fn fetch_node_labels(
    access: &ClusterAccess,
    node_name: &str,
) -> LabelResult<BTreeMap<String, String>> {
    let body = tokio::time::timeout(NODE_LOOKUP_TIMEOUT, get_node(access, node_name))
        .await
        .map_err(|_| LabelError::Timeout(NODE_LOOKUP_TIMEOUT))??;

    let labels = labels_from_node_json(&body)?;
    debug!(count = labels.len(), "node labels fetched");

    Ok(labels
        .into_iter()
        .map(|(name, value)| (sanitize_label_name(&name), value))
        .collect())
}

async fn get_node(access: &ClusterAccess, node_name: &str) -> LabelResult<Bytes> {
    let uri: Uri = access
        .server
        .parse()
        .map_err(|_| LabelError::NodeFetch(format!("invalid server url {:?}", access.server)))?;
    let scheme = uri.scheme_str().unwrap_or("https");
    let host = uri
        .host()
        .ok_or_else(|| LabelError::NodeFetch(format!("invalid server url {:?}", access.server)))?
        .to_string();
    let port = uri
        .port_u16()
        .unwrap_or(if scheme == "http" { 80 } else { 443 });
    let addr = format!("{host}:{port}");

    let mut builder = http::Request::builder()
        .method("GET")
        .uri(format!("/api/v1/nodes/{node_name}"))
        .header("host", &addr)
        .header("accept", "application/json")
        .header("user-agent", "spotwatch/0.1");
    if let Some(token) = access.bearer_token() {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let req = builder
        .body(Empty::<Bytes>::new())
        .map_err(|e| LabelError::NodeFetch(e.to_string()))?;

    let stream = tokio::net::TcpStream::connect(&addr)
        .await
        .map_err(|e| LabelError::NodeFetch(format!("connect {addr}: {e}")))?;

    let (status, body) = if scheme == "http" {
        send_request(stream, req).await?
    } else {
        let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config(access)?));
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| LabelError::Tls(format!("server name {host:?}: {e}")))?;
        let tls = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| LabelError::Tls(format!("handshake with {addr}: {e}")))?;
        send_request(tls, req).await?
    };

    if status != StatusCode::OK {
        return Err(LabelError::NodeFetch(format!(
            "get node {node_name:?}: status {status}"
        )));
    }
    Ok(body)
}

async fn send_request<S>(
    stream: S,
    req: http::Request<Empty<Bytes>>,
) -> LabelResult<(StatusCode, Bytes)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| LabelError::NodeFetch(format!("handshake: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| LabelError::NodeFetch(format!("request: {e}")))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| LabelError::NodeFetch(format!("read response: {e}")))?
        .to_bytes();
    Ok((status, body))
}

fn tls_config(access: &ClusterAccess) -> LabelResult<rustls::ClientConfig> {
    let ca_pem = access.ca_pem.as_deref().ok_or_else(|| {
        LabelError::Tls("no certificate authority configured for https server".to_string())
    })?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &ca_pem[..]) {
        let cert = cert.map_err(|e| LabelError::Tls(format!("certificate authority: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| LabelError::Tls(format!("certificate authority: {e}")))?;
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    match &access.auth {
        ClusterAuth::ClientCert { cert_pem, key_pem } => {
            let certs = rustls_pemfile::certs(&mut &cert_pem[..])
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| LabelError::Tls(format!("client certificate: {e}")))?;
            let key = rustls_pemfile::private_key(&mut &key_pem[..])
                .map_err(|e| LabelError::Tls(format!("client key: {e}")))?
                .ok_or_else(|| LabelError::Tls("client key file holds no key".to_string()))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| LabelError::Tls(format!("client certificate: {e}")))
        }
        ClusterAuth::Token(_) | ClusterAuth::Anonymous => Ok(builder.with_no_client_auth()),
    }
}

impl ClusterAccess {
    fn bearer_token(&self) -> Option<&str> {
        match &self.auth {
            ClusterAuth::Token(token) => Some(token),
            _ => None,
        }
    }
}

fn labels_from_node_json(body: &[u8]) -> LabelResult<BTreeMap<String, String>> {
    #[derive(Deserialize)]
    struct Node {
        #[serde(default)]
        metadata: NodeMetadata,
    }

    #[derive(Default, Deserialize)]
    struct NodeMetadata {
        #[serde(default)]
        labels: BTreeMap<String, String>,
    }

    let node: Node = serde_json::from_slice(body)
        .map_err(|e| LabelError::NodeFetch(format!("decode node object: {e}")))?;
    Ok(node.metadata.labels)
}

static INVALID_LABEL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-zA-Z0-9_]").unwrap());

/// Rewrite a Kubernetes label name into a valid Prometheus label name:
/// invalid characters become `_` and a leading digit gains a `_` prefix.
pub fn sanitize_label_name(name: &str) -> String {
    let sanitized = INVALID_LABEL_CHARS.replace_all(name, "_");
    if sanitized.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("_{sanitized}")
    } else {
        sanitized.into_owned()
    }
}
