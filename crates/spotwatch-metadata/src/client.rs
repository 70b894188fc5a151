//! IMDS request plumbing.
//!
//! One TCP connection per request, driven through a hyper http1 handshake
//! under a fixed timeout. The metadata service is link-local, so connection
//! setup cost is irrelevant next to keeping the client stateless.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use thiserror::Error;
use tracing::debug;

/// Per-request timeout. The metadata service answers in microseconds when
/// it answers at all; anything slower is treated as unreachable.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// TTL requested for a negotiated session token, in seconds.
const TOKEN_TTL_SECONDS: &str = "21600";

const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";

/// Errors from talking to the metadata service.
///
/// A 404 response is not an error; it arrives as a [`FetchResponse`].
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("invalid metadata url: {0}")]
    InvalidUrl(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("token endpoint returned status {0}")]
    TokenRejected(StatusCode),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Status and body of a completed metadata request.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl FetchResponse {
    /// Whether the endpoint reported the feature as absent.
    pub fn not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    /// Body as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The seam the collector scrapes through.
///
/// Implemented by [`MetadataClient`] for the real service and by scripted
/// sources in tests.
pub trait MetadataSource {
    /// Negotiate a session token for the newer metadata protocol.
    fn negotiate_token(&self) -> impl Future<Output = MetadataResult<String>> + Send;

    /// GET a path relative to the metadata base, attaching the session
    /// token when one was negotiated this scrape.
    fn get(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> impl Future<Output = MetadataResult<FetchResponse>> + Send;
}

/// HTTP client for the instance metadata service.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    /// Base URL for metadata paths, always with a trailing slash.
    metadata_base: String,
    /// Full URL of the token endpoint.
    token_endpoint: String,
    timeout: Duration,
}

impl MetadataClient {
    /// Create a client for the given metadata base and token endpoint URLs.
    pub fn new(metadata_base: &str, token_endpoint: &str) -> MetadataResult<Self> {
        validate_url(metadata_base)?;
        validate_url(token_endpoint)?;

        let metadata_base = if metadata_base.ends_with('/') {
            metadata_base.to_string()
        } else {
            format!("{metadata_base}/")
        };

        Ok(Self {
            metadata_base,
            token_endpoint: token_endpoint.to_string(),
            timeout: REQUEST_TIMEOUT,
        })
    }

    fn metadata_url(&self, path: &str) -> String {
        format!("{}{}", self.metadata_base, path)
    }

    /// One request against the service: connect, handshake, send, read.
    async fn request(
        &self,
        method: Method,
        url: &str,
        token: Option<&str>,
        token_ttl: Option<&str>,
    ) -> MetadataResult<FetchResponse> {
        let uri: Uri = url
            .parse()
            .map_err(|_| MetadataError::InvalidUrl(url.to_string()))?;
        let host = uri
            .host()
            .ok_or_else(|| MetadataError::InvalidUrl(url.to_string()))?
            .to_string();
        let port = uri.port_u16().unwrap_or(80);
        let addr = format!("{host}:{port}");

        let attempt = async {
            let stream = tokio::net::TcpStream::connect(&addr)
                .await
                .map_err(|e| MetadataError::Connect(e.to_string()))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| MetadataError::Connect(e.to_string()))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let mut builder = http::Request::builder()
                .method(method)
                .uri(url)
                .header("host", &addr)
                .header("user-agent", "spotwatch/0.1");
            if let Some(token) = token {
                builder = builder.header(TOKEN_HEADER, token);
            }
            if let Some(ttl) = token_ttl {
                builder = builder.header(TOKEN_TTL_HEADER, ttl);
            }
            let req = builder
                .body(Empty::<Bytes>::new())
                .map_err(|e| MetadataError::Request(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| MetadataError::Request(e.to_string()))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| MetadataError::Request(e.to_string()))?
                .to_bytes();

            Ok(FetchResponse { status, body })
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%url, timeout = ?self.timeout, "metadata request timed out");
                Err(MetadataError::Timeout(self.timeout))
            }
        }
    }
}

impl MetadataSource for MetadataClient {
    /// PUT against the token endpoint with the fixed TTL header.
    ///
    /// The token is renegotiated on every scrape rather than cached, so
    /// expiry never has to be tracked.
    async fn negotiate_token(&self) -> MetadataResult<String> {
        let resp = self
            .request(Method::PUT, &self.token_endpoint, None, Some(TOKEN_TTL_SECONDS))
            .await?;

        if !resp.status.is_success() {
            return Err(MetadataError::TokenRejected(resp.status));
        }
        Ok(resp.text())
    }

    async fn get(&self, path: &str, token: Option<&str>) -> MetadataResult<FetchResponse> {
        let url = self.metadata_url(path);
        self.request(Method::GET, &url, token, None).await
    }
}

fn validate_url(url: &str) -> MetadataResult<()> {
    let uri: Uri = url
        .parse()
        .map_err(|_| MetadataError::InvalidUrl(url.to_string()))?;
    if uri.host().is_none() {
        return Err(MetadataError::InvalidUrl(url.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_urls() {
        assert!(MetadataClient::new("not a url", "http://169.254.169.254/latest/api/token").is_err());
        assert!(MetadataClient::new("http://169.254.169.254/latest/meta-data/", "/just-a-path").is_err());
    }

    #[test]
    fn metadata_url_joins_with_trailing_slash() {
        let client = MetadataClient::new(
            "http://169.254.169.254/latest/meta-data/",
            "http://169.254.169.254/latest/api/token",
        )
        .unwrap();
        assert_eq!(
            client.metadata_url("spot/instance-action"),
            "http://169.254.169.254/latest/meta-data/spot/instance-action"
        );
    }

    #[test]
    fn metadata_url_inserts_missing_slash() {
        let client = MetadataClient::new(
            "http://169.254.169.254/latest/meta-data",
            "http://169.254.169.254/latest/api/token",
        )
        .unwrap();
        assert_eq!(
            client.metadata_url("instance-id"),
            "http://169.254.169.254/latest/meta-data/instance-id"
        );
    }

    #[test]
    fn not_found_is_a_response_not_an_error() {
        let resp = FetchResponse {
            status: StatusCode::NOT_FOUND,
            body: Bytes::new(),
        };
        assert!(resp.not_found());

        let resp = FetchResponse {
            status: StatusCode::OK,
            body: Bytes::from_static(b"i-1234"),
        };
        assert!(!resp.not_found());
        assert_eq!(resp.text(), "i-1234");
    }

    #[tokio::test]
    async fn connect_failure_is_a_transport_error() {
        // Port 1 on localhost is assumed closed.
        let client =
            MetadataClient::new("http://127.0.0.1:1/meta-data/", "http://127.0.0.1:1/token")
                .unwrap();
        let err = client.get("instance-id", None).await.unwrap_err();
        assert!(matches!(
            err,
            MetadataError::Connect(_) | MetadataError::Timeout(_)
        ));
    }
}
