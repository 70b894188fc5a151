//! Cluster access resolution.
//!
//! Honors the subset of kubeconfig this exporter needs: the current
//! context's cluster server, certificate authority, and either a bearer
//! token or a client certificate. Exec plugins and auth providers are not
//! supported; deployments that need them should mount a token instead.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use crate::error::{LabelError, LabelResult};

/// Conventional mount path for in-cluster service account credentials.
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Everything needed to issue one request against the API server.
#[derive(Debug, Clone)]
pub struct ClusterAccess {
    /// Server URL, e.g. `https://10.96.0.1:443`.
    pub server: String,
    /// PEM bundle to verify the server with, when the scheme is https.
    pub ca_pem: Option<Vec<u8>>,
    pub auth: ClusterAuth,
}

/// How to authenticate against the API server.
#[derive(Debug, Clone)]
pub enum ClusterAuth {
    Token(String),
    ClientCert { cert_pem: Vec<u8>, key_pem: Vec<u8> },
    Anonymous,
}

impl ClusterAccess {
    /// Resolve cluster access: explicit kubeconfig path, then in-cluster
    /// credentials, then the default kubeconfig.
    pub fn resolve(kubeconfig: Option<&Path>) -> LabelResult<Self> {
        if let Some(path) = kubeconfig {
            return Self::from_kubeconfig_file(path);
        }
        if let Some(access) = Self::in_cluster()? {
            return Ok(access);
        }
        let default = default_kubeconfig_path().ok_or_else(|| {
            LabelError::NoClusterConfig(
                "not running in-cluster and no kubeconfig available".to_string(),
            )
        })?;
        Self::from_kubeconfig_file(&default)
    }

    /// Service account credentials mounted into the pod, if present.
    fn in_cluster() -> LabelResult<Option<Self>> {
        let (Ok(host), Ok(port)) = (
            std::env::var("KUBERNETES_SERVICE_HOST"),
            std::env::var("KUBERNETES_SERVICE_PORT"),
        ) else {
            return Ok(None);
        };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        if !dir.join("token").exists() {
            return Ok(None);
        }

        let token = std::fs::read_to_string(dir.join("token"))
            .map_err(|e| LabelError::NoClusterConfig(format!("service account token: {e}")))?;
        let ca_pem = std::fs::read(dir.join("ca.crt"))
            .map_err(|e| LabelError::NoClusterConfig(format!("service account ca.crt: {e}")))?;

        Ok(Some(Self {
            server: format!("https://{host}:{port}"),
            ca_pem: Some(ca_pem),
            auth: ClusterAuth::Token(token.trim().to_string()),
        }))
    }

    pub fn from_kubeconfig_file(path: &Path) -> LabelResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LabelError::Kubeconfig(format!("read {}: {e}", path.display())))?;
        let config: Kubeconfig = serde_yaml_ng::from_str(&content)
            .map_err(|e| LabelError::Kubeconfig(format!("parse {}: {e}", path.display())))?;
        access_from(config, path.parent().unwrap_or(Path::new(".")))
    }
}

/// Pick the current context out of a parsed kubeconfig and load its
/// credential material. `base_dir` anchors relative file references.
fn access_from(config: Kubeconfig, base_dir: &Path) -> LabelResult<ClusterAccess> {
    let context_name = config
        .current_context
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| LabelError::Kubeconfig("no current-context set".to_string()))?;

    let context = config
        .contexts
        .iter()
        .find(|c| c.name == context_name)
        .map(|c| &c.context)
        .ok_or_else(|| LabelError::Kubeconfig(format!("context {context_name:?} not found")))?;

    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == context.cluster)
        .map(|c| &c.cluster)
        .ok_or_else(|| {
            LabelError::Kubeconfig(format!("cluster {:?} not found", context.cluster))
        })?;

    let user = config
        .users
        .iter()
        .find(|u| u.name == context.user)
        .map(|u| &u.user)
        .ok_or_else(|| LabelError::Kubeconfig(format!("user {:?} not found", context.user)))?;

    let ca_pem = pem_material(
        base_dir,
        cluster.certificate_authority_data.as_deref(),
        cluster.certificate_authority.as_deref(),
        "certificate-authority",
    )?;

    let auth = if let Some(token) = user.token.as_deref().filter(|t| !t.is_empty()) {
        ClusterAuth::Token(token.to_string())
    } else {
        let cert = pem_material(
            base_dir,
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
            "client-certificate",
        )?;
        let key = pem_material(
            base_dir,
            user.client_key_data.as_deref(),
            user.client_key.as_deref(),
            "client-key",
        )?;
        match (cert, key) {
            (Some(cert_pem), Some(key_pem)) => ClusterAuth::ClientCert { cert_pem, key_pem },
            (None, None) => ClusterAuth::Anonymous,
            _ => {
                return Err(LabelError::Kubeconfig(
                    "client-certificate and client-key must both be set".to_string(),
                ));
            }
        }
    };

    Ok(ClusterAccess {
        server: cluster.server.clone(),
        ca_pem,
        auth,
    })
}

/// Load a PEM blob from inline base64 data or a referenced file.
fn pem_material(
    base_dir: &Path,
    data: Option<&str>,
    file: Option<&Path>,
    what: &str,
) -> LabelResult<Option<Vec<u8>>> {
    if let Some(data) = data {
        let decoded = BASE64
            .decode(data.trim())
            .map_err(|e| LabelError::Kubeconfig(format!("{what}-data: {e}")))?;
        return Ok(Some(decoded));
    }
    if let Some(file) = file {
        let path = if file.is_absolute() {
            file.to_path_buf()
        } else {
            base_dir.join(file)
        };
        let bytes = std::fs::read(&path)
            .map_err(|e| LabelError::Kubeconfig(format!("{what} {}: {e}", path.display())))?;
        return Ok(Some(bytes));
    }
    Ok(None)
}

fn default_kubeconfig_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("KUBECONFIG") {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| Path::new(&home).join(".kube").join("config"))
}

// ── Kubeconfig wire format (subset) ────────────────────────────

#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
struct Cluster {
    server: String,
    #[serde(rename = "certificate-authority", default)]
    certificate_authority: Option<PathBuf>,
    #[serde(rename = "certificate-authority-data", default)]
    certificate_authority_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Deserialize)]
struct Context {
    cluster: String,
    user: String,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(default)]
    token: Option<String>,
    #[serde(rename = "client-certificate", default)]
    client_certificate: Option<PathBuf>,
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-key", default)]
    client_key: Option<PathBuf>,
    #[serde(rename = "client-key-data", default)]
    client_key_data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> LabelResult<ClusterAccess> {
        let config: Kubeconfig = serde_yaml_ng::from_str(yaml).unwrap();
        access_from(config, Path::new("/tmp"))
    }

    const TOKEN_KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: test
contexts:
  - name: test
    context:
      cluster: test-cluster
      user: test-user
clusters:
  - name: test-cluster
    cluster:
      server: https://10.96.0.1:443
      certificate-authority-data: LS0tLQ==
users:
  - name: test-user
    user:
      token: secret-token
"#;

    #[test]
    fn token_kubeconfig_resolves() {
        let access = parse(TOKEN_KUBECONFIG).unwrap();
        assert_eq!(access.server, "https://10.96.0.1:443");
        assert_eq!(access.ca_pem.as_deref(), Some(b"----".as_slice()));
        assert!(matches!(access.auth, ClusterAuth::Token(ref t) if t == "secret-token"));
    }

    #[test]
    fn missing_current_context_is_an_error() {
        let yaml = "apiVersion: v1\nkind: Config\n";
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, LabelError::Kubeconfig(_)));
    }

    #[test]
    fn dangling_cluster_reference_is_an_error() {
        let yaml = r#"
current-context: test
contexts:
  - name: test
    context:
      cluster: nowhere
      user: test-user
users:
  - name: test-user
    user:
      token: t
"#;
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, LabelError::Kubeconfig(_)));
    }

    #[test]
    fn client_cert_without_key_is_an_error() {
        let yaml = r#"
current-context: test
contexts:
  - name: test
    context:
      cluster: c
      user: u
clusters:
  - name: c
    cluster:
      server: https://example:6443
users:
  - name: u
    user:
      client-certificate-data: LS0tLQ==
"#;
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, LabelError::Kubeconfig(_)));
    }

    #[test]
    fn token_takes_precedence_over_client_cert() {
        let yaml = r#"
current-context: test
contexts:
  - name: test
    context:
      cluster: c
      user: u
clusters:
  - name: c
    cluster:
      server: https://example:6443
users:
  - name: u
    user:
      token: tok
      client-certificate-data: LS0tLQ==
      client-key-data: LS0tLQ==
"#;
        let access = parse(yaml).unwrap();
        assert!(matches!(access.auth, ClusterAuth::Token(_)));
    }

    #[test]
    fn plain_http_server_needs_no_ca() {
        let yaml = r#"
current-context: test
contexts:
  - name: test
    context:
      cluster: c
      user: u
clusters:
  - name: c
    cluster:
      server: http://127.0.0.1:8001
users:
  - name: u
    user: {}
"#;
        let access = parse(yaml).unwrap();
        assert!(access.ca_pem.is_none());
        assert!(matches!(access.auth, ClusterAuth::Anonymous));
    }
}
