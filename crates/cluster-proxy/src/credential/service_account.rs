//! ServiceAccount token strategy

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{AuthenticationStrategy, Credential, RequestAuth, SERVICE_ACCOUNT_TOKEN_KEY};
use crate::cluster::ClusterDetails;
use crate::error::{Error, Result};

/// In-cluster ServiceAccount token mount path
pub const TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Reader for a ServiceAccount token
///
/// The token is read on every call. Kubelet rotates projected tokens in place,
/// so caching would eventually send an expired token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenReader: Send + Sync {
    /// Read the current token
    async fn read_token(&self) -> Result<String>;
}

/// Reads the token from a file, by default the standard K8s mount path
#[derive(Clone, Debug)]
pub struct FileTokenReader {
    path: PathBuf,
}

impl FileTokenReader {
    /// Read from `path` instead of [`TOKEN_PATH`]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for FileTokenReader {
    fn default() -> Self {
        Self::new(TOKEN_PATH)
    }
}

#[async_trait]
impl TokenReader for FileTokenReader {
    async fn read_token(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map(|token| token.trim().to_string())
            .map_err(|e| {
                Error::Internal(format!(
                    "failed to read ServiceAccount token from {}: {}",
                    self.path.display(),
                    e
                ))
            })
    }
}

/// Bearer token from cluster metadata, falling back to the mounted token
#[derive(Clone)]
pub struct ServiceAccountStrategy {
    token_reader: Arc<dyn TokenReader>,
}

impl ServiceAccountStrategy {
    /// Use a custom token source for the fallback path
    pub fn with_token_reader(token_reader: Arc<dyn TokenReader>) -> Self {
        Self { token_reader }
    }
}

impl Default for ServiceAccountStrategy {
    fn default() -> Self {
        Self::with_token_reader(Arc::new(FileTokenReader::default()))
    }
}

#[async_trait]
impl AuthenticationStrategy for ServiceAccountStrategy {
    async fn get_credential(
        &self,
        cluster: &ClusterDetails,
        _auth: &RequestAuth,
    ) -> Result<Credential> {
        if let Some(token) = cluster.auth_metadata.get(SERVICE_ACCOUNT_TOKEN_KEY) {
            return Ok(Credential::bearer(token.trim()));
        }

        debug!(cluster = %cluster.name, "Using mounted ServiceAccount token");
        let token = self.token_reader.read_token().await?;
        if token.is_empty() {
            return Err(Error::Internal("ServiceAccount token is empty".into()));
        }
        Ok(Credential::bearer(token))
    }

    fn validate_cluster(&self, _cluster: &ClusterDetails) -> Vec<Error> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_metadata_token_wins() {
        let mut reader = MockTokenReader::new();
        reader.expect_read_token().never();
        let strategy = ServiceAccountStrategy::with_token_reader(Arc::new(reader));

        let cluster = ClusterDetails::new("a", "https://a")
            .with_auth_metadata(SERVICE_ACCOUNT_TOKEN_KEY, "static-token");
        let credential = strategy
            .get_credential(&cluster, &RequestAuth::default())
            .await
            .unwrap();

        assert_eq!(credential, Credential::bearer("static-token"));
    }

    #[tokio::test]
    async fn test_falls_back_to_reader_every_request() {
        let mut reader = MockTokenReader::new();
        reader
            .expect_read_token()
            .times(2)
            .returning(|| Ok("mounted".to_string()));
        let strategy = ServiceAccountStrategy::with_token_reader(Arc::new(reader));

        let cluster = ClusterDetails::new("a", "https://a");
        for _ in 0..2 {
            let credential = strategy
                .get_credential(&cluster, &RequestAuth::default())
                .await
                .unwrap();
            assert_eq!(credential, Credential::bearer("mounted"));
        }
    }

    #[tokio::test]
    async fn test_reader_error_propagates() {
        let mut reader = MockTokenReader::new();
        reader
            .expect_read_token()
            .returning(|| Err(Error::Internal("missing".into())));
        let strategy = ServiceAccountStrategy::with_token_reader(Arc::new(reader));

        let result = strategy
            .get_credential(&ClusterDetails::new("a", "https://a"), &RequestAuth::default())
            .await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_file_token_reader_trims() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "file-token").unwrap();

        let token = FileTokenReader::new(file.path()).read_token().await.unwrap();
        assert_eq!(token, "file-token");
    }

    #[tokio::test]
    async fn test_file_token_reader_missing_file() {
        let reader = FileTokenReader::new("/nonexistent/token");
        assert!(matches!(reader.read_token().await, Err(Error::Internal(_))));
    }
}
