use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::device::ArtifactSource;
use crate::error::Result;

/// Path of the shared library for an SDK level and CPU ABI.
pub fn library_path(sdk: &str, abi: &str, file: &str) -> String {
    format!("minicap/shared/android-{sdk}/{abi}/{file}")
}

/// Path of the executable for a CPU ABI.
pub fn binary_path(abi: &str, file: &str) -> String {
    format!("minicap/bin/{abi}/{file}")
}

/// Plain HTTP artifact host.
#[derive(Debug, Clone)]
pub struct HttpArtifacts {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArtifacts {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifacts {
    async fn fetch(&self, path: &str) -> Result<Bytes> {
        let url = self.url(path);
        debug!(%url, "fetching artifact");
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_paths() {
        assert_eq!(
            library_path("29", "arm64-v8a", "minicap.so"),
            "minicap/shared/android-29/arm64-v8a/minicap.so"
        );
        assert_eq!(
            binary_path("x86", "minicap"),
            "minicap/bin/x86/minicap"
        );
    }

    #[test]
    fn url_joins_cleanly() {
        let host = HttpArtifacts::new("http://host/vendor/");
        assert_eq!(
            host.url("/minicap/bin/x86/minicap"),
            "http://host/vendor/minicap/bin/x86/minicap"
        );
    }
}
