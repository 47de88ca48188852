//! Package registry lookups for published container proxy versions.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{NamError, Result};

#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    /// Latest published version of `package`
    async fn latest_version(&self, package: &str) -> Result<String>;
}

/// npm registry client
pub struct NpmRegistry {
    client: reqwest::Client,
    registry_url: String,
}

#[derive(Debug, Deserialize)]
struct PackageVersion {
    version: String,
}

impl NpmRegistry {
    pub fn new(registry_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry_url: registry_url.trim_end_matches('/').to_string(),
        }
    }

    /// Scoped packages keep the `@` but escape the slash.
    fn latest_url(&self, package: &str) -> String {
        format!("{}/{}/latest", self.registry_url, package.replace('/', "%2f"))
    }
}

#[async_trait]
impl ReleaseFeed for NpmRegistry {
    async fn latest_version(&self, package: &str) -> Result<String> {
        let url = self.latest_url(package);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| NamError::ServerUnavailable {
                path: url.clone(),
                source: e,
            })?;

        let latest: PackageVersion = response
            .json()
            .await
            .map_err(|e| NamError::ServerUnavailable { path: url, source: e })?;
        Ok(latest.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_package_url() {
        let registry = NpmRegistry::new("https://registry.npmjs.org/");
        assert_eq!(
            registry.latest_url("@nodeswork/container-proxy"),
            "https://registry.npmjs.org/@nodeswork%2fcontainer-proxy/latest"
        );
    }
}
