//! Boot-time registration of microservices described by files.
//!
//! Every `*.json` file in the configured directory is an announcement:
//!
//! ```json
//! { "port": 3000, "pathInfo": "/info", "endpoints": [ ... ] }
//! ```
//!
//! The file stem is the default name and the URL is the configured local URL with the file's
//! port. All files are registered concurrently; failures are logged and do not stop the others.

use crate::core::error::{GatewayError, GatewayResult};
use crate::registry::announcement::{AnnouncedEndpoint, LegacyUrl, RegistrationRequest, DEFAULT_PATH_INFO};
use crate::registry::service::MicroserviceRegistry;
use futures::future::join_all;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use url::Url;

/// Contents of a microservice file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicroserviceFile {
    #[serde(default)]
    pub name: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub path_info: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub endpoints: Option<Vec<AnnouncedEndpoint>>,
    #[serde(default)]
    pub urls: Option<Vec<LegacyUrl>>,
}

impl MicroserviceFile {
    /// Turn the file into a registration request
    pub fn into_request(self, default_name: &str, local_url: &str) -> GatewayResult<RegistrationRequest> {
        let mut url = Url::parse(local_url)
            .map_err(|e| GatewayError::config(format!("Invalid local url '{}': {}", local_url, e)))?;
        url.set_port(Some(self.port))
            .map_err(|_| GatewayError::config(format!("Cannot set a port on '{}'", local_url)))?;

        Ok(RegistrationRequest {
            name: self.name.unwrap_or_else(|| default_name.to_string()),
            url: url.as_str().trim_end_matches('/').to_string(),
            path_info: self.path_info.unwrap_or_else(|| DEFAULT_PATH_INFO.to_string()),
            tags: self.tags,
            version: None,
            endpoints: self.endpoints,
            urls: self.urls,
        })
    }
}

async fn read_requests(dir: &Path, local_url: &str) -> GatewayResult<Vec<(PathBuf, RegistrationRequest)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut requests = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
        let parsed = tokio::fs::read_to_string(&path)
            .await
            .map_err(GatewayError::from)
            .and_then(|content| serde_json::from_str::<MicroserviceFile>(&content).map_err(GatewayError::from))
            .and_then(|file| file.into_request(&stem, local_url));

        match parsed {
            Ok(request) => requests.push((path, request)),
            Err(e) => warn!(file = %path.display(), error = %e, "Skipping invalid microservice file"),
        }
    }

    requests.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(requests)
}

/// Register every microservice file in `dir`, returning how many were synced
pub async fn load_microservices(registry: &MicroserviceRegistry, dir: &Path, local_url: &str) -> GatewayResult<usize> {
    info!(dir = %dir.display(), "Loading microservices");
    let requests = read_requests(dir, local_url).await?;

    let results = join_all(requests.into_iter().map(|(path, request)| async move {
        (path, registry.register(request).await)
    }))
    .await;

    let mut synced = 0;
    for (path, result) in results {
        match result {
            Ok(outcome) if outcome.synced => synced += 1,
            Ok(_) => warn!(file = %path.display(), "Microservice registered but not reached"),
            Err(e) => error!(file = %path.display(), error = %e, "Microservice registration failed"),
        }
    }

    registry.reload().await?;
    info!(synced, "Loaded microservices");
    Ok(synced)
}
