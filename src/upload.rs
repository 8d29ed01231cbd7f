//! Upload of ingestion documents to the cloud data-acquisition API.

use reqwest::multipart::{Form, Part};
use std::path::Path;
use tracing::info;

use crate::config::UploadConfig;
use crate::error::{BridgeError, Result};

pub const DEFAULT_INGESTION_URL: &str = "https://ingestion.edgeimpulse.com/api/training/files";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Uploader {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    disallow_duplicates: bool,
}

impl Uploader {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(BridgeError::Config("ingestion api key is empty".into()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.trim().to_string(),
            disallow_duplicates: true,
        })
    }

    /// `api_key` overrides the key from the config file.
    pub fn from_config(config: &UploadConfig, api_key: Option<&str>) -> Result<Self> {
        let key = api_key
            .or(config.api_key.as_deref())
            .ok_or_else(|| BridgeError::Config("no ingestion api key configured".into()))?;
        let mut uploader = Self::new(config.endpoint.clone(), key)?;
        uploader.disallow_duplicates = config.disallow_duplicates;
        Ok(uploader)
    }

    /// POST one json file as multipart field `data`.
    pub async fn upload(&self, path: &Path, label: Option<&str>) -> Result<UploadReceipt> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data.json".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("application/json")?;
        let form = Form::new().part("data", part);

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .multipart(form);
        if self.disallow_duplicates {
            request = request.header("x-disallow-duplicates", "1");
        }
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            request = request.header("x-label", label);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if status != 200 {
            return Err(BridgeError::Upload { status, body });
        }

        info!(file = %file_name, label = label.unwrap_or("-"), "uploaded to ingestion api");
        Ok(UploadReceipt { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            Uploader::new(DEFAULT_INGESTION_URL, "  "),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn cli_key_overrides_config() {
        let config = UploadConfig {
            api_key: Some("from-file".into()),
            ..UploadConfig::default()
        };
        let uploader = Uploader::from_config(&config, Some("from-cli")).unwrap();
        assert_eq!(uploader.api_key, "from-cli");

        let uploader = Uploader::from_config(&config, None).unwrap();
        assert_eq!(uploader.api_key, "from-file");

        assert!(Uploader::from_config(&UploadConfig::default(), None).is_err());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let uploader = Uploader::new("http://127.0.0.1:9/upload", "key").unwrap();
        let err = uploader
            .upload(Path::new("definitely/not/here.json"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
