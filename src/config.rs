use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::{export::PAGE_SIZE, import::BATCH_SIZE};

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Overridden by the `DATABASE_URL` environment variable
    #[serde(default)]
    pub database_url: String,

    pub export: Option<ExportConfig>,
    pub ocid: Option<OcidConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ExportConfig {
    pub bucket: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
}

#[derive(Debug, Deserialize)]
pub struct OcidConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_page_size() -> usize {
    PAGE_SIZE
}

// cold storage is fine, exports are never read back by us
fn default_storage_class() -> String {
    "REDUCED_REDUNDANCY".to_owned()
}

fn default_batch_size() -> usize {
    BATCH_SIZE
}

impl Config {
    pub fn export(&self) -> Result<&ExportConfig> {
        self.export
            .as_ref()
            .context("missing [export] section in config")
    }

    pub fn ocid(&self) -> Result<&OcidConfig> {
        self.ocid.as_ref().context("missing [ocid] section in config")
    }
}

pub fn load(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path).context("Failed to read config")?;
    let mut config = parse(&data)?;
    if let Ok(url) = dotenvy::var("DATABASE_URL") {
        config.database_url = url;
    }
    if config.database_url.is_empty() {
        bail!("database_url is not set");
    }
    Ok(config)
}

fn parse(data: &str) -> Result<Config> {
    let config: Config = toml::from_str(data).context("Failed to parse config")?;
    if config.export.as_ref().is_some_and(|x| x.page_size == 0) {
        bail!("export.page_size must be positive");
    }
    if config.ocid.as_ref().is_some_and(|x| x.batch_size == 0) {
        bail!("ocid.batch_size must be positive");
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = parse(
            r#"
            database_url = "postgres://localhost/cells"

            [export]
            bucket = "assets"

            [ocid]
            url = "https://example.com/downloads"
            api_key = "key"
            "#,
        )
        .unwrap();

        let export = config.export().unwrap();
        assert_eq!(export.bucket, "assets");
        assert_eq!(export.page_size, 10_000);
        assert_eq!(export.storage_class, "REDUCED_REDUNDANCY");
        assert_eq!(config.ocid().unwrap().batch_size, 10_000);
    }

    #[test]
    fn optional_sections() {
        let config = parse(r#"database_url = "postgres://localhost/cells""#).unwrap();
        assert!(config.export().is_err());
        assert!(config.ocid().is_err());
    }

    #[test]
    fn rejects_zero_sizes() {
        let data = r#"
            [ocid]
            url = "https://example.com/downloads"
            api_key = "key"
            batch_size = 0
        "#;
        assert!(parse(data).is_err());
    }
}
