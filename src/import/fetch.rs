use std::{path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use futures::TryStreamExt;
use log::debug;
use reqwest::{Client, StatusCode};
use tokio::{fs::File, io::AsyncWriteExt};

/// Download client for the OpenCellID cell dumps.
pub struct OcidClient {
    client: Client,
    url: String,
    api_key: String,
}

impl OcidClient {
    pub fn new(url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.to_owned(),
            api_key: api_key.to_owned(),
        })
    }

    /// Stream `filename` from the provider into `dest`, returning its size.
    pub async fn download(&self, filename: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("apiKey", self.api_key.as_str()), ("filename", filename)])
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            bail!("{filename}: provider responded with {}", response.status());
        }

        let mut file = File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let mut body = response.bytes_stream();
        let mut size = 0;
        while let Some(chunk) = body.try_next().await? {
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;
        debug!("downloaded {size} bytes of {filename}");

        Ok(size)
    }
}
