use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use log::{debug, warn};
use object_store::{
    aws::AmazonS3Builder, path::Path as ObjectPath, ClientOptions, MultipartUpload, ObjectStore,
    WriteMultipart,
};
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::{fs::File, io::AsyncReadExt};

/// Every export lands under this prefix in the bucket.
pub const KEY_PREFIX: &str = "export";

/// S3 rejects multipart uploads with non-final parts smaller than this.
const PART_SIZE: usize = 5 * 1024 * 1024;
const MAX_IN_FLIGHT: usize = 4;

/// S3 bucket with credentials and region taken from the `AWS_*` variables.
///
/// Every object written through the returned store is created with
/// `storage_class`.
pub fn s3_bucket(bucket: &str, storage_class: &str) -> Result<Arc<dyn ObjectStore>> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-amz-storage-class",
        HeaderValue::from_str(storage_class).context("invalid storage class")?,
    );
    let store = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(ClientOptions::new().with_default_headers(headers))
        .build()?;
    Ok(Arc::new(store))
}

/// Object key for a local export file.
pub fn object_key(path: &Path) -> Result<ObjectPath> {
    let name = path
        .file_name()
        .and_then(|x| x.to_str())
        .with_context(|| format!("no file name in {}", path.display()))?;
    Ok(ObjectPath::from_iter([KEY_PREFIX, name]))
}

/// Copy a finished export file into the bucket.
///
/// If anything fails the multipart upload is aborted so no partial object
/// becomes visible.
pub async fn upload(bucket: &dyn ObjectStore, path: &Path) -> Result<ObjectPath> {
    let key = object_key(path)?;
    let file = File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;

    let upload = bucket.put_multipart(&key).await?;
    let total = copy_parts(file, upload)
        .await
        .with_context(|| format!("failed to upload {key}"))?;
    debug!("uploaded {total} bytes to {key}");
    Ok(key)
}

/// Stream `file` into `upload` in [`PART_SIZE`] parts.
async fn copy_parts(mut file: File, upload: Box<dyn MultipartUpload>) -> Result<usize> {
    let mut writer = WriteMultipart::new_with_chunk_size(upload, PART_SIZE);
    let mut buf = vec![0; PART_SIZE];
    let copied = async {
        let mut total = 0;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.wait_for_capacity(MAX_IN_FLIGHT).await?;
            writer.write(&buf[..n]);
            total += n;
        }
        anyhow::Ok(total)
    }
    .await;

    match copied {
        Ok(total) => {
            writer.finish().await?;
            Ok(total)
        }
        Err(e) => {
            if let Err(abort) = writer.abort().await {
                warn!("failed to abort upload: {abort}");
            }
            Err(e)
        }
    }
}
