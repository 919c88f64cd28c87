//! Streaming download support.
//!
//! Writes response bodies straight to disk without buffering whole
//! artifacts in memory. Checksum verification happens later, at the
//! installer's staging step.

use std::path::Path;

use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream a URL to a local file. The partial file is removed on failure.
pub async fn fetch_to_file(client: &Client, url: &str, dest: &Path) -> Result<(), DownloadError> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?
        .error_for_status()?;

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();

    let written: Result<(), DownloadError> = async {
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = written {
        tokio::fs::remove_file(dest).await.ok();
        return Err(e);
    }
    Ok(())
}
