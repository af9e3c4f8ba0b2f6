use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: u64 = 5;
const READ_TIMEOUT: u64 = 60;
const RETRIES: usize = 3;
pub const BATCH_SIZE: usize = 200;
const BATCH_FLUSH_MS: u64 = 100;

pub fn client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT))
        .timeout(Duration::from_secs(READ_TIMEOUT))
        .build()?)
}

/// POSTs `payload` as JSON, retrying failed sends and non-2xx answers.
pub async fn post_json<T: Serialize + ?Sized>(client: &Client, endpoint: &str, payload: &T) -> Result<()> {
    let mut last = None;
    for attempt in 1..=RETRIES {
        let res = client.post(endpoint).json(payload).send().await;
        match res {
            Ok(r) if r.status().is_success() => return Ok(()),
            Ok(r) => last = Some(anyhow!("HTTP {} {}", r.status(), r.text().await.unwrap_or_default())),
            Err(e) => last = Some(anyhow!(e)),
        }
        if let Some(e) = &last {
            warn!(endpoint, attempt, error = %e, "post failed");
        }
        tokio::time::sleep(Duration::from_millis(300 * attempt as u64)).await;
    }
    Err(last.unwrap_or_else(|| anyhow!("post failed")))
}

pub async fn post_batches<T: Serialize>(endpoint: &str, records: &[T], batch_size: usize) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let client = client()?;
    let size = batch_size.max(1);
    for (n, batch) in records.chunks(size).enumerate() {
        let start = n * size;
        post_json(&client, endpoint, batch)
            .await
            .map_err(|e| anyhow!("POST [{start}-{}) failed: {e}", start + batch.len()))?;
        debug!(endpoint, start, len = batch.len(), "batch posted");

        // pause between batches
        tokio::time::sleep(Duration::from_millis(BATCH_FLUSH_MS)).await;
    }
    Ok(())
}
