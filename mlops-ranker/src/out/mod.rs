use anyhow::{anyhow, Result};
use serde::Serialize;

pub mod http;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutMode {
    Stdout,
    Http,
}

impl OutMode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "http" => OutMode::Http,
            _ => OutMode::Stdout,
        }
    }
}

pub fn emit_stdout<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes one JSON document to the configured sink.
pub async fn emit<T: Serialize + ?Sized>(mode: OutMode, endpoint: Option<&str>, value: &T) -> Result<()> {
    match mode {
        OutMode::Stdout => emit_stdout(value),
        OutMode::Http => {
            let endpoint = endpoint.ok_or_else(|| anyhow!("OUT_MODE=http requires OUT_ENDPOINT"))?;
            http::post_json(&http::client()?, endpoint, value).await
        }
    }
}

/// Writes a list of records, batching them when posting.
pub async fn emit_records<T: Serialize>(mode: OutMode, endpoint: Option<&str>, records: &[T]) -> Result<()> {
    match mode {
        OutMode::Stdout => emit_stdout(records),
        OutMode::Http => {
            let endpoint = endpoint.ok_or_else(|| anyhow!("OUT_MODE=http requires OUT_ENDPOINT"))?;
            http::post_batches(endpoint, records, http::BATCH_SIZE).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_modes_fall_back_to_stdout() {
        assert_eq!(OutMode::parse(" HTTP "), OutMode::Http);
        assert_eq!(OutMode::parse("kafka"), OutMode::Stdout);
        assert_eq!(OutMode::parse(""), OutMode::Stdout);
    }

    #[tokio::test]
    async fn http_mode_needs_an_endpoint() {
        let err = emit(OutMode::Http, None, &serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("OUT_ENDPOINT"));
    }
}
