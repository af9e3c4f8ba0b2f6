//! Request-level entry points: rank every bucket, annotate given rows, export
//! the hint index.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::collector_core::ControlPlane;
use crate::config::Settings;
use crate::crawler::PipelineGraphCrawler;
use crate::error::RankError;
use crate::hints::PrefixHintIndex;
use crate::retry::drain_pages;
use crate::scoring::{neutral_meta, ScoringEngine};
use crate::types::{BucketRow, BucketScoreRecord, RankResponse};

pub const MAX_LOOKBACK_DAYS: u32 = 90;
pub const MAX_TOP_K: usize = 500;

/// Key under which an inventory document lists its buckets.
pub const INVENTORY_BUCKETS_KEY: &str = "s3_buckets";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankRequest {
    pub lookback_days: u32,
    pub top_k: usize,
    /// Echoed in the response; calls go to the region the control plane was built for.
    pub region: Option<String>,
}

impl RankRequest {
    pub fn validate(&self) -> Result<(), RankError> {
        validate_lookback(self.lookback_days)?;
        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(RankError::InvalidArgument(format!(
                "top_k must be within 1..={MAX_TOP_K}, got {}",
                self.top_k
            )));
        }
        Ok(())
    }
}

fn validate_lookback(days: u32) -> Result<(), RankError> {
    if (1..=MAX_LOOKBACK_DAYS).contains(&days) {
        Ok(())
    } else {
        Err(RankError::InvalidArgument(format!(
            "lookback_days must be within 1..={MAX_LOOKBACK_DAYS}, got {days}"
        )))
    }
}

/// Descending score, then ascending name.
pub fn rank_order(a: &BucketScoreRecord, b: &BucketScoreRecord) -> Ordering {
    b.score().cmp(&a.score()).then_with(|| a.name().cmp(b.name()))
}

pub struct Ranker {
    cp: ControlPlane,
    settings: Settings,
}

impl Ranker {
    pub fn new(cp: ControlPlane, settings: Settings) -> Self {
        Self { cp, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Crawls the pipeline platform. Never fails; see [`PipelineGraphCrawler::crawl`].
    pub async fn build_hint_index(&self) -> PrefixHintIndex {
        PipelineGraphCrawler::new(self.cp.pipelines.clone(), &self.settings)
            .crawl()
            .await
    }

    #[instrument(skip(self), fields(lookback_days = req.lookback_days, top_k = req.top_k))]
    pub async fn rank_candidates(&self, req: RankRequest) -> Result<RankResponse, RankError> {
        req.validate()?;
        self.within_deadline(async {
            let (index, buckets) = tokio::join!(self.build_hint_index(), self.list_buckets());
            let buckets = buckets?;
            let engine = ScoringEngine::new(&self.cp, &self.settings, req.lookback_days, Arc::new(index));

            let mut scored: Vec<BucketScoreRecord> = stream::iter(buckets)
                .map(|row| engine.score(row))
                .buffer_unordered(self.settings.scoring_concurrency.max(1))
                .collect()
                .await;
            scored.sort_by(rank_order);

            let total_buckets = scored.len();
            scored.truncate(req.top_k);
            info!(total_buckets, returned = scored.len(), "ranking finished");
            Ok::<_, RankError>(RankResponse {
                region: req.region.clone().unwrap_or_else(|| self.settings.region.clone()),
                lookback_days: req.lookback_days,
                total_buckets,
                top_k: req.top_k,
                items: scored,
            })
        })
        .await
    }

    /// Scores `rows` in input order.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn annotate_bucket_records(
        &self,
        rows: Vec<BucketRow>,
        lookback_days: u32,
    ) -> Result<Vec<BucketScoreRecord>, RankError> {
        validate_lookback(lookback_days)?;
        self.within_deadline(async {
            let index = Arc::new(self.build_hint_index().await);
            let engine = ScoringEngine::new(&self.cp, &self.settings, lookback_days, index);
            let records: Vec<BucketScoreRecord> = stream::iter(rows)
                .map(|row| engine.score(row))
                .buffered(self.settings.scoring_concurrency.max(1))
                .collect()
                .await;
            Ok::<_, RankError>(records)
        })
        .await
    }

    /// Annotates a whole inventory document. Rows under `s3_buckets` are
    /// scored; every other array of objects gets neutral metadata.
    pub async fn annotate_inventory(&self, document: Value, lookback_days: u32) -> Result<Value, RankError> {
        let Value::Object(mut doc) = document else {
            return Err(RankError::InvalidArgument("inventory document must be a JSON object".into()));
        };
        if let Some(raw) = doc.remove(INVENTORY_BUCKETS_KEY) {
            let rows: Vec<BucketRow> = serde_json::from_value(raw)
                .map_err(|e| RankError::InvalidArgument(format!("{INVENTORY_BUCKETS_KEY}: {e}")))?;
            let records = self.annotate_bucket_records(rows, lookback_days).await?;
            let value = serde_json::to_value(records)
                .map_err(|e| RankError::InvalidArgument(format!("{INVENTORY_BUCKETS_KEY}: {e}")))?;
            doc.insert(INVENTORY_BUCKETS_KEY.to_string(), value);
        }

        let neutral = serde_json::to_value(neutral_meta()).unwrap_or(Value::Null);
        for (key, section) in doc.iter_mut() {
            if key == INVENTORY_BUCKETS_KEY {
                continue;
            }
            if let Value::Array(items) = section {
                for item in items.iter_mut().filter_map(Value::as_object_mut) {
                    item.insert("_meta".to_string(), neutral.clone());
                }
            }
        }
        Ok(Value::Object(doc))
    }

    async fn list_buckets(&self) -> Result<Vec<BucketRow>, RankError> {
        let api = self.cp.buckets.as_ref();
        let (rows, err) = drain_pages(&self.settings.retry, "ListBuckets", self.settings.max_pages, |token| async move {
            api.list_buckets(token).await
        })
        .await;
        match err {
            // ranking needs the complete inventory
            Some(e) => {
                warn!(error = %e, listed = rows.len(), "bucket inventory failed");
                Err(RankError::Inventory(e))
            }
            None => Ok(rows),
        }
    }

    async fn within_deadline<T>(&self, fut: impl Future<Output = Result<T, RankError>>) -> Result<T, RankError> {
        let deadline = self.settings.deadline;
        match tokio::time::timeout(deadline, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(?deadline, "request deadline exceeded; partial results discarded");
                Err(RankError::DeadlineExceeded(deadline))
            }
        }
    }
}
