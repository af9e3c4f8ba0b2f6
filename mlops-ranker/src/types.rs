use serde::{Deserialize, Serialize};

use crate::collector_core::PublicAccessBlock;

/// A flat bucket row as returned by the inventory. Unknown columns pass through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketRow {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, alias = "creationDate", skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BucketRow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Identified,
    Unidentified,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureMeta {
    pub public_access_block: Option<PublicAccessBlock>,
    pub acl_public: bool,
    pub policy_hardening: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signals {
    pub policy_score: i32,
    pub policy_meta: ExposureMeta,
    #[serde(rename = "mlPrincipalHit")]
    pub ml_principal_policy_hit: bool,
    pub ml_principal_roles: Vec<String>,
    pub activity_total: u64,
    pub activity_ml_hits: u64,
    pub activity_score: i32,
    pub prefix_hint_score: i32,
    /// Sub-analyses that could not complete (`publicAccessBlock`, `acl`,
    /// `bucketPolicy`, `iam`, `cloudtrail`). Their contribution above is zero.
    pub degraded: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistsIn {
    pub identified: bool,
    pub systems: Vec<String>,
    pub evidence_prefixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreMeta {
    pub score: i32,
    pub reasons: Vec<String>,
    /// Absent for neutral records of non-bucket resources.
    pub signals: Option<Signals>,
    pub exists_in: ExistsIn,
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketScoreRecord {
    #[serde(flatten)]
    pub row: BucketRow,
    #[serde(rename = "_meta")]
    pub meta: ScoreMeta,
}

impl BucketScoreRecord {
    pub fn name(&self) -> &str {
        &self.row.name
    }

    pub fn score(&self) -> i32 {
        self.meta.score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankResponse {
    pub region: String,
    pub lookback_days: u32,
    pub total_buckets: usize,
    pub top_k: usize,
    pub items: Vec<BucketScoreRecord>,
}
