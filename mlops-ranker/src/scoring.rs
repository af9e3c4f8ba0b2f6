//! Fuses the per-bucket signals into one explainable score.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::collector_core::ControlPlane;
use crate::config::Settings;
use crate::hints::PrefixHintIndex;
use crate::signals::{
    ActivitySignal, ActivitySignalAnalyzer, ExposureAnalyzer, ExposureSignal, PolicySignal, PolicySignalAnalyzer,
    CHECK_CLOUDTRAIL, CHECK_IAM, W_ML_PRINCIPAL_POLICY, W_PREFIX_MATCH,
};
use crate::types::{BucketRow, BucketScoreRecord, Classification, ExistsIn, ScoreMeta, Signals};

pub const UNIDENTIFIED: &str = "unidentified";
pub const MAX_EVIDENCE_PREFIXES: usize = 10;

pub const SYSTEM_FEATURE_STORE: &str = "Feature Store (offline)";
pub const SYSTEM_DATA_CAPTURE: &str = "Endpoint DataCapture";
pub const SYSTEM_PROCESSING: &str = "SageMaker Processing";
pub const SYSTEM_TRAINING: &str = "SageMaker Training";
pub const SYSTEM_TRANSFORM: &str = "SageMaker Transform";
pub const SYSTEM_MODEL_ARTIFACTS: &str = "Model Artifacts";
pub const SYSTEM_OTHER: &str = "Pipeline (Other)";

/// Labels one `bucket/prefix` hint. Rules are checked in order and the first
/// one that matches wins.
pub fn classify_hint(hint: &str) -> &'static str {
    let p = hint.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| p.contains(n));
    if any(&["feature-store", "feature_store"]) {
        SYSTEM_FEATURE_STORE
    } else if any(&["datacapture", "data-capture"]) {
        SYSTEM_DATA_CAPTURE
    } else if any(&["/processing", "processing-output", "processing-input"]) {
        SYSTEM_PROCESSING
    } else if any(&["/training", "model-artifacts", "checkpoints"]) {
        SYSTEM_TRAINING
    } else if any(&["/transform", "batch-transform"]) {
        SYSTEM_TRANSFORM
    } else if p.contains("model") && (p.contains("artifacts") || p.ends_with(".tar.gz")) {
        SYSTEM_MODEL_ARTIFACTS
    } else {
        SYSTEM_OTHER
    }
}

/// Sorted, distinct labels for a bucket's hints.
pub fn classify_systems<'a>(hints: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    hints
        .into_iter()
        .map(classify_hint)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Everything gathered about one bucket before fusion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketSignals {
    pub exposure: ExposureSignal,
    pub policy: PolicySignal,
    pub activity: ActivitySignal,
}

/// Combines gathered signals with hint membership. Pure.
pub fn fuse(row: BucketRow, signals: BucketSignals, hints: &PrefixHintIndex) -> BucketScoreRecord {
    let BucketSignals { exposure, policy, activity } = signals;
    let bucket_hints: Vec<&str> = hints.hints_for(&row.name).collect();

    let ref_score = if policy.hit { W_ML_PRINCIPAL_POLICY } else { 0 };
    let prefix_score = if bucket_hints.is_empty() { 0 } else { W_PREFIX_MATCH };
    let score = exposure.score + ref_score + activity.score + prefix_score;

    let mut reasons = exposure.reasons;
    if policy.hit {
        reasons.push(format!("Referenced by ML principals: {}", policy.roles.join(", ")));
    }
    if activity.score > 0 {
        reasons.push(format!(
            "CloudTrail hits total={}, ml={} (+{})",
            activity.total, activity.ml_hits, activity.score
        ));
    }
    if let Some(first) = bucket_hints.first() {
        reasons.push(format!("Prefix match: {first}"));
    }

    let mut degraded: Vec<String> = exposure.degraded.iter().map(|c| c.to_string()).collect();
    if policy.degraded {
        degraded.push(CHECK_IAM.to_string());
    }
    if activity.degraded {
        degraded.push(CHECK_CLOUDTRAIL.to_string());
    }

    let systems = classify_systems(bucket_hints.iter().copied());
    let identified = !systems.is_empty();
    let exists_in = ExistsIn {
        identified,
        systems: if identified { systems } else { vec![UNIDENTIFIED.to_string()] },
        evidence_prefixes: bucket_hints
            .iter()
            .take(MAX_EVIDENCE_PREFIXES)
            .map(|h| h.to_string())
            .collect(),
    };

    BucketScoreRecord {
        row,
        meta: ScoreMeta {
            score,
            reasons,
            signals: Some(Signals {
                policy_score: exposure.score,
                policy_meta: exposure.meta,
                ml_principal_policy_hit: policy.hit,
                ml_principal_roles: policy.roles,
                activity_total: activity.total,
                activity_ml_hits: activity.ml_hits,
                activity_score: activity.score,
                prefix_hint_score: prefix_score,
                degraded,
            }),
            exists_in,
            classification: if identified {
                Classification::Identified
            } else {
                Classification::Unidentified
            },
        },
    }
}

/// Metadata for resources that are not scored.
pub fn neutral_meta() -> ScoreMeta {
    ScoreMeta {
        score: 0,
        reasons: Vec::new(),
        signals: None,
        exists_in: ExistsIn {
            identified: false,
            systems: vec![UNIDENTIFIED.to_string()],
            evidence_prefixes: Vec::new(),
        },
        classification: Classification::Unidentified,
    }
}

pub fn neutral_record(row: BucketRow) -> BucketScoreRecord {
    BucketScoreRecord { row, meta: neutral_meta() }
}

/// Scores buckets for one request. Analyzer snapshots are shared by every
/// bucket scored through the same engine.
pub struct ScoringEngine {
    policy: PolicySignalAnalyzer,
    activity: ActivitySignalAnalyzer,
    exposure: ExposureAnalyzer,
    hints: Arc<PrefixHintIndex>,
}

impl ScoringEngine {
    pub fn new(cp: &ControlPlane, settings: &Settings, lookback_days: u32, hints: Arc<PrefixHintIndex>) -> Self {
        Self {
            policy: PolicySignalAnalyzer::new(cp.identity.clone(), settings),
            activity: ActivitySignalAnalyzer::new(cp.audit.clone(), lookback_days, settings),
            exposure: ExposureAnalyzer::new(cp.buckets.clone(), settings.retry.clone()),
            hints,
        }
    }

    pub async fn gather(&self, bucket: &str) -> BucketSignals {
        let (exposure, policy, activity) = tokio::join!(
            self.exposure.analyze(bucket),
            self.policy.analyze(bucket),
            self.activity.analyze(bucket),
        );
        BucketSignals { exposure, policy, activity }
    }

    pub async fn score(&self, row: BucketRow) -> BucketScoreRecord {
        let signals = self.gather(&row.name).await;
        let record = fuse(row, signals, &self.hints);
        debug!(bucket = record.name(), score = record.score(), "bucket scored");
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector_core::PublicAccessBlock;
    use crate::locator::StorageLocator;
    use crate::signals::{activity_score, CHECK_ACL, PENALTY_ACL_PUBLIC};
    use crate::types::ExposureMeta;

    fn index(hints: &[(&str, &str)]) -> PrefixHintIndex {
        let mut idx = PrefixHintIndex::default();
        idx.extend(hints.iter().map(|(b, p)| StorageLocator::ObjectStore {
            bucket: b.to_string(),
            prefix: Some(p.to_string()),
        }));
        idx
    }

    #[test]
    fn no_hints_means_unidentified() {
        let rec = fuse(BucketRow::new("lonely"), BucketSignals::default(), &index(&[("other", "training/")]));
        assert_eq!(rec.meta.score, 0);
        assert_eq!(rec.meta.classification, Classification::Unidentified);
        assert!(!rec.meta.exists_in.identified);
        assert_eq!(rec.meta.exists_in.systems, vec![UNIDENTIFIED]);
        assert_eq!(rec.meta.signals.unwrap().prefix_hint_score, 0);
        assert!(rec.meta.reasons.is_empty());
    }

    #[test]
    fn hint_labels() {
        assert_eq!(classify_hint("my-bucket/feature-store/v1/data.parquet"), SYSTEM_FEATURE_STORE);
        assert_eq!(classify_hint("b/DataCapture/ep/2024"), SYSTEM_DATA_CAPTURE);
        assert_eq!(classify_hint("b/jobs/processing-output/x"), SYSTEM_PROCESSING);
        assert_eq!(classify_hint("b/training/ckpt/"), SYSTEM_TRAINING);
        assert_eq!(classify_hint("b/batch-transform/out"), SYSTEM_TRANSFORM);
        assert_eq!(classify_hint("b/models/churn/model.tar.gz"), SYSTEM_MODEL_ARTIFACTS);
        assert_eq!(classify_hint("b/raw/2024/"), SYSTEM_OTHER);
        // earlier rules win
        assert_eq!(classify_hint("b/feature_store/training/"), SYSTEM_FEATURE_STORE);
    }

    #[test]
    fn policy_hit_and_training_prefix() {
        let signals = BucketSignals {
            exposure: ExposureSignal {
                meta: ExposureMeta {
                    public_access_block: Some(PublicAccessBlock::locked_down()),
                    ..Default::default()
                },
                ..Default::default()
            },
            policy: PolicySignal {
                hit: true,
                roles: vec!["SageMakerExecutionRole-a".into()],
                degraded: false,
            },
            activity: ActivitySignal::default(),
        };
        let rec = fuse(BucketRow::new("b1"), signals, &index(&[("b1", "training/ckpt/")]));
        assert_eq!(rec.score(), W_ML_PRINCIPAL_POLICY + W_PREFIX_MATCH);
        assert_eq!(rec.meta.exists_in.systems, vec![SYSTEM_TRAINING]);
        assert_eq!(rec.meta.exists_in.evidence_prefixes, vec!["b1/training/ckpt/"]);
        assert_eq!(rec.meta.classification, Classification::Identified);
        assert_eq!(
            rec.meta.reasons,
            vec![
                "Referenced by ML principals: SageMakerExecutionRole-a".to_string(),
                "Prefix match: b1/training/ckpt/".to_string(),
            ]
        );
    }

    #[test]
    fn penalties_can_drive_the_score_negative() {
        let signals = BucketSignals {
            exposure: ExposureSignal {
                score: PENALTY_ACL_PUBLIC,
                reasons: vec!["ACL grants AllUsers (penalty)".into()],
                meta: ExposureMeta {
                    acl_public: true,
                    ..Default::default()
                },
                degraded: Vec::new(),
            },
            policy: PolicySignal::default(),
            activity: ActivitySignal {
                total: 50,
                ml_hits: 40,
                score: activity_score(50, 40),
                degraded: false,
            },
        };
        let rec = fuse(BucketRow::new("b2"), signals, &PrefixHintIndex::default());
        assert_eq!(rec.score(), activity_score(50, 40) + PENALTY_ACL_PUBLIC);
        assert!(rec.score() < 0);
        assert_eq!(rec.meta.reasons[0], "ACL grants AllUsers (penalty)");
        assert_eq!(rec.meta.reasons[1], "CloudTrail hits total=50, ml=40 (+20)");
    }

    #[test]
    fn evidence_is_capped_and_systems_are_distinct() {
        let prefixes: Vec<String> = (0..15).map(|i| format!("training/run-{i:02}/")).collect();
        let pairs: Vec<(&str, &str)> = prefixes.iter().map(|p| ("b", p.as_str())).collect();
        let rec = fuse(BucketRow::new("b"), BucketSignals::default(), &index(&pairs));
        assert_eq!(rec.meta.exists_in.evidence_prefixes.len(), MAX_EVIDENCE_PREFIXES);
        assert_eq!(rec.meta.exists_in.evidence_prefixes[0], "b/training/run-00/");
        assert_eq!(rec.meta.exists_in.systems, vec![SYSTEM_TRAINING]);
        assert_eq!(rec.score(), W_PREFIX_MATCH);
    }

    #[test]
    fn extra_columns_survive_fusion() {
        let row: BucketRow = serde_json::from_value(serde_json::json!({
            "name": "b", "region": "ap-northeast-2", "creation_date": "2024-01-01", "owner": "data-team"
        }))
        .unwrap();
        let rec = fuse(row, BucketSignals::default(), &PrefixHintIndex::default());
        let out = serde_json::to_value(&rec).unwrap();
        assert_eq!(out["owner"], "data-team");
        assert_eq!(out["_meta"]["classification"], "unidentified");
        assert_eq!(out["_meta"]["existsIn"]["systems"][0], "unidentified");
    }

    #[test]
    fn signal_keys_and_degraded_checks() {
        let signals = BucketSignals {
            exposure: ExposureSignal {
                degraded: vec![CHECK_ACL],
                ..Default::default()
            },
            policy: PolicySignal {
                degraded: true,
                ..Default::default()
            },
            activity: ActivitySignal::default(),
        };
        let rec = fuse(BucketRow::new("b"), signals, &PrefixHintIndex::default());
        let out = serde_json::to_value(&rec).unwrap();
        let mut keys: Vec<&str> = out["_meta"]["signals"]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "activityMlHits",
                "activityScore",
                "activityTotal",
                "degraded",
                "mlPrincipalHit",
                "mlPrincipalRoles",
                "policyMeta",
                "policyScore",
                "prefixHintScore",
            ]
        );
        assert_eq!(out["_meta"]["signals"]["degraded"], serde_json::json!(["acl", "iam"]));

        let clean = fuse(BucketRow::new("b"), BucketSignals::default(), &PrefixHintIndex::default());
        assert!(clean.meta.signals.unwrap().degraded.is_empty());
    }

    #[test]
    fn neutral_records_carry_no_signals() {
        let rec = neutral_record(BucketRow::new("vol-1"));
        assert_eq!(rec.score(), 0);
        assert!(rec.meta.signals.is_none());
        assert_eq!(rec.meta.exists_in.systems, vec![UNIDENTIFIED]);
    }
}
