use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::{bucket_arn, is_ml_principal, W_CLOUDTRAIL_ACTIVITY};
use crate::collector_core::{AuditEvent, AuditTrail, AuditWindow};
use crate::config::{RetryPolicy, Settings};
use crate::retry::drain_pages;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivitySignal {
    pub total: u64,
    pub ml_hits: u64,
    pub score: i32,
    /// The audit lookup stopped early; counts cover only the events read.
    pub degraded: bool,
}

/// Log-scaled activity credit in `[0, W_CLOUDTRAIL_ACTIVITY]`.
///
/// ML-attributed hits count double; ten weighted hits already earn the full weight.
pub fn activity_score(total: u64, ml_hits: u64) -> i32 {
    let x = ml_hits.saturating_mul(2).saturating_add(total.saturating_sub(ml_hits));
    if x == 0 {
        return 0;
    }
    let w = f64::from(W_CLOUDTRAIL_ACTIVITY);
    let scaled = (w * (1.0 + x as f64).log10() / 11f64.log10()).round();
    (scaled as i32).clamp(0, W_CLOUDTRAIL_ACTIVITY)
}

/// An audit event with its raw payload decoded once.
#[derive(Debug, Clone)]
struct ParsedEvent {
    event: AuditEvent,
    raw: Value,
}

impl ParsedEvent {
    fn new(event: AuditEvent) -> Self {
        let raw = event
            .raw
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
            .unwrap_or(Value::Null);
        Self { event, raw }
    }

    fn touches(&self, bucket: &str, arn: &str) -> bool {
        if self.event.resources.iter().any(|r| r == bucket || r == arn) {
            return true;
        }
        if self.raw.pointer("/requestParameters/bucketName").and_then(Value::as_str) == Some(bucket) {
            return true;
        }
        self.raw
            .get("resources")
            .and_then(Value::as_array)
            .is_some_and(|rs| {
                rs.iter().any(|r| {
                    r.get("ARN").and_then(Value::as_str) == Some(arn)
                        || r.get("resourceName").and_then(Value::as_str) == Some(bucket)
                })
            })
    }

    fn by_ml_principal(&self) -> bool {
        if self.event.username.as_deref().is_some_and(is_ml_principal) {
            return true;
        }
        self.raw
            .pointer("/userIdentity/arn")
            .and_then(Value::as_str)
            .is_some_and(is_ml_principal)
    }
}

/// Counts recent audit events that reference a bucket.
///
/// The lookback window is read once, on first use, and shared by every
/// bucket scored with the same analyzer.
pub struct ActivitySignalAnalyzer {
    api: Arc<dyn AuditTrail>,
    retry: RetryPolicy,
    window: AuditWindow,
    max_pages: usize,
    events: OnceCell<(Vec<ParsedEvent>, bool)>,
}

impl ActivitySignalAnalyzer {
    pub fn new(api: Arc<dyn AuditTrail>, lookback_days: u32, settings: &Settings) -> Self {
        Self::with_window(api, AuditWindow::lookback(lookback_days), settings)
    }

    pub fn with_window(api: Arc<dyn AuditTrail>, window: AuditWindow, settings: &Settings) -> Self {
        Self {
            api,
            retry: settings.retry.clone(),
            window,
            max_pages: settings.audit_max_pages,
            events: OnceCell::new(),
        }
    }

    pub async fn analyze(&self, bucket: &str) -> ActivitySignal {
        let (events, complete) = self.events.get_or_init(|| self.load()).await;
        let arn = bucket_arn(bucket);
        let (mut total, mut ml_hits) = (0u64, 0u64);
        for e in events.iter().filter(|e| e.touches(bucket, &arn)) {
            total += 1;
            if e.by_ml_principal() {
                ml_hits += 1;
            }
        }
        ActivitySignal {
            total,
            ml_hits,
            score: activity_score(total, ml_hits),
            degraded: !*complete,
        }
    }

    /// The events in the window, and whether the listing was read to the end.
    async fn load(&self) -> (Vec<ParsedEvent>, bool) {
        let api = self.api.as_ref();
        let window = self.window;
        let (events, err) = drain_pages(&self.retry, "LookupEvents", self.max_pages, |token| async move {
            api.lookup_events(&window, token).await
        })
        .await;
        let complete = match err {
            Some(e) => {
                warn!(error = %e, kept = events.len(), "audit lookup incomplete");
                !e.class.is_inconclusive()
            }
            None => true,
        };
        info!(events = events.len(), start = %window.start, end = %window.end, "audit events loaded");
        (events.into_iter().map(ParsedEvent::new).collect(), complete)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::collectors::mock::MockControlPlane;
    use crate::error::ErrorClass;

    #[test]
    fn zero_activity_scores_zero() {
        assert_eq!(activity_score(0, 0), 0);
    }

    #[test]
    fn score_is_bounded_and_monotone_in_ml_hits() {
        for total in [0u64, 1, 2, 5, 9, 10, 50, 1_000, 1_000_000] {
            let mut last = 0;
            for ml in 0..=total.min(200) {
                let s = activity_score(total, ml);
                assert!((0..=W_CLOUDTRAIL_ACTIVITY).contains(&s), "total={total} ml={ml} -> {s}");
                assert!(s >= last, "not monotone at total={total} ml={ml}");
                last = s;
            }
        }
    }

    #[test]
    fn known_values() {
        // x = 1 -> 20 * log10(2) / log10(11) = 5.78
        assert_eq!(activity_score(1, 0), 6);
        // x = 2
        assert_eq!(activity_score(1, 1), 9);
        // x = 10 reaches the cap
        assert_eq!(activity_score(10, 0), W_CLOUDTRAIL_ACTIVITY);
        assert_eq!(activity_score(50, 40), W_CLOUDTRAIL_ACTIVITY);
    }

    fn raw(v: serde_json::Value) -> Option<String> {
        Some(v.to_string())
    }

    #[tokio::test]
    async fn matches_on_resources_and_raw_payload() {
        let events = vec![
            AuditEvent {
                username: Some("AmazonSageMaker-ExecutionRole".into()),
                resources: vec!["b1".into()],
                raw: None,
            },
            AuditEvent {
                username: Some("alice".into()),
                resources: vec![],
                raw: raw(json!({"requestParameters": {"bucketName": "b1"}})),
            },
            AuditEvent {
                username: None,
                resources: vec![],
                raw: raw(json!({
                    "userIdentity": {"arn": "arn:aws:sts::1:assumed-role/GlueJobRole/s"},
                    "resources": [{"ARN": "arn:aws:s3:::b1"}]
                })),
            },
            AuditEvent {
                username: Some("SageMaker".into()),
                resources: vec!["b10".into()],
                raw: Some("not json".into()),
            },
        ];
        let mock = MockControlPlane::default().with_audit_events(events);
        let analyzer = ActivitySignalAnalyzer::new(Arc::new(mock), 14, &Settings::default());
        let signal = analyzer.analyze("b1").await;
        assert_eq!((signal.total, signal.ml_hits), (3, 2));
        assert_eq!(signal.score, activity_score(3, 2));
        assert!(!signal.degraded);
        assert_eq!(analyzer.analyze("nothing").await, ActivitySignal::default());
    }

    #[tokio::test]
    async fn only_an_unfinished_lookup_is_degraded() {
        let event = AuditEvent {
            username: Some("alice".into()),
            resources: vec!["b1".into()],
            raw: None,
        };
        let mock = MockControlPlane::default()
            .with_page_size(1)
            .with_audit_events(vec![event.clone(), event]);
        let analyzer = ActivitySignalAnalyzer::new(Arc::new(mock), 14, &Settings::default());
        let signal = analyzer.analyze("b1").await;
        assert_eq!(signal.total, 2);
        assert!(!signal.degraded);

        let denied = MockControlPlane::default().fail("LookupEvents", ErrorClass::AccessDenied);
        let analyzer = ActivitySignalAnalyzer::new(Arc::new(denied), 14, &Settings::default());
        let signal = analyzer.analyze("b1").await;
        assert_eq!(signal.total, 0);
        assert!(signal.degraded);
    }
}
