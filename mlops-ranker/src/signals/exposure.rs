use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{
    PolicyDocument, Statement, CHECK_ACL, CHECK_BUCKET_POLICY, CHECK_PUBLIC_ACCESS_BLOCK, PENALTY_ACL_PUBLIC,
    PENALTY_PUBLIC_POLICY, W_POLICY_HARDENING,
};
use crate::collector_core::BucketControlPlane;
use crate::config::RetryPolicy;
use crate::error::{ApiError, ApiResult};
use crate::retry::with_retry;
use crate::types::ExposureMeta;

pub const REASON_PAB_RELAXED: &str = "PublicAccessBlock relaxed (penalty)";
pub const REASON_ACL_PUBLIC: &str = "ACL grants AllUsers (penalty)";
pub const REASON_POLICY_HARDENING: &str = "BucketPolicy VPCE/ServicePrincipal (+)";

const NETWORK_CONDITION_KEYS: [&str; 2] = ["aws:sourcevpce", "aws:sourcevpc"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExposureSignal {
    pub score: i32,
    pub reasons: Vec<String>,
    pub meta: ExposureMeta,
    /// Checks that could not be completed, in check order.
    pub degraded: Vec<&'static str>,
}

fn pins_network_endpoint(st: &Statement) -> bool {
    st.condition.iter().flat_map(|c| c.values()).any(|block| {
        block
            .as_object()
            .is_some_and(|keys| keys.keys().any(|k| NETWORK_CONDITION_KEYS.contains(&k.to_ascii_lowercase().as_str())))
    })
}

fn scoped_to_service(st: &Statement) -> bool {
    match &st.principal {
        Some(Value::Object(p)) => p.keys().any(|k| k.eq_ignore_ascii_case("service")),
        _ => false,
    }
}

/// A statement restricted to a VPC endpoint, or granted to a service principal.
pub fn policy_is_hardened(doc: &PolicyDocument) -> bool {
    doc.statements().any(|st| pins_network_endpoint(st) || scoped_to_service(st))
}

/// Public-exposure penalties and policy-hardening bonus for one bucket.
pub struct ExposureAnalyzer {
    api: Arc<dyn BucketControlPlane>,
    retry: RetryPolicy,
}

impl ExposureAnalyzer {
    pub fn new(api: Arc<dyn BucketControlPlane>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    pub async fn analyze(&self, bucket: &str) -> ExposureSignal {
        let api = self.api.as_ref();
        let (pab, acl, policy) = tokio::join!(
            with_retry(&self.retry, "GetPublicAccessBlock", || {
                let b = bucket.to_string();
                async move { api.public_access_block(&b).await }
            }),
            with_retry(&self.retry, "GetBucketAcl", || {
                let b = bucket.to_string();
                async move { api.bucket_acl(&b).await }
            }),
            with_retry(&self.retry, "GetBucketPolicy", || {
                let b = bucket.to_string();
                async move { api.bucket_policy(&b).await }
            }),
        );

        let mut signal = ExposureSignal::default();

        if let Some(pab) = signal.settle(bucket, CHECK_PUBLIC_ACCESS_BLOCK, pab) {
            if pab.is_relaxed() {
                signal.score += PENALTY_PUBLIC_POLICY;
                signal.reasons.push(REASON_PAB_RELAXED.to_string());
            }
            signal.meta.public_access_block = Some(pab);
        }

        if let Some(grants) = signal.settle(bucket, CHECK_ACL, acl) {
            if grants.iter().any(|g| g.is_all_users()) {
                signal.meta.acl_public = true;
                signal.score += PENALTY_ACL_PUBLIC;
                signal.reasons.push(REASON_ACL_PUBLIC.to_string());
            }
        }

        if let Some(text) = signal.settle(bucket, CHECK_BUCKET_POLICY, policy) {
            match PolicyDocument::parse(&text) {
                Some(doc) if policy_is_hardened(&doc) => {
                    signal.meta.policy_hardening = true;
                    signal.score += W_POLICY_HARDENING;
                    signal.reasons.push(REASON_POLICY_HARDENING.to_string());
                }
                Some(_) => {}
                None => {
                    debug!(bucket, "bucket policy is not valid JSON");
                    signal.degraded.push(CHECK_BUCKET_POLICY);
                }
            }
        }

        signal
    }
}

impl ExposureSignal {
    /// Drops a failed sub-call, logging it. Absent configuration is common and
    /// logged quietly; anything but `NotFound` marks `check` as degraded.
    fn settle<T>(&mut self, bucket: &str, check: &'static str, res: ApiResult<T>) -> Option<T> {
        let err = match res {
            Ok(v) => return Some(v),
            Err(e) => e,
        };
        let ApiError { class, operation, .. } = &err;
        if class.is_absent() {
            debug!(bucket, operation = %operation, class = %class, "no exposure signal");
        } else {
            warn!(bucket, error = %err, "exposure check failed");
        }
        if class.is_inconclusive() {
            self.degraded.push(check);
        }
        None
    }
}
