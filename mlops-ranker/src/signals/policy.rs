use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{is_ml_principal, PolicyDocument};
use crate::collector_core::IdentityControlPlane;
use crate::config::{RetryPolicy, Settings};
use crate::error::ApiError;
use crate::retry::{drain_pages, with_retry};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySignal {
    pub hit: bool,
    /// Sorted, distinct.
    pub roles: Vec<String>,
    /// Some role or policy could not be read, so a miss is not conclusive.
    pub degraded: bool,
}

/// Policy documents of one ML role, inline first, then attached.
#[derive(Debug, Clone)]
struct RolePolicies {
    role: String,
    documents: Vec<PolicyDocument>,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    roles: Vec<RolePolicies>,
    complete: bool,
}

/// Finds ML roles whose policies name a bucket.
///
/// Role policies are loaded on first use and reused for every bucket scored
/// by the same analyzer, so one analyzer should live for one request.
pub struct PolicySignalAnalyzer {
    api: Arc<dyn IdentityControlPlane>,
    retry: RetryPolicy,
    max_pages: usize,
    concurrency: usize,
    snapshot: OnceCell<Snapshot>,
}

impl PolicySignalAnalyzer {
    pub fn new(api: Arc<dyn IdentityControlPlane>, settings: &Settings) -> Self {
        Self {
            api,
            retry: settings.retry.clone(),
            max_pages: settings.max_pages,
            concurrency: settings.crawl_concurrency.max(1),
            snapshot: OnceCell::new(),
        }
    }

    pub async fn analyze(&self, bucket: &str) -> PolicySignal {
        let snapshot = self.snapshot.get_or_init(|| self.load()).await;
        let matched: BTreeSet<&str> = snapshot
            .roles
            .iter()
            .filter(|r| r.documents.iter().any(|d| d.refers_to_bucket(bucket)))
            .map(|r| r.role.as_str())
            .collect();
        PolicySignal {
            hit: !matched.is_empty(),
            roles: matched.into_iter().map(str::to_string).collect(),
            degraded: !snapshot.complete,
        }
    }

    async fn load(&self) -> Snapshot {
        let api = self.api.as_ref();
        let (roles, err) = drain_pages(&self.retry, "ListRoles", self.max_pages, |marker| async move {
            api.list_roles(marker).await
        })
        .await;
        let mut complete = log_error("ListRoles", err);

        let ml_roles: Vec<String> = roles.into_iter().filter(|r| is_ml_principal(r)).collect();
        let loaded: Vec<(RolePolicies, bool)> = stream::iter(ml_roles)
            .map(|role| async move {
                let (documents, read_all) = self.role_documents(&role).await;
                (RolePolicies { role, documents }, read_all)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        complete &= loaded.iter().all(|(_, read_all)| *read_all);
        let roles: Vec<RolePolicies> = loaded.into_iter().map(|(r, _)| r).collect();
        info!(
            roles = roles.len(),
            documents = roles.iter().map(|r| r.documents.len()).sum::<usize>(),
            complete,
            "ML role policies loaded"
        );
        Snapshot { roles, complete }
    }

    /// Parsed documents of `role`, and whether every one of them could be read.
    async fn role_documents(&self, role: &str) -> (Vec<PolicyDocument>, bool) {
        let api = self.api.as_ref();
        let mut texts = Vec::new();

        let (inline, err) = drain_pages(&self.retry, "ListRolePolicies", self.max_pages, |marker| {
            let role = role.to_string();
            async move { api.list_inline_policies(&role, marker).await }
        })
        .await;
        let mut read_all = log_error("ListRolePolicies", err);
        for name in inline {
            let doc = with_retry(&self.retry, "GetRolePolicy", || {
                let (role, name) = (role.to_string(), name.clone());
                async move { api.inline_policy_document(&role, &name).await }
            })
            .await;
            match doc {
                Ok(text) => texts.push(text),
                Err(e) => read_all &= log_error("GetRolePolicy", Some(e)),
            }
        }

        let (attached, err) = drain_pages(&self.retry, "ListAttachedRolePolicies", self.max_pages, |marker| {
            let role = role.to_string();
            async move { api.list_attached_policies(&role, marker).await }
        })
        .await;
        read_all &= log_error("ListAttachedRolePolicies", err);
        for arn in attached {
            let doc = with_retry(&self.retry, "GetPolicyVersion", || {
                let arn = arn.clone();
                async move { api.managed_policy_document(&arn).await }
            })
            .await;
            match doc {
                Ok(text) => texts.push(text),
                Err(e) => read_all &= log_error("GetPolicyVersion", Some(e)),
            }
        }

        let mut documents = Vec::with_capacity(texts.len());
        for text in &texts {
            match PolicyDocument::parse(text) {
                Some(doc) => documents.push(doc),
                None => {
                    debug!(role, "unparseable policy document skipped");
                    read_all = false;
                }
            }
        }
        (documents, read_all)
    }
}

/// Logs a failed lookup. Returns false when the failure leaves the snapshot incomplete.
fn log_error(operation: &str, err: Option<ApiError>) -> bool {
    let Some(e) = err else { return true };
    if e.class.is_absent() {
        warn!(operation, class = %e.class, "no policy signal");
    } else {
        warn!(operation, error = %e, "policy lookup failed");
    }
    !e.class.is_inconclusive()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::collectors::mock::MockControlPlane;
    use crate::error::ErrorClass;

    fn analyzer(mock: MockControlPlane) -> PolicySignalAnalyzer {
        PolicySignalAnalyzer::new(Arc::new(mock), &Settings::default())
    }

    fn s3_policy(resources: &[&str]) -> String {
        json!({"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Action": "s3:GetObject", "Resource": resources}]})
            .to_string()
    }

    #[tokio::test]
    async fn reports_every_matching_ml_role_sorted() {
        let mock = MockControlPlane::default()
            .with_inline_policy("SageMakerExecutionRole-b", "p", &s3_policy(&["arn:aws:s3:::b1/*"]))
            .with_managed_policy("AWSGlueServiceRole-a", "arn:aws:iam::1:policy/glue", &s3_policy(&["arn:aws:s3:::b1"]))
            .with_inline_policy("AthenaRole", "p", &s3_policy(&["arn:aws:s3:::b2"]));
        let signal = analyzer(mock).analyze("b1").await;
        assert!(signal.hit);
        assert_eq!(signal.roles, vec!["AWSGlueServiceRole-a", "SageMakerExecutionRole-b"]);
        assert!(!signal.degraded);
    }

    #[tokio::test]
    async fn non_ml_roles_are_ignored() {
        let mock = MockControlPlane::default().with_inline_policy("admin", "p", &s3_policy(&["arn:aws:s3:::b1"]));
        assert_eq!(analyzer(mock).analyze("b1").await, PolicySignal::default());
    }

    #[tokio::test]
    async fn denied_role_listing_means_no_signal() {
        let mock = MockControlPlane::default()
            .with_inline_policy("SageMakerRole", "p", &s3_policy(&["arn:aws:s3:::b1"]))
            .fail("ListRoles", ErrorClass::AccessDenied);
        let signal = analyzer(mock).analyze("b1").await;
        assert!(!signal.hit);
        assert!(signal.degraded);
    }

    #[tokio::test]
    async fn unreadable_documents_mark_the_signal_degraded() {
        let mock = MockControlPlane::default()
            .with_inline_policy("SageMakerRole", "p", &s3_policy(&["arn:aws:s3:::b1"]))
            .with_managed_policy("SageMakerRole", "arn:aws:iam::1:policy/x", &s3_policy(&["arn:aws:s3:::b2"]))
            .fail("GetPolicyVersion", ErrorClass::Other);
        let analyzer = analyzer(mock);
        let b1 = analyzer.analyze("b1").await;
        assert!(b1.hit);
        assert!(b1.degraded);
        assert!(analyzer.analyze("b2").await.degraded);
    }

    #[tokio::test]
    async fn malformed_documents_do_not_hide_good_ones() {
        let mock = MockControlPlane::default()
            .with_inline_policy("SageMakerRole", "broken", "{{{")
            .with_inline_policy("SageMakerRole", "good", &s3_policy(&["arn:aws:s3:::b1/data/*"]));
        assert!(analyzer(mock).analyze("b1").await.hit);
    }
}
