use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::{JobDescriptor, JobKind};
use crate::error::ApiResult;
use crate::types::BucketRow;

/// One page of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_token: Option<&str>) -> Self {
        Self {
            items,
            next_token: next_token.map(str::to_string),
        }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self { items, next_token: None }
    }
}

/// Name and/or ARN of the job a pipeline step ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReference {
    pub name: Option<String>,
    pub arn: Option<String>,
}

impl JobReference {
    pub fn from_arn(arn: impl Into<String>) -> Self {
        Self { name: None, arn: Some(arn.into()) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub training_job: Option<JobReference>,
    pub processing_job: Option<JobReference>,
    pub transform_job: Option<JobReference>,
    pub model: Option<JobReference>,
    pub register_model: Option<JobReference>,
    pub endpoint: Option<JobReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub step_name: String,
    pub step_type: Option<String>,
    pub metadata: StepMetadata,
}

/// Closed time range for audit-event lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AuditWindow {
    pub fn lookback(days: u32) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(i64::from(days)),
            end,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditEvent {
    pub username: Option<String>,
    /// Declared resource names (bucket names or ARNs).
    pub resources: Vec<String>,
    /// The raw CloudTrail event JSON, if returned.
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicAccessBlock {
    pub block_public_acls: Option<bool>,
    pub ignore_public_acls: Option<bool>,
    pub block_public_policy: Option<bool>,
    pub restrict_public_buckets: Option<bool>,
}

impl PublicAccessBlock {
    pub fn locked_down() -> Self {
        Self {
            block_public_acls: Some(true),
            ignore_public_acls: Some(true),
            block_public_policy: Some(true),
            restrict_public_buckets: Some(true),
        }
    }

    /// True unless all four guards are explicitly enabled.
    pub fn is_relaxed(&self) -> bool {
        ![
            self.block_public_acls,
            self.ignore_public_acls,
            self.block_public_policy,
            self.restrict_public_buckets,
        ]
        .iter()
        .all(|flag| flag.unwrap_or(false))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclGrant {
    pub grantee_type: Option<String>,
    pub grantee_uri: Option<String>,
}

impl AclGrant {
    pub fn is_all_users(&self) -> bool {
        self.grantee_type.as_deref() == Some("Group")
            && self
                .grantee_uri
                .as_deref()
                .is_some_and(|uri| uri.contains("AllUsers"))
    }
}

/// SageMaker pipelines, jobs, models, endpoints and feature groups.
#[async_trait]
pub trait PipelineControlPlane: Send + Sync {
    async fn list_pipelines(&self, next_token: Option<String>) -> ApiResult<Page<String>>;

    /// Execution ARNs of one pipeline.
    async fn list_pipeline_executions(
        &self,
        pipeline: &str,
        next_token: Option<String>,
    ) -> ApiResult<Page<String>>;

    async fn list_pipeline_execution_steps(
        &self,
        execution_arn: &str,
        next_token: Option<String>,
    ) -> ApiResult<Page<PipelineStep>>;

    async fn list_feature_groups(&self, next_token: Option<String>) -> ApiResult<Page<String>>;

    async fn describe(&self, kind: JobKind, name: &str) -> ApiResult<JobDescriptor>;
}

/// IAM roles and their policy documents. Documents are returned as JSON text.
#[async_trait]
pub trait IdentityControlPlane: Send + Sync {
    async fn list_roles(&self, marker: Option<String>) -> ApiResult<Page<String>>;

    async fn list_inline_policies(&self, role: &str, marker: Option<String>) -> ApiResult<Page<String>>;

    async fn inline_policy_document(&self, role: &str, policy: &str) -> ApiResult<String>;

    /// ARNs of managed policies attached to `role`.
    async fn list_attached_policies(&self, role: &str, marker: Option<String>) -> ApiResult<Page<String>>;

    /// Default version of a managed policy.
    async fn managed_policy_document(&self, policy_arn: &str) -> ApiResult<String>;
}

#[async_trait]
pub trait AuditTrail: Send + Sync {
    async fn lookup_events(&self, window: &AuditWindow, next_token: Option<String>) -> ApiResult<Page<AuditEvent>>;
}

#[async_trait]
pub trait BucketControlPlane: Send + Sync {
    async fn list_buckets(&self, next_token: Option<String>) -> ApiResult<Page<BucketRow>>;

    async fn public_access_block(&self, bucket: &str) -> ApiResult<PublicAccessBlock>;

    async fn bucket_acl(&self, bucket: &str) -> ApiResult<Vec<AclGrant>>;

    /// Bucket policy JSON text.
    async fn bucket_policy(&self, bucket: &str) -> ApiResult<String>;
}

/// Handles to every collaborator a ranking request talks to.
#[derive(Clone)]
pub struct ControlPlane {
    pub pipelines: Arc<dyn PipelineControlPlane>,
    pub identity: Arc<dyn IdentityControlPlane>,
    pub audit: Arc<dyn AuditTrail>,
    pub buckets: Arc<dyn BucketControlPlane>,
}

impl ControlPlane {
    /// Uses one implementation for every collaborator.
    pub fn uniform<T>(backend: Arc<T>) -> Self
    where
        T: PipelineControlPlane + IdentityControlPlane + AuditTrail + BucketControlPlane + 'static,
    {
        Self {
            pipelines: backend.clone(),
            identity: backend.clone(),
            audit: backend.clone(),
            buckets: backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_public_access_flags_count_as_relaxed() {
        assert!(!PublicAccessBlock::locked_down().is_relaxed());
        let partial = PublicAccessBlock {
            block_public_acls: Some(true),
            ..PublicAccessBlock::locked_down()
        };
        assert!(!partial.is_relaxed());
        let missing = PublicAccessBlock {
            restrict_public_buckets: None,
            ..PublicAccessBlock::locked_down()
        };
        assert!(missing.is_relaxed());
    }

    #[test]
    fn all_users_grant_detection() {
        let public = AclGrant {
            grantee_type: Some("Group".into()),
            grantee_uri: Some("http://acs.amazonaws.com/groups/global/AllUsers".into()),
        };
        assert!(public.is_all_users());
        let authenticated = AclGrant {
            grantee_uri: Some("http://acs.amazonaws.com/groups/global/AuthenticatedUsers".into()),
            ..public.clone()
        };
        assert!(!authenticated.is_all_users());
        let canonical = AclGrant {
            grantee_type: Some("CanonicalUser".into()),
            ..public
        };
        assert!(!canonical.is_all_users());
    }
}
