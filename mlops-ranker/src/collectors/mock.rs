//! In-memory control plane for `--mock` runs and tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::collector_core::{
    AclGrant, AuditEvent, AuditTrail, AuditWindow, BucketControlPlane, IdentityControlPlane, JobReference, Page,
    PipelineControlPlane, PipelineStep, PublicAccessBlock, StepMetadata,
};
use crate::descriptor::{
    ChannelSource, EndpointCapture, FeatureGroup, FilesystemKind, JobDescriptor, JobKind, ModelArtifacts,
    ProcessingJob, TrainingJob,
};
use crate::error::{ApiError, ApiResult, ErrorClass};
use crate::types::BucketRow;

#[derive(Debug, Clone)]
struct Failure {
    operation: String,
    /// Only calls about this resource fail; `None` matches every call.
    target: Option<String>,
    class: ErrorClass,
    /// Failures left before the call starts succeeding; `None` never recovers.
    remaining: Option<u32>,
}

#[derive(Debug, Clone, Default)]
struct RoleFixture {
    inline: BTreeMap<String, String>,
    attached: Vec<String>,
}

/// Canned answers for every collaborator.
///
/// Listings are served in pages of `page_size` items (all at once when 0) with
/// the offset as continuation token. Absent public-access-block configuration,
/// bucket policy and descriptors answer not-found, like the real services.
#[derive(Debug, Default)]
pub struct MockControlPlane {
    page_size: usize,
    pipelines: BTreeMap<String, Vec<String>>,
    steps: HashMap<String, Vec<PipelineStep>>,
    feature_groups: Vec<String>,
    descriptors: HashMap<(JobKind, String), JobDescriptor>,
    roles: BTreeMap<String, RoleFixture>,
    managed_policies: HashMap<String, String>,
    events: Vec<AuditEvent>,
    buckets: Vec<BucketRow>,
    public_access: HashMap<String, PublicAccessBlock>,
    acls: HashMap<String, Vec<AclGrant>>,
    policies: HashMap<String, String>,
    failures: Mutex<Vec<Failure>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl MockControlPlane {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_bucket(mut self, row: BucketRow) -> Self {
        self.buckets.push(row);
        self
    }

    pub fn with_buckets<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.buckets.extend(names.into_iter().map(BucketRow::new));
        self
    }

    /// Registers a pipeline execution and its steps. Executions may be shared between pipelines.
    pub fn with_execution(mut self, pipeline: &str, execution_arn: &str, steps: Vec<PipelineStep>) -> Self {
        self.pipelines
            .entry(pipeline.to_string())
            .or_default()
            .push(execution_arn.to_string());
        self.steps.entry(execution_arn.to_string()).or_default().extend(steps);
        self
    }

    pub fn with_descriptor(mut self, descriptor: JobDescriptor) -> Self {
        self.descriptors
            .insert((descriptor.kind(), descriptor.name().to_string()), descriptor);
        self
    }

    pub fn with_feature_group(mut self, group: FeatureGroup) -> Self {
        self.feature_groups.push(group.name.clone());
        self.with_descriptor(JobDescriptor::FeatureGroup(group))
    }

    pub fn with_inline_policy(mut self, role: &str, policy: &str, document: &str) -> Self {
        self.roles
            .entry(role.to_string())
            .or_default()
            .inline
            .insert(policy.to_string(), document.to_string());
        self
    }

    pub fn with_managed_policy(mut self, role: &str, policy_arn: &str, document: &str) -> Self {
        self.roles
            .entry(role.to_string())
            .or_default()
            .attached
            .push(policy_arn.to_string());
        self.managed_policies.insert(policy_arn.to_string(), document.to_string());
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.roles.entry(role.to_string()).or_default();
        self
    }

    pub fn with_audit_events(mut self, events: Vec<AuditEvent>) -> Self {
        self.events.extend(events);
        self
    }

    pub fn with_public_access_block(mut self, bucket: &str, pab: PublicAccessBlock) -> Self {
        self.public_access.insert(bucket.to_string(), pab);
        self
    }

    pub fn with_acl(mut self, bucket: &str, grants: Vec<AclGrant>) -> Self {
        self.acls.insert(bucket.to_string(), grants);
        self
    }

    pub fn with_bucket_policy(mut self, bucket: &str, policy: &str) -> Self {
        self.policies.insert(bucket.to_string(), policy.to_string());
        self
    }

    /// Every call to `operation` fails with `class`.
    pub fn fail(self, operation: &str, class: ErrorClass) -> Self {
        self.push_failure(operation, None, class, None)
    }

    /// Calls to `operation` about `target` (bucket, role, job or pipeline) fail with `class`.
    pub fn fail_for(self, operation: &str, target: &str, class: ErrorClass) -> Self {
        self.push_failure(operation, Some(target), class, None)
    }

    /// The first `times` calls to `operation` fail transiently.
    pub fn flaky(self, operation: &str, times: u32) -> Self {
        self.push_failure(operation, None, ErrorClass::Transient, Some(times))
    }

    fn push_failure(self, operation: &str, target: Option<&str>, class: ErrorClass, remaining: Option<u32>) -> Self {
        self.failures.lock().push(Failure {
            operation: operation.to_string(),
            target: target.map(str::to_string),
            class,
            remaining,
        });
        self
    }

    /// Number of calls made to `operation` so far, failed ones included.
    pub fn calls(&self, operation: &str) -> u32 {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    fn enter(&self, operation: &str, target: Option<&str>) -> ApiResult<()> {
        *self.calls.lock().entry(operation.to_string()).or_default() += 1;
        let mut failures = self.failures.lock();
        for f in failures.iter_mut() {
            if f.operation != operation {
                continue;
            }
            if f.target.is_some() && f.target.as_deref() != target {
                continue;
            }
            match f.remaining.as_mut() {
                Some(0) => continue,
                Some(n) => *n -= 1,
                None => {}
            }
            return Err(ApiError::new(operation, f.class, "injected failure"));
        }
        Ok(())
    }

    fn page<T: Clone>(&self, operation: &str, items: &[T], token: Option<String>) -> ApiResult<Page<T>> {
        let start = match token {
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| ApiError::malformed(operation, format!("bad continuation token {t:?}")))?,
            None => 0,
        };
        let size = if self.page_size == 0 { items.len().max(1) } else { self.page_size };
        let end = (start + size).min(items.len());
        let chunk = items.get(start..end).unwrap_or_default().to_vec();
        let next = (end < items.len()).then(|| end.to_string());
        Ok(Page { items: chunk, next_token: next })
    }

    fn not_found(operation: &str, what: &str) -> ApiError {
        ApiError::new(operation, ErrorClass::NotFound, format!("{what} does not exist"))
    }

    /// A small account with one training pipeline, a feature group and a few buckets.
    pub fn demo() -> Self {
        let training = "arn:aws:sagemaker:ap-northeast-2:123456789012:training-job/churn-train-0412";
        let processing = "arn:aws:sagemaker:ap-northeast-2:123456789012:processing-job/churn-prep-0412";
        let package = "arn:aws:sagemaker:ap-northeast-2:123456789012:model-package/churn/3";
        let execution = "arn:aws:sagemaker:ap-northeast-2:123456789012:pipeline/churn/execution/4f2a";

        Self::default()
            .with_buckets(["ml-datasets-prod", "ml-artifacts-prod", "fs-offline-store", "public-website", "team-scratch"])
            .with_execution(
                "churn",
                execution,
                vec![
                    mock_step("Preprocess", "Processing", processing),
                    mock_step("Train", "Training", training),
                    mock_step("Register", "RegisterModel", package),
                    mock_step("Serve", "Endpoint", "arn:aws:sagemaker:ap-northeast-2:123456789012:endpoint/churn-live"),
                ],
            )
            .with_descriptor(JobDescriptor::Processing(ProcessingJob {
                name: "churn-prep-0412".into(),
                input_uris: vec!["s3://ml-datasets-prod/raw/churn/".into()],
                output_uris: vec!["s3://ml-datasets-prod/processed/churn/".into()],
                ..Default::default()
            }))
            .with_descriptor(JobDescriptor::Training(TrainingJob {
                name: "churn-train-0412".into(),
                channels: vec![
                    ChannelSource::ObjectStore("s3://ml-datasets-prod/processed/churn/train/".into()),
                    ChannelSource::FileSystem {
                        kind: FilesystemKind::FsxLustre,
                        id: "fs-0a1b2c3d".into(),
                    },
                ],
                output_path: Some("s3://ml-artifacts-prod/models/churn/".into()),
                checkpoint_uri: Some("s3://ml-artifacts-prod/checkpoints/churn/".into()),
                ..Default::default()
            }))
            .with_descriptor(JobDescriptor::ModelPackage(ModelArtifacts {
                name: package.into(),
                model_data_urls: vec!["s3://ml-artifacts-prod/models/churn/model.tar.gz".into()],
            }))
            .with_descriptor(JobDescriptor::EndpointCapture(EndpointCapture {
                endpoint_name: "churn-live".into(),
                capture_enabled: true,
                destination_uri: Some("s3://ml-artifacts-prod/datacapture/churn-live/".into()),
            }))
            .with_feature_group(FeatureGroup {
                name: "customers".into(),
                offline_uri: Some("s3://fs-offline-store/feature-store/".into()),
                resolved_offline_uri: Some(
                    "s3://fs-offline-store/feature-store/123456789012/sagemaker/ap-northeast-2/offline-store/customers/data"
                        .into(),
                ),
                online_store_enabled: true,
            })
            .with_inline_policy(
                "AmazonSageMaker-ExecutionRole-churn",
                "data-access",
                r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"s3:*","Resource":["arn:aws:s3:::ml-datasets-prod","arn:aws:s3:::ml-datasets-prod/*","arn:aws:s3:::ml-artifacts-prod/*"]}]}"#,
            )
            .with_role("admin")
            .with_audit_events(vec![
                AuditEvent {
                    username: Some("AmazonSageMaker-ExecutionRole-churn".into()),
                    resources: vec!["ml-datasets-prod".into()],
                    raw: None,
                },
                AuditEvent {
                    username: Some("alice".into()),
                    resources: vec!["public-website".into()],
                    raw: None,
                },
            ])
            .with_public_access_block("ml-datasets-prod", PublicAccessBlock::locked_down())
            .with_public_access_block("ml-artifacts-prod", PublicAccessBlock::locked_down())
            .with_public_access_block("fs-offline-store", PublicAccessBlock::locked_down())
            .with_public_access_block("public-website", PublicAccessBlock::default())
            .with_acl(
                "public-website",
                vec![AclGrant {
                    grantee_type: Some("Group".into()),
                    grantee_uri: Some("http://acs.amazonaws.com/groups/global/AllUsers".into()),
                }],
            )
            .with_bucket_policy(
                "ml-artifacts-prod",
                r#"{"Statement":[{"Effect":"Deny","Principal":"*","Action":"s3:*","Resource":"arn:aws:s3:::ml-artifacts-prod/*","Condition":{"StringNotEquals":{"aws:SourceVpce":"vpce-0123"}}}]}"#,
            )
    }
}

/// A pipeline step whose metadata references `arn` in the slot matching `step_type`.
pub fn mock_step(name: &str, step_type: &str, arn: &str) -> PipelineStep {
    let reference = Some(JobReference::from_arn(arn));
    let mut metadata = StepMetadata::default();
    match step_type {
        "Training" => metadata.training_job = reference,
        "Processing" => metadata.processing_job = reference,
        "Transform" => metadata.transform_job = reference,
        "RegisterModel" => metadata.register_model = reference,
        "Model" => metadata.model = reference,
        "Endpoint" => metadata.endpoint = reference,
        _ => {}
    }
    PipelineStep {
        step_name: name.to_string(),
        step_type: Some(step_type.to_string()),
        metadata,
    }
}

#[async_trait]
impl PipelineControlPlane for MockControlPlane {
    async fn list_pipelines(&self, next_token: Option<String>) -> ApiResult<Page<String>> {
        self.enter("ListPipelines", None)?;
        let names: Vec<String> = self.pipelines.keys().cloned().collect();
        self.page("ListPipelines", &names, next_token)
    }

    async fn list_pipeline_executions(&self, pipeline: &str, next_token: Option<String>) -> ApiResult<Page<String>> {
        self.enter("ListPipelineExecutions", Some(pipeline))?;
        let executions = self.pipelines.get(pipeline).map(Vec::as_slice).unwrap_or_default();
        self.page("ListPipelineExecutions", executions, next_token)
    }

    async fn list_pipeline_execution_steps(
        &self,
        execution_arn: &str,
        next_token: Option<String>,
    ) -> ApiResult<Page<PipelineStep>> {
        self.enter("ListPipelineExecutionSteps", Some(execution_arn))?;
        let steps = self.steps.get(execution_arn).map(Vec::as_slice).unwrap_or_default();
        self.page("ListPipelineExecutionSteps", steps, next_token)
    }

    async fn list_feature_groups(&self, next_token: Option<String>) -> ApiResult<Page<String>> {
        self.enter("ListFeatureGroups", None)?;
        self.page("ListFeatureGroups", &self.feature_groups, next_token)
    }

    async fn describe(&self, kind: JobKind, name: &str) -> ApiResult<JobDescriptor> {
        self.enter(kind.as_str(), Some(name))?;
        self.descriptors
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found(kind.as_str(), name))
    }
}

#[async_trait]
impl IdentityControlPlane for MockControlPlane {
    async fn list_roles(&self, marker: Option<String>) -> ApiResult<Page<String>> {
        self.enter("ListRoles", None)?;
        let roles: Vec<String> = self.roles.keys().cloned().collect();
        self.page("ListRoles", &roles, marker)
    }

    async fn list_inline_policies(&self, role: &str, marker: Option<String>) -> ApiResult<Page<String>> {
        self.enter("ListRolePolicies", Some(role))?;
        let fixture = self.roles.get(role).ok_or_else(|| Self::not_found("ListRolePolicies", role))?;
        let names: Vec<String> = fixture.inline.keys().cloned().collect();
        self.page("ListRolePolicies", &names, marker)
    }

    async fn inline_policy_document(&self, role: &str, policy: &str) -> ApiResult<String> {
        self.enter("GetRolePolicy", Some(role))?;
        self.roles
            .get(role)
            .and_then(|r| r.inline.get(policy))
            .cloned()
            .ok_or_else(|| Self::not_found("GetRolePolicy", policy))
    }

    async fn list_attached_policies(&self, role: &str, marker: Option<String>) -> ApiResult<Page<String>> {
        self.enter("ListAttachedRolePolicies", Some(role))?;
        let fixture = self
            .roles
            .get(role)
            .ok_or_else(|| Self::not_found("ListAttachedRolePolicies", role))?;
        self.page("ListAttachedRolePolicies", &fixture.attached, marker)
    }

    async fn managed_policy_document(&self, policy_arn: &str) -> ApiResult<String> {
        self.enter("GetPolicyVersion", Some(policy_arn))?;
        self.managed_policies
            .get(policy_arn)
            .cloned()
            .ok_or_else(|| Self::not_found("GetPolicyVersion", policy_arn))
    }
}

#[async_trait]
impl AuditTrail for MockControlPlane {
    async fn lookup_events(&self, _window: &AuditWindow, next_token: Option<String>) -> ApiResult<Page<AuditEvent>> {
        self.enter("LookupEvents", None)?;
        self.page("LookupEvents", &self.events, next_token)
    }
}

#[async_trait]
impl BucketControlPlane for MockControlPlane {
    async fn list_buckets(&self, next_token: Option<String>) -> ApiResult<Page<BucketRow>> {
        self.enter("ListBuckets", None)?;
        self.page("ListBuckets", &self.buckets, next_token)
    }

    async fn public_access_block(&self, bucket: &str) -> ApiResult<PublicAccessBlock> {
        self.enter("GetPublicAccessBlock", Some(bucket))?;
        self.public_access
            .get(bucket)
            .cloned()
            .ok_or_else(|| Self::not_found("GetPublicAccessBlock", "public access block configuration"))
    }

    async fn bucket_acl(&self, bucket: &str) -> ApiResult<Vec<AclGrant>> {
        self.enter("GetBucketAcl", Some(bucket))?;
        Ok(self.acls.get(bucket).cloned().unwrap_or_default())
    }

    async fn bucket_policy(&self, bucket: &str) -> ApiResult<String> {
        self.enter("GetBucketPolicy", Some(bucket))?;
        self.policies
            .get(bucket)
            .cloned()
            .ok_or_else(|| Self::not_found("GetBucketPolicy", "bucket policy"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listings_paginate_by_offset() {
        let mock = MockControlPlane::default()
            .with_buckets(["a", "b", "c"])
            .with_page_size(2);
        let first = mock.list_buckets(None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("2"));
        let second = mock.list_buckets(first.next_token).await.unwrap();
        assert_eq!(second.items[0].name, "c");
        assert_eq!(second.next_token, None);
    }

    #[tokio::test]
    async fn flaky_operations_recover() {
        let mock = MockControlPlane::default().flaky("ListRoles", 2);
        assert!(mock.list_roles(None).await.is_err());
        assert!(mock.list_roles(None).await.is_err());
        assert!(mock.list_roles(None).await.is_ok());
        assert_eq!(mock.calls("ListRoles"), 3);
    }

    #[tokio::test]
    async fn targeted_failures_only_hit_their_resource() {
        let mock = MockControlPlane::default()
            .with_acl("a", vec![])
            .fail_for("GetBucketAcl", "b", ErrorClass::AccessDenied);
        assert!(mock.bucket_acl("a").await.is_ok());
        let err = mock.bucket_acl("b").await.unwrap_err();
        assert_eq!(err.class, ErrorClass::AccessDenied);
    }

    #[tokio::test]
    async fn absent_configuration_is_not_found() {
        let mock = MockControlPlane::default();
        let err = mock.bucket_policy("b").await.unwrap_err();
        assert_eq!(err.class, ErrorClass::NotFound);
        let err = mock.describe(JobKind::Training, "nope").await.unwrap_err();
        assert_eq!(err.class, ErrorClass::NotFound);
    }
}
