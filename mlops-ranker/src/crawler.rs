//! Discovery crawl over SageMaker pipelines.
//!
//! pipelines -> executions -> steps -> job describes -> locators. Feature
//! groups are enumerated once, and models and endpoints found on the way are
//! described after the step walk.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::collector_core::{JobReference, PipelineControlPlane, PipelineStep};
use crate::config::{RetryPolicy, Settings};
use crate::descriptor::{JobDescriptor, JobKind};
use crate::error::ApiError;
use crate::hints::PrefixHintIndex;
use crate::locator::extract;
use crate::retry::{drain_pages, with_retry};
use crate::utils::arn_resource_name;

/// What a pipeline step points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTarget {
    Job(JobKind, String),
    /// Model package ARN (or name) registered by the step.
    RegisterModel(String),
    Model(String),
    Endpoint(String),
    Unknown,
}

fn resolve_name(r: &JobReference) -> Option<String> {
    r.name
        .as_deref()
        .filter(|n| !n.is_empty())
        .or_else(|| r.arn.as_deref().and_then(arn_resource_name))
        .map(str::to_string)
}

fn target_for(kind: &str, step: &PipelineStep) -> Option<StepTarget> {
    let md = &step.metadata;
    match kind {
        "Training" => md
            .training_job
            .as_ref()
            .and_then(resolve_name)
            .map(|n| StepTarget::Job(JobKind::Training, n)),
        "Processing" => md
            .processing_job
            .as_ref()
            .and_then(resolve_name)
            .map(|n| StepTarget::Job(JobKind::Processing, n)),
        "Transform" => md
            .transform_job
            .as_ref()
            .and_then(resolve_name)
            .map(|n| StepTarget::Job(JobKind::Transform, n)),
        "RegisterModel" => md.register_model.as_ref().and_then(|r| {
            // describe accepts the full package ARN; the trailing segment is only a version
            r.arn
                .clone()
                .filter(|a| !a.is_empty())
                .or_else(|| r.name.clone().filter(|n| !n.is_empty()))
                .map(StepTarget::RegisterModel)
        }),
        "Model" | "CreateModel" => md.model.as_ref().and_then(resolve_name).map(StepTarget::Model),
        "Endpoint" | "CreateEndpoint" | "UpdateEndpoint" => {
            md.endpoint.as_ref().and_then(resolve_name).map(StepTarget::Endpoint)
        }
        _ => None,
    }
}

const METADATA_ORDER: [&str; 6] = ["Training", "Processing", "Transform", "RegisterModel", "Model", "Endpoint"];

/// Maps a step to the resource it ran. The declared step type is tried
/// first, then whichever metadata entry is present.
pub fn classify_step(step: &PipelineStep) -> StepTarget {
    if let Some(t) = step.step_type.as_deref().and_then(|k| target_for(k, step)) {
        return t;
    }
    METADATA_ORDER
        .iter()
        .find_map(|k| target_for(k, step))
        .unwrap_or(StepTarget::Unknown)
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(JobDescriptor),
    /// Not found or forbidden; contributes nothing.
    Missing,
    /// Any other failure once retries are exhausted.
    Failed,
}

/// Issues one describe call per job and never fails.
#[derive(Clone)]
pub struct JobDescriptorFetcher {
    api: Arc<dyn PipelineControlPlane>,
    retry: RetryPolicy,
}

impl JobDescriptorFetcher {
    pub fn new(api: Arc<dyn PipelineControlPlane>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    pub async fn fetch(&self, kind: JobKind, name: &str) -> FetchOutcome {
        let api = self.api.as_ref();
        let res = with_retry(&self.retry, kind.as_str(), || {
            let name = name.to_string();
            async move { api.describe(kind, &name).await }
        })
        .await;
        match res {
            Ok(d) => FetchOutcome::Found(d),
            Err(e) if e.class.is_absent() => {
                warn!(kind = kind.as_str(), name, class = %e.class, "describe returned no descriptor");
                FetchOutcome::Missing
            }
            Err(e) => {
                warn!(kind = kind.as_str(), name, error = %e, "describe failed; job skipped");
                FetchOutcome::Failed
            }
        }
    }
}

pub struct PipelineGraphCrawler {
    api: Arc<dyn PipelineControlPlane>,
    fetcher: JobDescriptorFetcher,
    retry: RetryPolicy,
    concurrency: usize,
    max_pages: usize,
}

impl PipelineGraphCrawler {
    pub fn new(api: Arc<dyn PipelineControlPlane>, settings: &Settings) -> Self {
        Self {
            fetcher: JobDescriptorFetcher::new(api.clone(), settings.retry.clone()),
            api,
            retry: settings.retry.clone(),
            concurrency: settings.crawl_concurrency.max(1),
            max_pages: settings.max_pages,
        }
    }

    /// Builds a best-effort index. Failures are logged and counted, never returned.
    #[instrument(skip_all)]
    pub async fn crawl(&self) -> PrefixHintIndex {
        let mut index = PrefixHintIndex::default();
        self.crawl_feature_groups(&mut index).await;

        let api = self.api.as_ref();
        let (pipelines, err) = drain_pages(&self.retry, "ListPipelines", self.max_pages, |token| async move {
            api.list_pipelines(token).await
        })
        .await;
        note_listing_error(&mut index, err);
        index.stats.pipelines = pipelines.len();

        let mut visited_executions = HashSet::new();
        let mut described = HashSet::new();
        for pipeline in &pipelines {
            let jobs = self.walk_pipeline(pipeline, &mut visited_executions, &mut index).await;
            let fresh: Vec<_> = jobs.into_iter().filter(|j| described.insert(j.clone())).collect();
            self.describe_all(fresh, &mut index).await;
        }

        let models: Vec<_> = index
            .discovered_models
            .iter()
            .map(|m| (JobKind::Model, m.clone()))
            .chain(
                index
                    .discovered_model_packages
                    .iter()
                    .map(|p| (JobKind::ModelPackage, p.clone())),
            )
            .collect();
        self.describe_all(models, &mut index).await;

        let endpoints: Vec<_> = index
            .discovered_endpoints
            .iter()
            .map(|e| (JobKind::Endpoint, e.clone()))
            .collect();
        self.describe_all(endpoints, &mut index).await;

        info!(
            pipelines = index.stats.pipelines,
            executions = index.stats.executions,
            steps = index.stats.steps,
            described = index.stats.described,
            missing = index.stats.missing,
            failed = index.stats.failed,
            prefixes = index.bucket_prefixes.len(),
            "discovery crawl finished"
        );
        index
    }

    async fn crawl_feature_groups(&self, index: &mut PrefixHintIndex) {
        let api = self.api.as_ref();
        let (groups, err) = drain_pages(&self.retry, "ListFeatureGroups", self.max_pages, |token| async move {
            api.list_feature_groups(token).await
        })
        .await;
        note_listing_error(index, err);
        index.stats.feature_groups = groups.len();
        let jobs = groups.into_iter().map(|g| (JobKind::FeatureGroup, g)).collect();
        self.describe_all(jobs, index).await;
    }

    /// Walks every execution of `pipeline`, returning the jobs its steps ran.
    async fn walk_pipeline(
        &self,
        pipeline: &str,
        visited: &mut HashSet<String>,
        index: &mut PrefixHintIndex,
    ) -> Vec<(JobKind, String)> {
        let api = self.api.as_ref();
        let (executions, err) = drain_pages(&self.retry, "ListPipelineExecutions", self.max_pages, |token| {
            let pipeline = pipeline.to_string();
            async move { api.list_pipeline_executions(&pipeline, token).await }
        })
        .await;
        note_listing_error(index, err);

        let mut jobs = Vec::new();
        for arn in executions {
            if !visited.insert(arn.clone()) {
                debug!(execution = %arn, "execution already visited");
                continue;
            }
            index.stats.executions += 1;
            let (steps, err) = drain_pages(&self.retry, "ListPipelineExecutionSteps", self.max_pages, |token| {
                let arn = arn.clone();
                async move { api.list_pipeline_execution_steps(&arn, token).await }
            })
            .await;
            note_listing_error(index, err);
            index.stats.steps += steps.len();

            for step in &steps {
                match classify_step(step) {
                    StepTarget::Job(kind, name) => jobs.push((kind, name)),
                    StepTarget::RegisterModel(name) => {
                        index.discovered_model_packages.insert(name);
                    }
                    StepTarget::Model(name) => {
                        index.discovered_models.insert(name);
                    }
                    StepTarget::Endpoint(name) => {
                        index.discovered_endpoints.insert(name);
                    }
                    StepTarget::Unknown => {
                        debug!(step = %step.step_name, step_type = ?step.step_type, "step ignored")
                    }
                }
            }
        }
        debug!(pipeline, jobs = jobs.len(), "pipeline walked");
        jobs
    }

    /// Describes `jobs` on a bounded pool and folds their locators into `index`.
    async fn describe_all(&self, jobs: Vec<(JobKind, String)>, index: &mut PrefixHintIndex) {
        if jobs.is_empty() {
            return;
        }
        let fetcher = &self.fetcher;
        let outcomes: Vec<FetchOutcome> = stream::iter(jobs)
            .map(|(kind, name)| async move { fetcher.fetch(kind, &name).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        for outcome in outcomes {
            match outcome {
                FetchOutcome::Found(d) => {
                    index.stats.described += 1;
                    index.extend(extract(&d));
                }
                FetchOutcome::Missing => index.stats.missing += 1,
                FetchOutcome::Failed => index.stats.failed += 1,
            }
        }
    }
}

fn note_listing_error(index: &mut PrefixHintIndex, err: Option<ApiError>) {
    let Some(e) = err else { return };
    if e.class.is_absent() {
        warn!(operation = %e.operation, class = %e.class, "listing unavailable; treated as empty");
    } else {
        warn!(operation = %e.operation, error = %e, "listing failed; continuing with partial results");
        index.stats.failed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector_core::StepMetadata;

    fn step(step_type: Option<&str>, metadata: StepMetadata) -> PipelineStep {
        PipelineStep {
            step_name: "s".into(),
            step_type: step_type.map(Into::into),
            metadata,
        }
    }

    #[test]
    fn explicit_name_wins_over_arn() {
        let s = step(
            Some("Training"),
            StepMetadata {
                training_job: Some(JobReference {
                    name: Some("explicit".into()),
                    arn: Some("arn:aws:sagemaker:r:1:training-job/from-arn".into()),
                }),
                ..Default::default()
            },
        );
        assert_eq!(classify_step(&s), StepTarget::Job(JobKind::Training, "explicit".into()));
    }

    #[test]
    fn arn_segment_is_used_without_name() {
        let s = step(
            Some("Processing"),
            StepMetadata {
                processing_job: Some(JobReference::from_arn("arn:aws:sagemaker:r:1:processing-job/prep-1")),
                ..Default::default()
            },
        );
        assert_eq!(classify_step(&s), StepTarget::Job(JobKind::Processing, "prep-1".into()));
    }

    #[test]
    fn metadata_classifies_steps_without_a_known_type() {
        let s = step(
            Some("Lambda"),
            StepMetadata {
                endpoint: Some(JobReference::from_arn("arn:aws:sagemaker:r:1:endpoint/live")),
                ..Default::default()
            },
        );
        assert_eq!(classify_step(&s), StepTarget::Endpoint("live".into()));
    }

    #[test]
    fn register_model_keeps_package_arn() {
        let arn = "arn:aws:sagemaker:r:1:model-package/churn/3";
        let s = step(
            Some("RegisterModel"),
            StepMetadata {
                register_model: Some(JobReference::from_arn(arn)),
                ..Default::default()
            },
        );
        assert_eq!(classify_step(&s), StepTarget::RegisterModel(arn.into()));
    }

    #[test]
    fn register_model_without_arn_falls_back_to_name() {
        let s = step(
            Some("RegisterModel"),
            StepMetadata {
                register_model: Some(JobReference {
                    name: Some("churn".into()),
                    arn: None,
                }),
                ..Default::default()
            },
        );
        assert_eq!(classify_step(&s), StepTarget::RegisterModel("churn".into()));
    }

    #[test]
    fn condition_steps_are_unknown() {
        assert_eq!(classify_step(&step(Some("Condition"), StepMetadata::default())), StepTarget::Unknown);
        assert_eq!(classify_step(&step(Some("Training"), StepMetadata::default())), StepTarget::Unknown);
    }
}
