use async_trait::async_trait;
use aws_sdk_sagemaker as sm;
use aws_types::SdkConfig;
use tracing::debug;

use super::{flag, owned, present, text};
use crate::collector_core::{JobReference, Page, PipelineControlPlane, PipelineStep, StepMetadata};
use crate::descriptor::{
    ChannelSource, DatasetDefinition, EndpointCapture, FeatureGroup, FilesystemKind, JobDescriptor, JobKind,
    ModelArtifacts, ProcessingJob, TrainingJob, TransformJob,
};
use crate::error::{ApiError, ApiResult};

pub struct SageMakerControlPlane {
    client: sm::Client,
}

impl SageMakerControlPlane {
    pub fn new(conf: &SdkConfig) -> Self {
        Self {
            client: sm::Client::new(conf),
        }
    }

    async fn training_job(&self, name: &str) -> ApiResult<TrainingJob> {
        const OP: &str = "DescribeTrainingJob";
        let out = self
            .client
            .describe_training_job()
            .training_job_name(name)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;

        let mut channels = Vec::new();
        for ch in out.input_data_config() {
            let Some(src) = ch.data_source() else { continue };
            if let Some(uri) = src.s3_data_source().and_then(|s| owned(s.s3_uri())) {
                channels.push(ChannelSource::ObjectStore(uri));
            }
            if let Some(fs) = src.file_system_data_source() {
                let kind = present::<sm::types::FileSystemType>(fs.file_system_type())
                    .and_then(|t| FilesystemKind::parse(t.as_str()));
                match (kind, owned(fs.file_system_id())) {
                    (Some(kind), Some(id)) => channels.push(ChannelSource::FileSystem { kind, id }),
                    _ => debug!(job = name, "filesystem channel without a usable id or type"),
                }
            }
        }

        Ok(TrainingJob {
            name: name.to_string(),
            channels,
            output_path: out.output_data_config().and_then(|c| owned(c.s3_output_path())),
            checkpoint_uri: out.checkpoint_config().and_then(|c| owned(c.s3_uri())),
            debug_output_path: out.debug_hook_config().and_then(|c| owned(c.s3_output_path())),
            profiler_output_path: out.profiler_config().and_then(|c| owned(c.s3_output_path())),
            model_artifacts: out.model_artifacts().and_then(|m| owned(m.s3_model_artifacts())),
        })
    }

    async fn processing_job(&self, name: &str) -> ApiResult<ProcessingJob> {
        const OP: &str = "DescribeProcessingJob";
        let out = self
            .client
            .describe_processing_job()
            .processing_job_name(name)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;

        let mut job = ProcessingJob {
            name: name.to_string(),
            ..Default::default()
        };
        for input in out.processing_inputs() {
            if let Some(uri) = input.s3_input().and_then(|s| owned(s.s3_uri())) {
                job.input_uris.push(uri);
            }
            let Some(ds) = input.dataset_definition() else { continue };
            if let Some(rs) = ds.redshift_dataset_definition() {
                job.datasets.push(DatasetDefinition::Redshift {
                    cluster_id: owned(rs.cluster_id()),
                    database: owned(rs.database()),
                });
            }
            if let Some(ath) = ds.athena_dataset_definition() {
                job.datasets.push(DatasetDefinition::Athena {
                    catalog: owned(ath.catalog()),
                    database: owned(ath.database()),
                });
            }
        }
        if let Some(cfg) = out.processing_output_config() {
            job.output_uris = cfg
                .outputs()
                .iter()
                .filter_map(|o| o.s3_output().and_then(|s| owned(s.s3_uri())))
                .collect();
        }
        Ok(job)
    }

    async fn transform_job(&self, name: &str) -> ApiResult<TransformJob> {
        const OP: &str = "DescribeTransformJob";
        let out = self
            .client
            .describe_transform_job()
            .transform_job_name(name)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;
        Ok(TransformJob {
            name: name.to_string(),
            input_uri: out
                .transform_input()
                .and_then(|i| i.data_source())
                .and_then(|d| d.s3_data_source())
                .and_then(|s| owned(s.s3_uri())),
            output_path: out.transform_output().and_then(|o| owned(o.s3_output_path())),
        })
    }

    async fn model(&self, name: &str) -> ApiResult<ModelArtifacts> {
        const OP: &str = "DescribeModel";
        let out = self
            .client
            .describe_model()
            .model_name(name)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;
        let model_data_urls = out
            .primary_container()
            .into_iter()
            .chain(out.containers())
            .filter_map(|c| owned(c.model_data_url()))
            .collect();
        Ok(ModelArtifacts {
            name: name.to_string(),
            model_data_urls,
        })
    }

    async fn model_package(&self, name: &str) -> ApiResult<ModelArtifacts> {
        const OP: &str = "DescribeModelPackage";
        let out = self
            .client
            .describe_model_package()
            .model_package_name(name)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;
        let model_data_urls = out
            .inference_specification()
            .map(|spec| spec.containers())
            .unwrap_or_default()
            .iter()
            .filter_map(|c| owned(c.model_data_url()))
            .collect();
        Ok(ModelArtifacts {
            name: name.to_string(),
            model_data_urls,
        })
    }

    /// endpoint -> active endpoint config -> data capture destination.
    async fn endpoint_capture(&self, name: &str) -> ApiResult<EndpointCapture> {
        let endpoint = self
            .client
            .describe_endpoint()
            .endpoint_name(name)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("DescribeEndpoint", e))?;
        let Some(config_name) = owned(endpoint.endpoint_config_name()) else {
            return Ok(EndpointCapture {
                endpoint_name: name.to_string(),
                ..Default::default()
            });
        };

        let config = self
            .client
            .describe_endpoint_config()
            .endpoint_config_name(&config_name)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("DescribeEndpointConfig", e))?;
        let capture = config.data_capture_config();
        Ok(EndpointCapture {
            endpoint_name: name.to_string(),
            capture_enabled: capture.is_some_and(|c| flag(c.enable_capture())),
            destination_uri: capture.and_then(|c| owned(c.destination_s3_uri())),
        })
    }

    async fn feature_group(&self, name: &str) -> ApiResult<FeatureGroup> {
        const OP: &str = "DescribeFeatureGroup";
        let out = self
            .client
            .describe_feature_group()
            .feature_group_name(name)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;
        let s3 = out
            .offline_store_config()
            .and_then(|c| present::<sm::types::S3StorageConfig>(c.s3_storage_config()));
        Ok(FeatureGroup {
            name: name.to_string(),
            offline_uri: s3.and_then(|s| owned(s.s3_uri())),
            resolved_offline_uri: s3.and_then(|s| owned(s.resolved_output_s3_uri())),
            online_store_enabled: out
                .online_store_config()
                .is_some_and(|c| flag(c.enable_online_store())),
        })
    }
}

fn arn_ref<'a>(arn: impl Into<Option<&'a str>>) -> Option<JobReference> {
    text(arn).map(JobReference::from_arn)
}

fn step_from_sdk(step: &sm::types::PipelineExecutionStep) -> PipelineStep {
    let metadata = step
        .metadata()
        .map(|md| StepMetadata {
            training_job: md.training_job().and_then(|m| arn_ref(m.arn())),
            processing_job: md.processing_job().and_then(|m| arn_ref(m.arn())),
            transform_job: md.transform_job().and_then(|m| arn_ref(m.arn())),
            model: md.model().and_then(|m| arn_ref(m.arn())),
            register_model: md.register_model().and_then(|m| arn_ref(m.arn())),
            endpoint: md.endpoint().and_then(|m| arn_ref(m.arn())),
        })
        .unwrap_or_default();
    PipelineStep {
        step_name: owned(step.step_name()).unwrap_or_default(),
        // the listing does not report a step type; metadata decides
        step_type: None,
        metadata,
    }
}

#[async_trait]
impl PipelineControlPlane for SageMakerControlPlane {
    async fn list_pipelines(&self, next_token: Option<String>) -> ApiResult<Page<String>> {
        let out = self
            .client
            .list_pipelines()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("ListPipelines", e))?;
        let names = out
            .pipeline_summaries()
            .iter()
            .filter_map(|p| owned(p.pipeline_name()))
            .collect();
        Ok(Page::new(names, out.next_token()))
    }

    async fn list_pipeline_executions(&self, pipeline: &str, next_token: Option<String>) -> ApiResult<Page<String>> {
        let out = self
            .client
            .list_pipeline_executions()
            .pipeline_name(pipeline)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("ListPipelineExecutions", e))?;
        let arns = out
            .pipeline_execution_summaries()
            .iter()
            .filter_map(|e| owned(e.pipeline_execution_arn()))
            .collect();
        Ok(Page::new(arns, out.next_token()))
    }

    async fn list_pipeline_execution_steps(
        &self,
        execution_arn: &str,
        next_token: Option<String>,
    ) -> ApiResult<Page<PipelineStep>> {
        let out = self
            .client
            .list_pipeline_execution_steps()
            .pipeline_execution_arn(execution_arn)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("ListPipelineExecutionSteps", e))?;
        let steps = out.pipeline_execution_steps().iter().map(step_from_sdk).collect();
        Ok(Page::new(steps, out.next_token()))
    }

    async fn list_feature_groups(&self, next_token: Option<String>) -> ApiResult<Page<String>> {
        let out = self
            .client
            .list_feature_groups()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("ListFeatureGroups", e))?;
        let names = out
            .feature_group_summaries()
            .iter()
            .filter_map(|g| owned(g.feature_group_name()))
            .collect();
        Ok(Page::new(names, out.next_token()))
    }

    async fn describe(&self, kind: JobKind, name: &str) -> ApiResult<JobDescriptor> {
        Ok(match kind {
            JobKind::Training => JobDescriptor::Training(self.training_job(name).await?),
            JobKind::Processing => JobDescriptor::Processing(self.processing_job(name).await?),
            JobKind::Transform => JobDescriptor::Transform(self.transform_job(name).await?),
            JobKind::Model => JobDescriptor::Model(self.model(name).await?),
            JobKind::ModelPackage => JobDescriptor::ModelPackage(self.model_package(name).await?),
            JobKind::Endpoint => JobDescriptor::EndpointCapture(self.endpoint_capture(name).await?),
            JobKind::FeatureGroup => JobDescriptor::FeatureGroup(self.feature_group(name).await?),
        })
    }
}
