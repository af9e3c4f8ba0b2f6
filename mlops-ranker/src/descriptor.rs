//! Typed job descriptors.
//!
//! Control-plane describe responses are reduced to these shapes at the
//! adapter boundary; only fields that can point at storage are kept.

use serde::Serialize;

/// The describe call to issue for a discovered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum JobKind {
    Training,
    Processing,
    Transform,
    Model,
    ModelPackage,
    /// Endpoint, resolved through its active endpoint configuration.
    Endpoint,
    FeatureGroup,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Training => "training-job",
            JobKind::Processing => "processing-job",
            JobKind::Transform => "transform-job",
            JobKind::Model => "model",
            JobKind::ModelPackage => "model-package",
            JobKind::Endpoint => "endpoint",
            JobKind::FeatureGroup => "feature-group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FilesystemKind {
    Efs,
    FsxLustre,
}

impl FilesystemKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EFS" => Some(FilesystemKind::Efs),
            "FSxLustre" => Some(FilesystemKind::FsxLustre),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSource {
    ObjectStore(String),
    FileSystem { kind: FilesystemKind, id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingJob {
    pub name: String,
    pub channels: Vec<ChannelSource>,
    pub output_path: Option<String>,
    pub checkpoint_uri: Option<String>,
    pub debug_output_path: Option<String>,
    pub profiler_output_path: Option<String>,
    pub model_artifacts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetDefinition {
    Redshift { cluster_id: Option<String>, database: Option<String> },
    Athena { catalog: Option<String>, database: Option<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingJob {
    pub name: String,
    pub input_uris: Vec<String>,
    pub datasets: Vec<DatasetDefinition>,
    pub output_uris: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformJob {
    pub name: String,
    pub input_uri: Option<String>,
    pub output_path: Option<String>,
}

/// A model or a registered model package: both carry container model-data URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelArtifacts {
    pub name: String,
    pub model_data_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointCapture {
    pub endpoint_name: String,
    pub capture_enabled: bool,
    pub destination_uri: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureGroup {
    pub name: String,
    pub offline_uri: Option<String>,
    pub resolved_offline_uri: Option<String>,
    pub online_store_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDescriptor {
    Training(TrainingJob),
    Processing(ProcessingJob),
    Transform(TransformJob),
    Model(ModelArtifacts),
    ModelPackage(ModelArtifacts),
    EndpointCapture(EndpointCapture),
    FeatureGroup(FeatureGroup),
}

impl JobDescriptor {
    pub fn kind(&self) -> JobKind {
        match self {
            JobDescriptor::Training(_) => JobKind::Training,
            JobDescriptor::Processing(_) => JobKind::Processing,
            JobDescriptor::Transform(_) => JobKind::Transform,
            JobDescriptor::Model(_) => JobKind::Model,
            JobDescriptor::ModelPackage(_) => JobKind::ModelPackage,
            JobDescriptor::EndpointCapture(_) => JobKind::Endpoint,
            JobDescriptor::FeatureGroup(_) => JobKind::FeatureGroup,
        }
    }

    /// The identifier the descriptor was fetched by.
    pub fn name(&self) -> &str {
        match self {
            JobDescriptor::Training(j) => &j.name,
            JobDescriptor::Processing(j) => &j.name,
            JobDescriptor::Transform(j) => &j.name,
            JobDescriptor::Model(m) | JobDescriptor::ModelPackage(m) => &m.name,
            JobDescriptor::EndpointCapture(e) => &e.endpoint_name,
            JobDescriptor::FeatureGroup(f) => &f.name,
        }
    }
}
