//! Storage locators and their extraction from job descriptors.
//!
//! Extraction is pure and total: a missing or malformed field yields no
//! locator, never an error.

use std::fmt;

use serde::Serialize;

use crate::descriptor::{
    ChannelSource, DatasetDefinition, EndpointCapture, FeatureGroup, FilesystemKind, JobDescriptor,
    ModelArtifacts, ProcessingJob, TrainingJob, TransformJob,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum WarehouseEngine {
    Redshift,
    Athena,
}

/// Backing stores whose identifiers the control plane does not expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ManagedStore {
    OnlineFeatureStore,
    EndpointCapture,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageLocator {
    ObjectStore { bucket: String, prefix: Option<String> },
    SharedFilesystem { fs: FilesystemKind, id: String },
    Warehouse { engine: WarehouseEngine, reference: String },
    /// Proves a store exists without naming it.
    Unresolved { store: ManagedStore, owner: String },
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocator::ObjectStore { bucket, prefix: Some(p) } => write!(f, "s3://{bucket}/{p}"),
            StorageLocator::ObjectStore { bucket, prefix: None } => write!(f, "s3://{bucket}"),
            StorageLocator::SharedFilesystem { fs: FilesystemKind::Efs, id } => write!(f, "efs://{id}"),
            StorageLocator::SharedFilesystem { fs: FilesystemKind::FsxLustre, id } => {
                write!(f, "fsx://{id}")
            }
            StorageLocator::Warehouse { engine: WarehouseEngine::Redshift, reference } => {
                write!(f, "redshift://{reference}")
            }
            StorageLocator::Warehouse { engine: WarehouseEngine::Athena, reference } => {
                write!(f, "athena://{reference}")
            }
            StorageLocator::Unresolved { store: ManagedStore::OnlineFeatureStore, owner } => {
                write!(f, "(managed) online store for {owner}")
            }
            StorageLocator::Unresolved { store: ManagedStore::EndpointCapture, owner } => {
                write!(f, "(managed) data capture for {owner}")
            }
        }
    }
}

/// Splits `s3://bucket/prefix...` into `(bucket, prefix)`.
///
/// Returns `None` for anything that is not an `s3://` URI with a bucket. An
/// empty prefix is reported as `None`.
pub fn parse_object_uri(uri: &str) -> Option<(&str, Option<&str>)> {
    let path = uri.trim().strip_prefix("s3://")?;
    let (bucket, prefix) = match path.split_once('/') {
        Some((b, p)) => (b, Some(p)),
        None => (path, None),
    };
    if bucket.is_empty() {
        return None;
    }
    Some((bucket, prefix.filter(|p| !p.is_empty())))
}

fn push_uri(out: &mut Vec<StorageLocator>, uri: Option<&str>) {
    let Some((bucket, prefix)) = uri.and_then(parse_object_uri) else {
        return;
    };
    out.push(StorageLocator::ObjectStore {
        bucket: bucket.to_string(),
        prefix: prefix.map(str::to_string),
    });
}

/// Every locator referenced by `descriptor`.
pub fn extract(descriptor: &JobDescriptor) -> Vec<StorageLocator> {
    let mut out = Vec::new();
    match descriptor {
        JobDescriptor::Training(job) => from_training(job, &mut out),
        JobDescriptor::Processing(job) => from_processing(job, &mut out),
        JobDescriptor::Transform(job) => from_transform(job, &mut out),
        JobDescriptor::Model(m) | JobDescriptor::ModelPackage(m) => from_model(m, &mut out),
        JobDescriptor::EndpointCapture(ep) => from_endpoint_capture(ep, &mut out),
        JobDescriptor::FeatureGroup(fg) => from_feature_group(fg, &mut out),
    }
    out
}

fn from_training(job: &TrainingJob, out: &mut Vec<StorageLocator>) {
    for channel in &job.channels {
        match channel {
            ChannelSource::ObjectStore(uri) => push_uri(out, Some(uri)),
            ChannelSource::FileSystem { kind, id } if !id.is_empty() => {
                out.push(StorageLocator::SharedFilesystem { fs: *kind, id: id.clone() })
            }
            ChannelSource::FileSystem { .. } => {}
        }
    }
    push_uri(out, job.output_path.as_deref());
    push_uri(out, job.checkpoint_uri.as_deref());
    push_uri(out, job.debug_output_path.as_deref());
    push_uri(out, job.profiler_output_path.as_deref());
    push_uri(out, job.model_artifacts.as_deref());
}

fn from_processing(job: &ProcessingJob, out: &mut Vec<StorageLocator>) {
    for uri in &job.input_uris {
        push_uri(out, Some(uri));
    }
    for ds in &job.datasets {
        let (engine, reference) = match ds {
            DatasetDefinition::Redshift { cluster_id, database } => (
                WarehouseEngine::Redshift,
                format!(
                    "{}::{}",
                    cluster_id.as_deref().unwrap_or("redshift"),
                    database.as_deref().unwrap_or_default()
                ),
            ),
            DatasetDefinition::Athena { catalog, database } => (
                WarehouseEngine::Athena,
                format!(
                    "{}::{}",
                    catalog.as_deref().unwrap_or("glue"),
                    database.as_deref().unwrap_or_default()
                ),
            ),
        };
        out.push(StorageLocator::Warehouse { engine, reference });
    }
    for uri in &job.output_uris {
        push_uri(out, Some(uri));
    }
}

fn from_transform(job: &TransformJob, out: &mut Vec<StorageLocator>) {
    push_uri(out, job.input_uri.as_deref());
    push_uri(out, job.output_path.as_deref());
}

fn from_model(model: &ModelArtifacts, out: &mut Vec<StorageLocator>) {
    for url in &model.model_data_urls {
        push_uri(out, Some(url));
    }
}

fn from_endpoint_capture(ep: &EndpointCapture, out: &mut Vec<StorageLocator>) {
    let before = out.len();
    push_uri(out, ep.destination_uri.as_deref());
    if ep.capture_enabled && out.len() == before {
        out.push(StorageLocator::Unresolved {
            store: ManagedStore::EndpointCapture,
            owner: ep.endpoint_name.clone(),
        });
    }
}

fn from_feature_group(fg: &FeatureGroup, out: &mut Vec<StorageLocator>) {
    push_uri(out, fg.resolved_offline_uri.as_deref().or(fg.offline_uri.as_deref()));
    if fg.online_store_enabled {
        out.push(StorageLocator::Unresolved {
            store: ManagedStore::OnlineFeatureStore,
            owner: fg.name.clone(),
        });
    }
}
