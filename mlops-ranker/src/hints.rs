//! The prefix hint index a discovery crawl produces.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::locator::StorageLocator;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlStats {
    pub pipelines: usize,
    pub executions: usize,
    pub steps: usize,
    pub feature_groups: usize,
    pub described: usize,
    /// Describes answered with not-found or access-denied.
    pub missing: usize,
    /// Describes or listings that failed for any other reason.
    pub failed: usize,
}

/// Storage referenced by the pipeline platform, as discovered by one crawl.
///
/// Built once per request and then only read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefixHintIndex {
    pub buckets: BTreeSet<String>,
    /// `bucket/prefix` strings.
    pub bucket_prefixes: BTreeSet<String>,
    pub filesystem_ids: BTreeSet<String>,
    pub warehouse_refs: BTreeSet<String>,
    pub unresolved_stores: BTreeSet<String>,
    pub discovered_models: BTreeSet<String>,
    /// Names or ARNs registered by RegisterModel steps.
    pub discovered_model_packages: BTreeSet<String>,
    pub discovered_endpoints: BTreeSet<String>,
    pub stats: CrawlStats,
}

impl PrefixHintIndex {
    pub fn insert(&mut self, locator: StorageLocator) {
        match locator {
            StorageLocator::ObjectStore { bucket, prefix } => {
                if let Some(prefix) = prefix {
                    self.bucket_prefixes.insert(format!("{bucket}/{prefix}"));
                }
                self.buckets.insert(bucket);
            }
            StorageLocator::SharedFilesystem { id, .. } => {
                self.filesystem_ids.insert(id);
            }
            l @ StorageLocator::Warehouse { .. } => {
                self.warehouse_refs.insert(l.to_string());
            }
            l @ StorageLocator::Unresolved { .. } => {
                self.unresolved_stores.insert(l.to_string());
            }
        }
    }

    pub fn extend<I: IntoIterator<Item = StorageLocator>>(&mut self, locators: I) {
        for l in locators {
            self.insert(l);
        }
    }

    /// Hints under `bucket/`, in sorted order.
    pub fn hints_for<'a>(&'a self, bucket: &str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = format!("{bucket}/");
        self.bucket_prefixes
            .range(prefix.clone()..)
            .take_while(move |h| h.starts_with(&prefix))
            .map(String::as_str)
    }

    pub fn has_hint_for(&self, bucket: &str) -> bool {
        self.hints_for(bucket).next().is_some()
    }
}
