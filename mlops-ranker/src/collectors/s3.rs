use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_types::region::Region;
use aws_types::SdkConfig;
use parking_lot::Mutex;
use tracing::debug;

use super::{owned, present};
use crate::collector_core::{AclGrant, BucketControlPlane, Page, PublicAccessBlock};
use crate::error::{ApiError, ApiResult};
use crate::types::BucketRow;

const MAX_BUCKETS_PER_PAGE: i32 = 1000;

/// Bucket inventory and per-bucket configuration.
///
/// Configuration calls go to the bucket's own region, learned while listing.
pub struct S3BucketControlPlane {
    conf: SdkConfig,
    client: s3::Client,
    bucket_regions: Mutex<HashMap<String, String>>,
    regional: Mutex<HashMap<String, s3::Client>>,
}

impl S3BucketControlPlane {
    pub fn new(conf: &SdkConfig) -> Self {
        Self {
            conf: conf.clone(),
            client: s3::Client::new(conf),
            bucket_regions: Mutex::new(HashMap::new()),
            regional: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, bucket: &str) -> s3::Client {
        let Some(region) = self.bucket_regions.lock().get(bucket).cloned() else {
            return self.client.clone();
        };
        if self.conf.region().map(|r| r.as_ref()) == Some(region.as_str()) {
            return self.client.clone();
        }
        self.regional
            .lock()
            .entry(region.clone())
            .or_insert_with(|| {
                let conf = s3::config::Builder::from(&self.conf).region(Region::new(region)).build();
                s3::Client::from_conf(conf)
            })
            .clone()
    }

    async fn bucket_region(&self, bucket: &str) -> Option<String> {
        match self.client.get_bucket_location().bucket(bucket).send().await {
            Ok(loc) => Some(
                loc.location_constraint()
                    .map(|v| v.as_str().to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "us-east-1".to_string()),
            ),
            Err(e) => {
                debug!(bucket, error = %ApiError::from_sdk("GetBucketLocation", e), "bucket region unknown");
                None
            }
        }
    }
}

#[async_trait]
impl BucketControlPlane for S3BucketControlPlane {
    async fn list_buckets(&self, next_token: Option<String>) -> ApiResult<Page<BucketRow>> {
        let out = self
            .client
            .list_buckets()
            .max_buckets(MAX_BUCKETS_PER_PAGE)
            .set_continuation_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("ListBuckets", e))?;

        let mut rows = Vec::new();
        for b in out.buckets() {
            let Some(name) = owned(b.name()) else { continue };
            let region = match owned(b.bucket_region()) {
                Some(r) => Some(r),
                None => self.bucket_region(&name).await,
            };
            if let Some(r) = &region {
                self.bucket_regions.lock().insert(name.clone(), r.clone());
            }
            rows.push(BucketRow {
                region,
                creation_date: b.creation_date().map(|d| d.to_string()),
                ..BucketRow::new(name)
            });
        }
        Ok(Page::new(rows, out.continuation_token()))
    }

    async fn public_access_block(&self, bucket: &str) -> ApiResult<PublicAccessBlock> {
        const OP: &str = "GetPublicAccessBlock";
        let out = self
            .client_for(bucket)
            .get_public_access_block()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;
        let cfg = present::<s3::types::PublicAccessBlockConfiguration>(out.public_access_block_configuration())
            .ok_or_else(|| ApiError::malformed(OP, "response without configuration"))?;
        Ok(PublicAccessBlock {
            block_public_acls: cfg.block_public_acls(),
            ignore_public_acls: cfg.ignore_public_acls(),
            block_public_policy: cfg.block_public_policy(),
            restrict_public_buckets: cfg.restrict_public_buckets(),
        })
    }

    async fn bucket_acl(&self, bucket: &str) -> ApiResult<Vec<AclGrant>> {
        let out = self
            .client_for(bucket)
            .get_bucket_acl()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("GetBucketAcl", e))?;
        Ok(out
            .grants()
            .iter()
            .map(|g| {
                let grantee = g.grantee();
                AclGrant {
                    grantee_type: grantee
                        .and_then(|x| present::<s3::types::Type>(x.r#type()))
                        .map(|t| t.as_str().to_string()),
                    grantee_uri: grantee.and_then(|x| owned(x.uri())),
                }
            })
            .collect())
    }

    async fn bucket_policy(&self, bucket: &str) -> ApiResult<String> {
        const OP: &str = "GetBucketPolicy";
        let out = self
            .client_for(bucket)
            .get_bucket_policy()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;
        owned(out.policy()).ok_or_else(|| ApiError::malformed(OP, "empty policy"))
    }
}
