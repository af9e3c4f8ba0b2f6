pub mod cloudtrail;
pub mod iam;
pub mod mock;
pub mod s3;
pub mod sagemaker;

use std::sync::Arc;

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_types::region::Region;
use aws_types::SdkConfig;
use tracing::info;

use crate::collector_core::ControlPlane;
use crate::config::Settings;

/// Shared SDK configuration. SDK retries are off: every call already goes
/// through [`crate::retry::with_retry`].
pub async fn sdk_config(settings: &Settings) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()))
        .retry_config(RetryConfig::disabled())
        .timeout_config(
            TimeoutConfig::builder()
                .operation_attempt_timeout(settings.retry.call_timeout)
                .build(),
        )
        .load()
        .await
}

impl ControlPlane {
    /// AWS-backed collaborators for `settings.region`.
    pub async fn aws(settings: &Settings) -> Self {
        let conf = sdk_config(settings).await;
        info!(region = %settings.region, "aws clients configured");
        Self {
            pipelines: Arc::new(sagemaker::SageMakerControlPlane::new(&conf)),
            identity: Arc::new(iam::IamControlPlane::new(&conf)),
            audit: Arc::new(cloudtrail::CloudTrailAudit::new(&conf)),
            buckets: Arc::new(s3::S3BucketControlPlane::new(&conf)),
        }
    }

    pub fn mock() -> Self {
        Self::uniform(Arc::new(mock::MockControlPlane::demo()))
    }
}

// SDK getters return either `&str` or `Option<&str>` depending on whether the
// member is required; these normalise both shapes.

pub(crate) fn text<'a>(v: impl Into<Option<&'a str>>) -> Option<&'a str> {
    v.into().filter(|s| !s.is_empty())
}

pub(crate) fn owned<'a>(v: impl Into<Option<&'a str>>) -> Option<String> {
    text(v).map(str::to_string)
}

pub(crate) fn present<'a, T: 'a>(v: impl Into<Option<&'a T>>) -> Option<&'a T> {
    v.into()
}

pub(crate) fn flag(v: impl Into<Option<bool>>) -> bool {
    v.into().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getter_shapes_normalise() {
        assert_eq!(text("x"), Some("x"));
        assert_eq!(text(Some("")), None);
        assert_eq!(text(None::<&str>), None);
        assert_eq!(owned(Some("y")), Some("y".to_string()));
        assert!(flag(true));
        assert!(!flag(None::<bool>));
        let n = 3;
        assert_eq!(present::<i32>(&n), Some(&3));
    }
}
