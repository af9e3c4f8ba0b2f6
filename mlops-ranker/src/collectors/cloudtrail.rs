use async_trait::async_trait;
use aws_sdk_cloudtrail as ct;
use aws_sdk_cloudtrail::types::{LookupAttribute, LookupAttributeKey};
use aws_smithy_types::DateTime;
use aws_types::SdkConfig;

use super::owned;
use crate::collector_core::{AuditEvent, AuditTrail, AuditWindow, Page};
use crate::error::{ApiError, ApiResult};

/// LookupEvents accepts at most 50 results per page.
const PAGE_SIZE: i32 = 50;
const S3_EVENT_SOURCE: &str = "s3.amazonaws.com";

pub struct CloudTrailAudit {
    client: ct::Client,
}

impl CloudTrailAudit {
    pub fn new(conf: &SdkConfig) -> Self {
        Self {
            client: ct::Client::new(conf),
        }
    }
}

fn event_from_sdk(e: &ct::types::Event) -> AuditEvent {
    AuditEvent {
        username: owned(e.username()),
        resources: e.resources().iter().filter_map(|r| owned(r.resource_name())).collect(),
        raw: owned(e.cloud_trail_event()),
    }
}

#[async_trait]
impl AuditTrail for CloudTrailAudit {
    /// Management events from S3 in `window`.
    async fn lookup_events(&self, window: &AuditWindow, next_token: Option<String>) -> ApiResult<Page<AuditEvent>> {
        const OP: &str = "LookupEvents";
        let source = LookupAttribute::builder()
            .attribute_key(LookupAttributeKey::EventSource)
            .attribute_value(S3_EVENT_SOURCE)
            .build()
            .map_err(|e| ApiError::malformed(OP, e.to_string()))?;
        let out = self
            .client
            .lookup_events()
            .lookup_attributes(source)
            .start_time(DateTime::from_secs(window.start.timestamp()))
            .end_time(DateTime::from_secs(window.end.timestamp()))
            .max_results(PAGE_SIZE)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;
        let events = out.events().iter().map(event_from_sdk).collect();
        Ok(Page::new(events, out.next_token()))
    }
}
