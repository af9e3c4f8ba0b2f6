use std::borrow::Cow;

use async_trait::async_trait;
use aws_sdk_iam as iam;
use aws_types::SdkConfig;
use percent_encoding::percent_decode_str;

use super::{flag, owned, present, text};
use crate::collector_core::{IdentityControlPlane, Page};
use crate::error::{ApiError, ApiResult, ErrorClass};

pub struct IamControlPlane {
    client: iam::Client,
}

impl IamControlPlane {
    pub fn new(conf: &SdkConfig) -> Self {
        Self {
            client: iam::Client::new(conf),
        }
    }
}

/// IAM returns policy documents URL-encoded; plain JSON passes through.
pub fn decode_policy_document(raw: &str) -> Cow<'_, str> {
    if raw.trim_start().starts_with('{') {
        return Cow::Borrowed(raw);
    }
    percent_decode_str(raw).decode_utf8_lossy()
}

/// IAM marks more pages with `IsTruncated` + `Marker`.
fn next_marker<'a>(truncated: impl Into<Option<bool>>, marker: impl Into<Option<&'a str>>) -> Option<&'a str> {
    if flag(truncated) {
        text(marker)
    } else {
        None
    }
}

#[async_trait]
impl IdentityControlPlane for IamControlPlane {
    async fn list_roles(&self, marker: Option<String>) -> ApiResult<Page<String>> {
        let out = self
            .client
            .list_roles()
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("ListRoles", e))?;
        let roles = out.roles().iter().filter_map(|r| owned(r.role_name())).collect();
        Ok(Page::new(roles, next_marker(out.is_truncated(), out.marker())))
    }

    async fn list_inline_policies(&self, role: &str, marker: Option<String>) -> ApiResult<Page<String>> {
        let out = self
            .client
            .list_role_policies()
            .role_name(role)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("ListRolePolicies", e))?;
        Ok(Page::new(
            out.policy_names().to_vec(),
            next_marker(out.is_truncated(), out.marker()),
        ))
    }

    async fn inline_policy_document(&self, role: &str, policy: &str) -> ApiResult<String> {
        const OP: &str = "GetRolePolicy";
        let out = self
            .client
            .get_role_policy()
            .role_name(role)
            .policy_name(policy)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;
        let raw = text(out.policy_document()).ok_or_else(|| ApiError::malformed(OP, "empty policy document"))?;
        Ok(decode_policy_document(raw).into_owned())
    }

    async fn list_attached_policies(&self, role: &str, marker: Option<String>) -> ApiResult<Page<String>> {
        let out = self
            .client
            .list_attached_role_policies()
            .role_name(role)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("ListAttachedRolePolicies", e))?;
        let arns = out
            .attached_policies()
            .iter()
            .filter_map(|p| owned(p.policy_arn()))
            .collect();
        Ok(Page::new(arns, next_marker(out.is_truncated(), out.marker())))
    }

    /// GetPolicy for the default version id, then GetPolicyVersion.
    async fn managed_policy_document(&self, policy_arn: &str) -> ApiResult<String> {
        let policy = self
            .client
            .get_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("GetPolicy", e))?;
        let version = policy
            .policy()
            .and_then(|p| owned(p.default_version_id()))
            .ok_or_else(|| ApiError::new("GetPolicy", ErrorClass::NotFound, "policy has no default version"))?;

        const OP: &str = "GetPolicyVersion";
        let out = self
            .client
            .get_policy_version()
            .policy_arn(policy_arn)
            .version_id(version)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(OP, e))?;
        let raw = present::<iam::types::PolicyVersion>(out.policy_version())
            .and_then(|v| text(v.document()))
            .ok_or_else(|| ApiError::malformed(OP, "policy version without a document"))?;
        Ok(decode_policy_document(raw).into_owned())
    }
}
