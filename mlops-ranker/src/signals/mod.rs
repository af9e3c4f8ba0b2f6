//! Independent per-bucket signals: IAM policy references, audit activity and
//! public exposure.

pub mod activity;
pub mod exposure;
pub mod policy;

use serde::Deserialize;
use serde_json::{Map, Value};

pub use activity::{activity_score, ActivitySignal, ActivitySignalAnalyzer};
pub use exposure::{ExposureAnalyzer, ExposureSignal};
pub use policy::{PolicySignal, PolicySignalAnalyzer};

/// ML execution role / pipeline role policy names the bucket.
pub const W_ML_PRINCIPAL_POLICY: i32 = 40;
/// Upper bound of the audit-activity contribution.
pub const W_CLOUDTRAIL_ACTIVITY: i32 = 20;
pub const W_PREFIX_MATCH: i32 = 30;
/// Bucket policy pinned to a VPC endpoint or a service principal.
pub const W_POLICY_HARDENING: i32 = 10;
pub const PENALTY_PUBLIC_POLICY: i32 = -30;
pub const PENALTY_ACL_PUBLIC: i32 = -30;

// Names of the sub-analyses reported in `Signals::degraded` when they could not run.
pub const CHECK_PUBLIC_ACCESS_BLOCK: &str = "publicAccessBlock";
pub const CHECK_ACL: &str = "acl";
pub const CHECK_BUCKET_POLICY: &str = "bucketPolicy";
pub const CHECK_IAM: &str = "iam";
pub const CHECK_CLOUDTRAIL: &str = "cloudtrail";

/// Substrings of role names and principal ARNs that mark ML / orchestration
/// identities. Matching is case-sensitive.
pub const ML_PRINCIPAL_HINTS: &[&str] = &[
    "SageMaker",
    "sagemaker",
    "SageMakerExecutionRole",
    "Glue",
    "Athena",
    "Redshift",
    "Kinesis",
    "EMR",
    "CodeBuild",
    "CodePipeline",
    "StepFunctions",
    "Events",
];

pub fn is_ml_principal(name: &str) -> bool {
    ML_PRINCIPAL_HINTS.iter().any(|h| name.contains(h))
}

pub fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}")
}

/// `Statement` may be an object or a list of objects. `Many` is tried first so
/// a list is never read positionally into a single struct.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            OneOrMany::One(v) => std::slice::from_ref(v).iter(),
            OneOrMany::Many(v) => v.iter(),
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Statement {
    #[serde(rename = "Resource", default)]
    pub resource: Option<Value>,
    #[serde(rename = "Principal", default)]
    pub principal: Option<Value>,
    #[serde(rename = "Condition", default)]
    pub condition: Option<Map<String, Value>>,
}

impl Statement {
    /// String entries of `Resource`; non-string entries are ignored.
    pub fn resources(&self) -> Vec<&str> {
        match &self.resource {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// The subset of an IAM / bucket policy document the analyzers read.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PolicyDocument {
    #[serde(rename = "Statement", default)]
    pub statement: OneOrMany<Statement>,
}

impl PolicyDocument {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn statements(&self) -> std::slice::Iter<'_, Statement> {
        self.statement.iter()
    }

    /// Any `Resource` is the bucket ARN or an object ARN inside it.
    pub fn refers_to_bucket(&self, bucket: &str) -> bool {
        let arn = bucket_arn(bucket);
        let objects = format!("{arn}/");
        self.statements()
            .flat_map(Statement::resources)
            .any(|r| r == arn || r.starts_with(&objects))
    }
}
