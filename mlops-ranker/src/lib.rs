//! Ranks S3 buckets by how likely they are to back SageMaker workloads.
//!
//! A ranking request crawls pipeline execution history into a
//! [`hints::PrefixHintIndex`], then scores every bucket from IAM policy
//! references, CloudTrail activity, public exposure and hint membership.

pub mod collector_core;
pub mod collectors;
pub mod config;
pub mod crawler;
pub mod descriptor;
pub mod error;
pub mod hints;
pub mod locator;
pub mod out;
pub mod ranking;
pub mod retry;
pub mod scoring;
pub mod signals;
pub mod types;
pub mod utils;

pub use collector_core::ControlPlane;
pub use config::Settings;
pub use error::{ApiError, ErrorClass, RankError};
pub use ranking::{RankRequest, Ranker};
