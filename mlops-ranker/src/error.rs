use std::fmt;

use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use thiserror::Error;

/// How a failed control-plane call should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network failure, throttling, timeout or a 5xx. Retried with backoff.
    Transient,
    /// Missing permission, expired credentials or a service that is not opted in.
    AccessDenied,
    /// The resource does not exist (or was deleted mid-scan).
    NotFound,
    /// The response arrived but could not be interpreted.
    Malformed,
    Other,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }

    /// Not-found and access-denied mean "no signal" rather than a failure.
    pub fn is_absent(self) -> bool {
        matches!(self, ErrorClass::AccessDenied | ErrorClass::NotFound)
    }

    /// The call could not answer. Only `NotFound` is a definite "nothing there".
    pub fn is_inconclusive(self) -> bool {
        !matches!(self, ErrorClass::NotFound)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::AccessDenied => "access_denied",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Malformed => "malformed",
            ErrorClass::Other => "other",
        };
        f.write_str(s)
    }
}

/// A classified failure of a single control-plane call.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed ({class}): {message}")]
pub struct ApiError {
    pub operation: String,
    pub class: ErrorClass,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(operation: impl Into<String>, class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            class,
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::new(operation, ErrorClass::Transient, "call timed out")
    }

    pub fn malformed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorClass::Malformed, message)
    }

    /// Converts an AWS SDK failure, classifying it by its error code.
    pub fn from_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: fmt::Debug,
    {
        let class = classify_sdk_error(&err);
        let message = DisplayErrorContext(&err).to_string();
        Self::new(operation, class, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

/// Errors surfaced at the ranking API boundary.
#[derive(Debug, Error)]
pub enum RankError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("bucket inventory unavailable: {0}")]
    Inventory(#[source] ApiError),
    #[error("ranking did not finish within {0:?}")]
    DeadlineExceeded(std::time::Duration),
}

const ACCESS_DENIED_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "AllAccessDisabled",
    "AuthorizationError",
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidAccessKeyId",
    "InvalidClientTokenId",
    "OptInRequired",
    "SignatureDoesNotMatch",
    "SubscriptionRequiredException",
    "UnauthorizedOperation",
    "UnrecognizedClientException",
];

const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchBucket",
    "NoSuchBucketPolicy",
    "NoSuchEntity",
    "NoSuchPublicAccessBlockConfiguration",
    "ResourceNotFound",
    "ResourceNotFoundException",
];

const TRANSIENT_CODES: &[&str] = &[
    "InternalError",
    "InternalFailure",
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "RequestThrottled",
    "RequestThrottledException",
    "RequestTimeout",
    "RequestTimeoutException",
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "SlowDown",
    "ThrottledException",
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
];

fn classify_sdk_error<E, R>(err: &SdkError<E, R>) -> ErrorClass
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: fmt::Debug,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ErrorClass::Transient,
        SdkError::ResponseError(_) => ErrorClass::Malformed,
        SdkError::ServiceError(ctx) => {
            let e = ctx.err();
            classify_code(e.code(), e.message().unwrap_or_default())
        }
        _ => classify_code(None, &DisplayErrorContext(err).to_string()),
    }
}

/// Maps a provider error code to an [`ErrorClass`].
///
/// When no code is available (or the code is unknown) the message is matched
/// against keywords. That fallback is a heuristic for degraded responses only.
pub fn classify_code(code: Option<&str>, message: &str) -> ErrorClass {
    if let Some(code) = code {
        if ACCESS_DENIED_CODES.contains(&code) {
            return ErrorClass::AccessDenied;
        }
        if NOT_FOUND_CODES.contains(&code) {
            return ErrorClass::NotFound;
        }
        if TRANSIENT_CODES.contains(&code) {
            return ErrorClass::Transient;
        }
    }
    classify_message(message)
}

fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    if ["accessdenied", "access denied", "not authorized", "forbidden", "opt-in", "optin"]
        .iter()
        .any(|k| lower.contains(k))
    {
        ErrorClass::AccessDenied
    } else if ["not found", "does not exist", "nosuch", "could not find"]
        .iter()
        .any(|k| lower.contains(k))
    {
        ErrorClass::NotFound
    } else if ["throttl", "rate exceeded", "timed out", "timeout", "connection", "unavailable"]
        .iter()
        .any(|k| lower.contains(k))
    {
        ErrorClass::Transient
    } else {
        ErrorClass::Other
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_s3::operation::get_bucket_policy::GetBucketPolicyError;
    use aws_smithy_runtime_api::client::result::ConnectorError;
    use aws_smithy_types::error::ErrorMetadata;

    use super::*;

    fn service_error(code: &str, message: &str) -> SdkError<GetBucketPolicyError, ()> {
        let meta = ErrorMetadata::builder().code(code).message(message).build();
        SdkError::service_error(GetBucketPolicyError::generic(meta), ())
    }

    #[test]
    fn typed_codes_take_precedence_over_message() {
        assert_eq!(
            classify_code(Some("ThrottlingException"), "resource not found"),
            ErrorClass::Transient
        );
        assert_eq!(classify_code(Some("NoSuchEntity"), ""), ErrorClass::NotFound);
        assert_eq!(classify_code(Some("OptInRequired"), ""), ErrorClass::AccessDenied);
    }

    #[test]
    fn sagemaker_validation_errors_fall_back_to_keywords() {
        assert_eq!(
            classify_code(
                Some("ValidationException"),
                "Requested resource not found: training job 'x'"
            ),
            ErrorClass::NotFound
        );
        assert_eq!(
            classify_code(Some("ValidationException"), "1 validation error detected"),
            ErrorClass::Other
        );
    }

    #[test]
    fn keyword_fallback_without_code() {
        assert_eq!(
            classify_code(None, "User is not authorized to perform iam:ListRoles"),
            ErrorClass::AccessDenied
        );
        assert_eq!(classify_code(None, "Rate exceeded"), ErrorClass::Transient);
        assert_eq!(classify_code(None, "boom"), ErrorClass::Other);
    }

    #[test]
    fn sdk_errors_are_classified_by_kind() {
        let timeout = SdkError::<GetBucketPolicyError, ()>::timeout_error("read timed out");
        assert_eq!(classify_sdk_error(&timeout), ErrorClass::Transient);

        let dispatch = SdkError::<GetBucketPolicyError, ()>::dispatch_failure(ConnectorError::io("reset".into()));
        assert_eq!(classify_sdk_error(&dispatch), ErrorClass::Transient);

        let garbled = SdkError::<GetBucketPolicyError, ()>::response_error("unexpected body", ());
        assert_eq!(classify_sdk_error(&garbled), ErrorClass::Malformed);
    }

    #[test]
    fn service_errors_use_their_code() {
        assert_eq!(
            classify_sdk_error(&service_error("NoSuchBucketPolicy", "The bucket policy does not exist")),
            ErrorClass::NotFound
        );
        assert_eq!(
            classify_sdk_error(&service_error("AccessDenied", "Access Denied")),
            ErrorClass::AccessDenied
        );
        assert_eq!(classify_sdk_error(&service_error("SlowDown", "")), ErrorClass::Transient);

        let err = ApiError::from_sdk("GetBucketPolicy", service_error("MethodNotAllowed", "nope"));
        assert_eq!(err.operation, "GetBucketPolicy");
        assert_eq!(err.class, ErrorClass::Other);
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(ErrorClass::Transient.is_retryable());
        for class in [
            ErrorClass::AccessDenied,
            ErrorClass::NotFound,
            ErrorClass::Malformed,
            ErrorClass::Other,
        ] {
            assert!(!class.is_retryable());
        }
        assert!(ErrorClass::NotFound.is_absent());
        assert!(!ErrorClass::Transient.is_absent());
        assert!(!ErrorClass::NotFound.is_inconclusive());
        assert!(ErrorClass::AccessDenied.is_inconclusive());
    }
}
