use std::str::FromStr;

pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parses `key` from the environment, falling back to `default` when the
/// variable is unset or unparseable.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

pub fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Last `/`-separated segment of an ARN, e.g. the job name of
/// `arn:aws:sagemaker:ap-northeast-2:123456789012:training-job/my-job`.
pub fn arn_resource_name(arn: &str) -> Option<&str> {
    arn.rsplit('/').next().filter(|s| !s.is_empty() && *s != arn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arn_resource_name_takes_trailing_segment() {
        assert_eq!(
            arn_resource_name("arn:aws:sagemaker:us-east-1:1:training-job/train-a"),
            Some("train-a")
        );
        assert_eq!(arn_resource_name("arn:aws:sagemaker:us-east-1:1:model/"), None);
        assert_eq!(arn_resource_name("no-slash"), None);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("MLOPS_TEST_ENV_PARSE", "not-a-number");
        assert_eq!(env_parse("MLOPS_TEST_ENV_PARSE", 7u32), 7);
        std::env::set_var("MLOPS_TEST_ENV_PARSE", " 12 ");
        assert_eq!(env_parse("MLOPS_TEST_ENV_PARSE", 7u32), 12);
        std::env::remove_var("MLOPS_TEST_ENV_PARSE");
    }
}
