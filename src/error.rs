// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Crate error type and machine-readable error codes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GardenerError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to parse kubeconfig: {0}")]
    KubeconfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Namespace creation failed: {0}")]
    NamespaceError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Secret generation failed: {0}")]
    SecretGenerationError(String),

    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    #[error("{0}")]
    StillReferenced(String),

    #[error("Deletion of {count} object(s) is still pending")]
    DeletionPending { count: usize, requeue_after: Duration },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Flow(#[from] crate::flow::FlowError),

    #[error("Invalid flow: {0}")]
    Graph(#[from] crate::flow::GraphError),

    #[error("{message}")]
    Coded {
        codes: Vec<ErrorCode>,
        message: String,
    },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GardenerError>;

impl GardenerError {
    /// Build an error that carries explicit error codes.
    pub fn coded(codes: Vec<ErrorCode>, message: impl Into<String>) -> Self {
        GardenerError::Coded {
            codes,
            message: message.into(),
        }
    }

    /// Codes carried by the error, or derived from its message.
    pub fn codes(&self) -> Vec<ErrorCode> {
        match self {
            GardenerError::Coded { codes, .. } => codes.clone(),
            GardenerError::Flow(e) => e.codes(),
            other => codes_for_message(&other.to_string()),
        }
    }

    /// Returns true if the error (or the kube error it wraps) is a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GardenerError::KubeError(e) if is_not_found(e))
    }

    /// Returns true if the error (or the kube error it wraps) is a 409.
    pub fn is_conflict(&self) -> bool {
        matches!(self, GardenerError::KubeError(e) if is_conflict(e))
    }
}

/// Returns true for HTTP 404 API errors.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Returns true for HTTP 409 API errors (conflicts and already-exists).
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Returns true for HTTP 422 API errors.
pub fn is_invalid(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 422)
}

/// Machine-readable classification of an error cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema)]
pub enum ErrorCode {
    #[serde(rename = "INFRA_INSUFFICIENT_PRIVILEGES")]
    InfraInsufficientPrivileges,
    #[serde(rename = "INFRA_DEPENDENCIES")]
    InfraDependencies,
    #[serde(rename = "INFRA_QUOTA_EXCEEDED")]
    InfraQuotaExceeded,
    #[serde(rename = "INFRA_RATE_LIMITS")]
    InfraRateLimits,
    #[serde(rename = "INFRA_RESOURCES_DEPLETED")]
    InfraResourcesDepleted,
    #[serde(rename = "INFRA_CONFIG_INVALID")]
    InfraConfigInvalid,
    #[serde(rename = "RETRYABLE_INFRA_DEPENDENCIES")]
    RetryableInfraDependencies,
    #[serde(rename = "CONFIGURATION_PROBLEM")]
    ConfigurationProblem,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InfraInsufficientPrivileges => "INFRA_INSUFFICIENT_PRIVILEGES",
            ErrorCode::InfraDependencies => "INFRA_DEPENDENCIES",
            ErrorCode::InfraQuotaExceeded => "INFRA_QUOTA_EXCEEDED",
            ErrorCode::InfraRateLimits => "INFRA_RATE_LIMITS",
            ErrorCode::InfraResourcesDepleted => "INFRA_RESOURCES_DEPLETED",
            ErrorCode::InfraConfigInvalid => "INFRA_CONFIG_INVALID",
            ErrorCode::RetryableInfraDependencies => "RETRYABLE_INFRA_DEPENDENCIES",
            ErrorCode::ConfigurationProblem => "CONFIGURATION_PROBLEM",
        }
    }

    /// Codes for which retrying within the same reconciliation is pointless.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::InfraRateLimits | ErrorCode::RetryableInfraDependencies
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static CLASSIFIERS: LazyLock<Vec<(ErrorCode, Regex)>> = LazyLock::new(|| {
    let table = [
        (
            ErrorCode::InfraInsufficientPrivileges,
            r"(?i)(Unauthorized|InvalidClientTokenId|SignatureDoesNotMatch|AuthFailure|AuthorizationFailed|invalid character|invalid_grant|AccessDenied|Forbidden|deny|denied|not authorized)",
        ),
        (
            ErrorCode::InfraQuotaExceeded,
            r"(?i)(LimitExceeded|Quota|quota exceeded)",
        ),
        (
            ErrorCode::InfraRateLimits,
            r"(?i)(RequestLimitExceeded|Throttling|Too many requests|rate limit)",
        ),
        (
            ErrorCode::RetryableInfraDependencies,
            r"(?i)(RetryableError|retry later)",
        ),
        (
            ErrorCode::InfraDependencies,
            r"(?i)(PendingVerification|Access Not Configured|accessNotConfigured|DependencyViolation|OperationNotAllowed|InvalidSubnet|not yet ready)",
        ),
        (
            ErrorCode::InfraResourcesDepleted,
            r"(?i)(not available in the current hardware cluster|InsufficientInstanceCapacity|SkuNotAvailable|ZonalAllocationFailed|out of stock)",
        ),
        (
            ErrorCode::InfraConfigInvalid,
            r"(?i)(InvalidParameterValue|InvalidConfiguration|malformed)",
        ),
        (
            ErrorCode::ConfigurationProblem,
            r"(?i)(not supported in your requested Availability Zone|notFound|Policy .* disallowed|configuration problem)",
        ),
    ];

    table
        .into_iter()
        .filter_map(|(code, pattern)| Regex::new(pattern).ok().map(|re| (code, re)))
        .collect()
});

/// Classify a single message against the known error patterns.
pub fn codes_for_message(message: &str) -> Vec<ErrorCode> {
    let mut codes: Vec<ErrorCode> = CLASSIFIERS
        .iter()
        .filter(|(_, re)| re.is_match(message))
        .map(|(code, _)| *code)
        .collect();
    codes.sort();
    codes.dedup();
    codes
}

/// Extract error codes from an error chain.
///
/// Explicitly coded errors win; only when none is found are the messages of the
/// whole chain classified.
pub fn extract_error_codes(err: &anyhow::Error) -> Vec<ErrorCode> {
    let mut explicit = Vec::new();
    for cause in err.chain() {
        if let Some(GardenerError::Coded { codes, .. }) = cause.downcast_ref::<GardenerError>() {
            explicit.extend(codes.iter().copied());
        }
    }
    if !explicit.is_empty() {
        explicit.sort();
        explicit.dedup();
        return explicit;
    }

    let mut codes: Vec<ErrorCode> = err
        .chain()
        .flat_map(|cause| codes_for_message(&cause.to_string()))
        .collect();
    codes.sort();
    codes.dedup();
    codes
}

/// True if any of the codes forbids further retries in the current reconciliation.
pub fn has_non_retryable_code(codes: &[ErrorCode]) -> bool {
    codes.iter().any(|c| !c.is_retryable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_codes_for_message_quota() {
        let codes = codes_for_message("VcpuLimitExceeded: you have requested more vCPU capacity");
        assert_eq!(codes, vec![ErrorCode::InfraQuotaExceeded]);
    }

    #[test]
    fn test_codes_for_message_privileges() {
        let codes = codes_for_message("AccessDenied: user is not allowed to call ec2:RunInstances");
        assert!(codes.contains(&ErrorCode::InfraInsufficientPrivileges));
    }

    #[test]
    fn test_codes_for_message_none() {
        assert!(codes_for_message("everything is fine").is_empty());
    }

    #[test]
    fn test_extract_prefers_explicit_codes() {
        let err = anyhow::Error::new(GardenerError::coded(
            vec![ErrorCode::ConfigurationProblem],
            "Throttling happened",
        ))
        .context("deploying infrastructure");

        assert_eq!(extract_error_codes(&err), vec![ErrorCode::ConfigurationProblem]);
    }

    #[test]
    fn test_extract_walks_chain() {
        let inner: std::result::Result<(), anyhow::Error> =
            Err(anyhow::anyhow!("Throttling: Rate exceeded"));
        let err = inner.context("waiting for worker").unwrap_err();

        assert_eq!(extract_error_codes(&err), vec![ErrorCode::InfraRateLimits]);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(!has_non_retryable_code(&[ErrorCode::InfraRateLimits]));
        assert!(has_non_retryable_code(&[
            ErrorCode::InfraRateLimits,
            ErrorCode::InfraQuotaExceeded
        ]));
        assert!(!has_non_retryable_code(&[]));
    }

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::RetryableInfraDependencies).unwrap();
        assert_eq!(json, "\"RETRYABLE_INFRA_DEPENDENCIES\"");
    }

    #[test]
    fn test_not_found_helpers() {
        let err = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(is_not_found(&err));
        assert!(!is_conflict(&err));
        assert!(GardenerError::KubeError(err).is_not_found());
    }

    #[test]
    fn test_codes_of_gardener_error() {
        let coded = GardenerError::coded(vec![ErrorCode::InfraDependencies], "DependencyViolation");
        assert_eq!(coded.codes(), vec![ErrorCode::InfraDependencies]);
        let plain = GardenerError::Timeout("Throttling: rate limit exceeded".to_string());
        assert_eq!(plain.codes(), vec![ErrorCode::InfraRateLimits]);
    }
}
