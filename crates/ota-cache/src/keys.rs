//! Hash names and field names used by the metrics namespace.
//!
//! Per deployment key there are two hashes:
//! - `deploymentKeyLabels:{key}` holds counters named `{label}:{status}`
//!   and `{label}:Active`
//! - `deploymentKeyClients:{key}` maps a client id to its active label

use std::fmt;
use std::str::FromStr;

pub const ACTIVE: &str = "Active";

/// Outcome a client reports for a release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
    Downloaded,
}

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Succeeded => "DeploymentSucceeded",
            DeploymentStatus::Failed => "DeploymentFailed",
            DeploymentStatus::Downloaded => "Downloaded",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a status string outside the fixed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown deployment status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for DeploymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DeploymentSucceeded" => Ok(DeploymentStatus::Succeeded),
            "DeploymentFailed" => Ok(DeploymentStatus::Failed),
            "Downloaded" => Ok(DeploymentStatus::Downloaded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

pub fn labels_hash(deployment_key: &str) -> String {
    format!("deploymentKeyLabels:{deployment_key}")
}

pub fn clients_hash(deployment_key: &str) -> String {
    format!("deploymentKeyClients:{deployment_key}")
}

pub fn status_field(label: &str, status: DeploymentStatus) -> String {
    format!("{label}:{status}")
}

/// `{label}:Active`, or `None` for an empty label.
pub fn active_field(label: &str) -> Option<String> {
    if label.is_empty() {
        None
    } else {
        Some(format!("{label}:{ACTIVE}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names() {
        assert_eq!(labels_hash("abc"), "deploymentKeyLabels:abc");
        assert_eq!(clients_hash("abc"), "deploymentKeyClients:abc");
        assert_eq!(
            status_field("v3", DeploymentStatus::Succeeded),
            "v3:DeploymentSucceeded"
        );
        assert_eq!(active_field("v3").as_deref(), Some("v3:Active"));
        assert_eq!(active_field(""), None);
    }

    #[test]
    fn status_parsing_is_exact() {
        for status in [
            DeploymentStatus::Succeeded,
            DeploymentStatus::Failed,
            DeploymentStatus::Downloaded,
        ] {
            assert_eq!(status.as_str().parse::<DeploymentStatus>(), Ok(status));
        }
        assert!("Active".parse::<DeploymentStatus>().is_err());
        assert!("deploymentsucceeded".parse::<DeploymentStatus>().is_err());
    }
}
