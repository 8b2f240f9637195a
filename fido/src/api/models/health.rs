//! Health and readiness payloads.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Liveness answer, always `{"status": "healthy"}` while the process serves requests
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DependencyState {
    Up,
    Down,
    /// Not configured for this deployment, e.g. Redis when both cache and queue run without it
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DependencyCheck {
    pub status: DependencyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyCheck {
    pub fn up() -> Self {
        Self {
            status: DependencyState::Up,
            error: None,
        }
    }

    pub fn down(error: impl ToString) -> Self {
        Self {
            status: DependencyState::Down,
            error: Some(error.to_string()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            status: DependencyState::Disabled,
            error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status != DependencyState::Down
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadinessResponse {
    /// `ready` or `not_ready`
    pub status: String,
    pub database: DependencyCheck,
    pub redis: DependencyCheck,
}

impl ReadinessResponse {
    pub fn new(database: DependencyCheck, redis: DependencyCheck) -> Self {
        let status = if database.is_ready() && redis.is_ready() {
            "ready"
        } else {
            "not_ready"
        };
        Self {
            status: status.to_string(),
            database,
            redis,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_dependency_counts_as_ready() {
        let readiness = ReadinessResponse::new(DependencyCheck::up(), DependencyCheck::disabled());
        assert!(readiness.is_ready());

        let readiness = ReadinessResponse::new(DependencyCheck::down("connection refused"), DependencyCheck::up());
        assert!(!readiness.is_ready());
        assert_eq!(readiness.status, "not_ready");
    }
}
