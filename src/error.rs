//! HTTP error taxonomy.
//!
//! Every error the gateway can return to a client is a variant of
//! [`RoutingGatewayError`] rather than an opaque 500 — callers need to be
//! able to distinguish "your key is wrong" from "the model provider is
//! down" from "you're over budget" programmatically, not by string-matching
//! a message. Each variant knows its own HTTP status and renders a
//! `{"error": {...}}` body shaped for machine consumption.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoutingGatewayError {
    #[error("authentication failed: {0}")]
    AuthenticationError(String),

    #[error("department `{requested}` is not permitted for this API key (allowed: {allowed})")]
    DepartmentNotAllowed { requested: String, allowed: String },

    #[error("daily budget exceeded for tenant `{tenant_id}`")]
    BudgetExceeded { tenant_id: String },

    #[error("provider `{provider}` error: {message}")]
    ProviderError {
        provider: String,
        message: String,
        /// The upstream's own HTTP status, when available — surfaced in the
        /// body so a caller can tell a 429 from the provider apart from one
        /// the gateway raised itself.
        original_status: Option<u16>,
    },

    /// All routing candidates were exhausted (every provider in the
    /// fallback chain failed, or no candidate was permitted at all).
    /// Renders as 451 when the cause is a governance/data-residency
    /// restriction (nothing legal to route to), 502 otherwise (every
    /// candidate was legal but all failed upstream).
    #[error("routing failed: {message}")]
    RoutingError { message: String, governance_blocked: bool },

    #[error("no routing policy found for this request")]
    PolicyNotFound,
}

impl RoutingGatewayError {
    fn status(&self) -> StatusCode {
        match self {
            Self::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            Self::DepartmentNotAllowed { .. } => StatusCode::FORBIDDEN,
            Self::BudgetExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ProviderError { .. } => StatusCode::BAD_GATEWAY,
            Self::RoutingError { governance_blocked, .. } => {
                if *governance_blocked {
                    StatusCode::from_u16(451).expect("451 is a valid status code")
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            Self::PolicyNotFound => StatusCode::NOT_FOUND,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationError(_) => "authentication_error",
            Self::DepartmentNotAllowed { .. } => "department_not_allowed",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::ProviderError { .. } => "provider_error",
            Self::RoutingError { .. } => "routing_error",
            Self::PolicyNotFound => "policy_not_found",
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::AuthenticationError(_) => "invalid_request_error",
            Self::DepartmentNotAllowed { .. } => "permission_error",
            Self::BudgetExceeded { .. } => "rate_limit_error",
            Self::ProviderError { .. } | Self::RoutingError { .. } => "api_error",
            Self::PolicyNotFound => "invalid_request_error",
        }
    }
}

impl IntoResponse for RoutingGatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, status = status.as_u16(), "request failed");

        let mut body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        if let Self::RoutingError { governance_blocked, .. } = &self {
            body["error"]["governance_blocked"] = json!(governance_blocked);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exceeded_maps_to_429() {
        let err = RoutingGatewayError::BudgetExceeded { tenant_id: "acme".into() };
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn routing_error_is_451_when_governance_blocked() {
        let err = RoutingGatewayError::RoutingError {
            message: "no provider may legally serve this request".into(),
            governance_blocked: true,
        };
        assert_eq!(err.status().as_u16(), 451);
    }

    #[test]
    fn routing_error_is_502_when_not_governance_blocked() {
        let err = RoutingGatewayError::RoutingError {
            message: "all candidates failed upstream".into(),
            governance_blocked: false,
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn department_not_allowed_maps_to_403() {
        let err = RoutingGatewayError::DepartmentNotAllowed {
            requested: "finance".into(),
            allowed: "rd".into(),
        };
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn policy_not_found_maps_to_404() {
        assert_eq!(RoutingGatewayError::PolicyNotFound.status(), StatusCode::NOT_FOUND);
    }
}
