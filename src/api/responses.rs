//! API response types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::engine::{ClassificationResult, ClassificationStatus};
use crate::entities::Entities;
use crate::matching::MatchSource;

/// Synchronous classification envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub action_code: String,
    pub confidence_score: f64,
    pub matched_keywords: Vec<String>,
    pub original_text: String,
    pub status: ClassificationStatus,
    pub entities: Option<Entities>,
    pub intent: IntentSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_clarification: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarifying_questions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_recommended: Option<bool>,
}

/// Compact view of the winning intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSummary {
    pub id: String,
    pub score: f64,
    pub source: MatchSource,
}

impl ClassifyResponse {
    /// Build the envelope from an engine result.
    pub fn from_result(result: ClassificationResult, original_text: &str) -> Self {
        Self {
            action_code: result.action_code.to_string(),
            confidence_score: result.confidence,
            matched_keywords: result.matched_keywords.clone(),
            original_text: original_text.to_string(),
            status: result.status,
            intent: IntentSummary {
                id: result.action_code.to_string(),
                score: result.confidence,
                source: result.source,
            },
            entities: result.entities,
            requires_clarification: result.requires_clarification,
            clarifying_questions: result.clarifying_questions,
            retry_recommended: result.retry_recommended,
        }
    }
}

/// Asynchronous escalation envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedResponse {
    pub request_id: String,
    pub status: String,
    pub message: String,
}

impl QueuedResponse {
    /// Envelope for a freshly queued request.
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            status: "QUEUED".to_string(),
            message: "Your request needs a closer look; poll the status endpoint for the result."
                .to_string(),
        }
    }
}

/// Service health envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub encoder_healthy: bool,
    pub cache_degraded: bool,
    pub status_store_degraded: bool,
}

/// User-facing API error. Never carries stack traces, model names, or
/// internal identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_recommended: Option<bool>,
    #[serde(skip, default = "default_status_code")]
    pub status_code: StatusCode,
}

fn default_status_code() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

impl ApiError {
    /// 422 for rejected input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            suggestions: Some(vec![
                "Keep your message under 500 characters".to_string(),
                "Describe one thing you'd like to do".to_string(),
            ]),
            retry_recommended: Some(true),
            status_code: StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// 404 for unknown or expired request ids.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            suggestions: None,
            retry_recommended: Some(false),
            status_code: StatusCode::NOT_FOUND,
        }
    }

    /// 500 with a non-technical message.
    pub fn internal() -> Self {
        Self {
            error: "Something went wrong on our side. Please try again.".to_string(),
            suggestions: None,
            retry_recommended: Some(true),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code;
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::ActionCode;

    #[test]
    fn test_classify_envelope_shape() {
        let result = ClassificationResult::new(
            ActionCode::from("ADD_TO_CART"),
            0.97,
            ClassificationStatus::ConfidentKeyword,
            MatchSource::Keyword,
        )
        .with_matched_keywords(vec!["add to cart".to_string()]);

        let response = ClassifyResponse::from_result(result, "Add to cart!");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["action_code"], "ADD_TO_CART");
        assert_eq!(json["status"], "CONFIDENT_KEYWORD");
        assert_eq!(json["intent"]["id"], "ADD_TO_CART");
        assert_eq!(json["original_text"], "Add to cart!");
        assert!(json["entities"].is_null());
    }

    #[test]
    fn test_error_omits_internals() {
        let error = ApiError::internal();
        let json = serde_json::to_string(&error).unwrap();
        assert!(!json.contains("status_code"));
        assert!(!json.contains("panic"));
    }
}
