//! Action wire protocol, shared by the HTTP fallback and WebSocket frames.
//!
//! ```text
//! request:  { "componentId": string, "method": string, "event": object }
//! success:  { "success": true,  "componentId": string, "html": string }
//! failure:  { "success": false, "error": string }
//! ```

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    component::ComponentId,
    error::{ActionError, RenderError},
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub component_id: ComponentId,
    pub method: String,
    #[serde(default)]
    pub event: Value,
}

impl ActionRequest {
    /// Decode and validate a request body. A missing or `null` event becomes an
    /// empty object; any other non-object event is rejected.
    pub fn parse(bytes: &[u8]) -> Result<Self, DispatchError> {
        let mut request: ActionRequest = serde_json::from_slice(bytes)
            .map_err(|err| DispatchError::Validation(err.to_string()))?;

        if request.component_id.as_str().is_empty() {
            return Err(DispatchError::Validation(
                "componentId must not be empty".to_string(),
            ));
        }
        if request.method.trim().is_empty() {
            return Err(DispatchError::Validation(
                "method must not be empty".to_string(),
            ));
        }

        match request.event {
            Value::Object(_) => {}
            Value::Null => request.event = Value::Object(Map::new()),
            _ => {
                return Err(DispatchError::Validation(
                    "event must be a JSON object".to_string(),
                ));
            }
        }

        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<ComponentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionReply {
    pub fn ok(component_id: ComponentId, html: String) -> Self {
        Self {
            success: true,
            component_id: Some(component_id),
            html: Some(html),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            component_id: None,
            html: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentUpdate {
    pub component_id: ComponentId,
    pub html: String,
}

/// Frames pushed to a WebSocket client other than direct action replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Connected { session_id: Uuid },
    Batch { updates: Vec<ComponentUpdate> },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Component not found")]
    NotFound { component_id: ComponentId },
    #[error("Invalid action payload: {0}")]
    Validation(String),
    #[error("Unknown action `{method}` for {component}")]
    UnknownAction {
        component: &'static str,
        method: String,
    },
    #[error("Action `{method}` failed: {source}")]
    Action {
        method: String,
        #[source]
        source: ActionError,
    },
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),
    /// The dispatch worker panicked or was cancelled.
    #[error("Action `{method}` aborted")]
    Aborted { method: String },
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
            DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
            DispatchError::UnknownAction { .. }
            | DispatchError::Action { .. }
            | DispatchError::Render(_)
            | DispatchError::Aborted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::NotFound { .. } => "not_found",
            DispatchError::Validation(_) => "validation",
            DispatchError::UnknownAction { .. } | DispatchError::Action { .. } => "invocation",
            DispatchError::Render(_) => "render",
            DispatchError::Aborted { .. } => "aborted",
        }
    }

    pub fn to_reply(&self) -> ActionReply {
        ActionReply::failure(self.to_string())
    }
}
