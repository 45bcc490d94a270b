use thiserror::Error;

/// Failure while computing a component's markup.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("template rendering failed for `{component}`: {message}")]
    Template {
        component: &'static str,
        message: String,
    },
    #[error("render of `{component}` failed: {message}")]
    Failed {
        component: &'static str,
        message: String,
    },
}

impl RenderError {
    pub fn template(component: &'static str, error: impl ToString) -> Self {
        Self::Template {
            component,
            message: error.to_string(),
        }
    }

    pub fn failed(component: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            component,
            message: message.into(),
        }
    }
}

/// Failure raised by an action handler.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("invalid event payload: {message}")]
    InvalidEvent { message: String },
    #[error("action failed: {message}")]
    Failed { message: String },
}

impl ActionError {
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Structural problem in a component type's action table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionTableError {
    #[error("action table for `{component}` declares no actions")]
    Empty { component: &'static str },
    #[error("action table for `{component}` contains an empty action name")]
    BlankName { component: &'static str },
    #[error("action `{name}` is declared more than once for `{component}`")]
    Duplicate {
        component: &'static str,
        name: &'static str,
    },
}
