//! Terminal error record attached to failed jobs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Broad class of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Capacity,
    Provider,
    Timeout,
    Internal,
}

/// Machine- and human-readable failure description.
///
/// UI layers render `message` and `suggested_action` as-is and use `code`
/// for branching; they never inspect engine internals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    pub code: String,
    pub message: String,
    pub is_retryable: bool,
    pub suggested_action: String,
    pub category: ErrorCategory,
}

impl JobError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
        is_retryable: bool,
        suggested_action: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            is_retryable,
            suggested_action: suggested_action.into(),
            category,
        }
    }
}
