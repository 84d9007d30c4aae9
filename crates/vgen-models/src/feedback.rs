//! User feedback on generated videos and regeneration requests.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::settings::SettingsOverrides;

/// Why a user asked for a new attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationReason {
    QualityIssue,
    PromptMismatch,
    StyleChange,
    TechnicalFailure,
    #[default]
    UserRequest,
}

/// Ask for a job's inputs to be generated again, optionally tweaked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct RegenerationRequest {
    #[serde(default)]
    pub reason: RegenerationReason,
    #[validate(length(max = 2000))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub settings_overrides: SettingsOverrides,
    /// Replaces the optimized prompt text for the new attempt
    #[validate(length(min = 1, max = 10000))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_override: Option<String>,
}

/// Per-aspect ratings, each 1-5 when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct CategoryRatings {
    #[validate(range(min = 1, max = 5))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_quality: Option<u8>,
    #[validate(range(min = 1, max = 5))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_adherence: Option<u8>,
    #[validate(range(min = 1, max = 5))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<u8>,
    #[validate(range(min = 1, max = 5))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_consistency: Option<u8>,
}

/// Feedback attached to a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct Feedback {
    #[validate(range(min = 1, max = 5))]
    pub overall_rating: u8,
    #[validate(nested)]
    #[serde(default)]
    pub categories: CategoryRatings,
    #[validate(length(max = 2000))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regeneration: Option<RegenerationRequest>,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(overall_rating: u8) -> Self {
        Self {
            overall_rating,
            categories: CategoryRatings::default(),
            comment: None,
            suggestions: Vec::new(),
            regeneration: None,
            submitted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds() {
        assert!(Feedback::new(1).validate().is_ok());
        assert!(Feedback::new(5).validate().is_ok());
        assert!(Feedback::new(0).validate().is_err());
        assert!(Feedback::new(6).validate().is_err());
    }

    #[test]
    fn test_category_ratings_are_validated() {
        let mut feedback = Feedback::new(4);
        feedback.categories.motion = Some(9);
        assert!(feedback.validate().is_err());

        feedback.categories.motion = Some(3);
        assert!(feedback.validate().is_ok());
    }

    #[test]
    fn test_empty_prompt_override_rejected() {
        let mut feedback = Feedback::new(2);
        feedback.regeneration = Some(RegenerationRequest {
            prompt_override: Some(String::new()),
            ..Default::default()
        });
        assert!(feedback.validate().is_err());
    }
}
