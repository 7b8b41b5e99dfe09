//! Moderation fields carried by reviews and their history rows.
//!
//! The automated checker sets `reported`; an administrator sets the
//! [`Confirmation`]. Visibility is always derived from both at read time.

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

pub const REMOVED_PLACEHOLDER: &str =
    "This content was removed for violating community guidelines.";
pub const PENDING_PLACEHOLDER: &str = "This content is pending review.";

/// Human decision on flagged content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    #[default]
    Unreviewed,
    ConfirmedClean,
    ConfirmedSensitive,
}

impl Confirmation {
    /// Maps the nullable `confirmed` column.
    pub fn from_column(value: Option<bool>) -> Self {
        match value {
            None => Confirmation::Unreviewed,
            Some(false) => Confirmation::ConfirmedClean,
            Some(true) => Confirmation::ConfirmedSensitive,
        }
    }

    pub fn to_column(self) -> Option<bool> {
        match self {
            Confirmation::Unreviewed => None,
            Confirmation::ConfirmedClean => Some(false),
            Confirmation::ConfirmedSensitive => Some(true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationState {
    Clean,
    Pending,
    ConfirmedSensitive,
    ConfirmedClean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    PendingReview,
    Removed,
}

impl Visibility {
    /// Text shown instead of the body, if the body is hidden.
    pub fn placeholder(self) -> Option<&'static str> {
        match self {
            Visibility::Visible => None,
            Visibility::PendingReview => Some(PENDING_PLACEHOLDER),
            Visibility::Removed => Some(REMOVED_PLACEHOLDER),
        }
    }

    pub fn render<'a>(self, body: &'a str) -> &'a str {
        self.placeholder().unwrap_or(body)
    }
}

/// Output of the external content checker for one piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ModerationVerdict {
    pub passed: bool,
    pub detail: Option<String>,
}

impl ModerationVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            detail: None,
        }
    }

    pub fn flagged(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ModerationFields {
    pub reported: bool,
    pub confirmation: Confirmation,
    pub detail: String,
}

impl ModerationFields {
    /// Fields for freshly written content. Any earlier human decision applied
    /// to different text, so the confirmation starts over.
    pub fn from_verdict(verdict: &ModerationVerdict) -> Self {
        Self {
            reported: !verdict.passed,
            confirmation: Confirmation::Unreviewed,
            detail: verdict.detail.clone().unwrap_or_default(),
        }
    }

    /// `confirmed ?? reported`
    pub fn sensitive(&self) -> bool {
        match self.confirmation {
            Confirmation::ConfirmedSensitive => true,
            Confirmation::ConfirmedClean => false,
            Confirmation::Unreviewed => self.reported,
        }
    }

    pub fn state(&self) -> ModerationState {
        match self.confirmation {
            Confirmation::ConfirmedSensitive => ModerationState::ConfirmedSensitive,
            Confirmation::ConfirmedClean => ModerationState::ConfirmedClean,
            Confirmation::Unreviewed if self.reported => ModerationState::Pending,
            Confirmation::Unreviewed => ModerationState::Clean,
        }
    }

    pub fn visibility(&self) -> Visibility {
        match self.state() {
            ModerationState::ConfirmedSensitive => Visibility::Removed,
            ModerationState::Pending => Visibility::PendingReview,
            ModerationState::Clean | ModerationState::ConfirmedClean => Visibility::Visible,
        }
    }

    /// Records an administrator decision.
    ///
    /// Clean content was never flagged and has nothing to confirm; confirmed
    /// content may be re-decided.
    pub fn confirm(&mut self, sensitive: bool, detail: Option<&str>) -> Result<(), DomainError> {
        if self.state() == ModerationState::Clean {
            return Err(DomainError::validation(
                "review_id",
                "review is not flagged",
            ));
        }

        self.confirmation = if sensitive {
            Confirmation::ConfirmedSensitive
        } else {
            Confirmation::ConfirmedClean
        };
        if let Some(detail) = detail.map(str::trim).filter(|value| !value.is_empty()) {
            self.detail = detail.to_string();
        }
        Ok(())
    }
}
