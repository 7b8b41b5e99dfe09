//! Review content rules: rank bounds, drafts, partial edits.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{
    entities::{ReviewHistoryRecord, ReviewRecord},
    error::DomainError,
    moderation::{Confirmation, ModerationFields},
};

pub const RANK_MIN: i32 = 1;
pub const RANK_MAX: i32 = 5;
const TITLE_MAX_CHARS: usize = 64;
const CONTENT_MAX_CHARS: usize = 10_240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRank {
    pub overall: i32,
    /// Teaching content and style.
    pub content: i32,
    pub workload: i32,
    pub assessment: i32,
}

impl ReviewRank {
    pub fn new(overall: i32, content: i32, workload: i32, assessment: i32) -> Self {
        Self {
            overall,
            content,
            workload,
            assessment,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        for (field, value) in [
            ("rank.overall", self.overall),
            ("rank.content", self.content),
            ("rank.workload", self.workload),
            ("rank.assessment", self.assessment),
        ] {
            if !(RANK_MIN..=RANK_MAX).contains(&value) {
                return Err(DomainError::validation(
                    field,
                    format!("must be between {RANK_MIN} and {RANK_MAX}, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

/// Content of a review about to be created.
#[derive(Debug, Clone)]
pub struct ReviewDraft {
    pub title: String,
    pub content: String,
    pub rank: ReviewRank,
}

impl ReviewDraft {
    pub fn normalized(self) -> Result<Self, DomainError> {
        let title = non_blank(self.title, "title")?;
        let content = non_blank(self.content, "content")?;
        validate_title(&title)?;
        validate_content(&content)?;
        self.rank.validate()?;
        Ok(Self {
            title,
            content,
            rank: self.rank,
        })
    }
}

/// Partial edit. Blank strings count as "not supplied".
#[derive(Debug, Clone, Default)]
pub struct ReviewEdit {
    pub title: Option<String>,
    pub content: Option<String>,
    pub rank: Option<ReviewRank>,
}

impl ReviewEdit {
    pub fn normalized(self) -> Result<Self, DomainError> {
        let title = self.title.and_then(supplied);
        let content = self.content.and_then(supplied);
        if let Some(title) = title.as_deref() {
            validate_title(title)?;
        }
        if let Some(content) = content.as_deref() {
            validate_content(content)?;
        }
        if let Some(rank) = self.rank.as_ref() {
            rank.validate()?;
        }

        let edit = Self {
            title,
            content,
            rank: self.rank,
        };
        if edit.is_empty() {
            return Err(DomainError::validation("review", "no changes"));
        }
        Ok(edit)
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.rank.is_none()
    }
}

impl ReviewRecord {
    /// Applies `edit` in place and returns the history row holding the
    /// pre-edit state.
    ///
    /// `moderation` replaces the current moderation fields when the edited
    /// content went through the checker. With `None` the checker's last
    /// verdict stays but any human decision is cleared, since it applied to
    /// different text.
    pub fn apply_edit(
        &mut self,
        editor_id: i64,
        edit: &ReviewEdit,
        moderation: Option<ModerationFields>,
        now: OffsetDateTime,
    ) -> Result<ReviewHistoryRecord, DomainError> {
        if edit.is_empty() {
            return Err(DomainError::validation("review", "no changes"));
        }

        let history = ReviewHistoryRecord {
            id: Uuid::new_v4(),
            review_id: self.id,
            editor_id,
            title: self.title.clone(),
            content: self.content.clone(),
            rank: self.rank,
            moderation: self.moderation.clone(),
            created_at: now,
        };

        if let Some(title) = edit.title.as_ref() {
            self.title = title.clone();
        }
        if let Some(content) = edit.content.as_ref() {
            self.content = content.clone();
        }
        if let Some(rank) = edit.rank {
            self.rank = rank;
        }
        match moderation {
            Some(moderation) => self.moderation = moderation,
            None => self.moderation.confirmation = Confirmation::Unreviewed,
        }
        self.modify_count += 1;
        self.updated_at = now;

        Ok(history)
    }
}

/// Whitespace-only input counts as missing. Anything else is kept verbatim.
fn supplied(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

fn non_blank(value: String, field: &'static str) -> Result<String, DomainError> {
    supplied(value).ok_or_else(|| DomainError::validation(field, "must not be empty"))
}

fn validate_title(title: &str) -> Result<(), DomainError> {
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(DomainError::validation(
            "title",
            format!("must be at most {TITLE_MAX_CHARS} characters"),
        ));
    }
    Ok(())
}

fn validate_content(content: &str) -> Result<(), DomainError> {
    if content.chars().count() > CONTENT_MAX_CHARS {
        return Err(DomainError::validation(
            "content",
            format!("must be at most {CONTENT_MAX_CHARS} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::moderation::ModerationVerdict;

    fn sample_review() -> ReviewRecord {
        let now = OffsetDateTime::now_utc();
        ReviewRecord {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            reviewer_id: 7,
            title: "Solid intro".into(),
            content: "original".into(),
            rank: ReviewRank::new(5, 5, 5, 5),
            upvote_count: 0,
            downvote_count: 0,
            modify_count: 0,
            moderation: ModerationFields::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn rank_bounds_name_the_field() {
        let err = ReviewRank::new(5, 0, 3, 3).validate().unwrap_err();
        match err {
            DomainError::Validation { field, .. } => assert_eq!(field, "rank.content"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(ReviewRank::new(1, 5, 3, 2).validate().is_ok());
    }

    #[test]
    fn blank_edit_is_rejected() {
        let edit = ReviewEdit {
            title: Some("   ".into()),
            content: Some(String::new()),
            rank: None,
        };
        assert!(edit.normalized().is_err());
    }

    #[test]
    fn apply_edit_snapshots_previous_state() {
        let mut review = sample_review();
        let edit = ReviewEdit {
            content: Some("revised".into()),
            ..Default::default()
        }
        .normalized()
        .expect("valid edit");

        let flagged = ModerationFields::from_verdict(&ModerationVerdict::flagged("ads"));
        let history = review
            .apply_edit(7, &edit, Some(flagged), OffsetDateTime::now_utc())
            .expect("edit applies");

        assert_eq!(history.content, "original");
        assert_eq!(history.title, "Solid intro");
        assert!(!history.moderation.reported);
        assert_eq!(review.content, "revised");
        assert_eq!(review.title, "Solid intro");
        assert_eq!(review.modify_count, 1);
        assert!(review.moderation.reported);
        assert_eq!(review.moderation.confirmation, Confirmation::Unreviewed);
    }

    #[test]
    fn edit_without_verdict_reopens_confirmed_review() {
        let mut review = sample_review();
        review.moderation = ModerationFields::from_verdict(&ModerationVerdict::flagged("spam"));
        review
            .moderation
            .confirm(false, None)
            .expect("pending review can be confirmed");

        let edit = ReviewEdit {
            title: Some("Updated".into()),
            ..Default::default()
        };
        review
            .apply_edit(7, &edit, None, OffsetDateTime::now_utc())
            .expect("edit applies");

        assert!(review.moderation.reported);
        assert_eq!(review.moderation.detail, "spam");
        assert_eq!(review.moderation.confirmation, Confirmation::Unreviewed);
    }

    #[test]
    fn draft_rejects_long_titles() {
        let draft = ReviewDraft {
            title: "x".repeat(65),
            content: "fine".into(),
            rank: ReviewRank::new(3, 3, 3, 3),
        };
        assert!(draft.normalized().is_err());
    }

    #[test]
    fn long_content_is_rejected_on_create_and_edit() {
        let draft = ReviewDraft {
            title: "fine".into(),
            content: "x".repeat(CONTENT_MAX_CHARS + 1),
            rank: ReviewRank::new(3, 3, 3, 3),
        };
        match draft.normalized().unwrap_err() {
            DomainError::Validation { field, .. } => assert_eq!(field, "content"),
            other => panic!("unexpected error: {other:?}"),
        }

        let edit = ReviewEdit {
            content: Some("x".repeat(CONTENT_MAX_CHARS + 1)),
            ..Default::default()
        };
        assert!(edit.normalized().is_err());

        let draft = ReviewDraft {
            title: "fine".into(),
            content: "é".repeat(CONTENT_MAX_CHARS),
            rank: ReviewRank::new(3, 3, 3, 3),
        };
        assert!(draft.normalized().is_ok());
    }

    #[test]
    fn submitted_text_is_kept_verbatim() {
        let draft = ReviewDraft {
            title: "  Padded title ".into(),
            content: "\n  indented\n    code block\n".into(),
            rank: ReviewRank::new(3, 3, 3, 3),
        }
        .normalized()
        .expect("valid draft");
        assert_eq!(draft.title, "  Padded title ");
        assert_eq!(draft.content, "\n  indented\n    code block\n");

        let edit = ReviewEdit {
            content: Some("  revised  ".into()),
            ..Default::default()
        }
        .normalized()
        .expect("valid edit");
        assert_eq!(edit.content.as_deref(), Some("  revised  "));
    }
}
