//! Review vote values and toggle semantics.

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// Direction requested by a voter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn from_upvote(upvote: bool) -> Self {
        if upvote { Self::Up } else { Self::Down }
    }
}

/// Persisted vote state. An absent row reads as [`VoteValue::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum VoteValue {
    Down,
    #[default]
    None,
    Up,
}

impl VoteValue {
    pub fn as_i16(self) -> i16 {
        match self {
            VoteValue::Down => -1,
            VoteValue::None => 0,
            VoteValue::Up => 1,
        }
    }

    pub fn from_i16(value: i16) -> Result<Self, DomainError> {
        match value {
            -1 => Ok(VoteValue::Down),
            0 => Ok(VoteValue::None),
            1 => Ok(VoteValue::Up),
            other => Err(DomainError::invariant(format!(
                "vote value {other} outside of -1..=1"
            ))),
        }
    }

    /// Applies a vote request: repeating the current direction clears the
    /// vote, anything else moves straight to the requested direction.
    pub fn toggled(self, direction: VoteDirection) -> Self {
        match (self, direction) {
            (VoteValue::Up, VoteDirection::Up) | (VoteValue::Down, VoteDirection::Down) => {
                VoteValue::None
            }
            (_, VoteDirection::Up) => VoteValue::Up,
            (_, VoteDirection::Down) => VoteValue::Down,
        }
    }
}

impl From<VoteValue> for i16 {
    fn from(value: VoteValue) -> Self {
        value.as_i16()
    }
}

impl TryFrom<i16> for VoteValue {
    type Error = DomainError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        VoteValue::from_i16(value)
    }
}

/// Aggregate counters recomputed from the vote rows of one review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VoteTally {
    pub upvotes: i32,
    pub downvotes: i32,
}

impl VoteTally {
    pub fn new(upvotes: i32, downvotes: i32) -> Self {
        Self { upvotes, downvotes }
    }

    pub fn from_values(values: impl IntoIterator<Item = VoteValue>) -> Self {
        values
            .into_iter()
            .fold(Self::default(), |mut tally, value| {
                match value {
                    VoteValue::Up => tally.upvotes += 1,
                    VoteValue::Down => tally.downvotes += 1,
                    VoteValue::None => {}
                }
                tally
            })
    }

    pub fn remark(self) -> i32 {
        self.upvotes - self.downvotes
    }
}
