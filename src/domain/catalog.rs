//! Course registration rules and group search.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::domain::{entities::CourseGroupRecord, error::DomainError};

const NAME_MAX_CHARS: usize = 255;
const CODE_MIN_CHARS: usize = 4;
const MIN_CREDIT: f64 = 0.5;
const MIN_YEAR: i32 = 2000;
pub const SEARCH_DEFAULT_PAGE_SIZE: u32 = 10;
pub const SEARCH_MAX_PAGE_SIZE: u32 = 100;

/// Department letters followed by a course number, e.g. `COMP130004`.
static COURSE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3,}[0-9]{2,}").expect("course code pattern compiles"));

/// Descriptive fields of a course offering. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewCourse {
    pub name: String,
    /// Catalogue code shared by every offering of the course; groups key on it.
    pub code: String,
    /// Section identifier distinguishing parallel offerings.
    pub code_id: String,
    pub credit: f64,
    pub department: String,
    pub campus_name: String,
    pub teachers: String,
    pub max_student: i32,
    pub week_hour: i32,
    pub year: i32,
    pub semester: i32,
}

impl NewCourse {
    pub fn normalized(mut self) -> Result<Self, DomainError> {
        self.name = self.name.trim().to_string();
        self.code = self.code.trim().to_string();
        self.code_id = self.code_id.trim().to_string();
        self.department = self.department.trim().to_string();
        self.campus_name = self.campus_name.trim().to_string();
        self.teachers = self.teachers.trim().to_string();

        let name_len = self.name.chars().count();
        if name_len == 0 || name_len > NAME_MAX_CHARS {
            return Err(DomainError::validation(
                "name",
                format!("must be between 1 and {NAME_MAX_CHARS} characters"),
            ));
        }
        if self.code.chars().count() < CODE_MIN_CHARS {
            return Err(DomainError::validation(
                "code",
                format!("must be at least {CODE_MIN_CHARS} characters"),
            ));
        }
        if self.code_id.chars().count() < CODE_MIN_CHARS {
            return Err(DomainError::validation(
                "code_id",
                format!("must be at least {CODE_MIN_CHARS} characters"),
            ));
        }
        if !self.credit.is_finite() || self.credit < MIN_CREDIT {
            return Err(DomainError::validation(
                "credit",
                format!("must be a number of at least {MIN_CREDIT}"),
            ));
        }
        for (field, value) in [
            ("department", &self.department),
            ("campus_name", &self.campus_name),
            ("teachers", &self.teachers),
        ] {
            if value.is_empty() {
                return Err(DomainError::validation(field, "must not be empty"));
            }
        }
        if self.year < MIN_YEAR {
            return Err(DomainError::validation(
                "year",
                format!("must be {MIN_YEAR} or later"),
            ));
        }
        if self.semester < 1 {
            return Err(DomainError::validation("semester", "must be at least 1"));
        }
        if self.max_student < 0 || self.week_hour < 0 {
            return Err(DomainError::validation(
                "capacity",
                "max_student and week_hour must not be negative",
            ));
        }
        Ok(self)
    }
}

/// Appends `credit` unless an equal value is already present.
/// Returns whether the list changed.
pub fn merge_credit(credits: &mut Vec<f64>, credit: f64) -> bool {
    if credits.iter().any(|existing| *existing == credit) {
        return false;
    }
    credits.push(credit);
    true
}

/// How a search query selects groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMatch {
    /// Queries that look like a course code match group codes by prefix.
    CodePrefix(String),
    /// Anything else matches a substring of the group name.
    NameContains(String),
}

impl GroupMatch {
    pub fn parse(query: &str) -> Self {
        if COURSE_CODE.is_match(query) {
            Self::CodePrefix(query.to_string())
        } else {
            Self::NameContains(query.to_string())
        }
    }

    pub fn matches(&self, group: &CourseGroupRecord) -> bool {
        match self {
            Self::CodePrefix(prefix) => group.code.starts_with(prefix.as_str()),
            Self::NameContains(needle) => group.name.contains(needle.as_str()),
        }
    }
}

/// A validated page request over the course groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSearch {
    pub matcher: GroupMatch,
    /// 1-based.
    pub page: u32,
    /// Zero only when no page was asked for: every match on one page.
    pub page_size: u32,
}

impl GroupSearch {
    /// `page == 0` means "no paging": the first `page_size` matches, or all
    /// of them when `page_size` is zero too. An explicit page with no size
    /// uses [`SEARCH_DEFAULT_PAGE_SIZE`].
    pub fn new(query: &str, page: u32, page_size: u32) -> Result<Self, DomainError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DomainError::validation("query", "must not be empty"));
        }
        if page_size > SEARCH_MAX_PAGE_SIZE {
            return Err(DomainError::validation(
                "page_size",
                format!("must be at most {SEARCH_MAX_PAGE_SIZE}"),
            ));
        }

        let (page, page_size) = match (page, page_size) {
            (0, size) => (1, size),
            (page, 0) => (page, SEARCH_DEFAULT_PAGE_SIZE),
            (page, size) => (page, size),
        };

        Ok(Self {
            matcher: GroupMatch::parse(query),
            page,
            page_size,
        })
    }

    /// `None` when every match is returned.
    pub fn limit(&self) -> Option<u32> {
        (self.page_size > 0).then_some(self.page_size)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}
