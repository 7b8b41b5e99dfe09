//! Content digest of the course-group hierarchy.
//!
//! The hierarchy is projected onto a canonical form, encoded as MessagePack
//! and hashed with SHA-256. The digest is rendered as unpadded base64.
//!
//! Canonical form:
//! - groups ordered by `(code, id)`, courses by `(code_id, id)`;
//! - credits deduplicated, sorted numerically and written as shortest
//!   round-trip decimal strings, so no float bits reach the encoder;
//! - timestamps excluded.
//!
//! Two hierarchies with the same logical content therefore share a digest no
//! matter how the store or a map happened to order them.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::entities::{CourseGroupRecord, CourseRecord};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SnapshotDigest(String);

impl SnapshotDigest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("failed to encode hierarchy: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

#[derive(Serialize)]
struct CanonicalGroup<'a> {
    id: String,
    name: &'a str,
    code: &'a str,
    department: &'a str,
    campus_name: &'a str,
    credits: Vec<String>,
    course_count: i32,
    review_count: i32,
    courses: Vec<CanonicalCourse<'a>>,
}

#[derive(Serialize)]
struct CanonicalCourse<'a> {
    id: String,
    name: &'a str,
    code: &'a str,
    code_id: &'a str,
    credit: String,
    department: &'a str,
    campus_name: &'a str,
    teachers: &'a str,
    max_student: i32,
    week_hour: i32,
    year: i32,
    semester: i32,
    review_count: i32,
}

impl<'a> CanonicalGroup<'a> {
    fn from_record(group: &'a CourseGroupRecord) -> Self {
        let mut courses: Vec<&CourseRecord> = group.courses.iter().collect();
        courses.sort_by(|a, b| a.code_id.cmp(&b.code_id).then(a.id.cmp(&b.id)));

        Self {
            id: group.id.hyphenated().to_string(),
            name: &group.name,
            code: &group.code,
            department: &group.department,
            campus_name: &group.campus_name,
            credits: canonical_credits(&group.credits),
            course_count: group.course_count,
            review_count: group.review_count,
            courses: courses.into_iter().map(CanonicalCourse::from_record).collect(),
        }
    }
}

impl<'a> CanonicalCourse<'a> {
    fn from_record(course: &'a CourseRecord) -> Self {
        Self {
            id: course.id.hyphenated().to_string(),
            name: &course.name,
            code: &course.code,
            code_id: &course.code_id,
            credit: decimal(course.credit),
            department: &course.department,
            campus_name: &course.campus_name,
            teachers: &course.teachers,
            max_student: course.max_student,
            week_hour: course.week_hour,
            year: course.year,
            semester: course.semester,
            review_count: course.review_count,
        }
    }
}

fn canonical_credits(credits: &[f64]) -> Vec<String> {
    let mut sorted = credits.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.into_iter().map(decimal).collect()
}

/// Shortest decimal string that parses back to the same `f64`.
fn decimal(value: f64) -> String {
    // -0.0 and 0.0 are the same credit
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{value}")
}

/// Deterministic binary encoding of the hierarchy.
pub fn canonical_encode(groups: &[CourseGroupRecord]) -> Result<Vec<u8>, DigestError> {
    let mut canonical: Vec<CanonicalGroup<'_>> =
        groups.iter().map(CanonicalGroup::from_record).collect();
    canonical.sort_by(|a, b| a.code.cmp(b.code).then_with(|| a.id.cmp(&b.id)));
    Ok(rmp_serde::to_vec(&canonical)?)
}

pub fn digest_groups(groups: &[CourseGroupRecord]) -> Result<SnapshotDigest, DigestError> {
    let encoded = canonical_encode(groups)?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(SnapshotDigest(STANDARD_NO_PAD.encode(hasher.finalize().to_vec())))
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;

    fn course(group_id: Uuid, code_id: &str, credit: f64) -> CourseRecord {
        let now = OffsetDateTime::now_utc();
        CourseRecord {
            id: Uuid::new_v4(),
            group_id,
            name: "Linear Algebra".into(),
            code: "MATH120016".into(),
            code_id: code_id.into(),
            credit,
            department: "Mathematics".into(),
            campus_name: "Jiangwan".into(),
            teachers: "Carol".into(),
            max_student: 60,
            week_hour: 4,
            year: 2024,
            semester: 2,
            review_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn group(code: &str, credits: Vec<f64>) -> CourseGroupRecord {
        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let courses = vec![
            course(id, &format!("{code}.01"), 4.0),
            course(id, &format!("{code}.02"), 3.0),
        ];
        CourseGroupRecord {
            id,
            name: "Linear Algebra".into(),
            code: code.into(),
            department: "Mathematics".into(),
            campus_name: "Jiangwan".into(),
            credits,
            course_count: courses.len() as i32,
            review_count: 0,
            courses,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn digest_is_idempotent() {
        let groups = vec![group("MATH120016", vec![4.0, 3.0])];
        let first = digest_groups(&groups).unwrap();
        let second = digest_groups(&groups).unwrap();
        assert_eq!(first, second);
        assert!(!first.as_str().ends_with('='));
    }

    #[test]
    fn ordering_does_not_affect_digest() {
        let a = group("MATH120016", vec![4.0, 3.0]);
        let b = group("COMP130004", vec![2.0]);

        let mut reordered_a = a.clone();
        reordered_a.credits = vec![3.0, 4.0];
        reordered_a.courses.reverse();

        let forward = digest_groups(&[a, b.clone()]).unwrap();
        let backward = digest_groups(&[b, reordered_a]).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn timestamps_do_not_affect_digest() {
        let original = group("MATH120016", vec![4.0]);
        let mut touched = original.clone();
        touched.updated_at += time::Duration::hours(3);
        assert_eq!(
            digest_groups(&[original]).unwrap(),
            digest_groups(&[touched]).unwrap()
        );
    }

    #[test]
    fn observable_changes_change_digest() {
        let base = group("MATH120016", vec![4.0, 3.0]);
        let base_digest = digest_groups(std::slice::from_ref(&base)).unwrap();

        let mut renamed = base.clone();
        renamed.name = "Advanced Linear Algebra".into();

        let mut more_credits = base.clone();
        more_credits.credits.push(5.0);

        let mut more_courses = base.clone();
        more_courses.course_count += 1;

        let mut more_reviews = base.clone();
        more_reviews.courses[0].review_count += 1;

        for changed in [renamed, more_credits, more_courses, more_reviews] {
            assert_ne!(digest_groups(&[changed]).unwrap(), base_digest);
        }
    }

    #[test]
    fn credits_render_as_exact_decimals() {
        assert_eq!(
            canonical_credits(&[2.5, 0.1, 2.5, 4.0]),
            vec!["0.1", "2.5", "4"]
        );
        assert_eq!(decimal(-0.0), "0");
    }
}
