//! Bulk course registration from a TOML manifest.
//!
//! ```toml
//! [[courses]]
//! name = "Data Structures"
//! code = "COMP130004"
//! code_id = "COMP130004.01"
//! credit = 3.0
//! department = "Computer Science"
//! campus_name = "Handan"
//! teachers = "Alice"
//! max_student = 80
//! week_hour = 3
//! year = 2024
//! semester = 1
//! ```

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::{
    catalog::CatalogService,
    deadline::Deadline,
    error::{AppError, ErrorKind},
};
use crate::domain::catalog::NewCourse;

const SOURCE: &str = "application::import";

#[derive(Debug, Deserialize)]
struct CourseManifest {
    #[serde(default)]
    courses: Vec<NewCourse>,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid course manifest: {0}")]
    Manifest(#[from] toml::de::Error),
    #[error("course #{index} (`{code_id}`) rejected: {source}")]
    Course {
        index: usize,
        code_id: String,
        #[source]
        source: AppError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub registered: usize,
    /// Courses whose `code_id` was already registered.
    pub skipped: usize,
}

pub fn parse_manifest(input: &str) -> Result<Vec<NewCourse>, ImportError> {
    Ok(toml::from_str::<CourseManifest>(input)?.courses)
}

/// Registers every course in order. Already registered courses are skipped so
/// a manifest can be imported more than once; any other failure stops the
/// import.
pub async fn import_courses(
    catalog: &CatalogService,
    deadline: Deadline,
    courses: Vec<NewCourse>,
) -> Result<ImportSummary, ImportError> {
    let mut summary = ImportSummary::default();

    for (index, course) in courses.into_iter().enumerate() {
        let code_id = course.code_id.clone();
        match catalog.register_course(deadline, course).await {
            Ok(_) => summary.registered += 1,
            Err(err) if err.kind() == ErrorKind::Conflict => {
                warn!(target = SOURCE, index, %code_id, "course already registered, skipping");
                summary.skipped += 1;
            }
            Err(source) => {
                return Err(ImportError::Course {
                    index,
                    code_id,
                    source,
                });
            }
        }
    }

    info!(
        target = SOURCE,
        registered = summary.registered,
        skipped = summary.skipped,
        "course import finished"
    );
    Ok(summary)
}
