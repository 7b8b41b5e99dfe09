//! Application services layer.

pub mod catalog;
pub mod deadline;
pub mod digest;
pub mod error;
pub mod hierarchy;
pub mod import;
pub mod moderation;
pub mod repos;
pub mod retry;
pub mod reviews;
pub mod revisions;
pub mod votes;
