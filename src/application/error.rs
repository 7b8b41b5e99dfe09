use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::repos::RepoError, cache::CacheError, domain::error::DomainError,
    infra::error::InfraError,
};

/// Caller-facing classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    /// The actor may not touch the resource.
    Forbidden,
    Retryable,
    Internal,
}

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub kind: ErrorKind,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &AppError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            kind: error.kind(),
            messages,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("invalid {field}: {message}")]
    BadRequest { field: &'static str, message: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String },
    #[error("temporarily unavailable: {message}")]
    Retryable { message: String },
    #[error("unexpected error: {message}")]
    Internal { message: String },
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn bad_request(field: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            field,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::Conflict { .. } => ErrorKind::Conflict,
            AppError::BadRequest { .. } => ErrorKind::BadRequest,
            AppError::Forbidden { .. } => ErrorKind::Forbidden,
            AppError::Retryable { .. } => ErrorKind::Retryable,
            AppError::Internal { .. } => ErrorKind::Internal,
            AppError::Infra(InfraError::Database { .. }) => ErrorKind::Retryable,
            AppError::Infra(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// Maps a store failure on the entity identified by `id`.
    pub fn from_repo(err: RepoError, entity: &'static str, id: impl ToString) -> Self {
        match err {
            RepoError::NotFound => Self::not_found(entity, id),
            other => other.into(),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation { field, message } => Self::BadRequest { field, message },
            DomainError::Invariant { message } => Self::Internal { message },
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => Self::NotFound {
                entity: "record",
                id: String::new(),
            },
            RepoError::Duplicate { constraint } => {
                Self::conflict(format!("unique constraint `{constraint}` violated"))
            }
            RepoError::InvalidInput { message } => Self::bad_request("input", message),
            RepoError::Timeout => Self::retryable("store deadline exceeded"),
            RepoError::Retryable { message } => Self::Retryable { message },
            RepoError::Integrity { message } => Self::Internal { message },
            RepoError::Persistence(message) => Self::Internal { message },
            RepoError::Rejected(domain) => domain.into(),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable { message } => Self::Retryable { message },
        }
    }
}
