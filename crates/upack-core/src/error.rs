//! Install errors and their failure classes.

use thiserror::Error;

use crate::io::extract::ExtractError;
use crate::io::fetch::FetchError;
use crate::registry::RegistryError;
use crate::resolver::ResolveError;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Version resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Extraction task failed: {0}")]
    ExtractTask(#[from] tokio::task::JoinError),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Failure classes surfaced to callers and mapped to exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Transport,
    Storage,
    PathTraversal,
    Extraction,
    Validation,
}

impl ErrorClass {
    /// Process exit code for this class. Success is 0 and never a class.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::NotFound => 2,
            Self::Transport => 3,
            Self::Storage => 4,
            Self::PathTraversal => 5,
            Self::Extraction => 6,
            Self::Validation => 64,
        }
    }
}

fn fetch_class(e: &FetchError) -> ErrorClass {
    match e {
        FetchError::NotFound { .. } => ErrorClass::NotFound,
        FetchError::InvalidSource(_) => ErrorClass::Validation,
        FetchError::Http(_) => ErrorClass::Transport,
        FetchError::Io(_) => ErrorClass::Storage,
    }
}

impl InstallError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Resolve(e) => match e {
                ResolveError::NotFound { .. } => ErrorClass::NotFound,
                ResolveError::InvalidVersion(_) | ResolveError::InvalidSource(_) => {
                    ErrorClass::Validation
                }
                ResolveError::Http(_) => ErrorClass::Transport,
            },
            Self::Fetch(e) | Self::Registry(RegistryError::Fetch(e)) => fetch_class(e),
            Self::Registry(_) => ErrorClass::Storage,
            Self::Extract(e) => match e {
                ExtractError::PathTraversal(_) => ErrorClass::PathTraversal,
                ExtractError::TargetDirectory { .. } => ErrorClass::Storage,
                ExtractError::Archive(_) | ExtractError::Extraction { .. } => {
                    ErrorClass::Extraction
                }
            },
            Self::ExtractTask(_) => ErrorClass::Extraction,
            Self::Validation(_) => ErrorClass::Validation,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }
}
