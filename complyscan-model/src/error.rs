use std::fmt::{self, Display};

use crate::scan::ScanStatus;

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidTransition { from: ScanStatus, to: ScanStatus },
    UnknownSeverity(String),
    UnknownFramework(String),
    UnknownStatus(String),
    UnknownScanType(String),
    InvalidId(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidTransition { from, to } => {
                write!(f, "invalid scan transition: {from} -> {to}")
            }
            ModelError::UnknownSeverity(raw) => {
                write!(f, "unknown severity: {raw}")
            }
            ModelError::UnknownFramework(raw) => {
                write!(f, "unknown framework: {raw}")
            }
            ModelError::UnknownStatus(raw) => write!(f, "unknown status: {raw}"),
            ModelError::UnknownScanType(raw) => {
                write!(f, "unknown scan type: {raw}")
            }
            ModelError::InvalidId(raw) => write!(f, "invalid id: {raw}"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
