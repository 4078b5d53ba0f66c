use crate::classfile::cursor::CursorError;
use std::fmt::Display;

#[derive(Debug)]
pub enum PlanError {
    /// Malformed class file. Carries the offset of the offending bytes.
    ClassFormat { offset: usize, message: String },
    /// The parsed `this_class` disagrees with the name the repository asked for.
    NameMismatch { expected: String, found: String },
    ClassNotFound(String),
    Cursor(CursorError),
    Io(std::io::Error),
    Editor(String),
    Internal(String),
}

impl From<CursorError> for PlanError {
    fn from(value: CursorError) -> Self {
        PlanError::Cursor(value)
    }
}

impl From<std::io::Error> for PlanError {
    fn from(value: std::io::Error) -> Self {
        PlanError::Io(value)
    }
}

impl Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl PlanError {
    pub fn format_at(offset: usize, message: impl Into<String>) -> Self {
        PlanError::ClassFormat {
            offset,
            message: message.into(),
        }
    }

    /// Lookup misses are absorbed by the planner; everything else surfaces.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(self, PlanError::ClassNotFound(_) | PlanError::Io(_))
    }
}
