//! MSBuild-style diagnostic lines.
//!
//! Build tools and IDEs pick up lines of the form
//! `<file>(<line>,<col>) : <Warning|Error> : <code> : <message>` and turn them
//! into clickable warnings and errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::SourceLocation;

/// File name used when a diagnostic is not tied to a file.
pub const FALLBACK_FILE_NAME: &str = "nugetscan";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Warning,
    Error,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Warning => f.write_str("Warning"),
            Category::Error => f.write_str("Error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: Option<PathBuf>,
    pub category: Category,
    pub code: Option<String>,
    pub location: Option<SourceLocation>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(category: Category, message: impl Into<String>) -> Self {
        Self {
            file: None,
            category,
            code: None,
            location: None,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Category::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Category::Error, message)
    }

    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn at(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}", file.display())?,
            None => f.write_str(FALLBACK_FILE_NAME)?,
        }
        match self.location {
            Some(location) => write!(f, "({location}) : {}", self.category)?,
            None => write!(f, ": {}", self.category)?,
        }
        if let Some(code) = &self.code {
            write!(f, " : {code}")?;
        }
        write!(f, " : {}", self.message)
    }
}
