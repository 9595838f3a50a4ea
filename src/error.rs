//! Error types for the PDF import library

use std::io;
use thiserror::Error;

/// Main error type for PDF import operations
#[derive(Error, Debug)]
pub enum PDFImportError {
    /// Cannot open or read the source document
    #[error("failed to open input: {0}")]
    InputOpen(#[from] io::Error),

    /// Malformed PDF syntax
    #[error("parse error: {0}")]
    Parse(String),

    /// Feature present in the source but outside the supported subset
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// Indirect reference that is in neither xref map
    #[error("dangling reference to object {0}")]
    Reference(i64),

    /// Page lookup or page-tree shape error
    #[error("page error: {0}")]
    Page(String),

    /// Writer invariant violation
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for PDF import operations
pub type PDFImportResult<T> = Result<T, PDFImportError>;

impl PDFImportError {
    /// Create a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new unsupported-feature error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a new page error
    pub fn page(msg: impl Into<String>) -> Self {
        Self::Page(msg.into())
    }

    /// Create a new serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Check if error relates to PDF structure
    pub fn is_structure_error(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Reference(_))
    }
}
