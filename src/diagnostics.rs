//! Diagnostics
//!
//! Collects schema-level problems found while compiling the reference map.
//! None of them are fatal; they are surfaced once after the builder phase.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RefscanError;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Diagnostic code for categorizing issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// Slot range names something that is not a class, type or enum
    UnknownRange,
    /// Slot range is a class, but no concrete descendant lives in a collection
    UnbackedRange,
    /// Collection has no concrete class that could be stored in it
    EmptyCollection,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownRange => "W001",
            Self::UnbackedRange => "W002",
            Self::EmptyCollection => "I001",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::UnknownRange | Self::UnbackedRange => Severity::Warning,
            Self::EmptyCollection => Severity::Info,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single diagnostic item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticItem {
    /// Class, slot or collection the diagnostic is about
    pub subject: String,
    pub code: DiagnosticCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(subject: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.code,
            self.code.severity(),
            self.message,
            self.subject
        )?;

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from the builder phase
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: DiagnosticItem) {
        self.items.push(item);
    }

    /// Record a non-fatal slot resolution failure
    pub fn slot_resolution(&mut self, code: DiagnosticCode, error: &RefscanError) {
        let subject = match error {
            RefscanError::SchemaResolution { class, slot, .. } => format!("{}.{}", class, slot),
            other => other.to_string(),
        };
        self.push(DiagnosticItem::new(subject, code, error.to_string()));
    }

    pub fn empty_collection(&mut self, collection: &str, eligible: &[String]) {
        let mut item = DiagnosticItem::new(
            collection,
            DiagnosticCode::EmptyCollection,
            format!("Collection {} has no concrete class that can be stored in it", collection),
        );
        if !eligible.is_empty() {
            item = item.with_context(format!("Abstract classes: {}", eligible.join(", ")));
        }
        self.push(item);
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Emit every item through `tracing`
    pub fn log(&self) {
        for item in &self.items {
            match item.severity() {
                Severity::Warning => tracing::warn!(code = %item.code, "{}", item.message),
                Severity::Info => tracing::info!(code = %item.code, "{}", item.message),
            }
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{}", item)?;
        }
        if !self.is_empty() {
            writeln!(f, "\n{} warning(s)", self.warning_count())?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagnosticItem;
    type IntoIter = std::slice::Iter<'a, DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
