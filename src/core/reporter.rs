// src/core/reporter.rs

use crate::models::{Finding, Severity};
use colored::Colorize;

/// Console reporter implementing the tool's four-tag output convention.
///
/// Verbosity is explicit state handed to whoever needs it instead of a
/// process-wide toggle, so constructors declare up front that they report.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    verbose: bool,
}

impl Reporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        println!("{} {}", "[INFO]".blue(), message.as_ref());
    }

    pub fn important(&self, message: impl AsRef<str>) {
        println!("{} {}", "[IMPORTANT]".yellow(), message.as_ref());
    }

    /// Suppressed unless verbose mode was requested.
    pub fn debug(&self, message: impl AsRef<str>) {
        if self.verbose {
            println!("{} {}", "[DEBUG]".cyan(), message.as_ref());
        }
    }

    pub fn error(&self, message: impl AsRef<str>) {
        eprintln!("{} {}", "[ERROR]".red(), message.as_ref());
    }

    pub fn finding(&self, finding: &Finding) {
        match finding.severity {
            Severity::Info => self.info(&finding.message),
            Severity::Important => self.important(&finding.message),
        }
    }
}
