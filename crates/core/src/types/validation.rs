use serde::{Deserialize, Serialize};
use std::time::Instant;

// =============================================================================
// Validation Results
// =============================================================================

/// Stable codes reported by the safety pipeline.
pub mod codes {
    // Layer 1: input
    pub const SCHEMA_VIOLATION: &str = "SCHEMA_VIOLATION";
    pub const PARAMS_TOO_LARGE: &str = "PARAMS_TOO_LARGE";
    pub const PARAMS_NEAR_LIMIT: &str = "PARAMS_NEAR_LIMIT";
    pub const BLOCKED_COMMAND: &str = "BLOCKED_COMMAND";
    pub const SQL_INJECTION: &str = "SQL_INJECTION";
    pub const PATH_TRAVERSAL: &str = "PATH_TRAVERSAL";
    pub const SUSPICIOUS_PATTERN: &str = "SUSPICIOUS_PATTERN";
    pub const CONTROL_CHARACTERS: &str = "CONTROL_CHARACTERS";
    pub const COMMAND_TOO_LONG: &str = "COMMAND_TOO_LONG";
    pub const EXCESSIVE_CHAINING: &str = "EXCESSIVE_CHAINING";
    pub const CONTENT_TOO_LARGE: &str = "CONTENT_TOO_LARGE";
    pub const INVALID_URL: &str = "INVALID_URL";
    pub const BLOCKED_URL_SCHEME: &str = "BLOCKED_URL_SCHEME";

    // Layer 2: plan
    pub const EMPTY_PLAN: &str = "EMPTY_PLAN";
    pub const TOO_MANY_STEPS: &str = "TOO_MANY_STEPS";
    pub const STEP_COUNT_NEAR_LIMIT: &str = "STEP_COUNT_NEAR_LIMIT";
    pub const CIRCULAR_DEPENDENCY: &str = "CIRCULAR_DEPENDENCY";
    pub const SELF_DEPENDENCY: &str = "SELF_DEPENDENCY";
    pub const UNKNOWN_DEPENDENCY: &str = "UNKNOWN_DEPENDENCY";
    pub const DUPLICATE_STEPS: &str = "DUPLICATE_STEPS";
    pub const DURATION_EXCEEDED: &str = "DURATION_EXCEEDED";
    pub const DURATION_NEAR_LIMIT: &str = "DURATION_NEAR_LIMIT";
    pub const COST_EXCEEDED: &str = "COST_EXCEEDED";
    pub const COST_NEAR_LIMIT: &str = "COST_NEAR_LIMIT";
    pub const DANGEROUS_SEQUENCE: &str = "DANGEROUS_SEQUENCE";
    pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
    pub const MISSING_PERMISSION: &str = "MISSING_PERMISSION";

    // Layer 3: execution
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const CONCURRENT_LIMIT_EXCEEDED: &str = "CONCURRENT_LIMIT_EXCEEDED";
    pub const CONCURRENT_NEAR_LIMIT: &str = "CONCURRENT_NEAR_LIMIT";
    pub const CONFIRMATION_DENIED: &str = "CONFIRMATION_DENIED";
    pub const CONFIRMATION_UNAVAILABLE: &str = "CONFIRMATION_UNAVAILABLE";
    pub const RESOURCE_UNAVAILABLE: &str = "RESOURCE_UNAVAILABLE";

    // Layer 4: output
    pub const MALWARE_DETECTED: &str = "MALWARE_DETECTED";
    pub const OUTPUT_TOO_LARGE: &str = "OUTPUT_TOO_LARGE";
    pub const PII_DETECTED: &str = "PII_DETECTED";
    pub const SECRET_DETECTED: &str = "SECRET_DETECTED";
}

/// Severity of a blocking validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Error,
}

/// A blocking finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
    pub severity: Severity,
}

/// A non-blocking finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
}

/// Outcome of one validation stage (or several merged stages).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub duration_ms: u64,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    /// An empty, valid result.
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Record an `error`-severity finding.
    pub fn error(&mut self, code: &str, message: impl Into<String>, field: Option<&str>) {
        self.push_error(code, message, field, Severity::Error);
    }

    /// Record a `critical`-severity finding.
    pub fn critical(&mut self, code: &str, message: impl Into<String>, field: Option<&str>) {
        self.push_error(code, message, field, Severity::Critical);
    }

    /// Record a warning.
    pub fn warn(&mut self, code: &str, message: impl Into<String>, field: Option<&str>) {
        self.warnings.push(ValidationWarning {
            code: code.to_string(),
            message: message.into(),
            field: field.map(str::to_string),
        });
    }

    fn push_error(&mut self, code: &str, message: impl Into<String>, field: Option<&str>, severity: Severity) {
        self.errors.push(ValidationError {
            code: code.to_string(),
            message: message.into(),
            field: field.map(str::to_string),
            severity,
        });
        self.valid = false;
    }

    /// Fold another result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.duration_ms += other.duration_ms;
    }

    /// Stamp the elapsed time and recompute validity.
    pub fn finish(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self.valid = self.errors.is_empty();
        self
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    pub fn has_critical(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Critical)
    }

    /// Error messages joined for display.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("[{}] {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_never_invalidate() {
        let mut result = ValidationResult::new();
        result.warn(codes::SUSPICIOUS_PATTERN, "backticks", Some("command"));
        let result = result.finish(Instant::now());
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_merge_propagates_invalid() {
        let mut a = ValidationResult::new();
        let mut b = ValidationResult::new();
        b.critical(codes::MALWARE_DETECTED, "eval", None);
        a.merge(b);
        assert!(!a.valid);
        assert!(a.has_critical());
        assert!(a.summary().contains("MALWARE_DETECTED"));
    }
}
