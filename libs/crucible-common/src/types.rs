use serde::{Deserialize, Serialize};

/// Languages the sandbox knows how to run tests for.
///
/// Python suites run under pytest; JavaScript and TypeScript suites run
/// under jest. The string forms match what the calling service sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
}

impl Language {
    pub fn from_str(s: &str) -> Option<Language> {
        match s.to_lowercase().as_str() {
            "python" => Some(Language::Python),
            "javascript" => Some(Language::JavaScript),
            "typescript" => Some(Language::TypeScript),
            _ => None,
        }
    }

    /// Jest-family languages share the module-based adapter and parser.
    pub fn is_module_based(&self) -> bool {
        matches!(self, Language::JavaScript | Language::TypeScript)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
        };
        write!(f, "{}", name)
    }
}

/// One test-suite execution request. Immutable; the caller builds it once
/// per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub language: Language,
    pub source_code: String,
    pub test_code: String,
}

/// Parsed test-suite counts plus best-effort coverage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDetails {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub duration: String,
    /// Percent of lines covered, 0-100. Zero when no artifact was produced.
    pub coverage: u8,
}

/// The single structured result returned to the caller.
///
/// `success` is false only when the engine itself could not run anything
/// (unsupported language, workspace IO failure, sandbox spawn failure).
/// A failing test suite is a successful execution with `passed: false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub passed: bool,
    pub exit_code: i64,
    /// Combined stdout plus labeled stderr.
    pub output: String,
    pub details: ReportDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Result for requests the engine rejected before any sandbox ran.
    pub fn rejected(error: impl Into<String>) -> Self {
        let error = error.into();
        ExecutionResult {
            success: false,
            passed: false,
            exit_code: -1,
            output: error.clone(),
            details: ReportDetails::default(),
            error: Some(error),
        }
    }

    /// Result for a sandbox run that completed (any exit code).
    pub fn completed(exit_code: i64, output: String, details: ReportDetails) -> Self {
        ExecutionResult {
            success: true,
            passed: exit_code == 0,
            exit_code,
            output,
            details,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_str() {
        assert_eq!(Language::from_str("python"), Some(Language::Python));
        assert_eq!(Language::from_str("JavaScript"), Some(Language::JavaScript));
        assert_eq!(Language::from_str("TYPESCRIPT"), Some(Language::TypeScript));
        assert_eq!(Language::from_str("ruby"), None);
    }

    #[test]
    fn test_language_display_roundtrip() {
        for lang in [Language::Python, Language::JavaScript, Language::TypeScript] {
            assert_eq!(Language::from_str(&lang.to_string()), Some(lang));
        }
    }

    #[test]
    fn test_language_serde_lowercase() {
        let json = serde_json::to_string(&Language::TypeScript).unwrap();
        assert_eq!(json, "\"typescript\"");
        let back: Language = serde_json::from_str("\"python\"").unwrap();
        assert_eq!(back, Language::Python);
    }

    #[test]
    fn test_rejected_result_shape() {
        let result = ExecutionResult::rejected("Unsupported language");
        assert!(!result.success);
        assert!(!result.passed);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.error.as_deref(), Some("Unsupported language"));
        assert_eq!(result.details, ReportDetails::default());
    }

    #[test]
    fn test_completed_result_passed_iff_exit_zero() {
        let ok = ExecutionResult::completed(0, "ok".into(), ReportDetails::default());
        assert!(ok.success);
        assert!(ok.passed);

        let failed = ExecutionResult::completed(1, "1 failed".into(), ReportDetails::default());
        assert!(failed.success);
        assert!(!failed.passed);
        assert_eq!(failed.exit_code, 1);
    }

    #[test]
    fn test_error_field_omitted_when_absent() {
        let result = ExecutionResult::completed(0, String::new(), ReportDetails::default());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("exitCode").is_some());

        let rejected = ExecutionResult::rejected("boom");
        let json = serde_json::to_value(&rejected).unwrap();
        assert_eq!(json["error"], "boom");
    }
}
