//! Language adapter: translate `(language, source, test)` into a concrete
//! file tree plus the command to run inside the sandbox.
//!
//! Layout decision table (signals are pure functions over the test text):
//!
//! | language | relative import | jest.mock | deferred import in hook | layout   |
//! |----------|-----------------|-----------|-------------------------|----------|
//! | python   | n/a             | n/a       | n/a                     | merged   |
//! | js / ts  | no              | no        | no                      | merged   |
//! | js / ts  | yes (any of the three signals)                        | separate |
//!
//! Merged mode concatenates source then test into one file. For Python this
//! is correct only because pytest re-evaluates top-level definitions from
//! the same file; it is a deliberate simplification, not a general
//! solution. Known gap: a jest suite that expects separate files but
//! matches none of the three signals is misrouted into merged mode.

use crucible_common::{ExecutionRequest, Language};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::mocks;
use crate::workspace::Workspace;

/// Directory the test file lands in under the separate layout, mirroring a
/// conventional project shape so relative imports like `../src/...` resolve.
const TEST_DIR: &str = "tests";

static RELATIVE_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:require\s*\(\s*|import\s*\(\s*|from\s+)['"](\.{1,2}/[^'"]+)['"]"#).unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Source and test concatenated into a single file.
    Merged,
    /// Source at the workspace root, test under `tests/`, stubs for every
    /// mocked module.
    Separate,
}

/// Signal (a): the test imports something by relative path.
pub fn imports_source_relatively(test_code: &str) -> bool {
    RELATIVE_IMPORT.is_match(test_code)
}

/// Signal (b): the test declares a module-interception directive.
pub fn declares_module_interception(test_code: &str) -> bool {
    !mocks::scan_mock_directives(test_code).is_empty()
}

/// Signal (c): the test performs a deferred import inside a setup hook.
pub fn defers_import_in_setup_hook(test_code: &str) -> bool {
    let hook_index = ["beforeEach(", "beforeEach (", "beforeAll(", "beforeAll ("]
        .iter()
        .filter_map(|hook| test_code.find(hook))
        .min();

    match hook_index {
        Some(index) => {
            let after_hook = &test_code[index..];
            after_hook.contains("import(") || after_hook.contains("require(")
        }
        None => false,
    }
}

pub fn choose_layout(language: Language, test_code: &str) -> Layout {
    if !language.is_module_based() {
        return Layout::Merged;
    }

    if imports_source_relatively(test_code)
        || declares_module_interception(test_code)
        || defers_import_in_setup_hook(test_code)
    {
        Layout::Separate
    } else {
        Layout::Merged
    }
}

fn file_extension(language: Language) -> &'static str {
    match language {
        Language::Python => "py",
        Language::JavaScript => "js",
        Language::TypeScript => "ts",
    }
}

/// Where the source file goes under the separate layout: the location the
/// test's first non-mocked relative import resolves to, so sibling imports
/// actually find it. Falls back to `index.<ext>` at the workspace root.
fn source_location(language: Language, test_code: &str, mocked: &HashSet<String>) -> PathBuf {
    for caps in RELATIVE_IMPORT.captures_iter(test_code) {
        let specifier = &caps[1];
        if mocked.contains(specifier) {
            continue;
        }
        let mut path = mocks::resolve_relative(Path::new(TEST_DIR), specifier);
        if path.extension().is_none() {
            path.set_extension(file_extension(language));
        }
        return path;
    }
    PathBuf::from(format!("index.{}", file_extension(language)))
}

fn jest_config(language: Language, layout: Layout) -> serde_json::Value {
    let test_match = match layout {
        Layout::Merged => "<rootDir>/test_run.js".to_string(),
        Layout::Separate => format!("<rootDir>/tests/**/*.test.{}", file_extension(language)),
    };

    let mut config = serde_json::json!({
        "testEnvironment": "node",
        "collectCoverage": true,
        "coverageDirectory": "coverage",
        "coverageReporters": ["json-summary", "text"],
        "testMatch": [test_match],
    });

    if language == Language::TypeScript && layout == Layout::Separate {
        // The sandbox image ships ts-jest; merged mode stays plain JS.
        config["preset"] = serde_json::Value::String("ts-jest".to_string());
    }

    config
}

/// Write the request's file tree into the workspace and return the command
/// to run inside the sandbox.
pub async fn materialize(
    workspace: &Workspace,
    request: &ExecutionRequest,
) -> Result<Vec<String>, EngineError> {
    match request.language {
        Language::Python => materialize_python(workspace, request).await,
        Language::JavaScript | Language::TypeScript => materialize_jest(workspace, request).await,
    }
}

async fn materialize_python(
    workspace: &Workspace,
    request: &ExecutionRequest,
) -> Result<Vec<String>, EngineError> {
    // Prepend source to test so classes/functions are in scope when pytest
    // evaluates the file.
    let merged = format!("{}\n\n{}", request.source_code, request.test_code);
    workspace.write_file("test_run.py", &merged).await?;

    Ok(vec![
        "pytest".to_string(),
        "--cov=.".to_string(),
        "--cov-report=json:coverage.json".to_string(),
        "test_run.py".to_string(),
    ])
}

async fn materialize_jest(
    workspace: &Workspace,
    request: &ExecutionRequest,
) -> Result<Vec<String>, EngineError> {
    let layout = choose_layout(request.language, &request.test_code);
    let config = jest_config(request.language, layout);
    workspace
        .write_file("jest.config.json", &config.to_string())
        .await?;

    match layout {
        Layout::Merged => {
            let merged = format!("{}\n\n{}", request.source_code, request.test_code);
            workspace.write_file("test_run.js", &merged).await?;

            Ok(vec![
                "jest".to_string(),
                "--config".to_string(),
                "jest.config.json".to_string(),
                "test_run.js".to_string(),
            ])
        }
        Layout::Separate => {
            let stubs = mocks::scan_mock_directives(&request.test_code);
            mocks::materialize_stubs(workspace, Path::new(TEST_DIR), &stubs).await?;

            let mocked: HashSet<String> =
                stubs.iter().map(|stub| stub.specifier.clone()).collect();
            let source_path = source_location(request.language, &request.test_code, &mocked);
            workspace.write_file(&source_path, &request.source_code).await?;

            let test_path = format!("{}/run.test.{}", TEST_DIR, file_extension(request.language));
            workspace.write_file(&test_path, &request.test_code).await?;

            Ok(vec![
                "jest".to_string(),
                "--config".to_string(),
                "jest.config.json".to_string(),
            ])
        }
    }
}
