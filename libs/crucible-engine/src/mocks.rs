//! Stub synthesis for jest module-interception directives.
//!
//! Generated suites routinely mock dependencies that are not installed in
//! the sandbox image (`jest.mock('jsonwebtoken')`) or reference project
//! files that were never uploaded (`jest.mock('../models/User')`). For the
//! run to get as far as executing tests, every mocked specifier must at
//! least resolve. This module scans the test code for `jest.mock(...)`
//! directives and fabricates just enough of a module for resolution to
//! succeed; jest's own factory then replaces the implementation.
//!
//! This is a compatibility shim for one ecosystem's mocking conventions,
//! not a dependency-injection system. It is best-effort by construction.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

use crate::error::EngineError;
use crate::workspace::Workspace;

static MOCK_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"jest\.mock\(\s*['"]([^'"]+)['"]"#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubKind {
    /// Bare package name: fabricate a minimal package under node_modules.
    Package,
    /// Relative path: write a stub file at the resolved location.
    Relative,
}

/// One mocked module specifier found in the test code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockStub {
    pub specifier: String,
    pub kind: StubKind,
}

/// Scan test code for every module-interception directive, in order,
/// deduplicated.
pub fn scan_mock_directives(test_code: &str) -> Vec<MockStub> {
    let mut seen = std::collections::HashSet::new();
    let mut stubs = Vec::new();

    for caps in MOCK_DIRECTIVE.captures_iter(test_code) {
        let specifier = caps[1].to_string();
        if !seen.insert(specifier.clone()) {
            continue;
        }
        let kind = classify(&specifier);
        stubs.push(MockStub { specifier, kind });
    }

    stubs
}

fn classify(specifier: &str) -> StubKind {
    if specifier.starts_with('.') || specifier.starts_with('/') {
        StubKind::Relative
    } else {
        StubKind::Package
    }
}

/// Resolve a relative module specifier against a directory inside the
/// workspace, normalizing `.` and `..` lexically. `..` never climbs above
/// the workspace root: untrusted test code must not name files outside its
/// own run directory.
pub(crate) fn resolve_relative(base_dir: &Path, specifier: &str) -> PathBuf {
    let mut resolved: Vec<std::ffi::OsString> = base_dir
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_os_string()),
            _ => None,
        })
        .collect();

    for part in specifier.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            normal => resolved.push(normal.into()),
        }
    }

    resolved.iter().collect()
}

fn has_module_extension(specifier: &str) -> bool {
    specifier.ends_with(".js") || specifier.ends_with(".ts") || specifier.ends_with(".json")
}

/// Generic no-op module body for a mocked bare package. Covers the call
/// shapes generated suites reach for: token verify/sign, password
/// compare/hash/salting, auth middleware passthrough, session
/// serialization hooks.
const PACKAGE_STUB_JS: &str = r#"// Stand-in for a mocked package; jest.mock() supplies the real behavior.
const noop = (...args) => undefined;
const asyncNoop = async (...args) => undefined;
const passthrough = (req, res, next) => (typeof next === 'function' ? next() : undefined);

module.exports = {
  verify: noop,
  sign: noop,
  decode: noop,
  compare: asyncNoop,
  hash: asyncNoop,
  genSalt: asyncNoop,
  authenticate: () => passthrough,
  initialize: () => passthrough,
  use: noop,
  serialize: noop,
  deserialize: noop,
  serializeUser: noop,
  deserializeUser: noop,
};
module.exports.default = module.exports;
"#;

/// Placeholder bindings for a mocked in-tree module: the symbols generated
/// suites most commonly pull from project files.
const RELATIVE_STUB_JS: &str = r#"// Placeholder bindings for a mocked project module.
module.exports = {
  User: {},
  Model: {},
  jwtConfig: { secret: 'stub-secret', expiresIn: '1h' },
  FRONTEND_URL: 'http://localhost:3000',
  oauthConfig: { clientID: 'stub', clientSecret: 'stub', callbackURL: '/auth/callback' },
};
module.exports.default = module.exports;
"#;

/// Materialize every stub into the workspace. `test_dir` is the
/// workspace-relative directory the test file lives in; relative
/// specifiers resolve against it.
pub async fn materialize_stubs(
    workspace: &Workspace,
    test_dir: &Path,
    stubs: &[MockStub],
) -> Result<(), EngineError> {
    for stub in stubs {
        match stub.kind {
            StubKind::Package => {
                let package_dir = Path::new("node_modules").join(&stub.specifier);
                let manifest = serde_json::json!({
                    "name": stub.specifier,
                    "version": "0.0.0",
                    "main": "index.js",
                });
                workspace
                    .write_file(package_dir.join("package.json"), &manifest.to_string())
                    .await?;
                workspace
                    .write_file(package_dir.join("index.js"), PACKAGE_STUB_JS)
                    .await?;
            }
            StubKind::Relative => {
                let mut path = resolve_relative(test_dir, &stub.specifier);
                if !has_module_extension(&stub.specifier) {
                    path.set_extension("js");
                }
                let body = if stub.specifier.ends_with(".json") {
                    "{}"
                } else {
                    RELATIVE_STUB_JS
                };
                workspace.write_file(&path, body).await?;
            }
        }
    }
    Ok(())
}
