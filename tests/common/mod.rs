//! # Snapshot sandbox
//!
//! Every integration test verifies into its own temporary directory so tests can run in
//! parallel and never see each other's received or verified files.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use veracity::{TargetOutcome, TestIdentity, Verifier};

pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        init_tracing();
        Self {
            dir: TempDir::new().expect("create sandbox"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Identity of a test living in `{sandbox}/{type_name}.rs`.
    pub fn identity(&self, type_name: &str, method_name: &str) -> TestIdentity {
        TestIdentity::new(
            self.path().join(format!("{type_name}.rs")),
            self.path(),
            type_name,
            method_name,
        )
    }

    pub fn verifier(&self, method_name: &str) -> Verifier {
        Verifier::new(self.identity("Sandbox", method_name))
    }

    /// Accepts a received file the way a developer would: by renaming it.
    pub fn approve(&self, outcome: &TargetOutcome) {
        fs::rename(&outcome.received_path, &outcome.verified_path).expect("approve snapshot");
    }

    /// Names of the files currently in the sandbox root, sorted.
    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.path())
            .expect("list sandbox")
            .map(|e| e.expect("sandbox entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }
}

/// Routes the library's `tracing` events into the test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}
