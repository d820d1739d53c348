//! # Verification engine
//!
//! Drives one verification call:
//!
//! 1. content: serialize the value (if any) and append explicit targets;
//! 2. expand targets through file converters and reject naming collisions;
//! 3. resolve the snapshot name;
//! 4. per target: scrub, read the verified file, compare, then write or clean up the received
//!    file.
//!
//! The engine never writes a verified file. Approving a snapshot means renaming its received
//! file, which is left to the developer or external tooling.

use std::any::Any;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::diagnostics::Result;
use crate::err_cause;
use crate::naming::{resolve, Role, SnapshotName, TestIdentity};
use crate::registry::type_text_registry;
use crate::report::{render_diff, SnapshotFailure};
use crate::scrubber::{normalize_line_endings, ScrubContext, Scrubber};
use crate::serialization::{describe_binary, serialize_with};
use crate::settings::{serialization_settings, SerializationSettings, VerifySettings};
use crate::target::{Target, TargetData, TargetSet};

/// Outcome of comparing one target with its verified file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// Content equals the verified file; any stale received file was removed.
    Matched,
    /// The verified file differs; the received file now holds `received`.
    Mismatched { verified: String, received: String },
    /// No verified file exists yet; the received file now holds `received`.
    NotApproved { received: String },
}

impl SnapshotStatus {
    pub fn is_match(&self) -> bool {
        matches!(self, SnapshotStatus::Matched)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SnapshotStatus::Matched => "matched",
            SnapshotStatus::Mismatched { .. } => "mismatched",
            SnapshotStatus::NotApproved { .. } => "not approved",
        }
    }
}

/// Status and file locations of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub name: Option<String>,
    pub extension: String,
    pub verified_path: PathBuf,
    pub received_path: PathBuf,
    pub status: SnapshotStatus,
}

impl TargetOutcome {
    /// One-line description followed by a diff for mismatches.
    pub fn describe(&self) -> String {
        match &self.status {
            SnapshotStatus::Matched => format!("matched: {}", self.verified_path.display()),
            SnapshotStatus::NotApproved { .. } => format!(
                "not approved: no verified file at {}\nreceived: {}",
                self.verified_path.display(),
                self.received_path.display()
            ),
            SnapshotStatus::Mismatched { verified, received } => format!(
                "mismatch: {}\nreceived: {}\n{}",
                self.verified_path.display(),
                self.received_path.display(),
                render_diff(verified, received)
            ),
        }
    }
}

/// Result of one verification call: one outcome per target, in target order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    outcomes: Vec<TargetOutcome>,
}

impl VerifyResult {
    pub fn outcomes(&self) -> &[TargetOutcome] {
        &self.outcomes
    }

    /// True when every target matched.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_match())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| !o.status.is_match())
    }

    /// The outcome of the first (main) target.
    pub fn main(&self) -> Option<&TargetOutcome> {
        self.outcomes.first()
    }

    pub fn into_result(self) -> std::result::Result<Self, SnapshotFailure> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SnapshotFailure::new(self.failures().cloned().collect()))
        }
    }

    /// Panics with a description of every failing target.
    #[track_caller]
    pub fn assert_success(&self) {
        if !self.is_success() {
            let failure = SnapshotFailure::new(self.failures().cloned().collect());
            panic!("{}", failure.details());
        }
    }
}

/// Entry point: verifies values, targets, streams, directories and archives for one test.
#[derive(Debug, Clone)]
pub struct Verifier {
    identity: TestIdentity,
    settings: VerifySettings,
}

impl Verifier {
    pub fn new(identity: TestIdentity) -> Self {
        Self::with_settings(identity, VerifySettings::new())
    }

    pub fn with_settings(identity: TestIdentity, settings: VerifySettings) -> Self {
        Self { identity, settings }
    }

    pub fn identity(&self) -> &TestIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &VerifySettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut VerifySettings {
        &mut self.settings
    }

    /// Verifies the canonical text of `value`.
    pub fn verify<T: Serialize + Any>(&self, value: &T) -> Result<VerifyResult> {
        self.verify_with_targets(value, Vec::new())
    }

    /// Verifies `value` as the main target followed by `targets`.
    pub fn verify_with_targets<T: Serialize + Any>(
        &self,
        value: &T,
        targets: Vec<Target>,
    ) -> Result<VerifyResult> {
        let global = serialization_settings();
        let mut settings = self.settings.clone();
        let text = serialize_with(value, &mut settings, type_text_registry(), &global)?;
        let extension = settings.extension().unwrap_or("txt").to_string();
        let mut set = TargetSet::new();
        set.push(Target::text(extension, text));
        for target in targets {
            set.push(target);
        }
        self.run(set, settings, &global)
    }

    /// Verifies explicit targets only.
    pub fn verify_targets(&self, targets: Vec<Target>) -> Result<VerifyResult> {
        let global = serialization_settings();
        self.run(targets.into_iter().collect(), self.settings.clone(), &global)
    }

    pub fn verify_target(&self, target: Target) -> Result<VerifyResult> {
        self.verify_targets(vec![target])
    }

    pub fn verify_bytes(&self, extension: &str, bytes: &[u8]) -> Result<VerifyResult> {
        self.verify_target(Target::binary(extension, bytes))
    }

    pub fn verify_reader(&self, extension: &str, reader: impl Read) -> Result<VerifyResult> {
        self.verify_target(Target::from_reader(extension, reader)?)
    }

    pub(crate) fn run(
        &self,
        set: TargetSet,
        settings: VerifySettings,
        global: &SerializationSettings,
    ) -> Result<VerifyResult> {
        let set = set.expand(&settings, global)?;
        set.check_collisions()?;
        let name = resolve(&self.identity, &settings)?;
        let scrubber = settings.build_scrubber(global);
        // One context per call: placeholders are numbered across all targets of the call.
        let mut ctx = ScrubContext::new();

        let mut outcomes = Vec::with_capacity(set.len());
        for target in set {
            outcomes.push(compare_target(&name, target, &scrubber, &mut ctx)?);
        }
        Ok(VerifyResult { outcomes })
    }
}

fn compare_target(
    name: &SnapshotName,
    target: Target,
    scrubber: &Scrubber,
    ctx: &mut ScrubContext,
) -> Result<TargetOutcome> {
    let verified_path = name.file_path(Role::Verified, target.name(), target.extension());
    let received_path = name.file_path(Role::Received, target.name(), target.extension());
    let target_name = target.name().map(str::to_string);
    let extension = target.extension().to_string();

    let verified = read_optional(&verified_path)?;
    let (status, received_bytes) = match target.into_data() {
        TargetData::Text(text) => {
            let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
            let received = scrubber.scrub(text, ctx);
            let status = match verified {
                None => SnapshotStatus::NotApproved {
                    received: received.clone(),
                },
                Some(bytes) => {
                    let verified = normalize_verified(&bytes);
                    if verified == received {
                        SnapshotStatus::Matched
                    } else {
                        SnapshotStatus::Mismatched {
                            verified,
                            received: received.clone(),
                        }
                    }
                }
            };
            (status, received.into_bytes())
        }
        TargetData::Binary(bytes) => {
            let status = match verified {
                None => SnapshotStatus::NotApproved {
                    received: describe_binary(&bytes),
                },
                Some(existing) if existing == bytes => SnapshotStatus::Matched,
                Some(existing) => SnapshotStatus::Mismatched {
                    verified: describe_binary(&existing),
                    received: describe_binary(&bytes),
                },
            };
            (status, bytes)
        }
    };

    if status.is_match() {
        remove_stale(&received_path);
    } else {
        write_received(&received_path, &received_bytes)?;
    }
    debug!(
        status = status.label(),
        verified = %verified_path.display(),
        received = %received_path.display(),
        "target compared"
    );

    Ok(TargetOutcome {
        name: target_name,
        extension,
        verified_path,
        received_path,
        status,
    })
}

/// Verified text with a leading BOM dropped and line endings normalized.
fn normalize_verified(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    normalize_line_endings(text)
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(err_cause!(Io, e, "failed to read '{}'", path.display())),
    }
}

fn write_received(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            err_cause!(Io, e, "failed to create directory '{}'", parent.display())
        })?;
    }
    fs::write(path, bytes)
        .map_err(|e| err_cause!(Io, e, "failed to write '{}'", path.display()))
}

fn remove_stale(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale received file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove stale received file"),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn verifier_in(dir: &TempDir) -> Verifier {
        let identity = TestIdentity::new(
            dir.path().join("engine_tests.rs"),
            dir.path(),
            "engine_tests",
            "case",
        );
        Verifier::new(identity)
    }

    #[test]
    fn missing_baseline_is_not_approved_and_writes_received() {
        let dir = TempDir::new().unwrap();
        let result = verifier_in(&dir).verify(&"Foo".to_string()).unwrap();
        let outcome = result.main().unwrap();
        assert_eq!(
            outcome.status,
            SnapshotStatus::NotApproved {
                received: "Foo".into()
            }
        );
        assert_eq!(fs::read_to_string(&outcome.received_path).unwrap(), "Foo");
        assert!(!outcome.verified_path.exists());
    }

    #[test]
    fn bom_and_crlf_in_verified_file_still_match() {
        let dir = TempDir::new().unwrap();
        let verifier = verifier_in(&dir);
        let path = dir.path().join("engine_tests.case.verified.txt");
        fs::write(&path, "\u{feff}a\r\nb").unwrap();
        let result = verifier.verify(&"a\nb".to_string()).unwrap();
        assert!(result.is_success());
    }

    #[test]
    fn leading_bom_is_dropped_from_received_text() {
        let dir = TempDir::new().unwrap();
        let verifier = verifier_in(&dir);
        let first = verifier.verify(&"\u{feff}Foo".to_string()).unwrap();
        let outcome = first.main().unwrap();
        assert_eq!(fs::read_to_string(&outcome.received_path).unwrap(), "Foo");
        fs::rename(&outcome.received_path, &outcome.verified_path).unwrap();

        let second = verifier.verify(&"\u{feff}Foo".to_string()).unwrap();
        assert!(second.is_success());
    }

    #[test]
    fn binary_targets_compare_bytes() {
        let dir = TempDir::new().unwrap();
        let verifier = verifier_in(&dir);
        fs::write(dir.path().join("engine_tests.case.verified.bin"), [1u8, 2]).unwrap();
        assert!(verifier.verify_bytes("bin", &[1, 2]).unwrap().is_success());

        let result = verifier.verify_bytes("bin", &[1, 3]).unwrap();
        let outcome = result.main().unwrap();
        assert!(matches!(outcome.status, SnapshotStatus::Mismatched { .. }));
        assert_eq!(fs::read(&outcome.received_path).unwrap(), [1u8, 3]);
    }

    #[test]
    fn into_result_carries_failures() {
        let dir = TempDir::new().unwrap();
        let result = verifier_in(&dir).verify(&"Foo".to_string()).unwrap();
        let failure = result.into_result().unwrap_err();
        assert_eq!(failure.failures().len(), 1);
    }
}
