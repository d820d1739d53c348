//! # Directory and archive verification
//!
//! Folds every selected entry of a directory or tar archive into one manifest target:
//!
//! ```text
//! Info: {optional rendered info}
//!
//! == docs/a.txt ==
//! first file
//!
//! == z.txt ==
//! second file
//! ```
//!
//! Entries are sorted by their `/`-separated relative path (byte order) so the manifest does
//! not depend on filesystem enumeration order. Non-UTF-8 entries are listed with a binary
//! placeholder. The manifest then goes through the regular engine as a single text target.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::diagnostics::Result;
use crate::engine::{Verifier, VerifyResult};
use crate::scrubber::normalize_line_endings;
use crate::serialization::{describe_binary, render};
use crate::settings::{serialization_settings, SerializationSettings};
use crate::target::{Target, TargetSet};
use crate::value::Value;
use crate::{err_cause, err_msg};

/// Entry filter; receives the entry's path relative to the root.
pub type IncludeFn = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Rewrites an entry's text before it is folded into the manifest.
pub type FileScrubber = Arc<dyn Fn(&Path, &mut String) + Send + Sync>;

/// Selection and transformation options for a tree verification.
#[derive(Clone)]
pub struct TreeOptions {
    include: Option<IncludeFn>,
    pattern: Option<Regex>,
    recurse: bool,
    file_scrubber: Option<FileScrubber>,
    info: Option<Value>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            include: None,
            pattern: None,
            recurse: true,
            file_scrubber: None,
            info: None,
        }
    }
}

impl fmt::Debug for TreeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeOptions")
            .field("include", &self.include.is_some())
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("recurse", &self.recurse)
            .field("file_scrubber", &self.file_scrubber.is_some())
            .field("info", &self.info)
            .finish()
    }
}

impl TreeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, f: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.include = Some(Arc::new(f));
        self
    }

    /// Glob over the entry's file name: `*` is any run of characters, `?` one character.
    pub fn pattern(mut self, glob: &str) -> Result<Self> {
        self.pattern = Some(glob_to_regex(glob)?);
        Ok(self)
    }

    /// Descend into subdirectories (default `true`).
    pub fn recurse(mut self, recurse: bool) -> Self {
        self.recurse = recurse;
        self
    }

    pub fn file_scrubber(
        mut self,
        f: impl Fn(&Path, &mut String) + Send + Sync + 'static,
    ) -> Self {
        self.file_scrubber = Some(Arc::new(f));
        self
    }

    /// Metadata rendered at the top of the manifest.
    pub fn info(mut self, info: impl Into<Value>) -> Self {
        self.info = Some(info.into());
        self
    }

    fn selects(&self, relative: &Path) -> bool {
        if let Some(pattern) = &self.pattern {
            let file_name = relative
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default();
            if !pattern.is_match(&file_name) {
                return false;
            }
        }
        self.include.as_ref().map_or(true, |f| f(relative))
    }
}

fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
        .map_err(|e| err_cause!(Configuration, e, "invalid file pattern '{}'", glob))
}

// =====================
// Entry collection
// =====================

struct Entry {
    relative: PathBuf,
    key: String,
    bytes: Vec<u8>,
}

/// `/`-joined normal components; `.` and leading `/` are dropped.
fn entry_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn directory_entries(root: &Path, options: &TreeOptions) -> Result<Vec<Entry>> {
    if !root.is_dir() {
        return Err(err_msg!(Io, "directory '{}' does not exist", root.display()));
    }
    let mut walker = WalkDir::new(root).min_depth(1);
    if !options.recurse {
        walker = walker.max_depth(1);
    }
    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry
            .map_err(|e| err_cause!(Io, e, "failed to walk '{}'", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        if !options.selects(&relative) {
            continue;
        }
        let bytes = std::fs::read(entry.path())
            .map_err(|e| err_cause!(Io, e, "failed to read '{}'", entry.path().display()))?;
        entries.push(Entry {
            key: entry_key(&relative),
            relative,
            bytes,
        });
    }
    Ok(entries)
}

fn archive_entries(archive_path: &Path, options: &TreeOptions) -> Result<Vec<Entry>> {
    let file = File::open(archive_path).map_err(|e| {
        err_cause!(Io, e, "failed to open archive '{}'", archive_path.display())
    })?;
    let mut archive = tar::Archive::new(file);
    let archive_error = |e: std::io::Error| {
        err_cause!(Archive, e, "failed to read archive '{}'", archive_path.display())
    };
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let relative = entry.path().map_err(archive_error)?.into_owned();
        let key = entry_key(&relative);
        if !options.recurse && key.contains('/') {
            continue;
        }
        if !options.selects(&relative) {
            continue;
        }
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(archive_error)?;
        entries.push(Entry {
            relative,
            key,
            bytes,
        });
    }
    Ok(entries)
}

// =====================
// Manifest
// =====================

fn build_manifest(
    mut entries: Vec<Entry>,
    options: &TreeOptions,
    global: &SerializationSettings,
) -> Result<String> {
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    let mut sections = Vec::with_capacity(entries.len() + 1);
    if let Some(info) = &options.info {
        sections.push(format!("Info: {}", render(info, global)?));
    }
    for entry in entries {
        let content = match String::from_utf8(entry.bytes) {
            Ok(text) => {
                let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
                let mut text = normalize_line_endings(text);
                if let Some(scrub) = &options.file_scrubber {
                    scrub(&entry.relative, &mut text);
                }
                text
            }
            Err(e) => describe_binary(e.as_bytes()),
        };
        sections.push(format!("== {} ==\n{}", entry.key, content));
    }
    debug!(entries = sections.len(), "built tree manifest");
    Ok(sections.join("\n\n"))
}

/// Manifest text for a directory.
pub fn directory_manifest(
    root: &Path,
    options: &TreeOptions,
    global: &SerializationSettings,
) -> Result<String> {
    build_manifest(directory_entries(root, options)?, options, global)
}

/// Manifest text for a tar archive.
pub fn archive_manifest(
    archive_path: &Path,
    options: &TreeOptions,
    global: &SerializationSettings,
) -> Result<String> {
    build_manifest(archive_entries(archive_path, options)?, options, global)
}

impl Verifier {
    /// Verifies the manifest of a directory tree.
    pub fn verify_directory(
        &self,
        root: impl AsRef<Path>,
        options: TreeOptions,
    ) -> Result<VerifyResult> {
        let global = serialization_settings();
        let manifest = directory_manifest(root.as_ref(), &options, &global)?;
        self.verify_manifest(manifest, &global)
    }

    /// Verifies the manifest of a tar archive.
    pub fn verify_archive(
        &self,
        archive_path: impl AsRef<Path>,
        options: TreeOptions,
    ) -> Result<VerifyResult> {
        let global = serialization_settings();
        let manifest = archive_manifest(archive_path.as_ref(), &options, &global)?;
        self.verify_manifest(manifest, &global)
    }

    fn verify_manifest(
        &self,
        manifest: String,
        global: &SerializationSettings,
    ) -> Result<VerifyResult> {
        let settings = self.settings().clone();
        let extension = settings.extension().unwrap_or("txt").to_string();
        let set: TargetSet = std::iter::once(Target::text(extension, manifest)).collect();
        self.run(set, settings, global)
    }
}
