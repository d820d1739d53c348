//! # Targets
//!
//! A [`Target`] is one payload of a verification call: an extension, text or binary content,
//! and an optional name. Every target of one call must map to its own file, so the pair
//! `(name, extension)` has to be unique within a [`TargetSet`].
//!
//! File converters, registered per extension, may replace a target with derived targets (for
//! example a document format rendered to text pages) before comparison.

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::diagnostics::Result;
use crate::naming::sanitize;
use crate::serialization::render;
use crate::settings::{SerializationSettings, VerifySettings};
use crate::value::Value;
use crate::{err_cause, err_msg};

/// Content of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetData {
    /// Scrubbed and compared after line-ending normalization.
    Text(String),
    /// Compared byte for byte; never scrubbed.
    Binary(Vec<u8>),
}

impl TargetData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TargetData::Text(text) => text.as_bytes(),
            TargetData::Binary(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    extension: String,
    data: TargetData,
    name: Option<String>,
}

impl Target {
    pub fn text(extension: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(extension, TargetData::Text(text.into()))
    }

    pub fn binary(extension: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(extension, TargetData::Binary(bytes.into()))
    }

    /// Reads the whole stream as a binary target.
    pub fn from_reader(extension: impl Into<String>, mut reader: impl Read) -> Result<Self> {
        let extension = extension.into();
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| err_cause!(Io, e, "failed to read {} target stream", extension))?;
        Ok(Self::binary(extension, bytes))
    }

    fn new(extension: impl Into<String>, data: TargetData) -> Self {
        Self {
            extension: extension.into().trim_start_matches('.').to_string(),
            data,
            name: None,
        }
    }

    /// Names the target; the name becomes part of its file name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn data(&self) -> &TargetData {
        &self.data
    }

    pub fn into_data(self) -> TargetData {
        self.data
    }
}

/// The ordered targets of one verification call.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    targets: Vec<Target>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: Target) -> &mut Self {
        self.targets.push(target);
        self
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Fails on the first pair of targets that would share a file: same extension and the
    /// same name once encoded for the file system.
    pub fn check_collisions(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert((target.name().map(sanitize), target.extension())) {
                return Err(err_msg!(
                    NamingCollision,
                    "more than one target named {} with extension '{}'",
                    target
                        .name()
                        .map(|n| format!("'{n}'"))
                        .unwrap_or_else(|| "<unnamed>".to_string()),
                    target.extension()
                ));
            }
        }
        Ok(())
    }

    /// Replaces targets that have a registered file converter with the converter's output.
    pub fn expand(
        self,
        settings: &VerifySettings,
        global: &SerializationSettings,
    ) -> Result<TargetSet> {
        let mut expanded = TargetSet::new();
        for target in self.targets {
            let converter = FILE_CONVERTERS
                .get(target.extension())
                .map(|entry| Arc::clone(entry.value()));
            match converter {
                Some(converter) => {
                    let conversion = converter(target.data.as_bytes(), settings)?;
                    conversion.append_to(&mut expanded, target.name.as_deref(), global)?;
                }
                None => {
                    expanded.push(target);
                }
            }
        }
        Ok(expanded)
    }
}

impl FromIterator<Target> for TargetSet {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for TargetSet {
    type Item = Target;
    type IntoIter = std::vec::IntoIter<Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.into_iter()
    }
}

// =====================
// File converters
// =====================

/// Output of a file converter.
#[derive(Debug, Clone, Default)]
pub struct Conversion {
    /// Rendered into a `txt` target named after the source target, unless null.
    pub info: Option<Value>,
    pub targets: Vec<Target>,
}

impl Conversion {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            info: None,
            targets,
        }
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = Some(info);
        self
    }

    fn append_to(
        self,
        set: &mut TargetSet,
        source_name: Option<&str>,
        global: &SerializationSettings,
    ) -> Result<()> {
        if let Some(info) = self.info.filter(|info| !info.is_null()) {
            let mut info_target = Target::text("txt", render(&info, global)?);
            info_target.name = source_name.map(str::to_string);
            set.push(info_target);
        }
        let count = self.targets.len();
        for (index, mut target) in self.targets.into_iter().enumerate() {
            let base = target.name.take().or_else(|| source_name.map(str::to_string));
            target.name = match (base, count) {
                (base, 1) => base,
                (Some(base), _) => Some(format!("{base}_{index:02}")),
                (None, _) => Some(format!("{index:02}")),
            };
            set.push(target);
        }
        Ok(())
    }
}

/// Converter from a target's bytes to derived targets.
pub type FileConverter =
    Arc<dyn Fn(&[u8], &VerifySettings) -> Result<Conversion> + Send + Sync>;

static FILE_CONVERTERS: Lazy<DashMap<String, FileConverter>> = Lazy::new(DashMap::new);

/// Registers (or replaces) the converter for targets with `extension`.
pub fn register_file_converter(
    extension: &str,
    f: impl Fn(&[u8], &VerifySettings) -> Result<Conversion> + Send + Sync + 'static,
) {
    FILE_CONVERTERS.insert(extension.trim_start_matches('.').to_string(), Arc::new(f));
}

pub fn unregister_file_converter(extension: &str) -> bool {
    FILE_CONVERTERS
        .remove(extension.trim_start_matches('.'))
        .is_some()
}
