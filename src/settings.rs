//! # Settings
//!
//! Two layers of configuration:
//!
//! - [`SerializationSettings`]: process-wide, mutated through the registration functions in this
//!   module. Registration is expected to finish before verification runs in parallel; a
//!   verification call snapshots the settings when it starts and does not observe later changes.
//! - [`VerifySettings`]: per-call overrides (extension, naming, extra scrubbers). Never touches
//!   global state.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::diagnostics::Result;
use crate::naming::Parameter;
use crate::scrubber::{default_date_formats, DateFormat, DateKind, ScrubRule, Scrubber};
use crate::value::Value;

/// Converter consulted during the structural walk for objects of a given type name.
pub type ValueConverter = Arc<dyn Fn(&Value) -> Result<String> + Send + Sync>;

/// How object members are ordered in rendered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemberOrder {
    /// Sorted by member name (ordinal, case-sensitive).
    #[default]
    Alphabetical,
    /// As declared by the type.
    Declaration,
}

// =====================
// Process-wide settings
// =====================

/// Process-wide serialization configuration.
#[derive(Clone)]
pub struct SerializationSettings {
    pub member_order: MemberOrder,
    /// Omit object members whose value is null.
    pub ignore_nulls: bool,
    /// Omit object members whose value is an empty list or map.
    pub ignore_empty_collections: bool,
    pub scrub_guids: bool,
    pub scrub_date_times: bool,
    ignored_members: BTreeSet<String>,
    ignored_types: BTreeSet<String>,
    converters: HashMap<String, ValueConverter>,
    date_formats: Vec<DateFormat>,
    scrubbers: Vec<ScrubRule>,
}

impl Default for SerializationSettings {
    fn default() -> Self {
        Self {
            member_order: MemberOrder::default(),
            ignore_nulls: true,
            ignore_empty_collections: true,
            scrub_guids: true,
            scrub_date_times: true,
            ignored_members: BTreeSet::new(),
            ignored_types: BTreeSet::new(),
            converters: HashMap::new(),
            date_formats: default_date_formats(),
            scrubbers: Vec::new(),
        }
    }
}

impl fmt::Debug for SerializationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut converters: Vec<_> = self.converters.keys().collect();
        converters.sort();
        f.debug_struct("SerializationSettings")
            .field("member_order", &self.member_order)
            .field("ignore_nulls", &self.ignore_nulls)
            .field("ignore_empty_collections", &self.ignore_empty_collections)
            .field("scrub_guids", &self.scrub_guids)
            .field("scrub_date_times", &self.scrub_date_times)
            .field("ignored_members", &self.ignored_members)
            .field("ignored_types", &self.ignored_types)
            .field("converters", &converters)
            .field("date_formats", &self.date_formats.len())
            .field("scrubbers", &self.scrubbers)
            .finish()
    }
}

impl SerializationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Omits members with this name from every object.
    pub fn ignore_member(&mut self, name: impl Into<String>) -> &mut Self {
        self.ignored_members.insert(name.into());
        self
    }

    /// Omits members whose value is an object of this type name.
    pub fn ignore_members_of_type(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.ignored_types.insert(type_name.into());
        self
    }

    pub fn is_member_ignored(&self, name: &str) -> bool {
        self.ignored_members.contains(name)
    }

    pub fn is_type_ignored(&self, type_name: &str) -> bool {
        self.ignored_types.contains(type_name)
    }

    /// Renders objects named `type_name` through `f` instead of the structural walk.
    /// Registering the same name again replaces the previous converter.
    pub fn add_converter(
        &mut self,
        type_name: impl Into<String>,
        f: impl Fn(&Value) -> Result<String> + Send + Sync + 'static,
    ) -> &mut Self {
        self.converters.insert(type_name.into(), Arc::new(f));
        self
    }

    pub fn converter(&self, type_name: &str) -> Option<&ValueConverter> {
        self.converters.get(type_name)
    }

    /// Registers an extra chrono format to scrub. Fails on unsupported specifiers.
    pub fn add_date_format(&mut self, format: &str, kind: DateKind) -> Result<&mut Self> {
        self.date_formats.push(DateFormat::new(format, kind)?);
        Ok(self)
    }

    pub fn add_scrubber(&mut self, rule: ScrubRule) -> &mut Self {
        self.scrubbers.push(rule);
        self
    }

    pub fn date_formats(&self) -> &[DateFormat] {
        &self.date_formats
    }

    pub fn scrubbers(&self) -> &[ScrubRule] {
        &self.scrubbers
    }
}

static SERIALIZATION: Lazy<RwLock<SerializationSettings>> =
    Lazy::new(|| RwLock::new(SerializationSettings::default()));

/// Snapshot of the current process-wide settings.
pub fn serialization_settings() -> SerializationSettings {
    SERIALIZATION.read().clone()
}

/// Mutates the process-wide settings. Changes apply to calls that start afterwards.
pub fn modify_serialization(f: impl FnOnce(&mut SerializationSettings)) {
    let mut settings = SERIALIZATION.write();
    f(&mut *settings);
}

/// Registers a process-wide converter for objects named `type_name`.
pub fn add_extra_converter(
    type_name: impl Into<String>,
    f: impl Fn(&Value) -> Result<String> + Send + Sync + 'static,
) {
    SERIALIZATION.write().add_converter(type_name, f);
}

/// Registers an extra date-time format (no offset) to scrub in every call.
pub fn add_extra_datetime_format(format: &str) -> Result<()> {
    let format = DateFormat::new(format, DateKind::DateTime)?;
    SERIALIZATION.write().date_formats.push(format);
    Ok(())
}

/// Registers an extra date-time-with-offset format to scrub in every call.
pub fn add_extra_datetime_offset_format(format: &str) -> Result<()> {
    let format = DateFormat::new(format, DateKind::DateTimeOffset)?;
    SERIALIZATION.write().date_formats.push(format);
    Ok(())
}

/// Registers a scrubbing rule applied in every call, before per-call rules.
pub fn add_scrubber(rule: ScrubRule) {
    SERIALIZATION.write().scrubbers.push(rule);
}

// =====================
// Per-call settings
// =====================

/// Per-call overrides layered on top of [`SerializationSettings`].
#[derive(Debug, Clone, Default)]
pub struct VerifySettings {
    extension: Option<String>,
    file_name: Option<String>,
    directory: Option<PathBuf>,
    type_name: Option<String>,
    method_name: Option<String>,
    parameters: Option<Vec<Parameter>>,
    ignore_parameters: bool,
    unique_for_os: bool,
    scrubbers: Vec<ScrubRule>,
    scrub_guids: Option<bool>,
    scrub_date_times: Option<bool>,
}

impl VerifySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extension of the main target. Converters may set this (XML forces `xml`).
    pub fn use_extension(&mut self, extension: impl Into<String>) -> &mut Self {
        let extension = extension.into();
        self.extension = Some(extension.trim_start_matches('.').to_string());
        self
    }

    /// Replaces `{type}.{method}[.{parameters}]` with `file_name`, used as-is.
    pub fn use_file_name(&mut self, file_name: impl Into<String>) -> &mut Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Snapshot directory; relative paths resolve against the test's source directory.
    pub fn use_directory(&mut self, directory: impl AsRef<Path>) -> &mut Self {
        self.directory = Some(directory.as_ref().to_path_buf());
        self
    }

    pub fn use_type_name(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn use_method_name(&mut self, method_name: impl Into<String>) -> &mut Self {
        self.method_name = Some(method_name.into());
        self
    }

    /// Parameter values used for the name suffix instead of the identity's own.
    pub fn use_parameters(&mut self, parameters: Vec<Parameter>) -> &mut Self {
        self.parameters = Some(parameters);
        self
    }

    /// Drops the parameter suffix; all parameter sets then share one snapshot.
    pub fn ignore_parameters(&mut self) -> &mut Self {
        self.ignore_parameters = true;
        self
    }

    /// Appends the operating system to the base name.
    pub fn unique_for_os(&mut self) -> &mut Self {
        self.unique_for_os = true;
        self
    }

    pub fn add_scrubber(&mut self, rule: ScrubRule) -> &mut Self {
        self.scrubbers.push(rule);
        self
    }

    /// Adds a regex scrubber. A malformed pattern fails here, not during verification.
    pub fn scrub_pattern(
        &mut self,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<&mut Self> {
        self.scrubbers.push(ScrubRule::pattern(pattern, replacement)?);
        Ok(self)
    }

    pub fn scrub_lines_containing<I, S>(&mut self, needles: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scrubbers
            .push(ScrubRule::remove_lines_containing(needles));
        self
    }

    pub fn dont_scrub_guids(&mut self) -> &mut Self {
        self.scrub_guids = Some(false);
        self
    }

    pub fn dont_scrub_date_times(&mut self) -> &mut Self {
        self.scrub_date_times = Some(false);
        self
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn method_name(&self) -> Option<&str> {
        self.method_name.as_deref()
    }

    pub fn parameters(&self) -> Option<&[Parameter]> {
        self.parameters.as_deref()
    }

    pub fn parameters_ignored(&self) -> bool {
        self.ignore_parameters
    }

    pub fn is_unique_for_os(&self) -> bool {
        self.unique_for_os
    }

    /// Combines process-wide and per-call scrubbing into the scrubber for one call.
    /// Global rules run before per-call rules.
    pub fn build_scrubber(&self, global: &SerializationSettings) -> Scrubber {
        let mut scrubber = Scrubber::new().with_date_formats(global.date_formats.clone());
        scrubber.scrub_guids = self.scrub_guids.unwrap_or(global.scrub_guids);
        scrubber.scrub_date_times = self.scrub_date_times.unwrap_or(global.scrub_date_times);
        for rule in global.scrubbers.iter().chain(&self.scrubbers) {
            scrubber.add_rule(rule.clone());
        }
        scrubber
    }
}
