//! # Snapshot naming
//!
//! Resolves where a test's snapshot files live and what they are called:
//!
//! ```text
//! {directory}/{type}.{method}[.{parameters}][.{target}].{verified|received}.{extension}
//! ```
//!
//! Precedence, highest first: per-call [`VerifySettings`] overrides, the global
//! [`derive_path_info`] hook, then the [`TestIdentity`] itself.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::diagnostics::Result;
use crate::err_msg;
use crate::serialization::serialize;
use crate::settings::VerifySettings;

/// Captures the identity of the enclosing test function.
///
/// `type_name` is the enclosing module's last path segment, `method_name` the function name.
///
/// ```rust
/// fn renders_order() -> veracity::TestIdentity {
///     veracity::identity!()
/// }
/// assert_eq!(renders_order().method_name(), "renders_order");
/// ```
#[macro_export]
macro_rules! identity {
    () => {{
        fn __veracity_here() {}
        fn __veracity_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        $crate::naming::TestIdentity::from_function_path(
            __veracity_name_of(__veracity_here),
            file!(),
            env!("CARGO_MANIFEST_DIR"),
        )
    }};
}

// =====================
// Identity
// =====================

/// One named parameter of a data-driven test, held as canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    name: String,
    value: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Canonicalizes `value` through the serialization pipeline.
    pub fn of<T: Serialize + Any>(name: impl Into<String>, value: &T) -> Result<Self> {
        let text = serialize(value, &mut VerifySettings::new())?;
        Ok(Self::new(name, text))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Who is verifying: the test's source location and its type/method names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestIdentity {
    source_file: PathBuf,
    project_dir: PathBuf,
    type_name: String,
    method_name: String,
    parameters: Vec<Parameter>,
}

impl TestIdentity {
    pub fn new(
        source_file: impl Into<PathBuf>,
        project_dir: impl Into<PathBuf>,
        type_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            project_dir: project_dir.into(),
            type_name: type_name.into(),
            method_name: method_name.into(),
            parameters: Vec::new(),
        }
    }

    /// Builds an identity from a function's `type_name` path as produced by [`identity!`].
    ///
    /// `file` is `file!()`, which may be relative to a workspace root above `manifest_dir`.
    pub fn from_function_path(function_path: &str, file: &str, manifest_dir: &str) -> Self {
        let segments: Vec<&str> = function_path
            .split("::")
            .filter(|s| *s != "{{closure}}" && !s.starts_with("__veracity_"))
            .collect();
        let method_name = segments.last().copied().unwrap_or("unknown");
        let type_name = match segments.len() {
            0 | 1 => method_name,
            n => segments[n - 2],
        };
        let project_dir = PathBuf::from(manifest_dir);
        let source_file = locate_source(Path::new(file), &project_dir);
        Self::new(source_file, project_dir, type_name, method_name)
    }

    /// Adds a parameter whose value is canonicalized through the serialization pipeline.
    pub fn with_parameter<T: Serialize + Any>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self> {
        self.parameters.push(Parameter::of(name, value)?);
        Ok(self)
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Directory containing the test's source file.
    pub fn source_dir(&self) -> PathBuf {
        self.source_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.project_dir.clone())
    }
}

/// Finds `file` relative to `manifest_dir` or one of its ancestors (workspace builds report
/// `file!()` relative to the workspace root).
fn locate_source(file: &Path, manifest_dir: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    manifest_dir
        .ancestors()
        .map(|dir| dir.join(file))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| manifest_dir.join(file))
}

// =====================
// Path derivation
// =====================

/// Partial naming override; `None` fields fall through to the identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathInfo {
    pub directory: Option<PathBuf>,
    pub type_name: Option<String>,
    pub method_name: Option<String>,
}

impl PathInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn method_name(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = Some(method_name.into());
        self
    }
}

/// Naming strategy: `(source_file, project_dir, identity) -> PathInfo`.
pub type DerivePathInfo = Arc<dyn Fn(&Path, &Path, &TestIdentity) -> PathInfo + Send + Sync>;

static PATH_INFO: Lazy<RwLock<Option<DerivePathInfo>>> = Lazy::new(|| RwLock::new(None));

/// Installs a process-wide naming strategy, replacing any previous one.
pub fn derive_path_info(
    f: impl Fn(&Path, &Path, &TestIdentity) -> PathInfo + Send + Sync + 'static,
) {
    *PATH_INFO.write() = Some(Arc::new(f));
}

/// Removes the process-wide naming strategy.
pub fn reset_path_info() {
    *PATH_INFO.write() = None;
}

fn current_path_info() -> Option<DerivePathInfo> {
    PATH_INFO.read().clone()
}

// =====================
// Resolution
// =====================

/// Which of the two snapshot files a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Verified,
    Received,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Verified => "verified",
            Role::Received => "received",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved directory and base name shared by every target of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotName {
    directory: PathBuf,
    base: String,
}

impl SnapshotName {
    pub fn new(directory: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            base: base.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `{type}.{method}[.{parameters}]`, or the file name override.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Full path of one target's snapshot file.
    pub fn file_path(&self, role: Role, target_name: Option<&str>, extension: &str) -> PathBuf {
        let mut file = self.base.clone();
        if let Some(name) = target_name {
            file.push('.');
            file.push_str(&sanitize(name));
        }
        file.push('.');
        file.push_str(role.as_str());
        file.push('.');
        file.push_str(extension);
        self.directory.join(file)
    }
}

/// Resolves the snapshot name for `identity` under the per-call `settings` and the global hook.
pub fn resolve(identity: &TestIdentity, settings: &VerifySettings) -> Result<SnapshotName> {
    resolve_with(identity, settings, current_path_info().as_ref())
}

/// Like [`resolve`] with an explicit naming strategy in place of the global one.
pub fn resolve_with(
    identity: &TestIdentity,
    settings: &VerifySettings,
    derive: Option<&DerivePathInfo>,
) -> Result<SnapshotName> {
    if settings.file_name().is_some() && settings.parameters().is_some() {
        return Err(err_msg!(
            Configuration,
            "use_file_name and use_parameters cannot be combined"
        ));
    }

    let derived = derive
        .map(|f| f(identity.source_file(), identity.project_dir(), identity))
        .unwrap_or_default();

    let source_dir = identity.source_dir();
    let directory = match settings.directory().or(derived.directory.as_deref()) {
        Some(dir) if dir.is_relative() => source_dir.join(dir),
        Some(dir) => dir.to_path_buf(),
        None => source_dir,
    };

    let mut base = match settings.file_name() {
        Some(file_name) => file_name.to_string(),
        None => {
            let type_name = settings
                .type_name()
                .or(derived.type_name.as_deref())
                .unwrap_or(identity.type_name());
            let method_name = settings
                .method_name()
                .or(derived.method_name.as_deref())
                .unwrap_or(identity.method_name());
            let mut base = format!("{}.{}", sanitize(type_name), sanitize(method_name));
            if !settings.parameters_ignored() {
                let parameters = settings.parameters().unwrap_or(identity.parameters());
                if let Some(suffix) = parameter_suffix(parameters) {
                    base.push('.');
                    base.push_str(&suffix);
                }
            }
            base
        }
    };
    if settings.is_unique_for_os() {
        base.push('.');
        base.push_str(std::env::consts::OS);
    }

    debug!(directory = %directory.display(), base = %base, "resolved snapshot name");
    Ok(SnapshotName::new(directory, base))
}

/// `name=value` pairs joined by `_`, in declaration order.
///
/// `_` and `=` inside names and values are percent-encoded along with everything [`sanitize`]
/// encodes, so distinct parameter lists always give distinct suffixes.
pub fn parameter_suffix(parameters: &[Parameter]) -> Option<String> {
    if parameters.is_empty() {
        return None;
    }
    let pairs: Vec<String> = parameters
        .iter()
        .map(|p| {
            format!(
                "{}={}",
                encode(p.name(), &['_', '=']),
                encode(p.value(), &['_', '='])
            )
        })
        .collect();
    Some(pairs.join("_"))
}

/// Percent-encodes `%` and characters that are invalid in file names on common platforms.
///
/// The mapping is injective: two different inputs never produce the same file name component.
pub fn sanitize(text: &str) -> String {
    encode(text, &[])
}

fn encode(text: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let escape = match c {
            '%' | '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => true,
            c if c.is_control() => true,
            c => reserved.contains(&c),
        };
        if escape {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> TestIdentity {
        TestIdentity::new("/repo/tests/orders.rs", "/repo", "orders", "renders_total")
    }

    #[test]
    fn macro_captures_module_and_function() {
        let id = crate::identity!();
        assert_eq!(id.method_name(), "macro_captures_module_and_function");
        assert_eq!(id.type_name(), "tests");
        assert!(id.source_file().ends_with("src/naming.rs"));
    }

    #[test]
    fn default_name_is_type_dot_method_beside_source() {
        let name = resolve_with(&identity(), &VerifySettings::new(), None).unwrap();
        assert_eq!(
            name.file_path(Role::Received, None, "txt"),
            PathBuf::from("/repo/tests/orders.renders_total.received.txt")
        );
    }

    #[test]
    fn parameters_and_target_name_extend_the_base() {
        let id = identity().with_parameters(vec![
            Parameter::new("region", "eu"),
            Parameter::new("qty", "3"),
        ]);
        let name = resolve_with(&id, &VerifySettings::new(), None).unwrap();
        assert_eq!(
            name.file_path(Role::Verified, Some("summary"), "json"),
            PathBuf::from("/repo/tests/orders.renders_total.region=eu_qty=3.summary.verified.json")
        );
    }

    #[test]
    fn distinct_parameters_give_distinct_names() {
        let a = identity().with_parameters(vec![Parameter::new("x", "1")]);
        let b = identity().with_parameters(vec![Parameter::new("x", "2")]);
        let settings = VerifySettings::new();
        let a1 = resolve_with(&a, &settings, None).unwrap();
        let a2 = resolve_with(&a, &settings, None).unwrap();
        let b1 = resolve_with(&b, &settings, None).unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b1);
    }

    #[test]
    fn parameter_values_are_percent_encoded() {
        let suffix = parameter_suffix(&[Parameter::new("path", "a/b:c\nd%")]).unwrap();
        assert_eq!(suffix, "path=a%2Fb%3Ac%0Ad%25");
    }

    #[test]
    fn invalid_characters_do_not_fold_together() {
        let slash = identity().with_parameters(vec![Parameter::new("path", "a/b")]);
        let colon = identity().with_parameters(vec![Parameter::new("path", "a:b")]);
        let settings = VerifySettings::new();
        assert_ne!(
            resolve_with(&slash, &settings, None).unwrap(),
            resolve_with(&colon, &settings, None).unwrap()
        );
    }

    #[test]
    fn separators_inside_values_are_escaped() {
        let one = identity().with_parameters(vec![Parameter::new("a", "1_b=2")]);
        let two = identity().with_parameters(vec![
            Parameter::new("a", "1"),
            Parameter::new("b", "2"),
        ]);
        let settings = VerifySettings::new();
        let one = resolve_with(&one, &settings, None).unwrap();
        let two = resolve_with(&two, &settings, None).unwrap();
        assert_eq!(one.base(), "orders.renders_total.a=1%5Fb%3D2");
        assert_eq!(two.base(), "orders.renders_total.a=1_b=2");
    }

    #[test]
    fn settings_override_derived_override_identity() {
        let derive: DerivePathInfo = Arc::new(|_: &Path, _: &Path, id: &TestIdentity| {
            PathInfo::new()
                .directory("snapshots")
                .type_name(format!("{}Derived", id.type_name()))
                .method_name("derived")
        });
        let mut settings = VerifySettings::new();
        settings.use_method_name("explicit");
        let name = resolve_with(&identity(), &settings, Some(&derive)).unwrap();
        assert_eq!(name.directory(), Path::new("/repo/tests/snapshots"));
        assert_eq!(name.base(), "ordersDerived.explicit");
    }

    #[test]
    fn file_name_replaces_type_method_and_parameters() {
        let id = identity().with_parameters(vec![Parameter::new("x", "1")]);
        let mut settings = VerifySettings::new();
        settings.use_file_name("Custom_v2.final");
        let name = resolve_with(&id, &settings, None).unwrap();
        assert_eq!(name.base(), "Custom_v2.final");
    }

    #[test]
    fn file_name_with_explicit_parameters_is_rejected() {
        let mut settings = VerifySettings::new();
        settings
            .use_file_name("Custom")
            .use_parameters(vec![Parameter::new("x", "1")]);
        let err = resolve_with(&identity(), &settings, None).unwrap_err();
        assert_eq!(err.error_type(), crate::ErrorType::Configuration);
    }

    #[test]
    fn ignored_parameters_share_one_name() {
        let id = identity().with_parameters(vec![Parameter::new("x", "1")]);
        let mut settings = VerifySettings::new();
        settings.ignore_parameters();
        let name = resolve_with(&id, &settings, None).unwrap();
        assert_eq!(name.base(), "orders.renders_total");
    }

    #[test]
    fn unique_for_os_appends_platform() {
        let mut settings = VerifySettings::new();
        settings.unique_for_os();
        let name = resolve_with(&identity(), &settings, None).unwrap();
        assert_eq!(
            name.base(),
            format!("orders.renders_total.{}", std::env::consts::OS)
        );
    }

    #[test]
    fn typed_parameters_use_canonical_text() {
        let id = identity().with_parameter("rate", &0.5f64).unwrap();
        assert_eq!(id.parameters()[0].value(), "0.5");
    }
}
