//! # Type-to-Text Registry
//!
//! Maps an exact runtime type to the function that produces its canonical text. Lookup order:
//!
//! 1. The closed set of metadata [`Descriptor`]s, which render as qualified display names.
//! 2. The open registry, keyed by [`TypeId`] (exact type, not trait-based).
//!
//! A miss is not an error: the caller falls back to the structural serializer.
//!
//! Registry Invariant: there is one process-wide registry ([`type_text_registry`]). Registering
//! a type that already has a converter replaces it; reads and writes may happen from any
//! thread.

use std::any::{type_name, Any, TypeId};
use std::fmt::{self, Display};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use uuid::Uuid;

use crate::diagnostics::Result;
use crate::settings::VerifySettings;
use crate::xml::XmlDocument;

/// Converter signature. `settings` belongs to the current call and may be adjusted (for
/// example to force an extension).
pub type ToStringFn = Arc<dyn Fn(&dyn Any, &mut VerifySettings) -> Result<String> + Send + Sync>;

// =====================
// Descriptors
// =====================

/// Names a Rust type for display, with module paths stripped from every segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TypeDescriptor {
    full_name: String,
}

impl TypeDescriptor {
    pub fn of<T: ?Sized>() -> Self {
        Self {
            full_name: type_name::<T>().to_string(),
        }
    }

    pub fn named(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
        }
    }

    /// `alloc::vec::Vec<alloc::string::String>` becomes `Vec<String>`.
    pub fn display_name(&self) -> String {
        simplify_type_name(&self.full_name)
    }
}

/// Metadata about a program element. Converted to a qualified display name rather than dumped
/// structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Descriptor {
    Type(TypeDescriptor),
    Field {
        declaring: TypeDescriptor,
        name: String,
    },
    Property {
        declaring: TypeDescriptor,
        name: String,
    },
    Method {
        declaring: TypeDescriptor,
        name: String,
        parameters: Vec<TypeDescriptor>,
    },
    Constructor {
        declaring: TypeDescriptor,
        parameters: Vec<TypeDescriptor>,
    },
    Parameter {
        ty: TypeDescriptor,
        name: String,
    },
}

impl Descriptor {
    pub fn display_name(&self) -> String {
        match self {
            Descriptor::Type(ty) => ty.display_name(),
            Descriptor::Field { declaring, name } | Descriptor::Property { declaring, name } => {
                format!("{}.{}", declaring.display_name(), name)
            }
            Descriptor::Method {
                declaring,
                name,
                parameters,
            } => format!(
                "{}.{}({})",
                declaring.display_name(),
                name,
                join_types(parameters)
            ),
            Descriptor::Constructor {
                declaring,
                parameters,
            } => {
                let declaring = declaring.display_name();
                format!("{declaring}.{declaring}({})", join_types(parameters))
            }
            Descriptor::Parameter { ty, name } => format!("{} {}", ty.display_name(), name),
        }
    }
}

impl Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

fn join_types(types: &[TypeDescriptor]) -> String {
    types
        .iter()
        .map(TypeDescriptor::display_name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Strips the module path of every path segment in a `std::any::type_name` string.
pub fn simplify_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    let flush = |segment: &mut String, out: &mut String| {
        let short = segment.rsplit("::").next().unwrap_or_default();
        out.push_str(short);
        segment.clear();
    };
    for c in full.chars() {
        match c {
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' | '*' => {
                flush(&mut segment, &mut out);
                out.push(c);
            }
            _ => segment.push(c),
        }
    }
    flush(&mut segment, &mut out);
    out
}

// =====================
// Registry
// =====================

/// Concurrent map from exact type to converter.
pub struct TypeTextRegistry {
    converters: DashMap<TypeId, ToStringFn>,
}

impl fmt::Debug for TypeTextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeTextRegistry")
            .field("converters", &self.converters.len())
            .finish()
    }
}

impl Default for TypeTextRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TypeTextRegistry {
    /// An empty registry, without the built-in converters.
    pub fn empty() -> Self {
        Self {
            converters: DashMap::new(),
        }
    }

    /// A registry with every built-in converter installed.
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        register_builtins(&registry);
        registry
    }

    /// Installs (or replaces) the converter for exactly `T`.
    pub fn register<T, F>(&self, f: F)
    where
        T: Any,
        F: Fn(&T, &mut VerifySettings) -> Result<String> + Send + Sync + 'static,
    {
        let erased: ToStringFn = Arc::new(
            move |value: &dyn Any, settings: &mut VerifySettings| -> Result<String> {
                match value.downcast_ref::<T>() {
                    Some(value) => f(value, settings),
                    None => Err(crate::err_msg!(
                        Conversion,
                        "converter for {} received a value of another type",
                        type_name::<T>()
                    )),
                }
            },
        );
        self.converters.insert(TypeId::of::<T>(), erased);
    }

    /// Registers `T`'s `Display` output as its canonical text.
    pub fn treat_as_string<T: Any + Display>(&self) {
        self.register::<T, _>(|value, _| Ok(value.to_string()));
    }

    pub fn unregister<T: Any>(&self) -> bool {
        self.converters.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.converters.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Converts `value` if a descriptor case or a registered converter applies.
    ///
    /// Returns `None` on a miss. A converter failure is returned unmodified.
    pub fn try_convert(
        &self,
        value: &dyn Any,
        settings: &mut VerifySettings,
    ) -> Option<Result<String>> {
        if let Some(descriptor) = value.downcast_ref::<Descriptor>() {
            return Some(Ok(descriptor.display_name()));
        }
        if let Some(ty) = value.downcast_ref::<TypeDescriptor>() {
            return Some(Ok(ty.display_name()));
        }
        // Clone out of the shard so a converter may itself touch the registry.
        let converter = self
            .converters
            .get(&value.type_id())
            .map(|entry| Arc::clone(entry.value()))?;
        Some(converter(value, settings))
    }
}

static REGISTRY: Lazy<TypeTextRegistry> = Lazy::new(TypeTextRegistry::with_defaults);

/// The process-wide registry.
pub fn type_text_registry() -> &'static TypeTextRegistry {
    &REGISTRY
}

/// Registers a converter for exactly `T` in the process-wide registry.
pub fn register<T, F>(f: F)
where
    T: Any,
    F: Fn(&T, &mut VerifySettings) -> Result<String> + Send + Sync + 'static,
{
    REGISTRY.register::<T, F>(f);
}

/// Registers `T`'s `Display` output in the process-wide registry.
pub fn treat_as_string<T: Any + Display>() {
    REGISTRY.treat_as_string::<T>();
}

// =====================
// Built-in converters
// =====================

fn register_builtins(registry: &TypeTextRegistry) {
    registry.register::<String, _>(|v, _| Ok(v.clone()));
    registry.register::<&'static str, _>(|v, _| Ok(v.to_string()));
    registry.register::<char, _>(|v, _| Ok(v.to_string()));
    registry.treat_as_string::<bool>();
    registry.treat_as_string::<i8>();
    registry.treat_as_string::<i16>();
    registry.treat_as_string::<i32>();
    registry.treat_as_string::<i64>();
    registry.treat_as_string::<i128>();
    registry.treat_as_string::<isize>();
    registry.treat_as_string::<u8>();
    registry.treat_as_string::<u16>();
    registry.treat_as_string::<u32>();
    registry.treat_as_string::<u64>();
    registry.treat_as_string::<u128>();
    registry.treat_as_string::<usize>();
    registry.register::<f32, _>(|v, _| Ok(format_float(*v as f64, v.to_string())));
    registry.register::<f64, _>(|v, _| Ok(format_float(*v, v.to_string())));
    registry.register::<Uuid, _>(|v, _| Ok(v.hyphenated().to_string()));
    registry.register::<DateTime<Utc>, _>(|v, _| Ok(format_date_time_offset(v)));
    registry.register::<DateTime<FixedOffset>, _>(|v, _| Ok(format_date_time_offset(v)));
    registry.register::<NaiveDateTime, _>(|v, _| Ok(format_naive_date_time(v)));
    registry.register::<NaiveDate, _>(|v, _| Ok(v.format("%Y-%m-%d").to_string()));
    registry.register::<XmlDocument, _>(|v, settings| {
        let text = v.canonical()?;
        settings.use_extension("xml");
        Ok(text)
    });
}

/// Shortest round-trip text for finite values; fixed tokens otherwise.
/// `shortest` is the type's own `Display` output, which never rounds.
pub(crate) fn format_float(value: f64, shortest: String) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let token = if value > 0.0 { "Infinity" } else { "-Infinity" };
        token.to_string()
    } else {
        shortest
    }
}

/// `yyyy-MM-ddTHH:mm:ss[.fffffff]`, fraction trimmed of trailing zeros.
pub fn format_naive_date_time(value: &NaiveDateTime) -> String {
    let mut text = value.format("%Y-%m-%dT%H:%M:%S").to_string();
    push_fraction(&mut text, value.nanosecond());
    text
}

/// `yyyy-MM-ddTHH:mm:ss[.fffffff]±HH:MM`.
pub fn format_date_time_offset<Tz: TimeZone>(value: &DateTime<Tz>) -> String {
    let mut text = format_naive_date_time(&value.naive_local());
    let offset = value.offset().fix();
    text.push_str(&offset.to_string());
    text
}

fn push_fraction(text: &mut String, nanos: u32) {
    // 100ns ticks, leap-second nanos folded into the last tick.
    let ticks = nanos.min(999_999_999) / 100;
    if ticks == 0 {
        return;
    }
    let fraction = format!("{ticks:07}");
    text.push('.');
    text.push_str(fraction.trim_end_matches('0'));
}
