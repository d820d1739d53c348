//! # Serialization pipeline
//!
//! Turns an arbitrary value into snapshot text:
//!
//! 1. the [`TypeTextRegistry`] (descriptors first, then exact-type converters);
//! 2. a pre-built [`Value`] is rendered as is;
//! 3. anything else goes through the structural serde walk, then [`render`].
//!
//! Scrubbing is not part of this stage; the engine runs it over the produced text.

pub mod render;
pub mod structural;

use std::any::Any;

use serde::Serialize;

pub use render::{describe_binary, render, CYCLE_MARKER};
pub use structural::to_value;

use crate::diagnostics::Result;
use crate::registry::{type_text_registry, TypeTextRegistry};
use crate::settings::{serialization_settings, SerializationSettings, VerifySettings};
use crate::value::Value;

/// Serializes `value` using the process-wide registry and settings.
pub fn serialize<T: Serialize + Any>(value: &T, settings: &mut VerifySettings) -> Result<String> {
    serialize_with(
        value,
        settings,
        type_text_registry(),
        &serialization_settings(),
    )
}

/// Serializes `value` against an explicit registry and settings snapshot.
pub fn serialize_with<T: Serialize + Any>(
    value: &T,
    settings: &mut VerifySettings,
    registry: &TypeTextRegistry,
    global: &SerializationSettings,
) -> Result<String> {
    if let Some(text) = registry.try_convert(value, settings) {
        return text;
    }
    if let Some(prebuilt) = (value as &dyn Any).downcast_ref::<Value>() {
        return render(prebuilt, global);
    }
    render(&to_value(value)?, global)
}
