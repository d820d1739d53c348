//! XML documents as snapshot content.
//!
//! An [`XmlDocument`] converts to re-indented XML (two spaces, surrounding text whitespace
//! trimmed) and forces the `xml` extension on the call that converts it.

use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use serde::Serialize;

use crate::diagnostics::Result;
use crate::err_cause;

/// XML source text to be verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XmlDocument {
    source: String,
}

impl XmlDocument {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Like [`XmlDocument::new`] but rejects malformed XML immediately.
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let document = Self::new(source);
        document.canonical()?;
        Ok(document)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Deterministic, indented rendering of the document.
    pub fn canonical(&self) -> Result<String> {
        let mut reader = Reader::from_str(&self.source);
        reader.trim_text(true);
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        loop {
            let event = match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(event) => event,
                Err(e) => {
                    return Err(err_cause!(
                        Conversion,
                        e,
                        "malformed XML near byte {}",
                        reader.buffer_position()
                    ))
                }
            };
            writer
                .write_event(event)
                .map_err(|e| err_cause!(Conversion, e, "failed to re-indent XML"))?;
        }
        String::from_utf8(writer.into_inner())
            .map_err(|e| err_cause!(Conversion, e, "re-indented XML is not UTF-8"))
    }
}
