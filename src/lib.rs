pub use crate::diagnostics::{ErrorType, Result, VerifyError};
pub use crate::engine::{SnapshotStatus, TargetOutcome, Verifier, VerifyResult};
pub use crate::naming::{Parameter, PathInfo, TestIdentity};
pub use crate::registry::{Descriptor, TypeDescriptor};
pub use crate::report::SnapshotFailure;
pub use crate::scrubber::ScrubRule;
pub use crate::settings::{MemberOrder, SerializationSettings, VerifySettings};
pub use crate::target::{Target, TargetData};
pub use crate::tree::TreeOptions;
pub use crate::value::Value;
pub use crate::xml::XmlDocument;

pub mod diagnostics;
pub mod engine;
pub mod naming;
pub mod registry;
pub mod report;
pub mod scrubber;
pub mod serialization;
pub mod settings;
pub mod target;
pub mod tree;
pub mod value;
pub mod xml;
