//! Type mapping registry.
//!
//! Static tables relating serialized field kinds, native storage types and
//! query engine types, plus the native type string parser they share.

mod native;
mod registry;

pub use native::{NativeType, NativeTypeError, TypeArg};
pub use registry::{QueryType, SerializedFieldType, UnknownTypeError, QUERY_TYPES, STORAGE_TYPES};
