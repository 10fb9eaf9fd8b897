#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod codec;
pub mod dispatch;
pub mod spec;

pub use codec::{json_codec, JsonCodec, ToolCodec};
pub use dispatch::{
    render_preview, strip_artifacts, transcript_duplicate, Dispatcher, Prepared, PreparedCall,
    ARTIFACTS_FIELD, BOUNDED_FIELD,
};
pub use spec::{
    IdempotencyMode, InlineToolExecutor, RegistryError, ToolExecutor, ToolSpec, ToolsetBackend,
    ToolsetRegistration, ToolsetRegistry,
};
