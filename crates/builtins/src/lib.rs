//! Builtins distribution client.
//!
//! Builtin operations (SQL queries, REST calls, emails, ...) are served
//! locally by a single platform-specific executable published to a public
//! storage bucket. [`BuiltinsClient`] keeps one copy of that executable in
//! the studio cache directory, checks it against the published checksum and
//! hands out the argv used to invoke it.

mod client;
mod config;
mod request;
mod store;

pub use client::BuiltinsClient;
pub use config::{
    BUILTINS_DIR_ENV, BuiltinsConfig, CHECKSUM_FILE_NAME, DEFAULT_BUCKET, DEFAULT_OBJECT_PREFIX,
    DEFAULT_STORAGE_BASE_URL, SUPPORTED_PLATFORMS, host_platform,
};
pub use request::{FunctionSpecification, is_builtin_task_slug, marshal_request, parse_builtin_slug, request_for_slug};
pub use store::{BinaryStore, GcsStore, StoredObject};
