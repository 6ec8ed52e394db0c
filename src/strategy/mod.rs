//! Pluggable strategy families that absorb provider differences.
//!
//! Each family is a closed enum built from a serde settings value whose `type` tag is
//! parsed leniently: unknown tags fall back to the OpenAI-compatible (or bearer) variant
//! rather than failing. Function-valued custom strategies can only be supplied from code.

pub mod auth;
pub mod request;
pub mod response;

pub use auth::{AuthKind, AuthSettings, AuthStrategy, AuthTransform};
pub use request::{FormatFn, RequestFormatter, RequestKind, RequestSettings};
pub use response::{FullResponseFn, ResponseKind, ResponseParser, ResponseSettings, StreamChunkFn};

/// Normalizes a `type` tag before matching: lower case, `-` and `_` treated alike.
pub(crate) fn normalize_tag(tag: &str) -> String {
    tag.trim().to_ascii_lowercase().replace('-', "_")
}
