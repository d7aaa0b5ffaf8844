//! Small helpers shared across modules.

pub mod redact;

pub use redact::{fingerprint, truncate_body};
