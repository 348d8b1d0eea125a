//! Secret handling.
//!
//! Database URLs, mail API keys and webhook signing secrets are all held as
//! `SecretString`; these re-exports keep call sites on one import path.

pub use secrecy::{ExposeSecret, SecretString};
