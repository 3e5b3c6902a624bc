//! REST directory backend.
//!
//! Implements the directory capability traits against an identity
//! provider's admin REST API, authenticating with the OAuth2 client
//! credentials flow. This is the only crate that knows about HTTP; the
//! engine sees nothing but the traits.

pub mod client;
pub mod config;
mod wire;

pub use client::RestDirectory;
pub use config::{RestDirectoryConfig, RestDirectoryConfigError};
