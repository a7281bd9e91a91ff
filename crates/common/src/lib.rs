//! The `impl_context!` helper shared by every conduit crate's error module.

pub mod error;

pub use error::FromMessage;
