//! Data-access hooks
//!
//! Reads go through the shared [`QueryCache`](crate::cache::QueryCache);
//! each mutation invalidates the tags whose cached results it could change.

pub mod auth;
pub mod items;

pub use auth::{AuthHooks, SignUpOutcome, Viewer};
pub use items::{image_file_name, Items};
