//! Core library modules for isofetch
//!
//! This module contains the internal implementation details of the isofetch library.

pub mod cache;
pub mod checkpoint;
pub mod downloader;
pub mod error;
pub mod finalize;
pub mod mirror;
pub mod pipeline;
pub mod probe;
pub mod resolver;
pub mod source;
pub mod stream;
pub mod transfer;
pub mod validate;

// Re-export main types for internal use
pub use downloader::{ClientConfig, Downloader};
pub use source::{resolve_output_filename, resolve_source, SourceEntry};
