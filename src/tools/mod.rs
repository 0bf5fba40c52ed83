//! Build-time utilities shipped alongside the compiler.

pub mod headers;

pub use headers::{inline_headers, HeaderError, HeaderInliner};
