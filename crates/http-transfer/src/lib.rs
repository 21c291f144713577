//! Multipart HTTP transport.
//!
//! [`HttpTransport`] implements [`upkit_upload::Transport`] on top of
//! `reqwest`: extra fields and the file are sent as `multipart/form-data`,
//! the file body is streamed from memory or disk, and progress is reported
//! as chunks are handed to the connection.

mod body;
mod client;

pub use client::HttpTransport;

/// Default read size of the streamed file body: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
