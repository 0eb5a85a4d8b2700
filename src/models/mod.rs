//! Core data models for the file access proxy.
//!
//! These describe what the proxy knows about a stored file (its head and
//! access policy) and the shapes of upload and range requests.

pub mod object;
pub mod policy;
pub mod range;
pub mod upload;
