//! Policy-governed file delivery in front of an S3-compatible blob store.
//!
//! Files are uploaded with an access policy (expiration, password or both)
//! stored as object metadata. Reads are checked against that policy before a
//! single byte is streamed, whole or as one byte range. A background sweeper
//! deletes expired files.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
