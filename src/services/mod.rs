//! Storage access, policy evaluation and background maintenance.

pub mod blob_store;
pub mod metadata_cache;
pub mod object_store_backend;
pub mod policy;
pub mod proxy_service;
pub mod sweeper;
