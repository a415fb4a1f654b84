//! Virtual datacenter task management for cumulus.
//!
//! Provides task models, and an asynchronous client that lists, fetches and
//! cancels tasks. Error responses are decoded into [`DirectorError`] objects
//! carried by [`cumulus_core::Error::ProviderError`].

#![deny(missing_docs)]

pub mod client;
pub mod models;

pub use client::{DirectorClient, DirectorClientBuilder, VCLOUD_TOKEN_HEADER};
pub use models::{DirectorError, Reference, Task, TaskStatus, TasksList};

/// Convenient result alias that reuses the shared cumulus error type.
pub type Result<T> = cumulus_core::Result<T>;
