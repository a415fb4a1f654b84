//! Chef server client and cookbook listing strategies for cumulus.
//!
//! Provides typed cookbook models, an asynchronous client for the cookbook
//! endpoints, and a fan-out strategy listing every version of every cookbook.

#![deny(missing_docs)]

pub mod client;
pub mod models;
pub mod strategy;

pub use client::{ChefClient, ChefClientBuilder};
pub use models::{CookbookMetadata, CookbookVersion, Resource};
pub use strategy::ListCookbookVersions;

/// Convenient result alias that reuses the shared cumulus error type.
pub type Result<T> = cumulus_core::Result<T>;
