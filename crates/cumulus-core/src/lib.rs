//! # cumulus-core
//!
//! Invocation and resolution engine shared by cumulus provider bindings.
//!
//! Every provider operation is described once as an immutable [`OperationDescriptor`].
//! An [`ApiClient`] binds runtime [`Arguments`] to a descriptor, dispatches the request,
//! and resolves the response into a value, substituting declared fallbacks for
//! anticipated error statuses.
//!
//! ## Modules
//!
//! - [`descriptor`] - Operation descriptors, extraction rules, and media types
//! - [`request`] - Argument binding, request synthesis, and request filters
//! - [`transport`] - Dispatchers, cancellation, and opt-in retries
//! - [`response`] - Response extraction and domain parsing
//! - [`fallback`] - Fallback policies for anticipated error responses
//! - [`client`] - The invocation facade, HTTP client settings, and retry policy
//! - [`config`] - Provider configuration with validation
//! - [`cache`] - Single-flight resolution cache and cache loaders
//! - [`fanout`] - Concurrent fan-out listing over a bounded worker pool
//! - [`error`] - Error types

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod client;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod fallback;
pub mod fanout;
pub mod request;
pub mod response;
pub mod transport;

// Re-export commonly used types
pub use cache::{CacheLoader, CacheStats, LoadingCache, ResolutionCache};
pub use client::{ApiClient, ApiClientBuilder, ClientConfig, RetryPolicy};
pub use config::ProviderConfig;
pub use descriptor::{ExtractionRule, MediaType, OperationDescriptor};
pub use error::{Error, Result};
pub use fallback::{FallbackKind, FallbackPolicy};
pub use fanout::{fan_out, fan_out_partial, PartialListing, WorkerPool};
pub use request::{Arguments, RequestFilter};
pub use response::Resolved;
