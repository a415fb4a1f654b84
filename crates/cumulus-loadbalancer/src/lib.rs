//! Load balancer connection management for cumulus.
//!
//! Provides the connection throttle and connection logging operations of a
//! load balancer service, with the provider's not-found responses mapped to
//! absent values instead of errors.

#![deny(missing_docs)]

pub mod client;
pub mod models;

pub use client::{LoadBalancerClient, LoadBalancerClientBuilder};
pub use models::ConnectionThrottle;

/// Convenient result alias that reuses the shared cumulus error type.
pub type Result<T> = cumulus_core::Result<T>;
