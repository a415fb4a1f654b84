//! Login credential resolution for compute instances.
//!
//! Credentials for a running instance are derived from its image's default login
//! account and the private key of the key pair it was launched with, or from a
//! platform-specific deriver for windows instances. Results are memoized per instance
//! in a single-flight cache.

#![deny(missing_docs)]

pub mod credentials;
pub mod models;
pub mod stores;

pub use credentials::{CredentialsForInstance, InstanceCredentials};
pub use models::{Image, KeyPair, LoginCredentials, RegionAndName, RunningInstance};
pub use stores::{
    ImageStore, InMemoryKeyPairStore, KeyPairStore, LoadingImageStore, PlatformCredentialDeriver,
};

/// Convenient result alias that reuses the shared cumulus error type.
pub type Result<T> = cumulus_core::Result<T>;
