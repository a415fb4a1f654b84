//! Compute models used by credential resolution.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Region-qualified name of a key pair or image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionAndName {
    /// Region the resource lives in.
    pub region: String,
    /// Name or identifier within the region.
    pub name: String,
}

impl RegionAndName {
    /// Create a key.
    #[must_use]
    pub fn new(region: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RegionAndName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.name)
    }
}

/// A running compute instance, as far as credential resolution is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningInstance {
    /// Instance identifier.
    pub id: String,
    /// Region the instance runs in.
    pub region: String,
    /// Image the instance was launched from.
    pub image_id: String,
    /// Key pair the instance was launched with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    /// Platform tag, e.g. `windows`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl RunningInstance {
    /// Create an instance without key pair or platform.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        region: impl Into<String>,
        image_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            region: region.into(),
            image_id: image_id.into(),
            key_name: None,
            platform: None,
        }
    }

    /// Set the key pair name.
    #[must_use]
    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = Some(key_name.into());
        self
    }

    /// Set the platform tag.
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Key addressing this instance's image.
    #[must_use]
    pub fn image_key(&self) -> RegionAndName {
        RegionAndName::new(&self.region, &self.image_id)
    }

    /// Key addressing this instance's key pair, if it has one. An empty name counts as none.
    #[must_use]
    pub fn key_pair_key(&self) -> Option<RegionAndName> {
        self.key_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(|name| RegionAndName::new(&self.region, name))
    }
}

/// A key pair and, when known, its private key material.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// Region the key pair belongs to.
    pub region: String,
    /// Key pair name.
    pub key_name: String,
    /// Public key fingerprint.
    pub key_fingerprint: String,
    /// Private key material; only known for key pairs created by this process.
    pub key_material: Option<SecretString>,
}

impl KeyPair {
    /// Create a key pair with private key material.
    #[must_use]
    pub fn new(
        region: impl Into<String>,
        key_name: impl Into<String>,
        key_fingerprint: impl Into<String>,
        key_material: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            key_name: key_name.into(),
            key_fingerprint: key_fingerprint.into(),
            key_material: Some(SecretString::from(key_material.into())),
        }
    }

    /// Key addressing this key pair.
    #[must_use]
    pub fn key(&self) -> RegionAndName {
        RegionAndName::new(&self.region, &self.key_name)
    }
}

/// Image metadata needed to log in to instances launched from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Image identifier.
    pub id: String,
    /// Region the image lives in.
    pub region: String,
    /// Account to log in as by default.
    pub default_login_user: String,
}

/// Credentials for logging in to an instance.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    /// Login account.
    pub user: String,
    /// Password, when the platform uses one.
    pub password: Option<SecretString>,
    /// Private key, when known.
    pub private_key: Option<SecretString>,
}

impl LoginCredentials {
    /// Credentials carrying only a login account.
    #[must_use]
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: None,
            private_key: None,
        }
    }

    /// Set the password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Set or clear the private key.
    #[must_use]
    pub fn with_private_key(mut self, private_key: Option<SecretString>) -> Self {
        self.private_key = private_key;
        self
    }

    /// Exposed private key, for handing to an SSH client.
    #[must_use]
    pub fn expose_private_key(&self) -> Option<&str> {
        self.private_key.as_ref().map(|secret| secret.expose_secret())
    }

    /// Exposed password.
    #[must_use]
    pub fn expose_password(&self) -> Option<&str> {
        self.password.as_ref().map(|secret| secret.expose_secret())
    }
}
