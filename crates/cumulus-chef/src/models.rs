//! Cookbook models as returned by the Chef server.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A file belonging to a cookbook version (recipe, template, attribute file, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    /// File name.
    pub name: String,
    /// Path within the cookbook.
    pub path: String,
    /// Content checksum.
    pub checksum: String,
    /// Platform or host specificity.
    #[serde(default)]
    pub specificity: String,
    /// Download URL, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Cookbook metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CookbookMetadata {
    /// Cookbook name.
    #[serde(default)]
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Maintainer name.
    #[serde(default)]
    pub maintainer: String,
    /// License name.
    #[serde(default)]
    pub license: String,
    /// Cookbook dependencies and their version constraints.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// One version of a cookbook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CookbookVersion {
    /// Cookbook name.
    pub cookbook_name: String,
    /// Combined name and version, e.g. `apache2-5.1.0`.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Whether the version is frozen against updates.
    #[serde(rename = "frozen?", default)]
    pub frozen: bool,
    /// Cookbook metadata.
    #[serde(default)]
    pub metadata: CookbookMetadata,
    /// Recipe files.
    #[serde(default)]
    pub recipes: Vec<Resource>,
    /// Attribute files.
    #[serde(default)]
    pub attributes: Vec<Resource>,
    /// Template files.
    #[serde(default)]
    pub templates: Vec<Resource>,
}
