//! Extension manifests
//!
//! A manifest is the serializable catalog of the extensions available in one
//! direction and the settings each declares. UIs and the command builder
//! consume it; the JSON form is a stable exchange contract:
//!
//! ```json
//! {
//!   "appVersion": "0.1.0",
//!   "extensions": [
//!     {
//!       "name": "JSON-File",
//!       "direction": "Source",
//!       "version": "0.1.0",
//!       "assemblyOrModuleRef": "parser:JSON+source:File",
//!       "settings": [{"name": "FilePath", "type": "String", "isRequired": true, ...}]
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::Result;
use crate::settings::SettingProperty;

/// Which end of a migration an extension serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// Produces records
    Source,
    /// Consumes records
    Sink,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Source => f.write_str("source"),
            Direction::Sink => f.write_str("sink"),
        }
    }
}

/// One discovered extension and its settings schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifestItem {
    /// Unique (case-insensitive) lookup key within the direction
    pub name: String,

    /// Direction this extension serves
    pub direction: Direction,

    /// Extension version
    #[serde(default)]
    pub version: Option<String>,

    /// Where the implementation comes from (module path or composition)
    #[serde(default, rename = "assemblyOrModuleRef")]
    pub module_ref: Option<String>,

    /// Declared settings in declaration order
    #[serde(default)]
    pub settings: Vec<SettingProperty>,
}

/// Catalog of extensions for one direction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    /// Version of the application that built the manifest
    pub app_version: String,

    /// Extensions, sorted by name
    #[serde(default)]
    pub extensions: Vec<ExtensionManifestItem>,
}

impl ExtensionManifest {
    /// The "not yet loaded" sentinel
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when this manifest equals [`ExtensionManifest::empty`]
    pub fn is_empty_sentinel(&self) -> bool {
        *self == Self::empty()
    }

    /// Find an extension by name (case-insensitive)
    pub fn find(&self, name: &str) -> Option<&ExtensionManifestItem> {
        self.extensions
            .iter()
            .find(|item| item.name.eq_ignore_ascii_case(name))
    }

    /// Settings schema for `name`; empty when the name is unknown
    pub fn extension_settings(&self, name: &str) -> Vec<SettingProperty> {
        self.find(name)
            .map(|item| item.settings.clone())
            .unwrap_or_default()
    }

    /// Names of all extensions in manifest order
    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|item| item.name.as_str()).collect()
    }

    /// Pretty JSON form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse the JSON form
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// SHA-256 of the serialized manifest, hex encoded
    ///
    /// Identical plugin sets always produce identical fingerprints.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// Source and sink extensions side by side, as presented to a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedManifest {
    /// Source-direction items
    pub sources: Vec<ExtensionManifestItem>,
    /// Sink-direction items
    pub sinks: Vec<ExtensionManifestItem>,
}

/// Merge two manifests by direction without touching either input
///
/// Items are routed by their own `direction`, so a manifest that carries
/// both kinds is split correctly.
pub fn combine(
    source_manifest: &ExtensionManifest,
    sink_manifest: &ExtensionManifest,
) -> CombinedManifest {
    let (sources, sinks): (Vec<_>, Vec<_>) = source_manifest
        .extensions
        .iter()
        .chain(sink_manifest.extensions.iter())
        .cloned()
        .partition(|item| item.direction == Direction::Source);
    CombinedManifest { sources, sinks }
}
