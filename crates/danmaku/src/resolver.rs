//! Checksum → identity table.
//!
//! Archives that obfuscate the sender publish `crc32(uid)` instead of the
//! uid and drop the name. Whenever a merge pairs such a message with one
//! from a recorder that kept the real identity, the link is remembered here
//! so later runs can resolve the checksum directly while parsing.
//!
//! The table is not guaranteed to be injective: two users whose ids share a
//! checksum overwrite each other (last write wins).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// A resolved identity. Serialized as `[true_id, display_name]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ResolvedIdentity {
    pub true_id: String,
    pub display_name: String,
}

impl From<(String, String)> for ResolvedIdentity {
    fn from((true_id, display_name): (String, String)) -> Self {
        Self {
            true_id,
            display_name,
        }
    }
}

impl From<ResolvedIdentity> for (String, String) {
    fn from(identity: ResolvedIdentity) -> Self {
        (identity.true_id, identity.display_name)
    }
}

/// A newly discovered checksum → identity link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityLink {
    pub checksum: String,
    pub identity: ResolvedIdentity,
}

/// Persisted mapping from identity checksums to resolved identities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityResolver {
    entries: BTreeMap<String, ResolvedIdentity>,
}

impl IdentityResolver {
    /// Load the table from a JSON file. A missing file yields an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            debug!("Identity table {} not found, starting empty", path.display());
            return Ok(Self::default());
        }
        let bytes = fs::read(path)?;
        let resolver: Self = serde_json::from_slice(&bytes)?;
        debug!(
            "Loaded {} identities from {}",
            resolver.len(),
            path.display()
        );
        Ok(resolver)
    }

    /// Like [`Self::load`], but a corrupt or unreadable table is treated as empty.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!(
                "Ignoring unreadable identity table {}: {e}",
                path.display()
            );
            Self::default()
        })
    }

    /// Write the table as JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec(self)?)?;
        debug!("Saved {} identities to {}", self.len(), path.display());
        Ok(())
    }

    pub fn lookup(&self, checksum: &str) -> Option<&ResolvedIdentity> {
        self.entries.get(checksum)
    }

    /// Insert or overwrite a mapping, returning the previous one.
    pub fn record(
        &mut self,
        checksum: impl Into<String>,
        true_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Option<ResolvedIdentity> {
        self.entries.insert(
            checksum.into(),
            ResolvedIdentity {
                true_id: true_id.into(),
                display_name: display_name.into(),
            },
        )
    }

    /// Apply a link found while merging.
    pub fn apply(&mut self, link: IdentityLink) -> Option<ResolvedIdentity> {
        self.entries.insert(link.checksum, link.identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedIdentity)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
