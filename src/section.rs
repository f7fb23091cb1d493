//! Known Codex API sections and their per-section rules.
//!
//! Every section is fetched and persisted independently. Two rules vary by
//! section:
//! - how a record's identity is derived ([`IdentityRule`])
//! - how long a single page request may take ([`Section::request_timeout`])

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-request timeout for page fetches (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the slow `npcs` section (60 seconds).
const NPCS_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A named category of remote data.
///
/// The wire name (used in URLs, the database `section` column and output file
/// names) is the kebab-case form, e.g. `hunting-creatures`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
    Items,
    Mobs,
    HuntingCreatures,
    Npcs,
    Pois,
    StatusEffects,
}

/// How the identity of a record in a section is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRule {
    /// Identity is the record's `_slug` field and nothing else.
    Slug,
    /// Identity is the first non-empty of `guid`, `_id`, `displayName`.
    IdChain,
}

/// Returned when a section name is not one of the known sections.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown section '{name}' (known: {known})", known = Section::known_names())]
pub struct UnknownSection {
    /// The rejected name.
    pub name: String,
}

impl Section {
    /// All known sections in their default scrape order.
    pub const ALL: [Section; 6] = [
        Section::Items,
        Section::Mobs,
        Section::HuntingCreatures,
        Section::Npcs,
        Section::Pois,
        Section::StatusEffects,
    ];

    /// Returns the kebab-case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Items => "items",
            Self::Mobs => "mobs",
            Self::HuntingCreatures => "hunting-creatures",
            Self::Npcs => "npcs",
            Self::Pois => "pois",
            Self::StatusEffects => "status-effects",
        }
    }

    /// Returns the identity derivation rule for this section.
    #[must_use]
    pub fn identity_rule(self) -> IdentityRule {
        match self {
            Self::Mobs | Self::HuntingCreatures => IdentityRule::Slug,
            Self::Items | Self::Npcs | Self::Pois | Self::StatusEffects => IdentityRule::IdChain,
        }
    }

    /// Returns the section-specific timeout override, if any.
    #[must_use]
    pub fn timeout_override(self) -> Option<Duration> {
        match self {
            Self::Npcs => Some(NPCS_REQUEST_TIMEOUT),
            _ => None,
        }
    }

    /// Returns the effective per-request timeout given a default.
    #[must_use]
    pub fn request_timeout(self, default: Duration) -> Duration {
        self.timeout_override().unwrap_or(default)
    }

    fn known_names() -> String {
        Self::ALL
            .iter()
            .map(|section| section.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = UnknownSection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|section| section.as_str() == name)
            .ok_or_else(|| UnknownSection {
                name: name.to_string(),
            })
    }
}
