//! Record identity resolution and the canonical persisted envelope.
//!
//! The remote API returns section-specific JSON objects. Before persistence
//! every object is given a `guid` and a `section` field and wrapped in an
//! [`Envelope`], so consumers reading either the envelope or the raw `data`
//! see the same identity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::section::{IdentityRule, Section};

/// Reserved key the resolved guid is written back under.
pub const GUID_KEY: &str = "guid";

/// Reserved key the section name is written back under.
pub const SECTION_KEY: &str = "section";

/// Identity field for slug-identified sections.
const SLUG_KEY: &str = "_slug";

/// Fallback identity fields for every other section, in priority order.
const ID_CHAIN: [&str; 3] = [GUID_KEY, "_id", "displayName"];

/// One raw item as returned by the remote API.
pub type RawRecord = Map<String, Value>;

/// The normalized `{guid, section, data}` unit handed to a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Stable identifier; empty when the record carried no usable identity.
    pub guid: String,
    /// Section the record belongs to.
    pub section: Section,
    /// The raw record, with `guid` and `section` mirrored into it.
    pub data: RawRecord,
}

impl Envelope {
    /// Resolves the record's identity and wraps it.
    ///
    /// The resolved guid and the section name are written into `record`
    /// before wrapping, overwriting any existing `guid`/`section` keys.
    #[must_use]
    pub fn wrap(section: Section, mut record: RawRecord) -> Self {
        let guid = resolve(section, &record);
        record.insert(GUID_KEY.to_string(), Value::String(guid.clone()));
        record.insert(
            SECTION_KEY.to_string(),
            Value::String(section.as_str().to_string()),
        );
        Self {
            guid,
            section,
            data: record,
        }
    }

    /// Returns true when no identity could be derived for the record.
    #[must_use]
    pub fn is_missing_guid(&self) -> bool {
        self.guid.is_empty()
    }
}

/// Derives the guid for a record according to the section's identity rule.
///
/// Slug-identified sections use `_slug` only and are never backfilled from
/// other fields. Other sections take the first non-empty of `guid`, `_id`,
/// `displayName`. Returns an empty string when nothing qualifies.
#[must_use]
pub fn resolve(section: Section, record: &RawRecord) -> String {
    match section.identity_rule() {
        IdentityRule::Slug => identity_text(record.get(SLUG_KEY)).unwrap_or_default(),
        IdentityRule::IdChain => ID_CHAIN
            .iter()
            .find_map(|key| identity_text(record.get(*key)))
            .unwrap_or_default(),
    }
}

// Strings as-is, numbers and booleans as their JSON text. Everything else,
// including "", is absent.
fn identity_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
