//! Sportsbook identity and external-id mappings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sportsbook with a stable internal key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sportsbook {
    pub id: i32,
    pub canonical_name: String,
    /// Display metadata only; the id and canonical name never change
    pub display_name: Option<String>,
    pub abbreviation: Option<String>,
}

impl Sportsbook {
    pub fn new(id: i32, canonical_name: &str) -> Self {
        Self {
            id,
            canonical_name: canonical_name.to_string(),
            display_name: None,
            abbreviation: None,
        }
    }
}

/// Maps one external identifier from one source onto a sportsbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SportsbookMapping {
    pub source: String,
    /// External id or name as the source emits it, verbatim
    pub external_key: String,
    pub sportsbook_id: Option<i32>,
    /// Set when the mapping was created lazily and nothing matched
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
}

impl SportsbookMapping {
    pub fn resolved(source: &str, external_key: &str, sportsbook_id: i32) -> Self {
        Self {
            source: source.to_string(),
            external_key: external_key.to_string(),
            sportsbook_id: Some(sportsbook_id),
            needs_review: false,
            created_at: Utc::now(),
        }
    }

    pub fn pending_review(source: &str, external_key: &str) -> Self {
        Self {
            source: source.to_string(),
            external_key: external_key.to_string(),
            sportsbook_id: None,
            needs_review: true,
            created_at: Utc::now(),
        }
    }
}
