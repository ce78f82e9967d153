//! Target entities produced by the transformer
//!
//! These are normalized records ready for the `providers` and
//! `organizations` tables.

use serde::{Deserialize, Serialize};

/// An individual or organizational provider listing
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Ten-digit national provider identifier
    pub npi: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: String,
    pub credential: Option<String>,
    pub organization_name: Option<String>,
    /// Classification code as supplied
    pub taxonomy_code: Option<String>,
    /// Human-readable label for `taxonomy_code`
    pub specialty: Option<String>,
    pub category: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    /// Two-letter, upper case
    pub state: Option<String>,
    /// At most five characters
    pub postal_code: Option<String>,
    /// Digits only
    pub phone: Option<String>,
}

/// A facility or practice
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub name: String,
    pub category: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

/// A validated record ready for persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetEntity {
    Provider(ProviderRecord),
    Organization(OrganizationRecord),
}

