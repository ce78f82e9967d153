//! Per-run duplicate suppression
//!
//! The key set lives for one job only and is never persisted; duplicates
//! across jobs are not detected.

use std::collections::HashSet;

use super::models::TargetEntity;

#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

fn fold(value: Option<&str>) -> String {
    value
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier when present, otherwise a composite of name and postal code
    pub fn key_for(entity: &TargetEntity) -> String {
        match entity {
            TargetEntity::Provider(p) => match p.npi.as_deref() {
                Some(npi) => format!("npi:{}", npi),
                None => format!(
                    "provider:{}|{}|{}",
                    fold(p.first_name.as_deref()),
                    fold(p.last_name.as_deref()),
                    fold(p.postal_code.as_deref())
                ),
            },
            TargetEntity::Organization(o) => format!(
                "organization:{}|{}",
                fold(Some(&o.name)),
                fold(o.postal_code.as_deref())
            ),
        }
    }

    /// `true` the first time a key is seen, `false` for every repeat
    pub fn admit(&mut self, entity: &TargetEntity) -> bool {
        self.seen.insert(Self::key_for(entity))
    }
}
