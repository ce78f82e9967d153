//! Row classification
//!
//! A [`Transformer`] turns each [`RawRecord`] into exactly one [`Outcome`]:
//! a normalized entity, a silent skip, or a rejection carrying one
//! [`ValidationError`] per violated rule. Classification is pure: the same
//! record, profile and reference data always give the same outcome.
//!
//! Two profiles exist:
//! - **registry**: national registry extract layout, filtered by the
//!   classification allow-list
//! - **generic**: user uploads with loosely named columns, validated against
//!   the target collection's rules

use roster_common::types::{JobKind, TargetCollection, ValidationError};
use std::sync::Arc;

use super::decoder::{Header, RawRecord};
use super::models::{OrganizationRecord, ProviderRecord, TargetEntity};
use super::reference::ReferenceData;
use super::{ImportError, Result};

/// Classification codes per registry record
pub const REGISTRY_TAXONOMY_SLOTS: usize = 15;

mod registry {
    pub const NPI: &str = "NPI";
    pub const ENTITY_TYPE: &str = "Entity Type Code";
    pub const ORGANIZATION_NAME: &str = "Provider Organization Name (Legal Business Name)";
    pub const LAST_NAME: &str = "Provider Last Name (Legal Name)";
    pub const FIRST_NAME: &str = "Provider First Name";
    pub const CREDENTIAL: &str = "Provider Credential Text";
    pub const ADDRESS: &str = "Provider First Line Business Practice Location Address";
    pub const CITY: &str = "Provider Business Practice Location Address City Name";
    pub const STATE: &str = "Provider Business Practice Location Address State Name";
    pub const POSTAL_CODE: &str = "Provider Business Practice Location Address Postal Code";
    pub const PHONE: &str = "Provider Business Practice Location Address Telephone Number";
    pub const TAXONOMY_PREFIX: &str = "Healthcare Provider Taxonomy Code_";
    pub const FIRST_TAXONOMY: &str = "Healthcare Provider Taxonomy Code_1";

    /// Entity type code of an organization record
    pub const ORGANIZATION_ENTITY: &str = "2";
}

/// Accepted column names per field of a generic upload
mod aliases {
    pub const FIRST_NAME: &[&str] = &["first_name", "firstname", "first", "given_name"];
    pub const LAST_NAME: &[&str] = &["last_name", "lastname", "last", "surname", "family_name"];
    pub const DISPLAY_NAME: &[&str] = &["display_name", "full_name", "name"];
    pub const CREDENTIAL: &[&str] = &["credential", "credentials", "suffix"];
    pub const NPI: &[&str] = &["npi"];
    pub const TAXONOMY_CODE: &[&str] = &["taxonomy_code", "taxonomy", "specialty_code"];
    pub const SPECIALTY: &[&str] = &["specialty"];
    pub const CATEGORY: &[&str] = &["category", "type", "organization_type"];
    pub const PROVIDER_ORGANIZATION: &[&str] = &["organization_name", "organization", "practice_name"];
    pub const ORGANIZATION_NAME: &[&str] = &["name", "organization_name", "organization", "business_name"];
    pub const ADDRESS: &[&str] = &["address", "street", "address_line_1", "address1"];
    pub const CITY: &[&str] = &["city"];
    pub const STATE: &[&str] = &["state", "st"];
    pub const POSTAL_CODE: &[&str] = &["postal_code", "zip", "zip_code", "postcode"];
    pub const PHONE: &[&str] = &["phone", "telephone", "phone_number"];
    pub const WEBSITE: &[&str] = &["website", "url"];
}

/// What happens to one decoded row
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Valid and normalized, ready to write
    Entity(TargetEntity),
    /// Outside the job's filter; counted as processed only
    Skip,
    /// Failed validation, with every violation found
    Reject(Vec<ValidationError>),
}

/// Per-job classifier
#[derive(Debug, Clone)]
pub struct Transformer {
    kind: JobKind,
    target: TargetCollection,
    reference: Arc<ReferenceData>,
    taxonomy_columns: Vec<String>,
}

impl Transformer {
    pub fn new(kind: JobKind, target: TargetCollection, reference: Arc<ReferenceData>) -> Self {
        let taxonomy_columns = (1..=REGISTRY_TAXONOMY_SLOTS)
            .map(|i| format!("{}{}", registry::TAXONOMY_PREFIX, i))
            .collect();

        Self {
            kind,
            target,
            reference,
            taxonomy_columns,
        }
    }

    /// Verify the header once per job
    ///
    /// Each entry of the profile's required groups must be matched by at
    /// least one column; otherwise decoding cannot produce usable records.
    pub fn check_header(&self, header: &Header) -> Result<()> {
        let missing: Vec<String> = self
            .required_columns()
            .into_iter()
            .filter(|group| !group.iter().any(|name| header.contains(name)))
            .map(|group| group.join(" | "))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ImportError::ParseFatal(format!(
                "missing required columns: {}",
                missing.join(", ")
            )))
        }
    }

    fn required_columns(&self) -> Vec<Vec<&'static str>> {
        match (self.kind, self.target) {
            (JobKind::RegistryImport, _) => vec![
                vec![registry::NPI],
                vec![registry::FIRST_NAME],
                vec![registry::LAST_NAME],
                vec![registry::ORGANIZATION_NAME],
                vec![registry::ENTITY_TYPE],
                vec![registry::FIRST_TAXONOMY],
            ],
            (JobKind::GenericUpload, TargetCollection::Providers) => vec![aliases::FIRST_NAME
                .iter()
                .chain(aliases::LAST_NAME)
                .copied()
                .collect()],
            (JobKind::GenericUpload, TargetCollection::Organizations) => {
                vec![aliases::ORGANIZATION_NAME.to_vec()]
            },
        }
    }

    pub fn classify(&self, record: &RawRecord) -> Outcome {
        match (self.kind, self.target) {
            (JobKind::RegistryImport, _) => self.classify_registry(record),
            (JobKind::GenericUpload, TargetCollection::Providers) => self.classify_provider(record),
            (JobKind::GenericUpload, TargetCollection::Organizations) => {
                self.classify_organization(record)
            },
        }
    }

    fn classify_registry(&self, record: &RawRecord) -> Outcome {
        let Some(code) = self
            .taxonomy_columns
            .iter()
            .filter_map(|column| clean(record.get(column)))
            .find(|code| self.reference.is_allowed(code))
        else {
            return Outcome::Skip;
        };

        let row = record.row_number();
        let mut errors = Vec::new();

        let first_name = clean(record.get(registry::FIRST_NAME));
        let last_name = clean(record.get(registry::LAST_NAME));
        let organization_name = clean(record.get(registry::ORGANIZATION_NAME));
        let credential = clean(record.get(registry::CREDENTIAL));

        if first_name.is_none() && last_name.is_none() && organization_name.is_none() {
            errors.push(ValidationError::new(
                row,
                "name",
                "",
                "record has neither a provider name nor an organization name",
            ));
        }

        let npi = clean(record.get(registry::NPI));
        match &npi {
            Some(value) if is_npi(value) => {},
            _ => errors.push(ValidationError::new(
                row,
                registry::NPI,
                raw(record, registry::NPI),
                "NPI must be exactly 10 digits",
            )),
        }

        let state = clean(record.get(registry::STATE));
        if state.as_deref().is_some_and(|value| !is_state_code(value)) {
            errors.push(ValidationError::new(
                row,
                "state",
                raw(record, registry::STATE),
                "state must be a two-letter code",
            ));
        }

        if !errors.is_empty() {
            return Outcome::Reject(errors);
        }

        let is_organization = record.get(registry::ENTITY_TYPE).map(str::trim)
            == Some(registry::ORGANIZATION_ENTITY);
        let display_name = if is_organization {
            organization_name.clone().unwrap_or_default()
        } else {
            display_name_for(&first_name, &last_name, &credential)
                .or_else(|| organization_name.clone())
                .unwrap_or_default()
        };

        let specialty = self.reference.label(&code).map(str::to_string);
        let category = organization_name
            .as_deref()
            .and_then(|name| self.reference.infer_category(name))
            .map(str::to_string);

        Outcome::Entity(TargetEntity::Provider(ProviderRecord {
            npi,
            first_name,
            last_name,
            display_name,
            credential,
            organization_name,
            taxonomy_code: Some(code),
            specialty,
            category,
            address: clean(record.get(registry::ADDRESS)),
            city: clean(record.get(registry::CITY)),
            state: state.map(|s| s.to_uppercase()),
            postal_code: postal_code(record.get(registry::POSTAL_CODE)),
            phone: digits(record.get(registry::PHONE)),
        }))
    }

    fn classify_provider(&self, record: &RawRecord) -> Outcome {
        let row = record.row_number();
        let mut errors = Vec::new();

        let first_name = pick(record, aliases::FIRST_NAME);
        let last_name = pick(record, aliases::LAST_NAME);
        if first_name.is_none() && last_name.is_none() {
            errors.push(ValidationError::new(
                row,
                "name",
                "",
                "first_name or last_name is required",
            ));
        }

        let state = check_state(record, row, &mut errors);

        let npi = pick(record, aliases::NPI);
        if let Some(value) = &npi {
            if !is_npi(value) {
                errors.push(ValidationError::new(
                    row,
                    "npi",
                    raw_alias(record, aliases::NPI),
                    "npi must be exactly 10 digits",
                ));
            }
        }

        if !errors.is_empty() {
            return Outcome::Reject(errors);
        }

        let credential = pick(record, aliases::CREDENTIAL);
        let organization_name = pick(record, aliases::PROVIDER_ORGANIZATION);
        let display_name = pick(record, aliases::DISPLAY_NAME)
            .or_else(|| display_name_for(&first_name, &last_name, &credential))
            .unwrap_or_default();

        let taxonomy_code = pick(record, aliases::TAXONOMY_CODE);
        let specialty = pick(record, aliases::SPECIALTY).or_else(|| {
            taxonomy_code
                .as_deref()
                .and_then(|code| self.reference.label(code))
                .map(str::to_string)
        });
        let category = pick(record, aliases::CATEGORY).or_else(|| {
            organization_name
                .as_deref()
                .and_then(|name| self.reference.infer_category(name))
                .map(str::to_string)
        });

        Outcome::Entity(TargetEntity::Provider(ProviderRecord {
            npi,
            first_name,
            last_name,
            display_name,
            credential,
            organization_name,
            taxonomy_code,
            specialty,
            category,
            address: pick(record, aliases::ADDRESS),
            city: pick(record, aliases::CITY),
            state,
            postal_code: postal_code(first_value(record, aliases::POSTAL_CODE)),
            phone: digits(first_value(record, aliases::PHONE)),
        }))
    }

    fn classify_organization(&self, record: &RawRecord) -> Outcome {
        let row = record.row_number();
        let mut errors = Vec::new();

        let name = pick(record, aliases::ORGANIZATION_NAME);
        if name.is_none() {
            errors.push(ValidationError::new(
                row,
                "name",
                raw_alias(record, aliases::ORGANIZATION_NAME),
                "name is required",
            ));
        }

        let state = check_state(record, row, &mut errors);

        let Some(name) = name.filter(|_| errors.is_empty()) else {
            return Outcome::Reject(errors);
        };

        let category = pick(record, aliases::CATEGORY)
            .or_else(|| self.reference.infer_category(&name).map(str::to_string));

        Outcome::Entity(TargetEntity::Organization(OrganizationRecord {
            name,
            category,
            address: pick(record, aliases::ADDRESS),
            city: pick(record, aliases::CITY),
            state,
            postal_code: postal_code(first_value(record, aliases::POSTAL_CODE)),
            phone: digits(first_value(record, aliases::PHONE)),
            website: pick(record, aliases::WEBSITE),
        }))
    }
}

/// Trim and collapse internal whitespace; blank becomes `None`
fn clean(value: Option<&str>) -> Option<String> {
    let collapsed = value?.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// First alias column holding a non-blank value
fn first_value<'a>(record: &'a RawRecord, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| record.get(name))
        .find(|value| !value.trim().is_empty())
}

fn pick(record: &RawRecord, names: &[&str]) -> Option<String> {
    clean(first_value(record, names))
}

fn raw(record: &RawRecord, column: &str) -> String {
    record.get(column).unwrap_or_default().to_string()
}

fn raw_alias(record: &RawRecord, names: &[&str]) -> String {
    first_value(record, names).unwrap_or_default().to_string()
}

fn is_npi(value: &str) -> bool {
    value.len() == 10 && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_state_code(value: &str) -> bool {
    value.len() == 2 && value.bytes().all(|b| b.is_ascii_alphabetic())
}

/// Validate an optional two-letter state, returning it upper-cased
fn check_state(record: &RawRecord, row: u64, errors: &mut Vec<ValidationError>) -> Option<String> {
    let state = pick(record, aliases::STATE)?;
    if is_state_code(&state) {
        Some(state.to_uppercase())
    } else {
        errors.push(ValidationError::new(
            row,
            "state",
            raw_alias(record, aliases::STATE),
            "state must be a two-letter code",
        ));
        None
    }
}

fn postal_code(value: Option<&str>) -> Option<String> {
    let value = clean(value)?;
    Some(value.chars().take(5).collect())
}

fn digits(value: Option<&str>) -> Option<String> {
    let digits: String = value?.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

/// `first last, credential`
fn display_name_for(
    first: &Option<String>,
    last: &Option<String>,
    credential: &Option<String>,
) -> Option<String> {
    let name = [first.as_deref(), last.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

    if name.is_empty() {
        return None;
    }

    Some(match credential {
        Some(credential) => format!("{}, {}", name, credential),
        None => name,
    })
}
