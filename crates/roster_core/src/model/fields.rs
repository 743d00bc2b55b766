//! Field-name aliasing across stored schema versions.
//!
//! Stored documents written by older clients use legacy field names. The
//! alias table maps every canonical field to its legacy names and is applied
//! once, at the store-to-model boundary.
//!
//! # Precedence
//! 1. The canonical field, when present and not `null`.
//! 2. Otherwise the first legacy name, in table order, present and not `null`.
//!
//! Legacy keys are always dropped from resolved field maps; fields that have
//! no table entry pass through unchanged.

use crate::model::document::Fields;
use serde_json::Value;

/// One canonical field and its legacy names, most preferred first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAlias {
    pub canonical: String,
    pub legacy: Vec<String>,
}

/// Ordered canonical/legacy mapping used to decode stored documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldAliasTable {
    entries: Vec<FieldAlias>,
}

impl FieldAliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds legacy names for one canonical field.
    ///
    /// Repeated calls for the same canonical field append in call order.
    pub fn alias(mut self, canonical: &str, legacy: &[&str]) -> Self {
        let legacy = legacy.iter().map(|name| (*name).to_string());
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.canonical == canonical)
        {
            Some(entry) => {
                for name in legacy {
                    if !entry.legacy.contains(&name) {
                        entry.legacy.push(name);
                    }
                }
            }
            None => self.entries.push(FieldAlias {
                canonical: canonical.to_string(),
                legacy: legacy.collect(),
            }),
        }
        self
    }

    /// Table for people records in the shared roster collection.
    pub fn people_records() -> Self {
        Self::new()
            .alias("name", &["nombre"])
            .alias("email", &["correo"])
            .alias("age", &["edad"])
            .alias("specialty", &["especialidad"])
            .alias("createdAt", &["creado"])
    }

    /// Table for profile documents in the users collection.
    pub fn profiles() -> Self {
        Self::new()
            .alias("name", &["nombre"])
            .alias("email", &["correo"])
            .alias("age", &["edad"])
            .alias("specialty", &["especialidad"])
            .alias("lastLoginAt", &["lastLogin"])
    }

    pub fn entries(&self) -> &[FieldAlias] {
        &self.entries
    }

    /// Maps a legacy field name to its canonical name; other names map to themselves.
    pub fn canonical_name<'a>(&'a self, field: &'a str) -> &'a str {
        self.entries
            .iter()
            .find(|entry| entry.legacy.iter().any(|name| name == field))
            .map_or(field, |entry| entry.canonical.as_str())
    }

    /// Looks up one canonical field in an unresolved field map.
    pub fn lookup<'f>(&self, fields: &'f Fields, canonical: &str) -> Option<&'f Value> {
        if let Some(value) = present(fields, canonical) {
            return Some(value);
        }
        self.entries
            .iter()
            .find(|entry| entry.canonical == canonical)?
            .legacy
            .iter()
            .find_map(|name| present(fields, name))
    }

    /// Rewrites a stored field map into canonical names.
    pub fn resolve(&self, mut fields: Fields) -> Fields {
        for entry in &self.entries {
            let canonical = fields
                .remove(&entry.canonical)
                .filter(|value| !value.is_null());
            let mut fallback = None;
            for name in &entry.legacy {
                let legacy = fields.remove(name).filter(|value| !value.is_null());
                if fallback.is_none() {
                    fallback = legacy;
                }
            }
            if let Some(value) = canonical.or(fallback) {
                fields.insert(entry.canonical.clone(), value);
            }
        }
        fields
    }
}

fn present<'f>(fields: &'f Fields, name: &str) -> Option<&'f Value> {
    fields.get(name).filter(|value| !value.is_null())
}
