// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::extras::Extras;
use crate::ids::EntityId;
use crate::view::Dataset;

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortableError {
    #[error("unsupported config version {0}; expected version {EXPORT_VERSION}")]
    UnsupportedVersion(u32),
    #[error("cannot format export date: {0}")]
    Timestamp(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedEntity {
    pub entity_id: EntityId,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub original_name: Option<String>,
}

/// Shareable snapshot of the local marks, plus the entity list it was taken
/// against for reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtrasExport {
    pub version: u32,
    pub export_date: String,
    #[serde(default)]
    pub entities: Vec<ExportedEntity>,
    #[serde(default)]
    pub favorites: Vec<EntityId>,
    #[serde(default)]
    pub tags: BTreeMap<EntityId, Vec<String>>,
    #[serde(default)]
    pub aliases: BTreeMap<EntityId, String>,
}

impl ExtrasExport {
    pub fn capture(
        dataset: &Dataset,
        extras: &Extras,
        at: OffsetDateTime,
    ) -> Result<Self, PortableError> {
        let export_date = at
            .format(&Rfc3339)
            .map_err(|error| PortableError::Timestamp(error.to_string()))?;
        let entities = dataset
            .entities()
            .map(|entity| ExportedEntity {
                entity_id: entity.entity_id.clone(),
                is_disabled: entity.is_disabled,
                original_name: entity.original_name.clone(),
            })
            .collect();
        Ok(Self {
            version: EXPORT_VERSION,
            export_date,
            entities,
            favorites: extras.favorites.iter().cloned().collect(),
            tags: extras.tags.clone(),
            aliases: extras.aliases.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub favorites: usize,
    pub tags: usize,
    pub aliases: usize,
}

impl Extras {
    /// Merges an export: favorites are added to the current set, while tags
    /// and aliases replace the current value per entity.
    pub fn import(&mut self, export: &ExtrasExport) -> Result<ImportSummary, PortableError> {
        if export.version != EXPORT_VERSION {
            return Err(PortableError::UnsupportedVersion(export.version));
        }

        let mut summary = ImportSummary::default();
        for entity_id in &export.favorites {
            if self.favorites.insert(entity_id.clone()) {
                summary.favorites += 1;
            }
        }
        for (entity_id, tags) in &export.tags {
            let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
            for tag in tags.iter().map(|tag| tag.trim()).filter(|tag| !tag.is_empty()) {
                if !cleaned.iter().any(|existing| existing == tag) {
                    cleaned.push(tag.to_owned());
                }
            }
            if cleaned.is_empty() {
                self.tags.remove(entity_id);
            } else {
                self.tags.insert(entity_id.clone(), cleaned);
            }
            summary.tags += 1;
        }
        for (entity_id, alias) in &export.aliases {
            let alias = alias.trim();
            if alias.is_empty() {
                self.aliases.remove(entity_id);
            } else {
                self.aliases.insert(entity_id.clone(), alias.to_owned());
            }
            summary.aliases += 1;
        }

        if summary != ImportSummary::default() {
            self.bump();
        }
        Ok(summary)
    }
}
