// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use time::OffsetDateTime;

use crate::ids::*;
use crate::model::{RenamePair, StateFilter};
use crate::view::{EntityMarks, Filters};

pub const MAX_UNDO_STEPS: usize = 50;
pub const MAX_ACTIVITY_ENTRIES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPreset {
    pub name: String,
    pub search_term: String,
    pub view_state: StateFilter,
    pub domain: Option<String>,
    pub favorites_only: bool,
    pub created_at: OffsetDateTime,
}

impl FilterPreset {
    pub fn capture(name: &str, filters: &Filters, created_at: OffsetDateTime) -> Self {
        Self {
            name: name.trim().to_owned(),
            search_term: filters.search_term.clone(),
            view_state: filters.view_state,
            domain: filters.domain.clone(),
            favorites_only: filters.favorites_only,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Enable,
    Disable,
    BulkEnable,
    BulkDisable,
    Rename,
    BulkRename,
    Remove,
    Undo,
    Redo,
}

impl ActivityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::BulkEnable => "bulk_enable",
            Self::BulkDisable => "bulk_disable",
            Self::Rename => "rename",
            Self::BulkRename => "bulk_rename",
            Self::Remove => "remove",
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "enable" => Some(Self::Enable),
            "disable" => Some(Self::Disable),
            "bulk_enable" => Some(Self::BulkEnable),
            "bulk_disable" => Some(Self::BulkDisable),
            "rename" => Some(Self::Rename),
            "bulk_rename" => Some(Self::BulkRename),
            "remove" => Some(Self::Remove),
            "undo" => Some(Self::Undo),
            "redo" => Some(Self::Redo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub detail: String,
    pub at: OffsetDateTime,
}

/// Favorites, tags, aliases, presets and the activity log.
///
/// Kept in memory; callers that want durability hand a loaded copy to the
/// panel and save it back when [`Extras::revision`] moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extras {
    pub favorites: BTreeSet<EntityId>,
    pub tags: BTreeMap<EntityId, Vec<String>>,
    pub aliases: BTreeMap<EntityId, String>,
    pub presets: Vec<FilterPreset>,
    pub activity: VecDeque<ActivityEntry>,
    revision: u64,
}

impl Extras {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn marks(&self) -> EntityMarks<'_> {
        EntityMarks {
            favorites: &self.favorites,
            tags: &self.tags,
        }
    }

    pub fn is_favorite(&self, entity_id: &EntityId) -> bool {
        self.favorites.contains(entity_id)
    }

    /// Returns whether the entity is a favorite afterwards.
    pub fn toggle_favorite(&mut self, entity_id: &EntityId) -> bool {
        self.bump();
        if self.favorites.remove(entity_id) {
            false
        } else {
            self.favorites.insert(entity_id.clone());
            true
        }
    }

    pub fn tags_for(&self, entity_id: &EntityId) -> &[String] {
        self.tags.get(entity_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add_tag(&mut self, entity_id: &EntityId, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() {
            return false;
        }
        let tags = self.tags.entry(entity_id.clone()).or_default();
        if tags.iter().any(|existing| existing == tag) {
            return false;
        }
        tags.push(tag.to_owned());
        self.bump();
        true
    }

    pub fn remove_tag(&mut self, entity_id: &EntityId, tag: &str) -> bool {
        let Some(tags) = self.tags.get_mut(entity_id) else {
            return false;
        };
        let before = tags.len();
        tags.retain(|existing| existing != tag);
        let removed = tags.len() != before;
        if tags.is_empty() {
            self.tags.remove(entity_id);
        }
        if removed {
            self.bump();
        }
        removed
    }

    pub fn all_tags(&self) -> Vec<String> {
        self.tags
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn alias(&self, entity_id: &EntityId) -> Option<&str> {
        self.aliases.get(entity_id).map(String::as_str)
    }

    /// An empty alias removes the entry.
    pub fn set_alias(&mut self, entity_id: &EntityId, alias: &str) {
        let alias = alias.trim();
        if alias.is_empty() {
            self.aliases.remove(entity_id);
        } else {
            self.aliases.insert(entity_id.clone(), alias.to_owned());
        }
        self.bump();
    }

    pub fn preset(&self, name: &str) -> Option<&FilterPreset> {
        self.presets.iter().find(|preset| preset.name == name)
    }

    /// Replaces a preset with the same name in place.
    pub fn upsert_preset(&mut self, preset: FilterPreset) {
        match self
            .presets
            .iter_mut()
            .find(|existing| existing.name == preset.name)
        {
            Some(existing) => *existing = preset,
            None => self.presets.push(preset),
        }
        self.bump();
    }

    pub fn delete_preset(&mut self, name: &str) -> bool {
        let before = self.presets.len();
        self.presets.retain(|preset| preset.name != name);
        let removed = self.presets.len() != before;
        if removed {
            self.bump();
        }
        removed
    }

    pub fn log(&mut self, kind: ActivityKind, detail: impl Into<String>, at: OffsetDateTime) {
        self.activity.push_back(ActivityEntry {
            kind,
            detail: detail.into(),
            at,
        });
        while self.activity.len() > MAX_ACTIVITY_ENTRIES {
            self.activity.pop_front();
        }
        self.bump();
    }

    pub fn clear_activity(&mut self) {
        self.activity.clear();
        self.bump();
    }

    /// Moves per-entity marks from `old` to `new` after a rename.
    pub fn rekey(&mut self, old: &EntityId, new: &EntityId) {
        if self.favorites.remove(old) {
            self.favorites.insert(new.clone());
        }
        if let Some(tags) = self.tags.remove(old) {
            self.tags.insert(new.clone(), tags);
        }
        if let Some(alias) = self.aliases.remove(old) {
            self.aliases.insert(new.clone(), alias);
        }
        self.bump();
    }

    /// Drops every per-entity mark of a removed entity.
    pub fn forget(&mut self, entity_id: &EntityId) -> bool {
        let favorite = self.favorites.remove(entity_id);
        let tags = self.tags.remove(entity_id).is_some();
        let alias = self.aliases.remove(entity_id).is_some();
        let changed = favorite || tags || alias;
        if changed {
            self.bump();
        }
        changed
    }

    pub(crate) fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryAction {
    Enable(EntityId),
    Disable(EntityId),
    BulkEnable(Vec<EntityId>),
    BulkDisable(Vec<EntityId>),
    Rename { old: EntityId, new: EntityId },
    BulkRename(Vec<RenamePair>),
}

impl HistoryAction {
    pub fn inverse(&self) -> Self {
        match self {
            Self::Enable(id) => Self::Disable(id.clone()),
            Self::Disable(id) => Self::Enable(id.clone()),
            Self::BulkEnable(ids) => Self::BulkDisable(ids.clone()),
            Self::BulkDisable(ids) => Self::BulkEnable(ids.clone()),
            Self::Rename { old, new } => Self::Rename {
                old: new.clone(),
                new: old.clone(),
            },
            Self::BulkRename(pairs) => {
                Self::BulkRename(pairs.iter().rev().map(RenamePair::swapped).collect())
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Enable(id) => format!("enable {id}"),
            Self::Disable(id) => format!("disable {id}"),
            Self::BulkEnable(ids) => format!("bulk enable ({})", ids.len()),
            Self::BulkDisable(ids) => format!("bulk disable ({})", ids.len()),
            Self::Rename { old, new } => format!("rename {old} -> {new}"),
            Self::BulkRename(pairs) => format!("bulk rename ({})", pairs.len()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    undo: Vec<HistoryAction>,
    redo: Vec<HistoryAction>,
}

impl History {
    pub fn record(&mut self, action: HistoryAction) {
        self.undo.push(action);
        if self.undo.len() > MAX_UNDO_STEPS {
            self.undo.remove(0);
        }
        self.redo.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn take_undo(&mut self) -> Option<HistoryAction> {
        self.undo.pop()
    }

    pub fn take_redo(&mut self) -> Option<HistoryAction> {
        self.redo.pop()
    }

    pub fn push_undone(&mut self, action: HistoryAction) {
        self.redo.push(action);
    }

    pub fn push_redone(&mut self, action: HistoryAction) {
        self.undo.push(action);
    }

    pub fn restore_undo(&mut self, action: HistoryAction) {
        self.undo.push(action);
    }

    pub fn restore_redo(&mut self, action: HistoryAction) {
        self.redo.push(action);
    }
}
