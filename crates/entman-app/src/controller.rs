// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::extras::*;
use crate::gateway::{Gateway, GatewayError, MAX_BULK_ENTITIES};
use crate::ids::*;
use crate::model::*;
use crate::portable::{ExtrasExport, ImportSummary, PortableError};
use crate::state::{PanelCommand, PanelEvent, PanelState};
use crate::view::{ALL_DOMAINS, Dataset, PanelView, compute_view};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PanelError {
    #[error(transparent)]
    Transport(#[from] GatewayError),
    #[error("no entities selected")]
    NothingSelected,
    #[error(transparent)]
    Portable(#[from] PortableError),
    #[error(
        "invalid entity id {0:?}; use lowercase domain.object_id with only a-z, 0-9 and underscores"
    )]
    InvalidEntityId(String),
    #[error("cannot change domain from {from:?} to {to:?}")]
    DomainMismatch { from: String, to: String },
    #[error("unknown integration {0:?}; refresh and try again")]
    UnknownIntegration(String),
    #[error("unknown device {device:?} in integration {integration:?}; refresh and try again")]
    UnknownDevice { integration: String, device: String },
    #[error("preset name must not be empty")]
    EmptyPresetName,
    #[error("no preset named {0:?}")]
    UnknownPreset(String),
    #[error("unknown entity {0:?}; refresh and try again")]
    UnknownEntity(String),
    #[error("find text must not be empty")]
    EmptyPattern,
    #[error("no entity id contains {0:?}")]
    NoRenameMatches(String),
}

/// Sequence number of a refresh; only the newest one may land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmTarget {
    Integration(String),
    Device {
        integration: String,
        device_id: DeviceId,
    },
    Selection,
    Removal(EntityId),
    BulkRename,
}

/// A destructive change waiting for the user to agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    target: ConfirmTarget,
    entity_ids: Vec<EntityId>,
    renames: Vec<RenamePair>,
    message: String,
}

impl ConfirmPrompt {
    pub fn target(&self) -> &ConfirmTarget {
        &self.target
    }

    pub fn entity_ids(&self) -> &[EntityId] {
        &self.entity_ids
    }

    /// Planned renames of a [`ConfirmTarget::BulkRename`] prompt.
    pub fn renames(&self) -> &[RenamePair] {
        &self.renames
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn confirm(self) -> Confirmed {
        Confirmed(self)
    }
}

/// Proof that a [`ConfirmPrompt`] was accepted.
#[derive(Debug)]
pub struct Confirmed(ConfirmPrompt);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Enable,
    Disable,
}

impl Direction {
    const fn past(self) -> &'static str {
        match self {
            Self::Enable => "Enabled",
            Self::Disable => "Disabled",
        }
    }

    const fn progressive(self) -> &'static str {
        match self {
            Self::Enable => "enabling",
            Self::Disable => "disabling",
        }
    }

    fn single(self, entity_id: &EntityId) -> HistoryAction {
        match self {
            Self::Enable => HistoryAction::Enable(entity_id.clone()),
            Self::Disable => HistoryAction::Disable(entity_id.clone()),
        }
    }

    fn bulk(self, entity_ids: Vec<EntityId>) -> HistoryAction {
        match self {
            Self::Enable => HistoryAction::BulkEnable(entity_ids),
            Self::Disable => HistoryAction::BulkDisable(entity_ids),
        }
    }

    const fn single_kind(self) -> ActivityKind {
        match self {
            Self::Enable => ActivityKind::Enable,
            Self::Disable => ActivityKind::Disable,
        }
    }

    const fn bulk_kind(self) -> ActivityKind {
        match self {
            Self::Enable => ActivityKind::BulkEnable,
            Self::Disable => ActivityKind::BulkDisable,
        }
    }
}

/// Owns the view state and drives every host mutation through a [`Gateway`].
pub struct Panel<G> {
    gateway: G,
    state: PanelState,
    dataset: Dataset,
    extras: Extras,
    history: History,
    notifications: Vec<Notification>,
    latest_refresh: u64,
}

impl<G: Gateway> Panel<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            state: PanelState::default(),
            dataset: Dataset::default(),
            extras: Extras::default(),
            history: History::default(),
            notifications: Vec::new(),
            latest_refresh: 0,
        }
    }

    pub fn with_extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn state(&self) -> &PanelState {
        &self.state
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn extras(&self) -> &Extras {
        &self.extras
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn view(&self) -> PanelView {
        compute_view(&self.dataset, &self.state.filters, &self.extras.marks())
    }

    pub fn dispatch(&mut self, command: PanelCommand) -> Vec<PanelEvent> {
        self.state.dispatch(command)
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) -> Vec<PanelEvent> {
        self.dispatch(PanelCommand::SetSearchTerm(term.into()))
    }

    pub fn set_view_state(&mut self, view_state: StateFilter) -> Vec<PanelEvent> {
        self.dispatch(PanelCommand::SetViewState(view_state))
    }

    pub fn set_domain_filter(&mut self, domain: impl Into<String>) -> Vec<PanelEvent> {
        self.dispatch(PanelCommand::SetDomainFilter(domain.into()))
    }

    pub fn toggle_integration_expanded(&mut self, integration: &str) -> Vec<PanelEvent> {
        self.dispatch(PanelCommand::ToggleIntegrationExpanded(
            integration.to_owned(),
        ))
    }

    pub fn toggle_device_expanded(&mut self, device_id: &DeviceId) -> Vec<PanelEvent> {
        self.dispatch(PanelCommand::ToggleDeviceExpanded(device_id.clone()))
    }

    pub fn toggle_entity_selected(&mut self, entity_id: &EntityId) -> Vec<PanelEvent> {
        self.dispatch(PanelCommand::ToggleEntitySelected(entity_id.clone()))
    }

    pub fn clear_selection(&mut self) -> Vec<PanelEvent> {
        self.dispatch(PanelCommand::ClearSelection)
    }

    pub fn select_all_visible(&mut self) -> Vec<PanelEvent> {
        let visible = self.view().entity_ids();
        self.dispatch(PanelCommand::SelectEntities(visible))
    }

    pub fn request_menu_toggle(&mut self) -> Vec<PanelEvent> {
        self.dispatch(PanelCommand::ToggleMenu)
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Replaces the raw dataset wholesale, keeping the current device names.
    pub fn set_dataset(&mut self, groups: Vec<IntegrationGroup>) -> Vec<PanelEvent> {
        let devices = self.dataset.devices().clone();
        self.dataset = Dataset::new(groups).with_devices(devices);
        self.state.apply_dataset(&self.dataset)
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.latest_refresh += 1;
        RefreshTicket(self.latest_refresh)
    }

    /// Lands a refresh. Returns `Ok(false)` when a newer refresh superseded it.
    pub fn complete_refresh(
        &mut self,
        ticket: RefreshTicket,
        entities: Result<Vec<IntegrationGroup>, GatewayError>,
        devices: Result<Vec<DeviceInfo>, GatewayError>,
    ) -> Result<bool, PanelError> {
        if ticket.0 != self.latest_refresh {
            warn!(
                ticket = ticket.0,
                latest = self.latest_refresh,
                "discarding superseded refresh"
            );
            return Ok(false);
        }

        let groups = match entities {
            Ok(groups) => groups,
            Err(error) => {
                self.notify(
                    NoticeLevel::Error,
                    format!("Error loading entities: {error}"),
                );
                return Err(error.into());
            }
        };

        let directory = match devices {
            Ok(devices) => DeviceDirectory::new(devices),
            Err(error) => {
                warn!(%error, "device registry unavailable; showing raw device ids");
                DeviceDirectory::default()
            }
        };

        self.dataset = Dataset::new(groups).with_devices(directory);
        let events = self.state.apply_dataset(&self.dataset);
        debug!(
            integrations = self.dataset.groups().len(),
            events = events.len(),
            "dataset refreshed"
        );
        Ok(true)
    }

    pub fn refresh(&mut self) -> Result<(), PanelError> {
        let ticket = self.begin_refresh();
        let entities = self.gateway.fetch_entities(StateFilter::All);
        let devices = if entities.is_ok() {
            self.gateway.fetch_device_registry()
        } else {
            Ok(Vec::new())
        };
        self.complete_refresh(ticket, entities, devices).map(|_| ())
    }

    pub fn enable_entity(&mut self, entity_id: &EntityId) -> Result<(), PanelError> {
        self.apply_single(entity_id, Direction::Enable, true)
    }

    pub fn disable_entity(&mut self, entity_id: &EntityId) -> Result<(), PanelError> {
        self.apply_single(entity_id, Direction::Disable, true)
    }

    pub fn bulk_enable(&mut self, entity_ids: &[EntityId]) -> Result<BulkOutcome, PanelError> {
        self.apply_bulk(entity_ids, Direction::Enable, true)
    }

    pub fn bulk_disable(&mut self, entity_ids: &[EntityId]) -> Result<BulkOutcome, PanelError> {
        self.apply_bulk(entity_ids, Direction::Disable, true)
    }

    pub fn bulk_enable_selected(&mut self) -> Result<BulkOutcome, PanelError> {
        let selected = self.selected_ids();
        self.bulk_enable(&selected)
    }

    pub fn enable_integration(&mut self, integration: &str) -> Result<BulkOutcome, PanelError> {
        let entity_ids = self.integration_entity_ids(integration)?;
        self.bulk_enable(&entity_ids)
    }

    pub fn enable_device(
        &mut self,
        integration: &str,
        device_id: &DeviceId,
    ) -> Result<BulkOutcome, PanelError> {
        let entity_ids = self.device_entity_ids(integration, device_id)?;
        self.bulk_enable(&entity_ids)
    }

    pub fn prompt_disable_integration(
        &mut self,
        integration: &str,
    ) -> Result<ConfirmPrompt, PanelError> {
        let entity_ids = self.integration_entity_ids(integration)?;
        let message = format!(
            "Disable all {} entities of {integration}?",
            entity_ids.len()
        );
        Ok(ConfirmPrompt {
            target: ConfirmTarget::Integration(integration.to_owned()),
            entity_ids,
            renames: Vec::new(),
            message,
        })
    }

    pub fn prompt_disable_device(
        &mut self,
        integration: &str,
        device_id: &DeviceId,
    ) -> Result<ConfirmPrompt, PanelError> {
        let entity_ids = self.device_entity_ids(integration, device_id)?;
        let host_name = self
            .dataset
            .integration(integration)
            .and_then(|group| group.device(device_id))
            .and_then(|device| device.name.as_deref());
        let name = self.dataset.devices().display_name(device_id, host_name);
        let message = format!("Disable all {} entities of {name}?", entity_ids.len());
        Ok(ConfirmPrompt {
            target: ConfirmTarget::Device {
                integration: integration.to_owned(),
                device_id: device_id.clone(),
            },
            entity_ids,
            renames: Vec::new(),
            message,
        })
    }

    pub fn prompt_disable_selected(&mut self) -> Result<ConfirmPrompt, PanelError> {
        let entity_ids = self.selected_ids();
        if entity_ids.is_empty() {
            return Err(self.fail(PanelError::NothingSelected));
        }
        let message = format!(
            "Are you sure you want to disable {} selected entities?",
            entity_ids.len()
        );
        Ok(ConfirmPrompt {
            target: ConfirmTarget::Selection,
            entity_ids,
            renames: Vec::new(),
            message,
        })
    }

    pub fn prompt_remove_entity(
        &mut self,
        entity_id: &EntityId,
    ) -> Result<ConfirmPrompt, PanelError> {
        if self.dataset.find(entity_id).is_none() {
            return Err(self.fail(PanelError::UnknownEntity(entity_id.to_string())));
        }
        Ok(ConfirmPrompt {
            target: ConfirmTarget::Removal(entity_id.clone()),
            entity_ids: vec![entity_id.clone()],
            renames: Vec::new(),
            message: format!(
                "Remove {entity_id} from the entity registry? This cannot be undone."
            ),
        })
    }

    /// Plans a find/replace over the object ids of the selection, or of every
    /// visible entity when nothing is selected. Ids that would not change are
    /// left out.
    pub fn prompt_bulk_rename(
        &mut self,
        find: &str,
        replace: &str,
        case_sensitive: bool,
    ) -> Result<ConfirmPrompt, PanelError> {
        if find.is_empty() {
            return Err(self.fail(PanelError::EmptyPattern));
        }
        let sources = if self.state.selected.is_empty() {
            self.view().entity_ids()
        } else {
            self.selected_ids()
        };
        let renames: Vec<RenamePair> = sources
            .iter()
            .filter_map(|entity_id| plan_rename(entity_id, find, replace, case_sensitive))
            .collect();
        if renames.is_empty() {
            return Err(self.fail(PanelError::NoRenameMatches(find.to_owned())));
        }

        let preview: Vec<String> = renames
            .iter()
            .take(RENAME_PREVIEW)
            .map(|pair| format!("{} -> {}", pair.old, pair.new))
            .collect();
        let more = renames.len().saturating_sub(RENAME_PREVIEW);
        let mut message = format!("Rename {} entities? {}", renames.len(), preview.join(", "));
        if more > 0 {
            message.push_str(&format!(" ... and {more} more"));
        }
        Ok(ConfirmPrompt {
            target: ConfirmTarget::BulkRename,
            entity_ids: renames.iter().map(|pair| pair.old.clone()).collect(),
            renames,
            message,
        })
    }

    /// Runs an accepted prompt. Removal reports the removed id as its only
    /// success; bulk rename reports the new ids.
    pub fn run_confirmed(&mut self, confirmed: Confirmed) -> Result<BulkOutcome, PanelError> {
        let Confirmed(prompt) = confirmed;
        match prompt.target {
            ConfirmTarget::Integration(_)
            | ConfirmTarget::Device { .. }
            | ConfirmTarget::Selection => self.bulk_disable(&prompt.entity_ids),
            ConfirmTarget::Removal(entity_id) => {
                self.apply_remove(&entity_id)?;
                Ok(BulkOutcome {
                    succeeded: vec![entity_id],
                    failed: Vec::new(),
                })
            }
            ConfirmTarget::BulkRename => self.apply_bulk_rename(&prompt.renames, true),
        }
    }

    pub fn rename_entity(&mut self, old: &EntityId, new: &EntityId) -> Result<(), PanelError> {
        self.apply_rename(old, new, true)
    }

    pub fn set_display_name(
        &mut self,
        entity_id: &EntityId,
        name: Option<&str>,
    ) -> Result<(), PanelError> {
        let name = name.map(str::trim).filter(|name| !name.is_empty());
        if let Err(error) = self.gateway.set_display_name(entity_id, name) {
            return Err(self.fail_gateway("Error updating display name", error));
        }
        let message = match name {
            Some(name) => format!("Display name of {entity_id} set to {name}"),
            None => format!("Display name of {entity_id} cleared"),
        };
        self.notify(NoticeLevel::Success, message);
        self.refresh_after_change();
        Ok(())
    }

    /// Returns `Ok(false)` when there was nothing to undo.
    pub fn undo(&mut self) -> Result<bool, PanelError> {
        let Some(action) = self.history.take_undo() else {
            self.notify(NoticeLevel::Info, "Nothing to undo");
            return Ok(false);
        };
        if let Err(error) = self.apply_action(&action.inverse()) {
            self.history.restore_undo(action);
            return Err(error);
        }
        let description = action.describe();
        self.history.push_undone(action);
        self.extras
            .log(ActivityKind::Undo, &description, OffsetDateTime::now_utc());
        self.notify(NoticeLevel::Info, format!("Undid {description}"));
        Ok(true)
    }

    /// Returns `Ok(false)` when there was nothing to redo.
    pub fn redo(&mut self) -> Result<bool, PanelError> {
        let Some(action) = self.history.take_redo() else {
            self.notify(NoticeLevel::Info, "Nothing to redo");
            return Ok(false);
        };
        if let Err(error) = self.apply_action(&action) {
            self.history.restore_redo(action);
            return Err(error);
        }
        let description = action.describe();
        self.history.push_redone(action);
        self.extras
            .log(ActivityKind::Redo, &description, OffsetDateTime::now_utc());
        self.notify(NoticeLevel::Info, format!("Redid {description}"));
        Ok(true)
    }

    /// Registry rows sorted by entity id.
    pub fn export_states(&mut self) -> Result<Vec<RegistryEntry>, PanelError> {
        match self.gateway.export_states() {
            Ok(mut entries) => {
                entries.sort_by(|left, right| left.entity_id.cmp(&right.entity_id));
                info!(entries = entries.len(), "exported entity states");
                Ok(entries)
            }
            Err(error) => Err(self.fail_gateway("Error exporting entity states", error)),
        }
    }

    pub fn export_extras(&mut self) -> Result<ExtrasExport, PanelError> {
        match ExtrasExport::capture(&self.dataset, &self.extras, OffsetDateTime::now_utc()) {
            Ok(export) => Ok(export),
            Err(error) => Err(self.fail(error.into())),
        }
    }

    pub fn import_extras(&mut self, export: &ExtrasExport) -> Result<ImportSummary, PanelError> {
        match self.extras.import(export) {
            Ok(summary) => {
                info!(
                    favorites = summary.favorites,
                    tags = summary.tags,
                    aliases = summary.aliases,
                    "imported extras"
                );
                self.notify(NoticeLevel::Success, "Config imported successfully");
                Ok(summary)
            }
            Err(error) => Err(self.fail(error.into())),
        }
    }

    pub fn toggle_favorite(&mut self, entity_id: &EntityId) -> bool {
        let favorite = self.extras.toggle_favorite(entity_id);
        let message = if favorite {
            "Added to favorites"
        } else {
            "Removed from favorites"
        };
        self.notify(NoticeLevel::Info, message);
        favorite
    }

    pub fn add_tag(&mut self, entity_id: &EntityId, tag: &str) -> bool {
        self.extras.add_tag(entity_id, tag)
    }

    pub fn remove_tag(&mut self, entity_id: &EntityId, tag: &str) -> bool {
        self.extras.remove_tag(entity_id, tag)
    }

    pub fn set_alias(&mut self, entity_id: &EntityId, alias: &str) {
        self.extras.set_alias(entity_id, alias);
    }

    pub fn clear_activity(&mut self) {
        self.extras.clear_activity();
        self.notify(NoticeLevel::Info, "Activity log cleared");
    }

    pub fn save_preset(&mut self, name: &str) -> Result<(), PanelError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(self.fail(PanelError::EmptyPresetName));
        }
        let preset = FilterPreset::capture(name, &self.state.filters, OffsetDateTime::now_utc());
        self.extras.upsert_preset(preset);
        self.notify(NoticeLevel::Success, format!("Preset \"{name}\" saved"));
        Ok(())
    }

    pub fn apply_preset(&mut self, name: &str) -> Result<Vec<PanelEvent>, PanelError> {
        let Some(preset) = self.extras.preset(name).cloned() else {
            return Err(self.fail(PanelError::UnknownPreset(name.to_owned())));
        };
        self.state.filters.search_term = preset.search_term;
        self.state.filters.view_state = preset.view_state;
        self.state.filters.favorites_only = preset.favorites_only;
        let domain = preset.domain.unwrap_or_else(|| ALL_DOMAINS.to_owned());
        let events = self.dispatch(PanelCommand::SetDomainFilter(domain));
        self.notify(
            NoticeLevel::Success,
            format!("Applied preset: {}", preset.name),
        );
        Ok(events)
    }

    pub fn delete_preset(&mut self, name: &str) -> Result<(), PanelError> {
        if !self.extras.delete_preset(name) {
            return Err(self.fail(PanelError::UnknownPreset(name.to_owned())));
        }
        self.notify(NoticeLevel::Info, "Preset deleted");
        Ok(())
    }

    fn apply_action(&mut self, action: &HistoryAction) -> Result<(), PanelError> {
        match action {
            HistoryAction::Enable(entity_id) => {
                self.apply_single(entity_id, Direction::Enable, false)
            }
            HistoryAction::Disable(entity_id) => {
                self.apply_single(entity_id, Direction::Disable, false)
            }
            HistoryAction::BulkEnable(entity_ids) => self
                .apply_bulk(entity_ids, Direction::Enable, false)
                .map(|_| ()),
            HistoryAction::BulkDisable(entity_ids) => self
                .apply_bulk(entity_ids, Direction::Disable, false)
                .map(|_| ()),
            HistoryAction::Rename { old, new } => self.apply_rename(old, new, false),
            HistoryAction::BulkRename(pairs) => {
                self.apply_bulk_rename(pairs, false).map(|_| ())
            }
        }
    }

    fn apply_single(
        &mut self,
        entity_id: &EntityId,
        direction: Direction,
        record: bool,
    ) -> Result<(), PanelError> {
        let result = match direction {
            Direction::Enable => self.gateway.enable(entity_id),
            Direction::Disable => self.gateway.disable(entity_id),
        };
        if let Err(error) = result {
            let context = format!("Error {} entity {entity_id}", direction.progressive());
            return Err(self.fail_gateway(&context, error));
        }
        info!(%entity_id, action = direction.past(), "entity updated");

        self.state.selected.remove(entity_id);
        if record {
            self.history.record(direction.single(entity_id));
            self.extras.log(
                direction.single_kind(),
                entity_id.as_str(),
                OffsetDateTime::now_utc(),
            );
            self.notify_with_undo(format!("{} {entity_id}", direction.past()));
        }
        self.refresh_after_change();
        Ok(())
    }

    fn apply_bulk(
        &mut self,
        entity_ids: &[EntityId],
        direction: Direction,
        record: bool,
    ) -> Result<BulkOutcome, PanelError> {
        if entity_ids.is_empty() {
            return Err(self.fail(PanelError::NothingSelected));
        }

        let mut outcome = BulkOutcome::default();
        let mut first_error = None;
        let mut any_answered = false;
        for chunk in entity_ids.chunks(MAX_BULK_ENTITIES) {
            let result = match direction {
                Direction::Enable => self.gateway.bulk_enable(chunk),
                Direction::Disable => self.gateway.bulk_disable(chunk),
            };
            match result {
                Ok(part) => {
                    any_answered = true;
                    outcome.merge(part);
                }
                Err(error) => {
                    warn!(%error, size = chunk.len(), "bulk chunk failed");
                    outcome
                        .failed
                        .extend(chunk.iter().map(|entity_id| BulkFailure {
                            entity_id: entity_id.clone(),
                            error: Some(error.to_string()),
                        }));
                    first_error.get_or_insert(error);
                }
            }
        }

        if !any_answered && let Some(error) = first_error {
            let context = format!("Error {} entities", direction.progressive());
            return Err(self.fail_gateway(&context, error));
        }

        info!(
            action = direction.past(),
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "bulk update finished"
        );

        if outcome.is_partial() {
            for entity_id in &outcome.succeeded {
                self.state.selected.remove(entity_id);
            }
        } else {
            self.state.selected.clear();
        }

        if record && !outcome.succeeded.is_empty() {
            self.history.record(direction.bulk(outcome.succeeded.clone()));
            self.extras.log(
                direction.bulk_kind(),
                format!("{} entities", outcome.succeeded.len()),
                OffsetDateTime::now_utc(),
            );
        }

        if outcome.is_partial() {
            let failed: Vec<&str> = outcome
                .failed
                .iter()
                .take(3)
                .map(|failure| failure.entity_id.as_str())
                .collect();
            self.notify(
                NoticeLevel::Warning,
                format!(
                    "{} {} of {} entities; {} failed ({}{})",
                    direction.past(),
                    outcome.succeeded.len(),
                    outcome.succeeded.len() + outcome.failed.len(),
                    outcome.failed.len(),
                    failed.join(", "),
                    if outcome.failed.len() > failed.len() {
                        ", ..."
                    } else {
                        ""
                    },
                ),
            );
        } else if record {
            self.notify_with_undo(format!(
                "{} {} entities",
                direction.past(),
                outcome.succeeded.len()
            ));
        }

        self.refresh_after_change();
        Ok(outcome)
    }

    fn apply_rename(
        &mut self,
        old: &EntityId,
        new: &EntityId,
        record: bool,
    ) -> Result<(), PanelError> {
        if let Err(error) = check_rename(old, new) {
            return Err(self.fail(error));
        }
        if let Err(error) = self.gateway.rename(old, new) {
            return Err(self.fail_gateway("Error renaming entity", error));
        }
        info!(%old, %new, "entity renamed");

        if self.state.selected.remove(old) {
            self.state.selected.insert(new.clone());
        }
        self.extras.rekey(old, new);
        if record {
            self.history.record(HistoryAction::Rename {
                old: old.clone(),
                new: new.clone(),
            });
            self.extras.log(
                ActivityKind::Rename,
                format!("{old} -> {new}"),
                OffsetDateTime::now_utc(),
            );
            self.notify_with_undo(format!("Renamed {old} to {new}"));
        }
        self.refresh_after_change();
        Ok(())
    }

    fn apply_remove(&mut self, entity_id: &EntityId) -> Result<RemovalOutcome, PanelError> {
        let outcome = match self.gateway.remove_entity(entity_id) {
            Ok(outcome) => outcome,
            Err(error) => {
                let context = format!("Error removing entity {entity_id}");
                return Err(self.fail_gateway(&context, error));
            }
        };
        info!(
            %entity_id,
            removed_config_entry = outcome.removed_config_entry,
            "entity removed"
        );

        self.state.selected.remove(entity_id);
        self.extras.forget(entity_id);
        self.extras.log(
            ActivityKind::Remove,
            entity_id.as_str(),
            OffsetDateTime::now_utc(),
        );
        match &outcome.warning {
            Some(warning) => self.notify(
                NoticeLevel::Warning,
                format!("Removed {entity_id}. {warning}"),
            ),
            None => self.notify(NoticeLevel::Success, format!("Removed {entity_id}")),
        }
        self.refresh_after_change();
        Ok(outcome)
    }

    /// Renames one pair at a time; the host has no bulk rename command.
    fn apply_bulk_rename(
        &mut self,
        pairs: &[RenamePair],
        record: bool,
    ) -> Result<BulkOutcome, PanelError> {
        if pairs.is_empty() {
            return Err(self.fail(PanelError::NothingSelected));
        }

        let mut outcome = BulkOutcome::default();
        let mut renamed = Vec::new();
        let mut first_error = None;
        for pair in pairs {
            let result = check_rename(&pair.old, &pair.new).and_then(|()| {
                self.gateway
                    .rename(&pair.old, &pair.new)
                    .map_err(PanelError::from)
            });
            match result {
                Ok(()) => {
                    if self.state.selected.remove(&pair.old) {
                        self.state.selected.insert(pair.new.clone());
                    }
                    self.extras.rekey(&pair.old, &pair.new);
                    outcome.succeeded.push(pair.new.clone());
                    renamed.push(pair.clone());
                }
                Err(error) => {
                    warn!(old = %pair.old, new = %pair.new, %error, "rename failed");
                    outcome.failed.push(BulkFailure {
                        entity_id: pair.old.clone(),
                        error: Some(error.to_string()),
                    });
                    first_error.get_or_insert(error);
                }
            }
        }

        if renamed.is_empty()
            && let Some(error) = first_error
        {
            return Err(match error {
                PanelError::Transport(error) => self.fail_gateway("Error renaming entities", error),
                other => self.fail(other),
            });
        }
        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "bulk rename finished"
        );

        let count = renamed.len();
        if record {
            self.extras.log(
                ActivityKind::BulkRename,
                format!("{count} entities"),
                OffsetDateTime::now_utc(),
            );
            self.history.record(HistoryAction::BulkRename(renamed));
        }

        if outcome.is_partial() {
            let failed: Vec<&str> = outcome
                .failed
                .iter()
                .take(3)
                .map(|failure| failure.entity_id.as_str())
                .collect();
            self.notify(
                NoticeLevel::Warning,
                format!(
                    "Renamed {count} of {} entities; {} failed ({})",
                    pairs.len(),
                    outcome.failed.len(),
                    failed.join(", "),
                ),
            );
        } else if record {
            self.notify_with_undo(format!("Renamed {count} entities"));
        }

        self.refresh_after_change();
        Ok(outcome)
    }

    fn refresh_after_change(&mut self) {
        if let Err(error) = self.refresh() {
            warn!(%error, "refresh after change failed");
        }
    }

    fn selected_ids(&self) -> Vec<EntityId> {
        self.state.selected.iter().cloned().collect()
    }

    fn integration_entity_ids(&mut self, integration: &str) -> Result<Vec<EntityId>, PanelError> {
        match self.dataset.integration(integration) {
            Some(group) => Ok(group.entity_ids()),
            None => Err(self.fail(PanelError::UnknownIntegration(integration.to_owned()))),
        }
    }

    fn device_entity_ids(
        &mut self,
        integration: &str,
        device_id: &DeviceId,
    ) -> Result<Vec<EntityId>, PanelError> {
        let entity_ids = self
            .dataset
            .integration(integration)
            .and_then(|group| group.device(device_id))
            .map(|device| {
                device
                    .entities
                    .iter()
                    .map(|entity| entity.entity_id.clone())
                    .collect()
            });
        match entity_ids {
            Some(entity_ids) => Ok(entity_ids),
            None => Err(self.fail(PanelError::UnknownDevice {
                integration: integration.to_owned(),
                device: device_id.to_string(),
            })),
        }
    }

    fn fail(&mut self, error: PanelError) -> PanelError {
        let message = error.to_string();
        let mut chars = message.chars();
        let message = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => message,
        };
        self.notify(NoticeLevel::Error, message);
        error
    }

    fn fail_gateway(&mut self, context: &str, error: GatewayError) -> PanelError {
        self.notify(NoticeLevel::Error, format!("{context}: {error}"));
        PanelError::Transport(error)
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        let notification = Notification::new(level, message);
        debug!(level = level.as_str(), message = %notification.message, "notification");
        self.notifications.push(notification);
    }

    fn notify_with_undo(&mut self, message: String) {
        let notification =
            Notification::new(NoticeLevel::Success, message).with_action("undo", "Undo");
        debug!(message = %notification.message, "notification");
        self.notifications.push(notification);
    }
}

const RENAME_PREVIEW: usize = 3;

fn check_rename(old: &EntityId, new: &EntityId) -> Result<(), PanelError> {
    if !new.is_well_formed() {
        return Err(PanelError::InvalidEntityId(new.to_string()));
    }
    if old.domain() != new.domain() {
        return Err(PanelError::DomainMismatch {
            from: old.domain().unwrap_or_default().to_owned(),
            to: new.domain().unwrap_or_default().to_owned(),
        });
    }
    Ok(())
}

/// Replaces `find` inside the object id; the domain is never touched.
fn plan_rename(
    entity_id: &EntityId,
    find: &str,
    replace: &str,
    case_sensitive: bool,
) -> Option<RenamePair> {
    let (domain, object_id) = entity_id.as_str().split_once('.')?;
    let renamed = if case_sensitive {
        object_id.replace(find, replace)
    } else {
        replace_ignoring_case(object_id, find, replace)
    };
    (renamed != object_id)
        .then(|| RenamePair::new(entity_id.clone(), format!("{domain}.{renamed}")))
}

fn replace_ignoring_case(haystack: &str, find: &str, replace: &str) -> String {
    let lowered = haystack.to_ascii_lowercase();
    let needle = find.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    for (start, _) in lowered.match_indices(&needle) {
        out.push_str(&haystack[last..start]);
        out.push_str(replace);
        last = start + needle.len();
    }
    out.push_str(&haystack[last..]);
    out
}
