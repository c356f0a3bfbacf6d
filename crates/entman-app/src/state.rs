// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeSet;

use crate::ids::*;
use crate::model::StateFilter;
use crate::view::{ALL_DOMAINS, Dataset, Filters};

/// Session-local view state. Never persisted except through filter presets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelState {
    pub filters: Filters,
    pub expanded_integrations: BTreeSet<String>,
    pub expanded_devices: BTreeSet<DeviceId>,
    pub selected: BTreeSet<EntityId>,
    pub menu_open: bool,
    domain_options: Vec<String>,
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            filters: Filters::default(),
            expanded_integrations: BTreeSet::new(),
            expanded_devices: BTreeSet::new(),
            selected: BTreeSet::new(),
            menu_open: false,
            domain_options: vec![ALL_DOMAINS.to_owned()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCommand {
    SetSearchTerm(String),
    SetViewState(StateFilter),
    CycleViewState,
    SetDomainFilter(String),
    CycleDomainFilter,
    ToggleFavoritesOnly,
    SetTagFilter(Option<String>),
    ToggleIntegrationExpanded(String),
    ToggleDeviceExpanded(DeviceId),
    CollapseAll,
    ToggleEntitySelected(EntityId),
    SelectEntities(Vec<EntityId>),
    ClearSelection,
    ToggleMenu,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    FiltersChanged,
    IntegrationExpanded { integration: String, expanded: bool },
    DeviceExpanded { device_id: DeviceId, expanded: bool },
    SelectionChanged { selected: usize },
    MenuToggled,
    DomainReset { previous: String },
    SelectionPruned { removed: usize },
}

impl PanelState {
    pub fn dispatch(&mut self, command: PanelCommand) -> Vec<PanelEvent> {
        match command {
            PanelCommand::SetSearchTerm(term) => {
                self.filters.search_term = term;
                vec![PanelEvent::FiltersChanged]
            }
            PanelCommand::SetViewState(view_state) => {
                self.filters.view_state = view_state;
                vec![PanelEvent::FiltersChanged]
            }
            PanelCommand::CycleViewState => {
                self.filters.view_state = self.filters.view_state.next();
                vec![PanelEvent::FiltersChanged]
            }
            PanelCommand::SetDomainFilter(domain) => {
                self.filters.domain = self.known_domain(&domain);
                vec![PanelEvent::FiltersChanged]
            }
            PanelCommand::CycleDomainFilter => self.rotate_domain(),
            PanelCommand::ToggleFavoritesOnly => {
                self.filters.favorites_only = !self.filters.favorites_only;
                vec![PanelEvent::FiltersChanged]
            }
            PanelCommand::SetTagFilter(tag) => {
                self.filters.tag = tag.filter(|tag| !tag.trim().is_empty());
                vec![PanelEvent::FiltersChanged]
            }
            PanelCommand::ToggleIntegrationExpanded(integration) => {
                let expanded = toggle(&mut self.expanded_integrations, integration.clone());
                vec![PanelEvent::IntegrationExpanded {
                    integration,
                    expanded,
                }]
            }
            PanelCommand::ToggleDeviceExpanded(device_id) => {
                let expanded = toggle(&mut self.expanded_devices, device_id.clone());
                vec![PanelEvent::DeviceExpanded {
                    device_id,
                    expanded,
                }]
            }
            PanelCommand::CollapseAll => {
                self.expanded_integrations.clear();
                self.expanded_devices.clear();
                Vec::new()
            }
            PanelCommand::ToggleEntitySelected(entity_id) => {
                toggle(&mut self.selected, entity_id);
                self.selection_changed()
            }
            PanelCommand::SelectEntities(entity_ids) => {
                self.selected.extend(entity_ids);
                self.selection_changed()
            }
            PanelCommand::ClearSelection => {
                self.selected.clear();
                self.selection_changed()
            }
            PanelCommand::ToggleMenu => {
                self.menu_open = !self.menu_open;
                vec![PanelEvent::MenuToggled]
            }
        }
    }

    pub fn domain_options(&self) -> &[String] {
        &self.domain_options
    }

    pub fn is_selected(&self, entity_id: &EntityId) -> bool {
        self.selected.contains(entity_id)
    }

    /// Reconciles filter and selection state with a freshly fetched dataset.
    ///
    /// The domain filter resets to `all` when its domain vanished, and selected
    /// ids that no longer exist are dropped. Expansion keys are left alone so
    /// they survive as long as the integration or device comes back.
    pub fn apply_dataset(&mut self, dataset: &Dataset) -> Vec<PanelEvent> {
        let mut events = Vec::new();
        self.domain_options = dataset.domain_options();

        if let Some(domain) = self.filters.domain.clone()
            && !self.domain_options.contains(&domain)
        {
            self.filters.domain = None;
            events.push(PanelEvent::DomainReset { previous: domain });
            events.push(PanelEvent::FiltersChanged);
        }

        let known = dataset.entity_ids();
        let before = self.selected.len();
        self.selected.retain(|entity_id| known.contains(entity_id));
        let removed = before - self.selected.len();
        if removed > 0 {
            events.push(PanelEvent::SelectionPruned { removed });
            events.push(PanelEvent::SelectionChanged {
                selected: self.selected.len(),
            });
        }
        events
    }

    fn known_domain(&self, domain: &str) -> Option<String> {
        if domain == ALL_DOMAINS {
            return None;
        }
        self.domain_options
            .iter()
            .find(|option| option.as_str() == domain)
            .cloned()
    }

    fn rotate_domain(&mut self) -> Vec<PanelEvent> {
        let current = self.filters.domain_label().to_owned();
        let position = self
            .domain_options
            .iter()
            .position(|option| *option == current)
            .unwrap_or(0);
        let next = (position + 1) % self.domain_options.len().max(1);
        let domain = self
            .domain_options
            .get(next)
            .cloned()
            .unwrap_or_else(|| ALL_DOMAINS.to_owned());
        self.filters.domain = self.known_domain(&domain);
        vec![PanelEvent::FiltersChanged]
    }

    fn selection_changed(&self) -> Vec<PanelEvent> {
        vec![PanelEvent::SelectionChanged {
            selected: self.selected.len(),
        }]
    }
}

fn toggle<T: Ord>(set: &mut BTreeSet<T>, value: T) -> bool {
    if set.remove(&value) {
        false
    } else {
        set.insert(value);
        true
    }
}
