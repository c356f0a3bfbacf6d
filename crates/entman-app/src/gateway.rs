// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::time::Duration;
use thiserror::Error;

use crate::ids::EntityId;
use crate::model::{
    BulkOutcome, DeviceInfo, IntegrationGroup, RegistryEntry, RemovalOutcome, StateFilter,
};

/// Largest id list the host accepts in one bulk command.
pub const MAX_BULK_ENTITIES: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("connection to Home Assistant failed: {0}")]
    Transport(String),
    #[error("Home Assistant did not answer within {0:?}")]
    Timeout(Duration),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("{message} ({code})")]
    Rejected { code: String, message: String },
    #[error("unexpected response from Home Assistant: {0}")]
    Decode(String),
}

/// Request/response access to the host registry commands.
///
/// Implementations pass calls straight through: no retries, no caching.
pub trait Gateway {
    fn fetch_entities(&mut self, state: StateFilter)
    -> Result<Vec<IntegrationGroup>, GatewayError>;
    fn fetch_device_registry(&mut self) -> Result<Vec<DeviceInfo>, GatewayError>;
    fn enable(&mut self, entity_id: &EntityId) -> Result<(), GatewayError>;
    fn disable(&mut self, entity_id: &EntityId) -> Result<(), GatewayError>;
    fn bulk_enable(&mut self, entity_ids: &[EntityId]) -> Result<BulkOutcome, GatewayError>;
    fn bulk_disable(&mut self, entity_ids: &[EntityId]) -> Result<BulkOutcome, GatewayError>;
    fn rename(&mut self, old: &EntityId, new: &EntityId) -> Result<(), GatewayError>;
    fn set_display_name(
        &mut self,
        entity_id: &EntityId,
        name: Option<&str>,
    ) -> Result<(), GatewayError>;
    /// Deletes the registry entry; the host refuses ids it does not know.
    fn remove_entity(&mut self, entity_id: &EntityId) -> Result<RemovalOutcome, GatewayError>;
    fn export_states(&mut self) -> Result<Vec<RegistryEntry>, GatewayError>;
}

impl<G: Gateway + ?Sized> Gateway for Box<G> {
    fn fetch_entities(
        &mut self,
        state: StateFilter,
    ) -> Result<Vec<IntegrationGroup>, GatewayError> {
        (**self).fetch_entities(state)
    }

    fn fetch_device_registry(&mut self) -> Result<Vec<DeviceInfo>, GatewayError> {
        (**self).fetch_device_registry()
    }

    fn enable(&mut self, entity_id: &EntityId) -> Result<(), GatewayError> {
        (**self).enable(entity_id)
    }

    fn disable(&mut self, entity_id: &EntityId) -> Result<(), GatewayError> {
        (**self).disable(entity_id)
    }

    fn bulk_enable(&mut self, entity_ids: &[EntityId]) -> Result<BulkOutcome, GatewayError> {
        (**self).bulk_enable(entity_ids)
    }

    fn bulk_disable(&mut self, entity_ids: &[EntityId]) -> Result<BulkOutcome, GatewayError> {
        (**self).bulk_disable(entity_ids)
    }

    fn rename(&mut self, old: &EntityId, new: &EntityId) -> Result<(), GatewayError> {
        (**self).rename(old, new)
    }

    fn set_display_name(
        &mut self,
        entity_id: &EntityId,
        name: Option<&str>,
    ) -> Result<(), GatewayError> {
        (**self).set_display_name(entity_id, name)
    }

    fn remove_entity(&mut self, entity_id: &EntityId) -> Result<RemovalOutcome, GatewayError> {
        (**self).remove_entity(entity_id)
    }

    fn export_states(&mut self) -> Result<Vec<RegistryEntry>, GatewayError> {
        (**self).export_states()
    }
}
