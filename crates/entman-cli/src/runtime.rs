// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use entman_app::Extras;
use entman_db::Store;
use tracing::debug;

pub struct DbRuntime<'a> {
    store: &'a Store,
}

impl<'a> DbRuntime<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }
}

impl entman_tui::AppRuntime for DbRuntime<'_> {
    fn save_extras(&mut self, extras: &Extras) -> Result<()> {
        self.store.save_extras(extras)?;
        debug!(
            favorites = extras.favorites.len(),
            presets = extras.presets.len(),
            "extras saved"
        );
        Ok(())
    }
}
