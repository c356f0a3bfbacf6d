// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod controller;
pub mod extras;
pub mod gateway;
pub mod ids;
pub mod model;
pub mod portable;
pub mod state;
pub mod view;

pub use controller::*;
pub use extras::*;
pub use gateway::*;
pub use ids::*;
pub use model::*;
pub use portable::*;
pub use state::*;
pub use view::*;
