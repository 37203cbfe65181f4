//! Test utilities for unit and HTTP-level testing.
//!
//! This module provides:
//! - Test data factories for creating valid test fixtures
//! - In-memory repository implementations that honour the SQL uniqueness rules
//! - A scripted billing provider with idempotency-key replay
//! - A builder for `AppState` wired entirely to these mocks

mod app_state_builder;
mod billing_mocks;
mod factories;
mod provider_mocks;

pub use app_state_builder::*;
pub use billing_mocks::*;
pub use factories::*;
pub use provider_mocks::*;
