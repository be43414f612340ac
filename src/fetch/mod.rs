//! Usage: Authenticated multi-endpoint fetch (classification, cycle, UI state).

pub mod classify;
pub mod cycle;
pub mod state;
