//! Settlement engine for platform deposits and withdrawals: provider
//! adapters, order lifecycle state machines, ledger-consistent settlement,
//! and the coordination layer (locks, rate limits, risk dispatch).

pub mod api;
pub mod config;
pub mod coordination;
pub mod database;
pub mod engine;
pub mod error;
pub mod logging;
pub mod providers;
pub mod routing;
