//! Database query functions organized by domain.

pub mod balances;
pub mod distributions;
pub mod packages;
pub mod payouts;
pub mod purchases;
pub mod rates;
pub mod registry;
pub mod splits;
pub mod subscriptions;
pub mod transactions;
pub mod workflows;
