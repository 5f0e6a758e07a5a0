//! netstate CLI
//!
//! Command implementations behind the `netstate` binary. Every command works
//! on an [`context::AppContext`] so tests can run them against a simulated
//! host.

pub mod commands;
pub mod context;

#[cfg(test)]
mod tests;
