//! Core machinery for drainage-network flow simulation.
//!
//! A drainage network couples two node kinds: catchments, which produce
//! flux each timestep through a pluggable [`Formulation`], and nexuses,
//! which accumulate upstream flux and release percentage-apportioned shares
//! downstream through a strict ledger protocol. The [`Simulation`] driver
//! alternates a deposit phase and a release phase per timestep; the
//! separation guarantees no downstream consumer ever sees a partial
//! upstream sum, and the nexus ledger enforces that the released shares
//! conserve the deposited mass.
//!
//! Formulations are built per catchment by a [`FormulationRegistry`] from a
//! JSON configuration tree with global defaults and per-catchment
//! overrides. The drainage graph itself arrives already resolved; geometry
//! and feature parsing are upstream concerns.
//!
//! [`Formulation`]: formulation::Formulation
//! [`Simulation`]: simulation::Simulation
//! [`FormulationRegistry`]: registry::FormulationRegistry

pub mod catchment;
pub mod config;
pub mod errors;
mod example_formulations;
pub mod forcing;
pub mod formulation;
pub mod network;
pub mod nexus;
pub mod output;
pub mod registry;
pub mod simulation;

// Commonly used items, re-exported for convenience
pub use errors::{HydronetError, HydronetResult};
pub use nexus::{LedgerState, Nexus, PointNexus, TimeStep, PERCENT_EPSILON};
