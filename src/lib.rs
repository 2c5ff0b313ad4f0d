//! Umbrella crate for the hydronet workspace.
//!
//! Re-exports the simulation core and the bundled formulations so a
//! downstream consumer can depend on one crate:
//!
//! ```ignore
//! use hydronet::core::network::{Network, NodeDefinition};
//! use hydronet::core::simulation::Simulation;
//! use hydronet::formulations::default_registry;
//! ```

pub use hydronet_core as core;
pub use hydronet_formulations as formulations;
