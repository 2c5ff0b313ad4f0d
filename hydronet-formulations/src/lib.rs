//! Concrete hydrological formulations for the hydronet simulation core.
//!
//! Each formulation registers a configuration type-key with the
//! [`FormulationRegistry`]; [`default_registry`] returns a registry
//! pre-loaded with everything this crate provides.
//!
//! [`FormulationRegistry`]: hydronet_core::registry::FormulationRegistry
//! [`default_registry`]: formulations::default_registry

pub mod formulations;

pub use formulations::default_registry;
