//! Formulation implementations and their registry wiring.

pub mod simple_lumped;
pub mod tshirt;

use hydronet_core::registry::FormulationRegistry;

/// A registry pre-loaded with every formulation this crate provides.
pub fn default_registry() -> FormulationRegistry {
    let mut registry = FormulationRegistry::new();
    tshirt::register(&mut registry);
    simple_lumped::register(&mut registry);
    registry
}
