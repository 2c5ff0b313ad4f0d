//! The simulation configuration tree.
//!
//! Configuration arrives as a JSON tree with an optional `global` section
//! (shared formulation parameters and a shared forcing block) and a
//! `catchments` section of per-id blocks. A catchment block overrides the
//! global section key by key; anything it leaves out is filled from the
//! global values when the parameter set is realized.

use serde_json::{Map, Value};

use crate::errors::{HydronetError, HydronetResult};

/// A single configuration block: JSON object keys to values.
pub type ParameterMap = Map<String, Value>;

/// Parsed configuration tree.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    global: ParameterMap,
    catchments: ParameterMap,
}

impl ConfigTree {
    /// Parse a configuration tree from JSON text.
    pub fn from_json(text: &str) -> HydronetResult<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Build a configuration tree from an already-parsed JSON value.
    pub fn from_value(tree: Value) -> HydronetResult<Self> {
        let root = as_object(&tree, "<root>")?;
        let global = match root.get("global") {
            Some(section) => as_object(section, "global")?.clone(),
            None => ParameterMap::new(),
        };
        let catchments = match root.get("catchments") {
            Some(section) => as_object(section, "catchments")?.clone(),
            None => ParameterMap::new(),
        };
        Ok(Self { global, catchments })
    }

    /// Keys present in the global section (formulation type blocks plus
    /// `forcing`).
    pub fn global_keys(&self) -> impl Iterator<Item = &str> {
        self.global.keys().map(String::as_str)
    }

    /// The global parameter block registered under a type-key, if present.
    pub fn global_parameters(&self, type_key: &str) -> Option<&ParameterMap> {
        self.global.get(type_key).and_then(Value::as_object)
    }

    /// The global forcing block, if present.
    pub fn global_forcing(&self) -> Option<&ParameterMap> {
        self.global.get("forcing").and_then(Value::as_object)
    }

    pub fn is_empty(&self) -> bool {
        self.catchments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.catchments.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.catchments.contains_key(id)
    }

    /// Iterate over (catchment id, configuration block) pairs.
    ///
    /// A catchment entry that is not an object fails with
    /// [`HydronetError::InvalidParameter`] at the call site consuming it.
    pub fn catchments(&self) -> impl Iterator<Item = (&str, HydronetResult<&ParameterMap>)> {
        self.catchments
            .iter()
            .map(|(id, block)| (id.as_str(), as_object(block, id)))
    }
}

fn as_object<'a>(value: &'a Value, id: &str) -> HydronetResult<&'a ParameterMap> {
    value
        .as_object()
        .ok_or_else(|| HydronetError::InvalidParameter {
            id: id.to_string(),
            message: "expected a JSON object".to_string(),
        })
}

/// Realize a parameter set: per-catchment values win, absent keys are filled
/// from the global set.
pub fn realize_parameters(
    catchment: Option<&ParameterMap>,
    global: Option<&ParameterMap>,
) -> ParameterMap {
    let mut realized = catchment.cloned().unwrap_or_default();
    if let Some(global) = global {
        for (key, value) in global {
            if !realized.contains_key(key) {
                realized.insert(key.clone(), value.clone());
            }
        }
    }
    realized
}
