//! The formulation registry and construction pipeline.
//!
//! The registry maps configuration type-keys to constructors. It is an
//! explicit object built once at startup and passed by reference into the
//! construction pipeline; nothing here is process-global. Construction
//! validates each catchment's realized parameter set against the ordered
//! required-parameter list registered with the constructor, and collects
//! errors across all catchments so a single pass reports every defect
//! before any simulation step runs.

use indexmap::IndexMap;
use log::info;

use crate::config::{realize_parameters, ConfigTree, ParameterMap};
use crate::errors::{HydronetError, HydronetResult};
use crate::forcing::ForcingConfig;
use crate::formulation::Formulation;

/// Constructor for one formulation variant.
///
/// Receives the catchment id, the realized (catchment-over-global) parameter
/// set, and the validated forcing configuration. Required parameters are
/// checked before this is called.
pub type FormulationConstructor =
    fn(&str, &ParameterMap, ForcingConfig) -> HydronetResult<Box<dyn Formulation>>;

struct RegistryEntry {
    required_parameters: &'static [&'static str],
    construct: FormulationConstructor,
}

/// Maps a configuration type-key to a formulation constructor.
pub struct FormulationRegistry {
    constructors: IndexMap<String, RegistryEntry>,
}

impl FormulationRegistry {
    pub fn new() -> Self {
        Self {
            constructors: IndexMap::new(),
        }
    }

    /// Register a constructor under a type-key together with the ordered
    /// list of parameters it requires.
    pub fn register(
        &mut self,
        type_key: impl Into<String>,
        required_parameters: &'static [&'static str],
        construct: FormulationConstructor,
    ) {
        self.constructors.insert(
            type_key.into(),
            RegistryEntry {
                required_parameters,
                construct,
            },
        );
    }

    pub fn contains(&self, type_key: &str) -> bool {
        self.constructors.contains_key(type_key)
    }

    /// The registered type-keys, in registration order.
    pub fn type_keys(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Find the registered type-key present in a configuration block.
    pub fn formulation_key<'a>(&self, block: &'a ParameterMap) -> Option<&'a str> {
        block
            .keys()
            .map(String::as_str)
            .find(|key| self.contains(key))
    }

    /// Construct one formulation, validating the realized parameter set
    /// against the registered required-parameter list first.
    pub fn construct(
        &self,
        type_key: &str,
        id: &str,
        parameters: &ParameterMap,
        forcing: ForcingConfig,
    ) -> HydronetResult<Box<dyn Formulation>> {
        let entry =
            self.constructors
                .get(type_key)
                .ok_or_else(|| HydronetError::UnknownFormulationType {
                    id: id.to_string(),
                })?;

        let missing: Vec<String> = entry
            .required_parameters
            .iter()
            .filter(|key| !parameters.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(HydronetError::MissingParameters {
                id: id.to_string(),
                missing,
            });
        }

        (entry.construct)(id, parameters, forcing)
    }

    /// Build one formulation per catchment described by the configuration
    /// tree.
    ///
    /// Errors are collected across all catchments and returned together, so
    /// every defective block is reported before any simulation step begins.
    pub fn construct_all(
        &self,
        tree: &ConfigTree,
    ) -> Result<IndexMap<String, Box<dyn Formulation>>, Vec<HydronetError>> {
        let global_key = tree.global_keys().find(|key| self.contains(key));
        let global_parameters = global_key.and_then(|key| tree.global_parameters(key));
        let global_forcing = tree.global_forcing();

        let mut formulations = IndexMap::new();
        let mut errors = Vec::new();

        for (id, block) in tree.catchments() {
            let result = block.and_then(|block| {
                self.construct_catchment(id, block, global_key, global_parameters, global_forcing)
            });
            match result {
                Ok(formulation) => {
                    formulations.insert(id.to_string(), formulation);
                }
                Err(error) => errors.push(error),
            }
        }

        if errors.is_empty() {
            info!("constructed {} formulations", formulations.len());
            Ok(formulations)
        } else {
            Err(errors)
        }
    }

    fn construct_catchment(
        &self,
        id: &str,
        block: &ParameterMap,
        global_key: Option<&str>,
        global_parameters: Option<&ParameterMap>,
        global_forcing: Option<&ParameterMap>,
    ) -> HydronetResult<Box<dyn Formulation>> {
        let type_key = self
            .formulation_key(block)
            .or(global_key)
            .ok_or_else(|| HydronetError::UnknownFormulationType { id: id.to_string() })?;

        let catchment_parameters = match block.get(type_key) {
            Some(value) => {
                Some(
                    value
                        .as_object()
                        .ok_or_else(|| HydronetError::InvalidParameter {
                            id: id.to_string(),
                            message: format!("'{type_key}' block must be a JSON object"),
                        })?,
                )
            }
            None => None,
        };
        let parameters = realize_parameters(catchment_parameters, global_parameters);

        let catchment_forcing = block.get("forcing").and_then(serde_json::Value::as_object);
        let forcing_block = realize_parameters(catchment_forcing, global_forcing);
        let forcing = ForcingConfig::from_realized(id, &forcing_block)?;

        self.construct(type_key, id, &parameters, forcing)
    }
}

impl Default for FormulationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
