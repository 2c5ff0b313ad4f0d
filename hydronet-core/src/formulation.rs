//! Pluggable per-catchment hydrological response models.

use serde::{Deserialize, Serialize};

use crate::errors::HydronetResult;
use crate::forcing::ForcingConfig;
use crate::nexus::TimeStep;

/// Auxiliary evapotranspiration data threaded through every response call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtParams {
    /// Shape parameter of the scaled soil-moisture distribution function
    pub distribution_shape: f64,
    /// Vegetation adjustment applied to potential losses
    pub vegetation_adjustment: f64,
    /// Model timestep the loss estimates were calibrated against, s
    pub model_timestep: f64,
    /// Maximum height of the soil moisture storage tank, mm
    pub max_soil_storage_height: f64,
    /// Maximum combined contents of the distributed stores, mm
    pub max_combined_contents: f64,
}

impl Default for EtParams {
    fn default() -> Self {
        let distribution_shape = 1.3;
        let max_soil_storage_height = 400.0;
        Self {
            distribution_shape,
            vegetation_adjustment: 0.99,
            model_timestep: 0.0,
            max_soil_storage_height,
            max_combined_contents: max_soil_storage_height / (1.0 + distribution_shape),
        }
    }
}

/// A hydrological response model owned by a single catchment.
///
/// Each variant is constructed by the [`FormulationRegistry`] from the
/// configuration type-key present in the catchment's block. The internal
/// numerics of a formulation are its own concern; the driver only sees a
/// flux response per timestep.
///
/// [`FormulationRegistry`]: crate::registry::FormulationRegistry
#[typetag::serde]
pub trait Formulation: std::fmt::Debug {
    /// The identifier of the catchment this formulation was built for.
    fn id(&self) -> &str;

    /// The registry type-key this formulation was constructed under.
    fn formulation_type(&self) -> &'static str;

    /// Compute the flux response for one timestep.
    ///
    /// `input_flux` is water entering from upstream in m/s, `timestep` the
    /// index of the step being solved and `dt` its duration in seconds. The
    /// returned response is a per-unit-area flux in m/s; the driver scales
    /// it by the catchment area before routing.
    fn get_response(
        &mut self,
        input_flux: f64,
        timestep: TimeStep,
        dt: f64,
        et_params: &EtParams,
    ) -> HydronetResult<f64>;

    /// The forcing window this formulation was configured with.
    fn forcing(&self) -> &ForcingConfig;
}
