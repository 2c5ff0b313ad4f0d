//! Minimal formulations used to exercise the driver and network machinery
//! in tests.

use serde::{Deserialize, Serialize};

use crate::errors::HydronetResult;
use crate::forcing::ForcingConfig;
use crate::formulation::{EtParams, Formulation};
use crate::nexus::TimeStep;

/// A formulation returning a fixed response every timestep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ConstantFormulation {
    id: String,
    response: f64,
    forcing: ForcingConfig,
}

impl ConstantFormulation {
    pub(crate) fn new(id: impl Into<String>, response: f64) -> Self {
        Self {
            id: id.into(),
            response,
            forcing: ForcingConfig::new("./forcing/", "1970-01-01 00:00:00", "1970-01-30 23:00:00"),
        }
    }
}

#[typetag::serde]
impl Formulation for ConstantFormulation {
    fn id(&self) -> &str {
        &self.id
    }

    fn formulation_type(&self) -> &'static str {
        "constant"
    }

    fn get_response(
        &mut self,
        input_flux: f64,
        _timestep: TimeStep,
        _dt: f64,
        _et_params: &EtParams,
    ) -> HydronetResult<f64> {
        Ok(self.response + input_flux)
    }

    fn forcing(&self) -> &ForcingConfig {
        &self.forcing
    }
}
