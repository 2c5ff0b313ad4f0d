//! Toy conceptual runoff formulation with soil and groundwater reservoirs.
//!
//! Water infiltrates a single soil column; saturation excess runs off the
//! surface immediately, drainable water above field capacity percolates to
//! a nonlinear groundwater reservoir or drains laterally through a Nash
//! cascade, and the groundwater reservoir discharges exponentially. The
//! response returned each timestep is the per-unit-area sum of those flux
//! paths.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hydronet_core::config::ParameterMap;
use hydronet_core::errors::{HydronetError, HydronetResult};
use hydronet_core::forcing::ForcingConfig;
use hydronet_core::formulation::{EtParams, Formulation};
use hydronet_core::nexus::TimeStep;
use hydronet_core::registry::FormulationRegistry;

/// Total soil column depth, m.
const SOIL_COLUMN_DEPTH: f64 = 2.0;

/// Fraction of available soil water the loss path may draw in one step.
const ET_LOSS_FRACTION: f64 = 0.001;

/// Parameters required in every `tshirt` configuration block, in reporting
/// order.
pub const REQUIRED_PARAMETERS: [&str; 16] = [
    "maxsmc",
    "wltsmc",
    "satdk",
    "satpsi",
    "slope",
    "b",
    "multiplier",
    "alpha_fc",
    "klf",
    "kn",
    "nash_n",
    "cgw",
    "expon",
    "max_groundwater_storage_meters",
    "soil_storage_percentage",
    "groundwater_storage_percentage",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TshirtParameters {
    /// Saturated soil moisture content
    pub maxsmc: f64,
    /// Wilting-point soil moisture content
    pub wltsmc: f64,
    /// Saturated hydraulic conductivity, m/s
    pub satdk: f64,
    /// Saturated capillary head, m
    pub satpsi: f64,
    /// Terrain slope factor applied to percolation
    pub slope: f64,
    /// Clapp-Hornberger soil water exponent
    pub b: f64,
    /// Multiplier routing water rapidly downslope in the subsurface
    pub multiplier: f64,
    /// Field-capacity scaling constant for the suction head
    pub alpha_fc: f64,
    /// Lateral flow calibration coefficient, 1/s
    pub klf: f64,
    /// Nash cascade linear reservoir coefficient, per step
    pub kn: f64,
    /// Number of Nash cascade reservoirs
    pub nash_n: usize,
    /// Groundwater reservoir flow coefficient, m per step
    pub cgw: f64,
    /// Groundwater reservoir flow exponent
    pub expon: f64,
    /// Groundwater reservoir storage ceiling, m
    pub max_groundwater_storage_meters: f64,
    /// Initial soil storage as a fraction of capacity
    pub soil_storage_percentage: f64,
    /// Initial groundwater storage as a fraction of the ceiling
    pub groundwater_storage_percentage: f64,
}

/// Soil-column runoff formulation with groundwater and Nash-cascade lateral
/// routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TshirtFormulation {
    id: String,
    parameters: TshirtParameters,
    forcing: ForcingConfig,
    /// Water stored in the soil column, m
    soil_storage: f64,
    /// Water stored in the groundwater reservoir, m
    groundwater_storage: f64,
    /// Contents of the Nash cascade reservoirs, m
    nash_storage: Vec<f64>,
}

impl TshirtFormulation {
    pub fn from_parameters(
        id: impl Into<String>,
        parameters: TshirtParameters,
        forcing: ForcingConfig,
    ) -> Self {
        let soil_storage = parameters.soil_storage_percentage * Self::max_soil_storage(&parameters);
        let groundwater_storage =
            parameters.groundwater_storage_percentage * parameters.max_groundwater_storage_meters;
        let nash_storage = vec![0.0; parameters.nash_n];
        Self {
            id: id.into(),
            parameters,
            forcing,
            soil_storage,
            groundwater_storage,
            nash_storage,
        }
    }

    /// Maximum water the soil column can hold, m.
    fn max_soil_storage(parameters: &TshirtParameters) -> f64 {
        SOIL_COLUMN_DEPTH * parameters.maxsmc
    }

    /// Storage below which water is held against gravity, m.
    fn field_capacity_storage(&self) -> f64 {
        let relative_suction =
            (self.parameters.alpha_fc * self.parameters.satpsi / SOIL_COLUMN_DEPTH).min(1.0);
        relative_suction * Self::max_soil_storage(&self.parameters)
    }

    /// Bounded loss drawdown from the soil column, m.
    fn et_loss(&self, et_params: &EtParams) -> f64 {
        if et_params.max_combined_contents <= 0.0 {
            return 0.0;
        }
        let wilting_storage = SOIL_COLUMN_DEPTH * self.parameters.wltsmc;
        let available = (self.soil_storage - wilting_storage).max(0.0);
        let demand = (self.soil_storage * 1000.0 / et_params.max_combined_contents).min(1.0);
        (et_params.vegetation_adjustment * demand * ET_LOSS_FRACTION * available).min(available)
    }

    /// Pass lateral inflow through the Nash cascade, returning the routed
    /// outflow for this step, m.
    fn route_nash(&mut self, inflow: f64) -> f64 {
        let mut carry = inflow;
        for storage in self.nash_storage.iter_mut() {
            *storage += carry;
            let outflow = (self.parameters.kn * *storage).min(*storage);
            *storage -= outflow;
            carry = outflow;
        }
        carry
    }
}

#[typetag::serde]
impl Formulation for TshirtFormulation {
    fn id(&self) -> &str {
        &self.id
    }

    fn formulation_type(&self) -> &'static str {
        "tshirt"
    }

    fn get_response(
        &mut self,
        input_flux: f64,
        _timestep: TimeStep,
        dt: f64,
        et_params: &EtParams,
    ) -> HydronetResult<f64> {
        let max_storage = Self::max_soil_storage(&self.parameters);
        let field_capacity = self.field_capacity_storage();
        let gw_ceiling = self.parameters.max_groundwater_storage_meters;

        // Infiltrate incoming water; saturation excess runs off immediately.
        self.soil_storage += input_flux * dt;
        let surface_runoff = (self.soil_storage - max_storage).max(0.0);
        self.soil_storage -= surface_runoff;

        self.soil_storage -= self.et_loss(et_params);

        // Drainable water sits above field capacity; percolation scales with
        // the Clapp-Hornberger conductivity curve.
        let drainable = (self.soil_storage - field_capacity).max(0.0);
        let drainable_fraction = if max_storage > field_capacity {
            drainable / (max_storage - field_capacity)
        } else {
            0.0
        };
        let conductivity = drainable_fraction.powf(2.0 * self.parameters.b + 3.0);
        let percolation =
            (self.parameters.satdk * self.parameters.slope * conductivity * dt).min(drainable);
        self.soil_storage -= percolation;

        // The groundwater reservoir spills whatever the ceiling rejects.
        let gw_overflow = (self.groundwater_storage + percolation - gw_ceiling).max(0.0);
        self.groundwater_storage += percolation - gw_overflow;

        // Lateral subsurface drainage feeds the Nash cascade.
        let remaining_drainable = (self.soil_storage - field_capacity).max(0.0);
        let lateral = (self.parameters.klf * self.parameters.multiplier * remaining_drainable * dt)
            .min(remaining_drainable);
        self.soil_storage -= lateral;
        let routed_lateral = self.route_nash(lateral);

        // Nonlinear groundwater discharge.
        let gw_fraction = if gw_ceiling > 0.0 {
            self.groundwater_storage / gw_ceiling
        } else {
            0.0
        };
        let gw_discharge = (self.parameters.cgw * (self.parameters.expon * gw_fraction).exp_m1())
            .max(0.0)
            .min(self.groundwater_storage);
        self.groundwater_storage -= gw_discharge;

        Ok((surface_runoff + gw_overflow + routed_lateral + gw_discharge) / dt)
    }

    fn forcing(&self) -> &ForcingConfig {
        &self.forcing
    }
}

pub(crate) fn register(registry: &mut FormulationRegistry) {
    registry.register("tshirt", &REQUIRED_PARAMETERS, construct);
}

fn construct(
    id: &str,
    parameters: &ParameterMap,
    forcing: ForcingConfig,
) -> HydronetResult<Box<dyn Formulation>> {
    let parameters: TshirtParameters = serde_json::from_value(Value::Object(parameters.clone()))
        .map_err(|error| HydronetError::InvalidParameter {
            id: id.to_string(),
            message: error.to_string(),
        })?;
    Ok(Box::new(TshirtFormulation::from_parameters(
        id, parameters, forcing,
    )))
}
