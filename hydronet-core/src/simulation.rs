//! The time-stepped simulation driver.
//!
//! Every timestep runs in two phases. The deposit phase evaluates each
//! catchment's formulation and deposits the area-scaled flux into its
//! downstream nexus. Only after every deposit has landed does the release
//! phase begin, letting each receiving catchment draw its resolved share.
//! That ordering is the one barrier the ledger protocol depends on, and it
//! is provided here by sequential execution. After the release phase the
//! driver advances the ledger watermark; the nexuses never reclaim memory
//! on their own.

use std::path::PathBuf;

use log::{debug, info};

use crate::errors::{HydronetError, HydronetResult};
use crate::formulation::EtParams;
use crate::network::Network;
use crate::nexus::TimeStep;
use crate::output::OutputSet;

/// Build a [`Simulation`] over a network.
pub struct SimulationBuilder {
    network: Option<Network>,
    step_duration: f64,
    num_steps: TimeStep,
    et_params: EtParams,
    output_directory: Option<PathBuf>,
}

impl SimulationBuilder {
    fn new(network: Network) -> Self {
        Self {
            network: Some(network),
            step_duration: 3600.0,
            num_steps: 720,
            et_params: EtParams::default(),
            output_directory: None,
        }
    }

    /// Set the duration of one timestep in seconds.
    pub fn with_step_duration(&mut self, step_duration: f64) -> &mut Self {
        self.step_duration = step_duration;
        self
    }

    /// Set the number of timesteps the run covers.
    pub fn with_num_steps(&mut self, num_steps: TimeStep) -> &mut Self {
        self.num_steps = num_steps;
        self
    }

    pub fn with_et_params(&mut self, et_params: EtParams) -> &mut Self {
        self.et_params = et_params;
        self
    }

    /// Write one `<id>_output.csv` record stream per node under `directory`.
    ///
    /// Without an output directory the run produces no files.
    pub fn with_output_directory(&mut self, directory: impl Into<PathBuf>) -> &mut Self {
        self.output_directory = Some(directory.into());
        self
    }

    pub fn build(&mut self) -> HydronetResult<Simulation> {
        let network = self
            .network
            .take()
            .ok_or_else(|| HydronetError::LookupError {
                id: "<network>".to_string(),
            })?;

        let outputs = match &self.output_directory {
            Some(directory) => {
                let node_ids: Vec<String> = network.node_ids().map(String::from).collect();
                Some(OutputSet::create(directory, node_ids)?)
            }
            None => None,
        };

        Ok(Simulation {
            network,
            step_duration: self.step_duration,
            num_steps: self.num_steps,
            et_params: self.et_params.clone(),
            outputs,
            timestep: 0,
        })
    }
}

/// Drives a network through a bounded batch of timesteps.
pub struct Simulation {
    network: Network,
    step_duration: f64,
    num_steps: TimeStep,
    et_params: EtParams,
    outputs: Option<OutputSet>,
    timestep: TimeStep,
}

impl Simulation {
    pub fn builder(network: Network) -> SimulationBuilder {
        SimulationBuilder::new(network)
    }

    pub fn current_timestep(&self) -> TimeStep {
        self.timestep
    }

    /// Returns true if the run has no more timesteps to process.
    pub fn finished(&self) -> bool {
        self.timestep >= self.num_steps
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Solve one timestep: deposit phase, barrier, release phase, then
    /// watermark advance.
    pub fn step(&mut self) -> HydronetResult<()> {
        let t = self.timestep;
        debug!("time step {t}");

        // Deposit phase: every catchment's response lands in its nexus
        // before any release is granted.
        for (id, catchment) in self.network.catchments.iter_mut() {
            let response =
                catchment
                    .formulation
                    .get_response(0.0, t, self.step_duration, &self.et_params)?;
            if let Some(outputs) = self.outputs.as_mut() {
                outputs.write_record(id, t, response)?;
            }

            let flux = response * catchment.area;
            for nexus_id in &catchment.outflow_nexuses {
                let nexus = self.network.nexuses.get_mut(nexus_id).ok_or_else(|| {
                    HydronetError::LookupError {
                        id: nexus_id.clone(),
                    }
                })?;
                nexus.deposit(id, flux, t)?;
            }
        }

        // Release phase: each receiving catchment draws its resolved share.
        // A terminal nexus drains the full flux under its own id so its
        // record stream still carries the routed value.
        for (nexus_id, nexus) in self.network.nexuses.iter_mut() {
            let mut released_total = 0.0;
            match self.network.shares.get(nexus_id) {
                Some(shares) if !shares.is_empty() => {
                    for (requester, percent) in shares {
                        released_total += nexus.release(requester, *percent, t)?;
                    }
                }
                _ => {
                    released_total = nexus.release(nexus_id, 100.0, t)?;
                }
            }
            if let Some(outputs) = self.outputs.as_mut() {
                outputs.write_record(nexus_id, t, released_total)?;
            }
        }

        // The step just drained is no longer needed; reclaim its ledger
        // entries everywhere.
        self.network.advance_watermark(t + 1)?;
        self.timestep += 1;
        Ok(())
    }

    /// Step the simulation to the end of the run.
    pub fn run(&mut self) -> HydronetResult<()> {
        info!(
            "running {} timesteps over {} catchments and {} nexuses",
            self.num_steps,
            self.network.catchment_count(),
            self.network.nexus_count()
        );
        while !self.finished() {
            self.step()?;
        }
        if let Some(outputs) = self.outputs.as_mut() {
            outputs.flush_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example_formulations::ConstantFormulation;
    use crate::formulation::Formulation;
    use crate::network::{NetworkBuilder, NodeDefinition};
    use crate::nexus::LedgerState;
    use is_close::is_close;

    fn formulation(id: &str, response: f64) -> Box<dyn Formulation> {
        Box::new(ConstantFormulation::new(id, response))
    }

    /// cat-1 and cat-2 feed nex-1; cat-3 drains nex-1 into terminal nex-2.
    fn network() -> Network {
        let mut builder = NetworkBuilder::new();
        builder.with_nodes(vec![
            NodeDefinition::catchment("cat-1")
                .with_downstream(["nex-1"])
                .with_area(2.0),
            NodeDefinition::catchment("cat-2").with_downstream(["nex-1"]),
            NodeDefinition::nexus("nex-1").with_downstream(["cat-3"]),
            NodeDefinition::catchment("cat-3").with_downstream(["nex-2"]),
            NodeDefinition::nexus("nex-2"),
        ]);
        builder.with_formulation("cat-1", formulation("cat-1", 1.5));
        builder.with_formulation("cat-2", formulation("cat-2", 2.0));
        builder.with_formulation("cat-3", formulation("cat-3", 0.5));
        builder.build().unwrap()
    }

    #[test]
    fn step_routes_deposits_to_releases() {
        let mut simulation = Simulation::builder(network())
            .with_num_steps(1)
            .build()
            .unwrap();

        simulation.step().unwrap();
        assert_eq!(simulation.current_timestep(), 1);
        assert!(simulation.finished());

        // Both timestep-0 ledgers drained completely and were evicted.
        let network = simulation.network();
        assert_eq!(network.nexus("nex-1").unwrap().ledger_state(0), LedgerState::Completed);
        assert_eq!(network.nexus("nex-2").unwrap().ledger_state(0), LedgerState::Completed);
    }

    #[test]
    fn deposits_are_scaled_by_catchment_area() {
        let dir = std::env::temp_dir().join("hydronet-simulation-tests/area");
        let _ = std::fs::remove_dir_all(&dir);

        let mut simulation = Simulation::builder(network())
            .with_num_steps(2)
            .with_output_directory(&dir)
            .build()
            .unwrap();
        simulation.run().unwrap();

        // cat-1 contributes 1.5 * 2.0 and cat-2 contributes 2.0 * 1.0, so
        // nex-1 releases 5.0 per step; nex-2 sees cat-3's 0.5 * 1.0.
        let records = std::fs::read_to_string(dir.join("nex-1_output.csv")).unwrap();
        assert_eq!(records, "0, 5\n1, 5\n");
        let records = std::fs::read_to_string(dir.join("nex-2_output.csv")).unwrap();
        assert_eq!(records, "0, 0.5\n1, 0.5\n");

        // Catchment records carry the raw response, before area scaling.
        let records = std::fs::read_to_string(dir.join("cat-1_output.csv")).unwrap();
        assert_eq!(records, "0, 1.5\n1, 1.5\n");
    }

    #[test]
    fn watermark_advances_with_the_run() {
        let mut simulation = Simulation::builder(network())
            .with_num_steps(3)
            .build()
            .unwrap();
        simulation.run().unwrap();

        let network = simulation.network;
        for id in ["nex-1", "nex-2"] {
            assert_eq!(
                network.nexus(id).unwrap().ledger_state(0),
                LedgerState::Expired,
                "timestep 0 of {id} should be behind the watermark"
            );
        }
    }

    #[test]
    fn stale_deposit_after_run_is_rejected() {
        let mut simulation = Simulation::builder(network())
            .with_num_steps(2)
            .build()
            .unwrap();
        simulation.run().unwrap();

        let mut network = simulation.network;
        let err = network
            .nexus_mut("nex-1")
            .unwrap()
            .deposit("cat-1", 1.0, 0)
            .unwrap_err();
        assert!(matches!(err, HydronetError::StaleTimestep { .. }));
    }

    #[test]
    fn apportioned_release_respects_resolved_shares() {
        let mut builder = NetworkBuilder::new();
        builder.with_nodes(vec![
            NodeDefinition::catchment("cat-0").with_downstream(["nex-1"]),
            NodeDefinition::nexus("nex-1").with_downstream(["cat-a", "cat-b"]),
            NodeDefinition::catchment("cat-a")
                .with_downstream(["nex-2"])
                .with_flow_percentage(75.0),
            NodeDefinition::catchment("cat-b").with_downstream(["nex-2"]),
            NodeDefinition::nexus("nex-2"),
        ]);
        builder.with_formulation("cat-0", formulation("cat-0", 8.0));
        builder.with_formulation("cat-a", formulation("cat-a", 0.0));
        builder.with_formulation("cat-b", formulation("cat-b", 0.0));
        let network = builder.build().unwrap();

        let shares: Vec<_> = network.shares("nex-1").unwrap().to_vec();
        assert!(is_close!(shares[0].1, 75.0));
        assert!(is_close!(shares[1].1, 25.0));

        let mut simulation = Simulation::builder(network)
            .with_num_steps(1)
            .build()
            .unwrap();
        simulation.step().unwrap();

        // 8.0 deposited, split 75/25 and fully drained.
        assert_eq!(
            simulation.network().nexus("nex-1").unwrap().ledger_state(0),
            LedgerState::Completed
        );
    }
}
