//! The point nexus: a single-location junction implementing the ledger
//! protocol.

use std::collections::{HashMap, HashSet};

use log::warn;

use crate::errors::{HydronetError, HydronetResult};

use super::{LedgerState, Nexus, TimeStep};

/// Tolerated drift when comparing percentage totals against 100.
pub const PERCENT_EPSILON: f64 = 0.00005;

/// A junction holding the per-timestep accumulation/release ledger.
///
/// Four timestep-indexed tables make up the ledger:
///
/// - `upstream_flows`: (contributor id, flux) pairs deposited this timestep.
/// - `summed_flows`: the cached total, computed lazily on the first release
///   request. Its existence closes the ledger for further deposits, so a late
///   deposit can never change a total downstream consumers already drew
///   against.
/// - `downstream_requests`: (requester id, percent) pairs already granted.
/// - `total_requests`: running percentage granted, capped at 100 within
///   [`PERCENT_EPSILON`].
///
/// When the granted total reaches 100% the timestep is complete: all four
/// tables drop the key and the timestep joins the completed set. Entries
/// below the watermark are pruned unconditionally.
#[derive(Debug)]
pub struct PointNexus {
    id: String,
    id_number: u64,
    upstream_count: usize,
    downstream_count: usize,
    min_timestep: TimeStep,
    upstream_flows: HashMap<TimeStep, Vec<(String, f64)>>,
    summed_flows: HashMap<TimeStep, f64>,
    downstream_requests: HashMap<TimeStep, Vec<(String, f64)>>,
    total_requests: HashMap<TimeStep, f64>,
    completed: HashSet<TimeStep>,
}

impl PointNexus {
    /// Create a new point nexus expecting the given number of upstream
    /// contributors and downstream consumers.
    pub fn new(
        id_number: u64,
        id: impl Into<String>,
        upstream_count: usize,
        downstream_count: usize,
    ) -> Self {
        Self {
            id: id.into(),
            id_number,
            upstream_count,
            downstream_count,
            min_timestep: 0,
            upstream_flows: HashMap::new(),
            summed_flows: HashMap::new(),
            downstream_requests: HashMap::new(),
            total_requests: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    /// The oldest timestep this ledger is still required to retain.
    pub fn watermark(&self) -> TimeStep {
        self.min_timestep
    }

    pub fn upstream_count(&self) -> usize {
        self.upstream_count
    }

    pub fn downstream_count(&self) -> usize {
        self.downstream_count
    }

    /// The deposits recorded so far for a timestep, in arrival order.
    pub fn deposits(&self, timestep: TimeStep) -> Option<&[(String, f64)]> {
        self.upstream_flows.get(&timestep).map(Vec::as_slice)
    }

    /// The release requests granted so far for a timestep, in arrival order.
    pub fn granted_requests(&self, timestep: TimeStep) -> Option<&[(String, f64)]> {
        self.downstream_requests.get(&timestep).map(Vec::as_slice)
    }

    fn check_operable(&self, timestep: TimeStep) -> HydronetResult<()> {
        if timestep < self.min_timestep {
            return Err(HydronetError::StaleTimestep {
                id: self.id.clone(),
                timestep,
                watermark: self.min_timestep,
            });
        }
        if self.completed.contains(&timestep) {
            return Err(HydronetError::TimestepCompleted {
                id: self.id.clone(),
                timestep,
            });
        }
        Ok(())
    }

    fn evict(&mut self, timestep: TimeStep) {
        self.upstream_flows.remove(&timestep);
        self.summed_flows.remove(&timestep);
        self.downstream_requests.remove(&timestep);
        self.total_requests.remove(&timestep);
        self.completed.insert(timestep);
    }
}

impl Nexus for PointNexus {
    fn id(&self) -> &str {
        &self.id
    }

    fn id_number(&self) -> u64 {
        self.id_number
    }

    fn deposit(&mut self, contributor: &str, flux: f64, timestep: TimeStep) -> HydronetResult<()> {
        self.check_operable(timestep)?;

        // A cached sum means a downstream request has already been granted
        // against this timestep; the ledger is closed for writes.
        if self.summed_flows.contains_key(&timestep) {
            return Err(HydronetError::LedgerClosed {
                id: self.id.clone(),
                timestep,
            });
        }

        self.upstream_flows
            .entry(timestep)
            .or_default()
            .push((contributor.to_string(), flux));
        Ok(())
    }

    fn release(
        &mut self,
        requester: &str,
        percent: f64,
        timestep: TimeStep,
    ) -> HydronetResult<f64> {
        self.check_operable(timestep)?;

        let granted = self.total_requests.get(&timestep).copied().unwrap_or(0.0);
        let deposits = self
            .upstream_flows
            .get(&timestep)
            .ok_or_else(|| HydronetError::EmptyLedger {
                id: self.id.clone(),
                timestep,
            })?;

        // No single consumer may request more than the whole flux, and the
        // running total may never pass 100. A rejected request leaves the
        // ledger untouched.
        if percent > 100.0 || granted + percent > 100.0 + PERCENT_EPSILON {
            return Err(HydronetError::OverAllocation {
                id: self.id.clone(),
                timestep,
                granted,
                requested: percent,
            });
        }

        let summed = match self.summed_flows.get(&timestep) {
            Some(sum) => *sum,
            // First request for this timestep: total the deposits. Caching
            // the sum closes the ledger against further deposits.
            None => deposits.iter().map(|(_, flux)| flux).sum(),
        };
        let released = summed * percent / 100.0;

        self.summed_flows.insert(timestep, summed);
        self.downstream_requests
            .entry(timestep)
            .or_default()
            .push((requester.to_string(), percent));
        *self.total_requests.entry(timestep).or_insert(0.0) += percent;

        // All water requested: drop the bookkeeping for this timestep.
        if self.total_requests.get(&timestep).copied().unwrap_or(0.0)
            >= 100.0 - PERCENT_EPSILON
        {
            self.evict(timestep);
        }

        Ok(released)
    }

    fn advance_watermark(&mut self, new_min: TimeStep) -> HydronetResult<()> {
        // Regression would require un-pruning already discarded state.
        if new_min < self.min_timestep {
            return Err(HydronetError::StaleTimestep {
                id: self.id.clone(),
                timestep: new_min,
                watermark: self.min_timestep,
            });
        }
        self.min_timestep = new_min;

        // Anything still in a table was never completed; dropping it loses
        // water the downstream side never drew.
        for timestep in self.upstream_flows.keys().filter(|t| **t < new_min) {
            warn!(
                "nexus '{}': dropping incomplete ledger entry for timestep {}",
                self.id, timestep
            );
        }

        self.upstream_flows.retain(|t, _| *t >= new_min);
        self.summed_flows.retain(|t, _| *t >= new_min);
        self.downstream_requests.retain(|t, _| *t >= new_min);
        self.total_requests.retain(|t, _| *t >= new_min);
        self.completed.retain(|t| *t >= new_min);
        Ok(())
    }

    fn ledger_state(&self, timestep: TimeStep) -> LedgerState {
        if self.completed.contains(&timestep) {
            LedgerState::Completed
        } else if timestep < self.min_timestep {
            LedgerState::Expired
        } else if self.summed_flows.contains_key(&timestep) {
            LedgerState::PartiallyReleased
        } else if self.upstream_flows.contains_key(&timestep) {
            LedgerState::Accumulating
        } else {
            LedgerState::Empty
        }
    }
}
