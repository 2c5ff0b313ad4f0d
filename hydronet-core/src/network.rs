//! The drainage network arena.
//!
//! Nodes are addressed by stable string ids; adjacency is stored as id
//! lists rather than shared pointers, so the catchment/nexus back-links of
//! the drainage graph carry no reference cycles. The arena is built from an
//! externally resolved directed graph (`NodeDefinition`s); geospatial
//! feature parsing and linkage derivation happen before the core is
//! involved.

use indexmap::{IndexMap, IndexSet};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::catchment::Catchment;
use crate::errors::{HydronetError, HydronetResult};
use crate::formulation::Formulation;
use crate::nexus::{Nexus, PointNexus, TimeStep, PERCENT_EPSILON};

/// Whether a resolved graph node is a catchment or a nexus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Catchment,
    Nexus,
}

/// One node of the externally resolved drainage graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub upstream: Vec<String>,
    #[serde(default)]
    pub downstream: Vec<String>,
    /// Drainage area in m². Only meaningful for catchments; defaults to 1.
    #[serde(default)]
    pub area: Option<f64>,
    /// Explicitly assigned share of the upstream nexus's flux.
    #[serde(default)]
    pub flow_percentage: Option<f64>,
}

impl NodeDefinition {
    pub fn catchment(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Catchment)
    }

    pub fn nexus(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Nexus)
    }

    fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            upstream: Vec::new(),
            downstream: Vec::new(),
            area: None,
            flow_percentage: None,
        }
    }

    pub fn with_upstream(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.upstream.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_downstream(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.downstream.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_area(mut self, area: f64) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_flow_percentage(mut self, percentage: f64) -> Self {
        self.flow_percentage = Some(percentage);
        self
    }
}

/// The node arena: catchments and nexuses addressed by id, plus the
/// once-per-nexus resolved downstream share lists.
#[derive(Debug)]
pub struct Network {
    pub(crate) catchments: IndexMap<String, Catchment>,
    pub(crate) nexuses: IndexMap<String, Box<dyn Nexus>>,
    /// Resolved (receiving catchment id, percent) lists keyed by nexus id.
    pub(crate) shares: IndexMap<String, Vec<(String, f64)>>,
}

impl Network {
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    pub fn catchment(&self, id: &str) -> Option<&Catchment> {
        self.catchments.get(id)
    }

    pub fn catchment_mut(&mut self, id: &str) -> Option<&mut Catchment> {
        self.catchments.get_mut(id)
    }

    pub fn nexus(&self, id: &str) -> Option<&dyn Nexus> {
        self.nexuses.get(id).map(Box::as_ref)
    }

    pub fn nexus_mut(&mut self, id: &str) -> Option<&mut (dyn Nexus + 'static)> {
        self.nexuses.get_mut(id).map(Box::as_mut)
    }

    pub fn catchment_count(&self) -> usize {
        self.catchments.len()
    }

    pub fn nexus_count(&self) -> usize {
        self.nexuses.len()
    }

    pub fn catchment_ids(&self) -> impl Iterator<Item = &str> {
        self.catchments.keys().map(String::as_str)
    }

    pub fn nexus_ids(&self) -> impl Iterator<Item = &str> {
        self.nexuses.keys().map(String::as_str)
    }

    /// Every node id in the arena, catchments first.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.catchment_ids().chain(self.nexus_ids())
    }

    /// The resolved downstream share list for a nexus.
    pub fn shares(&self, nexus_id: &str) -> Option<&[(String, f64)]> {
        self.shares.get(nexus_id).map(Vec::as_slice)
    }

    /// Advance the ledger watermark of every nexus in the arena.
    pub fn advance_watermark(&mut self, new_min: TimeStep) -> HydronetResult<()> {
        for nexus in self.nexuses.values_mut() {
            nexus.advance_watermark(new_min)?;
        }
        Ok(())
    }
}

/// Build a [`Network`] from resolved node definitions and the formulations
/// constructed for its catchments.
///
/// The builder validates the drainage graph before handing out an arena:
/// adjacency ids must resolve, kinds must alternate along every edge, each
/// catchment drains to exactly one nexus, each nexus has at least one
/// contributor, and the graph must be acyclic. Flow percentages are
/// resolved once per nexus here, not per timestep.
pub struct NetworkBuilder {
    nodes: Vec<NodeDefinition>,
    formulations: IndexMap<String, Box<dyn Formulation>>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            formulations: IndexMap::new(),
        }
    }

    /// Register a resolved graph node with the builder.
    pub fn with_node(&mut self, node: NodeDefinition) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn with_nodes(&mut self, nodes: impl IntoIterator<Item = NodeDefinition>) -> &mut Self {
        self.nodes.extend(nodes);
        self
    }

    /// Attach the formulation constructed for a catchment id.
    ///
    /// Formulations for ids that never appear as catchment nodes are
    /// ignored.
    pub fn with_formulation(
        &mut self,
        id: impl Into<String>,
        formulation: Box<dyn Formulation>,
    ) -> &mut Self {
        self.formulations.insert(id.into(), formulation);
        self
    }

    pub fn with_formulations(
        &mut self,
        formulations: impl IntoIterator<Item = (String, Box<dyn Formulation>)>,
    ) -> &mut Self {
        self.formulations.extend(formulations);
        self
    }

    /// Validate the drainage graph and produce the node arena.
    pub fn build(&mut self) -> HydronetResult<Network> {
        let nodes = std::mem::take(&mut self.nodes);
        let mut formulations = std::mem::take(&mut self.formulations);

        let mut kinds: IndexMap<String, NodeKind> = IndexMap::new();
        for node in &nodes {
            if kinds.insert(node.id.clone(), node.kind).is_some() {
                return Err(HydronetError::InvalidTopology {
                    id: node.id.clone(),
                    message: "duplicate node id".to_string(),
                });
            }
        }

        // Merge both directions into one edge set so a link declared on
        // either endpoint counts once.
        let mut edges: IndexSet<(String, String)> = IndexSet::new();
        for node in &nodes {
            for target in &node.downstream {
                edges.insert((node.id.clone(), target.clone()));
            }
            for source in &node.upstream {
                edges.insert((source.clone(), node.id.clone()));
            }
        }

        let mut upstream_of: IndexMap<String, Vec<String>> = kinds
            .keys()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        let mut downstream_of = upstream_of.clone();

        for (from, to) in &edges {
            let from_kind = kinds
                .get(from)
                .ok_or_else(|| HydronetError::LookupError { id: from.clone() })?;
            let to_kind = kinds
                .get(to)
                .ok_or_else(|| HydronetError::LookupError { id: to.clone() })?;
            if from_kind == to_kind {
                return Err(HydronetError::InvalidTopology {
                    id: from.clone(),
                    message: format!(
                        "linked to '{to}' of the same kind; catchments and nexuses must alternate"
                    ),
                });
            }
            if let Some(targets) = downstream_of.get_mut(from) {
                targets.push(to.clone());
            }
            if let Some(sources) = upstream_of.get_mut(to) {
                sources.push(from.clone());
            }
        }

        for node in &nodes {
            match node.kind {
                NodeKind::Catchment => {
                    let outflows = adjacency(&downstream_of, &node.id);
                    if outflows.len() != 1 {
                        return Err(HydronetError::InvalidTopology {
                            id: node.id.clone(),
                            message: format!(
                                "catchment has {} downstream connections, expected exactly 1",
                                outflows.len()
                            ),
                        });
                    }
                }
                NodeKind::Nexus => {
                    if adjacency(&upstream_of, &node.id).is_empty() {
                        return Err(HydronetError::InvalidTopology {
                            id: node.id.clone(),
                            message: "nexus has no upstream contributor".to_string(),
                        });
                    }
                }
            }
        }

        self.check_acyclic(&kinds, &edges)?;

        let mut catchments: IndexMap<String, Catchment> = IndexMap::new();
        let mut nexuses: IndexMap<String, Box<dyn Nexus>> = IndexMap::new();
        for (index, node) in nodes.iter().enumerate() {
            let id_number = index as u64;
            match node.kind {
                NodeKind::Catchment => {
                    let formulation = formulations
                        .shift_remove(&node.id)
                        .ok_or_else(|| HydronetError::LookupError {
                            id: node.id.clone(),
                        })?;
                    let mut catchment = Catchment::new(
                        id_number,
                        node.id.clone(),
                        formulation,
                        node.area.unwrap_or(1.0),
                    );
                    catchment.set_flow_percentage(node.flow_percentage);
                    catchment.inflow_nexuses = adjacency(&upstream_of, &node.id).to_vec();
                    catchment.outflow_nexuses = adjacency(&downstream_of, &node.id).to_vec();
                    catchments.insert(node.id.clone(), catchment);
                }
                NodeKind::Nexus => {
                    let upstream_count = adjacency(&upstream_of, &node.id).len();
                    let downstream_count = adjacency(&downstream_of, &node.id).len();
                    nexuses.insert(
                        node.id.clone(),
                        Box::new(PointNexus::new(
                            id_number,
                            node.id.clone(),
                            upstream_count,
                            downstream_count,
                        )),
                    );
                }
            }
        }

        // Sibling links are derived through the shared nexus.
        for catchment in catchments.values_mut() {
            catchment.contributing_catchments = catchment
                .inflow_nexuses
                .iter()
                .flat_map(|nexus_id| adjacency(&upstream_of, nexus_id))
                .cloned()
                .collect();
            catchment.receiving_catchments = catchment
                .outflow_nexuses
                .iter()
                .flat_map(|nexus_id| adjacency(&downstream_of, nexus_id))
                .cloned()
                .collect();
        }

        let mut shares = IndexMap::new();
        for nexus_id in nexuses.keys() {
            let receiving = adjacency(&downstream_of, nexus_id);
            let resolved = resolve_flow_percentages(nexus_id, receiving, &catchments)?;
            shares.insert(nexus_id.clone(), resolved);
        }

        Ok(Network {
            catchments,
            nexuses,
            shares,
        })
    }

    fn check_acyclic(
        &self,
        kinds: &IndexMap<String, NodeKind>,
        edges: &IndexSet<(String, String)>,
    ) -> HydronetResult<()> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices: IndexMap<&str, NodeIndex> = IndexMap::new();
        for id in kinds.keys() {
            indices.insert(id.as_str(), graph.add_node(id.as_str()));
        }
        for (from, to) in edges {
            if let (Some(from_index), Some(to_index)) =
                (indices.get(from.as_str()), indices.get(to.as_str()))
            {
                graph.add_edge(*from_index, *to_index, ());
            }
        }

        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(HydronetError::InvalidTopology {
                id: graph[cycle.node_id()].to_string(),
                message: "drainage network contains a cycle".to_string(),
            }),
        }
    }
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn adjacency<'a>(map: &'a IndexMap<String, Vec<String>>, id: &str) -> &'a [String] {
    map.get(id).map(Vec::as_slice).unwrap_or(&[])
}

/// Resolve the downstream share of each receiving catchment of one nexus.
///
/// Catchments with an explicit percentage keep it; whatever remains of 100
/// is split evenly across the catchments without one. Runs once per nexus
/// at build, never per timestep.
fn resolve_flow_percentages(
    nexus_id: &str,
    receiving: &[String],
    catchments: &IndexMap<String, Catchment>,
) -> HydronetResult<Vec<(String, f64)>> {
    let mut percent_left = 100.0;
    let mut resolved = Vec::with_capacity(receiving.len());
    let mut unassigned = Vec::new();

    for id in receiving {
        let catchment = catchments
            .get(id)
            .ok_or_else(|| HydronetError::LookupError { id: id.clone() })?;
        match catchment.flow_percentage() {
            Some(percent) => {
                resolved.push((id.clone(), percent));
                percent_left -= percent;
            }
            None => unassigned.push(id.clone()),
        }
    }

    if percent_left < -PERCENT_EPSILON {
        return Err(HydronetError::InvalidTopology {
            id: nexus_id.to_string(),
            message: format!(
                "explicit flow percentages request {:.4}% of flux",
                100.0 - percent_left
            ),
        });
    }
    if unassigned.is_empty() {
        if !receiving.is_empty() && percent_left.abs() > PERCENT_EPSILON {
            return Err(HydronetError::InvalidTopology {
                id: nexus_id.to_string(),
                message: format!(
                    "explicit flow percentages sum to {:.4}%, expected 100",
                    100.0 - percent_left
                ),
            });
        }
    } else {
        let uniform = percent_left / unassigned.len() as f64;
        resolved.extend(unassigned.into_iter().map(|id| (id, uniform)));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example_formulations::ConstantFormulation;
    use is_close::is_close;

    fn formulation(id: &str) -> Box<dyn Formulation> {
        Box::new(ConstantFormulation::new(id, 1.0))
    }

    /// Three catchments feeding one nexus, which drains into a fourth
    /// catchment and onwards to a terminal nexus.
    fn fan_in_nodes() -> Vec<NodeDefinition> {
        vec![
            NodeDefinition::catchment("cat-1").with_downstream(["nex-1"]),
            NodeDefinition::catchment("cat-2").with_downstream(["nex-1"]),
            NodeDefinition::catchment("cat-3").with_downstream(["nex-1"]),
            NodeDefinition::nexus("nex-1").with_downstream(["cat-4"]),
            NodeDefinition::catchment("cat-4").with_downstream(["nex-2"]),
            NodeDefinition::nexus("nex-2"),
        ]
    }

    fn fan_in_builder() -> NetworkBuilder {
        let mut builder = NetworkBuilder::new();
        builder.with_nodes(fan_in_nodes());
        for id in ["cat-1", "cat-2", "cat-3", "cat-4"] {
            builder.with_formulation(id, formulation(id));
        }
        builder
    }

    #[test]
    fn builds_arena_with_derived_adjacency() {
        let network = fan_in_builder().build().unwrap();

        assert_eq!(network.catchment_count(), 4);
        assert_eq!(network.nexus_count(), 2);

        let cat_1 = network.catchment("cat-1").unwrap();
        assert_eq!(cat_1.outflow_nexuses(), &["nex-1".to_string()]);
        assert_eq!(cat_1.receiving_catchments(), &["cat-4".to_string()]);

        let cat_4 = network.catchment("cat-4").unwrap();
        assert_eq!(cat_4.inflow_nexuses(), &["nex-1".to_string()]);
        assert_eq!(cat_4.contributing_catchments().len(), 3);

        let nex_1 = network.nexus("nex-1").unwrap();
        assert_eq!(nex_1.id_number(), 3);
    }

    #[test]
    fn single_receiver_takes_the_full_share() {
        let network = fan_in_builder().build().unwrap();
        let shares = network.shares("nex-1").unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].0, "cat-4");
        assert!(is_close!(shares[0].1, 100.0));

        // The terminal nexus has no receiving catchments to share with.
        assert!(network.shares("nex-2").unwrap().is_empty());
    }

    #[test]
    fn unassigned_shares_split_the_remainder_evenly() {
        let mut builder = NetworkBuilder::new();
        builder.with_nodes(vec![
            NodeDefinition::catchment("cat-0").with_downstream(["nex-1"]),
            NodeDefinition::nexus("nex-1").with_downstream(["cat-a", "cat-b", "cat-c"]),
            NodeDefinition::catchment("cat-a")
                .with_downstream(["nex-2"])
                .with_flow_percentage(60.0),
            NodeDefinition::catchment("cat-b").with_downstream(["nex-2"]),
            NodeDefinition::catchment("cat-c").with_downstream(["nex-2"]),
            NodeDefinition::nexus("nex-2"),
        ]);
        for id in ["cat-0", "cat-a", "cat-b", "cat-c"] {
            builder.with_formulation(id, formulation(id));
        }
        let network = builder.build().unwrap();

        let shares: IndexMap<_, _> = network
            .shares("nex-1")
            .unwrap()
            .iter()
            .cloned()
            .collect();
        assert!(is_close!(shares["cat-a"], 60.0));
        assert!(is_close!(shares["cat-b"], 20.0));
        assert!(is_close!(shares["cat-c"], 20.0));
    }

    #[test]
    fn fully_explicit_shares_must_sum_to_100() {
        let mut builder = NetworkBuilder::new();
        builder.with_nodes(vec![
            NodeDefinition::catchment("cat-0").with_downstream(["nex-1"]),
            NodeDefinition::nexus("nex-1").with_downstream(["cat-a", "cat-b"]),
            NodeDefinition::catchment("cat-a")
                .with_downstream(["nex-2"])
                .with_flow_percentage(60.0),
            NodeDefinition::catchment("cat-b")
                .with_downstream(["nex-2"])
                .with_flow_percentage(30.0),
            NodeDefinition::nexus("nex-2"),
        ]);
        for id in ["cat-0", "cat-a", "cat-b"] {
            builder.with_formulation(id, formulation(id));
        }

        let err = builder.build().unwrap_err();
        assert!(matches!(err, HydronetError::InvalidTopology { ref id, .. } if id == "nex-1"));
    }

    #[test]
    fn explicit_shares_beyond_100_are_rejected() {
        let mut builder = NetworkBuilder::new();
        builder.with_nodes(vec![
            NodeDefinition::catchment("cat-0").with_downstream(["nex-1"]),
            NodeDefinition::nexus("nex-1").with_downstream(["cat-a", "cat-b"]),
            NodeDefinition::catchment("cat-a")
                .with_downstream(["nex-2"])
                .with_flow_percentage(80.0),
            NodeDefinition::catchment("cat-b")
                .with_downstream(["nex-2"])
                .with_flow_percentage(30.0),
            NodeDefinition::nexus("nex-2"),
        ]);
        for id in ["cat-0", "cat-a", "cat-b"] {
            builder.with_formulation(id, formulation(id));
        }

        let err = builder.build().unwrap_err();
        assert!(matches!(err, HydronetError::InvalidTopology { .. }));
    }

    #[test]
    fn unknown_adjacency_id_is_rejected() {
        let mut builder = NetworkBuilder::new();
        builder
            .with_node(NodeDefinition::catchment("cat-1").with_downstream(["nex-missing"]))
            .with_formulation("cat-1", formulation("cat-1"));

        let err = builder.build().unwrap_err();
        assert!(matches!(err, HydronetError::LookupError { ref id } if id == "nex-missing"));
    }

    #[test]
    fn catchment_needs_exactly_one_outflow() {
        let mut builder = NetworkBuilder::new();
        builder.with_nodes(vec![
            NodeDefinition::catchment("cat-1").with_downstream(["nex-1", "nex-2"]),
            NodeDefinition::nexus("nex-1"),
            NodeDefinition::nexus("nex-2"),
        ]);
        builder.with_formulation("cat-1", formulation("cat-1"));

        let err = builder.build().unwrap_err();
        assert!(matches!(err, HydronetError::InvalidTopology { ref id, .. } if id == "cat-1"));
    }

    #[test]
    fn kinds_must_alternate_along_edges() {
        let mut builder = NetworkBuilder::new();
        builder.with_nodes(vec![
            NodeDefinition::catchment("cat-1").with_downstream(["cat-2"]),
            NodeDefinition::catchment("cat-2"),
        ]);
        builder.with_formulation("cat-1", formulation("cat-1"));
        builder.with_formulation("cat-2", formulation("cat-2"));

        let err = builder.build().unwrap_err();
        assert!(matches!(err, HydronetError::InvalidTopology { .. }));
    }

    #[test]
    fn cyclic_drainage_is_rejected() {
        let mut builder = NetworkBuilder::new();
        builder.with_nodes(vec![
            NodeDefinition::catchment("cat-1").with_downstream(["nex-1"]),
            NodeDefinition::nexus("nex-1").with_downstream(["cat-2"]),
            NodeDefinition::catchment("cat-2").with_downstream(["nex-2"]),
            NodeDefinition::nexus("nex-2").with_downstream(["cat-1"]),
        ]);
        builder.with_formulation("cat-1", formulation("cat-1"));
        builder.with_formulation("cat-2", formulation("cat-2"));

        let err = builder.build().unwrap_err();
        assert!(matches!(err, HydronetError::InvalidTopology { ref message, .. }
            if message.contains("cycle")));
    }

    #[test]
    fn catchment_without_formulation_is_rejected() {
        let mut builder = NetworkBuilder::new();
        builder.with_nodes(vec![
            NodeDefinition::catchment("cat-1").with_downstream(["nex-1"]),
            NodeDefinition::nexus("nex-1"),
        ]);

        let err = builder.build().unwrap_err();
        assert!(matches!(err, HydronetError::LookupError { ref id } if id == "cat-1"));
    }
}
