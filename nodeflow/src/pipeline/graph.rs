//! Validated node collections and their execution schedule.

use super::node::Node;
use crate::errors::{
    format_names, CircularDependencyError, ConfigurationError, ErrorInfo, OutputConflictError,
    PipelineError,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

/// An immutable, validated set of nodes plus the derived dependency graph.
///
/// Node `B` depends on node `A` iff an output of `A` is an input of `B`.
/// Construction rejects duplicate node names, outputs produced by more than
/// one node, and cycles.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Topological order (layers concatenated).
    nodes: Vec<Node>,
    /// Indices into `nodes`, one vector per layer.
    layers: Vec<Vec<usize>>,
}

impl Pipeline {
    /// Builds and validates a pipeline.
    ///
    /// Nodes with identical definitions are kept once.
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Result<Self, PipelineError> {
        let mut seen = HashSet::new();
        let declared: Vec<Node> = nodes
            .into_iter()
            .filter(|node| seen.insert(node.definition_key()))
            .collect();

        validate_unique_names(&declared)?;
        let producers = validate_unique_outputs(&declared)?;
        let parents = parent_indices(&declared, &producers);
        let layer_indices = toposort_layers(&declared, &parents)?;

        let mut nodes = Vec::with_capacity(declared.len());
        let mut layers = Vec::with_capacity(layer_indices.len());
        for layer in layer_indices {
            let mut positions = Vec::with_capacity(layer.len());
            for index in layer {
                positions.push(nodes.len());
                nodes.push(declared[index].clone());
            }
            layers.push(positions);
        }
        Ok(Self { nodes, layers })
    }

    /// A pipeline without nodes.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            layers: Vec::new(),
        }
    }

    /// Nodes in execution order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Groups of mutually independent nodes; every producer of a node sits
    /// in an earlier group. Within a group nodes keep declaration order.
    #[must_use]
    pub fn layers(&self) -> Vec<Vec<&Node>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&i| &self.nodes[i]).collect())
            .collect()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the pipeline has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every data set some node reads.
    #[must_use]
    pub fn all_inputs(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .flat_map(|n| n.inputs().iter().cloned())
            .collect()
    }

    /// Every data set some node writes.
    #[must_use]
    pub fn all_outputs(&self) -> BTreeSet<String> {
        self.nodes.iter().flat_map(Node::outputs).collect()
    }

    /// Data sets read but never written: they must come from the catalog.
    #[must_use]
    pub fn inputs(&self) -> BTreeSet<String> {
        let outputs = self.all_outputs();
        self.all_inputs()
            .into_iter()
            .filter(|name| !outputs.contains(name))
            .collect()
    }

    /// Data sets written but never read.
    #[must_use]
    pub fn outputs(&self) -> BTreeSet<String> {
        let inputs = self.all_inputs();
        self.all_outputs()
            .into_iter()
            .filter(|name| !inputs.contains(name))
            .collect()
    }

    /// Every data set referenced by the pipeline.
    #[must_use]
    pub fn data_sets(&self) -> BTreeSet<String> {
        let mut names = self.all_inputs();
        names.extend(self.all_outputs());
        names
    }

    /// Combines two pipelines.
    pub fn compose(&self, other: &Self) -> Result<Self, PipelineError> {
        Self::new(self.nodes.iter().chain(other.nodes.iter()).cloned())
    }

    /// Combines any number of pipelines.
    pub fn union<'a>(pipelines: impl IntoIterator<Item = &'a Self>) -> Result<Self, PipelineError> {
        Self::new(
            pipelines
                .into_iter()
                .flat_map(|p| p.nodes.iter().cloned())
                .collect::<Vec<_>>(),
        )
    }

    /// Nodes carrying at least one of `tags`. May be empty.
    pub fn only_nodes_with_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<Self, PipelineError> {
        let wanted: HashSet<&str> = tags.iter().map(AsRef::as_ref).collect();
        self.subset(|node| node.tags().iter().any(|t| wanted.contains(t.as_str())))
    }

    /// Exactly the named nodes.
    pub fn only_nodes<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, PipelineError> {
        let wanted = self.known_node_names(names)?;
        self.subset(|node| wanted.contains(&node.name()))
    }

    /// The named nodes and everything downstream of them.
    pub fn from_nodes<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, PipelineError> {
        let wanted = self.known_node_names(names)?;
        let start: Vec<usize> = self.indices_where(|node| wanted.contains(&node.name()));
        let keep = self.reachable(&start, Direction::Downstream);
        self.subset_indices(&keep)
    }

    /// The named nodes and everything upstream of them.
    pub fn to_nodes<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, PipelineError> {
        let wanted = self.known_node_names(names)?;
        let start: Vec<usize> = self.indices_where(|node| wanted.contains(&node.name()));
        let keep = self.reachable(&start, Direction::Upstream);
        self.subset_indices(&keep)
    }

    /// Nodes producing any of the given data sets.
    pub fn only_nodes_with_outputs<S: AsRef<str>>(
        &self,
        outputs: &[S],
    ) -> Result<Self, PipelineError> {
        let wanted = known_names(outputs, &self.all_outputs(), "data sets")?;
        self.subset(|node| node.outputs().iter().any(|o| wanted.contains(o)))
    }

    /// Nodes consuming any of the given data sets and everything downstream.
    pub fn from_inputs<S: AsRef<str>>(&self, inputs: &[S]) -> Result<Self, PipelineError> {
        let wanted = known_names(inputs, &self.all_inputs(), "data sets")?;
        let start = self.indices_where(|node| node.inputs().iter().any(|i| wanted.contains(i)));
        let keep = self.reachable(&start, Direction::Downstream);
        self.subset_indices(&keep)
    }

    /// Human-readable listing of the execution order.
    #[must_use]
    pub fn describe(&self) -> String {
        let join = |names: BTreeSet<String>| {
            if names.is_empty() {
                "None".to_string()
            } else {
                names.into_iter().collect::<Vec<_>>().join(", ")
            }
        };

        let mut out = String::from("#### Pipeline execution order ####\n");
        let _ = writeln!(out, "Inputs: {}\n", join(self.inputs()));
        for (depth, layer) in self.layers().iter().enumerate() {
            let _ = writeln!(out, "-- layer {depth} --");
            for node in layer {
                let _ = writeln!(out, "{node}");
            }
        }
        let _ = writeln!(out, "\nOutputs: {}", join(self.outputs()));
        out.push_str("##################################");
        out
    }

    fn known_node_names<S: AsRef<str>>(&self, names: &[S]) -> Result<HashSet<String>, PipelineError> {
        let all: BTreeSet<String> = self.nodes.iter().map(Node::name).collect();
        Ok(known_names(names, &all, "nodes")?.into_iter().collect())
    }

    fn indices_where(&self, pred: impl Fn(&Node) -> bool) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| pred(node))
            .map(|(i, _)| i)
            .collect()
    }

    fn subset(&self, pred: impl Fn(&Node) -> bool) -> Result<Self, PipelineError> {
        Self::new(self.nodes.iter().filter(|n| pred(n)).cloned())
    }

    fn subset_indices(&self, keep: &BTreeSet<usize>) -> Result<Self, PipelineError> {
        Self::new(keep.iter().map(|&i| self.nodes[i].clone()))
    }

    fn reachable(&self, start: &[usize], direction: Direction) -> BTreeSet<usize> {
        let outputs: Vec<Vec<String>> = self.nodes.iter().map(Node::outputs).collect();
        let mut consumers: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut producers: HashMap<&str, usize> = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            for input in node.inputs() {
                consumers.entry(input.as_str()).or_default().push(i);
            }
        }
        for (i, names) in outputs.iter().enumerate() {
            for name in names {
                producers.insert(name.as_str(), i);
            }
        }

        let mut seen: BTreeSet<usize> = BTreeSet::new();
        let mut queue: VecDeque<usize> = start.iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            if !seen.insert(i) {
                continue;
            }
            match direction {
                Direction::Downstream => {
                    for name in &outputs[i] {
                        if let Some(next) = consumers.get(name.as_str()) {
                            queue.extend(next.iter().copied());
                        }
                    }
                }
                Direction::Upstream => {
                    for name in self.nodes[i].inputs() {
                        if let Some(&next) = producers.get(name.as_str()) {
                            queue.push_back(next);
                        }
                    }
                }
            }
        }
        seen
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Upstream,
    Downstream,
}

fn known_names<S: AsRef<str>>(
    names: &[S],
    known: &BTreeSet<String>,
    kind: &str,
) -> Result<BTreeSet<String>, ConfigurationError> {
    let requested: BTreeSet<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
    let unknown: BTreeSet<String> = requested.difference(known).cloned().collect();
    if !unknown.is_empty() {
        return Err(ConfigurationError::new(format!(
            "Pipeline does not contain {kind} named {}.",
            format_names(&unknown)
        ))
        .with_error_info(ErrorInfo::new("PIPELINE-UNKNOWN-NAME")));
    }
    Ok(requested)
}

fn validate_unique_names(nodes: &[Node]) -> Result<(), ConfigurationError> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for node in nodes {
        *counts.entry(node.name()).or_default() += 1;
    }
    let duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name)
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    Err(ConfigurationError::new(format!(
        "Pipeline nodes must have unique names. The following node names appear more than once: {}\n\
         You can name your nodes using `Node::with_name`.",
        format_names(&duplicates.iter().cloned().collect())
    ))
    .with_nodes(duplicates)
    .with_error_info(ErrorInfo::new("PIPELINE-DUPLICATE-NODE")))
}

/// Maps each output to its producing node, rejecting outputs with several
/// producers.
fn validate_unique_outputs(nodes: &[Node]) -> Result<HashMap<String, usize>, OutputConflictError> {
    let mut producers: HashMap<String, usize> = HashMap::new();
    let mut conflicts = BTreeSet::new();
    for (i, node) in nodes.iter().enumerate() {
        for output in node.outputs() {
            if producers.insert(output.clone(), i).is_some() {
                conflicts.insert(output);
            }
        }
    }
    if conflicts.is_empty() {
        Ok(producers)
    } else {
        Err(OutputConflictError::new(conflicts))
    }
}

fn parent_indices(nodes: &[Node], producers: &HashMap<String, usize>) -> Vec<BTreeSet<usize>> {
    nodes
        .iter()
        .map(|node| {
            node.inputs()
                .iter()
                .filter_map(|input| producers.get(input).copied())
                .collect()
        })
        .collect()
}

/// Kahn's algorithm, one layer per round.
fn toposort_layers(
    nodes: &[Node],
    parents: &[BTreeSet<usize>],
) -> Result<Vec<Vec<usize>>, CircularDependencyError> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree: Vec<usize> = parents.iter().map(BTreeSet::len).collect();
    for (child, node_parents) in parents.iter().enumerate() {
        for &parent in node_parents {
            children[parent].push(child);
        }
    }

    let mut layers = Vec::new();
    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = 0;
    while !ready.is_empty() {
        let mut next = Vec::new();
        for &i in &ready {
            for &child in &children[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    next.push(child);
                }
            }
        }
        next.sort_unstable();
        placed += ready.len();
        layers.push(std::mem::replace(&mut ready, next));
    }

    if placed < nodes.len() {
        let remaining: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] > 0).collect();
        return Err(CircularDependencyError::new(find_cycle(nodes, parents, &remaining)));
    }
    Ok(layers)
}

/// Returns one cycle among `remaining` as node names, first name repeated
/// at the end.
fn find_cycle(nodes: &[Node], parents: &[BTreeSet<usize>], remaining: &[usize]) -> Vec<String> {
    let candidates: HashSet<usize> = remaining.iter().copied().collect();
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };

    // Every remaining node has a remaining parent, so walking parents must
    // revisit a node eventually.
    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&parent) = parents[current].iter().find(|p| candidates.contains(p)) else {
            return path.iter().map(|&i| nodes[i].name()).collect();
        };
        if let Some(&at) = position.get(&parent) {
            let mut cycle: Vec<String> = path[at..].iter().rev().map(|&i| nodes[i].name()).collect();
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return cycle;
        }
        position.insert(parent, path.len());
        path.push(parent);
        current = parent;
    }
}
