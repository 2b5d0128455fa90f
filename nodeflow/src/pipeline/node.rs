//! Nodes: one computation plus the data set names it reads and writes.

use super::computation::Computation;
use crate::errors::{ConfigurationError, DataSetError, ErrorInfo, NodeExecutionError, NodeflowError};
use crate::io::value_kind;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Where a node's result goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeOutputs {
    /// Positional outputs. With more than one name the result must be an
    /// array of the same length.
    List(Vec<String>),
    /// Result object key mapped to data set name.
    Mapping(BTreeMap<String, String>),
}

impl NodeOutputs {
    /// A node without outputs.
    #[must_use]
    pub fn none() -> Self {
        Self::List(Vec::new())
    }

    /// The data set names: list order for [`NodeOutputs::List`], result key
    /// order for [`NodeOutputs::Mapping`].
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::List(names) => names.clone(),
            Self::Mapping(mapping) => mapping.values().cloned().collect(),
        }
    }

    /// Number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::List(names) => names.len(),
            Self::Mapping(mapping) => mapping.len(),
        }
    }

    /// Whether there are no outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for NodeOutputs {
    fn from(name: &str) -> Self {
        Self::List(vec![name.to_string()])
    }
}

impl From<String> for NodeOutputs {
    fn from(name: String) -> Self {
        Self::List(vec![name])
    }
}

impl From<Vec<String>> for NodeOutputs {
    fn from(names: Vec<String>) -> Self {
        Self::List(names)
    }
}

impl From<Vec<&str>> for NodeOutputs {
    fn from(names: Vec<&str>) -> Self {
        Self::List(names.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for NodeOutputs {
    fn from(names: [&str; N]) -> Self {
        Self::List(names.iter().map(|n| (*n).to_string()).collect())
    }
}

impl From<BTreeMap<String, String>> for NodeOutputs {
    fn from(mapping: BTreeMap<String, String>) -> Self {
        Self::Mapping(mapping)
    }
}

/// A scheduled unit of work.
///
/// Nodes are immutable; [`tag`](Self::tag) and [`with_name`](Self::with_name)
/// return modified copies.
#[derive(Clone)]
pub struct Node {
    computation: Arc<dyn Computation>,
    inputs: Vec<String>,
    outputs: NodeOutputs,
    tags: BTreeSet<String>,
    name: Option<String>,
}

impl Node {
    /// Creates a node, checking the inputs against the computation's arity
    /// and the outputs for duplicates.
    pub fn new<I, S>(
        computation: Arc<dyn Computation>,
        inputs: I,
        outputs: impl Into<NodeOutputs>,
    ) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let node = Self {
            computation,
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into(),
            tags: BTreeSet::new(),
            name: None,
        };
        node.validate()?;
        Ok(node)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let arity = self.computation.arity();
        if !arity.accepts(self.inputs.len()) {
            return Err(ConfigurationError::new(format!(
                "Inputs of '{}' function expected {} input(s), but got {}",
                self.computation.name(),
                arity,
                self.inputs.len()
            ))
            .with_nodes(vec![self.name()])
            .with_error_info(
                ErrorInfo::new("NODE-ARITY")
                    .with_fix_hint("Pass one input name per computation argument."),
            ));
        }

        let outputs = self.outputs.names();
        let mut seen = BTreeSet::new();
        let duplicates: BTreeSet<String> = outputs
            .iter()
            .filter(|name| !seen.insert(name.as_str()))
            .cloned()
            .collect();
        if !duplicates.is_empty() {
            return Err(ConfigurationError::new(format!(
                "Failed to create node {} due to duplicate output(s) {}.\nNode outputs must be unique.",
                self,
                crate::errors::format_names(&duplicates)
            ))
            .with_nodes(vec![self.name()]));
        }

        let cyclic: BTreeSet<String> = outputs
            .iter()
            .filter(|name| self.inputs.contains(*name))
            .cloned()
            .collect();
        if !cyclic.is_empty() {
            return Err(ConfigurationError::new(format!(
                "Failed to create node {}.\nA node cannot have the same inputs and outputs: {}",
                self,
                crate::errors::format_names(&cyclic)
            ))
            .with_nodes(vec![self.name()]));
        }
        Ok(())
    }

    /// The node name: the explicit one, or `func([inputs]) -> [outputs]`.
    #[must_use]
    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.signature())
    }

    /// Whether the node was given an explicit name.
    #[must_use]
    pub fn has_explicit_name(&self) -> bool {
        self.name.is_some()
    }

    fn signature(&self) -> String {
        let outputs = if self.outputs.is_empty() {
            "None".to_string()
        } else {
            format!("[{}]", self.outputs.names().join(","))
        };
        format!(
            "{}([{}]) -> {}",
            self.computation.name(),
            self.inputs.join(","),
            outputs
        )
    }

    /// Input data set names, in argument order.
    #[must_use]
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Output data set names, ordered as [`NodeOutputs::names`].
    #[must_use]
    pub fn outputs(&self) -> Vec<String> {
        self.outputs.names()
    }

    /// Tags attached to this node.
    #[must_use]
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Returns a copy with the given tags added.
    #[must_use]
    pub fn tag<I, S>(&self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut node = self.clone();
        node.tags.extend(tags.into_iter().map(Into::into));
        node
    }

    /// Returns a copy with an explicit name.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let mut node = self.clone();
        node.name = Some(name.into());
        node
    }

    /// Name, inputs and outputs: two nodes with equal keys are the same
    /// definition.
    pub(crate) fn definition_key(&self) -> (String, Vec<String>, NodeOutputs) {
        (self.name(), self.inputs.clone(), self.outputs.clone())
    }

    /// Whether `other` declares the same name, inputs and outputs.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.name() == other.name()
            && self.inputs == other.inputs
            && self.outputs == other.outputs
    }

    /// Runs the computation and binds its result to output names.
    ///
    /// Computation failures come back as [`NodeExecutionError`]; a result
    /// that does not fit the declared outputs is a
    /// [`DataSetError::OutputArity`].
    pub fn run(&self, inputs: Vec<Value>) -> Result<BTreeMap<String, Value>, NodeflowError> {
        let result = self
            .computation
            .invoke(inputs)
            .map_err(|e| NodeExecutionError::new(self.name(), e))?;
        Ok(self.bind_outputs(result)?)
    }

    fn bind_outputs(&self, result: Value) -> Result<BTreeMap<String, Value>, DataSetError> {
        let mut bound = BTreeMap::new();
        match &self.outputs {
            NodeOutputs::List(names) if names.is_empty() => {}
            NodeOutputs::List(names) if names.len() == 1 => {
                bound.insert(names[0].clone(), result);
            }
            NodeOutputs::List(names) => {
                let items = match result {
                    Value::Array(items) if items.len() == names.len() => items,
                    Value::Array(items) => {
                        return Err(self.arity_error(
                            format!("{} outputs", names.len()),
                            format!("an array of {} item(s)", items.len()),
                        ))
                    }
                    other => {
                        return Err(self.arity_error(
                            format!("{} outputs", names.len()),
                            format!("a single {} value", value_kind(&other)),
                        ))
                    }
                };
                bound.extend(names.iter().cloned().zip(items));
            }
            NodeOutputs::Mapping(mapping) => {
                let mut object = match result {
                    Value::Object(object) => object,
                    other => {
                        return Err(self.arity_error(
                            "an object result for mapped outputs".to_string(),
                            format!("a {} value", value_kind(&other)),
                        ))
                    }
                };
                let missing: BTreeSet<String> = mapping
                    .keys()
                    .filter(|key| !object.contains_key(*key))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(self.arity_error(
                        format!(
                            "keys {}",
                            crate::errors::format_names(&mapping.keys().cloned().collect())
                        ),
                        format!(
                            "an object missing {}",
                            crate::errors::format_names(&missing)
                        ),
                    ));
                }
                for (key, data_set) in mapping {
                    if let Some(value) = object.remove(key) {
                        bound.insert(data_set.clone(), value);
                    }
                }
            }
        }
        Ok(bound)
    }

    fn arity_error(&self, expected: String, actual: String) -> DataSetError {
        DataSetError::OutputArity {
            node: self.name(),
            expected,
            actual,
        }
    }
}

/// Shorthand for [`Node::new`].
pub fn node<I, S>(
    computation: Arc<dyn Computation>,
    inputs: I,
    outputs: impl Into<NodeOutputs>,
) -> Result<Node, ConfigurationError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Node::new(computation, inputs, outputs)
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}: {}", self.signature()),
            None => f.write_str(&self.signature()),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("tags", &self.tags)
            .finish()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.same_definition(other)
    }
}
