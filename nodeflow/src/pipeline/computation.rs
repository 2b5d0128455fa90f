//! The computations nodes wrap.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// How many inputs a computation takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many.
    Exact(usize),
    /// Any number.
    Variadic,
}

impl Arity {
    /// Whether `count` inputs are acceptable.
    #[must_use]
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exact(n) => n == count,
            Self::Variadic => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "{n}"),
            Self::Variadic => f.write_str("any number of"),
        }
    }
}

/// A pure function from ordered input values to one result value.
///
/// Multiple outputs are returned as an array (or an object for mapped
/// outputs) and split by the node that wraps the computation.
pub trait Computation: Send + Sync {
    /// Function name used in default node names.
    fn name(&self) -> &str;

    /// Declared number of inputs.
    fn arity(&self) -> Arity;

    /// Runs the computation.
    fn invoke(&self, inputs: Vec<Value>) -> anyhow::Result<Value>;
}

/// A computation backed by a closure over the full input vector.
pub struct FnComputation<F>
where
    F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync,
{
    name: String,
    arity: Arity,
    func: F,
}

impl<F> FnComputation<F>
where
    F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync,
{
    /// Creates a new closure-backed computation.
    pub fn new(name: impl Into<String>, arity: Arity, func: F) -> Self {
        Self {
            name: name.into(),
            arity,
            func,
        }
    }
}

impl<F> fmt::Debug for FnComputation<F>
where
    F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComputation")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl<F> Computation for FnComputation<F>
where
    F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn invoke(&self, inputs: Vec<Value>) -> anyhow::Result<Value> {
        (self.func)(inputs)
    }
}

fn take<const N: usize>(inputs: Vec<Value>) -> anyhow::Result<[Value; N]> {
    <[Value; N]>::try_from(inputs)
        .map_err(|got| anyhow::anyhow!("expected {N} input(s), got {}", got.len()))
}

/// A computation taking no inputs.
pub fn func0<F>(name: impl Into<String>, f: F) -> Arc<dyn Computation>
where
    F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnComputation::new(name, Arity::Exact(0), move |inputs: Vec<Value>| {
        let [] = take::<0>(inputs)?;
        f()
    }))
}

/// A computation taking one input.
pub fn func1<F>(name: impl Into<String>, f: F) -> Arc<dyn Computation>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnComputation::new(name, Arity::Exact(1), move |inputs: Vec<Value>| {
        let [a] = take::<1>(inputs)?;
        f(a)
    }))
}

/// A computation taking two inputs.
pub fn func2<F>(name: impl Into<String>, f: F) -> Arc<dyn Computation>
where
    F: Fn(Value, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnComputation::new(name, Arity::Exact(2), move |inputs: Vec<Value>| {
        let [a, b] = take::<2>(inputs)?;
        f(a, b)
    }))
}

/// A computation taking three inputs.
pub fn func3<F>(name: impl Into<String>, f: F) -> Arc<dyn Computation>
where
    F: Fn(Value, Value, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnComputation::new(name, Arity::Exact(3), move |inputs: Vec<Value>| {
        let [a, b, c] = take::<3>(inputs)?;
        f(a, b, c)
    }))
}

/// A computation taking exactly `arity` inputs as a vector.
pub fn func_n<F>(name: impl Into<String>, arity: usize, f: F) -> Arc<dyn Computation>
where
    F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnComputation::new(name, Arity::Exact(arity), f))
}

/// A computation taking any number of inputs.
pub fn variadic<F>(name: impl Into<String>, f: F) -> Arc<dyn Computation>
where
    F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnComputation::new(name, Arity::Variadic, f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fixed_arity_closures() {
        let add = func2("add", |a, b| {
            let sum = a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0);
            Ok(json!(sum))
        });
        assert_eq!(add.name(), "add");
        assert_eq!(add.arity(), Arity::Exact(2));
        assert_eq!(add.invoke(vec![json!(1), json!(2)]).unwrap(), json!(3));
    }

    #[test]
    fn test_wrong_input_count_is_an_error() {
        let identity = func1("identity", Ok);
        assert!(identity.invoke(vec![]).is_err());
    }

    #[test]
    fn test_variadic_accepts_anything() {
        let count = variadic("count", |inputs| Ok(json!(inputs.len())));
        assert!(count.arity().accepts(0));
        assert!(count.arity().accepts(7));
        assert_eq!(count.invoke(vec![json!(1); 3]).unwrap(), json!(3));
    }

    #[test]
    fn test_func0_constant() {
        let constant = func0("constant", || Ok(json!("x")));
        assert_eq!(constant.invoke(Vec::new()).unwrap(), json!("x"));
        assert!(!constant.arity().accepts(1));
    }
}
