//! The iris example pipelines registered by the binary.
//!
//! `de` splits the raw measurements into train and test sets, `ds` fits a
//! nearest-centroid classifier and reports its accuracy on the test set.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use nodeflow::context::{ProjectContext, DEFAULT_PIPELINE};
use nodeflow::errors::PipelineError;
use nodeflow::pipeline::{func2, func_n, node, NodeOutputs, Pipeline};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

const FEATURES: usize = 4;

#[derive(Debug, Deserialize)]
struct IrisRecord {
    sepal_length: f64,
    sepal_width: f64,
    petal_length: f64,
    petal_width: f64,
    species: String,
}

impl IrisRecord {
    fn features(&self) -> [f64; FEATURES] {
        [
            self.sepal_length,
            self.sepal_width,
            self.petal_length,
            self.petal_width,
        ]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CentroidModel {
    centroids: BTreeMap<String, [f64; FEATURES]>,
}

impl CentroidModel {
    fn classify(&self, x: &[f64; FEATURES]) -> Option<&str> {
        self.centroids
            .iter()
            .map(|(species, c)| {
                let distance: f64 = c.iter().zip(x).map(|(a, b)| (a - b).powi(2)).sum();
                (species, distance)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(species, _)| species.as_str())
    }
}

/// Every `1 / ratio`-th record goes to the test set.
fn split_data(data: Value, ratio: Value) -> anyhow::Result<Value> {
    let records: Vec<IrisRecord> =
        serde_json::from_value(data).context("iris data must be a list of records")?;
    let ratio = ratio
        .as_f64()
        .context("example_test_data_ratio must be a number")?;
    if !(ratio > 0.0 && ratio < 1.0) {
        bail!("example_test_data_ratio must be between 0 and 1, got {ratio}");
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let stride = (1.0 / ratio).round().max(2.0) as usize;

    let (mut train_x, mut train_y, mut test_x, mut test_y) = (vec![], vec![], vec![], vec![]);
    for (i, record) in records.iter().enumerate() {
        if i % stride == 0 {
            test_x.push(record.features());
            test_y.push(record.species.clone());
        } else {
            train_x.push(record.features());
            train_y.push(record.species.clone());
        }
    }
    Ok(json!([train_x, train_y, test_x, test_y]))
}

fn train_model(train_x: Value, train_y: Value) -> anyhow::Result<Value> {
    let xs: Vec<[f64; FEATURES]> = serde_json::from_value(train_x)?;
    let ys: Vec<String> = serde_json::from_value(train_y)?;
    if xs.is_empty() || xs.len() != ys.len() {
        bail!("expected matching, non-empty training sets, got {} rows and {} labels", xs.len(), ys.len());
    }

    let mut sums: BTreeMap<String, ([f64; FEATURES], f64)> = BTreeMap::new();
    for (x, y) in xs.iter().zip(ys) {
        let (sum, count) = sums.entry(y).or_insert(([0.0; FEATURES], 0.0));
        for (s, v) in sum.iter_mut().zip(x) {
            *s += v;
        }
        *count += 1.0;
    }
    let centroids = sums
        .into_iter()
        .map(|(species, (sum, count))| (species, sum.map(|s| s / count)))
        .collect();
    Ok(serde_json::to_value(CentroidModel { centroids })?)
}

fn predict(model: Value, test_x: Value) -> anyhow::Result<Value> {
    let model: CentroidModel = serde_json::from_value(model).context("malformed model")?;
    let xs: Vec<[f64; FEATURES]> = serde_json::from_value(test_x)?;
    let predictions = xs
        .iter()
        .map(|x| model.classify(x).map(str::to_string).context("model has no classes"))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(json!(predictions))
}

fn report_accuracy(inputs: Vec<Value>) -> anyhow::Result<Value> {
    let [predictions, test_y] = <[Value; 2]>::try_from(inputs)
        .map_err(|got| anyhow::anyhow!("expected predictions and labels, got {} input(s)", got.len()))?;
    let predictions: Vec<String> = serde_json::from_value(predictions)?;
    let labels: Vec<String> = serde_json::from_value(test_y)?;
    let correct = predictions.iter().zip(&labels).filter(|(p, l)| p == l).count();
    #[allow(clippy::cast_precision_loss)]
    let accuracy = correct as f64 / labels.len().max(1) as f64;
    info!("Model accuracy on test set: {:.2}%", accuracy * 100.0);
    Ok(Value::Null)
}

/// Splits the raw data set.
pub fn data_engineering() -> Result<Pipeline, PipelineError> {
    Pipeline::new(vec![node(
        func2("split_data", split_data),
        ["example_iris_data", "params:example_test_data_ratio"],
        [
            "example_train_x",
            "example_train_y",
            "example_test_x",
            "example_test_y",
        ],
    )?
    .with_name("split_data")
    .tag(["preprocessing"])])
}

/// Trains, predicts and reports.
pub fn data_science() -> Result<Pipeline, PipelineError> {
    Pipeline::new(vec![
        node(
            func2("train_model", train_model),
            ["example_train_x", "example_train_y"],
            "example_model",
        )?
        .with_name("train_model")
        .tag(["modelling"]),
        node(
            func2("predict", predict),
            ["example_model", "example_test_x"],
            "example_predictions",
        )?
        .with_name("predict")
        .tag(["modelling"]),
        node(
            func_n("report_accuracy", 2, report_accuracy),
            ["example_predictions", "example_test_y"],
            NodeOutputs::none(),
        )?
        .with_name("report_accuracy")
        .tag(["reporting"]),
    ])
}

/// Registers `de`, `ds` and the default pipeline combining both.
pub fn register(context: ProjectContext) -> Result<ProjectContext, PipelineError> {
    let de = data_engineering()?;
    let ds = data_science()?;
    let default = de.compose(&ds)?;
    Ok(context
        .with_pipeline("de", de)
        .with_pipeline("ds", ds)
        .with_pipeline(DEFAULT_PIPELINE, default))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Value {
        let rows = [
            (5.1, 3.5, 1.4, 0.2, "setosa"),
            (4.9, 3.0, 1.4, 0.2, "setosa"),
            (4.7, 3.2, 1.3, 0.2, "setosa"),
            (7.0, 3.2, 4.7, 1.4, "versicolor"),
            (6.4, 3.2, 4.5, 1.5, "versicolor"),
            (6.9, 3.1, 4.9, 1.5, "versicolor"),
        ];
        Value::Array(
            rows.iter()
                .map(|(a, b, c, d, s)| {
                    json!({
                        "sepal_length": a, "sepal_width": b,
                        "petal_length": c, "petal_width": d,
                        "species": s,
                    })
                })
                .collect(),
        )
    }

    #[test]
    fn test_split_every_third_record() {
        let split = split_data(records(), json!(0.34)).unwrap();
        let parts = split.as_array().unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[2].as_array().unwrap().len(), 2);
        assert_eq!(parts[3], json!(["setosa", "versicolor"]));
    }

    #[test]
    fn test_split_rejects_bad_ratio() {
        assert!(split_data(records(), json!(1.5)).is_err());
    }

    #[test]
    fn test_train_and_predict() {
        let split = split_data(records(), json!(0.34)).unwrap();
        let parts = split.as_array().unwrap();
        let model = train_model(parts[0].clone(), parts[1].clone()).unwrap();
        let predictions = predict(model, parts[2].clone()).unwrap();
        assert_eq!(predictions, parts[3]);
    }

    #[test]
    fn test_default_pipeline_has_four_nodes() {
        let pipeline = data_engineering()
            .unwrap()
            .compose(&data_science().unwrap())
            .unwrap();
        assert_eq!(pipeline.len(), 4);
        assert_eq!(
            pipeline.inputs().into_iter().collect::<Vec<_>>(),
            vec!["example_iris_data", "params:example_test_data_ratio"]
        );
    }
}
