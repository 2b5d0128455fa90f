//! Tests for project contexts backed by a temporary project directory.

#[cfg(test)]
mod tests {
    use crate::context::{ProjectContext, RunOptions, DEFAULT_ENV};
    use crate::errors::{ConfigError, NodeflowError};
    use crate::io::DataSet;
    use crate::io::{DataSetRegistry, JsonLocalDataSet, MemoryDataSet};
    use crate::pipeline::{func1, func2, node, Pipeline};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn scale_pipeline() -> Pipeline {
        Pipeline::new(vec![
            node(
                func2("scale", |raw, factor| {
                    Ok(json!(raw.as_i64().unwrap_or(0) * factor.as_i64().unwrap_or(1)))
                }),
                ["raw", "params:factor"],
                "scaled",
            )
            .unwrap()
            .with_name("scale")
            .tag(["math"]),
            node(
                func1("describe", |v| Ok(json!(format!("value={v}")))),
                ["scaled"],
                "report",
            )
            .unwrap()
            .with_name("describe")
            .tag(["report"]),
        ])
        .unwrap()
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "conf/base/catalog.toml",
            r#"
[raw]
type = "JSONLocalDataSet"
filepath = "data/raw.json"

[report]
type = "JSONLocalDataSet"
filepath = "data/report.json"
"#,
        );
        write(dir.path(), "conf/base/parameters.toml", "factor = 3\n");
        write(dir.path(), "conf/local/parameters.json", r#"{"factor": 4}"#);
        write(dir.path(), "data/raw.json", "5");
        dir
    }

    fn context(dir: &Path) -> ProjectContext {
        ProjectContext::new(dir, None).with_pipeline("__default__", scale_pipeline())
    }

    #[test]
    fn test_default_environment_paths() {
        let ctx = ProjectContext::new("/tmp/project", None);
        assert_eq!(ctx.env(), DEFAULT_ENV);
        assert_eq!(
            ctx.conf_paths(),
            vec![
                Path::new("/tmp/project/conf/base").to_path_buf(),
                Path::new("/tmp/project/conf/local").to_path_buf(),
            ]
        );
    }

    #[test]
    fn test_parameters_overlay_and_feed_dict() {
        let dir = project();
        let ctx = context(dir.path());
        let catalog = ctx.catalog(&BTreeMap::new(), None).unwrap();
        assert_eq!(catalog.load("params:factor").unwrap(), json!(4));
        assert_eq!(catalog.load("parameters").unwrap(), json!({"factor": 4}));
    }

    #[test]
    fn test_missing_credentials_are_not_fatal() {
        let dir = project();
        let ctx = context(dir.path());
        assert!(ctx.credentials().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_default_pipeline() {
        let dir = project();
        let result = context(dir.path())
            .run(&RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.nodes_run, 2);
        assert_eq!(result.outputs.get("report"), Some(&json!("value=20")));

        let saved = JsonLocalDataSet::at(dir.path().join("data/report.json"))
            .load()
            .unwrap();
        assert_eq!(saved, json!("value=20"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_with_parallel_runner() {
        let dir = project();
        let options = RunOptions {
            runner: Some("ParallelRunner".to_string()),
            max_workers: Some(2),
            ..RunOptions::default()
        };
        let result = context(dir.path()).run(&options).await.unwrap();
        assert_eq!(result.outputs.get("report"), Some(&json!("value=20")));
    }

    #[tokio::test]
    async fn test_tag_filter() {
        let dir = project();
        let options = RunOptions {
            tags: vec!["math".to_string()],
            ..RunOptions::default()
        };
        let result = context(dir.path()).run(&options).await.unwrap();
        assert_eq!(result.nodes_run, 1);
        assert_eq!(result.outputs.get("scaled"), Some(&json!(20)));
    }

    #[tokio::test]
    async fn test_filters_leaving_no_nodes() {
        let dir = project();
        let options = RunOptions {
            tags: vec!["unknown".to_string()],
            ..RunOptions::default()
        };
        let err = context(dir.path()).run(&options).await.unwrap_err();
        assert!(matches!(err, NodeflowError::Configuration(_)));
        assert!(err.to_string().contains("contains no nodes"));
    }

    #[tokio::test]
    async fn test_unknown_environment() {
        let dir = project();
        let ctx = ProjectContext::new(dir.path(), Some("nonexistent"))
            .with_pipeline("__default__", scale_pipeline());
        let err = ctx.run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, NodeflowError::Config(ConfigError::InvalidPath { .. })));
        assert!(err
            .to_string()
            .contains("Given configuration path either does not exist or is not a valid directory:"));
    }

    #[tokio::test]
    async fn test_unknown_runner_and_pipeline() {
        let dir = project();
        let ctx = context(dir.path());

        let options = RunOptions {
            runner: Some("ThreadRunner".to_string()),
            ..RunOptions::default()
        };
        let err = ctx.run(&options).await.unwrap_err();
        assert!(err.to_string().contains("Unknown runner 'ThreadRunner'"));

        let options = RunOptions {
            pipeline_name: Some("training".to_string()),
            ..RunOptions::default()
        };
        let err = ctx.run(&options).await.unwrap_err();
        assert!(err.to_string().contains("'training'"));
    }

    #[tokio::test]
    async fn test_only_missing_skips_persisted_outputs() {
        let dir = project();
        let ctx = context(dir.path());
        ctx.run(&RunOptions::default()).await.unwrap();

        let options = RunOptions {
            only_missing: true,
            ..RunOptions::default()
        };
        let result = ctx.run(&options).await.unwrap();
        // "scaled" is in memory, so only the upstream node reruns.
        assert_eq!(result.nodes_run, 1);
        assert_eq!(result.nodes_skipped, 1);
    }

    #[tokio::test]
    async fn test_custom_registry_types_back_catalog_entries() {
        let dir = project();
        write(
            dir.path(),
            "conf/base/catalog.toml",
            r#"
[raw]
type = "ConstantDataSet"
value = 7

[report]
type = "JSONLocalDataSet"
filepath = "data/report.json"
"#,
        );
        let mut registry = DataSetRegistry::with_defaults();
        registry.register("ConstantDataSet", |config| {
            let value = config.params.get("value").cloned().unwrap_or_default();
            Ok(Arc::new(MemoryDataSet::with_data(value)))
        });
        let ctx = context(dir.path()).with_registry(registry);

        let result = ctx.run(&RunOptions::default()).await.unwrap();
        assert_eq!(result.outputs.get("report"), Some(&json!("value=28")));

        let err = context(dir.path())
            .catalog(&BTreeMap::new(), None)
            .unwrap_err();
        assert!(err.to_string().contains("ConstantDataSet"));
    }
}
