//! End-to-end tests for both runners.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::errors::{DataSetError, NodeflowError};
    use crate::events::{
        CollectingEventSink, NODE_COMPLETED, NODE_SKIPPED, NODE_STARTED, PIPELINE_COMPLETED,
        PIPELINE_FAILED, PIPELINE_STARTED,
    };
    use crate::io::{DataCatalog, DataSet, JsonLocalDataSet, LambdaDataSet, MemoryDataSet};
    use crate::pipeline::{func1, func2, node, variadic, Node, NodeOutputs, Pipeline};
    use crate::runner::{ParallelRunner, Runner, SequentialRunner};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn number(v: &Value) -> i64 {
        v.as_i64().unwrap_or_default()
    }

    fn add_one(name: &str, input: &str, output: &str) -> Node {
        node(func1(name, |v| Ok(json!(number(&v) + 1))), [input], output)
            .unwrap()
            .with_name(name)
    }

    /// raw -> a -> (b, c) -> d, plus an independent e.
    fn diamond() -> Pipeline {
        Pipeline::new(vec![
            add_one("a", "raw", "a_out"),
            add_one("b", "a_out", "b_out"),
            node(func1("c", |v| Ok(json!(number(&v) * 10))), ["a_out"], "c_out")
                .unwrap()
                .with_name("c"),
            node(
                func2("d", |b, c| Ok(json!(number(&b) + number(&c)))),
                ["b_out", "c_out"],
                "d_out",
            )
            .unwrap()
            .with_name("d"),
            add_one("e", "raw", "e_out"),
        ])
        .unwrap()
    }

    fn catalog_with_raw(value: Value) -> DataCatalog {
        let catalog = DataCatalog::new();
        catalog
            .add("raw", Arc::new(MemoryDataSet::with_data(value)))
            .unwrap();
        catalog
    }

    fn runners() -> Vec<Box<dyn Runner>> {
        vec![
            Box::new(SequentialRunner::new()),
            Box::new(ParallelRunner::new(Some(2)).unwrap()),
        ]
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sequential_and_parallel_outputs_match() {
        let pipeline = diamond();
        let mut results = Vec::new();
        for runner in runners() {
            let result = runner
                .run(&pipeline, &catalog_with_raw(json!(1)), false)
                .await
                .unwrap();
            assert_eq!(result.nodes_run, 5);
            results.push(result.outputs);
        }

        let expected: BTreeMap<String, Value> = [
            ("d_out".to_string(), json!(23)),
            ("e_out".to_string(), json!(2)),
        ]
        .into_iter()
        .collect();
        assert_eq!(results[0], expected);
        assert_eq!(results[1], expected);
    }

    #[tokio::test]
    async fn test_missing_free_inputs_fail_before_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pipeline = Pipeline::new(vec![node(
            func1("count", move |v| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(v)
            }),
            ["raw"],
            "out",
        )
        .unwrap()])
        .unwrap();

        let err = SequentialRunner::new()
            .run(&pipeline, &DataCatalog::new(), false)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Pipeline input(s) {'raw'} not found in the DataCatalog"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_carries_node_identity() {
        let pipeline = Pipeline::new(vec![
            add_one("a", "raw", "a_out"),
            node(
                func1("explode", |_| anyhow::bail!("bad input")),
                ["a_out"],
                "b_out",
            )
            .unwrap()
            .with_name("exploder"),
            add_one("after", "b_out", "c_out"),
        ])
        .unwrap();

        let sinks = [
            Arc::new(CollectingEventSink::new()),
            Arc::new(CollectingEventSink::new()),
        ];
        let observed: Vec<Box<dyn Runner>> = vec![
            Box::new(SequentialRunner::new().with_event_sink(sinks[0].clone())),
            Box::new(
                ParallelRunner::new(Some(2))
                    .unwrap()
                    .with_event_sink(sinks[1].clone()),
            ),
        ];
        for (runner, sink) in observed.into_iter().zip(sinks) {
            let err = runner
                .run(&pipeline, &catalog_with_raw(json!(0)), false)
                .await
                .unwrap_err();
            match err {
                NodeflowError::NodeExecution(e) => {
                    assert_eq!(e.node, "exploder");
                    assert_eq!(e.source.to_string(), "bad input");
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(sink.nodes_for(NODE_COMPLETED), vec!["a"]);
            assert!(!sink.nodes_for(NODE_STARTED).contains(&"after".to_string()));
            assert_eq!(sink.events_of_type(PIPELINE_FAILED).len(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unsaved_input_error_names_data_set() {
        let pipeline = Pipeline::new(vec![node(func1("id", Ok), ["seed"], "out").unwrap()]).unwrap();

        for runner in runners() {
            let catalog = DataCatalog::new();
            catalog.add("seed", Arc::new(MemoryDataSet::new())).unwrap();
            let err = runner.run(&pipeline, &catalog, false).await.unwrap_err();
            assert!(matches!(
                err,
                NodeflowError::DataSet(DataSetError::Empty { .. })
            ));
            assert!(err.to_string().contains("'seed'"), "got: {err}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_failure_stops_dispatch_and_keeps_in_flight_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut nodes = vec![node(
            func1("fail_fast", |_| anyhow::bail!("failed early")),
            ["raw"],
            "out_0",
        )
        .unwrap()
        .with_name("n0")];
        for i in 1..4 {
            nodes.push(
                node(
                    func1("slow", |v| {
                        std::thread::sleep(std::time::Duration::from_millis(100));
                        Ok(v)
                    }),
                    ["raw"],
                    format!("out_{i}"),
                )
                .unwrap()
                .with_name(format!("n{i}")),
            );
        }
        let pipeline = Pipeline::new(nodes).unwrap();
        assert_eq!(pipeline.layers().len(), 1);

        let catalog = catalog_with_raw(json!(7));
        catalog
            .add(
                "out_1",
                Arc::new(JsonLocalDataSet::at(dir.path().join("out_1.json"))),
            )
            .unwrap();

        let sink = Arc::new(CollectingEventSink::new());
        let err = ParallelRunner::new(Some(2))
            .unwrap()
            .with_event_sink(sink.clone())
            .run(&pipeline, &catalog, false)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeflowError::NodeExecution(ref e) if e.node == "n0"));

        let mut started = sink.nodes_for(NODE_STARTED);
        started.sort();
        assert_eq!(started, vec!["n0", "n1"]);
        assert_eq!(sink.nodes_for(NODE_COMPLETED), vec!["n1"]);
        assert_eq!(catalog.load("out_1").unwrap(), json!(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_node_becomes_node_error() {
        let pipeline = Pipeline::new(vec![node(
            func1("panics", |_| panic!("oh no")),
            ["raw"],
            "out",
        )
        .unwrap()])
        .unwrap();

        for runner in runners() {
            let err = runner
                .run(&pipeline, &catalog_with_raw(json!(0)), false)
                .await
                .unwrap_err();
            assert!(matches!(err, NodeflowError::NodeExecution(_)));
            assert!(err.to_string().contains("oh no"));
        }
    }

    #[tokio::test]
    async fn test_event_order_sequential() {
        let sink = Arc::new(CollectingEventSink::new());
        let runner = SequentialRunner::new().with_event_sink(sink.clone());
        runner
            .run(&diamond(), &catalog_with_raw(json!(1)), false)
            .await
            .unwrap();

        let types: Vec<String> = sink.events().into_iter().map(|(t, _)| t).collect();
        assert_eq!(types.first().map(String::as_str), Some(PIPELINE_STARTED));
        assert_eq!(types.last().map(String::as_str), Some(PIPELINE_COMPLETED));
        assert_eq!(
            sink.nodes_for(NODE_COMPLETED),
            vec!["a", "e", "b", "c", "d"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_only_missing_skips_nodes_with_existing_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let build = || {
            let catalog = catalog_with_raw(json!(1));
            catalog
                .add(
                    "a_out",
                    Arc::new(JsonLocalDataSet::at(dir.path().join("a_out.json"))),
                )
                .unwrap();
            catalog
        };
        let pipeline = diamond();

        let full = SequentialRunner::new()
            .run(&pipeline, &build(), false)
            .await
            .unwrap();

        for runner in runners() {
            let partial = runner.run(&pipeline, &build(), true).await.unwrap();
            assert_eq!(partial.nodes_skipped, 1);
            assert_eq!(partial.nodes_run, 4);
            assert_eq!(partial.outputs, full.outputs);
        }

        let sink = Arc::new(CollectingEventSink::new());
        SequentialRunner::new()
            .with_event_sink(sink.clone())
            .run(&pipeline, &build(), true)
            .await
            .unwrap();
        assert_eq!(sink.nodes_for(NODE_SKIPPED), vec!["a"]);
    }

    #[tokio::test]
    async fn test_zero_output_nodes_always_run_with_only_missing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pipeline = Pipeline::new(vec![node(
            variadic("report", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }),
            ["raw"],
            NodeOutputs::none(),
        )
        .unwrap()])
        .unwrap();

        let result = SequentialRunner::new()
            .run(&pipeline, &catalog_with_raw(json!(1)), true)
            .await
            .unwrap();
        assert_eq!(result.nodes_run, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.outputs.is_empty());
    }

    /// In-memory lambda data set counting its releases.
    fn release_counting(released: &Arc<AtomicUsize>) -> LambdaDataSet {
        let counter = Arc::clone(released);
        let store = Arc::new(parking_lot::Mutex::new(None));
        let (load_store, save_store) = (Arc::clone(&store), Arc::clone(&store));
        LambdaDataSet::new()
            .with_load(move || {
                load_store
                    .lock()
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("empty"))
            })
            .with_save(move |v| {
                *save_store.lock() = Some(v);
                Ok(())
            })
            .with_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
    }

    #[tokio::test]
    async fn test_intermediate_memory_is_released() {
        let released = Arc::new(AtomicUsize::new(0));
        let catalog = catalog_with_raw(json!(1));
        catalog
            .add("a_out", Arc::new(release_counting(&released)))
            .unwrap();

        SequentialRunner::new()
            .run(&diamond(), &catalog, false)
            .await
            .unwrap();
        // a_out has two readers (b and c); released once after the last.
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_intermediate_read_only_by_skipped_nodes_is_released() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("b_out.json");
        JsonLocalDataSet::at(&final_path).save(json!(3)).unwrap();

        let released = Arc::new(AtomicUsize::new(0));
        let catalog = catalog_with_raw(json!(1));
        catalog
            .add("a_out", Arc::new(release_counting(&released)))
            .unwrap();
        catalog
            .add("b_out", Arc::new(JsonLocalDataSet::at(&final_path)))
            .unwrap();
        let pipeline = Pipeline::new(vec![
            add_one("a", "raw", "a_out"),
            add_one("b", "a_out", "b_out"),
        ])
        .unwrap();

        let result = SequentialRunner::new()
            .run(&pipeline, &catalog, true)
            .await
            .unwrap();
        assert_eq!(result.nodes_run, 1);
        assert_eq!(result.nodes_skipped, 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(result.outputs.get("b_out"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_run_does_not_register_intermediates_in_callers_catalog() {
        let catalog = catalog_with_raw(json!(1));
        SequentialRunner::new()
            .run(&diamond(), &catalog, false)
            .await
            .unwrap();
        assert_eq!(catalog.list(), vec!["raw".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_rejects_non_transferable_data_sets() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pipeline = Pipeline::new(vec![node(
            func1("count", move |v| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(v)
            }),
            ["raw"],
            "sink",
        )
        .unwrap()])
        .unwrap();

        let catalog = catalog_with_raw(json!(1));
        catalog
            .add("sink", Arc::new(LambdaDataSet::new().with_save(|_| Ok(()))))
            .unwrap();

        let err = ParallelRunner::new(Some(2))
            .unwrap()
            .run(&pipeline, &catalog, false)
            .await
            .unwrap_err();
        match err {
            NodeflowError::DataSet(DataSetError::NotTransferable { data_sets }) => {
                assert_eq!(data_sets.into_iter().collect::<Vec<_>>(), vec!["sink"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_stops_dispatch() {
        let token = Arc::new(CancellationToken::new());
        let trigger = Arc::clone(&token);
        let pipeline = Pipeline::new(vec![
            node(
                func1("cancel", move |v| {
                    trigger.cancel("user requested stop");
                    Ok(v)
                }),
                ["raw"],
                "a_out",
            )
            .unwrap()
            .with_name("first"),
            add_one("second", "a_out", "b_out"),
        ])
        .unwrap();

        let sequential = SequentialRunner::new().with_cancellation_token(Arc::clone(&token));
        let err = sequential
            .run(&pipeline, &catalog_with_raw(json!(1)), false)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeflowError::Cancelled(_)));
        assert!(err.to_string().contains("user requested stop"));

        let parallel = ParallelRunner::new(Some(2))
            .unwrap()
            .with_cancellation_token(token);
        let err = parallel
            .run(&pipeline, &catalog_with_raw(json!(1)), false)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeflowError::Cancelled(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_respects_worker_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let nodes: Vec<Node> = (0..6)
            .map(|i| {
                let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
                node(
                    func1("work", move |v| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(v)
                    }),
                    ["raw"],
                    format!("out_{i}"),
                )
                .unwrap()
                .with_name(format!("work_{i}"))
            })
            .collect();
        let pipeline = Pipeline::new(nodes).unwrap();

        let result = ParallelRunner::new(Some(2))
            .unwrap()
            .run(&pipeline, &catalog_with_raw(json!(1)), false)
            .await
            .unwrap();
        assert_eq!(result.outputs.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_output_arity_mismatch_is_fatal() {
        let pipeline = Pipeline::new(vec![node(
            func1("pair", |v| Ok(json!([v]))),
            ["raw"],
            ["x", "y"],
        )
        .unwrap()])
        .unwrap();

        for runner in runners() {
            let err = runner
                .run(&pipeline, &catalog_with_raw(json!(1)), false)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                NodeflowError::DataSet(DataSetError::OutputArity { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_registered_outputs_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.json");
        let catalog = catalog_with_raw(json!(1));
        catalog
            .add("d_out", Arc::new(JsonLocalDataSet::at(&path)))
            .unwrap();

        let result = SequentialRunner::new()
            .run(&diamond(), &catalog, false)
            .await
            .unwrap();
        assert_eq!(result.outputs.get("d_out"), Some(&json!(23)));
        assert_eq!(JsonLocalDataSet::at(&path).load().unwrap(), json!(23));
    }
}
