//! Data pipeline: rotation, merge gating and N:1 merges.

use std::path::Path;
use std::sync::Arc;

use relmig::core::{Column, ObjectGraph, Schema, Table};
use relmig::pipeline::handlers::HandlerRegistry;
use relmig::pipeline::{
    build_jobs, count_rows, CollectingSink, OutputRegistry, OutputSettings, PipelineSettings, TableJob,
};
use relmig::typemap::GenericTransform;
use relmig::{
    DumpFile, DumpSource, MigrationEvent, OutputFormat, Pipeline, ReconcileOptions, Reconciler,
    TableStatus, TaskPlan,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn settings(commit_count: usize) -> PipelineSettings {
    PipelineSettings {
        export_threads: 2,
        import_threads: 3,
        commit_count,
        parallel_readers: 1,
        prefix: "mig".into(),
    }
}

fn outputs(dir: &Path, max_rows_per_file: usize) -> OutputRegistry {
    OutputRegistry::new(OutputSettings {
        dir: dir.to_path_buf(),
        format: OutputFormat::Csv,
        max_rows_per_file,
        one_file_per_table: false,
    })
}

fn jobs(reconciler: &Reconciler) -> Vec<TableJob> {
    build_jobs(reconciler, &TaskPlan::build(reconciler)).unwrap()
}

fn reconciled(graph: ObjectGraph) -> Reconciler {
    let mut r = Reconciler::new(ReconcileOptions::default(), Arc::new(GenericTransform::new()));
    r.attach_graph(graph).unwrap();
    r.reconcile(true).unwrap();
    r
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rotated_parts_merge_into_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let graph = ObjectGraph::new("DB", "dump").with_schema(
        Schema::new("SALES").with_table(
            Table::new("SALES", "ORDERS")
                .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                .with_column(Column::new("NOTE", "VARCHAR2").with_length(40)),
        ),
    );
    let rows = (0..2500).map(|i| json!([i, format!("n{}", i)])).collect();
    let dump = DumpFile::new(graph.clone()).with_rows("SALES", "ORDERS", rows);
    let r = reconciled(graph);
    let events = Arc::new(CollectingSink::new());

    let report = Pipeline::new(
        Arc::new(DumpSource::new(dump)),
        Arc::new(HandlerRegistry::with_defaults()),
        outputs(dir.path(), 1000),
        settings(1000),
    )
    .with_events(events.clone())
    .run(jobs(&r), CancellationToken::new())
    .await
    .unwrap();

    assert!(report.is_success(), "{:?}", report.failures);
    let orders = report.table("public.orders").unwrap();
    assert_eq!(orders.status, TableStatus::Merged);
    assert_eq!(orders.exported, 2500);
    assert_eq!(orders.written, 2500);

    let events = events.events();
    let rotations = events
        .iter()
        .filter(|e| matches!(e, MigrationEvent::FileRotated { .. }))
        .count();
    assert_eq!(rotations, 3);
    let merged: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            MigrationEvent::TableMerged { rows, .. } => Some(*rows),
            _ => None,
        })
        .collect();
    assert_eq!(merged, vec![2500]);

    let merged_path = dir.path().join("mig_public_orders.csv");
    assert_eq!(count_rows(&merged_path, OutputFormat::Csv).unwrap(), 2500);
    for part in 1..=3 {
        assert!(!dir.path().join(format!("mig_public_orders_{}.csv", part)).exists());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_merged_target_waits_for_every_contributor() {
    let dir = tempfile::tempdir().unwrap();
    let graph = ObjectGraph::new("DB", "dump").with_schema(
        Schema::new("SALES")
            .with_table(
                Table::new("SALES", "ORDERS_2023")
                    .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                    .with_column(Column::new("AMOUNT", "NUMBER").with_precision(12, 2)),
            )
            .with_table(
                Table::new("SALES", "ORDERS_2024")
                    .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                    .with_column(Column::new("CHANNEL", "VARCHAR2").with_length(20)),
            ),
    );
    let dump = DumpFile::new(graph.clone())
        .with_rows(
            "SALES",
            "ORDERS_2023",
            (0..30).map(|i| json!([i, "9.99"])).collect(),
        )
        .with_rows(
            "SALES",
            "ORDERS_2024",
            (100..150).map(|i| json!([i, "web"])).collect(),
        );
    let mut r = reconciled(graph);
    r.retarget_table("SALES", "ORDERS_2023", None, "orders").unwrap();
    r.retarget_table("SALES", "ORDERS_2024", None, "orders").unwrap();
    let events = Arc::new(CollectingSink::new());

    let report = Pipeline::new(
        Arc::new(DumpSource::new(dump)),
        Arc::new(HandlerRegistry::with_defaults()),
        outputs(dir.path(), 25),
        settings(7),
    )
    .with_events(events.clone())
    .run(jobs(&r), CancellationToken::new())
    .await
    .unwrap();

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.tables.len(), 1);
    assert_eq!(report.rows_written, 80);

    let merges = events
        .events()
        .into_iter()
        .filter(|e| matches!(e, MigrationEvent::TableMerged { .. }))
        .count();
    assert_eq!(merges, 1);

    let merged_path = dir.path().join("mig_public_orders.csv");
    let content = std::fs::read_to_string(&merged_path).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("id,amount,channel"));
    assert_eq!(lines.clone().count(), 80);
    assert!(content.contains("\n100,,web\n"));
    assert!(content.contains("\n0,9.99,\n"));
}

#[tokio::test]
async fn test_cancelled_run_merges_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let graph = ObjectGraph::new("DB", "dump").with_schema(
        Schema::new("HR").with_table(
            Table::new("HR", "EMP").with_column(Column::new("ID", "NUMBER").with_precision(10, 0)),
        ),
    );
    let dump = DumpFile::new(graph.clone()).with_rows("HR", "EMP", vec![json!([1]), json!([2])]);
    let r = reconciled(graph);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = Pipeline::new(
        Arc::new(DumpSource::new(dump)),
        Arc::new(HandlerRegistry::with_defaults()),
        outputs(dir.path(), 10),
        settings(1),
    )
    .run(jobs(&r), cancel)
    .await
    .unwrap();

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert!(!dir.path().join("mig_public_emp.csv").exists());
}
