//! End-to-end runs through the orchestrator over a dump source.

use std::path::Path;
use std::sync::Arc;

use relmig::core::{
    Column, DdlBuilder, ObjectGraph, ObjectKind, Routine, RoutineKind, Schema, Table,
    TargetForeignKey, TargetIndex, TargetObject, TargetTable,
};
use relmig::typemap::GenericDdl;
use relmig::{
    Config, DumpFile, MigrateError, MigrationResult, ObjectStatus, Orchestrator, ServiceCatalog,
    SystemResources,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn hr_dump() -> DumpFile {
    let mut hr = Schema::new("HR")
        .with_table(
            Table::new("HR", "DEPT")
                .with_column(Column::new("ID", "NUMBER").with_precision(10, 0).not_null())
                .with_column(Column::new("NAME", "VARCHAR2").with_length(50))
                .with_primary_key("PK_DEPT", &["ID"]),
        )
        .with_table(
            Table::new("HR", "EMP")
                .with_column(Column::new("ID", "NUMBER").with_precision(10, 0).not_null())
                .with_column(Column::new("NAME", "VARCHAR2").with_length(50))
                .with_column(Column::new("SALARY", "NUMBER").with_precision(10, 2)),
        );
    hr.routines.insert(Routine {
        schema: "HR".into(),
        name: "RAISE_SALARY".into(),
        kind: RoutineKind::Procedure,
        definition: "BEGIN NULL; END;".into(),
        table: None,
    });

    DumpFile::new(ObjectGraph::new("HRDB", "dump").with_schema(hr))
        .with_rows(
            "HR",
            "DEPT",
            vec![json!([10, "Sales"]), json!([20, "Ops"]), json!([30, "IT"])],
        )
        .with_rows(
            "HR",
            "EMP",
            (1..=5)
                .map(|i| json!([i, format!("emp {}", i), "1000.50"]))
                .collect(),
        )
}

fn config(dir: &Path, dump: &DumpFile, commit_count: usize) -> Config {
    let dump_path = dir.join("source.json");
    dump.save(&dump_path).unwrap();
    Config::from_yaml(&format!(
        r#"
source:
  kind: dump
  path: '{}'
target:
  output_dir: '{}'
  prefix: mig
migration:
  commit_count: {}
  max_count_per_file: 2
"#,
        dump_path.display(),
        dir.join("out").display(),
        commit_count
    ))
    .unwrap()
}

fn orchestrator(config: Config) -> Orchestrator {
    Orchestrator::new(config)
        .unwrap()
        .with_resources(SystemResources::fixed(8 * 1024 * 1024 * 1024, 4))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_migrate_writes_schema_data_and_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(config(dir.path(), &hr_dump(), 2));

    let result = orchestrator.migrate(CancellationToken::new()).await.unwrap();

    assert_eq!(result.status, "completed", "{:?}", result.failed_tables);
    assert!(!result.offline);
    assert_eq!(result.tables_total, 2);
    assert_eq!(result.tables_success, 2);
    assert_eq!(result.rows_transferred, 8);
    assert_eq!(result.record_errors, 0);
    assert!(result.error_file.is_none());

    let out = dir.path().join("out");
    assert!(out.join("mig_script.json").exists());
    assert!(out.join("mig_public_dept.csv").exists());
    assert!(out.join("mig_public_emp.csv").exists());
    assert!(!out.join("mig_public_emp_1.csv").exists());

    // Schema files are listed in write order and exist on disk.
    let files = orchestrator.files("public").unwrap();
    assert!(!files.is_empty());
    let mut ddl = String::new();
    for file in &files {
        ddl.push_str(&std::fs::read_to_string(out.join(file)).unwrap());
    }
    assert!(ddl.contains("CREATE TABLE \"public\".\"dept\""));
    assert!(ddl.contains("CREATE TABLE \"public\".\"emp\""));
    assert!(!ddl.to_lowercase().contains("raise_salary"));

    let skipped: Vec<_> = result.objects_with(ObjectStatus::Skipped).collect();
    assert!(skipped.iter().any(|o| o.name == "raise_salary"));
    assert_eq!(result.objects_with(ObjectStatus::Failed).count(), 0);

    let manifest = MigrationResult::load(orchestrator.manifest_path()).unwrap();
    assert_eq!(manifest.run_id, result.run_id);
    let checks = orchestrator.verify_outputs(&manifest);
    assert_eq!(checks.len(), 2);
    assert!(checks.iter().all(|c| c.matches()), "{:?}", checks);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_saved_script_edits_drive_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(config(dir.path(), &hr_dump(), 2));

    let (mut script, mut reconciler) = orchestrator.plan().await.unwrap();
    reconciler
        .retarget_table("HR", "EMP", None, "employees")
        .unwrap();
    reconciler
        .retarget_column("HR", "EMP", "SALARY", "monthly_salary")
        .unwrap();
    orchestrator.save_script(&mut script, &reconciler).unwrap();

    let result = orchestrator.migrate(CancellationToken::new()).await.unwrap();

    assert_eq!(result.run_id, script.run_id);
    assert!(result.data_files.contains_key("public.employees"));
    assert!(!result.data_files.contains_key("public.emp"));
    let data = std::fs::read_to_string(&result.data_files["public.employees"]).unwrap();
    assert!(data.starts_with("id,name,monthly_salary\n"));
    assert_eq!(data.lines().count(), 6);
}

#[tokio::test]
async fn test_changed_config_rejects_saved_script() {
    let dir = tempfile::tempdir().unwrap();
    let dump = hr_dump();
    let first = orchestrator(config(dir.path(), &dump, 2));
    let (mut script, reconciler) = first.plan().await.unwrap();
    first.save_script(&mut script, &reconciler).unwrap();

    let second = orchestrator(config(dir.path(), &dump, 5));
    let err = second.migrate(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, MigrateError::ScriptChanged));
    assert_eq!(err.exit_code(), 5);
}

#[tokio::test]
async fn test_offline_source_fails_every_table() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(config(dir.path(), &hr_dump().offline(), 2));

    let result = orchestrator.migrate(CancellationToken::new()).await.unwrap();

    assert!(result.offline);
    assert_eq!(result.status, "failed");
    assert_eq!(result.tables_failed, 2);
    assert_eq!(result.rows_transferred, 0);
    // DDL is still written.
    assert!(!orchestrator.files("public").unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(config(dir.path(), &hr_dump(), 2));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator.migrate(cancel).await.unwrap();

    assert_eq!(result.status, "cancelled");
    assert_eq!(result.rows_transferred, 0);
    assert!(orchestrator.manifest_path().exists());
}

/// Generic DDL that refuses to drop one table.
struct FailingDrop {
    inner: GenericDdl,
    table: &'static str,
}

impl DdlBuilder for FailingDrop {
    fn create_schema(&self, schema: &str) -> relmig::Result<String> {
        self.inner.create_schema(schema)
    }

    fn create_table(&self, table: &TargetTable) -> relmig::Result<String> {
        self.inner.create_table(table)
    }

    fn drop_table(&self, table: &TargetTable) -> relmig::Result<String> {
        if table.name == self.table {
            return Err(MigrateError::Config(format!("cannot drop {}", table.name)));
        }
        self.inner.drop_table(table)
    }

    fn create_primary_key(&self, table: &TargetTable) -> relmig::Result<Option<String>> {
        self.inner.create_primary_key(table)
    }

    fn create_foreign_key(&self, table: &TargetTable, fk: &TargetForeignKey) -> relmig::Result<String> {
        self.inner.create_foreign_key(table, fk)
    }

    fn create_index(&self, table: &TargetTable, index: &TargetIndex) -> relmig::Result<String> {
        self.inner.create_index(table, index)
    }

    fn create_object(&self, object: &TargetObject) -> relmig::Result<String> {
        self.inner.create_object(object)
    }

    fn drop_object(&self, object: &TargetObject) -> relmig::Result<String> {
        self.inner.drop_object(object)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_drop_does_not_stop_later_objects() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &hr_dump(), 2);
    let mut catalog = ServiceCatalog::with_builtins();
    catalog.open_source(&config.source).unwrap();
    catalog.register_ddl(
        "dump",
        Arc::new(FailingDrop {
            inner: GenericDdl::new(),
            table: "dept",
        }),
    );
    let orchestrator = Orchestrator::with_catalog(config, catalog)
        .unwrap()
        .with_resources(SystemResources::fixed(8 * 1024 * 1024 * 1024, 4));

    let result = orchestrator.migrate(CancellationToken::new()).await.unwrap();

    assert_eq!(result.status, "partial");
    let status = |name: &str, wanted: ObjectStatus| {
        result
            .objects
            .iter()
            .any(|o| o.kind == ObjectKind::Table && o.name == name && o.status == wanted)
    };
    assert!(status("dept", ObjectStatus::Failed));
    assert!(status("emp", ObjectStatus::Dropped));
    assert!(status("dept", ObjectStatus::Created));
    assert!(status("emp", ObjectStatus::Created));
    assert_eq!(result.tables_success, 2);

    let manifest = MigrationResult::load(orchestrator.manifest_path()).unwrap();
    assert_eq!(manifest.status, "partial");
}
