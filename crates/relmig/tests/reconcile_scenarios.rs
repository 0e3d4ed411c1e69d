//! Reconciler scenarios: N:1 merges, disambiguation, retargets onto shared
//! targets and source drift.

use std::sync::Arc;

use relmig::core::{Column, ObjectGraph, Schema, Table};
use relmig::typemap::GenericTransform;
use relmig::{MigrateError, ReconcileOptions, Reconciler, TaskPlan};

fn reconciled(graph: ObjectGraph) -> Reconciler {
    let mut r = Reconciler::new(ReconcileOptions::default(), Arc::new(GenericTransform::new()));
    r.attach_graph(graph).unwrap();
    r.reconcile(true).unwrap();
    r
}

fn target_columns(r: &Reconciler, schema: &str, table: &str) -> Vec<String> {
    r.target_table(schema, table)
        .unwrap()
        .columns
        .iter()
        .map(|c| c.name.clone())
        .collect()
}

#[test]
fn test_two_yearly_tables_merge_into_one_target() {
    let sales = Schema::new("SALES")
        .with_table(
            Table::new("SALES", "ORDERS_2023")
                .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                .with_column(Column::new("AMOUNT", "NUMBER").with_precision(12, 2)),
        )
        .with_table(
            Table::new("SALES", "ORDERS_2024")
                .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                .with_column(Column::new("CHANNEL", "VARCHAR2").with_length(20)),
        );
    let mut r = reconciled(ObjectGraph::new("DB", "dump").with_schema(sales));

    r.retarget_table("SALES", "ORDERS_2023", None, "orders").unwrap();
    r.retarget_table("SALES", "ORDERS_2024", None, "orders").unwrap();

    assert_eq!(r.reference_count("public", "orders"), 2);
    let columns = target_columns(&r, "public", "orders");
    for expected in ["id", "amount", "channel"] {
        assert!(columns.contains(&expected.to_string()), "missing {}", expected);
    }
    assert!(r.target_table("public", "orders_2023").is_none());
    assert!(r.target_table("public", "orders_2024").is_none());

    // One create task, one data task per contributor.
    let plan = TaskPlan::build(&r);
    assert_eq!(plan.data_tasks().count(), 2);
    assert_eq!(
        plan.phase(relmig::Phase::Tables)
            .filter(|t| t.name == "orders")
            .count(),
        1
    );
}

#[test]
fn test_same_table_name_in_two_schemas_is_owner_prefixed() {
    let dept = |schema: &str| {
        Table::new(schema, "DEPT").with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
    };
    let graph = ObjectGraph::new("DB", "dump")
        .with_schema(Schema::new("HR").with_table(dept("HR")))
        .with_schema(Schema::new("SALES").with_table(dept("SALES")));
    let r = reconciled(graph);

    assert_eq!(r.table_intent("HR", "DEPT").unwrap().target, "hr_dept");
    assert_eq!(r.table_intent("SALES", "DEPT").unwrap().target, "sales_dept");
}

#[test]
fn test_retarget_onto_used_target_discards_vacated_one() {
    let graph = ObjectGraph::new("DB", "dump").with_schema(
        Schema::new("CRM")
            .with_table(
                Table::new("CRM", "CUSTOMER_TBL")
                    .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                    .with_column(Column::new("SEGMENT", "VARCHAR2").with_length(10)),
            )
            .with_table(
                Table::new("CRM", "CLIENTS")
                    .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                    .with_column(Column::new("NAME", "VARCHAR2").with_length(80)),
            ),
    );
    let mut r = reconciled(graph);
    r.retarget_table("CRM", "CUSTOMER_TBL", None, "cust").unwrap();
    r.retarget_table("CRM", "CLIENTS", None, "customers").unwrap();
    assert_eq!(r.reference_count("public", "cust"), 1);
    assert_eq!(r.reference_count("public", "customers"), 1);

    r.retarget_table("CRM", "CUSTOMER_TBL", None, "customers").unwrap();

    assert!(r.target_table("public", "cust").is_none());
    assert_eq!(r.reference_count("public", "customers"), 2);
    let columns = target_columns(&r, "public", "customers");
    assert!(columns.contains(&"segment".to_string()));
    assert!(columns.contains(&"name".to_string()));
}

#[test]
fn test_leaving_shared_target_clones_off_a_fresh_one() {
    let hr = Schema::new("HR")
        .with_table(
            Table::new("HR", "A")
                .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                .with_column(Column::new("AONLY", "VARCHAR2").with_length(10)),
        )
        .with_table(
            Table::new("HR", "B")
                .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                .with_column(Column::new("BONLY", "VARCHAR2").with_length(10)),
        );
    let mut r = reconciled(ObjectGraph::new("DB", "dump").with_schema(hr));
    r.retarget_table("HR", "A", None, "t").unwrap();
    r.retarget_table("HR", "B", None, "t").unwrap();
    assert_eq!(r.reference_count("public", "t"), 2);
    assert_eq!(target_columns(&r, "public", "t"), vec!["id", "aonly", "bonly"]);

    r.retarget_table("HR", "A", None, "ta").unwrap();

    assert_eq!(r.reference_count("public", "t"), 1);
    assert_eq!(r.reference_count("public", "ta"), 1);
    assert_eq!(target_columns(&r, "public", "t"), vec!["id", "bonly"]);
    assert_eq!(target_columns(&r, "public", "ta"), vec!["id", "aonly"]);
    assert_eq!(r.table_intent("HR", "B").unwrap().target, "t");
}

#[test]
fn test_dropped_source_column_is_purged_without_renaming_others() {
    let table = |with_note: bool| {
        let mut t = Table::new("HR", "EMP")
            .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
            .with_column(Column::new("NAME", "VARCHAR2").with_length(50));
        if with_note {
            t = t.with_column(Column::new("NOTE", "VARCHAR2").with_length(200));
        }
        t
    };
    let graph = |with_note| ObjectGraph::new("DB", "dump").with_schema(Schema::new("HR").with_table(table(with_note)));

    let mut r = reconciled(graph(true));
    r.retarget_column("HR", "EMP", "NAME", "full_name").unwrap();
    assert_eq!(target_columns(&r, "public", "emp"), vec!["id", "full_name", "note"]);

    r.attach_graph(graph(false)).unwrap();
    r.reconcile(false).unwrap();

    let intent = r.table_intent("HR", "EMP").unwrap();
    assert!(intent.columns.get("NOTE").is_none());
    assert_eq!(intent.column_by_target("full_name").unwrap().name, "NAME");
    assert_eq!(target_columns(&r, "public", "emp"), vec!["id", "full_name"]);
}

#[test]
fn test_reconcile_without_reset_is_idempotent() {
    let graph = ObjectGraph::new("DB", "dump").with_schema(
        Schema::new("HR").with_table(
            Table::new("HR", "EMP").with_column(Column::new("ID", "NUMBER").with_precision(10, 0)),
        ),
    );
    let mut r = reconciled(graph);
    let before = r.state();
    r.reconcile(false).unwrap();
    assert_eq!(r.state(), before);
}

#[test]
fn test_retarget_unknown_table_is_a_resolution_error() {
    let mut r = reconciled(ObjectGraph::new("DB", "dump").with_schema(Schema::new("HR")));
    assert!(matches!(
        r.retarget_table("HR", "MISSING", None, "x"),
        Err(MigrateError::Resolution { .. })
    ));
}
