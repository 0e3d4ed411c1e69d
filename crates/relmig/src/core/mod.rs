//! Core abstractions shared by the reconciler and the pipeline.
//!
//! - [`identifier`]: normalized identifiers, validation and quoting
//! - [`named`]: insertion-ordered collections with a name index
//! - [`graph`]: the source object graph
//! - [`target`]: the target object graph
//! - [`value`]: raw and converted values, pages and batches
//! - [`traits`]: collaborator traits (fetcher, row source, transform, DDL, value handler)
//! - [`catalog`]: service registry for dependency injection

pub mod catalog;
pub mod graph;
pub mod identifier;
pub mod named;
pub mod target;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use catalog::ServiceCatalog;
pub use graph::{
    Column, ForeignKey, Grant, Index, IndexColumn, ObjectGraph, ObjectKind, PartitionSpec,
    PrimaryKey, ReferentialAction, Routine, RoutineKind, Schema, Sequence, SortOrder, Synonym,
    Table, View,
};
pub use identifier::{normalize, Ident, ObjectKey};
pub use named::{Named, NamedList};
pub use target::{
    TargetColumn, TargetForeignKey, TargetGraph, TargetIndex, TargetObject, TargetPrimaryKey,
    TargetTable,
};
pub use traits::{
    DdlBuilder, ObjectFilter, ReadOptions, RowSource, SourceFetcher, TypeTransform, ValueHandler,
};
pub use value::{Batch, RawValue, RowPage, SourceRow, SqlValue};
