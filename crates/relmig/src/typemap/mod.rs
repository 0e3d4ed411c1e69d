//! Default type transform: source types to PostgreSQL-style target types.
//!
//! Source type names from the supported vendors are normalized first
//! (lower-cased, size arguments stripped), then mapped through one table.

mod ddl;

pub use ddl::GenericDdl;

use crate::core::graph::{Column, Table};
use crate::core::identifier::quote_ident;
use crate::core::target::TargetColumn;
use crate::core::traits::TypeTransform;

/// Largest `varchar(n)` the target accepts.
pub const MAX_VARCHAR_LENGTH: i64 = 10_485_760;

/// Largest numeric precision the target accepts.
pub const MAX_NUMERIC_PRECISION: i32 = 1000;

/// Normalize a source type name: lower case, size arguments and extra
/// whitespace removed (`"VARCHAR2(50 BYTE)"` → `"varchar2"`).
pub fn normalize_type(data_type: &str) -> String {
    let base = match data_type.find('(') {
        Some(pos) => {
            // Keep a suffix after the arguments, e.g. "timestamp(6) with time zone".
            let rest = data_type[pos..]
                .find(')')
                .map(|end| &data_type[pos + end + 1..])
                .unwrap_or("");
            format!("{} {}", &data_type[..pos], rest)
        }
        None => data_type.to_string(),
    };
    base.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether a normalized type is a large-object type.
pub fn is_lob_type(normalized: &str) -> bool {
    matches!(
        normalized,
        "clob"
            | "nclob"
            | "blob"
            | "bfile"
            | "long"
            | "long raw"
            | "text"
            | "ntext"
            | "image"
            | "mediumtext"
            | "longtext"
            | "mediumblob"
            | "longblob"
            | "bytea"
    )
}

/// Map a source type to a target `(type, length, precision, scale)`.
///
/// Size arguments are carried only for types that take them.
pub fn map_type(data_type: &str, length: i64, precision: i32, scale: i32) -> (String, i64, i32, i32) {
    let normalized = normalize_type(data_type);
    let plain = |t: &str| (t.to_string(), 0, 0, 0);

    match normalized.as_str() {
        // Boolean
        "bit" | "bool" | "boolean" => plain("boolean"),

        // Integer types
        "tinyint" | "smallint" | "int2" => plain("smallint"),
        "int" | "integer" | "int4" | "mediumint" => plain("integer"),
        "bigint" | "int8" => plain("bigint"),

        // NUMBER without scale narrows to the smallest integer that holds it
        "number" if scale == 0 && precision > 0 => match precision {
            1..=4 => plain("smallint"),
            5..=9 => plain("integer"),
            10..=18 => plain("bigint"),
            _ => ("numeric".to_string(), 0, precision, 0),
        },
        "number" | "decimal" | "numeric" => {
            if precision > 0 {
                ("numeric".to_string(), 0, precision, scale.max(0))
            } else {
                plain("numeric")
            }
        }
        "money" => ("numeric".to_string(), 0, 19, 4),
        "smallmoney" => ("numeric".to_string(), 0, 10, 4),

        // Floating point
        "float" | "double" | "double precision" | "binary_double" | "float8" => {
            plain("double precision")
        }
        "real" | "binary_float" | "float4" => plain("real"),

        // String types
        "char" | "nchar" | "character" | "bpchar" => {
            if length > 0 {
                ("char".to_string(), length, 0, 0)
            } else {
                plain("text")
            }
        }
        "varchar" | "varchar2" | "nvarchar" | "nvarchar2" | "character varying" => {
            if length > 0 {
                ("varchar".to_string(), length, 0, 0)
            } else {
                plain("text")
            }
        }
        "text" | "ntext" | "clob" | "nclob" | "long" | "tinytext" | "mediumtext" | "longtext" => {
            plain("text")
        }

        // Binary types
        "binary" | "varbinary" | "image" | "blob" | "raw" | "long raw" | "bytea"
        | "tinyblob" | "mediumblob" | "longblob" | "bfile" => plain("bytea"),

        // Date/time types
        "date" => plain("date"),
        "time" | "time without time zone" => plain("time"),
        "datetime" | "datetime2" | "smalldatetime" | "timestamp"
        | "timestamp without time zone" => plain("timestamp"),
        "datetimeoffset" | "timestamp with time zone" | "timestamp with local time zone"
        | "timestamptz" => plain("timestamptz"),

        // GUID
        "uniqueidentifier" | "uuid" => plain("uuid"),

        "xml" | "xmltype" => plain("xml"),
        "json" | "jsonb" => plain("jsonb"),

        // Spatial types (convert to text)
        "geometry" | "geography" | "sdo_geometry" => plain("text"),

        // Default fallback
        _ => plain("text"),
    }
}

/// Generic transform used when no vendor-specific one is registered.
#[derive(Debug, Clone, Default)]
pub struct GenericTransform;

impl GenericTransform {
    pub fn new() -> Self {
        Self
    }
}

impl TypeTransform for GenericTransform {
    fn name(&self) -> &str {
        "generic"
    }

    fn map_column(&self, source: &Column) -> TargetColumn {
        let (data_type, length, precision, scale) =
            map_type(&source.data_type, source.length, source.precision, source.scale);
        TargetColumn {
            name: source.name.to_lowercase(),
            data_type,
            length,
            precision,
            scale,
            nullable: source.nullable,
            default: source.default.clone(),
            comment: source.comment.clone(),
            source_type: normalize_type(&source.data_type),
        }
    }

    fn adjust_precision(&self, column: &mut TargetColumn) {
        if matches!(column.data_type.as_str(), "varchar" | "char")
            && column.length > MAX_VARCHAR_LENGTH
        {
            column.data_type = "text".to_string();
            column.length = 0;
        }
        if column.data_type == "numeric" {
            column.precision = column.precision.min(MAX_NUMERIC_PRECISION);
            column.scale = column.scale.clamp(0, column.precision.max(0));
        }
    }

    fn is_lob(&self, source: &Column) -> bool {
        is_lob_type(&normalize_type(&source.data_type))
    }

    fn build_partition_ddl(&self, source: &Table) -> Option<String> {
        let spec = source.partition.as_ref()?;
        let method = spec.method.to_uppercase();
        if !matches!(method.as_str(), "RANGE" | "LIST" | "HASH") || spec.columns.is_empty() {
            return None;
        }
        let columns: Option<Vec<String>> = spec
            .columns
            .iter()
            .map(|c| quote_ident(&c.to_lowercase()).ok())
            .collect();
        Some(format!("PARTITION BY {} ({})", method, columns?.join(", ")))
    }
}
