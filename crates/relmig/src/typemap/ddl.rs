//! PostgreSQL-style DDL rendering for target objects.

use crate::core::graph::SortOrder;
use crate::core::identifier::{qualify, quote_ident};
use crate::core::target::{
    is_plain_identifier, TargetForeignKey, TargetIndex, TargetObject, TargetTable,
};
use crate::core::traits::DdlBuilder;
use crate::error::Result;

/// Renders statements terminated with `;`, one object per call.
#[derive(Debug, Clone, Default)]
pub struct GenericDdl;

impl GenericDdl {
    pub fn new() -> Self {
        Self
    }
}

/// Quote a string literal.
fn literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn quote_list(names: &[String]) -> Result<String> {
    let quoted: Result<Vec<String>> = names.iter().map(|n| quote_ident(n)).collect();
    Ok(quoted?.join(", "))
}

impl DdlBuilder for GenericDdl {
    fn create_schema(&self, schema: &str) -> Result<String> {
        Ok(format!("CREATE SCHEMA IF NOT EXISTS {};", quote_ident(schema)?))
    }

    fn create_table(&self, table: &TargetTable) -> Result<String> {
        let qualified = qualify(&table.schema, &table.name)?;
        let mut col_defs = Vec::with_capacity(table.columns.len());
        for c in table.columns.iter() {
            let mut def = format!("{} {}", quote_ident(&c.name)?, c.type_text());
            if let Some(default) = &c.default {
                def.push_str(&format!(" DEFAULT {}", default));
            }
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            col_defs.push(def);
        }

        let mut sql = format!(
            "CREATE TABLE {} (\n    {}\n)",
            qualified,
            col_defs.join(",\n    ")
        );
        if let Some(partition) = &table.partition_ddl {
            sql.push('\n');
            sql.push_str(partition);
        }
        sql.push(';');

        if let Some(comment) = &table.comment {
            sql.push_str(&format!(
                "\nCOMMENT ON TABLE {} IS {};",
                qualified,
                literal(comment)
            ));
        }
        for c in table.columns.iter() {
            if let Some(comment) = &c.comment {
                sql.push_str(&format!(
                    "\nCOMMENT ON COLUMN {}.{} IS {};",
                    qualified,
                    quote_ident(&c.name)?,
                    literal(comment)
                ));
            }
        }
        Ok(sql)
    }

    fn drop_table(&self, table: &TargetTable) -> Result<String> {
        Ok(format!(
            "DROP TABLE IF EXISTS {} CASCADE;",
            qualify(&table.schema, &table.name)?
        ))
    }

    fn create_primary_key(&self, table: &TargetTable) -> Result<Option<String>> {
        let Some(pk) = table.primary_key.as_ref().filter(|pk| !pk.columns.is_empty()) else {
            return Ok(None);
        };
        Ok(Some(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({});",
            qualify(&table.schema, &table.name)?,
            quote_ident(&pk.name)?,
            quote_list(&pk.columns)?
        )))
    }

    fn create_foreign_key(&self, table: &TargetTable, fk: &TargetForeignKey) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {};",
            qualify(&table.schema, &table.name)?,
            quote_ident(&fk.name)?,
            quote_list(&fk.columns)?,
            qualify(&fk.ref_schema, &fk.ref_table)?,
            quote_list(&fk.ref_columns)?,
            fk.on_delete.as_sql(),
            fk.on_update.as_sql()
        ))
    }

    fn create_index(&self, table: &TargetTable, index: &TargetIndex) -> Result<String> {
        let mut cols = Vec::with_capacity(index.columns.len());
        for c in &index.columns {
            let expr = if is_plain_identifier(&c.expression) {
                quote_ident(&c.expression)?
            } else {
                format!("({})", c.expression)
            };
            cols.push(match c.order {
                SortOrder::Asc => expr,
                SortOrder::Desc => format!("{} DESC", expr),
            });
        }
        let unique = if index.unique { "UNIQUE " } else { "" };

        let mut sql = format!(
            "CREATE {}INDEX {} ON {} ({});",
            unique,
            quote_ident(&index.name)?,
            qualify(&table.schema, &table.name)?,
            cols.join(", ")
        );
        if let Some(comment) = &index.comment {
            sql.push_str(&format!(
                "\nCOMMENT ON INDEX {} IS {};",
                qualify(&table.schema, &index.name)?,
                literal(comment)
            ));
        }
        Ok(sql)
    }

    fn create_object(&self, object: &TargetObject) -> Result<String> {
        match object {
            TargetObject::View(v) => {
                let columns = if v.columns.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", quote_list(&v.columns)?)
                };
                let mut sql = format!(
                    "CREATE OR REPLACE VIEW {}{} AS\n{};",
                    qualify(&v.schema, &v.name)?,
                    columns,
                    v.definition.trim().trim_end_matches(';')
                );
                if let Some(comment) = &v.comment {
                    sql.push_str(&format!(
                        "\nCOMMENT ON VIEW {} IS {};",
                        qualify(&v.schema, &v.name)?,
                        literal(comment)
                    ));
                }
                Ok(sql)
            }
            TargetObject::Sequence(s) => {
                let mut sql = format!(
                    "CREATE SEQUENCE {} INCREMENT BY {} START WITH {}",
                    qualify(&s.schema, &s.name)?,
                    s.increment,
                    s.start
                );
                if let Some(min) = s.min_value {
                    sql.push_str(&format!(" MINVALUE {}", min));
                }
                if let Some(max) = s.max_value {
                    sql.push_str(&format!(" MAXVALUE {}", max));
                }
                if let Some(cache) = s.cache.filter(|c| *c > 0) {
                    sql.push_str(&format!(" CACHE {}", cache));
                }
                if s.cycle {
                    sql.push_str(" CYCLE");
                }
                sql.push(';');
                Ok(sql)
            }
            // No synonyms in the target; a pass-through view stands in.
            TargetObject::Synonym(s) => Ok(format!(
                "CREATE OR REPLACE VIEW {} AS SELECT * FROM {};",
                qualify(&s.schema, &s.name)?,
                qualify(&s.target_schema, &s.target_name)?
            )),
            TargetObject::Grant(g) => Ok(format!(
                "GRANT {} ON {} TO {}{};",
                g.privilege.to_uppercase(),
                qualify(&g.schema, &g.object_name)?,
                quote_ident(&g.grantee)?,
                if g.grantable { " WITH GRANT OPTION" } else { "" }
            )),
        }
    }

    fn drop_object(&self, object: &TargetObject) -> Result<String> {
        match object {
            TargetObject::View(v) => Ok(format!(
                "DROP VIEW IF EXISTS {} CASCADE;",
                qualify(&v.schema, &v.name)?
            )),
            TargetObject::Sequence(s) => Ok(format!(
                "DROP SEQUENCE IF EXISTS {} CASCADE;",
                qualify(&s.schema, &s.name)?
            )),
            TargetObject::Synonym(s) => Ok(format!(
                "DROP VIEW IF EXISTS {};",
                qualify(&s.schema, &s.name)?
            )),
            TargetObject::Grant(g) => Ok(format!(
                "REVOKE {} ON {} FROM {};",
                g.privilege.to_uppercase(),
                qualify(&g.schema, &g.object_name)?,
                quote_ident(&g.grantee)?
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{IndexColumn, ReferentialAction, Table};
    use crate::core::target::{
        TargetColumn, TargetGrant, TargetPrimaryKey, TargetSequence,
    };

    fn column(name: &str, data_type: &str, nullable: bool) -> TargetColumn {
        TargetColumn {
            name: name.into(),
            data_type: data_type.into(),
            length: 0,
            precision: 0,
            scale: 0,
            nullable,
            default: None,
            comment: None,
            source_type: String::new(),
        }
    }

    fn dept() -> TargetTable {
        let mut t = TargetTable::seed("public", "dept", &Table::new("HR", "DEPT"));
        t.columns.insert(column("id", "integer", false));
        let mut name = column("name", "varchar", true);
        name.length = 50;
        name.comment = Some("Dept's name".into());
        t.columns.insert(name);
        t.primary_key = Some(TargetPrimaryKey {
            name: "pk_dept".into(),
            columns: vec!["id".into()],
        });
        t
    }

    #[test]
    fn test_create_table() {
        let sql = GenericDdl.create_table(&dept()).unwrap();
        assert!(sql.starts_with("CREATE TABLE \"public\".\"dept\" (\n    \"id\" integer NOT NULL,"));
        assert!(sql.contains("\"name\" varchar(50)\n);"));
        assert!(sql.contains("COMMENT ON COLUMN \"public\".\"dept\".\"name\" IS 'Dept''s name';"));
    }

    #[test]
    fn test_primary_key() {
        let mut table = dept();
        let sql = GenericDdl.create_primary_key(&table).unwrap().unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE \"public\".\"dept\" ADD CONSTRAINT \"pk_dept\" PRIMARY KEY (\"id\");"
        );
        table.primary_key = None;
        assert!(GenericDdl.create_primary_key(&table).unwrap().is_none());
    }

    #[test]
    fn test_foreign_key_and_index() {
        let table = dept();
        let fk = TargetForeignKey {
            name: "fk_dept_parent".into(),
            columns: vec!["parent_id".into()],
            ref_schema: "public".into(),
            ref_table: "dept".into(),
            ref_columns: vec!["id".into()],
            on_delete: ReferentialAction::SetNull,
            on_update: ReferentialAction::NoAction,
        };
        let sql = GenericDdl.create_foreign_key(&table, &fk).unwrap();
        assert!(sql.ends_with("REFERENCES \"public\".\"dept\" (\"id\") ON DELETE SET NULL ON UPDATE NO ACTION;"));

        let idx = TargetIndex {
            name: "ix_dept_name".into(),
            columns: vec![IndexColumn::desc("name"), IndexColumn::asc("upper(code)")],
            unique: true,
            comment: None,
        };
        assert_eq!(
            GenericDdl.create_index(&table, &idx).unwrap(),
            "CREATE UNIQUE INDEX \"ix_dept_name\" ON \"public\".\"dept\" (\"name\" DESC, (upper(code)));"
        );
    }

    #[test]
    fn test_objects() {
        let seq = TargetObject::Sequence(TargetSequence {
            schema: "public".into(),
            name: "dept_seq".into(),
            start: 100,
            increment: 10,
            min_value: None,
            max_value: Some(9999),
            cycle: true,
            cache: Some(20),
        });
        assert_eq!(
            GenericDdl.create_object(&seq).unwrap(),
            "CREATE SEQUENCE \"public\".\"dept_seq\" INCREMENT BY 10 START WITH 100 MAXVALUE 9999 CACHE 20 CYCLE;"
        );

        let grant = TargetObject::Grant(TargetGrant {
            schema: "public".into(),
            name: "select_dept_reporting".into(),
            object_name: "dept".into(),
            privilege: "select".into(),
            grantee: "reporting".into(),
            grantable: false,
        });
        assert_eq!(
            GenericDdl.create_object(&grant).unwrap(),
            "GRANT SELECT ON \"public\".\"dept\" TO \"reporting\";"
        );
        assert_eq!(
            GenericDdl.drop_object(&grant).unwrap(),
            "REVOKE SELECT ON \"public\".\"dept\" FROM \"reporting\";"
        );
    }

    #[test]
    fn test_invalid_identifier_is_an_error() {
        let mut table = dept();
        table.name = String::new();
        assert!(GenericDdl.drop_table(&table).is_err());
    }
}
