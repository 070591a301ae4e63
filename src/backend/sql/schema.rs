//! CREATE TABLE generation from descriptors.

use crate::error::Error;
use crate::model::{
    ColumnType, EntityDescriptor, FieldKind, GenerationStrategy, IdKind, Record,
};
use crate::options::QueryOptions;
use crate::relation::HandlerRegistry;
use crate::relation::sql::{SqlContext, SqlDialect};

use super::SqlEngine;

impl SqlEngine {
    pub async fn create_table<T: Record>(&self) -> Result<(), Error> {
        let statements = create_table_sql(
            T::descriptor(),
            self.registry(),
            self.dialect(),
            &QueryOptions::new(),
        )?;
        for statement in statements {
            self.execute(&statement, &[]).await?;
        }
        Ok(())
    }

    /// Drop the main table and every link table owned by its fields.
    pub async fn drop_table<T: Record>(&self) -> Result<(), Error> {
        let desc = T::descriptor();
        self.registry().check_entity_sql(desc)?;
        let table = desc.table.to_string();
        let ctx = self.context(desc, &table)?;
        let mut tables = Vec::new();
        for field in desc.all_fields() {
            if let FieldKind::Relation(_) = field.kind {
                let (handler, relation) = self.registry().sql_handler(field)?;
                tables.extend(handler.link_tables(&ctx, field, relation));
            }
        }
        tables.push(table);
        for name in tables {
            let sql = format!("DROP TABLE IF EXISTS {}", name);
            self.execute(&sql, &[]).await?;
        }
        Ok(())
    }
}

/// DDL statements for a descriptor: the main table first, then handler
/// contributions such as link tables. Fields walk oldest ancestor first.
pub fn create_table_sql(
    desc: &EntityDescriptor,
    registry: &HandlerRegistry,
    dialect: SqlDialect,
    options: &QueryOptions,
) -> Result<Vec<String>, Error> {
    registry.check_entity_sql(desc)?;
    let table = options.table_override().unwrap_or(desc.table);
    let primary = desc.primary_field().ok_or_else(|| {
        Error::Configuration(format!("table '{}' declares no primary key", desc.table))
    })?;
    let FieldKind::Primary { id: primary_kind, .. } = primary.kind else {
        return Err(Error::Configuration(format!(
            "table '{}' declares no primary key",
            desc.table
        )));
    };
    let ctx = SqlContext {
        table,
        primary_column: primary.column,
        primary_kind,
        dialect,
    };

    let mut columns: Vec<String> = Vec::new();
    let mut post: Vec<String> = Vec::new();
    for field in desc.all_fields() {
        let column = options.renamed(field.column);
        match &field.kind {
            FieldKind::Primary { id, generation } => {
                columns.push(primary_key_ddl(column, *id, *generation, dialect));
            }
            FieldKind::Column {
                ty,
                not_null,
                default,
                size,
                comment,
                ..
            } => {
                let mut ddl = format!("{} {}", column, column_sql_type(*ty, *size, dialect));
                if *not_null {
                    ddl.push_str(" NOT NULL");
                }
                if let Some(default) = default {
                    ddl.push_str(&format!(" DEFAULT {}", default));
                }
                if let Some(comment) = comment {
                    if dialect == SqlDialect::Mysql {
                        ddl.push_str(&format!(" COMMENT '{}'", comment));
                    }
                }
                columns.push(ddl);
            }
            FieldKind::CreatedAt | FieldKind::UpdatedAt => {
                columns.push(format!("{} DATETIME NOT NULL", column));
            }
            FieldKind::SoftDelete => {
                columns.push(format!("{} BOOLEAN NOT NULL DEFAULT false", column));
            }
            FieldKind::Relation(_) => {
                let (handler, relation) = registry.sql_handler(field)?;
                handler.contribute_schema(&ctx, field, relation, &mut columns, &mut post)?;
            }
        }
    }

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        table,
        columns.join(",\n  ")
    )];
    statements.extend(post);
    Ok(statements)
}

fn primary_key_ddl(
    column: &str,
    kind: IdKind,
    generation: GenerationStrategy,
    dialect: SqlDialect,
) -> String {
    match (kind, generation, dialect) {
        (IdKind::Long, GenerationStrategy::Auto, SqlDialect::Sqlite) => {
            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column)
        }
        (IdKind::Long, GenerationStrategy::Auto, SqlDialect::Mysql) => {
            format!("{} BIGINT AUTO_INCREMENT PRIMARY KEY", column)
        }
        (kind, _, dialect) => format!(
            "{} {} NOT NULL PRIMARY KEY",
            column,
            crate::relation::sql::id_sql_type(kind, dialect)
        ),
    }
}

fn column_sql_type(ty: ColumnType, size: Option<u32>, dialect: SqlDialect) -> String {
    match (ty, dialect) {
        (ColumnType::Long, SqlDialect::Sqlite) => "INTEGER".to_string(),
        (ColumnType::Long, SqlDialect::Mysql) => "BIGINT".to_string(),
        (ColumnType::Integer, SqlDialect::Sqlite) => "INTEGER".to_string(),
        (ColumnType::Integer, SqlDialect::Mysql) => "INT".to_string(),
        (ColumnType::Double, SqlDialect::Sqlite) => "REAL".to_string(),
        (ColumnType::Double, SqlDialect::Mysql) => "DOUBLE".to_string(),
        (ColumnType::Text, _) => match size {
            Some(limit) => format!("VARCHAR({})", limit),
            None => "TEXT".to_string(),
        },
        (ColumnType::Boolean, _) => "BOOLEAN".to_string(),
        (ColumnType::Timestamp, _) => "DATETIME".to_string(),
        (ColumnType::Json, SqlDialect::Sqlite) => "TEXT".to_string(),
        (ColumnType::Json, SqlDialect::Mysql) => "LONGTEXT".to_string(),
    }
}
