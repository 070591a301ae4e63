//! Relational flavor of the relationship handlers.
//!
//! Handlers contribute SELECT fragments (with a shared position counter so
//! the materializer can walk the row back in the same order), decode their
//! result cells, queue deferred link writes and emit link-table DDL.

mod many_to_many;
mod many_to_one;
mod one_to_many;

pub use many_to_many::{SqlManyToMany, link_table_name};
pub(crate) use many_to_many::link_side;
pub use many_to_one::SqlManyToOne;
pub use one_to_many::SqlOneToMany;

use sqlx::sqlite::SqliteRow;

use crate::condition::BindValue;
use crate::error::Error;
use crate::model::{Document, FieldDescriptor, Id, IdKind, RelationDescriptor, RelationKind};
use crate::options::QueryOptions;
use crate::relation::{LazyQueue, WriteAction};

/// SQL flavor the generated text targets. Only SQLite is executed by the
/// shipped engine; the MySQL-style flavor exists for generated-SQL parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Mysql,
}

/// Owner-side naming a handler needs to build correlated fragments.
pub struct SqlContext<'a> {
    pub table: &'a str,
    pub primary_column: &'a str,
    pub primary_kind: IdKind,
    pub dialect: SqlDialect,
}

pub trait SqlRelation: Send + Sync {
    fn kind(&self) -> RelationKind;

    /// Marker/element compatibility. Failing here is a configuration error
    /// surfaced at schema generation and at first use.
    fn check(&self, field: &FieldDescriptor, relation: &RelationDescriptor) -> Result<(), Error>;

    /// Whether the field contributes a bindable column to the primary
    /// INSERT/UPDATE statement.
    fn can_insert_inline(&self) -> bool {
        false
    }

    fn is_insert_deferred(&self) -> bool {
        false
    }

    fn is_update_deferred(&self) -> bool {
        false
    }

    /// Whether `queue_update` needs the previously stored row.
    fn needs_previous(&self) -> bool {
        false
    }

    /// Append this field's SELECT expression(s) and advance the position
    /// counter by the number of result columns appended.
    fn select_fragment(
        &self,
        ctx: &SqlContext<'_>,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        select: &mut Vec<String>,
        position: &mut usize,
        options: &QueryOptions,
    ) -> Result<(), Error>;

    /// Decode this field's cell(s) at the current position into the output
    /// row, queueing lazy fetches for entity-valued elements.
    fn materialize(
        &self,
        row: &SqliteRow,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        row_index: usize,
        out: &mut Document,
        position: &mut usize,
        lazy: &mut LazyQueue,
        options: &QueryOptions,
    ) -> Result<(), Error>;

    /// Bind value for the inline column, when `can_insert_inline`.
    fn inline_value(
        &self,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        value: &serde_json::Value,
    ) -> Result<Option<BindValue>, Error> {
        let _ = (field, relation, value);
        Ok(None)
    }

    fn queue_insert(
        &self,
        ctx: &SqlContext<'_>,
        owner: &Id,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        value: &serde_json::Value,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        let _ = (ctx, owner, field, relation, value, queue);
        Ok(())
    }

    fn queue_update(
        &self,
        ctx: &SqlContext<'_>,
        owner: &Id,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        previous: Option<&serde_json::Value>,
        value: Option<&serde_json::Value>,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        let _ = (ctx, owner, field, relation, previous, value, queue);
        Ok(())
    }

    fn on_owner_delete(
        &self,
        ctx: &SqlContext<'_>,
        rows: &[Document],
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        let _ = (ctx, rows, field, relation, queue);
        Ok(())
    }

    /// Contribute column definitions to the owning table and/or standalone
    /// DDL statements run after it.
    fn contribute_schema(
        &self,
        ctx: &SqlContext<'_>,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        columns: &mut Vec<String>,
        post: &mut Vec<String>,
    ) -> Result<(), Error> {
        let _ = (ctx, field, relation, columns, post);
        Ok(())
    }

    /// Auxiliary tables owned by this field, dropped with the main table.
    fn link_tables(
        &self,
        ctx: &SqlContext<'_>,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
    ) -> Vec<String> {
        let _ = (ctx, field, relation);
        Vec::new()
    }
}

/// Column type used for an id-bearing SQL column.
pub(crate) fn id_sql_type(kind: IdKind, dialect: SqlDialect) -> &'static str {
    match (kind, dialect) {
        (IdKind::Long, SqlDialect::Sqlite) => "INTEGER",
        (IdKind::Long, SqlDialect::Mysql) => "BIGINT",
        (IdKind::Uuid, _) => "VARCHAR(36)",
        (IdKind::Oid, _) => "VARCHAR(24)",
    }
}

/// Correlated aggregate subquery concatenating id tokens into one cell.
/// SQLite takes the separator as second argument and needs no GROUP BY on a
/// correlated aggregate; the MySQL flavor uses SEPARATOR plus GROUP BY.
#[allow(clippy::too_many_arguments)]
pub(crate) fn concat_subquery(
    ctx: &SqlContext<'_>,
    source_table: &str,
    value_column: &str,
    match_column: &str,
    alias_index: usize,
    separator: &str,
    extra_guard: Option<&str>,
    output_alias: &str,
) -> String {
    let alias = format!("tmp_{}", alias_index);
    let mut sql = format!("(SELECT GROUP_CONCAT({}.{}", alias, value_column);
    match ctx.dialect {
        SqlDialect::Sqlite => sql.push_str(", "),
        SqlDialect::Mysql => sql.push_str(" SEPARATOR "),
    }
    sql.push('\'');
    sql.push_str(separator);
    sql.push_str("') FROM ");
    sql.push_str(source_table);
    sql.push(' ');
    sql.push_str(&alias);
    sql.push_str(" WHERE ");
    if let Some(guard) = extra_guard {
        sql.push_str(&alias);
        sql.push('.');
        sql.push_str(guard);
        sql.push_str(" AND ");
    }
    sql.push_str(ctx.table);
    sql.push('.');
    sql.push_str(ctx.primary_column);
    sql.push_str(" = ");
    sql.push_str(&alias);
    sql.push('.');
    sql.push_str(match_column);
    if ctx.dialect == SqlDialect::Mysql {
        sql.push_str(" GROUP BY ");
        sql.push_str(&alias);
        sql.push('.');
        sql.push_str(match_column);
    }
    sql.push_str(") AS ");
    sql.push_str(output_alias);
    sql
}
