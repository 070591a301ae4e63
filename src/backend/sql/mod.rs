//! Relational engine over `sqlx`/SQLite.
//!
//! Reads build one SELECT per call (plain columns plus handler fragments),
//! materialize rows into JSON maps with a shared position counter, then run
//! the batched lazy pass. Writes run the primary statement first and the
//! queued relationship actions after it, in order.

mod read;
mod schema;
mod write;

pub use schema::create_table_sql;

use std::sync::Arc;

use sqlx::sqlite::{SqliteArguments, SqlitePool};

use crate::condition::BindValue;
use crate::error::Error;
use crate::model::{ColumnType, EntityDescriptor, FieldKind, IdKind};
use crate::options::QueryOptions;
use crate::relation::HandlerRegistry;
pub use crate::relation::sql::SqlDialect;
use crate::relation::sql::SqlContext;

pub(crate) use super::BoxFuture;

pub struct SqlEngine {
    pool: SqlitePool,
    registry: Arc<HandlerRegistry>,
    dialect: SqlDialect,
}

impl SqlEngine {
    pub fn new(pool: SqlitePool, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            pool,
            registry,
            dialect: SqlDialect::Sqlite,
        }
    }

    pub async fn connect(url: &str, registry: Arc<HandlerRegistry>) -> Result<Self, Error> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|err| Error::storage(url, err))?;
        Ok(Self::new(pool, registry))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub(crate) fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub(crate) fn effective_table<'a>(
        &self,
        desc: &'a EntityDescriptor,
        options: &'a QueryOptions,
    ) -> &'a str {
        options.table_override().unwrap_or(desc.table)
    }

    pub(crate) fn context<'a>(
        &self,
        desc: &'a EntityDescriptor,
        table: &'a str,
    ) -> Result<SqlContext<'a>, Error> {
        let primary = desc.primary_field().ok_or_else(|| {
            Error::Configuration(format!("table '{}' declares no primary key", desc.table))
        })?;
        let FieldKind::Primary { id, .. } = primary.kind else {
            return Err(Error::Configuration(format!(
                "table '{}' declares no primary key",
                desc.table
            )));
        };
        Ok(SqlContext {
            table,
            primary_column: primary.column,
            primary_kind: id,
            dialect: self.dialect,
        })
    }

    pub(crate) async fn execute(
        &self,
        sql: &str,
        binds: &[BindValue],
    ) -> Result<sqlx::sqlite::SqliteQueryResult, Error> {
        tracing::debug!(sql, "execute");
        apply_binds(sqlx::query(sql), binds)
            .execute(&self.pool)
            .await
            .map_err(|err| Error::storage(sql, err))
    }
}

pub(crate) fn apply_binds<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    binds: &[BindValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    for value in binds {
        query = match value {
            BindValue::Null => query.bind(None::<String>),
            BindValue::Bool(v) => query.bind(*v),
            BindValue::Long(v) => query.bind(*v),
            BindValue::Double(v) => query.bind(*v),
            BindValue::Text(v) => query.bind(v.clone()),
            BindValue::Timestamp(v) => query.bind(*v),
            // UUID keys travel as canonical hyphenated text.
            BindValue::Uuid(v) => query.bind(v.to_string()),
        };
    }
    query
}

/// Convert a JSON field value to a bind value for its declared column type.
pub(crate) fn bind_from_json(
    ty: ColumnType,
    value: &serde_json::Value,
    field_name: &str,
) -> Result<BindValue, Error> {
    if value.is_null() {
        return Ok(BindValue::Null);
    }
    let mismatch = || {
        Error::Serialize(format!(
            "field '{}' does not match its declared column type {:?}: {}",
            field_name, ty, value
        ))
    };
    match ty {
        ColumnType::Long | ColumnType::Integer => {
            value.as_i64().map(BindValue::Long).ok_or_else(mismatch)
        }
        ColumnType::Double => value.as_f64().map(BindValue::Double).ok_or_else(mismatch),
        ColumnType::Text => value
            .as_str()
            .map(|v| BindValue::Text(v.to_string()))
            .ok_or_else(mismatch),
        ColumnType::Boolean => value.as_bool().map(BindValue::Bool).ok_or_else(mismatch),
        ColumnType::Timestamp => {
            let raw = value.as_str().ok_or_else(mismatch)?;
            let parsed = chrono::DateTime::parse_from_rfc3339(raw).map_err(|_| mismatch())?;
            Ok(BindValue::Timestamp(parsed.with_timezone(&chrono::Utc)))
        }
        ColumnType::Json => Ok(BindValue::Text(value.to_string())),
    }
}

/// JSON value for a single primary-key cell read back from the store.
pub(crate) fn id_kind_of(desc: &EntityDescriptor) -> Result<IdKind, Error> {
    desc.primary_kind().ok_or_else(|| {
        Error::Configuration(format!("table '{}' declares no primary key", desc.table))
    })
}
