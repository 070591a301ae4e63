//! SELECT building, row materialization and the lazy resolution pass.

use std::collections::HashMap;
use std::time::Instant;

use metrics::histogram;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::condition::{BindValue, Condition, format_timestamp};
use crate::error::Error;
use crate::model::{
    ColumnType, Document, EntityDescriptor, FieldDescriptor, FieldKind, Id, IdKind, Record,
    from_document,
};
use crate::options::QueryOptions;
use crate::relation::LazyQueue;

use super::{SqlEngine, apply_binds, id_kind_of};

impl SqlEngine {
    pub async fn get_by_id<T: Record>(&self, key: &Id) -> Result<T, Error> {
        let desc = T::descriptor();
        let pk = desc.primary_field().ok_or_else(|| {
            Error::Configuration(format!("table '{}' declares no primary key", desc.table))
        })?;
        let condition = Condition::eq(pk.column, BindValue::from(key));
        self.get_where(&condition, &QueryOptions::new())
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn get_where<T: Record>(
        &self,
        condition: &Condition,
        options: &QueryOptions,
    ) -> Result<Option<T>, Error> {
        let mut found = self.gets_where::<T>(condition, options).await?;
        if found.is_empty() {
            Ok(None)
        } else {
            Ok(Some(found.swap_remove(0)))
        }
    }

    pub async fn gets_where<T: Record>(
        &self,
        condition: &Condition,
        options: &QueryOptions,
    ) -> Result<Vec<T>, Error> {
        let docs = self
            .fetch_docs(T::descriptor(), Some(condition), options)
            .await?;
        docs.into_iter().map(from_document).collect()
    }

    pub async fn count_where<T: Record>(
        &self,
        condition: &Condition,
        options: &QueryOptions,
    ) -> Result<u64, Error> {
        let desc = T::descriptor();
        self.registry().check_entity_sql(desc)?;
        let table = self.effective_table(desc, options);
        let mut sql = format!("SELECT COUNT(*) FROM {}", table);
        let mut binds = Vec::new();
        self.append_where(desc, Some(condition), options, &mut sql, &mut binds);
        tracing::debug!(sql, "count");
        let row = apply_binds(sqlx::query(&sql), &binds)
            .fetch_one(self.pool())
            .await
            .map_err(|err| Error::storage(&sql, err))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|err| Error::Deserialize(err.to_string()))?;
        Ok(count as u64)
    }

    /// Fetch fully resolved rows for a descriptor. Recursion happens when
    /// the lazy pass resolves entity-valued relationship fields.
    pub(crate) fn fetch_docs<'a>(
        &'a self,
        desc: &'static EntityDescriptor,
        condition: Option<&'a Condition>,
        options: &'a QueryOptions,
    ) -> super::BoxFuture<'a, Result<Vec<Document>, Error>> {
        Box::pin(async move {
            self.registry().check_entity_sql(desc)?;
            let table = self.effective_table(desc, options).to_string();
            let ctx = self.context(desc, &table)?;

            let mut select = Vec::new();
            let mut position = 0usize;
            for field in desc.all_fields() {
                match &field.kind {
                    FieldKind::Relation(_) => {
                        let (handler, relation) = self.registry().sql_handler(field)?;
                        handler.select_fragment(
                            &ctx,
                            field,
                            relation,
                            &mut select,
                            &mut position,
                            options,
                        )?;
                    }
                    _ => {
                        if skip_in_read(field, options) {
                            continue;
                        }
                        select.push(format!("{}.{}", table, options.renamed(field.column)));
                        position += 1;
                    }
                }
            }

            let mut sql = format!("SELECT {} FROM {}", select.join(", "), table);
            let mut binds = Vec::new();
            self.append_where(desc, condition, options, &mut sql, &mut binds);
            if let Some(order) = options.order_by() {
                let columns: Vec<String> = order
                    .iter()
                    .map(|(column, ascending)| {
                        format!("{} {}", column, if *ascending { "ASC" } else { "DESC" })
                    })
                    .collect();
                sql.push_str(" ORDER BY ");
                sql.push_str(&columns.join(", "));
            }
            if let Some(limit) = options.limit() {
                sql.push_str(&format!(" LIMIT {}", limit));
            }

            tracing::debug!(sql, "select");
            let started = Instant::now();
            let rows = apply_binds(sqlx::query(&sql), &binds)
                .fetch_all(self.pool())
                .await
                .map_err(|err| Error::storage(&sql, err))?;

            let mut docs = Vec::with_capacity(rows.len());
            let mut lazy = LazyQueue::new();
            for (row_index, row) in rows.iter().enumerate() {
                docs.push(self.materialize_row(desc, row, row_index, &mut lazy, options)?);
            }
            histogram!("desmos.query.duration_ms", "table" => desc.table)
                .record(started.elapsed().as_millis() as f64);

            // The primary cursor is fully consumed before any follow-up
            // query runs; one IN-list query resolves each field.
            self.run_lazy(&mut docs, lazy).await?;
            Ok(docs)
        })
    }

    fn materialize_row(
        &self,
        desc: &EntityDescriptor,
        row: &SqliteRow,
        row_index: usize,
        lazy: &mut LazyQueue,
        options: &QueryOptions,
    ) -> Result<Document, Error> {
        let mut out = Document::new();
        let mut position = 0usize;
        for field in desc.all_fields() {
            match &field.kind {
                FieldKind::Primary { id, .. } => {
                    if let Some(key) = read_key(row, position, *id, field.name)? {
                        out.insert(field.name.to_string(), key.to_json());
                    }
                    position += 1;
                }
                FieldKind::Column { ty, .. } => {
                    if skip_in_read(field, options) {
                        continue;
                    }
                    if let Some(value) = read_column(row, position, *ty, field.name)? {
                        out.insert(field.name.to_string(), value);
                    }
                    position += 1;
                }
                FieldKind::CreatedAt | FieldKind::UpdatedAt => {
                    let value: Option<chrono::DateTime<chrono::Utc>> =
                        row.try_get(position).map_err(|err| {
                            Error::Deserialize(format!("field '{}': {}", field.name, err))
                        })?;
                    if let Some(value) = value {
                        out.insert(
                            field.name.to_string(),
                            serde_json::Value::String(format_timestamp(value)),
                        );
                    }
                    position += 1;
                }
                FieldKind::SoftDelete => {
                    if skip_in_read(field, options) {
                        continue;
                    }
                    let value: Option<bool> = row.try_get(position).map_err(|err| {
                        Error::Deserialize(format!("field '{}': {}", field.name, err))
                    })?;
                    if let Some(value) = value {
                        out.insert(field.name.to_string(), serde_json::Value::Bool(value));
                    }
                    position += 1;
                }
                FieldKind::Relation(_) => {
                    let (handler, relation) = self.registry().sql_handler(field)?;
                    handler.materialize(
                        row,
                        field,
                        relation,
                        row_index,
                        &mut out,
                        &mut position,
                        lazy,
                        options,
                    )?;
                }
            }
        }
        Ok(out)
    }

    async fn run_lazy(&self, docs: &mut [Document], mut lazy: LazyQueue) -> Result<(), Error> {
        for fetch in lazy.take() {
            let target = fetch.target;
            let pk = target.primary_field().ok_or_else(|| {
                Error::Configuration(format!("table '{}' declares no primary key", target.table))
            })?;
            let kind = id_kind_of(target)?;

            let mut wanted: Vec<Id> = Vec::new();
            for (_, ids) in &fetch.rows {
                for id in ids {
                    if !wanted.contains(id) {
                        wanted.push(id.clone());
                    }
                }
            }
            let condition = Condition::in_ids(pk.column, &wanted);
            let sub_options = QueryOptions::new();
            let resolved = self
                .fetch_docs(target, Some(&condition), &sub_options)
                .await?;

            let mut by_id: HashMap<Id, Document> = HashMap::with_capacity(resolved.len());
            for doc in resolved {
                if let Some(id) = doc.get(pk.name).and_then(|value| Id::from_json(kind, value)) {
                    by_id.insert(id, doc);
                }
            }
            for (row_index, ids) in fetch.rows {
                if fetch.single {
                    if let Some(doc) = ids.first().and_then(|id| by_id.get(id)) {
                        docs[row_index].insert(
                            fetch.field.to_string(),
                            serde_json::Value::Object(doc.clone()),
                        );
                    }
                } else {
                    let list: Vec<serde_json::Value> = ids
                        .iter()
                        .filter_map(|id| by_id.get(id))
                        .map(|doc| serde_json::Value::Object(doc.clone()))
                        .collect();
                    if !list.is_empty() {
                        docs[row_index]
                            .insert(fetch.field.to_string(), serde_json::Value::Array(list));
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn append_where(
        &self,
        desc: &EntityDescriptor,
        condition: Option<&Condition>,
        options: &QueryOptions,
        sql: &mut String,
        binds: &mut Vec<BindValue>,
    ) {
        let mut parts = Vec::new();
        if let Some(flag) = desc.soft_delete_field() {
            if !options.include_deleted() {
                parts.push(Condition::eq(options.renamed(flag.column), false));
            }
        }
        if let Some(condition) = condition {
            parts.push(condition.clone());
        }
        if parts.is_empty() {
            return;
        }
        sql.push_str(" WHERE ");
        if parts.len() == 1 {
            parts[0].render(sql, binds);
        } else {
            Condition::and(parts).render(sql, binds);
        }
    }
}

fn skip_in_read(field: &FieldDescriptor, options: &QueryOptions) -> bool {
    match &field.kind {
        FieldKind::Column { not_read, .. } => *not_read && !options.read_all_columns(),
        FieldKind::SoftDelete => !options.read_all_columns(),
        _ => false,
    }
}

fn read_key(
    row: &SqliteRow,
    position: usize,
    kind: IdKind,
    field_name: &str,
) -> Result<Option<Id>, Error> {
    let wrap = |err: sqlx::Error| Error::Deserialize(format!("field '{}': {}", field_name, err));
    match kind {
        IdKind::Long => {
            let value: Option<i64> = row.try_get(position).map_err(wrap)?;
            Ok(value.map(Id::Long))
        }
        IdKind::Uuid => {
            let value: Option<String> = row.try_get(position).map_err(wrap)?;
            value
                .map(|raw| {
                    uuid::Uuid::parse_str(&raw)
                        .map(Id::Uuid)
                        .map_err(|err| Error::Deserialize(format!("field '{}': {}", field_name, err)))
                })
                .transpose()
        }
        IdKind::Oid => {
            let value: Option<String> = row.try_get(position).map_err(wrap)?;
            Ok(value.map(Id::Oid))
        }
    }
}

fn read_column(
    row: &SqliteRow,
    position: usize,
    ty: ColumnType,
    field_name: &str,
) -> Result<Option<serde_json::Value>, Error> {
    let wrap = |err: sqlx::Error| Error::Deserialize(format!("field '{}': {}", field_name, err));
    Ok(match ty {
        ColumnType::Long | ColumnType::Integer => {
            let value: Option<i64> = row.try_get(position).map_err(wrap)?;
            value.map(serde_json::Value::from)
        }
        ColumnType::Double => {
            let value: Option<f64> = row.try_get(position).map_err(wrap)?;
            value.map(serde_json::Value::from)
        }
        ColumnType::Text => {
            let value: Option<String> = row.try_get(position).map_err(wrap)?;
            value.map(serde_json::Value::String)
        }
        ColumnType::Boolean => {
            let value: Option<bool> = row.try_get(position).map_err(wrap)?;
            value.map(serde_json::Value::Bool)
        }
        ColumnType::Timestamp => {
            let value: Option<chrono::DateTime<chrono::Utc>> =
                row.try_get(position).map_err(wrap)?;
            value.map(|v| serde_json::Value::String(format_timestamp(v)))
        }
        ColumnType::Json => {
            let value: Option<String> = row.try_get(position).map_err(wrap)?;
            match value {
                None => None,
                Some(raw) => Some(serde_json::from_str(&raw).map_err(|err| {
                    Error::Deserialize(format!("field '{}': {}", field_name, err))
                })?),
            }
        }
    })
}
