//! INSERT/UPDATE/DELETE pipeline and the deferred action executor.

use chrono::Utc;

use crate::condition::{BindValue, Condition, format_timestamp};
use crate::error::Error;
use crate::model::{
    Document, FieldDescriptor, FieldKind, GenerationStrategy, Id, IdKind, Record, from_document,
    to_document,
};
use crate::options::QueryOptions;
use crate::relation::WriteAction;
use crate::relation::sql::link_side;

use super::{SqlEngine, bind_from_json};

impl SqlEngine {
    /// Insert one record. The primary statement carries every inline
    /// column; relationship link writes run after it as queued actions.
    /// Returns the stored record with its generated key and timestamps.
    pub async fn insert<T: Record>(&self, data: &T) -> Result<T, Error> {
        let desc = T::descriptor();
        self.registry().check_entity_sql(desc)?;
        let mut doc = to_document(data)?;
        let table = desc.table.to_string();
        let now = Utc::now();

        let mut columns: Vec<&str> = Vec::new();
        let mut binds: Vec<BindValue> = Vec::new();
        let mut generated: Option<Id> = None;
        let mut rowid_key = false;
        let mut deferred: Vec<(&FieldDescriptor, serde_json::Value)> = Vec::new();

        for field in desc.all_fields() {
            match &field.kind {
                FieldKind::Primary { id, generation } => match (id, generation) {
                    (IdKind::Long, GenerationStrategy::Auto) => {
                        // The store assigns the rowid.
                        rowid_key = true;
                    }
                    (kind, generation) => {
                        let provided = doc
                            .get(field.name)
                            .filter(|value| !value.is_null())
                            .and_then(|value| Id::from_json(*kind, value));
                        let key = match (provided, generation) {
                            (Some(key), _) => key,
                            (None, GenerationStrategy::Auto) => {
                                Id::generate(*kind).ok_or_else(|| {
                                    Error::Configuration(format!(
                                        "table '{}' cannot auto-generate {:?} keys",
                                        desc.table, kind
                                    ))
                                })?
                            }
                            (None, GenerationStrategy::Provided) => {
                                return Err(Error::WriteFailure(format!(
                                    "table '{}' requires a caller-provided primary key",
                                    desc.table
                                )));
                            }
                        };
                        columns.push(field.column);
                        binds.push(BindValue::from(&key));
                        generated = Some(key);
                    }
                },
                FieldKind::CreatedAt | FieldKind::UpdatedAt => {
                    columns.push(field.column);
                    binds.push(BindValue::Timestamp(now));
                }
                FieldKind::SoftDelete => {
                    columns.push(field.column);
                    binds.push(BindValue::Bool(false));
                }
                FieldKind::Column { ty, .. } => {
                    if let Some(value) = doc.get(field.name) {
                        if !value.is_null() {
                            columns.push(field.column);
                            binds.push(bind_from_json(*ty, value, field.name)?);
                        }
                    }
                }
                FieldKind::Relation(_) => {
                    let (handler, relation) = self.registry().sql_handler(field)?;
                    if handler.can_insert_inline() {
                        if let Some(value) = doc.get(field.name) {
                            if !value.is_null() {
                                if let Some(bound) = handler.inline_value(field, relation, value)? {
                                    columns.push(field.column);
                                    binds.push(bound);
                                }
                            }
                        }
                    }
                    if handler.is_insert_deferred() {
                        if let Some(value) = doc.get(field.name) {
                            if !value.is_null() {
                                deferred.push((field, value.clone()));
                            }
                        }
                    }
                }
            }
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );
        let result = self.execute(&sql, &binds).await?;
        if result.rows_affected() == 0 {
            return Err(Error::WriteFailure(format!(
                "insert into '{}' affected no rows",
                table
            )));
        }
        let key = if rowid_key {
            Id::Long(result.last_insert_rowid())
        } else {
            generated.ok_or_else(|| {
                Error::Configuration(format!("table '{}' declares no primary key", desc.table))
            })?
        };

        let ctx = self.context(desc, &table)?;
        let mut queue = Vec::new();
        for (field, value) in &deferred {
            let (handler, relation) = self.registry().sql_handler(field)?;
            handler.queue_insert(&ctx, &key, field, relation, value, &mut queue)?;
        }
        self.execute_actions(&queue).await?;

        if let Some(pk) = desc.primary_field() {
            doc.insert(pk.name.to_string(), key.to_json());
        }
        for field in desc.all_fields() {
            if matches!(field.kind, FieldKind::CreatedAt | FieldKind::UpdatedAt) {
                doc.insert(
                    field.name.to_string(),
                    serde_json::Value::String(format_timestamp(now)),
                );
            }
        }
        from_document(doc)
    }

    /// Update the record stored under `key`. Inline columns are rewritten
    /// from the given record; deferred handlers receive the previously
    /// stored row and diff against it.
    pub async fn update<T: Record>(&self, key: &Id, data: &T) -> Result<u64, Error> {
        let desc = T::descriptor();
        self.registry().check_entity_sql(desc)?;
        let doc = to_document(data)?;
        let table = desc.table.to_string();
        let pk = desc.primary_field().ok_or_else(|| {
            Error::Configuration(format!("table '{}' declares no primary key", desc.table))
        })?;
        let now = Utc::now();

        let needs_previous = {
            let mut needed = false;
            for field in desc.all_fields() {
                if let FieldKind::Relation(_) = field.kind {
                    let (handler, _) = self.registry().sql_handler(field)?;
                    if handler.is_update_deferred() || handler.needs_previous() {
                        needed = true;
                        break;
                    }
                }
            }
            needed
        };
        let previous: Option<Document> = if needs_previous {
            let condition = Condition::eq(pk.column, BindValue::from(key));
            let mut rows = self
                .fetch_docs(desc, Some(&condition), &QueryOptions::new())
                .await?;
            if rows.is_empty() {
                return Err(Error::NotFound);
            }
            Some(rows.swap_remove(0))
        } else {
            None
        };

        let mut assignments: Vec<String> = Vec::new();
        let mut binds: Vec<BindValue> = Vec::new();
        let mut deferred: Vec<(&FieldDescriptor, Option<serde_json::Value>)> = Vec::new();
        for field in desc.all_fields() {
            match &field.kind {
                FieldKind::Primary { .. }
                | FieldKind::CreatedAt
                | FieldKind::SoftDelete => {}
                FieldKind::UpdatedAt => {
                    assignments.push(format!("{} = ?", field.column));
                    binds.push(BindValue::Timestamp(now));
                }
                FieldKind::Column { ty, .. } => {
                    if let Some(value) = doc.get(field.name) {
                        assignments.push(format!("{} = ?", field.column));
                        binds.push(bind_from_json(*ty, value, field.name)?);
                    }
                }
                FieldKind::Relation(_) => {
                    let (handler, relation) = self.registry().sql_handler(field)?;
                    if handler.can_insert_inline() {
                        if let Some(value) = doc.get(field.name) {
                            if let Some(bound) = handler.inline_value(field, relation, value)? {
                                assignments.push(format!("{} = ?", field.column));
                                binds.push(bound);
                            }
                        }
                    }
                    if handler.is_update_deferred() {
                        deferred.push((field, doc.get(field.name).cloned()));
                    }
                }
            }
        }

        // An entity with nothing inline to rewrite has no primary statement
        // to run; the previous-row fetch already confirmed the row exists.
        let touched = if assignments.is_empty() {
            if previous.is_none() {
                return Err(Error::WriteFailure(format!(
                    "update of '{}' has no columns to set",
                    table
                )));
            }
            1
        } else {
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                table,
                assignments.join(", "),
                pk.column
            );
            binds.push(BindValue::from(key));
            let result = self.execute(&sql, &binds).await?;
            if result.rows_affected() == 0 {
                return Err(Error::WriteFailure(format!(
                    "update of '{}' affected no rows",
                    table
                )));
            }
            result.rows_affected()
        };

        let ctx = self.context(desc, &table)?;
        let mut queue = Vec::new();
        for (field, value) in &deferred {
            let (handler, relation) = self.registry().sql_handler(field)?;
            let before = previous.as_ref().and_then(|row| row.get(field.name));
            handler.queue_update(&ctx, key, field, relation, before, value.as_ref(), &mut queue)?;
        }
        self.execute_actions(&queue).await?;
        Ok(touched)
    }

    pub async fn delete<T: Record>(&self, key: &Id) -> Result<u64, Error> {
        let desc = T::descriptor();
        let pk = desc.primary_field().ok_or_else(|| {
            Error::Configuration(format!("table '{}' declares no primary key", desc.table))
        })?;
        let condition = Condition::eq(pk.column, BindValue::from(key));
        self.delete_where::<T>(&condition, &QueryOptions::new())
            .await
    }

    /// Soft-delete when the entity declares a flag, hard-delete otherwise.
    pub async fn delete_where<T: Record>(
        &self,
        condition: &Condition,
        options: &QueryOptions,
    ) -> Result<u64, Error> {
        self.delete_rows(T::descriptor(), condition, options, false)
            .await
    }

    /// Remove matching rows regardless of the soft-delete flag.
    pub async fn hard_delete_where<T: Record>(
        &self,
        condition: &Condition,
        options: &QueryOptions,
    ) -> Result<u64, Error> {
        self.delete_rows(T::descriptor(), condition, options, true)
            .await
    }

    async fn delete_rows(
        &self,
        desc: &'static crate::model::EntityDescriptor,
        condition: &Condition,
        options: &QueryOptions,
        hard: bool,
    ) -> Result<u64, Error> {
        self.registry().check_entity_sql(desc)?;
        let table = self.effective_table(desc, options).to_string();
        let ctx = self.context(desc, &table)?;

        let has_relations = desc
            .all_fields()
            .iter()
            .any(|field| matches!(field.kind, FieldKind::Relation(_)));
        let mut queue = Vec::new();
        if has_relations {
            let rows = self.fetch_docs(desc, Some(condition), options).await?;
            for field in desc.all_fields() {
                if let FieldKind::Relation(_) = field.kind {
                    let (handler, relation) = self.registry().sql_handler(field)?;
                    handler.on_owner_delete(&ctx, &rows, field, relation, &mut queue)?;
                }
            }
        }

        let mut binds = Vec::new();
        let sql = match (desc.soft_delete_field(), hard) {
            (Some(flag), false) => {
                let mut sql = format!("UPDATE {} SET {} = true", table, flag.column);
                for field in desc.all_fields() {
                    if matches!(field.kind, FieldKind::UpdatedAt) {
                        sql.push_str(&format!(", {} = ?", field.column));
                        binds.push(BindValue::Timestamp(Utc::now()));
                    }
                }
                sql.push_str(" WHERE ");
                let mut guard = String::new();
                Condition::eq(flag.column, false).render(&mut guard, &mut binds);
                sql.push_str(&guard);
                sql.push_str(" AND ");
                condition.render(&mut sql, &mut binds);
                sql
            }
            _ => {
                let mut sql = format!("DELETE FROM {} WHERE ", table);
                condition.render(&mut sql, &mut binds);
                sql
            }
        };
        let result = self.execute(&sql, &binds).await?;
        self.execute_actions(&queue).await?;
        Ok(result.rows_affected())
    }

    /// Attach one remote key to a many-to-many field by inserting a fresh
    /// link row.
    pub async fn add_link<T: Record>(
        &self,
        owner: &Id,
        field_name: &str,
        remote: &Id,
    ) -> Result<(), Error> {
        let desc = T::descriptor();
        let (field, relation) = self.link_field(desc, field_name)?;
        let side = link_side(desc.table, field, relation)?;
        let action = WriteAction::InsertLinks {
            table: side.table,
            owner_column: side.owner_column,
            remote_column: side.remote_column,
            owner: owner.clone(),
            remotes: vec![remote.clone()],
        };
        self.apply_action(&action).await
    }

    /// Detach one remote key by soft-deleting the matching live link rows.
    pub async fn remove_link<T: Record>(
        &self,
        owner: &Id,
        field_name: &str,
        remote: &Id,
    ) -> Result<u64, Error> {
        let desc = T::descriptor();
        let (field, relation) = self.link_field(desc, field_name)?;
        let side = link_side(desc.table, field, relation)?;
        let sql = format!(
            "UPDATE {} SET deleted = true, updatedAt = ? WHERE deleted = false AND {} = ? AND {} = ?",
            side.table, side.owner_column, side.remote_column
        );
        let binds = vec![
            BindValue::Timestamp(Utc::now()),
            BindValue::from(owner),
            BindValue::from(remote),
        ];
        let result = self.execute(&sql, &binds).await?;
        Ok(result.rows_affected())
    }

    fn link_field<'a>(
        &self,
        desc: &'a crate::model::EntityDescriptor,
        field_name: &str,
    ) -> Result<(&'a FieldDescriptor, &'a crate::model::RelationDescriptor), Error> {
        let field = desc.field(field_name).ok_or_else(|| {
            Error::Configuration(format!(
                "table '{}' has no field '{}'",
                desc.table, field_name
            ))
        })?;
        match &field.kind {
            FieldKind::Relation(relation)
                if relation.kind == crate::model::RelationKind::ManyToMany =>
            {
                Ok((field, relation))
            }
            _ => Err(Error::Configuration(format!(
                "field '{}' is not a many-to-many relationship",
                field_name
            ))),
        }
    }

    /// Run queued actions in order. The first failure aborts the remainder
    /// and reports how many completed; the primary write stays committed.
    pub(crate) async fn execute_actions(&self, queue: &[WriteAction]) -> Result<(), Error> {
        for (index, action) in queue.iter().enumerate() {
            if let Err(err) = self.apply_action(action).await {
                return Err(Error::PostAction {
                    completed: index,
                    message: err.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn apply_action(&self, action: &WriteAction) -> Result<(), Error> {
        let now = Utc::now();
        match action {
            WriteAction::InsertLinks {
                table,
                owner_column,
                remote_column,
                owner,
                remotes,
            } => {
                let sql = format!(
                    "INSERT INTO {} (deleted, createdAt, updatedAt, {}, {}) VALUES (false, ?, ?, ?, ?)",
                    table, owner_column, remote_column
                );
                for remote in remotes {
                    let binds = vec![
                        BindValue::Timestamp(now),
                        BindValue::Timestamp(now),
                        BindValue::from(owner),
                        BindValue::from(remote),
                    ];
                    self.execute(&sql, &binds).await?;
                }
                Ok(())
            }
            WriteAction::SoftDeleteLinks {
                table,
                owner_column,
                remote_column,
                owner,
                remote,
            } => {
                let mut sql = format!(
                    "UPDATE {} SET deleted = true, updatedAt = ? WHERE deleted = false AND {} = ?",
                    table, owner_column
                );
                let mut binds = vec![BindValue::Timestamp(now), BindValue::from(owner)];
                if let Some(remote) = remote {
                    sql.push_str(&format!(" AND {} = ?", remote_column));
                    binds.push(BindValue::from(remote));
                }
                self.execute(&sql, &binds).await?;
                Ok(())
            }
            other => Err(Error::UnsupportedCombination(format!(
                "the SQL backend cannot execute {:?}",
                other
            ))),
        }
    }
}
