//! Document-native engine.
//!
//! Records live as one document per row behind the [`DocStore`] trait;
//! relationship keys are stored inline (id arrays for lists, a single id
//! for many-to-one) and the reverse side is kept consistent through queued
//! actions run after the primary write.

mod memory;

pub use memory::MemoryStore;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use metrics::histogram;

use crate::condition::{BindValue, Condition, format_timestamp};
use crate::error::Error;
use crate::model::{
    Document, EntityDescriptor, FieldDescriptor, FieldKind, GenerationStrategy, Id, Record,
    RelationKind, from_document, to_document,
};
use crate::options::QueryOptions;
use crate::relation::doc::target_column;
use crate::relation::{HandlerRegistry, LazyQueue, WriteAction};

use super::BoxFuture;

/// Minimal document-store surface the engine drives. Collections are
/// schemaless; filters are evaluated by the store.
#[async_trait]
pub trait DocStore: Send + Sync {
    async fn insert(&self, collection: &str, doc: Document) -> Result<(), Error>;

    async fn find(&self, collection: &str, filter: &Condition) -> Result<Vec<Document>, Error>;

    /// Apply `set` then remove `unset` keys on every matching document.
    /// Returns the number of documents touched.
    async fn update(
        &self,
        collection: &str,
        filter: &Condition,
        set: Document,
        unset: &[String],
    ) -> Result<u64, Error>;

    async fn delete(&self, collection: &str, filter: &Condition) -> Result<u64, Error>;

    async fn count(&self, collection: &str, filter: &Condition) -> Result<u64, Error>;

    /// Next value of a per-collection counter, for auto-generated integer
    /// keys.
    async fn next_sequence(&self, collection: &str) -> Result<i64, Error>;
}

pub struct DocEngine {
    store: Arc<dyn DocStore>,
    registry: Arc<HandlerRegistry>,
}

impl DocEngine {
    pub fn new(store: Arc<dyn DocStore>, registry: Arc<HandlerRegistry>) -> Self {
        Self { store, registry }
    }

    pub(crate) fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    fn collection<'a>(&self, desc: &'a EntityDescriptor, options: &'a QueryOptions) -> &'a str {
        options.table_override().unwrap_or(desc.table)
    }

    fn pk_condition(&self, desc: &EntityDescriptor, key: &Id) -> Result<Condition, Error> {
        let pk = desc.primary_field().ok_or_else(|| {
            Error::Configuration(format!("table '{}' declares no primary key", desc.table))
        })?;
        Ok(Condition::eq(pk.column, BindValue::from(key)))
    }

    /// Combine the caller's condition with the soft-delete guard.
    fn scoped(
        &self,
        desc: &EntityDescriptor,
        condition: Option<&Condition>,
        options: &QueryOptions,
    ) -> Condition {
        let mut parts = Vec::new();
        if let Some(flag) = desc.soft_delete_field() {
            if !options.include_deleted() {
                parts.push(Condition::eq(options.renamed(flag.column), false));
            }
        }
        if let Some(condition) = condition {
            parts.push(condition.clone());
        }
        match parts.len() {
            0 => Condition::all(),
            1 => parts.pop().unwrap_or_else(Condition::all),
            _ => Condition::and(parts),
        }
    }

    /// Insert one record. The stored document carries every inline field;
    /// reverse-link maintenance runs after it as queued actions. Returns the
    /// stored record with its generated key and timestamps.
    pub async fn insert<T: Record>(&self, data: &T) -> Result<T, Error> {
        let desc = T::descriptor();
        self.registry().check_entity_doc(desc)?;
        let mut doc = to_document(data)?;
        let options = QueryOptions::new();
        let collection = self.collection(desc, &options).to_string();
        let stamp = format_timestamp(Utc::now());

        let mut stored = Document::new();
        let mut key: Option<Id> = None;
        let mut deferred: Vec<(&FieldDescriptor, serde_json::Value)> = Vec::new();
        for field in desc.all_fields() {
            match &field.kind {
                FieldKind::Primary { id, generation } => {
                    let provided = doc
                        .get(field.name)
                        .filter(|value| !value.is_null())
                        .and_then(|value| Id::from_json(*id, value));
                    let minted = match (provided, generation) {
                        (Some(minted), _) => minted,
                        (None, GenerationStrategy::Auto) => match Id::generate(*id) {
                            Some(minted) => minted,
                            // Integer keys come from the store's counter.
                            None => Id::Long(self.store.next_sequence(&collection).await?),
                        },
                        (None, GenerationStrategy::Provided) => {
                            return Err(Error::WriteFailure(format!(
                                "table '{}' requires a caller-provided primary key",
                                desc.table
                            )));
                        }
                    };
                    stored.insert(field.column.to_string(), minted.to_json());
                    key = Some(minted);
                }
                FieldKind::CreatedAt | FieldKind::UpdatedAt => {
                    stored.insert(
                        field.column.to_string(),
                        serde_json::Value::String(stamp.clone()),
                    );
                }
                FieldKind::SoftDelete => {
                    stored.insert(field.column.to_string(), serde_json::Value::Bool(false));
                }
                FieldKind::Column { .. } => {
                    if let Some(value) = doc.get(field.name) {
                        if !value.is_null() {
                            stored.insert(field.column.to_string(), value.clone());
                        }
                    }
                }
                FieldKind::Relation(_) => {
                    let (handler, _) = self.registry().doc_handler(field)?;
                    if let Some(value) = doc.get(field.name) {
                        if !value.is_null() {
                            if handler.can_insert_inline() {
                                stored.insert(field.column.to_string(), value.clone());
                            }
                            if handler.is_insert_deferred() {
                                deferred.push((field, value.clone()));
                            }
                        }
                    }
                }
            }
        }
        let key = key.ok_or_else(|| {
            Error::Configuration(format!("table '{}' declares no primary key", desc.table))
        })?;

        self.store.insert(&collection, stored).await?;

        let mut queue = Vec::new();
        for (field, value) in &deferred {
            let (handler, relation) = self.registry().doc_handler(field)?;
            handler.queue_insert(desc, &key, field, relation, value, &mut queue)?;
        }
        self.execute_actions(&queue).await?;

        if let Some(pk) = desc.primary_field() {
            doc.insert(pk.name.to_string(), key.to_json());
        }
        for field in desc.all_fields() {
            if matches!(field.kind, FieldKind::CreatedAt | FieldKind::UpdatedAt) {
                doc.insert(
                    field.name.to_string(),
                    serde_json::Value::String(stamp.clone()),
                );
            }
        }
        from_document(doc)
    }

    /// Update the record stored under `key`. Present fields overwrite,
    /// explicit nulls unset; deferred handlers diff against the previously
    /// stored document.
    pub async fn update<T: Record>(&self, key: &Id, data: &T) -> Result<u64, Error> {
        let desc = T::descriptor();
        self.registry().check_entity_doc(desc)?;
        let doc = to_document(data)?;
        let options = QueryOptions::new();
        let collection = self.collection(desc, &options).to_string();
        let filter = self.scoped(desc, Some(&self.pk_condition(desc, key)?), &options);
        let stamp = format_timestamp(Utc::now());

        let needs_previous = {
            let mut needed = false;
            for field in desc.all_fields() {
                if let FieldKind::Relation(_) = field.kind {
                    let (handler, _) = self.registry().doc_handler(field)?;
                    if handler.is_update_deferred() || handler.needs_previous() {
                        needed = true;
                        break;
                    }
                }
            }
            needed
        };
        let previous: Option<Document> = if needs_previous {
            let mut found = self.store.find(&collection, &filter).await?;
            if found.is_empty() {
                return Err(Error::NotFound);
            }
            Some(found.swap_remove(0))
        } else {
            None
        };

        let mut set = Document::new();
        let mut unset: Vec<String> = Vec::new();
        let mut deferred: Vec<(&FieldDescriptor, Option<serde_json::Value>)> = Vec::new();
        for field in desc.all_fields() {
            match &field.kind {
                FieldKind::Primary { .. } | FieldKind::CreatedAt | FieldKind::SoftDelete => {}
                FieldKind::UpdatedAt => {
                    set.insert(
                        field.column.to_string(),
                        serde_json::Value::String(stamp.clone()),
                    );
                }
                FieldKind::Column { .. } => {
                    if let Some(value) = doc.get(field.name) {
                        if value.is_null() {
                            unset.push(field.column.to_string());
                        } else {
                            set.insert(field.column.to_string(), value.clone());
                        }
                    }
                }
                FieldKind::Relation(_) => {
                    let (handler, _) = self.registry().doc_handler(field)?;
                    if handler.can_insert_inline() {
                        if let Some(value) = doc.get(field.name) {
                            if value.is_null() {
                                unset.push(field.column.to_string());
                            } else {
                                set.insert(field.column.to_string(), value.clone());
                            }
                        }
                    }
                    if handler.is_update_deferred() {
                        deferred.push((field, doc.get(field.name).cloned()));
                    }
                }
            }
        }

        let touched = self.store.update(&collection, &filter, set, &unset).await?;
        if touched == 0 {
            return Err(Error::WriteFailure(format!(
                "update of '{}' affected no documents",
                desc.table
            )));
        }

        let mut queue = Vec::new();
        for (field, value) in &deferred {
            let (handler, relation) = self.registry().doc_handler(field)?;
            let before = previous.as_ref().and_then(|row| row.get(field.column));
            handler.queue_update(desc, key, field, relation, before, value.as_ref(), &mut queue)?;
        }
        self.execute_actions(&queue).await?;
        Ok(touched)
    }

    pub async fn get_by_id<T: Record>(&self, key: &Id) -> Result<T, Error> {
        let condition = self.pk_condition(T::descriptor(), key)?;
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
        self.registry().check_entity_doc(desc)?;
        let collection = self.collection(desc, options);
        let filter = self.scoped(desc, Some(condition), options);
        self.store.count(collection, &filter).await
    }

    /// Fetch fully resolved documents for a descriptor. Recursion happens
    /// when the lazy pass resolves entity-valued relationship fields.
    pub(crate) fn fetch_docs<'a>(
        &'a self,
        desc: &'static EntityDescriptor,
        condition: Option<&'a Condition>,
        options: &'a QueryOptions,
    ) -> BoxFuture<'a, Result<Vec<Document>, Error>> {
        Box::pin(async move {
            self.registry().check_entity_doc(desc)?;
            let collection = self.collection(desc, options);
            let filter = self.scoped(desc, condition, options);

            let started = Instant::now();
            let mut rows = self.store.find(collection, &filter).await?;
            if let Some(order) = options.order_by() {
                rows.sort_by(|a, b| {
                    for (column, ascending) in order {
                        let ordering = compare_values(a.get(column), b.get(column));
                        let ordering = if *ascending { ordering } else { ordering.reverse() };
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                    Ordering::Equal
                });
            }
            if let Some(limit) = options.limit() {
                rows.truncate(limit as usize);
            }

            let mut docs = Vec::with_capacity(rows.len());
            let mut lazy = LazyQueue::new();
            for (row_index, row) in rows.iter().enumerate() {
                docs.push(self.materialize_doc(desc, row, row_index, &mut lazy, options)?);
            }
            histogram!("desmos.query.duration_ms", "table" => desc.table)
                .record(started.elapsed().as_millis() as f64);

            // Every primary document is materialized before any follow-up
            // query runs; one find resolves each field.
            self.run_lazy(&mut docs, lazy).await?;
            Ok(docs)
        })
    }

    fn materialize_doc(
        &self,
        desc: &EntityDescriptor,
        stored: &Document,
        row_index: usize,
        lazy: &mut LazyQueue,
        options: &QueryOptions,
    ) -> Result<Document, Error> {
        let mut out = Document::new();
        for field in desc.all_fields() {
            let raw = stored.get(options.renamed(field.column));
            match &field.kind {
                FieldKind::Primary { .. }
                | FieldKind::CreatedAt
                | FieldKind::UpdatedAt => {
                    if let Some(value) = raw.filter(|value| !value.is_null()) {
                        out.insert(field.name.to_string(), value.clone());
                    }
                }
                FieldKind::Column { not_read, .. } => {
                    if *not_read && !options.read_all_columns() {
                        continue;
                    }
                    if let Some(value) = raw.filter(|value| !value.is_null()) {
                        out.insert(field.name.to_string(), value.clone());
                    }
                }
                FieldKind::SoftDelete => {
                    if !options.read_all_columns() {
                        continue;
                    }
                    if let Some(value) = raw.filter(|value| !value.is_null()) {
                        out.insert(field.name.to_string(), value.clone());
                    }
                }
                FieldKind::Relation(_) => {
                    let (handler, relation) = self.registry().doc_handler(field)?;
                    handler.materialize(raw, field, relation, row_index, &mut out, lazy, options)?;
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
            let kind = target.primary_kind().ok_or_else(|| {
                Error::Configuration(format!("table '{}' declares no primary key", target.table))
            })?;

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

    pub async fn delete<T: Record>(&self, key: &Id) -> Result<u64, Error> {
        let desc = T::descriptor();
        let condition = self.pk_condition(desc, key)?;
        self.delete_docs(desc, &condition, &QueryOptions::new(), false)
            .await
    }

    /// Soft-delete when the entity declares a flag, hard-delete otherwise.
    pub async fn delete_where<T: Record>(
        &self,
        condition: &Condition,
        options: &QueryOptions,
    ) -> Result<u64, Error> {
        self.delete_docs(T::descriptor(), condition, options, false)
            .await
    }

    /// Remove matching documents regardless of the soft-delete flag.
    pub async fn hard_delete_where<T: Record>(
        &self,
        condition: &Condition,
        options: &QueryOptions,
    ) -> Result<u64, Error> {
        self.delete_docs(T::descriptor(), condition, options, true)
            .await
    }

    fn delete_docs<'a>(
        &'a self,
        desc: &'static EntityDescriptor,
        condition: &'a Condition,
        options: &'a QueryOptions,
        hard: bool,
    ) -> BoxFuture<'a, Result<u64, Error>> {
        Box::pin(async move {
            self.registry().check_entity_doc(desc)?;
            let collection = self.collection(desc, options);
            let filter = self.scoped(desc, Some(condition), options);

            let has_relations = desc
                .all_fields()
                .iter()
                .any(|field| matches!(field.kind, FieldKind::Relation(_)));
            let mut queue = Vec::new();
            if has_relations {
                let rows = self.store.find(collection, &filter).await?;
                for field in desc.all_fields() {
                    if let FieldKind::Relation(_) = field.kind {
                        let (handler, relation) = self.registry().doc_handler(field)?;
                        handler.on_owner_delete(desc, &rows, field, relation, &mut queue)?;
                    }
                }
            }

            let touched = match (desc.soft_delete_field(), hard) {
                (Some(flag), false) => {
                    let mut set = Document::new();
                    set.insert(flag.column.to_string(), serde_json::Value::Bool(true));
                    let stamp = format_timestamp(Utc::now());
                    for field in desc.all_fields() {
                        if matches!(field.kind, FieldKind::UpdatedAt) {
                            set.insert(
                                field.column.to_string(),
                                serde_json::Value::String(stamp.clone()),
                            );
                        }
                    }
                    self.store.update(collection, &filter, set, &[]).await?
                }
                _ => self.store.delete(collection, condition).await?,
            };
            self.execute_actions(&queue).await?;
            Ok(touched)
        })
    }

    /// Attach one remote key to a many-to-many field, maintaining both the
    /// owner's list and the mirror list on the target.
    pub async fn add_link<T: Record>(
        &self,
        owner: &Id,
        field_name: &str,
        remote: &Id,
    ) -> Result<(), Error> {
        let desc = T::descriptor();
        let (field, target, mirror) = self.mirror_of(desc, field_name)?;
        self.push_list_entry(desc, field.column, owner, remote, true)
            .await?;
        self.push_list_entry(target, mirror, remote, owner, true)
            .await
    }

    /// Detach one remote key from a many-to-many field on both sides.
    pub async fn remove_link<T: Record>(
        &self,
        owner: &Id,
        field_name: &str,
        remote: &Id,
    ) -> Result<(), Error> {
        let desc = T::descriptor();
        let (field, target, mirror) = self.mirror_of(desc, field_name)?;
        self.pull_list_entry(desc, field.column, owner, remote)
            .await?;
        self.pull_list_entry(target, mirror, remote, owner).await
    }

    fn mirror_of<'a>(
        &self,
        desc: &'a EntityDescriptor,
        field_name: &str,
    ) -> Result<(&'a FieldDescriptor, &'static EntityDescriptor, &'static str), Error> {
        let field = desc.field(field_name).ok_or_else(|| {
            Error::Configuration(format!(
                "table '{}' has no field '{}'",
                desc.table, field_name
            ))
        })?;
        let relation = match &field.kind {
            FieldKind::Relation(relation) if relation.kind == RelationKind::ManyToMany => relation,
            _ => {
                return Err(Error::Configuration(format!(
                    "field '{}' is not a many-to-many relationship",
                    field_name
                )));
            }
        };
        self.registry().doc_handler(field)?;
        let remote_name = relation.remote_field.ok_or_else(|| {
            Error::Configuration(format!(
                "document many-to-many field '{}' must name its mirror list with remote_field",
                field.name
            ))
        })?;
        let mirror = target_column(field, relation, remote_name)?;
        Ok((field, (relation.target)(), mirror))
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
        match action {
            WriteAction::PushListEntry {
                target,
                column,
                key,
                value,
            } => self.push_list_entry(target, column, key, value, true).await,
            WriteAction::PullListEntry {
                target,
                column,
                key,
                value,
            } => self.pull_list_entry(target, column, key, value).await,
            WriteAction::SetRemoteField {
                target,
                column,
                key,
                value,
            } => {
                let filter = self.scoped(
                    target,
                    Some(&self.pk_condition(target, key)?),
                    &QueryOptions::new(),
                );
                let mut set = Document::new();
                let mut unset = Vec::new();
                match value {
                    Some(id) => {
                        set.insert(column.to_string(), id.to_json());
                    }
                    None => unset.push(column.to_string()),
                }
                stamp_updated_at(target, &mut set);
                // A vanished target is not an error for a clearing cascade.
                self.store
                    .update(target.table, &filter, set, &unset)
                    .await?;
                Ok(())
            }
            WriteAction::DeleteRemote { target, key } => {
                let condition = self.pk_condition(target, key)?;
                self.delete_docs(target, &condition, &QueryOptions::new(), false)
                    .await?;
                Ok(())
            }
            WriteAction::ReassignParent {
                child,
                fk_column,
                parent,
                list_column,
                key,
                new_parent,
            } => {
                let stored = self.find_stored(child, key).await?.ok_or(Error::NotFound)?;
                let parent_kind = parent.primary_kind().ok_or_else(|| {
                    Error::Configuration(format!(
                        "table '{}' declares no primary key",
                        parent.table
                    ))
                })?;
                let old = stored
                    .get(*fk_column)
                    .and_then(|value| Id::from_json(parent_kind, value));

                let filter = self.scoped(
                    child,
                    Some(&self.pk_condition(child, key)?),
                    &QueryOptions::new(),
                );
                let mut set = Document::new();
                set.insert(fk_column.to_string(), new_parent.to_json());
                stamp_updated_at(child, &mut set);
                self.store.update(child.table, &filter, set, &[]).await?;

                if let Some(old) = old {
                    if old != *new_parent {
                        self.pull_list_entry(parent, list_column, &old, key).await?;
                    }
                }
                Ok(())
            }
            other => Err(Error::UnsupportedCombination(format!(
                "the document backend cannot execute {:?}",
                other
            ))),
        }
    }

    async fn find_stored(
        &self,
        desc: &'static EntityDescriptor,
        key: &Id,
    ) -> Result<Option<Document>, Error> {
        let filter = self.scoped(
            desc,
            Some(&self.pk_condition(desc, key)?),
            &QueryOptions::new(),
        );
        let mut found = self.store.find(desc.table, &filter).await?;
        if found.is_empty() {
            Ok(None)
        } else {
            Ok(Some(found.swap_remove(0)))
        }
    }

    /// Add `value` to the id list stored under `column` of document `key`,
    /// deduplicating. A missing document is an error when `required`.
    async fn push_list_entry(
        &self,
        desc: &'static EntityDescriptor,
        column: &str,
        key: &Id,
        value: &Id,
        required: bool,
    ) -> Result<(), Error> {
        let Some(stored) = self.find_stored(desc, key).await? else {
            return if required { Err(Error::NotFound) } else { Ok(()) };
        };
        let mut list = stored
            .get(column)
            .and_then(|value| value.as_array())
            .cloned()
            .unwrap_or_default();
        let entry = value.to_json();
        if list.contains(&entry) {
            return Ok(());
        }
        list.push(entry);
        let mut set = Document::new();
        set.insert(column.to_string(), serde_json::Value::Array(list));
        stamp_updated_at(desc, &mut set);
        let filter = self.scoped(
            desc,
            Some(&self.pk_condition(desc, key)?),
            &QueryOptions::new(),
        );
        self.store.update(desc.table, &filter, set, &[]).await?;
        Ok(())
    }

    /// Remove `value` from the id list stored under `column` of document
    /// `key`. A missing document or absent entry is a no-op.
    async fn pull_list_entry(
        &self,
        desc: &'static EntityDescriptor,
        column: &str,
        key: &Id,
        value: &Id,
    ) -> Result<(), Error> {
        let Some(stored) = self.find_stored(desc, key).await? else {
            return Ok(());
        };
        let Some(list) = stored.get(column).and_then(|value| value.as_array()) else {
            return Ok(());
        };
        let entry = value.to_json();
        if !list.contains(&entry) {
            return Ok(());
        }
        let remaining: Vec<serde_json::Value> =
            list.iter().filter(|item| **item != entry).cloned().collect();
        let mut set = Document::new();
        set.insert(column.to_string(), serde_json::Value::Array(remaining));
        stamp_updated_at(desc, &mut set);
        let filter = self.scoped(
            desc,
            Some(&self.pk_condition(desc, key)?),
            &QueryOptions::new(),
        );
        self.store.update(desc.table, &filter, set, &[]).await?;
        Ok(())
    }
}

fn stamp_updated_at(desc: &EntityDescriptor, set: &mut Document) {
    let stamp = format_timestamp(Utc::now());
    for field in desc.all_fields() {
        if matches!(field.kind, FieldKind::UpdatedAt) {
            set.insert(
                field.column.to_string(),
                serde_json::Value::String(stamp.clone()),
            );
        }
    }
}

fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    use serde_json::Value;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_order_with_absent_first() {
        let one = serde_json::json!(1);
        let two = serde_json::json!(2.5);
        assert_eq!(compare_values(Some(&one), Some(&two)), Ordering::Less);
        assert_eq!(compare_values(None, Some(&one)), Ordering::Less);
        assert_eq!(compare_values(None, None), Ordering::Equal);
    }

    #[tokio::test]
    async fn memory_store_counts_find_calls() {
        let store = MemoryStore::new();
        let mut doc = Document::new();
        doc.insert("id".to_string(), serde_json::json!(1));
        store.insert("things", doc).await.unwrap();
        store.find("things", &Condition::all()).await.unwrap();
        store.find("things", &Condition::all()).await.unwrap();
        assert_eq!(store.find_count(), 2);
    }
}
