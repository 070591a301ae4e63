//! Relationship handling: one handler per {kind × backend}, looked up
//! through an immutable [`HandlerRegistry`] built once at startup and
//! injected into each engine.
//!
//! Handlers never touch the store themselves. They translate relationship
//! semantics into two kinds of value objects the engines execute:
//! [`WriteAction`]s (deferred mutations run after the primary write) and
//! [`LazyQueue`] entries (batched follow-up fetches run after the primary
//! cursor is fully consumed).

pub mod doc;
pub mod sql;

use crate::error::Error;
use crate::model::{
    EntityDescriptor, FieldDescriptor, FieldKind, Id, IdKind, RelationDescriptor, RelationElement,
    RelationKind,
};
use crate::options::QueryOptions;

/// Deferred mutation queued by a handler during a write. Executed in queue
/// order after the primary write; the first failure aborts the remainder of
/// the queue but never rolls back the primary write.
#[derive(Debug, Clone)]
pub enum WriteAction {
    /// Insert one fresh link row per remote id.
    InsertLinks {
        table: String,
        owner_column: &'static str,
        remote_column: &'static str,
        owner: Id,
        remotes: Vec<Id>,
    },
    /// Soft-delete link rows for the owner, optionally narrowed to one
    /// remote id. Link rows are never hard-deleted except on table drop.
    SoftDeleteLinks {
        table: String,
        owner_column: &'static str,
        remote_column: &'static str,
        owner: Id,
        remote: Option<Id>,
    },
    /// Add `value` to the list column of the target document `key`,
    /// deduplicating.
    PushListEntry {
        target: &'static EntityDescriptor,
        column: &'static str,
        key: Id,
        value: Id,
    },
    /// Remove `value` from the list column of the target document `key`.
    PullListEntry {
        target: &'static EntityDescriptor,
        column: &'static str,
        key: Id,
        value: Id,
    },
    /// Set (or clear) a scalar column of the target document `key`.
    SetRemoteField {
        target: &'static EntityDescriptor,
        column: &'static str,
        key: Id,
        value: Option<Id>,
    },
    /// Delete the target record through its full delete pipeline, cascades
    /// included.
    DeleteRemote {
        target: &'static EntityDescriptor,
        key: Id,
    },
    /// Point a child's foreign-key column at `parent`; if the child was
    /// attached to a different parent, pull it from that parent's list
    /// column as well.
    ReassignParent {
        child: &'static EntityDescriptor,
        fk_column: &'static str,
        parent: &'static EntityDescriptor,
        list_column: &'static str,
        key: Id,
        new_parent: Id,
    },
}

/// One pending follow-up fetch: ids collected per source row for a single
/// relationship field. All rows of one fetch call share one entry per
/// field, so resolution costs exactly one IN-list query per field.
#[derive(Debug)]
pub struct LazyFetch {
    pub field: &'static str,
    pub target: &'static EntityDescriptor,
    /// Many-to-one resolves to a single record, lists to arrays.
    pub single: bool,
    /// (row index, ids to resolve for that row), in collection order.
    pub rows: Vec<(usize, Vec<Id>)>,
}

#[derive(Debug, Default)]
pub struct LazyQueue {
    fetches: Vec<LazyFetch>,
}

impl LazyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        field: &'static str,
        target: &'static EntityDescriptor,
        single: bool,
        row_index: usize,
        ids: Vec<Id>,
    ) {
        if ids.is_empty() {
            return;
        }
        if let Some(fetch) = self.fetches.iter_mut().find(|fetch| fetch.field == field) {
            fetch.rows.push((row_index, ids));
        } else {
            self.fetches.push(LazyFetch {
                field,
                target,
                single,
                rows: vec![(row_index, ids)],
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty()
    }

    pub fn take(&mut self) -> Vec<LazyFetch> {
        std::mem::take(&mut self.fetches)
    }
}

/// Resolve the id kind flowing through a relationship field: a `SpecifyType`
/// option wins, then the declared element kind, then the target's primary
/// key kind for entity-valued fields.
pub(crate) fn element_id_kind(
    field: &FieldDescriptor,
    relation: &RelationDescriptor,
    options: &QueryOptions,
) -> Result<IdKind, Error> {
    if let Some((kind, _)) = options.specified_type(field.name) {
        return Ok(kind);
    }
    match relation.element {
        RelationElement::Id(kind) => Ok(kind),
        RelationElement::Entity => {
            let target = (relation.target)();
            target.primary_kind().ok_or_else(|| {
                Error::Configuration(format!(
                    "relationship field '{}' targets table '{}' which has no primary key",
                    field.name, target.table
                ))
            })
        }
    }
}

pub struct HandlerRegistry {
    sql: Vec<Box<dyn sql::SqlRelation>>,
    doc: Vec<Box<dyn doc::DocRelation>>,
}

impl HandlerRegistry {
    /// Registry with no handlers; every relationship field fails fast with a
    /// configuration error.
    pub fn empty() -> Self {
        Self {
            sql: Vec::new(),
            doc: Vec::new(),
        }
    }

    /// The six built-in handlers: {many-to-many, one-to-many, many-to-one}
    /// for each backend.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register_sql(Box::new(sql::SqlManyToMany));
        registry.register_sql(Box::new(sql::SqlOneToMany));
        registry.register_sql(Box::new(sql::SqlManyToOne));
        registry.register_doc(Box::new(doc::DocManyToMany));
        registry.register_doc(Box::new(doc::DocOneToMany));
        registry.register_doc(Box::new(doc::DocManyToOne));
        registry
    }

    pub fn register_sql(&mut self, handler: Box<dyn sql::SqlRelation>) {
        self.sql.push(handler);
    }

    pub fn register_doc(&mut self, handler: Box<dyn doc::DocRelation>) {
        self.doc.push(handler);
    }

    /// The returned descriptor borrows from `field`, not from the registry.
    pub fn sql_handler<'a>(
        &'a self,
        field: &'a FieldDescriptor,
    ) -> Result<(&'a dyn sql::SqlRelation, &'a RelationDescriptor), Error> {
        let relation = relation_of(field)?;
        let handler = self
            .sql
            .iter()
            .find(|handler| handler.kind() == relation.kind)
            .ok_or_else(|| no_handler(field, relation.kind, "SQL"))?;
        handler.check(field, relation)?;
        Ok((handler.as_ref(), relation))
    }

    pub fn doc_handler<'a>(
        &'a self,
        field: &'a FieldDescriptor,
    ) -> Result<(&'a dyn doc::DocRelation, &'a RelationDescriptor), Error> {
        let relation = relation_of(field)?;
        let handler = self
            .doc
            .iter()
            .find(|handler| handler.kind() == relation.kind)
            .ok_or_else(|| no_handler(field, relation.kind, "document"))?;
        handler.check(field, relation)?;
        Ok((handler.as_ref(), relation))
    }

    /// Validate an entity for the SQL backend: exactly one primary key and a
    /// passing handler for every relationship field. Raised at schema
    /// generation and at first use, never skipped silently.
    pub fn check_entity_sql(&self, desc: &EntityDescriptor) -> Result<(), Error> {
        self.check_entity(desc, |field| self.sql_handler(field).map(|_| ()))
    }

    pub fn check_entity_doc(&self, desc: &EntityDescriptor) -> Result<(), Error> {
        self.check_entity(desc, |field| self.doc_handler(field).map(|_| ()))
    }

    fn check_entity(
        &self,
        desc: &EntityDescriptor,
        check_field: impl Fn(&FieldDescriptor) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut primary = 0usize;
        for field in desc.all_fields() {
            match &field.kind {
                FieldKind::Primary { .. } => primary += 1,
                FieldKind::Relation(_) => check_field(field)?,
                _ => {}
            }
        }
        match primary {
            1 => Ok(()),
            0 => Err(Error::Configuration(format!(
                "table '{}' declares no primary key",
                desc.table
            ))),
            n => Err(Error::Configuration(format!(
                "table '{}' declares {} primary keys",
                desc.table, n
            ))),
        }
    }
}

fn relation_of(field: &FieldDescriptor) -> Result<&RelationDescriptor, Error> {
    match &field.kind {
        FieldKind::Relation(relation) => Ok(relation),
        _ => Err(Error::Configuration(format!(
            "field '{}' is not a relationship field",
            field.name
        ))),
    }
}

fn no_handler(field: &FieldDescriptor, kind: RelationKind, backend: &str) -> Error {
    Error::Configuration(format!(
        "no {} handler registered for {:?} (field '{}')",
        backend, kind, field.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GenerationStrategy, Id};
    use once_cell::sync::Lazy;

    static PLAIN: Lazy<EntityDescriptor> = Lazy::new(|| {
        EntityDescriptor::builder("plain")
            .primary_key("id", IdKind::Long, GenerationStrategy::Auto)
            .build()
    });

    static LINKED: Lazy<EntityDescriptor> = Lazy::new(|| {
        EntityDescriptor::builder("linked")
            .primary_key("id", IdKind::Long, GenerationStrategy::Auto)
            .relation(
                "others",
                RelationDescriptor::many_to_many(|| &PLAIN, RelationElement::Id(IdKind::Long)),
            )
            .build()
    });

    #[test]
    fn missing_handler_is_a_configuration_error() {
        let registry = HandlerRegistry::empty();
        assert!(matches!(
            registry.check_entity_sql(&LINKED),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn standard_registry_resolves_every_builtin_kind() {
        let registry = HandlerRegistry::standard();
        registry.check_entity_sql(&LINKED).unwrap();
        registry.check_entity_doc(&PLAIN).unwrap();
    }

    #[test]
    fn entity_without_primary_key_is_rejected() {
        let desc = EntityDescriptor::builder("orphan").build();
        let registry = HandlerRegistry::standard();
        assert!(matches!(
            registry.check_entity_sql(&desc),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn handler_lookup_borrows_from_the_field() {
        let registry = HandlerRegistry::standard();
        let desc = EntityDescriptor::builder("local")
            .primary_key("id", IdKind::Long, GenerationStrategy::Auto)
            .relation(
                "others",
                RelationDescriptor::many_to_many(|| &LINKED, RelationElement::Id(IdKind::Long))
                    .remote_field("others"),
            )
            .build();
        let field = desc.field("others").unwrap();
        let (_, relation) = registry.sql_handler(field).unwrap();
        assert_eq!(relation.kind, RelationKind::ManyToMany);
        let (_, relation) = registry.doc_handler(field).unwrap();
        assert_eq!(relation.kind, RelationKind::ManyToMany);
    }

    #[test]
    fn lazy_queue_batches_per_field() {
        let mut queue = LazyQueue::new();
        queue.push("covers", &PLAIN, false, 0, vec![Id::Long(1)]);
        queue.push("covers", &PLAIN, false, 1, vec![Id::Long(2), Id::Long(3)]);
        queue.push("owner", &PLAIN, true, 0, vec![Id::Long(9)]);
        queue.push("empty", &PLAIN, false, 0, Vec::new());
        let fetches = queue.take();
        assert_eq!(fetches.len(), 2);
        assert_eq!(fetches[0].field, "covers");
        assert_eq!(fetches[0].rows.len(), 2);
        assert_eq!(fetches[1].field, "owner");
        assert!(fetches[1].single);
    }
}
