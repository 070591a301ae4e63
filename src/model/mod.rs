//! Per-type metadata driving persistence.
//!
//! Application code declares one [`EntityDescriptor`] per record type,
//! usually behind a `once_cell::sync::Lazy` static, and implements
//! [`Record`] to hand it to the engines. Field semantics (primary key,
//! timestamps, soft-delete flag, relationships) are carried as markers on
//! [`FieldDescriptor`]; serde does the actual value movement, the engines
//! only ever look at `serde_json` maps shaped by the descriptor.

pub mod ids;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
pub use ids::{Id, IdKind};

/// JSON object the engines move rows and documents through.
pub type Document = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStrategy {
    /// Key minted by the engine or the store (rowid, UUID v7, fresh OID).
    Auto,
    /// Key supplied by the caller on insert.
    Provided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Long,
    Integer,
    Double,
    Text,
    Boolean,
    Timestamp,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeMode {
    Ignore,
    Delete,
    SetNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    ManyToMany,
    OneToMany,
    ManyToOne,
}

/// What a relationship field holds: raw keys, or full target records
/// resolved through the lazy pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationElement {
    Id(IdKind),
    Entity,
}

#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    pub target: fn() -> &'static EntityDescriptor,
    pub element: RelationElement,
    /// Remote field owning the physical link (non-owning many-to-many side,
    /// or the foreign-key field of a one-to-many's children).
    pub mapped_by: Option<&'static str>,
    /// Remote list field to maintain for document-native reverse links.
    pub remote_field: Option<&'static str>,
    pub cascade_update: CascadeMode,
    pub cascade_delete: CascadeMode,
    pub add_link_on_create: bool,
    pub update_link_on_update: bool,
    pub remove_link_on_delete: bool,
    pub eager: bool,
}

impl RelationDescriptor {
    fn new(
        kind: RelationKind,
        target: fn() -> &'static EntityDescriptor,
        element: RelationElement,
    ) -> Self {
        Self {
            kind,
            target,
            element,
            mapped_by: None,
            remote_field: None,
            cascade_update: CascadeMode::Ignore,
            cascade_delete: CascadeMode::Ignore,
            add_link_on_create: true,
            update_link_on_update: true,
            remove_link_on_delete: true,
            eager: false,
        }
    }

    pub fn many_to_many(
        target: fn() -> &'static EntityDescriptor,
        element: RelationElement,
    ) -> Self {
        Self::new(RelationKind::ManyToMany, target, element)
    }

    pub fn one_to_many(
        target: fn() -> &'static EntityDescriptor,
        element: RelationElement,
    ) -> Self {
        Self::new(RelationKind::OneToMany, target, element)
    }

    pub fn many_to_one(
        target: fn() -> &'static EntityDescriptor,
        element: RelationElement,
    ) -> Self {
        Self::new(RelationKind::ManyToOne, target, element)
    }

    pub fn mapped_by(mut self, field: &'static str) -> Self {
        self.mapped_by = Some(field);
        self
    }

    pub fn remote_field(mut self, field: &'static str) -> Self {
        self.remote_field = Some(field);
        self
    }

    pub fn cascade_update(mut self, mode: CascadeMode) -> Self {
        self.cascade_update = mode;
        self
    }

    pub fn cascade_delete(mut self, mode: CascadeMode) -> Self {
        self.cascade_delete = mode;
        self
    }

    pub fn add_link_on_create(mut self, enabled: bool) -> Self {
        self.add_link_on_create = enabled;
        self
    }

    pub fn update_link_on_update(mut self, enabled: bool) -> Self {
        self.update_link_on_update = enabled;
        self
    }

    pub fn remove_link_on_delete(mut self, enabled: bool) -> Self {
        self.remove_link_on_delete = enabled;
        self
    }

    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Primary {
        id: IdKind,
        generation: GenerationStrategy,
    },
    Column {
        ty: ColumnType,
        not_null: bool,
        default: Option<&'static str>,
        size: Option<u32>,
        comment: Option<&'static str>,
        not_read: bool,
    },
    CreatedAt,
    UpdatedAt,
    SoftDelete,
    Relation(RelationDescriptor),
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name as it appears in the serialized record.
    pub name: &'static str,
    /// Column (or document key) in the store. Defaults to `name`.
    pub column: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug)]
pub struct EntityDescriptor {
    pub table: &'static str,
    pub parent: Option<fn() -> &'static EntityDescriptor>,
    pub fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    pub fn builder(table: &'static str) -> EntityBuilder {
        EntityBuilder {
            table,
            parent: None,
            fields: Vec::new(),
        }
    }

    /// Fields in persistence order, oldest ancestor first.
    pub fn all_fields(&self) -> Vec<&FieldDescriptor> {
        let mut out = Vec::new();
        if let Some(parent) = self.parent {
            out.extend(parent().all_fields());
        }
        out.extend(self.fields.iter());
        out
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.all_fields()
            .into_iter()
            .find(|field| field.name == name)
    }

    pub fn primary_field(&self) -> Option<&FieldDescriptor> {
        self.all_fields()
            .into_iter()
            .find(|field| matches!(field.kind, FieldKind::Primary { .. }))
    }

    pub fn primary_kind(&self) -> Option<IdKind> {
        self.primary_field().and_then(|field| match field.kind {
            FieldKind::Primary { id, .. } => Some(id),
            _ => None,
        })
    }

    pub fn soft_delete_field(&self) -> Option<&FieldDescriptor> {
        self.all_fields()
            .into_iter()
            .find(|field| matches!(field.kind, FieldKind::SoftDelete))
    }
}

pub struct EntityBuilder {
    table: &'static str,
    parent: Option<fn() -> &'static EntityDescriptor>,
    fields: Vec<FieldDescriptor>,
}

impl EntityBuilder {
    pub fn parent(mut self, parent: fn() -> &'static EntityDescriptor) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn primary_key(
        mut self,
        name: &'static str,
        id: IdKind,
        generation: GenerationStrategy,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            column: name,
            kind: FieldKind::Primary { id, generation },
        });
        self
    }

    pub fn column(mut self, name: &'static str, ty: ColumnType) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            column: name,
            kind: FieldKind::Column {
                ty,
                not_null: false,
                default: None,
                size: None,
                comment: None,
                not_read: false,
            },
        });
        self
    }

    pub fn created_at(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            column: name,
            kind: FieldKind::CreatedAt,
        });
        self
    }

    pub fn updated_at(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            column: name,
            kind: FieldKind::UpdatedAt,
        });
        self
    }

    pub fn soft_delete(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            column: name,
            kind: FieldKind::SoftDelete,
        });
        self
    }

    pub fn relation(mut self, name: &'static str, relation: RelationDescriptor) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            column: name,
            kind: FieldKind::Relation(relation),
        });
        self
    }

    /// Store the last declared field under a different column name.
    pub fn stored_as(mut self, column: &'static str) -> Self {
        if let Some(field) = self.fields.last_mut() {
            field.column = column;
        }
        self
    }

    pub fn not_null(self) -> Self {
        self.map_last_column(|not_null, _, _, _, _| *not_null = true)
    }

    pub fn default_value(self, value: &'static str) -> Self {
        self.map_last_column(|_, default, _, _, _| *default = Some(value))
    }

    pub fn size(self, limit: u32) -> Self {
        self.map_last_column(|_, _, size, _, _| *size = Some(limit))
    }

    pub fn comment(self, text: &'static str) -> Self {
        self.map_last_column(|_, _, _, comment, _| *comment = Some(text))
    }

    /// Exclude the column from reads unless `ReadAllColumns` is set.
    pub fn not_read(self) -> Self {
        self.map_last_column(|_, _, _, _, not_read| *not_read = true)
    }

    fn map_last_column(
        mut self,
        apply: impl FnOnce(
            &mut bool,
            &mut Option<&'static str>,
            &mut Option<u32>,
            &mut Option<&'static str>,
            &mut bool,
        ),
    ) -> Self {
        if let Some(FieldDescriptor {
            kind:
                FieldKind::Column {
                    not_null,
                    default,
                    size,
                    comment,
                    not_read,
                    ..
                },
            ..
        }) = self.fields.last_mut()
        {
            apply(not_null, default, size, comment, not_read);
        }
        self
    }

    pub fn build(self) -> EntityDescriptor {
        EntityDescriptor {
            table: self.table,
            parent: self.parent,
            fields: self.fields,
        }
    }
}

/// A persistable record: serde does the value movement, the descriptor
/// tells the engines what each field means.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    fn descriptor() -> &'static EntityDescriptor;
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<Document, Error> {
    match serde_json::to_value(value).map_err(|err| Error::Serialize(err.to_string()))? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(Error::Serialize(format!(
            "records must serialize to an object, got: {}",
            other
        ))),
    }
}

pub(crate) fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, Error> {
    serde_json::from_value(serde_json::Value::Object(doc))
        .map_err(|err| Error::Deserialize(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    static BASE: Lazy<EntityDescriptor> = Lazy::new(|| {
        EntityDescriptor::builder("base")
            .primary_key("id", IdKind::Long, GenerationStrategy::Auto)
            .created_at("createdAt")
            .build()
    });

    static CHILD: Lazy<EntityDescriptor> = Lazy::new(|| {
        EntityDescriptor::builder("child")
            .parent(|| &BASE)
            .column("label", ColumnType::Text)
            .not_null()
            .build()
    });

    #[test]
    fn ancestor_fields_come_first() {
        let names: Vec<&str> = CHILD.all_fields().iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["id", "createdAt", "label"]);
    }

    #[test]
    fn primary_key_is_resolved_through_the_parent() {
        assert_eq!(CHILD.primary_kind(), Some(IdKind::Long));
        assert_eq!(CHILD.primary_field().unwrap().column, "id");
    }

    #[test]
    fn column_markers_apply_to_the_last_declared_field() {
        let field = CHILD.field("label").unwrap();
        match &field.kind {
            FieldKind::Column { not_null, .. } => assert!(*not_null),
            other => panic!("unexpected kind: {:?}", other),
        }
    }
}
