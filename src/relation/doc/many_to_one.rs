//! Document many-to-one: the child stores the parent key inline and, when
//! `remote_field` names the parent's list, keeps that list in sync on
//! create, reparenting and delete.

use crate::error::Error;
use crate::model::{
    Document, EntityDescriptor, FieldDescriptor, Id, RelationDescriptor, RelationElement,
    RelationKind,
};
use crate::options::QueryOptions;
use crate::relation::{LazyQueue, WriteAction, element_id_kind};

use super::{DocRelation, target_column};

pub struct DocManyToOne;

fn parent_list_column(
    field: &FieldDescriptor,
    relation: &RelationDescriptor,
) -> Result<Option<&'static str>, Error> {
    match relation.remote_field {
        None => Ok(None),
        Some(remote_name) => target_column(field, relation, remote_name).map(Some),
    }
}

fn single_id(
    field: &FieldDescriptor,
    relation: &RelationDescriptor,
    value: Option<&serde_json::Value>,
) -> Result<Option<Id>, Error> {
    let Some(value) = value else { return Ok(None) };
    if value.is_null() {
        return Ok(None);
    }
    let kind = element_id_kind(field, relation, &QueryOptions::new())?;
    Id::from_json(kind, value)
        .map(Some)
        .ok_or_else(|| {
            Error::Serialize(format!(
                "field '{}' holds an invalid {:?} key: {}",
                field.name, kind, value
            ))
        })
}

impl DocRelation for DocManyToOne {
    fn kind(&self) -> RelationKind {
        RelationKind::ManyToOne
    }

    fn check(&self, field: &FieldDescriptor, relation: &RelationDescriptor) -> Result<(), Error> {
        element_id_kind(field, relation, &QueryOptions::new())?;
        parent_list_column(field, relation).map(|_| ())
    }

    fn is_insert_deferred(&self) -> bool {
        true
    }

    fn is_update_deferred(&self) -> bool {
        true
    }

    fn needs_previous(&self) -> bool {
        true
    }

    fn materialize(
        &self,
        raw: Option<&serde_json::Value>,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        row_index: usize,
        out: &mut Document,
        lazy: &mut LazyQueue,
        options: &QueryOptions,
    ) -> Result<(), Error> {
        let kind = element_id_kind(field, relation, options)?;
        let Some(raw) = raw else { return Ok(()) };
        if raw.is_null() {
            return Ok(());
        }
        let id = Id::from_json(kind, raw).ok_or_else(|| {
            Error::Deserialize(format!(
                "field '{}' holds an invalid {:?} key: {}",
                field.name, kind, raw
            ))
        })?;
        match relation.element {
            RelationElement::Id(_) => {
                out.insert(field.name.to_string(), id.to_json());
            }
            RelationElement::Entity => {
                lazy.push(field.name, (relation.target)(), true, row_index, vec![id]);
            }
        }
        Ok(())
    }

    fn queue_insert(
        &self,
        _owner_desc: &'static EntityDescriptor,
        owner: &Id,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        value: &serde_json::Value,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        if !relation.add_link_on_create {
            return Ok(());
        }
        let Some(column) = parent_list_column(field, relation)? else {
            return Ok(());
        };
        if let Some(parent) = single_id(field, relation, Some(value))? {
            queue.push(WriteAction::PushListEntry {
                target: (relation.target)(),
                column,
                key: parent,
                value: owner.clone(),
            });
        }
        Ok(())
    }

    fn queue_update(
        &self,
        _owner_desc: &'static EntityDescriptor,
        owner: &Id,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        previous: Option<&serde_json::Value>,
        value: Option<&serde_json::Value>,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        if !relation.update_link_on_update {
            return Ok(());
        }
        let Some(column) = parent_list_column(field, relation)? else {
            return Ok(());
        };
        let before = single_id(field, relation, previous)?;
        let after = single_id(field, relation, value)?;
        if before == after {
            return Ok(());
        }
        if let Some(old_parent) = before {
            queue.push(WriteAction::PullListEntry {
                target: (relation.target)(),
                column,
                key: old_parent,
                value: owner.clone(),
            });
        }
        if let Some(new_parent) = after {
            queue.push(WriteAction::PushListEntry {
                target: (relation.target)(),
                column,
                key: new_parent,
                value: owner.clone(),
            });
        }
        Ok(())
    }

    fn on_owner_delete(
        &self,
        owner_desc: &'static EntityDescriptor,
        rows: &[Document],
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        if !relation.remove_link_on_delete {
            return Ok(());
        }
        let Some(column) = parent_list_column(field, relation)? else {
            return Ok(());
        };
        let pk = owner_desc.primary_field().ok_or_else(|| {
            Error::Configuration(format!("table '{}' has no primary key", owner_desc.table))
        })?;
        let pk_kind = owner_desc.primary_kind().ok_or_else(|| {
            Error::Configuration(format!("table '{}' has no primary key", owner_desc.table))
        })?;
        for row in rows {
            let Some(owner) = row.get(pk.column).and_then(|v| Id::from_json(pk_kind, v)) else {
                continue;
            };
            if let Some(parent) = single_id(field, relation, row.get(field.column))? {
                queue.push(WriteAction::PullListEntry {
                    target: (relation.target)(),
                    column,
                    key: parent,
                    value: owner,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GenerationStrategy, IdKind};
    use once_cell::sync::Lazy;

    static CHILD: Lazy<EntityDescriptor> = Lazy::new(|| {
        EntityDescriptor::builder("child")
            .primary_key("id", IdKind::Long, GenerationStrategy::Provided)
            .relation(
                "parent",
                RelationDescriptor::many_to_one(|| &PARENT, RelationElement::Id(IdKind::Long))
                    .remote_field("childs"),
            )
            .build()
    });

    static PARENT: Lazy<EntityDescriptor> = Lazy::new(|| {
        EntityDescriptor::builder("parent")
            .primary_key("id", IdKind::Long, GenerationStrategy::Provided)
            .relation(
                "childs",
                RelationDescriptor::one_to_many(|| &CHILD, RelationElement::Id(IdKind::Long))
                    .mapped_by("parent"),
            )
            .build()
    });

    fn relation(field: &FieldDescriptor) -> &RelationDescriptor {
        match &field.kind {
            crate::model::FieldKind::Relation(relation) => relation,
            _ => unreachable!(),
        }
    }

    #[test]
    fn reparenting_pulls_from_the_old_list_and_pushes_to_the_new() {
        let field = CHILD.field("parent").unwrap();
        let mut queue = Vec::new();
        DocManyToOne
            .queue_update(
                &CHILD,
                &Id::Long(7),
                field,
                relation(field),
                Some(&serde_json::json!(1)),
                Some(&serde_json::json!(2)),
                &mut queue,
            )
            .unwrap();
        assert_eq!(queue.len(), 2);
        match (&queue[0], &queue[1]) {
            (
                WriteAction::PullListEntry { key: old, .. },
                WriteAction::PushListEntry { key: new, .. },
            ) => {
                assert_eq!(old, &Id::Long(1));
                assert_eq!(new, &Id::Long(2));
            }
            other => panic!("unexpected actions: {:?}", other),
        }
    }

    #[test]
    fn unchanged_parent_queues_nothing() {
        let field = CHILD.field("parent").unwrap();
        let mut queue = Vec::new();
        DocManyToOne
            .queue_update(
                &CHILD,
                &Id::Long(7),
                field,
                relation(field),
                Some(&serde_json::json!(1)),
                Some(&serde_json::json!(1)),
                &mut queue,
            )
            .unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn create_with_link_disabled_queues_nothing() {
        let field = FieldDescriptor {
            name: "parent",
            column: "parent",
            kind: crate::model::FieldKind::Relation(
                RelationDescriptor::many_to_one(|| &PARENT, RelationElement::Id(IdKind::Long))
                    .remote_field("childs")
                    .add_link_on_create(false),
            ),
        };
        let mut queue = Vec::new();
        DocManyToOne
            .queue_insert(
                &CHILD,
                &Id::Long(7),
                &field,
                relation(&field),
                &serde_json::json!(1),
                &mut queue,
            )
            .unwrap();
        assert!(queue.is_empty());
    }
}
