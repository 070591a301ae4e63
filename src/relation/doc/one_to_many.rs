//! Document one-to-many: the parent holds the child-id array, each child
//! holds the parent key in the field named by `mapped_by`.
//!
//! Attaching a child repoints its parent key and pulls it from whichever
//! parent held it before. Detaching applies the relevant cascade policy:
//! `cascade_update` when the list shrinks on an update, `cascade_delete`
//! when the parent itself is deleted.

use crate::error::Error;
use crate::model::ids::id_list_from_json;
use crate::model::{
    CascadeMode, Document, EntityDescriptor, FieldDescriptor, Id, RelationDescriptor, RelationKind,
};
use crate::options::QueryOptions;
use crate::relation::{LazyQueue, WriteAction, element_id_kind};

use super::{DocRelation, materialize_id_list, target_column};

pub struct DocOneToMany;

fn child_fk_column(
    field: &FieldDescriptor,
    relation: &RelationDescriptor,
) -> Result<&'static str, Error> {
    let mapped_by = relation.mapped_by.ok_or_else(|| {
        Error::Configuration(format!(
            "document one-to-many field '{}' must name the child parent-key field with mapped_by",
            field.name
        ))
    })?;
    target_column(field, relation, mapped_by)
}

fn cascade_action(
    mode: CascadeMode,
    relation: &RelationDescriptor,
    fk_column: &'static str,
    child: Id,
    queue: &mut Vec<WriteAction>,
) {
    match mode {
        CascadeMode::Delete => queue.push(WriteAction::DeleteRemote {
            target: (relation.target)(),
            key: child,
        }),
        CascadeMode::SetNull => queue.push(WriteAction::SetRemoteField {
            target: (relation.target)(),
            column: fk_column,
            key: child,
            value: None,
        }),
        CascadeMode::Ignore => {}
    }
}

impl DocRelation for DocOneToMany {
    fn kind(&self) -> RelationKind {
        RelationKind::OneToMany
    }

    fn check(&self, field: &FieldDescriptor, relation: &RelationDescriptor) -> Result<(), Error> {
        if relation.eager {
            return Err(Error::UnsupportedCombination(format!(
                "eager fetch is not supported for the list field '{}'",
                field.name
            )));
        }
        child_fk_column(field, relation).map(|_| ())
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
        materialize_id_list(raw, field, relation, row_index, out, lazy, options)
    }

    fn queue_insert(
        &self,
        owner_desc: &'static EntityDescriptor,
        owner: &Id,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        value: &serde_json::Value,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        if !relation.add_link_on_create {
            return Ok(());
        }
        let kind = element_id_kind(field, relation, &QueryOptions::new())?;
        let fk_column = child_fk_column(field, relation)?;
        for child in id_list_from_json(kind, Some(value))? {
            queue.push(WriteAction::ReassignParent {
                child: (relation.target)(),
                fk_column,
                parent: owner_desc,
                list_column: field.column,
                key: child,
                new_parent: owner.clone(),
            });
        }
        Ok(())
    }

    fn queue_update(
        &self,
        owner_desc: &'static EntityDescriptor,
        owner: &Id,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        previous: Option<&serde_json::Value>,
        value: Option<&serde_json::Value>,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        let kind = element_id_kind(field, relation, &QueryOptions::new())?;
        let fk_column = child_fk_column(field, relation)?;
        let before = id_list_from_json(kind, previous)?;
        let after = id_list_from_json(kind, value)?;
        for added in after.iter().filter(|id| !before.contains(id)) {
            queue.push(WriteAction::ReassignParent {
                child: (relation.target)(),
                fk_column,
                parent: owner_desc,
                list_column: field.column,
                key: added.clone(),
                new_parent: owner.clone(),
            });
        }
        for removed in before.iter().filter(|id| !after.contains(id)) {
            cascade_action(
                relation.cascade_update,
                relation,
                fk_column,
                removed.clone(),
                queue,
            );
        }
        Ok(())
    }

    fn on_owner_delete(
        &self,
        _owner_desc: &'static EntityDescriptor,
        rows: &[Document],
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        let kind = element_id_kind(field, relation, &QueryOptions::new())?;
        let fk_column = child_fk_column(field, relation)?;
        for row in rows {
            for child in id_list_from_json(kind, row.get(field.column))? {
                cascade_action(relation.cascade_delete, relation, fk_column, child, queue);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GenerationStrategy, IdKind, RelationElement};
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
                    .mapped_by("parent")
                    .cascade_update(CascadeMode::SetNull)
                    .cascade_delete(CascadeMode::Delete),
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
    fn shrinking_the_list_applies_the_update_policy() {
        let field = PARENT.field("childs").unwrap();
        let mut queue = Vec::new();
        DocOneToMany
            .queue_update(
                &PARENT,
                &Id::Long(1),
                field,
                relation(field),
                Some(&serde_json::json!([10, 11])),
                Some(&serde_json::json!([11])),
                &mut queue,
            )
            .unwrap();
        assert_eq!(queue.len(), 1);
        match &queue[0] {
            WriteAction::SetRemoteField { key, value, .. } => {
                assert_eq!(key, &Id::Long(10));
                assert!(value.is_none());
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn deleting_the_parent_applies_the_delete_policy() {
        let field = PARENT.field("childs").unwrap();
        let mut row = Document::new();
        row.insert("id".into(), serde_json::json!(1));
        row.insert("childs".into(), serde_json::json!([10, 11]));
        let mut queue = Vec::new();
        DocOneToMany
            .on_owner_delete(&PARENT, &[row], field, relation(field), &mut queue)
            .unwrap();
        // Update policy is SetNull, delete policy is Delete: the two must
        // not leak into each other.
        assert_eq!(queue.len(), 2);
        assert!(
            queue
                .iter()
                .all(|action| matches!(action, WriteAction::DeleteRemote { .. }))
        );
    }

    #[test]
    fn growing_the_list_reassigns_the_new_children() {
        let field = PARENT.field("childs").unwrap();
        let mut queue = Vec::new();
        DocOneToMany
            .queue_update(
                &PARENT,
                &Id::Long(1),
                field,
                relation(field),
                Some(&serde_json::json!([10])),
                Some(&serde_json::json!([10, 12])),
                &mut queue,
            )
            .unwrap();
        assert_eq!(queue.len(), 1);
        match &queue[0] {
            WriteAction::ReassignParent {
                key, new_parent, ..
            } => {
                assert_eq!(key, &Id::Long(12));
                assert_eq!(new_parent, &Id::Long(1));
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }
}
