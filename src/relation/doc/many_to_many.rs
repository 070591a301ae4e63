//! Document many-to-many: both sides hold an id array, `remote_field`
//! names the mirror list on the target. Every change to this side queues a
//! push/pull on the mirror so the two arrays stay consistent.

use crate::error::Error;
use crate::model::ids::id_list_from_json;
use crate::model::{
    Document, EntityDescriptor, FieldDescriptor, Id, RelationDescriptor, RelationKind,
};
use crate::options::QueryOptions;
use crate::relation::{LazyQueue, WriteAction, element_id_kind};

use super::{DocRelation, materialize_id_list, target_column};

pub struct DocManyToMany;

fn mirror_column(
    field: &FieldDescriptor,
    relation: &RelationDescriptor,
) -> Result<&'static str, Error> {
    let remote_name = relation.remote_field.ok_or_else(|| {
        Error::Configuration(format!(
            "document many-to-many field '{}' must name its mirror list with remote_field",
            field.name
        ))
    })?;
    target_column(field, relation, remote_name)
}

impl DocRelation for DocManyToMany {
    fn kind(&self) -> RelationKind {
        RelationKind::ManyToMany
    }

    fn check(&self, field: &FieldDescriptor, relation: &RelationDescriptor) -> Result<(), Error> {
        if relation.eager {
            return Err(Error::UnsupportedCombination(format!(
                "eager fetch is not supported for the list field '{}'",
                field.name
            )));
        }
        mirror_column(field, relation).map(|_| ())
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
        _owner_desc: &'static EntityDescriptor,
        owner: &Id,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        value: &serde_json::Value,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        let kind = element_id_kind(field, relation, &QueryOptions::new())?;
        let column = mirror_column(field, relation)?;
        for id in id_list_from_json(kind, Some(value))? {
            queue.push(WriteAction::PushListEntry {
                target: (relation.target)(),
                column,
                key: id,
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
        let kind = element_id_kind(field, relation, &QueryOptions::new())?;
        let column = mirror_column(field, relation)?;
        let before = id_list_from_json(kind, previous)?;
        let after = id_list_from_json(kind, value)?;
        for added in after.iter().filter(|id| !before.contains(id)) {
            queue.push(WriteAction::PushListEntry {
                target: (relation.target)(),
                column,
                key: added.clone(),
                value: owner.clone(),
            });
        }
        for removed in before.iter().filter(|id| !after.contains(id)) {
            queue.push(WriteAction::PullListEntry {
                target: (relation.target)(),
                column,
                key: removed.clone(),
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
        let kind = element_id_kind(field, relation, &QueryOptions::new())?;
        let column = mirror_column(field, relation)?;
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
            for id in id_list_from_json(kind, row.get(field.column))? {
                queue.push(WriteAction::PullListEntry {
                    target: (relation.target)(),
                    column,
                    key: id,
                    value: owner.clone(),
                });
            }
        }
        Ok(())
    }
}
