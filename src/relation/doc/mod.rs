//! Document-native flavor of the relationship handlers.
//!
//! Keys live inline in the documents (id arrays for lists, a single id for
//! many-to-one); the reverse side is kept consistent through queued actions
//! that push/pull ids on the remote document's list field.

mod many_to_many;
mod many_to_one;
mod one_to_many;

pub use many_to_many::DocManyToMany;
pub use many_to_one::DocManyToOne;
pub use one_to_many::DocOneToMany;

use crate::error::Error;
use crate::model::{
    Document, EntityDescriptor, FieldDescriptor, Id, RelationDescriptor, RelationKind,
};
use crate::options::QueryOptions;
use crate::relation::{LazyQueue, WriteAction};

pub trait DocRelation: Send + Sync {
    fn kind(&self) -> RelationKind;

    fn check(&self, field: &FieldDescriptor, relation: &RelationDescriptor) -> Result<(), Error>;

    /// Relationship values are stored inline in the owning document.
    fn can_insert_inline(&self) -> bool {
        true
    }

    fn is_insert_deferred(&self) -> bool {
        false
    }

    fn is_update_deferred(&self) -> bool {
        false
    }

    fn needs_previous(&self) -> bool {
        false
    }

    /// Decode the stored value into the output row, queueing lazy fetches
    /// for entity-valued elements.
    fn materialize(
        &self,
        raw: Option<&serde_json::Value>,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        row_index: usize,
        out: &mut Document,
        lazy: &mut LazyQueue,
        options: &QueryOptions,
    ) -> Result<(), Error>;

    fn queue_insert(
        &self,
        owner_desc: &'static EntityDescriptor,
        owner: &Id,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        value: &serde_json::Value,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        let _ = (owner_desc, owner, field, relation, value, queue);
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
        let _ = (owner_desc, owner, field, relation, previous, value, queue);
        Ok(())
    }

    /// Queue cascade work for owner rows about to be deleted. `rows` are the
    /// stored documents, keyed by column.
    fn on_owner_delete(
        &self,
        owner_desc: &'static EntityDescriptor,
        rows: &[Document],
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        let _ = (owner_desc, rows, field, relation, queue);
        Ok(())
    }
}

/// Column of a named field on the relation's target, as stored.
pub(crate) fn target_column(
    field: &FieldDescriptor,
    relation: &RelationDescriptor,
    remote_name: &str,
) -> Result<&'static str, Error> {
    let target = (relation.target)();
    target
        .field(remote_name)
        .map(|remote| remote.column)
        .ok_or_else(|| {
            Error::Configuration(format!(
                "field '{}' references '{}' which does not exist on table '{}'",
                field.name, remote_name, target.table
            ))
        })
}

/// Shared list materialization: copy raw keys, or queue a batched lazy
/// fetch when the field holds full records. Empty stays absent.
pub(crate) fn materialize_id_list(
    raw: Option<&serde_json::Value>,
    field: &FieldDescriptor,
    relation: &RelationDescriptor,
    row_index: usize,
    out: &mut Document,
    lazy: &mut LazyQueue,
    options: &QueryOptions,
) -> Result<(), Error> {
    let kind = crate::relation::element_id_kind(field, relation, options)?;
    let ids = crate::model::ids::id_list_from_json(kind, raw)?;
    if ids.is_empty() {
        return Ok(());
    }
    match relation.element {
        crate::model::RelationElement::Id(_) => {
            let values: Vec<serde_json::Value> = ids.iter().map(Id::to_json).collect();
            out.insert(field.name.to_string(), serde_json::Value::Array(values));
        }
        crate::model::RelationElement::Entity => {
            lazy.push(field.name, (relation.target)(), false, row_index, ids);
        }
    }
    Ok(())
}
