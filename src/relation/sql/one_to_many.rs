//! One-to-many read through the children's foreign-key column.
//!
//! The owner carries no physical column: the child table owns the link via
//! the field named by `mapped_by`, and reads aggregate the child keys with
//! the same concat subquery the link table uses. Writes are driven from the
//! child side, so this handler queues nothing.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::error::Error;
use crate::model::ids::decode_id_list;
use crate::model::{
    Document, FieldDescriptor, Id, RelationDescriptor, RelationElement, RelationKind,
};
use crate::options::QueryOptions;
use crate::relation::LazyQueue;

use super::{SqlContext, SqlRelation, concat_subquery};

pub struct SqlOneToMany;

fn remote_columns(
    field: &FieldDescriptor,
    relation: &RelationDescriptor,
) -> Result<(&'static str, &'static str, Option<&'static str>), Error> {
    let target = (relation.target)();
    let mapped_by = relation.mapped_by.ok_or_else(|| {
        Error::Configuration(format!(
            "one-to-many field '{}' must name the child foreign-key field with mapped_by",
            field.name
        ))
    })?;
    let fk = target.field(mapped_by).ok_or_else(|| {
        Error::Configuration(format!(
            "field '{}' is mapped by '{}' which does not exist on table '{}'",
            field.name, mapped_by, target.table
        ))
    })?;
    let pk = target.primary_field().ok_or_else(|| {
        Error::Configuration(format!(
            "one-to-many field '{}' targets table '{}' which has no primary key",
            field.name, target.table
        ))
    })?;
    let soft_delete = target.soft_delete_field().map(|field| field.column);
    Ok((pk.column, fk.column, soft_delete))
}

impl SqlRelation for SqlOneToMany {
    fn kind(&self) -> RelationKind {
        RelationKind::OneToMany
    }

    fn check(&self, field: &FieldDescriptor, relation: &RelationDescriptor) -> Result<(), Error> {
        remote_columns(field, relation).map(|_| ())
    }

    fn select_fragment(
        &self,
        ctx: &SqlContext<'_>,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        select: &mut Vec<String>,
        position: &mut usize,
        options: &QueryOptions,
    ) -> Result<(), Error> {
        if relation.eager {
            return Err(Error::UnsupportedCombination(format!(
                "eager fetch is not supported for the list field '{}'",
                field.name
            )));
        }
        let target = (relation.target)();
        let (pk_column, fk_column, soft_delete) = remote_columns(field, relation)?;
        let kind = crate::relation::element_id_kind(field, relation, options)?;
        let guard = soft_delete.map(|column| format!("{} = false", column));
        select.push(concat_subquery(
            ctx,
            target.table,
            pk_column,
            fk_column,
            *position,
            kind.separator(),
            guard.as_deref(),
            options.renamed(field.column),
        ));
        *position += 1;
        Ok(())
    }

    fn materialize(
        &self,
        row: &SqliteRow,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        row_index: usize,
        out: &mut Document,
        position: &mut usize,
        lazy: &mut LazyQueue,
        options: &QueryOptions,
    ) -> Result<(), Error> {
        let raw: Option<String> = row
            .try_get(*position)
            .map_err(|err| Error::Deserialize(format!("field '{}': {}", field.name, err)))?;
        *position += 1;
        let kind = crate::relation::element_id_kind(field, relation, options)?;
        let ids = match raw {
            None => Vec::new(),
            Some(raw) => decode_id_list(kind, &raw)?,
        };
        if ids.is_empty() {
            return Ok(());
        }
        match relation.element {
            RelationElement::Id(_) => {
                let values: Vec<serde_json::Value> = ids.iter().map(Id::to_json).collect();
                out.insert(field.name.to_string(), serde_json::Value::Array(values));
            }
            RelationElement::Entity => {
                lazy.push(field.name, (relation.target)(), false, row_index, ids);
            }
        }
        Ok(())
    }
}
