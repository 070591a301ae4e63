//! Many-to-many over a soft-deleted link table.
//!
//! The owning side (no `mapped_by`) names the table
//! `<ownerTable>_link_<field minus trailing 's'>` and stores its own key in
//! `object1Id`; the non-owning side derives the same table from the target
//! and swaps the column roles. Reads aggregate the remote ids of live link
//! rows into one text cell per owner row.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::error::Error;
use crate::model::ids::decode_id_list;
use crate::model::{
    Document, FieldDescriptor, Id, IdKind, RelationDescriptor, RelationElement, RelationKind,
};
use crate::options::QueryOptions;
use crate::relation::{LazyQueue, WriteAction, element_id_kind};

use super::{SqlContext, SqlRelation, concat_subquery, id_sql_type};

pub const LINK_OWNER_COLUMN: &str = "object1Id";
pub const LINK_REMOTE_COLUMN: &str = "object2Id";

/// `track` + `covers` gives `track_link_cover`.
pub fn link_table_name(table: &str, field: &str) -> String {
    let singular = field.strip_suffix('s').unwrap_or(field);
    format!("{}_link_{}", table, singular)
}

pub(crate) struct LinkSide {
    pub table: String,
    pub owner_column: &'static str,
    pub remote_column: &'static str,
}

pub(crate) fn link_side(
    owner_table: &str,
    field: &FieldDescriptor,
    relation: &RelationDescriptor,
) -> Result<LinkSide, Error> {
    match relation.mapped_by {
        None => Ok(LinkSide {
            table: link_table_name(owner_table, field.column),
            owner_column: LINK_OWNER_COLUMN,
            remote_column: LINK_REMOTE_COLUMN,
        }),
        Some(remote_name) => {
            let target = (relation.target)();
            let remote = target.field(remote_name).ok_or_else(|| {
                Error::Configuration(format!(
                    "field '{}' is mapped by '{}' which does not exist on table '{}'",
                    field.name, remote_name, target.table
                ))
            })?;
            Ok(LinkSide {
                table: link_table_name(target.table, remote.column),
                owner_column: LINK_REMOTE_COLUMN,
                remote_column: LINK_OWNER_COLUMN,
            })
        }
    }
}

pub struct SqlManyToMany;

impl SqlRelation for SqlManyToMany {
    fn kind(&self) -> RelationKind {
        RelationKind::ManyToMany
    }

    fn check(&self, field: &FieldDescriptor, relation: &RelationDescriptor) -> Result<(), Error> {
        if relation.element == RelationElement::Entity && (relation.target)().primary_kind().is_none()
        {
            return Err(Error::Configuration(format!(
                "field '{}' holds entities of a table without primary key",
                field.name
            )));
        }
        // Validates the mapped_by reference when present.
        link_side("", field, relation).map(|_| ())
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
        let side = link_side(ctx.table, field, relation)?;
        let kind = element_id_kind(field, relation, options)?;
        select.push(concat_subquery(
            ctx,
            &side.table,
            side.remote_column,
            side.owner_column,
            *position,
            kind.separator(),
            Some("deleted = false"),
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
        let raw: Option<String> = row.try_get(*position).map_err(|err| {
            Error::Deserialize(format!("field '{}': {}", field.name, err))
        })?;
        *position += 1;
        let kind = element_id_kind(field, relation, options)?;
        let ids = match raw {
            None => Vec::new(),
            Some(raw) => decode_id_list(kind, &raw)?,
        };
        if ids.is_empty() {
            // Zero links materialize as absent, not as an empty list.
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

    fn queue_insert(
        &self,
        ctx: &SqlContext<'_>,
        owner: &Id,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        value: &serde_json::Value,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        let kind = element_id_kind(field, relation, &QueryOptions::new())?;
        let ids = crate::model::ids::id_list_from_json(kind, Some(value))?;
        if ids.is_empty() {
            return Ok(());
        }
        let side = link_side(ctx.table, field, relation)?;
        queue.push(WriteAction::InsertLinks {
            table: side.table,
            owner_column: side.owner_column,
            remote_column: side.remote_column,
            owner: owner.clone(),
            remotes: ids,
        });
        Ok(())
    }

    /// Diff previous vs new as sets: removed ids soft-delete their link row,
    /// added ids insert fresh rows. Unchanged ids are untouched.
    fn queue_update(
        &self,
        ctx: &SqlContext<'_>,
        owner: &Id,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        previous: Option<&serde_json::Value>,
        value: Option<&serde_json::Value>,
        queue: &mut Vec<WriteAction>,
    ) -> Result<(), Error> {
        let kind = element_id_kind(field, relation, &QueryOptions::new())?;
        let before = crate::model::ids::id_list_from_json(kind, previous)?;
        let after = crate::model::ids::id_list_from_json(kind, value)?;
        let side = link_side(ctx.table, field, relation)?;
        for removed in before.iter().filter(|id| !after.contains(id)) {
            queue.push(WriteAction::SoftDeleteLinks {
                table: side.table.clone(),
                owner_column: side.owner_column,
                remote_column: side.remote_column,
                owner: owner.clone(),
                remote: Some(removed.clone()),
            });
        }
        let added: Vec<Id> = after
            .iter()
            .filter(|id| !before.contains(id))
            .cloned()
            .collect();
        if !added.is_empty() {
            queue.push(WriteAction::InsertLinks {
                table: side.table,
                owner_column: side.owner_column,
                remote_column: side.remote_column,
                owner: owner.clone(),
                remotes: added,
            });
        }
        Ok(())
    }

    fn contribute_schema(
        &self,
        ctx: &SqlContext<'_>,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        _columns: &mut Vec<String>,
        post: &mut Vec<String>,
    ) -> Result<(), Error> {
        // The owning side alone creates the link table.
        if relation.mapped_by.is_some() {
            return Ok(());
        }
        let side = link_side(ctx.table, field, relation)?;
        let remote_kind = element_id_kind(field, relation, &QueryOptions::new())?;
        post.push(link_table_ddl(ctx, &side.table, ctx.primary_kind, remote_kind));
        Ok(())
    }

    fn link_tables(
        &self,
        ctx: &SqlContext<'_>,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
    ) -> Vec<String> {
        if relation.mapped_by.is_some() {
            return Vec::new();
        }
        match link_side(ctx.table, field, relation) {
            Ok(side) => vec![side.table],
            Err(_) => Vec::new(),
        }
    }
}

fn link_table_ddl(
    ctx: &SqlContext<'_>,
    table: &str,
    owner_kind: IdKind,
    remote_kind: IdKind,
) -> String {
    let id_column = match ctx.dialect {
        super::SqlDialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        super::SqlDialect::Mysql => "id BIGINT AUTO_INCREMENT PRIMARY KEY",
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {},\n  deleted BOOLEAN NOT NULL DEFAULT false,\n  createdAt DATETIME NOT NULL,\n  updatedAt DATETIME NOT NULL,\n  {} {} NOT NULL,\n  {} {} NOT NULL\n)",
        table,
        id_column,
        LINK_OWNER_COLUMN,
        id_sql_type(owner_kind, ctx.dialect),
        LINK_REMOTE_COLUMN,
        id_sql_type(remote_kind, ctx.dialect),
    )
}
