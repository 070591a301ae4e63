//! Many-to-one as a plain foreign-key column on the owning row.
//!
//! The column is written inline with the primary INSERT/UPDATE; entity
//! elements additionally queue a single-record lazy resolution.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::condition::BindValue;
use crate::error::Error;
use crate::model::{
    Document, FieldDescriptor, Id, IdKind, RelationDescriptor, RelationKind,
};
use crate::options::QueryOptions;
use crate::relation::{LazyQueue, element_id_kind};

use super::{SqlContext, SqlRelation, id_sql_type};

pub struct SqlManyToOne;

impl SqlRelation for SqlManyToOne {
    fn kind(&self) -> RelationKind {
        RelationKind::ManyToOne
    }

    fn check(&self, field: &FieldDescriptor, relation: &RelationDescriptor) -> Result<(), Error> {
        element_id_kind(field, relation, &QueryOptions::new()).map(|_| ())
    }

    fn can_insert_inline(&self) -> bool {
        true
    }

    fn select_fragment(
        &self,
        ctx: &SqlContext<'_>,
        field: &FieldDescriptor,
        _relation: &RelationDescriptor,
        select: &mut Vec<String>,
        position: &mut usize,
        options: &QueryOptions,
    ) -> Result<(), Error> {
        select.push(format!("{}.{}", ctx.table, options.renamed(field.column)));
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
        let kind = element_id_kind(field, relation, options)?;
        let id = read_id_cell(row, *position, kind, field.name)?;
        *position += 1;
        let Some(id) = id else {
            return Ok(());
        };
        match relation.element {
            crate::model::RelationElement::Id(_) => {
                out.insert(field.name.to_string(), id.to_json());
            }
            crate::model::RelationElement::Entity => {
                lazy.push(field.name, (relation.target)(), true, row_index, vec![id]);
            }
        }
        Ok(())
    }

    fn inline_value(
        &self,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        value: &serde_json::Value,
    ) -> Result<Option<BindValue>, Error> {
        if value.is_null() {
            return Ok(Some(BindValue::Null));
        }
        let kind = element_id_kind(field, relation, &QueryOptions::new())?;
        let id = Id::from_json(kind, value).ok_or_else(|| {
            Error::Serialize(format!(
                "field '{}' holds an invalid {:?} key: {}",
                field.name, kind, value
            ))
        })?;
        Ok(Some(BindValue::from(&id)))
    }

    fn contribute_schema(
        &self,
        ctx: &SqlContext<'_>,
        field: &FieldDescriptor,
        relation: &RelationDescriptor,
        columns: &mut Vec<String>,
        _post: &mut Vec<String>,
    ) -> Result<(), Error> {
        let kind = element_id_kind(field, relation, &QueryOptions::new())?;
        columns.push(format!("{} {}", field.column, id_sql_type(kind, ctx.dialect)));
        Ok(())
    }
}

fn read_id_cell(
    row: &SqliteRow,
    position: usize,
    kind: IdKind,
    field_name: &str,
) -> Result<Option<Id>, Error> {
    let wrap = |err: sqlx::Error| Error::Deserialize(format!("field '{}': {}", field_name, err));
    match kind {
        IdKind::Long => {
            let value: Option<i64> = row.try_get(position).map_err(wrap)?;
            Ok(value.map(Id::Long))
        }
        IdKind::Uuid => {
            let value: Option<String> = row.try_get(position).map_err(wrap)?;
            value
                .map(|raw| {
                    uuid::Uuid::parse_str(&raw).map(Id::Uuid).map_err(|err| {
                        Error::Deserialize(format!("field '{}': {}", field_name, err))
                    })
                })
                .transpose()
        }
        IdKind::Oid => {
            let value: Option<String> = row.try_get(position).map_err(wrap)?;
            Ok(value.map(Id::Oid))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityDescriptor, FieldKind, GenerationStrategy, RelationElement};
    use crate::relation::sql::SqlDialect;
    use once_cell::sync::Lazy;

    static PARENT: Lazy<EntityDescriptor> = Lazy::new(|| {
        EntityDescriptor::builder("parent")
            .primary_key("id", IdKind::Uuid, GenerationStrategy::Auto)
            .build()
    });

    fn field(element: RelationElement) -> FieldDescriptor {
        FieldDescriptor {
            name: "parent",
            column: "parent",
            kind: FieldKind::Relation(RelationDescriptor::many_to_one(|| &PARENT, element)),
        }
    }

    #[test]
    fn entity_element_uses_the_target_key_type_for_its_column() {
        let field = field(RelationElement::Entity);
        let relation = match &field.kind {
            FieldKind::Relation(relation) => relation,
            _ => unreachable!(),
        };
        let ctx = SqlContext {
            table: "child",
            primary_column: "id",
            primary_kind: IdKind::Long,
            dialect: SqlDialect::Sqlite,
        };
        let mut columns = Vec::new();
        let mut post = Vec::new();
        SqlManyToOne
            .contribute_schema(&ctx, &field, relation, &mut columns, &mut post)
            .unwrap();
        assert_eq!(columns, vec!["parent VARCHAR(36)".to_string()]);
        assert!(post.is_empty());
    }

    #[test]
    fn null_inline_value_clears_the_column() {
        let field = field(RelationElement::Id(IdKind::Long));
        let relation = match &field.kind {
            FieldKind::Relation(relation) => relation,
            _ => unreachable!(),
        };
        let bound = SqlManyToOne
            .inline_value(&field, relation, &serde_json::Value::Null)
            .unwrap();
        assert_eq!(bound, Some(BindValue::Null));
        let bound = SqlManyToOne
            .inline_value(&field, relation, &serde_json::json!(7))
            .unwrap();
        assert_eq!(bound, Some(BindValue::Long(7)));
    }
}
