//! Per-call directives threaded through reads and writes.

use crate::model::IdKind;

#[derive(Debug, Clone)]
pub enum QueryOption {
    /// Run the operation against another table, keeping the descriptor.
    OverrideTableName(String),
    /// Read/write a field under a different column name for this call.
    RenameColumn { from: String, to: String },
    /// Runtime id-type hint for a relationship field whose declared element
    /// type must be overridden (generic link rows).
    SpecifyType {
        field: String,
        kind: IdKind,
        multiple: bool,
    },
    /// Include soft-deleted rows in reads.
    IncludeDeleted,
    /// Also read columns marked `not_read` and the soft-delete flag.
    ReadAllColumns,
    /// Sort by (column, ascending) pairs, applied in order.
    OrderBy(Vec<(String, bool)>),
    Limit(u64),
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    options: Vec<QueryOption>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, option: QueryOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn add(&mut self, option: QueryOption) {
        self.options.push(option);
    }

    pub fn table_override(&self) -> Option<&str> {
        self.options.iter().rev().find_map(|option| match option {
            QueryOption::OverrideTableName(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn renamed<'a>(&'a self, column: &'a str) -> &'a str {
        for option in &self.options {
            if let QueryOption::RenameColumn { from, to } = option {
                if from == column {
                    return to;
                }
            }
        }
        column
    }

    pub fn specified_type(&self, field: &str) -> Option<(IdKind, bool)> {
        self.options.iter().find_map(|option| match option {
            QueryOption::SpecifyType {
                field: name,
                kind,
                multiple,
            } if name == field => Some((*kind, *multiple)),
            _ => None,
        })
    }

    pub fn include_deleted(&self) -> bool {
        self.options
            .iter()
            .any(|option| matches!(option, QueryOption::IncludeDeleted))
    }

    pub fn read_all_columns(&self) -> bool {
        self.options
            .iter()
            .any(|option| matches!(option, QueryOption::ReadAllColumns))
    }

    pub fn order_by(&self) -> Option<&[(String, bool)]> {
        self.options.iter().find_map(|option| match option {
            QueryOption::OrderBy(columns) => Some(columns.as_slice()),
            _ => None,
        })
    }

    pub fn limit(&self) -> Option<u64> {
        self.options.iter().find_map(|option| match option {
            QueryOption::Limit(limit) => Some(*limit),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_table_override_wins() {
        let options = QueryOptions::new()
            .with(QueryOption::OverrideTableName("first".into()))
            .with(QueryOption::OverrideTableName("second".into()));
        assert_eq!(options.table_override(), Some("second"));
    }

    #[test]
    fn rename_falls_back_to_the_original_column() {
        let options = QueryOptions::new().with(QueryOption::RenameColumn {
            from: "data".into(),
            to: "payload".into(),
        });
        assert_eq!(options.renamed("data"), "payload");
        assert_eq!(options.renamed("other"), "other");
    }

    #[test]
    fn specify_type_targets_one_field() {
        let options = QueryOptions::new().with(QueryOption::SpecifyType {
            field: "covers".into(),
            kind: IdKind::Uuid,
            multiple: true,
        });
        assert_eq!(options.specified_type("covers"), Some((IdKind::Uuid, true)));
        assert_eq!(options.specified_type("tracks"), None);
    }
}
