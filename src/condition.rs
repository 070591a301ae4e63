//! Composable filter tree shared by both backends.
//!
//! A [`Condition`] renders once per execution: into a SQL fragment with `?`
//! placeholders (bind values collected in render order) for the relational
//! backend, or evaluated directly against a document for the document
//! backend.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::model::{Document, Id};

/// Timestamp text format used everywhere a timestamp crosses into JSON.
/// One fixed format keeps lexicographic document comparisons correct.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl BindValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BindValue::Null => serde_json::Value::Null,
            BindValue::Bool(v) => serde_json::Value::Bool(*v),
            BindValue::Long(v) => serde_json::Value::from(*v),
            BindValue::Double(v) => serde_json::Value::from(*v),
            BindValue::Text(v) => serde_json::Value::String(v.clone()),
            BindValue::Timestamp(v) => serde_json::Value::String(format_timestamp(*v)),
            BindValue::Uuid(v) => serde_json::Value::String(v.to_string()),
        }
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        BindValue::Long(value)
    }
}

impl From<i32> for BindValue {
    fn from(value: i32) -> Self {
        BindValue::Long(value as i64)
    }
}

impl From<f64> for BindValue {
    fn from(value: f64) -> Self {
        BindValue::Double(value)
    }
}

impl From<bool> for BindValue {
    fn from(value: bool) -> Self {
        BindValue::Bool(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        BindValue::Text(value.to_string())
    }
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        BindValue::Text(value)
    }
}

impl From<DateTime<Utc>> for BindValue {
    fn from(value: DateTime<Utc>) -> Self {
        BindValue::Timestamp(value)
    }
}

impl From<Uuid> for BindValue {
    fn from(value: Uuid) -> Self {
        BindValue::Uuid(value)
    }
}

impl From<&Id> for BindValue {
    fn from(value: &Id) -> Self {
        match value {
            Id::Long(v) => BindValue::Long(*v),
            Id::Uuid(v) => BindValue::Uuid(*v),
            Id::Oid(v) => BindValue::Text(v.clone()),
        }
    }
}

impl From<Id> for BindValue {
    fn from(value: Id) -> Self {
        BindValue::from(&value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Like,
}

impl Comparator {
    fn sql(self) -> &'static str {
        match self {
            Comparator::Equal => "=",
            Comparator::NotEqual => "!=",
            Comparator::Greater => ">",
            Comparator::GreaterOrEqual => ">=",
            Comparator::Less => "<",
            Comparator::LessOrEqual => "<=",
            Comparator::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Condition {
    Leaf {
        column: String,
        comparator: Comparator,
        value: BindValue,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    In {
        column: String,
        values: Vec<BindValue>,
    },
}

impl Condition {
    pub fn field(
        column: impl Into<String>,
        comparator: Comparator,
        value: impl Into<BindValue>,
    ) -> Self {
        Condition::Leaf {
            column: column.into(),
            comparator,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<BindValue>) -> Self {
        Self::field(column, Comparator::Equal, value)
    }

    pub fn in_list(column: impl Into<String>, values: Vec<BindValue>) -> Self {
        Condition::In {
            column: column.into(),
            values,
        }
    }

    pub fn in_ids(column: impl Into<String>, ids: &[Id]) -> Self {
        Self::in_list(column, ids.iter().map(BindValue::from).collect())
    }

    pub fn and(parts: Vec<Condition>) -> Self {
        Condition::And(parts)
    }

    pub fn or(parts: Vec<Condition>) -> Self {
        Condition::Or(parts)
    }

    /// Matches every row; renders as a tautology.
    pub fn all() -> Self {
        Condition::And(Vec::new())
    }

    /// Append the SQL fragment for this node and collect its bind values in
    /// render order.
    pub fn render(&self, sql: &mut String, binds: &mut Vec<BindValue>) {
        match self {
            Condition::Leaf {
                column,
                comparator,
                value,
            } => {
                sql.push_str(column);
                sql.push(' ');
                sql.push_str(comparator.sql());
                sql.push_str(" ?");
                binds.push(value.clone());
            }
            Condition::And(parts) | Condition::Or(parts) => {
                if parts.is_empty() {
                    sql.push_str("1 = 1");
                    return;
                }
                let joiner = match self {
                    Condition::Or(_) => " OR ",
                    _ => " AND ",
                };
                sql.push('(');
                for (index, part) in parts.iter().enumerate() {
                    if index > 0 {
                        sql.push_str(joiner);
                    }
                    part.render(sql, binds);
                }
                sql.push(')');
            }
            Condition::In { column, values } => {
                if values.is_empty() {
                    // IN () is not valid SQL; an empty list matches nothing.
                    sql.push_str("1 = 0");
                    return;
                }
                sql.push_str(column);
                sql.push_str(" IN (");
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    binds.push(value.clone());
                }
                sql.push(')');
            }
        }
    }

    /// Evaluate the tree directly against a stored document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Condition::Leaf {
                column,
                comparator,
                value,
            } => {
                let stored = doc.get(column.as_str());
                match comparator {
                    Comparator::Equal => json_eq(stored, value),
                    Comparator::NotEqual => !json_eq(stored, value),
                    Comparator::Like => like_match(stored, value),
                    ordered => match json_compare(stored, value) {
                        Some(ordering) => match ordered {
                            Comparator::Greater => ordering.is_gt(),
                            Comparator::GreaterOrEqual => ordering.is_ge(),
                            Comparator::Less => ordering.is_lt(),
                            Comparator::LessOrEqual => ordering.is_le(),
                            _ => false,
                        },
                        None => false,
                    },
                }
            }
            Condition::And(parts) => parts.iter().all(|part| part.matches(doc)),
            Condition::Or(parts) => {
                !parts.is_empty() && parts.iter().any(|part| part.matches(doc))
            }
            Condition::In { column, values } => {
                let stored = doc.get(column.as_str());
                values.iter().any(|value| json_eq(stored, value))
            }
        }
    }
}

fn json_eq(stored: Option<&serde_json::Value>, value: &BindValue) -> bool {
    let expected = value.to_json();
    match stored {
        None => expected.is_null(),
        Some(actual) => {
            if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
                return a == b;
            }
            *actual == expected
        }
    }
}

fn json_compare(
    stored: Option<&serde_json::Value>,
    value: &BindValue,
) -> Option<std::cmp::Ordering> {
    let expected = value.to_json();
    let actual = stored?;
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a.partial_cmp(&b);
    }
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Minimal LIKE evaluation for documents: `%` wildcards, matched greedily
/// segment by segment.
fn like_match(stored: Option<&serde_json::Value>, value: &BindValue) -> bool {
    let (Some(actual), BindValue::Text(pattern)) = (stored.and_then(|v| v.as_str()), value) else {
        return false;
    };
    let segments: Vec<&str> = pattern.split('%').collect();
    let mut rest = actual;
    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if index == 0 {
            let Some(tail) = rest.strip_prefix(segment) else {
                return false;
            };
            rest = tail;
        } else if index == segments.len() - 1 {
            let Some(head) = rest.strip_suffix(segment) else {
                return false;
            };
            rest = head;
        } else {
            let Some(at) = rest.find(segment) else {
                return false;
            };
            rest = &rest[at + segment.len()..];
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, serde_json::Value)]) -> Document {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn renders_nested_tree_with_binds_in_order() {
        let cond = Condition::and(vec![
            Condition::eq("deleted", false),
            Condition::or(vec![
                Condition::field("age", Comparator::GreaterOrEqual, 18),
                Condition::eq("name", "root"),
            ]),
        ]);
        let mut sql = String::new();
        let mut binds = Vec::new();
        cond.render(&mut sql, &mut binds);
        assert_eq!(sql, "(deleted = ? AND (age >= ? OR name = ?))");
        assert_eq!(
            binds,
            vec![
                BindValue::Bool(false),
                BindValue::Long(18),
                BindValue::Text("root".to_string()),
            ]
        );
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let cond = Condition::in_list("id", Vec::new());
        let mut sql = String::new();
        let mut binds = Vec::new();
        cond.render(&mut sql, &mut binds);
        assert_eq!(sql, "1 = 0");
        assert!(binds.is_empty());
        assert!(!cond.matches(&doc(&[("id", serde_json::json!(1))])));
    }

    #[test]
    fn in_list_renders_one_placeholder_per_value() {
        let cond = Condition::in_ids("id", &[Id::Long(1), Id::Long(2), Id::Long(3)]);
        let mut sql = String::new();
        let mut binds = Vec::new();
        cond.render(&mut sql, &mut binds);
        assert_eq!(sql, "id IN (?, ?, ?)");
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn document_matching_follows_the_same_tree() {
        let cond = Condition::and(vec![
            Condition::eq("deleted", false),
            Condition::field("count", Comparator::Greater, 2),
        ]);
        assert!(cond.matches(&doc(&[
            ("deleted", serde_json::json!(false)),
            ("count", serde_json::json!(5)),
        ])));
        assert!(!cond.matches(&doc(&[
            ("deleted", serde_json::json!(false)),
            ("count", serde_json::json!(1)),
        ])));
    }

    #[test]
    fn like_supports_wildcard_edges() {
        let cond = Condition::field("name", Comparator::Like, "ro%ot");
        assert!(cond.matches(&doc(&[("name", serde_json::json!("robot"))])));
        assert!(!cond.matches(&doc(&[("name", serde_json::json!("rboot"))])));
        let cond = Condition::field("name", Comparator::Like, "%bot");
        assert!(cond.matches(&doc(&[("name", serde_json::json!("robot"))])));
    }
}
