//! Query filters over document values.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Query operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOp {
    /// Equal to value.
    Eq(serde_json::Value),
    /// Value is in list.
    In(Vec<serde_json::Value>),
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    Asc,
    Desc,
}

/// A query filter. Conditions are AND-ed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    pub conditions: Vec<(String, QueryOp)>,
    pub sort: Option<(String, SortDir)>,
}

impl Query {
    /// Create empty query (matches all).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.conditions.push((field.into(), QueryOp::Eq(value.into())));
        self
    }

    /// Add an "in list" condition.
    pub fn in_list<V: Into<serde_json::Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.conditions.push((field.into(), QueryOp::In(values)));
        self
    }

    pub fn sort(mut self, field: impl Into<String>, dir: SortDir) -> Self {
        self.sort = Some((field.into(), dir));
        self
    }

    pub fn sort_asc(self, field: impl Into<String>) -> Self {
        self.sort(field, SortDir::Asc)
    }

    /// Check if a value matches this query.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        self.conditions.iter().all(|(field, op)| {
            let field_value = value.get(field);
            match op {
                QueryOp::Eq(expected) => field_value == Some(expected),
                QueryOp::In(values) => field_value.map(|v| values.contains(v)).unwrap_or(false),
            }
        })
    }

    /// Order two values by the sort field, if any.
    pub fn ordering(&self, a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
        let Some((field, dir)) = &self.sort else {
            return Ordering::Equal;
        };
        let ord = compare_values(a.get(field), b.get(field)).unwrap_or(Ordering::Equal);
        match dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        }
    }
}

/// Compare two JSON values for ordering.
fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Option<Ordering> {
    match (a, b) {
        (Some(serde_json::Value::Number(a)), Some(serde_json::Value::Number(b))) => {
            a.as_f64().partial_cmp(&b.as_f64())
        }
        (Some(serde_json::Value::String(a)), Some(serde_json::Value::String(b))) => Some(a.cmp(b)),
        _ => None,
    }
}
