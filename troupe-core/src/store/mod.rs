//! Persistent store boundary.
//!
//! The engine never holds authoritative state in process memory. Everything
//! goes through a row store that offers three primitives:
//!
//! ```text
//! read(table, filter, projection, order, limit) -> rows
//! patch(table, filter, fields)                  -> affected count
//! insert(table, row)
//! delete(table, filter)                         -> removed count
//! ```
//!
//! A patch that affects zero rows is the signal to take a creation path
//! (upsert by patch-miss). There are no multi-row transactions.

mod in_memory;
mod persist;
pub mod records;
mod repo;

pub use in_memory::InMemoryStore;
pub use persist::{StoreSnapshot, SNAPSHOT_VERSION};
pub use records::{
    clamp_stat, ActionId, ActionRecord, CharacterState, DecayLedgerEntry, InteractionRecord,
    Location, MemoryId, MemoryRecord, RelationshipRecord, WantId, WantRecord,
};
pub use repo::{from_row, to_row, Records};

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A stored row.
pub type Row = serde_json::Map<String, Value>;

/// The tables the engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Characters,
    Memories,
    Relationships,
    Actions,
    Interactions,
    Wants,
    DecayLedger,
    Outbox,
}

impl Table {
    /// Get the table name.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Characters => "characters",
            Table::Memories => "memories",
            Table::Relationships => "relationships",
            Table::Actions => "actions",
            Table::Interactions => "interactions",
            Table::Wants => "wants",
            Table::DecayLedger => "decay_ledger",
            Table::Outbox => "outbox",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Row store used by every component.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read rows matching a query.
    async fn read(&self, table: Table, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Overwrite `fields` on every row matching `filter`, returning how many matched.
    async fn patch(&self, table: Table, filter: &Filter, fields: Row) -> Result<usize, StoreError>;

    /// Append a row.
    async fn insert(&self, table: Table, row: Row) -> Result<(), StoreError>;

    /// Remove every row matching `filter`, returning how many were removed.
    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize, StoreError>;
}

/// Encode a timestamp the way every row stores it.
pub fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// A single predicate on one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    IsNull(String),
    NotNull(String),
    In(String, Vec<Value>),
    /// Matches when any of the inner conditions match.
    Or(Vec<Condition>),
}

impl Condition {
    /// Evaluate against a row. Missing columns read as null.
    pub fn matches(&self, row: &Row) -> bool {
        let get = |column: &str| row.get(column).unwrap_or(&Value::Null);
        match self {
            Condition::Eq(c, v) => values_equal(get(c), v),
            Condition::Ne(c, v) => !get(c).is_null() && !values_equal(get(c), v),
            Condition::Lt(c, v) => compare_values(get(c), v) == Some(Ordering::Less),
            Condition::Lte(c, v) => matches!(
                compare_values(get(c), v),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Condition::Gt(c, v) => compare_values(get(c), v) == Some(Ordering::Greater),
            Condition::Gte(c, v) => matches!(
                compare_values(get(c), v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Condition::IsNull(c) => get(c).is_null(),
            Condition::NotNull(c) => !get(c).is_null(),
            Condition::In(c, vs) => vs.iter().any(|v| values_equal(get(c), v)),
            Condition::Or(conds) => conds.iter().any(|cond| cond.matches(row)),
        }
    }
}

/// A conjunction of conditions. The empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Create a filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arbitrary condition.
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.and(Condition::Eq(column.to_string(), value.into()))
    }

    pub fn ne(self, column: &str, value: impl Into<Value>) -> Self {
        self.and(Condition::Ne(column.to_string(), value.into()))
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.and(Condition::Lt(column.to_string(), value.into()))
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.and(Condition::Lte(column.to_string(), value.into()))
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.and(Condition::Gt(column.to_string(), value.into()))
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.and(Condition::Gte(column.to_string(), value.into()))
    }

    pub fn is_null(self, column: &str) -> Self {
        self.and(Condition::IsNull(column.to_string()))
    }

    pub fn not_null(self, column: &str) -> Self {
        self.and(Condition::NotNull(column.to_string()))
    }

    /// Check whether a row satisfies every condition.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }

    /// Get the conditions.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

/// Sort key for a read.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// A filtered read with optional projection, ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub columns: Option<Vec<String>>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    /// Create a query over the whole table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a query with a filter.
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Only return these columns.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn order_asc(mut self, column: &str) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            descending: false,
        });
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Compare two rows by this query's ordering. Nulls sort last.
    pub fn compare_rows(&self, a: &Row, b: &Row) -> Ordering {
        for key in &self.order {
            let left = a.get(&key.column).unwrap_or(&Value::Null);
            let right = b.get(&key.column).unwrap_or(&Value::Null);
            let ord = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => return Ordering::Greater,
                (false, true) => return Ordering::Less,
                (false, false) => compare_values(left, right).unwrap_or(Ordering::Equal),
            };
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Apply the projection to a row.
    pub fn project(&self, row: Row) -> Row {
        match &self.columns {
            Some(columns) => row
                .into_iter()
                .filter(|(k, _)| columns.iter().any(|c| c == k))
                .collect(),
            None => row,
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || compare_values(a, b) == Some(Ordering::Equal)
}

/// Order two JSON values. Timestamps compare chronologically, numbers
/// numerically; mismatched types are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
