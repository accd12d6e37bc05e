//! Typed statements for lemkpg.
//!
//! Every client operation builds one of these and hands it to the
//! transpiler; nothing is formatted into SQL here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, Uuid};

use crate::error::LemkPgError;

/// A value bound to a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Decimal(Decimal),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "'{}'", v.replace('\'', "''")),
            Value::Date(v) => write!(f, "'{}'", v),
            Value::Time(v) => write!(f, "'{}'", v),
            Value::Timestamp(v) => write!(f, "'{}'", v),
            Value::TimestampTz(v) => write!(f, "'{}'", v.to_rfc3339()),
            Value::Uuid(v) => write!(f, "'{}'", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Json(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::TimestampTz(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Comparison operators allowed in WHERE and ON clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    ILike,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for Operator {
    type Err = LemkPgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "=" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "LIKE" => Ok(Operator::Like),
            "ILIKE" => Ok(Operator::ILike),
            _ => Err(LemkPgError::InvalidOperator(s.to_string())),
        }
    }
}

/// Logical connector placed before every condition but the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connector::And => write!(f, "AND"),
            Connector::Or => write!(f, "OR"),
        }
    }
}

/// A single `column op value` test.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Operator::Ne, value)
    }
}

/// A WHERE clause: conditions evaluated left to right with SQL precedence.
///
/// ```
/// use lemkpg::prelude::*;
///
/// let filter = Filter::from(Condition::eq("date", "2006-01-05"))
///     .or(Condition::eq("symbol", "A"));
/// assert_eq!(filter.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    terms: Vec<(Connector, Condition)>,
}

impl Filter {
    /// A filter that matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.terms.push((Connector::And, condition));
        self
    }

    pub fn or(mut self, condition: Condition) -> Self {
        self.terms.push((Connector::Or, condition));
        self
    }

    pub fn push(&mut self, connector: Connector, condition: Condition) {
        self.terms.push((connector, condition));
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Terms in order. The connector of the first term is never rendered.
    pub fn terms(&self) -> &[(Connector, Condition)] {
        &self.terms
    }
}

impl From<Condition> for Filter {
    fn from(condition: Condition) -> Self {
        Self {
            terms: vec![(Connector::And, condition)],
        }
    }
}

/// Join flavours accepted by `get_with_join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    /// Join spellings accepted by [`JoinKind::from_str`].
    pub const VALID: &'static [&'static str] = &[
        "INNER JOIN",
        "LEFT JOIN",
        "LEFT OUTER JOIN",
        "RIGHT JOIN",
        "RIGHT OUTER JOIN",
        "FULL JOIN",
        "FULL OUTER JOIN",
    ];

    pub fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL OUTER JOIN",
        }
    }
}

impl FromStr for JoinKind {
    type Err = LemkPgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
        match normalized.as_str() {
            "INNER JOIN" | "JOIN" | "INNER" => Ok(JoinKind::Inner),
            "LEFT JOIN" | "LEFT OUTER JOIN" | "LEFT" => Ok(JoinKind::Left),
            "RIGHT JOIN" | "RIGHT OUTER JOIN" | "RIGHT" => Ok(JoinKind::Right),
            "FULL JOIN" | "FULL OUTER JOIN" | "FULL" => Ok(JoinKind::Full),
            _ => Err(LemkPgError::InvalidJoin(s.to_string())),
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// `ON left op right`, both sides column references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnClause {
    pub left: String,
    pub op: Operator,
    pub right: String,
}

impl OnClause {
    pub fn new(left: impl Into<String>, op: Operator, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            op,
            right: right.into(),
        }
    }

    pub fn eq(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::new(left, Operator::Eq, right)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub on: OnClause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = LemkPgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortOrder::Asc),
            "DESC" => Ok(SortOrder::Desc),
            _ => Err(LemkPgError::InvalidSortOrder(s.to_string())),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "ASC"),
            SortOrder::Desc => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub order: SortOrder,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Column definition for `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// What `alter_table` does to a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterAction {
    AddColumn(String),
    DropColumn,
    AlterType(String),
    RenameTo(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Avg,
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub fn as_sql(self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Avg => "AVG",
            Aggregate::Sum => "SUM",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }
}

impl FromStr for Aggregate {
    type Err = LemkPgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(Aggregate::Count),
            "avg" => Ok(Aggregate::Avg),
            "sum" => Ok(Aggregate::Sum),
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            _ => Err(LemkPgError::InvalidValue(format!(
                "unknown aggregate '{}', expected count, avg, sum, min or max",
                s
            ))),
        }
    }
}

/// A `SELECT`, optionally joined, filtered and ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub distinct: bool,
    pub join: Option<Join>,
    pub filter: Filter,
    pub order_by: Option<OrderBy>,
}

impl Select {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            distinct: false,
            join: None,
            filter: Filter::default(),
            order_by: None,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn join(mut self, kind: JoinKind, table: impl Into<String>, on: OnClause) -> Self {
        self.join = Some(Join {
            kind,
            table: table.into(),
            on,
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order_by: Option<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }
}

/// Everything a client can send to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
        primary_key: bool,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Value>,
    },
    Select(Select),
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        filter: Filter,
    },
    AlterTable {
        table: String,
        column: String,
        action: AlterAction,
    },
    DropTable {
        table: String,
    },
    Truncate {
        table: String,
    },
    Delete {
        table: String,
        filter: Filter,
    },
    Aggregate {
        func: Aggregate,
        table: String,
        column: String,
        filter: Filter,
    },
    Raw(String),
}

impl Statement {
    /// Whether the statement yields a result set worth fetching.
    pub fn returns_rows(&self) -> bool {
        matches!(
            self,
            Statement::Select(_) | Statement::Aggregate { .. } | Statement::Raw(_)
        )
    }
}

impl From<Select> for Statement {
    fn from(select: Select) -> Self {
        Statement::Select(select)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from("A"), Value::Text("A".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(1.5f64)), Value::Float(1.5));
    }

    #[test]
    fn test_value_display_escapes_quotes() {
        assert_eq!(Value::from("it's").to_string(), "'it''s'");
        assert_eq!(Value::Null.to_string(), "NULL");
    }

    #[test]
    fn test_operator_from_str() {
        assert_eq!("<>".parse::<Operator>().unwrap(), Operator::Ne);
        assert_eq!("ilike".parse::<Operator>().unwrap(), Operator::ILike);
        assert!(matches!(
            "=~".parse::<Operator>(),
            Err(LemkPgError::InvalidOperator(_))
        ));
    }

    #[test]
    fn test_join_kind_from_str() {
        assert_eq!("INNER JOIN".parse::<JoinKind>().unwrap(), JoinKind::Inner);
        assert_eq!("full   outer join".parse::<JoinKind>().unwrap(), JoinKind::Full);
        assert_eq!("left".parse::<JoinKind>().unwrap(), JoinKind::Left);
        assert!(matches!(
            "CROSS JOIN".parse::<JoinKind>(),
            Err(LemkPgError::InvalidJoin(_))
        ));
    }

    #[test]
    fn test_filter_builder() {
        let filter = Filter::from(Condition::eq("date", "2006-01-05"))
            .or(Condition::eq("symbol", "A"));
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.terms()[1].0, Connector::Or);
        assert!(Filter::all().is_empty());
    }

    #[test]
    fn test_returns_rows() {
        assert!(Statement::from(Select::new("demo")).returns_rows());
        assert!(!Statement::Truncate { table: "demo".into() }.returns_rows());
    }
}
