//! Async database client for lemkpg.
//!
//! [`AsyncClient`] owns a sqlx PostgreSQL pool and runs statements built
//! from the typed AST. Every operation renders its statement through the
//! transpiler first, so invalid input fails before any I/O.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, PgValueFormat};
use sqlx::query::Query;
use sqlx::types::{Json, Uuid};
use sqlx::{Column, Decode, Executor, Postgres, Row, Type, TypeInfo, ValueRef};

use crate::ast::*;
use crate::config::ConnectConfig;
use crate::error::{LemkPgError, LemkPgResult};
use crate::transpiler::{SqlQuery, ToSql};

/// One result row, columns in select order.
pub type Record = IndexMap<String, serde_json::Value>;

/// Non-blocking client. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct AsyncClient {
    pool: PgPool,
    config: ConnectConfig,
}

impl AsyncClient {
    /// Open the pool and check that a connection can be made.
    ///
    /// ```rust,ignore
    /// let config = ConnectConfig::new("demo_db", "pass", "postgres", "127.0.0.1");
    /// let db = AsyncClient::connect(config).await?;
    /// ```
    pub async fn connect(config: ConnectConfig) -> LemkPgResult<Self> {
        tracing::info!(dsn = %config.redacted_dsn(), "connecting");

        let pool = PgPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .acquire_timeout(config.pool.acquire_timeout())
            .connect_with(config.connect_options())
            .await
            .map_err(|e| LemkPgError::Connection(e.to_string()))?;

        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        tracing::info!(dsn = %self.config.redacted_dsn(), "closing pool");
        self.pool.close().await;
    }

    /// Run a statement and collect its rows.
    pub async fn fetch(&self, statement: &Statement) -> LemkPgResult<Vec<Record>> {
        let query = statement.to_sql()?;
        tracing::debug!(sql = %query.sql, params = query.params.len(), "fetch");

        let rows = match statement {
            // Raw SQL takes the simple query protocol so scripts may hold
            // several statements.
            Statement::Raw(sql) => self.pool.fetch_all(sql.as_str()).await,
            _ => bind_all(&query).fetch_all(&self.pool).await,
        }
        .map_err(|e| LemkPgError::Execution(e.to_string()))?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Run a statement and return the number of affected rows.
    pub async fn execute(&self, statement: &Statement) -> LemkPgResult<u64> {
        let query = statement.to_sql()?;
        tracing::debug!(sql = %query.sql, params = query.params.len(), "execute");

        let result = match statement {
            Statement::Raw(sql) => self.pool.execute(sql.as_str()).await,
            _ => bind_all(&query).execute(&self.pool).await,
        }
        .map_err(|e| LemkPgError::Execution(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// `CREATE TABLE IF NOT EXISTS`, with an `id SERIAL PRIMARY KEY`
    /// column first when `primary_key` is set.
    ///
    /// ```rust,ignore
    /// db.create_table("demo", &[("id", "integer"), ("date", "text"), ("symbol", "text")], false).await?;
    /// ```
    pub async fn create_table(
        &self,
        table: &str,
        fields: &[(&str, &str)],
        primary_key: bool,
    ) -> LemkPgResult<()> {
        let statement = Statement::CreateTable {
            table: table.to_string(),
            columns: fields
                .iter()
                .map(|(name, data_type)| ColumnDef::new(*name, *data_type))
                .collect(),
            primary_key,
        };
        self.execute(&statement).await.map(|_| ())
    }

    /// Insert one row. Without `columns` the values follow table order.
    pub async fn insert(
        &self,
        table: &str,
        values: &[Value],
        columns: Option<&[&str]>,
    ) -> LemkPgResult<u64> {
        let statement = Statement::Insert {
            table: table.to_string(),
            columns: owned(columns.unwrap_or_default()),
            values: values.to_vec(),
        };
        self.execute(&statement).await
    }

    /// `SELECT *`, optionally ordered.
    pub async fn get_all(&self, table: &str, order_by: Option<OrderBy>) -> LemkPgResult<Vec<Record>> {
        let select = Select::new(table).order_by(order_by);
        self.fetch(&select.into()).await
    }

    /// Select `fields` (all columns when empty) matching `filter`.
    ///
    /// ```rust,ignore
    /// let filter = Filter::from(Condition::eq("date", NaiveDate::from_ymd_opt(2006, 1, 5)));
    /// let rows = db.get("demo", &["date", "symbol"], &filter, true, None).await?;
    /// ```
    pub async fn get(
        &self,
        table: &str,
        fields: &[&str],
        filter: &Filter,
        distinct: bool,
        order_by: Option<OrderBy>,
    ) -> LemkPgResult<Vec<Record>> {
        let select = Select::new(table)
            .columns(fields.iter().copied())
            .distinct(distinct)
            .filter(filter.clone())
            .order_by(order_by);
        self.fetch(&select.into()).await
    }

    /// Set columns to new values on matching rows.
    pub async fn update(
        &self,
        table: &str,
        fields: &[(&str, Value)],
        filter: &Filter,
    ) -> LemkPgResult<u64> {
        let statement = Statement::Update {
            table: table.to_string(),
            assignments: fields
                .iter()
                .map(|(column, value)| (column.to_string(), value.clone()))
                .collect(),
            filter: filter.clone(),
        };
        self.execute(&statement).await
    }

    pub async fn alter_table(&self, table: &str, column: &str, action: AlterAction) -> LemkPgResult<()> {
        let statement = Statement::AlterTable {
            table: table.to_string(),
            column: column.to_string(),
            action,
        };
        self.execute(&statement).await.map(|_| ())
    }

    /// Execute raw SQL (escape hatch). The text may hold several
    /// `;`-separated statements; statements without a result set yield no
    /// records.
    pub async fn raw_query(&self, sql: &str) -> LemkPgResult<Vec<Record>> {
        self.fetch(&Statement::Raw(sql.to_string())).await
    }

    /// Select from `table` joined with `join_table`.
    ///
    /// ```rust,ignore
    /// let rows = db
    ///     .get_with_join(
    ///         "demo",
    ///         "datatable",
    ///         "INNER JOIN".parse()?,
    ///         &["*"],
    ///         &OnClause::eq("demo.trans", "datatable.trans"),
    ///         &Filter::all(),
    ///     )
    ///     .await?;
    /// ```
    pub async fn get_with_join(
        &self,
        table: &str,
        join_table: &str,
        kind: JoinKind,
        fields: &[&str],
        on: &OnClause,
        filter: &Filter,
    ) -> LemkPgResult<Vec<Record>> {
        let select = Select::new(table)
            .columns(fields.iter().copied())
            .join(kind, join_table, on.clone())
            .filter(filter.clone());
        self.fetch(&select.into()).await
    }

    pub async fn inner_join(
        &self,
        table: &str,
        join_table: &str,
        on: &OnClause,
        filter: &Filter,
        fields: Option<&[&str]>,
    ) -> LemkPgResult<Vec<Record>> {
        self.get_with_join(table, join_table, JoinKind::Inner, fields.unwrap_or_default(), on, filter)
            .await
    }

    pub async fn left_join(
        &self,
        table: &str,
        join_table: &str,
        on: &OnClause,
        filter: &Filter,
        fields: Option<&[&str]>,
    ) -> LemkPgResult<Vec<Record>> {
        self.get_with_join(table, join_table, JoinKind::Left, fields.unwrap_or_default(), on, filter)
            .await
    }

    pub async fn right_join(
        &self,
        table: &str,
        join_table: &str,
        on: &OnClause,
        filter: &Filter,
        fields: Option<&[&str]>,
    ) -> LemkPgResult<Vec<Record>> {
        self.get_with_join(table, join_table, JoinKind::Right, fields.unwrap_or_default(), on, filter)
            .await
    }

    pub async fn full_join(
        &self,
        table: &str,
        join_table: &str,
        on: &OnClause,
        filter: &Filter,
        fields: Option<&[&str]>,
    ) -> LemkPgResult<Vec<Record>> {
        self.get_with_join(table, join_table, JoinKind::Full, fields.unwrap_or_default(), on, filter)
            .await
    }

    /// `DROP TABLE IF EXISTS`.
    pub async fn delete_table(&self, table: &str) -> LemkPgResult<()> {
        let statement = Statement::DropTable {
            table: table.to_string(),
        };
        self.execute(&statement).await.map(|_| ())
    }

    /// `TRUNCATE TABLE`.
    pub async fn clear_table(&self, table: &str) -> LemkPgResult<()> {
        let statement = Statement::Truncate {
            table: table.to_string(),
        };
        self.execute(&statement).await.map(|_| ())
    }

    /// Delete matching rows; every row when the filter is empty.
    pub async fn delete_records(&self, table: &str, filter: &Filter) -> LemkPgResult<u64> {
        let statement = Statement::Delete {
            table: table.to_string(),
            filter: filter.clone(),
        };
        self.execute(&statement).await
    }

    /// Run an aggregate and return its single value.
    pub async fn aggregate(
        &self,
        func: Aggregate,
        table: &str,
        column: &str,
        filter: &Filter,
    ) -> LemkPgResult<serde_json::Value> {
        let statement = Statement::Aggregate {
            func,
            table: table.to_string(),
            column: column.to_string(),
            filter: filter.clone(),
        };
        let rows = self.fetch(&statement).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_values().next())
            .unwrap_or(serde_json::Value::Null))
    }

    pub async fn count(&self, table: &str, column: &str, filter: &Filter) -> LemkPgResult<serde_json::Value> {
        self.aggregate(Aggregate::Count, table, column, filter).await
    }

    pub async fn avg(&self, table: &str, column: &str, filter: &Filter) -> LemkPgResult<serde_json::Value> {
        self.aggregate(Aggregate::Avg, table, column, filter).await
    }

    pub async fn sum(&self, table: &str, column: &str, filter: &Filter) -> LemkPgResult<serde_json::Value> {
        self.aggregate(Aggregate::Sum, table, column, filter).await
    }

    pub async fn min(&self, table: &str, column: &str, filter: &Filter) -> LemkPgResult<serde_json::Value> {
        self.aggregate(Aggregate::Min, table, column, filter).await
    }

    pub async fn max(&self, table: &str, column: &str, filter: &Filter) -> LemkPgResult<serde_json::Value> {
        self.aggregate(Aggregate::Max, table, column, filter).await
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn bind_all(query: &SqlQuery) -> Query<'_, Postgres, PgArguments> {
    query
        .params
        .iter()
        .fold(sqlx::query(&query.sql), bind_value)
}

fn bind_value<'q>(query: Query<'q, Postgres, PgArguments>, value: &'q Value) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
        Value::TimestampTz(v) => query.bind(*v),
        Value::Uuid(v) => query.bind(*v),
        Value::Decimal(v) => query.bind(*v),
        Value::Json(v) => query.bind(Json(v)),
    }
}

/// Convert a PgRow to a Record.
fn row_to_record(row: &PgRow) -> Record {
    row.columns()
        .iter()
        .map(|column| {
            let value = decode_column(row, column.ordinal(), column.type_info().name());
            (column.name().to_string(), value)
        })
        .collect()
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> serde_json::Value {
    use serde_json::Value as JsonValue;

    let decoded = match type_name {
        "BOOL" => get::<bool>(row, index).map(|v| v.map(JsonValue::Bool)),
        "INT2" => get::<i16>(row, index).map(|v| v.map(JsonValue::from)),
        "INT4" => get::<i32>(row, index).map(|v| v.map(JsonValue::from)),
        "INT8" => get::<i64>(row, index).map(|v| v.map(JsonValue::from)),
        "FLOAT4" => get::<f32>(row, index).map(|v| v.map(|v| float_to_json(v as f64))),
        "FLOAT8" => get::<f64>(row, index).map(|v| v.map(float_to_json)),
        "NUMERIC" => numeric(row, index).map(|v| v.as_deref().map(numeric_to_json)),
        "DATE" => get::<NaiveDate>(row, index).map(|v| v.map(|v| JsonValue::String(v.to_string()))),
        "TIME" => get::<NaiveTime>(row, index).map(|v| v.map(|v| JsonValue::String(v.to_string()))),
        "TIMESTAMP" => {
            get::<NaiveDateTime>(row, index).map(|v| v.map(|v| JsonValue::String(v.to_string())))
        }
        "TIMESTAMPTZ" => {
            get::<DateTime<Utc>>(row, index).map(|v| v.map(|v| JsonValue::String(v.to_rfc3339())))
        }
        "UUID" => get::<Uuid>(row, index).map(|v| v.map(|v| JsonValue::String(v.to_string()))),
        "JSON" | "JSONB" => get::<JsonValue>(row, index),
        _ => get::<String>(row, index).map(|v| v.map(JsonValue::String)),
    };

    match decoded {
        Ok(value) => value.unwrap_or(JsonValue::Null),
        Err(e) => {
            tracing::warn!(column = index, type_name, error = %e, "cannot decode column");
            JsonValue::Null
        }
    }
}

/// Decode a nullable column.
fn get<'r, T>(row: &'r PgRow, index: usize) -> Result<Option<T>, sqlx::Error>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index)
}

/// NUMERIC as its exact decimal text, read from the raw value.
fn numeric(row: &PgRow, index: usize) -> Result<Option<String>, sqlx::Error> {
    let value = row.try_get_raw(index)?;
    if value.is_null() {
        return Ok(None);
    }
    let text = match value.format() {
        PgValueFormat::Text => value.as_str().map(str::to_string),
        PgValueFormat::Binary => value
            .as_bytes()
            .and_then(|bytes| numeric_text(bytes).map_err(Into::into)),
    };
    text.map(Some).map_err(sqlx::Error::Decode)
}

/// Render the binary NUMERIC wire form: ndigits, weight, sign and dscale
/// headers followed by base-10000 digits, most significant first.
fn numeric_text(bytes: &[u8]) -> Result<String, String> {
    let word = |i: usize| {
        bytes
            .get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "NUMERIC value truncated".to_string())
    };

    let ndigits = word(0)? as usize;
    let weight = word(1)? as i16 as i32;
    let sign = word(2)?;
    let dscale = word(3)? as usize;

    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        other => return Err(format!("unknown NUMERIC sign {:#06x}", other)),
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<_>, _>>()?;
    let digit = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit(0).to_string());
        for i in 1..=weight {
            text.push_str(&format!("{:04}", digit(i)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

/// A JSON number when the decimal fits one exactly, its text otherwise.
fn numeric_to_json(text: &str) -> serde_json::Value {
    if !text.contains('.') {
        if let Ok(v) = text.parse::<i64>() {
            return v.into();
        }
        if let Ok(v) = text.parse::<u64>() {
            return v.into();
        }
        return serde_json::Value::String(text.to_string());
    }

    let trimmed = text.trim_end_matches('0');
    let significant = trimmed
        .chars()
        .filter(char::is_ascii_digit)
        .skip_while(|c| *c == '0')
        .count();
    // f64 holds any decimal of up to 15 significant digits exactly
    match trimmed.parse::<f64>() {
        Ok(v) if significant <= 15 && v.is_finite() => float_to_json(v),
        _ => serde_json::Value::String(text.to_string()),
    }
}

fn float_to_json(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_float_to_json() {
        assert_eq!(float_to_json(1.5), serde_json::json!(1.5));
        assert_eq!(float_to_json(f64::NAN), serde_json::Value::Null);
    }

    /// Binary NUMERIC: header words then base-10000 digits.
    fn numeric_bytes(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&weight.to_be_bytes());
        bytes.extend_from_slice(&sign.to_be_bytes());
        bytes.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            bytes.extend_from_slice(&d.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn test_numeric_text() {
        assert_eq!(numeric_text(&numeric_bytes(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(numeric_text(&numeric_bytes(0, 0, 2, &[])).unwrap(), "0.00");
        assert_eq!(numeric_text(&numeric_bytes(0, 0x4000, 2, &[1, 5000])).unwrap(), "-1.50");
        assert_eq!(numeric_text(&numeric_bytes(1, 0, 0, &[12, 3456])).unwrap(), "123456");
        // 1e29, wider than any fixed 96-bit decimal
        assert_eq!(
            numeric_text(&numeric_bytes(7, 0, 0, &[10])).unwrap(),
            format!("1{}", "0".repeat(29))
        );
        assert_eq!(numeric_text(&numeric_bytes(-2, 0, 5, &[1000])).unwrap(), "0.00001");
        assert_eq!(numeric_text(&numeric_bytes(0, 0xC000, 0, &[])).unwrap(), "NaN");
        assert_eq!(numeric_text(&numeric_bytes(0, 0xD000, 0, &[])).unwrap(), "Infinity");
        assert_eq!(numeric_text(&numeric_bytes(0, 0xF000, 0, &[])).unwrap(), "-Infinity");
    }

    #[test]
    fn test_numeric_text_rejects_truncated_input() {
        assert!(numeric_text(&[0, 1]).is_err());
        let mut bytes = numeric_bytes(0, 0, 0, &[1, 2]);
        bytes.truncate(10);
        assert!(numeric_text(&bytes).is_err());
        assert!(numeric_text(&numeric_bytes(0, 0x1234, 0, &[1])).is_err());
    }

    #[test]
    fn test_numeric_to_json() {
        use serde_json::json;

        assert_eq!(numeric_to_json("40"), json!(40));
        assert_eq!(numeric_to_json("-7"), json!(-7));
        assert_eq!(numeric_to_json("18446744073709551615"), json!(u64::MAX));
        assert_eq!(numeric_to_json("20.0000000000000000"), json!(20.0));
        assert_eq!(numeric_to_json("1.50"), json!(1.5));
        assert_eq!(numeric_to_json("0.00"), json!(0.0));

        // not representable as a JSON number without loss
        let wide = "12345678901234567890123456789012";
        assert_eq!(numeric_to_json(wide), json!(wide));
        assert_eq!(numeric_to_json("0.1234567890123456789"), json!("0.1234567890123456789"));
        assert_eq!(numeric_to_json("NaN"), json!("NaN"));
        assert_eq!(numeric_to_json("-Infinity"), json!("-Infinity"));
    }

    #[test]
    fn test_owned() {
        assert_eq!(owned(&["a", "b"]), vec!["a".to_string(), "b".to_string()]);
        assert!(owned(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let config = ConnectConfig::new("demo_db", "pass", "postgres", "127.0.0.1")
            .with_port(1)
            .with_acquire_timeout(Duration::from_secs(2));
        let result = AsyncClient::connect(config).await;
        assert!(matches!(result, Err(LemkPgError::Connection(_))));
    }

    #[tokio::test]
    async fn test_invalid_statement_fails_before_io() {
        // A lazy pool never dials out unless a statement reaches the driver.
        let config = ConnectConfig::new("demo_db", "pass", "postgres", "127.0.0.1").with_port(1);
        let client = AsyncClient {
            pool: PgPoolOptions::new().connect_lazy_with(config.connect_options()),
            config,
        };
        let err = client.get_all("demo; DROP TABLE demo", None).await.unwrap_err();
        assert!(matches!(err, LemkPgError::InvalidIdentifier(_)));

        let err = client.create_table("demo", &[], false).await.unwrap_err();
        assert!(matches!(err, LemkPgError::EmptyStatement(_)));
    }
}
