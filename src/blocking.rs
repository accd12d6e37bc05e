//! Blocking client.
//!
//! [`Client`] mirrors [`AsyncClient`] call for call. It owns a private
//! current-thread Tokio runtime and blocks on it for every operation, so it
//! must not be used from inside an async context.
//!
//! ```rust,ignore
//! use lemkpg::prelude::*;
//!
//! let db = Client::connect(ConnectConfig::new("demo_db", "pass", "postgres", "127.0.0.1"))?;
//! db.create_table("demo", &[("id", "integer"), ("date", "date"), ("symbol", "text")], false)?;
//! db.insert("demo", &[1.into(), NaiveDate::from_ymd_opt(2006, 1, 5).into(), "A".into()], None)?;
//! let rows = db.get_all("demo", Some(OrderBy::desc("date")))?;
//! ```

use tokio::runtime::{Builder, Runtime};

use crate::ast::*;
use crate::config::ConnectConfig;
use crate::engine::{AsyncClient, Record};
use crate::error::LemkPgResult;

pub struct Client {
    // Declared first so the pool is dropped while the runtime still exists.
    inner: AsyncClient,
    runtime: Runtime,
}

impl Client {
    /// Start a runtime and open the pool on it.
    pub fn connect(config: ConnectConfig) -> LemkPgResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let inner = runtime.block_on(AsyncClient::connect(config))?;
        Ok(Self { inner, runtime })
    }

    pub fn config(&self) -> &ConnectConfig {
        self.inner.config()
    }

    /// The async client this one drives.
    pub fn as_async(&self) -> &AsyncClient {
        &self.inner
    }

    pub fn close(&self) {
        self.runtime.block_on(self.inner.close());
    }

    pub fn fetch(&self, statement: &Statement) -> LemkPgResult<Vec<Record>> {
        self.runtime.block_on(self.inner.fetch(statement))
    }

    pub fn execute(&self, statement: &Statement) -> LemkPgResult<u64> {
        self.runtime.block_on(self.inner.execute(statement))
    }

    pub fn create_table(&self, table: &str, fields: &[(&str, &str)], primary_key: bool) -> LemkPgResult<()> {
        self.runtime
            .block_on(self.inner.create_table(table, fields, primary_key))
    }

    pub fn insert(&self, table: &str, values: &[Value], columns: Option<&[&str]>) -> LemkPgResult<u64> {
        self.runtime.block_on(self.inner.insert(table, values, columns))
    }

    pub fn get_all(&self, table: &str, order_by: Option<OrderBy>) -> LemkPgResult<Vec<Record>> {
        self.runtime.block_on(self.inner.get_all(table, order_by))
    }

    pub fn get(
        &self,
        table: &str,
        fields: &[&str],
        filter: &Filter,
        distinct: bool,
        order_by: Option<OrderBy>,
    ) -> LemkPgResult<Vec<Record>> {
        self.runtime
            .block_on(self.inner.get(table, fields, filter, distinct, order_by))
    }

    pub fn update(&self, table: &str, fields: &[(&str, Value)], filter: &Filter) -> LemkPgResult<u64> {
        self.runtime.block_on(self.inner.update(table, fields, filter))
    }

    pub fn alter_table(&self, table: &str, column: &str, action: AlterAction) -> LemkPgResult<()> {
        self.runtime
            .block_on(self.inner.alter_table(table, column, action))
    }

    pub fn raw_query(&self, sql: &str) -> LemkPgResult<Vec<Record>> {
        self.runtime.block_on(self.inner.raw_query(sql))
    }

    pub fn get_with_join(
        &self,
        table: &str,
        join_table: &str,
        kind: JoinKind,
        fields: &[&str],
        on: &OnClause,
        filter: &Filter,
    ) -> LemkPgResult<Vec<Record>> {
        self.runtime.block_on(
            self.inner
                .get_with_join(table, join_table, kind, fields, on, filter),
        )
    }

    pub fn inner_join(
        &self,
        table: &str,
        join_table: &str,
        on: &OnClause,
        filter: &Filter,
        fields: Option<&[&str]>,
    ) -> LemkPgResult<Vec<Record>> {
        self.runtime
            .block_on(self.inner.inner_join(table, join_table, on, filter, fields))
    }

    pub fn left_join(
        &self,
        table: &str,
        join_table: &str,
        on: &OnClause,
        filter: &Filter,
        fields: Option<&[&str]>,
    ) -> LemkPgResult<Vec<Record>> {
        self.runtime
            .block_on(self.inner.left_join(table, join_table, on, filter, fields))
    }

    pub fn right_join(
        &self,
        table: &str,
        join_table: &str,
        on: &OnClause,
        filter: &Filter,
        fields: Option<&[&str]>,
    ) -> LemkPgResult<Vec<Record>> {
        self.runtime
            .block_on(self.inner.right_join(table, join_table, on, filter, fields))
    }

    pub fn full_join(
        &self,
        table: &str,
        join_table: &str,
        on: &OnClause,
        filter: &Filter,
        fields: Option<&[&str]>,
    ) -> LemkPgResult<Vec<Record>> {
        self.runtime
            .block_on(self.inner.full_join(table, join_table, on, filter, fields))
    }

    pub fn delete_table(&self, table: &str) -> LemkPgResult<()> {
        self.runtime.block_on(self.inner.delete_table(table))
    }

    pub fn clear_table(&self, table: &str) -> LemkPgResult<()> {
        self.runtime.block_on(self.inner.clear_table(table))
    }

    pub fn delete_records(&self, table: &str, filter: &Filter) -> LemkPgResult<u64> {
        self.runtime.block_on(self.inner.delete_records(table, filter))
    }

    pub fn aggregate(
        &self,
        func: Aggregate,
        table: &str,
        column: &str,
        filter: &Filter,
    ) -> LemkPgResult<serde_json::Value> {
        self.runtime
            .block_on(self.inner.aggregate(func, table, column, filter))
    }

    pub fn count(&self, table: &str, column: &str, filter: &Filter) -> LemkPgResult<serde_json::Value> {
        self.aggregate(Aggregate::Count, table, column, filter)
    }

    pub fn avg(&self, table: &str, column: &str, filter: &Filter) -> LemkPgResult<serde_json::Value> {
        self.aggregate(Aggregate::Avg, table, column, filter)
    }

    pub fn sum(&self, table: &str, column: &str, filter: &Filter) -> LemkPgResult<serde_json::Value> {
        self.aggregate(Aggregate::Sum, table, column, filter)
    }

    pub fn min(&self, table: &str, column: &str, filter: &Filter) -> LemkPgResult<serde_json::Value> {
        self.aggregate(Aggregate::Min, table, column, filter)
    }

    pub fn max(&self, table: &str, column: &str, filter: &Filter) -> LemkPgResult<serde_json::Value> {
        self.aggregate(Aggregate::Max, table, column, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LemkPgError;
    use std::time::Duration;

    #[test]
    fn test_connect_refused() {
        let config = ConnectConfig::new("demo_db", "pass", "postgres", "127.0.0.1")
            .with_port(1)
            .with_acquire_timeout(Duration::from_secs(2));
        let result = Client::connect(config);
        assert!(matches!(result, Err(LemkPgError::Connection(_))));
    }
}
