//! # lemkpg
//!
//! Quick CRUD access to a single PostgreSQL database, through a blocking
//! [`Client`] or a non-blocking [`AsyncClient`]. Both take the same
//! arguments and return the same results.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use lemkpg::prelude::*;
//!
//! let db = Client::connect(ConnectConfig::new("demo_db", "pass", "postgres", "127.0.0.1"))?;
//!
//! db.create_table("demo", &[("id", "integer"), ("date", "text"), ("symbol", "text")], false)?;
//! db.insert("demo", &[1.into(), "2006-01-05".into(), "A".into()], None)?;
//!
//! let filter = Filter::from(Condition::eq("date", "2006-01-05"));
//! db.update("demo", &[("symbol", "Adc".into())], &filter)?;
//! let rows = db.get("demo", &["date", "symbol"], &filter, true, None)?;
//! ```
//!
//! ## Statements
//!
//! | Operation        | SQL                                  |
//! |------------------|--------------------------------------|
//! | `create_table`   | `CREATE TABLE IF NOT EXISTS`         |
//! | `insert`         | `INSERT INTO ... VALUES ($1, ...)`   |
//! | `get` / `get_all`| `SELECT [DISTINCT] ... [ORDER BY]`   |
//! | `update`         | `UPDATE ... SET ... WHERE`           |
//! | `*_join`         | `SELECT ... JOIN ... ON`             |
//! | `delete_records` | `DELETE FROM ... WHERE`              |
//! | `count` .. `max` | `SELECT COUNT(col) ...`              |
//!
//! Typed values are sent as bind parameters. Text is written as an escaped
//! string constant, so `"2006-01-05"` compares against a `date` column the
//! same way a typed date does. Table and column names must be plain
//! identifiers.

pub mod ast;
pub mod blocking;
pub mod config;
pub mod engine;
pub mod error;
pub mod parser;
pub mod transpiler;

pub use blocking::Client;
pub use config::ConnectConfig;
pub use engine::{AsyncClient, Record};
pub use error::{LemkPgError, LemkPgResult};

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::blocking::Client;
    pub use crate::config::{ConnectConfig, PoolConfig};
    pub use crate::engine::{AsyncClient, Record};
    pub use crate::error::*;
    pub use crate::parser::{parse_filter, parse_value};
    pub use crate::transpiler::{SqlQuery, ToSql};
    pub use chrono::NaiveDate;
}
