//! SQL transpiler for lemkpg statements.
//!
//! Converts [`Statement`]s into SQL text with `$n` placeholders plus the
//! values to bind. Identifiers are checked, never quoted or escaped.
//! `NULL` and text values are written inline: text as an escaped, untyped
//! string constant that the server coerces to the column's type.

use std::fmt;

use crate::ast::*;
use crate::error::{LemkPgError, LemkPgResult};
use crate::parser::{is_column_ref, is_identifier};

/// Rendered statement, ready for the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl fmt::Display for SqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Trait for converting statements to SQL.
pub trait ToSql {
    /// Render this node, validating every identifier it names.
    fn to_sql(&self) -> LemkPgResult<SqlQuery>;
}

impl ToSql for Statement {
    fn to_sql(&self) -> LemkPgResult<SqlQuery> {
        let mut w = SqlWriter::default();
        match self {
            Statement::CreateTable {
                table,
                columns,
                primary_key,
            } => w.create_table(table, columns, *primary_key)?,
            Statement::Insert {
                table,
                columns,
                values,
            } => w.insert(table, columns, values)?,
            Statement::Select(select) => w.select(select)?,
            Statement::Update {
                table,
                assignments,
                filter,
            } => w.update(table, assignments, filter)?,
            Statement::AlterTable {
                table,
                column,
                action,
            } => w.alter_table(table, column, action)?,
            Statement::DropTable { table } => {
                w.push("DROP TABLE IF EXISTS ");
                w.ident(table)?;
            }
            Statement::Truncate { table } => {
                w.push("TRUNCATE TABLE ");
                w.ident(table)?;
            }
            Statement::Delete { table, filter } => {
                w.push("DELETE FROM ");
                w.ident(table)?;
                w.where_clause(filter)?;
            }
            Statement::Aggregate {
                func,
                table,
                column,
                filter,
            } => w.aggregate(*func, table, column, filter)?,
            Statement::Raw(sql) => w.push(sql),
        }
        Ok(w.finish())
    }
}

impl ToSql for Select {
    fn to_sql(&self) -> LemkPgResult<SqlQuery> {
        let mut w = SqlWriter::default();
        w.select(self)?;
        Ok(w.finish())
    }
}

#[derive(Default)]
struct SqlWriter {
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    fn finish(self) -> SqlQuery {
        SqlQuery {
            sql: self.sql,
            params: self.params,
        }
    }

    fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn ident(&mut self, name: &str) -> LemkPgResult<()> {
        if !is_identifier(name) {
            return Err(LemkPgError::InvalidIdentifier(name.to_string()));
        }
        self.sql.push_str(name);
        Ok(())
    }

    fn ident_list<S: AsRef<str>>(&mut self, names: &[S]) -> LemkPgResult<()> {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(name.as_ref())?;
        }
        Ok(())
    }

    /// Bind a value. `NULL` and text are written inline instead.
    fn param(&mut self, value: &Value) -> LemkPgResult<()> {
        match value {
            Value::Null => self.push("NULL"),
            Value::Text(text) => self.text_literal(text)?,
            _ => {
                self.params.push(value.clone());
                self.sql.push('$');
                self.sql.push_str(&self.params.len().to_string());
            }
        }
        Ok(())
    }

    /// Text goes in as an untyped string constant so the server resolves it
    /// against the column it meets (`date = '2006-01-05'`, `qty = '1'`).
    /// Backslashes switch to the `E'...'` form, where they are escaped too.
    fn text_literal(&mut self, text: &str) -> LemkPgResult<()> {
        if text.contains('\0') {
            return Err(LemkPgError::InvalidValue(
                "text cannot contain NUL characters".to_string(),
            ));
        }
        if text.contains('\\') {
            self.sql.push('E');
        }
        self.sql.push('\'');
        for c in text.chars() {
            match c {
                '\'' => self.push("''"),
                '\\' => self.push("\\\\"),
                c => self.sql.push(c),
            }
        }
        self.sql.push('\'');
        Ok(())
    }

    fn data_type(&mut self, data_type: &str) -> LemkPgResult<()> {
        let data_type = data_type.trim();
        let mut depth = 0usize;
        let mut valid = data_type.starts_with(|c: char| c.is_ascii_alphabetic());
        for c in data_type.chars() {
            valid &= match c {
                '(' => {
                    depth += 1;
                    true
                }
                ')' => match depth.checked_sub(1) {
                    Some(d) => {
                        depth = d;
                        true
                    }
                    None => false,
                },
                // a comma outside parentheses would start a new column
                ',' => depth > 0,
                c => c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '[' | ']'),
            };
        }
        if !valid || depth != 0 {
            return Err(LemkPgError::InvalidType(data_type.to_string()));
        }
        self.push(data_type);
        Ok(())
    }

    fn create_table(&mut self, table: &str, columns: &[ColumnDef], primary_key: bool) -> LemkPgResult<()> {
        if columns.is_empty() && !primary_key {
            return Err(LemkPgError::EmptyStatement("CREATE TABLE needs at least one column"));
        }
        self.push("CREATE TABLE IF NOT EXISTS ");
        self.ident(table)?;
        self.push(" (");
        if primary_key {
            self.push("id SERIAL PRIMARY KEY");
        }
        for (i, column) in columns.iter().enumerate() {
            if i > 0 || primary_key {
                self.push(", ");
            }
            self.ident(&column.name)?;
            self.push(" ");
            self.data_type(&column.data_type)?;
        }
        self.push(")");
        Ok(())
    }

    fn insert(&mut self, table: &str, columns: &[String], values: &[Value]) -> LemkPgResult<()> {
        if values.is_empty() {
            return Err(LemkPgError::EmptyStatement("INSERT needs at least one value"));
        }
        if !columns.is_empty() && columns.len() != values.len() {
            return Err(LemkPgError::InvalidValue(format!(
                "{} columns given for {} values",
                columns.len(),
                values.len()
            )));
        }
        self.push("INSERT INTO ");
        self.ident(table)?;
        if !columns.is_empty() {
            self.push(" (");
            self.ident_list(columns)?;
            self.push(")");
        }
        self.push(" VALUES (");
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.param(value)?;
        }
        self.push(")");
        Ok(())
    }

    fn select(&mut self, select: &Select) -> LemkPgResult<()> {
        self.push("SELECT ");
        if select.distinct {
            self.push("DISTINCT ");
        }
        if select.columns.is_empty() {
            self.push("*");
        } else {
            for (i, column) in select.columns.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                if !is_column_ref(column) {
                    return Err(LemkPgError::InvalidIdentifier(column.clone()));
                }
                self.push(column);
            }
        }
        self.push(" FROM ");
        self.ident(&select.table)?;

        if let Some(join) = &select.join {
            self.push(" ");
            self.push(join.kind.as_sql());
            self.push(" ");
            self.ident(&join.table)?;
            self.push(" ON ");
            self.ident(&join.on.left)?;
            self.push(" ");
            self.push(join.on.op.as_sql());
            self.push(" ");
            self.ident(&join.on.right)?;
        }

        self.where_clause(&select.filter)?;

        if let Some(order) = &select.order_by {
            self.push(" ORDER BY ");
            self.ident(&order.column)?;
            self.push(" ");
            self.push(&order.order.to_string());
        }
        Ok(())
    }

    fn update(&mut self, table: &str, assignments: &[(String, Value)], filter: &Filter) -> LemkPgResult<()> {
        if assignments.is_empty() {
            return Err(LemkPgError::EmptyStatement("UPDATE needs at least one column to set"));
        }
        self.push("UPDATE ");
        self.ident(table)?;
        self.push(" SET ");
        for (i, (column, value)) in assignments.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(column)?;
            self.push(" = ");
            self.param(value)?;
        }
        self.where_clause(filter)
    }

    fn alter_table(&mut self, table: &str, column: &str, action: &AlterAction) -> LemkPgResult<()> {
        self.push("ALTER TABLE ");
        self.ident(table)?;
        match action {
            AlterAction::AddColumn(data_type) => {
                self.push(" ADD COLUMN ");
                self.ident(column)?;
                self.push(" ");
                self.data_type(data_type)?;
            }
            AlterAction::DropColumn => {
                self.push(" DROP COLUMN ");
                self.ident(column)?;
            }
            AlterAction::AlterType(data_type) => {
                self.push(" ALTER COLUMN ");
                self.ident(column)?;
                self.push(" TYPE ");
                self.data_type(data_type)?;
            }
            AlterAction::RenameTo(new_name) => {
                self.push(" RENAME COLUMN ");
                self.ident(column)?;
                self.push(" TO ");
                self.ident(new_name)?;
            }
        }
        Ok(())
    }

    fn aggregate(&mut self, func: Aggregate, table: &str, column: &str, filter: &Filter) -> LemkPgResult<()> {
        self.push("SELECT ");
        self.push(func.as_sql());
        self.push("(");
        if column == "*" && func == Aggregate::Count {
            self.push("*");
        } else {
            self.ident(column)?;
        }
        self.push(") FROM ");
        self.ident(table)?;
        self.where_clause(filter)
    }

    fn where_clause(&mut self, filter: &Filter) -> LemkPgResult<()> {
        if filter.is_empty() {
            return Ok(());
        }
        self.push(" WHERE ");
        for (i, (connector, condition)) in filter.terms().iter().enumerate() {
            if i > 0 {
                self.push(" ");
                self.push(&connector.to_string());
                self.push(" ");
            }
            self.condition(condition)?;
        }
        Ok(())
    }

    fn condition(&mut self, condition: &Condition) -> LemkPgResult<()> {
        self.ident(&condition.column)?;
        if condition.value.is_null() {
            return match condition.op {
                Operator::Eq => {
                    self.push(" IS NULL");
                    Ok(())
                }
                Operator::Ne => {
                    self.push(" IS NOT NULL");
                    Ok(())
                }
                op => Err(LemkPgError::InvalidValue(format!(
                    "NULL cannot be compared with {}",
                    op
                ))),
            };
        }
        self.push(" ");
        self.push(condition.op.as_sql());
        self.push(" ");
        self.param(&condition.value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sql(stmt: impl Into<Statement>) -> String {
        stmt.into().to_sql().unwrap().sql
    }

    #[test]
    fn test_create_table() {
        let stmt = Statement::CreateTable {
            table: "demo".into(),
            columns: vec![
                ColumnDef::new("date", "text"),
                ColumnDef::new("price", "numeric(10,2)"),
            ],
            primary_key: false,
        };
        assert_eq!(sql(stmt), "CREATE TABLE IF NOT EXISTS demo (date text, price numeric(10,2))");
    }

    #[test]
    fn test_create_table_with_primary_key() {
        let stmt = Statement::CreateTable {
            table: "demo".into(),
            columns: vec![ColumnDef::new("symbol", "varchar(8)")],
            primary_key: true,
        };
        assert_eq!(
            sql(stmt),
            "CREATE TABLE IF NOT EXISTS demo (id SERIAL PRIMARY KEY, symbol varchar(8))"
        );
    }

    #[test]
    fn test_create_table_rejects_bad_type() {
        let stmt = Statement::CreateTable {
            table: "demo".into(),
            columns: vec![ColumnDef::new("x", "int); DROP TABLE demo; --")],
            primary_key: false,
        };
        assert!(matches!(stmt.to_sql(), Err(LemkPgError::InvalidType(_))));
    }

    #[test]
    fn test_insert() {
        let stmt = Statement::Insert {
            table: "demo".into(),
            columns: vec![],
            values: vec![1.into(), "2006-01-05".into(), "Some Text".into(), "A".into()],
        };
        let query = stmt.to_sql().unwrap();
        assert_eq!(
            query.sql,
            "INSERT INTO demo VALUES ($1, '2006-01-05', 'Some Text', 'A')"
        );
        assert_eq!(query.params, vec![Value::Int(1)]);
    }

    #[test]
    fn test_insert_with_columns_and_null() {
        let stmt = Statement::Insert {
            table: "demo".into(),
            columns: vec!["symbol".into(), "trans".into()],
            values: vec!["A".into(), Value::Null],
        };
        let query = stmt.to_sql().unwrap();
        assert_eq!(query.sql, "INSERT INTO demo (symbol, trans) VALUES ('A', NULL)");
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_insert_column_count_mismatch() {
        let stmt = Statement::Insert {
            table: "demo".into(),
            columns: vec!["symbol".into()],
            values: vec!["A".into(), "B".into()],
        };
        assert!(matches!(stmt.to_sql(), Err(LemkPgError::InvalidValue(_))));
    }

    #[test]
    fn test_select_all_ordered() {
        let select = Select::new("demo").order_by(Some(OrderBy::desc("date")));
        assert_eq!(sql(select), "SELECT * FROM demo ORDER BY date DESC");
    }

    #[test]
    fn test_select_distinct_with_filter() {
        let select = Select::new("demo")
            .columns(["date", "symbol"])
            .distinct(true)
            .filter(Filter::from(Condition::eq("date", "2006-01-05")));
        let query = select.to_sql().unwrap();
        assert_eq!(
            query.sql,
            "SELECT DISTINCT date, symbol FROM demo WHERE date = '2006-01-05'"
        );
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_filter_connectors_and_numbering() {
        let filter = Filter::from(Condition::eq("date", chrono::NaiveDate::from_ymd_opt(2006, 1, 5)))
            .or(Condition::new("symbol", Operator::Like, "A%"))
            .and(Condition::ne("trans", Value::Null));
        let stmt = Statement::Update {
            table: "demo".into(),
            assignments: vec![("symbol".into(), "Adc".into())],
            filter,
        };
        let query = stmt.to_sql().unwrap();
        assert_eq!(
            query.sql,
            "UPDATE demo SET symbol = 'Adc' WHERE date = $1 OR symbol LIKE 'A%' AND trans IS NOT NULL"
        );
        assert_eq!(query.params, vec![Value::from(chrono::NaiveDate::from_ymd_opt(2006, 1, 5))]);
    }

    #[test]
    fn test_null_with_ordering_operator_fails() {
        let stmt = Statement::Delete {
            table: "demo".into(),
            filter: Filter::from(Condition::new("date", Operator::Gt, Value::Null)),
        };
        assert!(matches!(stmt.to_sql(), Err(LemkPgError::InvalidValue(_))));
    }

    #[test]
    fn test_join() {
        let select = Select::new("demo")
            .join(
                JoinKind::Full,
                "datatable",
                OnClause::eq("demo.trans", "datatable.trans"),
            )
            .filter(Filter::from(Condition::eq("demo.symbol", "A")));
        assert_eq!(
            sql(select),
            "SELECT * FROM demo FULL OUTER JOIN datatable ON demo.trans = datatable.trans WHERE demo.symbol = 'A'"
        );
    }

    #[test]
    fn test_join_with_qualified_star() {
        let select = Select::new("demo")
            .columns(["demo.*", "datatable.trans"])
            .join(JoinKind::Inner, "datatable", OnClause::eq("demo.trans", "datatable.trans"));
        assert_eq!(
            sql(select),
            "SELECT demo.*, datatable.trans FROM demo INNER JOIN datatable ON demo.trans = datatable.trans"
        );
    }

    #[test]
    fn test_alter_table() {
        let stmt = |action| Statement::AlterTable {
            table: "demo".into(),
            column: "date".into(),
            action,
        };
        assert_eq!(
            sql(stmt(AlterAction::AlterType("varchar".into()))),
            "ALTER TABLE demo ALTER COLUMN date TYPE varchar"
        );
        assert_eq!(sql(stmt(AlterAction::DropColumn)), "ALTER TABLE demo DROP COLUMN date");
        assert_eq!(
            sql(stmt(AlterAction::AddColumn("date".into()))),
            "ALTER TABLE demo ADD COLUMN date date"
        );
        assert_eq!(
            sql(stmt(AlterAction::RenameTo("day".into()))),
            "ALTER TABLE demo RENAME COLUMN date TO day"
        );
    }

    #[test]
    fn test_table_maintenance() {
        assert_eq!(sql(Statement::DropTable { table: "demo".into() }), "DROP TABLE IF EXISTS demo");
        assert_eq!(sql(Statement::Truncate { table: "demo".into() }), "TRUNCATE TABLE demo");
        assert_eq!(
            sql(Statement::Delete {
                table: "demo".into(),
                filter: Filter::all()
            }),
            "DELETE FROM demo"
        );
    }

    #[test]
    fn test_aggregates() {
        let stmt = |func, column: &str| Statement::Aggregate {
            func,
            table: "demo".into(),
            column: column.into(),
            filter: Filter::from(Condition::eq("symbol", "A")),
        };
        assert_eq!(sql(stmt(Aggregate::Count, "*")), "SELECT COUNT(*) FROM demo WHERE symbol = 'A'");
        assert_eq!(sql(stmt(Aggregate::Avg, "price")), "SELECT AVG(price) FROM demo WHERE symbol = 'A'");
        assert!(stmt(Aggregate::Sum, "*").to_sql().is_err());
    }

    #[test]
    fn test_rejects_injected_identifiers() {
        let select = Select::new("demo; DROP TABLE demo");
        assert!(matches!(select.to_sql(), Err(LemkPgError::InvalidIdentifier(_))));

        let select = Select::new("demo").order_by(Some(OrderBy::asc("date DESC, 1")));
        assert!(matches!(select.to_sql(), Err(LemkPgError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_text_is_an_untyped_literal() {
        let filter = Filter::from(Condition::eq("qty", "1")).and(Condition::eq("date", "2006-01-05"));
        let query = Statement::Delete {
            table: "demo".into(),
            filter,
        }
        .to_sql()
        .unwrap();
        assert_eq!(query.sql, "DELETE FROM demo WHERE qty = '1' AND date = '2006-01-05'");
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_text_literal_escaping() {
        let stmt = |text: &str| Statement::Update {
            table: "demo".into(),
            assignments: vec![("trans".into(), text.into())],
            filter: Filter::all(),
        };
        assert_eq!(sql(stmt("O'Brien")), "UPDATE demo SET trans = 'O''Brien'");
        assert_eq!(
            sql(stmt("a\\'); DROP TABLE demo; --")),
            "UPDATE demo SET trans = E'a\\\\''); DROP TABLE demo; --'"
        );
        assert!(matches!(stmt("a\0b").to_sql(), Err(LemkPgError::InvalidValue(_))));
    }

    #[test]
    fn test_data_type_parentheses_must_balance() {
        let create = |data_type: &str| Statement::CreateTable {
            table: "demo".into(),
            columns: vec![ColumnDef::new("x", data_type)],
            primary_key: false,
        };
        assert_eq!(
            sql(create("numeric(10, 2)")),
            "CREATE TABLE IF NOT EXISTS demo (x numeric(10, 2))"
        );
        assert_eq!(sql(create("integer[]")), "CREATE TABLE IF NOT EXISTS demo (x integer[])");
        for bad in ["text) INHERITS (pg_class", "numeric(10", "text, y int", "int)"] {
            assert!(
                matches!(create(bad).to_sql(), Err(LemkPgError::InvalidType(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_raw_passthrough() {
        let query = Statement::Raw("SELECT 1".into()).to_sql().unwrap();
        assert_eq!(query.sql, "SELECT 1");
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_empty_statements() {
        let stmt = Statement::Update {
            table: "demo".into(),
            assignments: vec![],
            filter: Filter::all(),
        };
        assert!(matches!(stmt.to_sql(), Err(LemkPgError::EmptyStatement(_))));
        let stmt = Statement::CreateTable {
            table: "demo".into(),
            columns: vec![],
            primary_key: true,
        };
        assert_eq!(sql(stmt), "CREATE TABLE IF NOT EXISTS demo (id SERIAL PRIMARY KEY)");
    }
}
