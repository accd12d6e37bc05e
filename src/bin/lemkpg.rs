//! lemkpg: command line CRUD for PostgreSQL
//!
//! # Usage
//!
//! ```bash
//! # Show the SQL without connecting
//! lemkpg --dry-run get demo --fields date,symbol --where "date = 2006-01-05"
//!
//! # Run it
//! LEMKPG_DB_NAME=demo_db LEMKPG_DB_USER=postgres lemkpg get-all demo --order-by "date desc"
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use lemkpg::parser::{
    parse_assignment, parse_column_def, parse_filter, parse_on_clause, parse_order_by,
    parse_value_or_text,
};
use lemkpg::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lemkpg")]
#[command(version)]
#[command(about = "Quick CRUD access to a PostgreSQL database", long_about = None)]
#[command(after_help = "EXAMPLES:
    lemkpg create-table demo id:integer date:date trans:text symbol:text
    lemkpg insert demo 1 2006-01-05 \"'Some Text'\" A
    lemkpg get demo --fields date,symbol --where \"date = 2006-01-05\" --distinct
    lemkpg update demo --set \"symbol = Adc\" --where \"date = 2006-01-05 or symbol = A\"
    lemkpg join demo datatable --kind \"left join\" --on \"demo.trans = datatable.trans\"
    lemkpg aggregate count demo '*' --where \"symbol = A\"")]
struct Cli {
    #[command(flatten)]
    conn: ConnArgs,

    /// Configuration file (default: ./lemkpg.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Don't execute, just show the generated SQL
    #[arg(short, long, global = true)]
    dry_run: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnArgs {
    /// Database name
    #[arg(long, env = "LEMKPG_DB_NAME", global = true)]
    db_name: Option<String>,

    /// Database user
    #[arg(long, env = "LEMKPG_DB_USER", global = true)]
    db_user: Option<String>,

    /// Password for the database user
    #[arg(long, env = "LEMKPG_DB_PASSWORD", hide_env_values = true, global = true)]
    db_password: Option<String>,

    /// Database host
    #[arg(long, env = "LEMKPG_DB_HOST", global = true)]
    db_host: Option<String>,

    /// Database port
    #[arg(long, env = "LEMKPG_DB_PORT", global = true)]
    db_port: Option<u16>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum AlterKind {
    Add,
    Drop,
    Type,
    Rename,
}

#[derive(Clone, Copy, ValueEnum)]
enum AggregateArg {
    Count,
    Avg,
    Sum,
    Min,
    Max,
}

impl From<AggregateArg> for Aggregate {
    fn from(arg: AggregateArg) -> Self {
        match arg {
            AggregateArg::Count => Aggregate::Count,
            AggregateArg::Avg => Aggregate::Avg,
            AggregateArg::Sum => Aggregate::Sum,
            AggregateArg::Min => Aggregate::Min,
            AggregateArg::Max => Aggregate::Max,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a table from name:type column definitions
    CreateTable {
        table: String,
        #[arg(required = true)]
        columns: Vec<String>,
        /// Prepend an auto-increment `id` primary key
        #[arg(long)]
        primary_key: bool,
    },
    /// Insert one row
    Insert {
        table: String,
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<String>,
        /// Target columns, comma separated
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },
    /// Select every row of a table
    GetAll {
        table: String,
        /// `column [asc|desc]`
        #[arg(long)]
        order_by: Option<String>,
    },
    /// Select columns of matching rows
    Get {
        table: String,
        /// Columns, comma separated (default: all)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        #[arg(long = "where")]
        filter: Option<String>,
        #[arg(long)]
        distinct: bool,
        #[arg(long)]
        order_by: Option<String>,
    },
    /// Update matching rows
    Update {
        table: String,
        /// `column = value`, repeatable
        #[arg(long = "set", required = true)]
        assignments: Vec<String>,
        #[arg(long = "where")]
        filter: Option<String>,
    },
    /// Add, drop, retype or rename a column
    Alter {
        table: String,
        column: String,
        #[arg(value_enum)]
        action: AlterKind,
        /// Column type for `add` and `type`
        #[arg(long = "type")]
        data_type: Option<String>,
        /// New name for `rename`
        #[arg(long)]
        to: Option<String>,
    },
    /// Run raw SQL
    Raw { sql: String },
    /// Select from two joined tables
    Join {
        table: String,
        join_table: String,
        /// INNER JOIN, LEFT JOIN, RIGHT JOIN, FULL OUTER JOIN, ...
        #[arg(long, default_value = "INNER JOIN")]
        kind: String,
        /// `left.column = right.column`
        #[arg(long)]
        on: String,
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        #[arg(long = "where")]
        filter: Option<String>,
    },
    /// Drop a table if it exists
    DropTable { table: String },
    /// Remove every row of a table
    Truncate { table: String },
    /// Delete matching rows
    Delete {
        table: String,
        #[arg(long = "where")]
        filter: Option<String>,
        /// Allow deleting without a filter
        #[arg(long)]
        all: bool,
    },
    /// COUNT / AVG / SUM / MIN / MAX of a column
    Aggregate {
        #[arg(value_enum)]
        func: AggregateArg,
        table: String,
        column: String,
        #[arg(long = "where")]
        filter: Option<String>,
    },
    /// Show the filter and value syntax reference
    Syntax,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "lemkpg=debug" } else { "lemkpg=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Commands::Syntax = cli.command {
        show_syntax();
        return Ok(());
    }

    let statement = build_statement(&cli.command)?;
    let query = statement.to_sql()?;

    if cli.dry_run {
        print_sql(&query);
        return Ok(());
    }

    if cli.verbose {
        println!("{} {}", "SQL:".dimmed(), query.sql.yellow());
    }

    let config = resolve_config(cli)?;
    if cli.verbose {
        println!("{} {}", "Connecting to:".dimmed(), config.redacted_dsn());
    }

    let db = AsyncClient::connect(config).await?;

    if statement.returns_rows() {
        let results = db.fetch(&statement).await?;
        format_output(&results, cli.format);
    } else {
        let affected = db.execute(&statement).await?;
        match statement {
            Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. } => {
                println!("{} {} rows affected", "✓".green(), affected)
            }
            _ => println!("{} done", "✓".green()),
        }
    }

    db.close().await;
    Ok(())
}

fn build_statement(command: &Commands) -> anyhow::Result<Statement> {
    let statement: Statement = match command {
        Commands::CreateTable {
            table,
            columns,
            primary_key,
        } => Statement::CreateTable {
            table: table.clone(),
            columns: columns
                .iter()
                .map(|c| parse_column_def(c))
                .collect::<Result<_, _>>()?,
            primary_key: *primary_key,
        },
        Commands::Insert {
            table,
            values,
            columns,
        } => Statement::Insert {
            table: table.clone(),
            columns: columns.clone(),
            values: values.iter().map(|v| parse_value_or_text(v)).collect(),
        },
        Commands::GetAll { table, order_by } => Select::new(table)
            .order_by(order(order_by)?)
            .into(),
        Commands::Get {
            table,
            fields,
            filter,
            distinct,
            order_by,
        } => Select::new(table)
            .columns(fields.iter().cloned())
            .distinct(*distinct)
            .filter(where_clause(filter)?)
            .order_by(order(order_by)?)
            .into(),
        Commands::Update {
            table,
            assignments,
            filter,
        } => Statement::Update {
            table: table.clone(),
            assignments: assignments
                .iter()
                .map(|a| parse_assignment(a))
                .collect::<Result<_, _>>()?,
            filter: where_clause(filter)?,
        },
        Commands::Alter {
            table,
            column,
            action,
            data_type,
            to,
        } => {
            let action = match action {
                AlterKind::Add => AlterAction::AddColumn(
                    data_type.clone().context("`add` needs --type")?,
                ),
                AlterKind::Drop => AlterAction::DropColumn,
                AlterKind::Type => AlterAction::AlterType(
                    data_type.clone().context("`type` needs --type")?,
                ),
                AlterKind::Rename => AlterAction::RenameTo(to.clone().context("`rename` needs --to")?),
            };
            Statement::AlterTable {
                table: table.clone(),
                column: column.clone(),
                action,
            }
        }
        Commands::Raw { sql } => Statement::Raw(sql.clone()),
        Commands::Join {
            table,
            join_table,
            kind,
            on,
            fields,
            filter,
        } => Select::new(table)
            .columns(fields.iter().cloned())
            .join(kind.parse()?, join_table, parse_on_clause(on)?)
            .filter(where_clause(filter)?)
            .into(),
        Commands::DropTable { table } => Statement::DropTable {
            table: table.clone(),
        },
        Commands::Truncate { table } => Statement::Truncate {
            table: table.clone(),
        },
        Commands::Delete { table, filter, all } => {
            let filter = where_clause(filter)?;
            if filter.is_empty() && !all {
                bail!("refusing to delete every row of '{}' without --all", table);
            }
            Statement::Delete {
                table: table.clone(),
                filter,
            }
        }
        Commands::Aggregate {
            func,
            table,
            column,
            filter,
        } => Statement::Aggregate {
            func: (*func).into(),
            table: table.clone(),
            column: column.clone(),
            filter: where_clause(filter)?,
        },
        Commands::Syntax => bail!("`syntax` does not build a statement"),
    };
    Ok(statement)
}

fn where_clause(filter: &Option<String>) -> LemkPgResult<Filter> {
    filter.as_deref().map_or(Ok(Filter::all()), parse_filter)
}

fn order(order_by: &Option<String>) -> LemkPgResult<Option<OrderBy>> {
    order_by.as_deref().map(parse_order_by).transpose()
}

fn resolve_config(cli: &Cli) -> anyhow::Result<ConnectConfig> {
    let conn = &cli.conn;
    let mut config = match ConnectConfig::discover(cli.config.as_deref())? {
        Some(config) => config,
        None => {
            let (Some(name), Some(user)) = (&conn.db_name, &conn.db_user) else {
                bail!(
                    "No connection settings. Use --db-name and --db-user, set LEMKPG_DB_NAME and LEMKPG_DB_USER, or create lemkpg.toml"
                );
            };
            ConnectConfig::new(name, "", user, "localhost")
        }
    };

    if let Some(v) = &conn.db_name {
        config.db_name = v.clone();
    }
    if let Some(v) = &conn.db_user {
        config.db_user = v.clone();
    }
    if let Some(v) = &conn.db_password {
        config.db_password = v.clone();
    }
    if let Some(v) = &conn.db_host {
        config.db_host = v.clone();
    }
    if let Some(v) = conn.db_port {
        config.db_port = v;
    }
    Ok(config)
}

fn print_sql(query: &SqlQuery) {
    println!("{}", "Generated SQL:".green().bold());
    println!("{}", query.sql.white());

    if !query.params.is_empty() {
        println!();
        println!("{}", "Bindings:".cyan());
        for (i, value) in query.params.iter().enumerate() {
            println!("  ${} = {}", i + 1, value.to_string().yellow());
        }
    }
}

fn format_output(results: &[Record], format: OutputFormat) {
    if results.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results).unwrap_or_default());
        }
        OutputFormat::Table => {
            let table = TextTable::new(results);
            println!("{}", table.line(&table.header).white().bold());
            println!("{}", table.rule().dimmed());
            for row in &table.rows {
                println!("{}", table.line(row));
            }
            println!();
            println!("{} row(s) returned", results.len().to_string().cyan());
        }
    }
}

/// Records laid out as padded text cells, columns taken from the first row.
struct TextTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    widths: Vec<usize>,
}

impl TextTable {
    fn new(records: &[Record]) -> Self {
        let header: Vec<String> = records
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        let rows: Vec<Vec<String>> = records
            .iter()
            .map(|record| {
                header
                    .iter()
                    .map(|column| record.get(column).map(cell_text).unwrap_or_default())
                    .collect()
            })
            .collect();
        let widths = (0..header.len())
            .map(|i| {
                std::iter::once(&header)
                    .chain(&rows)
                    .map(|cells| cells[i].chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        Self { header, rows, widths }
    }

    fn line(&self, cells: &[String]) -> String {
        cells
            .iter()
            .zip(&self.widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" │ ")
    }

    fn rule(&self) -> String {
        self.widths
            .iter()
            .map(|&width| "─".repeat(width))
            .collect::<Vec<_>>()
            .join("─┼─")
    }
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn show_syntax() {
    println!("{}", "lemkpg filter and value syntax".cyan().bold());
    println!();

    let entries = [
        ("=  != <>", "Comparison", "date = 2006-01-05"),
        ("< <= > >=", "Ordering", "price >= 10"),
        ("like ilike", "Pattern match", "trans like 'Some%'"),
        ("and / or", "Connectors, SQL precedence", "a = 1 or b = 2 and c = 3"),
        ("NULL", "IS NULL / IS NOT NULL", "trans != NULL"),
        ("true false", "Boolean", "active = true"),
        ("42 -1.5", "Number", "id = 42"),
        ("'text'", "Quoted text ('' escapes)", "name = 'O''Brien'"),
        ("YYYY-MM-DD", "Date", "date = 2006-01-05"),
        ("YYYY-MM-DDTHH:MM:SS", "Timestamp", "at > 2006-01-05T10:00:00"),
        ("word", "Bare word, taken as text", "symbol = A"),
    ];

    println!(
        "{:22} {:28} {}",
        "Token".white().bold(),
        "Meaning".white().bold(),
        "Example".white().bold()
    );
    println!("{}", "─".repeat(80).dimmed());

    for (token, meaning, example) in entries {
        println!("{:22} {:28} {}", token.cyan().bold(), meaning.yellow(), example.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("lemkpg").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_build_get() {
        let cli = parse(&["get", "demo", "--fields", "date,symbol", "--where", "date = 2006-01-05", "--distinct"]);
        let query = build_statement(&cli.command).unwrap().to_sql().unwrap();
        assert_eq!(query.sql, "SELECT DISTINCT date, symbol FROM demo WHERE date = $1");
    }

    #[test]
    fn test_build_insert_with_negative_number() {
        let cli = parse(&["insert", "demo", "-5", "A", "--columns", "qty,symbol"]);
        let statement = build_statement(&cli.command).unwrap();
        match statement {
            Statement::Insert { values, columns, .. } => {
                assert_eq!(values, vec![Value::Int(-5), Value::from("A")]);
                assert_eq!(columns, vec!["qty".to_string(), "symbol".to_string()]);
            }
            _ => panic!("expected insert"),
        }
    }

    #[test]
    fn test_delete_needs_filter_or_all() {
        let cli = parse(&["delete", "demo"]);
        assert!(build_statement(&cli.command).is_err());
        let cli = parse(&["delete", "demo", "--all"]);
        assert_eq!(
            build_statement(&cli.command).unwrap().to_sql().unwrap().sql,
            "DELETE FROM demo"
        );
    }

    #[test]
    fn test_build_join_rejects_unknown_kind() {
        let cli = parse(&["join", "demo", "datatable", "--kind", "cross join", "--on", "demo.trans = datatable.trans"]);
        let err = build_statement(&cli.command).unwrap_err();
        assert!(err.to_string().starts_with("Incorrect JOIN type"));
    }

    #[test]
    fn test_text_table_layout() {
        let records: Vec<Record> = vec![
            [("id".to_string(), serde_json::json!(1)), ("symbol".to_string(), serde_json::json!("Adc"))]
                .into_iter()
                .collect(),
            [("id".to_string(), serde_json::json!(10)), ("symbol".to_string(), serde_json::Value::Null)]
                .into_iter()
                .collect(),
        ];
        let table = TextTable::new(&records);
        assert_eq!(table.widths, vec![2, 6]);
        assert_eq!(table.line(&table.header), "id │ symbol");
        assert_eq!(table.rule(), "───┼───────");
        assert_eq!(table.line(&table.rows[0]), "1  │ Adc   ");
        assert_eq!(table.line(&table.rows[1]), "10 │ NULL  ");
    }

    #[test]
    fn test_alter_requires_type() {
        let cli = parse(&["alter", "demo", "date", "type"]);
        assert!(build_statement(&cli.command).is_err());
        let cli = parse(&["alter", "demo", "date", "type", "--type", "varchar"]);
        assert_eq!(
            build_statement(&cli.command).unwrap().to_sql().unwrap().sql,
            "ALTER TABLE demo ALTER COLUMN date TYPE varchar"
        );
    }
}
