//! Run a single statement against the database configured in the environment (`DB_*` variables or a `.env` file).
//!
//! Result rows are printed to stdout as one JSON object per line.  Database failures are rendered in the configured
//! output format and the process exits with status 1.
use std::io::Write;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::*;

use dbm::{Database, DbConfig, QueryBuilder, RenderingSink, Row, StatementResult, Term};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Filters {
    /// A condition, as SQL.  May be repeated.
    #[arg(long = "where")]
    wheres: Vec<String>,

    /// Join the conditions with OR rather than AND.
    #[arg(long)]
    any: bool,
}

#[derive(Args)]
struct Values {
    /// `column=value`.  Values are bound as text; column affinity takes care of numbers.
    #[arg(long = "set", value_parser = parse_assignment)]
    set: Vec<(String, String)>,

    /// A column whose value is raw SQL, such as `CURRENT_TIMESTAMP`.
    #[arg(long)]
    raw: Vec<String>,

    /// Skip rows which would violate a constraint instead of failing.
    #[arg(long)]
    ignore: bool,
}

#[derive(Subcommand)]
enum Command {
    Select {
        table: String,

        #[arg(long, default_value = "*")]
        fields: String,

        #[command(flatten)]
        filters: Filters,

        /// `table:condition`
        #[arg(long = "inner-join", value_parser = parse_join)]
        inner_joins: Vec<(String, String)>,

        /// `table:condition`
        #[arg(long = "left-join", value_parser = parse_join)]
        left_joins: Vec<(String, String)>,

        #[arg(long)]
        group: Vec<String>,

        /// `column[:direction]`
        #[arg(long, value_parser = parse_ordering)]
        order: Vec<(String, String)>,

        #[arg(long)]
        limit: Option<String>,

        #[arg(long)]
        offset: Option<String>,

        /// Run through the statement cache.
        #[arg(long)]
        prepared: bool,
    },
    Insert {
        table: String,

        #[command(flatten)]
        values: Values,
    },
    Replace {
        table: String,

        #[command(flatten)]
        values: Values,
    },
    Update {
        table: String,

        #[command(flatten)]
        values: Values,

        #[command(flatten)]
        filters: Filters,
    },
    Delete {
        table: String,

        #[command(flatten)]
        filters: Filters,
    },
}

fn parse_assignment(arg: &str) -> Result<(String, String), String> {
    arg.split_once('=')
        .map(|(c, v)| (c.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected column=value, got {}", arg))
}

fn parse_join(arg: &str) -> Result<(String, String), String> {
    arg.split_once(':')
        .map(|(t, c)| (t.trim().to_string(), c.trim().to_string()))
        .ok_or_else(|| format!("expected table:condition, got {}", arg))
}

fn parse_ordering(arg: &str) -> Result<(String, String), String> {
    let (column, direction) = arg.split_once(':').unwrap_or((arg, "ASC"));
    match direction.to_ascii_uppercase().as_str() {
        d @ ("ASC" | "DESC") => Ok((column.trim().to_string(), d.to_string())),
        _ => Err(format!("direction must be ASC or DESC, got {}", direction)),
    }
}

impl Filters {
    fn terms(self) -> Vec<Term> {
        let any = self.any;
        self.wheres
            .into_iter()
            .map(|w| if any { Term::keyed("OR", w) } else { Term::positional(w) })
            .collect()
    }
}

impl Values {
    fn row(&self) -> Row {
        self.set.iter().map(|(c, v)| (c.as_str(), v.as_str())).collect()
    }

    fn raw_columns(&self) -> Vec<&str> {
        self.raw.iter().map(String::as_str).collect()
    }
}

fn build(command: Command) -> (QueryBuilder, bool) {
    match command {
        Command::Select {
            table,
            fields,
            filters,
            inner_joins,
            left_joins,
            group,
            order,
            limit,
            offset,
            prepared,
        } => {
            let builder = QueryBuilder::new(table)
                .select(fields)
                .where_(filters.terms())
                .inner_join(inner_joins)
                .left_join(left_joins)
                .group(group)
                .order(order)
                .set_limit(limit)
                .set_offset(offset);
            (builder, prepared)
        }
        Command::Insert { table, values } => {
            let builder = QueryBuilder::new(table).insert(&values.row(), &values.raw_columns(), values.ignore);
            (builder, true)
        }
        Command::Replace { table, values } => {
            let builder = QueryBuilder::new(table).replace(&values.row(), &values.raw_columns(), values.ignore);
            (builder, true)
        }
        Command::Update {
            table,
            values,
            filters,
        } => {
            let builder = QueryBuilder::new(table)
                .update(&values.row(), &values.raw_columns(), values.ignore)
                .where_(filters.terms());
            (builder, true)
        }
        Command::Delete { table, filters } => (QueryBuilder::new(table).delete().where_(filters.terms()), true),
    }
}

fn print_result(result: &StatementResult) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if result.columns.is_empty() {
        writeln!(out, "{} row(s) affected", result.rows_affected)?;
        if let Some(id) = result.last_insert_id {
            writeln!(out, "last insert id: {}", id)?;
        }
        return Ok(());
    }

    for row in result.rows.iter() {
        writeln!(out, "{}", serde_json::to_string(row)?)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    dbm_logging::log_to_stderr();

    let cli = Cli::parse();
    let config = DbConfig::from_env()?;
    let sink = RenderingSink::new(config.error_output(), std::io::stdout());
    let mut db = Database::open(config).with_sink(sink);

    let (builder, prepared) = build(cli.command);
    debug!("Sending statement for {}", builder.table());
    match builder.send(&mut db, prepared) {
        Ok(result) => print_result(&result),
        // The sink already rendered it.
        Err(e) if e.code().is_some() => std::process::exit(1),
        Err(e) => Err(e.into()),
    }
}
