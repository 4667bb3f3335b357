use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use tablelog_kernel::backend::{Datum, Executor, SqlTrace};
use tablelog_kernel::capture::CaptureConfig;
use tablelog_kernel::catalog::Catalog;
use tablelog_kernel::ident::RelationIdent;
use tablelog_kernel::memory::{DatabaseImage, MemoryDatabase};
use tablelog_kernel::partition::PartitionSelector;
use tablelog_kernel::replay::{ReplayMode, ReplaySummary};
use tablelog_kernel::restore::{restore_table, RestoreRequest};
use tablelog_kernel::statement::{Expr, Predicate, Statement};

/// Table change log CLI
#[derive(Parser, Debug)]
#[command(name = "tablelog")]
#[command(about = "Capture table changes and restore tables to a past instant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply row mutations to a database image, logging each one
    Capture {
        /// Path to database image JSON
        #[arg(long)]
        db: String,

        /// Path to mutation events JSON
        #[arg(long)]
        events: String,

        /// Path to capture config JSON
        #[arg(long)]
        config: Option<String>,

        /// Active log partition
        #[arg(long)]
        partition: Option<i64>,

        /// Where to write the updated image (defaults to --db)
        #[arg(long)]
        out: Option<String>,
    },

    /// Restore a table as of a past instant
    Restore {
        /// Path to database image JSON
        #[arg(long)]
        db: String,

        /// Source table
        #[arg(long)]
        source: String,

        /// Explicit key column of the source table
        #[arg(long)]
        source_key: Option<String>,

        /// Log table
        #[arg(long)]
        log: String,

        /// Ordering column of the log table
        #[arg(long)]
        log_key: String,

        /// Table to restore into; must not exist
        #[arg(long)]
        restore: String,

        /// Point in time (RFC 3339)
        #[arg(long)]
        at: DateTime<Utc>,

        /// Restore a single key value
        #[arg(long)]
        key: Option<String>,

        /// Roll the current table back instead of rebuilding it
        #[arg(long)]
        backward: bool,

        /// Keep the restore table after the session
        #[arg(long)]
        keep: bool,

        /// Print every statement sent to the backend
        #[arg(long)]
        show_sql: bool,

        /// Where to write the resulting image
        #[arg(long)]
        out: Option<String>,
    },
}

/// One row mutation, applied at `at`.
#[derive(Debug, Deserialize)]
struct Event {
    at: DateTime<Utc>,
    table: String,
    #[serde(flatten)]
    mutation: Mutation,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Mutation {
    Insert {
        values: BTreeMap<String, serde_json::Value>,
    },
    Update {
        key: BTreeMap<String, serde_json::Value>,
        set: BTreeMap<String, serde_json::Value>,
    },
    Delete {
        key: BTreeMap<String, serde_json::Value>,
    },
}

#[derive(Debug, Serialize)]
struct CaptureOutput {
    events: usize,
    rows_affected: u64,
}

#[derive(Debug, Serialize)]
struct RestoreOutput {
    restore: String,
    summary: ReplaySummary,
    rows: Vec<BTreeMap<String, Datum>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sql: Option<Vec<String>>,
}

fn datum(value: &serde_json::Value) -> Datum {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn expr(value: &serde_json::Value) -> Expr {
    Expr::from_datum(&datum(value))
}

fn key_predicate(table: &str, key: &BTreeMap<String, serde_json::Value>) -> Result<Predicate> {
    match key.iter().next() {
        Some((column, value)) if key.len() == 1 => Ok(Predicate::eq(column.clone(), expr(value))),
        _ => bail!("event on {table}: key must name exactly one column"),
    }
}

fn statement(event: &Event) -> Result<Statement> {
    let table = RelationIdent::parse(&event.table)?;
    Ok(match &event.mutation {
        Mutation::Insert { values } => Statement::Insert {
            table,
            columns: values.keys().cloned().collect(),
            values: values.values().map(expr).collect(),
        },
        Mutation::Update { key, set } => Statement::Update {
            filter: key_predicate(&event.table, key)?,
            table,
            assignments: set.iter().map(|(c, v)| (c.clone(), expr(v))).collect(),
        },
        Mutation::Delete { key } => Statement::Delete {
            filter: key_predicate(&event.table, key)?,
            table,
        },
    })
}

fn load_db(path: &str) -> Result<MemoryDatabase> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let image: DatabaseImage = serde_json::from_str(&data)?;
    Ok(MemoryDatabase::from_image(image)?)
}

fn save_db(db: &MemoryDatabase, path: &str) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(&db.to_image())?)
        .with_context(|| format!("writing {path}"))
}

fn capture(
    db_path: String,
    events_path: String,
    config_path: Option<String>,
    partition: Option<i64>,
    out: Option<String>,
) -> Result<CaptureOutput> {
    let db = load_db(&db_path)?;

    let config = if let Some(path) = config_path {
        let data = fs::read_to_string(path)?;
        serde_json::from_str::<CaptureConfig>(&data)?
    } else {
        CaptureConfig::default()
    };

    if let Some(partition) = partition {
        PartitionSelector::global().set_raw(partition)?;
    }

    let events: Vec<Event> = serde_json::from_str(&fs::read_to_string(&events_path)?)?;

    let tables: BTreeSet<&str> = events.iter().map(|e| e.table.as_str()).collect();
    for table in tables {
        let ident = RelationIdent::parse(table)?;
        let Some(relid) = db.relation_id(&ident) else {
            bail!("relation {ident} does not exist");
        };
        db.attach_capture(relid, config.clone());
    }

    let mut rows_affected = 0;
    for event in &events {
        db.set_now(event.at);
        let outcome = db.execute(&statement(event)?).with_context(|| {
            format!(
                "applying {} on {} at {}",
                op_name(&event.mutation),
                event.table,
                event.at
            )
        })?;
        rows_affected += outcome.affected();
    }
    tracing::info!(events = events.len(), rows_affected, "events applied");

    save_db(&db, out.as_deref().unwrap_or(&db_path))?;
    Ok(CaptureOutput {
        events: events.len(),
        rows_affected,
    })
}

fn op_name(mutation: &Mutation) -> &'static str {
    match mutation {
        Mutation::Insert { .. } => "insert",
        Mutation::Update { .. } => "update",
        Mutation::Delete { .. } => "delete",
    }
}

fn restore(db: &MemoryDatabase, request: &RestoreRequest, show_sql: bool) -> Result<RestoreOutput> {
    let (summary, sql) = if show_sql {
        let trace = SqlTrace::new(db);
        let summary = restore_table(db, &trace, request)?;
        (summary, Some(trace.transcript()))
    } else {
        (restore_table(db, db, request)?, None)
    };

    let relid = db
        .relation_id(&summary.restore)
        .with_context(|| format!("restore table {} vanished", summary.restore))?;
    let columns = db.tuple_desc(relid)?.surviving_names();
    let rows: Vec<BTreeMap<String, Datum>> = db
        .rows(&summary.restore)?
        .into_iter()
        .map(|row| columns.iter().cloned().zip(row).collect())
        .collect();

    Ok(RestoreOutput {
        restore: summary.restore.render(),
        summary,
        rows,
        sql,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Capture {
            db,
            events,
            config,
            partition,
            out,
        } => {
            let output = capture(db, events, config, partition, out)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Restore {
            db: db_path,
            source,
            source_key,
            log,
            log_key,
            restore: restore_name,
            at,
            key,
            backward,
            keep,
            show_sql,
            out,
        } => {
            let db = load_db(&db_path)?;

            let mut request = RestoreRequest::new(source, log, log_key, restore_name, at)
                .mode(if backward {
                    ReplayMode::Backward
                } else {
                    ReplayMode::Forward
                })
                .keep_permanent(keep);
            if let Some(column) = source_key {
                request = request.source_key(column);
            }
            if let Some(key) = key {
                request = request.key_filter(key);
            }

            let output = restore(&db, &request, show_sql)?;
            if let Some(path) = out {
                save_db(&db, &path)?;
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
