//! Demonstration entry point: loads a JSON schema fixture, validates and
//! rewrites one candidate SQL string through the pipeline, prints the
//! result, and — if a database URL was supplied — executes it and prints
//! the rows. This stands in for the HTTP layer the core does not define
//! (see SPEC_FULL.md §1); it is not itself a server.

use std::path::PathBuf;

use bpaf::Bpaf;
use serde::Deserialize;
use sqg_config::PipelineConfig;
use sqg_executor::Executor;
use sqg_pipeline::ValidateAndRewriteInput;
use sqg_schema::{Dialect, SchemaSnapshot, SchemaTable};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
struct Args {
    /// Path to a JSON array of schema fixture entries
    #[bpaf(long, argument("PATH"))]
    schema: PathBuf,

    /// Candidate SQL to validate and rewrite
    #[bpaf(long, argument("SQL"))]
    sql: String,

    /// Caller's tenant identifier
    #[bpaf(long, argument("TENANT_ID"))]
    tenant_id: String,

    /// 1-based page number
    #[bpaf(long, argument("PAGE"), fallback(1))]
    page: u32,

    /// Rows per page (1..=100)
    #[bpaf(long, argument("PAGE_SIZE"), fallback(20))]
    page_size: u32,

    /// Emit bunyan-formatted JSON logs instead of plain text
    #[bpaf(long)]
    json_logs: bool,

    /// When set, executes the rewritten SQL against this PostgreSQL database
    #[bpaf(long, argument("DATABASE_URL"), optional)]
    database_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SchemaTableFixture {
    schema: String,
    table: String,
    #[serde(default)]
    is_view: bool,
    columns: Vec<String>,
}

fn init_logging(json_logs: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(JsonStorageLayer)
            .with(BunyanFormattingLayer::new("sqg".into(), std::io::stdout))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

fn load_snapshot(path: &PathBuf) -> anyhow::Result<SchemaSnapshot> {
    let raw = std::fs::read_to_string(path)?;
    let fixtures: Vec<SchemaTableFixture> = serde_json::from_str(&raw)?;
    let tables: Vec<SchemaTable> = fixtures
        .into_iter()
        .map(|f| SchemaTable::new(f.schema, f.table, f.is_view, f.columns))
        .collect();
    Ok(SchemaSnapshot::from_tables(Dialect::PostgreSql, 0, tables))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = args().run();
    init_logging(args.json_logs);

    let config = PipelineConfig::from_env();
    let snapshot = load_snapshot(&args.schema)?;

    let output = sqg_pipeline::validate_and_rewrite(ValidateAndRewriteInput {
        candidate_sql: &args.sql,
        snapshot: &snapshot,
        tenant_id: &args.tenant_id,
        page: args.page,
        page_size: args.page_size,
        hard_cap: config.hard_row_cap,
    })
    .map_err(|diagnostic| anyhow::anyhow!("{diagnostic}"))?;

    println!(
        "{}",
        serde_json::json!({
            "sql": output.sql,
            "params": output.params,
            "displayLimit": output.display_limit,
            "fetchLimit": output.fetch_limit,
            "referencedTables": output.referenced_tables,
        })
    );

    let Some(database_url) = args.database_url else {
        return Ok(());
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    let executor = Executor::new(pool);

    let rows = sqg_pipeline::execute(&executor, &output, config.statement_timeout_ms)
        .await
        .map_err(|diagnostic| anyhow::anyhow!("{diagnostic}"))?;

    println!("{}", serde_json::to_string_pretty(&rows)?);

    Ok(())
}
