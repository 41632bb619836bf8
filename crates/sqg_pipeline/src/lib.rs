//! The pipeline orchestrator (spec §4.I): composes the guard, parser,
//! resolver, rewrite, and executor crates into the two operations callers
//! actually see — `validate_and_rewrite` and `execute`. There is no retry or
//! repair loop inside the core; a caller that wants to ask the model for a
//! corrected candidate after a validation error does so outside this crate.

use serde_json::{Map, Value};
use sqg_diagnostics::DiagnosticResult;
use sqg_executor::Executor;
use sqg_rewrite::PaginationInput;
use sqg_schema::SchemaSnapshot;

/// Everything a successful `validate_and_rewrite` call produces (spec §3).
#[derive(Debug, Clone)]
pub struct RewriteOutput {
    pub sql: String,
    pub params: Vec<String>,
    pub display_limit: u32,
    pub fetch_limit: u32,
    pub referenced_tables: Vec<String>,
}

/// Inputs to `validate_and_rewrite` (spec §6).
pub struct ValidateAndRewriteInput<'a> {
    pub candidate_sql: &'a str,
    pub snapshot: &'a SchemaSnapshot,
    pub tenant_id: &'a str,
    pub page: u32,
    pub page_size: u32,
    pub hard_cap: u32,
}

/// Runs B→C→D→E→F→G over `input.candidate_sql` (spec §4.I, §5 ordering
/// guarantee). Pure and synchronous: the same inputs always produce the
/// same rewritten SQL and parameter list, so this is testable without a
/// database.
#[tracing::instrument(
    skip(input),
    fields(candidate_len = input.candidate_sql.len(), page = input.page, page_size = input.page_size)
)]
pub fn validate_and_rewrite(input: ValidateAndRewriteInput<'_>) -> DiagnosticResult<RewriteOutput> {
    sqg_guard::check(input.candidate_sql)?;

    let mut validated = sqg_parser::parse(input.candidate_sql)?;
    let resolved = sqg_resolver::resolve(&mut validated, input.snapshot)?;

    let injected = {
        let select = validated.select_mut();
        sqg_rewrite::inject_tenant_filters(select, &resolved.tenant_targets, input.tenant_id)?
    };

    let pagination = sqg_rewrite::apply_pagination(
        validated.query_mut(),
        &PaginationInput {
            page: input.page,
            page_size: input.page_size,
            hard_cap: input.hard_cap,
        },
    )?;

    let sql = sqg_rewrite::serialize(validated.query())?;
    let params = if injected {
        vec![input.tenant_id.to_string()]
    } else {
        Vec::new()
    };

    tracing::info!(
        referenced_tables = resolved.referenced_tables.len(),
        display_limit = pagination.display_limit,
        "candidate SQL validated and rewritten"
    );

    Ok(RewriteOutput {
        sql,
        params,
        display_limit: pagination.display_limit,
        fetch_limit: pagination.fetch_limit,
        referenced_tables: resolved.referenced_tables,
    })
}

/// Runs the rewritten query against `executor` (spec §4.H). Observable
/// database effects happen only here, after `validate_and_rewrite` has
/// already succeeded.
#[tracing::instrument(skip(executor, output), fields(referenced_tables = output.referenced_tables.len()))]
pub async fn execute(
    executor: &Executor,
    output: &RewriteOutput,
    statement_timeout_ms: u64,
) -> DiagnosticResult<Vec<Map<String, Value>>> {
    executor
        .execute_read_only(&output.sql, &output.params, statement_timeout_ms)
        .await
}
