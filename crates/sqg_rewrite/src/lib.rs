//! Tenant-filter injection (spec §4.E), pagination bounds (spec §4.F), and
//! serialization (spec §4.G) — the three stages that turn a resolved AST
//! into the SQL string the executor is handed.

use std::collections::HashSet;

use sqlparser::ast::{
    BinaryOperator, Expr, Ident, Join, JoinConstraint, JoinOperator, Offset, OffsetRows, Query,
    Select, Value,
};
use sqg_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticResult};
use sqg_resolver::{table_alias, JoinKind, TenantTarget};

/// Placement rule (spec §4.E): an outer-joined table's predicate must live
/// in that join's `ON` clause, never the top-level `WHERE`, or the filter
/// would silently turn the left join into an inner join.
pub fn inject_tenant_filters(
    select: &mut Select,
    tenant_targets: &[TenantTarget],
    tenant_id: &str,
) -> DiagnosticResult<bool> {
    let mut seen_aliases = HashSet::new();
    let mut where_predicates: Vec<Expr> = Vec::new();
    let mut injected = false;

    for target in tenant_targets {
        if !seen_aliases.insert(target.alias.to_lowercase()) {
            continue;
        }

        let predicate = tenant_predicate(&target.alias, &target.tenant_column);

        match target.join_kind {
            JoinKind::LeftOuter => {
                attach_on_predicate(select, &target.alias, predicate)?;
            }
            JoinKind::Leading | JoinKind::Inner => {
                where_predicates.push(predicate);
            }
        }
        injected = true;
    }

    if let Some(combined) = and_all(where_predicates) {
        select.selection = Some(match select.selection.take() {
            Some(existing) => and(existing, combined),
            None => combined,
        });
    }

    // Silence unused-variable warning when no targets existed; the caller
    // only needs to know whether a parameter must be appended.
    let _ = tenant_id;
    Ok(injected)
}

fn tenant_predicate(alias: &str, tenant_column: &str) -> Expr {
    // Quoted so Postgres doesn't fold the canonical, possibly mixed-case
    // tenant column name to lower case.
    Expr::BinaryOp {
        left: Box::new(Expr::CompoundIdentifier(vec![
            Ident::with_quote('"', alias),
            Ident::with_quote('"', tenant_column),
        ])),
        op: BinaryOperator::Eq,
        right: Box::new(Expr::Value(Value::Placeholder("$1".to_string()))),
    }
}

fn and(left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op: BinaryOperator::And,
        right: Box::new(right),
    }
}

fn and_all(mut exprs: Vec<Expr>) -> Option<Expr> {
    let first = exprs.pop()?;
    Some(exprs.into_iter().fold(first, |acc, next| and(next, acc)))
}

fn attach_on_predicate(select: &mut Select, alias: &str, predicate: Expr) -> DiagnosticResult<()> {
    let lower_alias = alias.to_lowercase();

    for table_with_joins in select.from.iter_mut() {
        for join in table_with_joins.joins.iter_mut() {
            if !join_matches_alias(join, &lower_alias) {
                continue;
            }
            if let JoinOperator::LeftOuter(constraint) = &mut join.join_operator {
                *constraint = match std::mem::replace(constraint, JoinConstraint::None) {
                    JoinConstraint::On(existing) => JoinConstraint::On(and(existing, predicate)),
                    _ => JoinConstraint::On(predicate),
                };
                return Ok(());
            }
        }
    }

    Err(Diagnostic::new(
        DiagnosticCode::InternalRewriteLeak,
        format!("resolver reported a LEFT JOIN tenant target `{alias}` that no longer matches the AST"),
    ))
}

fn join_matches_alias(join: &Join, lower_alias: &str) -> bool {
    match table_alias(&join.relation) {
        Some((_, table_name, explicit_alias)) => {
            let join_alias = explicit_alias.unwrap_or(table_name);
            join_alias.eq_ignore_ascii_case(lower_alias)
        }
        None => false,
    }
}

/// Caller-controlled pagination inputs (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct PaginationInput {
    pub page: u32,
    pub page_size: u32,
    pub hard_cap: u32,
}

/// What the pagination rewrite computed (feeds into `RewriteOutput`, spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationResult {
    pub display_limit: u32,
    pub fetch_limit: u32,
    pub offset: u32,
}

/// Bounds and rewrites the `LIMIT`/`OFFSET` clause (spec §4.F).
pub fn apply_pagination(
    query: &mut Query,
    input: &PaginationInput,
) -> DiagnosticResult<PaginationResult> {
    if query.offset.is_some() {
        return Err(Diagnostic::new(
            DiagnosticCode::OffsetNotAllowed,
            "candidate SQL may not specify OFFSET",
        ));
    }

    let model_limit = match &query.limit {
        None => None,
        Some(Expr::Value(Value::Number(text, _))) => {
            let parsed: i64 = text.parse().map_err(|_| {
                Diagnostic::new(
                    DiagnosticCode::LimitNotNumeric,
                    format!("LIMIT value `{text}` is not a valid integer"),
                )
            })?;
            if parsed <= 0 {
                return Err(Diagnostic::new(
                    DiagnosticCode::LimitInvalid,
                    "LIMIT must be a positive integer",
                ));
            }
            Some(parsed as u32)
        }
        Some(_) => {
            return Err(Diagnostic::new(
                DiagnosticCode::LimitNotNumeric,
                "LIMIT must be a numeric literal",
            ));
        }
    };

    if input.page == 0 || input.page_size == 0 || input.page_size > 100 || input.hard_cap == 0 {
        return Err(Diagnostic::new(
            DiagnosticCode::LimitInvalid,
            "page must be >= 1, pageSize in 1..=100, hardCap > 0",
        ));
    }

    let display_limit = model_limit
        .unwrap_or(input.page_size)
        .min(input.page_size)
        .min(input.hard_cap);

    if display_limit == 0 {
        return Err(Diagnostic::new(
            DiagnosticCode::LimitInvalid,
            "computed display limit is zero",
        ));
    }

    let fetch_limit = display_limit + 1;
    let offset = (input.page - 1) * display_limit;

    query.limit = Some(Expr::Value(Value::Number(fetch_limit.to_string(), false)));
    query.offset = Some(Offset {
        value: Expr::Value(Value::Number(offset.to_string(), false)),
        rows: OffsetRows::None,
    });

    Ok(PaginationResult {
        display_limit,
        fetch_limit,
        offset,
    })
}

/// Renders the mutated AST back to SQL and re-applies the lexical guard to
/// the output (spec §4.G) — any violation here is a bug in the rewrite
/// stages, not in the candidate.
pub fn serialize(query: &Query) -> DiagnosticResult<String> {
    let sql = query.to_string();
    sqg_guard::check_rewrite_output(&sql)?;
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqg_resolver::resolve;
    use sqg_schema::{Dialect, SchemaSnapshot, SchemaTable};

    fn snapshot() -> SchemaSnapshot {
        let users = SchemaTable::new(
            "public",
            "users",
            false,
            vec!["id".into(), "name".into(), "organizationId".into()],
        );
        let payments = SchemaTable::new(
            "public",
            "payments",
            false,
            vec![
                "id".into(),
                "userId".into(),
                "amount".into(),
                "organizationId".into(),
            ],
        );
        SchemaSnapshot::from_tables(Dialect::PostgreSql, 0, vec![users, payments])
    }

    #[test]
    fn leading_table_predicate_goes_to_where() {
        let mut validated =
            sqg_parser::parse("SELECT u.id, u.name FROM users u ORDER BY u.id").unwrap();
        let resolved = resolve(&mut validated, &snapshot()).unwrap();
        let select = validated.select_mut();
        let injected =
            inject_tenant_filters(select, &resolved.tenant_targets, "org_1").unwrap();
        assert!(injected);
        let sql = validated.query().to_string();
        assert!(sql.contains("WHERE"));
        assert!(sql.contains("\"u\".\"organizationId\" = $1"));
    }

    #[test]
    fn left_join_predicate_goes_to_on_not_where() {
        let mut validated = sqg_parser::parse(
            "SELECT u.id, p.amount FROM users u LEFT JOIN payments p ON p.userId = u.id ORDER BY u.id",
        )
        .unwrap();
        let resolved = resolve(&mut validated, &snapshot()).unwrap();
        let select = validated.select_mut();
        inject_tenant_filters(select, &resolved.tenant_targets, "org_1").unwrap();
        let sql = validated.query().to_string();

        let on_clause_start = sql.find("ON").expect("has ON clause");
        let where_clause_start = sql.find("WHERE").expect("has WHERE clause");
        let on_clause = &sql[on_clause_start..where_clause_start];
        let where_clause = &sql[where_clause_start..];

        assert!(on_clause.contains("\"p\".\"organizationId\" = $1"));
        assert!(!where_clause.contains("\"p\".\"organizationId\""));
        assert!(where_clause.contains("\"u\".\"organizationId\" = $1"));
    }

    #[test]
    fn pagination_rejects_existing_offset() {
        let mut validated =
            sqg_parser::parse("SELECT u.id FROM users u LIMIT 10 OFFSET 20").unwrap();
        let err = apply_pagination(
            validated.query_mut(),
            &PaginationInput {
                page: 1,
                page_size: 10,
                hard_cap: 100,
            },
        )
        .unwrap_err();
        assert_eq!(err.code, DiagnosticCode::OffsetNotAllowed);
    }

    #[test]
    fn pagination_computes_fetch_limit_and_offset() {
        let mut validated = sqg_parser::parse("SELECT u.id FROM users u ORDER BY u.id").unwrap();
        let result = apply_pagination(
            validated.query_mut(),
            &PaginationInput {
                page: 1,
                page_size: 2,
                hard_cap: 100,
            },
        )
        .unwrap();
        assert_eq!(result.display_limit, 2);
        assert_eq!(result.fetch_limit, 3);
        assert_eq!(result.offset, 0);
        let sql = validated.query().to_string();
        assert!(sql.ends_with("LIMIT 3 OFFSET 0"));
    }

    #[test]
    fn pagination_model_limit_one_wins_over_page_size() {
        let mut validated =
            sqg_parser::parse("SELECT u.id FROM users u ORDER BY u.id LIMIT 1").unwrap();
        let result = apply_pagination(
            validated.query_mut(),
            &PaginationInput {
                page: 1,
                page_size: 100,
                hard_cap: 100,
            },
        )
        .unwrap();
        assert_eq!(result.display_limit, 1);
        assert_eq!(result.fetch_limit, 2);
    }

    #[test]
    fn serialize_rejects_internal_leak() {
        // A predicate or literal can never legitimately contain a semicolon;
        // this exercises the defense-in-depth path rather than a realistic
        // rewrite bug.
        let validated = sqg_parser::parse("SELECT u.id FROM users u").unwrap();
        assert!(serialize(validated.query()).is_ok());
    }
}
