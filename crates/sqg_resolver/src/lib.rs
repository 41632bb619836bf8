//! The reference resolver (spec §4.D): walks the `FROM` list of a validated
//! statement, resolves each table reference against a schema snapshot, then
//! walks every column-reference node in the statement and canonicalizes its
//! case — rejecting anything the gateway isn't willing to execute along the
//! way (wildcards, sensitive columns, unknown tables/columns, ambiguous bare
//! references, unsupported joins).
//!
//! Canonicalizing column case here, before the tenant-filter injector runs,
//! means the injector can assume the tenant column's canonical spelling
//! already exists verbatim on every target table.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast::{JoinConstraint, JoinOperator, Select, SelectItem, TableFactor};
use sqg_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticResult};
use sqg_parser::ValidatedSelect;
use sqg_schema::{canonical_column, SchemaSnapshot, SchemaTable};

/// Case-insensitive substring match against the sensitive-column list in
/// spec §4.D rule 3. Matched against an already lower-cased column name, so
/// the pattern itself needs no `(?i)` flag.
static SENSITIVE_COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("password|token|secret|apikey|api_key|refresh|salt|hash|credential|ssn|aadhaar|pan")
        .expect("sensitive column pattern compiles")
});

/// How a `FROM`-list entry was brought into the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// The leading table in the `FROM` clause.
    Leading,
    /// Brought in by `INNER JOIN` (or a bare, unqualified `JOIN`).
    Inner,
    /// Brought in by `LEFT [OUTER] JOIN`.
    LeftOuter,
}

/// One resolved `FROM`-list reference.
#[derive(Debug, Clone)]
pub struct FromEntry {
    pub alias: String,
    pub table: SchemaTable,
    pub join_kind: JoinKind,
}

/// A place the tenant-filter injector must add a predicate (spec §3).
#[derive(Debug, Clone)]
pub struct TenantTarget {
    pub alias: String,
    pub tenant_column: String,
    pub join_kind: JoinKind,
}

/// Everything the rest of the pipeline needs after resolution: the AST has
/// been mutated in place (columns canonicalized), and this carries the
/// structural facts the injector and the audit log need.
pub struct ResolveOutput {
    pub from_entries: Vec<FromEntry>,
    pub tenant_targets: Vec<TenantTarget>,
    pub referenced_tables: Vec<String>,
}

/// Splits a `FROM`/`JOIN` relation into `(schema, table_name, explicit_alias)`
/// when it is a bare table reference, `None` for anything else (derived
/// tables, subqueries, table functions, `UNNEST`, lateral joins).
pub fn table_alias(factor: &TableFactor) -> Option<(Option<String>, String, Option<String>)> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let parts: Vec<String> = name.0.iter().map(|ident| ident.value.clone()).collect();
            if parts.is_empty() {
                return None;
            }
            let (schema, table_name) = if parts.len() == 1 {
                (None, parts[0].clone())
            } else {
                (
                    Some(parts[parts.len() - 2].clone()),
                    parts.last().unwrap().clone(),
                )
            };
            let explicit_alias = alias.as_ref().map(|a| a.name.value.clone());
            Some((schema, table_name, explicit_alias))
        }
        _ => None,
    }
}

/// Resolves the whole `FROM` list (spec §4.D, paragraph 1), mutating the AST
/// in place: every join's `ON` predicate is walked and canonicalized the
/// same way the select list and `WHERE` are, since an `ON` clause is just as
/// able to leak a sensitive column or smuggle in a placeholder.
fn resolve_from(select: &mut Select, snapshot: &SchemaSnapshot) -> DiagnosticResult<Vec<FromEntry>> {
    let mut entries = Vec::new();
    let no_aliases = HashSet::new();

    for table_with_joins in select.from.iter_mut() {
        let Some((schema, table_name, explicit_alias)) = table_alias(&table_with_joins.relation)
        else {
            return Err(Diagnostic::new(
                DiagnosticCode::FromUnsupported,
                "FROM items must be bare table references, not subqueries or derived tables",
            ));
        };
        let table = snapshot
            .resolve_table(&table_name, schema.as_deref())
            .cloned()
            .ok_or_else(|| {
                Diagnostic::new(
                    DiagnosticCode::TableUnknown,
                    format!("unknown table `{table_name}`"),
                )
            })?;
        let alias = explicit_alias.unwrap_or_else(|| table_name.clone());
        entries.push(FromEntry {
            alias,
            table,
            join_kind: JoinKind::Leading,
        });

        for join in table_with_joins.joins.iter_mut() {
            let Some((jschema, jtable_name, jexplicit_alias)) = table_alias(&join.relation) else {
                return Err(Diagnostic::new(
                    DiagnosticCode::FromUnsupported,
                    "JOIN items must be bare table references, not subqueries or derived tables",
                ));
            };
            let (join_kind, constraint) = match &mut join.join_operator {
                JoinOperator::Inner(constraint) => (JoinKind::Inner, constraint),
                JoinOperator::LeftOuter(constraint) => (JoinKind::LeftOuter, constraint),
                other => {
                    return Err(Diagnostic::new(
                        DiagnosticCode::JoinUnsupported,
                        format!("unsupported join kind: {other:?}"),
                    ));
                }
            };
            // NATURAL can appear on either operator variant in sqlparser's
            // AST (`Inner(Natural)`/`LeftOuter(Natural)`) rather than as its
            // own `JoinOperator` case, so the operator match above can't
            // reject it on its own.
            if matches!(constraint, JoinConstraint::Natural) {
                return Err(Diagnostic::new(
                    DiagnosticCode::JoinUnsupported,
                    "NATURAL joins are not supported",
                ));
            }

            let jtable = snapshot
                .resolve_table(&jtable_name, jschema.as_deref())
                .cloned()
                .ok_or_else(|| {
                    Diagnostic::new(
                        DiagnosticCode::TableUnknown,
                        format!("unknown table `{jtable_name}`"),
                    )
                })?;
            let jalias = jexplicit_alias.unwrap_or_else(|| jtable_name.clone());
            entries.push(FromEntry {
                alias: jalias,
                table: jtable,
                join_kind,
            });

            if let JoinConstraint::On(on_expr) = constraint {
                resolve_expr_tree(on_expr, &entries, &no_aliases)?;
            }
        }
    }

    if entries.is_empty() {
        return Err(Diagnostic::new(
            DiagnosticCode::TableMissing,
            "query has no FROM clause",
        ));
    }

    Ok(entries)
}

fn collect_select_aliases(select: &Select) -> HashSet<String> {
    select
        .projection
        .iter()
        .filter_map(|item| match item {
            SelectItem::ExprWithAlias { alias, .. } => Some(alias.value.to_lowercase()),
            _ => None,
        })
        .collect()
}

fn resolve_column_ref(
    expr: &mut sqg_parser::Expr,
    from_entries: &[FromEntry],
    select_aliases: &HashSet<String>,
) -> DiagnosticResult<()> {
    if let sqg_parser::Expr::CompoundIdentifier(parts) = expr {
        if parts.len() > 2 {
            return Err(Diagnostic::new(
                DiagnosticCode::ColumnUnsupported,
                "column references may have at most one table qualifier",
            ));
        }
    }

    let (qualifier, column) = sqg_parser::extract_column_name(expr)
        .expect("caller only invokes this for column-reference expressions");
    let lower_column = column.to_lowercase();

    if SENSITIVE_COLUMN_RE.is_match(&lower_column) {
        return Err(Diagnostic::new(
            DiagnosticCode::SensitiveColumn,
            format!("column `{column}` is not allowed"),
        ));
    }

    if let Some(qualifier) = qualifier {
        let lower_qualifier = qualifier.to_lowercase();
        let entry = from_entries
            .iter()
            .find(|e| e.alias.eq_ignore_ascii_case(&lower_qualifier))
            .or_else(|| {
                let matches: Vec<&FromEntry> = from_entries
                    .iter()
                    .filter(|e| e.table.table_name.eq_ignore_ascii_case(&lower_qualifier))
                    .collect();
                (matches.len() == 1).then(|| matches[0])
            });
        let Some(entry) = entry else {
            return Err(Diagnostic::new(
                DiagnosticCode::AliasUnknown,
                format!("unknown table qualifier `{qualifier}`"),
            ));
        };
        let canonical = canonical_column(&entry.table, &lower_column)
            .ok_or_else(|| {
                Diagnostic::new(
                    DiagnosticCode::ColumnUnknown,
                    format!(
                        "column `{column}` not found on `{}`",
                        entry.table.fully_qualified_name()
                    ),
                )
            })?
            .to_string();
        sqg_parser::set_column_name(expr, Some(&qualifier), &canonical);
        return Ok(());
    }

    if select_aliases.contains(&lower_column) {
        return Ok(());
    }

    if from_entries.is_empty() {
        return Err(Diagnostic::new(
            DiagnosticCode::ColumnNoSource,
            format!("column `{column}` has no FROM-list table to resolve against"),
        ));
    }

    let owners: Vec<(&FromEntry, &str)> = from_entries
        .iter()
        .filter_map(|e| canonical_column(&e.table, &lower_column).map(|c| (e, c)))
        .collect();

    match owners.as_slice() {
        [] => Err(Diagnostic::new(
            DiagnosticCode::ColumnUnknown,
            format!("column `{column}` not found in any referenced table"),
        )),
        [(_, canonical)] => {
            let canonical = canonical.to_string();
            sqg_parser::set_column_name(expr, None, &canonical);
            Ok(())
        }
        _ => Err(Diagnostic::new(
            DiagnosticCode::ColumnAmbiguous,
            format!("column `{column}` is ambiguous across referenced tables; qualify it"),
        )),
    }
}

fn resolve_expr_tree(
    expr: &mut sqg_parser::Expr,
    from_entries: &[FromEntry],
    select_aliases: &HashSet<String>,
) -> DiagnosticResult<()> {
    sqg_parser::try_for_each_leaf_expr_mut(expr, &mut |leaf| {
        resolve_column_ref(leaf, from_entries, select_aliases)
    })
}

/// Resolves table and column references for `validated` against `snapshot`
/// (spec §4.D), mutating the AST in place to canonicalize column case.
pub fn resolve(
    validated: &mut ValidatedSelect,
    snapshot: &SchemaSnapshot,
) -> DiagnosticResult<ResolveOutput> {
    let select_aliases = collect_select_aliases(validated.select());
    let from_entries = resolve_from(validated.select_mut(), snapshot)?;

    {
        let select = validated.select_mut();
        for item in select.projection.iter_mut() {
            match item {
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {
                    return Err(Diagnostic::new(
                        DiagnosticCode::Wildcard,
                        "`*` projections are not allowed",
                    ));
                }
                SelectItem::UnnamedExpr(expr) => {
                    resolve_expr_tree(expr, &from_entries, &select_aliases)?
                }
                SelectItem::ExprWithAlias { expr, .. } => {
                    resolve_expr_tree(expr, &from_entries, &select_aliases)?
                }
            }
        }

        if let Some(selection) = select.selection.as_mut() {
            resolve_expr_tree(selection, &from_entries, &select_aliases)?;
        }
        if let Some(having) = select.having.as_mut() {
            resolve_expr_tree(having, &from_entries, &select_aliases)?;
        }
    }

    for order_by_expr in validated.query_mut().order_by.iter_mut() {
        resolve_expr_tree(&mut order_by_expr.expr, &from_entries, &select_aliases)?;
    }

    let mut referenced_tables = Vec::new();
    let mut seen = HashSet::new();
    for entry in &from_entries {
        let fq = entry.table.fully_qualified_name();
        if seen.insert(fq.clone()) {
            referenced_tables.push(fq);
        }
    }

    let tenant_targets = from_entries
        .iter()
        .filter(|e| e.table.has_tenant_key())
        .map(|e| TenantTarget {
            alias: e.alias.clone(),
            tenant_column: e
                .table
                .tenant_column()
                .expect("has_tenant_key implies tenant_column is present")
                .to_string(),
            join_kind: e.join_kind,
        })
        .collect();

    Ok(ResolveOutput {
        from_entries,
        tenant_targets,
        referenced_tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqg_schema::{Dialect, SchemaSnapshot};

    fn snapshot() -> SchemaSnapshot {
        let users = SchemaTable::new(
            "public",
            "users",
            false,
            vec![
                "id".into(),
                "name".into(),
                "organizationId".into(),
                "password".into(),
            ],
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
    fn resolves_qualified_columns_to_canonical_case() {
        let mut validated = sqg_parser::parse("SELECT u.organizationid FROM users u").unwrap();
        let output = resolve(&mut validated, &snapshot()).unwrap();
        assert_eq!(output.referenced_tables, vec!["public.users".to_string()]);
        let sql = validated.query().to_string();
        assert!(sql.contains("organizationId"));
        assert!(!sql.contains("organizationid"));
    }

    #[test]
    fn rejects_wildcard() {
        let mut validated = sqg_parser::parse("SELECT * FROM users").unwrap();
        let err = resolve(&mut validated, &snapshot()).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::Wildcard);
    }

    #[test]
    fn rejects_sensitive_column() {
        let mut validated = sqg_parser::parse("SELECT u.password FROM users u").unwrap();
        let err = resolve(&mut validated, &snapshot()).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::SensitiveColumn);
    }

    #[test]
    fn rejects_unknown_table() {
        let mut validated = sqg_parser::parse("SELECT x.id FROM widgets x").unwrap();
        let err = resolve(&mut validated, &snapshot()).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::TableUnknown);
    }

    #[test]
    fn rejects_right_join() {
        let mut validated = sqg_parser::parse(
            "SELECT p.id FROM users u RIGHT JOIN payments p ON p.userId = u.id",
        )
        .unwrap();
        let err = resolve(&mut validated, &snapshot()).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::JoinUnsupported);
    }

    #[test]
    fn accepts_left_join_and_marks_tenant_targets() {
        let mut validated = sqg_parser::parse(
            "SELECT u.id, p.amount FROM users u LEFT JOIN payments p ON p.userId = u.id",
        )
        .unwrap();
        let output = resolve(&mut validated, &snapshot()).unwrap();
        assert_eq!(output.tenant_targets.len(), 2);
        assert_eq!(output.tenant_targets[0].join_kind, JoinKind::Leading);
        assert_eq!(output.tenant_targets[1].join_kind, JoinKind::LeftOuter);
    }

    #[test]
    fn rejects_ambiguous_unqualified_column() {
        let mut validated = sqg_parser::parse(
            "SELECT id FROM users u LEFT JOIN payments p ON p.userId = u.id",
        )
        .unwrap();
        let err = resolve(&mut validated, &snapshot()).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::ColumnAmbiguous);
    }

    #[test]
    fn rejects_sensitive_column_in_join_on_clause() {
        let mut validated = sqg_parser::parse(
            "SELECT u.id FROM users u LEFT JOIN payments p ON u.password = p.id",
        )
        .unwrap();
        let err = resolve(&mut validated, &snapshot()).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::SensitiveColumn);
    }

    #[test]
    fn canonicalizes_columns_in_join_on_clause() {
        let mut validated = sqg_parser::parse(
            "SELECT u.id FROM users u LEFT JOIN payments p ON p.userid = u.id",
        )
        .unwrap();
        resolve(&mut validated, &snapshot()).unwrap();
        let sql = validated.query().to_string();
        assert!(sql.contains("userId"));
        assert!(!sql.contains("userid ="));
    }

    #[test]
    fn rejects_natural_join() {
        let mut validated =
            sqg_parser::parse("SELECT u.id FROM users u NATURAL JOIN payments p").unwrap();
        let err = resolve(&mut validated, &snapshot()).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::JoinUnsupported);
    }

    #[test]
    fn rejects_natural_left_join() {
        let mut validated =
            sqg_parser::parse("SELECT u.id FROM users u NATURAL LEFT JOIN payments p").unwrap();
        let err = resolve(&mut validated, &snapshot()).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::JoinUnsupported);
    }

    #[test]
    fn leaves_select_list_alias_untouched() {
        let mut validated =
            sqg_parser::parse("SELECT u.id AS identifier FROM users u ORDER BY identifier").unwrap();
        assert!(resolve(&mut validated, &snapshot()).is_ok());
    }
}
