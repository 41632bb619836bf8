//! The read-only lexical guard (spec §4.B): a deliberately coarse,
//! token-level filter applied both before parsing a candidate and after
//! serializing the rewritten statement. It never inspects the AST — only
//! the raw string — so it can catch anything a later stage might
//! accidentally introduce.

use std::sync::LazyLock;

use regex::{Regex, RegexSet};
use sqg_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticResult};

const DISALLOWED_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "truncate", "create", "grant", "revoke",
    "exec", "execute", "copy", "call", "do", "merge", "replace", "upsert", "vacuum", "analyze",
    "reindex", "cluster", "discard", "checkpoint",
];

const SIDE_EFFECT_FNS: &[&str] = &[
    "nextval",
    "setval",
    "pg_advisory_lock",
    "pg_advisory_xact_lock",
    "pg_sleep",
];

static KEYWORD_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    let patterns: Vec<String> = DISALLOWED_KEYWORDS
        .iter()
        .map(|kw| format!(r"(?i)\b{}\b", regex::escape(kw)))
        .collect();
    RegexSet::new(patterns).expect("keyword patterns compile")
});

static ROW_LOCK_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    let patterns = [
        r"(?i)\bfor\s+no\s+key\s+update\b",
        r"(?i)\bfor\s+key\s+share\b",
        r"(?i)\bfor\s+update\b",
        r"(?i)\bfor\s+share\b",
    ];
    RegexSet::new(patterns).expect("row lock patterns compile")
});

static SIDE_EFFECT_FN_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    let patterns: Vec<String> = SIDE_EFFECT_FNS
        .iter()
        .map(|name| format!(r"(?i)\b{}\s*\(", regex::escape(name)))
        .collect();
    RegexSet::new(patterns).expect("side-effect fn patterns compile")
});

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--|/\*").expect("comment pattern compiles"));

/// Runs the full guard over `sql`, returning the first violation found.
/// Check order follows spec §4.B's table.
pub fn check(sql: &str) -> DiagnosticResult<()> {
    if sql.contains(';') {
        return Err(Diagnostic::new(
            DiagnosticCode::Semicolon,
            "candidate SQL must not contain `;`",
        ));
    }

    if COMMENT_RE.is_match(sql) {
        return Err(Diagnostic::new(
            DiagnosticCode::Comment,
            "candidate SQL must not contain `--` or `/*` comments",
        ));
    }

    if let Some(index) = KEYWORD_SET.matches(sql).iter().next() {
        return Err(Diagnostic::new(
            DiagnosticCode::DisallowedKeyword,
            format!("disallowed keyword `{}` found", DISALLOWED_KEYWORDS[index]),
        ));
    }

    if ROW_LOCK_SET.is_match(sql) {
        return Err(Diagnostic::new(
            DiagnosticCode::RowLock,
            "row-locking clauses (FOR UPDATE/SHARE) are not allowed",
        ));
    }

    if let Some(index) = SIDE_EFFECT_FN_SET.matches(sql).iter().next() {
        return Err(Diagnostic::new(
            DiagnosticCode::SideEffectFn,
            format!("side-effecting function `{}(...)` is not allowed", SIDE_EFFECT_FNS[index]),
        ));
    }

    Ok(())
}

/// Re-applies [`check`] to serializer output (spec §4.G); any violation here
/// is a bug in the rewriter, not in the caller's input.
pub fn check_rewrite_output(sql: &str) -> DiagnosticResult<()> {
    check(sql).map_err(|inner| {
        Diagnostic::new(
            DiagnosticCode::InternalRewriteLeak,
            format!("rewriter produced a guard violation: {}", inner.message),
        )
    })
}
