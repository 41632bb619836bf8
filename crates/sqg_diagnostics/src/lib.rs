//! The single structured error type returned by every stage of the SQL
//! safety pipeline. Every error is thrown upward unchanged — no stage
//! retries or swallows a failure from an earlier one.

use std::fmt;

use strum::{Display, EnumString};

/// Machine-readable error code, grouped by the pipeline stage that raises it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum DiagnosticCode {
    // --- guard (pre-parse and post-serialize, §4.B) ---
    Semicolon,
    Comment,
    DisallowedKeyword,
    RowLock,
    SideEffectFn,
    InternalRewriteLeak,

    // --- parse (§4.C) ---
    ParseError,
    MultiStatement,
    NotSelect,
    CteNotSupported,
    SelectInto,

    // --- resolve (§4.D) ---
    FromUnsupported,
    SubqueryNotSupported,
    TableMissing,
    TableUnknown,
    JoinUnsupported,
    AliasUnknown,
    ColumnUnsupported,
    Wildcard,
    ParameterNotAllowed,
    SensitiveColumn,
    ColumnUnknown,
    ColumnAmbiguous,
    ColumnNoSource,

    // --- pagination (§4.F) ---
    OffsetNotAllowed,
    LimitNotNumeric,
    LimitInvalid,

    // --- execution (§4.H) ---
    DbSchemaError,
    DbOther,
}

impl DiagnosticCode {
    /// SQLSTATE codes that map to [`DiagnosticCode::DbSchemaError`] (spec §7).
    pub const SCHEMA_SQLSTATES: &'static [&'static str] =
        &["42703", "42P01", "42702", "42883", "42P10", "42601"];
}

/// A single structured error: a machine-readable code plus a human message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Diagnostic {}

pub type DiagnosticResult<T> = Result<T, Diagnostic>;
