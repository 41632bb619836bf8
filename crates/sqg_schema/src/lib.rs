//! The schema model (spec §3, §4.A): an in-memory, case-folded view of the
//! tables and columns the gateway is allowed to reference, plus the pure
//! lookups the rest of the pipeline builds on. The snapshot is built once by
//! an external introspector and handed to the core as read-only; nothing in
//! this crate ever mutates a [`SchemaSnapshot`] after construction.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// The well-known column whose presence marks a table as multi-tenant.
pub const TENANT_COLUMN_LOWER: &str = "organizationid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    PostgreSql,
}

/// Metadata for one physical table or view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTable {
    pub schema_name: String,
    pub table_name: String,
    pub is_view: bool,
    /// Original-case column names, in declaration order.
    pub column_names: Vec<String>,
    /// lower(column) -> original-case column. Agrees in membership with
    /// the lower-cased set implied by `column_names`.
    lower_to_original: FxHashMap<String, String>,
    has_tenant_key: bool,
}

impl SchemaTable {
    pub fn new(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        is_view: bool,
        column_names: Vec<String>,
    ) -> Self {
        let mut lower_to_original = FxHashMap::default();
        for col in &column_names {
            lower_to_original.insert(col.to_lowercase(), col.clone());
        }
        let has_tenant_key = lower_to_original.contains_key(TENANT_COLUMN_LOWER);
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            is_view,
            column_names,
            lower_to_original,
            has_tenant_key,
        }
    }

    pub fn has_tenant_key(&self) -> bool {
        self.has_tenant_key
    }

    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }

    fn fully_qualified_key(&self) -> String {
        format!(
            "{}.{}",
            self.schema_name.to_lowercase(),
            self.table_name.to_lowercase()
        )
    }

    /// The tenant column's canonical (original-case) spelling, if this table
    /// carries one.
    pub fn tenant_column(&self) -> Option<&str> {
        self.lower_to_original
            .get(TENANT_COLUMN_LOWER)
            .map(String::as_str)
    }
}

/// An immutable collection of [`SchemaTable`] values (spec §3).
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    pub dialect: Dialect,
    pub refreshed_at_ms: u64,
    by_fully_qualified: FxHashMap<String, SchemaTable>,
    by_bare_name: FxHashMap<String, Vec<String>>,
    /// Fully-qualified keys in the order tables were supplied, used by
    /// [`format_for_prompt`](SchemaSnapshot::format_for_prompt).
    order: Vec<String>,
}

impl SchemaSnapshot {
    pub fn from_tables(dialect: Dialect, refreshed_at_ms: u64, tables: Vec<SchemaTable>) -> Self {
        let mut by_fully_qualified = FxHashMap::default();
        let mut by_bare_name: FxHashMap<String, Vec<String>> = FxHashMap::default();
        let mut order = Vec::with_capacity(tables.len());

        for table in tables {
            let fq_key = table.fully_qualified_key();
            let bare_key = table.table_name.to_lowercase();
            by_bare_name.entry(bare_key).or_default().push(fq_key.clone());
            order.push(fq_key.clone());
            by_fully_qualified.insert(fq_key, table);
        }

        Self {
            dialect,
            refreshed_at_ms,
            by_fully_qualified,
            by_bare_name,
            order,
        }
    }

    /// §4.A `resolveTable`.
    pub fn resolve_table(&self, name: &str, schema: Option<&str>) -> Option<&SchemaTable> {
        if let Some(schema) = schema {
            let key = format!("{}.{}", schema.to_lowercase(), name.to_lowercase());
            return self.by_fully_qualified.get(&key);
        }

        let candidates = self.by_bare_name.get(&name.to_lowercase())?;
        match candidates.len() {
            0 => None,
            1 => self.by_fully_qualified.get(&candidates[0]),
            _ => candidates
                .iter()
                .filter_map(|key| self.by_fully_qualified.get(key))
                .find(|table| table.schema_name.eq_ignore_ascii_case("public")),
        }
    }

    /// §4.A `formatForPrompt`: views first then base tables, each group in
    /// the snapshot's table order.
    pub fn format_for_prompt(&self) -> String {
        let mut lines = Vec::new();
        for is_view in [true, false] {
            for key in &self.order {
                let Some(table) = self.by_fully_qualified.get(key) else {
                    continue;
                };
                if table.is_view != is_view {
                    continue;
                }
                lines.push(format!(
                    "{}.{} ({})",
                    table.schema_name,
                    table.table_name,
                    table.column_names.join(", ")
                ));
            }
        }
        lines.join("\n")
    }

    pub fn table_count(&self) -> usize {
        self.by_fully_qualified.len()
    }
}

/// §4.A `canonicalColumn`.
pub fn canonical_column<'a>(table: &'a SchemaTable, lower_case_name: &str) -> Option<&'a str> {
    table
        .lower_to_original
        .get(&lower_case_name.to_lowercase())
        .map(String::as_str)
}
