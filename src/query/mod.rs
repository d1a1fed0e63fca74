//! # Resource Query Engine
//!
//! Generic translation of declarative filter/sort/pagination requests
//! into parameterized SQL, shared by every resource kind the management
//! layer exposes.
//!
//! Each resource kind declares a closed [`ColumnMap`] from externally
//! visible keys to storage expressions. The engine builds one
//! parameterized statement per invocation (values are always bound,
//! never interpolated), intersects the caller's visibility scope, and
//! guarantees that `count` and `select_rows` share the identical WHERE
//! clause so filtered counts always agree with filtered row sets.
//!
//! "Now" is captured once per list/count pair by the caller and
//! injected into computed expressions (such as the derived validity
//! flag), keeping long-running pagination time-consistent.

use crate::errors::{CertfleetError, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

/// Value kind of an externally filterable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
}

/// One entry of a resource kind's column map.
///
/// `select` is the row-selection expression; `filter` overrides it for
/// filtering/sorting when the two differ (e.g. a presentation column
/// selecting an ISO timestamp while filtering on the epoch value).
/// Expressions may contain the `{now}` token, replaced once per query
/// invocation with the captured epoch seconds.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub key: &'static str,
    pub select: &'static str,
    pub filter: Option<&'static str>,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn text(key: &'static str, select: &'static str) -> Self {
        Self { key, select, filter: None, kind: ColumnKind::Text }
    }

    pub const fn integer(key: &'static str, select: &'static str) -> Self {
        Self { key, select, filter: None, kind: ColumnKind::Integer }
    }

    pub const fn computed(
        key: &'static str,
        select: &'static str,
        filter: &'static str,
        kind: ColumnKind,
    ) -> Self {
        Self { key, select, filter: Some(filter), kind }
    }

    fn filter_expr(&self) -> &'static str {
        self.filter.unwrap_or(self.select)
    }
}

/// Closed set of externally filterable/sortable columns for one
/// resource kind, plus the storage table they resolve against.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    resource_kind: &'static str,
    table: &'static str,
    columns: &'static [Column],
}

impl ColumnMap {
    /// Declare a column map. Panics on duplicate keys: maps are static
    /// declarations and a duplicate is a programming error caught by
    /// the constructing module's startup/tests, not a runtime input.
    pub fn new(
        resource_kind: &'static str,
        table: &'static str,
        columns: &'static [Column],
    ) -> Self {
        for (i, a) in columns.iter().enumerate() {
            for b in &columns[i + 1..] {
                if a.key == b.key {
                    panic!("duplicate column key '{}' in {} column map", a.key, resource_kind);
                }
            }
        }
        Self { resource_kind, table, columns }
    }

    pub fn resource_kind(&self) -> &'static str {
        self.resource_kind
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Resolve an external key; unknown keys are rejected, never
    /// silently ignored.
    pub fn get(&self, key: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.key == key)
            .ok_or_else(|| CertfleetError::unknown_filter_column(key, self.resource_kind))
    }

    /// Completeness check against the entity's persisted fields, run at
    /// startup by the declaring module: every named field must be
    /// covered by the map.
    pub fn ensure_covers(&self, fields: &[&str]) -> Result<()> {
        for field in fields {
            if !self.columns.iter().any(|c| c.key == *field) {
                return Err(CertfleetError::internal(format!(
                    "column map for {} does not cover persisted field '{}'",
                    self.resource_kind, field
                )));
            }
        }
        Ok(())
    }

    fn text_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.kind == ColumnKind::Text)
    }
}

/// Comparison operator of a filter constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Contains,
}

impl Comparator {
    fn sql(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "!=",
            Comparator::Lt => "<",
            Comparator::Gt => ">",
            Comparator::Le => "<=",
            Comparator::Ge => ">=",
            Comparator::Contains => "LIKE",
        }
    }
}

/// A single `{key, comparator, value}` constraint.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub column: String,
    pub comparator: Comparator,
    pub value: FilterValue,
}

/// Typed constraint value.
#[derive(Debug, Clone)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn sql(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

/// Declarative filter/sort/pagination request.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub constraints: Vec<Constraint>,
    pub keyword: Option<String>,
    pub sort: String,
    pub direction: SortDirection,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            constraints: Vec::new(),
            keyword: None,
            sort: "name".to_string(),
            direction: SortDirection::Ascending,
            offset: 0,
            limit: None,
        }
    }
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text<K: Into<String>, V: Into<String>>(
        mut self,
        column: K,
        comparator: Comparator,
        value: V,
    ) -> Self {
        self.constraints.push(Constraint {
            column: column.into(),
            comparator,
            value: FilterValue::Text(value.into()),
        });
        self
    }

    pub fn with_integer<K: Into<String>>(
        mut self,
        column: K,
        comparator: Comparator,
        value: i64,
    ) -> Self {
        self.constraints.push(Constraint {
            column: column.into(),
            comparator,
            value: FilterValue::Integer(value),
        });
        self
    }

    pub fn with_keyword<S: Into<String>>(mut self, keyword: S) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn sort_by<S: Into<String>>(mut self, column: S, direction: SortDirection) -> Self {
        self.sort = column.into();
        self.direction = direction;
        self
    }

    pub fn paginate(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// Visibility scope a resource query is intersected with. Implemented
/// by the access control gate; the engine only requires that the scope
/// contribute a predicate over the target table.
pub trait Scope: Send + Sync {
    /// Push a parenthesized boolean predicate (with its binds) onto the
    /// statement being built. `table` is the resource table name.
    fn push_predicate(&self, builder: &mut QueryBuilder<'_, Sqlite>, table: &str);
}

/// Scope that makes every row visible. Used by internal maintenance
/// paths (bulk ownership transfer on principal deletion).
pub struct Unscoped;

impl Scope for Unscoped {
    fn push_predicate(&self, builder: &mut QueryBuilder<'_, Sqlite>, _table: &str) {
        builder.push("1=1");
    }
}

/// Substitute the `{now}` token in a column expression with the epoch
/// value captured for this invocation. The value is an integer produced
/// by the engine itself, never caller input.
fn render_expr(expr: &str, now: i64) -> String {
    if expr.contains("{now}") {
        expr.replace("{now}", &now.to_string())
    } else {
        expr.to_string()
    }
}

fn push_constraint(
    builder: &mut QueryBuilder<'_, Sqlite>,
    map: &ColumnMap,
    constraint: &Constraint,
    now: i64,
) -> Result<()> {
    let column = map.get(&constraint.column)?;
    let expr = render_expr(column.filter_expr(), now);

    match (&constraint.value, column.kind) {
        (FilterValue::Integer(value), ColumnKind::Integer) => {
            if constraint.comparator == Comparator::Contains {
                return Err(CertfleetError::validation(format!(
                    "contains comparator is not applicable to integer column '{}'",
                    column.key
                )));
            }
            builder.push(expr);
            builder.push(format!(" {} ", constraint.comparator.sql()));
            builder.push_bind(*value);
        }
        (FilterValue::Text(value), _) => {
            builder.push(expr);
            builder.push(format!(" {} ", constraint.comparator.sql()));
            if constraint.comparator == Comparator::Contains {
                builder.push_bind(format!("%{}%", value));
            } else {
                builder.push_bind(value.clone());
            }
        }
        (FilterValue::Integer(value), ColumnKind::Text) => {
            // Integer literal against a text column: compare textually.
            builder.push(expr);
            builder.push(format!(" {} ", constraint.comparator.sql()));
            builder.push_bind(value.to_string());
        }
    }

    Ok(())
}

/// Append WHERE clause (visibility scope + constraints + keyword) to a
/// statement. Shared verbatim by `count` and `select_rows`.
fn push_where(
    builder: &mut QueryBuilder<'_, Sqlite>,
    map: &ColumnMap,
    scope: &dyn Scope,
    spec: &FilterSpec,
    now: i64,
) -> Result<()> {
    builder.push(" WHERE ");
    scope.push_predicate(builder, map.table());

    for constraint in &spec.constraints {
        builder.push(" AND ");
        push_constraint(builder, map, constraint, now)?;
    }

    if let Some(keyword) = &spec.keyword {
        builder.push(" AND (");
        let mut first = true;
        for column in map.text_columns() {
            if !first {
                builder.push(" OR ");
            }
            first = false;
            builder.push(render_expr(column.filter_expr(), now));
            builder.push(" LIKE ");
            builder.push_bind(format!("%{}%", keyword));
        }
        if first {
            // No text columns to match against; keyword matches nothing.
            builder.push("0");
        }
        builder.push(")");
    }

    Ok(())
}

fn push_order_and_window(
    builder: &mut QueryBuilder<'_, Sqlite>,
    map: &ColumnMap,
    spec: &FilterSpec,
    now: i64,
) -> Result<()> {
    let sort_column = map.get(&spec.sort)?;
    builder.push(" ORDER BY ");
    builder.push(render_expr(sort_column.filter_expr(), now));
    builder.push(format!(" {}", spec.direction.sql()));
    // Stable tie-break so pagination windows are deterministic.
    builder.push(format!(", {}.id ASC", map.table()));

    match spec.limit {
        Some(limit) => {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
            builder.push(" OFFSET ");
            builder.push_bind(spec.offset as i64);
        }
        None if spec.offset > 0 => {
            // SQLite requires a LIMIT clause to use OFFSET; -1 = unbounded.
            builder.push(" LIMIT -1 OFFSET ");
            builder.push_bind(spec.offset as i64);
        }
        None => {}
    }

    Ok(())
}

/// Number of matching rows, ignoring pagination. Always consistent with
/// what `select_rows` would return in full for the same spec and `now`.
pub async fn count(
    conn: &mut SqliteConnection,
    map: &ColumnMap,
    scope: &dyn Scope,
    spec: &FilterSpec,
    now: i64,
) -> Result<i64> {
    // The sort key never shapes a count, but an unknown key must fail
    // here exactly as it does in select_rows for the same spec.
    map.get(&spec.sort)?;

    let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM ");
    builder.push(map.table());
    push_where(&mut builder, map, scope, spec, now)?;

    let n: i64 = builder
        .build_query_scalar()
        .fetch_one(conn)
        .await
        .map_err(|e| CertfleetError::database(e, format!("Failed to count {}", map.table())))?;

    Ok(n)
}

/// Matching rows in deterministic order with the pagination window
/// applied. Every declared column is selected under its external key.
pub async fn select_rows(
    conn: &mut SqliteConnection,
    map: &ColumnMap,
    scope: &dyn Scope,
    spec: &FilterSpec,
    now: i64,
) -> Result<Vec<SqliteRow>> {
    let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT ");
    for (i, column) in map.columns.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(render_expr(column.select, now));
        builder.push(format!(" AS {}", column.key));
    }
    builder.push(" FROM ");
    builder.push(map.table());

    push_where(&mut builder, map, scope, spec, now)?;
    push_order_and_window(&mut builder, map, spec, now)?;

    let rows = builder
        .build()
        .fetch_all(conn)
        .await
        .map_err(|e| CertfleetError::database(e, format!("Failed to query {}", map.table())))?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    fn widget_map() -> ColumnMap {
        static COLUMNS: &[Column] = &[
            Column::text("name", "widgets.name"),
            Column::integer("size", "widgets.size"),
            Column::computed(
                "fresh",
                "(CASE WHEN widgets.expires >= {now} THEN 1 ELSE 0 END)",
                "(CASE WHEN widgets.expires >= {now} THEN 1 ELSE 0 END)",
                ColumnKind::Integer,
            ),
        ];
        ColumnMap::new("widget", "widgets", COLUMNS)
    }

    async fn seeded_pool() -> crate::storage::DbPool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect");

        sqlx::raw_sql(
            r#"
            CREATE TABLE widgets (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                expires INTEGER NOT NULL
            );
            INSERT INTO widgets (name, size, expires) VALUES
                ('anvil', 10, 100),
                ('bolt', 2, 300),
                ('crate', 10, 200),
                ('drill', 7, 50);
            "#,
        )
        .execute(&pool)
        .await
        .expect("seed");

        pool
    }

    #[test]
    fn unknown_key_is_rejected() {
        let map = widget_map();
        let err = map.get("bogus").unwrap_err();
        assert!(matches!(err, CertfleetError::UnknownFilterColumn { .. }));
    }

    #[test]
    #[should_panic(expected = "duplicate column key")]
    fn duplicate_keys_panic() {
        static DUP: &[Column] =
            &[Column::text("name", "t.name"), Column::text("name", "t.other")];
        ColumnMap::new("dup", "t", DUP);
    }

    #[test]
    fn ensure_covers_detects_gaps() {
        let map = widget_map();
        assert!(map.ensure_covers(&["name", "size"]).is_ok());
        assert!(map.ensure_covers(&["name", "weight"]).is_err());
    }

    #[test]
    fn render_expr_substitutes_now() {
        assert_eq!(render_expr("expires >= {now}", 42), "expires >= 42");
        assert_eq!(render_expr("plain", 42), "plain");
    }

    #[tokio::test]
    async fn count_matches_unpaginated_list() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let map = widget_map();

        let spec = FilterSpec::new().with_integer("size", Comparator::Eq, 10);
        let n = count(&mut conn, &map, &Unscoped, &spec, 150).await.unwrap();
        let rows = select_rows(&mut conn, &map, &Unscoped, &spec, 150).await.unwrap();
        assert_eq!(n, rows.len() as i64);
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn pagination_windows_are_slices() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let map = widget_map();

        let full_spec = FilterSpec::new();
        let full = select_rows(&mut conn, &map, &Unscoped, &full_spec, 150).await.unwrap();
        let names: Vec<String> = full.iter().map(|r| r.get("name")).collect();
        assert_eq!(names, vec!["anvil", "bolt", "crate", "drill"]);

        for offset in 0..5u64 {
            for limit in 0..5u64 {
                let spec = FilterSpec::new().paginate(offset, limit);
                let page = select_rows(&mut conn, &map, &Unscoped, &spec, 150).await.unwrap();
                let page_names: Vec<String> = page.iter().map(|r| r.get("name")).collect();
                let lo = (offset as usize).min(names.len());
                let hi = (lo + limit as usize).min(names.len());
                assert_eq!(page_names, &names[lo..hi], "offset={} limit={}", offset, limit);
            }
        }
    }

    #[tokio::test]
    async fn computed_column_filters_consistently() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let map = widget_map();

        // At now=150, "fresh" widgets are bolt (300) and crate (200).
        let spec = FilterSpec::new().with_integer("fresh", Comparator::Eq, 1);
        let n = count(&mut conn, &map, &Unscoped, &spec, 150).await.unwrap();
        let rows = select_rows(&mut conn, &map, &Unscoped, &spec, 150).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(rows.len(), 2);
        let fresh: Vec<i64> = rows.iter().map(|r| r.get("fresh")).collect();
        assert!(fresh.iter().all(|&f| f == 1));

        // The same pair at a different "now" stays internally consistent.
        let n = count(&mut conn, &map, &Unscoped, &spec, 250).await.unwrap();
        let rows = select_rows(&mut conn, &map, &Unscoped, &spec, 250).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn keyword_matches_text_columns() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let map = widget_map();

        let spec = FilterSpec::new().with_keyword("ra");
        let rows = select_rows(&mut conn, &map, &Unscoped, &spec, 150).await.unwrap();
        let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
        assert_eq!(names, vec!["crate"]);
    }

    #[tokio::test]
    async fn sort_direction_and_tie_break() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let map = widget_map();

        let spec = FilterSpec::new().sort_by("size", SortDirection::Descending);
        let rows = select_rows(&mut conn, &map, &Unscoped, &spec, 150).await.unwrap();
        let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
        // anvil and crate tie on size 10; insertion order (id) breaks the tie.
        assert_eq!(names, vec!["anvil", "crate", "drill", "bolt"]);
    }

    #[tokio::test]
    async fn unknown_sort_key_is_rejected() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let map = widget_map();

        let spec = FilterSpec::new().sort_by("bogus", SortDirection::Ascending);
        // SqliteRow is not Debug, so take the error side explicitly.
        let err = select_rows(&mut conn, &map, &Unscoped, &spec, 150).await.err().unwrap();
        assert!(matches!(err, CertfleetError::UnknownFilterColumn { .. }));

        // The count half of the pair rejects the same spec identically.
        let err = count(&mut conn, &map, &Unscoped, &spec, 150).await.unwrap_err();
        assert!(matches!(err, CertfleetError::UnknownFilterColumn { .. }));
    }

    #[tokio::test]
    async fn contains_on_integer_column_is_invalid() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let map = widget_map();

        let spec = FilterSpec::new().with_integer("size", Comparator::Contains, 1);
        let err = count(&mut conn, &map, &Unscoped, &spec, 150).await.unwrap_err();
        assert!(matches!(err, CertfleetError::Validation { .. }));
    }
}
