//! AST Validator
//!
//! Walks a parsed statement and proves it is a single read-only SELECT whose
//! every table, column, function and literal is authorized. The walk fails
//! fast on the first violation; on success it yields the
//! [`ValidationSummary`] consumed by the rewriter.
//!
//! Anything the walk does not explicitly understand is rejected.

use crate::catalog::{normalize_name, CatalogAllowlist};
use crate::config::PolicyConfig;
use crate::error::{PolicyError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::{
    Distinct, Expr, Function, FunctionArg, FunctionArgExpr, GroupByExpr, Ident, JoinConstraint,
    JoinOperator, Query, Select, SelectItem, SetExpr, Statement, TableAlias, TableFactor,
    TableWithJoins, UnaryOperator, Value, Visit, Visitor, WindowFrameBound, WindowSpec, WindowType,
};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

lazy_static! {
    static ref INTERVAL_LITERAL: Regex =
        Regex::new(r"(?i)^\d+\s+(day|days|week|weeks|month|months|year|years)$").unwrap();
}

const SET_OPERATION_ERROR: &str = "UNION, VALUES, and recursive queries are not allowed.";
const STAR_ERROR: &str = "SELECT * is not allowed.";

/// A real (allowlisted) table referenced by the statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

/// What the rewriter needs to know about a validated statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSummary {
    pub tables: Vec<TableRef>,
    pub cte_aliases: HashSet<String>,
    /// Top-level WHERE already filters on the date or timestamp column
    pub has_date_filter: bool,
    /// The query truncates time to week/month/year
    pub is_trend_query: bool,
    /// First top-level FROM relation exposing the date column; the injected
    /// time window is qualified with it
    pub date_anchor: Option<Ident>,
}

/// What a name in a FROM clause stands for
#[derive(Debug)]
enum Relation {
    /// Allowlisted table (real name)
    Table(String),
    /// Reference to a CTE (CTE name)
    Cte(String),
    /// FROM-subquery or unnest with the columns it exposes
    Derived(HashSet<String>),
}

/// Collects the outermost expressions of an AST node
#[derive(Default)]
struct TopLevelExprs {
    depth: usize,
    exprs: Vec<Expr>,
}

impl Visitor for TopLevelExprs {
    type Break = ();

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        if self.depth == 0 {
            self.exprs.push(expr.clone());
        }
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_expr(&mut self, _expr: &Expr) -> ControlFlow<()> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }
}

/// Looks for the date or timestamp column without entering subqueries
struct DateReference<'a> {
    config: &'a PolicyConfig,
    /// Number of enclosing subquery expressions
    nested: usize,
}

fn is_subquery(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } | Expr::ArraySubquery(_)
    )
}

impl Visitor for DateReference<'_> {
    type Break = ();

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        if self.nested == 0 {
            if let Expr::InSubquery { expr: operand, .. } = expr {
                if references_date_column(operand, self.config) {
                    return ControlFlow::Break(());
                }
            }
            if date_column_name(expr).map_or(false, |name| self.config.is_date_column(&name)) {
                return ControlFlow::Break(());
            }
        }
        if is_subquery(expr) {
            self.nested += 1;
        }
        ControlFlow::Continue(())
    }

    fn post_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        if is_subquery(expr) {
            self.nested = self.nested.saturating_sub(1);
        }
        ControlFlow::Continue(())
    }
}

/// Names visible inside one SELECT
#[derive(Debug, Default)]
struct Scope {
    relations: Vec<(String, Relation)>,
    derived_columns: HashSet<String>,
    output_aliases: HashSet<String>,
}

impl Scope {
    fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|(key, _)| key == name).map(|(_, rel)| rel)
    }
}

struct ValidationContext<'a> {
    allowlist: &'a CatalogAllowlist,
    config: &'a PolicyConfig,
    /// CTE name -> output columns
    ctes: HashMap<String, HashSet<String>>,
    tables: Vec<TableRef>,
    is_trend_query: bool,
    date_anchor: Option<Ident>,
    scopes: Vec<Scope>,
}

/// Validate a parsed batch against the allowlist
pub fn validate(
    statements: &[Statement],
    allowlist: &CatalogAllowlist,
    config: &PolicyConfig,
) -> Result<ValidationSummary> {
    if statements.len() != 1 {
        return Err(PolicyError::Structural(
            "Only a single SQL statement is allowed.".to_string(),
        ));
    }
    let query = match &statements[0] {
        Statement::Query(query) => query,
        _ => {
            return Err(PolicyError::Structural(
                "Only SELECT or WITH ... SELECT statements are allowed.".to_string(),
            ))
        }
    };

    if let Some(limit) = &query.limit {
        if literal_limit(limit).is_none() {
            return Err(PolicyError::Literal("LIMIT must be a constant number.".to_string()));
        }
    }

    let mut ctx = ValidationContext {
        allowlist,
        config,
        ctes: HashMap::new(),
        tables: Vec::new(),
        is_trend_query: false,
        date_anchor: None,
        scopes: Vec::new(),
    };
    ctx.validate_query(query, true)?;

    if ctx.tables.is_empty() {
        return Err(PolicyError::SchemaAccess(
            "At least one allowlisted table is required.".to_string(),
        ));
    }

    let has_date_filter = match query.body.as_ref() {
        SetExpr::Select(select) => select
            .selection
            .as_ref()
            .map(|selection| references_date_column(selection, config))
            .unwrap_or(false),
        _ => false,
    };

    Ok(ValidationSummary {
        tables: ctx.tables,
        cte_aliases: ctx.ctes.into_keys().collect(),
        has_date_filter,
        is_trend_query: ctx.is_trend_query,
        date_anchor: ctx.date_anchor,
    })
}

/// Integer value of a constant LIMIT expression (`10`, `-1`, `(5)`)
pub fn literal_limit(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Value(Value::Number(raw, _)) => raw.parse::<i64>().ok().or_else(|| {
            (!raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit())).then_some(i64::MAX)
        }),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => literal_limit(expr).map(|n| -n),
        Expr::UnaryOp {
            op: UnaryOperator::Plus,
            expr,
        }
        | Expr::Nested(expr) => literal_limit(expr),
        _ => None,
    }
}

/// True when `expr` mentions the date or timestamp column outside of any
/// subquery it contains
pub fn references_date_column(expr: &Expr, config: &PolicyConfig) -> bool {
    let mut visitor = DateReference { config, nested: 0 };
    expr.visit(&mut visitor).is_break()
}

/// Normalized column name of a bare or qualified column reference
pub fn date_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(normalize_name(&ident.value)),
        Expr::CompoundIdentifier(idents) => idents.last().map(|i| normalize_name(&i.value)),
        _ => None,
    }
}

pub fn is_system_schema(schema: &str) -> bool {
    schema == "pg_catalog" || schema == "information_schema" || schema.starts_with("pg_")
}

fn structural(msg: impl Into<String>) -> PolicyError {
    PolicyError::Structural(msg.into())
}

fn access(msg: impl Into<String>) -> PolicyError {
    PolicyError::SchemaAccess(msg.into())
}

fn normalized_parts(idents: &[Ident]) -> Vec<String> {
    idents.iter().map(|i| normalize_name(&i.value)).collect()
}

fn alias_name(alias: Option<&TableAlias>) -> Option<String> {
    alias.map(|a| normalize_name(&a.name.value))
}

fn alias_columns(alias: Option<&TableAlias>) -> Option<HashSet<String>> {
    alias
        .filter(|a| !a.columns.is_empty())
        .map(|a| a.columns.iter().map(|c| normalize_name(&c.value)).collect())
}

/// Column names a SELECT list exposes to an enclosing query
fn output_columns(projection: &[SelectItem]) -> HashSet<String> {
    projection
        .iter()
        .filter_map(|item| match item {
            SelectItem::ExprWithAlias { alias, .. } => Some(normalize_name(&alias.value)),
            SelectItem::UnnamedExpr(expr) => implicit_column_name(expr),
            _ => None,
        })
        .collect()
}

/// Name PostgreSQL gives an unaliased select item
fn implicit_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => date_column_name(expr),
        Expr::Function(func) => func.name.0.last().map(|i| normalize_name(&i.value)),
        Expr::Cast { expr, .. } | Expr::Nested(expr) => implicit_column_name(expr),
        _ => None,
    }
}

fn string_literal(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Value(Value::SingleQuotedString(s)) => Some(s.as_str()),
        _ => None,
    }
}

impl<'a> ValidationContext<'a> {
    fn scope(&mut self) -> &mut Scope {
        if self.scopes.is_empty() {
            self.scopes.push(Scope::default());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Validate a query in its own scope and return the columns it exposes
    fn validate_query(&mut self, query: &Query, main: bool) -> Result<HashSet<String>> {
        if let Some(with) = &query.with {
            if with.recursive {
                return Err(structural(SET_OPERATION_ERROR));
            }
            for cte in &with.cte_tables {
                let name = normalize_name(&cte.alias.name.value);
                let columns = self.validate_query(&cte.query, false)?;
                let columns = alias_columns(Some(&cte.alias)).unwrap_or(columns);
                self.ctes.insert(name, columns);
            }
        }
        if !query.locks.is_empty() {
            return Err(structural("Row-locking clauses are not allowed."));
        }
        if query.fetch.is_some() {
            return Err(structural("FETCH is not allowed; use LIMIT."));
        }

        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select,
            SetExpr::SetOperation { .. } | SetExpr::Values(_) => {
                return Err(structural(SET_OPERATION_ERROR))
            }
            _ => return Err(structural("Only plain SELECT queries are allowed.")),
        };

        self.scopes.push(Scope::default());
        let result = self.validate_select(select, query, main);
        self.scopes.pop();
        result
    }

    fn validate_select(&mut self, select: &Select, query: &Query, main: bool) -> Result<HashSet<String>> {
        if select.into.is_some() {
            return Err(structural("SELECT INTO is not allowed."));
        }
        if select.top.is_some() {
            return Err(structural("TOP is not allowed; use LIMIT."));
        }
        if select.qualify.is_some() {
            return Err(structural("QUALIFY is not allowed."));
        }
        if !select.lateral_views.is_empty()
            || !select.cluster_by.is_empty()
            || !select.distribute_by.is_empty()
            || !select.sort_by.is_empty()
        {
            return Err(structural("Unsupported syntax in SELECT."));
        }

        for table in &select.from {
            self.register_table_with_joins(table)?;
        }

        if main {
            self.date_anchor = self.find_date_anchor(&select.from);
        }

        for table in &select.from {
            self.validate_join_constraints(table)?;
        }
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.validate_expr(expr)?
                }
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                    return Err(access(STAR_ERROR))
                }
            }
        }
        for window in &select.named_window {
            self.validate_window(&window.1)?;
        }

        // Output names only become visible once the list that defines them
        // has been resolved against the real relations.
        let aliases: HashSet<String> = select
            .projection
            .iter()
            .filter_map(|item| match item {
                SelectItem::ExprWithAlias { alias, .. } => Some(normalize_name(&alias.value)),
                _ => None,
            })
            .collect();
        self.scope().output_aliases = aliases;

        if let Some(Distinct::On(exprs)) = &select.distinct {
            for expr in exprs {
                self.validate_expr(expr)?;
            }
        }
        if let Some(selection) = &select.selection {
            self.validate_expr(selection)?;
        }
        if let GroupByExpr::Expressions(exprs) = &select.group_by {
            for expr in exprs {
                self.validate_expr(expr)?;
            }
        }
        if let Some(having) = &select.having {
            self.validate_expr(having)?;
        }
        for order in &query.order_by {
            self.validate_expr(&order.expr)?;
        }
        if let Some(limit) = &query.limit {
            self.validate_expr(limit)?;
        }
        if let Some(offset) = &query.offset {
            self.validate_expr(&offset.value)?;
        }

        Ok(output_columns(&select.projection))
    }

    fn register_table_with_joins(&mut self, table: &TableWithJoins) -> Result<()> {
        self.register_factor(&table.relation)?;
        for join in &table.joins {
            self.register_factor(&join.relation)?;
        }
        Ok(())
    }

    fn register_factor(&mut self, factor: &TableFactor) -> Result<()> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                let parts = normalized_parts(&name.0);
                let table_name = parts.last().cloned().unwrap_or_default();
                if parts.len() > 1 {
                    self.check_schema(&parts[..parts.len() - 1])?;
                }
                if let Some(args) = args {
                    let args = args
                        .iter()
                        .map(|arg| match arg {
                            FunctionArg::Named { arg, .. } | FunctionArg::Unnamed(arg) => match arg {
                                FunctionArgExpr::Expr(expr) => Ok(expr.clone()),
                                _ => Err(access(STAR_ERROR)),
                            },
                        })
                        .collect::<Result<Vec<_>>>()?;
                    return self.register_table_function(&table_name, &args, alias.as_ref());
                }
                let key = alias_name(alias.as_ref()).unwrap_or_else(|| table_name.clone());

                if parts.len() == 1 {
                    let cte_columns = self.ctes.get(&table_name).cloned();
                    if let Some(cte_columns) = cte_columns {
                        let exposed = alias_columns(alias.as_ref()).unwrap_or(cte_columns);
                        let scope = self.scope();
                        scope.derived_columns.extend(exposed);
                        scope.relations.push((key, Relation::Cte(table_name)));
                        return Ok(());
                    }
                }

                if !self.allowlist.has_table(&table_name) {
                    return Err(access(format!("Table is not allowlisted: {}", table_name)));
                }
                self.tables.push(TableRef {
                    name: table_name.clone(),
                    alias: alias_name(alias.as_ref()),
                });
                self.scope().relations.push((key, Relation::Table(table_name)));
                Ok(())
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let Some(alias_ident) = alias_name(alias.as_ref()) else {
                    return Err(structural("Subqueries in FROM must have an alias."));
                };
                let columns = self.validate_query(subquery, false)?;
                let columns = alias_columns(alias.as_ref()).unwrap_or(columns);
                let scope = self.scope();
                scope.derived_columns.extend(columns.iter().cloned());
                scope.relations.push((alias_ident, Relation::Derived(columns)));
                Ok(())
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.register_table_with_joins(table_with_joins),
            TableFactor::UNNEST { alias, .. } => {
                let mut args = TopLevelExprs::default();
                let _ = factor.visit(&mut args);
                self.register_table_function("unnest", &args.exprs, alias.as_ref())
            }
            _ => Err(structural("Set-returning functions in FROM are not allowed.")),
        }
    }

    /// `unnest(<one arg>)` is the only function allowed in FROM
    fn register_table_function(
        &mut self,
        name: &str,
        args: &[Expr],
        alias: Option<&TableAlias>,
    ) -> Result<()> {
        if name != "unnest" {
            return Err(structural("Set-returning functions in FROM are not allowed."));
        }
        if args.len() != 1 {
            return Err(structural("UNNEST in FROM must take exactly one argument."));
        }
        self.validate_expr(&args[0])?;

        let key = alias_name(alias).unwrap_or_else(|| "unnest".to_string());
        let columns = alias_columns(alias).unwrap_or_else(|| HashSet::from([key.clone()]));
        let scope = self.scope();
        scope.derived_columns.extend(columns.iter().cloned());
        scope.relations.push((key, Relation::Derived(columns)));
        Ok(())
    }

    /// Qualifiers in front of a table name: only the reflected schema
    fn check_schema(&self, qualifiers: &[String]) -> Result<()> {
        let Some(schema) = qualifiers.last() else {
            return Ok(());
        };
        if is_system_schema(schema) {
            return Err(access(format!("System schema is not allowed: {}", schema)));
        }
        if qualifiers.len() > 1 {
            return Err(access(format!(
                "Cross-database references are not allowed: {}",
                qualifiers.join(".")
            )));
        }
        if *schema != self.config.schema {
            return Err(access(format!("Schema is not allowed: {}", schema)));
        }
        Ok(())
    }

    fn find_date_anchor(&self, from: &[TableWithJoins]) -> Option<Ident> {
        let date_column = &self.config.date_column;
        let scope = self.scopes.last()?;
        let candidates = from
            .iter()
            .flat_map(|t| std::iter::once(&t.relation).chain(t.joins.iter().map(|j| &j.relation)));
        for factor in candidates {
            let ident = match factor {
                TableFactor::Table {
                    name, alias, args: None, ..
                } => match alias {
                    Some(alias) => alias.name.clone(),
                    None => name.0.last()?.clone(),
                },
                TableFactor::Derived {
                    alias: Some(alias), ..
                } => alias.name.clone(),
                _ => continue,
            };
            let exposes_date = match scope.relation(&normalize_name(&ident.value)) {
                Some(Relation::Table(table)) => self
                    .allowlist
                    .table_columns(table)
                    .map_or(false, |columns| columns.contains(date_column)),
                Some(Relation::Cte(cte)) => self
                    .ctes
                    .get(cte)
                    .map_or(false, |columns| columns.contains(date_column)),
                Some(Relation::Derived(columns)) => columns.contains(date_column),
                None => false,
            };
            if exposes_date {
                return Some(ident);
            }
        }
        None
    }

    fn validate_join_constraints(&mut self, table: &TableWithJoins) -> Result<()> {
        if let TableFactor::NestedJoin {
            table_with_joins, ..
        } = &table.relation
        {
            self.validate_join_constraints(table_with_joins)?;
        }
        for join in &table.joins {
            if let TableFactor::NestedJoin {
                table_with_joins, ..
            } = &join.relation
            {
                self.validate_join_constraints(table_with_joins)?;
            }
            let constraint = match &join.join_operator {
                JoinOperator::Inner(c)
                | JoinOperator::LeftOuter(c)
                | JoinOperator::RightOuter(c)
                | JoinOperator::FullOuter(c) => c,
                JoinOperator::CrossJoin => continue,
                _ => return Err(structural("Unsupported join type.")),
            };
            match constraint {
                JoinConstraint::On(expr) => self.validate_expr(expr)?,
                JoinConstraint::Using(columns) => {
                    for column in columns {
                        self.resolve_unqualified(&normalize_name(&column.value))?;
                    }
                }
                JoinConstraint::Natural | JoinConstraint::None => {}
            }
        }
        Ok(())
    }

    fn validate_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Identifier(ident) => self.resolve_unqualified(&normalize_name(&ident.value)),
            Expr::CompoundIdentifier(idents) => self.resolve_compound(idents),
            Expr::Value(value) => self.validate_value(value),
            Expr::TypedString { value, .. } => self.check_string_literal(value, false),
            Expr::Interval(interval) => match string_literal(&interval.value) {
                Some(literal) => self.check_string_literal(literal, true),
                None => self.validate_expr(&interval.value),
            },
            Expr::Function(func) => self.validate_function(func),
            Expr::Nested(inner)
            | Expr::IsNull(inner)
            | Expr::IsNotNull(inner)
            | Expr::IsTrue(inner)
            | Expr::IsNotTrue(inner)
            | Expr::IsFalse(inner)
            | Expr::IsNotFalse(inner)
            | Expr::IsUnknown(inner)
            | Expr::IsNotUnknown(inner) => self.validate_expr(inner),
            Expr::UnaryOp { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::TryCast { expr, .. }
            | Expr::Extract { expr, .. }
            | Expr::Ceil { expr, .. }
            | Expr::Floor { expr, .. }
            | Expr::Collate { expr, .. } => self.validate_expr(expr),
            Expr::AtTimeZone { timestamp, .. } => self.validate_expr(timestamp),
            Expr::BinaryOp { left, right, .. }
            | Expr::IsDistinctFrom(left, right)
            | Expr::IsNotDistinctFrom(left, right) => {
                self.validate_expr(left)?;
                self.validate_expr(right)
            }
            Expr::Like { expr, pattern, .. }
            | Expr::ILike { expr, pattern, .. }
            | Expr::SimilarTo { expr, pattern, .. } => {
                self.validate_expr(expr)?;
                self.validate_expr(pattern)
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.validate_expr(expr)?;
                self.validate_expr(low)?;
                self.validate_expr(high)
            }
            Expr::InList { expr, list, .. } => {
                self.validate_expr(expr)?;
                list.iter().try_for_each(|item| self.validate_expr(item))
            }
            Expr::InSubquery { expr, subquery, .. } => {
                self.validate_expr(expr)?;
                self.validate_query(subquery, false).map(|_| ())
            }
            Expr::InUnnest {
                expr, array_expr, ..
            } => {
                self.validate_expr(expr)?;
                self.validate_expr(array_expr)
            }
            Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
                self.validate_query(subquery, false).map(|_| ())
            }
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                if let Some(operand) = operand {
                    self.validate_expr(operand)?;
                }
                for e in conditions.iter().chain(results.iter()) {
                    self.validate_expr(e)?;
                }
                match else_result {
                    Some(e) => self.validate_expr(e),
                    None => Ok(()),
                }
            }
            Expr::Position { expr, r#in } => {
                self.validate_expr(expr)?;
                self.validate_expr(r#in)
            }
            Expr::Substring {
                expr,
                substring_from,
                substring_for,
                ..
            } => {
                self.validate_expr(expr)?;
                for e in substring_from.iter().chain(substring_for.iter()) {
                    self.validate_expr(e)?;
                }
                Ok(())
            }
            Expr::Trim { expr, trim_what, .. } => {
                self.validate_expr(expr)?;
                match trim_what {
                    Some(e) => self.validate_expr(e),
                    None => Ok(()),
                }
            }
            Expr::Tuple(items) => items.iter().try_for_each(|e| self.validate_expr(e)),
            Expr::Array(array) => array.elem.iter().try_for_each(|e| self.validate_expr(e)),
            Expr::ArrayIndex { obj, indexes } => {
                self.validate_expr(obj)?;
                indexes.iter().try_for_each(|e| self.validate_expr(e))
            }
            Expr::ArrayAgg(agg) => {
                self.validate_expr(&agg.expr)?;
                if let Some(order_by) = &agg.order_by {
                    for order in order_by {
                        self.validate_expr(&order.expr)?;
                    }
                }
                match &agg.limit {
                    Some(limit) => self.validate_expr(limit),
                    None => Ok(()),
                }
            }
            Expr::AggregateExpressionWithFilter { expr, filter } => {
                self.validate_expr(expr)?;
                self.validate_expr(filter)
            }
            Expr::GroupingSets(sets) | Expr::Cube(sets) | Expr::Rollup(sets) => sets
                .iter()
                .flatten()
                .try_for_each(|e| self.validate_expr(e)),
            other => Err(structural(format!("Unsupported expression: {}", other))),
        }
    }

    fn validate_function(&mut self, func: &Function) -> Result<()> {
        let parts = normalized_parts(&func.name.0);
        let name = parts.last().cloned().unwrap_or_default();
        if parts.len() > 1 {
            let schema = &parts[parts.len() - 2];
            if is_system_schema(schema) {
                return Err(access(format!(
                    "System schema function is not allowed: {}.{}",
                    schema, name
                )));
            }
        }
        if self.config.denied_functions.contains(&name) || name.starts_with("pg_") {
            return Err(access(format!("Function is not allowed: {}", name)));
        }

        if name == "date_trunc" {
            let unit = func.args.first().and_then(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => string_literal(expr),
                _ => None,
            });
            if let Some(unit) = unit {
                if matches!(normalize_name(unit).as_str(), "week" | "month" | "year") {
                    self.is_trend_query = true;
                }
            }
        }

        let count_star = name == "count" && func.args.len() == 1;
        for arg in &func.args {
            self.validate_function_arg(arg, count_star)?;
        }
        if let Some(filter) = &func.filter {
            self.validate_expr(filter)?;
        }
        for order in &func.order_by {
            self.validate_expr(&order.expr)?;
        }

        match &func.over {
            Some(WindowType::WindowSpec(window)) => self.validate_window(window),
            Some(WindowType::NamedWindow(_)) | None => Ok(()),
        }
    }

    fn validate_window(&mut self, window: &WindowSpec) -> Result<()> {
        for expr in &window.partition_by {
            self.validate_expr(expr)?;
        }
        for order in &window.order_by {
            self.validate_expr(&order.expr)?;
        }
        if let Some(frame) = &window.window_frame {
            for bound in std::iter::once(&frame.start_bound).chain(frame.end_bound.iter()) {
                if let WindowFrameBound::Preceding(Some(expr)) | WindowFrameBound::Following(Some(expr)) =
                    bound
                {
                    self.validate_expr(expr)?;
                }
            }
        }
        Ok(())
    }

    fn validate_function_arg(&mut self, arg: &FunctionArg, star_allowed: bool) -> Result<()> {
        let arg = match arg {
            FunctionArg::Named { arg, .. } | FunctionArg::Unnamed(arg) => arg,
        };
        match arg {
            FunctionArgExpr::Expr(expr) => self.validate_expr(expr),
            FunctionArgExpr::Wildcard if star_allowed => Ok(()),
            _ => Err(access(STAR_ERROR)),
        }
    }

    fn validate_value(&self, value: &Value) -> Result<()> {
        match value {
            Value::Number(..) | Value::Boolean(_) | Value::Null | Value::Placeholder(_) => Ok(()),
            Value::SingleQuotedString(s)
            | Value::EscapedStringLiteral(s)
            | Value::NationalStringLiteral(s)
            | Value::DoubleQuotedString(s) => self.check_string_literal(s, false),
            Value::DollarQuotedString(dollar) => self.check_string_literal(&dollar.value, false),
            other => Err(PolicyError::Literal(format!(
                "Literal must be parameterized: {}",
                other
            ))),
        }
    }

    /// Only structural literals and interval shapes may be inlined; every
    /// other string has to arrive as a bound parameter.
    fn check_string_literal(&self, literal: &str, interval: bool) -> Result<()> {
        let trimmed = literal.trim();
        if self.config.structural_literals.contains(&normalize_name(trimmed))
            || INTERVAL_LITERAL.is_match(trimmed)
            || (interval && !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()))
        {
            return Ok(());
        }
        Err(PolicyError::Literal(format!(
            "String literal must be parameterized: {}",
            literal
        )))
    }

    fn resolve_compound(&self, idents: &[Ident]) -> Result<()> {
        let parts = normalized_parts(idents);
        match parts.len() {
            0 => Ok(()),
            1 => self.resolve_unqualified(&parts[0]),
            n => {
                if n > 2 {
                    self.check_schema(&parts[..n - 2])?;
                }
                self.resolve_qualified(&parts[n - 2], &parts[n - 1])
            }
        }
    }

    /// Output aliases only count in the SELECT that defines them; derived
    /// columns stay visible to correlated subqueries.
    fn resolve_unqualified(&self, column: &str) -> Result<()> {
        let own_alias = self
            .scopes
            .last()
            .map_or(false, |scope| scope.output_aliases.contains(column));
        let derived = self
            .scopes
            .iter()
            .rev()
            .any(|scope| scope.derived_columns.contains(column));
        if own_alias
            || derived
            || self.config.virtual_columns.contains(column)
            || self.allowlist.column_union.contains(column)
        {
            return Ok(());
        }
        Err(access(format!("Column is not allowlisted: {}", column)))
    }

    fn resolve_qualified(&self, qualifier: &str, column: &str) -> Result<()> {
        for scope in self.scopes.iter().rev() {
            let Some(relation) = scope.relation(qualifier) else {
                continue;
            };
            return match relation {
                Relation::Cte(_) => Ok(()),
                Relation::Table(table) => {
                    let allowed = self
                        .allowlist
                        .table_columns(table)
                        .map_or(false, |columns| columns.contains(column));
                    if allowed {
                        Ok(())
                    } else {
                        Err(access(format!("Column is not allowlisted: {}.{}", table, column)))
                    }
                }
                Relation::Derived(columns) => {
                    if columns.contains(column) || self.config.virtual_columns.contains(column) {
                        Ok(())
                    } else {
                        Err(access(format!("Column is not allowlisted: {}.{}", qualifier, column)))
                    }
                }
            };
        }
        if self.ctes.contains_key(qualifier) {
            return Ok(());
        }
        Err(access(format!(
            "Column reference uses disallowed table: {}",
            qualifier
        )))
    }
}
