//! AST Rewriter
//!
//! Applies the deterministic policy transforms to a validated statement:
//! date casts on comparisons, the default time window and the LIMIT clamp.
//! Every transform is a fixed point, so rewriting already-rewritten SQL
//! changes nothing.

use super::hints::PolicyHints;
use super::validator::{date_column_name, literal_limit, ValidationSummary};
use super::AppliedTimeWindow;
use crate::config::PolicyConfig;
use crate::error::{PolicyError, Result};
use sqlparser::ast::{
    visit_expressions_mut, BinaryOperator, Expr, Ident, Query, Select, SetExpr, Statement, Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;
use tracing::debug;

/// A rewritten statement with what the rewriter decided
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub statement: Statement,
    pub applied_limit: u64,
    pub applied_time_window: Option<AppliedTimeWindow>,
}

pub fn rewrite(
    mut statement: Statement,
    summary: &ValidationSummary,
    hints: &PolicyHints,
    config: &PolicyConfig,
) -> Result<Rewritten> {
    let Statement::Query(query) = &mut statement else {
        return Err(PolicyError::Rewrite(
            "Only SELECT statements can be rewritten.".to_string(),
        ));
    };

    apply_date_casts(query, config)?;
    let applied_time_window = apply_time_window(query, summary, hints, config)?;
    let applied_limit = apply_limit(query, config)?;

    Ok(Rewritten {
        statement,
        applied_limit,
        applied_time_window,
    })
}

/// Wrap date/timestamp column operands of comparisons in casts so text
/// parameters compare as dates rather than strings.
fn apply_date_casts(query: &mut Query, config: &PolicyConfig) -> Result<()> {
    let flow = visit_expressions_mut(query, |expr| {
        let outcome = match expr {
            Expr::BinaryOp { left, op, right }
                if matches!(
                    op,
                    BinaryOperator::Eq
                        | BinaryOperator::NotEq
                        | BinaryOperator::Lt
                        | BinaryOperator::LtEq
                        | BinaryOperator::Gt
                        | BinaryOperator::GtEq
                ) =>
            {
                cast_date_operand(left, config).and_then(|_| cast_date_operand(right, config))
            }
            Expr::Between {
                expr, low, high, ..
            } => [expr, low, high]
                .into_iter()
                .try_for_each(|operand| cast_date_operand(operand, config)),
            _ => Ok(()),
        };
        match outcome {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        }
    });
    match flow {
        ControlFlow::Break(err) => Err(err),
        ControlFlow::Continue(()) => Ok(()),
    }
}

fn cast_date_operand(operand: &mut Box<Expr>, config: &PolicyConfig) -> Result<()> {
    let target = match date_column_name(operand) {
        Some(name) if name == config.date_column => "DATE",
        Some(name) if name == config.timestamp_column => "TIMESTAMPTZ",
        _ => return Ok(()),
    };
    let cast = parse_expr(&format!("CAST({} AS {})", operand, target))?;
    **operand = cast;
    Ok(())
}

fn apply_time_window(
    query: &mut Query,
    summary: &ValidationSummary,
    hints: &PolicyHints,
    config: &PolicyConfig,
) -> Result<Option<AppliedTimeWindow>> {
    if hints.is_all_time() {
        debug!("all_time hint honoured, no time window injected");
        return Ok(Some(AppliedTimeWindow::AllTime));
    }
    if summary.has_date_filter {
        return Ok(None);
    }
    let Some(anchor) = &summary.date_anchor else {
        debug!("no FROM relation exposes {}, skipping time window", config.date_column);
        return Ok(None);
    };

    let window = if summary.is_trend_query {
        AppliedTimeWindow::TwelveMonths
    } else {
        AppliedTimeWindow::NinetyDays
    };
    let predicate = parse_expr(&format!(
        "CAST({}.{} AS DATE) >= CURRENT_DATE - CAST('{}' AS INTERVAL)",
        anchor,
        Ident::new(config.date_column.as_str()),
        window.as_str()
    ))?;

    let select = main_select(query)?;
    select.selection = Some(match select.selection.take() {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(Expr::Nested(Box::new(existing))),
            op: BinaryOperator::And,
            right: Box::new(predicate),
        },
        None => predicate,
    });
    debug!("injected {} window on {}", window.as_str(), anchor);
    Ok(Some(window))
}

fn apply_limit(query: &mut Query, config: &PolicyConfig) -> Result<u64> {
    let hard_limit = config.hard_limit.max(1);
    let applied = match &query.limit {
        None => config.default_limit.clamp(1, hard_limit),
        Some(expr) => {
            let requested = literal_limit(expr)
                .ok_or_else(|| PolicyError::Literal("LIMIT must be a constant number.".to_string()))?;
            if requested < 1 {
                1
            } else {
                (requested as u64).min(hard_limit)
            }
        }
    };
    query.limit = Some(Expr::Value(Value::Number(applied.to_string(), false)));
    Ok(applied)
}

fn main_select(query: &mut Query) -> Result<&mut Select> {
    match query.body.as_mut() {
        SetExpr::Select(select) => Ok(&mut **select),
        _ => Err(PolicyError::Rewrite(
            "Top-level query body is not a SELECT.".to_string(),
        )),
    }
}

fn parse_expr(sql: &str) -> Result<Expr> {
    let dialect = PostgreSqlDialect {};
    Parser::new(&dialect)
        .try_with_sql(sql)
        .and_then(|mut parser| parser.parse_expr())
        .map_err(|e| PolicyError::Rewrite(e.to_string()))
}
