use std::hash::{Hash, Hasher};
use std::rc::Rc;

use ahash::AHashSet;
use qwery_parser::ast::{
    AggregateArg, AggregateFunc, Condition, Expression, NamedExpression, OrderedColumn,
};
use smol_str::SmolStr;

use super::{CompiledSource, ResultSet, RowStream};
use crate::IndexMap;
use crate::errors::{EngineError, Result};
use crate::eval::{eval_condition, eval_expression};
use crate::registry::DeviceRegistry;
use crate::rows::Row;
use crate::scope::Scope;
use crate::values::Value;

/// The select operator: filter, project, aggregate, sort, limit.
pub struct SelectExec {
    pub(crate) projections: Vec<NamedExpression>,
    pub(crate) source: Option<CompiledSource>,
    pub(crate) condition: Option<Condition>,
    pub(crate) group_by: Vec<SmolStr>,
    pub(crate) order_by: Vec<OrderedColumn>,
    pub(crate) limit: Option<usize>,
    pub(crate) registry: Rc<DeviceRegistry>,
}

impl SelectExec {
    pub(crate) fn execute(&self, scope: &Scope) -> Result<ResultSet> {
        let child = scope.child();
        let source = match &self.source {
            Some(source) => source.open(scope, &self.registry)?,
            // A sourceless SELECT evaluates its projections once.
            None => ResultSet::from_rows(vec![Row::new()]),
        };

        let aggregated = !self.group_by.is_empty()
            || self
                .projections
                .iter()
                .any(|p| p.expr.contains_aggregate());

        if aggregated {
            self.execute_grouped(source, &child)
        } else if self.order_by.is_empty() {
            Ok(ResultSet::from_stream(ProjectStream {
                source,
                scope: child,
                projections: self.projections.clone(),
                condition: self.condition.clone(),
                limit: self.limit,
                emitted: 0,
            }))
        } else {
            self.execute_ordered(source, &child)
        }
    }

    /// ORDER BY materializes: sort keys may name projected columns or
    /// source columns, so both rows are kept while sorting.
    fn execute_ordered(&self, mut source: ResultSet, scope: &Scope) -> Result<ResultSet> {
        let mut rows: Vec<(Row, Row)> = Vec::new();
        while let Some(row) = source.next_row()? {
            scope.set_current_row(Some(row.clone()));
            if let Some(cond) = &self.condition
                && eval_condition(cond, scope)? != Some(true)
            {
                continue;
            }
            let projected = project_row(&self.projections, &row, scope)?;
            rows.push((projected, row));
        }
        sort_rows(&mut rows, &self.order_by);
        let mut out: Vec<Row> = rows.into_iter().map(|(projected, _)| projected).collect();
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        Ok(ResultSet::from_rows(out))
    }

    fn execute_grouped(&self, mut source: ResultSet, scope: &Scope) -> Result<ResultSet> {
        let mut groups: IndexMap<GroupKey, GroupState> = IndexMap::default();
        if self.group_by.is_empty() {
            // An aggregate projection with no GROUP BY forms one implicit
            // group so empty input still yields a row.
            groups.insert(GroupKey(Vec::new()), GroupState::new(&self.projections));
        }

        while let Some(row) = source.next_row()? {
            scope.set_current_row(Some(row.clone()));
            if let Some(cond) = &self.condition
                && eval_condition(cond, scope)? != Some(true)
            {
                continue;
            }
            let mut key = Vec::with_capacity(self.group_by.len());
            for name in &self.group_by {
                let value = scope.field(name).ok_or_else(|| {
                    EngineError::semantic(format!("Unknown field '{name}' in GROUP BY"))
                })?;
                key.push(value);
            }
            let state = groups
                .entry(GroupKey(key))
                .or_insert_with(|| GroupState::new(&self.projections));
            state.update(&row, scope)?;
        }

        let mut rows = Vec::with_capacity(groups.len());
        for (_, state) in groups {
            scope.set_current_row(Some(state.first_row.clone()));
            let mut out = Row::with_capacity(self.projections.len());
            for (projection, aggregators) in self.projections.iter().zip(&state.per_projection) {
                let finals: Vec<Value> =
                    aggregators.iter().map(Aggregator::finalize).collect();
                let mut index = 0;
                let value = eval_with_aggregates(&projection.expr, &finals, &mut index, scope)?;
                out.push(projection.output_name(), value);
            }
            rows.push((out, state.first_row));
        }

        sort_rows(&mut rows, &self.order_by);
        let mut out: Vec<Row> = rows.into_iter().map(|(projected, _)| projected).collect();
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        Ok(ResultSet::from_rows(out))
    }
}

struct ProjectStream {
    source: ResultSet,
    scope: Scope,
    projections: Vec<NamedExpression>,
    condition: Option<Condition>,
    limit: Option<usize>,
    emitted: usize,
}

impl RowStream for ProjectStream {
    fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if self.limit.is_some_and(|limit| self.emitted >= limit) {
                return Ok(None);
            }
            let Some(row) = self.source.next_row()? else {
                return Ok(None);
            };
            self.scope.set_current_row(Some(row.clone()));
            if let Some(cond) = &self.condition
                && eval_condition(cond, &self.scope)? != Some(true)
            {
                continue;
            }
            let projected = project_row(&self.projections, &row, &self.scope)?;
            self.emitted += 1;
            return Ok(Some(projected));
        }
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}

fn project_row(
    projections: &[NamedExpression],
    input: &Row,
    scope: &Scope,
) -> Result<Row> {
    let mut out = Row::with_capacity(projections.len());
    for projection in projections {
        match &projection.expr {
            Expression::Wildcard => {
                for (name, value) in input.iter() {
                    out.push(name.clone(), value.clone());
                }
            }
            expr => out.push(projection.output_name(), eval_expression(expr, scope)?),
        }
    }
    Ok(out)
}

/// Stable sort over (projected, source) row pairs. Keys resolve against the
/// projected row first, then the source row; ties keep input order.
fn sort_rows(rows: &mut [(Row, Row)], order_by: &[OrderedColumn]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|(a_out, a_in), (b_out, b_in)| {
        for key in order_by {
            let a = a_out.get(&key.name).or_else(|| a_in.get(&key.name));
            let b = b_out.get(&key.name).or_else(|| b_in.get(&key.name));
            let ordering = a
                .unwrap_or(&Value::Null)
                .sort_cmp(b.unwrap_or(&Value::Null));
            let ordering = if key.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if !ordering.is_eq() {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Grouping key. Hashing follows the derived `Value` equality (variants
/// distinct, floats by bit pattern).
#[derive(Clone, PartialEq)]
struct GroupKey(Vec<Value>);

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            match value {
                Value::Null => 0u8.hash(state),
                Value::Bool(v) => (1u8, v).hash(state),
                Value::Int(v) => (2u8, v).hash(state),
                Value::Float(v) => (3u8, v.to_bits()).hash(state),
                Value::Str(v) => (4u8, v).hash(state),
                Value::Bytes(v) => (5u8, v).hash(state),
                Value::Date(v) => (6u8, v.timestamp_nanos_opt()).hash(state),
                other => (7u8, other.to_string()).hash(state),
            }
        }
    }
}

struct GroupState {
    first_row: Row,
    per_projection: Vec<Vec<Aggregator>>,
    saw_rows: bool,
}

impl GroupState {
    fn new(projections: &[NamedExpression]) -> Self {
        let per_projection = projections
            .iter()
            .map(|p| {
                let mut specs = Vec::new();
                collect_aggregates(&p.expr, &mut specs);
                specs.into_iter().map(Aggregator::new).collect()
            })
            .collect();
        Self {
            first_row: Row::new(),
            per_projection,
            saw_rows: false,
        }
    }

    fn update(&mut self, row: &Row, scope: &Scope) -> Result<()> {
        if !self.saw_rows {
            self.first_row = row.clone();
            self.saw_rows = true;
        }
        for aggregators in &mut self.per_projection {
            for aggregator in aggregators {
                aggregator.update(scope)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
struct AggSpec {
    func: AggregateFunc,
    distinct: bool,
    arg: AggregateArg,
}

fn collect_aggregates(expr: &Expression, out: &mut Vec<AggSpec>) {
    match expr {
        Expression::Aggregate {
            func,
            distinct,
            arg,
        } => out.push(AggSpec {
            func: *func,
            distinct: *distinct,
            arg: arg.clone(),
        }),
        Expression::Binary { lhs, rhs, .. } => {
            collect_aggregates(lhs, out);
            collect_aggregates(rhs, out);
        }
        Expression::Neg(inner) => collect_aggregates(inner, out),
        Expression::Cast { expr, .. } => collect_aggregates(expr, out),
        Expression::Function { args, .. } => {
            for arg in args {
                collect_aggregates(arg, out);
            }
        }
        Expression::Case {
            branches,
            otherwise,
        } => {
            for (_, branch) in branches {
                collect_aggregates(branch, out);
            }
            if let Some(otherwise) = otherwise {
                collect_aggregates(otherwise, out);
            }
        }
        _ => {}
    }
}

/// Re-evaluate a projection with aggregates replaced by their finalized
/// values, in the same traversal order `collect_aggregates` used.
fn eval_with_aggregates(
    expr: &Expression,
    finals: &[Value],
    index: &mut usize,
    scope: &Scope,
) -> Result<Value> {
    match expr {
        Expression::Aggregate { .. } => {
            let value = finals[*index].clone();
            *index += 1;
            Ok(value)
        }
        Expression::Binary { op, lhs, rhs } => {
            let lhs = eval_with_aggregates(lhs, finals, index, scope)?;
            let rhs = eval_with_aggregates(rhs, finals, index, scope)?;
            crate::eval::arithmetic_values(*op, lhs, rhs)
        }
        Expression::Neg(inner) => {
            match eval_with_aggregates(inner, finals, index, scope)? {
                Value::Null => Ok(Value::Null),
                Value::Int(v) => Ok(Value::Int(-v)),
                Value::Float(v) => Ok(Value::Float(-v)),
                other => Err(EngineError::eval(format!(
                    "Cannot negate {}",
                    other.type_name()
                ))),
            }
        }
        Expression::Cast { expr, to } => {
            let value = eval_with_aggregates(expr, finals, index, scope)?;
            crate::eval::cast_value(value, to)
        }
        other if !other.contains_aggregate() => eval_expression(other, scope),
        other => Err(EngineError::eval(format!(
            "Unsupported aggregate expression: {other}"
        ))),
    }
}

enum AggState {
    Count { n: i64 },
    Sum { total: f64, ints_only: bool, seen: bool },
    Avg { n: i64, total: f64 },
    Extreme { minimum: bool, best: Option<Value> },
    /// Welford's online recurrence; finalized as the sample variance.
    Variance { n: i64, mean: f64, m2: f64 },
}

struct Aggregator {
    spec: AggSpec,
    state: AggState,
    distinct_seen: AHashSet<String>,
}

impl Aggregator {
    fn new(spec: AggSpec) -> Self {
        let state = match spec.func {
            AggregateFunc::Count => AggState::Count { n: 0 },
            AggregateFunc::Sum => AggState::Sum {
                total: 0.0,
                ints_only: true,
                seen: false,
            },
            AggregateFunc::Avg => AggState::Avg { n: 0, total: 0.0 },
            AggregateFunc::Min => AggState::Extreme {
                minimum: true,
                best: None,
            },
            AggregateFunc::Max => AggState::Extreme {
                minimum: false,
                best: None,
            },
            AggregateFunc::Variance | AggregateFunc::Stddev => AggState::Variance {
                n: 0,
                mean: 0.0,
                m2: 0.0,
            },
        };
        Self {
            spec,
            state,
            distinct_seen: AHashSet::new(),
        }
    }

    fn update(&mut self, scope: &Scope) -> Result<()> {
        let value = match &self.spec.arg {
            AggregateArg::Star => {
                // COUNT(*) counts rows, nulls included.
                if let AggState::Count { n } = &mut self.state {
                    *n += 1;
                }
                return Ok(());
            }
            AggregateArg::Expr(expr) => eval_expression(expr, scope)?,
        };
        if value.is_null() {
            return Ok(());
        }
        if self.spec.distinct {
            let key = format!("{}:{value}", value.type_name());
            if !self.distinct_seen.insert(key) {
                return Ok(());
            }
        }

        let numeric = || {
            value.as_f64().ok_or_else(|| {
                EngineError::eval(format!(
                    "{} expects numbers, got {}",
                    self.spec.func.as_ref(),
                    value.type_name()
                ))
            })
        };
        match &mut self.state {
            AggState::Count { n } => *n += 1,
            AggState::Sum {
                total,
                ints_only,
                seen,
            } => {
                *total += numeric()?;
                *ints_only &= matches!(value, Value::Int(_));
                *seen = true;
            }
            AggState::Avg { n, total } => {
                *total += numeric()?;
                *n += 1;
            }
            AggState::Extreme { minimum, best } => {
                let replace = match best {
                    None => true,
                    Some(current) => {
                        let ordering = value.sort_cmp(current);
                        if *minimum {
                            ordering.is_lt()
                        } else {
                            ordering.is_gt()
                        }
                    }
                };
                if replace {
                    *best = Some(value.clone());
                }
            }
            AggState::Variance { n, mean, m2 } => {
                let x = numeric()?;
                *n += 1;
                let delta = x - *mean;
                *mean += delta / *n as f64;
                *m2 += delta * (x - *mean);
            }
        }
        Ok(())
    }

    fn finalize(&self) -> Value {
        match &self.state {
            AggState::Count { n } => Value::Int(*n),
            AggState::Sum {
                total,
                ints_only,
                seen,
            } => {
                if !seen {
                    Value::Null
                } else if *ints_only {
                    Value::Int(*total as i64)
                } else {
                    Value::Float(*total)
                }
            }
            AggState::Avg { n, total } => {
                if *n == 0 {
                    Value::Null
                } else {
                    Value::Float(*total / *n as f64)
                }
            }
            AggState::Extreme { best, .. } => best.clone().unwrap_or(Value::Null),
            AggState::Variance { n, m2, .. } => {
                if *n < 2 {
                    Value::Null
                } else {
                    let variance = *m2 / (*n - 1) as f64;
                    match self.spec.func {
                        AggregateFunc::Stddev => Value::Float(variance.sqrt()),
                        _ => Value::Float(variance),
                    }
                }
            }
        }
    }
}
