use std::rc::Rc;
use std::str::FromStr;

use ahash::AHashSet;
use qwery_parser::ast::{
    AssignmentSource, Expression, Insert, InsertSource, QuerySource, Select, Statement,
};
use smol_str::SmolStr;

use crate::errors::{EngineError, Phase, Result, RuntimeError};
use crate::exec::describe::DescribeExec;
use crate::exec::insert::{InsertExec, InsertSourceExec};
use crate::exec::select::SelectExec;
use crate::exec::simple::{
    AssignExec, AssignValue, ConnectExec, DeclareExec, DefineViewExec, DisconnectExec, ShowExec,
    ShowKind,
};
use crate::exec::{CompiledSource, Executable};
use crate::registry::DeviceRegistry;
use crate::scope::VariableType;

/// Lower a statement into the executable tree, binding resources against
/// the registry and running the meaning-level checks.
pub fn compile_statement(stmt: &Statement, registry: &Rc<DeviceRegistry>) -> Result<Executable> {
    match stmt {
        Statement::Select(select) => Ok(Executable::Select(compile_select(select, registry)?)),
        Statement::Insert(insert) => Ok(Executable::Insert(compile_insert(insert, registry)?)),
        Statement::Describe(describe) => Ok(Executable::Describe(DescribeExec {
            source: compile_source(&describe.source, registry)?,
            limit: describe.limit.map(|n| n as usize),
            registry: Rc::clone(registry),
        })),
        Statement::Declare(declare) => {
            let var_type = VariableType::from_str(&declare.var_type).map_err(|_| {
                EngineError::semantic(format!(
                    "Unknown type '{}' for @{}",
                    declare.var_type, declare.name
                ))
            })?;
            Ok(Executable::Declare(DeclareExec {
                name: declare.name.clone(),
                var_type,
            }))
        }
        Statement::SetVariable(set) => {
            let value = match &set.value {
                AssignmentSource::Expression(expr) => AssignValue::Expression(expr.clone()),
                AssignmentSource::Query(query) => {
                    AssignValue::Query(Rc::new(compile_statement(query, registry)?))
                }
            };
            Ok(Executable::Assign(AssignExec {
                name: set.name.clone(),
                value,
            }))
        }
        Statement::Show(show) => {
            let kind = ShowKind::from_str(&show.entity).map_err(|_| {
                EngineError::semantic(format!("Unknown entity type '{}' in SHOW", show.entity))
            })?;
            Ok(Executable::Show(ShowExec { kind }))
        }
        Statement::CreateView(view) => Ok(Executable::DefineView(DefineViewExec {
            name: view.name.clone(),
            view: Rc::new(compile_statement(&view.query, registry)?),
        })),
        Statement::Connect(connect) => Ok(Executable::Connect(ConnectExec {
            name: connect.name.clone(),
            service: connect.service.clone(),
            hints: connect.hints.clone(),
        })),
        Statement::Disconnect(disconnect) => Ok(Executable::Disconnect(DisconnectExec {
            handle: disconnect.handle.clone(),
        })),
    }
}

fn compile_select(select: &Select, registry: &Rc<DeviceRegistry>) -> Result<SelectExec> {
    if !select.group_by.is_empty() {
        check_grouping(select)?;
    }
    let source = select
        .source
        .as_ref()
        .map(|source| compile_source(source, registry))
        .transpose()?;

    // TOP and LIMIT are the same bound; the smaller wins when both appear.
    let limit = match (select.top, select.limit) {
        (Some(top), Some(limit)) => Some(top.min(limit) as usize),
        (bound, None) | (None, bound) => bound.map(|n| n as usize),
    };

    Ok(SelectExec {
        projections: select.projections.clone(),
        source,
        condition: select.condition.clone(),
        group_by: select.group_by.iter().map(|f| f.name.clone()).collect(),
        order_by: select.order_by.clone(),
        limit,
        registry: Rc::clone(registry),
    })
}

fn compile_insert(insert: &Insert, registry: &Rc<DeviceRegistry>) -> Result<InsertExec> {
    if !registry.can_resolve(&insert.target.path, &insert.target.hints) {
        return Err(bind_error(&insert.target.path));
    }
    let fields: Vec<SmolStr> = insert.fields.iter().map(|f| f.name.clone()).collect();
    let source = match &insert.source {
        InsertSource::Values(sets) => {
            if fields.is_empty() {
                return Err(EngineError::semantic(
                    "INSERT … VALUES requires a field list",
                ));
            }
            InsertSourceExec::Values(sets.clone())
        }
        InsertSource::Query(query) => {
            InsertSourceExec::Query(Rc::new(compile_statement(query, registry)?))
        }
    };
    Ok(InsertExec {
        target: insert.target.clone(),
        fields,
        source,
        registry: Rc::clone(registry),
    })
}

fn compile_source(
    source: &QuerySource,
    registry: &Rc<DeviceRegistry>,
) -> Result<CompiledSource> {
    match source {
        QuerySource::Resource(resource) => {
            // Views shadow devices but are registered at run time, so only
            // the factory match is checked here.
            if !registry.can_resolve(&resource.path, &resource.hints) {
                return Err(bind_error(&resource.path));
            }
            Ok(CompiledSource::Resource(resource.clone()))
        }
        QuerySource::Subquery(stmt) => Ok(CompiledSource::Query(Rc::new(compile_statement(
            stmt, registry,
        )?))),
    }
}

fn bind_error(path: &str) -> EngineError {
    RuntimeError::new(Phase::Compile, format!("No device accepts '{path}'")).into()
}

/// Under GROUP BY every projected non-aggregate column must be part of the
/// group key.
fn check_grouping(select: &Select) -> Result<()> {
    let grouped: AHashSet<String> = select
        .group_by
        .iter()
        .map(|f| f.name.to_lowercase())
        .collect();
    for projection in &select.projections {
        if projection.expr == Expression::Wildcard {
            return Err(EngineError::semantic(
                "SELECT * cannot be combined with GROUP BY",
            ));
        }
        let mut fields = Vec::new();
        collect_bare_fields(&projection.expr, &mut fields);
        for field in fields {
            if !grouped.contains(&field.to_lowercase()) {
                return Err(EngineError::semantic(format!(
                    "Column '{field}' must appear in the GROUP BY clause"
                )));
            }
        }
    }
    Ok(())
}

/// Field references outside aggregate arguments.
fn collect_bare_fields(expr: &Expression, out: &mut Vec<SmolStr>) {
    match expr {
        Expression::FieldRef(name) => out.push(name.clone()),
        Expression::Qualified { column, .. } => out.push(column.clone()),
        Expression::Binary { lhs, rhs, .. } => {
            collect_bare_fields(lhs, out);
            collect_bare_fields(rhs, out);
        }
        Expression::Neg(inner) => collect_bare_fields(inner, out),
        Expression::Cast { expr, .. } => collect_bare_fields(expr, out),
        Expression::Function { args, .. } => {
            for arg in args {
                collect_bare_fields(arg, out);
            }
        }
        Expression::Case {
            branches,
            otherwise,
        } => {
            for (_, branch) in branches {
                collect_bare_fields(branch, out);
            }
            if let Some(otherwise) = otherwise {
                collect_bare_fields(otherwise, out);
            }
        }
        // Aggregate arguments are aggregated; sub-queries scope their own
        // fields.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_sql(sql: &str) -> Result<Executable> {
        let stmt = qwery_parser::parse(sql).unwrap();
        compile_statement(&stmt, &DeviceRegistry::standard())
    }

    #[test]
    fn ungrouped_projection_under_group_by_is_rejected() {
        let err = compile_sql("SELECT Name, COUNT(*) FROM 'cl.csv' GROUP BY Sector").unwrap_err();
        assert!(matches!(err, EngineError::Semantic(_)));
    }

    #[test]
    fn grouped_projection_passes() {
        assert!(compile_sql("SELECT Sector, COUNT(*) AS n FROM 'cl.csv' GROUP BY Sector").is_ok());
    }

    #[test]
    fn unknown_declare_type_is_semantic() {
        let err = compile_sql("DECLARE @x FLOATY").unwrap_err();
        assert!(matches!(err, EngineError::Semantic(_)));
    }

    #[test]
    fn show_whitelist_is_locked_down() {
        assert!(compile_sql("SHOW VIEWS").is_ok());
        assert!(compile_sql("SHOW CONNECTIONS").is_ok());
        assert!(compile_sql("SHOW VARIABLES").is_ok());
        let err = compile_sql("SHOW TABLES").unwrap_err();
        assert!(matches!(err, EngineError::Semantic(_)));
    }

    #[test]
    fn unresolvable_source_fails_at_bind() {
        let err = compile_sql("SELECT * FROM 'kafka://topic'").unwrap_err();
        assert!(matches!(err, EngineError::Runtime(_)));
    }

    #[test]
    fn top_and_limit_take_the_smaller_bound() {
        let Executable::Select(exec) =
            compile_sql("SELECT TOP 3 * FROM 'cl.csv' LIMIT 10").unwrap()
        else {
            panic!("expected a select");
        };
        assert_eq!(exec.limit, Some(3));
    }
}
