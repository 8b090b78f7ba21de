use std::rc::Rc;

use qwery_parser::Hints;
use qwery_parser::ast::Expression;
use smol_str::SmolStr;
use strum_macros::EnumString;

use super::{Executable, ResultSet};
use crate::errors::{Result, RuntimeError};
use crate::eval::eval_expression;
use crate::rows::Row;
use crate::scope::{Connection, Scope, VariableType};
use crate::values::Value;

pub struct DeclareExec {
    pub(crate) name: SmolStr,
    pub(crate) var_type: VariableType,
}

impl DeclareExec {
    pub(crate) fn execute(&self, scope: &Scope) -> Result<ResultSet> {
        scope.declare(self.name.clone(), self.var_type);
        Ok(ResultSet::empty())
    }
}

pub(crate) enum AssignValue {
    Expression(Expression),
    Query(Rc<Executable>),
}

pub struct AssignExec {
    pub(crate) name: SmolStr,
    pub(crate) value: AssignValue,
}

impl AssignExec {
    pub(crate) fn execute(&self, scope: &Scope) -> Result<ResultSet> {
        let value = match &self.value {
            AssignValue::Expression(expr) => eval_expression(expr, scope)?,
            AssignValue::Query(exec) => {
                let mut rows = exec.execute(&scope.child())?;
                let first = rows.next_row()?;
                rows.close()?;
                first
                    .and_then(|row| row.values().next().cloned())
                    .unwrap_or(Value::Null)
            }
        };
        scope.assign(&self.name, value)?;
        Ok(ResultSet::empty())
    }
}

/// The SHOW whitelist; anything else is rejected at compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum ShowKind {
    Views,
    Connections,
    Variables,
}

pub struct ShowExec {
    pub(crate) kind: ShowKind,
}

impl ShowExec {
    pub(crate) fn execute(&self, scope: &Scope) -> Result<ResultSet> {
        let rows = match self.kind {
            ShowKind::Views => scope
                .views_snapshot()
                .into_iter()
                .map(|name| {
                    let mut row = Row::with_capacity(1);
                    row.push("view", Value::Str(name.to_string()));
                    row
                })
                .collect(),
            ShowKind::Connections => scope
                .connections_snapshot()
                .into_iter()
                .map(|connection| {
                    let mut row = Row::with_capacity(2);
                    row.push("connection", Value::Str(connection.name.to_string()));
                    row.push("service", Value::Str(connection.service));
                    row
                })
                .collect(),
            ShowKind::Variables => scope
                .variables_snapshot()
                .into_iter()
                .map(|(name, var_type, value)| {
                    let mut row = Row::with_capacity(3);
                    row.push("variable", Value::Str(format!("@{name}")));
                    row.push("type", Value::Str(var_type.as_ref().to_string()));
                    row.push("value", value);
                    row
                })
                .collect(),
        };
        Ok(ResultSet::from_rows(rows))
    }
}

pub struct DefineViewExec {
    pub(crate) name: SmolStr,
    pub(crate) view: Rc<Executable>,
}

impl DefineViewExec {
    pub(crate) fn execute(&self, scope: &Scope) -> Result<ResultSet> {
        scope.register_view(self.name.clone(), Rc::clone(&self.view));
        Ok(ResultSet::empty())
    }
}

pub struct ConnectExec {
    pub(crate) name: SmolStr,
    pub(crate) service: String,
    pub(crate) hints: Hints,
}

impl ConnectExec {
    pub(crate) fn execute(&self, scope: &Scope) -> Result<ResultSet> {
        scope.add_connection(Connection {
            name: self.name.clone(),
            service: self.service.clone(),
            hints: self.hints.clone(),
        });
        Ok(ResultSet::empty())
    }
}

pub struct DisconnectExec {
    pub(crate) handle: SmolStr,
}

impl DisconnectExec {
    pub(crate) fn execute(&self, scope: &Scope) -> Result<ResultSet> {
        if !scope.remove_connection(&self.handle) {
            return Err(RuntimeError::eval(format!(
                "Unknown connection '{}'",
                self.handle
            ))
            .into());
        }
        Ok(ResultSet::empty())
    }
}
