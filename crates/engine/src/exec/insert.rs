use std::rc::Rc;

use qwery_parser::ast::{DataResource, Expression};
use smol_str::SmolStr;

use super::{Executable, ResultSet};
use crate::errors::{EngineError, Result};
use crate::eval::eval_expression;
use crate::registry::DeviceRegistry;
use crate::rows::Row;
use crate::scope::Scope;
use crate::sources::{self, OutputSource};
use crate::values::Value;

pub(crate) enum InsertSourceExec {
    Values(Vec<Vec<Expression>>),
    Query(Rc<Executable>),
}

/// The insert operator: resolve the target, pull rows from the source,
/// reorder to the declared field list, write, flush. Errors mid-stream
/// still close the sink; written rows are not rolled back.
pub struct InsertExec {
    pub(crate) target: DataResource,
    pub(crate) fields: Vec<SmolStr>,
    pub(crate) source: InsertSourceExec,
    pub(crate) registry: Rc<DeviceRegistry>,
}

impl InsertExec {
    pub(crate) fn execute(&self, scope: &Scope) -> Result<ResultSet> {
        let mut sink =
            sources::output_source(&self.registry, &self.target.path, &self.target.hints)?;
        if let Err(error) = sink.open(scope) {
            let _ = sink.close();
            return Err(error);
        }

        match self.write_rows(sink.as_mut(), scope) {
            Ok(written) => {
                sink.close()?;
                let mut summary = Row::with_capacity(2);
                summary.push("target", Value::Str(self.target.path.clone()));
                summary.push("inserted", Value::Int(written));
                Ok(ResultSet::from_rows(vec![summary]))
            }
            Err(error) => {
                let _ = sink.close();
                Err(error)
            }
        }
    }

    fn write_rows(&self, sink: &mut dyn OutputSource, scope: &Scope) -> Result<i64> {
        let mut written = 0;
        match &self.source {
            InsertSourceExec::Values(sets) => {
                for set in sets {
                    if set.len() != self.fields.len() {
                        return Err(EngineError::semantic(format!(
                            "VALUES lists {} expressions for {} fields",
                            set.len(),
                            self.fields.len()
                        )));
                    }
                    let mut row = Row::with_capacity(set.len());
                    for (field, expr) in self.fields.iter().zip(set) {
                        row.push(field.clone(), eval_expression(expr, scope)?);
                    }
                    sink.write(&row)?;
                    written += 1;
                }
            }
            InsertSourceExec::Query(exec) => {
                let mut rows = exec.execute(scope)?;
                while let Some(row) = rows.next_row()? {
                    let out = self.reorder(row);
                    sink.write(&out)?;
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    /// Project the source row onto the declared field list; an empty list
    /// passes the row through untouched, missing columns become NULL.
    fn reorder(&self, row: Row) -> Row {
        if self.fields.is_empty() {
            return row;
        }
        self.fields
            .iter()
            .map(|field| {
                let value = row.get(field).cloned().unwrap_or(Value::Null);
                (field.clone(), value)
            })
            .collect()
    }
}
