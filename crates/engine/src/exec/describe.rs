use std::rc::Rc;

use super::{CompiledSource, ResultSet};
use crate::errors::Result;
use crate::registry::DeviceRegistry;
use crate::rows::Row;
use crate::scope::Scope;
use crate::values::Value;

/// The describe operator: pull one row and report each column's name,
/// runtime type and a one-line sample, truncated to LIMIT.
pub struct DescribeExec {
    pub(crate) source: CompiledSource,
    pub(crate) limit: Option<usize>,
    pub(crate) registry: Rc<DeviceRegistry>,
}

impl DescribeExec {
    pub(crate) fn execute(&self, scope: &Scope) -> Result<ResultSet> {
        let mut rows = self.source.open(scope, &self.registry)?;
        let first = match rows.next_row() {
            Ok(first) => first,
            Err(error) => {
                let _ = rows.close();
                return Err(error);
            }
        };
        rows.close()?;

        let limit = self.limit.unwrap_or(usize::MAX);
        let described = first
            .map(|row| {
                row.iter()
                    .take(limit)
                    .map(|(name, value)| {
                        let mut out = Row::with_capacity(3);
                        out.push("Column", Value::Str(name.to_string()));
                        out.push("Type", Value::Str(value.type_name().to_string()));
                        out.push("Sample", Value::Str(value.sample_string()));
                        out
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ResultSet::from_rows(described))
    }
}
