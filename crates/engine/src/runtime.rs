use std::rc::Rc;

use crate::compile::compile_statement;
use crate::errors::Result;
use crate::exec::{Executable, ResultSet};
use crate::registry::DeviceRegistry;
use crate::scope::Scope;

/// The engine facade: parse, compile and run statements against a frozen
/// device registry.
pub struct Runtime {
    registry: Rc<DeviceRegistry>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            registry: DeviceRegistry::standard(),
        }
    }

    /// Run over a custom registry, e.g. with capability providers
    /// prepended.
    pub fn with_registry(registry: Rc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Rc<DeviceRegistry> {
        &self.registry
    }

    /// A fresh root scope bound to this runtime's registry.
    pub fn new_scope(&self) -> Scope {
        Scope::with_registry(Rc::clone(&self.registry))
    }

    pub fn compile(&self, sql: &str) -> Result<Executable> {
        let statement = qwery_parser::parse(sql)?;
        compile_statement(&statement, &self.registry)
    }

    pub fn execute(&self, sql: &str, scope: &Scope) -> Result<ResultSet> {
        self.compile(sql)?.execute(scope)
    }

    /// Run a `;`-separated script in one scope. Intermediate result sets
    /// are drained so their effects and releases happen in order; the last
    /// statement's rows are returned.
    pub fn execute_script(&self, sql: &str, scope: &Scope) -> Result<ResultSet> {
        let statements = qwery_parser::parse_script(sql)?;
        let mut last = ResultSet::empty();
        let count = statements.len();
        for (index, statement) in statements.iter().enumerate() {
            let executable = compile_statement(statement, &self.registry)?;
            let mut results = executable.execute(scope)?;
            if index + 1 == count {
                last = results;
            } else {
                while results.next_row()?.is_some() {}
            }
        }
        Ok(last)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
