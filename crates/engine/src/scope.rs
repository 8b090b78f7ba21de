use std::cell::RefCell;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use qwery_parser::Hints;
use smol_str::SmolStr;
use strum_macros::{AsRefStr, EnumString};

use crate::errors::{EngineError, Result, RuntimeError, SemanticError};
use crate::exec::Executable;
use crate::registry::DeviceRegistry;
use crate::rows::Row;
use crate::values::Value;

/// The declarable variable types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(ascii_case_insensitive, serialize_all = "UPPERCASE")]
pub enum VariableType {
    Boolean,
    Integer,
    Long,
    Double,
    String,
    Date,
    Binary,
}

impl VariableType {
    /// Check an assignment, widening integers into doubles and letting NULL
    /// through. Anything else is a type mismatch.
    pub fn coerce(self, name: &str, value: Value) -> Result<Value> {
        let accepted = match (self, value) {
            (_, Value::Null) => Value::Null,
            (VariableType::Boolean, Value::Bool(v)) => Value::Bool(v),
            (VariableType::Integer | VariableType::Long, Value::Int(v)) => Value::Int(v),
            (VariableType::Double, Value::Int(v)) => Value::Float(v as f64),
            (VariableType::Double, Value::Float(v)) => Value::Float(v),
            (VariableType::String, Value::Str(v)) => Value::Str(v),
            (VariableType::Date, Value::Date(v)) => Value::Date(v),
            (VariableType::Binary, Value::Bytes(v)) => Value::Bytes(v),
            (_, value) => {
                return Err(EngineError::from(SemanticError::new(format!(
                    "Cannot assign {} to @{name} ({})",
                    value.type_name(),
                    self.as_ref(),
                ))));
            }
        };
        Ok(accepted)
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub var_type: VariableType,
    pub value: Value,
}

/// A named endpoint registered by CONNECT. The engine core holds it
/// symbolically; a capability provider dials it.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub name: SmolStr,
    pub service: String,
    pub hints: Hints,
}

struct ScopeData {
    parent: Option<Scope>,
    registry: Option<Rc<DeviceRegistry>>,
    variables: AHashMap<SmolStr, Variable>,
    views: AHashMap<SmolStr, Rc<Executable>>,
    connections: AHashMap<SmolStr, Connection>,
    current_row: Option<Row>,
}

/// The execution environment: a lexical chain owning variables, views and
/// connections, plus the row under evaluation. A cheap clonable handle;
/// deliberately single-threaded (`Rc`) to match the pull model.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<RefCell<ScopeData>>,
}

impl Scope {
    /// A root scope over the standard device registry.
    pub fn root() -> Scope {
        Self::with_registry(DeviceRegistry::standard())
    }

    pub fn with_registry(registry: Rc<DeviceRegistry>) -> Scope {
        Scope {
            inner: Rc::new(RefCell::new(ScopeData {
                parent: None,
                registry: Some(registry),
                variables: AHashMap::new(),
                views: AHashMap::new(),
                connections: AHashMap::new(),
                current_row: None,
            })),
        }
    }

    /// A child whose lookups fall through to this scope.
    pub fn child(&self) -> Scope {
        Scope {
            inner: Rc::new(RefCell::new(ScopeData {
                parent: Some(self.clone()),
                registry: None,
                variables: AHashMap::new(),
                views: AHashMap::new(),
                connections: AHashMap::new(),
                current_row: None,
            })),
        }
    }

    pub fn registry(&self) -> Rc<DeviceRegistry> {
        let data = self.inner.borrow();
        match (&data.registry, &data.parent) {
            (Some(registry), _) => Rc::clone(registry),
            (None, Some(parent)) => parent.registry(),
            (None, None) => DeviceRegistry::standard(),
        }
    }

    pub fn declare(&self, name: impl Into<SmolStr>, var_type: VariableType) {
        self.inner.borrow_mut().variables.insert(
            name.into(),
            Variable {
                var_type,
                value: Value::Null,
            },
        );
    }

    /// Write a variable at its declaration site, walking the parent chain.
    pub fn assign(&self, name: &str, value: Value) -> Result<()> {
        let mut scope = self.clone();
        loop {
            {
                let mut data = scope.inner.borrow_mut();
                if let Some(variable) = data.variables.get_mut(name) {
                    variable.value = variable.var_type.coerce(name, value)?;
                    return Ok(());
                }
            }
            let parent = scope.inner.borrow().parent.clone();
            match parent {
                Some(parent) => scope = parent,
                None => {
                    return Err(RuntimeError::eval(format!(
                        "Variable '@{name}' has not been declared"
                    ))
                    .into());
                }
            }
        }
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        let data = self.inner.borrow();
        if let Some(variable) = data.variables.get(name) {
            return Some(variable.value.clone());
        }
        data.parent.as_ref().and_then(|p| p.variable(name))
    }

    /// All visible variables, shadowed names resolved to the nearest scope,
    /// sorted by name.
    pub fn variables_snapshot(&self) -> Vec<(SmolStr, VariableType, Value)> {
        let mut seen = AHashSet::new();
        let mut out = Vec::new();
        let mut scope = Some(self.clone());
        while let Some(current) = scope {
            let data = current.inner.borrow();
            for (name, variable) in &data.variables {
                if seen.insert(name.clone()) {
                    out.push((name.clone(), variable.var_type, variable.value.clone()));
                }
            }
            scope = data.parent.clone();
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn register_view(&self, name: impl Into<SmolStr>, view: Rc<Executable>) {
        self.inner.borrow_mut().views.insert(name.into(), view);
    }

    pub fn view(&self, name: &str) -> Option<Rc<Executable>> {
        let data = self.inner.borrow();
        if let Some(view) = data.views.get(name) {
            return Some(Rc::clone(view));
        }
        data.parent.as_ref().and_then(|p| p.view(name))
    }

    pub fn views_snapshot(&self) -> Vec<SmolStr> {
        let mut seen = AHashSet::new();
        let mut scope = Some(self.clone());
        while let Some(current) = scope {
            let data = current.inner.borrow();
            seen.extend(data.views.keys().cloned());
            scope = data.parent.clone();
        }
        let mut names: Vec<_> = seen.into_iter().collect();
        names.sort();
        names
    }

    pub fn add_connection(&self, connection: Connection) {
        self.inner
            .borrow_mut()
            .connections
            .insert(connection.name.clone(), connection);
    }

    /// Drop a connection wherever it lives in the chain.
    pub fn remove_connection(&self, name: &str) -> bool {
        let mut scope = Some(self.clone());
        while let Some(current) = scope {
            if current.inner.borrow_mut().connections.remove(name).is_some() {
                return true;
            }
            scope = current.inner.borrow().parent.clone();
        }
        false
    }

    pub fn connection(&self, name: &str) -> Option<Connection> {
        let data = self.inner.borrow();
        if let Some(connection) = data.connections.get(name) {
            return Some(connection.clone());
        }
        data.parent.as_ref().and_then(|p| p.connection(name))
    }

    pub fn connections_snapshot(&self) -> Vec<Connection> {
        let mut seen = AHashSet::new();
        let mut out = Vec::new();
        let mut scope = Some(self.clone());
        while let Some(current) = scope {
            let data = current.inner.borrow();
            for (name, connection) in &data.connections {
                if seen.insert(name.clone()) {
                    out.push(connection.clone());
                }
            }
            scope = data.parent.clone();
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn set_current_row(&self, row: Option<Row>) {
        self.inner.borrow_mut().current_row = row;
    }

    /// Resolve a field against the row under evaluation, falling through to
    /// enclosing rows (correlated sub-queries).
    pub fn field(&self, name: &str) -> Option<Value> {
        let data = self.inner.borrow();
        if let Some(row) = &data.current_row
            && let Some(value) = row.get(name)
        {
            return Some(value.clone());
        }
        data.parent.as_ref().and_then(|p| p.field(name))
    }

    /// Whether any row is in scope at all; distinguishes "no field by that
    /// name" from "no source row".
    pub fn has_current_row(&self) -> bool {
        let data = self.inner.borrow();
        data.current_row.is_some()
            || data.parent.as_ref().is_some_and(Scope::has_current_row)
    }
}
