pub mod compile;
pub mod devices;
pub mod errors;
pub mod eval;
pub mod exec;
pub mod registry;
pub mod rows;
pub mod runtime;
pub mod scope;
pub mod sources;
pub mod values;

use std::hash::BuildHasherDefault;

pub type IndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<ahash::AHasher>>;

pub use qwery_parser::{Format, Hints, Statement, SyntaxError};

pub use errors::{EngineError, Phase, Result, RuntimeError, SemanticError};
pub use exec::{Executable, ResultSet};
pub use rows::Row;
pub use runtime::Runtime;
pub use scope::{Scope, VariableType};
pub use values::Value;
