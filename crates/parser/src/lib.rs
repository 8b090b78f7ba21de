pub mod ast;
pub mod errors;
pub mod expression;
pub mod hints;
pub mod lexer;
pub mod statements;
pub mod template;
pub mod tokens;

use std::hash::BuildHasherDefault;

pub type IndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<ahash::AHasher>>;

pub use ast::Statement;
pub use errors::SyntaxError;
pub use hints::{Format, Hints};
pub use statements::{parse, parse_script};
pub use tokens::TokenStream;
