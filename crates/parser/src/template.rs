use std::fmt::Debug;
use std::hash::Hash;

use ahash::AHashMap;
use fancy_regex::Regex;
use smol_str::SmolStr;

use crate::ast::{
    Condition, DataResource, Expression, Field, NamedExpression, OrderedColumn, QuerySource,
};
use crate::errors::SyntaxError;
use crate::expression;
use crate::hints::Hints;
use crate::statements;
use crate::tokens::TokenStream;

/// One element of a compiled template pattern.
#[derive(Debug, Clone)]
enum TemplateTag {
    /// A bare word: a literal keyword or symbol, matched case-insensitively.
    Keyword(String),
    /// `%a:NAME` — an identifier or quoted literal, one token.
    Atom(SmolStr),
    /// `%n:NAME` — a numeric literal.
    Numeric(SmolStr),
    /// `%v:NAME` — `@` followed by an identifier.
    Variable(SmolStr),
    /// `%c:NAME` — a conditional expression.
    Condition(SmolStr),
    /// `%e:NAME` — an assignable (general) expression.
    Assignable(SmolStr),
    /// `%E:NAME` — comma-separated expressions with optional aliases.
    ExpressionList(SmolStr),
    /// `%F:NAME` — comma-separated field names.
    FieldList(SmolStr),
    /// `%o:NAME` — comma-separated ordered columns.
    OrderedFields(SmolStr),
    /// `%q:NAME` — an expression or a parenthesised sub-query.
    Query(SmolStr),
    /// `%s:NAME` — a quoted-literal source or a parenthesised sub-query.
    Source(SmolStr),
    /// `%S:NAME` — a sub-query, parenthesised or starting at `SELECT`.
    SubQuery(SmolStr),
    /// `%w:NAME` — one or more `WITH …` hint clauses.
    Hints(SmolStr),
    /// `%C(name,OPT…)` — exactly one of a fixed keyword set.
    Chooser {
        name: SmolStr,
        options: Vec<String>,
    },
    /// `` %r`…` `` — a regex applied to the raw remainder of the source.
    Remainder(Regex),
    /// `?TAG` — optional; failure rewinds and skips trailing `+?` tags.
    Optional(Box<TemplateTag>),
    /// `+?TAG` — continuation of a preceding optional.
    OptionalContinuation(Box<TemplateTag>),
    /// `{{NAME … }}` — zero-or-more repetition of a sub-sequence.
    Repeat {
        name: SmolStr,
        tags: Vec<TemplateTag>,
    },
}

/// A statement-shape pattern, compiled once and interpreted against a token
/// stream. Compilation is separate from matching so a template can be built
/// in a static and reused re-entrantly.
#[derive(Debug, Clone)]
pub struct Template {
    tags: Vec<TemplateTag>,
}

impl Template {
    /// Compile a pattern string. Patterns are internal constants, so a
    /// malformed one is a programmer error and panics.
    pub fn compile(pattern: &str) -> Template {
        let mut words = pattern.split_whitespace().peekable();
        let mut tags = Vec::new();
        while let Some(word) = words.next() {
            if let Some(name) = word.strip_prefix("{{") {
                let mut inner = Vec::new();
                loop {
                    let word = words
                        .next()
                        .unwrap_or_else(|| panic!("unclosed {{{{{name} in template"));
                    if word == "}}" {
                        break;
                    }
                    inner.push(compile_tag(word));
                }
                tags.push(TemplateTag::Repeat {
                    name: name.into(),
                    tags: inner,
                });
            } else {
                tags.push(compile_tag(word));
            }
        }
        Template { tags }
    }

    /// Interpret the template against the stream, producing the parameter
    /// bag. Failures outside optionals surface a syntax error at the
    /// offending token.
    pub fn process(&self, ts: &mut TokenStream) -> Result<TemplateParams, SyntaxError> {
        let mut params = TemplateParams::default();
        process_tags(&self.tags, ts, &mut params)?;
        Ok(params)
    }
}

fn compile_tag(word: &str) -> TemplateTag {
    if let Some(rest) = word.strip_prefix("+?") {
        return TemplateTag::OptionalContinuation(Box::new(compile_tag(rest)));
    }
    if let Some(rest) = word.strip_prefix('?') {
        return TemplateTag::Optional(Box::new(compile_tag(rest)));
    }
    if let Some(name) = word.strip_prefix("%a:") {
        return TemplateTag::Atom(name.into());
    }
    if let Some(name) = word.strip_prefix("%n:") {
        return TemplateTag::Numeric(name.into());
    }
    if let Some(name) = word.strip_prefix("%v:") {
        return TemplateTag::Variable(name.into());
    }
    if let Some(name) = word.strip_prefix("%c:") {
        return TemplateTag::Condition(name.into());
    }
    if let Some(name) = word.strip_prefix("%e:") {
        return TemplateTag::Assignable(name.into());
    }
    if let Some(name) = word.strip_prefix("%E:") {
        return TemplateTag::ExpressionList(name.into());
    }
    if let Some(name) = word.strip_prefix("%F:") {
        return TemplateTag::FieldList(name.into());
    }
    if let Some(name) = word.strip_prefix("%o:") {
        return TemplateTag::OrderedFields(name.into());
    }
    if let Some(name) = word.strip_prefix("%q:") {
        return TemplateTag::Query(name.into());
    }
    if let Some(name) = word.strip_prefix("%s:") {
        return TemplateTag::Source(name.into());
    }
    if let Some(name) = word.strip_prefix("%S:") {
        return TemplateTag::SubQuery(name.into());
    }
    if let Some(name) = word.strip_prefix("%w:") {
        return TemplateTag::Hints(name.into());
    }
    if let Some(spec) = word.strip_prefix("%C(").and_then(|w| w.strip_suffix(')')) {
        let mut parts = spec.split(',');
        let name = parts.next().expect("chooser requires a name");
        let options: Vec<String> = parts.map(str::to_string).collect();
        assert!(!options.is_empty(), "chooser '{name}' requires options");
        return TemplateTag::Chooser {
            name: name.into(),
            options,
        };
    }
    if let Some(pattern) = word.strip_prefix("%r`").and_then(|w| w.strip_suffix('`')) {
        let regex = Regex::new(&format!("^(?:{pattern})"))
            .unwrap_or_else(|e| panic!("invalid template regex '{pattern}': {e}"));
        return TemplateTag::Remainder(regex);
    }
    assert!(!word.starts_with('%'), "unknown template tag '{word}'");
    TemplateTag::Keyword(word.to_string())
}

fn process_tags(
    tags: &[TemplateTag],
    ts: &mut TokenStream,
    params: &mut TemplateParams,
) -> Result<(), SyntaxError> {
    let mut idx = 0;
    while idx < tags.len() {
        match &tags[idx] {
            TemplateTag::Optional(inner) | TemplateTag::OptionalContinuation(inner) => {
                ts.mark();
                let mut attempt = TemplateParams::default();
                match apply_tag(inner, ts, &mut attempt) {
                    Ok(()) => {
                        ts.discard_mark();
                        params.merge(attempt);
                        idx += 1;
                    }
                    Err(_) => {
                        // Rewind to the optional's entry and skip its
                        // continuation tags.
                        ts.reset();
                        idx += 1;
                        while matches!(
                            tags.get(idx),
                            Some(TemplateTag::OptionalContinuation(_))
                        ) {
                            idx += 1;
                        }
                    }
                }
            }
            tag => {
                apply_tag(tag, ts, params)?;
                idx += 1;
            }
        }
    }
    Ok(())
}

fn apply_tag(
    tag: &TemplateTag,
    ts: &mut TokenStream,
    params: &mut TemplateParams,
) -> Result<(), SyntaxError> {
    match tag {
        TemplateTag::Keyword(word) => {
            ts.expect(word)?;
        }
        TemplateTag::Atom(name) => {
            let atom = match ts.peek() {
                Some(token) if token.is_ident() || token.is_quoted() => ts.next()?.text,
                other => return Err(SyntaxError::expected("an identifier or literal", other)),
            };
            params.atoms.insert(name.clone(), atom.to_string());
        }
        TemplateTag::Numeric(name) => {
            let value = match ts.peek() {
                Some(token) if token.is_number() => {
                    let token = ts.next()?;
                    token.text().parse::<f64>().map_err(|_| {
                        SyntaxError::new(format!("Invalid number '{}'", token.text), Some(&token))
                    })?
                }
                other => return Err(SyntaxError::expected("a numeric literal", other)),
            };
            params.numerics.insert(name.clone(), value);
        }
        TemplateTag::Variable(name) => {
            ts.expect("@")?;
            let ident = match ts.peek() {
                Some(token) if token.is_ident() => ts.next()?.text,
                other => return Err(SyntaxError::expected("a variable name", other)),
            };
            params.variables.insert(name.clone(), ident);
        }
        TemplateTag::Condition(name) => {
            let cond = expression::parse_condition(ts)?;
            params.conditions.insert(name.clone(), cond);
        }
        TemplateTag::Assignable(name) => {
            let expr = expression::parse_expression(ts)?;
            params.assignables.insert(name.clone(), expr);
        }
        TemplateTag::ExpressionList(name) => {
            let exprs = expression::parse_named_expressions(ts)?;
            params.expressions.insert(name.clone(), exprs);
        }
        TemplateTag::FieldList(name) => {
            let fields = expression::parse_field_list(ts)?;
            params.fields.insert(name.clone(), fields);
        }
        TemplateTag::OrderedFields(name) => {
            let columns = expression::parse_ordered_columns(ts)?;
            params.ordered_fields.insert(name.clone(), columns);
        }
        TemplateTag::Query(name) => match expression::parse_assignable(ts)? {
            Ok(expr) => {
                params.assignables.insert(name.clone(), expr);
            }
            Err(stmt) => {
                params
                    .sources
                    .insert(name.clone(), QuerySource::Subquery(Box::new(stmt)));
            }
        },
        TemplateTag::Source(name) => {
            let source = match ts.peek() {
                Some(token) if token.is_quoted() => {
                    QuerySource::Resource(DataResource::new(ts.next()?.text.to_string()))
                }
                Some(token) if token.is_symbol("(") => {
                    ts.next()?;
                    let stmt = statements::parse_statement(ts)?;
                    ts.expect(")")?;
                    QuerySource::Subquery(Box::new(stmt))
                }
                other => return Err(SyntaxError::expected("a source", other)),
            };
            params.sources.insert(name.clone(), source);
        }
        TemplateTag::SubQuery(name) => {
            let stmt = if ts.next_if("(") {
                let stmt = statements::parse_statement(ts)?;
                ts.expect(")")?;
                stmt
            } else if ts.is("SELECT") {
                statements::parse_statement(ts)?
            } else {
                return Err(SyntaxError::expected("a sub-query", ts.peek()));
            };
            params
                .sources
                .insert(name.clone(), QuerySource::Subquery(Box::new(stmt)));
        }
        TemplateTag::Hints(name) => {
            let hints = Hints::parse_with(ts)?;
            params.hints.insert(name.clone(), hints);
        }
        TemplateTag::Chooser { name, options } => {
            let Some(option) = options.iter().find(|opt| ts.is(opt)) else {
                return Err(SyntaxError::expected(
                    &format!("one of {}", options.join(", ")),
                    ts.peek(),
                ));
            };
            let option = option.clone();
            ts.next()?;
            params.atoms.insert(name.clone(), option);
        }
        TemplateTag::Remainder(regex) => {
            let start = ts.byte_offset();
            let remainder = &ts.source()[start..];
            match regex.find(remainder) {
                Ok(Some(found)) => {
                    let end = start + found.end();
                    ts.advance_to_byte(end);
                }
                _ => return Err(ts.syntax_error("Input does not match the expected pattern")),
            }
        }
        TemplateTag::Optional(_) | TemplateTag::OptionalContinuation(_) => {
            unreachable!("optional tags are unwrapped by process_tags before apply_tag runs")
        }
        TemplateTag::Repeat { name, tags } => {
            let mut sets = Vec::new();
            loop {
                ts.mark();
                let before = ts.position();
                let mut sub = TemplateParams::default();
                match process_tags(tags, ts, &mut sub) {
                    Ok(()) if ts.position() > before => {
                        ts.discard_mark();
                        sets.push(sub);
                    }
                    // No progress or a failed iteration ends the loop.
                    _ => {
                        ts.reset();
                        break;
                    }
                }
            }
            params.repeated_sets.insert(name.clone(), sets);
        }
    }
    Ok(())
}

/// The typed parameter bag a template produces. Monoidal: `merge` is a
/// key-disjoint union, and a collision is a bug in the template itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateParams {
    pub atoms: AHashMap<SmolStr, String>,
    pub numerics: AHashMap<SmolStr, f64>,
    pub fields: AHashMap<SmolStr, Vec<Field>>,
    pub expressions: AHashMap<SmolStr, Vec<NamedExpression>>,
    pub conditions: AHashMap<SmolStr, Condition>,
    pub ordered_fields: AHashMap<SmolStr, Vec<OrderedColumn>>,
    pub sources: AHashMap<SmolStr, QuerySource>,
    pub variables: AHashMap<SmolStr, SmolStr>,
    pub hints: AHashMap<SmolStr, Hints>,
    pub repeated_sets: AHashMap<SmolStr, Vec<TemplateParams>>,
    pub assignables: AHashMap<SmolStr, Expression>,
}

impl TemplateParams {
    pub fn merge(&mut self, other: TemplateParams) {
        merge_map(&mut self.atoms, other.atoms);
        merge_map(&mut self.numerics, other.numerics);
        merge_map(&mut self.fields, other.fields);
        merge_map(&mut self.expressions, other.expressions);
        merge_map(&mut self.conditions, other.conditions);
        merge_map(&mut self.ordered_fields, other.ordered_fields);
        merge_map(&mut self.sources, other.sources);
        merge_map(&mut self.variables, other.variables);
        merge_map(&mut self.hints, other.hints);
        merge_map(&mut self.repeated_sets, other.repeated_sets);
        merge_map(&mut self.assignables, other.assignables);
    }

    pub fn numeric_u64(&self, name: &str) -> Option<u64> {
        self.numerics.get(name).map(|n| *n as u64)
    }
}

fn merge_map<K: Eq + Hash + Debug, V>(dst: &mut AHashMap<K, V>, src: AHashMap<K, V>) {
    for (key, value) in src {
        let previous = dst.insert(key, value);
        assert!(previous.is_none(), "template parameter bound twice");
    }
}
