use std::str::FromStr;

use smol_str::SmolStr;

use crate::ast::{
    AggregateArg, AggregateFunc, BinaryOp, CompareOp, Condition, Expression, Field, Literal,
    NamedExpression, OrderedColumn, Statement,
};
use crate::errors::SyntaxError;
use crate::statements;
use crate::tokens::{Keyword, TokenStream};

/// Parse a boolean expression. Precedence: OR < AND < NOT < comparison.
pub fn parse_condition(ts: &mut TokenStream) -> Result<Condition, SyntaxError> {
    parse_or(ts)
}

fn parse_or(ts: &mut TokenStream) -> Result<Condition, SyntaxError> {
    let mut lhs = parse_and(ts)?;
    while ts.next_if("OR") {
        let rhs = parse_and(ts)?;
        lhs = Condition::Or(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_and(ts: &mut TokenStream) -> Result<Condition, SyntaxError> {
    let mut lhs = parse_not(ts)?;
    while ts.next_if("AND") {
        let rhs = parse_not(ts)?;
        lhs = Condition::And(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_not(ts: &mut TokenStream) -> Result<Condition, SyntaxError> {
    if ts.next_if("NOT") {
        let inner = parse_not(ts)?;
        return Ok(Condition::Not(Box::new(inner)));
    }
    parse_comparison(ts)
}

fn parse_comparison(ts: &mut TokenStream) -> Result<Condition, SyntaxError> {
    // A leading paren may open a grouped condition or a parenthesised value
    // expression; try the condition reading first and rewind if it fails.
    if ts.is("(") {
        ts.mark();
        ts.next()?;
        if let Ok(cond) = parse_condition(ts)
            && ts.next_if(")")
        {
            ts.discard_mark();
            return Ok(cond);
        }
        ts.reset();
    }

    let lhs = parse_expression(ts)?;

    if ts.next_if("IS") {
        let negated = ts.next_if("NOT");
        ts.expect("NULL")?;
        return Ok(if negated {
            Condition::IsNotNull(lhs)
        } else {
            Condition::IsNull(lhs)
        });
    }
    if ts.next_if("LIKE") {
        let pattern = parse_expression(ts)?;
        return Ok(Condition::Like { expr: lhs, pattern });
    }
    if ts.next_if("RLIKE") {
        let pattern = parse_expression(ts)?;
        return Ok(Condition::RLike { expr: lhs, pattern });
    }

    let op = match ts.peek() {
        Some(token) if token.is_symbol("=") => CompareOp::Eq,
        Some(token) if token.is_symbol("<>") || token.is_symbol("!=") => CompareOp::Ne,
        Some(token) if token.is_symbol("<=") => CompareOp::Le,
        Some(token) if token.is_symbol(">=") => CompareOp::Ge,
        Some(token) if token.is_symbol("<") => CompareOp::Lt,
        Some(token) if token.is_symbol(">") => CompareOp::Gt,
        other => return Err(SyntaxError::expected("a comparison operator", other)),
    };
    ts.next()?;
    let rhs = parse_expression(ts)?;
    Ok(Condition::Compare { op, lhs, rhs })
}

/// Parse a value expression. Precedence: additive < multiplicative < unary
/// minus < primary.
pub fn parse_expression(ts: &mut TokenStream) -> Result<Expression, SyntaxError> {
    let mut lhs = parse_multiplicative(ts)?;
    loop {
        let op = match ts.peek() {
            Some(token) if token.is_symbol("+") => BinaryOp::Add,
            Some(token) if token.is_symbol("-") => BinaryOp::Sub,
            Some(token) if token.is_symbol("||") => BinaryOp::Concat,
            _ => return Ok(lhs),
        };
        ts.next()?;
        let rhs = parse_multiplicative(ts)?;
        lhs = Expression::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };
    }
}

fn parse_multiplicative(ts: &mut TokenStream) -> Result<Expression, SyntaxError> {
    let mut lhs = parse_unary(ts)?;
    loop {
        let op = match ts.peek() {
            Some(token) if token.is_symbol("*") => BinaryOp::Mul,
            Some(token) if token.is_symbol("/") => BinaryOp::Div,
            Some(token) if token.is_symbol("%") => BinaryOp::Mod,
            _ => return Ok(lhs),
        };
        ts.next()?;
        let rhs = parse_unary(ts)?;
        lhs = Expression::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };
    }
}

fn parse_unary(ts: &mut TokenStream) -> Result<Expression, SyntaxError> {
    if ts.is("-") {
        ts.next()?;
        let inner = parse_unary(ts)?;
        return Ok(Expression::Neg(Box::new(inner)));
    }
    parse_primary(ts)
}

fn parse_primary(ts: &mut TokenStream) -> Result<Expression, SyntaxError> {
    let Some(token) = ts.peek() else {
        return Err(SyntaxError::eof("Expected an expression"));
    };

    if token.is_number() {
        let token = ts.next()?;
        return number_literal(ts, token.text());
    }
    if token.is_quoted() {
        let token = ts.next()?;
        return Ok(Expression::Literal(Literal::Str(token.text.to_string())));
    }
    if token.is_symbol("(") {
        ts.next()?;
        if ts.is("SELECT") {
            let stmt = statements::parse_statement(ts)?;
            ts.expect(")")?;
            return Ok(Expression::Subquery(Box::new(stmt)));
        }
        let expr = parse_expression(ts)?;
        ts.expect(")")?;
        return Ok(expr);
    }
    if token.is_symbol("@") {
        ts.next()?;
        let name = expect_ident(ts, "a variable name")?;
        return Ok(Expression::Variable(name));
    }

    match token.keyword() {
        Some(Keyword::Null) => {
            ts.next()?;
            return Ok(Expression::Literal(Literal::Null));
        }
        Some(Keyword::True) => {
            ts.next()?;
            return Ok(Expression::Literal(Literal::Bool(true)));
        }
        Some(Keyword::False) => {
            ts.next()?;
            return Ok(Expression::Literal(Literal::Bool(false)));
        }
        Some(Keyword::Case) => return parse_case(ts),
        Some(Keyword::Cast) => return parse_cast(ts),
        _ => {}
    }

    if token.is_ident() {
        if ts.peek_ahead(1).is_some_and(|t| t.is_symbol("(")) {
            return parse_call(ts);
        }
        let name = ts.next()?.text;
        if ts.peek().is_some_and(|t| t.is_symbol("."))
            && ts.peek_ahead(1).is_some_and(|t| t.is_ident())
        {
            ts.next()?;
            let column = ts.next()?.text;
            return Ok(Expression::Qualified {
                table: name,
                column,
            });
        }
        return Ok(Expression::FieldRef(name));
    }

    Err(SyntaxError::expected("an expression", Some(token)))
}

fn number_literal(ts: &TokenStream, text: &str) -> Result<Expression, SyntaxError> {
    let literal = if text.contains('.') {
        text.parse().map(Literal::Float).map_err(|_| ())
    } else {
        text.parse().map(Literal::Int).map_err(|_| ())
    };
    literal
        .map(Expression::Literal)
        .map_err(|_| ts.syntax_error(format!("Invalid numeric literal '{text}'")))
}

fn parse_case(ts: &mut TokenStream) -> Result<Expression, SyntaxError> {
    ts.expect("CASE")?;
    let mut branches = Vec::new();
    while ts.next_if("WHEN") {
        let cond = parse_condition(ts)?;
        ts.expect("THEN")?;
        let expr = parse_expression(ts)?;
        branches.push((cond, expr));
    }
    if branches.is_empty() {
        return Err(ts.syntax_error("CASE requires at least one WHEN branch"));
    }
    let otherwise = if ts.next_if("ELSE") {
        Some(Box::new(parse_expression(ts)?))
    } else {
        None
    };
    ts.expect("END")?;
    Ok(Expression::Case {
        branches,
        otherwise,
    })
}

fn parse_cast(ts: &mut TokenStream) -> Result<Expression, SyntaxError> {
    ts.expect("CAST")?;
    ts.expect("(")?;
    let expr = parse_expression(ts)?;
    ts.expect("AS")?;
    let to = expect_ident(ts, "a type name")?;
    ts.expect(")")?;
    Ok(Expression::Cast {
        expr: Box::new(expr),
        to,
    })
}

fn parse_call(ts: &mut TokenStream) -> Result<Expression, SyntaxError> {
    let name = ts.next()?.text;
    ts.expect("(")?;

    if let Ok(func) = AggregateFunc::from_str(&name) {
        let distinct = ts.next_if("DISTINCT");
        let arg = if ts.next_if("*") {
            if func != AggregateFunc::Count {
                return Err(ts.syntax_error(format!("{}(*) is not valid", func.as_ref())));
            }
            AggregateArg::Star
        } else {
            AggregateArg::Expr(Box::new(parse_expression(ts)?))
        };
        ts.expect(")")?;
        return Ok(Expression::Aggregate {
            func,
            distinct,
            arg,
        });
    }

    let mut args = Vec::new();
    if !ts.is(")") {
        loop {
            args.push(parse_expression(ts)?);
            if !ts.next_if(",") {
                break;
            }
        }
    }
    ts.expect(")")?;
    Ok(Expression::Function { name, args })
}

/// `%E` — comma-separated expressions with optional `AS` aliases. `*` is
/// legal here and nowhere else.
pub fn parse_named_expressions(ts: &mut TokenStream) -> Result<Vec<NamedExpression>, SyntaxError> {
    let mut items = Vec::new();
    loop {
        let expr = if ts.next_if("*") {
            Expression::Wildcard
        } else {
            parse_expression(ts)?
        };
        let alias = if ts.next_if("AS") {
            Some(expect_ident(ts, "an alias")?)
        } else {
            None
        };
        items.push(NamedExpression { expr, alias });
        if !ts.next_if(",") {
            return Ok(items);
        }
    }
}

/// `%F` — comma-separated field names with optional aliases.
pub fn parse_field_list(ts: &mut TokenStream) -> Result<Vec<Field>, SyntaxError> {
    let mut fields = Vec::new();
    loop {
        let name = if ts.next_if("*") {
            SmolStr::from("*")
        } else {
            expect_ident(ts, "a field name")?
        };
        let alias = if ts.next_if("AS") {
            Some(expect_ident(ts, "an alias")?)
        } else {
            None
        };
        fields.push(Field { name, alias });
        if !ts.next_if(",") {
            return Ok(fields);
        }
    }
}

/// `%o` — comma-separated `name [ASC|DESC]` sort keys.
pub fn parse_ordered_columns(ts: &mut TokenStream) -> Result<Vec<OrderedColumn>, SyntaxError> {
    let mut columns = Vec::new();
    loop {
        let name = expect_ident(ts, "a column name")?;
        let ascending = if ts.next_if("DESC") {
            false
        } else {
            ts.next_if("ASC");
            true
        };
        columns.push(OrderedColumn { name, ascending });
        if !ts.next_if(",") {
            return Ok(columns);
        }
    }
}

/// Parse either a scalar expression or a parenthesised sub-query (`%q`).
pub fn parse_assignable(
    ts: &mut TokenStream,
) -> Result<Result<Expression, Statement>, SyntaxError> {
    if ts.is("(") {
        ts.mark();
        ts.next()?;
        if ts.is("SELECT") {
            let parsed = statements::parse_statement(ts).and_then(|stmt| {
                ts.expect(")")?;
                Ok(stmt)
            });
            return match parsed {
                Ok(stmt) => {
                    ts.discard_mark();
                    Ok(Err(stmt))
                }
                Err(error) => {
                    ts.reset();
                    Err(error)
                }
            };
        }
        ts.reset();
    }
    if ts.is("SELECT") {
        return Ok(Err(statements::parse_statement(ts)?));
    }
    Ok(Ok(parse_expression(ts)?))
}

fn expect_ident(ts: &mut TokenStream, what: &str) -> Result<SmolStr, SyntaxError> {
    match ts.peek() {
        Some(token) if token.is_ident() => Ok(ts.next()?.text),
        other => Err(SyntaxError::expected(what, other)),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn expr(source: &str) -> Expression {
        let mut ts = TokenStream::new(source).unwrap();
        let expr = parse_expression(&mut ts).unwrap();
        assert!(!ts.has_next(), "unconsumed input in {source:?}");
        expr
    }

    fn cond(source: &str) -> Condition {
        let mut ts = TokenStream::new(source).unwrap();
        let cond = parse_condition(&mut ts).unwrap();
        assert!(!ts.has_next(), "unconsumed input in {source:?}");
        cond
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(expr("2 * 3 + 1").to_string(), "(2 * 3) + 1");
        assert_eq!(
            expr("2 * 3 + 1"),
            Expression::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expression::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(Expression::int(2)),
                    rhs: Box::new(Expression::int(3)),
                }),
                rhs: Box::new(Expression::int(1)),
            }
        );
    }

    #[test]
    fn parens_override_precedence() {
        assert_eq!(
            expr("2 * (3 + 1)"),
            Expression::Binary {
                op: BinaryOp::Mul,
                lhs: Box::new(Expression::int(2)),
                rhs: Box::new(Expression::Binary {
                    op: BinaryOp::Add,
                    lhs: Box::new(Expression::int(3)),
                    rhs: Box::new(Expression::int(1)),
                }),
            }
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let parsed = cond("a = 1 OR b = 2 AND c = 3");
        let Condition::Or(_, rhs) = parsed else {
            panic!("expected OR at the top");
        };
        assert!(matches!(*rhs, Condition::And(_, _)));
    }

    #[test]
    fn grouped_condition() {
        let parsed = cond("(a = 1 OR b = 2) AND c = 3");
        assert!(matches!(parsed, Condition::And(_, _)));
    }

    #[test]
    fn is_not_null() {
        assert_eq!(
            cond("Sector IS NOT NULL"),
            Condition::IsNotNull(Expression::field("Sector"))
        );
    }

    #[test]
    fn aggregate_with_distinct() {
        assert_eq!(
            expr("COUNT(DISTINCT Sector)"),
            Expression::Aggregate {
                func: AggregateFunc::Count,
                distinct: true,
                arg: AggregateArg::Expr(Box::new(Expression::field("Sector"))),
            }
        );
    }

    #[test]
    fn star_is_count_only() {
        let mut ts = TokenStream::new("SUM(*)").unwrap();
        assert!(parse_expression(&mut ts).is_err());
    }

    #[test]
    fn case_with_else() {
        let parsed = expr("CASE WHEN a = 1 THEN 'one' ELSE 'many' END");
        let Expression::Case {
            branches,
            otherwise,
        } = parsed
        else {
            panic!("expected CASE");
        };
        assert_eq!(branches.len(), 1);
        assert!(otherwise.is_some());
    }

    #[test]
    fn cast_to_type() {
        assert_eq!(expr("CAST(LastSale AS DOUBLE)").to_string(), "CAST(LastSale AS DOUBLE)");
    }

    #[test]
    fn qualified_and_variable_refs() {
        assert_eq!(
            expr("t.Symbol"),
            Expression::Qualified {
                table: "t".into(),
                column: "Symbol".into(),
            }
        );
        assert_eq!(expr("@x"), Expression::Variable("x".into()));
    }

    #[test]
    fn named_expressions_with_aliases() {
        let mut ts = TokenStream::new("Symbol, COUNT(*) AS n, *").unwrap();
        let items = parse_named_expressions(&mut ts).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].output_name(), "Symbol");
        assert_eq!(items[1].output_name(), "n");
        assert_eq!(items[2].expr, Expression::Wildcard);
    }

    #[test]
    fn ordered_columns_default_ascending() {
        let mut ts = TokenStream::new("Sector, n DESC, Symbol ASC").unwrap();
        let cols = parse_ordered_columns(&mut ts).unwrap();
        assert_eq!(
            cols,
            vec![
                OrderedColumn::asc("Sector"),
                OrderedColumn::desc("n"),
                OrderedColumn::asc("Symbol"),
            ]
        );
    }

    #[test]
    fn keywords_do_not_parse_as_field_refs() {
        let mut ts = TokenStream::new("FROM").unwrap();
        assert!(parse_expression(&mut ts).is_err());
    }
}
