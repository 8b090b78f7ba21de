use std::sync::LazyLock;

use crate::ast::{
    AssignmentSource, Connect, CreateView, DataResource, Declare, Describe, Disconnect,
    Expression, Field, Insert, InsertSource, QuerySource, Select, SetVariable, Show, Statement,
};
use crate::errors::SyntaxError;
use crate::tokens::{Keyword, TokenStream};
use crate::template::Template;

static DESCRIBE: LazyLock<Template> =
    LazyLock::new(|| Template::compile("DESCRIBE %s:source ?LIMIT +?%n:limit"));

static SELECT: LazyLock<Template> = LazyLock::new(|| {
    Template::compile(
        "SELECT ?TOP +?%n:top %E:fields \
         ?%C(mode,INTO,OVERWRITE) +?%a:target +?%w:targetHints \
         ?FROM +?%s:source +?%w:sourceHints \
         ?WHERE +?%c:cond \
         ?GROUP +?BY +?%F:groupBy \
         ?ORDER +?BY +?%o:orderBy \
         ?LIMIT +?%n:limit",
    )
});

static INSERT: LazyLock<Template> = LazyLock::new(|| {
    Template::compile(
        "INSERT %C(mode,INTO,OVERWRITE) %a:target ?%w:hints ( %F:fields ) \
         {{valueSets VALUES ( %E:values ) }}",
    )
});

static DECLARE: LazyLock<Template> =
    LazyLock::new(|| Template::compile("DECLARE %v:name %a:type"));

static SET: LazyLock<Template> =
    LazyLock::new(|| Template::compile("SET %v:name = %q:expression"));

static SHOW: LazyLock<Template> = LazyLock::new(|| Template::compile("SHOW %a:entityType"));

static CREATE_VIEW: LazyLock<Template> =
    LazyLock::new(|| Template::compile("CREATE VIEW %a:name AS %S:query"));

static CONNECT: LazyLock<Template> =
    LazyLock::new(|| Template::compile("CONNECT TO %a:service ?%w:hints AS %a:name"));

static DISCONNECT: LazyLock<Template> =
    LazyLock::new(|| Template::compile("DISCONNECT FROM %a:handle"));

/// Parse a single statement, tolerating one trailing `;`.
pub fn parse(sql: &str) -> Result<Statement, SyntaxError> {
    let mut ts = TokenStream::new(sql)?;
    let statement = parse_statement(&mut ts)?;
    ts.next_if(";");
    if ts.has_next() {
        return Err(ts.syntax_error("Unexpected trailing input"));
    }
    Ok(statement)
}

/// Parse a `;`-separated script.
pub fn parse_script(sql: &str) -> Result<Vec<Statement>, SyntaxError> {
    let mut ts = TokenStream::new(sql)?;
    let mut statements = Vec::new();
    while ts.has_next() {
        if ts.next_if(";") {
            continue;
        }
        statements.push(parse_statement(&mut ts)?);
        if ts.has_next() {
            ts.expect(";")?;
        }
    }
    Ok(statements)
}

pub(crate) fn parse_statement(ts: &mut TokenStream) -> Result<Statement, SyntaxError> {
    let Some(token) = ts.peek() else {
        return Err(SyntaxError::eof("Expected a statement"));
    };
    match token.keyword() {
        Some(Keyword::Select) => parse_select(ts),
        Some(Keyword::Describe) => parse_describe(ts),
        Some(Keyword::Insert) => parse_insert(ts),
        Some(Keyword::Declare) => parse_declare(ts),
        Some(Keyword::Set) => parse_set(ts),
        Some(Keyword::Show) => parse_show(ts),
        Some(Keyword::Create) => parse_create_view(ts),
        Some(Keyword::Connect) => parse_connect(ts),
        Some(Keyword::Disconnect) => parse_disconnect(ts),
        _ => Err(SyntaxError::expected("a statement", Some(token))),
    }
}

fn required<T>(
    value: Option<T>,
    what: &str,
    ts: &TokenStream,
) -> Result<T, SyntaxError> {
    value.ok_or_else(|| ts.syntax_error(format!("Expected {what}")))
}

fn parse_select(ts: &mut TokenStream) -> Result<Statement, SyntaxError> {
    let mut params = SELECT.process(ts)?;

    let projections = required(params.expressions.remove("fields"), "projections", ts)?;
    let mut source = params.sources.remove("source");
    if let Some(hints) = params.hints.remove("sourceHints")
        && let Some(QuerySource::Resource(resource)) = &mut source
    {
        resource.hints = resource.hints.clone().merge(&hints);
    }

    let select = Select {
        projections,
        source,
        condition: params.conditions.remove("cond"),
        group_by: params.fields.remove("groupBy").unwrap_or_default(),
        order_by: params.ordered_fields.remove("orderBy").unwrap_or_default(),
        top: params.numeric_u64("top"),
        limit: params.numeric_u64("limit"),
    };

    // INTO/OVERWRITE turns the whole query into an insert whose field list
    // is the projected names.
    match params.atoms.remove("mode") {
        None => Ok(Statement::Select(select)),
        Some(mode) => {
            let target = required(params.atoms.remove("target"), "a target", ts)?;
            let hints = params
                .hints
                .remove("targetHints")
                .unwrap_or_default()
                .with_append(mode == "INTO");
            let fields = projected_names(&select);
            Ok(Statement::Insert(Insert {
                target: DataResource {
                    path: target,
                    hints,
                },
                fields,
                source: InsertSource::Query(Box::new(Statement::Select(select))),
            }))
        }
    }
}

/// Field list for a wrapped `SELECT … INTO`; a wildcard projection leaves it
/// empty, which the insert operator treats as pass-through.
fn projected_names(select: &Select) -> Vec<Field> {
    if select
        .projections
        .iter()
        .any(|p| p.expr == Expression::Wildcard)
    {
        return Vec::new();
    }
    select
        .projections
        .iter()
        .map(|p| Field::named(p.output_name()))
        .collect()
}

fn parse_describe(ts: &mut TokenStream) -> Result<Statement, SyntaxError> {
    let mut params = DESCRIBE.process(ts)?;
    Ok(Statement::Describe(Describe {
        source: required(params.sources.remove("source"), "a source", ts)?,
        limit: params.numeric_u64("limit"),
    }))
}

fn parse_insert(ts: &mut TokenStream) -> Result<Statement, SyntaxError> {
    let mut params = INSERT.process(ts)?;

    let mode = required(params.atoms.remove("mode"), "INTO or OVERWRITE", ts)?;
    let target = required(params.atoms.remove("target"), "a target", ts)?;
    let hints = params
        .hints
        .remove("hints")
        .unwrap_or_default()
        .with_append(mode == "INTO");
    let fields = required(params.fields.remove("fields"), "a field list", ts)?;

    let value_sets = params.repeated_sets.remove("valueSets").unwrap_or_default();
    let source = if value_sets.is_empty() {
        InsertSource::Query(Box::new(parse_statement(ts)?))
    } else {
        let rows = value_sets
            .into_iter()
            .map(|mut set| {
                set.expressions
                    .remove("values")
                    .unwrap_or_default()
                    .into_iter()
                    .map(|named| named.expr)
                    .collect()
            })
            .collect();
        InsertSource::Values(rows)
    };

    Ok(Statement::Insert(Insert {
        target: DataResource {
            path: target,
            hints,
        },
        fields,
        source,
    }))
}

fn parse_declare(ts: &mut TokenStream) -> Result<Statement, SyntaxError> {
    let mut params = DECLARE.process(ts)?;
    Ok(Statement::Declare(Declare {
        name: required(params.variables.remove("name"), "a variable", ts)?,
        var_type: required(params.atoms.remove("type"), "a type", ts)?.into(),
    }))
}

fn parse_set(ts: &mut TokenStream) -> Result<Statement, SyntaxError> {
    let mut params = SET.process(ts)?;
    let name = required(params.variables.remove("name"), "a variable", ts)?;
    let value = match params.assignables.remove("expression") {
        Some(expr) => AssignmentSource::Expression(expr),
        None => match params.sources.remove("expression") {
            Some(QuerySource::Subquery(stmt)) => AssignmentSource::Query(stmt),
            _ => return Err(ts.syntax_error("Expected an expression or sub-query")),
        },
    };
    Ok(Statement::SetVariable(SetVariable { name, value }))
}

fn parse_show(ts: &mut TokenStream) -> Result<Statement, SyntaxError> {
    let mut params = SHOW.process(ts)?;
    Ok(Statement::Show(Show {
        entity: required(params.atoms.remove("entityType"), "an entity type", ts)?.into(),
    }))
}

fn parse_create_view(ts: &mut TokenStream) -> Result<Statement, SyntaxError> {
    let mut params = CREATE_VIEW.process(ts)?;
    let name = required(params.atoms.remove("name"), "a view name", ts)?;
    let query = match params.sources.remove("query") {
        Some(QuerySource::Subquery(stmt)) => stmt,
        _ => return Err(ts.syntax_error("Expected a query")),
    };
    Ok(Statement::CreateView(CreateView {
        name: name.into(),
        query,
    }))
}

fn parse_connect(ts: &mut TokenStream) -> Result<Statement, SyntaxError> {
    let mut params = CONNECT.process(ts)?;
    Ok(Statement::Connect(Connect {
        service: required(params.atoms.remove("service"), "a service", ts)?,
        hints: params.hints.remove("hints").unwrap_or_default(),
        name: required(params.atoms.remove("name"), "a connection name", ts)?.into(),
    }))
}

fn parse_disconnect(ts: &mut TokenStream) -> Result<Statement, SyntaxError> {
    let mut params = DISCONNECT.process(ts)?;
    Ok(Statement::Disconnect(Disconnect {
        handle: required(params.atoms.remove("handle"), "a connection handle", ts)?.into(),
    }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::{Condition, CompareOp, Expression, NamedExpression, OrderedColumn};

    #[test]
    fn select_with_every_clause() {
        let stmt = parse(
            "SELECT Sector, COUNT(*) AS n FROM 'cl.csv' \
             WHERE LastSale > 10 GROUP BY Sector ORDER BY n DESC LIMIT 3",
        )
        .unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected a select");
        };
        assert_eq!(select.projections.len(), 2);
        assert_eq!(
            select.source,
            Some(QuerySource::Resource(DataResource::new("cl.csv")))
        );
        assert!(matches!(
            select.condition,
            Some(Condition::Compare {
                op: CompareOp::Gt,
                ..
            })
        ));
        assert_eq!(select.group_by, vec![Field::named("Sector")]);
        assert_eq!(select.order_by, vec![OrderedColumn::desc("n")]);
        assert_eq!(select.limit, Some(3));
    }

    #[test]
    fn select_without_from() {
        let stmt = parse("SELECT @x AS v").unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected a select");
        };
        assert_eq!(select.source, None);
        assert_eq!(
            select.projections,
            vec![NamedExpression {
                expr: Expression::Variable("x".into()),
                alias: Some("v".into()),
            }]
        );
    }

    #[test]
    fn select_top() {
        let stmt = parse("SELECT TOP 5 * FROM 'x.csv'").unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected a select");
        };
        assert_eq!(select.top, Some(5));
        assert_eq!(select.projections[0].expr, Expression::Wildcard);
    }

    #[test]
    fn select_into_wraps_as_insert() {
        let stmt =
            parse("SELECT Symbol, Name INTO 'out.json' WITH JSON FORMAT FROM 'in.csv'").unwrap();
        let Statement::Insert(insert) = stmt else {
            panic!("expected the wrapped insert");
        };
        assert_eq!(insert.target.path, "out.json");
        assert_eq!(insert.target.hints.append, Some(true));
        assert_eq!(insert.target.hints.is_json, Some(true));
        assert_eq!(
            insert.fields,
            vec![Field::named("Symbol"), Field::named("Name")]
        );
        assert!(matches!(
            insert.source,
            InsertSource::Query(ref stmt) if matches!(**stmt, Statement::Select(_))
        ));
    }

    #[test]
    fn source_hints_attach_to_the_resource() {
        let stmt = parse("SELECT * FROM 'data.txt' WITH DELIMITER '|' WHERE a = 1").unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected a select");
        };
        let Some(QuerySource::Resource(resource)) = select.source else {
            panic!("expected a resource source");
        };
        assert_eq!(resource.hints.delimiter.as_deref(), Some("|"));
        assert!(select.condition.is_some());
    }

    #[test]
    fn insert_values() {
        let stmt = parse("INSERT INTO 'k.csv' (a, b) VALUES (1, 'x') VALUES (2, 'y')").unwrap();
        let Statement::Insert(insert) = stmt else {
            panic!("expected an insert");
        };
        assert_eq!(insert.target.hints.append, Some(true));
        assert_eq!(insert.fields.len(), 2);
        let InsertSource::Values(rows) = insert.source else {
            panic!("expected values");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], Expression::int(2));
    }

    #[test]
    fn insert_overwrite_from_select() {
        let stmt = parse(
            "INSERT OVERWRITE 'out.json' WITH JSON FORMAT (Symbol, Name) \
             SELECT Symbol, Name FROM 'companylist.csv' WITH CSV FORMAT \
             WHERE Sector = 'Technology'",
        )
        .unwrap();
        let Statement::Insert(insert) = stmt else {
            panic!("expected an insert");
        };
        assert_eq!(insert.target.hints.append, Some(false));
        assert!(matches!(insert.source, InsertSource::Query(_)));
    }

    #[test]
    fn declare_set_show() {
        assert_eq!(
            parse("DECLARE @x DOUBLE").unwrap(),
            Statement::Declare(Declare {
                name: "x".into(),
                var_type: "DOUBLE".into(),
            })
        );
        let Statement::SetVariable(set) = parse("SET @x = 2 * 3 + 1").unwrap() else {
            panic!("expected an assignment");
        };
        assert_eq!(set.name, "x");
        assert!(matches!(set.value, AssignmentSource::Expression(_)));
        assert_eq!(
            parse("SHOW VIEWS").unwrap(),
            Statement::Show(Show {
                entity: "VIEWS".into(),
            })
        );
    }

    #[test]
    fn set_from_subquery() {
        let Statement::SetVariable(set) =
            parse("SET @n = (SELECT COUNT(*) FROM 'cl.csv')").unwrap()
        else {
            panic!("expected an assignment");
        };
        assert!(matches!(set.value, AssignmentSource::Query(_)));
    }

    #[test]
    fn create_view_and_connections() {
        let Statement::CreateView(view) =
            parse("CREATE VIEW tech AS SELECT * FROM 'cl.csv' WHERE Sector = 'Technology'")
                .unwrap()
        else {
            panic!("expected a view");
        };
        assert_eq!(view.name, "tech");

        let Statement::Connect(connect) =
            parse("CONNECT TO 'jdbc:postgresql://localhost/etl' AS warehouse").unwrap()
        else {
            panic!("expected a connect");
        };
        assert_eq!(connect.name, "warehouse");

        assert_eq!(
            parse("DISCONNECT FROM warehouse").unwrap(),
            Statement::Disconnect(Disconnect {
                handle: "warehouse".into(),
            })
        );
    }

    #[test]
    fn describe_with_limit() {
        let Statement::Describe(describe) = parse("DESCRIBE 'cl.csv' LIMIT 3").unwrap() else {
            panic!("expected a describe");
        };
        assert_eq!(describe.limit, Some(3));
    }

    #[test]
    fn script_splits_on_semicolons() {
        let script = parse_script("DECLARE @x DOUBLE; SET @x = 2 * 3 + 1; SELECT @x AS v").unwrap();
        assert_eq!(script.len(), 3);
        assert!(matches!(script[2], Statement::Select(_)));
    }

    #[test]
    fn unknown_statement_is_a_syntax_error() {
        let err = parse("FROBNICATE 'x'").unwrap_err();
        assert!(err.message.contains("statement"));
    }

    /// Rendering a parsed statement and re-parsing it reproduces the AST.
    #[test]
    fn render_parse_round_trip() {
        let sources = [
            "SELECT Symbol, Name FROM 'companylist.csv' WHERE Industry = 'Oil/Gas Transmission'",
            "SELECT Sector, COUNT(*) AS n FROM 'cl.csv' GROUP BY Sector ORDER BY n DESC LIMIT 3",
            "INSERT INTO 'k.csv' (a, b) VALUES (1, 'x') VALUES (2, 'y')",
            "DESCRIBE 'cl.csv' LIMIT 3",
            "DECLARE @x DOUBLE",
            "SET @x = 2 * 3 + 1",
            "SHOW VIEWS",
            "CREATE VIEW tech AS SELECT * FROM 'cl.csv' WHERE Sector = 'Technology'",
            "CONNECT TO 'jdbc:h2:mem' AS scratch",
            "DISCONNECT FROM scratch",
        ];
        for source in sources {
            let first = parse(source).unwrap();
            let second = parse(&first.to_string())
                .unwrap_or_else(|e| panic!("re-parse of {first} failed: {e}"));
            assert_eq!(first, second, "round trip of {source:?}");
        }
    }
}
