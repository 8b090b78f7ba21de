use std::fmt;

use smol_str::SmolStr;
use strum_macros::{AsRefStr, EnumString};

use crate::hints::Hints;

/// One executable statement. A closed set: evaluators match exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Describe(Describe),
    Declare(Declare),
    SetVariable(SetVariable),
    Show(Show),
    CreateView(CreateView),
    Connect(Connect),
    Disconnect(Disconnect),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub projections: Vec<NamedExpression>,
    pub source: Option<QuerySource>,
    pub condition: Option<Condition>,
    pub group_by: Vec<Field>,
    pub order_by: Vec<OrderedColumn>,
    pub top: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub target: DataResource,
    pub fields: Vec<Field>,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// One entry per `VALUES (…)` block.
    Values(Vec<Vec<Expression>>),
    Query(Box<Statement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Describe {
    pub source: QuerySource,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declare {
    pub name: SmolStr,
    pub var_type: SmolStr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetVariable {
    pub name: SmolStr,
    pub value: AssignmentSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentSource {
    Expression(Expression),
    Query(Box<Statement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Show {
    pub entity: SmolStr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateView {
    pub name: SmolStr,
    pub query: Box<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connect {
    pub name: SmolStr,
    pub service: String,
    pub hints: Hints,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Disconnect {
    pub handle: SmolStr,
}

/// A symbolic source or sink, resolved to a concrete device at execute time.
#[derive(Debug, Clone, PartialEq)]
pub struct DataResource {
    pub path: String,
    pub hints: Hints,
}

impl DataResource {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hints: Hints::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuerySource {
    Resource(DataResource),
    Subquery(Box<Statement>),
}

/// A column reference. `*` is a legal name meaning "all columns".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: SmolStr,
    pub alias: Option<SmolStr>,
}

impl Field {
    pub fn named(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    pub fn is_all(&self) -> bool {
        self.name == "*"
    }
}

/// A sort key. Direction defaults to ascending when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedColumn {
    pub name: SmolStr,
    pub ascending: bool,
}

impl OrderedColumn {
    pub fn asc(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            ascending: true,
        }
    }

    pub fn desc(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            ascending: false,
        }
    }
}

/// A projected expression with its optional `AS` alias. The output column
/// name is the alias when present, else the rendered expression.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedExpression {
    pub expr: Expression,
    pub alias: Option<SmolStr>,
}

impl NamedExpression {
    pub fn of(expr: Expression) -> Self {
        Self { expr, alias: None }
    }

    pub fn output_name(&self) -> SmolStr {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => match &self.expr {
                Expression::FieldRef(name) => name.clone(),
                Expression::Variable(name) => name.clone(),
                other => SmolStr::from(other.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Concat => "||",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

/// The fixed aggregate set. Names are matched case-insensitively at the
/// function-call parse site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(ascii_case_insensitive, serialize_all = "UPPERCASE")]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Variance,
    Stddev,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateArg {
    /// `COUNT(*)`.
    Star,
    Expr(Box<Expression>),
}

/// An evaluable node. Pure given a scope; deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    FieldRef(SmolStr),
    /// `*` — legal in projection lists only.
    Wildcard,
    Qualified {
        table: SmolStr,
        column: SmolStr,
    },
    Variable(SmolStr),
    Function {
        name: SmolStr,
        args: Vec<Expression>,
    },
    Aggregate {
        func: AggregateFunc,
        distinct: bool,
        arg: AggregateArg,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Neg(Box<Expression>),
    Cast {
        expr: Box<Expression>,
        to: SmolStr,
    },
    Case {
        branches: Vec<(Condition, Expression)>,
        otherwise: Option<Box<Expression>>,
    },
    Subquery(Box<Statement>),
}

impl Expression {
    pub fn int(value: i64) -> Self {
        Expression::Literal(Literal::Int(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::Literal(Literal::Str(value.into()))
    }

    pub fn field(name: impl Into<SmolStr>) -> Self {
        Expression::FieldRef(name.into())
    }

    /// True when evaluating this expression requires aggregate state.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expression::Aggregate { .. } => true,
            Expression::Binary { lhs, rhs, .. } => {
                lhs.contains_aggregate() || rhs.contains_aggregate()
            }
            Expression::Neg(inner) => inner.contains_aggregate(),
            Expression::Cast { expr, .. } => expr.contains_aggregate(),
            Expression::Function { args, .. } => args.iter().any(Self::contains_aggregate),
            Expression::Case {
                branches,
                otherwise,
            } => {
                branches.iter().any(|(_, e)| e.contains_aggregate())
                    || otherwise.as_ref().is_some_and(|e| e.contains_aggregate())
            }
            _ => false,
        }
    }
}

/// A boolean node evaluated with three-valued logic.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Compare {
        op: CompareOp,
        lhs: Expression,
        rhs: Expression,
    },
    Like {
        expr: Expression,
        pattern: Expression,
    },
    RLike {
        expr: Expression,
        pattern: Expression,
    },
    IsNull(Expression),
    IsNotNull(Expression),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

// ---------------------------------------------------------------------------
// SQL rendering. `parse(render(ast))` reproduces the AST for every supported
// statement shape, which the template tests rely on.
// ---------------------------------------------------------------------------

fn write_ident(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    let plain = !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain || name == "*" {
        f.write_str(name)
    } else {
        write!(f, "`{name}`")
    }
}

/// Nested binary expressions render parenthesised so grouping survives a
/// re-parse.
fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expression) -> fmt::Result {
    if matches!(expr, Expression::Binary { .. }) {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Bool(true) => f.write_str("TRUE"),
            Literal::Bool(false) => f.write_str("FALSE"),
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v}"),
            Literal::Str(v) => write!(f, "'{}'", v.replace('\\', "\\\\").replace('\'', "\\'")),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_ident(f, &self.name)?;
        if let Some(alias) = &self.alias {
            f.write_str(" AS ")?;
            write_ident(f, alias)?;
        }
        Ok(())
    }
}

impl fmt::Display for OrderedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_ident(f, &self.name)?;
        if !self.ascending {
            f.write_str(" DESC")?;
        }
        Ok(())
    }
}

impl fmt::Display for NamedExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            f.write_str(" AS ")?;
            write_ident(f, alias)?;
        }
        Ok(())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(lit) => write!(f, "{lit}"),
            Expression::FieldRef(name) => write_ident(f, name),
            Expression::Wildcard => f.write_str("*"),
            Expression::Qualified { table, column } => {
                write_ident(f, table)?;
                f.write_str(".")?;
                write_ident(f, column)
            }
            Expression::Variable(name) => write!(f, "@{name}"),
            Expression::Function { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expression::Aggregate {
                func,
                distinct,
                arg,
            } => {
                write!(f, "{}(", func.as_ref())?;
                if *distinct {
                    f.write_str("DISTINCT ")?;
                }
                match arg {
                    AggregateArg::Star => f.write_str("*")?,
                    AggregateArg::Expr(expr) => write!(f, "{expr}")?,
                }
                f.write_str(")")
            }
            Expression::Binary { op, lhs, rhs } => {
                write_operand(f, lhs)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs)
            }
            Expression::Neg(inner) => write!(f, "-{inner}"),
            Expression::Cast { expr, to } => write!(f, "CAST({expr} AS {to})"),
            Expression::Case {
                branches,
                otherwise,
            } => {
                f.write_str("CASE")?;
                for (cond, expr) in branches {
                    write!(f, " WHEN {cond} THEN {expr}")?;
                }
                if let Some(expr) = otherwise {
                    write!(f, " ELSE {expr}")?;
                }
                f.write_str(" END")
            }
            Expression::Subquery(stmt) => write!(f, "({stmt})"),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::And(lhs, rhs) => write!(f, "{lhs} AND {rhs}"),
            Condition::Or(lhs, rhs) => write!(f, "({lhs} OR {rhs})"),
            Condition::Not(inner) => match inner.as_ref() {
                Condition::And(_, _) | Condition::Or(_, _) => write!(f, "NOT ({inner})"),
                _ => write!(f, "NOT {inner}"),
            },
            Condition::Compare { op, lhs, rhs } => {
                write!(f, "{lhs} {} {rhs}", op.symbol())
            }
            Condition::Like { expr, pattern } => write!(f, "{expr} LIKE {pattern}"),
            Condition::RLike { expr, pattern } => write!(f, "{expr} RLIKE {pattern}"),
            Condition::IsNull(expr) => write!(f, "{expr} IS NULL"),
            Condition::IsNotNull(expr) => write!(f, "{expr} IS NOT NULL"),
        }
    }
}

impl Hints {
    fn render_clauses(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_json == Some(true) {
            f.write_str(" WITH JSON FORMAT")?;
        }
        if let Some(delimiter) = &self.delimiter {
            write!(f, " WITH DELIMITER '{delimiter}'")?;
        }
        if self.headers == Some(true) {
            f.write_str(" WITH COLUMN HEADERS")?;
        }
        if self.gzip == Some(true) {
            f.write_str(" WITH GZIP COMPRESSION")?;
        }
        if self.quoted_numbers == Some(true) {
            f.write_str(" WITH QUOTED NUMBERS")?;
        }
        if self.quoted_text == Some(true) {
            f.write_str(" WITH QUOTED TEXT")?;
        }
        Ok(())
    }
}

impl fmt::Display for QuerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuerySource::Resource(resource) => {
                write!(f, "'{}'", resource.path)?;
                resource.hints.render_clauses(f)
            }
            QuerySource::Subquery(stmt) => write!(f, "({stmt})"),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(select) => {
                f.write_str("SELECT ")?;
                if let Some(top) = select.top {
                    write!(f, "TOP {top} ")?;
                }
                write_list(f, &select.projections)?;
                if let Some(source) = &select.source {
                    write!(f, " FROM {source}")?;
                }
                if let Some(condition) = &select.condition {
                    write!(f, " WHERE {condition}")?;
                }
                if !select.group_by.is_empty() {
                    f.write_str(" GROUP BY ")?;
                    write_list(f, &select.group_by)?;
                }
                if !select.order_by.is_empty() {
                    f.write_str(" ORDER BY ")?;
                    write_list(f, &select.order_by)?;
                }
                if let Some(limit) = select.limit {
                    write!(f, " LIMIT {limit}")?;
                }
                Ok(())
            }
            Statement::Insert(insert) => {
                let mode = if insert.target.hints.append == Some(true) {
                    "INTO"
                } else {
                    "OVERWRITE"
                };
                write!(f, "INSERT {mode} '{}'", insert.target.path)?;
                insert.target.hints.render_clauses(f)?;
                f.write_str(" (")?;
                write_list(f, &insert.fields)?;
                f.write_str(")")?;
                match &insert.source {
                    InsertSource::Values(sets) => {
                        for set in sets {
                            f.write_str(" VALUES (")?;
                            write_list(f, set)?;
                            f.write_str(")")?;
                        }
                        Ok(())
                    }
                    InsertSource::Query(stmt) => write!(f, " {stmt}"),
                }
            }
            Statement::Describe(describe) => {
                write!(f, "DESCRIBE {}", describe.source)?;
                if let Some(limit) = describe.limit {
                    write!(f, " LIMIT {limit}")?;
                }
                Ok(())
            }
            Statement::Declare(declare) => {
                write!(f, "DECLARE @{} {}", declare.name, declare.var_type)
            }
            Statement::SetVariable(set) => {
                write!(f, "SET @{} = ", set.name)?;
                match &set.value {
                    AssignmentSource::Expression(expr) => write!(f, "{expr}"),
                    AssignmentSource::Query(stmt) => write!(f, "({stmt})"),
                }
            }
            Statement::Show(show) => write!(f, "SHOW {}", show.entity),
            Statement::CreateView(view) => {
                write!(f, "CREATE VIEW {} AS {}", view.name, view.query)
            }
            Statement::Connect(connect) => {
                write!(f, "CONNECT TO '{}'", connect.service)?;
                connect.hints.render_clauses(f)?;
                write!(f, " AS {}", connect.name)
            }
            Statement::Disconnect(disconnect) => {
                write!(f, "DISCONNECT FROM {}", disconnect.handle)
            }
        }
    }
}
