//! nom grammar for the SQL dialect the importer understands.

use super::tree::*;
use crate::ast::{JoinKind, LeafOp, QueryKind, Value};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, map_res, not, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
};

type PResult<'a, T> = IResult<&'a str, T>;

/// Words that never parse as bare identifiers.
const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "cross", "default", "delete", "desc", "distinct",
    "except", "false", "from", "full", "group", "having", "in", "inner", "insert", "intersect",
    "into", "is", "join", "left", "like", "limit", "not", "null", "offset", "on", "or", "order",
    "outer", "right", "select", "set", "similar", "to", "true", "union", "update", "values",
    "where",
];

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive keyword, not followed by an identifier character.
fn kw<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input: &'a str| {
        preceded(
            multispace0,
            terminated(tag_no_case(word), not(satisfy(is_ident_char))),
        )(input)
    }
}

/// Punctuation, after optional whitespace.
fn sym<'a>(s: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input: &'a str| preceded(multispace0, tag(s))(input)
}

fn word(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

/// Bare identifiers fold to lowercase; quoted ones keep their case.
pub fn identifier(input: &str) -> PResult<'_, String> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, quoted)) = quoted_identifier(input) {
        return Ok((rest, quoted));
    }
    let (rest, w) = word(input)?;
    let lower = w.to_ascii_lowercase();
    if RESERVED.contains(&lower.as_str()) {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((rest, lower))
}

fn quoted_identifier(input: &str) -> PResult<'_, String> {
    delimited(
        char('"'),
        map(
            many0(alt((value('"', tag("\"\"")), satisfy(|c| c != '"')))),
            |chars: Vec<char>| chars.into_iter().collect(),
        ),
        char('"'),
    )(input)
}

fn string_literal(input: &str) -> PResult<'_, String> {
    preceded(
        multispace0,
        delimited(
            char('\''),
            map(
                many0(alt((value('\'', tag("''")), satisfy(|c| c != '\'')))),
                |chars: Vec<char>| chars.into_iter().collect(),
            ),
            char('\''),
        ),
    )(input)
}

fn number(input: &str) -> PResult<'_, Value> {
    let (input, _) = multispace0(input)?;
    let (rest, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;
    let parsed = if text.contains('.') {
        text.parse().ok().map(Value::Float)
    } else {
        text.parse().ok().map(Value::Int)
    };
    match parsed {
        Some(v) => Ok((rest, v)),
        None => Err(nom::Err::Error(Error::new(input, ErrorKind::Digit))),
    }
}

fn unsigned(input: &str) -> PResult<'_, u64> {
    preceded(multispace0, map_res(digit1, str::parse::<u64>))(input)
}

/// `:name[::type]` or `##name[::type]`.
fn parameter(input: &str) -> PResult<'_, Expr> {
    let (input, _) = multispace0(input)?;
    let (input, name) = preceded(alt((tag("##"), tag(":"))), word)(input)?;
    let (input, ty) = opt(preceded(tag("::"), word))(input)?;
    Ok((
        input,
        Expr::Param {
            name: name.to_string(),
            value_type: ty.and_then(|t| t.parse().ok()),
        },
    ))
}

fn column_or_call(input: &str) -> PResult<'_, Expr> {
    let (input, first) = identifier(input)?;
    if let Ok((rest, _)) = sym("(")(input) {
        if let Ok((rest, _)) = pair(sym("*"), sym(")"))(rest) {
            return Ok((
                rest,
                Expr::Call {
                    name: first,
                    args: vec![Expr::Star],
                },
            ));
        }
        let (rest, args) = separated_list0(sym(","), expr)(rest)?;
        let (rest, _) = sym(")")(rest)?;
        return Ok((rest, Expr::Call { name: first, args }));
    }
    if let Ok((rest, column)) = preceded(sym("."), identifier)(input) {
        return Ok((
            rest,
            Expr::Column {
                table: Some(first),
                name: column,
            },
        ));
    }
    Ok((
        input,
        Expr::Column {
            table: None,
            name: first,
        },
    ))
}

fn operand(input: &str) -> PResult<'_, Expr> {
    alt((
        map(number, Expr::Literal),
        map(string_literal, |s| Expr::Literal(Value::Text(s))),
        value(Expr::Literal(Value::Bool(true)), kw("true")),
        value(Expr::Literal(Value::Bool(false)), kw("false")),
        value(Expr::Literal(Value::Null), kw("null")),
        value(Expr::Default, kw("default")),
        parameter,
        delimited(sym("("), expr, sym(")")),
        column_or_call,
    ))(input)
}

fn comparison(input: &str) -> PResult<'_, LeafOp> {
    preceded(
        multispace0,
        alt((
            value(LeafOp::NotRegexNoCase, tag("!~*")),
            value(LeafOp::NotRegex, tag("!~")),
            value(LeafOp::RegexNoCase, tag("~*")),
            value(LeafOp::Regex, tag("~")),
            value(LeafOp::Diff, tag("!=")),
            value(LeafOp::Diff, tag("<>")),
            value(LeafOp::SupEqual, tag(">=")),
            value(LeafOp::InfEqual, tag("<=")),
            value(LeafOp::Equal, tag("=")),
            value(LeafOp::Sup, tag(">")),
            value(LeafOp::Inf, tag("<")),
            value(LeafOp::Like, kw("like")),
            value(LeafOp::Similar, pair(kw("similar"), kw("to"))),
        )),
    )(input)
}

fn predicate(input: &str) -> PResult<'_, Expr> {
    let (input, left) = operand(input)?;
    if let Ok((rest, negated)) = delimited(kw("is"), map(opt(kw("not")), |n| n.is_some()), kw("null"))(input) {
        return Ok((
            rest,
            Expr::IsNull {
                expr: Box::new(left),
                negated,
            },
        ));
    }
    if let Ok((rest, (low, high))) =
        preceded(kw("between"), pair(operand, preceded(kw("and"), operand)))(input)
    {
        return Ok((
            rest,
            Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
            },
        ));
    }
    if let Ok((rest, list)) = preceded(
        kw("in"),
        delimited(sym("("), separated_list1(sym(","), operand), sym(")")),
    )(input)
    {
        return Ok((
            rest,
            Expr::InList {
                expr: Box::new(left),
                list,
            },
        ));
    }
    if let Ok((rest, (op, right))) = pair(comparison, operand)(input) {
        return Ok((
            rest,
            Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        ));
    }
    Ok((input, left))
}

fn not_expr(input: &str) -> PResult<'_, Expr> {
    alt((
        map(preceded(kw("not"), not_expr), |e| Expr::Not(Box::new(e))),
        predicate,
    ))(input)
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(preceded(kw("and"), not_expr))(input)?;
    if rest.is_empty() {
        return Ok((input, first));
    }
    Ok((input, Expr::And(std::iter::once(first).chain(rest).collect())))
}

/// Full expression: OR binds loosest, then AND, then NOT.
pub fn expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(kw("or"), and_expr))(input)?;
    if rest.is_empty() {
        return Ok((input, first));
    }
    Ok((input, Expr::Or(std::iter::once(first).chain(rest).collect())))
}

fn alias(input: &str) -> PResult<'_, String> {
    preceded(opt(kw("as")), identifier)(input)
}

fn select_item(input: &str) -> PResult<'_, SelectItem> {
    alt((
        value(SelectItem::Wildcard, sym("*")),
        map(
            terminated(identifier, pair(sym("."), sym("*"))),
            SelectItem::QualifiedWildcard,
        ),
        map(pair(expr, opt(alias)), |(expr, alias)| SelectItem::Expr {
            expr,
            alias,
        }),
    ))(input)
}

fn table_ref(input: &str) -> PResult<'_, TableRef> {
    alt((
        map(
            pair(delimited(sym("("), statement, sym(")")), opt(alias)),
            |(query, alias)| TableRef::SubQuery {
                query: Box::new(query),
                alias,
            },
        ),
        map(pair(identifier, opt(alias)), |(name, alias)| {
            TableRef::Table { name, alias }
        }),
    ))(input)
}

fn join_kind(input: &str) -> PResult<'_, JoinKind> {
    alt((
        value(JoinKind::Inner, pair(opt(kw("inner")), kw("join"))),
        value(
            JoinKind::Left,
            tuple((kw("left"), opt(kw("outer")), kw("join"))),
        ),
        value(
            JoinKind::Right,
            tuple((kw("right"), opt(kw("outer")), kw("join"))),
        ),
        value(
            JoinKind::Full,
            tuple((kw("full"), opt(kw("outer")), kw("join"))),
        ),
        value(JoinKind::Cross, pair(kw("cross"), kw("join"))),
    ))(input)
}

fn join_clause(input: &str) -> PResult<'_, JoinClause> {
    let (input, kind) = join_kind(input)?;
    let (input, table) = table_ref(input)?;
    let (input, on) = opt(preceded(kw("on"), expr))(input)?;
    Ok((input, JoinClause { kind, table, on }))
}

fn from_item(input: &str) -> PResult<'_, FromItem> {
    map(pair(table_ref, many0(join_clause)), |(source, joins)| {
        FromItem { source, joins }
    })(input)
}

fn order_item(input: &str) -> PResult<'_, OrderItem> {
    let (input, key) = expr(input)?;
    let (input, dir) = opt(alt((value(true, kw("asc")), value(false, kw("desc")))))(input)?;
    let key = match key {
        Expr::Literal(Value::Int(n)) if n > 0 => OrderKey::Position(n as usize),
        other => OrderKey::Expr(other),
    };
    Ok((
        input,
        OrderItem {
            key,
            ascending: dir.unwrap_or(true),
        },
    ))
}

pub fn select(input: &str) -> PResult<'_, Select> {
    let (input, _) = kw("select")(input)?;
    let (input, distinct) = map(opt(kw("distinct")), |d| d.is_some())(input)?;
    let (input, items) = separated_list1(sym(","), select_item)(input)?;
    let (input, from) = opt(preceded(kw("from"), separated_list1(sym(","), from_item)))(input)?;
    let (input, selection) = opt(preceded(kw("where"), expr))(input)?;
    let (input, order_by) = opt(preceded(
        pair(kw("order"), kw("by")),
        separated_list1(sym(","), order_item),
    ))(input)?;
    let (input, limit) = opt(preceded(kw("limit"), unsigned))(input)?;
    let (input, offset) = opt(preceded(kw("offset"), unsigned))(input)?;
    Ok((
        input,
        Select {
            distinct,
            items,
            from: from.unwrap_or_default(),
            selection,
            order_by: order_by.unwrap_or_default(),
            limit,
            offset,
        },
    ))
}

fn insert(input: &str) -> PResult<'_, Insert> {
    let (input, _) = pair(kw("insert"), kw("into"))(input)?;
    let (input, table) = identifier(input)?;
    let (input, columns) = opt(delimited(
        sym("("),
        separated_list1(sym(","), identifier),
        sym(")"),
    ))(input)?;
    let (input, source) = alt((
        value(InsertSource::DefaultValues, pair(kw("default"), kw("values"))),
        map(
            preceded(
                kw("values"),
                delimited(sym("("), separated_list1(sym(","), expr), sym(")")),
            ),
            InsertSource::Values,
        ),
        map(statement, |s| InsertSource::Query(Box::new(s))),
    ))(input)?;
    Ok((
        input,
        Insert {
            table,
            columns: columns.unwrap_or_default(),
            source,
        },
    ))
}

/// `c` or `t.c`; the qualifier is dropped.
fn assigned_column(input: &str) -> PResult<'_, String> {
    let (input, first) = identifier(input)?;
    let (input, second) = opt(preceded(sym("."), identifier))(input)?;
    Ok((input, second.unwrap_or(first)))
}

fn update(input: &str) -> PResult<'_, Update> {
    let (input, _) = kw("update")(input)?;
    let (input, table) = identifier(input)?;
    let (input, alias) = opt(alias)(input)?;
    let (input, _) = kw("set")(input)?;
    let (input, assignments) = separated_list1(
        sym(","),
        pair(assigned_column, preceded(sym("="), expr)),
    )(input)?;
    let (input, selection) = opt(preceded(kw("where"), expr))(input)?;
    Ok((
        input,
        Update {
            table,
            alias,
            assignments,
            selection,
        },
    ))
}

fn delete(input: &str) -> PResult<'_, Delete> {
    let (input, _) = pair(kw("delete"), kw("from"))(input)?;
    let (input, table) = identifier(input)?;
    let (input, alias) = opt(alias)(input)?;
    let (input, selection) = opt(preceded(kw("where"), expr))(input)?;
    Ok((
        input,
        Delete {
            table,
            alias,
            selection,
        },
    ))
}

fn set_op(input: &str) -> PResult<'_, QueryKind> {
    alt((
        value(QueryKind::Union, kw("union")),
        value(QueryKind::Intersect, kw("intersect")),
        value(QueryKind::Except, kw("except")),
    ))(input)
}

fn set_operand(input: &str) -> PResult<'_, Statement> {
    alt((
        delimited(sym("("), statement, sym(")")),
        map(select, Statement::Select),
    ))(input)
}

/// Any statement, including set operations (left-associative).
pub fn statement(input: &str) -> PResult<'_, Statement> {
    let (input, first) = alt((
        set_operand,
        map(insert, Statement::Insert),
        map(update, Statement::Update),
        map(delete, Statement::Delete),
    ))(input)?;
    let (input, rest) = many0(pair(set_op, set_operand))(input)?;
    let folded = rest.into_iter().fold(first, |acc, (op, next)| match acc {
        Statement::Compound(mut c) if c.op == op && op != QueryKind::Except => {
            c.operands.push(next);
            Statement::Compound(c)
        }
        acc => Statement::Compound(Compound {
            op,
            operands: vec![acc, next],
        }),
    });
    Ok((input, folded))
}

