//! Placeholder scan over SQL the grammar does not understand.
//!
//! Recognises `:name:type:` optionally followed by `key=value:` pairs, for
//! example `:age:int:descr=Minimum age:nullok=false:`.

use crate::ast::ValueType;
use nom::{
    IResult,
    bytes::complete::{is_not, take_while1},
    character::complete::char,
    multi::many0,
    sequence::{separated_pair, terminated, tuple},
};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    /// Byte range in the scanned text, delimiters included.
    pub span: Range<usize>,
    pub name: String,
    pub value_type: ValueType,
    pub description: Option<String>,
    pub nullable: bool,
    pub default: Option<String>,
}

fn name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn attribute(input: &str) -> IResult<&str, (&str, &str)> {
    terminated(separated_pair(name, char('='), is_not(":\n")), char(':'))(input)
}

fn placeholder(input: &str) -> IResult<&str, (&str, &str, Vec<(&str, &str)>)> {
    let (rest, (_, n, _, ty, _, attrs)) = tuple((
        char(':'),
        name,
        char(':'),
        name,
        char(':'),
        many0(attribute),
    ))(input)?;
    Ok((rest, (n, ty, attrs)))
}

/// Find every placeholder outside quoted strings and identifiers. `::` casts are skipped.
pub fn scan(sql: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;
    while let Some(c) = sql[i..].chars().next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += c.len_utf8();
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            ':' if sql[i..].starts_with("::") => {
                i += 2;
                continue;
            }
            ':' => {
                if let Ok((rest, (n, ty, attrs))) = placeholder(&sql[i..]) {
                    let end = sql.len() - rest.len();
                    let mut p = Placeholder {
                        span: i..end,
                        name: n.to_string(),
                        value_type: ty.parse().unwrap_or_default(),
                        description: None,
                        nullable: true,
                        default: None,
                    };
                    for (key, value) in attrs {
                        match key {
                            "descr" => p.description = Some(value.to_string()),
                            "nullok" => p.nullable = !value.eq_ignore_ascii_case("false"),
                            "default" => p.default = Some(value.to_string()),
                            _ => {}
                        }
                    }
                    found.push(p);
                    i = end;
                    continue;
                }
            }
            _ => {}
        }
        i += c.len_utf8();
    }
    found
}
