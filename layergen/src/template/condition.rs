//! The expression language of `where(...)` and `@if(...)` conditions.
//!
//! Conditions are evaluated after placeholder substitution, so they only ever contain literals:
//! quoted strings, integers, booleans and lists of those. Supported operators are `==`, `!=`,
//! `in`, `not in`, `and`, `or` and `not` (with `&&`, `||` and `!` as alternative spellings) plus
//! parentheses.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map, map_res, not, opt, peek, recognize, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult, Parser,
};
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

/// Parses and evaluates `text`, which has to produce a boolean.
pub fn evaluate(text: &str) -> Result<bool, ConditionError> {
    let expr = parse(text)?;

    match expr.evaluate()? {
        Value::Bool(value) => Ok(value),
        other => Err(ConditionError::NotBoolean {
            kind: other.kind(),
        }),
    }
}

fn parse(text: &str) -> Result<Expr, ConditionError> {
    all_consuming(delimited(multispace0, expression, multispace0))(text)
        .map(|(_, expr)| expr)
        .map_err(|err| {
            let position = match err {
                nom::Err::Error(err) | nom::Err::Failure(err) => text.len() - err.input.len(),
                nom::Err::Incomplete(_) => text.len(),
            };

            ConditionError::Syntax {
                text: text.to_owned(),
                position,
            }
        })
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Str(_) => "string",
            Self::List(_) => "list",
        }
    }

    fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    In,
    NotIn,
}

impl CompareOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Ident(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn evaluate(&self) -> Result<Value, ConditionError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::List(items) => items
                .iter()
                .map(Expr::evaluate)
                .collect::<Result<_, _>>()
                .map(Value::List),
            Self::Ident(name) => Err(ConditionError::UnknownIdentifier(name.clone())),
            Self::Not(inner) => Ok(Value::Bool(!inner.evaluate_bool("not")?)),
            Self::And(lhs, rhs) => {
                Ok(Value::Bool(lhs.evaluate_bool("and")? && rhs.evaluate_bool("and")?))
            }
            Self::Or(lhs, rhs) => {
                Ok(Value::Bool(lhs.evaluate_bool("or")? || rhs.evaluate_bool("or")?))
            }
            Self::Compare(op, lhs, rhs) => {
                compare(*op, &lhs.evaluate()?, &rhs.evaluate()?).map(Value::Bool)
            }
        }
    }

    /// Evaluates an operand of the connective `operator`.
    fn evaluate_bool(&self, operator: &'static str) -> Result<bool, ConditionError> {
        match self.evaluate()? {
            Value::Bool(value) => Ok(value),
            other => Err(ConditionError::TypeMismatch {
                operator,
                left: other.kind(),
                right: None,
            }),
        }
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Result<bool, ConditionError> {
    let mismatch = || ConditionError::TypeMismatch {
        operator: op.as_str(),
        left: lhs.kind(),
        right: Some(rhs.kind()),
    };

    match op {
        CompareOp::Eq | CompareOp::Ne => {
            if !lhs.same_kind(rhs) {
                return Err(mismatch());
            }

            Ok((lhs == rhs) == (op == CompareOp::Eq))
        }
        CompareOp::In | CompareOp::NotIn => {
            let contained = match (lhs, rhs) {
                (_, Value::List(items)) => items.iter().any(|item| item == lhs),
                (Value::Str(needle), Value::Str(haystack)) => haystack.contains(needle.as_str()),
                _ => return Err(mismatch()),
            };

            Ok(contained == (op == CompareOp::In))
        }
    }
}

fn expression(input: &str) -> IResult<&str, Expr> {
    disjunction(input)
}

fn disjunction(input: &str) -> IResult<&str, Expr> {
    map(
        pair(
            conjunction,
            many0(preceded(
                delimited(multispace0, keyword("or").or(tag("||")), multispace0),
                conjunction,
            )),
        ),
        |(first, rest)| {
            rest.into_iter()
                .fold(first, |lhs, rhs| Expr::Or(Box::new(lhs), Box::new(rhs)))
        },
    )(input)
}

fn conjunction(input: &str) -> IResult<&str, Expr> {
    map(
        pair(
            negation,
            many0(preceded(
                delimited(multispace0, keyword("and").or(tag("&&")), multispace0),
                negation,
            )),
        ),
        |(first, rest)| {
            rest.into_iter()
                .fold(first, |lhs, rhs| Expr::And(Box::new(lhs), Box::new(rhs)))
        },
    )(input)
}

fn negation(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(
                keyword("not").or(terminated(tag("!"), not(char('=')))),
                preceded(multispace0, negation),
            ),
            |expr| Expr::Not(Box::new(expr)),
        ),
        comparison,
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    map(
        pair(
            primary,
            opt(pair(
                delimited(multispace0, comparison_operator, multispace0),
                primary,
            )),
        ),
        |(lhs, rhs)| match rhs {
            Some((op, rhs)) => Expr::Compare(op, Box::new(lhs), Box::new(rhs)),
            None => lhs,
        },
    )(input)
}

fn comparison_operator(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Ne, tag("!=")),
        value(
            CompareOp::NotIn,
            tuple((keyword("not"), multispace1, keyword("in"))),
        ),
        value(CompareOp::In, keyword("in")),
    ))(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    alt((
        delimited(
            pair(char('('), multispace0),
            expression,
            pair(multispace0, char(')')),
        ),
        map(list, Expr::List),
        map(string, |text| Expr::Literal(Value::Str(text.to_owned()))),
        map(integer, |value| Expr::Literal(Value::Int(value))),
        map(identifier, |name| match name {
            "True" | "true" => Expr::Literal(Value::Bool(true)),
            "False" | "false" => Expr::Literal(Value::Bool(false)),
            _ => Expr::Ident(name.to_owned()),
        }),
    ))(input)
}

fn list(input: &str) -> IResult<&str, Vec<Expr>> {
    delimited(
        pair(char('['), multispace0),
        terminated(
            separated_list0(delimited(multispace0, char(','), multispace0), primary),
            opt(preceded(multispace0, char(','))),
        ),
        pair(multispace0, char(']')),
    )(input)
}

fn string(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
    ))(input)
}

fn integer(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse)(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Matches `word` only when it isn't the prefix of a longer identifier.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(
        tag(word),
        not(peek(take_while1(|c: char| {
            c.is_ascii_alphanumeric() || c == '_'
        }))),
    )
}

/// Error that can happen when evaluating a condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConditionError {
    /// The text isn't a valid expression.
    Syntax { text: String, position: usize },
    /// The expression refers to a name instead of a literal.
    UnknownIdentifier(String),
    /// An operator was applied to values it doesn't support.
    TypeMismatch {
        operator: &'static str,
        left: &'static str,
        right: Option<&'static str>,
    },
    /// The whole expression didn't produce a boolean.
    NotBoolean { kind: &'static str },
}

impl Error for ConditionError {}

impl Display for ConditionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Syntax { text, position } => {
                write!(f, "syntax error at position {position} in `{text}`")
            }
            Self::UnknownIdentifier(name) => write!(f, "unknown identifier `{name}`"),
            Self::TypeMismatch {
                operator,
                left,
                right: Some(right),
            } => write!(f, "type mismatch: `{operator}` applied to {left} and {right}"),
            Self::TypeMismatch {
                operator,
                left,
                right: None,
            } => write!(f, "type mismatch: `{operator}` applied to {left}"),
            Self::NotBoolean { kind } => {
                write!(f, "condition evaluated to a {kind} instead of a boolean")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_equality() {
        assert!(evaluate("'vkFoo'=='vkFoo'").unwrap());
        assert!(!evaluate("'vkFoo' == \"vkBar\"").unwrap());
        assert!(evaluate("'a' != 'b'").unwrap());
    }

    #[test]
    fn booleans_and_integers() {
        assert!(evaluate("True").unwrap());
        assert!(!evaluate("false").unwrap());
        assert!(evaluate("2 == 2 and -1 != 0").unwrap());
        assert!(evaluate("true == True").unwrap());
    }

    #[test]
    fn membership() {
        assert!(evaluate("'uint32_t' in ['uint32_t', 'uint64_t']").unwrap());
        assert!(evaluate("3 not in [1, 2]").unwrap());
        assert!(evaluate("'Flags' in 'VkAccessFlags'").unwrap());
        assert!(!evaluate("'x' in []").unwrap());
    }

    #[test]
    fn connectives() {
        assert!(evaluate("not False").unwrap());
        assert!(evaluate("!(1 == 2)").unwrap());
        assert!(evaluate("false or true && true").unwrap());
        assert!(!evaluate("(false or true) and not true").unwrap());
        assert!(evaluate("'notable' == 'notable' or nothing").is_ok());
    }

    #[test]
    fn keywords_need_boundaries() {
        assert_eq!(
            evaluate("notTrue"),
            Err(ConditionError::UnknownIdentifier("notTrue".to_owned())),
        );
    }

    #[test]
    fn unknown_identifier() {
        assert_eq!(
            evaluate("funcName == 'vkFoo'"),
            Err(ConditionError::UnknownIdentifier("funcName".to_owned())),
        );
    }

    #[test]
    fn type_mismatch() {
        assert!(matches!(
            evaluate("1 == '1'"),
            Err(ConditionError::TypeMismatch { operator: "==", .. }),
        ));
        assert!(matches!(
            evaluate("'a' and true"),
            Err(ConditionError::TypeMismatch {
                operator: "and",
                ..
            }),
        ));
        assert!(matches!(
            evaluate("not 3"),
            Err(ConditionError::TypeMismatch {
                operator: "not",
                ..
            }),
        ));
    }

    #[test]
    fn non_boolean_result() {
        assert_eq!(
            evaluate("'vkFoo'"),
            Err(ConditionError::NotBoolean { kind: "string" }),
        );
    }

    #[test]
    fn syntax_error() {
        assert!(matches!(
            evaluate("'a' == "),
            Err(ConditionError::Syntax { .. }),
        ));
        assert!(matches!(
            evaluate("('a' == 'a'"),
            Err(ConditionError::Syntax { .. }),
        ));
    }
}
