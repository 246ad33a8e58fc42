//! Turns template text into a tree of [`Control`] nodes.

use super::{expand::Subject, TemplateError};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{space0, space1},
    combinator::{map, opt},
    error::{Error as NomError, ErrorKind},
    sequence::{pair, preceded, tuple},
    IResult,
};
use std::ops::Range;

const KEYWORDS: [&str; 3] = ["@foreach", "@if", "@end"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKind {
    Foreach(Subject),
    If,
}

impl ControlKind {
    /// The word that closes this kind of directive, e.g. `function` in `@end function`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Foreach(subject) => subject.as_str(),
            Self::If => "if",
        }
    }
}

/// One `@foreach` or `@if` directive together with everything up to its `@end`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Control {
    pub kind: ControlKind,
    /// The unsubstituted condition text, without the surrounding parentheses.
    pub condition: Option<String>,
    pub children: Vec<Control>,
    /// The text between the opening and the closing directive.
    pub body: Range<usize>,
    /// The body plus both directives. Directives alone on their line take the whole line.
    pub outer: Range<usize>,
    /// 1-based line of the opening directive.
    pub line: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Directive<'t> {
    Foreach {
        subject: &'t str,
        condition: Option<&'t str>,
    },
    If {
        condition: &'t str,
    },
    End {
        kind: &'t str,
    },
}

/// A directive that has been opened but not closed yet.
struct Open {
    kind: ControlKind,
    condition: Option<String>,
    children: Vec<Control>,
    outer_start: usize,
    body_start: usize,
    line: usize,
}

/// Parses every directive in `text` and returns the top-level nodes in source order.
pub(crate) fn parse(text: &str) -> Result<Vec<Control>, TemplateError> {
    let mut roots = Vec::new();
    let mut stack: Vec<Open> = Vec::new();
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find('@') {
        let start = cursor + found;
        let rest = &text[start..];

        let Some(keyword) = directive_keyword(rest) else {
            cursor = start + 1;
            continue;
        };

        let line = line_number(text, start);
        let (remaining, parsed) = directive(rest).map_err(|_| TemplateError::Malformed {
            directive: keyword.to_owned(),
            line,
        })?;
        let outer = directive_span(text, cursor, start, text.len() - remaining.len());
        cursor = outer.end;

        match parsed {
            Directive::Foreach { subject, condition } => {
                let subject =
                    Subject::from_name(subject).ok_or_else(|| TemplateError::UnknownSubject {
                        name: subject.to_owned(),
                        line,
                    })?;

                stack.push(Open {
                    kind: ControlKind::Foreach(subject),
                    condition: condition.map(ToOwned::to_owned),
                    children: Vec::new(),
                    outer_start: outer.start,
                    body_start: outer.end,
                    line,
                });
            }
            Directive::If { condition } => stack.push(Open {
                kind: ControlKind::If,
                condition: Some(condition.to_owned()),
                children: Vec::new(),
                outer_start: outer.start,
                body_start: outer.end,
                line,
            }),
            Directive::End { kind } => {
                let open = stack.pop().ok_or_else(|| TemplateError::UnmatchedEnd {
                    kind: kind.to_owned(),
                    line,
                })?;

                if open.kind.name() != kind {
                    return Err(TemplateError::MismatchedEnd {
                        expected: open.kind.name().to_owned(),
                        found: kind.to_owned(),
                        line,
                    });
                }

                let control = Control {
                    kind: open.kind,
                    condition: open.condition,
                    children: open.children,
                    body: open.body_start..outer.start,
                    outer: open.outer_start..outer.end,
                    line: open.line,
                };

                match stack.last_mut() {
                    Some(parent) => parent.children.push(control),
                    None => roots.push(control),
                }
            }
        }
    }

    if let Some(open) = stack.pop() {
        return Err(TemplateError::Unclosed {
            kind: open.kind.name().to_owned(),
            line: open.line,
        });
    }

    Ok(roots)
}

/// 1-based line number of the byte at `offset`.
pub(crate) fn line_number(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// The directive keyword `rest` starts with, if it isn't merely the prefix of a longer word.
fn directive_keyword(rest: &str) -> Option<&'static str> {
    KEYWORDS.into_iter().find(|keyword| {
        rest.strip_prefix(*keyword).is_some_and(|after| {
            !after
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        })
    })
}

/// The range a directive spanning `start..end` removes from the output.
///
/// A directive that is alone on its line takes the whole line with it, including the line break.
/// `floor` is where the previous directive ended; text before it is never taken again.
fn directive_span(text: &str, floor: usize, start: usize, end: usize) -> Range<usize> {
    let is_blank = |s: &str| s.chars().all(|c| matches!(c, ' ' | '\t' | '\r'));
    let line_start = text[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[end..].find('\n').map_or(text.len(), |i| end + i + 1);

    if line_start >= floor
        && is_blank(&text[line_start..start])
        && is_blank(text[end..line_end].trim_end_matches('\n'))
    {
        line_start..line_end
    } else {
        start..end
    }
}

fn directive(input: &str) -> IResult<&str, Directive<'_>> {
    alt((foreach, if_directive, end))(input)
}

fn foreach(input: &str) -> IResult<&str, Directive<'_>> {
    map(
        preceded(
            tag("@foreach"),
            pair(
                preceded(space1, word),
                opt(preceded(tuple((space0, tag("where"), space0)), parenthesized)),
            ),
        ),
        |(subject, condition)| Directive::Foreach { subject, condition },
    )(input)
}

fn if_directive(input: &str) -> IResult<&str, Directive<'_>> {
    map(
        preceded(pair(tag("@if"), space0), parenthesized),
        |condition| Directive::If { condition },
    )(input)
}

fn end(input: &str) -> IResult<&str, Directive<'_>> {
    map(preceded(pair(tag("@end"), space1), word), |kind| {
        Directive::End { kind }
    })(input)
}

fn word(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

/// Matches a parenthesized condition and returns its inside. Parentheses inside quoted strings
/// don't count.
fn parenthesized(input: &str) -> IResult<&str, &str> {
    let error = || nom::Err::Error(NomError::new(input, ErrorKind::Char));
    let body = input.strip_prefix('(').ok_or_else(error)?;
    let mut depth = 1;
    let mut quote = None;

    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => (),
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;

                if depth == 0 {
                    return Ok((&body[i + 1..], &body[..i]));
                }
            }
            _ => (),
        }
    }

    Err(error())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(nodes: &[Control]) -> usize {
        nodes.iter().map(|node| 1 + count(&node.children)).sum()
    }

    #[test]
    fn inline_directives() {
        let text = "@foreach function@if('{funcName}'=='vkFoo')CALL({funcName});@end if@end function";
        let nodes = parse(text).unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].kind, ControlKind::Foreach(Subject::Function));
        assert_eq!(nodes[0].outer, 0..text.len());

        let inner = &nodes[0].children[0];
        assert_eq!(inner.kind, ControlKind::If);
        assert_eq!(inner.condition.as_deref(), Some("'{funcName}'=='vkFoo'"));
        assert_eq!(&text[inner.body.clone()], "CALL({funcName});");
    }

    #[test]
    fn line_directives_take_their_line() {
        let text = "begin\n  @foreach struct where('{sctExtends}' != '')\n{sctName}\n  @end struct\nend\n";
        let nodes = parse(text).unwrap();
        let node = &nodes[0];

        assert_eq!(node.condition.as_deref(), Some("'{sctExtends}' != ''"));
        assert_eq!(&text[node.body.clone()], "{sctName}\n");
        assert_eq!(&text[..node.outer.start], "begin\n");
        assert_eq!(&text[node.outer.end..], "end\n");
        assert_eq!(node.line, 2);
    }

    #[test]
    fn nesting() {
        let text = "\
@foreach function
@foreach parameter
@if({prmIsConst})
const
@end if
@end parameter
@if({funcSafeToPrint})
safe
@end if
@end function
@foreach enum
@end enum
";
        let nodes = parse(text).unwrap();

        assert_eq!(count(&nodes), 5);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].children.len(), 2);
        assert_eq!(
            nodes[0].children[0].kind,
            ControlKind::Foreach(Subject::Parameter),
        );
        assert_eq!(nodes[0].children[0].children[0].kind, ControlKind::If);
        assert_eq!(nodes[0].children[1].line, 7);
        assert!(nodes[1].children.is_empty());
    }

    #[test]
    fn parentheses_inside_strings() {
        let nodes = parse("@if('(' in '{x}')y@end if").unwrap();
        assert_eq!(nodes[0].condition.as_deref(), Some("'(' in '{x}'"));
    }

    #[test]
    fn other_at_signs_are_text() {
        assert!(parse("user@example.com @iffy @endless").unwrap().is_empty());
    }

    #[test]
    fn mismatched_end() {
        assert_eq!(
            parse("@foreach struct\n@foreach member\n@end struct\n@end member\n"),
            Err(TemplateError::MismatchedEnd {
                expected: "member".to_owned(),
                found: "struct".to_owned(),
                line: 3,
            }),
        );
    }

    #[test]
    fn unbalanced() {
        assert_eq!(
            parse("@foreach struct\n@end struct\n@end struct\n"),
            Err(TemplateError::UnmatchedEnd {
                kind: "struct".to_owned(),
                line: 3,
            }),
        );
        assert_eq!(
            parse("x\n@foreach enum\n@if(True)\n@end if\n"),
            Err(TemplateError::Unclosed {
                kind: "enum".to_owned(),
                line: 2,
            }),
        );
    }

    #[test]
    fn unknown_subject() {
        assert_eq!(
            parse("@foreach widget\n@end widget\n"),
            Err(TemplateError::UnknownSubject {
                name: "widget".to_owned(),
                line: 1,
            }),
        );
    }

    #[test]
    fn malformed() {
        assert_eq!(
            parse("a\n@if missing parens\n"),
            Err(TemplateError::Malformed {
                directive: "@if".to_owned(),
                line: 2,
            }),
        );
        assert!(matches!(
            parse("@end\n"),
            Err(TemplateError::Malformed { .. }),
        ));
    }
}
