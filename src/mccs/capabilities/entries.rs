//! Low-level tokenizer for the top-level `tag(value)` entries of an MCCS
//! capability string, e.g. `(prot(monitor)type(lcd)model(ACME 1)vcp(10 12))`.

use nom::{
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1},
    combinator::map_res,
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};
use std::str;

use super::Value;

fn ident(i: &[u8]) -> IResult<&[u8], &str> {
    map_res(take_while(|c: u8| c.is_ascii_alphanumeric() || c == b'_'), str::from_utf8).parse(i)
}

/// `bin(<len>(<bytes>))` — binary payload prefixed with its own byte length.
fn binary_value(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (i, len) = preceded(tag("bin"), delimited(char('('), digit1, char('('))).parse(i)?;
    let len: usize = str::from_utf8(len).unwrap().parse().unwrap_or(0);
    let (i, data) = nom::bytes::complete::take(len)(i)?;
    let (i, _) = pair(char(')'), char(')')).parse(i)?;
    Ok((i, data))
}

fn string_value(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let mut depth = 0usize;
    let mut idx = 0usize;
    for (n, b) in i.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                if depth == 0 {
                    idx = n;
                    break;
                }
                depth -= 1;
            }
            _ => {}
        }
        idx = n + 1;
    }
    Ok((&i[idx..], &i[..idx]))
}

fn entry(i: &[u8]) -> IResult<&[u8], Value<'_>> {
    let (i, tag_name) = ident(i)?;
    if let Ok((rest, data)) = delimited(char('('), binary_value, char(')')).parse(i) {
        return Ok((
            rest,
            Value::Binary {
                tag: tag_name,
                data,
            },
        ));
    }
    let (i, value) = delimited(char('('), string_value, char(')')).parse(i)?;
    Ok((
        i,
        Value::String {
            tag: tag_name,
            value,
        },
    ))
}

/// Iterates the `tag(value)` entries inside a capability string, tolerating
/// a single pair of enclosing parentheses around the whole document.
pub(crate) struct ValueParser<'i> {
    input: &'i [u8],
}

impl<'i> ValueParser<'i> {
    pub fn new(data: &'i [u8]) -> Self {
        let trimmed = data.trim_ascii();
        let inner = if trimmed.starts_with(b"(") && trimmed.ends_with(b")") {
            &trimmed[1..trimmed.len() - 1]
        } else {
            trimmed
        };
        ValueParser { input: inner }
    }

    pub fn nom_iter(self) -> impl Iterator<Item = Result<Value<'i>, nom::error::Error<&'i [u8]>>> {
        EntryIter { rest: Some(self.input) }
    }
}

struct EntryIter<'i> {
    rest: Option<&'i [u8]>,
}

impl<'i> Iterator for EntryIter<'i> {
    type Item = Result<Value<'i>, nom::error::Error<&'i [u8]>>;

    fn next(&mut self) -> Option<Self::Item> {
        let input = self.rest.take()?;
        let input = input.trim_ascii_start();
        if input.is_empty() {
            return None;
        }
        match entry(input) {
            Ok((rest, value)) => {
                self.rest = Some(rest);
                Some(Ok(value))
            }
            Err(nom::Err::Incomplete(_)) => None,
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                self.rest = None;
                Some(Err(nom::error::Error::new(e.input, e.code)))
            }
        }
    }
}

impl<'i> Value<'i> {
    pub(crate) fn parse_nom(i: &'i [u8], _hint: Option<&'i str>) -> IResult<&'i [u8], Self> {
        entry(i)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_entries() {
        let vp = ValueParser::new(b"(prot(monitor)type(lcd))");
        let entries: Vec<_> = vp.nom_iter().collect();
        assert_eq!(entries.len(), 2);
    }
}
