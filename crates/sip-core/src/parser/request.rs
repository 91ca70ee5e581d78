use std::str;

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_till, take_till1, take_while1},
    character::complete::{char, digit1, space0, space1},
    combinator::{map_res, recognize},
    sequence::{terminated, tuple},
};

use crate::error::Result;
use crate::types::method::Method;
use super::ParseResult;

/// token = 1*(alphanum / "-" / "." / "!" / "%" / "*" / "_" / "+" / "`" / "'" / "~")
pub fn is_token_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"-.!%*_+`'~".contains(&c)
}

pub fn token(input: &[u8]) -> ParseResult<&[u8]> {
    take_while1(is_token_char)(input)
}

/// CRLF, with a bare LF accepted from lenient peers
pub fn crlf(input: &[u8]) -> ParseResult<&[u8]> {
    alt((tag("\r\n"), tag("\n")))(input)
}

// SIP-Version = "SIP" "/" 1*DIGIT "." 1*DIGIT
pub fn sip_version(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(tuple((tag_no_case("SIP/"), digit1, char('.'), digit1)))(input)
}

fn method_from_bytes(bytes: &[u8]) -> Result<Method> {
    str::from_utf8(bytes)?.parse()
}

/// Parser for the SIP request line (RFC 3261 Section 7.1)
///
/// Request-Line = Method SP Request-URI SP SIP-Version CRLF
pub fn request_line(input: &[u8]) -> ParseResult<(Method, &[u8], &[u8])> {
    tuple((
        terminated(map_res(token, method_from_bytes), space1),
        terminated(take_till1(|c| c == b' ' || c == b'\r' || c == b'\n'), space1),
        terminated(sip_version, crlf),
    ))(input)
}

/// message-header = header-name HCOLON header-value CRLF
///
/// Folded lines must already be unfolded. Trailing whitespace is left in the
/// value and trimmed by the caller.
pub fn header_line(input: &[u8]) -> ParseResult<(&[u8], &[u8])> {
    let (input, name) = token(input)?;
    let (input, _) = tuple((space0, char(':'), space0))(input)?;
    let (input, value) = take_till(|c| c == b'\r' || c == b'\n')(input)?;
    let (input, _) = crlf(input)?;
    Ok((input, (name, value)))
}
