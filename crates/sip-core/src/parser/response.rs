use std::str;

use nom::{
    bytes::complete::{take_till, take_while_m_n},
    character::complete::{space0, space1},
    combinator::map_res,
    sequence::{terminated, tuple},
};

use crate::error::{Error, Result};
use super::request::{crlf, sip_version};
use super::ParseResult;

/// Parser for SIP response status line (RFC 3261 Section 7.2)
///
/// ABNF Grammar:
/// Status-Line =  SIP-Version SP Status-Code SP Reason-Phrase CRLF
/// Status-Code =  3DIGIT
///
/// The reason phrase may be empty; some stacks also drop the SP before it.
pub fn parse_status_line(input: &[u8]) -> ParseResult<(&[u8], u16, &[u8])> {
    terminated(
        tuple((
            terminated(sip_version, space1),
            terminated(status_code, space0),
            reason_phrase,
        )),
        crlf,
    )(input)
}

// Status-Code = 3DIGIT
pub fn status_code(input: &[u8]) -> ParseResult<u16> {
    map_res(
        take_while_m_n(3, 3, |c: u8| c.is_ascii_digit()),
        |digits: &[u8]| -> Result<u16> {
            str::from_utf8(digits)?
                .parse::<u16>()
                .map_err(|e| Error::parse(format!("Invalid status code digit: {}", e)))
        },
    )(input)
}

// Simplified: take bytes until CRLF
pub fn reason_phrase(input: &[u8]) -> ParseResult<&[u8]> {
    take_till(|c| c == b'\r' || c == b'\n')(input)
}
