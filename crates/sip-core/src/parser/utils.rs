// Utility functions for parsing

use std::borrow::Cow;

/// Unfolds Linear White Space (LWS) according to RFC 3261 §7.3.1.
///
/// A line break followed by SP or HTAB continues the previous header line;
/// the break and the leading whitespace collapse into a single SP. Input
/// without folding is returned as-is.
pub fn unfold_lws(input: &[u8]) -> Cow<'_, [u8]> {
    let folded = input
        .windows(2)
        .any(|w| w[0] == b'\n' && (w[1] == b' ' || w[1] == b'\t'));
    if !folded {
        return Cow::Borrowed(input);
    }

    let mut unfolded = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let fold_len = match (input[i], input.get(i + 1), input.get(i + 2)) {
            (b'\r', Some(b'\n'), Some(b' ' | b'\t')) => 2,
            (b'\n', Some(b' ' | b'\t'), _) => 1,
            _ => 0,
        };
        if fold_len == 0 {
            unfolded.push(input[i]);
            i += 1;
            continue;
        }

        i += fold_len;
        while i < input.len() && (input[i] == b' ' || input[i] == b'\t') {
            i += 1;
        }
        unfolded.push(b' ');
    }

    Cow::Owned(unfolded)
}

/// Byte offset of the first occurrence of `needle`.
pub fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a datagram into the start line plus headers (including the final
/// line ending) and the body that follows the empty line.
pub fn split_head_body(input: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(pos) = find_subslice(input, b"\r\n\r\n") {
        return Some((&input[..pos + 2], &input[pos + 4..]));
    }
    find_subslice(input, b"\n\n").map(|pos| (&input[..pos + 1], &input[pos + 2..]))
}
