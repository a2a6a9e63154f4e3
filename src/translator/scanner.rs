//! Quote-aware parenthesis scanning shared by every formula rewrite.
//!
//! Single-quoted strings (with `''` escapes) and double-quoted identifiers are
//! opaque: brackets and commas inside them never count.

/// A function call located in a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Byte offset of the first character of the function name.
    pub start: usize,
    /// Byte offset of the opening parenthesis.
    pub open: usize,
    /// Byte offset of the matching closing parenthesis.
    pub close: usize,
}

impl CallSite {
    pub fn end(&self) -> usize {
        self.close + 1
    }

    pub fn args<'a>(&self, text: &'a str) -> Vec<String> {
        split_top_level_args(&text[self.open + 1..self.close])
    }
}

/// Byte-level lexical state walking a formula left to right.
struct QuoteState {
    in_single: bool,
    in_double: bool,
}

impl QuoteState {
    fn new() -> Self {
        Self {
            in_single: false,
            in_double: false,
        }
    }

    fn quoted(&self) -> bool {
        self.in_single || self.in_double
    }

    /// Advance over `bytes[i]`, returning how many bytes were consumed.
    fn step(&mut self, bytes: &[u8], i: usize) -> usize {
        match bytes[i] {
            b'\'' if !self.in_double => {
                if self.in_single && bytes.get(i + 1) == Some(&b'\'') {
                    return 2;
                }
                self.in_single = !self.in_single;
            }
            b'"' if !self.in_single => {
                self.in_double = !self.in_double;
            }
            _ => {}
        }
        1
    }
}

/// Visit every byte that sits outside quotes.
fn for_each_unquoted<F>(text: &str, mut visit: F)
where
    F: FnMut(usize, u8) -> bool,
{
    let bytes = text.as_bytes();
    let mut state = QuoteState::new();
    let mut i = 0;
    while i < bytes.len() {
        let was_quoted = state.quoted();
        let width = state.step(bytes, i);
        let is_quote_char = matches!(bytes[i], b'\'' | b'"');
        if !was_quoted && !is_quote_char && !visit(i, bytes[i]) {
            return;
        }
        i += width;
    }
}

pub fn find_matching_paren(text: &str, open: usize) -> Option<usize> {
    if text.as_bytes().get(open) != Some(&b'(') {
        return None;
    }
    let mut depth = 0i64;
    let mut found = None;
    let tail = &text[open..];
    for_each_unquoted(tail, |i, b| {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    found = Some(open + i);
                    return false;
                }
            }
            _ => {}
        }
        true
    });
    found
}

/// Split an argument list on commas at nesting depth zero.
pub fn split_top_level_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0i64;
    let mut last = 0;
    let mut cuts = Vec::new();
    for_each_unquoted(text, |i, b| {
        match b {
            b'(' => depth += 1,
            b')' => depth = (depth - 1).max(0),
            b',' if depth == 0 => cuts.push(i),
            _ => {}
        }
        true
    });
    for cut in cuts {
        args.push(text[last..cut].trim().to_string());
        last = cut + 1;
    }
    let tail = text[last..].trim();
    if !tail.is_empty() || !args.is_empty() {
        args.push(tail.to_string());
    }
    args
}

/// Offset of the innermost unmatched `(` that encloses `pos`.
pub fn find_enclosing_open(text: &str, pos: usize) -> Option<usize> {
    enclosing_opens(text, pos).last().copied()
}

/// Every unmatched `(` before `pos`, outermost first.
pub fn enclosing_opens(text: &str, pos: usize) -> Vec<usize> {
    let mut stack = Vec::new();
    let head = &text[..pos.min(text.len())];
    for_each_unquoted(head, |i, b| {
        match b {
            b'(' => stack.push(i),
            b')' => {
                stack.pop();
            }
            _ => {}
        }
        true
    });
    stack
}

/// Net parenthesis depth change across `text`.
pub fn paren_delta(text: &str) -> i64 {
    let mut delta = 0i64;
    for_each_unquoted(text, |_, b| {
        match b {
            b'(' => delta += 1,
            b')' => delta -= 1,
            _ => {}
        }
        true
    });
    delta
}

pub fn is_balanced(text: &str) -> bool {
    let mut depth = 0i64;
    let mut ok = true;
    for_each_unquoted(text, |_, b| {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    ok = false;
                    return false;
                }
            }
            _ => {}
        }
        true
    });
    ok && depth == 0
}

/// True when every single and double quote in `text` is closed.
pub fn quotes_closed(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut state = QuoteState::new();
    let mut i = 0;
    while i < bytes.len() {
        i += state.step(bytes, i);
    }
    !state.quoted()
}

/// True when the text before a keyword ends in an operand, so the keyword is
/// used as an infix operator (`"A" IN (...)`) rather than a function name.
pub fn follows_operand(prefix: &str) -> bool {
    let trimmed = prefix.trim_end();
    match trimmed.as_bytes().last() {
        None => false,
        Some(b) if b.is_ascii_alphanumeric() || *b == b'_' => !ends_with_keyword(
            trimmed,
            &[
                "AND", "OR", "NOT", "WHEN", "THEN", "ELSE", "CASE", "WHERE", "ON", "SELECT",
                "RETURN", "IS",
            ],
        ),
        Some(b) => matches!(*b, b'"' | b'\'' | b')'),
    }
}

/// True when `(` at `open` directly follows an identifier, i.e. starts a call.
pub fn is_call_paren(text: &str, open: usize) -> bool {
    let before = text[..open].trim_end();
    before
        .as_bytes()
        .last()
        .map(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .unwrap_or(false)
        && !ends_with_keyword(before, &["AND", "OR", "NOT", "IN", "WHEN", "THEN", "ELSE", "ON", "WHERE"])
}

/// True when the last whole word of `text` is one of `keywords` (case-insensitive).
pub fn ends_with_keyword(text: &str, keywords: &[&str]) -> bool {
    let trimmed = text.trim_end();
    let word_start = trimmed
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map(|i| i + 1)
        .unwrap_or(0);
    let word = &trimmed[word_start..];
    keywords.iter().any(|k| word.eq_ignore_ascii_case(k))
}

/// True when the first whole word of `text` is one of `keywords` (case-insensitive).
pub fn starts_with_keyword(text: &str, keywords: &[&str]) -> bool {
    let trimmed = text.trim_start();
    let word_end = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(trimmed.len());
    let word = &trimmed[..word_end];
    keywords.iter().any(|k| word.eq_ignore_ascii_case(k))
}

/// Locate every call to `name` (case-insensitive) with a balanced argument list.
///
/// A name preceded by `.` or another identifier character is not a match, so
/// `SCHEMA.IF(` and `MY_IF(` are left alone.
pub fn find_calls(text: &str, name: &str) -> Vec<CallSite> {
    let bytes = text.as_bytes();
    let name_len = name.len();
    let mut candidates = Vec::new();
    for_each_unquoted(text, |i, _| {
        if i + name_len <= bytes.len()
            && text.is_char_boundary(i)
            && text.is_char_boundary(i + name_len)
            && text[i..i + name_len].eq_ignore_ascii_case(name)
        {
            let prev_ok = i == 0 || {
                let p = bytes[i - 1];
                !(p.is_ascii_alphanumeric() || p == b'_' || p == b'.' || p == b'$')
            };
            let next_ok = bytes
                .get(i + name_len)
                .map(|n| !(n.is_ascii_alphanumeric() || *n == b'_'))
                .unwrap_or(false);
            if prev_ok && next_ok {
                candidates.push(i);
            }
        }
        true
    });

    candidates
        .into_iter()
        .filter_map(|start| {
            let after = start + name_len;
            let gap = text[after..].len() - text[after..].trim_start().len();
            let open = after + gap;
            if bytes.get(open) != Some(&b'(') {
                return None;
            }
            find_matching_paren(text, open).map(|close| CallSite { start, open, close })
        })
        .collect()
}

/// Rewrite every call to `name`, innermost first.
///
/// `rewrite` receives the text preceding the call and the parsed arguments and
/// returns the replacement text, or `None` to leave that call untouched.
pub fn rewrite_calls<F>(text: &str, name: &str, mut rewrite: F) -> String
where
    F: FnMut(&str, &[String]) -> Option<String>,
{
    let mut result = text.to_string();
    let mut cursor = usize::MAX;
    loop {
        let site = match find_calls(&result, name)
            .into_iter()
            .filter(|c| c.start < cursor)
            .last()
        {
            Some(site) => site,
            None => break,
        };
        cursor = site.start;
        let args = site.args(&result);
        if let Some(replacement) = rewrite(&result[..site.start], &args) {
            result = format!("{}{}{}", &result[..site.start], replacement, &result[site.end()..]);
        }
    }
    result
}

/// Replace every unquoted occurrence of `from` with `to`, except inside the
/// `protected` byte ranges.
pub fn replace_unquoted(text: &str, from: &str, to: &str, protected: &[(usize, usize)]) -> String {
    let mut hits = Vec::new();
    let mut next_free = 0;
    for_each_unquoted(text, |i, _| {
        if i >= next_free
            && text.is_char_boundary(i)
            && text[i..].starts_with(from)
            && !protected.iter().any(|(s, e)| i >= *s && i < *e)
        {
            hits.push(i);
            next_free = i + from.len();
        }
        true
    });
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for hit in hits {
        out.push_str(&text[last..hit]);
        out.push_str(to);
        last = hit + from.len();
    }
    out.push_str(&text[last..]);
    out
}

/// Byte offsets of unquoted occurrences of the single character `needle`.
pub fn unquoted_positions(text: &str, needle: u8) -> Vec<usize> {
    let mut hits = Vec::new();
    for_each_unquoted(text, |i, b| {
        if b == needle {
            hits.push(i);
        }
        true
    });
    hits
}

/// Find top-level occurrences of a keyword inside `text` (depth zero, unquoted).
pub fn top_level_keyword_positions(text: &str, keyword: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let len = keyword.len();
    let mut depth = 0i64;
    let mut hits = Vec::new();
    for_each_unquoted(text, |i, b| {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0
                && i + len <= bytes.len()
                && text.is_char_boundary(i)
                && text.is_char_boundary(i + len)
                && text[i..i + len].eq_ignore_ascii_case(keyword) =>
            {
                let prev_ok = i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_');
                let next_ok = bytes
                    .get(i + len)
                    .map(|n| !(n.is_ascii_alphanumeric() || *n == b'_'))
                    .unwrap_or(true);
                if prev_ok && next_ok {
                    hits.push(i);
                }
            }
            _ => {}
        }
        true
    });
    hits
}

/// Collapse runs of whitespace outside quotes to a single space.
pub fn collapse_whitespace(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut state = QuoteState::new();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut pending_space = false;
    while i < bytes.len() {
        if !bytes[i].is_ascii() {
            let ch_len = text[i..].chars().next().map(char::len_utf8).unwrap_or(1);
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push_str(&text[i..i + ch_len]);
            i += ch_len;
            continue;
        }
        let was_quoted = state.quoted();
        let width = state.step(bytes, i);
        if !was_quoted && bytes[i].is_ascii_whitespace() {
            pending_space = true;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push_str(&text[i..i + width]);
        }
        i += width;
    }
    out
}

/// Apply `f` to every maximal run of text outside quotes; quoted runs are copied verbatim.
pub fn map_unquoted<F>(text: &str, mut f: F) -> String
where
    F: FnMut(&str) -> String,
{
    let bytes = text.as_bytes();
    let mut state = QuoteState::new();
    let mut out = String::with_capacity(text.len());
    let mut run_start = 0;
    let mut run_quoted = false;
    let mut i = 0;
    while i < bytes.len() {
        let was_quoted = state.quoted();
        let width = state.step(bytes, i);
        let quoted = was_quoted || state.quoted();
        if quoted != run_quoted {
            let run = &text[run_start..i];
            if run_quoted {
                out.push_str(run);
            } else {
                out.push_str(&f(run));
            }
            run_start = i;
            run_quoted = quoted;
        }
        i += width;
    }
    let tail = &text[run_start..];
    if run_quoted {
        out.push_str(tail);
    } else {
        out.push_str(&f(tail));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_unquoted() {
        let mapped = map_unquoted("a and 'and' and \"and\"", |s| s.replace("and", "AND"));
        assert_eq!(mapped, "a AND 'and' AND \"and\"");
    }

    #[test]
    fn test_find_matching_paren_skips_quotes() {
        let text = "IF(\"A\" = ')', 1, 2) + 3";
        assert_eq!(find_matching_paren(text, 2), Some(18));
        assert_eq!(find_matching_paren(text, 0), None);
    }

    #[test]
    fn test_split_top_level_args() {
        let args = split_top_level_args("\"A\", SUBSTRING(\"B\", 1, 2), 'x,y', 'it''s'");
        assert_eq!(args, vec!["\"A\"", "SUBSTRING(\"B\", 1, 2)", "'x,y'", "'it''s'"]);
        assert!(split_top_level_args("").is_empty());
    }

    #[test]
    fn test_enclosing_open() {
        let text = "(\"A\" = 1 AND ('$$IP_X$$' = '' OR \"B\" = 2))";
        let pos = text.find("$$IP").unwrap();
        assert_eq!(find_enclosing_open(text, pos), Some(13));
        assert_eq!(enclosing_opens(text, pos), vec![0, 13]);
    }

    #[test]
    fn test_balance_checks() {
        assert!(is_balanced("(a (b) ')')"));
        assert!(!is_balanced("(a))("));
        assert_eq!(paren_delta("((a)"), 1);
        assert!(quotes_closed("'it''s' \"x\""));
        assert!(!quotes_closed("'open"));
    }

    #[test]
    fn test_find_calls_respects_boundaries() {
        let text = "if(a, b, c) + MY_IF(x) + s.if(y) + IFF(z)";
        let calls = find_calls(text, "if");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].start, 0);
        assert_eq!(calls[0].args(text), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rewrite_calls_nested() {
        let text = "if(\"A\" = 1, if(\"B\" = 2, 'x', 'y'), 'z')";
        let rewritten = rewrite_calls(text, "if", |_, args| {
            Some(format!("IFF({})", args.join(", ")))
        });
        assert_eq!(rewritten, "IFF(\"A\" = 1, IFF(\"B\" = 2, 'x', 'y'), 'z')");
    }

    #[test]
    fn test_replace_unquoted_respects_protection() {
        let text = "\"A\" || 'x||y' || REGEXP_LIKE(\"B\", '^' || 'z')";
        let protected: Vec<(usize, usize)> = find_calls(text, "REGEXP_LIKE")
            .iter()
            .map(|c| (c.start, c.end()))
            .collect();
        assert_eq!(
            replace_unquoted(text, "||", "+", &protected),
            "\"A\" + 'x||y' + REGEXP_LIKE(\"B\", '^' || 'z')"
        );
    }

    #[test]
    fn test_top_level_keywords() {
        let text = "'$$IP$$' = '' OR (\"A\" = 1 OR \"B\" = 2) ORDER";
        assert_eq!(top_level_keyword_positions(text, "OR"), vec![14]);
    }

    #[test]
    fn test_collapse_whitespace_keeps_literals() {
        assert_eq!(collapse_whitespace("a  AND\n  'x   y'"), "a AND 'x   y'");
    }

    #[test]
    fn test_keyword_edges() {
        assert!(ends_with_keyword("\"A\" = 1 AND ", &["AND", "OR"]));
        assert!(!ends_with_keyword("BRAND", &["AND"]));
        assert!(starts_with_keyword(" or \"B\"", &["AND", "OR"]));
        assert!(is_call_paren("UPPER(", 5));
        assert!(follows_operand("\"A\" "));
        assert!(!follows_operand("\"A\" = 1 AND "));
        assert!(!follows_operand("("));
        assert!(!is_call_paren("x AND (", 6));
    }
}
