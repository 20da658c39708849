//! Tokenizer
//!
//! Greedy longest-match lexing over a byte cursor. The lexer is re-entered
//! by the preprocessor with different modes: directive lines stop at the end
//! of the line, conditional-branch scanning stops at a `#`, and token
//! pasting lexes exactly one token from a scratch buffer.

use crate::diagnostics::{CompileError, Diagnostic};
use crate::operators::{ALL_OPS, Op};
use crate::preprocessor::Preprocessor;
use crate::token::{MacroOrigin, SourceFile, Span, Token, TokenKind};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, Default)]
pub struct LexMode {
    /// Stop at the first newline (directive lines)
    pub stop_on_newline: bool,
    /// Stop at a `#` (conditional-branch bodies)
    pub stop_on_preproc: bool,
    /// Lex exactly one token (token pasting)
    pub single_token: bool,
    /// Treat the first token as sitting at the beginning of a line
    pub starts_on_newline: bool,
}

/// Lexing position within one source file.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub file: Rc<SourceFile>,
    pub pos: usize,
    pub line: u32,
    pub line_start: usize,
    /// Origin chain applied to tokens produced from this cursor
    pub origin: Option<Rc<MacroOrigin>>,
}

impl Cursor {
    pub fn new(file: Rc<SourceFile>) -> Self {
        Cursor {
            file,
            pos: 0,
            line: 1,
            line_start: 0,
            origin: None,
        }
    }

    pub fn rest(&self) -> &str {
        &self.file.text[self.pos..]
    }

    pub fn peek(&self) -> Option<u8> {
        self.file.text.as_bytes().get(self.pos).copied()
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.file.text.len()
    }

    pub fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    pub fn at_newline(&self) -> bool {
        matches!(self.peek(), Some(b'\n') | Some(b'\r'))
    }

    /// Advance `n` bytes, keeping the line counters in sync.
    pub fn advance(&mut self, n: usize) {
        let end = (self.pos + n).min(self.file.text.len());
        let bytes = self.file.text.as_bytes();
        let mut i = self.pos;
        while i < end {
            if bytes[i] == b'\n' {
                self.line += 1;
                self.line_start = i + 1;
            }
            i += 1;
        }
        self.pos = end;
    }

    /// Skip spaces and tabs; newlines too unless `stop_on_newline`.
    /// Returns whether a newline was crossed.
    pub fn skip_whitespace(&mut self, skip_newlines: bool) -> bool {
        let mut crossed = false;
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' => self.advance(1),
                b'\n' | b'\r' => {
                    if !skip_newlines {
                        break;
                    }
                    crossed = true;
                    self.advance(1);
                }
                _ => break,
            }
        }
        crossed
    }

    pub fn skip_to_eol(&mut self) {
        while !self.at_end() && !self.at_newline() {
            self.advance(1);
        }
    }

    /// A span of `len` bytes starting at the current position.
    pub fn here_span(&self, len: usize) -> Span {
        Span {
            file: Rc::clone(&self.file),
            line: self.line,
            line_start: self.line_start,
            start: self.pos,
            len,
            origin: self.origin.clone(),
        }
    }
}

fn is_first_ident_char(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn boundary_ok(rest: &str, len: usize) -> bool {
    match rest.as_bytes().get(len) {
        Some(&b) => !is_ident_char(b),
        None => true,
    }
}

fn match_keyword(rest: &str) -> Option<(TokenKind, usize)> {
    const KEYWORDS: &[(&str, TokenKind)] = &[
        ("if", TokenKind::If),
        ("in", TokenKind::Op(Op::In)),
        ("do", TokenKind::Do),
        ("for", TokenKind::For),
        ("asm", TokenKind::Asm),
        ("new", TokenKind::New),
        ("else", TokenKind::Else),
        ("null", TokenKind::Null),
        ("while", TokenKind::While),
        ("break", TokenKind::Break),
        ("match", TokenKind::Match),
        ("return", TokenKind::Return),
        ("struct", TokenKind::Struct),
        ("sizeof", TokenKind::Sizeof),
        ("foreach", TokenKind::Foreach),
        ("typedef", TokenKind::Typedef),
        ("continue", TokenKind::Continue),
    ];
    for (text, kind) in KEYWORDS {
        if rest.starts_with(text) && boundary_ok(rest, text.len()) {
            return Some((kind.clone(), text.len()));
        }
    }
    None
}

fn match_delimiter(rest: &str) -> Option<(TokenKind, usize)> {
    const DELIMITERS: &[(&str, TokenKind)] = &[
        ("(", TokenKind::LParen),
        (")", TokenKind::RParen),
        ("{", TokenKind::LBrace),
        ("}", TokenKind::RBrace),
        ("[", TokenKind::LBracket),
        ("]", TokenKind::RBracket),
        (",", TokenKind::Comma),
        (":", TokenKind::Colon),
        (";", TokenKind::Semicolon),
        ("...", TokenKind::Ellipsis),
        ("..", TokenKind::DotDot),
        (".", TokenKind::Dot),
        ("?", TokenKind::Question),
        ("->", TokenKind::Arrow),
        ("=>", TokenKind::FatArrow),
        ("#", TokenKind::Hash),
    ];
    for (text, kind) in DELIMITERS {
        if rest.starts_with(text) {
            return Some((kind.clone(), text.len()));
        }
    }
    None
}

fn match_identifier(rest: &str) -> Option<(TokenKind, usize)> {
    let bytes = rest.as_bytes();
    if !is_first_ident_char(*bytes.first()?) {
        return None;
    }
    let len = bytes.iter().take_while(|b| is_ident_char(**b)).count();
    Some((TokenKind::Ident(rest[..len].into()), len))
}

/// Compound assignments first, then the operator table (longest match),
/// then bare `=`.
fn match_operator(rest: &str) -> Option<(TokenKind, usize)> {
    const COMPOUNDS: &[(&str, TokenKind)] = &[
        ("+=", TokenKind::AddAssign),
        ("-=", TokenKind::SubAssign),
        ("*=", TokenKind::MulAssign),
        ("/=", TokenKind::DivAssign),
        ("%=", TokenKind::ModAssign),
        ("~=", TokenKind::CatAssign),
    ];
    for (text, kind) in COMPOUNDS {
        if rest.starts_with(text) {
            return Some((kind.clone(), text.len()));
        }
    }

    let mut best: Option<(Op, usize)> = None;
    for op in ALL_OPS {
        let symbol = op.info().symbol;
        if rest.starts_with(symbol) && best.is_none_or(|(_, len)| symbol.len() > len) {
            best = Some((op, symbol.len()));
        }
    }
    if let Some((op, len)) = best {
        return Some((TokenKind::Op(op), len));
    }

    if rest.starts_with('=') {
        return Some((TokenKind::Assign, 1));
    }
    None
}

fn fold_digits(text: &str, radix: u32) -> i64 {
    // wrapping fold: literal overflow is not rejected
    let mut value: i64 = 0;
    for c in text.chars() {
        let digit = c.to_digit(radix).unwrap_or(0) as i64;
        value = value.wrapping_mul(radix as i64).wrapping_add(digit);
    }
    value
}

fn match_number(rest: &str) -> Option<(TokenKind, usize)> {
    let bytes = rest.as_bytes();
    let mut i = 0;
    let is_hex = rest.starts_with("0x");
    if is_hex {
        i = 2;
    }

    let digit_ok = |b: u8| {
        if is_hex {
            b.is_ascii_hexdigit()
        } else {
            b.is_ascii_digit()
        }
    };

    let int_start = i;
    while i < bytes.len() && digit_ok(bytes[i]) {
        i += 1;
    }

    let mut is_float = false;
    if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1) != Some(&b'.') {
        if is_hex {
            return None; // hex floats are not a thing
        }
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }

    if i == 0 || (is_hex && i == int_start) || (!is_hex && int_start == i && !is_float) {
        return None;
    }
    // a bare '.' never reaches this point: the delimiter table claims it

    if is_float {
        let value: f64 = rest[..i].parse().ok()?;
        Some((TokenKind::Float(value), i))
    } else if is_hex {
        Some((TokenKind::Int(fold_digits(&rest[2..i], 16)), i))
    } else {
        Some((TokenKind::Int(fold_digits(&rest[..i], 10)), i))
    }
}

/// Matches a string literal at the start of `rest`. The closing quote must
/// not be preceded by a backslash. Returns `None` when unterminated.
fn match_string(rest: &str) -> Option<(TokenKind, usize)> {
    let bytes = rest.as_bytes();
    if *bytes.first()? != b'"' {
        return None;
    }
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'"' && bytes[i - 1] != b'\\' {
            return Some((TokenKind::Str(rest[1..i].into()), i + 1));
        }
        i += 1;
    }
    None
}

/// Public helpers for the preprocessor, which matches names and filenames
/// inside directive lines without running the full token loop.
pub fn lex_identifier(cursor: &mut Cursor) -> Option<Token> {
    let (kind, len) = match_identifier(cursor.rest())?;
    let span = cursor.here_span(len);
    cursor.advance(len);
    Some(Token::new(kind, span))
}

pub fn lex_string_literal(cursor: &mut Cursor) -> Option<Token> {
    let (kind, len) = match_string(cursor.rest())?;
    let span = cursor.here_span(len);
    cursor.advance(len);
    Some(Token::new(kind, span))
}

fn consume_comment(cursor: &mut Cursor) -> bool {
    if cursor.starts_with("/*") {
        let rest = cursor.rest();
        let len = match rest[2..].find("*/") {
            Some(idx) => 2 + idx + 2,
            None => rest.len(),
        };
        cursor.advance(len);
        true
    } else if cursor.starts_with("//") {
        cursor.skip_to_eol();
        true
    } else {
        false
    }
}

/// Lex tokens from `cursor` into `out` until the mode says stop.
///
/// Directives (`#` at the beginning of a line) are dispatched to the
/// preprocessor, which may re-enter this function for include files,
/// directive bodies and conditional branches.
pub fn tokenize(
    cursor: &mut Cursor,
    pp: &mut Preprocessor,
    mode: LexMode,
    out: &mut Vec<Token>,
) -> Result<(), CompileError> {
    let mut first = true;
    loop {
        let crossed = cursor.skip_whitespace(!mode.stop_on_newline);
        let mut on_new_line = crossed;
        if first && mode.starts_on_newline {
            on_new_line = true;
        }
        first = false;

        if cursor.at_end() || cursor.at_newline() {
            break;
        }
        if mode.stop_on_preproc && cursor.peek() == Some(b'#') {
            break;
        }

        // token pasting: glue the previous token to the next one and re-lex
        if cursor.starts_with("##") {
            paste_tokens(cursor, pp, out)?;
            if mode.single_token {
                break;
            }
            continue;
        }

        if on_new_line && cursor.peek() == Some(b'#') {
            pp.handle_directive(cursor, out)?;
            continue;
        }

        if cursor.starts_with("//") || cursor.starts_with("/*") {
            consume_comment(cursor);
            continue;
        }

        let rest = cursor.rest();
        let matched = match_keyword(rest)
            .or_else(|| match_delimiter(rest))
            .or_else(|| match_identifier(rest))
            .or_else(|| match_number(rest))
            .or_else(|| match_operator(rest));

        let (kind, len) = match matched {
            Some(m) => m,
            None if rest.starts_with('"') => match match_string(rest) {
                Some(m) => m,
                None => {
                    return Err(Diagnostic::error(
                        cursor.here_span(1),
                        "unterminated string literal",
                    )
                    .into());
                }
            },
            None => match match_string(rest) {
                Some(m) => m,
                None => {
                    let c = rest.chars().next().unwrap_or('\0');
                    return Err(Diagnostic::error(
                        cursor.here_span(1),
                        format!("unexpected token '{}' (0x{:x}) found", c, c as u32),
                    )
                    .into());
                }
            },
        };

        let span = cursor.here_span(len);
        cursor.advance(len);
        out.push(Token::new(kind, span));

        if mode.single_token {
            break;
        }
    }
    Ok(())
}

fn paste_tokens(
    cursor: &mut Cursor,
    pp: &mut Preprocessor,
    out: &mut Vec<Token>,
) -> Result<(), CompileError> {
    let paste_span = cursor.here_span(2);
    cursor.advance(2);

    let mut next_list = Vec::new();
    tokenize(
        cursor,
        pp,
        LexMode {
            single_token: true,
            ..LexMode::default()
        },
        &mut next_list,
    )?;
    let next_tok = next_list.into_iter().next().ok_or_else(|| {
        Diagnostic::error(paste_span.clone(), "invalid token concatenation operator usage")
    })?;
    let prev_tok = out.last().cloned().ok_or_else(|| {
        Diagnostic::error(paste_span.clone(), "invalid token concatenation operator usage")
    })?;

    let combined = format!("{}{}", prev_tok.span.text(), next_tok.span.text());
    let scratch = SourceFile::new("<paste>", combined.clone());
    let mut scratch_cursor = Cursor::new(scratch);
    let mut pasted = Vec::new();
    tokenize(
        &mut scratch_cursor,
        pp,
        LexMode {
            single_token: true,
            ..LexMode::default()
        },
        &mut pasted,
    )
    .map_err(|_| {
        Diagnostic::error(
            paste_span.clone(),
            format!("invalid token concatenation ({})", combined),
        )
    })?;
    let mut merged = pasted.into_iter().next().ok_or_else(|| {
        Diagnostic::error(
            paste_span,
            format!("invalid token concatenation ({})", combined),
        )
    })?;

    merged.span = prev_tok.span.clone();
    merged.span.len = prev_tok.span.len + 2 + next_tok.span.len;
    *out.last_mut().unwrap() = merged;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessor::Preprocessor;

    fn lex(source: &str) -> Vec<TokenKind> {
        let file = SourceFile::new("test.opl", source);
        let mut cursor = Cursor::new(file);
        let mut pp = Preprocessor::new(Vec::new());
        let mut out = Vec::new();
        tokenize(
            &mut cursor,
            &mut pp,
            LexMode {
                starts_on_newline: true,
                ..LexMode::default()
            },
            &mut out,
        )
        .expect("lex failure");
        out.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let kinds = lex("if iffy while whilex foreach");
        assert_eq!(
            kinds,
            vec![
                TokenKind::If,
                TokenKind::Ident("iffy".into()),
                TokenKind::While,
                TokenKind::Ident("whilex".into()),
                TokenKind::Foreach,
            ]
        );
    }

    #[test]
    fn test_operators_longest_match() {
        let kinds = lex("a<<b <= < == = += ~= ~");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Op(Op::Shl),
                TokenKind::Ident("b".into()),
                TokenKind::Op(Op::Le),
                TokenKind::Op(Op::Lt),
                TokenKind::Op(Op::Eq),
                TokenKind::Assign,
                TokenKind::AddAssign,
                TokenKind::CatAssign,
                TokenKind::Op(Op::Cat),
            ]
        );
    }

    #[test]
    fn test_delimiters() {
        let kinds = lex("... .. . => -> ? #");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ellipsis,
                TokenKind::DotDot,
                TokenKind::Dot,
                TokenKind::FatArrow,
                TokenKind::Arrow,
                TokenKind::Question,
                TokenKind::Hash,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let kinds = lex("42 0x1f 3.25 1..5");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Int(42),
                TokenKind::Int(31),
                TokenKind::Float(3.25),
                TokenKind::Int(1),
                TokenKind::DotDot,
                TokenKind::Int(5),
            ]
        );
    }

    #[test]
    fn test_string_literal() {
        let kinds = lex(r#""hello" "with \" quote""#);
        assert_eq!(
            kinds,
            vec![
                TokenKind::Str("hello".into()),
                TokenKind::Str(r#"with \" quote"#.into()),
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        let file = SourceFile::new("test.opl", "\"oops");
        let mut cursor = Cursor::new(file);
        let mut pp = Preprocessor::new(Vec::new());
        let mut out = Vec::new();
        let err = tokenize(&mut cursor, &mut pp, LexMode::default(), &mut out);
        assert!(err.is_err());
        assert!(format!("{}", err.unwrap_err()).contains("unterminated string"));
    }

    #[test]
    fn test_comments() {
        let kinds = lex("a // line comment\nb /* block\ncomment */ c");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Ident("b".into()),
                TokenKind::Ident("c".into()),
            ]
        );
    }

    #[test]
    fn test_line_tracking() {
        let file = SourceFile::new("test.opl", "a\nbb\n ccc");
        let mut cursor = Cursor::new(file);
        let mut pp = Preprocessor::new(Vec::new());
        let mut out = Vec::new();
        tokenize(&mut cursor, &mut pp, LexMode::default(), &mut out).unwrap();
        assert_eq!(out[0].span.line, 1);
        assert_eq!(out[1].span.line, 2);
        assert_eq!(out[2].span.line, 3);
        assert_eq!(out[2].span.column(), 2);
    }

    #[test]
    fn test_spans_are_contiguous() {
        let file = SourceFile::new("test.opl", "foo+ bar");
        let mut cursor = Cursor::new(file);
        let mut pp = Preprocessor::new(Vec::new());
        let mut out = Vec::new();
        tokenize(&mut cursor, &mut pp, LexMode::default(), &mut out).unwrap();
        assert_eq!(out[0].span.text(), "foo");
        assert_eq!(out[1].span.text(), "+");
        assert_eq!(out[2].span.text(), "bar");
        assert_eq!(out[0].span.start + out[0].span.len, out[1].span.start);
    }

    #[test]
    fn test_prefix_sign_left_to_parser() {
        let kinds = lex("-1 +2");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Op(Op::Sub),
                TokenKind::Int(1),
                TokenKind::Op(Op::Add),
                TokenKind::Int(2),
            ]
        );
    }
}
