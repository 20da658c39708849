//! Preprocessor
//!
//! Runs interleaved with the lexer: a `#` at the beginning of a line hands
//! control here. Macro expansion operates on whole token lists in up to 16
//! re-expansion passes; nested invocations produced by one pass are resolved
//! by the next. Conditional branches are selected before their content is
//! tokenized, so directives inside a dead branch never execute.

use crate::diagnostics::{CompileError, Diagnostic};
use crate::lexer::{self, Cursor, LexMode};
use crate::token::{MacroOrigin, OriginKind, SourceFile, Span, Token, TokenKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Fixed bound on whole-list re-expansion passes. Macros that have not
/// settled by then are reported as non-converging.
pub const MACRO_EXPANSION_PASSES: usize = 16;

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: Token,
    pub params: Vec<Token>,
    pub variadic: bool,
    /// `(` followed the name directly in the definition
    pub function_like: bool,
    pub body: Vec<Token>,
}

/// Process-wide macro table plus collected warnings. The table is
/// append-only: once defined, a macro keeps its identity for the rest of the
/// compilation (redefinition is an error).
#[derive(Debug, Default)]
pub struct Preprocessor {
    macros: HashMap<Rc<str>, MacroDef>,
    pub warnings: Vec<Diagnostic>,
    include_paths: Vec<PathBuf>,
}

impl Preprocessor {
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Preprocessor {
            include_paths,
            ..Preprocessor::default()
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Entry point from the lexer: cursor sits on a `#` at the beginning of
    /// a line.
    pub fn handle_directive(
        &mut self,
        cursor: &mut Cursor,
        out: &mut Vec<Token>,
    ) -> Result<(), CompileError> {
        cursor.advance(1); // '#'
        cursor.skip_whitespace(false);
        let word = lexer::lex_identifier(cursor).ok_or_else(|| {
            Diagnostic::error(cursor.here_span(1), "unknown macro directive")
        })?;
        let name = word.ident_text().expect("identifier").to_string();
        self.dispatch_directive(&name, word, cursor, out)
    }

    fn dispatch_directive(
        &mut self,
        name: &str,
        word: Token,
        cursor: &mut Cursor,
        out: &mut Vec<Token>,
    ) -> Result<(), CompileError> {
        match name {
            "include" => self.directive_include(cursor, out),
            "define" => self.directive_define(cursor),
            "ifdef" | "ifndef" | "if" => self.if_chain(word, cursor, out),
            "error" => {
                cursor.skip_whitespace(false);
                let msg = lexer::lex_string_literal(cursor).ok_or_else(|| {
                    Diagnostic::error(cursor.here_span(1), "expected error message")
                })?;
                let text = match &msg.kind {
                    TokenKind::Str(s) => s.to_string(),
                    _ => unreachable!(),
                };
                Err(Diagnostic::error(word.span.to(&msg.span), text).into())
            }
            "warning" => {
                cursor.skip_whitespace(false);
                let msg = lexer::lex_string_literal(cursor).ok_or_else(|| {
                    Diagnostic::error(cursor.here_span(1), "expected warning message")
                })?;
                let text = match &msg.kind {
                    TokenKind::Str(s) => s.to_string(),
                    _ => unreachable!(),
                };
                self.warnings
                    .push(Diagnostic::warning(word.span.to(&msg.span), text));
                Ok(())
            }
            _ => Err(Diagnostic::error(word.span, "unknown macro directive").into()),
        }
    }

    fn directive_include(
        &mut self,
        cursor: &mut Cursor,
        out: &mut Vec<Token>,
    ) -> Result<(), CompileError> {
        cursor.skip_whitespace(false);
        let filename_tok = lexer::lex_string_literal(cursor).ok_or_else(|| {
            Diagnostic::error(cursor.here_span(1), "expected filename for include")
        })?;
        let filename = match &filename_tok.kind {
            TokenKind::Str(s) => s.to_string(),
            _ => unreachable!(),
        };

        // resolve next to the including file first, then the search paths
        let mut candidates = Vec::new();
        if let Some(dir) = Path::new(&cursor.file.name).parent() {
            candidates.push(dir.join(&filename));
        }
        candidates.push(PathBuf::from(&filename));
        for dir in &self.include_paths {
            candidates.push(dir.join(&filename));
        }

        let mut resolved = None;
        for candidate in candidates {
            if let Ok(text) = std::fs::read_to_string(&candidate) {
                resolved = Some((candidate, text));
                break;
            }
        }
        let Some((path, text)) = resolved else {
            return Err(Diagnostic::error(
                filename_tok.span,
                format!("could not open include file '{}'", filename),
            )
            .into());
        };

        let file = SourceFile::new(path.display().to_string(), text);
        let mut sub = Cursor::new(file);
        let start = out.len();
        lexer::tokenize(
            &mut sub,
            self,
            LexMode {
                starts_on_newline: true,
                ..LexMode::default()
            },
            out,
        )?;

        let origin = Rc::new(MacroOrigin {
            kind: OriginKind::Included,
            token: filename_tok,
        });
        for tok in &mut out[start..] {
            tok.span.origin = Some(Rc::clone(&origin));
        }

        cursor.skip_to_eol();
        Ok(())
    }

    fn directive_define(&mut self, cursor: &mut Cursor) -> Result<(), CompileError> {
        cursor.skip_whitespace(false);
        let name_tok = lexer::lex_identifier(cursor)
            .ok_or_else(|| Diagnostic::error(cursor.here_span(1), "expected macro name"))?;
        let name = Rc::clone(name_tok.ident_text().expect("identifier"));

        if let Some(prev) = self.macros.get(&name) {
            return Err(Diagnostic::error(
                name_tok.span,
                format!("redefinition of macro '{}'", name),
            )
            .with_note(Diagnostic::note(
                prev.name.span.clone(),
                "first defined here",
            ))
            .into());
        }

        // a parameter list only when '(' hugs the name
        let mut params = Vec::new();
        let mut variadic = false;
        let mut function_like = false;
        if cursor.peek() == Some(b'(') {
            function_like = true;
            cursor.advance(1);
            cursor.skip_whitespace(false);
            if cursor.peek() != Some(b')') {
                loop {
                    if cursor.starts_with("...") {
                        cursor.advance(3);
                        variadic = true;
                        break;
                    }
                    let arg = lexer::lex_identifier(cursor).ok_or_else(|| {
                        Diagnostic::error(cursor.here_span(1), "expected macro argument")
                    })?;
                    params.push(arg);
                    cursor.skip_whitespace(false);
                    if cursor.peek() == Some(b',') {
                        cursor.advance(1);
                        cursor.skip_whitespace(false);
                        continue;
                    }
                    break;
                }
                cursor.skip_whitespace(false);
                if cursor.peek() != Some(b')') {
                    return Err(
                        Diagnostic::error(cursor.here_span(1), "expected ')'").into()
                    );
                }
            }
            cursor.advance(1);
        }

        let mut body = Vec::new();
        lexer::tokenize(
            cursor,
            self,
            LexMode {
                stop_on_newline: true,
                ..LexMode::default()
            },
            &mut body,
        )?;

        self.macros.insert(
            name,
            MacroDef {
                name: name_tok,
                params,
                variadic,
                function_like,
                body,
            },
        );
        cursor.skip_to_eol();
        Ok(())
    }

    /// Handle a whole `#if`/`#elif`/`#else`/`#endif` chain. The cursor sits
    /// right after the opening directive word. Exactly one branch (or none)
    /// is tokenized; the others are skipped textually, so their directives
    /// never execute.
    fn if_chain(
        &mut self,
        first_word: Token,
        cursor: &mut Cursor,
        out: &mut Vec<Token>,
    ) -> Result<(), CompileError> {
        let chain_span = first_word.span.clone();
        let mut taken = false;
        let mut word = first_word.ident_text().expect("identifier").to_string();

        loop {
            let active = match word.as_str() {
                "if" | "elif" => {
                    let mut cond = Vec::new();
                    lexer::tokenize(
                        cursor,
                        self,
                        LexMode {
                            stop_on_newline: true,
                            ..LexMode::default()
                        },
                        &mut cond,
                    )?;
                    if cond.is_empty() {
                        return Err(Diagnostic::error(
                            cursor.here_span(1),
                            "expected macro condition",
                        )
                        .into());
                    }
                    if taken {
                        false
                    } else {
                        let expanded = self.expand_fully(cond, true)?;
                        crate::pp_expr::evaluate(&expanded, self)? != 0
                    }
                }
                "ifdef" | "ifndef" => {
                    let mut cond = Vec::new();
                    lexer::tokenize(
                        cursor,
                        self,
                        LexMode {
                            stop_on_newline: true,
                            ..LexMode::default()
                        },
                        &mut cond,
                    )?;
                    let name = match cond.as_slice() {
                        [tok] => tok.ident_text().cloned(),
                        _ => None,
                    };
                    let Some(name) = name else {
                        return Err(Diagnostic::error(
                            chain_span.clone(),
                            "expected macro name",
                        )
                        .into());
                    };
                    let defined = self.is_defined(&name);
                    !taken && (defined == (word == "ifdef"))
                }
                "else" => !taken,
                "endif" => {
                    cursor.skip_to_eol();
                    return Ok(());
                }
                _ => unreachable!("if_chain called with '{}'", word),
            };

            if active {
                taken = true;
            }
            word = if active {
                self.active_branch(cursor, out, &chain_span)?
            } else {
                skip_branch(cursor, &chain_span)?
            };
        }
    }

    /// Tokenize a selected branch, executing nested directives, until the
    /// chain's next `#elif`/`#else`/`#endif` at this nesting level.
    fn active_branch(
        &mut self,
        cursor: &mut Cursor,
        out: &mut Vec<Token>,
        chain_span: &Span,
    ) -> Result<String, CompileError> {
        loop {
            lexer::tokenize(
                cursor,
                self,
                LexMode {
                    stop_on_preproc: true,
                    ..LexMode::default()
                },
                out,
            )?;
            if cursor.at_end() {
                return Err(Diagnostic::error(
                    chain_span.clone(),
                    "unterminated conditional directive",
                )
                .into());
            }

            cursor.advance(1); // '#'
            cursor.skip_whitespace(false);
            let word_tok = lexer::lex_identifier(cursor).ok_or_else(|| {
                Diagnostic::error(cursor.here_span(1), "unknown macro directive")
            })?;
            let name = word_tok.ident_text().expect("identifier").to_string();
            match name.as_str() {
                "endif" | "elif" | "else" => return Ok(name),
                _ => self.dispatch_directive(&name, word_tok, cursor, out)?,
            }
        }
    }

    /// Expand until the token list settles, within the fixed pass bound.
    pub fn expand_fully(
        &self,
        tokens: Vec<Token>,
        test_for_defined: bool,
    ) -> Result<Vec<Token>, CompileError> {
        let mut current = tokens;
        for _ in 0..MACRO_EXPANSION_PASSES {
            let next = self.expand(&current, test_for_defined)?;
            let settled = token_kinds_equal(&next, &current);
            current = next;
            if settled {
                return Ok(current);
            }
        }
        let probe = self.expand(&current, test_for_defined)?;
        if !token_kinds_equal(&probe, &current) {
            let span = current
                .first()
                .map(|t| t.span.clone())
                .unwrap_or_else(Span::synthetic);
            return Err(Diagnostic::error(
                span,
                format!(
                    "macro expansion did not converge after {} passes",
                    MACRO_EXPANSION_PASSES
                ),
            )
            .into());
        }
        Ok(current)
    }

    /// One expansion pass over a token list.
    fn expand(
        &self,
        tokens: &[Token],
        test_for_defined: bool,
    ) -> Result<Vec<Token>, CompileError> {
        let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
        let mut i = 0;

        while i < tokens.len() {
            let tok = &tokens[i];

            // 'defined(X)' stays intact inside #if expressions
            if test_for_defined && tok.is_ident("defined") {
                if i + 3 < tokens.len()
                    && tokens[i + 1].kind == TokenKind::LParen
                    && tokens[i + 2].ident_text().is_some()
                    && tokens[i + 3].kind == TokenKind::RParen
                {
                    out.extend_from_slice(&tokens[i..i + 4]);
                    i += 4;
                    continue;
                }
                return Err(Diagnostic::error(
                    tok.span.clone(),
                    "expected macro name after 'defined'",
                )
                .into());
            }

            if tok.is_ident("__FILE__") {
                let mut file_tok = tok.clone();
                file_tok.kind = TokenKind::Str(tok.span.file.name.as_str().into());
                out.push(file_tok);
                i += 1;
                continue;
            }
            if tok.is_ident("__LINE__") {
                let mut line_tok = tok.clone();
                line_tok.kind = TokenKind::Int(tok.span.line as i64);
                out.push(line_tok);
                i += 1;
                continue;
            }

            let def = tok.ident_text().and_then(|name| self.macros.get(name));
            let Some(def) = def else {
                out.push(tok.clone());
                i += 1;
                continue;
            };

            // the invocation token records the definition site
            let mut macro_tok = tok.clone();
            macro_tok.span.origin = Some(Rc::new(MacroOrigin {
                kind: OriginKind::Macro,
                token: def.name.clone(),
            }));
            i += 1;

            let mut call_args: Vec<Vec<Token>> = Vec::new();
            if def.function_like && i < tokens.len() && tokens[i].kind == TokenKind::LParen {
                i += 1;
                if i < tokens.len() && tokens[i].kind == TokenKind::RParen {
                    i += 1;
                } else {
                    let mut depth = 1usize;
                    let mut cur = Vec::new();
                    loop {
                        if i >= tokens.len() {
                            return Err(Diagnostic::error(
                                macro_tok.span.clone(),
                                "expected comma or ')'",
                            )
                            .into());
                        }
                        let t = &tokens[i];
                        match &t.kind {
                            TokenKind::Comma if depth == 1 => {
                                call_args.push(std::mem::take(&mut cur));
                                i += 1;
                                continue;
                            }
                            TokenKind::LParen => depth += 1,
                            TokenKind::RParen => {
                                depth -= 1;
                                if depth == 0 {
                                    call_args.push(std::mem::take(&mut cur));
                                    i += 1;
                                    break;
                                }
                            }
                            _ => {}
                        }
                        cur.push(t.clone());
                        i += 1;
                    }
                }
            }

            let arity_ok = if def.variadic {
                call_args.len() >= def.params.len()
            } else {
                call_args.len() == def.params.len()
            };
            if !arity_ok {
                return Err(Diagnostic::error(
                    macro_tok.span.clone(),
                    "invalid macro argument count",
                )
                .into());
            }

            self.substitute_body(def, &macro_tok, &call_args, &mut out)?;
        }

        Ok(out)
    }

    fn substitute_body(
        &self,
        def: &MacroDef,
        macro_tok: &Token,
        call_args: &[Vec<Token>],
        out: &mut Vec<Token>,
    ) -> Result<(), CompileError> {
        let param_index = |name: &str| {
            def.params
                .iter()
                .position(|p| p.ident_text().is_some_and(|t| &**t == name))
        };

        let mut j = 0;
        while j < def.body.len() {
            let btok = &def.body[j];

            // '# PARAM' stringifies the argument's source text verbatim
            if btok.kind == TokenKind::Hash
                && j + 1 < def.body.len()
                && def.body[j + 1].ident_text().is_some()
            {
                let pname = def.body[j + 1].ident_text().expect("identifier");
                if let Some(k) = param_index(pname) {
                    let mut str_tok = def.body[j + 1].clone();
                    str_tok.kind = TokenKind::Str(stringify_arg(&call_args[k]));
                    out.push(str_tok);
                    j += 2;
                    continue;
                }
            }

            if let Some(bname) = btok.ident_text() {
                if def.variadic && &**bname == "__VA_ARGS__" {
                    for k in def.params.len()..call_args.len() {
                        for t in &call_args[k] {
                            let mut arg_tok = t.clone();
                            arg_tok.span.origin = Some(Rc::new(MacroOrigin {
                                kind: OriginKind::Macro,
                                token: btok.clone(),
                            }));
                            out.push(arg_tok);
                        }
                        if k != call_args.len() - 1 {
                            let mut comma = btok.clone();
                            comma.kind = TokenKind::Comma;
                            out.push(comma);
                        }
                    }
                    // no variadic arguments supplied: elide the last comma
                    if call_args.len() <= def.params.len()
                        && out.last().is_some_and(|t| t.kind == TokenKind::Comma)
                    {
                        out.pop();
                    }
                    j += 1;
                    continue;
                }
                if def.variadic && &**bname == "__VA_COUNT__" {
                    let mut count_tok = btok.clone();
                    count_tok.kind = TokenKind::Int(call_args.len() as i64);
                    out.push(count_tok);
                    j += 1;
                    continue;
                }
                if let Some(k) = param_index(bname) {
                    for t in &call_args[k] {
                        let mut arg_tok = t.clone();
                        arg_tok.span.origin = Some(Rc::new(MacroOrigin {
                            kind: OriginKind::MacroArg,
                            token: btok.clone(),
                        }));
                        out.push(arg_tok);
                    }
                    j += 1;
                    continue;
                }
            }

            let mut body_tok = btok.clone();
            body_tok.span.origin = Some(Rc::new(MacroOrigin {
                kind: OriginKind::Macro,
                token: macro_tok.clone(),
            }));
            out.push(body_tok);
            j += 1;
        }
        Ok(())
    }
}

/// Stringify an argument from its source span, first token to last.
fn stringify_arg(arg: &[Token]) -> Rc<str> {
    let (Some(first), Some(last)) = (arg.first(), arg.last()) else {
        return "".into();
    };
    let fs = &first.span;
    let ls = &last.span;
    if Rc::ptr_eq(&fs.file, &ls.file) && ls.start + ls.len >= fs.start {
        fs.file.text[fs.start..ls.start + ls.len].into()
    } else {
        // tokens from different buffers: fall back to joining their texts
        let parts: Vec<&str> = arg.iter().map(|t| t.span.text()).collect();
        parts.join(" ").into()
    }
}

fn token_kinds_equal(a: &[Token], b: &[Token]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.kind == y.kind)
}

/// Skip an inactive conditional branch without tokenizing it, honoring
/// nested `#if`..`#endif` pairs. Returns the terminating directive word.
fn skip_branch(cursor: &mut Cursor, chain_span: &Span) -> Result<String, CompileError> {
    let mut depth = 0u32;
    loop {
        cursor.skip_to_eol();
        if cursor.at_end() {
            return Err(Diagnostic::error(
                chain_span.clone(),
                "unterminated conditional directive",
            )
            .into());
        }
        cursor.skip_whitespace(true);
        if cursor.at_end() {
            return Err(Diagnostic::error(
                chain_span.clone(),
                "unterminated conditional directive",
            )
            .into());
        }
        if cursor.peek() != Some(b'#') {
            continue;
        }
        cursor.advance(1);
        cursor.skip_whitespace(false);
        let word: String = cursor
            .rest()
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .map(char::from)
            .collect();
        cursor.advance(word.len());
        match word.as_str() {
            "if" | "ifdef" | "ifndef" => depth += 1,
            "endif" if depth > 0 => depth -= 1,
            "endif" | "elif" | "else" if depth == 0 => return Ok(word),
            _ => {}
        }
    }
}

/// Tokenize a whole program: lex the root file (directives included), then
/// run the bounded macro-expansion passes and terminate with an EOF token.
pub fn tokenize_program(
    source: &str,
    filename: &str,
    pp: &mut Preprocessor,
) -> Result<Vec<Token>, CompileError> {
    let file = SourceFile::new(filename, source);
    let mut cursor = Cursor::new(Rc::clone(&file));
    let mut tokens = Vec::new();
    lexer::tokenize(
        &mut cursor,
        pp,
        LexMode {
            starts_on_newline: true,
            ..LexMode::default()
        },
        &mut tokens,
    )?;

    let mut tokens = pp.expand_fully(tokens, false)?;

    tokens.push(Token::new(
        TokenKind::Eof,
        Span {
            file,
            line: cursor.line,
            line_start: cursor.line_start,
            start: cursor.pos,
            len: 0,
            origin: None,
        },
    ));
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Op;

    fn pp_tokens(source: &str) -> Vec<TokenKind> {
        let mut pp = Preprocessor::new(Vec::new());
        let tokens = tokenize_program(source, "test.opl", &mut pp).expect("preprocess failure");
        tokens
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| *k != TokenKind::Eof)
            .collect()
    }

    fn pp_error(source: &str) -> String {
        let mut pp = Preprocessor::new(Vec::new());
        match tokenize_program(source, "test.opl", &mut pp) {
            Ok(_) => panic!("expected a preprocessing error"),
            Err(e) => format!("{}", e),
        }
    }

    #[test]
    fn test_object_macro() {
        let kinds = pp_tokens("#define N 42\nint x = N;");
        assert!(kinds.contains(&TokenKind::Int(42)));
        assert!(!kinds.iter().any(|k| matches!(k, TokenKind::Ident(n) if &**n == "N")));
    }

    #[test]
    fn test_function_macro() {
        let kinds = pp_tokens("#define TWICE(x) ((x) + (x))\nTWICE(3)");
        let threes = kinds.iter().filter(|k| **k == TokenKind::Int(3)).count();
        assert_eq!(threes, 2);
        assert!(kinds.contains(&TokenKind::Op(Op::Add)));
    }

    #[test]
    fn test_nested_macros_expand() {
        let kinds = pp_tokens("#define A B\n#define B C\n#define C 7\nA");
        assert_eq!(kinds, vec![TokenKind::Int(7)]);
    }

    #[test]
    fn test_stringify() {
        // S6: STR(1+2) expands to the string literal "1+2"
        let kinds = pp_tokens("#define STR(x) #x\nSTR(1+2)");
        assert_eq!(kinds, vec![TokenKind::Str("1+2".into())]);
    }

    #[test]
    fn test_concat() {
        // S6: CAT(foo,bar) yields the identifier foobar
        let kinds = pp_tokens("#define CAT(a,b) a##b\nCAT(foo,bar)");
        assert_eq!(kinds, vec![TokenKind::Ident("foobar".into())]);
    }

    #[test]
    fn test_va_args_and_count() {
        let kinds = pp_tokens("#define F(a, ...) a __VA_COUNT__ __VA_ARGS__\nF(1, 2, 3)");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Int(1),
                TokenKind::Int(3), // total argument count
                TokenKind::Int(2),
                TokenKind::Comma,
                TokenKind::Int(3),
            ]
        );
    }

    #[test]
    fn test_va_args_empty_elides_comma() {
        let kinds = pp_tokens("#define F(a, ...) f(a, __VA_ARGS__)\nF(1)");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("f".into()),
                TokenKind::LParen,
                TokenKind::Int(1),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_file_and_line() {
        let kinds = pp_tokens("x\n__LINE__ __FILE__");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Int(2),
                TokenKind::Str("test.opl".into()),
            ]
        );
    }

    #[test]
    fn test_redefinition_is_an_error() {
        let msg = pp_error("#define A 1\n#define A 2\n");
        assert!(msg.contains("redefinition of macro 'A'"));
        assert!(msg.contains("first defined here"));
    }

    #[test]
    fn test_macro_arity_mismatch() {
        let msg = pp_error("#define F(a,b) a+b\nF(1)");
        assert!(msg.contains("invalid macro argument count"));
    }

    #[test]
    fn test_ifdef_chain() {
        let kinds = pp_tokens("#define YES 1\n#ifdef YES\nint\n#else\nreal\n#endif");
        assert_eq!(kinds, vec![TokenKind::Ident("int".into())]);

        let kinds = pp_tokens("#ifdef NO\nint\n#else\nreal\n#endif");
        assert_eq!(kinds, vec![TokenKind::Ident("real".into())]);
    }

    #[test]
    fn test_if_expression() {
        let kinds = pp_tokens("#if 2 + 2 == 4\nyes\n#endif");
        assert_eq!(kinds, vec![TokenKind::Ident("yes".into())]);

        let kinds = pp_tokens("#if 1 > 2\nyes\n#else\nno\n#endif");
        assert_eq!(kinds, vec![TokenKind::Ident("no".into())]);
    }

    #[test]
    fn test_if_defined() {
        let src = "#define FOO 1\n#if defined(FOO) && defined(BAR)\na\n#else\nb\n#endif";
        assert_eq!(pp_tokens(src), vec![TokenKind::Ident("b".into())]);

        let src = "#define FOO 1\n#if defined(FOO) || defined(BAR)\na\n#else\nb\n#endif";
        assert_eq!(pp_tokens(src), vec![TokenKind::Ident("a".into())]);
    }

    #[test]
    fn test_elif() {
        let src = "#define V 2\n#if V == 1\na\n#elif V == 2\nb\n#elif V == 3\nc\n#else\nd\n#endif";
        assert_eq!(pp_tokens(src), vec![TokenKind::Ident("b".into())]);
    }

    #[test]
    fn test_nested_conditionals_in_dead_branch() {
        let src = "#ifdef NO\n#ifdef ALSO_NO\nx\n#endif\ny\n#else\nz\n#endif";
        assert_eq!(pp_tokens(src), vec![TokenKind::Ident("z".into())]);
    }

    #[test]
    fn test_dead_branch_defines_nothing() {
        let src = "#ifdef NO\n#define HIDDEN 1\n#endif\n#ifdef HIDDEN\na\n#else\nb\n#endif";
        assert_eq!(pp_tokens(src), vec![TokenKind::Ident("b".into())]);
    }

    #[test]
    fn test_self_recursive_macro_settles() {
        // A -> A settles immediately; the pass bound is the safety net
        let kinds = pp_tokens("#define A A\nA");
        assert_eq!(kinds, vec![TokenKind::Ident("A".into())]);
    }

    #[test]
    fn test_mutually_recursive_macros_diagnosed() {
        let msg = pp_error("#define A B\n#define B A\nA");
        assert!(msg.contains("did not converge"));
    }

    #[test]
    fn test_error_directive() {
        let msg = pp_error("#error \"boom\"\n");
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_warning_directive() {
        let mut pp = Preprocessor::new(Vec::new());
        tokenize_program("#warning \"careful\"\nx", "test.opl", &mut pp).unwrap();
        assert_eq!(pp.warnings.len(), 1);
        assert!(pp.warnings[0].message.contains("careful"));
    }

    #[test]
    fn test_include_file() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("defs.oph");
        std::fs::write(&header, "#define SIZE 16\nint helper;\n").unwrap();

        let source = format!("#include \"{}\"\nSIZE", header.display());
        let kinds = pp_tokens(&source);
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("int".into()),
                TokenKind::Ident("helper".into()),
                TokenKind::Semicolon,
                TokenKind::Int(16),
            ]
        );
    }

    #[test]
    fn test_include_tags_origin() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("defs.oph");
        std::fs::write(&header, "included_name\n").unwrap();

        let source = format!("#include \"{}\"\n", header.display());
        let mut pp = Preprocessor::new(Vec::new());
        let tokens = tokenize_program(&source, "test.opl", &mut pp).unwrap();
        let tok = &tokens[0];
        let origin = tok.span.origin.as_ref().expect("origin set");
        assert_eq!(origin.kind, OriginKind::Included);
    }

    #[test]
    fn test_missing_include_is_fatal() {
        let msg = pp_error("#include \"no/such/file.oph\"\n");
        assert!(msg.contains("could not open include file"));
    }
}
