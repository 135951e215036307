//! Tokenizer, including indentation tracking and f-string splitting.

use num_bigint::BigInt;
use num_traits::Num;

use super::exception::{ExcKind, PyException};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(BigInt),
    Float(f64),
    Str(String),
    FStr(Vec<FPiece>),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

/// One piece of an f-string body.
#[derive(Debug, Clone, PartialEq)]
pub enum FPiece {
    Lit(String),
    Field {
        source: String,
        conversion: Option<char>,
        spec: Vec<FPiece>,
        /// `{expr=}` echoes the expression text before the value.
        debug: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "->", ":=", "**", "//", "<<", ">>", "<=", ">=", "==", "!=",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", "+", "-", "*", "/", "%", "@", "&", "|",
    "^", "~", "<", ">", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "=",
];

pub fn syntax_error(message: &str, line: usize) -> PyException {
    let mut exc = PyException::new(
        ExcKind::SyntaxError,
        format!("{} (<string>, line {})", message, line),
    );
    exc.traceback.push(super::exception::TraceFrame {
        line,
        function: "<module>".to_string(),
    });
    exc
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    indents: Vec<usize>,
    depth: usize,
    tokens: Vec<Token>,
    at_line_start: bool,
    _source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indents: vec![0],
            depth: 0,
            tokens: Vec::new(),
            at_line_start: true,
            _source: source,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, PyException> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.depth == 0 {
                self.at_line_start = false;
                if self.handle_indentation()? {
                    continue;
                }
            }
            let c = self.chars[self.pos];
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' => {
                    let next = self.peek(1);
                    if next == Some('\n') {
                        self.pos += 2;
                        self.line += 1;
                    } else if next == Some('\r') && self.peek(2) == Some('\n') {
                        self.pos += 3;
                        self.line += 1;
                    } else {
                        return Err(syntax_error(
                            "unexpected character after line continuation character",
                            self.line,
                        ));
                    }
                }
                c if c.is_ascii_digit() => self.lex_number()?,
                '.' if self.peek(1).map_or(false, |d| d.is_ascii_digit()) => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => {
                    if !self.try_lex_prefixed_string()? {
                        self.lex_name();
                    }
                }
                '\'' | '"' => self.lex_string(false, false)?,
                _ => self.lex_operator()?,
            }
        }
        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn push_newline(&mut self) {
        match self.tokens.last().map(|t| &t.tok) {
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent) => {}
            _ => self.push(Tok::Newline),
        }
    }

    fn skip_comment(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
            self.pos += 1;
        }
    }

    /// Measure the indentation of the line starting at `pos`. Returns true
    /// when the line is blank or a comment and was consumed entirely.
    fn handle_indentation(&mut self) -> Result<bool, PyException> {
        let mut width = 0usize;
        while let Some(c) = self.peek(0) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek(0) {
            None => return Ok(true),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                self.at_line_start = true;
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(true);
            }
            _ => {}
        }
        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else if width < current {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(syntax_error(
                    "unindent does not match any outer indentation level",
                    self.line,
                ));
            }
        }
        Ok(false)
    }

    fn lex_name(&mut self) {
        let start = self.pos;
        while let Some(c) = self.peek(0) {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        self.push(Tok::Name(name));
    }

    fn lex_number(&mut self) -> Result<(), PyException> {
        let start = self.pos;
        let radix = if self.peek(0) == Some('0') {
            match self.peek(1) {
                Some('x') | Some('X') => 16,
                Some('o') | Some('O') => 8,
                Some('b') | Some('B') => 2,
                _ => 10,
            }
        } else {
            10
        };
        if radix != 10 {
            self.pos += 2;
            let digits_start = self.pos;
            while let Some(c) = self.peek(0) {
                if c.is_digit(radix) || c == '_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let digits: String = self.chars[digits_start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();
            return match BigInt::from_str_radix(&digits, radix) {
                Ok(n) => {
                    self.push(Tok::Int(n));
                    Ok(())
                }
                Err(_) => Err(syntax_error("invalid number literal", self.line)),
            };
        }

        let mut is_float = false;
        self.consume_digits();
        if self.peek(0) == Some('.') {
            is_float = true;
            self.pos += 1;
            self.consume_digits();
        }
        if matches!(self.peek(0), Some('e') | Some('E')) {
            let sign_offset = if matches!(self.peek(1), Some('+') | Some('-')) {
                2
            } else {
                1
            };
            if self.peek(sign_offset).map_or(false, |c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += sign_offset;
                self.consume_digits();
            }
        }
        if matches!(self.peek(0), Some('j') | Some('J')) {
            return Err(syntax_error("complex literals are not supported", self.line));
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            match text.parse::<f64>() {
                Ok(f) => self.push(Tok::Float(f)),
                Err(_) => return Err(syntax_error("invalid decimal literal", self.line)),
            }
        } else {
            match text.parse::<BigInt>() {
                Ok(n) => self.push(Tok::Int(n)),
                Err(_) => return Err(syntax_error("invalid decimal literal", self.line)),
            }
        }
        if self.peek(0).map_or(false, |c| c.is_alphabetic() || c == '_') {
            return Err(syntax_error("invalid decimal literal", self.line));
        }
        Ok(())
    }

    fn consume_digits(&mut self) {
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Handle `r"..."`, `f'...'`, `rb"..."` and friends. Returns false when
    /// the identifier at `pos` is not a string prefix.
    fn try_lex_prefixed_string(&mut self) -> Result<bool, PyException> {
        let mut prefix = String::new();
        let mut offset = 0;
        while let Some(c) = self.peek(offset) {
            if c.is_ascii_alphabetic() && offset < 2 {
                prefix.push(c.to_ascii_lowercase());
                offset += 1;
            } else {
                break;
            }
        }
        let quote_follows = matches!(self.peek(offset), Some('\'') | Some('"'));
        let valid = matches!(prefix.as_str(), "r" | "u" | "f" | "b" | "rf" | "fr" | "rb" | "br");
        if prefix.is_empty() || !quote_follows || !valid {
            return Ok(false);
        }
        if prefix.contains('b') {
            return Err(syntax_error("bytes literals are not supported", self.line));
        }
        self.pos += offset;
        self.lex_string(prefix.contains('r'), prefix.contains('f'))?;
        Ok(true)
    }

    fn lex_string(&mut self, raw: bool, fstring: bool) -> Result<(), PyException> {
        let quote = self.chars[self.pos];
        let start_line = self.line;
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let mut body = String::new();
        loop {
            let c = match self.peek(0) {
                Some(c) => c,
                None => {
                    return Err(syntax_error(
                        "unterminated string literal",
                        start_line,
                    ))
                }
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(syntax_error("unterminated string literal", start_line));
                }
                self.line += 1;
            }
            if c == '\\' {
                if let Some(next) = self.peek(1) {
                    body.push(c);
                    body.push(next);
                    if next == '\n' {
                        self.line += 1;
                    }
                    self.pos += 2;
                    continue;
                }
            }
            body.push(c);
            self.pos += 1;
        }
        let tok = if fstring {
            Tok::FStr(split_fstring(&body, raw, start_line)?)
        } else if raw {
            Tok::Str(body)
        } else {
            Tok::Str(unescape(&body, start_line)?)
        };
        self.tokens.push(Token {
            tok,
            line: start_line,
        });
        Ok(())
    }

    fn lex_operator(&mut self) -> Result<(), PyException> {
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek(i) == Some(c));
            if matches {
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.pos += len;
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let c = self.chars[self.pos];
        Err(syntax_error(
            &format!("invalid character '{}' (U+{:04X})", c, c as u32),
            self.line,
        ))
    }
}

/// Resolve backslash escapes in a non-raw string body.
pub fn unescape(body: &str, line: usize) -> Result<String, PyException> {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != '\\' || i + 1 >= chars.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let e = chars[i + 1];
        i += 2;
        match e {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut value = e.to_digit(8).unwrap_or(0);
                let mut taken = 1;
                while taken < 3 && i < chars.len() && chars[i].is_digit(8) {
                    value = value * 8 + chars[i].to_digit(8).unwrap_or(0);
                    i += 1;
                    taken += 1;
                }
                out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'x' | 'u' | 'U' => {
                let width = match e {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = chars.iter().skip(i).take(width).collect();
                if hex.len() != width || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(syntax_error(
                        &format!("truncated \\{} escape", e),
                        line,
                    ));
                }
                let code = u32::from_str_radix(&hex, 16).unwrap_or(0xfffd);
                match char::from_u32(code) {
                    Some(ch) => out.push(ch),
                    None => return Err(syntax_error("illegal Unicode character", line)),
                }
                i += width;
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Split an f-string body into literal text and replacement fields.
fn split_fstring(body: &str, raw: bool, line: usize) -> Result<Vec<FPiece>, PyException> {
    let chars: Vec<char> = body.chars().collect();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let flush = |literal: &mut String, pieces: &mut Vec<FPiece>| -> Result<(), PyException> {
        if !literal.is_empty() {
            let text = if raw {
                std::mem::take(literal)
            } else {
                unescape(&std::mem::take(literal), line)?
            };
            pieces.push(FPiece::Lit(text));
        }
        Ok(())
    };

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(syntax_error("f-string: single '}' is not allowed", line));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }
        flush(&mut literal, &mut pieces)?;
        let (field, next) = split_field(&chars, i + 1, raw, line)?;
        pieces.push(field);
        i = next;
    }
    flush(&mut literal, &mut pieces)?;
    Ok(pieces)
}

/// Parse one `{...}` field starting just after the opening brace. Returns
/// the field and the index just past its closing brace.
fn split_field(chars: &[char], start: usize, raw: bool, line: usize) -> Result<(FPiece, usize), PyException> {
    let mut depth = 0usize;
    let mut i = start;
    let mut in_quote: Option<char> = None;
    let mut expr_end = None;
    let mut conversion = None;
    let mut spec_start = None;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => in_quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '}' => {
                if expr_end.is_none() {
                    expr_end = Some(i);
                }
                break;
            }
            '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => {
                expr_end = Some(i);
                conversion = chars.get(i + 1).copied();
                i += 2;
                if chars.get(i) == Some(&':') {
                    spec_start = Some(i + 1);
                }
                break;
            }
            ':' if depth == 0 => {
                expr_end = Some(i);
                spec_start = Some(i + 1);
                break;
            }
            _ => {}
        }
        i += 1;
    }

    let expr_end = match expr_end {
        Some(e) => e,
        None => return Err(syntax_error("f-string: expecting '}'", line)),
    };

    // Find the closing brace of the field, skipping nested spec fields.
    let mut close = i;
    let mut spec = Vec::new();
    if let Some(spec_from) = spec_start {
        let mut nested = 0usize;
        let mut j = spec_from;
        while j < chars.len() {
            match chars[j] {
                '{' => nested += 1,
                '}' if nested > 0 => nested -= 1,
                '}' => break,
                _ => {}
            }
            j += 1;
        }
        if j >= chars.len() {
            return Err(syntax_error("f-string: expecting '}'", line));
        }
        let spec_text: String = chars[spec_from..j].iter().collect();
        spec = split_fstring(&spec_text, raw, line)?;
        close = j;
    } else {
        while close < chars.len() && chars[close] != '}' {
            close += 1;
        }
        if close >= chars.len() {
            return Err(syntax_error("f-string: expecting '}'", line));
        }
    }

    if let Some(conv) = conversion {
        if !matches!(conv, 'r' | 's' | 'a') {
            return Err(syntax_error(
                "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                line,
            ));
        }
    }

    let mut source: String = chars[start..expr_end].iter().collect();
    let mut debug = false;
    let trimmed = source.trim_end();
    if trimmed.ends_with('=')
        && !trimmed.ends_with("==")
        && !trimmed.ends_with("!=")
        && !trimmed.ends_with("<=")
        && !trimmed.ends_with(">=")
    {
        debug = true;
        source = trimmed[..trimmed.len() - 1].to_string();
    }
    if source.trim().is_empty() {
        return Err(syntax_error("f-string: empty expression not allowed", line));
    }
    Ok((
        FPiece::Field {
            source,
            conversion,
            spec,
            debug,
        },
        close + 1,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn test_indent_and_dedent() {
        let t = toks("if x:\n    y = 1\nz\n");
        assert!(t.contains(&Tok::Indent));
        assert!(t.contains(&Tok::Dedent));
        assert_eq!(t.last(), Some(&Tok::Eof));
    }

    #[test]
    fn test_brackets_join_lines() {
        let t = toks("x = [1,\n  2]\n");
        let newlines = t.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_numbers() {
        let t = toks("0x1F 1_000 2.5 1e3 .5");
        assert_eq!(t[0], Tok::Int(BigInt::from(31)));
        assert_eq!(t[1], Tok::Int(BigInt::from(1000)));
        assert_eq!(t[2], Tok::Float(2.5));
        assert_eq!(t[3], Tok::Float(1000.0));
        assert_eq!(t[4], Tok::Float(0.5));
    }

    #[test]
    fn test_string_escapes_and_raw() {
        let t = toks(r#"'a\tb' r'a\tb' """x
y""""#);
        assert_eq!(t[0], Tok::Str("a\tb".to_string()));
        assert_eq!(t[1], Tok::Str("a\\tb".to_string()));
        assert_eq!(t[2], Tok::Str("x\ny".to_string()));
    }

    #[test]
    fn test_fstring_fields() {
        let t = toks("f'x={x!r:>5} {{lit}} {y=}'");
        match &t[0] {
            Tok::FStr(pieces) => {
                assert_eq!(pieces[0], FPiece::Lit("x=".to_string()));
                match &pieces[1] {
                    FPiece::Field {
                        source,
                        conversion,
                        spec,
                        debug,
                    } => {
                        assert_eq!(source, "x");
                        assert_eq!(*conversion, Some('r'));
                        assert_eq!(spec, &vec![FPiece::Lit(">5".to_string())]);
                        assert!(!debug);
                    }
                    other => panic!("unexpected piece {:?}", other),
                }
                assert_eq!(pieces[2], FPiece::Lit(" {lit} ".to_string()));
                assert!(matches!(&pieces[3], FPiece::Field { debug: true, .. }));
            }
            other => panic!("expected f-string, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_dedent_is_syntax_error() {
        let err = Lexer::new("if x:\n        a\n    b\n").tokenize().unwrap_err();
        assert_eq!(err.kind, ExcKind::SyntaxError);
    }
}
