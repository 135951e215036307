//! Recursive-descent parser over the token stream.

use std::rc::Rc;

use super::ast::{
    Arg, BinOp, BoolOpKind, CmpOp, Comprehension, ExceptHandler, Expr, FStrPart, FunctionBody,
    FunctionDef, Param, ParamKind, Stmt, StmtKind, UnaryOp,
};
use super::exception::PyException;
use super::lexer::{syntax_error, FPiece, Lexer, Tok, Token};
use super::value::Value;

/// Combined nesting depth of blocks, brackets and operator chains. The
/// evaluator recurses once per level, so this bounds its stack use.
const MAX_DEPTH: usize = 400;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

type PResult<T> = Result<T, PyException>;

/// Parse a whole program.
pub fn parse_module(source: &str) -> PResult<Vec<Stmt>> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens, 0);
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        body.extend(parser.parse_statement()?);
    }
    Ok(body)
}

/// Parse a single expression, such as the trailing line of a program.
pub fn parse_expression(source: &str) -> PResult<Expr> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens, 0);
    let expr = parser.parse_testlist_star()?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(parser.error());
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    loops: usize,
    functions: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
            loops: 0,
            functions: 0,
        }
    }

    // ----- token helpers -------------------------------------------------

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn line(&self) -> usize {
        let idx = self.pos.min(self.tokens.len() - 1);
        self.tokens[idx].line
    }

    fn advance(&mut self) -> Tok {
        let idx = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        self.tokens[idx].tok.clone()
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.error()),
        }
    }

    /// The identifier at the cursor, when the next token is `op`.
    fn name_followed_by(&self, op: &str) -> Option<String> {
        match (self.peek(), self.peek_at(1)) {
            (Tok::Name(n), Tok::Op(o)) if *o == op && !KEYWORDS.contains(&n.as_str()) => {
                Some(n.clone())
            }
            _ => None,
        }
    }

    fn error(&self) -> PyException {
        syntax_error("invalid syntax", self.line())
    }

    fn error_msg(&self, message: &str) -> PyException {
        syntax_error(message, self.line())
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error_msg("too many nested expressions or blocks"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ----- statements ----------------------------------------------------

    fn parse_statement(&mut self) -> PResult<Vec<Stmt>> {
        let line = self.line();
        let name = match self.peek() {
            Tok::Name(n) => Some(n.clone()),
            Tok::Op("@") => return Err(self.error_msg("decorators are not supported")),
            Tok::Indent => return Err(self.error_msg("unexpected indent")),
            _ => None,
        };
        let kind = match name.as_deref() {
            Some("if") => {
                self.advance();
                self.parse_if()?
            }
            Some("while") => {
                self.advance();
                self.parse_while()?
            }
            Some("for") => {
                self.advance();
                self.parse_for()?
            }
            Some("def") => {
                self.advance();
                self.parse_def(line)?
            }
            Some("try") => {
                self.advance();
                self.parse_try()?
            }
            Some(kw @ ("class" | "with" | "async")) => {
                return Err(self.error_msg(&format!("'{}' statements are not supported", kw)))
            }
            _ => return self.parse_simple_statements(),
        };
        Ok(vec![Stmt { kind, line }])
    }

    fn parse_simple_statements(&mut self) -> PResult<Vec<Stmt>> {
        let mut out = Vec::new();
        loop {
            let line = self.line();
            let kind = self.parse_simple_statement()?;
            out.push(Stmt { kind, line });
            if self.eat_op(";") {
                if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        if !self.eat(&Tok::Newline) && !self.at(&Tok::Eof) {
            return Err(self.error());
        }
        Ok(out)
    }

    fn parse_simple_statement(&mut self) -> PResult<StmtKind> {
        let name = match self.peek() {
            Tok::Name(n) => n.clone(),
            _ => return self.parse_expr_statement(),
        };
        match name.as_str() {
            "pass" => {
                self.advance();
                Ok(StmtKind::Pass)
            }
            "break" => {
                if self.loops == 0 {
                    return Err(self.error_msg("'break' outside loop"));
                }
                self.advance();
                Ok(StmtKind::Break)
            }
            "continue" => {
                if self.loops == 0 {
                    return Err(self.error_msg("'continue' not properly in loop"));
                }
                self.advance();
                Ok(StmtKind::Continue)
            }
            "return" => {
                if self.functions == 0 {
                    return Err(self.error_msg("'return' outside function"));
                }
                self.advance();
                if self.at_statement_end() {
                    Ok(StmtKind::Return(None))
                } else {
                    Ok(StmtKind::Return(Some(self.parse_testlist_star()?)))
                }
            }
            "raise" => {
                self.advance();
                if self.at_statement_end() {
                    return Ok(StmtKind::Raise {
                        exc: None,
                        cause: None,
                    });
                }
                let exc = self.parse_test()?;
                let cause = if self.eat_kw("from") {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                Ok(StmtKind::Raise {
                    exc: Some(exc),
                    cause,
                })
            }
            "assert" => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat_op(",") {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                Ok(StmtKind::Assert { test, msg })
            }
            "del" => {
                self.advance();
                let target = self.parse_target_list()?;
                let targets = match target {
                    Expr::Tuple(items) => items,
                    other => vec![other],
                };
                for t in &targets {
                    self.check_del_target(t)?;
                }
                Ok(StmtKind::Delete(targets))
            }
            "global" | "nonlocal" => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                if name == "global" {
                    Ok(StmtKind::Global(names))
                } else {
                    if self.functions == 0 {
                        return Err(self.error_msg("nonlocal declaration not allowed at module level"));
                    }
                    Ok(StmtKind::Nonlocal(names))
                }
            }
            "import" => {
                self.advance();
                let mut modules = vec![self.parse_dotted_name()?];
                if self.eat_kw("as") {
                    self.expect_name()?;
                }
                while self.eat_op(",") {
                    modules.push(self.parse_dotted_name()?);
                    if self.eat_kw("as") {
                        self.expect_name()?;
                    }
                }
                Ok(StmtKind::Import(modules))
            }
            "from" => {
                self.advance();
                while self.eat_op(".") || self.eat_op("...") {}
                let module = self.parse_dotted_name()?;
                self.expect_kw("import")?;
                let parens = self.eat_op("(");
                if !self.eat_op("*") {
                    loop {
                        self.expect_name()?;
                        if self.eat_kw("as") {
                            self.expect_name()?;
                        }
                        if !self.eat_op(",") {
                            break;
                        }
                        if parens && self.is_op(")") {
                            break;
                        }
                    }
                }
                if parens {
                    self.expect_op(")")?;
                }
                Ok(StmtKind::Import(vec![module]))
            }
            "yield" => Err(self.error_msg("'yield' is not supported")),
            _ => self.parse_expr_statement(),
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Op(";"))
    }

    fn parse_dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_expr_statement(&mut self) -> PResult<StmtKind> {
        let first = self.parse_testlist_star()?;

        if self.eat_op(":") {
            self.check_target(&first)?;
            if matches!(first, Expr::Tuple(_) | Expr::List(_)) {
                return Err(self.error_msg("only single target can be annotated"));
            }
            self.parse_test()?;
            let value = if self.eat_op("=") {
                Some(self.parse_testlist_star()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                value,
            });
        }

        let augmented = match self.peek() {
            Tok::Op(op) => BinOp::from_augmented(op),
            _ => None,
        };
        if let Some(bin) = augmented {
            self.advance();
            if !matches!(
                first,
                Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }
            ) {
                return Err(self.error_msg("illegal expression for augmented assignment"));
            }
            let value = self.parse_testlist_star()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op: bin,
                value,
            });
        }

        if self.is_op("=") {
            let mut targets = vec![first];
            let value = loop {
                self.expect_op("=")?;
                let next = self.parse_testlist_star()?;
                if self.is_op("=") {
                    targets.push(next);
                } else {
                    break next;
                }
            };
            for t in &targets {
                self.check_target(t)?;
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        if let Expr::Starred(_) = first {
            return Err(self.error_msg("can't use starred expression here"));
        }
        Ok(StmtKind::Expr(first))
    }

    fn check_target(&self, target: &Expr) -> PResult<()> {
        match target {
            Expr::Name(n) => {
                if KEYWORDS.contains(&n.as_str()) {
                    Err(self.error_msg("cannot assign to keyword"))
                } else {
                    Ok(())
                }
            }
            Expr::Attribute { .. } | Expr::Subscript { .. } => Ok(()),
            Expr::Tuple(items) | Expr::List(items) => {
                let stars = items.iter().filter(|i| matches!(i, Expr::Starred(_))).count();
                if stars > 1 {
                    return Err(self.error_msg("multiple starred expressions in assignment"));
                }
                items.iter().try_for_each(|i| self.check_target(i))
            }
            Expr::Starred(inner) => self.check_target(inner),
            Expr::Constant(_) => Err(self.error_msg("cannot assign to literal")),
            Expr::Call { .. } => Err(self.error_msg("cannot assign to function call")),
            _ => Err(self.error_msg("cannot assign to expression")),
        }
    }

    fn check_del_target(&self, target: &Expr) -> PResult<()> {
        match target {
            Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. } => Ok(()),
            Expr::Tuple(items) | Expr::List(items) => {
                items.iter().try_for_each(|i| self.check_del_target(i))
            }
            _ => Err(self.error_msg("cannot delete expression")),
        }
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !self.eat(&Tok::Newline) {
            return self.parse_simple_statements();
        }
        if !self.eat(&Tok::Indent) {
            return Err(self.error_msg("expected an indented block"));
        }
        self.enter()?;
        let mut body = Vec::new();
        while !self.at(&Tok::Dedent) && !self.at(&Tok::Eof) {
            body.extend(self.parse_statement()?);
        }
        self.eat(&Tok::Dedent);
        self.leave();
        Ok(body)
    }

    fn parse_if(&mut self) -> PResult<StmtKind> {
        let test = self.parse_named_test()?;
        let body = self.parse_block()?;
        let orelse = if self.is_kw("elif") {
            let line = self.line();
            self.advance();
            self.enter()?;
            let kind = self.parse_if();
            self.leave();
            vec![Stmt { kind: kind?, line }]
        } else if self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn parse_loop_body(&mut self) -> PResult<Vec<Stmt>> {
        self.loops += 1;
        let body = self.parse_block();
        self.loops -= 1;
        body
    }

    fn parse_while(&mut self) -> PResult<StmtKind> {
        let test = self.parse_named_test()?;
        let body = self.parse_loop_body()?;
        let orelse = if self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::While { test, body, orelse })
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        let target = self.parse_target_list()?;
        self.check_target(&target)?;
        self.expect_kw("in")?;
        let iter = self.parse_testlist_star()?;
        let body = self.parse_loop_body()?;
        let orelse = if self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::For {
            target,
            iter,
            body,
            orelse,
        })
    }

    fn parse_def(&mut self, line: usize) -> PResult<StmtKind> {
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.parse_params(")", true)?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.parse_test()?;
        }
        let saved_loops = std::mem::replace(&mut self.loops, 0);
        self.functions += 1;
        let body = self.parse_block();
        self.functions -= 1;
        self.loops = saved_loops;
        Ok(StmtKind::FunctionDef(Rc::new(FunctionDef::new(
            name,
            params,
            FunctionBody::Block(body?),
            line,
        ))))
    }

    fn parse_params(&mut self, closing: &str, annotations: bool) -> PResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        let mut keyword_only = false;
        let mut seen_default = false;
        while !self.is_op(closing) {
            if self.eat_op("/") {
                if !self.eat_op(",") {
                    break;
                }
                continue;
            }
            let kind = if self.eat_op("**") {
                ParamKind::VarKeywords
            } else if self.eat_op("*") {
                keyword_only = true;
                if self.is_op(",") {
                    self.advance();
                    continue;
                }
                ParamKind::VarArgs
            } else if keyword_only {
                ParamKind::KeywordOnly
            } else {
                ParamKind::Positional
            };
            let name = self.expect_name()?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.error_msg(&format!(
                    "duplicate argument '{}' in function definition",
                    name
                )));
            }
            if annotations && self.eat_op(":") {
                self.parse_test()?;
            }
            let default = if matches!(kind, ParamKind::Positional | ParamKind::KeywordOnly)
                && self.eat_op("=")
            {
                Some(self.parse_test()?)
            } else {
                None
            };
            if kind == ParamKind::Positional {
                if default.is_some() {
                    seen_default = true;
                } else if seen_default {
                    return Err(
                        self.error_msg("non-default argument follows default argument")
                    );
                }
            }
            let last = kind == ParamKind::VarKeywords;
            params.push(Param {
                name,
                kind,
                default,
            });
            if !self.eat_op(",") || last {
                break;
            }
        }
        Ok(params)
    }

    fn parse_try(&mut self) -> PResult<StmtKind> {
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.is_kw("except") {
            let line = self.line();
            self.advance();
            let (kind, name) = if self.is_op(":") {
                (None, None)
            } else {
                let kind = self.parse_test()?;
                let name = if self.eat_kw("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let body = self.parse_block()?;
            handlers.push(ExceptHandler {
                kind,
                name,
                body,
                line,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error_msg("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    // ----- expressions ---------------------------------------------------

    /// Comma-separated expressions where `*x` is allowed; a trailing or
    /// separating comma makes a tuple.
    fn parse_testlist_star(&mut self) -> PResult<Expr> {
        let first = self.parse_star_or_test()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.starts_expression() {
                items.push(self.parse_star_or_test()?);
            } else {
                break;
            }
        }
        Ok(Expr::Tuple(items))
    }

    fn starts_expression(&self) -> bool {
        match self.peek() {
            Tok::Name(n) => {
                !KEYWORDS.contains(&n.as_str())
                    || matches!(n.as_str(), "None" | "True" | "False" | "not" | "lambda")
            }
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~" | "*"),
            _ => false,
        }
    }

    fn parse_star_or_test(&mut self) -> PResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.parse_bitor()?)))
        } else {
            self.parse_test()
        }
    }

    fn parse_star_or_named(&mut self) -> PResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.parse_bitor()?)))
        } else {
            self.parse_named_test()
        }
    }

    /// Loop and comprehension targets: bitwise-or level expressions, so the
    /// following `in` is not consumed as a comparison.
    fn parse_target_list(&mut self) -> PResult<Expr> {
        let first = self.parse_target_item()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_kw("in") || self.at_statement_end() {
                break;
            }
            items.push(self.parse_target_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_target_item(&mut self) -> PResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.parse_bitor()?)))
        } else {
            self.parse_bitor()
        }
    }

    fn parse_named_test(&mut self) -> PResult<Expr> {
        if let Some(name) = self.name_followed_by(":=") {
            self.advance();
            self.advance();
            let value = self.parse_test()?;
            return Ok(Expr::NamedExpr {
                name,
                value: Box::new(value),
            });
        }
        self.parse_test()
    }

    fn parse_test(&mut self) -> PResult<Expr> {
        self.enter()?;
        let result = self.parse_test_inner();
        self.leave();
        result
    }

    fn parse_test_inner(&mut self) -> PResult<Expr> {
        if self.eat_kw("lambda") {
            return self.parse_lambda();
        }
        let body = self.parse_or()?;
        if self.eat_kw("if") {
            let test = self.parse_or()?;
            self.expect_kw("else")?;
            let orelse = self.parse_test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        let line = self.line();
        let params = self.parse_params(":", false)?;
        self.expect_op(":")?;
        let saved_loops = std::mem::replace(&mut self.loops, 0);
        let body = self.parse_test();
        self.loops = saved_loops;
        Ok(Expr::Lambda(Rc::new(FunctionDef::new(
            "<lambda>".to_string(),
            params,
            FunctionBody::Lambda(Box::new(body?)),
            line,
        ))))
    }

    fn parse_bool_chain(&mut self, kw: &str, op: BoolOpKind) -> PResult<Expr> {
        let first = if op == BoolOpKind::Or {
            self.parse_bool_chain("and", BoolOpKind::And)?
        } else {
            self.parse_not()?
        };
        if !self.is_kw(kw) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(kw) {
            values.push(if op == BoolOpKind::Or {
                self.parse_bool_chain("and", BoolOpKind::And)?
            } else {
                self.parse_not()?
            });
        }
        Ok(Expr::BoolOp { op, values })
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        self.parse_bool_chain("or", BoolOpKind::Or)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            });
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let tok = self.peek().clone();
        let op = match &tok {
            Tok::Op("==") => CmpOp::Eq,
            Tok::Op("!=") => CmpOp::NotEq,
            Tok::Op("<") => CmpOp::Lt,
            Tok::Op("<=") => CmpOp::LtE,
            Tok::Op(">") => CmpOp::Gt,
            Tok::Op(">=") => CmpOp::GtE,
            Tok::Name(n) if n == "in" => CmpOp::In,
            Tok::Name(n) if n == "is" => {
                if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                    self.advance();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            Tok::Name(n) if n == "not" => {
                if matches!(self.peek_at(1), Tok::Name(m) if m == "in") {
                    self.advance();
                    CmpOp::NotIn
                } else {
                    return None;
                }
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare {
            left: Box::new(left),
            ops,
            comparators,
        })
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.parse_binary(0)
    }

    /// Left-associative binary operator levels, loosest first.
    fn parse_binary(&mut self, level: usize) -> PResult<Expr> {
        const LEVELS: &[&[(&str, BinOp)]] = &[
            &[("|", BinOp::BitOr)],
            &[("^", BinOp::BitXor)],
            &[("&", BinOp::BitAnd)],
            &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
            &[("+", BinOp::Add), ("-", BinOp::Sub)],
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
                ("@", BinOp::MatMul),
            ],
        ];
        if level >= LEVELS.len() {
            return self.parse_factor();
        }
        let mut left = self.parse_binary(level + 1)?;
        let mut chain = 0;
        loop {
            let op = match self.peek() {
                Tok::Op(sym) => LEVELS[level]
                    .iter()
                    .find(|(s, _)| s == sym)
                    .map(|(_, op)| *op),
                _ => None,
            };
            let op = match op {
                Some(op) => op,
                None => break,
            };
            self.advance();
            self.enter()?;
            chain += 1;
            let right = self.parse_binary(level + 1)?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        self.depth -= chain;
        Ok(left)
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            Tok::Op("~") => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_factor();
        self.leave();
        let operand = operand?;
        if let (UnaryOp::Neg, Expr::Constant(Value::Int(i))) = (op, &operand) {
            return Ok(Expr::Constant(Value::Int(-i)));
        }
        if let (UnaryOp::Neg, Expr::Constant(Value::Float(f))) = (op, &operand) {
            return Ok(Expr::Constant(Value::Float(-f)));
        }
        Ok(Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        if self.is_kw("await") {
            return Err(self.error_msg("'await' is not supported"));
        }
        let base = self.parse_primary()?;
        if self.eat_op("**") {
            self.enter()?;
            let exponent = self.parse_factor();
            self.leave();
            return Ok(Expr::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent?),
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_atom()?;
        let mut trailers = 0;
        loop {
            if self.eat_op("(") {
                let args = self.parse_call_args()?;
                self.expect_op(")")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat_op("[") {
                let index = self.parse_subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(".") {
                let attr = match self.advance() {
                    Tok::Name(n) => n,
                    _ => return Err(self.error()),
                };
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else {
                break;
            }
            self.enter()?;
            trailers += 1;
        }
        self.depth -= trailers;
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> PResult<Vec<Arg>> {
        let mut args = Vec::new();
        while !self.is_op(")") {
            if self.eat_op("**") {
                args.push(Arg::DoubleStarred(self.parse_test()?));
            } else if self.eat_op("*") {
                args.push(Arg::Starred(self.parse_test()?));
            } else if let Some(name) = self.name_followed_by("=") {
                self.advance();
                self.advance();
                args.push(Arg::Keyword(name, self.parse_test()?));
            } else {
                let value = self.parse_named_test()?;
                if self.is_kw("for") {
                    let generators = self.parse_comprehension()?;
                    args.push(Arg::Positional(Expr::GeneratorExp {
                        elt: Box::new(value),
                        generators,
                    }));
                } else {
                    if args
                        .iter()
                        .any(|a| matches!(a, Arg::Keyword(..) | Arg::DoubleStarred(_)))
                    {
                        return Err(self.error_msg(
                            "positional argument follows keyword argument",
                        ));
                    }
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(args)
    }

    fn parse_subscript(&mut self) -> PResult<Expr> {
        let first = self.parse_slice_item()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op("]") {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_slice_item(&mut self) -> PResult<Expr> {
        let lower = if self.is_op(":") {
            None
        } else {
            let e = self.parse_named_test()?;
            if !self.is_op(":") {
                return Ok(e);
            }
            Some(Box::new(e))
        };
        self.expect_op(":")?;
        let bound_ends = |p: &Parser| p.is_op(":") || p.is_op("]") || p.is_op(",");
        let upper = if bound_ends(self) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat_op(":") {
            if self.is_op("]") || self.is_op(",") {
                None
            } else {
                Some(Box::new(self.parse_test()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn parse_comprehension(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.parse_target_list()?;
            self.check_target(&target)?;
            self.expect_kw("in")?;
            let iter = self.parse_or()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.parse_or()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_atom(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.advance();
                match name.as_str() {
                    "None" => Ok(Expr::Constant(Value::None)),
                    "True" => Ok(Expr::Constant(Value::Bool(true))),
                    "False" => Ok(Expr::Constant(Value::Bool(false))),
                    "yield" => Err(self.error_msg("'yield' is not supported")),
                    n if KEYWORDS.contains(&n) => {
                        self.pos -= 1;
                        Err(self.error())
                    }
                    _ => Ok(Expr::Name(name)),
                }
            }
            Tok::Int(i) => {
                self.advance();
                Ok(Expr::Constant(Value::Int(i)))
            }
            Tok::Float(f) => {
                self.advance();
                Ok(Expr::Constant(Value::Float(f)))
            }
            Tok::Str(_) | Tok::FStr(_) => self.parse_strings(),
            Tok::Op("(") => {
                self.advance();
                self.enter()?;
                let result = self.parse_paren();
                self.leave();
                result
            }
            Tok::Op("[") => {
                self.advance();
                self.enter()?;
                let result = self.parse_list();
                self.leave();
                result
            }
            Tok::Op("{") => {
                self.advance();
                self.enter()?;
                let result = self.parse_brace();
                self.leave();
                result
            }
            Tok::Op("...") => Err(self.error_msg("Ellipsis is not supported")),
            _ => Err(self.error()),
        }
    }

    fn parse_paren(&mut self) -> PResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.parse_star_or_named()?;
        if self.is_kw("for") {
            let generators = self.parse_comprehension()?;
            self.expect_op(")")?;
            return Ok(Expr::GeneratorExp {
                elt: Box::new(first),
                generators,
            });
        }
        if self.eat_op(")") {
            if let Expr::Starred(_) = first {
                return Err(self.error_msg("cannot use starred expression here"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op(")") {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
    }

    fn parse_list(&mut self) -> PResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_star_or_named()?;
        if self.is_kw("for") {
            let generators = self.parse_comprehension()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                generators,
            });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op("]") {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn parse_brace(&mut self) -> PResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        if self.eat_op("**") {
            let spread = self.parse_bitor()?;
            return self.parse_dict_rest(vec![(None, spread)]);
        }
        let first = self.parse_star_or_named()?;
        if self.eat_op(":") {
            let value = self.parse_test()?;
            if self.is_kw("for") {
                let generators = self.parse_comprehension()?;
                self.expect_op("}")?;
                return Ok(Expr::DictComp {
                    key: Box::new(first),
                    value: Box::new(value),
                    generators,
                });
            }
            return self.parse_dict_rest(vec![(Some(first), value)]);
        }
        if self.is_kw("for") {
            let generators = self.parse_comprehension()?;
            self.expect_op("}")?;
            return Ok(Expr::SetComp {
                elt: Box::new(first),
                generators,
            });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op("}") {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        self.expect_op("}")?;
        Ok(Expr::Set(items))
    }

    fn parse_dict_rest(&mut self, mut entries: Vec<(Option<Expr>, Expr)>) -> PResult<Expr> {
        while self.eat_op(",") {
            if self.is_op("}") {
                break;
            }
            if self.eat_op("**") {
                entries.push((None, self.parse_bitor()?));
                continue;
            }
            let key = self.parse_test()?;
            self.expect_op(":")?;
            let value = self.parse_test()?;
            entries.push((Some(key), value));
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(entries))
    }

    /// Adjacent string literals concatenate; any f-string among them makes
    /// the whole run an f-string.
    fn parse_strings(&mut self) -> PResult<Expr> {
        let mut parts: Vec<FStrPart> = Vec::new();
        let mut plain = String::new();
        let mut has_fields = false;
        loop {
            let line = self.line();
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    plain.push_str(&s);
                }
                Tok::FStr(pieces) => {
                    self.advance();
                    for piece in pieces {
                        match piece {
                            FPiece::Lit(text) => plain.push_str(&text),
                            field => {
                                if !plain.is_empty() {
                                    parts.push(FStrPart::Lit(std::mem::take(&mut plain)));
                                }
                                has_fields = true;
                                parts.extend(self.convert_field(field, line)?);
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        if !has_fields {
            return Ok(Expr::Constant(Value::string(plain)));
        }
        if !plain.is_empty() {
            parts.push(FStrPart::Lit(plain));
        }
        Ok(Expr::FString(parts))
    }

    fn convert_field(&mut self, piece: FPiece, line: usize) -> PResult<Vec<FStrPart>> {
        let (source, conversion, spec, debug) = match piece {
            FPiece::Field {
                source,
                conversion,
                spec,
                debug,
            } => (source, conversion, spec, debug),
            FPiece::Lit(text) => return Ok(vec![FStrPart::Lit(text)]),
        };
        let expr = self.parse_fstring_expr(&source, line)?;
        let mut spec_parts = Vec::new();
        for p in spec {
            spec_parts.extend(self.convert_field(p, line)?);
        }
        let mut out = Vec::new();
        let mut conversion = conversion;
        if debug {
            out.push(FStrPart::Lit(format!("{}=", source)));
            if conversion.is_none() && spec_parts.is_empty() {
                conversion = Some('r');
            }
        }
        out.push(FStrPart::Field {
            expr: Box::new(expr),
            conversion,
            spec: spec_parts,
        });
        Ok(out)
    }

    fn parse_fstring_expr(&mut self, source: &str, line: usize) -> PResult<Expr> {
        let wrapped = format!("({})", source);
        let mut tokens = Lexer::new(&wrapped)
            .tokenize()
            .map_err(|_| syntax_error("f-string: invalid syntax", line))?;
        for t in &mut tokens {
            t.line += line - 1;
        }
        let mut sub = Parser::new(tokens, self.depth);
        let expr = sub.parse_atom()?;
        sub.eat(&Tok::Newline);
        if !sub.at(&Tok::Eof) {
            return Err(syntax_error("f-string: invalid syntax", line));
        }
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_stmt(src: &str) -> StmtKind {
        parse_module(src).unwrap().remove(0).kind
    }

    #[test]
    fn test_precedence() {
        match parse_expression("1 + 2 * 3 ** 2").unwrap() {
            Expr::BinOp { op, right, .. } => {
                assert_eq!(op, BinOp::Add);
                assert!(matches!(*right, Expr::BinOp { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        match parse_expression("-2 ** 2").unwrap() {
            Expr::UnaryOp { op, operand } => {
                assert_eq!(op, UnaryOp::Neg);
                assert!(matches!(*operand, Expr::BinOp { op: BinOp::Pow, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chained_assignment_and_unpacking() {
        match first_stmt("a = b, *c = 1, 2, 3\n") {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets.len(), 2);
                assert!(matches!(value, Expr::Tuple(ref items) if items.len() == 3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_function_with_all_param_kinds() {
        match first_stmt("def f(a, b=2, *args, c, d=4, **kw):\n    return a\n") {
            StmtKind::FunctionDef(def) => {
                let kinds: Vec<ParamKind> = def.params.iter().map(|p| p.kind).collect();
                assert_eq!(
                    kinds,
                    vec![
                        ParamKind::Positional,
                        ParamKind::Positional,
                        ParamKind::VarArgs,
                        ParamKind::KeywordOnly,
                        ParamKind::KeywordOnly,
                        ParamKind::VarKeywords,
                    ]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_comprehension_with_condition() {
        let expr = parse_expression("[x * x for x in range(10) if x % 2]").unwrap();
        match expr {
            Expr::ListComp { generators, .. } => assert_eq!(generators[0].ifs.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_statements_are_syntax_errors() {
        for src in ["class A:\n    pass\n", "with x:\n    pass\n", "@d\ndef f():\n    pass\n"] {
            let err = parse_module(src).unwrap_err();
            assert_eq!(err.kind, super::super::exception::ExcKind::SyntaxError);
        }
    }

    #[test]
    fn test_return_outside_function() {
        let err = parse_module("return 1\n").unwrap_err();
        assert!(err.message.contains("'return' outside function"));
    }

    #[test]
    fn test_import_parses() {
        assert!(matches!(first_stmt("import os\n"), StmtKind::Import(_)));
        assert!(matches!(
            first_stmt("from os import path as p\n"),
            StmtKind::Import(_)
        ));
    }

    /// Run `f` on a thread with the stack snippets get in production.
    fn on_snippet_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(crate::sandbox::config::SandboxConfig::default().stack_size)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let message = on_snippet_stack(|| {
            let src = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
            parse_module(&src).unwrap_err().message
        });
        assert!(message.contains("too many nested"));
    }

    #[test]
    fn test_long_operator_chain_is_rejected() {
        let rejected = on_snippet_stack(|| {
            let src = vec!["1"; 2000].join(" + ");
            parse_expression(&src).is_err()
        });
        assert!(rejected);
    }

    #[test]
    fn test_fstring_debug_field() {
        match parse_expression("f'{x=}'").unwrap() {
            Expr::FString(parts) => {
                assert!(matches!(&parts[0], FStrPart::Lit(s) if s == "x="));
                assert!(matches!(
                    &parts[1],
                    FStrPart::Field {
                        conversion: Some('r'),
                        ..
                    }
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_trailing_assignment_is_not_an_expression() {
        assert!(parse_expression("x = 1").is_err());
    }
}
