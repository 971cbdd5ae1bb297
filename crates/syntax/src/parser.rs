//! Recursive-descent parser producing an [`ast::Program`] from a token stream.

use std::fmt;

use crate::ast::*;
use crate::lexer::LexError;
use crate::token::{Token, TokenKind};
use crate::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: Position,
}

impl ParseError {
    pub fn from_lex(e: LexError) -> Self {
        Self {
            message: e.message,
            position: e.position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type PResult<T> = Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> PResult<Program> {
        let mut statements = Vec::new();
        while !self.at_eof() {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    // --- token stream helpers -------------------------------------------

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn position(&self) -> Position {
        self.tokens[self.pos].position
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", kind, self.peek())))
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected identifier, found {other:?}"))),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.position(),
        }
    }

    fn skip_semicolons(&mut self) {
        while self.eat(&TokenKind::Semicolon) {}
    }

    // --- statements -------------------------------------------------------

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        let stmt = match self.peek().clone() {
            TokenKind::Yar => self.parse_var_dec(false)?,
            TokenKind::If => self.parse_if()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::Foreach => self.parse_foreach()?,
            TokenKind::Func => Stmt::FuncDec(self.parse_func_dec()?),
            TokenKind::Struct => Stmt::StructDec(self.parse_struct_dec()?),
            TokenKind::Import => self.parse_import()?,
            TokenKind::Break => {
                let p = self.position();
                self.advance();
                Stmt::Break(p)
            }
            TokenKind::Continue => {
                let p = self.position();
                self.advance();
                Stmt::Continue(p)
            }
            TokenKind::Return => self.parse_return()?,
            TokenKind::Star => self.parse_indirect_assign()?,
            _ => self.parse_assignment_or_expr()?,
        };
        self.skip_semicolons();
        Ok(stmt)
    }

    /// A `yar` statement is one or more comma-joined declaration groups,
    /// each shaped `ident (, ident)* = expr (, expr)*`. `yar a = 1, b = 2.5`
    /// is two one-ident groups; `yar x, y = f(1, 2)` is a single two-ident
    /// group bound from one (possibly multi-return) value. Telling the two
    /// apart only needs one token of lookahead past each comma: if what
    /// follows is itself `ident (, ident)* =`, that comma starts a new
    /// group rather than continuing the current value list.
    fn parse_var_dec(&mut self, is_arg: bool) -> PResult<Stmt> {
        let position = self.position();
        self.expect(TokenKind::Yar)?;
        let mut idents = Vec::new();
        let mut values = Vec::new();
        'groups: loop {
            idents.push(self.expect_ident()?);
            while self.eat(&TokenKind::Comma) {
                idents.push(self.expect_ident()?);
            }
            self.expect(TokenKind::Assign)?;
            values.push(self.parse_expr()?);
            while self.check(&TokenKind::Comma) {
                if self.looks_like_decl_group(self.pos + 1) {
                    self.advance();
                    continue 'groups;
                }
                self.advance();
                values.push(self.parse_expr()?);
            }
            break;
        }
        Ok(Stmt::VarDec {
            idents,
            values,
            is_arg,
            position,
        })
    }

    /// Without consuming anything, check whether the tokens starting at
    /// `start` form `ident (, ident)* =`.
    fn looks_like_decl_group(&self, start: usize) -> bool {
        let mut i = start;
        if !matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Ident(_))) {
            return false;
        }
        i += 1;
        loop {
            match self.tokens.get(i).map(|t| &t.kind) {
                Some(TokenKind::Assign) => return true,
                Some(TokenKind::Comma) => {
                    if matches!(self.tokens.get(i + 1).map(|t| &t.kind), Some(TokenKind::Ident(_))) {
                        i += 2;
                    } else {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let position = self.position();
        self.expect(TokenKind::If)?;
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        let else_branch = self.parse_else_tail()?;
        Ok(Stmt::If {
            cond,
            body,
            else_branch,
            position,
        })
    }

    fn parse_else_tail(&mut self) -> PResult<Option<Box<Stmt>>> {
        if !self.eat(&TokenKind::Else) {
            return Ok(None);
        }
        let position = self.position();
        if self.eat(&TokenKind::If) {
            let cond = self.parse_expr()?;
            let body = self.parse_block()?;
            let else_branch = self.parse_else_tail()?;
            Ok(Some(Box::new(Stmt::Else {
                cond: Some(cond),
                body,
                else_branch,
                position,
            })))
        } else {
            let body = self.parse_block()?;
            Ok(Some(Box::new(Stmt::Else {
                cond: None,
                body,
                else_branch: None,
                position,
            })))
        }
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let position = self.position();
        self.expect(TokenKind::While)?;
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::While {
            cond,
            body,
            position,
        })
    }

    fn parse_foreach(&mut self) -> PResult<Stmt> {
        let position = self.position();
        self.expect(TokenKind::Foreach)?;
        let key_ident = self.expect_ident()?;
        self.expect(TokenKind::Comma)?;
        let value_ident = self.expect_ident()?;
        self.expect(TokenKind::Assign)?;
        let iterable = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::Foreach {
            key_ident,
            value_ident,
            iterable,
            body,
            position,
        })
    }

    fn parse_func_dec(&mut self) -> PResult<FuncDec> {
        let position = self.position();
        self.expect(TokenKind::Func)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.expect_ident()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(FuncDec {
            name,
            params,
            body,
            position,
        })
    }

    fn parse_struct_dec(&mut self) -> PResult<StructDec> {
        let position = self.position();
        self.expect(TokenKind::Struct)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Func) {
                let method = self.parse_func_dec()?;
                fields.push(StructFieldDecl {
                    name: method.name.clone(),
                    bits: None,
                    method: Some(method),
                });
            } else {
                let field_name = self.expect_ident()?;
                let bits = if self.eat(&TokenKind::Colon) {
                    let negative = self.eat(&TokenKind::Minus);
                    let width = match self.advance().kind {
                        TokenKind::Int(n) => n as i32,
                        other => {
                            return Err(
                                self.error(format!("expected bit width, found {other:?}"))
                            )
                        }
                    };
                    Some(if negative { -width } else { width })
                } else {
                    None
                };
                fields.push(StructFieldDecl {
                    name: field_name,
                    bits,
                    method: None,
                });
                self.eat(&TokenKind::Comma);
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(StructDec {
            name,
            fields,
            position,
        })
    }

    fn parse_import(&mut self) -> PResult<Stmt> {
        let position = self.position();
        self.expect(TokenKind::Import)?;
        let path = match self.advance().kind {
            TokenKind::Str(s) => s,
            TokenKind::Ident(s) => s,
            other => return Err(self.error(format!("expected import path, found {other:?}"))),
        };
        Ok(Stmt::Import { path, position })
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        let position = self.position();
        self.expect(TokenKind::Return)?;
        let mut values = Vec::new();
        if !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Semicolon) {
            loop {
                values.push(self.parse_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(Stmt::Return { values, position })
    }

    fn parse_indirect_assign(&mut self) -> PResult<Stmt> {
        let position = self.position();
        self.expect(TokenKind::Star)?;
        let ptr_expr = self.parse_unary()?;
        self.expect(TokenKind::Assign)?;
        let value = self.parse_expr()?;
        Ok(Stmt::IndirAssign {
            ptr_expr,
            value,
            position,
        })
    }

    /// Disambiguates plain expression statements (calls) from `target(,
    /// target)* = value(, value)*` assignment forms by parsing the leading
    /// expression list first and checking for `=`.
    fn parse_assignment_or_expr(&mut self) -> PResult<Stmt> {
        let position = self.position();
        let mut targets = vec![self.parse_expr()?];
        while self.eat(&TokenKind::Comma) {
            targets.push(self.parse_expr()?);
        }

        if !self.eat(&TokenKind::Assign) {
            return Ok(Stmt::Expr(
                targets
                    .into_iter()
                    .next()
                    .expect("at least one expression parsed"),
            ));
        }

        let mut values = vec![self.parse_expr()?];
        while self.eat(&TokenKind::Comma) {
            values.push(self.parse_expr()?);
        }

        if targets.len() == 1 {
            match &targets[0] {
                Expr::Index { .. } => {
                    return Ok(Stmt::SetIndex {
                        target: targets.into_iter().next().unwrap(),
                        value: values.into_iter().next().ok_or_else(|| {
                            self.error("assignment requires a value")
                        })?,
                        position,
                    });
                }
                Expr::Field { .. } => {
                    return Ok(Stmt::SetField {
                        target: targets.into_iter().next().unwrap(),
                        value: values.into_iter().next().ok_or_else(|| {
                            self.error("assignment requires a value")
                        })?,
                        position,
                    });
                }
                _ => {}
            }
        }

        let mut idents = Vec::with_capacity(targets.len());
        for target in targets {
            match target {
                Expr::Ident(name, _) => idents.push(name),
                other => {
                    return Err(self.error(format!(
                        "invalid assignment target {other:?}, expected identifier"
                    )))
                }
            }
        }
        Ok(Stmt::SetVar {
            targets: idents,
            values,
            position,
        })
    }

    // --- expressions --------------------------------------------------------

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            let position = self.position();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                position,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::And) {
            let position = self.position();
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
                position,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                TokenKind::Equals => BinOp::Equals,
                TokenKind::NotEquals => BinOp::NotEquals,
                _ => break,
            };
            let position = self.position();
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                position,
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_bitor()?;
        loop {
            let op = match self.peek() {
                TokenKind::Greater => BinOp::Greater,
                TokenKind::Less => BinOp::Less,
                TokenKind::GreaterEq => BinOp::GreaterEq,
                TokenKind::LessEq => BinOp::LessEq,
                _ => break,
            };
            let position = self.position();
            self.advance();
            let right = self.parse_bitor()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                position,
            };
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        let mut left = self.parse_additive()?;
        while self.check(&TokenKind::Pipe) {
            let position = self.position();
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::BinOp {
                op: BinOp::BitOr,
                left: Box::new(left),
                right: Box::new(right),
                position,
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let position = self.position();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                position,
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => break,
            };
            let position = self.position();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                position,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Minus) {
            let position = self.position();
            self.advance();
            let right = self.parse_unary()?;
            return Ok(Expr::Neg {
                right: Box::new(right),
                position,
            });
        }
        if self.check(&TokenKind::Amp) {
            let position = self.position();
            self.advance();
            let target = self.parse_unary()?;
            return Ok(Expr::PtrOf {
                target: Box::new(target),
                position,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            expr = match self.peek() {
                TokenKind::LBracket => {
                    let position = self.position();
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    Expr::Index {
                        target: Box::new(expr),
                        key: Box::new(key),
                        position,
                    }
                }
                TokenKind::Arrow | TokenKind::Dot => {
                    let position = self.position();
                    self.advance();
                    let name = self.expect_ident()?;
                    Expr::Field {
                        target: Box::new(expr),
                        name,
                        position,
                    }
                }
                TokenKind::LParen => {
                    let position = self.position();
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    Expr::Call {
                        callee: Box::new(expr),
                        args,
                        position,
                    }
                }
                _ => break,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let position = self.position();
        match self.peek().clone() {
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expr::Int(n, position))
            }
            TokenKind::Float(n) => {
                self.advance();
                Ok(Expr::Float(n, position))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s, position))
            }
            TokenKind::Bool(b) => {
                self.advance();
                Ok(Expr::Bool(b, position))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(name, position))
            }
            TokenKind::New => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(TokenKind::LBrace)?;
                let mut fields = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    let field_name = self.expect_ident()?;
                    self.expect(TokenKind::Colon)?;
                    let value = self.parse_expr()?;
                    fields.push(StructFieldInit {
                        name: field_name,
                        value,
                    });
                    self.eat(&TokenKind::Comma);
                }
                self.expect(TokenKind::RBrace)?;
                Ok(Expr::StructNew {
                    name,
                    fields,
                    position,
                })
            }
            TokenKind::LBracket => self.parse_map_literal(position),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }

    /// `[1, 2, 3]` (implicit integer keys) or `["a": 1, "b": 2]` (explicit
    /// keys); the two styles may be mixed, matching the original source's
    /// single `MapNode` representation.
    fn parse_map_literal(&mut self, position: Position) -> PResult<Expr> {
        self.expect(TokenKind::LBracket)?;
        let mut entries = Vec::new();
        let mut next_index = 0i64;
        while !self.check(&TokenKind::RBracket) {
            let first = self.parse_expr()?;
            let (key, value) = if self.eat(&TokenKind::Colon) {
                let value = self.parse_expr()?;
                (first, value)
            } else {
                let key = Expr::Int(next_index, first.position());
                next_index += 1;
                (key, first)
            };
            entries.push(MapEntry { key, value });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::Map {
            entries,
            bit_hint: None,
            position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lexer;

    fn parse(src: &str) -> Program {
        let tokens = Lexer::new(src).tokenize().unwrap();
        Parser::new(tokens).parse_program().unwrap()
    }

    #[test]
    fn parses_var_dec_with_addition() {
        let program = parse("yar a = 1, b = 2.5; print(a + b)");
        assert_eq!(program.statements.len(), 2);
        assert!(matches!(program.statements[0], Stmt::VarDec { .. }));
        assert!(matches!(program.statements[1], Stmt::Expr(Expr::Call { .. })));
    }

    #[test]
    fn parses_foreach_over_list_literal() {
        let program = parse("yar t = [1, 2, 3]; foreach k, v = t { print(k, v) }");
        assert!(matches!(program.statements[1], Stmt::Foreach { .. }));
    }

    #[test]
    fn parses_struct_decl_and_instance() {
        let program = parse("struct P { x, y } yar p = new P { x: 10, y: 20 }");
        assert!(matches!(program.statements[0], Stmt::StructDec(_)));
        if let Stmt::VarDec { values, .. } = &program.statements[1] {
            assert!(matches!(values[0], Expr::StructNew { .. }));
        } else {
            panic!("expected VarDec");
        }
    }

    #[test]
    fn parses_multi_value_return_and_assignment() {
        let program = parse("func f(a, b) { return b, a } yar x, y = f(1, 2)");
        if let Stmt::FuncDec(f) = &program.statements[0] {
            assert!(matches!(f.body[0], Stmt::Return { .. }));
        } else {
            panic!("expected FuncDec");
        }
        if let Stmt::VarDec { idents, values, .. } = &program.statements[1] {
            assert_eq!(idents, &["x".to_string(), "y".to_string()]);
            assert_eq!(values.len(), 1);
            assert!(matches!(values[0], Expr::Call { .. }));
        } else {
            panic!("expected VarDec");
        }
    }

    #[test]
    fn parses_chained_single_declarations() {
        let program = parse("yar a = 1, b = 2.5");
        if let Stmt::VarDec { idents, values, .. } = &program.statements[0] {
            assert_eq!(idents, &["a".to_string(), "b".to_string()]);
            assert_eq!(values.len(), 2);
        } else {
            panic!("expected VarDec");
        }
    }

    #[test]
    fn parses_pointer_and_indirect_assignment() {
        let program = parse("yar x = 7; yar p = &x; *p = 99");
        assert!(matches!(program.statements[2], Stmt::IndirAssign { .. }));
    }

    #[test]
    fn parses_nested_map_index() {
        let program = parse(r#"yar t = [["a": 1]]; print(t[0]["a"])"#);
        assert!(matches!(program.statements[0], Stmt::VarDec { .. }));
    }
}
