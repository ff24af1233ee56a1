use std::rc::Rc;

use crate::ast::{
    AssignOp, BinaryOp, Block, ExprKind, ExprRef, Expression, LogicalOp, Program, Statement,
    StmtKind, UnaryOp,
};
use crate::error::ParseError;
use crate::token::{Token, TokenKind};

/// Builds a program from a token sequence produced by the lexer.
pub fn parse(tokens: Vec<Token>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        debug_assert!(matches!(
            tokens.last().map(|token| &token.kind),
            Some(TokenKind::Eof)
        ));
        Self { tokens, pos: 0 }
    }

    fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while !self.at_eof() {
            if self.eat(TokenKind::Newline) {
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(Program {
            statements: statements.into(),
        })
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.current().kind {
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Def => self.parse_def(),
            TokenKind::Class => self.parse_class(),
            _ => self.parse_simple_statement(),
        }
    }

    /// Parses an `if` (or, recursively, an `elif` continuation). Elif chains
    /// desugar into nested `if` statements in the else branch.
    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        let line = self.line();
        self.advance(); // `if` or `elif`
        let condition = self.parse_expr_rc()?;
        self.expect(TokenKind::Colon, "':'")?;
        let then_body = self.parse_suite()?;

        let else_body: Block = if matches!(self.current().kind, TokenKind::Elif) {
            let nested = self.parse_if()?;
            Rc::from(vec![nested])
        } else if self.eat(TokenKind::Else) {
            self.expect(TokenKind::Colon, "':'")?;
            self.parse_suite()?
        } else {
            Rc::from(Vec::new())
        };

        Ok(Statement::new(
            StmtKind::If {
                condition,
                then_body,
                else_body,
            },
            line,
        ))
    }

    fn parse_while(&mut self) -> Result<Statement, ParseError> {
        let line = self.line();
        self.advance();
        let condition = self.parse_expr_rc()?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_suite()?;
        Ok(Statement::new(StmtKind::While { condition, body }, line))
    }

    fn parse_for(&mut self) -> Result<Statement, ParseError> {
        let line = self.line();
        self.advance();
        let var = self.expect_identifier("loop variable")?;
        self.expect(TokenKind::In, "'in'")?;
        let iterable = self.parse_expr_rc()?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_suite()?;
        Ok(Statement::new(
            StmtKind::For {
                var,
                iterable,
                body,
            },
            line,
        ))
    }

    fn parse_def(&mut self) -> Result<Statement, ParseError> {
        let line = self.line();
        self.advance();
        let name = self.expect_identifier("function name")?;
        self.expect(TokenKind::LParen, "'('")?;
        let params = self.parse_parameter_list()?;
        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_suite()?;
        Ok(Statement::new(StmtKind::FunctionDef { name, params, body }, line))
    }

    fn parse_class(&mut self) -> Result<Statement, ParseError> {
        let line = self.line();
        self.advance();
        let name = self.expect_identifier("class name")?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_suite()?;
        for statement in body.iter() {
            if !matches!(
                statement.kind,
                StmtKind::FunctionDef { .. } | StmtKind::Pass
            ) {
                return Err(ParseError::new(
                    statement.line,
                    "Class bodies may only contain method definitions and pass",
                ));
            }
        }
        Ok(Statement::new(StmtKind::ClassDef { name, body }, line))
    }

    fn parse_parameter_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        if matches!(self.current().kind, TokenKind::Identifier(_)) {
            loop {
                params.push(self.expect_identifier("parameter name")?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(params)
    }

    /// A suite is either a single simple statement on the same line as the
    /// governing colon, or NEWLINE INDENT statements DEDENT.
    fn parse_suite(&mut self) -> Result<Block, ParseError> {
        if self.eat(TokenKind::Newline) {
            self.expect(TokenKind::Indent, "an indented block")?;
            let mut statements = Vec::new();
            loop {
                if self.eat(TokenKind::Newline) {
                    continue;
                }
                if self.eat(TokenKind::Dedent) || self.at_eof() {
                    break;
                }
                statements.push(self.parse_statement()?);
            }
            Ok(statements.into())
        } else {
            let statement = self.parse_simple_statement()?;
            Ok(Rc::from(vec![statement]))
        }
    }

    fn parse_simple_statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.line();
        match self.current().kind {
            TokenKind::Return => {
                self.advance();
                let value = if matches!(self.current().kind, TokenKind::Newline | TokenKind::Eof) {
                    None
                } else {
                    Some(self.parse_expr_rc()?)
                };
                self.expect_end_of_statement()?;
                Ok(Statement::new(StmtKind::Return(value), line))
            }
            TokenKind::Break => {
                self.advance();
                self.expect_end_of_statement()?;
                Ok(Statement::new(StmtKind::Break, line))
            }
            TokenKind::Continue => {
                self.advance();
                self.expect_end_of_statement()?;
                Ok(Statement::new(StmtKind::Continue, line))
            }
            TokenKind::Pass => {
                self.advance();
                self.expect_end_of_statement()?;
                Ok(Statement::new(StmtKind::Pass, line))
            }
            TokenKind::Global => {
                self.advance();
                let mut names = vec![self.expect_identifier("variable name")?];
                while self.eat(TokenKind::Comma) {
                    names.push(self.expect_identifier("variable name")?);
                }
                self.expect_end_of_statement()?;
                Ok(Statement::new(StmtKind::Global(names), line))
            }
            TokenKind::Import => {
                self.advance();
                let name = self.expect_identifier("import name")?;
                let member = if self.eat(TokenKind::Dot) {
                    Some(self.expect_identifier("member name")?)
                } else {
                    None
                };
                self.expect_end_of_statement()?;
                Ok(Statement::new(StmtKind::Import { name, member }, line))
            }
            _ => self.parse_assignment_or_expression(line),
        }
    }

    /// An expression statement whose head is a plain variable immediately
    /// followed by an assignment operator is reinterpreted as an assignment.
    /// Plain `=` also accepts index and member targets.
    fn parse_assignment_or_expression(&mut self, line: usize) -> Result<Statement, ParseError> {
        let expr = self.parse_expression()?;

        let op = match self.current().kind {
            TokenKind::Equal => Some(AssignOp::Set),
            TokenKind::PlusEqual => Some(AssignOp::Add),
            TokenKind::MinusEqual => Some(AssignOp::Sub),
            TokenKind::StarEqual => Some(AssignOp::Mul),
            TokenKind::SlashEqual => Some(AssignOp::Div),
            _ => None,
        };

        let Some(op) = op else {
            self.expect_end_of_statement()?;
            return Ok(Statement::new(StmtKind::Expr(Rc::new(expr)), line));
        };
        self.advance();
        let value = self.parse_expr_rc()?;
        self.expect_end_of_statement()?;

        let kind = match (expr.kind, op) {
            (ExprKind::Variable(name), op) => StmtKind::Assign { name, op, value },
            (ExprKind::Index { object, index }, AssignOp::Set) => StmtKind::SetIndex {
                object,
                index,
                value,
            },
            (ExprKind::Member { object, name }, AssignOp::Set) => StmtKind::SetMember {
                object,
                name,
                value,
            },
            (_, AssignOp::Set) => {
                return Err(ParseError::new(line, "Invalid assignment target"));
            }
            _ => {
                return Err(ParseError::new(
                    line,
                    "Compound assignment requires a plain variable target",
                ));
            }
        };
        Ok(Statement::new(kind, line))
    }

    // ---- expressions, loosest binding first ----

    fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        if matches!(self.current().kind, TokenKind::Lambda) {
            let line = self.line();
            self.advance();
            let mut params = Vec::new();
            if matches!(self.current().kind, TokenKind::Identifier(_)) {
                loop {
                    params.push(self.expect_identifier("parameter name")?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::Colon, "':'")?;
            // The body parses at the `or` level to keep lambda lowest.
            let body = Rc::new(self.parse_or()?);
            return Ok(Expression::new(ExprKind::Lambda { params, body }, line));
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(TokenKind::Or) {
            let right = self.parse_and()?;
            let line = left.line;
            left = Expression::new(
                ExprKind::Logical {
                    left: Rc::new(left),
                    op: LogicalOp::Or,
                    right: Rc::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_not()?;
        while self.eat(TokenKind::And) {
            let right = self.parse_not()?;
            let line = left.line;
            left = Expression::new(
                ExprKind::Logical {
                    left: Rc::new(left),
                    op: LogicalOp::And,
                    right: Rc::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression, ParseError> {
        if matches!(self.current().kind, TokenKind::Not) {
            let line = self.line();
            self.advance();
            let operand = Rc::new(self.parse_not()?);
            return Ok(Expression::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand,
                },
                line,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_bit_or()?;
        loop {
            let op = match self.current().kind {
                TokenKind::EqualEqual => BinaryOp::Eq,
                TokenKind::BangEqual => BinaryOp::Ne,
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::LessEqual => BinaryOp::Le,
                TokenKind::GreaterEqual => BinaryOp::Ge,
                TokenKind::In => BinaryOp::In,
                TokenKind::Is => BinaryOp::Is,
                _ => break,
            };
            self.advance();
            let right = self.parse_bit_or()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_bit_or(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_bit_xor()?;
        while self.eat(TokenKind::Pipe) {
            let right = self.parse_bit_xor()?;
            left = binary(left, BinaryOp::BitOr, right);
        }
        Ok(left)
    }

    fn parse_bit_xor(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_bit_and()?;
        while self.eat(TokenKind::Caret) {
            let right = self.parse_bit_and()?;
            left = binary(left, BinaryOp::BitXor, right);
        }
        Ok(left)
    }

    fn parse_bit_and(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_shift()?;
        while self.eat(TokenKind::Amp) {
            let right = self.parse_shift()?;
            left = binary(left, BinaryOp::BitAnd, right);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Shl => BinaryOp::Shl,
                TokenKind::Shr => BinaryOp::Shr,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_exponent()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_exponent()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_exponent(&mut self) -> Result<Expression, ParseError> {
        let left = self.parse_unary()?;
        if self.eat(TokenKind::StarStar) {
            // Right-associative: 2 ** 3 ** 2 == 2 ** (3 ** 2).
            let right = self.parse_exponent()?;
            return Ok(binary(left, BinaryOp::Pow, right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        let op = match self.current().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Pos),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Not => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            let line = self.line();
            self.advance();
            let operand = Rc::new(self.parse_unary()?);
            return Ok(Expression::new(ExprKind::Unary { op, operand }, line));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.current().kind {
                TokenKind::LParen => {
                    let line = self.line();
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.current().kind, TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr_rc()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "')'")?;
                    expr = Expression::new(
                        ExprKind::Call {
                            callee: Rc::new(expr),
                            args,
                        },
                        line,
                    );
                }
                TokenKind::LBracket => {
                    let line = self.line();
                    self.advance();
                    expr = self.parse_index_or_slice(expr, line)?;
                }
                TokenKind::Dot => {
                    let line = self.line();
                    self.advance();
                    let name = self.expect_identifier("member name")?;
                    expr = Expression::new(
                        ExprKind::Member {
                            object: Rc::new(expr),
                            name,
                        },
                        line,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Parses the bracket suffix after `expr[`: a plain index or a slice with
    /// 0-3 optional colon-separated sub-expressions.
    fn parse_index_or_slice(
        &mut self,
        object: Expression,
        line: usize,
    ) -> Result<Expression, ParseError> {
        let start = if matches!(self.current().kind, TokenKind::Colon) {
            None
        } else {
            Some(self.parse_expr_rc()?)
        };

        if matches!(self.current().kind, TokenKind::RBracket) {
            self.advance();
            let Some(index) = start else {
                return Err(ParseError::new(line, "Expected an expression inside '[]'"));
            };
            return Ok(Expression::new(
                ExprKind::Index {
                    object: Rc::new(object),
                    index,
                },
                line,
            ));
        }

        self.expect(TokenKind::Colon, "':' or ']'")?;
        let stop = if matches!(self.current().kind, TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(self.parse_expr_rc()?)
        };
        let step = if self.eat(TokenKind::Colon) {
            if matches!(self.current().kind, TokenKind::RBracket) {
                None
            } else {
                Some(self.parse_expr_rc()?)
            }
        } else {
            None
        };
        self.expect(TokenKind::RBracket, "']'")?;
        Ok(Expression::new(
            ExprKind::Slice {
                object: Rc::new(object),
                start,
                stop,
                step,
            },
            line,
        ))
    }

    fn parse_atom(&mut self) -> Result<Expression, ParseError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expression::new(ExprKind::Number(value), token.line))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expression::new(ExprKind::Str(value), token.line))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::new(ExprKind::Bool(true), token.line))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::new(ExprKind::Bool(false), token.line))
            }
            TokenKind::NoneKw => {
                self.advance();
                Ok(Expression::new(ExprKind::Null, token.line))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expression::new(ExprKind::Variable(name), token.line))
            }
            TokenKind::LParen => {
                self.advance();
                self.parse_paren_form(token.line)
            }
            TokenKind::LBracket => {
                self.advance();
                self.parse_list_form(token.line)
            }
            TokenKind::LBrace => {
                self.advance();
                self.parse_dict_literal(token.line)
            }
            _ => Err(self.error("an expression")),
        }
    }

    /// `()` is an empty tuple, `(e)` is grouping, `(e,)` and `(a, b)` are
    /// tuples. Tuples share the list representation.
    fn parse_paren_form(&mut self, line: usize) -> Result<Expression, ParseError> {
        if self.eat(TokenKind::RParen) {
            return Ok(Expression::new(ExprKind::List(Vec::new()), line));
        }
        let first = self.parse_expression()?;
        if !matches!(self.current().kind, TokenKind::Comma) {
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(first);
        }

        let mut items = vec![Rc::new(first)];
        while self.eat(TokenKind::Comma) {
            if matches!(self.current().kind, TokenKind::RParen) {
                break;
            }
            items.push(self.parse_expr_rc()?);
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(Expression::new(ExprKind::List(items), line))
    }

    /// `[...]` is a list literal, or a single comprehension
    /// `[expr for var in iterable (if cond)?]`.
    fn parse_list_form(&mut self, line: usize) -> Result<Expression, ParseError> {
        if self.eat(TokenKind::RBracket) {
            return Ok(Expression::new(ExprKind::List(Vec::new()), line));
        }
        let first = self.parse_expr_rc()?;

        if self.eat(TokenKind::For) {
            let var = self.expect_identifier("comprehension variable")?;
            self.expect(TokenKind::In, "'in'")?;
            let iterable = self.parse_expr_rc()?;
            let filter = if self.eat(TokenKind::If) {
                Some(self.parse_expr_rc()?)
            } else {
                None
            };
            self.expect(TokenKind::RBracket, "']'")?;
            return Ok(Expression::new(
                ExprKind::ListComp {
                    element: first,
                    var,
                    iterable,
                    filter,
                },
                line,
            ));
        }

        let mut items = vec![first];
        while self.eat(TokenKind::Comma) {
            if matches!(self.current().kind, TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_expr_rc()?);
        }
        self.expect(TokenKind::RBracket, "']'")?;
        Ok(Expression::new(ExprKind::List(items), line))
    }

    fn parse_dict_literal(&mut self, line: usize) -> Result<Expression, ParseError> {
        let mut entries = Vec::new();
        if !matches!(self.current().kind, TokenKind::RBrace) {
            loop {
                let key = self.parse_expr_rc()?;
                self.expect(TokenKind::Colon, "':'")?;
                let value = self.parse_expr_rc()?;
                entries.push((key, value));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
                if matches!(self.current().kind, TokenKind::RBrace) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expression::new(ExprKind::Dict(entries), line))
    }

    // ---- token plumbing ----

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn line(&self) -> usize {
        self.current().line
    }

    fn at_eof(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) {
        if !self.at_eof() {
            self.pos += 1;
        }
    }

    /// Consumes the current token if it matches, for payload-free kinds.
    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.current().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(what))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String, ParseError> {
        if let TokenKind::Identifier(name) = &self.current().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error(what))
        }
    }

    fn expect_end_of_statement(&mut self) -> Result<(), ParseError> {
        if self.eat(TokenKind::Newline) || self.at_eof() {
            Ok(())
        } else {
            Err(self.error("newline"))
        }
    }

    fn error(&self, expected: &str) -> ParseError {
        ParseError::new(
            self.line(),
            format!("Expected {expected}, got {}", self.current().describe()),
        )
    }

    fn parse_expr_rc(&mut self) -> Result<ExprRef, ParseError> {
        self.parse_expression().map(Rc::new)
    }
}

fn binary(left: Expression, op: BinaryOp, right: Expression) -> Expression {
    let line = left.line;
    Expression::new(
        ExprKind::Binary {
            left: Rc::new(left),
            op,
            right: Rc::new(right),
        },
        line,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use indoc::indoc;

    fn parse_source(source: &str) -> Program {
        let tokens = tokenize(source).expect("tokenize should succeed");
        parse(tokens).expect("parse should succeed")
    }

    fn parse_error(source: &str) -> ParseError {
        let tokens = tokenize(source).expect("tokenize should succeed");
        parse(tokens).expect_err("expected parse failure")
    }

    #[test]
    fn parses_function_def_with_body() {
        let program = parse_source(indoc! {"
            def add(a, b):
                return a + b
            total = add(1, 2)
        "});
        assert_eq!(program.statements.len(), 2);
        let StmtKind::FunctionDef { name, params, body } = &program.statements[0].kind else {
            panic!("expected function definition");
        };
        assert_eq!(name, "add");
        assert_eq!(params, &["a".to_string(), "b".to_string()]);
        assert_eq!(body.len(), 1);
        assert!(matches!(
            program.statements[1].kind,
            StmtKind::Assign {
                op: AssignOp::Set,
                ..
            }
        ));
    }

    #[test]
    fn elif_chain_desugars_into_nested_if() {
        let program = parse_source(indoc! {"
            if a:
                x = 1
            elif b:
                x = 2
            else:
                x = 3
        "});
        let StmtKind::If { else_body, .. } = &program.statements[0].kind else {
            panic!("expected if statement");
        };
        assert_eq!(else_body.len(), 1);
        let StmtKind::If {
            else_body: inner_else,
            ..
        } = &else_body[0].kind
        else {
            panic!("expected nested if in else branch");
        };
        assert_eq!(inner_else.len(), 1);
    }

    #[test]
    fn inline_suite_accepts_single_simple_statement() {
        let program = parse_source("if x: y = 1\n");
        let StmtKind::If { then_body, .. } = &program.statements[0].kind else {
            panic!("expected if statement");
        };
        assert!(matches!(then_body[0].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn exponentiation_is_right_associative() {
        let program = parse_source("x = 2 ** 3 ** 2\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { right, .. } = &value.kind else {
            panic!("expected binary expression");
        };
        // The right operand is itself 3 ** 2.
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Pow,
                ..
            }
        ));
    }

    #[test]
    fn multiplication_binds_looser_than_exponent() {
        let program = parse_source("x = 2 * 3 ** 2\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn parses_comprehension_with_filter() {
        let program = parse_source("squares = [x * x for x in values if x > 0]\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::ListComp { var, filter, .. } = &value.kind else {
            panic!("expected comprehension");
        };
        assert_eq!(var, "x");
        assert!(filter.is_some());
    }

    #[test]
    fn lambda_body_extends_to_or_level() {
        let program = parse_source("f = lambda a, b: a + b or a\n");
        let StmtKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Lambda { params, body } = &value.kind else {
            panic!("expected lambda");
        };
        assert_eq!(params.len(), 2);
        assert!(matches!(
            body.kind,
            ExprKind::Logical {
                op: LogicalOp::Or,
                ..
            }
        ));
    }

    #[test]
    fn parenthesized_forms() {
        let program = parse_source("a = ()\nb = (1)\nc = (1,)\nd = (1, 2)\n");
        let values: Vec<_> = program
            .statements
            .iter()
            .map(|statement| {
                let StmtKind::Assign { value, .. } = &statement.kind else {
                    panic!("expected assignment");
                };
                &value.kind
            })
            .collect();
        assert!(matches!(values[0], ExprKind::List(items) if items.is_empty()));
        assert!(matches!(values[1], ExprKind::Number(_)));
        assert!(matches!(values[2], ExprKind::List(items) if items.len() == 1));
        assert!(matches!(values[3], ExprKind::List(items) if items.len() == 2));
    }

    #[test]
    fn parses_slice_variants() {
        let program = parse_source("a = xs[2:5]\nb = xs[:3]\nc = xs[7:]\nd = xs[::2]\n");
        for statement in program.statements.iter() {
            let StmtKind::Assign { value, .. } = &statement.kind else {
                panic!("expected assignment");
            };
            assert!(matches!(value.kind, ExprKind::Slice { .. }));
        }
    }

    #[test]
    fn index_and_member_assignment_targets() {
        let program = parse_source("xs[0] = 1\nbox.value = 2\n");
        assert!(matches!(
            program.statements[0].kind,
            StmtKind::SetIndex { .. }
        ));
        assert!(matches!(
            program.statements[1].kind,
            StmtKind::SetMember { .. }
        ));
    }

    #[test]
    fn rejects_compound_assignment_to_index() {
        let err = parse_error("xs[0] += 1\n");
        assert!(err.message.contains("plain variable"));
    }

    #[test]
    fn rejects_statement_in_class_body() {
        let err = parse_error(indoc! {"
            class Box:
                x = 1
        "});
        assert!(err.message.contains("method definitions"));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn reports_unexpected_token_with_line() {
        let err = parse_error("x = + \ny = 1\n");
        assert_eq!(err.line, 1);
        assert!(err.message.contains("Expected an expression"));
    }

    #[test]
    fn global_statement_accepts_name_list() {
        let program = parse_source("global a, b\n");
        assert!(matches!(
            &program.statements[0].kind,
            StmtKind::Global(names) if names.len() == 2
        ));
    }

    #[test]
    fn import_with_member() {
        let program = parse_source("import Items.wood\n");
        let StmtKind::Import { name, member } = &program.statements[0].kind else {
            panic!("expected import");
        };
        assert_eq!(name, "Items");
        assert_eq!(member.as_deref(), Some("wood"));
    }
}
