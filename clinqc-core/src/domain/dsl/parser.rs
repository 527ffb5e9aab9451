// clinqc-core/src/domain/dsl/parser.rs

use crate::domain::dsl::ast::{BinaryOp, Expr, ToleranceKind, UnaryOp};
use crate::domain::dsl::token::{SyntaxError, Token, TokenKind, tokenize};
use crate::domain::value::Value;

/// Parse rule text into an AST. Pure function of the text: no schema lookup,
/// no evaluation-time state, and no escape to host-code execution — the
/// grammar below is everything the language can express.
///
/// Operator precedence (loosest to tightest), documented here because the
/// grammar mixes boolean and arithmetic operators:
///
/// ```text
///   or  <  and  <  not  <  comparison / between / in / within  <  + -  <  * /  <  unary -
/// ```
///
/// Comparisons are non-associative (`a < b < c` is a syntax error).
///
/// `target_field` is the field the rule guards: it decides whether a bare
/// identifier is a `FieldRef` (the target itself) or a `CrossFieldRef`
/// (a sibling field), and what `required` applies to.
pub fn parse(rule_text: &str, target_field: &str) -> Result<Expr, SyntaxError> {
    let tokens = tokenize(rule_text)?;
    let mut parser = Parser {
        src: rule_text,
        tokens,
        pos: 0,
        target: target_field,
    };
    let expr = parser.parse_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(SyntaxError::new(
            "unexpected trailing input",
            tok.offset,
            tok.text.clone(),
        ));
    }
    Ok(expr)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    target: &'a str,
}

impl<'a> Parser<'a> {
    // --- EXPRESSION LEVELS ---

    fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::BinaryOp {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let rhs = self.parse_not()?;
            lhs = Expr::BinaryOp {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(&TokenKind::Not) {
            let inner = self.parse_not()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                expr: Box::new(inner),
            });
        }
        self.parse_predicate()
    }

    /// One predicate: `required`, a conditional, or an arithmetic operand
    /// followed by an optional comparison / between / in / within tail.
    fn parse_predicate(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(&TokenKind::Required) {
            return Ok(Expr::Required);
        }
        if self.eat(&TokenKind::If) {
            return self.parse_conditional();
        }

        let lhs = self.parse_additive()?;

        // Comparison tail (non-associative)
        if let Some(op) = self.peek_comparison() {
            self.pos += 1;
            let rhs = self.parse_additive()?;
            return Ok(Expr::BinaryOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }

        if self.eat(&TokenKind::Between) {
            let low = self.parse_additive()?;
            self.expect(&TokenKind::And, "expected 'and' in 'between X and Y'")?;
            let high = self.parse_additive()?;
            return Ok(Expr::Range {
                expr: Box::new(lhs),
                low: Box::new(low),
                high: Box::new(high),
            });
        }

        if self.eat(&TokenKind::In) {
            return self.parse_membership(lhs);
        }

        if self.eat(&TokenKind::Within) {
            return self.parse_tolerance(lhs);
        }

        // Bare operand: legal when it is a parenthesized boolean group,
        // e.g. `(age > 18) and (bmi < 30)`.
        Ok(lhs)
    }

    fn parse_conditional(&mut self) -> Result<Expr, SyntaxError> {
        let condition = self.parse_expr()?;
        self.expect(&TokenKind::Then, "expected 'then' after 'if' condition")?;
        let then_branch = self.parse_expr()?;
        let else_branch = if self.eat(&TokenKind::Else) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect(&TokenKind::EndIf, "unterminated 'if' (missing 'endif')")?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch,
        })
    }

    fn parse_membership(&mut self, lhs: Expr) -> Result<Expr, SyntaxError> {
        self.expect(&TokenKind::LParen, "expected '(' after 'in'")?;
        let mut list = Vec::new();
        loop {
            list.push(self.parse_literal_value()?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RParen, "unmatched '(' in membership list")?;
            break;
        }
        Ok(Expr::ListMembership {
            expr: Box::new(lhs),
            list,
        })
    }

    fn parse_tolerance(&mut self, lhs: Expr) -> Result<Expr, SyntaxError> {
        let tok = self.next().cloned();
        let amount = match tok {
            Some(Token {
                kind: TokenKind::Number(n),
                ..
            }) => n,
            other => return Err(self.unexpected(other, "expected a number after 'within'")),
        };

        let kind = if self.eat(&TokenKind::Percent) {
            ToleranceKind::Percent
        } else if self.eat(&TokenKind::Days) {
            ToleranceKind::Days
        } else {
            let tok = self.peek().cloned();
            return Err(self.unexpected(tok, "expected '%' or 'days' in tolerance expression"));
        };

        self.expect(&TokenKind::Of, "expected 'of' in tolerance expression")?;
        let baseline = self.parse_additive()?;

        Ok(Expr::Tolerance {
            kind,
            current: Box::new(lhs),
            amount,
            baseline: Box::new(baseline),
        })
    }

    // --- ARITHMETIC LEVELS ---

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.eat(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::BinaryOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.eat(&TokenKind::Slash) {
                BinaryOp::Div
            } else {
                break;
            };
            let rhs = self.parse_unary()?;
            lhs = Expr::BinaryOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(&TokenKind::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Neg,
                expr: Box::new(inner),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let tok = match self.next().cloned() {
            Some(t) => t,
            None => return Err(self.eof("expected an expression")),
        };

        match tok.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "unmatched '('")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                // Function call: ident '(' args ')'
                if self.eat(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_additive()?);
                            if self.eat(&TokenKind::Comma) {
                                continue;
                            }
                            self.expect(&TokenKind::RParen, "unmatched '(' in function call")?;
                            break;
                        }
                    }
                    return Ok(Expr::FunctionCall { name, args });
                }

                // Cross-visit reference: ident '@' ident
                if self.eat(&TokenKind::At) {
                    let tok = self.next().cloned();
                    let visit = match tok {
                        Some(Token {
                            kind: TokenKind::Ident(v),
                            ..
                        }) => v,
                        other => {
                            return Err(self.unexpected(other, "expected a visit code after '@'"));
                        }
                    };
                    return Ok(Expr::CrossVisitRef { field: name, visit });
                }

                if name == self.target {
                    Ok(Expr::FieldRef(name))
                } else {
                    Ok(Expr::CrossFieldRef(name))
                }
            }
            _ => Err(SyntaxError::new(
                "expected a value, field name or '('",
                tok.offset,
                tok.text,
            )),
        }
    }

    fn parse_literal_value(&mut self) -> Result<Value, SyntaxError> {
        let negative = self.eat(&TokenKind::Minus);
        let tok = match self.next().cloned() {
            Some(t) => t,
            None => return Err(self.eof("expected a literal")),
        };
        match tok.kind {
            TokenKind::Number(n) => Ok(Value::Number(if negative { -n } else { n })),
            TokenKind::Str(s) if !negative => Ok(Value::Text(s)),
            _ => Err(SyntaxError::new(
                "membership lists only accept literals",
                tok.offset,
                tok.text,
            )),
        }
    }

    // --- TOKEN HELPERS ---

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|t| &t.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, msg: &str) -> Result<(), SyntaxError> {
        if self.eat(kind) {
            Ok(())
        } else {
            let tok = self.peek().cloned();
            Err(self.unexpected(tok, msg))
        }
    }

    fn peek_comparison(&self) -> Option<BinaryOp> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Eq) => Some(BinaryOp::Eq),
            Some(TokenKind::Ne) => Some(BinaryOp::Ne),
            Some(TokenKind::Lt) => Some(BinaryOp::Lt),
            Some(TokenKind::Le) => Some(BinaryOp::Le),
            Some(TokenKind::Gt) => Some(BinaryOp::Gt),
            Some(TokenKind::Ge) => Some(BinaryOp::Ge),
            _ => None,
        }
    }

    fn unexpected(&self, tok: Option<Token>, msg: &str) -> SyntaxError {
        match tok {
            Some(t) => SyntaxError::new(msg, t.offset, t.text),
            None => self.eof(msg),
        }
    }

    fn eof(&self, msg: &str) -> SyntaxError {
        SyntaxError::new(
            format!("{} (unexpected end of rule)", msg),
            self.src.len(),
            "<end>",
        )
    }
}
