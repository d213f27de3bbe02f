//! Claims expression language
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | primary
//! primary := "(" expr ")" | "true" | "false" | call
//! call    := IDENT "(" [STRING ("," STRING)*] ")"
//! ```
//!
//! Strings use double or single quotes with `\` escapes. The available
//! functions are `jwtHasScope`, `jwtHasAudience`, `jwtHasIssuer`,
//! `jwtHasSubject`, `jwtHasClaim` (one argument each) and `jwtClaimEquals`
//! (claim name and expected value).

use super::{ClaimsPredicate, ClaimsRuleCompiler, RuleCompileError};
use crate::jwt::Claims;
use std::fmt;
use std::sync::Arc;

/// A check against one claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimCheck {
    /// `jwtHasScope(scope)`
    HasScope(String),
    /// `jwtHasAudience(audience)`
    HasAudience(String),
    /// `jwtHasIssuer(issuer)`
    HasIssuer(String),
    /// `jwtHasSubject(subject)`
    HasSubject(String),
    /// `jwtHasClaim(name)`
    HasClaim(String),
    /// `jwtClaimEquals(name, value)`
    ClaimEquals(String, String),
}

impl ClaimCheck {
    fn evaluate(&self, claims: &Claims) -> bool {
        match self {
            Self::HasScope(scope) => claims.has_scope(scope),
            Self::HasAudience(audience) => claims.has_audience(audience),
            Self::HasIssuer(issuer) => claims.iss == *issuer,
            Self::HasSubject(subject) => claims.sub == *subject,
            Self::HasClaim(name) => claims.has_claim(name),
            Self::ClaimEquals(name, value) => claims.claim_equals(name, value),
        }
    }
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// `true` or `false`
    Const(bool),
    /// `!expr`
    Not(Box<Expr>),
    /// `a && b && ...`, at least two operands
    And(Vec<Expr>),
    /// `a || b || ...`, at least two operands
    Or(Vec<Expr>),
    /// Function call
    Check(ClaimCheck),
}

impl Expr {
    /// Evaluate against verified claims
    #[must_use]
    pub fn evaluate(&self, claims: &Claims) -> bool {
        match self {
            Self::Const(value) => *value,
            Self::Not(inner) => !inner.evaluate(claims),
            Self::And(operands) => operands.iter().all(|expr| expr.evaluate(claims)),
            Self::Or(operands) => operands.iter().any(|expr| expr.evaluate(claims)),
            Self::Check(check) => check.evaluate(claims),
        }
    }

    /// Parse an expression.
    ///
    /// # Errors
    ///
    /// [`RuleCompileError`] with the byte offset of the first problem.
    pub fn parse(source: &str) -> Result<Self, RuleCompileError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(RuleCompileError::new(0, "empty expression"));
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: source.len(),
            depth: 0,
        };
        let expr = parser.or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(RuleCompileError::new(
                token.offset,
                format!("unexpected {}", token.kind),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Str(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "identifier {name}"),
            Self::Str(value) => write!(f, "string {value:?}"),
            Self::And => f.write_str("'&&'"),
            Self::Or => f.write_str("'||'"),
            Self::Not => f.write_str("'!'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Comma => f.write_str("','"),
        }
    }
}

#[derive(Debug, Clone)]
struct Lexeme {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(source: &str) -> Result<Vec<Lexeme>, RuleCompileError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let kind = match c {
            c if c.is_whitespace() => continue,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '!' => TokenKind::Not,
            '&' | '|' => {
                if chars.next_if(|&(_, next)| next == c).is_none() {
                    return Err(RuleCompileError::new(offset, format!("expected '{c}{c}'")));
                }
                if c == '&' { TokenKind::And } else { TokenKind::Or }
            }
            '"' | '\'' => {
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        q if q == c => {
                            closed = true;
                            break;
                        }
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(RuleCompileError::new(offset, "unterminated string"));
                }
                TokenKind::Str(value)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some((_, next)) =
                    chars.next_if(|&(_, next)| next.is_ascii_alphanumeric() || next == '_')
                {
                    ident.push(next);
                }
                TokenKind::Ident(ident)
            }
            other => {
                return Err(RuleCompileError::new(
                    offset,
                    format!("unexpected character {other:?}"),
                ));
            }
        };
        tokens.push(Lexeme { kind, offset });
    }

    Ok(tokens)
}

/// Deepest nesting of `!` and parentheses accepted by the parser
pub const MAX_NESTING: usize = 64;

struct Parser<'t> {
    tokens: &'t [Lexeme],
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Lexeme> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Lexeme> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|token| token.kind == *kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), RuleCompileError> {
        if self.eat(kind) {
            return Ok(());
        }
        Err(self.error_here(format!("expected {kind}")))
    }

    fn error_here(&self, message: impl Into<String>) -> RuleCompileError {
        let offset = self.peek().map_or(self.end, |token| token.offset);
        RuleCompileError::new(offset, message)
    }

    /// Enter one level of `!` or parentheses
    fn nest(&mut self, offset: usize) -> Result<(), RuleCompileError> {
        if self.depth == MAX_NESTING {
            return Err(RuleCompileError::new(
                offset,
                format!("expression nested deeper than {MAX_NESTING} levels"),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, RuleCompileError> {
        let mut operands = vec![self.and()?];
        while self.eat(&TokenKind::Or) {
            operands.push(self.and()?);
        }
        Ok(flatten(operands, Expr::Or))
    }

    fn and(&mut self) -> Result<Expr, RuleCompileError> {
        let mut operands = vec![self.unary()?];
        while self.eat(&TokenKind::And) {
            operands.push(self.unary()?);
        }
        Ok(flatten(operands, Expr::And))
    }

    fn unary(&mut self) -> Result<Expr, RuleCompileError> {
        let Some(offset) = self
            .peek()
            .filter(|token| token.kind == TokenKind::Not)
            .map(|token| token.offset)
        else {
            return self.primary();
        };
        self.nest(offset)?;
        self.pos += 1;
        let inner = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Not(Box::new(inner)))
    }

    fn primary(&mut self) -> Result<Expr, RuleCompileError> {
        let Some(token) = self.next().cloned() else {
            return Err(self.error_here("unexpected end of expression"));
        };
        match token.kind {
            TokenKind::LParen => {
                self.nest(token.offset)?;
                let expr = self.or()?;
                self.expect(&TokenKind::RParen)?;
                self.depth -= 1;
                Ok(expr)
            }
            TokenKind::Ident(name) if name == "true" => Ok(Expr::Const(true)),
            TokenKind::Ident(name) if name == "false" => Ok(Expr::Const(false)),
            TokenKind::Ident(name) => self.call(&name, token.offset),
            other => Err(RuleCompileError::new(token.offset, format!("unexpected {other}"))),
        }
    }

    fn call(&mut self, name: &str, offset: usize) -> Result<Expr, RuleCompileError> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                match self.peek().map(|token| token.kind.clone()) {
                    Some(TokenKind::Str(value)) => {
                        self.pos += 1;
                        args.push(value);
                    }
                    _ => return Err(self.error_here("expected string argument")),
                }
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(&TokenKind::Comma)?;
            }
        }

        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(RuleCompileError::new(
                    offset,
                    format!("{name} takes {expected} argument(s), got {}", args.len()),
                ))
            }
        };

        let check = match name {
            "jwtHasScope" => arity(1).map(|()| ClaimCheck::HasScope(args[0].clone())),
            "jwtHasAudience" => arity(1).map(|()| ClaimCheck::HasAudience(args[0].clone())),
            "jwtHasIssuer" => arity(1).map(|()| ClaimCheck::HasIssuer(args[0].clone())),
            "jwtHasSubject" => arity(1).map(|()| ClaimCheck::HasSubject(args[0].clone())),
            "jwtHasClaim" => arity(1).map(|()| ClaimCheck::HasClaim(args[0].clone())),
            "jwtClaimEquals" => {
                arity(2).map(|()| ClaimCheck::ClaimEquals(args[0].clone(), args[1].clone()))
            }
            unknown => Err(RuleCompileError::new(
                offset,
                format!("unknown function {unknown}"),
            )),
        }?;
        Ok(Expr::Check(check))
    }
}

fn flatten(mut operands: Vec<Expr>, join: fn(Vec<Expr>) -> Expr) -> Expr {
    if operands.len() == 1 {
        if let Some(only) = operands.pop() {
            return only;
        }
    }
    join(operands)
}

/// A compiled expression, keeping its source for diagnostics.
pub struct CompiledExpression {
    source: String,
    expr: Expr,
}

impl CompiledExpression {
    /// Source text
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed tree
    #[must_use]
    pub const fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledExpression").field(&self.source).finish()
    }
}

impl ClaimsPredicate for CompiledExpression {
    fn evaluate(&self, claims: &Claims) -> bool {
        self.expr.evaluate(claims)
    }
}

/// The built-in compiler for the expression language above.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClaimsRuleCompiler;

impl ClaimsRuleCompiler for DefaultClaimsRuleCompiler {
    fn compile(&self, expression: &str) -> Result<Arc<dyn ClaimsPredicate>, RuleCompileError> {
        let expr = Expr::parse(expression)?;
        Ok(Arc::new(CompiledExpression {
            source: expression.to_string(),
            expr,
        }))
    }
}
