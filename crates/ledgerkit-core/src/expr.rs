//! Value expressions.
//!
//! Expressions appear in journals as computed posting amounts `(…)`,
//! balance assertions, `assert`/`check` directives, automated-transaction
//! predicates and `define` directives. The grammar, loosest binding first:
//!
//! ```text
//! name = expr                     definition (left side must be a name)
//! cond ? a : b
//! a | b    a or b
//! a & b    a and b
//! a == b   a != b   a < b   a <= b   a > b   a >= b   a =~ /re/   a !~ /re/
//! a + b    a - b
//! a * b    a / b
//! -a   !a   not a
//! literals: amounts, "strings", [dates], /regexps/, true, false
//! names, calls f(a, b), (groups)
//! ```
//!
//! Names are resolved against a [`Scope`] at evaluation time; a handful of
//! numeric helpers (`abs`, `quantity`, `commodity`, `floor`, `ceiling`,
//! `roundto`, `truncated`, `rounded`, `unrounded`, `str`) are built in.

use regex::{Regex, RegexBuilder};
use std::fmt;
use std::rc::Rc;

use crate::amount::{Amount, ParseFlags};
use crate::error::{ExprError, ExprResult};
use crate::pool::CommodityPool;
use crate::scope::{Scope, Symbol, SymbolKind};
use crate::times;
use crate::value::Value;

const LITERAL_FLAGS: ParseFlags = ParseFlags::NO_MIGRATE
    .union(ParseFlags::NO_REDUCE)
    .union(ParseFlags::SOFT_FAIL)
    .union(ParseFlags::NO_ANNOT);

const KEYWORDS: &[&str] = &["and", "or", "not", "true", "false", "div"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Node {
    Literal(Value),
    Ident(String),
    Call(String, Vec<Node>),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Match {
        negate: bool,
        target: Box<Node>,
        mask: Box<Node>,
    },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Ternary(Box<Node>, Box<Node>, Box<Node>),
    Define(String, Rc<Expr>),
}

/// A parsed expression.
#[derive(Debug, Clone)]
pub struct Expr {
    text: String,
    root: Node,
}

impl Expr {
    /// Parse the whole of `text`.
    pub fn parse(text: &str, pool: &CommodityPool) -> ExprResult<Self> {
        let mut parser = Parser::new(text, pool);
        let root = parser.parse_assign()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(ExprError::Syntax(format!(
                "Unexpected text after expression: '{}'",
                parser.rest()
            )));
        }
        Ok(Self {
            text: text.trim().to_string(),
            root,
        })
    }

    /// Parse one parenthesized group at the start of `text`, returning the
    /// unread remainder.
    pub fn parse_single<'a>(text: &'a str, pool: &CommodityPool) -> ExprResult<(Self, &'a str)> {
        let mut parser = Parser::new(text, pool);
        parser.skip_ws();
        if parser.peek() != Some('(') {
            return Err(ExprError::Syntax("Expected '(' to begin expression".to_string()));
        }
        let start = parser.pos;
        let root = parser.parse_primary()?;
        let consumed = &text[start..parser.pos];
        Ok((
            Self {
                text: consumed.to_string(),
                root,
            },
            &text[parser.pos..],
        ))
    }

    /// The source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Evaluate against `scope`.
    pub fn calc(&self, scope: &dyn Scope) -> ExprResult<Value> {
        eval(&self.root, scope)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

struct Parser<'a, 'p> {
    src: &'a str,
    pos: usize,
    pool: &'p CommodityPool,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn syntax(message: impl Into<String>) -> ExprError {
    ExprError::Syntax(message.into())
}

impl<'a, 'p> Parser<'a, 'p> {
    const fn new(src: &'a str, pool: &'p CommodityPool) -> Self {
        Self { src, pos: 0, pool }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    /// Consume `word` only when it is a whole word.
    fn eat_keyword(&mut self, word: &str) -> bool {
        self.skip_ws();
        let rest = self.rest();
        if rest.starts_with(word) && !rest[word.len()..].starts_with(is_ident_char) {
            self.pos += word.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: char) -> ExprResult<()> {
        self.skip_ws();
        if self.peek() == Some(token) {
            self.pos += token.len_utf8();
            Ok(())
        } else {
            Err(syntax(format!("Missing '{token}'")))
        }
    }

    fn parse_assign(&mut self) -> ExprResult<Node> {
        let node = self.parse_ternary()?;
        self.skip_ws();
        let rest = self.rest();
        if rest.starts_with('=') && !rest.starts_with("==") && !rest.starts_with("=~") {
            self.pos += 1;
            if let Node::Ident(name) = node {
                self.skip_ws();
                let start = self.pos;
                let value = self.parse_assign()?;
                let text = self.src[start..self.pos].trim().to_string();
                return Ok(Node::Define(name, Rc::new(Expr { text, root: value })));
            }
            let right = self.parse_ternary()?;
            return Ok(Node::Binary(BinOp::Eq, Box::new(node), Box::new(right)));
        }
        Ok(node)
    }

    fn parse_ternary(&mut self) -> ExprResult<Node> {
        let cond = self.parse_or()?;
        if self.eat("?") {
            let then = self.parse_ternary()?;
            self.expect(':')?;
            let otherwise = self.parse_ternary()?;
            return Ok(Node::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)));
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> ExprResult<Node> {
        let mut node = self.parse_and()?;
        loop {
            if self.eat("||") || self.eat("|") || self.eat_keyword("or") {
                let right = self.parse_and()?;
                node = Node::Or(Box::new(node), Box::new(right));
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_and(&mut self) -> ExprResult<Node> {
        let mut node = self.parse_comparison()?;
        loop {
            if self.eat("&&") || self.eat("&") || self.eat_keyword("and") {
                let right = self.parse_comparison()?;
                node = Node::And(Box::new(node), Box::new(right));
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_comparison(&mut self) -> ExprResult<Node> {
        let mut node = self.parse_additive()?;
        loop {
            let op = if self.eat("==") {
                BinOp::Eq
            } else if self.eat("!=") {
                BinOp::Ne
            } else if self.eat("=~") {
                let mask = self.parse_additive()?;
                node = Node::Match {
                    negate: false,
                    target: Box::new(node),
                    mask: Box::new(mask),
                };
                continue;
            } else if self.eat("!~") {
                let mask = self.parse_additive()?;
                node = Node::Match {
                    negate: true,
                    target: Box::new(node),
                    mask: Box::new(mask),
                };
                continue;
            } else if self.eat("<=") {
                BinOp::Le
            } else if self.eat(">=") {
                BinOp::Ge
            } else if self.eat("<") {
                BinOp::Lt
            } else if self.eat(">") {
                BinOp::Gt
            } else {
                return Ok(node);
            };
            let right = self.parse_additive()?;
            node = Node::Binary(op, Box::new(node), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> ExprResult<Node> {
        let mut node = self.parse_multiplicative()?;
        loop {
            let op = if self.eat("+") {
                BinOp::Add
            } else if self.eat("-") {
                BinOp::Sub
            } else {
                return Ok(node);
            };
            let right = self.parse_multiplicative()?;
            node = Node::Binary(op, Box::new(node), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> ExprResult<Node> {
        let mut node = self.parse_unary()?;
        loop {
            let op = if self.eat("*") {
                BinOp::Mul
            } else if self.eat("/") || self.eat_keyword("div") {
                BinOp::Div
            } else {
                return Ok(node);
            };
            let right = self.parse_unary()?;
            node = Node::Binary(op, Box::new(node), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> ExprResult<Node> {
        if self.eat("-") {
            return Ok(Node::Neg(Box::new(self.parse_unary()?)));
        }
        if self.rest().trim_start().starts_with("!~") {
            return Err(syntax("Unexpected '!~'"));
        }
        if self.eat("!") || self.eat_keyword("not") {
            return Ok(Node::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn delimited(&mut self, close: char, what: &str) -> ExprResult<&'a str> {
        let body_start = self.pos;
        let mut escaped = false;
        for (i, c) in self.rest().char_indices() {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == close {
                let body = &self.src[body_start..body_start + i];
                self.pos = body_start + i + c.len_utf8();
                return Ok(body);
            }
        }
        Err(syntax(format!("Unterminated {what}")))
    }

    fn parse_primary(&mut self) -> ExprResult<Node> {
        self.skip_ws();
        let Some(c) = self.peek() else {
            return Err(syntax("Unexpected end of expression"));
        };
        match c {
            '(' => {
                self.pos += 1;
                let inner = self.parse_assign()?;
                self.expect(')')?;
                Ok(inner)
            }
            '"' | '\'' => {
                self.pos += 1;
                let body = self.delimited(c, "string")?;
                Ok(Node::Literal(Value::String(body.replace(&format!("\\{c}"), &c.to_string()))))
            }
            '[' => {
                self.pos += 1;
                let body = self.delimited(']', "date")?;
                let date = times::parse_date(body.trim(), self.pool.date_context())?;
                Ok(Node::Literal(Value::Date(date)))
            }
            '/' => {
                self.pos += 1;
                let body = self.delimited('/', "regular expression")?;
                Ok(Node::Literal(Value::Mask(compile_mask(&body.replace("\\/", "/"))?)))
            }
            _ if is_ident_start(c) => self.parse_word(),
            _ => self.parse_amount(),
        }
    }

    fn parse_amount(&mut self) -> ExprResult<Node> {
        let rest = self.rest();
        match Amount::parse_prefix(rest, self.pool, LITERAL_FLAGS)? {
            Some((amount, after)) => {
                self.pos += rest.len() - after.len();
                Ok(Node::Literal(Value::Amount(amount)))
            }
            None => Err(syntax(format!(
                "Unexpected character '{}'",
                rest.chars().next().unwrap_or(' ')
            ))),
        }
    }

    fn parse_word(&mut self) -> ExprResult<Node> {
        if self.eat_keyword("true") {
            return Ok(Node::Literal(Value::Boolean(true)));
        }
        if self.eat_keyword("false") {
            return Ok(Node::Literal(Value::Boolean(false)));
        }

        let rest = self.rest();
        // A symbol-first amount such as `EUR 10`.
        if let Some((amount, after)) = Amount::parse_prefix(rest, self.pool, LITERAL_FLAGS)? {
            if amount.has_commodity() {
                self.pos += rest.len() - after.len();
                return Ok(Node::Literal(Value::Amount(amount)));
            }
        }

        let end = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        let name = &rest[..end];
        if KEYWORDS.contains(&name) {
            return Err(syntax(format!("Unexpected keyword '{name}'")));
        }
        self.pos += end;

        if self.rest().starts_with('(') {
            self.pos += 1;
            let mut args = Vec::new();
            if !self.eat(")") {
                loop {
                    args.push(self.parse_ternary()?);
                    if self.eat(")") {
                        break;
                    }
                    self.expect(',')?;
                }
            }
            return Ok(Node::Call(name.to_string(), args));
        }
        Ok(Node::Ident(name.to_string()))
    }
}

/// Compile a case-insensitive pattern as used by journal masks.
pub fn compile_mask(pattern: &str) -> ExprResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ExprError::Regex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn eval(node: &Node, scope: &dyn Scope) -> ExprResult<Value> {
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Ident(name) => match scope.lookup(SymbolKind::Function, name) {
            Some(symbol) => symbol.call(&[], scope),
            None => Err(ExprError::UnknownIdentifier(name.clone())),
        },
        Node::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, scope))
                .collect::<ExprResult<Vec<_>>>()?;
            match scope.lookup(SymbolKind::Function, name) {
                Some(symbol) => symbol.call(&args, scope),
                None => builtin(name, &args),
            }
        }
        Node::Neg(inner) => eval(inner, scope)?.negated(),
        Node::Not(inner) => Ok(Value::Boolean(!eval(inner, scope)?.is_true()?)),
        Node::Binary(op, left, right) => {
            let (l, r) = (eval(left, scope)?, eval(right, scope)?);
            match op {
                BinOp::Add => l.add(&r),
                BinOp::Sub => l.sub(&r),
                BinOp::Mul => l.mul(&r),
                BinOp::Div => l.div(&r),
                BinOp::Eq => Ok(Value::Boolean(l.equals(&r)?)),
                BinOp::Ne => Ok(Value::Boolean(!l.equals(&r)?)),
                BinOp::Lt => Ok(Value::Boolean(l.compare(&r)?.is_lt())),
                BinOp::Le => Ok(Value::Boolean(l.compare(&r)?.is_le())),
                BinOp::Gt => Ok(Value::Boolean(l.compare(&r)?.is_gt())),
                BinOp::Ge => Ok(Value::Boolean(l.compare(&r)?.is_ge())),
            }
        }
        Node::Match {
            negate,
            target,
            mask,
        } => {
            let target = eval(target, scope)?;
            let matched = match eval(mask, scope)? {
                Value::Mask(re) => target.matches(&re)?,
                Value::String(s) => target.matches(&compile_mask(&s)?)?,
                other => {
                    return Err(ExprError::Unsupported {
                        op: "match against",
                        kind: other.kind_name(),
                    })
                }
            };
            Ok(Value::Boolean(matched != *negate))
        }
        Node::And(left, right) => {
            let l = eval(left, scope)?;
            if !l.is_true()? {
                return Ok(Value::Boolean(false));
            }
            Ok(Value::Boolean(eval(right, scope)?.is_true()?))
        }
        Node::Or(left, right) => {
            let l = eval(left, scope)?;
            if l.is_true()? {
                return Ok(l);
            }
            eval(right, scope)
        }
        Node::Ternary(cond, then, otherwise) => {
            if eval(cond, scope)?.is_true()? {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
        Node::Define(name, value) => {
            scope.define(SymbolKind::Function, name, Symbol::Expr(Rc::clone(value)));
            Ok(Value::Null)
        }
    }
}

fn builtin(name: &str, args: &[Value]) -> ExprResult<Value> {
    let one = |expected| match args {
        [v] => Ok(v),
        _ => Err(ExprError::BadArguments {
            name: name.to_string(),
            expected,
        }),
    };
    match name {
        "abs" => match one("one value")? {
            Value::Integer(i) => Ok(Value::Integer(i.abs())),
            Value::Balance(b) => Ok(Value::Balance(b.abs()?)),
            v => Ok(Value::Amount(v.to_amount()?.abs()?)),
        },
        "quantity" => Ok(Value::Amount(one("one amount")?.to_amount()?.number())),
        "commodity" => Ok(Value::String(
            one("one amount")?
                .to_amount()?
                .commodity()
                .map(|c| c.symbol().to_string())
                .unwrap_or_default(),
        )),
        "floor" => Ok(Value::Amount(one("one amount")?.to_amount()?.floored()?)),
        "ceiling" => Ok(Value::Amount(one("one amount")?.to_amount()?.ceilinged()?)),
        "truncated" => Ok(Value::Amount(one("one amount")?.to_amount()?.truncated()?)),
        "rounded" => Ok(Value::Amount(one("one amount")?.to_amount()?.rounded()?)),
        "unrounded" => Ok(Value::Amount(one("one amount")?.to_amount()?.unrounded()?)),
        "roundto" => match args {
            [v, places] => {
                let places = u32::try_from(places.to_amount()?.to_i64()?).map_err(|_| {
                    ExprError::BadArguments {
                        name: name.to_string(),
                        expected: "a non-negative number of places",
                    }
                })?;
                Ok(Value::Amount(v.to_amount()?.round_to(places)?))
            }
            _ => Err(ExprError::BadArguments {
                name: name.to_string(),
                expected: "an amount and a number of places",
            }),
        },
        "str" => Ok(Value::String(one("one value")?.to_text())),
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{BindScope, SymbolScope};

    fn calc(text: &str, pool: &CommodityPool, scope: &dyn Scope) -> Value {
        Expr::parse(text, pool).unwrap().calc(scope).unwrap()
    }

    #[test]
    fn test_arithmetic_precedence() {
        let pool = CommodityPool::new();
        let scope = SymbolScope::new();
        assert_eq!(calc("1 + 2 * 3", &pool, &scope).to_string(), "7");
        assert_eq!(calc("(1 + 2) * 3", &pool, &scope).to_string(), "9");
        assert_eq!(calc("-$5.00 + $7.50", &pool, &scope).to_string(), "$2.50");
    }

    #[test]
    fn test_names_resolve_through_scope() {
        let pool = CommodityPool::new();
        let root = SymbolScope::new();
        let bound = BindScope::new(&root)
            .bind("amount", Amount::exact("$10.00", &pool).unwrap())
            .bind("account", "Expenses:Food");
        assert_eq!(calc("amount * 2", &pool, &bound).to_string(), "$20.00");
        assert!(calc("account =~ /^expenses:/", &pool, &bound)
            .is_true()
            .unwrap());
        assert!(calc("account !~ /Income/ and amount > 5", &pool, &bound)
            .is_true()
            .unwrap());
    }

    #[test]
    fn test_unknown_identifier() {
        let pool = CommodityPool::new();
        let err = Expr::parse("nothing + 1", &pool)
            .unwrap()
            .calc(&SymbolScope::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown identifier 'nothing'");
    }

    #[test]
    fn test_definition_is_lazy() {
        let pool = CommodityPool::new();
        let root = SymbolScope::new();
        calc("double = amount * 2", &pool, &root);

        let bound = BindScope::new(&root).bind("amount", Amount::from_i64(4));
        assert_eq!(calc("double", &pool, &bound).to_string(), "8");
    }

    #[test]
    fn test_single_group_leaves_remainder() {
        let pool = CommodityPool::new();
        let (expr, rest) = Expr::parse_single("($10 * 3) @ $2", &pool).unwrap();
        assert_eq!(expr.text(), "($10 * 3)");
        assert_eq!(rest, " @ $2");
        assert_eq!(expr.calc(&SymbolScope::new()).unwrap().to_string(), "$30");
    }

    #[test]
    fn test_literals() {
        let pool = CommodityPool::new();
        let scope = SymbolScope::new();
        assert_eq!(calc("[2024/02/29] + 1", &pool, &scope).to_string(), "2024/03/01");
        assert_eq!(calc("'a' + \"b\"", &pool, &scope).to_text(), "ab");
        assert_eq!(calc("true ? 1 : 2", &pool, &scope).to_string(), "1");
        assert_eq!(calc("EUR 3 * 2", &pool, &scope).to_string(), "EUR6");
        assert_eq!(calc("commodity(10 AAPL)", &pool, &scope).to_text(), "AAPL");
        assert!(calc("roundto(1.255, 2) == 1.26", &pool, &scope)
            .is_true()
            .unwrap());
    }

    #[test]
    fn test_syntax_errors() {
        let pool = CommodityPool::new();
        assert!(Expr::parse("(1 + 2", &pool).is_err());
        assert!(Expr::parse("1 +", &pool).is_err());
        assert!(Expr::parse("'open", &pool).is_err());
        assert_eq!(
            Expr::parse("1 2", &pool).unwrap_err().to_string(),
            "Unexpected text after expression: '2'"
        );
    }
}
