//! Posting predicates used by automated transactions.
//!
//! The query syntax follows the command-line report queries:
//!
//! | term | matches |
//! |---|---|
//! | `word` or `/re/` | account full name |
//! | `@word` | payee |
//! | `#word` | transaction code |
//! | `%tag` / `%tag=value` | metadata |
//! | `=word` | note |
//! | `expr TEXT` | a value expression over the rest of the line |
//!
//! Terms combine with `not`/`!`, `and`/`&`, `or`/`|` and parentheses.
//! Terms written next to each other are alternatives.

use regex::Regex;

use crate::error::{ExprError, ExprResult};
use crate::expr::{compile_mask, Expr};
use crate::pool::CommodityPool;
use crate::scope::{Scope, SymbolKind};
use crate::value::Value;

/// A compiled posting predicate.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Matches everything.
    Always,
    /// Account full name matches.
    Account(Regex),
    /// Account full name equals exactly.
    AccountName(String),
    /// Payee matches.
    Payee(Regex),
    /// Code matches.
    Code(Regex),
    /// Note matches.
    Note(Regex),
    /// A tag whose name matches, with an optional value pattern.
    Tag {
        /// Tag name pattern.
        name: Regex,
        /// Value pattern.
        value: Option<Regex>,
    },
    /// A value expression, true when truthy.
    Expr(Expr),
    /// Negation.
    Not(Box<Predicate>),
    /// Both.
    And(Box<Predicate>, Box<Predicate>),
    /// Either.
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Compile query text.
    pub fn parse(text: &str, pool: &CommodityPool) -> ExprResult<Self> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Ok(Self::Always);
        }
        let mut parser = QueryParser {
            tokens,
            pos: 0,
            pool,
        };
        let predicate = parser.parse_or()?;
        if let Some(token) = parser.tokens.get(parser.pos) {
            return Err(ExprError::Syntax(format!(
                "Unexpected token in query: '{}'",
                token.text()
            )));
        }
        Ok(predicate)
    }

    /// Whether this is a test of the account name alone, so results may be
    /// cached per account.
    pub fn depends_only_on_account(&self) -> bool {
        match self {
            Self::Always | Self::Account(_) | Self::AccountName(_) => true,
            Self::Not(p) => p.depends_only_on_account(),
            Self::And(a, b) | Self::Or(a, b) => {
                a.depends_only_on_account() && b.depends_only_on_account()
            }
            _ => false,
        }
    }

    /// Test against the values bound in `scope`.
    ///
    /// Reads `account`, `payee`, `code` and `note`, and calls `tag(name)`
    /// with a mask argument for metadata terms.
    pub fn matches(&self, scope: &dyn Scope) -> ExprResult<bool> {
        match self {
            Self::Always => Ok(true),
            Self::Account(re) => Ok(re.is_match(&lookup_text(scope, "account")?)),
            Self::AccountName(name) => Ok(lookup_text(scope, "account")? == *name),
            Self::Payee(re) => Ok(re.is_match(&lookup_text(scope, "payee")?)),
            Self::Code(re) => Ok(re.is_match(&lookup_text(scope, "code")?)),
            Self::Note(re) => Ok(re.is_match(&lookup_text(scope, "note")?)),
            Self::Tag { name, value } => {
                let Some(symbol) = scope.lookup(SymbolKind::Function, "tag") else {
                    return Err(ExprError::UnknownFunction("tag".to_string()));
                };
                let found = symbol.call(&[Value::Mask(name.clone())], scope)?;
                Ok(match (found, value) {
                    (Value::Null, _) => false,
                    (_, None) => true,
                    (found, Some(re)) => re.is_match(&found.to_text()),
                })
            }
            Self::Expr(expr) => expr.calc(scope)?.is_true(),
            Self::Not(p) => Ok(!p.matches(scope)?),
            Self::And(a, b) => Ok(a.matches(scope)? && b.matches(scope)?),
            Self::Or(a, b) => Ok(a.matches(scope)? || b.matches(scope)?),
        }
    }
}

fn lookup_text(scope: &dyn Scope, name: &str) -> ExprResult<String> {
    match scope.lookup(SymbolKind::Function, name) {
        Some(symbol) => Ok(match symbol.call(&[], scope)? {
            Value::Null => String::new(),
            other => other.to_text(),
        }),
        None => Err(ExprError::UnknownIdentifier(name.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Term(String),
    Pattern(String),
    Expr(String),
}

impl Token {
    fn text(&self) -> &str {
        match self {
            Self::LParen => "(",
            Self::RParen => ")",
            Self::And => "&",
            Self::Or => "|",
            Self::Not => "!",
            Self::Term(s) | Self::Pattern(s) | Self::Expr(s) => s,
        }
    }
}

fn tokenize(text: &str) -> ExprResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = text.trim_start();
    while let Some(c) = rest.chars().next() {
        match c {
            '(' | ')' | '&' | '|' | '!' => {
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '&' => Token::And,
                    '|' => Token::Or,
                    _ => Token::Not,
                });
                rest = &rest[1..];
            }
            '/' => {
                let body = &rest[1..];
                let end = body
                    .find('/')
                    .ok_or_else(|| ExprError::Syntax("Missing closing '/' in query".to_string()))?;
                tokens.push(Token::Pattern(body[..end].to_string()));
                rest = &body[end + 1..];
            }
            '\'' | '"' => {
                let body = &rest[1..];
                let end = body
                    .find(c)
                    .ok_or_else(|| ExprError::Syntax(format!("Missing closing {c} in query")))?;
                tokens.push(Token::Term(body[..end].to_string()));
                rest = &body[end + 1..];
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '(' || c == ')')
                    .unwrap_or(rest.len());
                let word = &rest[..end];
                rest = &rest[end..];
                match word {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "not" => tokens.push(Token::Not),
                    "expr" => {
                        tokens.push(Token::Expr(rest.trim().to_string()));
                        rest = "";
                    }
                    _ => tokens.push(Token::Term(word.to_string())),
                }
            }
        }
        rest = rest.trim_start();
    }
    Ok(tokens)
}

struct QueryParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    pool: &'a CommodityPool,
}

impl QueryParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn starts_term(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::LParen | Token::Not | Token::Term(_) | Token::Pattern(_) | Token::Expr(_))
        )
    }

    fn parse_or(&mut self) -> ExprResult<Predicate> {
        let mut left = self.parse_and()?;
        loop {
            if self.peek() == Some(&Token::Or) {
                self.pos += 1;
            } else if !self.starts_term() {
                break;
            }
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ExprResult<Predicate> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ExprResult<Predicate> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Predicate::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_term()
    }

    fn parse_term(&mut self) -> ExprResult<Predicate> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(ExprError::Syntax("Query ended unexpectedly".to_string()));
        };
        self.pos += 1;
        match token {
            Token::LParen => {
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(ExprError::Syntax("Missing ')' in query".to_string()));
                }
                self.pos += 1;
                Ok(inner)
            }
            Token::Pattern(re) => Ok(Predicate::Account(compile_mask(&re)?)),
            Token::Expr(text) => Ok(Predicate::Expr(Expr::parse(&text, self.pool)?)),
            Token::Term(word) => term_predicate(&word),
            other => Err(ExprError::Syntax(format!(
                "Unexpected token in query: '{}'",
                other.text()
            ))),
        }
    }
}

fn term_predicate(word: &str) -> ExprResult<Predicate> {
    if let Some(payee) = word.strip_prefix('@') {
        return Ok(Predicate::Payee(compile_mask(payee)?));
    }
    if let Some(code) = word.strip_prefix('#') {
        return Ok(Predicate::Code(compile_mask(code)?));
    }
    if let Some(note) = word.strip_prefix('=') {
        return Ok(Predicate::Note(compile_mask(note)?));
    }
    if let Some(tag) = word.strip_prefix('%') {
        let (name, value) = match tag.split_once('=') {
            Some((name, value)) => (name, Some(compile_mask(value)?)),
            None => (tag, None),
        };
        return Ok(Predicate::Tag {
            name: compile_mask(&format!("^{name}$"))?,
            value,
        });
    }
    Ok(Predicate::Account(compile_mask(word)?))
}
