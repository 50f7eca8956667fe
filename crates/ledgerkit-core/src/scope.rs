//! Symbol scopes consulted by expressions and directives.
//!
//! A [`Scope`] maps `(kind, name)` pairs to [`Symbol`]s. Scopes chain: a
//! [`SymbolScope`] answers from its own table first and then asks its
//! parent, so definitions made while reading a journal shadow the session's
//! built-in ones.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::ExprResult;
use crate::expr::Expr;
use crate::value::Value;

/// Namespace of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// Values and functions used in expressions.
    Function,
    /// Session options (`--name`).
    Option,
    /// Commands run before a journal is read.
    Precommand,
    /// Report commands.
    Command,
    /// User-defined journal directives.
    Directive,
    /// Output formats.
    Format,
}

/// A native function callable from expressions.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> ExprResult<Value>>;

/// What a name resolves to.
#[derive(Clone)]
pub enum Symbol {
    /// A constant.
    Value(Value),
    /// An expression, evaluated in the caller's scope on each use.
    Expr(Rc<Expr>),
    /// A native function.
    Function(NativeFn),
}

impl Symbol {
    /// Wrap a closure as a function symbol.
    pub fn function(f: impl Fn(&[Value]) -> ExprResult<Value> + 'static) -> Self {
        Self::Function(Rc::new(f))
    }

    /// Evaluate with `args` in `scope`.
    pub fn call(&self, args: &[Value], scope: &dyn Scope) -> ExprResult<Value> {
        match self {
            Self::Value(v) => Ok(v.clone()),
            Self::Expr(e) => e.calc(scope),
            Self::Function(f) => f(args),
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Expr(e) => f.debug_tuple("Expr").field(&e.text()).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Something that resolves names.
pub trait Scope {
    /// Resolve `name` in the namespace `kind`.
    fn lookup(&self, kind: SymbolKind, name: &str) -> Option<Symbol>;

    /// Bind `name` in the namespace `kind`.
    ///
    /// Scopes that cannot hold definitions pass them on or drop them.
    fn define(&self, kind: SymbolKind, name: &str, symbol: Symbol);
}

/// A scope with no symbols.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyScope;

impl Scope for EmptyScope {
    fn lookup(&self, _kind: SymbolKind, _name: &str) -> Option<Symbol> {
        None
    }

    fn define(&self, _kind: SymbolKind, _name: &str, _symbol: Symbol) {}
}

/// A table of symbols in front of an optional parent scope.
#[derive(Default)]
pub struct SymbolScope<'p> {
    parent: Option<&'p dyn Scope>,
    symbols: RefCell<HashMap<(SymbolKind, String), Symbol>>,
}

impl<'p> SymbolScope<'p> {
    /// An empty root scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            parent: None,
            symbols: RefCell::new(HashMap::new()),
        }
    }

    /// An empty scope in front of `parent`.
    #[must_use]
    pub fn with_parent(parent: &'p dyn Scope) -> Self {
        Self {
            parent: Some(parent),
            symbols: RefCell::new(HashMap::new()),
        }
    }

    /// Number of symbols defined here.
    pub fn len(&self) -> usize {
        self.symbols.borrow().len()
    }

    /// Whether nothing is defined here.
    pub fn is_empty(&self) -> bool {
        self.symbols.borrow().is_empty()
    }

    /// Forget every local definition.
    pub fn clear(&self) {
        self.symbols.borrow_mut().clear();
    }
}

impl Scope for SymbolScope<'_> {
    fn lookup(&self, kind: SymbolKind, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.symbols.borrow().get(&(kind, name.to_string())) {
            return Some(symbol.clone());
        }
        self.parent.and_then(|p| p.lookup(kind, name))
    }

    fn define(&self, kind: SymbolKind, name: &str, symbol: Symbol) {
        tracing::trace!(?kind, name, "defining symbol");
        self.symbols
            .borrow_mut()
            .insert((kind, name.to_string()), symbol);
    }
}

impl fmt::Debug for SymbolScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolScope")
            .field("symbols", &self.symbols.borrow().len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Fixed values in front of a parent; definitions go to the parent.
pub struct BindScope<'p> {
    parent: &'p dyn Scope,
    values: HashMap<&'static str, Symbol>,
}

impl<'p> BindScope<'p> {
    /// An empty binding in front of `parent`.
    pub fn new(parent: &'p dyn Scope) -> Self {
        Self {
            parent,
            values: HashMap::new(),
        }
    }

    /// Bind a constant.
    #[must_use]
    pub fn bind(mut self, name: &'static str, value: impl Into<Value>) -> Self {
        self.values.insert(name, Symbol::Value(value.into()));
        self
    }

    /// Bind a function.
    #[must_use]
    pub fn bind_fn(
        mut self,
        name: &'static str,
        f: impl Fn(&[Value]) -> ExprResult<Value> + 'static,
    ) -> Self {
        self.values.insert(name, Symbol::function(f));
        self
    }
}

impl Scope for BindScope<'_> {
    fn lookup(&self, kind: SymbolKind, name: &str) -> Option<Symbol> {
        if kind == SymbolKind::Function {
            if let Some(symbol) = self.values.get(name) {
                return Some(symbol.clone());
            }
        }
        self.parent.lookup(kind, name)
    }

    fn define(&self, kind: SymbolKind, name: &str, symbol: Symbol) {
        self.parent.define(kind, name, symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_shadows_parent() {
        let root = SymbolScope::new();
        root.define(SymbolKind::Function, "x", Symbol::Value(Value::Integer(1)));
        let child = SymbolScope::with_parent(&root);
        assert!(matches!(
            child.lookup(SymbolKind::Function, "x"),
            Some(Symbol::Value(Value::Integer(1)))
        ));

        child.define(SymbolKind::Function, "x", Symbol::Value(Value::Integer(2)));
        assert!(matches!(
            child.lookup(SymbolKind::Function, "x"),
            Some(Symbol::Value(Value::Integer(2)))
        ));
        assert!(root.lookup(SymbolKind::Directive, "x").is_none());
    }

    #[test]
    fn test_bind_scope_forwards_definitions() {
        let root = SymbolScope::new();
        let bound = BindScope::new(&root).bind("payee", "Grocer");
        bound.define(SymbolKind::Function, "y", Symbol::Value(Value::Integer(7)));
        assert_eq!(root.len(), 1);

        let payee = bound.lookup(SymbolKind::Function, "payee").unwrap();
        assert_eq!(payee.call(&[], &bound).unwrap().to_text(), "Grocer");
        assert!(bound.lookup(SymbolKind::Option, "payee").is_none());
    }

    #[test]
    fn test_function_symbol() {
        let double = Symbol::function(|args| match args {
            [v] => v.mul(&Value::Integer(2)),
            _ => Ok(Value::Null),
        });
        let out = double.call(&[Value::Integer(21)], &EmptyScope).unwrap();
        assert!(matches!(out, Value::Integer(42)));
    }
}
