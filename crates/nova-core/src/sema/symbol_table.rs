use crate::sema::nova_type::NovaType;
use crate::span::Span;
use rustc_hash::FxHashMap;

/// Kind of symbol (variable, function, class, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Value,
    Function,
    Class,
    TypeAlias,
    Parameter,
}

/// A symbol in the symbol table
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: NovaType,
    pub span: Span,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, ty: NovaType, span: Span) -> Self {
        Self {
            name: name.into(),
            kind,
            ty,
            span,
        }
    }

    /// `var` bindings and setter parameters can be reassigned
    pub fn is_mutable(&self) -> bool {
        matches!(self.kind, SymbolKind::Variable)
    }
}

/// A scope containing symbols
#[derive(Debug, Clone, Default)]
pub struct Scope {
    symbols: FxHashMap<String, Symbol>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Symbol table managing a parent-linked chain of lexical scopes.
///
/// Resolution walks outward from the innermost scope, so shadowing always
/// resolves to the innermost definition. Redeclaring a name within one
/// scope is rejected; shadowing an outer scope's name is permitted.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new()],
        }
    }

    /// Enter a new innermost scope
    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    /// Exit the innermost scope.
    ///
    /// Popping the global scope is a symbol-table corruption; callers treat
    /// the `Err` as a fatal internal error.
    pub fn exit_scope(&mut self) -> Result<(), String> {
        if self.scopes.len() <= 1 {
            return Err("scope stack underflow".to_string());
        }
        self.scopes.pop();
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Declare a symbol in the innermost scope
    pub fn declare(&mut self, symbol: Symbol) -> Result<(), String> {
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| "scope stack underflow".to_string())?;
        if scope.symbols.contains_key(&symbol.name) {
            return Err(format!(
                "Symbol '{}' already declared in this scope",
                symbol.name
            ));
        }
        scope.symbols.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    /// Look up a symbol, walking outward through enclosing scopes
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        for scope in self.scopes.iter().rev() {
            if let Some(symbol) = scope.symbols.get(name) {
                return Some(symbol);
            }
        }
        None
    }

    /// Look up a symbol only in the innermost scope
    pub fn lookup_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes.last().and_then(|s| s.symbols.get(name))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_symbol(name: &str, kind: SymbolKind) -> Symbol {
        Symbol::new(name, kind, NovaType::INT, Span::new(0, 0, 1, 1))
    }

    #[test]
    fn test_declare_and_lookup() {
        let mut table = SymbolTable::new();
        table.declare(make_symbol("x", SymbolKind::Value)).unwrap();

        assert!(table.lookup("x").is_some());
        assert!(table.lookup("y").is_none());
    }

    #[test]
    fn test_duplicate_declaration() {
        let mut table = SymbolTable::new();
        table.declare(make_symbol("x", SymbolKind::Value)).unwrap();
        assert!(table.declare(make_symbol("x", SymbolKind::Value)).is_err());
    }

    #[test]
    fn test_scopes() {
        let mut table = SymbolTable::new();
        table.declare(make_symbol("x", SymbolKind::Value)).unwrap();

        table.enter_scope();
        assert!(table.lookup("x").is_some());

        table.declare(make_symbol("y", SymbolKind::Value)).unwrap();
        assert!(table.lookup("y").is_some());

        table.exit_scope().unwrap();
        assert!(table.lookup("y").is_none());
        assert!(table.lookup("x").is_some());
    }

    #[test]
    fn test_shadowing_resolves_to_innermost() {
        let mut table = SymbolTable::new();
        table
            .declare(make_symbol("x", SymbolKind::Variable))
            .unwrap();

        table.enter_scope();
        table.declare(make_symbol("x", SymbolKind::Value)).unwrap();

        let x = table.lookup("x").unwrap();
        assert_eq!(x.kind, SymbolKind::Value);

        table.exit_scope().unwrap();
        let x = table.lookup("x").unwrap();
        assert_eq!(x.kind, SymbolKind::Variable);
    }

    #[test]
    fn test_global_scope_underflow() {
        let mut table = SymbolTable::new();
        assert!(table.exit_scope().is_err());
    }
}
