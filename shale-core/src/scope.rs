use std::collections::HashMap;

/// A single lexical scope mapping names to bindings
#[derive(Debug, Clone)]
pub struct Scope<T> {
    bindings: HashMap<String, T>,
}

impl<T: Clone> Default for Scope<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Scope<T> {
    pub fn new() -> Self {
        Scope { bindings: HashMap::new() }
    }

    pub fn insert(&mut self, name: String, value: T) {
        self.bindings.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.bindings.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}

/// A stack-based scope manager that tracks nested scopes.
///
/// Each block activation pushes a scope; looking up a name searches from the
/// innermost scope outward, so shadowed declarations resolve to the nearest
/// one and disappear when their block ends.
#[derive(Debug, Clone)]
pub struct ScopeStack<T> {
    scopes: Vec<Scope<T>>,
}

impl<T: Clone> Default for ScopeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ScopeStack<T> {
    /// Create a new scope stack with a single outermost scope
    pub fn new() -> Self {
        ScopeStack { scopes: vec![Scope::new()] }
    }

    /// Push a new scope onto the stack
    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    /// Pop the current scope from the stack.
    /// Returns None if trying to pop the outermost scope.
    pub fn pop_scope(&mut self) -> Option<Scope<T>> {
        if self.scopes.len() > 1 { self.scopes.pop() } else { None }
    }

    /// Insert a binding in the current (innermost) scope
    pub fn insert(&mut self, name: String, value: T) {
        if let Some(current_scope) = self.scopes.last_mut() {
            current_scope.insert(name, value);
        }
    }

    /// Look up a binding, searching from innermost to outermost scope
    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Check if a name is defined in the current scope (not outer scopes)
    pub fn is_defined_in_current_scope(&self, name: &str) -> bool {
        self.scopes.last().map(|scope| scope.contains_key(name)).unwrap_or(false)
    }

    /// Get the current scope depth (0 = outermost scope)
    pub fn depth(&self) -> usize {
        self.scopes.len().saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_scope_operations() {
        let mut scope_stack: ScopeStack<i32> = ScopeStack::new();

        // Insert in outermost scope
        scope_stack.insert("x".to_string(), 1);
        assert_eq!(scope_stack.lookup("x"), Some(&1));

        // Push new scope and shadow variable
        scope_stack.push_scope();
        scope_stack.insert("x".to_string(), 2);
        scope_stack.insert("y".to_string(), 3);

        assert_eq!(scope_stack.lookup("x"), Some(&2)); // Shadows outer x
        assert_eq!(scope_stack.lookup("y"), Some(&3));

        // Pop scope
        scope_stack.pop_scope();
        assert_eq!(scope_stack.lookup("x"), Some(&1)); // Back to outer x
        assert_eq!(scope_stack.lookup("y"), None); // y is gone
    }

    #[test]
    fn test_outermost_scope_is_not_popped() {
        let mut scope_stack: ScopeStack<i32> = ScopeStack::new();
        scope_stack.insert("x".to_string(), 1);
        assert!(scope_stack.pop_scope().is_none());
        assert_eq!(scope_stack.lookup("x"), Some(&1));
    }

    #[test]
    fn test_current_scope_query() {
        let mut scope_stack: ScopeStack<i32> = ScopeStack::new();
        scope_stack.insert("x".to_string(), 1);
        scope_stack.push_scope();
        assert!(!scope_stack.is_defined_in_current_scope("x"));
        scope_stack.insert("x".to_string(), 2);
        assert!(scope_stack.is_defined_in_current_scope("x"));
        assert_eq!(scope_stack.depth(), 1);
    }
}
