//! Variables and the lexical scope tree
//!
//! A `VariableScope` owns a set of named bindings and its child
//! scopes. Exactly one scope per interpreter has no parent (the global
//! scope); every other scope is created when a call frame is pushed
//! and disposed when it is popped. The global scope is shared by all
//! execution threads, so both collections are lock-guarded.

use crate::location::SourceLocation;
use crate::value::Variant;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// How far a lookup walks the scope tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Only the immediate scope.
    Local,
    /// The immediate scope, then every ancestor up to the global root.
    Global,
}

/// Variable names are case-insensitive and stored without the `$`
/// sigil.
fn normalize_name(name: &str) -> String {
    name.trim_start_matches('$').to_lowercase()
}

/// One named, possibly-constant binding holding one value.
///
/// Identity is the case-insensitive name; the held value never
/// participates in equality. Reading through a binding that currently
/// holds a ByRef reference yields the referenced variable's value, and
/// writing re-targets the referenced variable.
pub struct Variable {
    name: String,
    is_const: bool,
    declared_location: SourceLocation,
    declared_scope: Weak<VariableScope>,
    value: RwLock<Variant>,
}

impl Variable {
    fn new(
        scope: &Arc<VariableScope>,
        location: SourceLocation,
        name: &str,
        is_const: bool,
    ) -> Arc<Self> {
        Arc::new(Variable {
            name: normalize_name(name),
            is_const,
            declared_location: location,
            declared_scope: Arc::downgrade(scope),
            value: RwLock::new(Variant::null()),
        })
    }

    /// Lower-cased name without the `$` sigil.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Constant-ness is fixed at creation and cannot toggle.
    pub fn is_const(&self) -> bool {
        self.is_const
    }

    pub fn declared_location(&self) -> &SourceLocation {
        &self.declared_location
    }

    pub fn declared_scope(&self) -> Option<Arc<VariableScope>> {
        self.declared_scope.upgrade()
    }

    pub fn is_global(&self) -> bool {
        self.declared_scope()
            .map(|scope| scope.is_global())
            .unwrap_or(false)
    }

    fn raw_value(&self) -> Variant {
        self.value.read().clone()
    }

    /// The current value, dereferencing a held ByRef reference one
    /// level.
    pub fn value(&self) -> Variant {
        let value = self.raw_value();
        match value.referenced_variable() {
            Some(target) => target.raw_value(),
            None => value,
        }
    }

    /// Replace the held value, re-stamping its assigned-to annotation.
    /// If this binding holds a ByRef reference, the referenced
    /// variable is written instead.
    pub fn set_value(self: &Arc<Self>, value: Variant) {
        let target = self
            .raw_value()
            .referenced_variable()
            .unwrap_or_else(|| Arc::clone(self));
        let stamped = value.assign_to(Some(&target));
        *target.value.write() = stamped;
    }

    pub fn is_reference(&self) -> bool {
        self.raw_value().is_reference()
    }

    pub fn referenced_variable(&self) -> Option<Arc<Variable>> {
        self.raw_value().referenced_variable()
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Variable {}

impl std::hash::Hash for Variable {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}: {}", self.name, self.value().to_debug_string())
    }
}

/// A node in the scope tree.
pub struct VariableScope {
    me: Weak<VariableScope>,
    parent: Option<Weak<VariableScope>>,
    internal_name: String,
    variables: RwLock<HashMap<String, Arc<Variable>>>,
    children: RwLock<Vec<Arc<VariableScope>>>,
    temp_counter: AtomicUsize,
}

impl VariableScope {
    /// The root scope of an interpreter. Created once per context and
    /// disposed only at context teardown.
    pub fn create_global() -> Arc<Self> {
        Arc::new_cyclic(|me| VariableScope {
            me: me.clone(),
            parent: None,
            internal_name: "/".to_string(),
            variables: RwLock::new(HashMap::new()),
            children: RwLock::new(Vec::new()),
            temp_counter: AtomicUsize::new(0),
        })
    }

    /// Allocate a child scope. The label only feeds the diagnostic
    /// name; ownership is purely the tree link.
    pub fn create_child(self: &Arc<Self>, label: &str) -> Arc<Self> {
        let mut children = self.children.write();
        let internal_name = format!(
            "{}/{}-{}",
            self.internal_name.trim_end_matches('/'),
            label.to_lowercase(),
            children.len()
        );
        let child = Arc::new_cyclic(|me| VariableScope {
            me: me.clone(),
            parent: Some(Arc::downgrade(self)),
            internal_name,
            variables: RwLock::new(HashMap::new()),
            children: RwLock::new(Vec::new()),
            temp_counter: AtomicUsize::new(0),
        });
        children.push(Arc::clone(&child));
        log::trace!("created scope {}", child.internal_name);
        child
    }

    pub fn is_global(&self) -> bool {
        self.parent.is_none()
    }

    pub fn parent(&self) -> Option<Arc<VariableScope>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The root of this scope's tree.
    pub fn global_root(self: &Arc<Self>) -> Arc<VariableScope> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub fn internal_name(&self) -> &str {
        &self.internal_name
    }

    /// Create a binding in this scope, or return the existing one with
    /// that case-insensitive name. Constant-ness only applies to a
    /// binding actually created by this call.
    pub fn create_variable(
        self: &Arc<Self>,
        location: SourceLocation,
        name: &str,
        is_const: bool,
    ) -> Arc<Variable> {
        let key = normalize_name(name);
        let mut variables = self.variables.write();
        if let Some(existing) = variables.get(&key) {
            return Arc::clone(existing);
        }
        let variable = Variable::new(self, location, name, is_const);
        variables.insert(key, Arc::clone(&variable));
        variable
    }

    /// Create a uniquely-named scratch binding in this scope.
    pub fn create_temporary(self: &Arc<Self>, location: SourceLocation) -> Arc<Variable> {
        let name = format!("tmp__{}", self.temp_counter.fetch_add(1, Ordering::Relaxed));
        self.create_variable(location, &name, false)
    }

    pub fn has_variable(&self, name: &str, search: SearchScope) -> bool {
        self.resolve(name, search).is_some()
    }

    /// Case-insensitive lookup under the given search mode.
    pub fn resolve(&self, name: &str, search: SearchScope) -> Option<Arc<Variable>> {
        let key = normalize_name(name);
        if let Some(variable) = self.variables.read().get(&key) {
            return Some(Arc::clone(variable));
        }
        match search {
            SearchScope::Local => None,
            SearchScope::Global => self.parent().and_then(|p| p.resolve(name, search)),
        }
    }

    /// Remove a binding found under the given search mode; reports
    /// whether one was removed.
    pub fn destroy_variable(&self, name: &str, search: SearchScope) -> bool {
        let key = normalize_name(name);
        if self.variables.write().remove(&key).is_some() {
            return true;
        }
        match search {
            SearchScope::Local => false,
            SearchScope::Global => self
                .parent()
                .map(|p| p.destroy_variable(name, search))
                .unwrap_or(false),
        }
    }

    pub fn local_variables(&self) -> Vec<Arc<Variable>> {
        self.variables.read().values().cloned().collect()
    }

    pub fn child_scopes(&self) -> Vec<Arc<VariableScope>> {
        self.children.read().clone()
    }

    /// Recursively dispose all child scopes, drop all owned bindings
    /// and detach from the parent's child set.
    pub fn dispose(self: &Arc<Self>) {
        let children = std::mem::take(&mut *self.children.write());
        for child in children {
            child.dispose();
        }
        self.variables.write().clear();
        if let Some(parent) = self.parent() {
            parent
                .children
                .write()
                .retain(|child| !Arc::ptr_eq(child, self));
        }
        log::trace!("disposed scope {}", self.internal_name);
    }
}

impl fmt::Debug for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\"{}: {} variables, {} child scopes",
            self.internal_name,
            if self.is_global() { " (global)" } else { "" },
            self.variables.read().len(),
            self.children.read().len()
        )
    }
}
