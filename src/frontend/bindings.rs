//! Scope/Binding table and ownership tracking
//!
//! Bindings live in an index-addressed arena. A move flips the source entry to
//! `Moved`; nothing is ever removed, so a `BindingId` stays valid for the whole
//! unit and snapshots can be taken as plain state vectors.

use std::collections::HashMap;

use log::trace;
use serde::Serialize;

use crate::frontend::alias::ConstValue;
use crate::frontend::ast::{BindingMode, Capability, Ident};
use crate::types::Ty;
use crate::utils::{Error, Result, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    Owned,
    Moved { at: Span },
}

/// How a binding holds its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The binding owns the value
    Owner,
    /// Call-scoped `&` view
    ReadonlyView,
    /// Call-scoped `*` view
    MutableView,
}

impl Access {
    /// Binding mode and access for a parameter of the given capability
    pub fn for_capability(cap: Capability) -> (BindingMode, Access) {
        match cap {
            Capability::Owned => (BindingMode::Let, Access::Owner),
            Capability::Readonly => (BindingMode::Const, Access::ReadonlyView),
            Capability::Mutable => (BindingMode::Let, Access::MutableView),
        }
    }
}

/// Where a binding was introduced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Param,
    SelfParam,
    LoopVar,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub ty: Ty,
    pub mode: BindingMode,
    pub access: Access,
    pub origin: Origin,
    pub state: OwnershipState,
    /// Complex values move; scalars are duplicated
    pub complex: bool,
    /// Literal a `const` was initialised with
    pub constant: Option<ConstValue>,
    pub scope: ScopeId,
    pub span: Span,
}

impl Binding {
    pub fn new(name: &Ident, ty: Ty, mode: BindingMode, complex: bool) -> Self {
        Self {
            name: name.name.clone(),
            ty,
            mode,
            access: Access::Owner,
            origin: Origin::Local,
            state: OwnershipState::Owned,
            complex,
            constant: None,
            scope: ScopeId(0),
            span: name.span,
        }
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_constant(mut self, constant: Option<ConstValue>) -> Self {
        self.constant = constant;
        self
    }

    pub fn is_moved(&self) -> bool {
        matches!(self.state, OwnershipState::Moved { .. })
    }
}

/// Deterministic release point inserted at scope exit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropPoint {
    pub binding: String,
    pub ty: String,
    pub declared_at: Span,
    pub released_at: Span,
}

/// Ownership states at one program point
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot(Vec<OwnershipState>);

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    names: HashMap<String, BindingId>,
    /// Declaration order, for LIFO release
    bindings: Vec<BindingId>,
}

/// Lexically scoped binding table for one unit
#[derive(Debug)]
pub struct BindingTable {
    bindings: Vec<Binding>,
    scopes: Vec<Scope>,
    current: ScopeId,
}

impl Default for BindingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingTable {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            scopes: vec![Scope { parent: None, names: HashMap::new(), bindings: Vec::new() }],
            current: ScopeId(0),
        }
    }

    pub fn enter_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope { parent: Some(self.current), names: HashMap::new(), bindings: Vec::new() });
        self.current = id;
        id
    }

    /// Leave the current scope, releasing owned complex values in reverse order
    pub fn exit_scope(&mut self, end: Span) -> Vec<DropPoint> {
        let scope = &self.scopes[self.current.0];
        let drops = scope
            .bindings
            .iter()
            .rev()
            .map(|id| &self.bindings[id.0])
            .filter(|b| b.complex && b.access == Access::Owner && b.state == OwnershipState::Owned)
            .map(|b| DropPoint {
                binding: b.name.clone(),
                ty: b.ty.to_string(),
                declared_at: b.span,
                released_at: end,
            })
            .collect();
        if let Some(parent) = scope.parent {
            self.current = parent;
        }
        drops
    }

    /// Declare in the current scope
    pub fn declare(&mut self, mut binding: Binding) -> Result<BindingId> {
        let scope = &mut self.scopes[self.current.0];
        if scope.names.contains_key(&binding.name) {
            return Err(Error::DuplicateDefinition { name: binding.name.clone(), span: binding.span });
        }
        let id = BindingId(self.bindings.len());
        binding.scope = self.current;
        scope.names.insert(binding.name.clone(), id);
        scope.bindings.push(id);
        self.bindings.push(binding);
        Ok(id)
    }

    /// Innermost visible binding of this name
    pub fn lookup(&self, name: &str) -> Option<BindingId> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            let s = &self.scopes[id.0];
            if let Some(binding) = s.names.get(name) {
                return Some(*binding);
            }
            scope = s.parent;
        }
        None
    }

    pub fn get(&self, id: BindingId) -> &Binding {
        &self.bindings[id.0]
    }

    pub fn get_mut(&mut self, id: BindingId) -> &mut Binding {
        &mut self.bindings[id.0]
    }

    /// Reading or mutating a moved binding is an error naming the move site
    pub fn check_usable(&self, id: BindingId, span: Span) -> Result<()> {
        let binding = &self.bindings[id.0];
        match binding.state {
            OwnershipState::Owned => Ok(()),
            OwnershipState::Moved { at } => Err(Error::UseOfMovedValue {
                var: binding.name.clone(),
                moved_at: at,
                span,
            }),
        }
    }

    /// Ownership leaves the binding. Scalars are duplicated and stay put.
    pub fn transfer(&mut self, id: BindingId, at: Span) {
        let binding = &mut self.bindings[id.0];
        if binding.complex && binding.state == OwnershipState::Owned {
            trace!("move out of `{}` at {}", binding.name, at);
            binding.state = OwnershipState::Moved { at };
        }
    }

    /// A fresh value assigned to a moved binding
    pub fn reinitialize(&mut self, id: BindingId) {
        self.bindings[id.0].state = OwnershipState::Owned;
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.bindings.iter().map(|b| b.state).collect())
    }

    pub fn restore(&mut self, snapshot: &Snapshot) {
        for (binding, state) in self.bindings.iter_mut().zip(&snapshot.0) {
            binding.state = *state;
        }
    }

    /// Join two branches: moved on either path means moved
    pub fn merge(&mut self, a: &Snapshot, b: &Snapshot) {
        for (i, binding) in self.bindings.iter_mut().enumerate() {
            let sa = a.0.get(i).copied().unwrap_or(OwnershipState::Owned);
            let sb = b.0.get(i).copied().unwrap_or(OwnershipState::Owned);
            binding.state = match (sa, sb) {
                (moved @ OwnershipState::Moved { .. }, _) | (_, moved @ OwnershipState::Moved { .. }) => moved,
                _ => OwnershipState::Owned,
            };
        }
    }

    /// Bindings that existed at `before` and have been moved since
    pub fn moved_since(&self, before: &Snapshot) -> Vec<(BindingId, Span)> {
        before
            .0
            .iter()
            .enumerate()
            .filter_map(|(i, old)| match (old, self.bindings[i].state) {
                (OwnershipState::Owned, OwnershipState::Moved { at }) => Some((BindingId(i), at)),
                _ => None,
            })
            .collect()
    }
}
