//! The scope stack walked alongside the AST. A frame is pushed for each
//! block, each function's parameter list, and each variable declaration
//! (the declared name becomes visible to everything lexically after it,
//! which a single per-block frame cannot express cleanly, so each
//! declaration gets its own).

use rustc_hash::FxHashMap;
use sdlsl_ast::{DataTypeId, FnType, LoopId};
use sdlsl_span::Symbol;

pub enum ScopeKind {
    Root,
    Function { return_type: DataTypeId, fntype: FnType },
    Loop { loop_id: LoopId },
    Block,
    Param,
    VarDecl,
}

pub struct ScopeFrame {
    pub kind: ScopeKind,
    bindings: FxHashMap<Symbol, DataTypeId>,
}

impl ScopeFrame {
    fn new(kind: ScopeKind) -> Self {
        ScopeFrame { kind, bindings: FxHashMap::default() }
    }
}

#[derive(Default)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack::default()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, kind: ScopeKind) {
        self.frames.push(ScopeFrame::new(kind));
    }

    pub fn pop(&mut self) {
        self.frames.pop().expect("scope stack underflow");
    }

    pub fn declare(&mut self, name: Symbol, ty: DataTypeId) {
        self.frames.last_mut().expect("no scope frame to declare into").bindings.insert(name, ty);
    }

    pub fn lookup(&self, name: Symbol) -> Option<DataTypeId> {
        self.frames.iter().rev().find_map(|f| f.bindings.get(&name).copied())
    }

    /// Walks outward for the nearest enclosing loop, stopping at a function
    /// boundary: a `break`/`continue` cannot reach through a nested function
    /// (SDLSL has no closures, so this only ever matters for the
    /// compile-time boundary between a function and its caller's scopes,
    /// which never overlap, but the stop condition documents the intent).
    pub fn nearest_loop(&self) -> Option<LoopId> {
        for frame in self.frames.iter().rev() {
            match frame.kind {
                ScopeKind::Loop { loop_id } => return Some(loop_id),
                ScopeKind::Function { .. } => return None,
                _ => {}
            }
        }
        None
    }

    pub fn enclosing_function(&self) -> Option<(DataTypeId, FnType)> {
        for frame in self.frames.iter().rev() {
            if let ScopeKind::Function { return_type, fntype } = frame.kind {
                return Some((return_type, fntype));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdlsl_span::Interner;

    #[test]
    fn lookup_walks_outward_and_respects_shadowing() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let int_ty = DataTypeId(1);
        let float_ty = DataTypeId(2);

        let mut scopes = ScopeStack::new();
        scopes.push(ScopeKind::Root);
        scopes.push(ScopeKind::Block);
        scopes.declare(x, int_ty);
        scopes.push(ScopeKind::VarDecl);
        scopes.declare(x, float_ty);
        assert_eq!(scopes.lookup(x), Some(float_ty));
        scopes.pop();
        assert_eq!(scopes.lookup(x), Some(int_ty));
    }

    #[test]
    fn nearest_loop_stops_at_function_boundary() {
        let mut scopes = ScopeStack::new();
        scopes.push(ScopeKind::Root);
        scopes.push(ScopeKind::Loop { loop_id: LoopId(0) });
        scopes.push(ScopeKind::Function { return_type: DataTypeId(0), fntype: FnType::Normal });
        assert_eq!(scopes.nearest_loop(), None);
    }
}
