//! Semantic analysis: builds the datatype universe, then walks the AST
//! once assigning a `DataTypeId` to every typed node and a back-pointer
//! to every `break`/`continue`/call/field-access, reporting a diagnostic
//! anywhere those can't be resolved.
//!
//! Two passes before the walk: [`Analyzer::check_duplicates`] collects
//! the first definition of every function and struct (a later
//! redefinition is reported but otherwise ignored), and
//! [`Analyzer::prepass_signatures`] resolves every function's parameter
//! and return types up front. Doing signatures before bodies is what lets
//! a function call a sibling declared later in the file without a
//! forward-declaration syntax.

mod datatype;
mod scope;

pub use datatype::{DataType, DataTypeKind, DataTypeTable, ScalarKind};
pub use scope::{ScopeKind, ScopeStack};

use rustc_hash::{FxHashMap, FxHashSet};
use sdlsl_ast::*;
use sdlsl_errors::Session;
use sdlsl_span::{SourceLoc, Symbol};

const RESERVED_WORDS: &[&str] = &[
    "if", "else", "while", "do", "for", "break", "continue", "discard", "return", "var", "function", "struct", "void",
    "true", "false",
];

fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

/// Caps how many distinct "X is undefined" diagnostics one function can
/// produce before the analyzer gives up naming them individually.
const UNDEFINED_REPORT_LIMIT: usize = 16;

struct Analyzer<'s> {
    sess: &'s Session,
    types: DataTypeTable,
    scopes: ScopeStack,
    functions: FxHashMap<Symbol, FunctionId>,
    function_sigs: FxHashMap<u32, (DataTypeId, Vec<DataTypeId>)>,
    structs: FxHashMap<Symbol, StructId>,
    struct_type_ids: FxHashMap<u32, DataTypeId>,
    type_struct_ids: FxHashMap<DataTypeId, u32>,
    undefined_seen: FxHashSet<Symbol>,
    next_loop_id: u32,
}

/// Runs every analysis pass over `shader` and returns the datatype table
/// that its `DataTypeId`s index into. Mutates `shader` in place, filling
/// in every `datatype`/`resolved`/`target` field the parser left `None`.
pub fn analyze(sess: &Session, shader: &mut Shader) -> DataTypeTable {
    let mut a = Analyzer {
        sess,
        types: DataTypeTable::new(sess),
        scopes: ScopeStack::new(),
        functions: FxHashMap::default(),
        function_sigs: FxHashMap::default(),
        structs: FxHashMap::default(),
        struct_type_ids: FxHashMap::default(),
        type_struct_ids: FxHashMap::default(),
        undefined_seen: FxHashSet::default(),
        next_loop_id: 0,
    };

    gather_globals(shader);
    a.check_duplicates(shader);
    a.build_datatype_universe(shader);
    a.prepass_signatures(shader);

    a.scopes.push(ScopeKind::Root);
    for i in 0..shader.function_ids.len() {
        let fid = shader.function_ids[i];
        a.walk_function(shader, fid);
    }
    a.scopes.pop();
    debug_assert!(a.scopes.is_empty());

    a.types
}

fn gather_globals(shader: &mut Shader) {
    shader.function_ids.clear();
    shader.struct_ids.clear();
    for (i, unit) in shader.units.iter().enumerate() {
        match unit {
            TranslationUnit::Function(_) => shader.function_ids.push(FunctionId(i as u32)),
            TranslationUnit::Struct(_) => shader.struct_ids.push(StructId(i as u32)),
        }
    }
}

impl<'s> Analyzer<'s> {
    fn check_duplicates(&mut self, shader: &Shader) {
        for &fid in &shader.function_ids {
            let f = shader.function(fid);
            if is_reserved(&self.sess.interner.borrow().get(f.name).to_string()) {
                self.sess.fail_at(f.loc, format!("`{}` is a reserved word and cannot name a function", self.text(f.name)));
            }
            if let Some(&prev) = self.functions.get(&f.name) {
                let prev_loc = shader.function(prev).loc;
                self.sess.fail_at(f.loc, format!("redefinition of function `{}`", self.text(f.name)));
                self.sess.warn_at(prev_loc, "previous definition is here");
            } else {
                self.functions.insert(f.name, fid);
            }
        }
        for &sid in &shader.struct_ids {
            let s = shader.struct_decl(sid);
            if is_reserved(&self.sess.interner.borrow().get(s.name).to_string()) {
                self.sess.fail_at(s.loc, format!("`{}` is a reserved word and cannot name a struct", self.text(s.name)));
            }
            if let Some(&prev) = self.structs.get(&s.name) {
                let prev_loc = shader.struct_decl(prev).loc;
                self.sess.fail_at(s.loc, format!("redefinition of struct `{}`", self.text(s.name)));
                self.sess.warn_at(prev_loc, "previous definition is here");
            } else {
                self.structs.insert(s.name, sid);
            }
        }
    }

    fn text(&self, sym: Symbol) -> String {
        self.sess.interner.borrow().get(sym).to_string()
    }

    fn build_datatype_universe(&mut self, shader: &mut Shader) {
        for &sid in &shader.struct_ids {
            let s = shader.struct_decl(sid);
            let id = self.types.declare_struct_stub(s.name);
            self.struct_type_ids.insert(sid.0, id);
            self.type_struct_ids.insert(id, sid.0);
        }
        let struct_ids: Vec<_> = shader.struct_ids.clone();
        for &sid in &struct_ids {
            let type_id = self.struct_type_ids[&sid.0];
            let member_count = shader.struct_decl(sid).members.len();
            let mut resolved = Vec::with_capacity(member_count);
            for i in 0..member_count {
                let (type_name, loc, array_bounds_len) = {
                    let m = &shader.struct_decl(sid).members[i];
                    (m.type_name, m.loc, m.array_bounds.len())
                };
                let mut ty = match self.resolve_type_name(type_name) {
                    Some(t) => t,
                    None => {
                        self.sess.fail_at(loc, format!("unknown type `{}`", self.text(type_name)));
                        self.types.int
                    }
                };
                for bi in 0..array_bounds_len {
                    let bound_expr = shader.struct_decl(sid).members[i].array_bounds[bi].clone();
                    let count = self.eval_const_array_bound(&bound_expr);
                    ty = self.types.array_of(self.sess, ty, count);
                }
                let name = shader.struct_decl(sid).members[i].name;
                shader.struct_decl_mut(sid).members[i].datatype = Some(ty);
                resolved.push((name, ty));
            }
            self.types.fill_struct(type_id, resolved);
            shader.struct_decl_mut(sid).datatype = Some(type_id);
        }
    }

    /// Resolves a bare type name to a `DataTypeId`: a builtin scalar,
    /// vector, matrix, or `void`, or a previously-declared struct.
    fn resolve_type_name(&mut self, name: Symbol) -> Option<DataTypeId> {
        self.types.lookup(name)
    }

    fn prepass_signatures(&mut self, shader: &mut Shader) {
        for i in 0..shader.function_ids.len() {
            let fid = shader.function_ids[i];
            let (ret_type_name, ret_loc, attr) = {
                let f = shader.function(fid);
                (f.return_type.type_name, f.return_type.loc, f.return_type.attribute.clone())
            };
            let ret_ty = match self.resolve_type_name(ret_type_name) {
                Some(t) => t,
                None => {
                    self.sess.fail_at(ret_loc, format!("unknown return type `{}`", self.text(ret_type_name)));
                    self.types.void
                }
            };
            shader.function_mut(fid).return_type.datatype = Some(ret_ty);

            let fntype = self.validate_function_attribute(attr.as_ref(), ret_loc);
            shader.function_mut(fid).fntype = fntype;

            let param_count = shader.function(fid).params.len();
            let mut param_tys = Vec::with_capacity(param_count);
            for pi in 0..param_count {
                let (type_name, loc, bounds_len) = {
                    let p = &shader.function(fid).params[pi];
                    (p.type_name, p.loc, p.array_bounds.len())
                };
                let mut ty = match self.resolve_type_name(type_name) {
                    Some(t) => t,
                    None => {
                        self.sess.fail_at(loc, format!("unknown parameter type `{}`", self.text(type_name)));
                        self.types.int
                    }
                };
                for bi in 0..bounds_len {
                    let bound_expr = shader.function(fid).params[pi].array_bounds[bi].clone();
                    let count = self.eval_const_array_bound(&bound_expr);
                    ty = self.types.array_of(self.sess, ty, count);
                }
                shader.function_mut(fid).params[pi].datatype = Some(ty);
                param_tys.push(ty);
            }
            self.function_sigs.insert(fid.0, (ret_ty, param_tys));
        }
    }

    fn validate_function_attribute(&mut self, attr: Option<&Attribute>, loc: SourceLoc) -> FnType {
        match attr {
            None => FnType::Normal,
            Some(a) => {
                let name = self.text(a.name);
                match name.as_str() {
                    "vertex" => {
                        if a.arg.is_some() {
                            self.sess.fail_at(a.loc, "`@vertex` does not take an argument");
                        }
                        FnType::Vertex
                    }
                    "fragment" => {
                        if a.arg.is_some() {
                            self.sess.fail_at(a.loc, "`@fragment` does not take an argument");
                        }
                        FnType::Fragment
                    }
                    other => {
                        self.sess.fail_at(loc, format!("unknown function attribute `@{other}`"));
                        FnType::Normal
                    }
                }
            }
        }
    }

    fn walk_function(&mut self, shader: &mut Shader, fid: FunctionId) {
        self.undefined_seen.clear();
        let (ret_ty, param_tys) = self.function_sigs[&fid.0].clone();
        let fntype = shader.function(fid).fntype;

        self.scopes.push(ScopeKind::Function { return_type: ret_ty, fntype });
        self.scopes.push(ScopeKind::Param);
        let param_count = shader.function(fid).params.len();
        for i in 0..param_count {
            let name = shader.function(fid).params[i].name;
            self.scopes.declare(name, param_tys[i]);
        }

        let mut body = std::mem::take(&mut shader.function_mut(fid).body);
        self.walk_block(&mut body);
        shader.function_mut(fid).body = body;

        self.scopes.pop();
        self.scopes.pop();
    }

    fn walk_block(&mut self, stmts: &mut [Stmt]) {
        let mut opened = 0u32;
        for stmt in stmts.iter_mut() {
            opened += self.walk_stmt(stmt);
        }
        for _ in 0..opened {
            self.scopes.pop();
        }
    }

    /// Runs a single statement as a loop/if body: pushes a fresh block
    /// scope first so an unbraced `if (x) var int y = 1;`-style body
    /// still gets the same per-declaration scoping a braced body would.
    fn walk_body(&mut self, stmt: &mut Stmt) {
        self.scopes.push(ScopeKind::Block);
        let opened = self.walk_stmt(stmt);
        for _ in 0..opened {
            self.scopes.pop();
        }
        self.scopes.pop();
    }

    /// Returns how many extra scope frames this statement left open on
    /// the caller's block (1 for a `var` declaration, 0 otherwise).
    fn walk_stmt(&mut self, stmt: &mut Stmt) -> u32 {
        match &mut stmt.kind {
            StmtKind::Empty | StmtKind::Discard => {
                if matches!(stmt.kind, StmtKind::Discard) {
                    self.check_discard_context(stmt.loc);
                }
                0
            }
            StmtKind::Break { target } => {
                *target = self.scopes.nearest_loop();
                if target.is_none() {
                    self.sess.fail_at(stmt.loc, "break statement must be inside a loop");
                }
                0
            }
            StmtKind::Continue { target } => {
                *target = self.scopes.nearest_loop();
                if target.is_none() {
                    self.sess.fail_at(stmt.loc, "continue statement must be inside a loop");
                }
                0
            }
            StmtKind::VarDecl(decl) => {
                self.scopes.push(ScopeKind::VarDecl);
                self.declare_var(decl);
                1
            }
            StmtKind::Block(stmts) => {
                self.scopes.push(ScopeKind::Block);
                self.walk_block(stmts);
                self.scopes.pop();
                0
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                self.walk_expr(cond);
                self.walk_body(then_branch);
                if let Some(else_branch) = else_branch {
                    self.walk_body(else_branch);
                }
                0
            }
            StmtKind::While { cond, body, loop_id } => {
                self.walk_expr(cond);
                let id = LoopId(self.next_loop_id);
                self.next_loop_id += 1;
                *loop_id = Some(id);
                self.scopes.push(ScopeKind::Loop { loop_id: id });
                self.walk_body(body);
                self.scopes.pop();
                0
            }
            StmtKind::DoWhile { body, cond, loop_id } => {
                let id = LoopId(self.next_loop_id);
                self.next_loop_id += 1;
                *loop_id = Some(id);
                self.scopes.push(ScopeKind::Loop { loop_id: id });
                self.walk_body(body);
                self.scopes.pop();
                self.walk_expr(cond);
                0
            }
            StmtKind::For { details, body, loop_id } => {
                self.scopes.push(ScopeKind::Block);
                let mut opened = 0u32;
                if let Some(init) = &mut details.init {
                    opened += self.walk_stmt(init);
                }
                if let Some(cond) = &mut details.cond {
                    self.walk_expr(cond);
                }
                let id = LoopId(self.next_loop_id);
                self.next_loop_id += 1;
                *loop_id = Some(id);
                self.scopes.push(ScopeKind::Loop { loop_id: id });
                if let Some(step) = &mut details.step {
                    self.walk_stmt(step);
                }
                self.walk_body(body);
                self.scopes.pop();
                for _ in 0..opened {
                    self.scopes.pop();
                }
                self.scopes.pop();
                0
            }
            StmtKind::Return { value } => {
                self.check_return(stmt.loc, value.as_mut());
                0
            }
            StmtKind::Call(expr) => {
                self.walk_expr(expr);
                0
            }
            StmtKind::Assign { targets, value } => {
                self.walk_expr(value);
                let value_ty = value.datatype;
                for target in targets.iter_mut() {
                    self.walk_expr(target);
                    if !target.kind.is_lvalue_shape() {
                        self.sess.fail_at(target.loc, "left-hand side of assignment is not assignable");
                        continue;
                    }
                    if let (Some(vt), Some(tt)) = (value_ty, target.datatype) {
                        if !self.types_match(value, tt) && vt != tt {
                            self.sess.fail_at(stmt.loc, "assignment operand types do not match");
                        }
                    }
                }
                0
            }
            StmtKind::CompoundAssign { op, target, value } => {
                self.walk_expr(target);
                self.walk_expr(value);
                if !target.kind.is_lvalue_shape() {
                    self.sess.fail_at(target.loc, "left-hand side of compound assignment is not assignable");
                }
                if let Some(tt) = target.datatype {
                    let needs_integer = matches!(
                        op,
                        CompoundAssignOp::Shl | CompoundAssignOp::Shr | CompoundAssignOp::And | CompoundAssignOp::Or | CompoundAssignOp::Xor
                    );
                    let ok = if needs_integer { self.types.is_mathish_integer(tt) } else { self.types.is_mathish(tt) };
                    if !ok {
                        self.sess.fail_at(stmt.loc, "compound assignment requires a numeric operand");
                    } else if !self.types_match(value, tt) {
                        self.sess.fail_at(stmt.loc, "compound assignment operand types do not match");
                    }
                }
                0
            }
            StmtKind::IncDec { target, .. } => {
                self.walk_expr(target);
                if !target.kind.is_lvalue_shape() {
                    self.sess.fail_at(target.loc, "increment/decrement target is not assignable");
                } else if let Some(tt) = target.datatype {
                    if !self.types.is_mathish(tt) {
                        self.sess.fail_at(target.loc, "increment/decrement requires a numeric operand");
                    }
                }
                0
            }
        }
    }

    fn check_discard_context(&mut self, loc: SourceLoc) {
        match self.scopes.enclosing_function() {
            Some((_, FnType::Fragment)) => {}
            _ => self.sess.fail_at(loc, "discard statement is only valid inside a @fragment function"),
        }
    }

    fn check_return(&mut self, loc: SourceLoc, value: Option<&mut Expr>) {
        let Some((ret_ty, _)) = self.scopes.enclosing_function() else {
            self.sess.fail_at(loc, "return statement outside of a function");
            if let Some(v) = value {
                self.walk_expr(v);
            }
            return;
        };
        match value {
            Some(v) => {
                self.walk_expr(v);
                if ret_ty == self.types.void {
                    self.sess.fail_at(loc, "void function cannot return a value");
                } else if !self.types_match(v, ret_ty) {
                    self.sess.fail_at(loc, "return value does not match the function's return type");
                }
            }
            None => {
                if ret_ty != self.types.void {
                    self.sess.fail_at(loc, "non-void function must return a value");
                }
            }
        }
    }

    fn declare_var(&mut self, decl: &mut VarDecl) {
        let name_text = self.text(decl.name);
        if is_reserved(&name_text) {
            self.sess.fail_at(decl.loc, format!("`{name_text}` is a reserved word and cannot name a variable"));
        }
        let mut ty = match self.resolve_type_name(decl.type_name) {
            Some(t) => t,
            None => {
                self.sess.fail_at(decl.loc, format!("unknown type `{}`", self.text(decl.type_name)));
                self.types.int
            }
        };
        for bound in std::mem::take(&mut decl.array_bounds) {
            let count = self.eval_const_array_bound(&bound);
            ty = self.types.array_of(self.sess, ty, count);
            decl.array_bounds.push(bound);
        }
        decl.datatype = Some(ty);

        if let Some(init) = &mut decl.init {
            self.walk_expr(init);
            if !self.types_match(init, ty) {
                self.sess.fail_at(decl.loc, format!("initializer type does not match declared type of `{name_text}`"));
            }
        }
        self.scopes.declare(decl.name, ty);
    }

    /// Evaluates a constant array bound. Non-constant expressions and
    /// non-positive results are both errors; a non-positive bound is
    /// replaced with 1 so the rest of the analysis can keep going.
    fn eval_const_array_bound(&mut self, expr: &Expr) -> u32 {
        match self.eval_const_int(expr) {
            Some(v) if v > 0 => v as u32,
            Some(_) => {
                self.sess.fail_at(expr.loc, "array size must be a positive constant");
                1
            }
            None => {
                self.sess.fail_at(expr.loc, "expected a constant expression for array size");
                1
            }
        }
    }

    fn eval_const_int(&self, expr: &Expr) -> Option<i64> {
        match &expr.kind {
            ExprKind::IntLiteral(v) => Some(*v),
            ExprKind::Paren(inner) => self.eval_const_int(inner),
            ExprKind::Unary { op, operand } => {
                let v = self.eval_const_int(operand)?;
                match op {
                    UnaryOp::Plus => Some(v),
                    UnaryOp::Neg => Some(v.wrapping_neg()),
                    UnaryOp::BitNot => Some(!v),
                    UnaryOp::Not => None,
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.eval_const_int(lhs)?;
                let r = self.eval_const_int(rhs)?;
                Some(match op {
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::Div => if r == 0 { 0 } else { l.wrapping_div(r) },
                    BinaryOp::Mod => if r == 0 { 0 } else { l.wrapping_rem(r) },
                    BinaryOp::Shl => l.wrapping_shl(r as u32),
                    BinaryOp::Shr => l.wrapping_shr(r as u32),
                    BinaryOp::BitAnd => l & r,
                    BinaryOp::BitOr => l | r,
                    BinaryOp::BitXor => l ^ r,
                    _ => return None,
                })
            }
            _ => None,
        }
    }

    // --- expression typing -------------------------------------------------

    fn walk_expr(&mut self, expr: &mut Expr) {
        expr.datatype = match &mut expr.kind {
            ExprKind::IntLiteral(_) => Some(self.types.int),
            ExprKind::FloatLiteral(_) => Some(self.types.float),
            ExprKind::BoolLiteral(_) => Some(self.types.bool_),
            ExprKind::Ident(name) => match self.scopes.lookup(*name) {
                Some(ty) => Some(ty),
                None => {
                    self.report_undefined(expr.loc, *name);
                    None
                }
            },
            ExprKind::Paren(inner) => {
                self.walk_expr(inner);
                inner.datatype
            }
            ExprKind::Unary { op, operand } => {
                self.walk_expr(operand);
                self.type_unary(expr.loc, *op, operand)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.walk_expr(lhs);
                self.walk_expr(rhs);
                self.type_binary(expr.loc, *op, lhs, rhs)
            }
            ExprKind::Index { base, index } => {
                self.walk_expr(base);
                self.walk_expr(index);
                self.type_index(expr.loc, base, index)
            }
            ExprKind::Ternary { cond, then_expr, else_expr } => {
                self.walk_expr(cond);
                self.walk_expr(then_expr);
                self.walk_expr(else_expr);
                self.type_ternary(expr.loc, cond, then_expr, else_expr)
            }
            ExprKind::Call { callee, args, resolved } => {
                for a in args.iter_mut() {
                    self.walk_expr(a);
                }
                let (ty, res) = self.resolve_call(expr.loc, *callee, args);
                *resolved = res;
                ty
            }
            ExprKind::Field { base, field, resolved } => {
                self.walk_expr(base);
                let (ty, res) = self.type_field(expr.loc, base, *field);
                *resolved = res;
                ty
            }
        };
    }

    fn report_undefined(&mut self, loc: SourceLoc, name: Symbol) {
        if self.undefined_seen.contains(&name) {
            return;
        }
        if self.undefined_seen.len() < UNDEFINED_REPORT_LIMIT {
            self.sess.fail_at(loc, format!("`{}` is undefined", self.text(name)));
        } else if self.undefined_seen.len() == UNDEFINED_REPORT_LIMIT {
            self.sess.fail_at(loc, "too many undefined items in this function");
        }
        self.undefined_seen.insert(name);
    }

    fn type_unary(&mut self, loc: SourceLoc, op: UnaryOp, operand: &Expr) -> Option<DataTypeId> {
        let ty = operand.datatype?;
        match op {
            UnaryOp::Plus | UnaryOp::Neg => {
                if self.types.is_mathish(ty) {
                    Some(ty)
                } else {
                    self.sess.fail_at(loc, "unary `+`/`-` requires a numeric operand");
                    None
                }
            }
            UnaryOp::BitNot => {
                if self.types.is_mathish_integer(ty) {
                    Some(ty)
                } else {
                    self.sess.fail_at(loc, "`~` requires an integer operand");
                    None
                }
            }
            UnaryOp::Not => {
                if self.types.is_booleanish(ty) {
                    Some(ty)
                } else {
                    self.sess.fail_at(loc, "`!` requires a boolean operand");
                    None
                }
            }
        }
    }

    /// Returns the type the two operands agree on, promoting an integer
    /// or float literal on either side to the other side's type when the
    /// non-literal side accepts that kind of literal.
    fn unify_operand_types(&self, a: &Expr, b: &Expr) -> Option<DataTypeId> {
        let (at, bt) = (a.datatype?, b.datatype?);
        if at == bt {
            return Some(at);
        }
        if matches!(a.kind, ExprKind::IntLiteral(_) | ExprKind::FloatLiteral(_)) && self.types_match(a, bt) {
            return Some(bt);
        }
        if matches!(b.kind, ExprKind::IntLiteral(_) | ExprKind::FloatLiteral(_)) && self.types_match(b, at) {
            return Some(at);
        }
        None
    }

    fn types_match(&self, value: &Expr, target: DataTypeId) -> bool {
        match value.datatype {
            Some(t) if t == target => true,
            _ => match value.kind {
                ExprKind::IntLiteral(_) => self.types.accepts_int_literal(target),
                ExprKind::FloatLiteral(_) => self.types.accepts_float_literal(target),
                _ => false,
            },
        }
    }

    fn type_binary(&mut self, loc: SourceLoc, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Option<DataTypeId> {
        use BinaryOp::*;
        match op {
            Add | Sub | Div => {
                let ty = self.unify_operand_types(lhs, rhs)?;
                if self.types.is_mathish(ty) {
                    Some(ty)
                } else {
                    self.sess.fail_at(loc, "arithmetic operator requires numeric operands");
                    None
                }
            }
            Mul => self.type_mul(loc, lhs.datatype?, rhs.datatype?),
            Mod | Shl | Shr | BitAnd | BitOr | BitXor => {
                let ty = self.unify_operand_types(lhs, rhs)?;
                if self.types.is_mathish_integer(ty) {
                    Some(ty)
                } else {
                    self.sess.fail_at(loc, "bitwise/modulo operator requires integer operands");
                    None
                }
            }
            Lt | Gt | Le | Ge => {
                let ty = self.unify_operand_types(lhs, rhs)?;
                if self.types.is_mathish(ty) {
                    Some(self.types.bool_)
                } else {
                    self.sess.fail_at(loc, "relational operator requires numeric operands");
                    None
                }
            }
            EqEq | Ne => {
                if self.unify_operand_types(lhs, rhs).is_some() {
                    Some(self.types.bool_)
                } else {
                    self.sess.fail_at(loc, "`==`/`!=` operands must have the same type");
                    None
                }
            }
            And | Or => {
                let (lt, rt) = (lhs.datatype?, rhs.datatype?);
                if self.types.is_booleanish(lt) && self.types.is_booleanish(rt) {
                    Some(self.types.bool_)
                } else {
                    self.sess.fail_at(loc, "`&&`/`||` require boolean operands");
                    None
                }
            }
        }
    }

    fn type_mul(&mut self, loc: SourceLoc, lt: DataTypeId, rt: DataTypeId) -> Option<DataTypeId> {
        if lt == rt && self.types.is_mathish(lt) {
            return Some(lt);
        }
        if self.types.vector_scalar(lt) == Some(rt) {
            return Some(lt);
        }
        if self.types.vector_scalar(rt) == Some(lt) {
            return Some(rt);
        }
        if self.types.is_matrix(lt) && rt == self.types.matrix_base_scalar(lt).unwrap_or(self.types.void) {
            return Some(lt);
        }
        if self.types.is_matrix(rt) && lt == self.types.matrix_base_scalar(rt).unwrap_or(self.types.void) {
            return Some(rt);
        }
        if let Some(row) = self.types.matrix_row_vector(lt) {
            if row == rt {
                return Some(row);
            }
        }
        if let Some(row) = self.types.matrix_row_vector(rt) {
            if row == lt {
                return Some(row);
            }
        }
        self.sess.fail_at(loc, "invalid operand types for `*`");
        None
    }

    fn type_index(&mut self, loc: SourceLoc, base: &Expr, index: &Expr) -> Option<DataTypeId> {
        let index_ty = index.datatype?;
        if !matches!(self.types.base_scalar_kind(index_ty), Some(ScalarKind::Int | ScalarKind::Uint)) {
            self.sess.fail_at(index.loc, "array/vector index must be an integer");
        }
        let base_ty = base.datatype?;
        match self.types.get(base_ty).kind.clone() {
            DataTypeKind::Array { element, count } => {
                if let Some(v) = self.eval_const_int(index) {
                    if v < 0 || v as u32 >= count {
                        self.sess.fail_at(loc, "array index out of bounds");
                    }
                }
                Some(element)
            }
            DataTypeKind::Vector { scalar, .. } => Some(scalar),
            DataTypeKind::Matrix { row_vector, .. } => Some(row_vector),
            _ => {
                self.sess.fail_at(loc, "indexed value is not an array, vector, or matrix");
                None
            }
        }
    }

    fn type_ternary(&mut self, loc: SourceLoc, cond: &Expr, then_expr: &Expr, else_expr: &Expr) -> Option<DataTypeId> {
        if let Some(ct) = cond.datatype {
            if !self.types.is_booleanish(ct) {
                self.sess.fail_at(cond.loc, "ternary condition must be boolean");
            }
        }
        let (tt, et) = (then_expr.datatype?, else_expr.datatype?);
        if tt == et || self.types_match(else_expr, tt) {
            Some(tt)
        } else if self.types_match(then_expr, et) {
            Some(et)
        } else {
            self.sess.fail_at(loc, "ternary branches have different types");
            None
        }
    }

    fn type_field(&mut self, loc: SourceLoc, base: &Expr, field: Symbol) -> (Option<DataTypeId>, Option<FieldResolution>) {
        let Some(base_ty) = base.datatype else { return (None, None) };
        match self.types.get(base_ty).kind.clone() {
            DataTypeKind::Struct { members } => {
                match members.iter().position(|(n, _)| *n == field) {
                    Some(idx) => {
                        let struct_id = self.type_struct_ids.get(&base_ty).copied().map(StructId);
                        (Some(members[idx].1), struct_id.map(|sid| FieldResolution::Member { struct_id: sid, index: idx as u32 }))
                    }
                    None => {
                        self.sess.fail_at(loc, format!("no member `{}` on this struct", self.text(field)));
                        (None, None)
                    }
                }
            }
            DataTypeKind::Vector { scalar, count } => {
                let text = self.text(field);
                match swizzle_components(&text, count) {
                    Some(components) => {
                        let ty = if components.len() == 1 {
                            scalar
                        } else {
                            self.types.vector_of_scalar(scalar, components.len() as u8)
                        };
                        (Some(ty), Some(FieldResolution::Swizzle(SwizzleSpec { components })))
                    }
                    None => {
                        self.sess.fail_at(loc, format!("`{text}` is not a valid swizzle for this vector"));
                        (None, None)
                    }
                }
            }
            _ => {
                self.sess.fail_at(loc, "field access requires a struct or vector operand");
                (None, None)
            }
        }
    }

    fn resolve_call(&mut self, loc: SourceLoc, callee: Symbol, args: &[Expr]) -> (Option<DataTypeId>, Option<CalleeResolution>) {
        if let Some(&fid) = self.functions.get(&callee) {
            let (ret_ty, param_tys) = self.function_sigs[&fid.0].clone();
            if args.len() != param_tys.len() {
                self.sess.fail_at(loc, format!("`{}` expects {} argument(s), found {}", self.text(callee), param_tys.len(), args.len()));
            } else {
                for (arg, &pty) in args.iter().zip(param_tys.iter()) {
                    if !self.types_match(arg, pty) {
                        self.sess.fail_at(arg.loc, "argument type does not match parameter type");
                    }
                }
            }
            return (Some(ret_ty), Some(CalleeResolution::Function(fid)));
        }
        if let Some(dtid) = self.types.lookup(callee) {
            self.check_constructor_call(loc, dtid, args);
            return (Some(dtid), Some(CalleeResolution::Constructor(dtid)));
        }
        if self.scopes.lookup(callee).is_some() {
            self.sess.fail_at(loc, format!("`{}` is not a function", self.text(callee)));
            return (None, None);
        }
        self.report_undefined(loc, callee);
        (None, None)
    }

    /// Constructor calls (`float3(1, 2, 3)`, `Light(...)`) are accepted
    /// without checking that the argument count or types line up with
    /// the target's components. A real constructor-arity check belongs
    /// here once the grammar settles on how partial constructors
    /// (`float4(v3, 1.0)`) should type-check.
    fn check_constructor_call(&mut self, _loc: SourceLoc, _target: DataTypeId, _args: &[Expr]) {}
}

fn swizzle_components(text: &str, vector_len: u8) -> Option<Vec<u8>> {
    if text.is_empty() || text.len() > 4 {
        return None;
    }
    let xyzw = |c: char| match c {
        'x' => Some(0u8),
        'y' => Some(1),
        'z' => Some(2),
        'w' => Some(3),
        _ => None,
    };
    let rgba = |c: char| match c {
        'r' => Some(0u8),
        'g' => Some(1),
        'b' => Some(2),
        'a' => Some(3),
        _ => None,
    };
    let via_xyzw: Option<Vec<u8>> = text.chars().map(xyzw).collect();
    let via_rgba: Option<Vec<u8>> = text.chars().map(rgba).collect();
    let components = via_xyzw.or(via_rgba)?;
    if components.iter().any(|&c| c >= vector_len) {
        return None;
    }
    Some(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdlsl_parse::Parser;
    use sdlsl_pp::{Preprocessor, PpOptions};
    use std::rc::Rc;

    fn analyze_src(src: &str) -> (Shader, Session, DataTypeTable) {
        let sess = Session::new();
        let filename = sess.intern("test.sdlsl");
        let pp = Preprocessor::new(
            &sess,
            filename,
            Rc::from(src),
            PpOptions::default(),
            |name: &str, _sys: bool, _sess: &Session| Err(format!("no such file: {name}")),
        );
        let mut parser = Parser::new(pp, &sess);
        let mut shader = parser.parse_shader();
        drop(parser);
        let types = analyze(&sess, &mut shader);
        (shader, sess, types)
    }

    #[test]
    fn simple_function_type_checks_clean() {
        let (_shader, sess, _types) =
            analyze_src("function float4 vertex_main(pos : float3) @vertex { return float4(pos, 1.0); }");
        assert!(!sess.is_failed());
    }

    #[test]
    fn swizzle_gets_correct_vector_type() {
        let (shader, sess, types) = analyze_src(
            "function void f() { var float4 v = float4(1.0, 2.0, 3.0, 4.0); var float3 u = v.xyz; }",
        );
        assert!(!sess.is_failed());
        let TranslationUnit::Function(f) = &shader.units[0] else { panic!() };
        let StmtKind::VarDecl(decl) = &f.body[1].kind else { panic!() };
        let init = decl.init.as_ref().unwrap();
        assert_eq!(init.datatype, Some(types.lookup(sess.intern("float3")).unwrap()));
    }

    #[test]
    fn forward_reference_to_later_function_resolves() {
        let (_shader, sess, _types) = analyze_src(
            "function void a() { helper(); } function void helper() { }",
        );
        assert!(!sess.is_failed());
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let (shader, sess, _types) = analyze_src("function void f() { break; }");
        assert!(sess.is_failed());
        let TranslationUnit::Function(f) = &shader.units[0] else { panic!() };
        match &f.body[0].kind {
            StmtKind::Break { target } => assert!(target.is_none()),
            other => panic!("expected break, got {other:?}"),
        }
    }

    #[test]
    fn break_inside_loop_resolves_target() {
        let (shader, sess, _types) = analyze_src("function void f() { while (true) { break; } }");
        assert!(!sess.is_failed());
        let TranslationUnit::Function(f) = &shader.units[0] else { panic!() };
        let StmtKind::While { body, .. } = &f.body[0].kind else { panic!() };
        let StmtKind::Block(stmts) = &body.kind else { panic!() };
        match &stmts[0].kind {
            StmtKind::Break { target } => assert!(target.is_some()),
            other => panic!("expected break, got {other:?}"),
        }
    }

    #[test]
    fn discard_outside_fragment_function_is_an_error() {
        let (_shader, sess, _types) = analyze_src("function void f() { discard; }");
        assert!(sess.is_failed());
    }

    #[test]
    fn discard_inside_fragment_function_is_fine() {
        let (_shader, sess, _types) = analyze_src("function float4 f() @fragment { discard; return float4(0.0, 0.0, 0.0, 0.0); }");
        assert!(!sess.is_failed());
    }

    #[test]
    fn undefined_symbol_reported_once_per_function() {
        let (_shader, sess, _types) = analyze_src("function void f() { var int a = undefined_thing; var int b = undefined_thing; }");
        assert!(sess.is_failed());
        assert_eq!(sess.handler.borrow().errors().iter().filter(|e| e.message.contains("undefined")).count(), 1);
    }

    #[test]
    fn struct_member_types_resolve_including_arrays() {
        let (shader, sess, types) = analyze_src("struct Light { float3 color; float weights[4]; };");
        assert!(!sess.is_failed());
        let TranslationUnit::Struct(s) = &shader.units[0] else { panic!() };
        assert_eq!(s.members[0].datatype, types.lookup(sess.intern("float3")));
        assert!(types.get(s.members[1].datatype.unwrap()).name == sess.intern("float[4]"));
    }

    #[test]
    fn array_size_must_be_constant() {
        let (_shader, sess, _types) = analyze_src("function void f() { var int n = 4; var float xs[n]; }");
        assert!(sess.is_failed());
    }

    #[test]
    fn constructor_call_is_accepted_without_arity_check() {
        let (_shader, sess, _types) = analyze_src("function void f() { var float2 v = float2(1.0, 2.0, 3.0, 4.0); }");
        assert!(!sess.is_failed());
    }

    #[test]
    fn redefinition_of_function_is_reported() {
        let (_shader, sess, _types) = analyze_src("function void f() { } function void f() { }");
        assert!(sess.is_failed());
    }

    #[test]
    fn vector_scalar_multiply_and_relational() {
        let (_shader, sess, _types) =
            analyze_src("function void f() { var float3 v = float3(1.0, 1.0, 1.0) * 2.0; var bool b = 1 < 2; }");
        assert!(!sess.is_failed());
    }
}
