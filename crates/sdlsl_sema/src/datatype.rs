//! The datatype universe: scalars, vectors, matrices, arrays, and structs,
//! each stored exactly once and addressed by `DataTypeId` — the realization
//! of "two AST nodes have the same datatype iff they point to the same
//! object" without raw pointers (index equality stands in for pointer
//! equality, the same trick `sdlsl_span::Symbol` uses for identifiers).

use rustc_hash::FxHashMap;
use sdlsl_ast::DataTypeId;
use sdlsl_errors::Session;
use sdlsl_span::Symbol;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Half,
    Float,
}

const SCALARS: [(&str, ScalarKind); 5] = [
    ("bool", ScalarKind::Bool),
    ("int", ScalarKind::Int),
    ("uint", ScalarKind::Uint),
    ("half", ScalarKind::Half),
    ("float", ScalarKind::Float),
];

#[derive(Clone, Debug)]
pub enum DataTypeKind {
    Void,
    Scalar(ScalarKind),
    Vector { scalar: DataTypeId, count: u8 },
    /// `child datatype (vector), row count` per the data model: each row is
    /// a `row_vector`-shaped vector, and there are `rows` of them.
    Matrix { row_vector: DataTypeId, rows: u8 },
    Array { element: DataTypeId, count: u32 },
    Struct { members: Vec<(Symbol, DataTypeId)> },
}

#[derive(Clone, Debug)]
pub struct DataType {
    pub name: Symbol,
    pub kind: DataTypeKind,
}

pub struct DataTypeTable {
    types: Vec<DataType>,
    by_name: FxHashMap<Symbol, DataTypeId>,
    vector_ids: FxHashMap<(ScalarKind, u8), DataTypeId>,
    pub void: DataTypeId,
    pub bool_: DataTypeId,
    pub int: DataTypeId,
    pub uint: DataTypeId,
    pub half: DataTypeId,
    pub float: DataTypeId,
}

impl DataTypeTable {
    /// Pre-populates `void`, the five scalars, vectors `Tn` for `n` in
    /// 2..=4, and matrices `TnxM` for `n, m` in 2..=4 — one table entry per
    /// generated type, named the way SDLSL source spells it (`float3`,
    /// `int2x4`, …).
    pub fn new(sess: &Session) -> Self {
        let mut types = Vec::new();
        let mut by_name = FxHashMap::default();
        let mut vector_ids = FxHashMap::default();

        let mut insert = |types: &mut Vec<DataType>, by_name: &mut FxHashMap<Symbol, DataTypeId>, name: Symbol, kind: DataTypeKind| -> DataTypeId {
            let id = DataTypeId(types.len() as u32);
            types.push(DataType { name, kind });
            by_name.insert(name, id);
            id
        };

        let void_sym = sess.intern("void");
        let void = insert(&mut types, &mut by_name, void_sym, DataTypeKind::Void);

        let mut scalar_ids: FxHashMap<ScalarKind, DataTypeId> = FxHashMap::default();
        for (text, kind) in SCALARS {
            let sym = sess.intern(text);
            let id = insert(&mut types, &mut by_name, sym, DataTypeKind::Scalar(kind));
            scalar_ids.insert(kind, id);
        }

        for (text, kind) in SCALARS {
            let base = scalar_ids[&kind];
            for n in 2..=4u8 {
                let sym = sess.intern(&format!("{text}{n}"));
                let id = insert(&mut types, &mut by_name, sym, DataTypeKind::Vector { scalar: base, count: n });
                vector_ids.insert((kind, n), id);
            }
        }

        for (text, kind) in SCALARS {
            for rows in 2..=4u8 {
                for cols in 2..=4u8 {
                    let sym = sess.intern(&format!("{text}{rows}x{cols}"));
                    let row_vector = vector_ids[&(kind, cols)];
                    insert(&mut types, &mut by_name, sym, DataTypeKind::Matrix { row_vector, rows });
                }
            }
        }

        let bool_ = scalar_ids[&ScalarKind::Bool];
        let int = scalar_ids[&ScalarKind::Int];
        let uint = scalar_ids[&ScalarKind::Uint];
        let half = scalar_ids[&ScalarKind::Half];
        let float = scalar_ids[&ScalarKind::Float];

        DataTypeTable { types, by_name, vector_ids, void, bool_, int, uint, half, float }
    }

    pub fn get(&self, id: DataTypeId) -> &DataType {
        &self.types[id.0 as usize]
    }

    pub fn lookup(&self, name: Symbol) -> Option<DataTypeId> {
        self.by_name.get(&name).copied()
    }

    fn insert_new(&mut self, name: Symbol, kind: DataTypeKind) -> DataTypeId {
        let id = DataTypeId(self.types.len() as u32);
        self.types.push(DataType { name, kind });
        self.by_name.insert(name, id);
        id
    }

    /// Creates a name-only stub so structs may reference each other (and
    /// themselves) before any member is resolved. Idempotent: calling it
    /// twice for the same name returns the existing stub.
    pub fn declare_struct_stub(&mut self, name: Symbol) -> DataTypeId {
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        self.insert_new(name, DataTypeKind::Struct { members: Vec::new() })
    }

    pub fn fill_struct(&mut self, id: DataTypeId, members: Vec<(Symbol, DataTypeId)>) {
        if let DataTypeKind::Struct { members: slot } = &mut self.types[id.0 as usize].kind {
            *slot = members;
        }
    }

    /// Array types are created lazily on first use, keyed by `"base[N]"`.
    pub fn array_of(&mut self, sess: &Session, element: DataTypeId, count: u32) -> DataTypeId {
        let base_name = sess.interner.borrow().get(self.get(element).name).to_string();
        let sym = sess.intern(&format!("{base_name}[{count}]"));
        if let Some(&id) = self.by_name.get(&sym) {
            return id;
        }
        self.insert_new(sym, DataTypeKind::Array { element, count })
    }

    pub fn vector_of_scalar(&self, scalar: DataTypeId, count: u8) -> DataTypeId {
        let kind = self.base_scalar_kind(scalar).expect("vector_of_scalar requires a scalar datatype");
        self.vector_ids[&(kind, count)]
    }

    /// The underlying scalar kind of a scalar, vector, or matrix datatype;
    /// `None` for `void`, arrays, and structs.
    pub fn base_scalar_kind(&self, id: DataTypeId) -> Option<ScalarKind> {
        match &self.get(id).kind {
            DataTypeKind::Scalar(k) => Some(*k),
            DataTypeKind::Vector { scalar, .. } => self.base_scalar_kind(*scalar),
            DataTypeKind::Matrix { row_vector, .. } => self.base_scalar_kind(*row_vector),
            _ => None,
        }
    }

    pub fn is_mathish(&self, id: DataTypeId) -> bool {
        matches!(self.base_scalar_kind(id), Some(ScalarKind::Int | ScalarKind::Uint | ScalarKind::Half | ScalarKind::Float))
    }

    pub fn is_mathish_integer(&self, id: DataTypeId) -> bool {
        matches!(self.base_scalar_kind(id), Some(ScalarKind::Int | ScalarKind::Uint))
    }

    pub fn is_booleanish(&self, id: DataTypeId) -> bool {
        matches!(self.base_scalar_kind(id), Some(ScalarKind::Bool))
    }

    pub fn is_matrix(&self, id: DataTypeId) -> bool {
        matches!(self.get(id).kind, DataTypeKind::Matrix { .. })
    }

    pub fn vector_scalar(&self, id: DataTypeId) -> Option<DataTypeId> {
        match self.get(id).kind {
            DataTypeKind::Vector { scalar, .. } => Some(scalar),
            _ => None,
        }
    }

    pub fn matrix_row_vector(&self, id: DataTypeId) -> Option<DataTypeId> {
        match self.get(id).kind {
            DataTypeKind::Matrix { row_vector, .. } => Some(row_vector),
            _ => None,
        }
    }

    pub fn matrix_base_scalar(&self, id: DataTypeId) -> Option<DataTypeId> {
        match self.get(id).kind {
            DataTypeKind::Matrix { row_vector, .. } => self.vector_scalar(row_vector).or_else(|| self.matrix_base_scalar(row_vector)),
            _ => None,
        }
    }

    pub fn accepts_int_literal(&self, target: DataTypeId) -> bool {
        self.is_mathish(target)
    }

    pub fn accepts_float_literal(&self, target: DataTypeId) -> bool {
        matches!(self.base_scalar_kind(target), Some(ScalarKind::Half) | Some(ScalarKind::Float))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_and_vectors_are_generated() {
        let sess = Session::new();
        let table = DataTypeTable::new(&sess);
        assert_eq!(table.lookup(sess.intern("float")), Some(table.float));
        let float3 = table.lookup(sess.intern("float3")).unwrap();
        assert!(table.is_mathish(float3));
        assert_eq!(table.vector_scalar(float3), Some(table.float));
    }

    #[test]
    fn matrices_reference_their_row_vector() {
        let sess = Session::new();
        let table = DataTypeTable::new(&sess);
        let mat = table.lookup(sess.intern("float3x4")).unwrap();
        let row = table.matrix_row_vector(mat).unwrap();
        assert_eq!(row, table.lookup(sess.intern("float4")).unwrap());
    }

    #[test]
    fn array_of_is_created_lazily_and_deduplicated() {
        let sess = Session::new();
        let mut table = DataTypeTable::new(&sess);
        let a = table.array_of(&sess, table.int, 4);
        let b = table.array_of(&sess, table.int, 4);
        assert_eq!(a, b);
        let c = table.array_of(&sess, table.int, 5);
        assert_ne!(a, c);
    }

    #[test]
    fn struct_stub_then_fill_supports_self_reference() {
        let sess = Session::new();
        let mut table = DataTypeTable::new(&sess);
        let node_sym = sess.intern("Node");
        let stub = table.declare_struct_stub(node_sym);
        table.fill_struct(stub, vec![(sess.intern("next"), stub)]);
        match &table.get(stub).kind {
            DataTypeKind::Struct { members } => assert_eq!(members[0].1, stub),
            _ => panic!("expected struct"),
        }
    }
}
