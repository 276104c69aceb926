//! Heap objects.
//!
//! Every value that does not fit in a register word lives in a heap
//! [`Object`]: a header (collector status plus an intrusive list link) and a
//! kind payload. Objects are allocated individually and owned by exactly one
//! list at a time - a VM's heap list, a program's bound list, or the runtime
//! context's permanent list - which is the list that frees them.
//!
//! [`ObjectRef`] is a copyable pointer wrapper. The accessors hand out
//! references into the payload; the runtime is single-threaded per VM and
//! touches one object at a time, which is the invariant that keeps the
//! `kind_mut` access sound.

use core::cell::Cell;
use core::fmt;
use core::mem;
use core::ptr::NonNull;

use ecow::EcoString;
use smallvec::SmallVec;

use crate::builtin::NativeFn;
use crate::value::Value;

pub mod dictionary;
pub use dictionary::Dictionary;


/// Collector status. `Unmanaged` objects are never freed by the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectStatus {
    Unmanaged,
    Unmarked,
    Marked,
}

/// Discriminator for the kind of a heap object, used to key veneer classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    String,
    Function,
    Closure,
    Upvalue,
    Class,
    Instance,
    Dictionary,
    List,
    Array,
    Range,
    Invocation,
    Builtin,
}

impl ObjectType {
    pub const COUNT: usize = 12;

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectType::String => "String",
            ObjectType::Function => "Function",
            ObjectType::Closure => "Closure",
            ObjectType::Upvalue => "Upvalue",
            ObjectType::Class => "Class",
            ObjectType::Instance => "Instance",
            ObjectType::Dictionary => "Dictionary",
            ObjectType::List => "List",
            ObjectType::Array => "Array",
            ObjectType::Range => "Range",
            ObjectType::Invocation => "Invocation",
            ObjectType::Builtin => "Builtin",
        }
    }
}

/// A byte string. Interned strings are canonical: symbol lookup compares
/// them by identity.
#[derive(Debug, Clone)]
pub struct ObjString {
    pub text: EcoString,
    pub interned: bool,
}

/// An optional parameter of a function: the interned symbol naming it and
/// the constant-table index of its default value.
#[derive(Clone, Copy, Debug)]
pub struct OptionalParam {
    pub symbol: Value,
    pub def: usize,
}

/// One upvalue capture directive in a closure prototype: either capture a
/// local register of the enclosing frame or forward an upvalue of the
/// enclosing closure.
#[derive(Clone, Copy, Debug)]
pub struct UpvalueProto {
    pub is_local: bool,
    pub index: usize,
}

/// A compiled function: entry point, arity and adaptation metadata, its
/// constant table and the upvalue prototypes of every closure site in its
/// body.
pub struct ObjFunction {
    pub name: Value,
    pub entry: usize,
    pub nargs: usize,
    pub nregs: usize,
    pub varg: Option<usize>,
    pub opt: Vec<OptionalParam>,
    pub konst: Vec<Value>,
    pub prototypes: Vec<SmallVec<[UpvalueProto; 4]>>,
}

impl ObjFunction {
    pub fn new(name: Value, entry: usize, nargs: usize, nregs: usize) -> Self {
        ObjFunction {
            name,
            entry,
            nargs,
            nregs,
            varg: None,
            opt: Vec::new(),
            konst: Vec::new(),
            prototypes: Vec::new(),
        }
    }

    /// Adds a constant, returning its index.
    pub fn add_constant(&mut self, v: Value) -> usize {
        self.konst.push(v);
        self.konst.len() - 1
    }

    /// Adds an upvalue prototype for one closure site, returning its slot.
    pub fn add_prototype(&mut self, captures: &[UpvalueProto]) -> usize {
        self.prototypes.push(SmallVec::from_slice(captures));
        self.prototypes.len() - 1
    }

    /// Whether calls must run the optional/variadic argument adapter.
    pub fn has_adaptation(&self) -> bool {
        !self.opt.is_empty() || self.varg.is_some()
    }
}

/// A closure: a function plus its captured upvalues.
pub struct ObjClosure {
    pub func: ObjectRef,
    pub upvalues: Vec<ObjectRef>,
}

/// Where an upvalue's storage currently is.
#[derive(Clone, Copy, Debug)]
pub enum UpvalueLoc {
    /// Absolute slot in the VM stack.
    Open(usize),
    /// The value has been moved into the upvalue's own cell.
    Closed(Value),
}

/// A boxed captured variable. Open while the variable still lives on the
/// stack, closed once its frame returned.
pub struct ObjUpvalue {
    pub loc: Cell<UpvalueLoc>,
}

impl ObjUpvalue {
    pub fn open_at(&self) -> Option<usize> {
        match self.loc.get() {
            UpvalueLoc::Open(slot) => Some(slot),
            UpvalueLoc::Closed(_) => None,
        }
    }
}

/// A class: name, optional superclass, method dictionary.
pub struct ObjClass {
    pub name: Value,
    pub superclass: Option<ObjectRef>,
    pub methods: Dictionary,
}

/// An instance of a user class.
pub struct ObjInstance {
    pub class: ObjectRef,
    pub fields: Dictionary,
}

/// A growable array of values.
pub struct ObjList {
    pub items: Vec<Value>,
}

impl ObjList {
    /// Signed indexing: negative indices count from the back.
    pub fn get_element(&self, i: i64) -> Option<Value> {
        let n = self.items.len() as i64;
        if i >= -n && i < n {
            let idx = if i >= 0 { i } else { n + i } as usize;
            Some(self.items[idx])
        } else {
            None
        }
    }

    pub fn set_element(&mut self, i: i64, v: Value) -> bool {
        let n = self.items.len() as i64;
        if i >= -n && i < n {
            let idx = if i >= 0 { i } else { n + i } as usize;
            self.items[idx] = v;
            true
        } else {
            false
        }
    }
}

/// A fixed-shape n-dimensional array. The leading cells of `data` store the
/// dimension sizes as integer values; the elements follow in column-major
/// order.
pub struct ObjArray {
    pub ndim: usize,
    pub nelements: usize,
    pub data: Vec<Value>,
}

impl ObjArray {
    pub fn new(dims: &[usize]) -> Self {
        let nelements: usize = dims.iter().product();
        let mut data = Vec::with_capacity(dims.len() + nelements);
        for &d in dims {
            data.push(Value::Int(d as i32));
        }
        data.resize(dims.len() + nelements, Value::Nil);
        ObjArray {
            ndim: dims.len(),
            nelements,
            data,
        }
    }

    pub fn dimension(&self, i: usize) -> usize {
        match self.data[i] {
            Value::Int(d) => d as usize,
            _ => 0,
        }
    }

    /// Flattens a multi-index to an element offset in `data`, or `None` when
    /// out of bounds.
    pub fn element_index(&self, indices: &[usize]) -> Option<usize> {
        let mut ix = 0usize;
        let mut mul = 1usize;
        for (i, &idx) in indices.iter().enumerate() {
            let dim = self.dimension(i);
            if idx >= dim {
                return None;
            }
            ix += mul * idx;
            mul *= dim;
        }
        Some(self.ndim + ix)
    }

    fn convert_indices(
        &self,
        indices: &[Value],
    ) -> Result<SmallVec<[usize; 4]>, &'static str> {
        if indices.len() != self.ndim {
            return Err(crate::error::ARRAY_WRONG_DIM);
        }
        let mut out = SmallVec::new();
        for v in indices {
            out.push(value_to_index(v)?);
        }
        Ok(out)
    }

    /// Point access by a full multi-index.
    pub fn get(&self, indices: &[Value]) -> Result<Value, &'static str> {
        let idx = self.convert_indices(indices)?;
        let el = self
            .element_index(&idx)
            .ok_or(crate::error::OUT_OF_BOUNDS)?;
        Ok(self.data[el])
    }

    /// Point write by a full multi-index.
    pub fn set(&mut self, indices: &[Value], v: Value) -> Result<(), &'static str> {
        let idx = self.convert_indices(indices)?;
        let el = self
            .element_index(&idx)
            .ok_or(crate::error::OUT_OF_BOUNDS)?;
        self.data[el] = v;
        Ok(())
    }

    /// Slice access: each per-dimension index is a single number, a list of
    /// numbers, or a range; the result is a fresh array shaped by the
    /// selection counts.
    pub fn slice(&self, indices: &[Value]) -> Result<ObjArray, &'static str> {
        if indices.len() != self.ndim {
            return Err(crate::error::ARRAY_WRONG_DIM);
        }
        let mut selections: Vec<Vec<usize>> = Vec::with_capacity(self.ndim);
        for v in indices {
            selections.push(slice_selection(v)?);
        }
        let dims: Vec<usize> = selections.iter().map(|s| s.len()).collect();
        let mut out = ObjArray::new(&dims);

        // Odometer over the output shape, mapping back to source indices.
        let total: usize = dims.iter().product();
        let mut counter = vec![0usize; self.ndim];
        let mut src = SmallVec::<[usize; 4]>::new();
        for n in 0..total {
            src.clear();
            for (d, &c) in counter.iter().enumerate() {
                src.push(selections[d][c]);
            }
            let el = self
                .element_index(&src)
                .ok_or(crate::error::OUT_OF_BOUNDS)?;
            out.data[out.ndim + n] = self.data[el];

            for d in 0..self.ndim {
                counter[d] += 1;
                if counter[d] < dims[d] {
                    break;
                }
                counter[d] = 0;
            }
        }
        Ok(out)
    }
}

/// Converts a numeric index value. Non-numeric values are a different error
/// from out-of-range ones so scripts can tell them apart.
fn value_to_index(v: &Value) -> Result<usize, &'static str> {
    match v {
        Value::Int(i) => {
            if *i >= 0 {
                Ok(*i as usize)
            } else {
                Err(crate::error::OUT_OF_BOUNDS)
            }
        }
        Value::Float(f) => {
            if *f >= 0.0 {
                Ok(*f as usize)
            } else {
                Err(crate::error::OUT_OF_BOUNDS)
            }
        }
        _ => Err(crate::error::NON_NUMERIC_INDEX),
    }
}

/// The per-dimension index set a slice expression selects.
fn slice_selection(v: &Value) -> Result<Vec<usize>, &'static str> {
    if v.is_number() {
        return Ok(vec![value_to_index(v)?]);
    }
    match v.as_object().map(|o| o.kind()) {
        Some(ObjectKind::List(l)) => {
            let mut out = Vec::with_capacity(l.items.len());
            for item in &l.items {
                out.push(value_to_index(item)?);
            }
            Ok(out)
        }
        Some(ObjectKind::Range(r)) => {
            let mut out = Vec::with_capacity(r.count);
            for i in 0..r.count {
                out.push(value_to_index(&r.iterate(i))?);
            }
            Ok(out)
        }
        _ => Err(crate::error::NON_NUMERIC_INDEX),
    }
}

/// A numeric progression with a precomputed length.
pub struct ObjRange {
    pub start: Value,
    pub end: Value,
    pub step: Value,
    pub count: usize,
}

impl ObjRange {
    /// Builds a range, promoting the endpoints and step to a common numeric
    /// type. `step` may be nil for the default of 1.
    pub fn new(start: Value, end: Value, step: Value) -> Option<Self> {
        let any_float = matches!(start, Value::Float(_))
            || matches!(end, Value::Float(_))
            || matches!(step, Value::Float(_));
        if !start.is_number() || !end.is_number() || !(step.is_nil() || step.is_number()) {
            return None;
        }
        let (start, end, step) = if any_float {
            (
                Value::Float(start.to_float()?),
                Value::Float(end.to_float()?),
                if step.is_nil() {
                    Value::Nil
                } else {
                    Value::Float(step.to_float()?)
                },
            )
        } else {
            (start, end, step)
        };
        let mut range = ObjRange {
            start,
            end,
            step,
            count: 0,
        };
        range.count = range.count_steps();
        Some(range)
    }

    fn count_steps(&self) -> usize {
        let steps = if let Value::Float(start) = self.start {
            let end = self.end.to_float().unwrap_or(start);
            let step = match self.step {
                Value::Nil => 1.0,
                ref s => s.to_float().unwrap_or(1.0),
            };
            ((end - start) / step) as i64
        } else {
            let start = self.start.as_int().unwrap_or(0);
            let end = self.end.as_int().unwrap_or(start);
            let step = match self.step {
                Value::Nil => 1,
                ref s => s.as_int().unwrap_or(1),
            };
            ((end - start) / step) as i64
        };
        if steps >= 0 { steps as usize + 1 } else { 0 }
    }

    /// The i-th element of the progression.
    pub fn iterate(&self, i: usize) -> Value {
        match self.start {
            Value::Float(start) => {
                let step = match self.step {
                    Value::Nil => 1.0,
                    ref s => s.to_float().unwrap_or(1.0),
                };
                Value::Float(start + i as f64 * step)
            }
            Value::Int(start) => {
                let step = match self.step {
                    Value::Nil => 1,
                    ref s => s.as_int().unwrap_or(1),
                };
                Value::Int(start.wrapping_add((i as i32).wrapping_mul(step)))
            }
            _ => Value::Nil,
        }
    }
}

/// A bound (receiver, method) pair; itself callable.
pub struct ObjInvocation {
    pub receiver: Value,
    pub method: Value,
}

/// A native function exposed to scripts.
pub struct ObjBuiltin {
    pub name: EcoString,
    pub func: NativeFn,
}

/// The kind payload of a heap object.
pub enum ObjectKind {
    String(ObjString),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    Dictionary(Dictionary),
    List(ObjList),
    Array(ObjArray),
    Range(ObjRange),
    Invocation(ObjInvocation),
    Builtin(ObjBuiltin),
}

impl ObjectKind {
    pub fn string(text: impl Into<EcoString>) -> ObjectKind {
        ObjectKind::String(ObjString {
            text: text.into(),
            interned: false,
        })
    }

    pub fn list(items: Vec<Value>) -> ObjectKind {
        ObjectKind::List(ObjList { items })
    }

    pub fn type_of(&self) -> ObjectType {
        match self {
            ObjectKind::String(_) => ObjectType::String,
            ObjectKind::Function(_) => ObjectType::Function,
            ObjectKind::Closure(_) => ObjectType::Closure,
            ObjectKind::Upvalue(_) => ObjectType::Upvalue,
            ObjectKind::Class(_) => ObjectType::Class,
            ObjectKind::Instance(_) => ObjectType::Instance,
            ObjectKind::Dictionary(_) => ObjectType::Dictionary,
            ObjectKind::List(_) => ObjectType::List,
            ObjectKind::Array(_) => ObjectType::Array,
            ObjectKind::Range(_) => ObjectType::Range,
            ObjectKind::Invocation(_) => ObjectType::Invocation,
            ObjectKind::Builtin(_) => ObjectType::Builtin,
        }
    }
}

/// A heap object: header plus kind payload.
pub struct Object {
    status: Cell<ObjectStatus>,
    next: Cell<Option<ObjectRef>>,
    pub kind: ObjectKind,
}

impl Object {
    /// Allocates an object outside any collector's control. The caller (a
    /// VM, a program, or the runtime context) takes ownership by linking it
    /// into its list.
    pub fn alloc_unmanaged(kind: ObjectKind) -> ObjectRef {
        let boxed = Box::new(Object {
            status: Cell::new(ObjectStatus::Unmanaged),
            next: Cell::new(None),
            kind,
        });
        ObjectRef {
            ptr: NonNull::from(Box::leak(boxed)),
        }
    }
}

/// A copyable reference to a heap object. Identity comparison and hashing
/// go by address.
#[derive(Clone, Copy)]
pub struct ObjectRef {
    ptr: NonNull<Object>,
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}
impl Eq for ObjectRef {}

impl core::hash::Hash for ObjectRef {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        (self.ptr.as_ptr() as usize).hash(state);
    }
}

impl ObjectRef {
    /// Frees the object. The owning list calls this exactly once.
    ///
    /// # Safety
    ///
    /// No other reference to the object may be used afterwards.
    pub unsafe fn free(self) {
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }

    /// The object's address, for identity display and debugger output.
    pub fn as_ptr(&self) -> *const Object {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn kind<'a>(&self) -> &'a ObjectKind {
        unsafe { &self.ptr.as_ref().kind }
    }

    /// Mutable access to the payload. Sound because a VM is single-threaded
    /// and the interpreter mutates one object at a time.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub fn kind_mut<'a>(&self) -> &'a mut ObjectKind {
        unsafe { &mut (*self.ptr.as_ptr()).kind }
    }

    pub fn status(&self) -> ObjectStatus {
        unsafe { self.ptr.as_ref() }.status.get()
    }

    pub(crate) fn set_status(&self, status: ObjectStatus) {
        unsafe { self.ptr.as_ref() }.status.set(status);
    }

    pub(crate) fn next(&self) -> Option<ObjectRef> {
        unsafe { self.ptr.as_ref() }.next.get()
    }

    pub(crate) fn set_next(&self, next: Option<ObjectRef>) {
        unsafe { self.ptr.as_ref() }.next.set(next);
    }

    pub fn type_of(&self) -> ObjectType {
        self.kind().type_of()
    }

    pub fn is_managed(&self) -> bool {
        matches!(
            self.status(),
            ObjectStatus::Unmarked | ObjectStatus::Marked
        )
    }

    pub fn as_function<'a>(&self) -> Option<&'a ObjFunction> {
        match self.kind() {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut<'a>(&self) -> Option<&'a mut ObjFunction> {
        match self.kind_mut() {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure<'a>(&self) -> Option<&'a ObjClosure> {
        match self.kind() {
            ObjectKind::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_upvalue<'a>(&self) -> Option<&'a ObjUpvalue> {
        match self.kind() {
            ObjectKind::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_class<'a>(&self) -> Option<&'a ObjClass> {
        match self.kind() {
            ObjectKind::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class_mut<'a>(&self) -> Option<&'a mut ObjClass> {
        match self.kind_mut() {
            ObjectKind::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance<'a>(&self) -> Option<&'a ObjInstance> {
        match self.kind() {
            ObjectKind::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_instance_mut<'a>(&self) -> Option<&'a mut ObjInstance> {
        match self.kind_mut() {
            ObjectKind::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_list<'a>(&self) -> Option<&'a ObjList> {
        match self.kind() {
            ObjectKind::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut<'a>(&self) -> Option<&'a mut ObjList> {
        match self.kind_mut() {
            ObjectKind::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dictionary<'a>(&self) -> Option<&'a Dictionary> {
        match self.kind() {
            ObjectKind::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dictionary_mut<'a>(&self) -> Option<&'a mut Dictionary> {
        match self.kind_mut() {
            ObjectKind::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array<'a>(&self) -> Option<&'a ObjArray> {
        match self.kind() {
            ObjectKind::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut<'a>(&self) -> Option<&'a mut ObjArray> {
        match self.kind_mut() {
            ObjectKind::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_range<'a>(&self) -> Option<&'a ObjRange> {
        match self.kind() {
            ObjectKind::Range(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_invocation<'a>(&self) -> Option<&'a ObjInvocation> {
        match self.kind() {
            ObjectKind::Invocation(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_builtin<'a>(&self) -> Option<&'a ObjBuiltin> {
        match self.kind() {
            ObjectKind::Builtin(b) => Some(b),
            _ => None,
        }
    }

    /// Approximate size in bytes for collector accounting: the header plus
    /// the payload's owned storage.
    pub fn size(&self) -> usize {
        let val = mem::size_of::<Value>();
        mem::size_of::<Object>()
            + match self.kind() {
                ObjectKind::String(s) => s.text.len(),
                ObjectKind::Function(f) => {
                    f.konst.capacity() * val
                        + f.opt.capacity() * mem::size_of::<OptionalParam>()
                        + f.prototypes.capacity() * mem::size_of::<SmallVec<[UpvalueProto; 4]>>()
                }
                ObjectKind::Closure(c) => c.upvalues.capacity() * mem::size_of::<ObjectRef>(),
                ObjectKind::Upvalue(_) => 0,
                ObjectKind::Class(c) => c.methods.allocated_bytes(),
                ObjectKind::Instance(i) => i.fields.allocated_bytes(),
                ObjectKind::Dictionary(d) => d.allocated_bytes(),
                ObjectKind::List(l) => l.items.capacity() * val,
                ObjectKind::Array(a) => a.data.capacity() * val,
                ObjectKind::Range(_) => 0,
                ObjectKind::Invocation(_) => 0,
                ObjectKind::Builtin(_) => 0,
            }
    }

    /// Enumerates every value this object references, for the collector's
    /// mark phase. Cycles are the caller's concern; this only walks one
    /// level.
    pub fn for_each_child(&self, f: &mut dyn FnMut(Value)) {
        match self.kind() {
            ObjectKind::String(_) | ObjectKind::Builtin(_) => {}
            ObjectKind::Function(func) => {
                f(func.name);
                for &k in &func.konst {
                    f(k);
                }
                for o in &func.opt {
                    f(o.symbol);
                }
            }
            ObjectKind::Closure(c) => {
                f(Value::Object(c.func));
                for &up in &c.upvalues {
                    f(Value::Object(up));
                }
            }
            ObjectKind::Upvalue(u) => {
                if let UpvalueLoc::Closed(v) = u.loc.get() {
                    f(v);
                }
            }
            ObjectKind::Class(c) => {
                f(c.name);
                if let Some(sup) = c.superclass {
                    f(Value::Object(sup));
                }
                for (k, v) in c.methods.iter() {
                    f(k);
                    f(v);
                }
            }
            ObjectKind::Instance(i) => {
                f(Value::Object(i.class));
                for (k, v) in i.fields.iter() {
                    f(k);
                    f(v);
                }
            }
            ObjectKind::Dictionary(d) => {
                for (k, v) in d.iter() {
                    f(k);
                    f(v);
                }
            }
            ObjectKind::List(l) => {
                for &v in &l.items {
                    f(v);
                }
            }
            ObjectKind::Array(a) => {
                for &v in &a.data {
                    f(v);
                }
            }
            ObjectKind::Range(r) => {
                f(r.start);
                f(r.end);
                f(r.step);
            }
            ObjectKind::Invocation(i) => {
                f(i.receiver);
                f(i.method);
            }
        }
    }

    /// Per-kind shallow clone for the veneer `clone` protocol: mutations of
    /// the copy's top-level structure do not affect the original. `None` for
    /// kinds that are not cloneable.
    pub fn clone_kind(&self) -> Option<ObjectKind> {
        Some(match self.kind() {
            ObjectKind::String(s) => ObjectKind::String(ObjString {
                text: s.text.clone(),
                interned: false,
            }),
            ObjectKind::List(l) => ObjectKind::list(l.items.clone()),
            ObjectKind::Dictionary(d) => ObjectKind::Dictionary(d.copy()),
            ObjectKind::Array(a) => ObjectKind::Array(ObjArray {
                ndim: a.ndim,
                nelements: a.nelements,
                data: a.data.clone(),
            }),
            ObjectKind::Range(r) => ObjectKind::Range(ObjRange {
                start: r.start,
                end: r.end,
                step: r.step,
                count: r.count,
            }),
            ObjectKind::Instance(i) => ObjectKind::Instance(ObjInstance {
                class: i.class,
                fields: i.fields.copy(),
            }),
            _ => return None,
        })
    }
}

/// The default printer, used when no `print` method intervenes.
impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ObjectKind::String(s) => write!(f, "{}", s.text),
            ObjectKind::Function(func) => {
                if func.name.is_nil() {
                    write!(f, "<fn>")
                } else {
                    write!(f, "<fn {}>", func.name)
                }
            }
            ObjectKind::Closure(c) => write!(f, "{}", c.func),
            ObjectKind::Upvalue(_) => write!(f, "<upvalue>"),
            ObjectKind::Class(c) => write!(f, "<Class {}>", c.name),
            ObjectKind::Instance(i) => match i.class.as_class() {
                Some(c) => write!(f, "<{} instance>", c.name),
                None => write!(f, "<instance>"),
            },
            ObjectKind::Dictionary(d) => {
                write!(f, "{{ ")?;
                for (i, (k, v)) in d.iter().enumerate() {
                    if i > 0 {
                        write!(f, " , ")?;
                    }
                    write!(f, "{} : {}", k, v)?;
                }
                write!(f, " }}")
            }
            ObjectKind::List(l) => {
                write!(f, "[ ")?;
                for (i, v) in l.items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, " ]")
            }
            ObjectKind::Array(_) => write!(f, "<Array>"),
            ObjectKind::Range(r) => {
                if r.step.is_nil() {
                    write!(f, "{}..{}", r.start, r.end)
                } else {
                    write!(f, "{}..{}:{}", r.start, r.end, r.step)
                }
            }
            ObjectKind::Invocation(i) => write!(f, "<invocation {}>", i.method),
            ObjectKind::Builtin(b) => write!(f, "<fn {}>", b.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_counts() {
        let r = ObjRange::new(Value::Int(0), Value::Int(4), Value::Nil).unwrap();
        assert_eq!(r.count, 5);
        assert!(r.iterate(2).eq_value(&Value::Int(2)));

        let r = ObjRange::new(Value::Int(1), Value::Int(10), Value::Int(3)).unwrap();
        assert_eq!(r.count, 4);
        assert!(r.iterate(3).eq_value(&Value::Int(10)));

        let r = ObjRange::new(Value::Float(0.0), Value::Int(1), Value::Float(0.25)).unwrap();
        assert_eq!(r.count, 5);

        let r = ObjRange::new(Value::Int(3), Value::Int(0), Value::Nil).unwrap();
        assert_eq!(r.count, 0);
    }

    #[test]
    fn array_layout() {
        let a = ObjArray::new(&[2, 3]);
        assert_eq!(a.ndim, 2);
        assert_eq!(a.nelements, 6);
        assert_eq!(a.element_index(&[1, 2]), Some(2 + 1 + 2 * 2));
        assert_eq!(a.element_index(&[2, 0]), None);
    }

    #[test]
    fn list_signed_indexing() {
        let l = ObjList {
            items: vec![Value::Int(1), Value::Int(2), Value::Int(3)],
        };
        assert!(l.get_element(0).unwrap().eq_value(&Value::Int(1)));
        assert!(l.get_element(-1).unwrap().eq_value(&Value::Int(3)));
        assert!(l.get_element(3).is_none());
        assert!(l.get_element(-4).is_none());
    }

    #[test]
    fn display_containers() {
        let l = Object::alloc_unmanaged(ObjectKind::list(vec![Value::Int(2), Value::Int(3)]));
        assert_eq!(l.to_string(), "[ 2, 3 ]");
        unsafe { l.free() };

        let r = Object::alloc_unmanaged(ObjectKind::Range(
            ObjRange::new(Value::Int(0), Value::Int(5), Value::Nil).unwrap(),
        ));
        assert_eq!(r.to_string(), "0..5");
        unsafe { r.free() };
    }
}
