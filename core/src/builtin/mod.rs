//! The runtime context.
//!
//! The original interpreter kept its selector symbols, builtin tables and
//! veneer-class bindings in process globals; here they live in [`Core`], a
//! context created once by the host and shared by programs and VMs. `Core`
//! owns every object it creates (classes, builtin functions, interned
//! symbols) on a permanent list freed when the context is dropped.
//!
//! A builtin function is `fn(vm, args) -> Result<Value, ErrorBlock>` where
//! `args[0]` is the receiver (`nil` for plain functions) and `args[1..]` are
//! the arguments. The interpreter copies arguments out of the register
//! window before the call, so builtins never hold pointers into the stack.

use core::cell::Cell;

use ecow::EcoString;
use hashbrown::HashMap;

use crate::error::ErrorBlock;
use crate::object::{Dictionary, ObjString, Object, ObjectKind, ObjectRef, ObjectType};
use crate::value::Value;
use crate::vm::Vm;

pub mod functions;
pub mod veneer;

/// Native function ABI. `args[0]` is the receiver.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, ErrorBlock>;

/// Receiver of a builtin call.
#[inline]
pub fn self_value(args: &[Value]) -> Value {
    args[0]
}

/// Positional arguments of a builtin call (everything after the receiver).
#[inline]
pub fn call_args(args: &[Value]) -> &[Value] {
    &args[1..]
}

/// Canonical interned symbols the interpreter dispatches on.
pub struct Selectors {
    pub init: Value,
    pub getindex: Value,
    pub setindex: Value,
    pub add: Value,
    pub addr: Value,
    pub sub: Value,
    pub subr: Value,
    pub mul: Value,
    pub mulr: Value,
    pub div: Value,
    pub divr: Value,
    pub pow: Value,
    pub powr: Value,
    pub print: Value,
    pub enumerate: Value,
    pub count: Value,
    pub clone: Value,
}

pub const INITIALIZER_METHOD: &str = "init";
pub const GETINDEX_METHOD: &str = "[]";
pub const SETINDEX_METHOD: &str = "[]=";
pub const ADD_METHOD: &str = "+";
pub const ADDR_METHOD: &str = "+r";
pub const SUB_METHOD: &str = "-";
pub const SUBR_METHOD: &str = "-r";
pub const MUL_METHOD: &str = "*";
pub const MULR_METHOD: &str = "*r";
pub const DIV_METHOD: &str = "/";
pub const DIVR_METHOD: &str = "/r";
pub const POW_METHOD: &str = "^";
pub const POWR_METHOD: &str = "^r";
pub const PRINT_METHOD: &str = "print";
pub const ENUMERATE_METHOD: &str = "enumerate";
pub const COUNT_METHOD: &str = "count";
pub const CLONE_METHOD: &str = "clone";

/// The runtime context: interned builtin symbols, veneer classes, builtin
/// functions and classes, and the thread-local handle space.
pub struct Core {
    selectors: Selectors,
    symbols: Dictionary,
    veneers: [Option<ObjectRef>; ObjectType::COUNT],
    functions: HashMap<EcoString, Value>,
    classes: HashMap<EcoString, Value>,
    base_class: Option<ObjectRef>,
    objects: Cell<Option<ObjectRef>>,
    ntlvars: Cell<usize>,
}

impl Core {
    pub fn new() -> Self {
        let mut core = Core {
            selectors: Selectors {
                init: Value::Nil,
                getindex: Value::Nil,
                setindex: Value::Nil,
                add: Value::Nil,
                addr: Value::Nil,
                sub: Value::Nil,
                subr: Value::Nil,
                mul: Value::Nil,
                mulr: Value::Nil,
                div: Value::Nil,
                divr: Value::Nil,
                pow: Value::Nil,
                powr: Value::Nil,
                print: Value::Nil,
                enumerate: Value::Nil,
                count: Value::Nil,
                clone: Value::Nil,
            },
            symbols: Dictionary::new(),
            veneers: [None; ObjectType::COUNT],
            functions: HashMap::new(),
            classes: HashMap::new(),
            base_class: None,
            objects: Cell::new(None),
            ntlvars: Cell::new(0),
        };

        core.selectors = Selectors {
            init: core.intern_symbol(INITIALIZER_METHOD),
            getindex: core.intern_symbol(GETINDEX_METHOD),
            setindex: core.intern_symbol(SETINDEX_METHOD),
            add: core.intern_symbol(ADD_METHOD),
            addr: core.intern_symbol(ADDR_METHOD),
            sub: core.intern_symbol(SUB_METHOD),
            subr: core.intern_symbol(SUBR_METHOD),
            mul: core.intern_symbol(MUL_METHOD),
            mulr: core.intern_symbol(MULR_METHOD),
            div: core.intern_symbol(DIV_METHOD),
            divr: core.intern_symbol(DIVR_METHOD),
            pow: core.intern_symbol(POW_METHOD),
            powr: core.intern_symbol(POWR_METHOD),
            print: core.intern_symbol(PRINT_METHOD),
            enumerate: core.intern_symbol(ENUMERATE_METHOD),
            count: core.intern_symbol(COUNT_METHOD),
            clone: core.intern_symbol(CLONE_METHOD),
        };

        veneer::initialize(&mut core);
        functions::initialize(&mut core);
        core
    }

    pub fn selectors(&self) -> &Selectors {
        &self.selectors
    }

    /// Canonical value for an already-interned builtin symbol.
    pub fn lookup_symbol(&self, name: &str) -> Option<Value> {
        let probe = Object::alloc_unmanaged(ObjectKind::string(name));
        let key = Value::Object(probe);
        let found = self.symbols.get_key(&key);
        unsafe { probe.free() };
        found
    }

    /// Interns a symbol into the context's own table, allocating and owning
    /// the canonical string.
    pub fn intern_symbol(&mut self, name: &str) -> Value {
        if let Some(existing) = self.lookup_symbol(name) {
            return existing;
        }
        let obj = Object::alloc_unmanaged(ObjectKind::String(ObjString {
            text: name.into(),
            interned: true,
        }));
        self.own_object(obj);
        self.symbols.intern(Value::Object(obj))
    }

    /// Takes ownership of an object for the lifetime of the context.
    pub fn own_object(&self, obj: ObjectRef) {
        obj.set_next(self.objects.get());
        self.objects.set(Some(obj));
    }

    /// Registers a builtin function under `name`.
    pub fn add_function(&mut self, name: &str, func: NativeFn) -> Value {
        let obj = Object::alloc_unmanaged(ObjectKind::Builtin(crate::object::ObjBuiltin {
            name: name.into(),
            func,
        }));
        self.own_object(obj);
        let v = Value::Object(obj);
        self.functions.insert(name.into(), v);
        v
    }

    /// Builds a class from a method table and registers it under `name`.
    pub fn add_class(
        &mut self,
        name: &str,
        methods: &[(&str, NativeFn)],
        superclass: Option<ObjectRef>,
    ) -> ObjectRef {
        let name_sym = self.intern_symbol(name);
        let mut dict = Dictionary::new();
        for (label, func) in methods {
            let sym = self.intern_symbol(label);
            let obj = Object::alloc_unmanaged(ObjectKind::Builtin(crate::object::ObjBuiltin {
                name: (*label).into(),
                func: *func,
            }));
            self.own_object(obj);
            dict.insert(sym, Value::Object(obj));
        }
        // Methods of the superclass apply unless overridden.
        if let Some(sup) = superclass
            && let Some(supclass) = sup.as_class()
        {
            for (k, v) in supclass.methods.iter() {
                if !dict.contains_key(&k) {
                    dict.insert(k, v);
                }
            }
        }
        let class = Object::alloc_unmanaged(ObjectKind::Class(crate::object::ObjClass {
            name: name_sym,
            superclass,
            methods: dict,
        }));
        self.own_object(class);
        self.classes.insert(name.into(), Value::Object(class));
        class
    }

    /// Binds a veneer class to a native object type.
    pub fn set_veneer(&mut self, ty: ObjectType, class: ObjectRef) {
        self.veneers[ty.index()] = Some(class);
    }

    /// The veneer class for a native object type, if one is bound.
    pub fn veneer_class(&self, ty: ObjectType) -> Option<ObjectRef> {
        self.veneers[ty.index()]
    }

    /// Marks the base class every user class ultimately inherits from.
    pub fn set_base_class(&mut self, class: ObjectRef) {
        self.base_class = Some(class);
    }

    pub fn base_class(&self) -> Option<ObjectRef> {
        self.base_class
    }

    pub fn lookup_function(&self, name: &str) -> Option<Value> {
        self.functions.get(name).copied()
    }

    pub fn lookup_class(&self, name: &str) -> Option<Value> {
        self.classes.get(name).copied()
    }

    /// Allocates a thread-local variable handle. Handles are dense; each VM
    /// grows its slot vector lazily.
    pub fn add_tlvar(&self) -> usize {
        let handle = self.ntlvars.get();
        self.ntlvars.set(handle + 1);
        handle
    }

    pub fn tlvar_count(&self) -> usize {
        self.ntlvars.get()
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        let mut obj = self.objects.get();
        while let Some(o) = obj {
            obj = o.next();
            unsafe { o.free() };
        }
        self.objects.set(None);
    }
}
