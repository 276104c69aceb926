//! The program image.
//!
//! A [`Program`] is what the front end produces and a VM executes: the
//! instruction vector, a top-level function owning the root constant table,
//! the debug-annotation stream, the symbol intern table, and the list of
//! program-bound objects. Object constants and interned symbols are
//! `Unmanaged`: they outlive any VM and are freed only when the program is
//! dropped. The instruction encoding is private to the runtime and not
//! portable across builds.

use core::cell::Cell;
use core::fmt;

use crate::builtin::Core;
use crate::debug::annotations::AnnotationList;
use crate::instruction::Instruction;
use crate::object::{Dictionary, ObjFunction, Object, ObjectKind, ObjectRef};
use crate::value::Value;

pub struct Program {
    pub code: Vec<Instruction>,
    pub annotations: AnnotationList,
    /// The top-level function; its constant table is live at entry.
    pub global: ObjectRef,
    /// Number of global variable slots the program uses.
    pub nglobals: usize,
    /// Head of the intrusive list of program-bound objects.
    bound: Cell<Option<ObjectRef>>,
    /// Symbol intern table: canonical strings shared across constants.
    symbols: Dictionary,
}

// A program is immutable once compilation finishes; subkernels share it
// read-only across threads.
unsafe impl Send for Program {}
unsafe impl Sync for Program {}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program").finish_non_exhaustive()
    }
}

impl Program {
    pub fn new() -> Self {
        let global = Object::alloc_unmanaged(ObjectKind::Function(ObjFunction::new(
            Value::Nil,
            0,
            0,
            1,
        )));
        Program {
            code: Vec::new(),
            annotations: AnnotationList::new(),
            global,
            nglobals: 0,
            bound: Cell::new(None),
            symbols: Dictionary::new(),
        }
    }

    /// Sets the entry point.
    pub fn set_entry(&mut self, entry: usize) {
        if let Some(f) = self.global.as_function_mut() {
            f.entry = entry;
        }
    }

    /// Gets the entry point.
    pub fn entry(&self) -> usize {
        self.global.as_function().map(|f| f.entry).unwrap_or(0)
    }

    /// Appends an instruction, returning its index.
    pub fn add_instruction(&mut self, instr: Instruction) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    /// Mutable access to the top-level function, for the front end.
    pub fn global_function_mut(&mut self) -> &mut ObjFunction {
        self.global.as_function_mut().expect("global is a function")
    }

    /// Binds an object to the program. Bound objects are static data (for
    /// example constant-table entries) freed with the program.
    pub fn bind_object(&mut self, obj: ObjectRef) {
        if obj.next().is_some() || Some(obj) == self.bound.get() {
            return; // already owned by a list
        }
        if !obj.is_managed() && !matches!(obj.kind(), ObjectKind::Builtin(_)) {
            obj.set_next(self.bound.get());
            self.bound.set(Some(obj));
        }
    }

    /// Allocates an object, binds it to the program, and returns it as a
    /// value. The usual way to create object constants.
    pub fn bind_constant_object(&mut self, kind: ObjectKind) -> Value {
        let obj = Object::alloc_unmanaged(kind);
        self.bind_object(obj);
        Value::Object(obj)
    }

    /// Interns a symbol, returning its canonical string value. The builtin
    /// symbol table takes precedence so selectors resolve to the runtime's
    /// canonical objects; everything else is cloned into the program's own
    /// table and bound to the program.
    pub fn intern_symbol(&mut self, core: &Core, name: &str) -> Value {
        if let Some(sym) = core.lookup_symbol(name) {
            return sym;
        }
        let probe = Object::alloc_unmanaged(ObjectKind::String(crate::object::ObjString {
            text: name.into(),
            interned: true,
        }));
        let key = Value::Object(probe);
        let canonical = self.symbols.intern(key);
        if canonical.same(&key) {
            self.bind_object(probe);
        } else {
            // The table already held this symbol; discard the probe.
            unsafe { probe.free() };
        }
        canonical
    }

    /// Interns an existing string value, cloning it into the program when
    /// it is new.
    pub fn intern_symbol_value(&mut self, core: &Core, symbol: Value) -> Value {
        match symbol.as_string() {
            Some(s) => {
                let text = s.text.clone();
                self.intern_symbol(core, &text)
            }
            None => symbol,
        }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        tracing::trace!("freeing objects bound to program");
        let mut obj = self.bound.get();
        while let Some(o) = obj {
            obj = o.next();
            unsafe { o.free() };
        }
        self.bound.set(None);
        unsafe { self.global.free() };
        // Table contents were bound to the program and are already freed.
        self.symbols.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Op;

    #[test]
    fn interning_is_canonical() {
        let core = Core::new();
        let mut p = Program::new();
        let a = p.intern_symbol(&core, "thing");
        let b = p.intern_symbol(&core, "thing");
        assert!(a.same(&b));

        // Builtin selectors resolve to the runtime's canonical symbols.
        let count = p.intern_symbol(&core, "count");
        assert!(count.same(&core.selectors().count));
    }

    #[test]
    fn entry_roundtrip() {
        let mut p = Program::new();
        assert_eq!(p.entry(), 0);
        p.add_instruction(Instruction::abc(Op::Nop, 0, 0, 0));
        p.set_entry(1);
        assert_eq!(p.entry(), 1);
    }
}
