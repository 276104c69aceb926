//! The virtual machine.
//!
//! A [`Vm`] owns its value stack, call-frame and error-handler stacks, its
//! heap object list and collector state, and its error block. Programs are
//! shared read-only; globals are shared by reference with subkernels. A VM
//! is single-threaded: concurrent operation on one VM is undefined, and
//! multithreading is expressed by giving each thread its own subkernel.

use core::cell::UnsafeCell;
use std::io::Write;
use std::sync::Arc;

use crate::builtin::Core;
use crate::debug::debugger::Debugger;
use crate::error::{self, ErrorBlock, ErrorCategory};
use crate::object::{Object, ObjectKind, ObjectRef, ObjectStatus, UpvalueLoc};
use crate::program::Program;
use crate::value::Value;

pub mod frame;
pub(crate) mod gc;
mod interpret;
pub mod stack;

pub use frame::{CallFrame, ErrorHandler};
pub use stack::Stack;

/// Configuration for a VM.
pub struct VmOptions {
    /// Maximum call-frame depth; exceeding it raises `StckOvflw`.
    pub frame_stack_size: usize,
    /// Maximum nested error handlers; exceeding it raises `ErrStckOvflw`.
    pub error_handler_stack_size: usize,
    /// Initial value-stack size in slots.
    pub initial_stack_size: usize,
    /// Heap bytes bound before the first collection.
    pub gc_initial: usize,
    /// Growth factor applied to the collection threshold after each pass.
    pub gc_growth_factor: usize,
    /// When set, integer ADD/SUB/MUL raise `IntgrOvflw` on overflow instead
    /// of wrapping.
    pub checked_arithmetic: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            frame_stack_size: 256,
            error_handler_stack_size: 64,
            initial_stack_size: 1024,
            gc_initial: 1 << 17,
            gc_growth_factor: 2,
            checked_arithmetic: false,
        }
    }
}

/// Globals storage shared between a VM and its subkernels. The runtime
/// performs no synchronization over it; coordinating concurrent access is
/// the caller's responsibility.
struct GlobalsBuf(UnsafeCell<Vec<Value>>);

unsafe impl Sync for GlobalsBuf {}
unsafe impl Send for GlobalsBuf {}

#[derive(Clone)]
pub(crate) struct SharedGlobals(Arc<GlobalsBuf>);

impl SharedGlobals {
    fn new() -> Self {
        SharedGlobals(Arc::new(GlobalsBuf(UnsafeCell::new(Vec::new()))))
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        unsafe { &*self.0.0.get() }.len()
    }

    #[inline]
    pub(crate) fn get(&self, i: usize) -> Value {
        (unsafe { &*self.0.0.get() })[i]
    }

    #[inline]
    pub(crate) fn set(&self, i: usize, v: Value) {
        (unsafe { &mut *self.0.0.get() })[i] = v;
    }

    /// Grows to at least `n` slots, zeroing the new ones.
    pub(crate) fn ensure(&self, n: usize) {
        let vec = unsafe { &mut *self.0.0.get() };
        if vec.len() < n {
            vec.resize(n, Value::Nil);
        }
    }

    pub(crate) fn for_each(&self, mut f: impl FnMut(Value)) {
        for &v in unsafe { &*self.0.0.get() }.iter() {
            f(v);
        }
    }
}

/// A snapshot of one frame at the moment an error went uncaught, for stack
/// traces.
#[derive(Clone)]
pub(crate) struct TraceEntry {
    pub(crate) function: Value,
    pub(crate) pc: usize,
}

pub struct Vm {
    pub(crate) core: Arc<Core>,
    pub(crate) options: VmOptions,
    pub(crate) program: Option<Arc<Program>>,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Stack<CallFrame>,
    pub(crate) handlers: Stack<ErrorHandler>,
    pub(crate) globals: SharedGlobals,
    /// Open upvalues in descending stack-slot order.
    pub(crate) open_upvalues: Vec<ObjectRef>,
    /// Head of the heap object list.
    pub(crate) objects: Option<ObjectRef>,
    /// Bytes bound to this VM.
    pub(crate) bound: usize,
    pub(crate) next_gc: usize,
    pub(crate) gray: Vec<ObjectRef>,
    pub(crate) err: ErrorBlock,
    pub(crate) error_trace: Vec<TraceEntry>,
    /// Values temporarily rooted across re-entrant host calls.
    pub(crate) retained: Vec<Value>,
    pub(crate) out: Box<dyn Write>,
    pub(crate) debug: Option<Debugger>,
    subkernels: Vec<Box<Vm>>,
    pub(crate) is_subkernel: bool,
    tlvars: Vec<Value>,
}

impl Vm {
    pub fn new(core: Arc<Core>) -> Self {
        Self::with_options(core, VmOptions::default())
    }

    pub fn with_options(core: Arc<Core>, options: VmOptions) -> Self {
        let mut stack = Vec::new();
        stack.resize(options.initial_stack_size, Value::Nil);
        Vm {
            frames: Stack::new(options.frame_stack_size),
            handlers: Stack::new(options.error_handler_stack_size),
            next_gc: options.gc_initial,
            core,
            options,
            program: None,
            stack,
            globals: SharedGlobals::new(),
            open_upvalues: Vec::new(),
            objects: None,
            bound: 0,
            gray: Vec::new(),
            err: ErrorBlock::none(),
            error_trace: Vec::new(),
            retained: Vec::new(),
            out: Box::new(std::io::stdout()),
            debug: None,
            subkernels: Vec::new(),
            is_subkernel: false,
            tlvars: Vec::new(),
        }
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    /// The VM's error block.
    pub fn error(&self) -> &ErrorBlock {
        &self.err
    }

    /// Redirects `print` output; defaults to stdout.
    pub fn set_print_target(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Prepares the VM to run `program`.
    fn start(&mut self, program: &Arc<Program>) -> bool {
        self.program = Some(program.clone());
        self.err.clear();
        self.error_trace.clear();
        self.frames.clear();
        self.handlers.clear();
        self.open_upvalues.clear();

        let nregs = program.global.as_function().map(|f| f.nregs).unwrap_or(0);
        if !self.frames.try_push(CallFrame::new(program.global, 0)) {
            return false;
        }
        self.ensure_stack(nregs);
        self.globals.ensure(program.nglobals);
        true
    }

    /// Runs a program to completion. An uncaught `halt` error is returned;
    /// an `exit` error means the program deliberately ended and reports
    /// success.
    pub fn run(&mut self, program: &Arc<Program>) -> Result<(), ErrorBlock> {
        if !self.start(program) {
            return Err(ErrorBlock::with_id(error::INTERNAL_ERROR));
        }
        let entry = program.entry();
        let success = self.interpret(0, entry);
        if !success && self.err.category == ErrorCategory::Exit {
            self.err.clear();
            return Ok(());
        }
        if success {
            Ok(())
        } else {
            Err(self.err.clone())
        }
    }

    /// Runs a program under a debugger.
    pub fn run_with_debugger(
        &mut self,
        program: &Arc<Program>,
        debugger: Debugger,
    ) -> Result<(), ErrorBlock> {
        self.debug = Some(debugger);
        let result = self.run(program);
        self.debug = None;
        result
    }

    /// Calls a scripted callable from host code. A single re-entrant frame
    /// is set up whose return flag makes the interpreter exit when that
    /// frame returns, even if outer frames remain.
    pub fn call(&mut self, f: Value, args: &[Value]) -> Result<Value, ErrorBlock> {
        self.call_with_receiver(f, f, args)
    }

    /// Invokes the method named `label` on `receiver`.
    pub fn invoke(
        &mut self,
        receiver: Value,
        label: &Value,
        args: &[Value],
    ) -> Result<Value, ErrorBlock> {
        match self.lookup_method(receiver, label) {
            Some(method) => self.call_with_receiver(method, receiver, args),
            None => Err(ErrorBlock::with_message(
                error::OBJECT_LACKS_PROPERTY,
                format!("Object lacks property or method '{}'.", label),
            )),
        }
    }

    /// The class associated with a value: an instance's class, or the
    /// veneer class of a native object type.
    pub fn lookup_class_of(&self, v: Value) -> Option<ObjectRef> {
        match v.as_object() {
            Some(obj) => match obj.kind() {
                ObjectKind::Instance(i) => Some(i.class),
                _ => self.core.veneer_class(obj.type_of()),
            },
            None => None,
        }
    }

    /// Finds a method on a value's class chain.
    pub fn lookup_method(&self, v: Value, label: &Value) -> Option<Value> {
        let class = self.lookup_class_of(v)?;
        class.as_class()?.methods.get(label)
    }

    // ------------------------------------------------------------------
    // Registers and the value stack
    // ------------------------------------------------------------------

    #[inline]
    pub(crate) fn reg(&self, rbase: usize, i: usize) -> Value {
        self.stack[rbase + i]
    }

    #[inline]
    pub(crate) fn set_reg(&mut self, rbase: usize, i: usize, v: Value) {
        self.stack[rbase + i] = v;
    }

    /// Grows the value stack to at least `size` slots. Open upvalues address
    /// absolute slots, so no rebasing is needed.
    pub(crate) fn ensure_stack(&mut self, size: usize) {
        if self.stack.len() < size {
            let target = size.next_power_of_two();
            self.stack.resize(target, Value::Nil);
        }
    }

    /// One past the highest live stack slot: the top frame's register
    /// window end.
    pub(crate) fn stack_top(&self) -> usize {
        match self.frames.top() {
            Some(f) => f.roffset + f.nregs(),
            None => 0,
        }
    }

    // ------------------------------------------------------------------
    // Upvalues
    // ------------------------------------------------------------------

    /// Returns the open upvalue for `slot`, creating and linking one if
    /// none exists. The list stays sorted by descending slot.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> ObjectRef {
        let mut at = self.open_upvalues.len();
        for (i, up) in self.open_upvalues.iter().enumerate() {
            match up.as_upvalue().and_then(|u| u.open_at()) {
                Some(s) if s > slot => continue,
                Some(s) if s == slot => return *up,
                _ => {
                    at = i;
                    break;
                }
            }
        }
        let up = Object::alloc_unmanaged(ObjectKind::Upvalue(crate::object::ObjUpvalue {
            loc: core::cell::Cell::new(UpvalueLoc::Open(slot)),
        }));
        self.open_upvalues.insert(at, up);
        self.bind_internal(Value::Object(up));
        up
    }

    /// Closes every open upvalue at or above `slot`: the stack value moves
    /// into the upvalue's own cell and the upvalue leaves the open list.
    pub(crate) fn close_upvalues(&mut self, slot: usize) {
        while let Some(&up) = self.open_upvalues.first() {
            let Some(u) = up.as_upvalue() else {
                self.open_upvalues.remove(0);
                continue;
            };
            match u.open_at() {
                Some(s) if s >= slot => {
                    u.loc.set(UpvalueLoc::Closed(self.stack[s]));
                    self.open_upvalues.remove(0);
                }
                _ => break,
            }
        }
    }

    // ------------------------------------------------------------------
    // Heap binding and accounting
    // ------------------------------------------------------------------

    /// Links a freshly created object into the heap list and updates the
    /// accounting, collecting when the threshold is crossed. The value must
    /// already be reachable from a root (usually a register).
    pub(crate) fn bind_internal(&mut self, v: Value) {
        let Some(obj) = v.as_object() else { return };
        obj.set_status(ObjectStatus::Unmarked);
        obj.set_next(self.objects);
        self.objects = Some(obj);
        self.bound += obj.size();
        if self.bound > self.next_gc {
            self.collect_garbage();
        }
    }

    /// Same, without the collection check; for contexts where the VM state
    /// is mid-update and not yet traversable.
    pub(crate) fn bind_internal_nocollect(&mut self, v: Value) {
        let Some(obj) = v.as_object() else { return };
        obj.set_status(ObjectStatus::Unmarked);
        obj.set_next(self.objects);
        self.objects = Some(obj);
        self.bound += obj.size();
    }

    /// Allocates an object, binds it, and returns it as a value, keeping it
    /// rooted across any collection the binding triggers. The standard
    /// allocation path for builtins.
    pub fn bind_new(&mut self, kind: ObjectKind) -> Value {
        let v = Value::Object(Object::alloc_unmanaged(kind));
        self.bind_values(&[v]);
        v
    }

    /// Binds externally created objects to this VM, rooting them for the
    /// duration of any triggered collection.
    pub fn bind_values(&mut self, values: &[Value]) {
        for v in values {
            if let Some(obj) = v.as_object()
                && obj.status() == ObjectStatus::Unmanaged
            {
                obj.set_status(ObjectStatus::Unmarked);
                obj.set_next(self.objects);
                self.objects = Some(obj);
                self.bound += obj.size();
            }
        }
        if self.bound > self.next_gc {
            let mark = self.retained.len();
            self.retained.extend_from_slice(values);
            self.collect_garbage();
            self.retained.truncate(mark);
        }
    }

    /// Unbinds an object from the VM so the collector no longer manages it.
    pub fn unbind_object(&mut self, v: Value) {
        let Some(obj) = v.as_object() else { return };
        if self.objects == Some(obj) {
            self.objects = obj.next();
        } else {
            let mut e = self.objects;
            while let Some(cur) = e {
                if cur.next() == Some(obj) {
                    cur.set_next(obj.next());
                    break;
                }
                e = cur.next();
            }
        }
        obj.set_next(None);
        if obj.is_managed() {
            self.bound = self.bound.saturating_sub(obj.size());
            obj.set_status(ObjectStatus::Unmanaged);
        }
    }

    /// Temporarily retains values across re-entrant calls into the VM.
    /// Returns a handle for [`Vm::release`]; acquire/release nest with
    /// stack discipline.
    pub fn retain(&mut self, values: &[Value]) -> usize {
        let handle = self.retained.len();
        self.retained.extend_from_slice(values);
        handle
    }

    /// Releases values retained by [`Vm::retain`].
    pub fn release(&mut self, handle: usize) {
        self.retained.truncate(handle);
    }

    /// Informs the VM that an object's size changed, keeping the collector
    /// accounting accurate.
    pub fn notify_resize(&mut self, v: Value, old_size: usize, new_size: usize) {
        let Some(obj) = v.as_object() else { return };
        if obj.status() == ObjectStatus::Unmanaged {
            return;
        }
        self.bound = self.bound.saturating_sub(old_size);
        self.bound += new_size;
    }

    // ------------------------------------------------------------------
    // Subkernels
    // ------------------------------------------------------------------

    /// Borrows `n` subkernels, reusing idle ones and creating more as
    /// needed. Each shares this VM's program and globals but owns its
    /// stack, frames, heap list and error state. Return them with
    /// [`Vm::release_subkernel`].
    pub fn acquire_subkernels(&mut self, n: usize) -> Vec<Box<Vm>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let mut kernel = match self.subkernels.pop() {
                Some(k) => k,
                None => {
                    let mut k = Box::new(Vm::new(self.core.clone()));
                    k.globals = self.globals.clone();
                    k
                }
            };
            kernel.is_subkernel = true;
            kernel.err.clear();
            if let Some(p) = &self.program {
                kernel.program = Some(p.clone());
            }
            out.push(kernel);
        }
        out
    }

    /// Returns a subkernel to the pool: its heap list is spliced into this
    /// VM's (bytes accounted here), its error propagates if this VM has
    /// none, and it becomes idle.
    pub fn release_subkernel(&mut self, mut kernel: Box<Vm>) {
        if let Some(head) = kernel.objects {
            let mut tail = head;
            while let Some(next) = tail.next() {
                tail = next;
            }
            tail.set_next(self.objects);
            self.objects = Some(head);
            self.bound += kernel.bound;
            kernel.objects = None;
            kernel.bound = 0;
        }
        if !kernel.err.succeeded() && self.err.succeeded() {
            self.err = kernel.err.clone();
        }
        kernel.is_subkernel = false;
        kernel.frames.clear();
        kernel.handlers.clear();
        kernel.open_upvalues.clear();
        self.subkernels.push(kernel);
    }

    /// Drops a subkernel's objects without splicing them into a parent.
    pub fn clean_subkernel(kernel: &mut Vm) {
        let mut obj = kernel.objects;
        while let Some(o) = obj {
            obj = o.next();
            unsafe { o.free() };
        }
        kernel.objects = None;
        kernel.bound = 0;
    }

    // ------------------------------------------------------------------
    // Thread-local variables
    // ------------------------------------------------------------------

    fn ensure_tlvars(&mut self, handle: usize) -> bool {
        if handle >= self.core.tlvar_count() {
            return false;
        }
        let needed = self.core.tlvar_count();
        if self.tlvars.len() < needed {
            self.tlvars.resize(needed, Value::Nil);
        }
        true
    }

    /// Sets the slot for a handle allocated by [`Core::add_tlvar`].
    pub fn set_tlvar(&mut self, handle: usize, v: Value) -> bool {
        if !self.ensure_tlvars(handle) {
            return false;
        }
        self.tlvars[handle] = v;
        true
    }

    pub fn tlvar(&mut self, handle: usize) -> Option<Value> {
        if !self.ensure_tlvars(handle) {
            return None;
        }
        Some(self.tlvars[handle])
    }

    // ------------------------------------------------------------------
    // Globals (shared with subkernels)
    // ------------------------------------------------------------------

    pub fn global(&self, i: usize) -> Option<Value> {
        if i < self.globals.len() {
            Some(self.globals.get(i))
        } else {
            None
        }
    }

    pub fn set_global(&mut self, i: usize, v: Value) -> bool {
        if i < self.globals.len() {
            self.globals.set(i, v);
            true
        } else {
            false
        }
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Formats the stack trace recorded when an error went uncaught.
    pub fn stacktrace(&self, out: &mut dyn Write) {
        let Some(program) = &self.program else { return };
        for (i, entry) in self.error_trace.iter().enumerate() {
            let _ = write!(out, "  {}", if i == 0 { "  in " } else { "from " });
            if entry.function.is_nil() {
                let _ = write!(out, "global");
            } else {
                let _ = write!(out, "{}", entry.function);
            }
            let indx = entry.pc.saturating_sub(1);
            if let Some(info) = program.annotations.info_from_index(program.global, indx) {
                let _ = write!(out, " at line {}", info.line);
            }
            let _ = writeln!(out);
        }
    }

    pub(crate) fn mark_tlvars(&mut self) -> Vec<Value> {
        self.tlvars.clone()
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        let mut obj = self.objects;
        let mut count = 0usize;
        while let Some(o) = obj {
            obj = o.next();
            unsafe { o.free() };
            count += 1;
        }
        self.objects = None;
        tracing::trace!(count, "freed objects bound to vm");
    }
}
