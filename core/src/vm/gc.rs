//! Tri-colour mark-sweep collection.
//!
//! Non-incremental and non-moving. Roots are the live portion of the value
//! stack, the globals, each active frame's closure, the open-upvalue chain,
//! the retained-handle block and the thread-local slots. Marking drains an
//! explicit gray list, so reference cycles cost no call-stack depth. A
//! subkernel never collects; it defers to its parent so it cannot free
//! objects a cooperating thread still references.

use tracing::trace;

use crate::object::{ObjectRef, ObjectStatus};
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
    /// Marks a value as reachable.
    #[inline]
    pub(crate) fn mark_value(&mut self, v: Value) {
        if let Value::Object(obj) = v {
            self.mark_object(obj);
        }
    }

    /// Marks an object as reachable and queues it for child tracing.
    pub(crate) fn mark_object(&mut self, obj: ObjectRef) {
        if obj.status() != ObjectStatus::Unmarked {
            return; // unmanaged, or already marked this cycle
        }
        obj.set_status(ObjectStatus::Marked);
        self.gray.push(obj);
    }

    fn mark_roots(&mut self) {
        // The stack up to the top frame's register window.
        let top = self.stack_top();
        for i in 0..top.min(self.stack.len()) {
            self.mark_value(self.stack[i]);
        }

        let mut globals = Vec::with_capacity(self.globals.len());
        self.globals.for_each(|v| globals.push(v));
        for v in globals {
            self.mark_value(v);
        }

        // Closures of the active frames.
        let mut closures = Vec::new();
        for frame in self.frames.iter() {
            if let Some(closure) = frame.closure {
                closures.push(closure);
            }
        }
        for closure in closures {
            self.mark_object(closure);
        }

        let open = self.open_upvalues.clone();
        for up in open {
            self.mark_object(up);
        }

        let retained = self.retained.clone();
        for v in retained {
            self.mark_value(v);
        }

        let tlvars = self.mark_tlvars();
        for v in tlvars {
            self.mark_value(v);
        }
    }

    /// Drains the gray list, marking each queued object's children.
    fn trace_gray(&mut self) {
        let mut children = Vec::new();
        while let Some(obj) = self.gray.pop() {
            children.clear();
            obj.for_each_child(&mut |v| children.push(v));
            for &v in &children {
                self.mark_value(v);
            }
        }
    }

    /// Frees every object still unmarked and resets survivors for the next
    /// cycle.
    fn sweep(&mut self) {
        let mut prev: Option<ObjectRef> = None;
        let mut cur = self.objects;
        let mut freed = 0usize;
        while let Some(obj) = cur {
            cur = obj.next();
            if obj.status() == ObjectStatus::Marked {
                obj.set_status(ObjectStatus::Unmarked);
                prev = Some(obj);
            } else {
                let size = obj.size();
                self.bound = self.bound.saturating_sub(size);
                match prev {
                    Some(p) => p.set_next(cur),
                    None => self.objects = cur,
                }
                unsafe { obj.free() };
                freed += 1;
            }
        }
        trace!(freed, "sweep complete");
    }

    /// Recomputes the bound-byte accounting from the object list.
    pub(crate) fn recalculate_bound(&self) -> usize {
        let mut size = 0usize;
        let mut cur = self.objects;
        while let Some(obj) = cur {
            size += obj.size();
            cur = obj.next();
        }
        size
    }

    /// Collects garbage. A no-op for subkernels and for VMs with nothing
    /// bound.
    pub fn collect_garbage(&mut self) {
        if self.is_subkernel {
            return; // the parent collects
        }
        if self.bound == 0 {
            return;
        }
        let init = self.bound;
        trace!(bound = init, "begin garbage collection");

        self.mark_roots();
        self.trace_gray();
        self.sweep();

        if self.bound > init {
            // Accounting underflowed somewhere; rebuild it from the list.
            self.bound = self.recalculate_bound();
        }
        self.next_gc = self.bound * self.options.gc_growth_factor;

        trace!(
            collected = init.saturating_sub(self.bound),
            bound = self.bound,
            next = self.next_gc,
            "end garbage collection"
        );
    }

    /// Number of objects currently bound to this VM.
    pub fn object_count(&self) -> usize {
        let mut count = 0usize;
        let mut cur = self.objects;
        while let Some(obj) = cur {
            count += 1;
            cur = obj.next();
        }
        count
    }
}
