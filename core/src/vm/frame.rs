//! Call frames and error-handler records.

use crate::object::ObjectRef;
use crate::value::Value;

/// A per-call record on the frame stack. The frame pointer advances on each
/// call and retreats on return; the top `nregs` stack slots from `roffset`
/// belong to the frame's function.
#[derive(Clone, Copy)]
pub struct CallFrame {
    /// The executing function.
    pub function: ObjectRef,
    /// The closure in use, when the callee was a closure.
    pub closure: Option<ObjectRef>,
    /// Absolute stack index of register 0.
    pub roffset: usize,
    /// Saved program counter: the caller's resume point while a callee runs.
    pub pc: usize,
    /// Stack size at the time this frame made a call.
    pub stackcount: usize,
    /// Register (of this frame) receiving the callee's return value.
    pub returnreg: usize,
    /// When set, the interpreter exits after this frame returns; used for
    /// re-entrant calls from host code.
    pub ret: bool,
}

impl CallFrame {
    pub fn new(function: ObjectRef, roffset: usize) -> Self {
        CallFrame {
            function,
            closure: None,
            roffset,
            pc: 0,
            stackcount: 0,
            returnreg: 0,
            ret: false,
        }
    }

    /// Register count of this frame's function.
    pub fn nregs(&self) -> usize {
        self.function.as_function().map(|f| f.nregs).unwrap_or(0)
    }
}

/// An entry on the error-handler stack, parallel to the frame stack.
#[derive(Clone, Copy)]
pub struct ErrorHandler {
    /// Index of the frame that pushed the handler.
    pub frame: usize,
    /// The handler dictionary: error id → branch target.
    pub dict: Value,
}
