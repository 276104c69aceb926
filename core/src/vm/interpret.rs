//! The fetch/decode/dispatch loop.
//!
//! Arithmetic runs a numeric fast path first, then falls back to method
//! dispatch: the left operand's operator method, then the right operand's
//! reflected method, then `InvldOp`. Calls adapt arguments (arity check, or
//! optional/variadic shuffling), advance the frame pointer and shift the
//! register window. Raising an error enters the unwinder, which scans the
//! handler stack for a dictionary entry matching the error id, bounded by
//! the nearest frame that must return to host code.

use core::fmt::Write as _;

use smallvec::SmallVec;

use crate::error::{self, ErrorBlock};
use crate::instruction::{Instruction, Op};
use crate::object::{
    Dictionary, ObjClosure, ObjInstance, Object, ObjectKind, ObjectRef, UpvalueLoc,
};
use crate::program::Program;
use crate::value::Value;
use crate::vm::frame::{CallFrame, ErrorHandler};
use crate::vm::{TraceEntry, Vm};

/// What an executed instruction asks the loop to do next.
enum Flow {
    Continue,
    /// `END` reached.
    End,
    /// A frame with the return flag set returned; the interpreter exits
    /// even though outer frames remain.
    ReturnToHost,
}

enum Unwind {
    Resume,
    Abort,
}

#[derive(Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Looks up an error id in a handler dictionary, matching by content.
fn dict_lookup_id(dict: &Dictionary, id: &str) -> Option<Value> {
    let probe = Object::alloc_unmanaged(ObjectKind::string(id));
    let out = dict.get(&Value::Object(probe));
    unsafe { probe.free() };
    out
}

impl Vm {
    /// Executes instructions until `END`, a host-return frame pops, or an
    /// error goes uncaught. Returns true on success; on failure the error
    /// block is set.
    pub(crate) fn interpret(&mut self, rbase: usize, start: usize) -> bool {
        let Some(program) = self.program.clone() else {
            return false;
        };
        let mut pc = start;
        let mut rbase = rbase;

        loop {
            if self.debug.is_some()
                && self.debug_should_stop(pc)
                && let Err(e) = self.debugger_entry(&program, pc, rbase)
            {
                match self.unwind(&program, e, &mut pc, &mut rbase) {
                    Unwind::Resume => continue,
                    Unwind::Abort => return false,
                }
            }

            let Some(&bc) = program.code.get(pc) else {
                return true;
            };
            pc += 1;

            match self.exec(&program, bc, &mut pc, &mut rbase) {
                Ok(Flow::Continue) => {}
                Ok(Flow::End) | Ok(Flow::ReturnToHost) => return true,
                Err(e) => match self.unwind(&program, e, &mut pc, &mut rbase) {
                    Unwind::Resume => {}
                    Unwind::Abort => return false,
                },
            }
        }
    }

    /// Constant `i` of the currently executing function.
    #[inline]
    fn konst(&self, i: usize) -> Value {
        let f = self.frames.top().expect("active frame").function;
        f.as_function().map(|f| f.konst[i]).unwrap_or(Value::Nil)
    }

    fn exec(
        &mut self,
        program: &Program,
        bc: Instruction,
        pc: &mut usize,
        rbase: &mut usize,
    ) -> Result<Flow, ErrorBlock> {
        match bc.op() {
            Op::Nop => {}

            Op::Mov => {
                let v = self.reg(*rbase, bc.b());
                self.set_reg(*rbase, bc.a(), v);
            }

            Op::Lct => {
                let v = self.konst(bc.bx());
                self.set_reg(*rbase, bc.a(), v);
            }

            Op::Lgl => {
                let v = self.globals.get(bc.bx());
                self.set_reg(*rbase, bc.a(), v);
            }

            Op::Sgl => {
                self.globals.set(bc.bx(), self.reg(*rbase, bc.a()));
            }

            Op::Lup => {
                let closure = self
                    .frames
                    .top()
                    .and_then(|f| f.closure)
                    .ok_or_else(|| ErrorBlock::with_id(error::INTERNAL_ERROR))?;
                let up = closure.as_closure().unwrap().upvalues[bc.b()];
                let v = match up.as_upvalue().unwrap().loc.get() {
                    UpvalueLoc::Open(slot) => self.stack[slot],
                    UpvalueLoc::Closed(v) => v,
                };
                self.set_reg(*rbase, bc.a(), v);
            }

            Op::Sup => {
                let v = self.reg(*rbase, bc.b());
                let closure = self
                    .frames
                    .top()
                    .and_then(|f| f.closure)
                    .ok_or_else(|| ErrorBlock::with_id(error::INTERNAL_ERROR))?;
                let up = closure.as_closure().unwrap().upvalues[bc.a()];
                match up.as_upvalue().unwrap().loc.get() {
                    UpvalueLoc::Open(slot) => self.stack[slot] = v,
                    UpvalueLoc::Closed(_) => {
                        up.as_upvalue().unwrap().loc.set(UpvalueLoc::Closed(v))
                    }
                }
            }

            Op::Closeup => {
                self.close_upvalues(*rbase + bc.a());
            }

            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
                let op = match bc.op() {
                    Op::Add => ArithOp::Add,
                    Op::Sub => ArithOp::Sub,
                    Op::Mul => ArithOp::Mul,
                    Op::Div => ArithOp::Div,
                    _ => ArithOp::Pow,
                };
                let a = bc.a();
                let left = self.reg(*rbase, bc.b());
                let right = self.reg(*rbase, bc.c());

                if let Some(v) = self.binary_arith(op, left, right)? {
                    self.set_reg(*rbase, a, v);
                    return Ok(Flow::Continue);
                }

                let (sel, rsel, name) = {
                    let s = self.core.selectors();
                    match op {
                        ArithOp::Add => (s.add, s.addr, "Add"),
                        ArithOp::Sub => (s.sub, s.subr, "Subtract"),
                        ArithOp::Mul => (s.mul, s.mulr, "Multiply"),
                        ArithOp::Div => (s.div, s.divr, "Divide"),
                        ArithOp::Pow => (s.pow, s.powr, "Exponentiate"),
                    }
                };

                if left.as_object().is_some()
                    && let Some(v) = self.invoke_selector(left, sel, &[right])?
                    && !v.is_nil()
                {
                    self.set_reg(*rbase, a, v);
                    return Ok(Flow::Continue);
                }
                if right.as_object().is_some()
                    && let Some(v) = self.invoke_selector(right, rsel, &[left])?
                {
                    self.set_reg(*rbase, a, v);
                    return Ok(Flow::Continue);
                }
                return Err(op_error(name, left, right));
            }

            Op::Not => {
                let v = self.reg(*rbase, bc.b());
                let out = match v {
                    Value::Bool(b) => Value::Bool(!b),
                    _ => Value::Bool(v.is_nil()),
                };
                self.set_reg(*rbase, bc.a(), out);
            }

            Op::Eq => {
                let left = self.reg(*rbase, bc.b());
                let right = self.reg(*rbase, bc.c());
                self.set_reg(*rbase, bc.a(), Value::Bool(left.eq_value(&right)));
            }

            Op::Neq => {
                let left = self.reg(*rbase, bc.b());
                let right = self.reg(*rbase, bc.c());
                self.set_reg(*rbase, bc.a(), Value::Bool(!left.eq_value(&right)));
            }

            Op::Lt | Op::Le => {
                let left = self.reg(*rbase, bc.b());
                let right = self.reg(*rbase, bc.c());
                if !(left.is_number() && right.is_number()) {
                    return Err(op_error("Compare", left, right));
                }
                let ord = left.compare(&right).expect("numbers compare");
                let out = if bc.op() == Op::Lt {
                    ord.is_lt()
                } else {
                    ord.is_le()
                };
                self.set_reg(*rbase, bc.a(), Value::Bool(out));
            }

            Op::B => {
                *pc = offset_pc(*pc, bc.sbx());
            }

            Op::Bif => {
                if self.reg(*rbase, bc.a()).is_true() {
                    *pc = offset_pc(*pc, bc.sbx());
                }
            }

            Op::Biff => {
                if self.reg(*rbase, bc.a()).is_false() {
                    *pc = offset_pc(*pc, bc.sbx());
                }
            }

            Op::Call => {
                let left = self.reg(*rbase, bc.a());
                self.do_call(left, bc.a(), bc.b(), pc, rbase)?;
            }

            Op::Invoke => {
                return self.exec_invoke(bc, pc, rbase);
            }

            Op::Return => {
                // Leaving the frame closes its upvalues and discards its
                // error handlers.
                self.close_upvalues(*rbase);
                let fpidx = self.frames.len() - 1;
                while matches!(self.handlers.top(), Some(h) if h.frame == fpidx) {
                    self.handlers.pop();
                }

                let retvalue = if bc.a() > 0 {
                    self.reg(*rbase, bc.b())
                } else {
                    Value::Nil
                };

                if self.frames.len() > 1 {
                    let callee = self.frames.pop().expect("frame");
                    let caller = *self.frames.top().expect("caller frame");
                    *rbase = caller.roffset;
                    self.set_reg(*rbase, caller.returnreg, retvalue);
                    *pc = caller.pc;
                    if callee.ret {
                        return Ok(Flow::ReturnToHost);
                    }
                } else {
                    return Err(ErrorBlock::with_id(error::GLBL_RTRN));
                }
            }

            Op::Closure => {
                let a = bc.a();
                let pb = bc.b();
                let func = self
                    .reg(*rbase, a)
                    .as_object()
                    .filter(|o| o.as_function().is_some())
                    .ok_or_else(|| ErrorBlock::with_id(error::INTERNAL_ERROR))?;
                let frame = *self.frames.top().expect("active frame");
                let proto = frame
                    .function
                    .as_function()
                    .map(|f| f.prototypes[pb].clone())
                    .unwrap_or_default();
                let mut upvalues = Vec::with_capacity(proto.len());
                for up in &proto {
                    if up.is_local {
                        upvalues.push(self.capture_upvalue(*rbase + up.index));
                    } else {
                        let enclosing = frame
                            .closure
                            .ok_or_else(|| ErrorBlock::with_id(error::INTERNAL_ERROR))?;
                        upvalues.push(enclosing.as_closure().unwrap().upvalues[up.index]);
                    }
                }
                let closure =
                    Object::alloc_unmanaged(ObjectKind::Closure(ObjClosure { func, upvalues }));
                self.set_reg(*rbase, a, Value::Object(closure));
                self.bind_internal(Value::Object(closure));
            }

            Op::Cat => {
                let mut text = String::new();
                for i in bc.b()..=bc.c() {
                    let _ = write!(text, "{}", self.reg(*rbase, i));
                }
                let s = Object::alloc_unmanaged(ObjectKind::string(text));
                self.set_reg(*rbase, bc.a(), Value::Object(s));
                self.bind_internal(Value::Object(s));
            }

            Op::Print => {
                let v = self.reg(*rbase, bc.a());
                let print_sel = self.core.selectors().print;
                if self.invoke_selector(v, print_sel, &[])?.is_none() {
                    let _ = write!(PrintAdapter(&mut self.out), "{}", v);
                }
                let _ = writeln!(PrintAdapter(&mut self.out));
            }

            Op::Lix => {
                let a = bc.a();
                let b = bc.b();
                let c = bc.c();
                let target = self.reg(*rbase, a);
                if let Some(arr) = target.as_object().and_then(|o| o.as_array()) {
                    let indices: SmallVec<[Value; 4]> =
                        (b..=c).map(|i| self.reg(*rbase, i)).collect();
                    if indices.iter().all(Value::is_number) {
                        let v = arr.get(&indices).map_err(ErrorBlock::with_id)?;
                        self.set_reg(*rbase, b, v);
                    } else {
                        let sliced = arr.slice(&indices).map_err(ErrorBlock::with_id)?;
                        let out = Object::alloc_unmanaged(ObjectKind::Array(sliced));
                        self.set_reg(*rbase, b, Value::Object(out));
                        self.bind_internal(Value::Object(out));
                    }
                } else {
                    let args: SmallVec<[Value; 4]> =
                        (b..=c).map(|i| self.reg(*rbase, i)).collect();
                    let getindex = self.core.selectors().getindex;
                    match self.invoke_selector(target, getindex, &args)? {
                        Some(v) => self.set_reg(*rbase, b, v),
                        None => return Err(ErrorBlock::with_id(error::NOT_INDEXABLE)),
                    }
                }
            }

            Op::Six => {
                let a = bc.a();
                let b = bc.b();
                let c = bc.c();
                let target = self.reg(*rbase, a);
                if let Some(obj) = target.as_object().filter(|o| o.as_array().is_some()) {
                    let indices: SmallVec<[Value; 4]> =
                        (b..c).map(|i| self.reg(*rbase, i)).collect();
                    let v = self.reg(*rbase, c);
                    obj.as_array_mut()
                        .unwrap()
                        .set(&indices, v)
                        .map_err(ErrorBlock::with_id)?;
                } else {
                    let args: SmallVec<[Value; 4]> =
                        (b..=c).map(|i| self.reg(*rbase, i)).collect();
                    let setindex = self.core.selectors().setindex;
                    if self.invoke_selector(target, setindex, &args)?.is_none() {
                        return Err(ErrorBlock::with_id(error::NOT_INDEXABLE));
                    }
                }
            }

            Op::Lpr => {
                return self.exec_load_property(bc, rbase);
            }

            Op::Spr => {
                let target = self.reg(*rbase, bc.a());
                match target.as_object().filter(|o| o.as_instance().is_some()) {
                    Some(obj) => {
                        let key = self.reg(*rbase, bc.b());
                        let v = self.reg(*rbase, bc.c());
                        obj.as_instance_mut().unwrap().fields.insert(key, v);
                    }
                    None => return Err(ErrorBlock::with_id(error::NOT_AN_OBJECT)),
                }
            }

            Op::Pusherr => {
                let dict = self.konst(bc.bx());
                let handler = ErrorHandler {
                    frame: self.frames.len() - 1,
                    dict,
                };
                if !self.handlers.try_push(handler) {
                    return Err(ErrorBlock::with_id(error::ERR_STACK_OVERFLOW));
                }
            }

            Op::Poperr => {
                *pc = offset_pc(*pc, bc.sbx());
                self.handlers.pop();
            }

            Op::Break => {
                if self.debug.is_some() {
                    self.debugger_entry(program, *pc, *rbase)?;
                }
            }

            Op::End => return Ok(Flow::End),
        }
        Ok(Flow::Continue)
    }

    // ------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------

    /// Numeric and string fast paths. `Ok(None)` means "dispatch as a
    /// method instead".
    fn binary_arith(
        &mut self,
        op: ArithOp,
        left: Value,
        right: Value,
    ) -> Result<Option<Value>, ErrorBlock> {
        let out = match (left, right) {
            (Value::Int(a), Value::Int(b)) => match op {
                ArithOp::Add => Value::Int(self.int_arith(op, a, b)?),
                ArithOp::Sub => Value::Int(self.int_arith(op, a, b)?),
                ArithOp::Mul => Value::Int(self.int_arith(op, a, b)?),
                // Integer division always yields a float.
                ArithOp::Div => Value::Float(a as f64 / b as f64),
                ArithOp::Pow => Value::Float((a as f64).powf(b as f64)),
            },
            (Value::Int(a), Value::Float(b)) => Value::Float(float_arith(op, a as f64, b)),
            (Value::Float(a), Value::Int(b)) => Value::Float(float_arith(op, a, b as f64)),
            (Value::Float(a), Value::Float(b)) => Value::Float(float_arith(op, a, b)),
            _ => {
                if matches!(op, ArithOp::Add) && left.is_string() && right.is_string() {
                    let text = {
                        let a = &left.as_string().unwrap().text;
                        let b = &right.as_string().unwrap().text;
                        let mut t = String::with_capacity(a.len() + b.len());
                        t.push_str(a);
                        t.push_str(b);
                        t
                    };
                    Value::Object(Object::alloc_unmanaged(ObjectKind::string(text)))
                } else {
                    return Ok(None);
                }
            }
        };
        if let Value::Object(_) = out {
            // Freshly concatenated string: root it via the caller's register
            // write before collection can run.
            self.bind_internal_nocollect(out);
        }
        Ok(Some(out))
    }

    /// Integer ADD/SUB/MUL: wrapping two's-complement by default, checked
    /// when the option is set.
    fn int_arith(&self, op: ArithOp, a: i32, b: i32) -> Result<i32, ErrorBlock> {
        let (wrapped, checked) = match op {
            ArithOp::Add => (a.wrapping_add(b), a.checked_add(b)),
            ArithOp::Sub => (a.wrapping_sub(b), a.checked_sub(b)),
            ArithOp::Mul => (a.wrapping_mul(b), a.checked_mul(b)),
            _ => unreachable!("div and pow never take this path"),
        };
        if self.options.checked_arithmetic {
            checked.ok_or_else(|| ErrorBlock::with_id(error::INTEGER_OVERFLOW))
        } else {
            Ok(wrapped)
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Performs a call: locates the callable (unwrapping invocations),
    /// instantiates classes, runs builtins synchronously, and pushes a
    /// frame for scripted functions. `a` is the register holding the
    /// callable; arguments follow in `a+1..=a+nargs`.
    fn do_call(
        &mut self,
        callable: Value,
        a: usize,
        nargs: usize,
        pc: &mut usize,
        rbase: &mut usize,
    ) -> Result<(), ErrorBlock> {
        let mut callable = callable;
        if let Some(inv) = callable.as_object().and_then(|o| o.as_invocation()) {
            let (receiver, method) = (inv.receiver, inv.method);
            self.set_reg(*rbase, a, receiver);
            callable = method;
        }

        let Some(obj) = callable.as_object() else {
            return Err(ErrorBlock::with_id(error::UNCALLABLE));
        };

        match obj.kind() {
            ObjectKind::Function(_) | ObjectKind::Closure(_) => {
                self.setup_call(callable, a, nargs, pc, rbase)
            }
            ObjectKind::Builtin(b) => {
                let func = b.func;
                self.frames.top_mut().expect("frame").pc = *pc;
                let args: SmallVec<[Value; 8]> =
                    (a..=a + nargs).map(|i| self.reg(*rbase, i)).collect();
                let ret = func(self, &args)?;
                self.set_reg(*rbase, a, ret);
                Ok(())
            }
            ObjectKind::Class(_) => {
                let class = obj;
                let instance = Object::alloc_unmanaged(ObjectKind::Instance(ObjInstance {
                    class,
                    fields: Dictionary::new(),
                }));
                self.set_reg(*rbase, a, Value::Object(instance));
                self.bind_internal(Value::Object(instance));

                let init_sel = self.core.selectors().init;
                let init = class.as_class().and_then(|k| k.methods.get(&init_sel));
                match init {
                    Some(ifunc) => self.do_call(ifunc, a, nargs, pc, rbase),
                    None if nargs > 0 => {
                        let name = class
                            .as_class()
                            .map(|k| k.name.to_string())
                            .unwrap_or_default();
                        Err(ErrorBlock::with_message(
                            error::NO_INITIALIZER,
                            format!(
                                "Cannot instantiate with arguments because class '{}' does not provide an initializer.",
                                name
                            ),
                        ))
                    }
                    None => Ok(()),
                }
            }
            _ => Err(ErrorBlock::with_id(error::UNCALLABLE)),
        }
    }

    /// Pushes a frame for a scripted function or closure and jumps to its
    /// entry. The caller's resume point, stack size and return register are
    /// saved in the caller's frame.
    fn setup_call(
        &mut self,
        fnval: Value,
        regcall: usize,
        nargs: usize,
        pc: &mut usize,
        rbase: &mut usize,
    ) -> Result<(), ErrorBlock> {
        let obj = fnval.as_object().expect("function value");
        let (func, closure) = match obj.kind() {
            ObjectKind::Closure(c) => (c.func, Some(obj)),
            _ => (obj, None),
        };
        let f = func
            .as_function()
            .ok_or_else(|| ErrorBlock::with_id(error::UNCALLABLE))?;
        let (fnargs, fnregs, needs_adaptation) = (f.nargs, f.nregs, f.has_adaptation());
        let entry = f.entry;

        let old_nregs = {
            let caller = self.frames.top_mut().expect("active frame");
            caller.pc = *pc;
            caller.stackcount = caller.roffset + caller.nregs();
            caller.returnreg = regcall;
            caller.nregs()
        };

        let new_rbase = *rbase + old_nregs;
        let mut frame = CallFrame::new(func, new_rbase);
        frame.closure = closure;
        if !self.frames.try_push(frame) {
            return Err(ErrorBlock::with_id(error::STACK_OVERFLOW));
        }

        self.ensure_stack(new_rbase + fnregs);

        // Copy the callable slot and arguments into the new window.
        for i in 0..=nargs {
            let v = self.reg(*rbase, regcall + i);
            self.set_reg(new_rbase, i, v);
        }

        if needs_adaptation {
            self.adapt_args(func, *rbase, regcall, nargs, new_rbase)?;
        } else if fnargs != nargs {
            return Err(invalid_args(fnargs, nargs));
        }

        // Registers beyond the arguments must never hold stale values the
        // collector could chase.
        for r in fnargs + 1..fnregs {
            self.set_reg(new_rbase, r, Value::Int(0));
        }

        *pc = entry;
        *rbase = new_rbase;
        Ok(())
    }

    /// Optional and variadic argument adaptation. The caller emits fixed
    /// positionals followed by trailing `(symbol, value)` pairs; defaults
    /// come from the constant table, matched pairs overwrite them, and
    /// remaining positionals pack into a fresh list in the variadic slot.
    fn adapt_args(
        &mut self,
        func: ObjectRef,
        rbase: usize,
        regcall: usize,
        nargs: usize,
        new_rbase: usize,
    ) -> Result<(), ErrorBlock> {
        let f = func.as_function().expect("function");
        let nopt = f.opt.len();
        let nfixed = f.nargs - nopt;
        let roffset = nfixed + 1;

        for (i, opt) in f.opt.iter().enumerate() {
            self.set_reg(new_rbase, roffset + i, f.konst[opt.def]);
        }

        // Walk the trailing pairs; an unknown symbol ends the keyword
        // region and everything before it is positional.
        let mut npairs = 0usize;
        while 2 * npairs < nargs {
            let sym = self.reg(rbase, regcall + nargs - 1 - 2 * npairs);
            let Some(k) = f.opt.iter().position(|o| o.symbol.same(&sym)) else {
                break;
            };
            let v = self.reg(rbase, regcall + nargs - 2 * npairs);
            self.set_reg(new_rbase, roffset + k, v);
            npairs += 1;
        }

        let npos = nargs - 2 * npairs;
        if f.varg.is_some() {
            if npos + 1 < nfixed {
                return Err(invalid_args(nfixed - 1, npos));
            }
            let items: Vec<Value> = (nfixed..=npos)
                .map(|i| self.reg(rbase, regcall + i))
                .collect();
            let list = Object::alloc_unmanaged(ObjectKind::list(items));
            self.set_reg(new_rbase, nfixed, Value::Object(list));
            self.bind_internal_nocollect(Value::Object(list));
        } else if npos != nfixed {
            return Err(invalid_args(nfixed, npos));
        }
        Ok(())
    }

    /// Re-entrant call used by host code and by selector dispatch: sets up
    /// a frame whose return flag exits the inner interpreter.
    pub(crate) fn call_with_receiver(
        &mut self,
        f: Value,
        r0: Value,
        args: &[Value],
    ) -> Result<Value, ErrorBlock> {
        let mut fnval = f;
        let mut r0 = r0;
        if let Some(inv) = fnval.as_object().and_then(|o| o.as_invocation()) {
            r0 = inv.receiver;
            fnval = inv.method;
        }

        let Some(obj) = fnval.as_object() else {
            return Err(ErrorBlock::with_id(error::UNCALLABLE));
        };

        match obj.kind() {
            ObjectKind::Builtin(b) => {
                let func = b.func;
                let mut xargs: SmallVec<[Value; 8]> = SmallVec::new();
                xargs.push(r0);
                xargs.extend_from_slice(args);
                func(self, &xargs)
            }
            ObjectKind::Function(_) | ObjectKind::Closure(_) => {
                let caller = *self.frames.top().ok_or_else(|| {
                    ErrorBlock::with_id(error::INTERNAL_ERROR)
                })?;
                let regcall = caller.nregs();
                let caller_rbase = caller.roffset;

                // Stage receiver and arguments in the virtual call window so
                // argument adaptation sees them.
                self.ensure_stack(caller_rbase + regcall + args.len() + 1);
                self.set_reg(caller_rbase, regcall, r0);
                for (i, &arg) in args.iter().enumerate() {
                    self.set_reg(caller_rbase, regcall + 1 + i, arg);
                }

                let mut pc = caller.pc;
                let mut rbase = caller_rbase;
                self.setup_call(fnval, regcall, args.len(), &mut pc, &mut rbase)?;
                self.set_reg(rbase, 0, r0);
                self.frames.top_mut().expect("frame").ret = true;

                if self.interpret(rbase, pc) {
                    // The return value lands in the caller's return register,
                    // which is the callee's former register 0.
                    Ok(self.stack[rbase])
                } else {
                    Err(self.err.clone())
                }
            }
            _ => Err(ErrorBlock::with_id(error::UNCALLABLE)),
        }
    }

    /// Dispatches a selector on a receiver: instance methods, class
    /// methods, or the veneer class of a native type. `Ok(None)` when the
    /// receiver has no such method.
    pub(crate) fn invoke_selector(
        &mut self,
        receiver: Value,
        selector: Value,
        args: &[Value],
    ) -> Result<Option<Value>, ErrorBlock> {
        let Some(obj) = receiver.as_object() else {
            return Ok(None);
        };
        let method = match obj.kind() {
            ObjectKind::Instance(inst) => inst
                .class
                .as_class()
                .and_then(|k| k.methods.get(&selector)),
            ObjectKind::Class(klass) => klass.methods.get(&selector),
            _ => self
                .core
                .veneer_class(obj.type_of())
                .and_then(|k| k.as_class())
                .and_then(|k| k.methods.get(&selector)),
        };
        match method {
            Some(m) => self.call_with_receiver(m, receiver, args).map(Some),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // INVOKE and property access
    // ------------------------------------------------------------------

    fn exec_invoke(
        &mut self,
        bc: Instruction,
        pc: &mut usize,
        rbase: &mut usize,
    ) -> Result<Flow, ErrorBlock> {
        let a = bc.a();
        let nargs = bc.c();
        let receiver = self.reg(*rbase, a);
        let label = self.reg(*rbase, bc.b());

        let Some(obj) = receiver.as_object() else {
            return Err(ErrorBlock::with_id(error::NOT_AN_INSTANCE));
        };

        match obj.kind() {
            ObjectKind::Instance(inst) => {
                let method = inst
                    .class
                    .as_class()
                    .and_then(|k| k.methods.get(&label));
                if let Some(m) = method {
                    self.do_call(m, a, nargs, pc, rbase)?;
                } else if let Some(field) = inst.fields.get(&label) {
                    // A callable property: transmute into a plain call.
                    if field.is_callable() {
                        self.set_reg(*rbase, a, field);
                        self.do_call(field, a, nargs, pc, rbase)?;
                    } else {
                        return Err(ErrorBlock::with_id(error::UNCALLABLE));
                    }
                } else {
                    return Err(lacks_property(error::OBJECT_LACKS_PROPERTY, &label));
                }
            }
            ObjectKind::Class(klass) => {
                let method = klass.methods.get(&label);
                if let Some(m) = method {
                    // Inside a method body, self sits in register 0; rebind
                    // it so class-level invocations act on the instance.
                    if self.frames.len() > 1 {
                        let r0 = self.reg(*rbase, 0);
                        self.set_reg(*rbase, a, r0);
                    }
                    self.do_call(m, a, nargs, pc, rbase)?;
                } else {
                    return Err(lacks_property(error::CLASS_LACKS_PROPERTY, &label));
                }
            }
            _ => match self.core.veneer_class(obj.type_of()) {
                Some(veneer) => {
                    let method = veneer.as_class().and_then(|k| k.methods.get(&label));
                    match method {
                        Some(m) => self.do_call(m, a, nargs, pc, rbase)?,
                        None => {
                            return Err(lacks_property(error::CLASS_LACKS_PROPERTY, &label));
                        }
                    }
                }
                None => return Err(ErrorBlock::with_id(error::NOT_AN_INSTANCE)),
            },
        }
        Ok(Flow::Continue)
    }

    fn exec_load_property(
        &mut self,
        bc: Instruction,
        rbase: &mut usize,
    ) -> Result<Flow, ErrorBlock> {
        let a = bc.a();
        let target = self.reg(*rbase, bc.b());
        let label = self.reg(*rbase, bc.c());

        let Some(obj) = target.as_object() else {
            return Err(ErrorBlock::with_id(error::NOT_AN_OBJECT));
        };

        match obj.kind() {
            ObjectKind::Instance(inst) => {
                if let Some(v) = inst.fields.get(&label) {
                    self.set_reg(*rbase, a, v);
                } else if let Some(m) = inst
                    .class
                    .as_class()
                    .and_then(|k| k.methods.get(&label))
                {
                    // Accessing a method as a property binds it.
                    self.bind_invocation(target, m, *rbase, a);
                } else {
                    return Err(lacks_property(error::OBJECT_LACKS_PROPERTY, &label));
                }
            }
            ObjectKind::Class(klass) => match klass.methods.get(&label) {
                Some(m) => self.bind_invocation(target, m, *rbase, a),
                None => return Err(lacks_property(error::CLASS_LACKS_PROPERTY, &label)),
            },
            _ => match self.core.veneer_class(obj.type_of()) {
                Some(veneer) => {
                    match veneer.as_class().and_then(|k| k.methods.get(&label)) {
                        Some(m) => self.bind_invocation(target, m, *rbase, a),
                        None => {
                            return Err(lacks_property(error::CLASS_LACKS_PROPERTY, &label));
                        }
                    }
                }
                None => return Err(ErrorBlock::with_id(error::NOT_AN_OBJECT)),
            },
        }
        Ok(Flow::Continue)
    }

    /// Builds a bound (receiver, method) pair in register `a`.
    fn bind_invocation(&mut self, receiver: Value, method: Value, rbase: usize, a: usize) {
        let inv = Object::alloc_unmanaged(ObjectKind::Invocation(
            crate::object::ObjInvocation { receiver, method },
        ));
        self.set_reg(rbase, a, Value::Object(inv));
        self.bind_internal(Value::Object(inv));
    }

    // ------------------------------------------------------------------
    // Unwinding
    // ------------------------------------------------------------------

    /// Handles a raised error: finds a matching handler no earlier than the
    /// nearest must-return frame and resumes there with the error cleared,
    /// or records the stack trace and aborts.
    fn unwind(
        &mut self,
        program: &Program,
        mut err: ErrorBlock,
        pc: &mut usize,
        rbase: &mut usize,
    ) -> Unwind {
        if err.line == error::POSN_UNIDENTIFIABLE
            && let Some(info) = program
                .annotations
                .info_from_index(program.global, pc.saturating_sub(1))
        {
            err.line = info.line;
            err.posn = info.posn;
        }
        self.err = err;

        // The nearest frame that must return to host code bounds the search.
        let retfp = self
            .frames
            .iter()
            .rposition(|f| f.ret)
            .unwrap_or(0);

        let mut caught = None;
        let mut i = self.handlers.len();
        while i > 0 {
            let handler = *self.handlers.get(i - 1).expect("handler");
            if handler.frame < retfp {
                // Handlers below the re-entry point stay for the outer
                // interpreter; everything above is dead.
                self.handlers.truncate(i);
                break;
            }
            if let Some(dict) = handler.dict.as_object().and_then(|o| o.as_dictionary())
                && let Some(target) = dict_lookup_id(dict, &self.err.id)
                && let Value::Int(target) = target
            {
                caught = Some((i - 1, handler.frame, target as usize));
                break;
            }
            i -= 1;
        }

        if let Some((hindex, hframe, target)) = caught {
            tracing::debug!(id = %self.err.id, frame = hframe, "error caught by handler");
            self.err.clear();
            self.frames.truncate(hframe + 1);
            let frame = *self.frames.top().expect("handler frame");
            *rbase = frame.roffset;
            *pc = target;
            self.close_upvalues(frame.roffset + frame.nregs());
            self.handlers.truncate(hindex);
            return Unwind::Resume;
        }

        // Uncaught: snapshot the active frames for stack-trace formatting,
        // then unwind to the must-return point.
        tracing::debug!(id = %self.err.id, "error not caught; unwinding");
        if self.error_trace.is_empty() {
            let mut trace = Vec::new();
            for (i, frame) in self.frames.iter().enumerate().rev() {
                let name = frame
                    .function
                    .as_function()
                    .map(|f| f.name)
                    .unwrap_or(Value::Nil);
                // Non-top frames saved their resume point when they made
                // the call; the top frame is at the current pc.
                let at = if i + 1 == self.frames.len() {
                    *pc
                } else {
                    frame.pc
                };
                trace.push(TraceEntry { function: name, pc: at });
            }
            self.error_trace = trace;
        }
        self.frames.truncate(retfp);
        Unwind::Abort
    }
}

#[inline]
fn offset_pc(pc: usize, sbx: i32) -> usize {
    (pc as i64 + sbx as i64) as usize
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Pow => a.powf(b),
    }
}

fn op_error(op: &str, left: Value, right: Value) -> ErrorBlock {
    ErrorBlock::with_message(
        error::INVLD_OP,
        format!("Invalid operands to {}: {} and {}.", op, left, right),
    )
}

fn invalid_args(expected: usize, got: usize) -> ErrorBlock {
    ErrorBlock::with_message(
        error::INVALID_ARGS,
        format!("Expected {} arguments but got {}.", expected, got),
    )
}

fn lacks_property(id: &'static str, label: &Value) -> ErrorBlock {
    let what = if id == error::CLASS_LACKS_PROPERTY {
        format!("Class lacks method '{}'.", label)
    } else {
        format!("Object lacks property or method '{}'.", label)
    };
    ErrorBlock::with_message(id, what)
}

/// `std::io::Write` shim so `writeln!` with `core::fmt` arguments targets
/// the VM's print sink.
struct PrintAdapter<'a>(&'a mut Box<dyn std::io::Write>);

impl core::fmt::Write for PrintAdapter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write_all(s.as_bytes()).map_err(|_| core::fmt::Error)
    }
}
