//! The interactive debugger.
//!
//! The interpreter offers control here at a `BREAK` opcode or when the
//! safe-point check fires (single-step mode or an instruction breakpoint).
//! Commands arrive over an injected reader and answers go to an injected
//! writer, so sessions run against pipes and test buffers as well as a
//! terminal; the line editor belongs to the shell.
//!
//! Single-step semantics: stepping stops only when the (line, function)
//! pair differs from the previous stop, unless an explicit breakpoint hits.

use std::io::{BufRead, Write};

use ecow::EcoString;

use crate::error::{self, ErrorBlock};
use crate::object::{Object, ObjectKind, ObjectRef};
use crate::program::Program;
use crate::value::Value;
use crate::vm::Vm;

pub struct Debugger {
    /// One flag per instruction.
    breakpoints: Vec<bool>,
    singlestep: bool,
    current_line: i32,
    current_function: Option<ObjectRef>,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}

impl Debugger {
    pub fn new(program: &Program, input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        Debugger {
            breakpoints: vec![false; program.code.len()],
            singlestep: false,
            current_line: -1,
            current_function: None,
            input,
            output,
        }
    }

    /// A debugger talking to the process's stdin and stdout.
    pub fn stdio(program: &Program) -> Self {
        Self::new(
            program,
            Box::new(std::io::BufReader::new(std::io::stdin())),
            Box::new(std::io::stdout()),
        )
    }

    pub fn set_breakpoint(&mut self, indx: usize) {
        if indx < self.breakpoints.len() {
            self.breakpoints[indx] = true;
        }
    }

    pub fn clear_breakpoint(&mut self, indx: usize) {
        if indx < self.breakpoints.len() {
            self.breakpoints[indx] = false;
        }
    }

    pub fn should_break_at(&self, indx: usize) -> bool {
        self.breakpoints.get(indx).copied().unwrap_or(false)
    }

    pub fn set_singlestep(&mut self, singlestep: bool) {
        self.singlestep = singlestep;
    }

    pub fn in_singlestep(&self) -> bool {
        self.singlestep
    }
}

/// Parses a literal for the `set` command: nil, booleans, numbers, or a
/// quoted string.
fn parse_literal(vm: &mut Vm, text: &str) -> Option<Value> {
    match text {
        "nil" => return Some(Value::Nil),
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        _ => {}
    }
    if let Ok(i) = text.parse::<i32>() {
        return Some(Value::Int(i));
    }
    if let Ok(f) = text.parse::<f64>() {
        return Some(Value::Float(f));
    }
    let trimmed = text.strip_prefix('"')?.strip_suffix('"')?;
    Some(vm.bind_new(ObjectKind::string(trimmed)))
}

/// Resolves a breakpoint target: a line number, a function name, or
/// `Class.method`.
fn resolve_breakpoint(program: &Program, target: &str) -> Option<usize> {
    if let Ok(line) = target.parse::<i32>() {
        return program.annotations.index_from_line(line);
    }
    let (classname, fname) = match target.split_once('.') {
        Some((c, f)) => (Some(c), f),
        None => (None, target),
    };
    let fprobe = Object::alloc_unmanaged(ObjectKind::string(fname));
    let fval = Value::Object(fprobe);
    let out = match classname {
        Some(c) => {
            let cprobe = Object::alloc_unmanaged(ObjectKind::string(c));
            let cval = Value::Object(cprobe);
            let out = program.annotations.index_from_function(Some(&cval), &fval);
            unsafe { cprobe.free() };
            out
        }
        None => program.annotations.index_from_function(None, &fval),
    };
    unsafe { fprobe.free() };
    out
}

impl Vm {
    /// Safe-point check: whether the interpreter should offer control to
    /// the debugger before executing the instruction at `pc`.
    pub(crate) fn debug_should_stop(&self, pc: usize) -> bool {
        match &self.debug {
            Some(d) => d.singlestep || d.should_break_at(pc),
            None => false,
        }
    }

    /// Enters the debugger at instruction `pc`.
    pub(crate) fn debugger_entry(
        &mut self,
        program: &Program,
        pc: usize,
        rbase: usize,
    ) -> Result<(), ErrorBlock> {
        let Some(mut dbg) = self.debug.take() else {
            return Ok(());
        };
        let result = self.debugger_session(&mut dbg, program, pc, rbase);
        self.debug = Some(dbg);
        result
    }

    fn debugger_session(
        &mut self,
        dbg: &mut Debugger,
        program: &Program,
        pc: usize,
        rbase: usize,
    ) -> Result<(), ErrorBlock> {
        let info = program.annotations.info_from_index(program.global, pc);
        let line = info.as_ref().map(|i| i.line).unwrap_or(-1);
        let function = info.as_ref().map(|i| i.function);

        // Stepping stops once per source line, not once per instruction.
        if dbg.singlestep
            && line == dbg.current_line
            && function == dbg.current_function
            && !dbg.should_break_at(pc)
        {
            return Ok(());
        }
        dbg.current_line = line;
        dbg.current_function = function;

        let _ = writeln!(dbg.output, "--- paused at {} (line {}) ---", pc, line);

        loop {
            let _ = write!(dbg.output, "@> ");
            let _ = dbg.output.flush();
            let mut input = String::new();
            match dbg.input.read_line(&mut input) {
                Ok(0) | Err(_) => {
                    dbg.singlestep = false;
                    break;
                }
                Ok(_) => {}
            }
            let tokens: Vec<&str> = input.split_whitespace().collect();
            let Some(&cmd) = tokens.first() else { continue };

            match cmd {
                "b" | "break" | "breakpoint" => {
                    match tokens.get(1).and_then(|t| resolve_breakpoint(program, t)) {
                        Some(indx) => dbg.set_breakpoint(indx),
                        None => {
                            let _ = writeln!(dbg.output, "Invalid breakpoint target.");
                        }
                    }
                }
                "x" | "clear" => {
                    match tokens.get(1).and_then(|t| resolve_breakpoint(program, t)) {
                        Some(indx) => dbg.clear_breakpoint(indx),
                        None => {
                            let _ = writeln!(dbg.output, "Invalid breakpoint target.");
                        }
                    }
                }
                "c" | "continue" => {
                    dbg.singlestep = false;
                    break;
                }
                "s" | "step" => {
                    dbg.singlestep = true;
                    break;
                }
                "d" | "disassemble" => {
                    crate::debug::disassemble::disassemble(&mut dbg.output, program, None);
                }
                "p" | "print" => match tokens.get(1) {
                    Some(sym) => self.debug_print_symbol(dbg, program, sym, pc),
                    None => self.debug_show_symbols(dbg, program),
                },
                "l" | "list" => {
                    let _ = writeln!(dbg.output, "at line {}", line);
                }
                "i" | "info" => self.debug_info(dbg, program, &tokens, rbase),
                "set" => self.debug_set(dbg, program, &tokens, rbase),
                "g" | "garbage" | "gc" => self.collect_garbage(),
                "t" | "trace" => self.debug_trace(dbg, program, pc),
                "q" | "quit" => {
                    return Err(ErrorBlock::with_id(error::DEBUGGER_QUIT));
                }
                "h" | "help" | "?" => {
                    let _ = writeln!(dbg.output, "Available commands:");
                    let _ = writeln!(
                        dbg.output,
                        "  [b]reakpoint, [c]ontinue, [d]isassemble, [g]arbage collect,"
                    );
                    let _ = writeln!(
                        dbg.output,
                        "  [?]/[h]elp, [i]nfo, [l]ist, [p]rint, [q]uit, [s]tep,"
                    );
                    let _ = writeln!(dbg.output, "  [t]race, [x]clear, set");
                }
                _ => {
                    let _ = writeln!(dbg.output, "Unrecognized debugger command");
                }
            }
        }
        Ok(())
    }

    /// Finds `sym` in the innermost frame whose symbol table contains it.
    fn find_symbol_slot(&self, program: &Program, sym: &str) -> Option<usize> {
        for frame in self.frames.iter().rev() {
            let symbols =
                program
                    .annotations
                    .symbols_for_function(program.global, frame.function, None);
            for (reg, name) in symbols.iter().enumerate() {
                if name.as_deref() == Some(sym) {
                    return Some(frame.roffset + reg);
                }
            }
        }
        None
    }

    fn debug_print_symbol(&mut self, dbg: &mut Debugger, program: &Program, sym: &str, _pc: usize) {
        match self.find_symbol_slot(program, sym) {
            Some(slot) => {
                let v = self.stack[slot];
                // User print methods take precedence over the default
                // rendering; they write to the VM's print sink.
                let print_sel = self.core.selectors().print;
                let is_instance = v
                    .as_object()
                    .map(|o| o.as_instance().is_some())
                    .unwrap_or(false);
                if is_instance && self.lookup_method(v, &print_sel).is_some() {
                    let _ = self.invoke_selector(v, print_sel, &[]);
                    let _ = writeln!(dbg.output);
                } else {
                    let _ = writeln!(dbg.output, "{} = {}", sym, v);
                }
            }
            None => {
                let _ = writeln!(dbg.output, "Symbol '{}' not found.", sym);
            }
        }
    }

    /// Shows every symbol visible in the current frame.
    fn debug_show_symbols(&mut self, dbg: &mut Debugger, program: &Program) {
        let Some(frame) = self.frames.top().copied() else {
            return;
        };
        let symbols =
            program
                .annotations
                .symbols_for_function(program.global, frame.function, None);
        for (reg, name) in symbols.iter().enumerate() {
            if let Some(name) = name {
                let _ = writeln!(
                    dbg.output,
                    "  {} = {}",
                    name,
                    self.stack[frame.roffset + reg]
                );
            }
        }
    }

    fn debug_info(
        &mut self,
        dbg: &mut Debugger,
        program: &Program,
        tokens: &[&str],
        rbase: usize,
    ) {
        match tokens.get(1).copied() {
            Some("address") | Some("*") => {
                let Some(r) = tokens.get(2).and_then(|t| t.parse::<usize>().ok()) else {
                    let _ = writeln!(dbg.output, "Invalid register.");
                    return;
                };
                let nregs = self.frames.top().map(|f| f.nregs()).unwrap_or(0);
                if r < nregs {
                    if let Some(obj) = self.stack[rbase + r].as_object() {
                        let _ = writeln!(
                            dbg.output,
                            "Object in register {} at {:p}.",
                            r,
                            obj.as_ptr()
                        );
                    }
                } else {
                    let _ = writeln!(dbg.output, "Invalid register.");
                }
            }
            Some("break") => {
                let _ = writeln!(dbg.output, "Active breakpoints:");
                for (i, set) in dbg.breakpoints.iter().enumerate() {
                    if *set {
                        let _ = writeln!(dbg.output, "  breakpoint at {}", i);
                    }
                }
            }
            Some("globals") | Some("g") => {
                for i in 0..self.global_count() {
                    let _ = writeln!(dbg.output, "  g{} = {}", i, self.global(i).unwrap());
                }
            }
            Some("global") => {
                if let Some(i) = tokens.get(2).and_then(|t| t.parse::<usize>().ok())
                    && let Some(v) = self.global(i)
                {
                    let _ = writeln!(dbg.output, "  g{} = {}", i, v);
                }
            }
            Some("registers") => {
                let nregs = self.frames.top().map(|f| f.nregs()).unwrap_or(0);
                for r in 0..nregs {
                    let _ = writeln!(dbg.output, "  r{} = {}", r, self.stack[rbase + r]);
                }
            }
            Some("stack") => {
                for i in 0..self.stack_top() {
                    let _ = writeln!(dbg.output, "  s{} = {}", i, self.stack[i]);
                }
            }
            _ => {
                let _ = writeln!(dbg.output, "Valid info commands:");
                let _ = writeln!(dbg.output, "  info address n: address of the object in register n.");
                let _ = writeln!(dbg.output, "  info break: all breakpoints.");
                let _ = writeln!(dbg.output, "  info globals: contents of all globals.");
                let _ = writeln!(dbg.output, "  info global n: contents of global n.");
                let _ = writeln!(dbg.output, "  info registers: contents of all registers.");
                let _ = writeln!(dbg.output, "  info stack: the value stack.");
            }
        }
        let _ = program;
    }

    /// `set reg <n> = <literal>` or `set <symbol> = <literal>`.
    fn debug_set(&mut self, dbg: &mut Debugger, program: &Program, tokens: &[&str], rbase: usize) {
        let eq = tokens.iter().position(|t| *t == "=");
        let Some(eq) = eq else {
            let _ = writeln!(dbg.output, "Expected '='.");
            return;
        };
        let Some(&literal) = tokens.get(eq + 1) else {
            let _ = writeln!(dbg.output, "Couldn't parse expression.");
            return;
        };
        let Some(value) = parse_literal(self, literal) else {
            let _ = writeln!(dbg.output, "Couldn't parse expression.");
            return;
        };

        let slot = match tokens.get(1).copied() {
            Some("reg") | Some("registers") => {
                match tokens.get(2).and_then(|t| t.parse::<usize>().ok()) {
                    Some(r) if r < self.frames.top().map(|f| f.nregs()).unwrap_or(0) => {
                        Some(rbase + r)
                    }
                    _ => {
                        let _ = writeln!(dbg.output, "Invalid register.");
                        return;
                    }
                }
            }
            Some(sym) => self.find_symbol_slot(program, sym),
            None => None,
        };

        match slot {
            Some(slot) => self.stack[slot] = value,
            None => {
                let _ = writeln!(dbg.output, "Invalid target.");
            }
        }
    }

    /// Prints the live call stack.
    fn debug_trace(&mut self, dbg: &mut Debugger, program: &Program, pc: usize) {
        let nframes = self.frames.len();
        for (i, frame) in self.frames.iter().enumerate().rev() {
            let at = if i + 1 == nframes { pc } else { frame.pc };
            let _ = write!(
                dbg.output,
                "  {}",
                if i + 1 == nframes { "  in " } else { "from " }
            );
            let name: Option<EcoString> = frame
                .function
                .as_function()
                .and_then(|f| f.name.as_string().map(|s| s.text.clone()));
            match name {
                Some(name) => {
                    let _ = write!(dbg.output, "{}", name);
                }
                None => {
                    let _ = write!(dbg.output, "global");
                }
            }
            if let Some(info) = program
                .annotations
                .info_from_index(program.global, at.saturating_sub(1))
            {
                let _ = write!(dbg.output, " at line {}", info.line);
            }
            let _ = writeln!(dbg.output);
        }
    }
}
