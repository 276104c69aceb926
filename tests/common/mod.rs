//! Shared harness for the end-to-end tests: a tiny assembler facade over
//! `Program` and a capturable print sink.

#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use morpho::object::{ObjFunction, ObjectKind, ObjectRef};
use morpho::{Core, Instruction, Program, Value, Vm, VmOptions};

/// A print sink the test can read back after the run.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub core: Arc<Core>,
    pub vm: Vm,
    pub out: SharedBuf,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        let core = Arc::new(Core::new());
        let mut vm = Vm::with_options(core.clone(), options);
        let out = SharedBuf::default();
        vm.set_print_target(Box::new(out.clone()));
        Harness { core, vm, out }
    }

    /// Builds a program with the closure and runs it, returning the run
    /// result.
    pub fn run(
        &mut self,
        build: impl FnOnce(&Core, &mut Program),
    ) -> Result<Arc<Program>, morpho::ErrorBlock> {
        let mut program = Program::new();
        build(&self.core, &mut program);
        let program = Arc::new(program);
        self.vm.run(&program)?;
        Ok(program)
    }
}

/// Creates a function object bound to the program, returning its reference
/// and its value.
pub fn bind_function(
    program: &mut Program,
    name: Value,
    entry: usize,
    nargs: usize,
    nregs: usize,
) -> (ObjectRef, Value) {
    let v = program.bind_constant_object(ObjectKind::Function(ObjFunction::new(
        name, entry, nargs, nregs,
    )));
    (v.as_object().unwrap(), v)
}

/// Creates a program-bound string value.
pub fn bind_string(program: &mut Program, text: &str) -> Value {
    program.bind_constant_object(ObjectKind::string(text))
}

/// Appends instructions to the program.
pub fn emit(program: &mut Program, instructions: &[Instruction]) {
    for &i in instructions {
        program.add_instruction(i);
    }
}
