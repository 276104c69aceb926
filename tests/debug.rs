//! Debug annotations, the disassembler, and debugger sessions over
//! injected I/O.

mod common;

use std::io::Cursor;

use common::{Harness, SharedBuf, bind_string, emit};
use morpho::debug::{Debugger, disassemble};
use morpho::{Instruction, Op, Value, error};
use pretty_assertions::assert_eq;

#[test]
fn annotation_lookups() {
    let mut h = Harness::new();
    let program = h
        .run(|_core, p| {
            let module = bind_string(p, "main");
            let x = bind_string(p, "x");
            {
                let g = p.global_function_mut();
                g.nregs = 4;
                g.add_constant(Value::Int(1));
                g.add_constant(Value::Int(2));
            }
            emit(
                p,
                &[
                    Instruction::abx(Op::Lct, 1, 0),
                    Instruction::abx(Op::Lct, 2, 1),
                    Instruction::abc(Op::Add, 1, 1, 2),
                    Instruction::abc(Op::End, 0, 0, 0),
                ],
            );
            let global = p.global;
            p.annotations.set_module(module);
            p.annotations.set_function(global);
            p.annotations.add_element(1, 0);
            p.annotations.set_register(1, &x);
            p.annotations.add_element(2, 0);
            p.annotations.add_element(2, 0); // coalesces
            p.annotations.add_element(3, 0);
        })
        .unwrap();

    // Elements: line 1 covers instruction 0; line 2 covers 1-2; line 3
    // covers 3.
    let info = program
        .annotations
        .info_from_index(program.global, 2)
        .unwrap();
    assert_eq!(info.line, 2);
    assert!(info.module.as_string().unwrap().text == "main");

    assert_eq!(program.annotations.index_from_line(2), Some(1));
    assert_eq!(program.annotations.index_from_line(9), None);

    let symbols =
        program
            .annotations
            .symbols_for_function(program.global, program.global, None);
    assert_eq!(symbols[1].as_deref(), Some("x"));
    assert_eq!(symbols[0], None);
}

#[test]
fn function_entry_lookup() {
    use common::bind_function;

    let mut h = Harness::new();
    let program = h
        .run(|_core, p| {
            let f_name = bind_string(p, "f");
            let (f_ref, _f_val) = bind_function(p, f_name, 1, 0, 2);
            p.global_function_mut().nregs = 2;
            emit(
                p,
                &[
                    Instruction::abc(Op::End, 0, 0, 0),
                    Instruction::abc(Op::Return, 0, 0, 0),
                ],
            );
            let global = p.global;
            p.annotations.set_function(global);
            p.annotations.add_element(1, 0);
            p.annotations.set_function(f_ref);
            p.annotations.add_element(2, 0);
        })
        .unwrap();

    let probe = morpho::object::Object::alloc_unmanaged(
        morpho::object::ObjectKind::string("f"),
    );
    let fname = Value::Object(probe);
    assert_eq!(
        program.annotations.index_from_function(None, &fname),
        Some(1)
    );
    unsafe { probe.free() };
}

#[test]
fn disassembly_format() {
    let mut h = Harness::new();
    let program = h
        .run(|_core, p| {
            let g = p.global_function_mut();
            g.nregs = 4;
            let k = g.add_constant(Value::Int(7));
            emit(
                p,
                &[
                    Instruction::abx(Op::Lct, 1, k as u16),
                    Instruction::abc(Op::Add, 2, 1, 1),
                    Instruction::abc(Op::End, 0, 0, 0),
                ],
            );
        })
        .unwrap();

    let mut out = Vec::new();
    disassemble::disassemble(&mut out, &program, None);
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("lct"));
    assert!(text.contains("(7)"));
    assert!(text.contains("add"));
    assert!(text.contains("end"));
}

fn debug_program(p: &mut morpho::Program) {
    let g = p.global_function_mut();
    g.nregs = 4;
    let k = g.add_constant(Value::Int(7));
    emit(
        p,
        &[
            Instruction::abx(Op::Lct, 1, k as u16),
            Instruction::abc(Op::Break, 0, 0, 0),
            Instruction::abc(Op::Print, 1, 0, 0),
            Instruction::abc(Op::End, 0, 0, 0),
        ],
    );
    p.annotations.add_element(1, 0);
    p.annotations.add_element(2, 0);
    p.annotations.add_element(3, 0);
    p.annotations.add_element(4, 0);
}

fn run_debug_session(input: &str) -> (Result<(), morpho::ErrorBlock>, String, String) {
    let mut h = Harness::new();
    let mut program = morpho::Program::new();
    debug_program(&mut program);
    let program = std::sync::Arc::new(program);

    let dbg_out = SharedBuf::default();
    let debugger = Debugger::new(
        &program,
        Box::new(Cursor::new(input.to_string())),
        Box::new(dbg_out.clone()),
    );
    let result = h.vm.run_with_debugger(&program, debugger);
    (result, h.out.contents(), dbg_out.contents())
}

#[test]
fn break_and_continue() {
    let (result, out, session) = run_debug_session("c\n");
    assert!(result.is_ok());
    assert_eq!(out, "7\n");
    assert!(session.contains("paused"));
}

#[test]
fn quit_raises_dbgquit() {
    let (result, _out, _session) = run_debug_session("q\n");
    assert!(result.unwrap_err().matches(error::DEBUGGER_QUIT));
}

#[test]
fn set_register_changes_execution() {
    let (result, out, _session) = run_debug_session("set reg 1 = 9\nc\n");
    assert!(result.is_ok());
    assert_eq!(out, "9\n");
}

#[test]
fn info_registers_lists_contents() {
    let (result, _out, session) = run_debug_session("info registers\nc\n");
    assert!(result.is_ok());
    assert!(session.contains("r1 = 7"));
}

/// Single-step stops once per source line.
#[test]
fn single_step_stops_per_line() {
    let (result, out, session) = run_debug_session("s\ns\nc\n");
    assert!(result.is_ok());
    assert_eq!(out, "7\n");
    // Paused at the breakpoint, then at each stepped line.
    assert!(session.matches("paused").count() >= 2);
}

#[test]
fn stacktrace_command() {
    let (result, _out, session) = run_debug_session("t\nc\n");
    assert!(result.is_ok());
    assert!(session.contains("in global") || session.contains("global"));
}
