//! Bytecode disassembler.
//!
//! Prints one instruction per line with its operands, the referenced
//! constants when a constant table is supplied, and register contents when
//! a register window is supplied. Error-handler targets found in the
//! annotation stream print as labels so `PUSHERR` branches are readable.

use std::io::Write;

use crate::instruction::{Instruction, Op};
use crate::program::Program;
use crate::value::Value;

/// How each operand of an opcode should be rendered.
enum Operand {
    None,
    Reg,
    Const,
    Upvalue,
    Global,
    Count,
    Proto,
}

/// Formatting rule for one opcode: which fields carry what.
struct Rule {
    a: Operand,
    b: Operand,
    c: Operand,
    wide: bool,
    signed: bool,
}

fn rule(op: Op) -> Rule {
    use Operand::*;
    let abc = |a, b, c| Rule {
        a,
        b,
        c,
        wide: false,
        signed: false,
    };
    match op {
        Op::Nop | Op::Break | Op::End => abc(None, None, None),
        Op::Mov | Op::Not => abc(Reg, Reg, None),
        Op::Lct => Rule {
            a: Reg,
            b: Const,
            c: None,
            wide: true,
            signed: false,
        },
        Op::Lgl | Op::Sgl => Rule {
            a: Reg,
            b: Global,
            c: None,
            wide: true,
            signed: false,
        },
        Op::Lup => abc(Reg, Upvalue, None),
        Op::Sup => abc(Upvalue, Reg, None),
        Op::Closeup | Op::Print => abc(Reg, None, None),
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow | Op::Eq | Op::Neq | Op::Lt | Op::Le
        | Op::Cat | Op::Lix | Op::Six | Op::Lpr | Op::Spr => abc(Reg, Reg, Reg),
        Op::B => Rule {
            a: None,
            b: None,
            c: None,
            wide: true,
            signed: true,
        },
        Op::Bif | Op::Biff => Rule {
            a: Reg,
            b: None,
            c: None,
            wide: true,
            signed: true,
        },
        Op::Call => abc(Reg, Count, None),
        Op::Invoke => abc(Reg, Reg, Count),
        Op::Return => abc(Count, Reg, None),
        Op::Closure => abc(Reg, Proto, None),
        Op::Pusherr => Rule {
            a: None,
            b: Const,
            c: None,
            wide: true,
            signed: false,
        },
        Op::Poperr => Rule {
            a: None,
            b: None,
            c: None,
            wide: true,
            signed: true,
        },
    }
}

fn write_operand(
    out: &mut dyn Write,
    kind: &Operand,
    value: usize,
    konst: Option<&[Value]>,
    reg: Option<&[Value]>,
) {
    match kind {
        Operand::None => {}
        Operand::Reg => {
            let _ = write!(out, " r{}", value);
            if let Some(regs) = reg
                && let Some(v) = regs.get(value)
            {
                let _ = write!(out, " ({})", v);
            }
        }
        Operand::Const => {
            let _ = write!(out, " c{}", value);
            if let Some(k) = konst
                && let Some(v) = k.get(value)
            {
                let _ = write!(out, " ({})", v);
            }
        }
        Operand::Upvalue => {
            let _ = write!(out, " u{}", value);
        }
        Operand::Global => {
            let _ = write!(out, " g{}", value);
        }
        Operand::Count | Operand::Proto => {
            let _ = write!(out, " {}", value);
        }
    }
}

/// Disassembles a single instruction.
pub fn disassemble_instruction(
    out: &mut dyn Write,
    instr: Instruction,
    indx: usize,
    konst: Option<&[Value]>,
    reg: Option<&[Value]>,
) {
    let op = instr.op();
    let _ = write!(out, "{:4} : {:<10}", indx, op.label());
    let r = rule(op);
    if r.wide {
        write_operand(out, &r.a, instr.a(), konst, reg);
        if r.signed {
            let _ = write!(out, " {:+}", instr.sbx());
        } else {
            write_operand(out, &r.b, instr.bx(), konst, reg);
        }
    } else {
        write_operand(out, &r.a, instr.a(), konst, reg);
        write_operand(out, &r.b, instr.b(), konst, reg);
        write_operand(out, &r.c, instr.c(), konst, reg);
    }
}

/// Prints any error-handler labels targeting instruction `indx`.
fn write_error_labels(out: &mut dyn Write, program: &Program, indx: usize) {
    for ann in program.annotations.iter() {
        if let crate::debug::annotations::Annotation::PushErr(dict) = ann
            && let Some(d) = dict.as_object().and_then(|o| o.as_dictionary())
        {
            for (k, v) in d.iter() {
                if let Value::Int(target) = v
                    && target as usize == indx
                {
                    let _ = writeln!(out, "{}:", k);
                }
            }
        }
    }
}

/// Disassembles a program. When `match_line` is given, only instructions
/// generated for that source line print.
pub fn disassemble(out: &mut dyn Write, program: &Program, match_line: Option<i32>) {
    let mut function = program.global;
    let mut remaining = 0u32;
    let mut line = 0i32;
    let mut ann_iter = program.annotations.iter();

    for (indx, &instr) in program.code.iter().enumerate() {
        // Advance the annotation sweep to this instruction.
        while remaining == 0 {
            match ann_iter.next() {
                Some(crate::debug::annotations::Annotation::Element {
                    line: l, ninstr, ..
                }) => {
                    line = *l;
                    remaining = *ninstr;
                }
                Some(crate::debug::annotations::Annotation::Function(f)) => function = *f,
                Some(_) => {}
                None => break,
            }
        }
        remaining = remaining.saturating_sub(1);

        if let Some(want) = match_line
            && line != want
        {
            continue;
        }

        write_error_labels(out, program, indx);
        let konst = function.as_function().map(|f| f.konst.as_slice());
        disassemble_instruction(out, instr, indx, konst, None);
        let _ = writeln!(out);
    }
}
