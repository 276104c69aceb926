//! Morpho - runtime core of the Morpho scripting language
//!
//! # Overview
//!
//! Morpho is a dynamically-typed, class-based scripting language. This
//! crate is its execution core: the register virtual machine, the tagged
//! value representation, the mark-sweep heap, closures and upvalues,
//! structured error unwinding, the veneer protocol exposing native
//! containers to scripts, debug annotations with a disassembler and
//! debugger, and a subkernel pool for parallel execution.
//!
//! The front end that compiles source text into a [`Program`] is a
//! separate component; hosts that already hold a compiled program embed
//! the runtime like this:
//!
//! ```
//! use std::sync::Arc;
//! use morpho::{Core, Instruction, Op, Program, Vm};
//!
//! // Build a trivial program by hand (normally the front end does this).
//! let core = Arc::new(Core::new());
//! let mut program = Program::new();
//! program.add_instruction(Instruction::abc(Op::End, 0, 0, 0));
//!
//! let program = Arc::new(program);
//! let mut vm = Vm::new(core);
//! assert!(vm.run(&program).is_ok());
//! ```
//!
//! Scripted callables can be re-entered from host code with [`Vm::call`]
//! and [`Vm::invoke`]; objects allocated by the host are handed to the
//! collector with [`Vm::bind_values`] and kept alive across re-entrant
//! calls with [`Vm::retain`]/[`Vm::release`].

pub use morpho_core::*;
