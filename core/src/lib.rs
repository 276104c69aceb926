//! Morpho runtime core: a register virtual machine for a dynamically-typed,
//! class-based scripting language.
//!
//! The crate contains the tagged value representation, the heap object model
//! and its mark-sweep collector, the bytecode interpreter with closures and
//! error unwinding, the veneer-class protocol that exposes native containers
//! to scripts, debug annotations with a disassembler and an interactive
//! debugger, and a subkernel pool for parallel execution.
//!
//! The front end (lexer, parser, code generator) is an external collaborator:
//! it produces a [`program::Program`] that a [`vm::Vm`] executes.

pub mod builtin;
pub mod debug;
pub mod error;
pub mod instruction;
pub mod object;
pub mod program;
pub mod value;
pub mod vm;

pub use builtin::Core;
pub use error::{ErrorBlock, ErrorCategory};
pub use instruction::{Instruction, Op};
pub use object::{Object, ObjectKind, ObjectRef, ObjectStatus, ObjectType};
pub use program::Program;
pub use value::Value;
pub use vm::{Vm, VmOptions};
