//! Debug support: annotations, the disassembler and the debugger.

pub mod annotations;
pub mod debugger;
pub mod disassemble;

pub use annotations::{Annotation, AnnotationList, DebugInfo};
pub use debugger::Debugger;
