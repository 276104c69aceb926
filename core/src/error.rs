//! Runtime error identifiers and the error block.
//!
//! Errors carry a stable string identifier that scripts match on in `catch`
//! dictionaries, a category deciding whether execution continues, and the
//! source coordinates resolved from the debug annotations. The identifier
//! table is fixed at compile time; identifiers must stay stable across
//! releases because compiled handler dictionaries key on them.

use core::fmt;

use ecow::EcoString;

/// Identifies the category of error that has occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// No error.
    None,
    /// Informational message; execution continues.
    Info,
    /// Warning; execution continues.
    Warning,
    /// Runtime failure; return to the host as fast as possible.
    Halt,
    /// Deliberate termination; the outer `run` reports success.
    Exit,
    /// Error generated by the lexer.
    Lex,
    /// Error generated by the parser.
    Parse,
    /// Error generated by the compiler.
    Compile,
}

impl ErrorCategory {
    /// Whether execution may continue after an error of this category.
    pub fn should_continue(self) -> bool {
        self < ErrorCategory::Halt
    }
}

/// Line/position value when the source location cannot be determined.
pub const POSN_UNIDENTIFIABLE: i32 = -1;

// General error identifiers.
pub const ALLOCATION_FAILED: &str = "Alloc";
pub const INTERNAL_ERROR: &str = "Intrnl";

// VM error identifiers.
pub const INVLD_OP: &str = "InvldOp";
pub const CNCT_FLD: &str = "CnctFld";
pub const UNCALLABLE: &str = "Uncallable";
pub const GLBL_RTRN: &str = "GlblRtrn";
pub const INSTANTIATE_FAILED: &str = "InstFail";
pub const NOT_AN_OBJECT: &str = "NotAnObj";
pub const OBJECT_LACKS_PROPERTY: &str = "ObjLcksPrp";
pub const NO_INITIALIZER: &str = "NoInit";
pub const NOT_AN_INSTANCE: &str = "NotAnInst";
pub const CLASS_LACKS_PROPERTY: &str = "ClssLcksMthd";
pub const INVALID_ARGS: &str = "InvldArgs";
pub const NOT_INDEXABLE: &str = "NotIndxbl";
pub const OUT_OF_BOUNDS: &str = "IndxBnds";
pub const NON_NUMERIC_INDEX: &str = "NonNmIndx";
pub const ARRAY_WRONG_DIM: &str = "ArrayDim";
pub const STACK_OVERFLOW: &str = "StckOvflw";
pub const ERR_STACK_OVERFLOW: &str = "ErrStckOvflw";
pub const DIVIDE_BY_ZERO: &str = "DvZr";
pub const INTEGER_OVERFLOW: &str = "IntgrOvflw";
pub const DEBUGGER_QUIT: &str = "DbgQuit";

// Identifiers raised by the container protocol and built-in functions.
pub const ENUMERATE_ARGS: &str = "EnumArgs";
pub const SETINDEX_ARGS: &str = "SetIndxArgs";
pub const RANGE_ARGS: &str = "RngArgs";
pub const RESPONDSTO_ARG: &str = "RspndTo";
pub const ISMEMBER_ARG: &str = "IsMmbr";
pub const DICT_KEY_NOT_FOUND: &str = "DctKyNtFnd";
pub const DICT_SET_ARG: &str = "DctStArg";
pub const LIST_ENTRY_NOT_FOUND: &str = "LstEntrNtFnd";
pub const LIST_ARGS: &str = "LstArgs";
pub const METHOD_NAME_MISSING: &str = "MthdNmMssng";
pub const MATH_ARGS: &str = "MathArgs";
pub const MATH_NUM_ARGS: &str = "MathNumArgs";
pub const TYPE_ARGS: &str = "TypeArgs";

/// Category and default message for every identifier the runtime raises.
const DEFINITIONS: &[(&str, ErrorCategory, &str)] = &[
    (ALLOCATION_FAILED, ErrorCategory::Halt, "Memory allocation failed."),
    (INTERNAL_ERROR, ErrorCategory::Halt, "Internal error (contact developer)."),
    (INVLD_OP, ErrorCategory::Halt, "Invalid operands."),
    (CNCT_FLD, ErrorCategory::Halt, "Concatenation failed."),
    (UNCALLABLE, ErrorCategory::Halt, "Can only call a function or method."),
    (GLBL_RTRN, ErrorCategory::Halt, "Return encountered outside a function or method."),
    (INSTANTIATE_FAILED, ErrorCategory::Halt, "Could not instantiate object."),
    (NOT_AN_OBJECT, ErrorCategory::Halt, "Not an object."),
    (OBJECT_LACKS_PROPERTY, ErrorCategory::Halt, "Object lacks property or method."),
    (NO_INITIALIZER, ErrorCategory::Halt, "Class does not provide an initializer."),
    (NOT_AN_INSTANCE, ErrorCategory::Halt, "Can only invoke methods on objects."),
    (CLASS_LACKS_PROPERTY, ErrorCategory::Halt, "Class lacks method."),
    (INVALID_ARGS, ErrorCategory::Halt, "Incorrect number of arguments."),
    (NOT_INDEXABLE, ErrorCategory::Halt, "Value or object not indexable."),
    (OUT_OF_BOUNDS, ErrorCategory::Halt, "Index out of bounds."),
    (NON_NUMERIC_INDEX, ErrorCategory::Halt, "Non-numerical array index."),
    (ARRAY_WRONG_DIM, ErrorCategory::Halt, "Incorrect number of dimensions for array."),
    (STACK_OVERFLOW, ErrorCategory::Halt, "Stack overflow."),
    (ERR_STACK_OVERFLOW, ErrorCategory::Halt, "Too many nested error handlers."),
    (DIVIDE_BY_ZERO, ErrorCategory::Halt, "Division by zero."),
    (INTEGER_OVERFLOW, ErrorCategory::Halt, "Integer overflow."),
    (DEBUGGER_QUIT, ErrorCategory::Halt, "Program terminated by user in debugger."),
    (ENUMERATE_ARGS, ErrorCategory::Halt, "Expected a single integer argument to enumerate."),
    (SETINDEX_ARGS, ErrorCategory::Halt, "Incorrect arguments to set index."),
    (RANGE_ARGS, ErrorCategory::Halt, "Range takes two or three numerical arguments."),
    (RESPONDSTO_ARG, ErrorCategory::Halt, "Expected a method label."),
    (ISMEMBER_ARG, ErrorCategory::Halt, "Expected a single argument."),
    (DICT_KEY_NOT_FOUND, ErrorCategory::Halt, "Key not found in dictionary."),
    (DICT_SET_ARG, ErrorCategory::Halt, "Expected a dictionary argument."),
    (LIST_ENTRY_NOT_FOUND, ErrorCategory::Halt, "Entry not found in list."),
    (LIST_ARGS, ErrorCategory::Halt, "Incorrect arguments to list method."),
    (METHOD_NAME_MISSING, ErrorCategory::Halt, "Method not found."),
    (MATH_ARGS, ErrorCategory::Halt, "Expected a numerical argument."),
    (MATH_NUM_ARGS, ErrorCategory::Halt, "Incorrect number of arguments."),
    (TYPE_ARGS, ErrorCategory::Halt, "Expected a single argument."),
];

/// Looks up the category and default message for an identifier. Unknown
/// identifiers (user-defined errors) fall back to `Halt`.
pub fn definition(id: &str) -> (ErrorCategory, &'static str) {
    for (did, cat, msg) in DEFINITIONS {
        if *did == id {
            return (*cat, msg);
        }
    }
    (ErrorCategory::Halt, "")
}

/// A raised error: category, stable identifier, source coordinates and a
/// formatted message.
#[derive(Clone, Debug)]
pub struct ErrorBlock {
    pub category: ErrorCategory,
    pub id: EcoString,
    pub line: i32,
    pub posn: i32,
    pub msg: String,
}

impl ErrorBlock {
    pub fn none() -> Self {
        ErrorBlock {
            category: ErrorCategory::None,
            id: EcoString::new(),
            line: POSN_UNIDENTIFIABLE,
            posn: POSN_UNIDENTIFIABLE,
            msg: String::new(),
        }
    }

    /// Builds an error with the identifier's registered category and its
    /// default message.
    pub fn with_id(id: &str) -> Self {
        let (category, msg) = definition(id);
        ErrorBlock {
            category,
            id: EcoString::from(id),
            line: POSN_UNIDENTIFIABLE,
            posn: POSN_UNIDENTIFIABLE,
            msg: msg.into(),
        }
    }

    /// Same, but with a caller-formatted message.
    pub fn with_message(id: &str, msg: impl Into<String>) -> Self {
        let (category, _) = definition(id);
        ErrorBlock {
            category,
            id: EcoString::from(id),
            line: POSN_UNIDENTIFIABLE,
            posn: POSN_UNIDENTIFIABLE,
            msg: msg.into(),
        }
    }

    /// An error raised by user code, carrying its own category.
    pub fn user(category: ErrorCategory, id: &str, msg: impl Into<String>) -> Self {
        ErrorBlock {
            category,
            id: EcoString::from(id),
            line: POSN_UNIDENTIFIABLE,
            posn: POSN_UNIDENTIFIABLE,
            msg: msg.into(),
        }
    }

    pub fn at(mut self, line: i32, posn: i32) -> Self {
        self.line = line;
        self.posn = posn;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.category == ErrorCategory::None
    }

    pub fn matches(&self, id: &str) -> bool {
        self.id == id
    }

    pub fn clear(&mut self) {
        *self = ErrorBlock::none();
    }
}

impl fmt::Display for ErrorBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.succeeded() {
            return write!(f, "no error");
        }
        write!(f, "{}: {}", self.id, self.msg)?;
        if self.line != POSN_UNIDENTIFIABLE {
            write!(f, " (line {})", self.line)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorBlock {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_lookup() {
        assert_eq!(definition(INVLD_OP).0, ErrorCategory::Halt);
        assert_eq!(definition("NoSuchId").0, ErrorCategory::Halt);
    }

    #[test]
    fn block_matching() {
        let err = ErrorBlock::with_id(OUT_OF_BOUNDS);
        assert!(err.matches(OUT_OF_BOUNDS));
        assert!(!err.matches(INVLD_OP));
        assert!(!err.succeeded());
        assert!(ErrorBlock::none().succeeded());
    }

    #[test]
    fn categories_order() {
        assert!(ErrorCategory::Warning.should_continue());
        assert!(!ErrorCategory::Halt.should_continue());
        assert!(!ErrorCategory::Exit.should_continue());
    }
}
