//! Debug annotations.
//!
//! The program carries a linear stream of annotations mapping instruction
//! index ranges to source coordinates and compilation context. Consecutive
//! instructions sharing a source span coalesce into one `Element`; function,
//! class and module records switch the context for everything that follows;
//! `Register` records bind symbols to registers for debugger inspection.

use ecow::EcoString;

use crate::object::ObjectRef;
use crate::value::Value;

#[derive(Clone)]
pub enum Annotation {
    /// A run of `ninstr` consecutive instructions sharing a source span.
    Element { line: i32, posn: i32, ninstr: u32 },
    /// Subsequent elements belong to this function.
    Function(ObjectRef),
    /// Subsequent elements belong to this class.
    Class(Option<ObjectRef>),
    /// Subsequent elements belong to this module.
    Module(Value),
    /// An error handler becomes active; the value is its dictionary.
    PushErr(Value),
    /// The innermost error handler is no longer active.
    PopErr,
    /// Binds `symbol` to register `reg` within the current function.
    Register { reg: usize, symbol: EcoString },
}

/// Context accumulated while sweeping the annotation stream up to an
/// instruction index.
#[derive(Clone)]
pub struct DebugInfo {
    pub module: Value,
    pub line: i32,
    pub posn: i32,
    pub function: ObjectRef,
    pub class: Option<ObjectRef>,
}

#[derive(Default)]
pub struct AnnotationList {
    items: Vec<Annotation>,
}

impl AnnotationList {
    pub fn new() -> Self {
        AnnotationList { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.items.iter()
    }

    /// Associates the next instruction with a source span, coalescing with
    /// the previous element when the coordinates match.
    pub fn add_element(&mut self, line: i32, posn: i32) {
        if let Some(Annotation::Element {
            line: last_line,
            posn: last_posn,
            ninstr,
        }) = self.items.last_mut()
            && *last_line == line
            && *last_posn == posn
        {
            *ninstr += 1;
            return;
        }
        self.items.push(Annotation::Element {
            line,
            posn,
            ninstr: 1,
        });
    }

    /// Removes the last instruction from the current element.
    pub fn strip_end(&mut self) {
        if let Some(Annotation::Element { ninstr, .. }) = self.items.last_mut() {
            *ninstr = ninstr.saturating_sub(1);
        }
    }

    pub fn set_function(&mut self, func: ObjectRef) {
        self.items.push(Annotation::Function(func));
    }

    pub fn set_class(&mut self, class: Option<ObjectRef>) {
        self.items.push(Annotation::Class(class));
    }

    pub fn set_module(&mut self, module: Value) {
        self.items.push(Annotation::Module(module));
    }

    pub fn push_err(&mut self, dict: Value) {
        self.items.push(Annotation::PushErr(dict));
    }

    pub fn pop_err(&mut self) {
        self.items.push(Annotation::PopErr);
    }

    /// Binds a symbol to a register. The symbol string is stored deep-copied
    /// so clearing the list never touches program-owned objects.
    pub fn set_register(&mut self, reg: usize, symbol: &Value) {
        if let Some(s) = symbol.as_string() {
            self.items.push(Annotation::Register {
                reg,
                symbol: s.text.clone(),
            });
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Finds the source info associated with the instruction at `indx`,
    /// given the program's top-level function as the starting context.
    pub fn info_from_index(&self, global: ObjectRef, indx: usize) -> Option<DebugInfo> {
        let mut info = DebugInfo {
            module: Value::Nil,
            line: 0,
            posn: 0,
            function: global,
            class: None,
        };
        let mut i = 0usize;
        for ann in &self.items {
            match ann {
                Annotation::Element {
                    line,
                    posn,
                    ninstr,
                } => {
                    if i + *ninstr as usize > indx {
                        info.line = *line;
                        info.posn = *posn;
                        return Some(info);
                    }
                    i += *ninstr as usize;
                }
                Annotation::Function(func) => info.function = *func,
                Annotation::Class(class) => info.class = *class,
                Annotation::Module(module) => info.module = *module,
                _ => {}
            }
        }
        None
    }

    /// The first instruction index generated for `line`.
    pub fn index_from_line(&self, line: i32) -> Option<usize> {
        let mut i = 0usize;
        for ann in &self.items {
            if let Annotation::Element {
                line: l, ninstr, ..
            } = ann
            {
                if *l == line {
                    return Some(i);
                }
                i += *ninstr as usize;
            }
        }
        None
    }

    /// Entry point of the function named `fname`, optionally restricted to
    /// the class named `classname`.
    pub fn index_from_function(&self, classname: Option<&Value>, fname: &Value) -> Option<usize> {
        let mut current_class: Option<ObjectRef> = None;
        for ann in &self.items {
            match ann {
                Annotation::Function(func) => {
                    let f = func.as_function()?;
                    let class_matches = match classname {
                        None => true,
                        Some(cn) => current_class
                            .and_then(|c| c.as_class().map(|k| k.name.eq_value(cn)))
                            .unwrap_or(false),
                    };
                    if f.name.eq_value(fname) && class_matches {
                        return Some(f.entry);
                    }
                }
                Annotation::Class(class) => current_class = *class,
                _ => {}
            }
        }
        None
    }

    /// Register symbols visible inside `func`, optionally only those bound
    /// before instruction `stop_at`. The result has one entry per register.
    pub fn symbols_for_function(
        &self,
        global: ObjectRef,
        func: ObjectRef,
        stop_at: Option<usize>,
    ) -> Vec<Option<EcoString>> {
        let nregs = func.as_function().map(|f| f.nregs).unwrap_or(0);
        let mut symbols = vec![None; nregs];
        let mut current = global;
        let mut i = 0usize;
        for ann in &self.items {
            match ann {
                Annotation::Element { ninstr, .. } => {
                    if let Some(stop) = stop_at
                        && i + *ninstr as usize > stop
                    {
                        return symbols;
                    }
                    i += *ninstr as usize;
                }
                Annotation::Function(f) => current = *f,
                Annotation::Register { reg, symbol } => {
                    if current == func && *reg < nregs {
                        symbols[*reg] = Some(symbol.clone());
                    }
                }
                _ => {}
            }
        }
        symbols
    }
}
