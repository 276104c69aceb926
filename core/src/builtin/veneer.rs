//! Veneer classes for the built-in containers.
//!
//! Every native container type is exposed to scripts twice: as a
//! constructor function (`List(...)`, `Dictionary(...)`, ...) and as a
//! method table bound to the native type, so method dispatch on a list or a
//! range lands here. The iteration protocol every container implements:
//! `count` is the length, `enumerate(-1)` is the length, `enumerate(i)` is
//! the i-th element, `clone` copies the top-level structure, `print` writes
//! the default representation, and `[]`/`[]=` index per type.

use std::io::Write as _;

use crate::builtin::{
    self, Core, NativeFn, call_args, self_value,
};
use crate::error::{self, ErrorBlock};
use crate::object::{
    Dictionary, ObjArray, ObjRange, ObjString, ObjectKind, ObjectRef, ObjectType,
};
use crate::value::Value;
use crate::vm::Vm;

pub fn initialize(core: &mut Core) {
    let object_class = core.add_class("Object", OBJECT_METHODS, None);
    core.set_base_class(object_class);

    core.add_function("String", string_constructor);
    let string_class = core.add_class("String", STRING_METHODS, None);
    core.set_veneer(ObjectType::String, string_class);

    core.add_function("Array", array_constructor);
    let array_class = core.add_class("Array", ARRAY_METHODS, None);
    core.set_veneer(ObjectType::Array, array_class);

    core.add_function("List", list_constructor);
    let list_class = core.add_class("List", LIST_METHODS, None);
    core.set_veneer(ObjectType::List, list_class);

    core.add_function("Dictionary", dictionary_constructor);
    let dictionary_class = core.add_class("Dictionary", DICTIONARY_METHODS, None);
    core.set_veneer(ObjectType::Dictionary, dictionary_class);

    core.add_function("Range", range_constructor);
    let range_class = core.add_class("Range", RANGE_METHODS, None);
    core.set_veneer(ObjectType::Range, range_class);
}

fn receiver_object(args: &[Value]) -> Result<ObjectRef, ErrorBlock> {
    self_value(args)
        .as_object()
        .ok_or_else(|| ErrorBlock::with_id(error::INTERNAL_ERROR))
}

fn int_arg(args: &[Value], i: usize) -> Option<i64> {
    call_args(args).get(i).and_then(|v| v.as_int()).map(|v| v as i64)
}

/// The single-integer argument of the enumerate protocol.
fn enumerate_arg(args: &[Value]) -> Result<i64, ErrorBlock> {
    if call_args(args).len() == 1
        && let Some(n) = int_arg(args, 0)
    {
        Ok(n)
    } else {
        Err(ErrorBlock::with_id(error::ENUMERATE_ARGS))
    }
}

/// Shared `clone` implementation: every container clones through its kind.
fn generic_clone(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let obj = receiver_object(args)?;
    match obj.clone_kind() {
        Some(kind) => Ok(vm.bind_new(kind)),
        None => Err(ErrorBlock::with_id(error::INTERNAL_ERROR)),
    }
}

/// Shared `print` implementation: the default textual representation.
fn generic_print(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let _ = write!(vm.out, "{}", self_value(args));
    Ok(Value::Nil)
}

// ----------------------------------------------------------------------
// Object
// ----------------------------------------------------------------------

const OBJECT_METHODS: &[(&str, NativeFn)] = &[
    ("class", object_class),
    ("super", object_super),
    ("respondsto", object_respondsto),
    ("invoke", object_invoke),
    (builtin::PRINT_METHOD, generic_print),
    (builtin::CLONE_METHOD, generic_clone),
];

/// The class of the receiver.
fn object_class(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let receiver = self_value(args);
    if let Some(obj) = receiver.as_object()
        && obj.as_class().is_some()
    {
        return Ok(receiver);
    }
    Ok(vm
        .lookup_class_of(receiver)
        .map(Value::Object)
        .unwrap_or(Value::Nil))
}

/// The superclass of the receiver's class, or nil.
fn object_super(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let receiver = self_value(args);
    let class = match receiver.as_object().filter(|o| o.as_class().is_some()) {
        Some(obj) => Some(obj),
        None => vm.lookup_class_of(receiver),
    };
    Ok(class
        .and_then(|c| c.as_class())
        .and_then(|c| c.superclass)
        .map(Value::Object)
        .unwrap_or(Value::Nil))
}

/// Whether the receiver's class provides a method with the given label.
fn object_respondsto(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.len() != 1 || !rest[0].is_string() {
        return Err(ErrorBlock::with_id(error::RESPONDSTO_ARG));
    }
    Ok(Value::Bool(
        vm.lookup_method(self_value(args), &rest[0]).is_some(),
    ))
}

/// Invokes a method by name: `obj.invoke(label, arg...)`.
fn object_invoke(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.is_empty() || !rest[0].is_string() {
        return Err(ErrorBlock::with_id(error::METHOD_NAME_MISSING));
    }
    vm.invoke(self_value(args), &rest[0], &rest[1..])
}

// ----------------------------------------------------------------------
// String
// ----------------------------------------------------------------------

const STRING_METHODS: &[(&str, NativeFn)] = &[
    (builtin::COUNT_METHOD, string_count),
    (builtin::PRINT_METHOD, generic_print),
    (builtin::CLONE_METHOD, generic_clone),
    (builtin::GETINDEX_METHOD, string_enumerate),
    (builtin::SETINDEX_METHOD, string_setindex),
    (builtin::ENUMERATE_METHOD, string_enumerate),
    ("split", string_split),
];

/// Creates a string by concatenating the printed form of every argument.
fn string_constructor(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    use core::fmt::Write as _;
    let mut text = String::new();
    for v in call_args(args) {
        let _ = write!(text, "{}", v);
    }
    Ok(vm.bind_new(ObjectKind::string(text)))
}

fn string_text(args: &[Value]) -> Result<&ObjString, ErrorBlock> {
    self_value(args)
        .as_string()
        .ok_or_else(|| ErrorBlock::with_id(error::INTERNAL_ERROR))
}

/// Character count.
fn string_count(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let s = string_text(args)?;
    Ok(Value::Int(s.text.chars().count() as i32))
}

/// `enumerate(-1)` is the character count; `enumerate(i)` is the i-th
/// character as a fresh one-character string. Doubles as `[]`.
fn string_enumerate(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let n = enumerate_arg(args)?;
    let text = string_text(args)?.text.clone();
    if n < 0 {
        return Ok(Value::Int(text.chars().count() as i32));
    }
    match text.chars().nth(n as usize) {
        Some(c) => Ok(vm.bind_new(ObjectKind::string(String::from(c)))),
        None => Err(ErrorBlock::with_id(error::OUT_OF_BOUNDS)),
    }
}

/// Replaces the character at an index in place. Interned strings are
/// canonical symbols and never mutate.
fn string_setindex(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.len() != 2 {
        return Err(ErrorBlock::with_id(error::SETINDEX_ARGS));
    }
    let Some(i) = rest[0].as_int().map(|v| v as usize) else {
        return Err(ErrorBlock::with_id(error::NON_NUMERIC_INDEX));
    };
    let obj = receiver_object(args)?;
    if string_text(args)?.interned {
        return Err(ErrorBlock::with_message(
            error::SETINDEX_ARGS,
            "Cannot set index on an interned string.",
        ));
    }
    let old_size = obj.size();
    {
        let ObjectKind::String(s) = obj.kind_mut() else {
            return Err(ErrorBlock::with_id(error::INTERNAL_ERROR));
        };
        let mut out = String::with_capacity(s.text.len());
        let mut replaced = false;
        for (k, c) in s.text.chars().enumerate() {
            if k == i {
                use core::fmt::Write as _;
                let _ = write!(out, "{}", rest[1]);
                replaced = true;
            } else {
                out.push(c);
            }
        }
        if !replaced {
            return Err(ErrorBlock::with_id(error::OUT_OF_BOUNDS));
        }
        s.text = out.into();
    }
    vm.notify_resize(self_value(args), old_size, obj.size());
    Ok(Value::Nil)
}

/// Splits on a separator string, yielding a list of fresh strings.
fn string_split(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let Some(sep) = rest.first().and_then(|v| v.as_string()) else {
        return Err(ErrorBlock::with_id(error::ISMEMBER_ARG));
    };
    let text = string_text(args)?.text.clone();
    // Each piece is rooted as soon as it is bound, so a collection during a
    // later allocation cannot reclaim it.
    let handle = vm.retain(&[]);
    let mut items = Vec::new();
    for piece in text.split(sep.text.as_str()) {
        let s = vm.bind_new(ObjectKind::string(piece));
        vm.retain(&[s]);
        items.push(s);
    }
    let out = vm.bind_new(ObjectKind::list(items));
    vm.release(handle);
    Ok(out)
}

// ----------------------------------------------------------------------
// Array
// ----------------------------------------------------------------------

const ARRAY_METHODS: &[(&str, NativeFn)] = &[
    (builtin::PRINT_METHOD, generic_print),
    (builtin::COUNT_METHOD, array_count),
    (builtin::GETINDEX_METHOD, array_getindex),
    (builtin::SETINDEX_METHOD, array_setindex),
    (builtin::ENUMERATE_METHOD, array_enumerate),
    (builtin::CLONE_METHOD, generic_clone),
    ("dimensions", array_dimensions),
];

/// Creates an array with the given dimension sizes, filled with nil.
fn array_constructor(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.is_empty() {
        return Err(ErrorBlock::with_id(error::ARRAY_WRONG_DIM));
    }
    let mut dims = Vec::with_capacity(rest.len());
    for v in rest {
        match v.as_int() {
            Some(d) if d >= 0 => dims.push(d as usize),
            _ => return Err(ErrorBlock::with_id(error::NON_NUMERIC_INDEX)),
        }
    }
    Ok(vm.bind_new(ObjectKind::Array(ObjArray::new(&dims))))
}

fn array_self(args: &[Value]) -> Result<ObjectRef, ErrorBlock> {
    receiver_object(args).and_then(|o| {
        if o.as_array().is_some() {
            Ok(o)
        } else {
            Err(ErrorBlock::with_id(error::INTERNAL_ERROR))
        }
    })
}

fn array_count(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let arr = array_self(args)?;
    Ok(Value::Int(arr.as_array().unwrap().nelements as i32))
}

fn array_getindex(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let arr = array_self(args)?;
    let indices = call_args(args);
    let a = arr.as_array().unwrap();
    if indices.iter().all(Value::is_number) {
        a.get(indices).map_err(ErrorBlock::with_id)
    } else {
        let sliced = a.slice(indices).map_err(ErrorBlock::with_id)?;
        Ok(vm.bind_new(ObjectKind::Array(sliced)))
    }
}

fn array_setindex(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let arr = array_self(args)?;
    let rest = call_args(args);
    if rest.len() < 2 {
        return Err(ErrorBlock::with_id(error::SETINDEX_ARGS));
    }
    let (indices, value) = rest.split_at(rest.len() - 1);
    arr.as_array_mut()
        .unwrap()
        .set(indices, value[0])
        .map_err(ErrorBlock::with_id)?;
    Ok(Value::Nil)
}

fn array_enumerate(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let n = enumerate_arg(args)?;
    let arr = array_self(args)?;
    let a = arr.as_array().unwrap();
    if n < 0 {
        Ok(Value::Int(a.nelements as i32))
    } else if (n as usize) < a.nelements {
        Ok(a.data[a.ndim + n as usize])
    } else {
        Err(ErrorBlock::with_id(error::OUT_OF_BOUNDS))
    }
}

/// The dimension sizes as a list.
fn array_dimensions(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let arr = array_self(args)?;
    let a = arr.as_array().unwrap();
    let items: Vec<Value> = (0..a.ndim).map(|i| a.data[i]).collect();
    Ok(vm.bind_new(ObjectKind::list(items)))
}

// ----------------------------------------------------------------------
// List
// ----------------------------------------------------------------------

const LIST_METHODS: &[(&str, NativeFn)] = &[
    ("append", list_append),
    ("remove", list_remove),
    ("pop", list_pop),
    (builtin::GETINDEX_METHOD, list_getindex),
    (builtin::SETINDEX_METHOD, list_setindex),
    (builtin::PRINT_METHOD, generic_print),
    (builtin::ENUMERATE_METHOD, list_enumerate),
    (builtin::COUNT_METHOD, list_count),
    (builtin::CLONE_METHOD, generic_clone),
    ("sort", list_sort),
    ("order", list_order),
    ("ismember", list_ismember),
];

/// Creates a list from the arguments.
fn list_constructor(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    Ok(vm.bind_new(ObjectKind::list(call_args(args).to_vec())))
}

fn list_self(args: &[Value]) -> Result<ObjectRef, ErrorBlock> {
    receiver_object(args).and_then(|o| {
        if o.as_list().is_some() {
            Ok(o)
        } else {
            Err(ErrorBlock::with_id(error::INTERNAL_ERROR))
        }
    })
}

/// Appends the arguments, returning the list.
fn list_append(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let obj = list_self(args)?;
    let old_size = obj.size();
    obj.as_list_mut()
        .unwrap()
        .items
        .extend_from_slice(call_args(args));
    vm.notify_resize(self_value(args), old_size, obj.size());
    Ok(self_value(args))
}

/// Removes the first entry equal to the argument.
fn list_remove(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.len() != 1 {
        return Err(ErrorBlock::with_id(error::LIST_ARGS));
    }
    let obj = list_self(args)?;
    let list = obj.as_list_mut().unwrap();
    match list.items.iter().position(|v| v.eq_value(&rest[0])) {
        Some(i) => {
            list.items.remove(i);
            Ok(Value::Nil)
        }
        None => Err(ErrorBlock::with_id(error::LIST_ENTRY_NOT_FOUND)),
    }
}

/// Removes and returns the last element, or the element at an index.
fn list_pop(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let obj = list_self(args)?;
    let list = obj.as_list_mut().unwrap();
    let popped = match int_arg(args, 0) {
        Some(i) if call_args(args).len() == 1 => {
            if i >= 0 && (i as usize) < list.items.len() {
                Some(list.items.remove(i as usize))
            } else {
                None
            }
        }
        None if call_args(args).is_empty() => list.items.pop(),
        _ => return Err(ErrorBlock::with_id(error::LIST_ARGS)),
    };
    popped.ok_or_else(|| ErrorBlock::with_id(error::OUT_OF_BOUNDS))
}

fn list_getindex(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let obj = list_self(args)?;
    if rest.len() != 1 {
        return Err(ErrorBlock::with_id(error::LIST_ARGS));
    }
    let Some(i) = rest[0].as_int() else {
        return Err(ErrorBlock::with_id(error::NON_NUMERIC_INDEX));
    };
    obj.as_list()
        .unwrap()
        .get_element(i as i64)
        .ok_or_else(|| ErrorBlock::with_id(error::OUT_OF_BOUNDS))
}

fn list_setindex(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let obj = list_self(args)?;
    if rest.len() != 2 {
        return Err(ErrorBlock::with_id(error::SETINDEX_ARGS));
    }
    let Some(i) = rest[0].as_int() else {
        return Err(ErrorBlock::with_id(error::NON_NUMERIC_INDEX));
    };
    if obj.as_list_mut().unwrap().set_element(i as i64, rest[1]) {
        Ok(Value::Nil)
    } else {
        Err(ErrorBlock::with_id(error::OUT_OF_BOUNDS))
    }
}

fn list_enumerate(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let n = enumerate_arg(args)?;
    let obj = list_self(args)?;
    let list = obj.as_list().unwrap();
    if n < 0 {
        Ok(Value::Int(list.items.len() as i32))
    } else if (n as usize) < list.items.len() {
        Ok(list.items[n as usize])
    } else {
        Err(ErrorBlock::with_id(error::OUT_OF_BOUNDS))
    }
}

fn list_count(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let obj = list_self(args)?;
    Ok(Value::Int(obj.as_list().unwrap().items.len() as i32))
}

/// Sorts in place. Values without a defined ordering keep their relative
/// position.
fn list_sort(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let obj = list_self(args)?;
    obj.as_list_mut()
        .unwrap()
        .items
        .sort_by(|a, b| a.compare(b).unwrap_or(core::cmp::Ordering::Equal));
    Ok(Value::Nil)
}

/// The index permutation that would sort the list.
fn list_order(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let obj = list_self(args)?;
    let items = obj.as_list().unwrap().items.clone();
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        items[a]
            .compare(&items[b])
            .unwrap_or(core::cmp::Ordering::Equal)
    });
    let out: Vec<Value> = order.into_iter().map(|i| Value::Int(i as i32)).collect();
    Ok(vm.bind_new(ObjectKind::list(out)))
}

fn list_ismember(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.len() != 1 {
        return Err(ErrorBlock::with_id(error::ISMEMBER_ARG));
    }
    let obj = list_self(args)?;
    Ok(Value::Bool(
        obj.as_list()
            .unwrap()
            .items
            .iter()
            .any(|v| v.eq_value(&rest[0])),
    ))
}

// ----------------------------------------------------------------------
// Dictionary
// ----------------------------------------------------------------------

const DICTIONARY_METHODS: &[(&str, NativeFn)] = &[
    (builtin::GETINDEX_METHOD, dictionary_getindex),
    (builtin::SETINDEX_METHOD, dictionary_setindex),
    (builtin::PRINT_METHOD, generic_print),
    (builtin::COUNT_METHOD, dictionary_count),
    (builtin::ENUMERATE_METHOD, dictionary_enumerate),
    ("keys", dictionary_keys),
    ("contains", dictionary_contains),
    ("remove", dictionary_remove),
    (builtin::CLONE_METHOD, generic_clone),
    ("union", dictionary_union),
    ("intersection", dictionary_intersection),
    ("difference", dictionary_difference),
    (builtin::ADD_METHOD, dictionary_union),
    (builtin::SUB_METHOD, dictionary_difference),
];

/// Creates a dictionary from alternating key/value arguments.
fn dictionary_constructor(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let mut dict = Dictionary::new();
    let mut i = 0;
    while i + 1 < rest.len() {
        dict.insert(rest[i], rest[i + 1]);
        i += 2;
    }
    Ok(vm.bind_new(ObjectKind::Dictionary(dict)))
}

fn dictionary_self(args: &[Value]) -> Result<ObjectRef, ErrorBlock> {
    receiver_object(args).and_then(|o| {
        if o.as_dictionary().is_some() {
            Ok(o)
        } else {
            Err(ErrorBlock::with_id(error::INTERNAL_ERROR))
        }
    })
}

fn dictionary_getindex(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let obj = dictionary_self(args)?;
    if rest.len() != 1 {
        return Err(ErrorBlock::with_id(error::DICT_KEY_NOT_FOUND));
    }
    obj.as_dictionary()
        .unwrap()
        .get(&rest[0])
        .ok_or_else(|| ErrorBlock::with_id(error::DICT_KEY_NOT_FOUND))
}

fn dictionary_setindex(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let obj = dictionary_self(args)?;
    if rest.len() != 2 {
        return Err(ErrorBlock::with_id(error::SETINDEX_ARGS));
    }
    let old_size = obj.size();
    obj.as_dictionary_mut().unwrap().insert(rest[0], rest[1]);
    vm.notify_resize(self_value(args), old_size, obj.size());
    Ok(Value::Nil)
}

fn dictionary_count(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let obj = dictionary_self(args)?;
    Ok(Value::Int(obj.as_dictionary().unwrap().len() as i32))
}

/// Enumerates keys in slot order.
fn dictionary_enumerate(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let n = enumerate_arg(args)?;
    let obj = dictionary_self(args)?;
    let dict = obj.as_dictionary().unwrap();
    if n < 0 {
        Ok(Value::Int(dict.len() as i32))
    } else {
        Ok(dict.key_at(n as usize).unwrap_or(Value::Nil))
    }
}

fn dictionary_keys(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let obj = dictionary_self(args)?;
    let keys: Vec<Value> = obj.as_dictionary().unwrap().iter().map(|(k, _)| k).collect();
    Ok(vm.bind_new(ObjectKind::list(keys)))
}

fn dictionary_contains(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.len() != 1 {
        return Err(ErrorBlock::with_id(error::ISMEMBER_ARG));
    }
    let obj = dictionary_self(args)?;
    Ok(Value::Bool(obj.as_dictionary().unwrap().contains_key(&rest[0])))
}

fn dictionary_remove(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.len() != 1 {
        return Err(ErrorBlock::with_id(error::ISMEMBER_ARG));
    }
    let obj = dictionary_self(args)?;
    obj.as_dictionary_mut().unwrap().remove(&rest[0]);
    Ok(Value::Nil)
}

/// Set operations; `union` and `difference` also answer `+` and `-`.
fn dictionary_setop(
    vm: &mut Vm,
    args: &[Value],
    op: fn(&Dictionary, &Dictionary) -> Dictionary,
) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let other = rest
        .first()
        .and_then(|v| v.as_object())
        .and_then(|o| o.as_dictionary())
        .ok_or_else(|| ErrorBlock::with_id(error::DICT_SET_ARG))?;
    let obj = dictionary_self(args)?;
    let out = op(obj.as_dictionary().unwrap(), other);
    Ok(vm.bind_new(ObjectKind::Dictionary(out)))
}

fn dictionary_union(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    dictionary_setop(vm, args, Dictionary::union)
}

fn dictionary_intersection(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    dictionary_setop(vm, args, Dictionary::intersection)
}

fn dictionary_difference(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    dictionary_setop(vm, args, Dictionary::difference)
}

// ----------------------------------------------------------------------
// Range
// ----------------------------------------------------------------------

const RANGE_METHODS: &[(&str, NativeFn)] = &[
    (builtin::GETINDEX_METHOD, range_getindex),
    (builtin::PRINT_METHOD, generic_print),
    (builtin::ENUMERATE_METHOD, range_enumerate),
    (builtin::COUNT_METHOD, range_count),
    (builtin::CLONE_METHOD, generic_clone),
];

/// Creates a range from two or three numeric arguments.
fn range_constructor(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    for v in rest {
        if !v.is_number() {
            return Err(ErrorBlock::with_id(error::RANGE_ARGS));
        }
    }
    let range = match rest.len() {
        2 => ObjRange::new(rest[0], rest[1], Value::Nil),
        3 => ObjRange::new(rest[0], rest[1], rest[2]),
        _ => None,
    }
    .ok_or_else(|| ErrorBlock::with_id(error::RANGE_ARGS))?;
    Ok(vm.bind_new(ObjectKind::Range(range)))
}

fn range_self(args: &[Value]) -> Result<ObjectRef, ErrorBlock> {
    receiver_object(args).and_then(|o| {
        if o.as_range().is_some() {
            Ok(o)
        } else {
            Err(ErrorBlock::with_id(error::INTERNAL_ERROR))
        }
    })
}

fn range_getindex(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let obj = range_self(args)?;
    let r = obj.as_range().unwrap();
    if rest.len() == 1
        && let Some(n) = rest[0].as_int()
    {
        if n >= 0 && (n as usize) < r.count {
            return Ok(r.iterate(n as usize));
        }
        return Err(ErrorBlock::with_id(error::OUT_OF_BOUNDS));
    }
    Err(ErrorBlock::with_id(error::NON_NUMERIC_INDEX))
}

fn range_enumerate(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let n = enumerate_arg(args)?;
    let obj = range_self(args)?;
    let r = obj.as_range().unwrap();
    if n < 0 {
        Ok(Value::Int(r.count as i32))
    } else if (n as usize) < r.count {
        Ok(r.iterate(n as usize))
    } else {
        Err(ErrorBlock::with_id(error::OUT_OF_BOUNDS))
    }
}

fn range_count(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let obj = range_self(args)?;
    Ok(Value::Int(obj.as_range().unwrap().count as i32))
}
