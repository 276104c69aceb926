//! The container veneer classes and their iteration protocol.

mod common;

use common::{Harness, emit};
use morpho::object::{Dictionary, ObjectKind};
use morpho::{Instruction, Op, Value, error};
use pretty_assertions::assert_eq;

fn label(h: &mut Harness, name: &str) -> Value {
    h.vm.bind_new(ObjectKind::string(name))
}

#[test]
fn dictionary_keys_and_count() {
    let mut h = Harness::new();
    let ctor = h.core.lookup_function("Dictionary").unwrap();
    let ka = h.vm.bind_new(ObjectKind::string("a"));
    let kb = h.vm.bind_new(ObjectKind::string("b"));
    let dict = h
        .vm
        .call(ctor, &[ka, Value::Int(1), kb, Value::Int(2)])
        .unwrap();

    let keys_label = label(&mut h, "keys");
    let count_label = label(&mut h, "count");
    let keys = h.vm.invoke(dict, &keys_label, &[]).unwrap();
    let count = h.vm.invoke(keys, &count_label, &[]).unwrap();
    assert!(count.eq_value(&Value::Int(2)));
}

#[test]
fn dictionary_get_set_contains_remove() {
    let mut h = Harness::new();
    let ctor = h.core.lookup_function("Dictionary").unwrap();
    let dict = h.vm.call(ctor, &[]).unwrap();

    let set = label(&mut h, "[]=");
    let get = label(&mut h, "[]");
    let contains = label(&mut h, "contains");
    let remove = label(&mut h, "remove");

    h.vm.invoke(dict, &set, &[Value::Int(1), Value::Int(10)])
        .unwrap();
    assert!(h
        .vm
        .invoke(dict, &get, &[Value::Int(1)])
        .unwrap()
        .eq_value(&Value::Int(10)));
    // Promotion: 1.0 addresses the same key.
    assert!(h
        .vm
        .invoke(dict, &get, &[Value::Float(1.0)])
        .unwrap()
        .eq_value(&Value::Int(10)));
    assert!(h
        .vm
        .invoke(dict, &contains, &[Value::Int(1)])
        .unwrap()
        .eq_value(&Value::Bool(true)));
    h.vm.invoke(dict, &remove, &[Value::Int(1)]).unwrap();
    let err = h.vm.invoke(dict, &get, &[Value::Int(1)]).unwrap_err();
    assert!(err.matches(error::DICT_KEY_NOT_FOUND));
}

/// `dict.clone()` has the same count and identical lookups.
#[test]
fn dictionary_clone_roundtrip() {
    let mut h = Harness::new();
    let ctor = h.core.lookup_function("Dictionary").unwrap();
    let dict = h
        .vm
        .call(
            ctor,
            &[
                Value::Int(1),
                Value::Int(10),
                Value::Int(2),
                Value::Int(20),
            ],
        )
        .unwrap();
    let clone_label = label(&mut h, "clone");
    let get = label(&mut h, "[]");
    let count = label(&mut h, "count");

    let copy = h.vm.invoke(dict, &clone_label, &[]).unwrap();
    assert!(h
        .vm
        .invoke(copy, &count, &[])
        .unwrap()
        .eq_value(&Value::Int(2)));
    for k in [Value::Int(1), Value::Int(2)] {
        let a = h.vm.invoke(dict, &get, &[k]).unwrap();
        let b = h.vm.invoke(copy, &get, &[k]).unwrap();
        assert!(a.eq_value(&b));
    }
}

/// `list.clone().append(x)` leaves the original untouched.
#[test]
fn list_clone_is_independent() {
    let mut h = Harness::new();
    let ctor = h.core.lookup_function("List").unwrap();
    let list = h.vm.call(ctor, &[Value::Int(1), Value::Int(2)]).unwrap();

    let clone_label = label(&mut h, "clone");
    let append = label(&mut h, "append");
    let count = label(&mut h, "count");

    let copy = h.vm.invoke(list, &clone_label, &[]).unwrap();
    h.vm.invoke(copy, &append, &[Value::Int(3)]).unwrap();

    assert!(h
        .vm
        .invoke(list, &count, &[])
        .unwrap()
        .eq_value(&Value::Int(2)));
    assert!(h
        .vm
        .invoke(copy, &count, &[])
        .unwrap()
        .eq_value(&Value::Int(3)));
}

#[test]
fn list_operations() {
    let mut h = Harness::new();
    let ctor = h.core.lookup_function("List").unwrap();
    let list = h
        .vm
        .call(ctor, &[Value::Int(3), Value::Int(1), Value::Int(2)])
        .unwrap();

    let get = label(&mut h, "[]");
    let sort = label(&mut h, "sort");
    let ismember = label(&mut h, "ismember");
    let pop = label(&mut h, "pop");

    // Signed indexing counts from the back.
    assert!(h
        .vm
        .invoke(list, &get, &[Value::Int(-1)])
        .unwrap()
        .eq_value(&Value::Int(2)));
    let err = h.vm.invoke(list, &get, &[Value::Int(5)]).unwrap_err();
    assert!(err.matches(error::OUT_OF_BOUNDS));

    h.vm.invoke(list, &sort, &[]).unwrap();
    assert!(h
        .vm
        .invoke(list, &get, &[Value::Int(0)])
        .unwrap()
        .eq_value(&Value::Int(1)));

    assert!(h
        .vm
        .invoke(list, &ismember, &[Value::Int(3)])
        .unwrap()
        .eq_value(&Value::Bool(true)));

    let popped = h.vm.invoke(list, &pop, &[]).unwrap();
    assert!(popped.eq_value(&Value::Int(3)));
}

/// `range(a, b, s).count == enumerate(-1)` and each `getindex` equals the
/// matching `enumerate`.
#[test]
fn range_protocol_is_consistent() {
    let mut h = Harness::new();
    let ctor = h.core.lookup_function("Range").unwrap();
    let range = h
        .vm
        .call(ctor, &[Value::Int(1), Value::Int(10), Value::Int(3)])
        .unwrap();

    let count = label(&mut h, "count");
    let enumerate = label(&mut h, "enumerate");
    let get = label(&mut h, "[]");

    let n = h.vm.invoke(range, &count, &[]).unwrap();
    let n_enum = h.vm.invoke(range, &enumerate, &[Value::Int(-1)]).unwrap();
    assert!(n.eq_value(&n_enum));

    let count = n.as_int().unwrap();
    for i in 0..count {
        let a = h.vm.invoke(range, &get, &[Value::Int(i)]).unwrap();
        let b = h.vm.invoke(range, &enumerate, &[Value::Int(i)]).unwrap();
        assert!(a.eq_value(&b));
    }
}

#[test]
fn string_protocol() {
    let mut h = Harness::new();
    let ctor = h.core.lookup_function("String").unwrap();
    let s = h.vm.call(ctor, &[Value::Int(12), Value::Int(34)]).unwrap();
    assert_eq!(s.as_string().unwrap().text, "1234");

    let count = label(&mut h, "count");
    let get = label(&mut h, "[]");
    let split = label(&mut h, "split");

    assert!(h
        .vm
        .invoke(s, &count, &[])
        .unwrap()
        .eq_value(&Value::Int(4)));
    let ch = h.vm.invoke(s, &get, &[Value::Int(1)]).unwrap();
    assert_eq!(ch.as_string().unwrap().text, "2");

    let sep = h.vm.bind_new(ObjectKind::string("2"));
    let parts = h.vm.invoke(s, &split, &[sep]).unwrap();
    assert!(h
        .vm
        .invoke(parts, &count, &[])
        .unwrap()
        .eq_value(&Value::Int(2)));
}

/// Set-index rewrites the buffer of an ordinary string but refuses to
/// touch an interned symbol.
#[test]
fn string_setindex_respects_interning() {
    let mut h = Harness::new();
    let set = label(&mut h, "[]=");
    let x = h.vm.bind_new(ObjectKind::string("x"));

    let s = h.vm.bind_new(ObjectKind::string("abc"));
    h.vm.invoke(s, &set, &[Value::Int(1), x]).unwrap();
    assert_eq!(s.as_string().unwrap().text, "axc");

    let core = h.core.clone();
    let interned = core.lookup_symbol("count").unwrap();
    let err = h.vm.invoke(interned, &set, &[Value::Int(0), x]).unwrap_err();
    assert!(err.matches(error::SETINDEX_ARGS));
}

#[test]
fn array_indexing_and_slices() {
    let mut h = Harness::new();
    let ctor = h.core.lookup_function("Array").unwrap();
    let arr = h.vm.call(ctor, &[Value::Int(2), Value::Int(3)]).unwrap();

    let set = label(&mut h, "[]=");
    let get = label(&mut h, "[]");
    let count = label(&mut h, "count");
    let dims = label(&mut h, "dimensions");

    for i in 0..2 {
        for j in 0..3 {
            h.vm.invoke(
                arr,
                &set,
                &[Value::Int(i), Value::Int(j), Value::Int(i * 10 + j)],
            )
            .unwrap();
        }
    }
    assert!(h
        .vm
        .invoke(arr, &get, &[Value::Int(1), Value::Int(2)])
        .unwrap()
        .eq_value(&Value::Int(12)));
    assert!(h
        .vm
        .invoke(arr, &count, &[])
        .unwrap()
        .eq_value(&Value::Int(6)));

    // Wrong dimension count and non-numeric indices are distinct errors.
    let err = h.vm.invoke(arr, &get, &[Value::Int(0)]).unwrap_err();
    assert!(err.matches(error::ARRAY_WRONG_DIM));
    let err = h
        .vm
        .invoke(arr, &get, &[Value::Int(5), Value::Int(0)])
        .unwrap_err();
    assert!(err.matches(error::OUT_OF_BOUNDS));

    // Slicing with a range produces a fresh array.
    let range_ctor = h.core.lookup_function("Range").unwrap();
    let rows = h.vm.call(range_ctor, &[Value::Int(0), Value::Int(1)]).unwrap();
    let sliced = h.vm.invoke(arr, &get, &[rows, Value::Int(1)]).unwrap();
    assert!(h
        .vm
        .invoke(sliced, &count, &[])
        .unwrap()
        .eq_value(&Value::Int(2)));

    let d = h.vm.invoke(arr, &dims, &[]).unwrap();
    let get_list = label(&mut h, "[]");
    assert!(h
        .vm
        .invoke(d, &get_list, &[Value::Int(0)])
        .unwrap()
        .eq_value(&Value::Int(2)));
}

/// Dictionary union/difference answer the `+` and `-` operators through
/// selector dispatch in the interpreter.
#[test]
fn dictionary_operators_dispatch() {
    let mut h = Harness::new();
    h.run(|core, p| {
        let mut d1 = Dictionary::new();
        d1.insert(Value::Int(1), Value::Int(1));
        d1.insert(Value::Int(2), Value::Int(2));
        let mut d2 = Dictionary::new();
        d2.insert(Value::Int(3), Value::Int(3));
        let d1 = p.bind_constant_object(ObjectKind::Dictionary(d1));
        let d2 = p.bind_constant_object(ObjectKind::Dictionary(d2));
        let count_sym = p.intern_symbol(core, "count");

        let g = p.global_function_mut();
        g.nregs = 8;
        let c1 = g.add_constant(d1);
        let c2 = g.add_constant(d2);
        let cc = g.add_constant(count_sym);
        emit(
            p,
            &[
                Instruction::abx(Op::Lct, 1, c1 as u16),
                Instruction::abx(Op::Lct, 2, c2 as u16),
                Instruction::abc(Op::Add, 1, 1, 2),
                Instruction::abx(Op::Lct, 2, cc as u16),
                Instruction::abc(Op::Invoke, 1, 2, 0),
                Instruction::abc(Op::Print, 1, 0, 0),
                Instruction::abc(Op::End, 0, 0, 0),
            ],
        );
    })
    .unwrap();
    assert_eq!(h.out.contents(), "3\n");
}

/// Instances inherit the base-class behaviors when their class carries
/// them: `respondsto` and `invoke`.
#[test]
fn object_veneer_methods() {
    use morpho::object::ObjClass;

    let mut h = Harness::new();
    let core = h.core.clone();

    // Front-end-style class construction copies the base methods in.
    let mut methods = Dictionary::new();
    if let Some(base) = core.base_class() {
        for (k, v) in base.as_class().unwrap().methods.iter() {
            methods.insert(k, v);
        }
    }
    let name = h.vm.bind_new(ObjectKind::string("Thing"));
    let class = h.vm.bind_new(ObjectKind::Class(ObjClass {
        name,
        superclass: core.base_class(),
        methods,
    }));

    let instance = h
        .vm
        .bind_new(ObjectKind::Instance(morpho::object::ObjInstance {
            class: class.as_object().unwrap(),
            fields: Dictionary::new(),
        }));

    let respondsto = label(&mut h, "respondsto");
    let clone_label = label(&mut h, "clone");
    let print_label = label(&mut h, "print");

    assert!(h
        .vm
        .invoke(instance, &respondsto, &[clone_label])
        .unwrap()
        .eq_value(&Value::Bool(true)));

    let copy = h.vm.invoke(instance, &clone_label, &[]).unwrap();
    assert!(copy.as_object().unwrap().as_instance().is_some());
    assert!(!copy.same(&instance));

    h.vm.invoke(instance, &print_label, &[]).unwrap();
    assert_eq!(h.out.contents(), "<Thing instance>");
}
