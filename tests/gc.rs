//! Collector behavior: reachability, idempotence, retained handles, and
//! accounting.

mod common;

use common::{Harness, emit};
use morpho::object::ObjectKind;
use morpho::{Instruction, Op, Value};
use pretty_assertions::assert_eq;

fn run_trivial(h: &mut Harness) {
    h.run(|_core, p| {
        p.global_function_mut().nregs = 4;
        emit(p, &[Instruction::abc(Op::End, 0, 0, 0)]);
    })
    .unwrap();
}

#[test]
fn unreachable_objects_are_collected() {
    let mut h = Harness::new();
    run_trivial(&mut h);
    assert_eq!(h.vm.object_count(), 0);

    for i in 0..100 {
        h.vm.bind_new(ObjectKind::string(format!("garbage {}", i)));
    }
    assert!(h.vm.object_count() > 0);
    h.vm.collect_garbage();
    assert_eq!(h.vm.object_count(), 0);
}

#[test]
fn retained_objects_survive() {
    let mut h = Harness::new();
    run_trivial(&mut h);

    let keep = h.vm.bind_new(ObjectKind::string("keep me"));
    let handle = h.vm.retain(&[keep]);
    h.vm.bind_new(ObjectKind::string("drop me"));

    h.vm.collect_garbage();
    assert_eq!(h.vm.object_count(), 1);
    assert_eq!(keep.as_string().unwrap().text, "keep me");

    h.vm.release(handle);
    h.vm.collect_garbage();
    assert_eq!(h.vm.object_count(), 0);
}

/// Collecting twice with no mutation in between changes nothing.
#[test]
fn collection_is_idempotent() {
    let mut h = Harness::new();
    run_trivial(&mut h);

    let a = h.vm.bind_new(ObjectKind::string("a"));
    let b = h.vm.bind_new(ObjectKind::string("b"));
    let _handle = h.vm.retain(&[a, b]);
    h.vm.bind_new(ObjectKind::string("garbage"));

    h.vm.collect_garbage();
    let after_first = h.vm.object_count();
    h.vm.collect_garbage();
    assert_eq!(h.vm.object_count(), after_first);
    assert_eq!(after_first, 2);
}

/// Cycles (a list containing itself) do not hang the mark phase and are
/// collected once unreachable.
#[test]
fn cycles_are_collected() {
    let mut h = Harness::new();
    run_trivial(&mut h);

    let list = h.vm.bind_new(ObjectKind::list(Vec::new()));
    list.as_object()
        .unwrap()
        .as_list_mut()
        .unwrap()
        .items
        .push(list);

    let handle = h.vm.retain(&[list]);
    h.vm.collect_garbage();
    assert_eq!(h.vm.object_count(), 1);

    h.vm.release(handle);
    h.vm.collect_garbage();
    assert_eq!(h.vm.object_count(), 0);
}

/// Values stored in globals are roots.
#[test]
fn globals_are_roots() {
    let mut h = Harness::new();
    h.run(|_core, p| {
        p.nglobals = 1;
        p.global_function_mut().nregs = 4;
        emit(p, &[Instruction::abc(Op::End, 0, 0, 0)]);
    })
    .unwrap();

    let v = h.vm.bind_new(ObjectKind::string("global value"));
    assert!(h.vm.set_global(0, v));
    h.vm.collect_garbage();
    assert_eq!(h.vm.object_count(), 1);

    h.vm.set_global(0, Value::Nil);
    h.vm.collect_garbage();
    assert_eq!(h.vm.object_count(), 0);
}

/// Objects reachable only through registers survive even when every
/// allocation triggers a collection.
#[test]
fn registers_are_roots_under_gc_pressure() {
    use common::bind_string;
    use morpho::VmOptions;

    let mut h = Harness::with_options(VmOptions {
        gc_initial: 64,
        ..VmOptions::default()
    });
    h.run(|_core, p| {
        let a = bind_string(p, "ab");
        let b = bind_string(p, "cd");
        let g = p.global_function_mut();
        g.nregs = 8;
        let ka = g.add_constant(a);
        let kb = g.add_constant(b);
        emit(
            p,
            &[
                Instruction::abx(Op::Lct, 1, ka as u16),
                Instruction::abx(Op::Lct, 2, kb as u16),
                Instruction::abc(Op::Cat, 3, 1, 2),
                Instruction::abc(Op::Cat, 4, 2, 3),
                Instruction::abc(Op::Cat, 3, 3, 4),
                Instruction::abc(Op::Print, 3, 0, 0),
                Instruction::abc(Op::End, 0, 0, 0),
            ],
        );
    })
    .unwrap();
    assert_eq!(h.out.contents(), "abcdcdabcd\n");
}

/// Growing an object keeps the byte accounting coherent (no underflow, and
/// the corrective recomputation is never wrong).
#[test]
fn resize_notification_keeps_accounting() {
    let mut h = Harness::new();
    run_trivial(&mut h);

    let ctor = h.core.lookup_function("List").unwrap();
    let list = h.vm.call(ctor, &[]).unwrap();
    let append = h.vm.bind_new(ObjectKind::string("append"));
    let handle = h.vm.retain(&[list]);
    for i in 0..1000 {
        h.vm.invoke(list, &append, &[Value::Int(i)]).unwrap();
    }
    h.vm.collect_garbage();
    // The list plus the method-name string may survive (the string is
    // retained by the test harness only transiently).
    assert!(h.vm.object_count() >= 1);
    h.vm.release(handle);
    h.vm.collect_garbage();
    assert_eq!(h.vm.object_count(), 0);
}
