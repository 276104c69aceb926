//! Subkernel pool semantics and thread-local variables.

mod common;

use common::{Harness, emit};
use morpho::object::ObjectKind;
use morpho::{Instruction, Op, Value, error};
use pretty_assertions::assert_eq;

fn run_trivial(h: &mut Harness, nglobals: usize) -> std::sync::Arc<morpho::Program> {
    h.run(move |_core, p| {
        p.nglobals = nglobals;
        p.global_function_mut().nregs = 4;
        emit(p, &[Instruction::abc(Op::End, 0, 0, 0)]);
    })
    .unwrap()
}

#[test]
fn subkernels_share_globals() {
    let mut h = Harness::new();
    run_trivial(&mut h, 1);

    h.vm.set_global(0, Value::Int(7));
    let mut kernels = h.vm.acquire_subkernels(1);
    let sub = &mut kernels[0];

    assert!(sub.global(0).unwrap().eq_value(&Value::Int(7)));
    sub.set_global(0, Value::Int(9));
    assert!(h.vm.global(0).unwrap().eq_value(&Value::Int(9)));

    let sub = kernels.pop().unwrap();
    h.vm.release_subkernel(sub);
}

/// A released subkernel's heap list splices into the parent and its bytes
/// count toward the parent's accounting.
#[test]
fn release_splices_objects_into_parent() {
    let mut h = Harness::new();
    run_trivial(&mut h, 0);

    let mut kernels = h.vm.acquire_subkernels(2);
    {
        let sub = &mut kernels[0];
        for i in 0..5 {
            sub.bind_new(ObjectKind::string(format!("sub object {}", i)));
        }
        // Subkernels defer collection to the parent.
        sub.collect_garbage();
        assert_eq!(sub.object_count(), 5);
    }

    let parent_before = h.vm.object_count();
    let sub = kernels.remove(0);
    h.vm.release_subkernel(sub);
    assert_eq!(h.vm.object_count(), parent_before + 5);

    // The spliced objects are unreachable in the parent and get collected.
    h.vm.collect_garbage();
    assert_eq!(h.vm.object_count(), parent_before);

    h.vm.release_subkernel(kernels.pop().unwrap());
}

/// A subkernel's error propagates to the parent on release when the parent
/// has none.
#[test]
fn release_propagates_errors() {
    let mut h = Harness::new();
    let program = run_trivial(&mut h, 0);

    let mut kernels = h.vm.acquire_subkernels(1);
    {
        let sub = &mut kernels[0];
        // Fail inside the subkernel: calling a number is uncallable.
        let mut p = morpho::Program::new();
        {
            let g = p.global_function_mut();
            g.nregs = 4;
            g.add_constant(Value::Int(1));
        }
        emit(
            &mut p,
            &[
                Instruction::abx(Op::Lct, 1, 0),
                Instruction::abc(Op::Call, 1, 0, 0),
                Instruction::abc(Op::End, 0, 0, 0),
            ],
        );
        assert!(sub.run(&std::sync::Arc::new(p)).is_err());
    }

    assert!(h.vm.error().succeeded());
    h.vm.release_subkernel(kernels.pop().unwrap());
    assert!(h.vm.error().matches(error::UNCALLABLE));

    let _ = program;
}

/// Released subkernels return to the pool and are reused.
#[test]
fn pool_reuses_idle_kernels() {
    let mut h = Harness::new();
    run_trivial(&mut h, 0);

    let kernels = h.vm.acquire_subkernels(1);
    for k in kernels {
        h.vm.release_subkernel(k);
    }
    let again = h.vm.acquire_subkernels(1);
    assert_eq!(again.len(), 1);
}

#[test]
fn thread_local_variables() {
    let mut h = Harness::new();
    run_trivial(&mut h, 0);

    let core = h.core.clone();
    let a = core.add_tlvar();
    let b = core.add_tlvar();
    assert_ne!(a, b);

    assert!(h.vm.set_tlvar(a, Value::Int(5)));
    assert!(h.vm.tlvar(a).unwrap().eq_value(&Value::Int(5)));
    assert!(h.vm.tlvar(b).unwrap().is_nil());

    // Handles beyond the allocated space are rejected.
    assert!(!h.vm.set_tlvar(99, Value::Int(1)));
    assert!(h.vm.tlvar(99).is_none());

    // Each VM has its own slots.
    let mut kernels = h.vm.acquire_subkernels(1);
    assert!(kernels[0].tlvar(a).unwrap().is_nil());
    kernels[0].set_tlvar(a, Value::Int(8));
    assert!(h.vm.tlvar(a).unwrap().eq_value(&Value::Int(5)));
    h.vm.release_subkernel(kernels.pop().unwrap());
}
