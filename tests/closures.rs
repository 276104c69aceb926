//! Closure capture and upvalue lifetime: captures are by reference while
//! the variable lives on the stack, and survive in the closed cell after
//! the frame returns.

mod common;

use common::{Harness, bind_function, bind_string, emit};
use morpho::object::UpvalueProto;
use morpho::{Instruction, Op, Value};
use pretty_assertions::assert_eq;

/// `fn mk() { var x=1; fn g() { x=x+1; return x } return g }`
/// `var g=mk(); print g(); print g()` prints 2 then 3: both calls update
/// the same closed-over cell.
#[test]
fn closure_captures_by_reference() {
    let mut h = Harness::new();
    h.run(|_core, p| {
        let mk_name = bind_string(p, "mk");
        let g_name = bind_string(p, "g");
        let (mk_ref, mk_val) = bind_function(p, mk_name, 9, 0, 4);
        let (g_ref, g_val) = bind_function(p, g_name, 13, 0, 4);

        {
            let global = p.global_function_mut();
            global.nregs = 8;
            global.add_constant(mk_val);
        }
        {
            let mk = mk_ref.as_function_mut().unwrap();
            mk.add_constant(Value::Int(1));
            mk.add_constant(g_val);
            mk.add_prototype(&[UpvalueProto {
                is_local: true,
                index: 1,
            }]);
        }
        {
            let g = g_ref.as_function_mut().unwrap();
            g.add_constant(Value::Int(1));
        }

        emit(
            p,
            &[
                // global
                Instruction::abx(Op::Lct, 1, 0),
                Instruction::abc(Op::Call, 1, 0, 0),
                Instruction::abc(Op::Mov, 2, 1, 0),
                Instruction::abc(Op::Call, 2, 0, 0),
                Instruction::abc(Op::Print, 2, 0, 0),
                Instruction::abc(Op::Mov, 2, 1, 0),
                Instruction::abc(Op::Call, 2, 0, 0),
                Instruction::abc(Op::Print, 2, 0, 0),
                Instruction::abc(Op::End, 0, 0, 0),
                // mk, entry 9
                Instruction::abx(Op::Lct, 1, 0),
                Instruction::abx(Op::Lct, 2, 1),
                Instruction::abc(Op::Closure, 2, 0, 0),
                Instruction::abc(Op::Return, 1, 2, 0),
                // g, entry 13
                Instruction::abc(Op::Lup, 1, 0, 0),
                Instruction::abx(Op::Lct, 2, 0),
                Instruction::abc(Op::Add, 1, 1, 2),
                Instruction::abc(Op::Sup, 0, 1, 0),
                Instruction::abc(Op::Return, 1, 1, 0),
            ],
        );
    })
    .unwrap();
    assert_eq!(h.out.contents(), "2\n3\n");
}

/// Two closures over the same slot share one upvalue object: an increment
/// through one is visible through the other while the slot is still open.
#[test]
fn sibling_closures_share_a_cell() {
    let mut h = Harness::new();
    h.run(|_core, p| {
        let mk_name = bind_string(p, "mk");
        let inc_name = bind_string(p, "inc");
        let get_name = bind_string(p, "get");
        let (mk_ref, mk_val) = bind_function(p, mk_name, 4, 0, 4);
        let (inc_ref, inc_val) = bind_function(p, inc_name, 12, 0, 4);
        let (get_ref, get_val) = bind_function(p, get_name, 17, 0, 2);

        {
            let global = p.global_function_mut();
            global.nregs = 8;
            global.add_constant(mk_val);
        }
        {
            let mk = mk_ref.as_function_mut().unwrap();
            mk.add_constant(Value::Int(10));
            mk.add_constant(inc_val);
            mk.add_constant(get_val);
            let capture = UpvalueProto {
                is_local: true,
                index: 1,
            };
            mk.add_prototype(&[capture]);
            mk.add_prototype(&[capture]);
        }
        {
            let inc = inc_ref.as_function_mut().unwrap();
            inc.add_constant(Value::Int(1));
        }
        let _ = get_ref;

        emit(
            p,
            &[
                // global
                Instruction::abx(Op::Lct, 1, 0),
                Instruction::abc(Op::Call, 1, 0, 0),
                Instruction::abc(Op::Print, 1, 0, 0),
                Instruction::abc(Op::End, 0, 0, 0),
                // mk, entry 4: x = 10; inc(); return get()
                Instruction::abx(Op::Lct, 1, 0),
                Instruction::abx(Op::Lct, 2, 1),
                Instruction::abc(Op::Closure, 2, 0, 0),
                Instruction::abc(Op::Call, 2, 0, 0),
                Instruction::abx(Op::Lct, 3, 2),
                Instruction::abc(Op::Closure, 3, 1, 0),
                Instruction::abc(Op::Call, 3, 0, 0),
                Instruction::abc(Op::Return, 1, 3, 0),
                // inc, entry 12: x = x + 1
                Instruction::abc(Op::Lup, 1, 0, 0),
                Instruction::abx(Op::Lct, 2, 0),
                Instruction::abc(Op::Add, 1, 1, 2),
                Instruction::abc(Op::Sup, 0, 1, 0),
                Instruction::abc(Op::Return, 0, 0, 0),
                // get, entry 17: return x
                Instruction::abc(Op::Lup, 1, 0, 0),
                Instruction::abc(Op::Return, 1, 1, 0),
            ],
        );
    })
    .unwrap();
    assert_eq!(h.out.contents(), "11\n");
}
