//! Built-in functions.
//!
//! Mathematical functions promote integer arguments to floats and return
//! floats, matching the arithmetic promotion rules. Type predicates and
//! conversions cover the value variants; `apply` forwards a callable.

use crate::builtin::{Core, call_args};
use crate::error::{self, ErrorBlock};
use crate::value::Value;
use crate::vm::Vm;

pub fn initialize(core: &mut Core) {
    core.add_function("abs", builtin_abs);
    core.add_function("exp", builtin_exp);
    core.add_function("ln", builtin_ln);
    core.add_function("log10", builtin_log10);
    core.add_function("sin", builtin_sin);
    core.add_function("cos", builtin_cos);
    core.add_function("tan", builtin_tan);
    core.add_function("asin", builtin_asin);
    core.add_function("acos", builtin_acos);
    core.add_function("sinh", builtin_sinh);
    core.add_function("cosh", builtin_cosh);
    core.add_function("tanh", builtin_tanh);
    core.add_function("sqrt", builtin_sqrt);
    core.add_function("floor", builtin_floor);
    core.add_function("ceil", builtin_ceil);
    core.add_function("arctan", builtin_arctan);
    core.add_function("min", builtin_min);
    core.add_function("max", builtin_max);
    core.add_function("isnil", builtin_isnil);
    core.add_function("isint", builtin_isint);
    core.add_function("isfloat", builtin_isfloat);
    core.add_function("isnumber", builtin_isnumber);
    core.add_function("isbool", builtin_isbool);
    core.add_function("isobject", builtin_isobject);
    core.add_function("isstring", builtin_isstring);
    core.add_function("iscallable", builtin_iscallable);
    core.add_function("bool", builtin_bool);
    core.add_function("int", builtin_int);
    core.add_function("float", builtin_float);
    core.add_function("apply", builtin_apply);
}

fn math_args(name: &str) -> ErrorBlock {
    ErrorBlock::with_message(
        error::MATH_ARGS,
        format!("Expected a numerical argument to {}.", name),
    )
}

fn math_num_args(name: &str) -> ErrorBlock {
    ErrorBlock::with_message(
        error::MATH_NUM_ARGS,
        format!("Incorrect number of arguments to {}.", name),
    )
}

macro_rules! math_builtin {
    ($fn_name:ident, $label:literal, $method:ident) => {
        fn $fn_name(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
            let rest = call_args(args);
            if rest.len() != 1 {
                return Err(math_num_args($label));
            }
            match rest[0].to_float() {
                Some(x) => Ok(Value::Float(x.$method())),
                None => Err(math_args($label)),
            }
        }
    };
}

math_builtin!(builtin_abs, "abs", abs);
math_builtin!(builtin_exp, "exp", exp);
math_builtin!(builtin_ln, "ln", ln);
math_builtin!(builtin_log10, "log10", log10);
math_builtin!(builtin_sin, "sin", sin);
math_builtin!(builtin_cos, "cos", cos);
math_builtin!(builtin_tan, "tan", tan);
math_builtin!(builtin_asin, "asin", asin);
math_builtin!(builtin_acos, "acos", acos);
math_builtin!(builtin_sinh, "sinh", sinh);
math_builtin!(builtin_cosh, "cosh", cosh);
math_builtin!(builtin_tanh, "tanh", tanh);
math_builtin!(builtin_sqrt, "sqrt", sqrt);
math_builtin!(builtin_floor, "floor", floor);
math_builtin!(builtin_ceil, "ceil", ceil);

/// One argument is `atan`; two arguments are `arctan(y, x)`.
fn builtin_arctan(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let mut x = [0.0f64; 2];
    for (i, v) in rest.iter().enumerate() {
        match v.to_float() {
            Some(f) if i < 2 => x[i] = f,
            _ => return Err(math_args("arctan")),
        }
    }
    match rest.len() {
        1 => Ok(Value::Float(x[0].atan())),
        2 => Ok(Value::Float(x[0].atan2(x[1]))),
        _ => Err(math_num_args("arctan")),
    }
}

/// Selects an extreme of the arguments, or of a single list argument.
fn extreme(args: &[Value], name: &str, pick_greater: bool) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let scan = |values: &[Value]| -> Result<Value, ErrorBlock> {
        let mut best = match values.first() {
            Some(v) if v.is_number() => *v,
            _ => return Err(math_args(name)),
        };
        for v in &values[1..] {
            let Some(ord) = v.compare(&best) else {
                return Err(math_args(name));
            };
            if ord.is_gt() == pick_greater && !ord.is_eq() {
                best = *v;
            }
        }
        Ok(best)
    };
    if rest.len() == 1
        && let Some(list) = rest[0].as_object().and_then(|o| o.as_list())
    {
        return scan(&list.items);
    }
    scan(rest)
}

fn builtin_min(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    extreme(args, "min", false)
}

fn builtin_max(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    extreme(args, "max", true)
}

macro_rules! type_predicate {
    ($fn_name:ident, $test:expr) => {
        fn $fn_name(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
            let rest = call_args(args);
            if rest.len() != 1 {
                return Err(ErrorBlock::with_id(error::TYPE_ARGS));
            }
            #[allow(clippy::redundant_closure_call)]
            Ok(Value::Bool(($test)(&rest[0])))
        }
    };
}

type_predicate!(builtin_isnil, |v: &Value| v.is_nil());
type_predicate!(builtin_isint, |v: &Value| matches!(v, Value::Int(_)));
type_predicate!(builtin_isfloat, |v: &Value| matches!(v, Value::Float(_)));
type_predicate!(builtin_isnumber, |v: &Value| v.is_number());
type_predicate!(builtin_isbool, |v: &Value| matches!(v, Value::Bool(_)));
type_predicate!(builtin_isobject, |v: &Value| matches!(v, Value::Object(_)));
type_predicate!(builtin_isstring, |v: &Value| v.is_string());
type_predicate!(builtin_iscallable, |v: &Value| v.is_callable());

/// Truthiness as a boolean.
fn builtin_bool(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.len() != 1 {
        return Err(ErrorBlock::with_id(error::TYPE_ARGS));
    }
    Ok(Value::Bool(rest[0].is_true()))
}

/// Integer conversion: floats truncate, strings parse.
fn builtin_int(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.len() != 1 {
        return Err(ErrorBlock::with_id(error::TYPE_ARGS));
    }
    match rest[0] {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Float(f) => Ok(Value::Int(f as i32)),
        Value::Bool(b) => Ok(Value::Int(b as i32)),
        Value::Object(_) => match rest[0].as_string().and_then(|s| s.text.parse::<i32>().ok()) {
            Some(i) => Ok(Value::Int(i)),
            None => Err(math_args("int")),
        },
        Value::Nil => Err(math_args("int")),
    }
}

/// Float conversion: integers promote, strings parse.
fn builtin_float(_vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    if rest.len() != 1 {
        return Err(ErrorBlock::with_id(error::TYPE_ARGS));
    }
    match rest[0] {
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Object(_) => match rest[0].as_string().and_then(|s| s.text.parse::<f64>().ok()) {
            Some(f) => Ok(Value::Float(f)),
            None => Err(math_args("float")),
        },
        _ => Err(math_args("float")),
    }
}

/// `apply(f, arg...)` calls `f` with the remaining arguments, or with the
/// contents of a single list argument.
fn builtin_apply(vm: &mut Vm, args: &[Value]) -> Result<Value, ErrorBlock> {
    let rest = call_args(args);
    let Some(&f) = rest.first() else {
        return Err(ErrorBlock::with_id(error::UNCALLABLE));
    };
    if rest.len() == 2
        && let Some(list) = rest[1].as_object().and_then(|o| o.as_list())
    {
        let items = list.items.clone();
        return vm.call(f, &items);
    }
    vm.call(f, &rest[1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn with_vm(test: impl FnOnce(&mut Vm)) {
        let core = Arc::new(Core::new());
        let mut vm = Vm::new(core);
        test(&mut vm);
    }

    #[test]
    fn math_promotes_ints() {
        with_vm(|vm| {
            let sqrt = vm.core().lookup_function("sqrt").unwrap();
            let out = vm.call(sqrt, &[Value::Int(9)]).unwrap();
            assert!(matches!(out, Value::Float(f) if f == 3.0));
        });
    }

    #[test]
    fn arctan_takes_y_then_x() {
        with_vm(|vm| {
            let arctan = vm.core().lookup_function("arctan").unwrap();
            let out = vm
                .call(arctan, &[Value::Float(1.0), Value::Float(1.0)])
                .unwrap();
            assert!(
                matches!(out, Value::Float(f) if (f - core::f64::consts::FRAC_PI_4).abs() < 1e-12)
            );
        });
    }

    #[test]
    fn min_max_over_arguments_and_lists() {
        with_vm(|vm| {
            let min = vm.core().lookup_function("min").unwrap();
            let max = vm.core().lookup_function("max").unwrap();
            let out = vm
                .call(min, &[Value::Int(3), Value::Float(1.5), Value::Int(2)])
                .unwrap();
            assert!(matches!(out, Value::Float(f) if f == 1.5));

            let list = vm.bind_new(ObjectKind::list(vec![
                Value::Int(4),
                Value::Int(9),
                Value::Int(2),
            ]));
            let out = vm.call(max, &[list]).unwrap();
            assert!(out.eq_value(&Value::Int(9)));
        });
    }

    #[test]
    fn conversions() {
        with_vm(|vm| {
            let int = vm.core().lookup_function("int").unwrap();
            let float = vm.core().lookup_function("float").unwrap();
            assert!(vm
                .call(int, &[Value::Float(3.9)])
                .unwrap()
                .eq_value(&Value::Int(3)));
            let s = vm.bind_new(ObjectKind::string("42"));
            assert!(vm.call(int, &[s]).unwrap().eq_value(&Value::Int(42)));
            assert!(vm
                .call(float, &[Value::Int(2)])
                .unwrap()
                .eq_value(&Value::Float(2.0)));
        });
    }

    #[test]
    fn predicates() {
        with_vm(|vm| {
            let isnil = vm.core().lookup_function("isnil").unwrap();
            assert!(vm.call(isnil, &[Value::Nil]).unwrap().eq_value(&Value::Bool(true)));
            assert!(vm
                .call(isnil, &[Value::Int(0)])
                .unwrap()
                .eq_value(&Value::Bool(false)));
        });
    }
}
