//! Built-in native functions.
//!
//! Natives are host Rust functions stored in global slots; the VM calls
//! them synchronously with a slice of their arguments (still rooted on
//! the value stack). Returning `Err` becomes a runtime error at the call
//! site.

use std::time::{SystemTime, UNIX_EPOCH};

use rill_core::object::{ObjKind, RangeObj};
use rill_core::{Heap, Value};

use crate::vm::Vm;

/// Registers the standard set; runs once at VM construction.
pub fn register_all(vm: &mut Vm) {
    vm.register_native("clock", 0, native_clock);
    vm.register_native("len", 1, native_len);
    vm.register_native("str", 1, native_str);
    vm.register_native("range", 2, native_range);
    vm.register_native("push", 2, native_push);
}

/// `clock()` — wall-clock seconds since the Unix epoch.
fn native_clock(_heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "clock: system time is before the epoch".to_string())?;
    Ok(Value::number(now.as_secs_f64()))
}

/// `len(x)` — byte length of a string, element count of an array, entry
/// count of a table.
fn native_len(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let Some(r) = args[0].as_obj() else {
        return Err("len: expected a string, array, or table".to_string());
    };
    let len = match &heap.obj(r).kind {
        ObjKind::String(s) => s.bytes.len(),
        ObjKind::Array(a) => a.items.len(),
        ObjKind::Table(t) => t.entries.len(),
        _ => return Err("len: expected a string, array, or table".to_string()),
    };
    Ok(Value::number(len as f64))
}

/// `str(x)` — the value's print representation as an interned string.
fn native_str(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let text = heap.display_value(args[0]);
    Ok(Value::obj(heap.intern(text.as_bytes())))
}

/// `range(a, b)` — ascending half-open range; swaps its endpoints when
/// given in descending order.
fn native_range(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let (Some(a), Some(b)) = (args[0].as_number(), args[1].as_number()) else {
        return Err("range: expected two numbers".to_string());
    };
    let (start, end) = if a <= b { (a, b) } else { (b, a) };
    Ok(Value::obj(
        heap.alloc(ObjKind::Range(RangeObj { start, end })),
    ))
}

/// `push(array, value)` — appends in place and returns the array.
fn native_push(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let array = match args[0].as_obj() {
        Some(r) if matches!(heap.obj(r).kind, ObjKind::Array(_)) => r,
        _ => return Err("push: expected an array".to_string()),
    };
    heap.array_mut(array).items.push(args[1]);
    Ok(args[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::object::ArrayObj;

    #[test]
    fn test_len_measures_each_container() {
        let mut heap = Heap::new();
        let s = heap.intern(b"hello");
        assert_eq!(
            native_len(&mut heap, &[Value::obj(s)]),
            Ok(Value::number(5.0))
        );

        let array = heap.alloc(ObjKind::Array(ArrayObj {
            items: vec![Value::NIL, Value::TRUE],
        }));
        assert_eq!(
            native_len(&mut heap, &[Value::obj(array)]),
            Ok(Value::number(2.0))
        );

        assert!(native_len(&mut heap, &[Value::number(1.0)]).is_err());
    }

    #[test]
    fn test_str_renders_print_representation() {
        let mut heap = Heap::new();
        let result = native_str(&mut heap, &[Value::number(42.0)]).expect("str succeeds");
        let r = result.as_obj().expect("str returns a string");
        assert_eq!(heap.string(r).bytes.as_ref(), b"42");
    }

    #[test]
    fn test_range_swaps_descending_endpoints() {
        let mut heap = Heap::new();
        let value = native_range(&mut heap, &[Value::number(5.0), Value::number(1.0)])
            .expect("range succeeds");
        let r = value.as_obj().expect("range returns an object");
        match &heap.obj(r).kind {
            ObjKind::Range(range) => {
                assert_eq!(range.start, 1.0);
                assert_eq!(range.end, 5.0);
            }
            other => panic!("expected a range, got {}", other.type_name()),
        }
        assert!(native_range(&mut heap, &[Value::NIL, Value::number(1.0)]).is_err());
    }

    #[test]
    fn test_push_appends_in_place() {
        let mut heap = Heap::new();
        let array = heap.alloc(ObjKind::Array(ArrayObj { items: Vec::new() }));
        let result = native_push(&mut heap, &[Value::obj(array), Value::number(7.0)])
            .expect("push succeeds");
        assert_eq!(result, Value::obj(array));
        assert_eq!(heap.array(array).items, vec![Value::number(7.0)]);
    }

    #[test]
    fn test_clock_is_monotonic_enough() {
        let mut heap = Heap::new();
        let a = native_clock(&mut heap, &[]).expect("clock succeeds");
        let b = native_clock(&mut heap, &[]).expect("clock succeeds");
        let (a, b) = (
            a.as_number().expect("clock returns a number"),
            b.as_number().expect("clock returns a number"),
        );
        assert!(b >= a);
        assert!(a > 0.0);
    }
}
