//! The indexed global-slot store.
//!
//! Global variables are compiled to slot indices, not name lookups: the
//! compiler resolves each name to an index in this store (allocating the
//! slot on first sight), and the emitted `*-global` instructions carry the
//! index. At run time a slot still holding `Empty` means the global was
//! referenced but never defined.
//!
//! The store outlives individual `interpret` calls so a REPL session keeps
//! its globals across lines.

use crate::heap::Heap;
use crate::object::ObjRef;
use crate::table::Table;
use crate::Value;

#[derive(Debug, Clone, Copy)]
pub struct GlobalSlot {
    /// Interned name, kept for diagnostics and GC marking.
    pub name: ObjRef,
    pub value: Value,
    /// Set by `def-const`; assignment to a constant slot is a runtime error.
    pub constant: bool,
}

#[derive(Debug, Default)]
pub struct Globals {
    /// Interned name string -> slot index (as a number value).
    names: Table,
    slots: Vec<GlobalSlot>,
}

impl Globals {
    pub fn new() -> Globals {
        Globals::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot index for `name`, allocating an undefined slot on first use.
    pub fn slot_index(&mut self, heap: &Heap, name: ObjRef) -> usize {
        let hash = heap.string(name).hash;
        if let Some(found) = self.names.get(Value::obj(name), hash) {
            return found.as_number().map(|n| n as usize).unwrap_or_else(|| {
                panic!("global-name table holds a non-numeric slot index")
            });
        }
        let index = self.slots.len();
        self.names
            .set(Value::obj(name), hash, Value::number(index as f64));
        self.slots.push(GlobalSlot {
            name,
            value: Value::EMPTY,
            constant: false,
        });
        index
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &GlobalSlot {
        &self.slots[index]
    }

    /// Defines (or redefines) the slot's value; `constant` marks it
    /// immutable for later `set-global`s.
    pub fn define(&mut self, index: usize, value: Value, constant: bool) {
        let slot = &mut self.slots[index];
        slot.value = value;
        slot.constant = constant;
    }

    /// Overwrites a defined, non-constant slot. The VM checks both
    /// conditions before calling this.
    pub fn assign(&mut self, index: usize, value: Value) {
        self.slots[index].value = value;
    }

    /// All slots, for GC root marking.
    pub fn slots(&self) -> &[GlobalSlot] {
        &self.slots
    }

    /// The name table, for GC root marking.
    pub fn names(&self) -> &Table {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_allocation_is_stable() {
        let mut heap = Heap::new();
        let mut globals = Globals::new();
        let a = heap.intern(b"alpha");
        let b = heap.intern(b"beta");

        let ia = globals.slot_index(&heap, a);
        let ib = globals.slot_index(&heap, b);
        assert_ne!(ia, ib);
        assert_eq!(globals.slot_index(&heap, a), ia);
        assert_eq!(globals.len(), 2);
        assert!(globals.slot(ia).value.is_empty());
    }

    #[test]
    fn test_define_and_assign() {
        let mut heap = Heap::new();
        let mut globals = Globals::new();
        let name = heap.intern(b"answer");
        let index = globals.slot_index(&heap, name);

        globals.define(index, Value::number(42.0), true);
        assert!(globals.slot(index).constant);
        assert_eq!(globals.slot(index).value, Value::number(42.0));

        globals.define(index, Value::NIL, false);
        globals.assign(index, Value::TRUE);
        assert_eq!(globals.slot(index).value, Value::TRUE);
    }
}
