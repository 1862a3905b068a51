//! The object heap and its garbage collector.
//!
//! All heap objects live in one slab (`Vec<Option<Obj>>`) addressed by
//! 32-bit [`ObjRef`] handles; freed slots go on a free list and are reused.
//! Handles instead of references are what make cyclic object graphs
//! (mutually-capturing closures, instance -> class -> methods -> instance)
//! collectable: the tri-colour mark-sweep walks handles, and sweeping a
//! slot never invalidates another.
//!
//! The collector is precise and runs in four steps (`finish_collection`):
//! trace the gray worklist to a fixpoint, drop intern-table entries whose
//! string died (the intern table holds its keys weakly), sweep the slab,
//! then set the next trigger to `bytes_allocated * GC_HEAP_GROW_FACTOR`.
//! Root marking is the caller's job: the VM marks its stack, frames, open
//! upvalues, and globals; the compiler marks its in-flight functions.
//!
//! Allocation itself never collects. Owners call [`Heap::should_collect`]
//! at their allocation safepoints; the lock (`lock`/`unlock`) covers the
//! windows where a multi-step construction holds a partially-initialised
//! object that roots cannot see yet.

use crate::object::{Obj, ObjKind, ObjRef, StringObj, UpvalueState};
use crate::table::Table;
use crate::Value;

/// Heap growth policy: next trigger is live bytes times this factor.
const GC_HEAP_GROW_FACTOR: usize = 2;

/// First collection happens once this many bytes are live.
const FIRST_GC_THRESHOLD: usize = 1024 * 1024;

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Obj>>,
    free: Vec<u32>,
    /// Weak intern table: string value -> nil.
    strings: Table,
    bytes_allocated: usize,
    next_gc: usize,
    lock_depth: u32,
    stress: bool,
    gray: Vec<ObjRef>,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            lock_depth: 0,
            stress: false,
            gray: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocates an object. Callers that may hold unrooted intermediates
    /// should check [`Heap::should_collect`] *before* calling this.
    pub fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        self.bytes_allocated += Self::size_of_kind(&kind);
        let obj = Obj {
            marked: false,
            kind,
        };
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(obj);
            ObjRef::new(index)
        } else {
            if self.slots.len() >= u32::MAX as usize {
                panic!("object heap exhausted");
            }
            self.slots.push(Some(obj));
            ObjRef::new((self.slots.len() - 1) as u32)
        }
    }

    /// True when enough has been allocated that the owner should run a
    /// collection at its next safepoint. Always true under stress mode,
    /// never true while locked.
    pub fn should_collect(&self) -> bool {
        if self.lock_depth > 0 {
            return false;
        }
        self.stress || self.bytes_allocated > self.next_gc
    }

    /// Forces a collection before every allocation safepoint (GC stress
    /// testing).
    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    /// Suspends collection triggers while a multi-allocation construction
    /// holds objects no root can reach yet.
    pub fn lock(&mut self) {
        self.lock_depth += 1;
    }

    pub fn unlock(&mut self) {
        debug_assert!(self.lock_depth > 0, "unbalanced heap unlock");
        self.lock_depth -= 1;
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Live object count (test/diagnostic aid).
    pub fn object_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    // ------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------

    #[inline]
    pub fn obj(&self, r: ObjRef) -> &Obj {
        self.slots[r.index() as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("dangling object handle {:?}", r))
    }

    #[inline]
    pub fn obj_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.slots[r.index() as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("dangling object handle {:?}", r))
    }

    /// Human-readable type name of the object behind `r`.
    pub fn type_name(&self, r: ObjRef) -> &'static str {
        self.obj(r).kind.type_name()
    }

    pub fn string(&self, r: ObjRef) -> &StringObj {
        match &self.obj(r).kind {
            ObjKind::String(s) => s,
            other => panic!("expected string object, found {}", other.type_name()),
        }
    }

    pub fn is_string(&self, v: Value) -> bool {
        v.as_obj()
            .is_some_and(|r| matches!(self.obj(r).kind, ObjKind::String(_)))
    }

    pub fn function(&self, r: ObjRef) -> &crate::object::FunctionObj {
        match &self.obj(r).kind {
            ObjKind::Function(f) => f,
            other => panic!("expected function object, found {}", other.type_name()),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &crate::object::ClosureObj {
        match &self.obj(r).kind {
            ObjKind::Closure(c) => c,
            other => panic!("expected closure object, found {}", other.type_name()),
        }
    }

    pub fn closure_mut(&mut self, r: ObjRef) -> &mut crate::object::ClosureObj {
        match &mut self.obj_mut(r).kind {
            ObjKind::Closure(c) => c,
            other => panic!("expected closure object, found {}", other.type_name()),
        }
    }

    pub fn class(&self, r: ObjRef) -> &crate::object::ClassObj {
        match &self.obj(r).kind {
            ObjKind::Class(c) => c,
            other => panic!("expected class object, found {}", other.type_name()),
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> &mut crate::object::ClassObj {
        match &mut self.obj_mut(r).kind {
            ObjKind::Class(c) => c,
            other => panic!("expected class object, found {}", other.type_name()),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &crate::object::InstanceObj {
        match &self.obj(r).kind {
            ObjKind::Instance(i) => i,
            other => panic!("expected instance object, found {}", other.type_name()),
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> &mut crate::object::InstanceObj {
        match &mut self.obj_mut(r).kind {
            ObjKind::Instance(i) => i,
            other => panic!("expected instance object, found {}", other.type_name()),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> &crate::object::UpvalueObj {
        match &self.obj(r).kind {
            ObjKind::Upvalue(u) => u,
            other => panic!("expected upvalue object, found {}", other.type_name()),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut crate::object::UpvalueObj {
        match &mut self.obj_mut(r).kind {
            ObjKind::Upvalue(u) => u,
            other => panic!("expected upvalue object, found {}", other.type_name()),
        }
    }

    pub fn array(&self, r: ObjRef) -> &crate::object::ArrayObj {
        match &self.obj(r).kind {
            ObjKind::Array(a) => a,
            other => panic!("expected array object, found {}", other.type_name()),
        }
    }

    pub fn array_mut(&mut self, r: ObjRef) -> &mut crate::object::ArrayObj {
        match &mut self.obj_mut(r).kind {
            ObjKind::Array(a) => a,
            other => panic!("expected array object, found {}", other.type_name()),
        }
    }

    pub fn table(&self, r: ObjRef) -> &crate::object::TableObj {
        match &self.obj(r).kind {
            ObjKind::Table(t) => t,
            other => panic!("expected table object, found {}", other.type_name()),
        }
    }

    pub fn table_mut(&mut self, r: ObjRef) -> &mut crate::object::TableObj {
        match &mut self.obj_mut(r).kind {
            ObjKind::Table(t) => t,
            other => panic!("expected table object, found {}", other.type_name()),
        }
    }

    /// String bytes rendered for diagnostics and printing.
    pub fn string_lossy(&self, r: ObjRef) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.string(r).bytes)
    }

    // ------------------------------------------------------------------
    // Interning
    // ------------------------------------------------------------------

    /// FNV-1a over the byte sequence.
    pub fn hash_bytes(bytes: &[u8]) -> u32 {
        let mut hash: u32 = 2166136261;
        for &b in bytes {
            hash ^= u32::from(b);
            hash = hash.wrapping_mul(16777619);
        }
        hash
    }

    /// Hash used for table keys. Strings use their interned hash; numbers
    /// use the bit-fold suggested for doubles; booleans and nil use fixed
    /// constants; other objects hash their handle.
    pub fn hash_value(&self, v: Value) -> u32 {
        if let Some(b) = v.as_bool() {
            return if b { 1231 } else { 1237 };
        }
        if v.is_nil() {
            return 1993;
        }
        if let Some(n) = v.as_number() {
            let bits = (n + 1.0).to_bits();
            return (bits as u32).wrapping_add((bits >> 32) as u32);
        }
        if let Some(r) = v.as_obj() {
            if let ObjKind::String(s) = &self.obj(r).kind {
                return s.hash;
            }
            return r.index();
        }
        0
    }

    /// The interned string for `bytes`, allocating it on first sight. Two
    /// equal byte sequences always yield the same handle.
    pub fn intern(&mut self, bytes: &[u8]) -> ObjRef {
        let hash = Self::hash_bytes(bytes);
        if let Some(found) = self.strings.find_key_by(hash, |key| {
            key.as_obj()
                .is_some_and(|r| self.string(r).bytes.as_ref() == bytes)
        }) {
            return found
                .as_obj()
                .unwrap_or_else(|| panic!("intern table holds a non-object key"));
        }

        let r = self.alloc(ObjKind::String(StringObj {
            hash,
            bytes: bytes.into(),
        }));
        self.strings.set(Value::obj(r), hash, Value::NIL);
        r
    }

    /// Interned concatenation of two strings.
    pub fn concat_strings(&mut self, a: ObjRef, b: ObjRef) -> ObjRef {
        let mut buf = Vec::with_capacity(self.string(a).bytes.len() + self.string(b).bytes.len());
        buf.extend_from_slice(&self.string(a).bytes);
        buf.extend_from_slice(&self.string(b).bytes);
        self.intern(&buf)
    }

    // ------------------------------------------------------------------
    // Mark phase
    // ------------------------------------------------------------------

    pub fn mark_value(&mut self, v: Value) {
        if let Some(r) = v.as_obj() {
            self.mark_object(r);
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        let obj = self.obj_mut(r);
        if obj.marked {
            return;
        }
        obj.marked = true;
        self.gray.push(r);
    }

    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_value(key);
            self.mark_value(value);
        }
    }

    /// Drains the gray worklist, blackening each object by marking its
    /// children.
    fn trace(&mut self) {
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }
    }

    fn blacken(&mut self, r: ObjRef) {
        // Children are gathered first: marking them mutates other slots
        // while `r`'s payload is borrowed.
        let mut values: Vec<Value> = Vec::new();
        let mut objects: Vec<ObjRef> = Vec::new();

        match &self.obj(r).kind {
            ObjKind::String(_) => {}
            ObjKind::Range(_) => {}
            ObjKind::Native(n) => objects.push(n.name),
            ObjKind::Upvalue(u) => match u.state {
                UpvalueState::Open(_) => {}
                UpvalueState::Closed(v) => values.push(v),
            },
            ObjKind::Function(f) => {
                if let Some(name) = f.name {
                    objects.push(name);
                }
                values.extend_from_slice(&f.chunk.constants);
            }
            ObjKind::Closure(c) => {
                objects.push(c.function);
                objects.extend_from_slice(&c.upvalues);
            }
            ObjKind::Class(c) => {
                objects.push(c.name);
                if let Some(ctor) = c.constructor {
                    objects.push(ctor);
                }
                for (k, v) in c.methods.iter() {
                    values.push(k);
                    values.push(v);
                }
            }
            ObjKind::Instance(i) => {
                objects.push(i.class);
                for (k, v) in i.fields.iter() {
                    values.push(k);
                    values.push(v);
                }
            }
            ObjKind::BoundMethod(b) => {
                values.push(b.receiver);
                objects.push(b.method);
            }
            ObjKind::Array(a) => values.extend_from_slice(&a.items),
            ObjKind::Table(t) => {
                for (k, v) in t.entries.iter() {
                    values.push(k);
                    values.push(v);
                }
            }
        }

        for v in values {
            self.mark_value(v);
        }
        for o in objects {
            self.mark_object(o);
        }
    }

    // ------------------------------------------------------------------
    // Sweep phase
    // ------------------------------------------------------------------

    /// Runs the collection back half: trace grays to a fixpoint, clean the
    /// weakly-held intern table, sweep, and recompute the next trigger.
    /// Callers mark all roots first.
    pub fn finish_collection(&mut self) {
        self.trace();
        self.remove_white_strings();
        self.sweep();
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
    }

    /// Deletes intern-table entries whose string was not marked; without
    /// this, the intern table would keep every string alive forever.
    fn remove_white_strings(&mut self) {
        let mut doomed: Vec<(Value, u32)> = Vec::new();
        for (key, _) in self.strings.iter() {
            if let Some(r) = key.as_obj() {
                if !self.obj(r).marked {
                    doomed.push((key, self.string(r).hash));
                }
            }
        }
        for (key, hash) in doomed {
            self.strings.delete(key, hash);
        }
    }

    fn sweep(&mut self) {
        for index in 0..self.slots.len() {
            let Some(obj) = &mut self.slots[index] else {
                continue;
            };
            if obj.marked {
                obj.marked = false;
            } else {
                let freed = self.slots[index].take();
                if let Some(obj) = freed {
                    self.bytes_allocated = self
                        .bytes_allocated
                        .saturating_sub(Self::size_of_kind(&obj.kind));
                }
                self.free.push(index as u32);
            }
        }
    }

    /// Rough byte accounting per object, driving the growth policy.
    fn size_of_kind(kind: &ObjKind) -> usize {
        let payload = match kind {
            ObjKind::String(s) => s.bytes.len(),
            ObjKind::Function(f) => {
                f.chunk.code.len() + f.chunk.constants.len() * std::mem::size_of::<Value>()
            }
            ObjKind::Closure(c) => c.upvalues.len() * std::mem::size_of::<ObjRef>(),
            ObjKind::Array(a) => a.items.len() * std::mem::size_of::<Value>(),
            ObjKind::Table(t) => t.entries.len() * 2 * std::mem::size_of::<Value>(),
            ObjKind::Class(c) => c.methods.len() * 2 * std::mem::size_of::<Value>(),
            ObjKind::Instance(i) => i.fields.len() * 2 * std::mem::size_of::<Value>(),
            _ => 0,
        };
        std::mem::size_of::<Obj>() + payload
    }

    // ------------------------------------------------------------------
    // Printing
    // ------------------------------------------------------------------

    /// Renders a value the way `print` shows it.
    pub fn display_value(&self, v: Value) -> String {
        let mut out = String::new();
        self.write_value(&mut out, v);
        out
    }

    fn write_value(&self, out: &mut String, v: Value) {
        use std::fmt::Write as _;

        if v.is_nil() {
            out.push_str("nil");
        } else if v.is_empty() {
            out.push_str("<undefined>");
        } else if let Some(b) = v.as_bool() {
            let _ = write!(out, "{}", b);
        } else if let Some(n) = v.as_number() {
            let _ = write!(out, "{}", n);
        } else if let Some(r) = v.as_obj() {
            self.write_object(out, r);
        }
    }

    fn write_object(&self, out: &mut String, r: ObjRef) {
        use std::fmt::Write as _;

        match &self.obj(r).kind {
            ObjKind::String(s) => out.push_str(&String::from_utf8_lossy(&s.bytes)),
            ObjKind::Upvalue(_) => out.push_str("upvalue"),
            ObjKind::Function(f) => match f.name {
                Some(name) => {
                    let _ = write!(out, "<fn {}>", self.string_lossy(name));
                }
                None => out.push_str("<script>"),
            },
            ObjKind::Native(_) => out.push_str("<native fn>"),
            ObjKind::Closure(c) => self.write_object(out, c.function),
            ObjKind::Class(c) => out.push_str(&self.string_lossy(c.name)),
            ObjKind::Instance(i) => {
                let class = match &self.obj(i.class).kind {
                    ObjKind::Class(c) => self.string_lossy(c.name),
                    other => panic!("instance of a non-class {}", other.type_name()),
                };
                let _ = write!(out, "{} instance", class);
            }
            ObjKind::BoundMethod(b) => self.write_object(out, b.method),
            ObjKind::Range(range) => {
                let _ = write!(out, "{}..{}", range.start, range.end);
            }
            ObjKind::Array(a) => {
                out.push('[');
                for (i, item) in a.items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_value(out, *item);
                }
                out.push(']');
            }
            ObjKind::Table(t) => {
                out.push_str("#{");
                for (i, (key, value)) in t.entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_value(out, key);
                    out.push_str(": ");
                    self.write_value(out, value);
                }
                out.push('}');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ArrayObj, ClosureObj, FunctionObj, RangeObj};
    use crate::Chunk;

    #[test]
    fn test_interning_dedups() {
        let mut heap = Heap::new();
        let a = heap.intern(b"hello");
        let b = heap.intern(b"hello");
        let c = heap.intern(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.string(a).bytes.as_ref(), b"hello");
    }

    #[test]
    fn test_concat_reuses_existing_interned_string() {
        let mut heap = Heap::new();
        let existing = heap.intern(b"hi there");
        let a = heap.intern(b"hi ");
        let b = heap.intern(b"there");
        assert_eq!(heap.concat_strings(a, b), existing);
    }

    #[test]
    fn test_collection_frees_unreachable_objects() {
        let mut heap = Heap::new();
        let kept = heap.alloc(ObjKind::Range(RangeObj {
            start: 0.0,
            end: 3.0,
        }));
        let _doomed = heap.alloc(ObjKind::Range(RangeObj {
            start: 0.0,
            end: 9.0,
        }));
        let before = heap.object_count();

        heap.mark_object(kept);
        heap.finish_collection();

        assert_eq!(heap.object_count(), before - 1);
        // The survivor is intact and unmarked again.
        assert!(!heap.obj(kept).marked);
        match &heap.obj(kept).kind {
            ObjKind::Range(r) => assert_eq!(r.end, 3.0),
            _ => panic!("survivor changed kind"),
        }
    }

    #[test]
    fn test_unreachable_strings_leave_the_intern_table() {
        let mut heap = Heap::new();
        let kept = heap.intern(b"kept");
        let doomed = heap.intern(b"doomed");

        heap.mark_object(kept);
        heap.finish_collection();
        assert_eq!(heap.object_count(), 1);

        // The survivor keeps its identity; the collected byte sequence
        // interns into a fresh slot (its old table entry is gone).
        assert_eq!(heap.intern(b"kept"), kept);
        assert_eq!(heap.object_count(), 1);
        let reinterned = heap.intern(b"doomed");
        assert_eq!(reinterned.index(), doomed.index()); // freed slot reused
        assert_eq!(heap.object_count(), 2);
    }

    #[test]
    fn test_marking_traverses_closures() {
        let mut heap = Heap::new();
        let name = heap.intern(b"f");
        let function = heap.alloc(ObjKind::Function(FunctionObj {
            arity: 0,
            upvalue_count: 0,
            name: Some(name),
            chunk: Chunk::new(),
            max_stack: 0,
        }));
        let closure = heap.alloc(ObjKind::Closure(ClosureObj {
            function,
            upvalues: Vec::new(),
        }));

        heap.mark_object(closure);
        heap.finish_collection();

        // Function and its name survive through the closure.
        assert_eq!(heap.object_count(), 3);
        assert_eq!(heap.intern(b"f"), name);
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut heap = Heap::new();
        let doomed = heap.alloc(ObjKind::Range(RangeObj {
            start: 0.0,
            end: 1.0,
        }));
        heap.finish_collection();
        let recycled = heap.alloc(ObjKind::Array(ArrayObj { items: Vec::new() }));
        assert_eq!(doomed.index(), recycled.index());
    }

    #[test]
    fn test_lock_suppresses_triggers() {
        let mut heap = Heap::new();
        heap.set_stress(true);
        assert!(heap.should_collect());
        heap.lock();
        assert!(!heap.should_collect());
        heap.unlock();
        assert!(heap.should_collect());
    }

    #[test]
    fn test_display_values() {
        let mut heap = Heap::new();
        assert_eq!(heap.display_value(Value::NIL), "nil");
        assert_eq!(heap.display_value(Value::TRUE), "true");
        assert_eq!(heap.display_value(Value::number(7.0)), "7");
        assert_eq!(heap.display_value(Value::number(0.5)), "0.5");

        let s = heap.intern(b"hi");
        assert_eq!(heap.display_value(Value::obj(s)), "hi");

        let arr = heap.alloc(ObjKind::Array(ArrayObj {
            items: vec![Value::number(1.0), Value::obj(s)],
        }));
        assert_eq!(heap.display_value(Value::obj(arr)), "[1, hi]");

        let range = heap.alloc(ObjKind::Range(RangeObj {
            start: 1.0,
            end: 5.0,
        }));
        assert_eq!(heap.display_value(Value::obj(range)), "1..5");
    }
}
