//! Collector stress tests: with `Heap::set_stress` on, a collection runs
//! before every allocation safepoint, so any object the VM or compiler
//! fails to root gets swept mid-construction and the program misbehaves.
//! Every scenario must produce exactly the same output as a normal run.

use std::io::Write;
use std::sync::{Arc, Mutex};

use rill_runtime::Vm;

#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("output lock poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_stressed(source: &str) -> String {
    let output = SharedOutput::default();
    let mut vm = Vm::with_output(Box::new(output.clone()));
    vm.heap.set_stress(true);
    assert_eq!(vm.interpret(source), Ok(()), "stressed run failed for {source:?}");
    String::from_utf8(output.0.lock().expect("output lock poisoned").clone())
        .expect("program output is not UTF-8")
}

#[test]
fn test_arithmetic_under_stress() {
    assert_eq!(run_stressed("print 1 + 2 * 3;"), "7\n");
}

#[test]
fn test_string_building_under_stress() {
    assert_eq!(
        run_stressed("let a = \"hi\"; let b = \" there\"; print a + b;"),
        "hi there\n"
    );
}

#[test]
fn test_closures_under_stress() {
    assert_eq!(
        run_stressed(
            "func make(n) { func inner() { return n; } return inner; } let f = make(42); print f();"
        ),
        "42\n"
    );
}

#[test]
fn test_loops_under_stress() {
    assert_eq!(run_stressed("for (let i = 1; i <= 3; i = i + 1) print i;"), "1\n2\n3\n");
}

#[test]
fn test_classes_under_stress() {
    let source = concat!(
        "class Greeter {\n",
        "  Greeter(name) { this.name = name; }\n",
        "  hi() { print \"hi \" + this.name; }\n",
        "}\n",
        "Greeter(\"world\").hi();\n"
    );
    assert_eq!(run_stressed(source), "hi world\n");
}

#[test]
fn test_collections_under_stress() {
    let source = concat!(
        "let items = [];\n",
        "for (let i = 0; i < 5; i = i + 1) { push(items, str(i)); }\n",
        "let t = #{\"key\": items};\n",
        "print t[\"key\"][2];\n"
    );
    assert_eq!(run_stressed(source), "2\n");
}

#[test]
fn test_string_churn_stays_bounded() {
    // Builds a fresh intermediate string every iteration; all of them are
    // garbage except the latest. With stress collection on, the heap must
    // not accumulate them.
    let source = concat!(
        "let acc = \"\";\n",
        "for (let i = 0; i < 200; i = i + 1) { acc = acc + \"x\"; }\n",
        "print len(acc);\n"
    );
    let output = SharedOutput::default();
    let mut vm = Vm::with_output(Box::new(output.clone()));
    vm.heap.set_stress(true);
    assert_eq!(vm.interpret(source), Ok(()));

    let text = String::from_utf8(output.0.lock().expect("output lock poisoned").clone())
        .expect("program output is not UTF-8");
    assert_eq!(text, "200\n");

    // 200 dead intermediates would dwarf this bound; only the live
    // session data (globals, natives, interned names) remains.
    assert!(
        vm.heap.object_count() < 100,
        "heap kept {} objects",
        vm.heap.object_count()
    );
}

#[test]
fn test_collection_reclaims_cycles() {
    // An instance whose field points back at its own class, dropped and
    // rebuilt in a loop; reference counting would leak this, mark-sweep
    // must not.
    let source = concat!(
        "class Node {}\n",
        "for (let i = 0; i < 50; i = i + 1) {\n",
        "  let n = Node();\n",
        "  n.next = n;\n",
        "}\n",
        "print \"done\";\n"
    );
    let output = SharedOutput::default();
    let mut vm = Vm::with_output(Box::new(output.clone()));
    vm.heap.set_stress(true);
    assert_eq!(vm.interpret(source), Ok(()));
    assert!(
        vm.heap.object_count() < 100,
        "heap kept {} objects",
        vm.heap.object_count()
    );
}
