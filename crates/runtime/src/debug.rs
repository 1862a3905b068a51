//! Bytecode disassembler.
//!
//! Debug-only pretty-printer: renders a chunk as one instruction per
//! line with byte offset, source line (`|` when unchanged), canonical
//! opcode name, and decoded operands. Constants and names are resolved
//! through the heap so the output reads like the source that produced
//! it.

use std::fmt::Write as _;

use rill_core::object::ObjKind;
use rill_core::{Chunk, Heap, OpCode};

/// Renders a whole chunk.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (text, next) = disassemble_instruction(heap, chunk, offset);
        out.push_str(&text);
        out.push('\n');
        offset = next;
    }
    out
}

/// Renders the instruction at `offset`; returns the text and the offset
/// of the next instruction.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut text = format!("{offset:04} ");
    let line = chunk.line_of(offset);
    if offset > 0 && line == chunk.line_of(offset - 1) {
        text.push_str("   | ");
    } else {
        let _ = write!(text, "{line:4} ");
    }

    let byte = chunk.code[offset];
    let Ok(op) = OpCode::try_from(byte) else {
        let _ = write!(text, "<unknown {byte:#04x}>");
        return (text, offset + 1);
    };
    let _ = write!(text, "{:<16}", op.name());

    use OpCode::*;
    let next = match op {
        // Single-byte instructions.
        True | False | Nil | Dup | Pop | CloseUpvalue | Equal | Greater | GreaterEqual | Less
        | LessEqual | Add | Sub | Mul | Div | Mod | Negate | Not | Print | Return | Inherit
        | Array | PushToArray | Table | PushToTable | GetSubscript | SetSubscript => offset + 1,

        // Constant-pool operands.
        Const16 | Const32 => {
            let (index, next) = read_index(chunk, offset + 1, op == Const16);
            let _ = write!(text, " {index} '{}'", constant_text(heap, chunk, index));
            next
        }

        // Plain index operands (global slots, locals, upvalues).
        DefGlobal16 | DefGlobal32 | DefConst16 | DefConst32 | GetGlobal16 | GetGlobal32
        | SetGlobal16 | SetGlobal32 => {
            let short = matches!(op, DefGlobal16 | DefConst16 | GetGlobal16 | SetGlobal16);
            let (index, next) = read_index(chunk, offset + 1, short);
            let _ = write!(text, " {index}");
            next
        }
        GetLocal16 | GetLocal32 | SetLocal16 | SetLocal32 => {
            let short = matches!(op, GetLocal16 | SetLocal16);
            let (slot, next) = read_index(chunk, offset + 1, short);
            let _ = write!(text, " {slot}");
            next
        }
        GetUpvalue16 | GetUpvalue32 | SetUpvalue16 | SetUpvalue32 => {
            let short = matches!(op, GetUpvalue16 | SetUpvalue16);
            let (index, next) = read_index(chunk, offset + 1, short);
            let _ = write!(text, " {index}");
            next
        }

        // Name operands.
        Class16 | Class32 | GetProperty16 | GetProperty32 | SetProperty16 | SetProperty32
        | Method16 | Method32 | GetSuper16 | GetSuper32 => {
            let short = matches!(
                op,
                Class16 | GetProperty16 | SetProperty16 | Method16 | GetSuper16
            );
            let (index, next) = read_index(chunk, offset + 1, short);
            let _ = write!(text, " {index} '{}'", constant_text(heap, chunk, index));
            next
        }

        // Jumps: 16-bit big-endian distance.
        Jump | JumpIfFalse | Break => {
            let distance = read_u16(chunk, offset + 1);
            let _ = write!(text, " {offset:04} -> {:04}", offset + 3 + distance);
            offset + 3
        }
        Loop => {
            let distance = read_u16(chunk, offset + 1);
            let _ = write!(text, " {offset:04} -> {:04}", offset + 3 - distance);
            offset + 3
        }

        Call => {
            let argc = chunk.code[offset + 1];
            let _ = write!(text, " ({argc} args)");
            offset + 2
        }

        Invoke16 | Invoke32 | SuperInvoke16 | SuperInvoke32 => {
            let short = matches!(op, Invoke16 | SuperInvoke16);
            let (index, next) = read_index(chunk, offset + 1, short);
            let argc = chunk.code[next];
            let _ = write!(
                text,
                " ({argc} args) {index} '{}'",
                constant_text(heap, chunk, index)
            );
            next + 1
        }

        // Closures: function constant plus one descriptor per upvalue.
        Closure16 | Closure32 => {
            let (index, mut next) = read_index(chunk, offset + 1, op == Closure16);
            let _ = write!(text, " {index} {}", constant_text(heap, chunk, index));

            let count = chunk.constants[index]
                .as_obj()
                .map(|r| match &heap.obj(r).kind {
                    ObjKind::Function(f) => f.upvalue_count,
                    _ => 0,
                })
                .unwrap_or(0);
            for _ in 0..count {
                let is_local = chunk.code[next] == 1;
                let (slot, after) = read_index(chunk, next + 1, false);
                let _ = write!(
                    text,
                    "\n{:04}    |                   {} {}",
                    next,
                    if is_local { "local" } else { "upvalue" },
                    slot
                );
                next = after;
            }
            next
        }
    };

    (text, next)
}

fn read_index(chunk: &Chunk, offset: usize, short: bool) -> (usize, usize) {
    if short {
        (chunk.code[offset] as usize, offset + 1)
    } else {
        let value = chunk.code[offset] as usize
            | (chunk.code[offset + 1] as usize) << 8
            | (chunk.code[offset + 2] as usize) << 16;
        (value, offset + 3)
    }
}

fn read_u16(chunk: &Chunk, offset: usize) -> usize {
    ((chunk.code[offset] as usize) << 8) | chunk.code[offset + 1] as usize
}

fn constant_text(heap: &Heap, chunk: &Chunk, index: usize) -> String {
    match chunk.constants.get(index) {
        Some(value) => heap.display_value(*value),
        None => "<bad constant>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::Value;

    #[test]
    fn test_round_trips_opcodes_and_operands() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();

        chunk.write_constant(Value::number(1.2), 1);
        chunk.write(OpCode::Negate as u8, 1);
        chunk.write(OpCode::Print as u8, 2);
        chunk.write(OpCode::Jump as u8, 3);
        chunk.write(0x00, 3);
        chunk.write(0x05, 3);
        chunk.write(OpCode::Call as u8, 3);
        chunk.write(2, 3);
        chunk.write(OpCode::Return as u8, 4);

        let text = disassemble_chunk(&heap, &chunk, "test");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "== test ==");
        assert!(lines[1].contains("const-16") && lines[1].contains("1.2"));
        assert!(lines[2].contains("negate"));
        assert!(lines[3].contains("print"));
        assert!(lines[4].contains("jump") && lines[4].contains("0004 -> 0012"));
        assert!(lines[5].contains("call") && lines[5].contains("(2 args)"));
        assert!(lines[6].contains("return"));
    }

    #[test]
    fn test_line_markers_collapse_runs() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        chunk.write(OpCode::Nil as u8, 7);
        chunk.write(OpCode::Pop as u8, 7);
        chunk.write(OpCode::Return as u8, 9);

        let text = disassemble_chunk(&heap, &chunk, "lines");
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[1].starts_with("0000    7 "));
        assert!(lines[2].starts_with("0001    | "));
        assert!(lines[3].starts_with("0002    9 "));
    }

    #[test]
    fn test_offsets_advance_by_instruction_length() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        chunk.write(OpCode::GetLocal32 as u8, 1);
        chunk.write(0x01, 1);
        chunk.write(0x02, 1);
        chunk.write(0x03, 1);
        chunk.write(OpCode::Return as u8, 1);

        let (text, next) = disassemble_instruction(&heap, &chunk, 0);
        assert!(text.contains("get-local-32"));
        // 0x030201 little-endian.
        assert!(text.contains("197121"));
        assert_eq!(next, 4);
    }
}
