//! The instruction set.
//!
//! Every instruction is a one-byte opcode followed by zero or more operand
//! bytes. Jump offsets are 2 bytes big-endian. Constant-pool, global-slot,
//! local-slot, and upvalue indices come in two encodings: a `*16` opcode
//! with one operand byte (indices 0-255) and a `*32` opcode with three
//! little-endian operand bytes (indices up to 16,777,215). The compiler
//! picks the short form whenever the index fits.

use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum OpCode {
    // Literals and stack shuffling
    Const16 = 0,
    Const32,
    True,
    False,
    Nil,
    Dup,
    Pop,

    // Globals
    DefGlobal16,
    DefGlobal32,
    DefConst16,
    DefConst32,
    GetGlobal16,
    GetGlobal32,
    SetGlobal16,
    SetGlobal32,

    // Locals
    GetLocal16,
    GetLocal32,
    SetLocal16,
    SetLocal32,

    // Upvalues
    GetUpvalue16,
    GetUpvalue32,
    SetUpvalue16,
    SetUpvalue32,
    CloseUpvalue,

    // Comparisons
    Equal,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Negate,
    Not,

    // I/O
    Print,

    // Control flow
    Jump,
    JumpIfFalse,
    Loop,
    /// Placeholder emitted inside loop bodies; the compiler rewrites every
    /// `Break` to a `Jump` targeting the loop exit once the loop ends.
    Break,

    // Calls and closures
    Call,
    Closure16,
    Closure32,
    Return,

    // Classes
    Class16,
    Class32,
    GetProperty16,
    GetProperty32,
    SetProperty16,
    SetProperty32,
    Method16,
    Method32,
    Invoke16,
    Invoke32,
    Inherit,
    GetSuper16,
    GetSuper32,
    SuperInvoke16,
    SuperInvoke32,

    // Collections
    Array,
    PushToArray,
    Table,
    PushToTable,
    GetSubscript,
    SetSubscript,
}

impl OpCode {
    /// Canonical instruction name, as printed by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Const16 => "const-16",
            OpCode::Const32 => "const-32",
            OpCode::True => "true",
            OpCode::False => "false",
            OpCode::Nil => "nil",
            OpCode::Dup => "dup",
            OpCode::Pop => "pop",
            OpCode::DefGlobal16 => "def-global-16",
            OpCode::DefGlobal32 => "def-global-32",
            OpCode::DefConst16 => "def-const-16",
            OpCode::DefConst32 => "def-const-32",
            OpCode::GetGlobal16 => "get-global-16",
            OpCode::GetGlobal32 => "get-global-32",
            OpCode::SetGlobal16 => "set-global-16",
            OpCode::SetGlobal32 => "set-global-32",
            OpCode::GetLocal16 => "get-local-16",
            OpCode::GetLocal32 => "get-local-32",
            OpCode::SetLocal16 => "set-local-16",
            OpCode::SetLocal32 => "set-local-32",
            OpCode::GetUpvalue16 => "get-upvalue-16",
            OpCode::GetUpvalue32 => "get-upvalue-32",
            OpCode::SetUpvalue16 => "set-upvalue-16",
            OpCode::SetUpvalue32 => "set-upvalue-32",
            OpCode::CloseUpvalue => "close-upvalue",
            OpCode::Equal => "equal",
            OpCode::Greater => "greater",
            OpCode::GreaterEqual => "greater-equal",
            OpCode::Less => "less",
            OpCode::LessEqual => "less-equal",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Mul => "mul",
            OpCode::Div => "div",
            OpCode::Mod => "mod",
            OpCode::Negate => "negate",
            OpCode::Not => "not",
            OpCode::Print => "print",
            OpCode::Jump => "jump",
            OpCode::JumpIfFalse => "jump-if-false",
            OpCode::Loop => "loop",
            OpCode::Break => "break",
            OpCode::Call => "call",
            OpCode::Closure16 => "closure-16",
            OpCode::Closure32 => "closure-32",
            OpCode::Return => "return",
            OpCode::Class16 => "class-16",
            OpCode::Class32 => "class-32",
            OpCode::GetProperty16 => "get-property-16",
            OpCode::GetProperty32 => "get-property-32",
            OpCode::SetProperty16 => "set-property-16",
            OpCode::SetProperty32 => "set-property-32",
            OpCode::Method16 => "method-16",
            OpCode::Method32 => "method-32",
            OpCode::Invoke16 => "invoke-16",
            OpCode::Invoke32 => "invoke-32",
            OpCode::Inherit => "inherit",
            OpCode::GetSuper16 => "get-super-16",
            OpCode::GetSuper32 => "get-super-32",
            OpCode::SuperInvoke16 => "super-invoke-16",
            OpCode::SuperInvoke32 => "super-invoke-32",
            OpCode::Array => "array",
            OpCode::PushToArray => "push-to-array",
            OpCode::Table => "table",
            OpCode::PushToTable => "push-to-table",
            OpCode::GetSubscript => "get-subscript",
            OpCode::SetSubscript => "set-subscript",
        }
    }

    /// Operand byte count for instructions whose length does not depend on
    /// runtime data. `Closure16`/`Closure32` return `None`: their upvalue
    /// descriptor list makes the length a property of the closed-over
    /// function, so callers must consult the constant pool.
    pub fn fixed_operand_len(self) -> Option<usize> {
        use OpCode::*;
        Some(match self {
            True | False | Nil | Dup | Pop | CloseUpvalue | Equal | Greater | GreaterEqual
            | Less | LessEqual | Add | Sub | Mul | Div | Mod | Negate | Not | Print | Return
            | Inherit | Array | PushToArray | Table | PushToTable | GetSubscript
            | SetSubscript => 0,

            Const16 | DefGlobal16 | DefConst16 | GetGlobal16 | SetGlobal16 | GetLocal16
            | SetLocal16 | GetUpvalue16 | SetUpvalue16 | Class16 | GetProperty16
            | SetProperty16 | Method16 | GetSuper16 | Call => 1,

            Jump | JumpIfFalse | Loop | Break | Invoke16 | SuperInvoke16 => 2,

            Const32 | DefGlobal32 | DefConst32 | GetGlobal32 | SetGlobal32 | GetLocal32
            | SetLocal32 | GetUpvalue32 | SetUpvalue32 | Class32 | GetProperty32
            | SetProperty32 | Method32 | GetSuper32 => 3,

            Invoke32 | SuperInvoke32 => 4,

            Closure16 | Closure32 => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_through_byte() {
        for byte in 0..=u8::MAX {
            if let Ok(op) = OpCode::try_from_primitive(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(OpCode::try_from_primitive(0), Ok(OpCode::Const16));
        assert!(OpCode::try_from_primitive(200).is_err());
    }

    #[test]
    fn test_jump_family_uses_two_operand_bytes() {
        for op in [OpCode::Jump, OpCode::JumpIfFalse, OpCode::Loop, OpCode::Break] {
            assert_eq!(op.fixed_operand_len(), Some(2));
        }
    }

    #[test]
    fn test_closure_length_is_data_dependent() {
        assert_eq!(OpCode::Closure16.fixed_operand_len(), None);
        assert_eq!(OpCode::Closure32.fixed_operand_len(), None);
    }
}
