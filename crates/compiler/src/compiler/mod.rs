//! The single-pass bytecode compiler.
//!
//! One [`Compiler`] drives the whole translation: it owns the scanner, the
//! two-token lookahead window, the diagnostic state, and a stack of
//! [`FuncState`]s — one per function currently being compiled, innermost
//! last, with the top-level script at the bottom. Expressions are parsed
//! by precedence climbing (`expr.rs`), statements by recursive descent
//! (`stmt.rs`); both emit bytes into the innermost function's chunk as
//! they go.
//!
//! Because compilation interns strings and builds function objects, the
//! collector can run mid-compile. `mark_roots` keeps every in-flight
//! chunk's constants (and the globals the session already holds) alive.

mod expr;
mod stmt;

use rill_core::object::{FunctionObj, ObjKind, ObjRef};
use rill_core::{Chunk, Globals, Heap, OpCode, Value};

use crate::scanner::{Scanner, Token, TokenKind};

/// Hard limit on constant-pool and global-slot indices (24-bit operands).
const MAX_INDEX: usize = (1 << 24) - 1;

/// A compile-time error, reported against the offending token.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub line: usize,
    /// The offending lexeme; `None` at end of input.
    pub lexeme: Option<String>,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.lexeme {
            Some(lexeme) => write!(
                f,
                "[line {}] Error at '{}': {}",
                self.line, lexeme, self.message
            ),
            None => write!(f, "[line {}] Error at end: {}", self.line, self.message),
        }
    }
}

/// Binding powers, weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(crate) enum Precedence {
    None,
    Assignment,
    /// `?:`
    Conditional,
    Or,
    And,
    Equality,
    Comparison,
    /// Reserved slot between comparison and term; ranges are built by the
    /// `range` native rather than an operator, but the ladder keeps the
    /// level so rule strength stays stable.
    Range,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    pub(crate) fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Conditional,
            Precedence::Conditional => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Range,
            Precedence::Range => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// What kind of function body is being compiled; drives slot-0 naming and
/// implicit-return shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FuncKind {
    Script,
    Function,
    Method,
    /// The method named like its class: returns its receiver.
    Initializer,
}

#[derive(Debug)]
pub(crate) struct Local<'src> {
    name: &'src str,
    /// Scope depth, or -1 while the initializer is still being compiled.
    depth: i32,
    captured: bool,
    /// `const` locals are enforced at compile time; stack slots carry no
    /// metadata at run time.
    constant: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct UpvalueDesc {
    pub index: u32,
    pub is_local: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopState {
    /// Byte offset `continue` loops back to, and where break patching
    /// starts scanning.
    start: usize,
    /// Locals deeper than this are popped by `break`/`continue`.
    scope_depth: i32,
}

/// Per-function compilation state.
pub(crate) struct FuncState<'src> {
    kind: FuncKind,
    name: Option<ObjRef>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
    loops: Vec<LoopState>,
    /// Running operand-stack height and its high-water mark; the VM sizes
    /// frames from `max_stack`. Over-estimation is harmless,
    /// under-estimation is a bug.
    stack_height: usize,
    max_stack: usize,
}

impl<'src> FuncState<'src> {
    fn new(kind: FuncKind, name: Option<ObjRef>) -> FuncState<'src> {
        // Slot 0 is reserved: the callee at plain calls, the receiver in
        // methods.
        let slot_zero = Local {
            name: if matches!(kind, FuncKind::Method | FuncKind::Initializer) {
                "this"
            } else {
                ""
            },
            depth: 0,
            captured: false,
            constant: false,
        };
        FuncState {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            stack_height: 1,
            max_stack: 1,
        }
    }
}

/// Class context; one entry per nested `class` declaration being compiled.
pub(crate) struct ClassState<'src> {
    name: &'src str,
    has_superclass: bool,
}

pub(crate) struct Compiler<'src, 'ctx> {
    scanner: Scanner<'src>,
    pub(crate) previous: Token<'src>,
    pub(crate) current: Token<'src>,
    had_error: bool,
    panicked: bool,
    diagnostics: Vec<Diagnostic>,
    pub(crate) heap: &'ctx mut Heap,
    pub(crate) globals: &'ctx mut Globals,
    funcs: Vec<FuncState<'src>>,
    classes: Vec<ClassState<'src>>,
}

/// Compiles `source` to a top-level script function.
///
/// Global names resolve against (and extend) `globals`, so a REPL can feed
/// successive lines through the same store. On error, every diagnostic
/// collected across statement boundaries is returned.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    globals: &mut Globals,
) -> Result<ObjRef, Vec<Diagnostic>> {
    let mut compiler = Compiler::new(source, heap, globals);

    compiler.advance();
    while !compiler.match_kind(TokenKind::Eof) {
        compiler.declaration();
    }

    let script = compiler.end_func();
    if compiler.had_error {
        Err(compiler.diagnostics)
    } else {
        Ok(script)
    }
}

impl<'src, 'ctx> Compiler<'src, 'ctx> {
    fn new(
        source: &'src str,
        heap: &'ctx mut Heap,
        globals: &'ctx mut Globals,
    ) -> Compiler<'src, 'ctx> {
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 0,
        };
        Compiler {
            scanner: Scanner::new(source),
            previous: placeholder,
            current: placeholder,
            had_error: false,
            panicked: false,
            diagnostics: Vec::new(),
            heap,
            globals,
            funcs: vec![FuncState::new(FuncKind::Script, None)],
            classes: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    pub(crate) fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    pub(crate) fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    pub(crate) fn match_kind(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub(crate) fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    pub(crate) fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        // One diagnostic per panic: the rest of the statement is noise.
        if self.panicked {
            return;
        }
        self.panicked = true;
        self.had_error = true;

        let lexeme = match token.kind {
            TokenKind::Eof => None,
            // Error tokens carry a scanner message, not source text.
            TokenKind::Error => None,
            _ => Some(token.lexeme.to_string()),
        };
        self.diagnostics.push(Diagnostic {
            line: token.line,
            lexeme,
            message: message.to_string(),
        });
    }

    /// Discards tokens until a statement boundary, then resumes normal
    /// reporting.
    pub(crate) fn synchronize(&mut self) {
        self.panicked = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Func
                | TokenKind::Let
                | TokenKind::Const
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ------------------------------------------------------------------
    // Allocation (GC-aware)
    // ------------------------------------------------------------------

    /// Interns a string, collecting first if the heap asks for it.
    pub(crate) fn intern(&mut self, bytes: &[u8]) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.intern(bytes)
    }

    fn collect_garbage(&mut self) {
        self.mark_roots();
        self.heap.finish_collection();
    }

    /// GC root hook: everything the compiler holds that the collector
    /// cannot see — in-flight function names and constants — plus the
    /// session globals, which have no other owner while the VM is not
    /// running.
    fn mark_roots(&mut self) {
        let Compiler {
            heap,
            globals,
            funcs,
            ..
        } = self;
        for func in funcs.iter() {
            if let Some(name) = func.name {
                heap.mark_object(name);
            }
            for &constant in &func.chunk.constants {
                heap.mark_value(constant);
            }
        }
        heap.mark_table(globals.names());
        for slot in globals.slots() {
            heap.mark_object(slot.name);
            heap.mark_value(slot.value);
        }
    }

    // ------------------------------------------------------------------
    // Function-state access
    // ------------------------------------------------------------------

    pub(crate) fn func(&mut self) -> &mut FuncState<'src> {
        self.funcs
            .last_mut()
            .expect("compiler function stack is empty")
    }

    fn func_ref(&self) -> &FuncState<'src> {
        self.funcs.last().expect("compiler function stack is empty")
    }

    pub(crate) fn in_class(&self) -> bool {
        !self.classes.is_empty()
    }

    pub(crate) fn class_has_superclass(&self) -> bool {
        self.classes.last().is_some_and(|c| c.has_superclass)
    }

    pub(crate) fn begin_class(&mut self, name: &'src str) {
        self.classes.push(ClassState {
            name,
            has_superclass: false,
        });
    }

    pub(crate) fn set_class_superclass(&mut self) {
        if let Some(class) = self.classes.last_mut() {
            class.has_superclass = true;
        }
    }

    pub(crate) fn class_name(&self) -> &'src str {
        self.classes.last().map_or("", |c| c.name)
    }

    pub(crate) fn end_class(&mut self) {
        self.classes.pop();
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    pub(crate) fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.func().chunk.write(byte, line);
    }

    /// Emits an opcode and applies its fixed stack delta. Variable-effect
    /// instructions (calls, closures) have dedicated helpers.
    pub(crate) fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
        self.adjust_stack(Self::stack_delta(op));
    }

    /// Emits an index-carrying instruction, choosing the 1-byte form when
    /// the index fits and the 3-byte little-endian form otherwise.
    pub(crate) fn emit_indexed(&mut self, short: OpCode, long: OpCode, index: usize) {
        if index <= u8::MAX as usize {
            self.emit_op(short);
            self.emit_byte(index as u8);
        } else {
            self.emit_op(long);
            self.emit_byte(index as u8);
            self.emit_byte((index >> 8) as u8);
            self.emit_byte((index >> 16) as u8);
        }
    }

    /// Adds to the constant pool, reporting overflow of the 24-bit operand
    /// space.
    pub(crate) fn make_constant(&mut self, value: Value) -> usize {
        let index = self.func().chunk.add_constant(value);
        if index > MAX_INDEX {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index
    }

    pub(crate) fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_indexed(OpCode::Const16, OpCode::Const32, index);
    }

    /// Interns an identifier and stores it in the constant pool (property
    /// names, method names, class names).
    pub(crate) fn identifier_constant(&mut self, name: &str) -> usize {
        let interned = self.intern(name.as_bytes());
        self.make_constant(Value::obj(interned))
    }

    /// Emits a forward jump with a placeholder operand; returns the
    /// operand's offset for [`Compiler::patch_jump`].
    pub(crate) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.func().chunk.code.len() - 2
    }

    pub(crate) fn patch_jump(&mut self, operand_offset: usize) {
        // Distance is measured from just past the 2-byte operand.
        let distance = self.func().chunk.code.len() - (operand_offset + 2);
        if distance > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let chunk = &mut self.func().chunk;
        chunk.code[operand_offset] = (distance >> 8) as u8;
        chunk.code[operand_offset + 1] = distance as u8;
    }

    /// Emits a backward jump to `start`.
    pub(crate) fn emit_loop(&mut self, start: usize) {
        self.emit_op(OpCode::Loop);
        // +2 covers the operand the VM reads before jumping back.
        let distance = self.func().chunk.code.len() - start + 2;
        if distance > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte((distance >> 8) as u8);
        self.emit_byte(distance as u8);
    }

    /// Implicit return: initializers hand back their receiver, everything
    /// else returns nil.
    pub(crate) fn emit_return(&mut self) {
        if self.func_ref().kind == FuncKind::Initializer {
            self.emit_op(OpCode::GetLocal16);
            self.emit_byte(0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    // ------------------------------------------------------------------
    // Stack-height tracking
    // ------------------------------------------------------------------

    pub(crate) fn adjust_stack(&mut self, delta: i32) {
        let func = self.func();
        if delta >= 0 {
            func.stack_height += delta as usize;
        } else {
            let drop = (-delta) as usize;
            debug_assert!(func.stack_height >= drop, "compile-time stack underflow");
            func.stack_height = func.stack_height.saturating_sub(drop);
        }
        func.max_stack = func.max_stack.max(func.stack_height);
    }

    /// Snapshot of the tracked height, for joining branch paths.
    pub(crate) fn stack_checkpoint(&self) -> usize {
        self.func_ref().stack_height
    }

    pub(crate) fn stack_restore(&mut self, height: usize) {
        self.func().stack_height = height;
    }

    fn stack_delta(op: OpCode) -> i32 {
        use OpCode::*;
        match op {
            Const16 | Const32 | True | False | Nil | Dup | GetGlobal16 | GetGlobal32
            | GetLocal16 | GetLocal32 | GetUpvalue16 | GetUpvalue32 | Class16 | Class32
            | Array | Table => 1,

            SetGlobal16 | SetGlobal32 | SetLocal16 | SetLocal32 | SetUpvalue16 | SetUpvalue32
            | Negate | Not | Jump | JumpIfFalse | Loop | Break | GetProperty16
            | GetProperty32 => 0,

            Pop | DefGlobal16 | DefGlobal32 | DefConst16 | DefConst32 | CloseUpvalue | Equal
            | Greater | GreaterEqual | Less | LessEqual | Add | Sub | Mul | Div | Mod | Print
            | Return | Method16 | Method32 | SetProperty16 | SetProperty32 | GetSuper16
            | GetSuper32 | PushToArray | GetSubscript | Inherit => -1,

            PushToTable | SetSubscript => -2,

            // Effect depends on the argument count / upvalue list; the
            // emission site adjusts explicitly.
            Call | Closure16 | Closure32 | Invoke16 | Invoke32 | SuperInvoke16
            | SuperInvoke32 => 0,
        }
    }

    // ------------------------------------------------------------------
    // Scopes and locals
    // ------------------------------------------------------------------

    pub(crate) fn begin_scope(&mut self) {
        self.func().scope_depth += 1;
    }

    pub(crate) fn end_scope(&mut self) {
        self.func().scope_depth -= 1;
        let depth = self.func_ref().scope_depth;
        while self
            .func_ref()
            .locals
            .last()
            .is_some_and(|local| local.depth > depth)
        {
            let captured = self
                .func()
                .locals
                .pop()
                .expect("local stack emptied during scope exit")
                .captured;
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    /// Emits pops for locals deeper than `depth` without forgetting them —
    /// used by `break`/`continue`, which leave the scope structure intact.
    pub(crate) fn discard_locals(&mut self, depth: i32) {
        // These pops sit on a diverging path; the tracked height must not
        // drift for the code that follows.
        let checkpoint = self.stack_checkpoint();
        let mut index = self.func_ref().locals.len();
        while index > 0 && self.func_ref().locals[index - 1].depth > depth {
            if self.func_ref().locals[index - 1].captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            index -= 1;
        }
        self.stack_restore(checkpoint);
    }

    /// Registers the just-parsed identifier as a local (no-op at the top
    /// level, where names live in the global store).
    pub(crate) fn declare_variable(&mut self, constant: bool) {
        if self.func_ref().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;

        let mut duplicate = false;
        let func = self.func_ref();
        for local in func.locals.iter().rev() {
            if local.depth != -1 && local.depth < func.scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name, constant);
    }

    fn add_local(&mut self, name: &'src str, constant: bool) {
        if self.func_ref().locals.len() > MAX_INDEX {
            self.error("Too many local variables in function.");
            return;
        }
        self.func().locals.push(Local {
            name,
            depth: -1,
            captured: false,
            constant,
        });
    }

    /// Marks the newest local initialised (its declaring expression is
    /// done, so it may now be read).
    pub(crate) fn mark_initialized(&mut self) {
        let func = self.func();
        if func.scope_depth == 0 {
            return;
        }
        let depth = func.scope_depth;
        if let Some(local) = func.locals.last_mut() {
            local.depth = depth;
        }
    }

    /// Resolves `name` among function `fi`'s locals; newest shadowing
    /// oldest.
    pub(crate) fn resolve_local(&mut self, fi: usize, name: &str) -> Option<usize> {
        let mut found = None;
        for (slot, local) in self.funcs[fi].locals.iter().enumerate().rev() {
            if local.name == name {
                found = Some((slot, local.depth == -1));
                break;
            }
        }
        let (slot, uninitialized) = found?;
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(slot)
    }

    /// Whether local `slot` of function `fi` was declared `const`.
    pub(crate) fn local_is_constant(&self, fi: usize, slot: usize) -> bool {
        self.funcs[fi].locals[slot].constant
    }

    pub(crate) fn current_func_index(&self) -> usize {
        self.funcs.len() - 1
    }

    pub(crate) fn scope_depth(&self) -> i32 {
        self.func_ref().scope_depth
    }

    pub(crate) fn chunk_len(&self) -> usize {
        self.func_ref().chunk.code.len()
    }

    pub(crate) fn func_kind(&self) -> FuncKind {
        self.func_ref().kind
    }

    pub(crate) fn push_loop(&mut self, state: LoopState) {
        self.func().loops.push(state);
    }

    pub(crate) fn pop_loop(&mut self) {
        self.func().loops.pop();
    }

    pub(crate) fn current_loop(&self) -> Option<LoopState> {
        self.func_ref().loops.last().copied()
    }

    /// Adds a local the parser never saw (`super` in subclass scopes).
    pub(crate) fn add_synthetic_local(&mut self, name: &'src str) {
        self.add_local(name, false);
    }

    /// Resolves `name` as an upvalue of function `fi`, capturing through
    /// the enclosing chain as needed.
    pub(crate) fn resolve_upvalue(&mut self, fi: usize, name: &str) -> Option<usize> {
        if fi == 0 {
            return None;
        }

        if let Some(local) = self.resolve_local(fi - 1, name) {
            self.funcs[fi - 1].locals[local].captured = true;
            return Some(self.add_upvalue(fi, local as u32, true));
        }

        if let Some(upvalue) = self.resolve_upvalue(fi - 1, name) {
            return Some(self.add_upvalue(fi, upvalue as u32, false));
        }

        None
    }

    fn add_upvalue(&mut self, fi: usize, index: u32, is_local: bool) -> usize {
        for (i, upvalue) in self.funcs[fi].upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return i;
            }
        }
        if self.funcs[fi].upvalues.len() > MAX_INDEX {
            self.error("Too many captured variables in function.");
            return 0;
        }
        self.funcs[fi].upvalues.push(UpvalueDesc { index, is_local });
        self.funcs[fi].upvalues.len() - 1
    }

    /// Slot index in the global store for `name`, allocating on first
    /// sight.
    pub(crate) fn global_index(&mut self, name: &str) -> usize {
        let interned = self.intern(name.as_bytes());
        let index = self.globals.slot_index(self.heap, interned);
        if index > MAX_INDEX {
            self.error("Too many global variables.");
            return 0;
        }
        index
    }

    // ------------------------------------------------------------------
    // Function assembly
    // ------------------------------------------------------------------

    /// Opens a nested function body.
    pub(crate) fn push_func(&mut self, kind: FuncKind, name: &str) {
        let name = self.intern(name.as_bytes());
        self.funcs.push(FuncState::new(kind, Some(name)));
    }

    pub(crate) fn set_arity(&mut self, arity: u8) {
        self.func().arity = arity;
    }

    pub(crate) fn arity(&self) -> u8 {
        self.func_ref().arity
    }

    /// Seals the innermost function: emits the implicit return and builds
    /// the immutable function object. Returns the object and its upvalue
    /// descriptors (the enclosing function emits those after its `closure`
    /// instruction).
    pub(crate) fn finish_func(&mut self) -> (ObjRef, Vec<UpvalueDesc>) {
        self.emit_return();

        // Collect *before* popping the state: the chunk's constants are
        // only rooted while the function is still on the compile stack.
        if self.heap.should_collect() {
            self.collect_garbage();
        }

        let func = self
            .funcs
            .pop()
            .expect("compiler function stack is empty");
        let upvalues = func.upvalues;
        let function = self.heap.alloc(ObjKind::Function(FunctionObj {
            arity: func.arity,
            upvalue_count: upvalues.len(),
            name: func.name,
            chunk: func.chunk,
            max_stack: func.max_stack,
        }));
        (function, upvalues)
    }

    /// Seals the top-level script.
    fn end_func(&mut self) -> ObjRef {
        let (function, _) = self.finish_func();
        function
    }

    // ------------------------------------------------------------------
    // Break patching
    // ------------------------------------------------------------------

    /// Rewrites every `break` placeholder emitted since `from` into a
    /// `jump` to the current position. Walks whole instructions (operand
    /// strides), so operand bytes can never be mistaken for opcodes.
    pub(crate) fn patch_breaks(&mut self, from: usize) {
        let exit = self.func_ref().chunk.code.len();
        let mut offset = from;
        while offset < exit {
            let byte = self.func_ref().chunk.code[offset];
            let op = OpCode::try_from(byte)
                .unwrap_or_else(|_| panic!("undecodable opcode {byte:#04x} during break patch"));

            if op == OpCode::Break {
                let distance = exit - (offset + 3);
                if distance > u16::MAX as usize {
                    self.error("Too much code to jump over.");
                }
                let chunk = &mut self.func().chunk;
                chunk.code[offset] = OpCode::Jump as u8;
                chunk.code[offset + 1] = (distance >> 8) as u8;
                chunk.code[offset + 2] = distance as u8;
                offset += 3;
                continue;
            }

            offset += 1 + self.instruction_operand_len(op, offset + 1);
        }
    }

    /// Operand length of the instruction at hand; closures need the
    /// closed-over function's upvalue count from the constant pool.
    fn instruction_operand_len(&self, op: OpCode, operand_offset: usize) -> usize {
        if let Some(len) = op.fixed_operand_len() {
            return len;
        }
        let chunk = &self.func_ref().chunk;
        let (index, index_len) = match op {
            OpCode::Closure16 => (chunk.code[operand_offset] as usize, 1),
            OpCode::Closure32 => {
                let bytes = &chunk.code[operand_offset..operand_offset + 3];
                (
                    bytes[0] as usize | (bytes[1] as usize) << 8 | (bytes[2] as usize) << 16,
                    3,
                )
            }
            _ => unreachable!("fixed_operand_len covers every other opcode"),
        };
        let function = chunk.constants[index]
            .as_obj()
            .expect("closure operand is not an object constant");
        let count = match &self.heap.obj(function).kind {
            ObjKind::Function(f) => f.upvalue_count,
            other => panic!("closure operand is a {}", other.type_name()),
        };
        // Each upvalue descriptor: is-local byte + 24-bit index.
        index_len + count * 4
    }
}
