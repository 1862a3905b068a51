//! Statement and declaration parsing.
//!
//! Recursive descent over the statement grammar, emitting straight into
//! the current chunk. Forward control flow uses placeholder jump operands
//! patched once the target is known; `break` gets its own placeholder
//! opcode that [`Compiler::patch_breaks`] rewrites after the loop body.

use rill_core::{OpCode, Value};

use super::expr::{expression, named_variable};
use super::{Compiler, FuncKind, LoopState};
use crate::scanner::TokenKind;

/// `switch` dispatches by repeated equality tests; more than this many
/// arms almost certainly means generated code, and the original format
/// capped it.
const MAX_SWITCH_CASES: usize = 256;

impl<'src, 'ctx> Compiler<'src, 'ctx> {
    pub(crate) fn declaration(&mut self) {
        if self.match_kind(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_kind(TokenKind::Func) {
            self.func_declaration();
        } else if self.match_kind(TokenKind::Let) {
            self.let_declaration(false);
        } else if self.match_kind(TokenKind::Const) {
            self.let_declaration(true);
        } else {
            self.statement();
        }

        if self.panicked {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_kind(TokenKind::Print) {
            self.print_statement();
        } else if self.match_kind(TokenKind::If) {
            self.if_statement();
        } else if self.match_kind(TokenKind::While) {
            self.while_statement();
        } else if self.match_kind(TokenKind::For) {
            self.for_statement();
        } else if self.match_kind(TokenKind::Switch) {
            self.switch_statement();
        } else if self.match_kind(TokenKind::Return) {
            self.return_statement();
        } else if self.match_kind(TokenKind::Break) {
            self.break_statement();
        } else if self.match_kind(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_kind(TokenKind::LBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        expression(self);
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        expression(self);
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    // ------------------------------------------------------------------
    // Variable declarations
    // ------------------------------------------------------------------

    /// Handles both `let` and `const`; constants require an initializer.
    fn let_declaration(&mut self, constant: bool) {
        let global = self.parse_variable("Expect variable name.", constant);

        if self.match_kind(TokenKind::Equal) {
            expression(self);
        } else {
            if constant {
                self.error("Expect initializer in constant declaration.");
            }
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global, constant);
    }

    /// Consumes an identifier; registers it as a local at inner scopes or
    /// returns its global slot index at the top level.
    fn parse_variable(&mut self, message: &str, constant: bool) -> usize {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable(constant);
        if self.scope_depth() > 0 {
            return 0;
        }
        let name = self.previous.lexeme;
        self.global_index(name)
    }

    /// Finishes a declaration: inner scopes just mark the local live (its
    /// value already sits in the right stack slot); the top level pops
    /// into the global slot.
    fn define_variable(&mut self, global: usize, constant: bool) {
        if self.scope_depth() > 0 {
            self.mark_initialized();
            return;
        }
        if constant {
            self.emit_indexed(OpCode::DefConst16, OpCode::DefConst32, global);
        } else {
            self.emit_indexed(OpCode::DefGlobal16, OpCode::DefGlobal32, global);
        }
    }

    // ------------------------------------------------------------------
    // Functions and classes
    // ------------------------------------------------------------------

    fn func_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.", false);
        let name = self.previous.lexeme;
        // Initialised before the body compiles so the function can recurse.
        self.mark_initialized();
        self.function(FuncKind::Function, name);
        self.define_variable(global, false);
    }

    /// Compiles a function body into a fresh compiler state, then emits
    /// the `closure` instruction (plus upvalue descriptors) in the
    /// enclosing chunk.
    fn function(&mut self, kind: FuncKind, name: &str) {
        self.push_func(kind, name);
        self.begin_scope();

        self.consume(TokenKind::LParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RParen) {
            loop {
                if self.arity() == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    let arity = self.arity() + 1;
                    self.set_arity(arity);
                }
                self.parse_variable("Expect parameter name.", false);
                self.mark_initialized();
                // The caller pushes each argument; it occupies a stack
                // slot of this frame.
                self.adjust_stack(1);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.finish_func();
        let index = self.make_constant(Value::obj(function));
        self.emit_indexed(OpCode::Closure16, OpCode::Closure32, index);
        self.adjust_stack(1);
        for upvalue in upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_byte(upvalue.index as u8);
            self.emit_byte((upvalue.index >> 8) as u8);
            self.emit_byte((upvalue.index >> 16) as u8);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_index = self.identifier_constant(class_name);
        self.declare_variable(false);

        self.emit_indexed(OpCode::Class16, OpCode::Class32, name_index);
        let global = if self.scope_depth() == 0 {
            self.global_index(class_name)
        } else {
            0
        };
        self.define_variable(global, false);

        self.begin_class(class_name);

        if self.match_kind(TokenKind::Colon) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let superclass_name = self.previous.lexeme;
            if superclass_name == class_name {
                self.error("A class can't inherit from itself.");
            }
            named_variable(self, superclass_name, false);

            // The superclass value stays on the stack as a scoped local
            // named "super"; `super` expressions in methods capture it.
            self.begin_scope();
            self.add_synthetic_local("super");
            self.mark_initialized();

            named_variable(self, class_name, false);
            self.emit_op(OpCode::Inherit);
            self.set_class_superclass();
        }

        named_variable(self, class_name, false);
        self.consume(TokenKind::LBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if self.class_has_superclass() {
            self.end_scope();
        }
        self.end_class();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let index = self.identifier_constant(name);

        let kind = if name == self.class_name() {
            FuncKind::Initializer
        } else {
            FuncKind::Method
        };
        self.function(kind, name);
        self.emit_indexed(OpCode::Method16, OpCode::Method32, index);
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    fn if_statement(&mut self) {
        self.consume(TokenKind::LParen, "Expect '(' after 'if'.");
        expression(self);
        self.consume(TokenKind::RParen, "Expect ')' after condition.");

        let entry_height = self.stack_checkpoint();
        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        // The skipped path still holds the condition.
        self.stack_restore(entry_height);
        self.emit_op(OpCode::Pop);
        if self.match_kind(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_len();
        let scope_depth = self.scope_depth();
        self.push_loop(LoopState {
            start: loop_start,
            scope_depth,
        });

        self.consume(TokenKind::LParen, "Expect '(' after 'while'.");
        expression(self);
        self.consume(TokenKind::RParen, "Expect ')' after condition.");

        let entry_height = self.stack_checkpoint();
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.stack_restore(entry_height);
        self.emit_op(OpCode::Pop);

        self.pop_loop();
        self.patch_breaks(loop_start);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LParen, "Expect '(' after 'for'.");

        if self.match_kind(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_kind(TokenKind::Let) {
            self.let_declaration(false);
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_len();
        let mut exit_jump = None;
        let mut exit_height = 0;
        if !self.match_kind(TokenKind::Semicolon) {
            expression(self);
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_height = self.stack_checkpoint();
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_kind(TokenKind::RParen) {
            // The increment textually precedes the body but runs after it:
            // jump over it now, loop back to it from the body's end.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk_len();
            expression(self);
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        let scope_depth = self.scope_depth();
        self.push_loop(LoopState {
            start: loop_start,
            scope_depth,
        });
        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.stack_restore(exit_height);
            self.emit_op(OpCode::Pop);
        }

        self.pop_loop();
        self.patch_breaks(loop_start);
        self.end_scope();
    }

    /// `switch (e) { case v: ... default: ... }` — each arm compares by
    /// equality against a duplicate of the subject and ends with an
    /// implicit break; there is no fallthrough.
    fn switch_statement(&mut self) {
        self.consume(TokenKind::LParen, "Expect '(' after 'switch'.");
        expression(self);
        self.consume(TokenKind::RParen, "Expect ')' after switch value.");
        self.consume(TokenKind::LBrace, "Expect '{' before switch cases.");

        // The subject occupies a stack slot for the whole statement.
        // Registering it as a nameless local means `break` inside a case
        // (which discards locals down to the loop's depth) pops it too.
        self.begin_scope();
        self.add_synthetic_local("");
        self.mark_initialized();

        let subject_height = self.stack_checkpoint();
        let mut exit_jumps = Vec::new();
        let mut case_count = 0usize;
        let mut seen_default = false;

        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            if self.match_kind(TokenKind::Case) {
                if seen_default {
                    self.error("Can't have a case after 'default'.");
                }
                if case_count == MAX_SWITCH_CASES {
                    self.error("Too many cases in switch statement.");
                }
                case_count += 1;

                self.emit_op(OpCode::Dup);
                expression(self);
                self.consume(TokenKind::Colon, "Expect ':' after case value.");
                self.emit_op(OpCode::Equal);
                let next_case = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);

                self.case_body();
                exit_jumps.push(self.emit_jump(OpCode::Jump));

                self.patch_jump(next_case);
                // The mismatch path still holds the comparison result.
                self.stack_restore(subject_height + 1);
                self.emit_op(OpCode::Pop);
            } else if self.match_kind(TokenKind::Default) {
                self.consume(TokenKind::Colon, "Expect ':' after 'default'.");
                seen_default = true;
                self.case_body();
                exit_jumps.push(self.emit_jump(OpCode::Jump));
            } else {
                self.error_at_current("Expect 'case' or 'default' in switch body.");
                self.advance();
            }
        }
        self.consume(TokenKind::RBrace, "Expect '}' after switch cases.");

        for jump in exit_jumps {
            self.patch_jump(jump);
        }
        self.stack_restore(subject_height);
        // Pops the subject slot.
        self.end_scope();
    }

    fn case_body(&mut self) {
        while !self.check(TokenKind::Case)
            && !self.check(TokenKind::Default)
            && !self.check(TokenKind::RBrace)
            && !self.check(TokenKind::Eof)
        {
            self.statement();
        }
    }

    fn return_statement(&mut self) {
        if self.func_kind() == FuncKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_kind(TokenKind::Semicolon) {
            self.emit_return();
            return;
        }

        if self.func_kind() == FuncKind::Initializer {
            self.error("Can't return a value from an initializer.");
        }
        expression(self);
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        self.emit_op(OpCode::Return);
    }

    fn break_statement(&mut self) {
        let Some(loop_state) = self.current_loop() else {
            self.error("Can't use 'break' outside of a loop.");
            self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
            return;
        };
        self.discard_locals(loop_state.scope_depth);
        self.emit_jump(OpCode::Break);
        self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
    }

    fn continue_statement(&mut self) {
        let Some(loop_state) = self.current_loop() else {
            self.error("Can't use 'continue' outside of a loop.");
            self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
            return;
        };
        self.discard_locals(loop_state.scope_depth);
        self.emit_loop(loop_state.start);
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
    }
}

#[cfg(test)]
mod tests {
    use super::super::compile;
    use rill_core::{Globals, Heap, ObjKind, OpCode};

    fn compile_ok(source: &str) -> (Heap, rill_core::ObjRef) {
        let mut heap = Heap::new();
        let mut globals = Globals::new();
        let function = compile(source, &mut heap, &mut globals)
            .unwrap_or_else(|diags| panic!("compile failed: {:?}", diags));
        (heap, function)
    }

    fn compile_err(source: &str) -> Vec<String> {
        let mut heap = Heap::new();
        let mut globals = Globals::new();
        match compile(source, &mut heap, &mut globals) {
            Ok(_) => panic!("expected compile error for {source:?}"),
            Err(diags) => diags.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn script_code(heap: &Heap, function: rill_core::ObjRef) -> Vec<u8> {
        match &heap.obj(function).kind {
            ObjKind::Function(f) => f.chunk.code.clone(),
            _ => panic!("script is not a function"),
        }
    }

    #[test]
    fn test_arithmetic_respects_precedence() {
        let (heap, f) = compile_ok("print 1 + 2 * 3;");
        let code = script_code(&heap, f);
        // const 1, const 2, const 3, mul, add, print, nil, return
        assert_eq!(
            code,
            vec![
                OpCode::Const16 as u8,
                0,
                OpCode::Const16 as u8,
                1,
                OpCode::Const16 as u8,
                2,
                OpCode::Mul as u8,
                OpCode::Add as u8,
                OpCode::Print as u8,
                OpCode::Nil as u8,
                OpCode::Return as u8,
            ]
        );
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let source = "func f(n) { if (n < 2) return n; return f(n - 1) + f(n - 2); } print f(10);";
        let (heap_a, fa) = compile_ok(source);
        let (heap_b, fb) = compile_ok(source);
        assert_eq!(script_code(&heap_a, fa), script_code(&heap_b, fb));
    }

    #[test]
    fn test_string_literals_intern_to_one_object() {
        let (heap, f) = compile_ok("let a = \"dup\"; let b = \"dup\";");
        let constants = match &heap.obj(f).kind {
            ObjKind::Function(func) => func.chunk.constants.clone(),
            _ => unreachable!(),
        };
        let strings: Vec<_> = constants.iter().filter_map(|v| v.as_obj()).collect();
        assert_eq!(strings.len(), 2);
        assert_eq!(strings[0], strings[1]);
    }

    #[test]
    fn test_break_placeholders_are_rewritten() {
        let (heap, f) = compile_ok("while (true) { break; }");
        let code = script_code(&heap, f);
        assert!(!code.contains(&(OpCode::Break as u8)));
        assert!(code.contains(&(OpCode::Jump as u8)));
    }

    #[test]
    fn test_max_stack_covers_nesting() {
        let (heap, f) = compile_ok("print 1 + (2 + (3 + (4 + 5)));");
        let max_stack = match &heap.obj(f).kind {
            ObjKind::Function(func) => func.max_stack,
            _ => unreachable!(),
        };
        // Slot 0 plus five operands in flight.
        assert!(max_stack >= 6, "max_stack = {max_stack}");
    }

    #[test]
    fn test_duplicate_local_is_an_error() {
        let errors = compile_err("{ let a = 1; let a = 2; }");
        assert!(errors[0].contains("Already a variable with this name"));
    }

    #[test]
    fn test_reading_local_in_its_own_initializer() {
        let errors = compile_err("{ let a = 1; { let a = a; } }");
        assert!(errors[0].contains("own initializer"));
    }

    #[test]
    fn test_const_requires_initializer() {
        let errors = compile_err("const k;");
        assert!(errors[0].contains("initializer"));
    }

    #[test]
    fn test_const_local_assignment_rejected() {
        let errors = compile_err("{ const k = 1; k = 2; }");
        assert!(errors[0].contains("constant"));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let errors = compile_err("1 + 2 = 3;");
        assert!(errors[0].contains("Invalid assignment target"));
    }

    #[test]
    fn test_multiple_errors_across_statements() {
        let errors = compile_err("let 1;\nprint;\n");
        assert!(errors.len() >= 2, "errors: {errors:?}");
    }

    #[test]
    fn test_break_outside_loop() {
        let errors = compile_err("break;");
        assert!(errors[0].contains("outside of a loop"));
    }

    #[test]
    fn test_this_outside_class() {
        let errors = compile_err("print this;");
        assert!(errors[0].contains("outside of a class"));
    }

    #[test]
    fn test_return_at_top_level() {
        let errors = compile_err("return 1;");
        assert!(errors[0].contains("top-level"));
    }

    #[test]
    fn test_closure_upvalue_descriptors() {
        let (heap, f) = compile_ok(
            "func make(n) { func inner() { return n; } return inner; } let f = make(42);",
        );
        // `make` is a constant of the script; `inner` a constant of `make`.
        let make = match &heap.obj(f).kind {
            ObjKind::Function(script) => script
                .chunk
                .constants
                .iter()
                .filter_map(|v| v.as_obj())
                .find(|r| matches!(heap.obj(*r).kind, ObjKind::Function(_)))
                .expect("make not found"),
            _ => unreachable!(),
        };
        let inner = match &heap.obj(make).kind {
            ObjKind::Function(make_fn) => make_fn
                .chunk
                .constants
                .iter()
                .filter_map(|v| v.as_obj())
                .find(|r| matches!(heap.obj(*r).kind, ObjKind::Function(_)))
                .expect("inner not found"),
            _ => unreachable!(),
        };
        match &heap.obj(inner).kind {
            ObjKind::Function(inner_fn) => assert_eq!(inner_fn.upvalue_count, 1),
            _ => unreachable!(),
        }
    }
}
