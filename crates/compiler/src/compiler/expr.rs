//! Expression parsing: the Pratt precedence climb and its rule table.
//!
//! Every token kind maps to an optional prefix handler, an optional infix
//! handler, and an infix binding power. `parse_precedence` advances, runs
//! the prefix rule of the token it just consumed, then folds infix rules
//! while their precedence is at least the requested one. Assignment is
//! validated by the `can_assign` flag threaded through the handlers: only
//! positions parsed at assignment precedence may write.

use rill_core::{OpCode, Value};

use super::{Compiler, Precedence};
use crate::scanner::TokenKind;

pub(crate) type ParseFn<'src, 'ctx> = fn(&mut Compiler<'src, 'ctx>, bool);

pub(crate) struct ParseRule<'src, 'ctx> {
    pub prefix: Option<ParseFn<'src, 'ctx>>,
    pub infix: Option<ParseFn<'src, 'ctx>>,
    pub precedence: Precedence,
}

impl<'src, 'ctx> ParseRule<'src, 'ctx> {
    fn new(
        prefix: Option<ParseFn<'src, 'ctx>>,
        infix: Option<ParseFn<'src, 'ctx>>,
        precedence: Precedence,
    ) -> ParseRule<'src, 'ctx> {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
}

pub(crate) fn rule<'src, 'ctx>(kind: TokenKind) -> ParseRule<'src, 'ctx> {
    use Precedence as P;
    use TokenKind::*;

    match kind {
        LParen => ParseRule::new(Some(grouping), Some(call), P::Call),
        LBracket => ParseRule::new(Some(array_literal), Some(subscript), P::Call),
        Hash => ParseRule::new(Some(table_literal), None, P::None),
        Dot => ParseRule::new(None, Some(dot), P::Call),
        Question => ParseRule::new(None, Some(ternary), P::Conditional),

        Minus => ParseRule::new(Some(unary), Some(binary), P::Term),
        Plus => ParseRule::new(None, Some(binary), P::Term),
        Star | Slash | Percent => ParseRule::new(None, Some(binary), P::Factor),
        Bang => ParseRule::new(Some(unary), None, P::None),

        BangEqual | EqualEqual => ParseRule::new(None, Some(binary), P::Equality),
        Less | LessEqual | Greater | GreaterEqual => {
            ParseRule::new(None, Some(binary), P::Comparison)
        }

        Identifier => ParseRule::new(Some(variable), None, P::None),
        String => ParseRule::new(Some(string), None, P::None),
        Number => ParseRule::new(Some(number), None, P::None),
        True | False | Nil => ParseRule::new(Some(literal), None, P::None),

        And => ParseRule::new(None, Some(and_), P::And),
        Or => ParseRule::new(None, Some(or_), P::Or),

        This => ParseRule::new(Some(this_), None, P::None),
        Super => ParseRule::new(Some(super_), None, P::None),

        _ => ParseRule::new(None, None, P::None),
    }
}

pub(crate) fn expression(c: &mut Compiler) {
    parse_precedence(c, Precedence::Assignment);
}

pub(crate) fn parse_precedence(c: &mut Compiler, precedence: Precedence) {
    c.advance();
    let Some(prefix) = rule(c.previous.kind).prefix else {
        c.error("Expect expression.");
        return;
    };

    let can_assign = precedence <= Precedence::Assignment;
    prefix(c, can_assign);

    while precedence <= rule(c.current.kind).precedence {
        c.advance();
        let infix = rule(c.previous.kind)
            .infix
            .expect("token advertises an infix precedence but has no infix rule");
        infix(c, can_assign);
    }

    if can_assign && c.match_kind(TokenKind::Equal) {
        c.error("Invalid assignment target.");
    }
}

fn grouping(c: &mut Compiler, _can_assign: bool) {
    expression(c);
    c.consume(TokenKind::RParen, "Expect ')' after expression.");
}

fn number(c: &mut Compiler, _can_assign: bool) {
    match c.previous.lexeme.parse::<f64>() {
        Ok(n) => c.emit_constant(Value::number(n)),
        Err(_) => c.error("Invalid number literal."),
    }
}

fn string(c: &mut Compiler, _can_assign: bool) {
    let lexeme = c.previous.lexeme;
    // Strip the surrounding quotes; there are no escape sequences.
    let interned = c.intern(lexeme[1..lexeme.len() - 1].as_bytes());
    c.emit_constant(Value::obj(interned));
}

fn literal(c: &mut Compiler, _can_assign: bool) {
    match c.previous.kind {
        TokenKind::True => c.emit_op(OpCode::True),
        TokenKind::False => c.emit_op(OpCode::False),
        TokenKind::Nil => c.emit_op(OpCode::Nil),
        _ => unreachable!("literal rule on a non-literal token"),
    }
}

fn variable(c: &mut Compiler, can_assign: bool) {
    let name = c.previous.lexeme;
    named_variable(c, name, can_assign);
}

/// Resolves a name (local, then upvalue, then global) and emits the get —
/// or the set, when an `=` follows in an assignable position.
pub(crate) fn named_variable(c: &mut Compiler, name: &str, can_assign: bool) {
    let fi = c.current_func_index();

    if let Some(slot) = c.resolve_local(fi, name) {
        if can_assign && c.match_kind(TokenKind::Equal) {
            if c.local_is_constant(fi, slot) {
                c.error("Can't assign to a constant.");
            }
            expression(c);
            c.emit_indexed(OpCode::SetLocal16, OpCode::SetLocal32, slot);
        } else {
            c.emit_indexed(OpCode::GetLocal16, OpCode::GetLocal32, slot);
        }
        return;
    }

    if let Some(index) = c.resolve_upvalue(fi, name) {
        if can_assign && c.match_kind(TokenKind::Equal) {
            expression(c);
            c.emit_indexed(OpCode::SetUpvalue16, OpCode::SetUpvalue32, index);
        } else {
            c.emit_indexed(OpCode::GetUpvalue16, OpCode::GetUpvalue32, index);
        }
        return;
    }

    let index = c.global_index(name);
    if can_assign && c.match_kind(TokenKind::Equal) {
        expression(c);
        c.emit_indexed(OpCode::SetGlobal16, OpCode::SetGlobal32, index);
    } else {
        c.emit_indexed(OpCode::GetGlobal16, OpCode::GetGlobal32, index);
    }
}

fn unary(c: &mut Compiler, _can_assign: bool) {
    let operator = c.previous.kind;
    parse_precedence(c, Precedence::Unary);
    match operator {
        TokenKind::Minus => c.emit_op(OpCode::Negate),
        TokenKind::Bang => c.emit_op(OpCode::Not),
        _ => unreachable!("unary rule on a non-unary token"),
    }
}

fn binary(c: &mut Compiler, _can_assign: bool) {
    let operator = c.previous.kind;
    let next = rule(operator).precedence.next();
    parse_precedence(c, next);

    match operator {
        TokenKind::Plus => c.emit_op(OpCode::Add),
        TokenKind::Minus => c.emit_op(OpCode::Sub),
        TokenKind::Star => c.emit_op(OpCode::Mul),
        TokenKind::Slash => c.emit_op(OpCode::Div),
        TokenKind::Percent => c.emit_op(OpCode::Mod),
        TokenKind::EqualEqual => c.emit_op(OpCode::Equal),
        TokenKind::BangEqual => {
            c.emit_op(OpCode::Equal);
            c.emit_op(OpCode::Not);
        }
        TokenKind::Greater => c.emit_op(OpCode::Greater),
        TokenKind::GreaterEqual => c.emit_op(OpCode::GreaterEqual),
        TokenKind::Less => c.emit_op(OpCode::Less),
        TokenKind::LessEqual => c.emit_op(OpCode::LessEqual),
        _ => unreachable!("binary rule on a non-binary token"),
    }
}

/// Short-circuit `and`: skip the right operand when the left is falsy.
fn and_(c: &mut Compiler, _can_assign: bool) {
    let end_jump = c.emit_jump(OpCode::JumpIfFalse);
    c.emit_op(OpCode::Pop);
    parse_precedence(c, Precedence::And);
    c.patch_jump(end_jump);
}

/// Short-circuit `or`: keep the left operand when it is truthy.
fn or_(c: &mut Compiler, _can_assign: bool) {
    let else_jump = c.emit_jump(OpCode::JumpIfFalse);
    let end_jump = c.emit_jump(OpCode::Jump);
    c.patch_jump(else_jump);
    c.emit_op(OpCode::Pop);
    parse_precedence(c, Precedence::Or);
    c.patch_jump(end_jump);
}

/// `cond ? then : else`, right-associative in the else branch.
fn ternary(c: &mut Compiler, _can_assign: bool) {
    let entry_height = c.stack_checkpoint();

    let then_jump = c.emit_jump(OpCode::JumpIfFalse);
    c.emit_op(OpCode::Pop);
    expression(c);
    c.consume(TokenKind::Colon, "Expect ':' in conditional expression.");

    let end_jump = c.emit_jump(OpCode::Jump);
    c.patch_jump(then_jump);

    // The false path still holds the condition.
    c.stack_restore(entry_height);
    c.emit_op(OpCode::Pop);
    parse_precedence(c, Precedence::Conditional);
    c.patch_jump(end_jump);
}

fn call(c: &mut Compiler, _can_assign: bool) {
    let argc = argument_list(c);
    c.emit_op(OpCode::Call);
    c.emit_byte(argc);
    // Pops the arguments and the callee, pushes the result.
    c.adjust_stack(-i32::from(argc));
}

/// `expr.name`, `expr.name = value`, or the combined `expr.name(args)`
/// invoke form.
fn dot(c: &mut Compiler, can_assign: bool) {
    c.consume(TokenKind::Identifier, "Expect property name after '.'.");
    let name = c.previous.lexeme.to_string();
    let index = c.identifier_constant(&name);

    if can_assign && c.match_kind(TokenKind::Equal) {
        expression(c);
        c.emit_indexed(OpCode::SetProperty16, OpCode::SetProperty32, index);
    } else if c.match_kind(TokenKind::LParen) {
        let argc = argument_list(c);
        c.emit_indexed(OpCode::Invoke16, OpCode::Invoke32, index);
        c.emit_byte(argc);
        c.adjust_stack(-i32::from(argc));
    } else {
        c.emit_indexed(OpCode::GetProperty16, OpCode::GetProperty32, index);
    }
}

/// `expr[index]` get or set.
fn subscript(c: &mut Compiler, can_assign: bool) {
    expression(c);
    c.consume(TokenKind::RBracket, "Expect ']' after subscript.");
    if can_assign && c.match_kind(TokenKind::Equal) {
        expression(c);
        c.emit_op(OpCode::SetSubscript);
    } else {
        c.emit_op(OpCode::GetSubscript);
    }
}

/// `[e1, e2, ...]` — empty array, then one push per element.
fn array_literal(c: &mut Compiler, _can_assign: bool) {
    c.emit_op(OpCode::Array);
    if !c.check(TokenKind::RBracket) {
        loop {
            expression(c);
            c.emit_op(OpCode::PushToArray);
            if !c.match_kind(TokenKind::Comma) {
                break;
            }
            // Trailing comma.
            if c.check(TokenKind::RBracket) {
                break;
            }
        }
    }
    c.consume(TokenKind::RBracket, "Expect ']' after array elements.");
}

/// `#{ key: value, ... }` — empty table, then one push per pair. Keys are
/// expressions; the VM requires them to evaluate to strings.
fn table_literal(c: &mut Compiler, _can_assign: bool) {
    c.consume(TokenKind::LBrace, "Expect '{' after '#'.");
    c.emit_op(OpCode::Table);
    if !c.check(TokenKind::RBrace) {
        loop {
            expression(c);
            c.consume(TokenKind::Colon, "Expect ':' after table key.");
            expression(c);
            c.emit_op(OpCode::PushToTable);
            if !c.match_kind(TokenKind::Comma) {
                break;
            }
            if c.check(TokenKind::RBrace) {
                break;
            }
        }
    }
    c.consume(TokenKind::RBrace, "Expect '}' after table entries.");
}

fn this_(c: &mut Compiler, _can_assign: bool) {
    if !c.in_class() {
        c.error("Can't use 'this' outside of a class.");
        return;
    }
    named_variable(c, "this", false);
}

/// `super.name` access or `super.name(args)` invocation, compiled against
/// the lexically enclosing superclass.
fn super_(c: &mut Compiler, _can_assign: bool) {
    if !c.in_class() {
        c.error("Can't use 'super' outside of a class.");
    } else if !c.class_has_superclass() {
        c.error("Can't use 'super' in a class with no superclass.");
    }

    c.consume(TokenKind::Dot, "Expect '.' after 'super'.");
    c.consume(TokenKind::Identifier, "Expect superclass method name.");
    let name = c.previous.lexeme.to_string();
    let index = c.identifier_constant(&name);

    named_variable(c, "this", false);
    if c.match_kind(TokenKind::LParen) {
        let argc = argument_list(c);
        named_variable(c, "super", false);
        c.emit_indexed(OpCode::SuperInvoke16, OpCode::SuperInvoke32, index);
        c.emit_byte(argc);
        // Pops receiver, arguments, and superclass; pushes the result.
        c.adjust_stack(-(i32::from(argc) + 1));
    } else {
        named_variable(c, "super", false);
        c.emit_indexed(OpCode::GetSuper16, OpCode::GetSuper32, index);
    }
}

fn argument_list(c: &mut Compiler) -> u8 {
    let mut argc: usize = 0;
    if !c.check(TokenKind::RParen) {
        loop {
            expression(c);
            if argc == u8::MAX as usize {
                c.error("Can't have more than 255 arguments.");
            } else {
                argc += 1;
            }
            if !c.match_kind(TokenKind::Comma) {
                break;
            }
        }
    }
    c.consume(TokenKind::RParen, "Expect ')' after arguments.");
    argc as u8
}
