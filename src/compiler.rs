use std::collections::HashMap;

use once_cell::sync::Lazy;
use strum_macros::FromRepr;

use crate::chunk::{Chunk, ChunkId, OpAssign, OpCode};
use crate::errors::CompileError;
use crate::scanner::{Scanner, Token, TokenType, TOKEN_COUNT};
use crate::state::Interp;
use crate::value::Value;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, FromRepr)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // ==
    Comparison, // < > <= >= !=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! not -
    Call,       // . () []
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        Precedence::from_repr(self as u8 + 1).unwrap_or(Precedence::Primary)
    }
}

type ParseFn = fn(&mut Parser<'_>);

#[derive(Clone, Copy)]
struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

impl ParseRule {
    const fn new(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> Self {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
}

static RULES: Lazy<[ParseRule; TOKEN_COUNT]> = Lazy::new(|| {
    use TokenType::*;
    let mut rules = [ParseRule::new(None, None, Precedence::None); TOKEN_COUNT];
    rules[LeftParen as usize] = ParseRule::new(Some(grouping), Some(call), Precedence::Call);
    rules[LeftBrace as usize] = ParseRule::new(Some(table_literal), None, Precedence::None);
    rules[LeftBracket as usize] = ParseRule::new(Some(array_literal), Some(index), Precedence::Call);
    rules[Dot as usize] = ParseRule::new(None, Some(dot), Precedence::Call);
    rules[Minus as usize] = ParseRule::new(Some(unary), Some(binary), Precedence::Term);
    rules[Plus as usize] = ParseRule::new(None, Some(binary), Precedence::Term);
    rules[Slash as usize] = ParseRule::new(None, Some(binary), Precedence::Factor);
    rules[Star as usize] = ParseRule::new(None, Some(binary), Precedence::Factor);
    rules[Percent as usize] = ParseRule::new(None, Some(binary), Precedence::Factor);
    rules[Bang as usize] = ParseRule::new(Some(unary), None, Precedence::Unary);
    rules[BangEqual as usize] = ParseRule::new(None, Some(binary), Precedence::Comparison);
    rules[Equal as usize] = ParseRule::new(None, Some(assign_error), Precedence::Assignment);
    rules[EqualEqual as usize] = ParseRule::new(None, Some(binary), Precedence::Equality);
    rules[Greater as usize] = ParseRule::new(None, Some(binary), Precedence::Comparison);
    rules[GreaterEqual as usize] = ParseRule::new(None, Some(binary), Precedence::Comparison);
    rules[Less as usize] = ParseRule::new(None, Some(binary), Precedence::Comparison);
    rules[LessEqual as usize] = ParseRule::new(None, Some(binary), Precedence::Comparison);
    rules[Identifier as usize] = ParseRule::new(Some(ident), None, Precedence::None);
    rules[String as usize] = ParseRule::new(Some(string_literal), None, Precedence::None);
    rules[Integer as usize] = ParseRule::new(Some(integer), None, Precedence::None);
    rules[Float as usize] = ParseRule::new(Some(floating), None, Precedence::None);
    rules[And as usize] = ParseRule::new(None, Some(and_), Precedence::And);
    rules[Or as usize] = ParseRule::new(None, Some(or_), Precedence::Or);
    rules[False as usize] = ParseRule::new(Some(boolean), None, Precedence::None);
    rules[True as usize] = ParseRule::new(Some(boolean), None, Precedence::None);
    rules[Nil as usize] = ParseRule::new(Some(nil_), None, Precedence::None);
    rules[Not as usize] = ParseRule::new(Some(unary), None, Precedence::Unary);
    rules[SelfKw as usize] = ParseRule::new(Some(self_), None, Precedence::None);
    rules[If as usize] = ParseRule::new(Some(if_), None, Precedence::None);
    rules[While as usize] = ParseRule::new(Some(while_), None, Precedence::None);
    rules[For as usize] = ParseRule::new(Some(for_), None, Precedence::None);
    rules[Function as usize] = ParseRule::new(Some(function_), None, Precedence::None);
    rules[Return as usize] = ParseRule::new(Some(return_), None, Precedence::None);
    rules[Import as usize] = ParseRule::new(Some(import_), None, Precedence::None);
    rules[Global as usize] = ParseRule::new(Some(global_), None, Precedence::None);
    rules
});

pub struct Parser<'a> {
    state: &'a mut Interp,
    scanner: Scanner<'a>,
    chunk_id: ChunkId,
    current: Token<'a>,
    previous: Token<'a>,
    had_error: bool,
    errors: Vec<CompileError>,
    last_error_pos: Option<(u32, usize)>,
    /// Names declared `global` in a chunk; later bare uses in the same chunk
    /// keep resolving through the recorded parent hop count.
    global_aliases: HashMap<ChunkId, HashMap<String, (u8, u16)>>,
}

/// Compile `source` into a function value. Passing a function as `reuse`
/// recompiles into its existing chunk (the REPL's persistent top-level
/// scope); anything else compiles into a fresh chunk.
pub fn compile(
    state: &mut Interp,
    source: &str,
    reuse: Value,
) -> Result<Value, Vec<CompileError>> {
    let chunk_id = match reuse {
        Value::Function(h) => {
            let id = state.heap.function(h).chunk;
            state.chunks.get_mut(id).reset_code();
            id
        }
        _ => state.chunks.alloc(None),
    };

    let mut parser = Parser {
        state,
        scanner: Scanner::new(source),
        chunk_id,
        current: Token::synthetic_eof(),
        previous: Token::synthetic_eof(),
        had_error: false,
        errors: Vec::new(),
        last_error_pos: None,
        global_aliases: HashMap::new(),
    };

    parser.advance();
    if !parser.check(TokenType::Eof) && !parser.check(TokenType::Semicolon) {
        parser.expression();
        while !parser.matches(TokenType::Eof) {
            if parser.matches(TokenType::Semicolon) {
                continue;
            }
            parser.emit(OpCode::Pop);
            parser.expression();
        }
    } else {
        parser.emit(OpCode::Nil);
    }

    if parser.had_error {
        return Err(parser.errors);
    }
    Ok(parser.finish(reuse, 0, false))
}

impl<'a> Parser<'a> {
    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.token_type != TokenType::Eof {
                let line = self.current.line;
                self.chunk_mut().set_line(line);
            }
            if self.current.token_type != TokenType::Error {
                break;
            }
            let token = self.current;
            self.error_at(token, token.text);
        }
    }

    fn matches(&mut self, token_type: TokenType) -> bool {
        if !self.check(token_type) {
            return false;
        }
        self.advance();
        true
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.current.token_type == token_type
    }

    fn consume(&mut self, token_type: TokenType, message: &str) {
        if self.current.token_type == token_type {
            self.advance();
            return;
        }
        self.error(message);
    }

    fn match_opassign(&mut self) -> Option<OpAssign> {
        let opassign = match self.current.token_type {
            TokenType::PlusEqual => OpAssign::Plus,
            TokenType::MinusEqual => OpAssign::Minus,
            TokenType::StarEqual => OpAssign::Mul,
            TokenType::SlashEqual => OpAssign::Div,
            TokenType::PercentEqual => OpAssign::Mod,
            _ => return None,
        };
        self.advance();
        Some(opassign)
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = RULES[self.previous.token_type as usize].prefix else {
            self.error("expect expression");
            return;
        };
        prefix(self);

        while precedence <= RULES[self.current.token_type as usize].precedence {
            self.advance();
            match RULES[self.previous.token_type as usize].infix {
                Some(infix) => infix(self),
                None => {
                    self.error("expect infix expression");
                    return;
                }
            }
        }
    }

    fn finish(&mut self, reuse: Value, nargs: u8, takes_self: bool) -> Value {
        self.emit(OpCode::Return);
        let func = match reuse {
            Value::Function(h) => {
                let f = self.state.heap.function_mut(h);
                f.nargs = nargs;
                f.takes_self = takes_self;
                reuse
            }
            _ => self.state.new_function(self.chunk_id, nargs, takes_self),
        };
        debug_feature::disassemble(self);
        func
    }

    fn chunk(&self) -> &Chunk {
        self.state.chunks.get(self.chunk_id)
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        self.state.chunks.get_mut(self.chunk_id)
    }

    fn current_address(&self) -> usize {
        self.chunk().current_address()
    }

    fn emit(&mut self, opcode: OpCode) {
        self.chunk_mut().emit(opcode);
    }

    fn emit_arg8(&mut self, opcode: OpCode, arg8: u8) {
        self.chunk_mut().emit_arg8(opcode, arg8);
    }

    fn emit_arg16(&mut self, opcode: OpCode, arg16: u16) {
        self.chunk_mut().emit_arg16(opcode, arg16);
    }

    fn emit_arg8_arg16(&mut self, opcode: OpCode, arg8: u8, arg16: u16) {
        self.chunk_mut().emit_arg8_arg16(opcode, arg8, arg16);
    }

    fn emit_arg8_arg8_arg16(&mut self, opcode: OpCode, arg8_1: u8, arg8_2: u8, arg16: u16) {
        self.chunk_mut().emit_arg8_arg8_arg16(opcode, arg8_1, arg8_2, arg16);
    }

    fn emit_jump(&mut self, opcode: OpCode) -> usize {
        self.chunk_mut().emit_jump(opcode, 0)
    }

    fn emit_jump_to(&mut self, opcode: OpCode, dest: usize) {
        if dest > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.chunk_mut().emit_jump(opcode, dest as u16);
    }

    fn patch_jump(&mut self, location: usize) {
        if self.current_address() > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.chunk_mut().patch_jump(location);
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.state.chunk_add_constant(self.chunk_id, value);
        if index > u16::MAX as usize {
            self.error("too many constants in one chunk");
            return;
        }
        self.emit_arg16(OpCode::Constant, index as u16);
    }

    fn var16(&mut self, index: usize) -> u16 {
        if index > u16::MAX as usize {
            self.error("too many variables in one chunk");
            0
        } else {
            index as u16
        }
    }

    fn imm16(&mut self, count: u32) -> u16 {
        if count > u16::MAX as u32 {
            self.error("literal has too many elements");
            0
        } else {
            count as u16
        }
    }

    fn global_alias(&self, name: &str) -> Option<(u8, u16)> {
        self.global_aliases.get(&self.chunk_id)?.get(name).copied()
    }

    fn register_global_alias(&mut self, name: &str, ups: u8, index: u16) {
        self.global_aliases
            .entry(self.chunk_id)
            .or_default()
            .insert(name.to_string(), (ups, index));
    }

    fn error(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error_at_previous(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token, message: &str) {
        // Report the first error at a position; cascades there are noise.
        let pos = (token.line, token.text.as_ptr() as usize);
        if self.last_error_pos == Some(pos) {
            return;
        }
        self.last_error_pos = Some(pos);

        eprint!("[line {}] Error", token.line);
        match token.token_type {
            TokenType::Eof => eprint!(" at end"),
            TokenType::Error => {}
            _ => eprint!(" at '{}'", token.text),
        }
        eprintln!(": {}", message);

        self.errors.push(CompileError {
            line: token.line,
            message: message.to_string(),
        });
        self.had_error = true;
    }
}

fn grouping(p: &mut Parser) {
    p.expression();
    p.consume(TokenType::RightParen, "expect ')' after expression");
}

fn ident(p: &mut Parser) {
    let name = p.previous.text;
    if let Some((ups, index)) = p.global_alias(name) {
        if p.matches(TokenType::Equal) {
            p.expression();
            p.emit_arg8_arg16(OpCode::VarSetUp, ups, index);
        } else if let Some(opassign) = p.match_opassign() {
            p.expression();
            p.emit_arg8_arg8_arg16(OpCode::VarGetOpSetUp, opassign.to_byte(), ups, index);
        } else {
            p.emit_arg8_arg16(OpCode::VarGetUp, ups, index);
        }
        return;
    }

    if p.matches(TokenType::Equal) {
        p.expression();
        let index = p.chunk_mut().add_var(name);
        let index = p.var16(index);
        p.emit_arg16(OpCode::VarSet, index);
    } else if let Some(opassign) = p.match_opassign() {
        p.expression();
        let index = p.chunk_mut().add_var(name);
        let index = p.var16(index);
        p.emit_arg8_arg16(OpCode::VarGetOpSet, opassign.to_byte(), index);
    } else {
        // A read of an unknown name declares it as a nil local.
        let index = p.chunk_mut().add_var(name);
        let index = p.var16(index);
        p.emit_arg16(OpCode::VarGet, index);
    }
}

fn global_(p: &mut Parser) {
    p.consume(
        TokenType::Identifier,
        "expect identifier after global keyword",
    );
    let name = p.previous.text;

    let mut hops: u32 = 1;
    let mut found = None;
    let mut id = p.chunk().parent;
    while let Some(chunk_id) = id {
        let Some(chunk) = p.state.chunks.try_get(chunk_id) else {
            break;
        };
        if let Some(index) = chunk.find_var(name) {
            found = Some(index);
            break;
        }
        hops += 1;
        id = chunk.parent;
    }

    let (ups, index) = match found {
        Some(index) if hops <= u8::MAX as u32 => {
            let index = p.var16(index);
            let ups = hops as u8;
            p.register_global_alias(name, ups, index);
            (ups, index)
        }
        Some(_) => {
            p.error_at_previous("scope nesting too deep");
            (1, 0)
        }
        None => {
            p.error_at_previous("global variable does not exist!");
            (1, 0)
        }
    };

    if p.matches(TokenType::Equal) {
        p.expression();
        p.emit_arg8_arg16(OpCode::VarSetUp, ups, index);
    } else if let Some(opassign) = p.match_opassign() {
        p.expression();
        p.emit_arg8_arg8_arg16(OpCode::VarGetOpSetUp, opassign.to_byte(), ups, index);
    } else {
        p.emit_arg8_arg16(OpCode::VarGetUp, ups, index);
    }
}

fn array_literal(p: &mut Parser) {
    let mut elements: u32 = 0;
    if !p.check(TokenType::RightBracket) {
        loop {
            p.expression();
            elements += 1;
            if !p.matches(TokenType::Comma) {
                break;
            }
        }
    }
    p.consume(TokenType::RightBracket, "expect ']'");
    let elements = p.imm16(elements);
    p.emit_arg16(OpCode::ArrayLit, elements);
}

fn table_literal(p: &mut Parser) {
    let mut elements: u32 = 0;
    if !p.check(TokenType::RightBrace) {
        loop {
            p.expression();
            p.consume(TokenType::Colon, "expect ':'");
            p.expression();
            elements += 1;
            if !p.matches(TokenType::Comma) {
                break;
            }
        }
    }
    p.consume(TokenType::RightBrace, "expect '}'");
    let elements = p.imm16(elements);
    p.emit_arg16(OpCode::TableLit, elements);
}

fn index(p: &mut Parser) {
    p.expression();
    p.consume(TokenType::RightBracket, "expect ']'");
    if p.matches(TokenType::Equal) {
        p.expression();
        p.emit(OpCode::FieldSet);
    } else if let Some(opassign) = p.match_opassign() {
        p.expression();
        p.emit_arg8(OpCode::FieldGetOpSet, opassign.to_byte());
    } else {
        p.emit(OpCode::FieldGet);
    }
}

fn dot(p: &mut Parser) {
    p.consume(
        TokenType::Identifier,
        ". can only be followed by an identifier",
    );
    let name = p.previous.text;
    let key = p.state.intern_string(name);
    p.emit_constant(key);

    if p.matches(TokenType::Equal) {
        p.expression();
        p.emit(OpCode::FieldSetS);
    } else if p.matches(TokenType::LeftParen) {
        p.emit(OpCode::FieldGetSPushParent);
        call_with_parent(p);
    } else if let Some(opassign) = p.match_opassign() {
        p.expression();
        p.emit_arg8(OpCode::FieldGetOpSetS, opassign.to_byte());
    } else {
        p.emit(OpCode::FieldGetS);
    }
}

fn string_literal(p: &mut Parser) {
    let text = p.previous.text;
    let value = p.state.intern_string(&text[1..text.len() - 1]);
    p.emit_constant(value);
}

fn integer(p: &mut Parser) {
    let value: i64 = match p.previous.text.parse() {
        Ok(value) => value,
        Err(_) => {
            p.error_at_previous("integer literal is too large");
            0
        }
    };
    if (0..=u16::MAX as i64).contains(&value) {
        p.emit_arg16(OpCode::ConstantSmallInt, value as u16);
    } else {
        p.emit_constant(Value::Int(value));
    }
}

fn floating(p: &mut Parser) {
    let value: f64 = p.previous.text.parse().unwrap_or(0.0);
    p.emit_constant(Value::Float(value));
}

fn boolean(p: &mut Parser) {
    if p.previous.token_type == TokenType::True {
        p.emit(OpCode::True);
    } else {
        p.emit(OpCode::False);
    }
}

fn nil_(p: &mut Parser) {
    p.emit(OpCode::Nil);
}

fn self_(p: &mut Parser) {
    p.emit(OpCode::PushSelf);
}

fn unary(p: &mut Parser) {
    let operator = p.previous.token_type;
    p.parse_precedence(Precedence::Unary);
    match operator {
        TokenType::Minus => p.emit(OpCode::Negate),
        TokenType::Bang | TokenType::Not => p.emit(OpCode::Not),
        _ => {}
    }
}

fn binary(p: &mut Parser) {
    let operator = p.previous.token_type;
    let precedence = RULES[operator as usize].precedence;
    p.parse_precedence(precedence.next());

    let opcode = match operator {
        TokenType::Plus => OpCode::Add,
        TokenType::Minus => OpCode::Subtract,
        TokenType::Star => OpCode::Multiply,
        TokenType::Slash => OpCode::Divide,
        TokenType::Percent => OpCode::Modulo,
        TokenType::BangEqual => OpCode::NotEqual,
        TokenType::EqualEqual => OpCode::Equal,
        TokenType::Less => OpCode::Less,
        TokenType::LessEqual => OpCode::LessEqual,
        TokenType::Greater => OpCode::Greater,
        TokenType::GreaterEqual => OpCode::GreaterEqual,
        _ => return,
    };
    p.emit(opcode);
}

fn and_(p: &mut Parser) {
    let patch = p.emit_jump(OpCode::JumpIfFalseOrPop);
    p.expression();
    p.patch_jump(patch);
}

fn or_(p: &mut Parser) {
    let patch = p.emit_jump(OpCode::JumpIfTrueOrPop);
    p.expression();
    p.patch_jump(patch);
}

fn assign_error(p: &mut Parser) {
    p.error("Can't assign to constant");
}

fn is_end_of_if_body(p: &Parser) -> bool {
    p.check(TokenType::End)
        || p.check(TokenType::Elsif)
        || p.check(TokenType::Else)
        || p.check(TokenType::Eof)
}

fn if_(p: &mut Parser) {
    elsif_chain(p);
}

fn elsif_chain(p: &mut Parser) {
    p.expression();
    p.consume(TokenType::Then, "expect 'then' after if expression");

    let false_patch = p.emit_jump(OpCode::JumpIfFalse);

    if !is_end_of_if_body(p) {
        p.expression();
        while !is_end_of_if_body(p) {
            if p.matches(TokenType::Semicolon) {
                continue;
            }
            p.emit(OpCode::Pop);
            p.expression();
        }
    } else {
        p.emit(OpCode::Nil);
    }

    let end_patch = p.emit_jump(OpCode::Jump);
    p.patch_jump(false_patch);

    if p.matches(TokenType::End) {
        // A missing branch produces nil.
        p.emit(OpCode::Nil);
    } else if p.matches(TokenType::Else) {
        if !p.matches(TokenType::End) {
            p.expression();
            while !p.matches(TokenType::End) {
                if p.matches(TokenType::Semicolon) {
                    continue;
                }
                if p.check(TokenType::Eof) {
                    p.error("expect 'end' after else block");
                    break;
                }
                p.emit(OpCode::Pop);
                p.expression();
            }
        } else {
            p.emit(OpCode::Nil);
        }
    } else if p.matches(TokenType::Elsif) {
        elsif_chain(p);
    } else {
        p.error("expect 'end' after if expression");
    }

    p.patch_jump(end_patch);
}

fn while_(p: &mut Parser) {
    // The loop's value rides the stack across iterations.
    p.emit(OpCode::Nil);
    let loop_start = p.current_address();
    p.expression();
    p.consume(TokenType::Do, "expect 'do' after while expression");

    let exit_patch = p.emit_jump(OpCode::JumpIfFalse);

    let mut break_patches = Vec::new();
    while !p.check(TokenType::End) && !p.check(TokenType::Eof) {
        if p.matches(TokenType::Semicolon) {
            continue;
        }
        if p.matches(TokenType::Next) {
            p.emit_jump_to(OpCode::Jump, loop_start);
            continue;
        }
        if p.matches(TokenType::Break) {
            break_patches.push(p.emit_jump(OpCode::Jump));
            continue;
        }
        p.emit(OpCode::Pop);
        p.expression();
    }
    p.consume(TokenType::End, "expect 'end' after while block");

    p.emit_jump_to(OpCode::Jump, loop_start);
    p.patch_jump(exit_patch);
    for patch in break_patches {
        p.patch_jump(patch);
    }
}

fn for_(p: &mut Parser) {
    p.expression(); // init; its value doubles as the loop value
    p.consume(TokenType::Comma, "expect ',' after init expression");
    let loop_start = p.current_address();

    p.expression(); // condition
    p.consume(TokenType::Comma, "expect ',' after condition expression");

    let exit_patch = p.emit_jump(OpCode::JumpIfFalse);
    let body_patch = p.emit_jump(OpCode::Jump);

    let update_address = p.current_address();
    p.expression(); // update
    p.emit(OpCode::Pop);
    p.consume(TokenType::Do, "expect 'do' in for expression");
    p.emit_jump_to(OpCode::Jump, loop_start);

    p.patch_jump(body_patch);
    let mut break_patches = Vec::new();
    while !p.check(TokenType::End) && !p.check(TokenType::Eof) {
        if p.matches(TokenType::Semicolon) {
            continue;
        }
        if p.matches(TokenType::Next) {
            p.emit_jump_to(OpCode::Jump, update_address);
            continue;
        }
        if p.matches(TokenType::Break) {
            break_patches.push(p.emit_jump(OpCode::Jump));
            continue;
        }
        p.emit(OpCode::Pop);
        p.expression();
    }
    p.consume(TokenType::End, "expect 'end' after for block");

    p.emit_jump_to(OpCode::Jump, update_address);
    p.patch_jump(exit_patch);
    for patch in break_patches {
        p.patch_jump(patch);
    }
}

fn return_(p: &mut Parser) {
    if p.check(TokenType::End)
        || p.check(TokenType::Elsif)
        || p.check(TokenType::Else)
        || p.check(TokenType::Eof)
        || p.matches(TokenType::Semicolon)
    {
        p.emit(OpCode::Nil);
    } else {
        p.expression();
    }
    p.emit(OpCode::Return);
}

fn parglist(p: &mut Parser) -> (u8, bool) {
    let mut nargs: u32 = 0;
    let mut takes_self = false;
    p.consume(TokenType::LeftParen, "parameter list must start with '('");
    if !p.check(TokenType::RightParen) {
        loop {
            if nargs == 0 && p.matches(TokenType::SelfKw) {
                takes_self = true;
            } else {
                p.consume(
                    TokenType::Identifier,
                    "function parameter must be an identifier",
                );
            }
            let name = p.previous.text;
            p.chunk_mut().add_var(name);
            nargs += 1;
            if !p.matches(TokenType::Comma) {
                break;
            }
        }
    }
    p.consume(TokenType::RightParen, "expect ')'");
    if nargs > u8::MAX as u32 {
        p.error("can't have more than 255 parameters");
        nargs = 0;
    }
    (nargs as u8, takes_self)
}

fn function_(p: &mut Parser) {
    let mut declared = None;
    if p.matches(TokenType::Identifier) {
        let name = p.previous.text;
        let index = p.chunk_mut().add_var(name);
        declared = Some(p.var16(index));
    }

    let parent = p.chunk_id;
    p.chunk_id = p.state.chunks.alloc(Some(parent));

    let (nargs, takes_self) = parglist(p);

    if !p.check(TokenType::End) {
        p.expression();
        while !p.check(TokenType::End) && !p.check(TokenType::Eof) {
            if p.matches(TokenType::Semicolon) {
                continue;
            }
            p.emit(OpCode::Pop);
            p.expression();
        }
    } else {
        p.emit(OpCode::Nil);
    }
    p.consume(TokenType::End, "expect 'end' at end of function");
    p.emit(OpCode::Return);

    let body = p.chunk_id;
    p.chunk_id = parent;
    let func = p.state.new_function(body, nargs, takes_self);
    p.emit_constant(func);
    if let Some(index) = declared {
        p.emit_arg16(OpCode::VarSet, index);
    }
}

fn argument_list(p: &mut Parser) -> u8 {
    let mut nargs: u32 = 0;
    if !p.check(TokenType::RightParen) {
        loop {
            p.expression();
            nargs += 1;
            if !p.matches(TokenType::Comma) {
                break;
            }
        }
    }
    p.consume(TokenType::RightParen, "expect ')'");
    if nargs > u8::MAX as u32 {
        p.error("can't have more than 255 arguments");
        nargs = 0;
    }
    nargs as u8
}

fn call(p: &mut Parser) {
    let line = p.current.line;
    let nargs = argument_list(p);
    p.chunk_mut().set_line(line);
    p.emit_arg8(OpCode::Call, nargs);
}

fn call_with_parent(p: &mut Parser) {
    let line = p.current.line;
    let nargs = argument_list(p);
    p.chunk_mut().set_line(line);
    p.emit_arg8(OpCode::CallWithParent, nargs);
}

fn import_(p: &mut Parser) {
    p.consume(TokenType::LeftParen, "expect '(' after import");
    p.consume(TokenType::String, "expect string for import");
    if p.previous.token_type != TokenType::String {
        return;
    }
    string_literal(p);
    p.consume(TokenType::RightParen, "expect ')' after import name");
    p.emit(OpCode::Import);
}

#[cfg(feature = "debug_print_code")]
mod debug_feature {
    use super::*;

    pub fn disassemble(parser: &Parser) {
        if !parser.had_error {
            crate::debug::disassemble_chunk(parser.state, parser.chunk_id, "code");
        }
    }
}

#[cfg(not(feature = "debug_print_code"))]
mod debug_feature {
    use super::*;

    pub fn disassemble(_parser: &Parser) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_expression_bytecode() {
        let mut state = Interp::new();
        let func = compile(&mut state, "5 - 4", Value::Nil).expect("compiles");
        let Value::Function(h) = func else {
            panic!("expected a function value");
        };
        let chunk = state.chunks.get(state.heap.function(h).chunk);
        let expected = [
            OpCode::ConstantSmallInt.to_byte(),
            0,
            5,
            OpCode::ConstantSmallInt.to_byte(),
            0,
            4,
            OpCode::Subtract.to_byte(),
            OpCode::Return.to_byte(),
        ];
        assert_eq!(chunk.code, expected);
    }

    #[test]
    fn large_integers_move_to_the_constant_pool() {
        let mut state = Interp::new();
        let func = compile(&mut state, "70000", Value::Nil).expect("compiles");
        let Value::Function(h) = func else {
            panic!("expected a function value");
        };
        let chunk = state.chunks.get(state.heap.function(h).chunk);
        assert_eq!(chunk.code[0], OpCode::Constant.to_byte());
        assert!(matches!(chunk.consts[0], Value::Int(70000)));
    }

    #[test]
    fn trailing_operator_is_a_compile_error() {
        let mut state = Interp::new();
        assert!(compile(&mut state, "1 +", Value::Nil).is_err());
    }

    #[test]
    fn unterminated_string_is_a_compile_error() {
        let mut state = Interp::new();
        let errors = compile(&mut state, "\"abc", Value::Nil).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("unterminated string")));
    }

    #[test]
    fn global_outside_any_scope_is_a_compile_error() {
        let mut state = Interp::new();
        let errors = compile(&mut state, "global x", Value::Nil).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("global variable does not exist")));
    }

    #[test]
    fn repeated_string_literals_share_one_constant() {
        let mut state = Interp::new();
        let func = compile(&mut state, "\"dup\"; \"dup\"", Value::Nil).expect("compiles");
        let Value::Function(h) = func else {
            panic!("expected a function value");
        };
        let chunk = state.chunks.get(state.heap.function(h).chunk);
        assert_eq!(chunk.consts.len(), 1);
    }

    #[test]
    fn function_literal_opens_a_child_chunk() {
        let mut state = Interp::new();
        let func = compile(&mut state, "function f(a, b) a end", Value::Nil).expect("compiles");
        let Value::Function(h) = func else {
            panic!("expected a function value");
        };
        let main_chunk = state.heap.function(h).chunk;
        let inner = state
            .chunks
            .get(main_chunk)
            .consts
            .iter()
            .find_map(|c| match c {
                Value::Function(h) => Some(*h),
                _ => None,
            })
            .expect("function constant");
        let inner = *state.heap.function(inner);
        assert_eq!(inner.nargs, 2);
        assert!(!inner.takes_self);
        assert_eq!(state.chunks.get(inner.chunk).parent, Some(main_chunk));
        // Parameters are pre-declared in the body chunk.
        assert_eq!(state.chunks.get(inner.chunk).vars.len(), 2);
    }

    #[test]
    fn self_parameter_marks_the_function() {
        let mut state = Interp::new();
        let func = compile(&mut state, "function m(self, x) x end", Value::Nil).expect("compiles");
        let Value::Function(h) = func else {
            panic!("expected a function value");
        };
        let inner = state
            .chunks
            .get(state.heap.function(h).chunk)
            .consts
            .iter()
            .find_map(|c| match c {
                Value::Function(h) => Some(*h),
                _ => None,
            })
            .expect("function constant");
        let inner = state.heap.function(inner);
        assert!(inner.takes_self);
        assert_eq!(inner.nargs, 2);
    }

    #[test]
    fn repl_reuse_keeps_the_same_chunk_and_variables() {
        let mut state = Interp::new();
        let first = compile(&mut state, "x = 10", Value::Nil).expect("compiles");
        let Value::Function(h) = first else {
            panic!("expected a function value");
        };
        let chunk_id = state.heap.function(h).chunk;
        let second = compile(&mut state, "x", first).expect("compiles");
        assert!(matches!(second, Value::Function(h2) if h2 == h));
        assert_eq!(state.heap.function(h).chunk, chunk_id);
        assert!(state.chunks.get(chunk_id).find_var("x").is_some());
    }
}
