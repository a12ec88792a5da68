use crate::chunk::{Chunk, ChunkId, OpAssign, OpCode};
use crate::state::Interp;
use crate::value;

/// Human-readable dump of a chunk: bytecode, constant pool, variable slots.
pub fn disassemble_chunk(state: &Interp, id: ChunkId, name: &str) {
    let chunk = state.chunks.get(id);
    println!("== {} ==", name);

    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(state, chunk, offset);
    }

    println!("Constants:");
    for (i, constant) in chunk.consts.iter().enumerate() {
        println!("{:>4}: {}", i, value::inspect(state, *constant));
    }

    println!("Variables:");
    for (i, var) in chunk.vars.iter().enumerate() {
        println!("{:>4}: {} -> {}", i, var.name, value::inspect(state, var.value));
    }
}

pub fn disassemble_instruction(state: &Interp, chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.lines[offset]);
    }

    let Some(op) = OpCode::from_byte(chunk.code[offset]) else {
        println!("unknown opcode {}", chunk.code[offset]);
        return offset + 1;
    };

    match op {
        OpCode::Constant => {
            let index = read16(chunk, offset + 1);
            let rendered = chunk
                .consts
                .get(index as usize)
                .map(|c| value::inspect(state, *c))
                .unwrap_or_else(|| "<bad constant>".to_string());
            println!("{} {} '{}'", op, index, rendered);
            offset + 3
        }
        OpCode::VarSet
        | OpCode::VarGet
        | OpCode::ConstantSmallInt
        | OpCode::ArrayLit
        | OpCode::TableLit
        | OpCode::JumpIfTrueOrPop
        | OpCode::JumpIfFalseOrPop
        | OpCode::JumpIfFalse
        | OpCode::Jump => {
            println!("{} {}", op, read16(chunk, offset + 1));
            offset + 3
        }
        OpCode::Call | OpCode::CallWithParent => {
            println!("{} {}", op, chunk.code[offset + 1]);
            offset + 2
        }
        OpCode::VarSetUp | OpCode::VarGetUp => {
            println!(
                "{} up {} index {}",
                op,
                chunk.code[offset + 1],
                read16(chunk, offset + 2)
            );
            offset + 4
        }
        OpCode::VarGetOpSet => {
            println!(
                "{} {} index {}",
                op,
                opassign_name(chunk.code[offset + 1]),
                read16(chunk, offset + 2)
            );
            offset + 4
        }
        OpCode::VarGetOpSetUp => {
            println!(
                "{} {} up {} index {}",
                op,
                opassign_name(chunk.code[offset + 1]),
                chunk.code[offset + 2],
                read16(chunk, offset + 3)
            );
            offset + 5
        }
        OpCode::FieldGetOpSet | OpCode::FieldGetOpSetS => {
            println!("{} {}", op, opassign_name(chunk.code[offset + 1]));
            offset + 2
        }
        _ => {
            println!("{}", op);
            offset + 1
        }
    }
}

fn read16(chunk: &Chunk, offset: usize) -> u16 {
    ((chunk.code[offset] as u16) << 8) | chunk.code[offset + 1] as u16
}

fn opassign_name(byte: u8) -> String {
    match OpAssign::from_byte(byte) {
        Some(opassign) => opassign.to_string(),
        None => format!("bad-opassign({})", byte),
    }
}
