//! Bytecode-level helpers for the `Code` attribute.
//!
//! Instruction edits never change instruction lengths: a replaced field
//! access is padded with `nop` to its original three bytes, so branch
//! offsets, exception ranges and stack map frames stay valid.

use anyhow::{Context, Result};

use crate::descriptor::{is_wide_field, method_shape};
use crate::error::{ClassFormatError, ClassResult};

use super::constant_pool::ConstantPool;
use super::opcodes;
use super::reader::ByteReader;
use super::writer::{write_u16, write_u32};

/// Offset of the bytecode array inside a `Code` attribute payload.
pub(crate) const CODE_OFFSET: usize = 8;

const STUB_EXCEPTION: &str = "java/lang/UnsupportedOperationException";
const STUB_MESSAGE: &str = "Method has been deleted";

pub(crate) struct CodeAttribute<'a> {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) code: &'a [u8],
}

pub(crate) fn parse_code(info: &[u8]) -> ClassResult<CodeAttribute<'_>> {
    let mut reader = ByteReader::new(info);
    let max_stack = reader.u16()?;
    let max_locals = reader.u16()?;
    let len = reader.u32()? as usize;
    let code = reader.bytes(len)?;
    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
    })
}

/// Overwrite bytecode in place, `offset` being relative to the code array.
pub(crate) fn patch_code(info: &mut [u8], offset: usize, replacement: &[u8]) {
    let start = CODE_OFFSET + offset;
    info[start..start + replacement.len()].copy_from_slice(replacement);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Instruction {
    pub(crate) offset: usize,
    pub(crate) opcode: u8,
    pub(crate) length: usize,
}

impl Instruction {
    pub(crate) fn operand_u16(&self, code: &[u8]) -> ClassResult<u16> {
        read_u16(code, self.offset + 1)
    }
}

pub(crate) fn scan_instructions(code: &[u8]) -> ClassResult<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let length = opcode_length(code, offset)?;
        if offset + length > code.len() {
            return Err(ClassFormatError::new(offset, "instruction runs past end of code"));
        }
        instructions.push(Instruction {
            offset,
            opcode: code[offset],
            length,
        });
        offset += length;
    }
    Ok(instructions)
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> ClassResult<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        0xa9 => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        opcodes::GETSTATIC..=opcodes::PUTFIELD => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::NEW => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | opcodes::ATHROW => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        opcodes::WIDE => wide_length(code, offset)?,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        0xca => 1,
        0xfe | 0xff => 1,
        _ => {
            return Err(ClassFormatError::new(
                offset,
                format!("unsupported opcode 0x{opcode:02x}"),
            ));
        }
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> ClassResult<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .filter(|count| *count >= 0)
        .ok_or_else(|| ClassFormatError::new(offset, "invalid tableswitch range"))?;
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> ClassResult<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        return Err(ClassFormatError::new(offset, "invalid lookupswitch pairs"));
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> ClassResult<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .ok_or_else(|| ClassFormatError::new(offset, "missing wide opcode"))?;
    if opcode == opcodes::IINC { Ok(6) } else { Ok(4) }
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u16(code: &[u8], offset: usize) -> ClassResult<u16> {
    let slice = code
        .get(offset..offset + 2)
        .ok_or_else(|| ClassFormatError::new(offset, "bytecode u16 out of bounds"))?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i32(code: &[u8], offset: usize) -> ClassResult<i32> {
    let slice = code
        .get(offset..offset + 4)
        .ok_or_else(|| ClassFormatError::new(offset, "bytecode u32 out of bounds"))?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// Same-length replacement for an access to a deleted field.
///
/// Puts discard the value (and receiver), gets discard the receiver and push
/// the type's default value.
pub(crate) fn neutralize_field_access(opcode: u8, descriptor: &str) -> Option<[u8; 3]> {
    let discard = if is_wide_field(descriptor) {
        opcodes::POP2
    } else {
        opcodes::POP
    };
    let push = match descriptor.as_bytes().first()? {
        b'J' => opcodes::LCONST_0,
        b'D' => opcodes::DCONST_0,
        b'F' => opcodes::FCONST_0,
        b'L' | b'[' => opcodes::ACONST_NULL,
        _ => opcodes::ICONST_0,
    };
    match opcode {
        opcodes::PUTFIELD => Some([discard, opcodes::POP, opcodes::NOP]),
        opcodes::PUTSTATIC => Some([discard, opcodes::NOP, opcodes::NOP]),
        opcodes::GETFIELD => Some([opcodes::POP, push, opcodes::NOP]),
        opcodes::GETSTATIC => Some([push, opcodes::NOP, opcodes::NOP]),
        _ => None,
    }
}

/// `Code` payload for a stubbed method: `return` for void methods, otherwise
/// a freshly constructed `UnsupportedOperationException` is thrown.
pub(crate) fn stub_code(pool: &mut ConstantPool, descriptor: &str, is_static: bool) -> Result<Vec<u8>> {
    let shape = method_shape(descriptor)?;
    let max_locals = u16::try_from(shape.argument_slots + usize::from(!is_static))
        .context("too many method arguments")?;
    let (max_stack, code) = if shape.returns_void {
        (0u16, vec![opcodes::RETURN])
    } else {
        let class_index = pool.add_class(STUB_EXCEPTION)?;
        let message_index = pool.add_string(STUB_MESSAGE)?;
        let constructor_index = pool.add_method_ref(STUB_EXCEPTION, "<init>", "(Ljava/lang/String;)V")?;
        let mut code = vec![opcodes::NEW];
        write_u16(&mut code, class_index);
        code.push(opcodes::DUP);
        if let Ok(index) = u8::try_from(message_index) {
            code.extend([opcodes::LDC, index]);
        } else {
            code.push(opcodes::LDC_W);
            write_u16(&mut code, message_index);
        }
        code.push(opcodes::INVOKESPECIAL);
        write_u16(&mut code, constructor_index);
        code.push(opcodes::ATHROW);
        (3u16, code)
    };

    let mut info = Vec::with_capacity(CODE_OFFSET + code.len() + 4);
    write_u16(&mut info, max_stack);
    write_u16(&mut info, max_locals);
    write_u32(&mut info, code.len() as u32);
    info.extend_from_slice(&code);
    write_u16(&mut info, 0);
    write_u16(&mut info, 0);
    Ok(info)
}

/// Entry of the `BootstrapMethods` attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct BootstrapMethod {
    pub(crate) method_ref: u16,
    pub(crate) arguments: Vec<u16>,
}

pub(crate) fn parse_bootstrap_methods(info: &[u8]) -> ClassResult<Vec<BootstrapMethod>> {
    let mut reader = ByteReader::new(info);
    let count = reader.u16()?;
    let mut methods = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let method_ref = reader.u16()?;
        let argument_count = reader.u16()?;
        let mut arguments = Vec::with_capacity(argument_count as usize);
        for _ in 0..argument_count {
            arguments.push(reader.u16()?);
        }
        methods.push(BootstrapMethod {
            method_ref,
            arguments,
        });
    }
    Ok(methods)
}
