//! Binary container building: constant pool, instruction encoding and the
//! class-file layout.
//!
//! Layout of one container blob (all integers big-endian):
//!
//! ```text
//! u32  magic "NOVA"
//! u16  format version
//! u16  constant-pool entry count (indices are 1-based; 0 means "none")
//!      entries: tag u8 + payload
//! u16  this-class name index (utf8, binary name)
//! u16  super-class name index (0 = none)
//! u16  class flags
//! u16  field count
//!      fields: name u16, descriptor u16, flags u16
//! u16  method count
//!      methods: name u16, descriptor u16, flags u16, max_locals u16,
//!               code length u32, code bytes,
//!               handler count u16,
//!               handlers: start u16, end u16, target u16, class u16
//! ```
//!
//! Jump operands inside method code are byte offsets from the start of the
//! method's code, converted from MIR instruction indices here.

use crate::errors::CompileError;
use crate::mir::{InvokeKind, MirBinOp, MirConst, MirInst, MirMethod, MirPrimKind};
use crate::span::Span;
use indexmap::IndexMap;

pub const MAGIC: u32 = 0x4E4F_5641; // "NOVA"
pub const FORMAT_VERSION: u16 = 1;

// Constant-pool tags
pub const TAG_UTF8: u8 = 1;
pub const TAG_INT: u8 = 2;
pub const TAG_LONG: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_DOUBLE: u8 = 5;
pub const TAG_CHAR: u8 = 6;

// Opcodes
pub mod opcodes {
    pub const CONST_NULL: u8 = 0x01;
    pub const CONST_UNIT: u8 = 0x02;
    pub const CONST_TRUE: u8 = 0x03;
    pub const CONST_FALSE: u8 = 0x04;
    pub const LDC: u8 = 0x05;
    pub const LOAD_LOCAL: u8 = 0x10;
    pub const STORE_LOCAL: u8 = 0x11;
    pub const POP: u8 = 0x12;
    pub const DUP: u8 = 0x13;
    pub const JUMP: u8 = 0x20;
    pub const JUMP_IF_FALSE: u8 = 0x21;
    pub const BINARY: u8 = 0x30;
    pub const NOT: u8 = 0x31;
    pub const NEG: u8 = 0x32;
    pub const GET_FIELD: u8 = 0x40;
    pub const SET_FIELD: u8 = 0x41;
    pub const GET_STATIC: u8 = 0x42;
    pub const SET_STATIC: u8 = 0x43;
    pub const INVOKE: u8 = 0x50;
    pub const NEW: u8 = 0x51;
    pub const NEW_LIST: u8 = 0x60;
    pub const NEW_MUTABLE_LIST: u8 = 0x61;
    pub const NEW_SET: u8 = 0x62;
    pub const NEW_MAP: u8 = 0x63;
    pub const NEW_MAP_PAIRS: u8 = 0x64;
    pub const CLOSURE: u8 = 0x65;
    pub const TYPE_CHECK: u8 = 0x70;
    pub const TYPE_CAST: u8 = 0x71;
    pub const RETURN: u8 = 0x80;
    pub const RETURN_VALUE: u8 = 0x81;
    pub const THROW: u8 = 0x82;
}

/// A deduplicating constant pool with 1-based indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolEntry {
    Utf8(String),
    Int(i32),
    Long(i64),
    /// Bit pattern, so NaNs deduplicate consistently
    Float(u32),
    Double(u64),
    Char(u32),
}

#[derive(Default)]
pub struct ConstantPool {
    entries: IndexMap<PoolEntry, u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, entry: PoolEntry) -> Result<u16, CompileError> {
        if let Some(index) = self.entries.get(&entry) {
            return Ok(*index);
        }
        let index = u16::try_from(self.entries.len() + 1).map_err(|_| {
            CompileError::internal("codegen", Span::synthetic(), "constant pool overflow")
        })?;
        self.entries.insert(entry, index);
        Ok(index)
    }

    pub fn utf8(&mut self, value: &str) -> Result<u16, CompileError> {
        self.intern(PoolEntry::Utf8(value.to_string()))
    }

    pub fn constant(&mut self, value: &MirConst) -> Result<u16, CompileError> {
        match value {
            MirConst::Int(v) => self.intern(PoolEntry::Int(*v)),
            MirConst::Long(v) => self.intern(PoolEntry::Long(*v)),
            MirConst::Float(v) => self.intern(PoolEntry::Float(v.to_bits())),
            MirConst::Double(v) => self.intern(PoolEntry::Double(v.to_bits())),
            MirConst::Char(v) => self.intern(PoolEntry::Char(*v as u32)),
            MirConst::Str(v) => self.utf8(v),
            _ => Err(CompileError::internal(
                "codegen",
                Span::synthetic(),
                "inline constant interned into the pool",
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), CompileError> {
        let count = u16::try_from(self.entries.len()).map_err(|_| {
            CompileError::internal("codegen", Span::synthetic(), "constant pool overflow")
        })?;
        out.extend_from_slice(&count.to_be_bytes());
        for entry in self.entries.keys() {
            match entry {
                PoolEntry::Utf8(value) => {
                    out.push(TAG_UTF8);
                    let bytes = value.as_bytes();
                    let length = u16::try_from(bytes.len()).map_err(|_| {
                        CompileError::internal(
                            "codegen",
                            Span::synthetic(),
                            "utf8 constant too long",
                        )
                    })?;
                    out.extend_from_slice(&length.to_be_bytes());
                    out.extend_from_slice(bytes);
                }
                PoolEntry::Int(value) => {
                    out.push(TAG_INT);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                PoolEntry::Long(value) => {
                    out.push(TAG_LONG);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                PoolEntry::Float(bits) => {
                    out.push(TAG_FLOAT);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                PoolEntry::Double(bits) => {
                    out.push(TAG_DOUBLE);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                PoolEntry::Char(code) => {
                    out.push(TAG_CHAR);
                    out.extend_from_slice(&code.to_be_bytes());
                }
            }
        }
        Ok(())
    }
}

/// The fixed encoded width of one instruction.
fn width(inst: &MirInst) -> usize {
    match inst {
        MirInst::Const(constant) => match constant {
            MirConst::Null | MirConst::Unit | MirConst::Bool(_) => 1,
            _ => 3,
        },
        MirInst::LoadLocal(_) | MirInst::StoreLocal(_) => 3,
        MirInst::Pop | MirInst::Dup => 1,
        MirInst::Jump(_) | MirInst::JumpIfFalse(_) => 3,
        MirInst::Binary(_, _) => 3,
        MirInst::Not => 1,
        MirInst::Neg(_) => 2,
        MirInst::GetField { .. }
        | MirInst::SetField { .. }
        | MirInst::GetStatic { .. }
        | MirInst::SetStatic { .. } => 7,
        MirInst::Invoke { .. } => 8,
        MirInst::New { .. } => 3,
        MirInst::NewList(_)
        | MirInst::NewMutableList(_)
        | MirInst::NewSet(_)
        | MirInst::NewMap(_)
        | MirInst::NewMapFromPairs(_) => 3,
        MirInst::Closure { .. } => 7,
        MirInst::TypeCheck { .. } => 3,
        MirInst::TypeCast { .. } => 4,
        MirInst::Return | MirInst::ReturnValue | MirInst::Throw => 1,
    }
}

fn bin_op_code(op: MirBinOp) -> u8 {
    match op {
        MirBinOp::Add => 0,
        MirBinOp::Sub => 1,
        MirBinOp::Mul => 2,
        MirBinOp::Div => 3,
        MirBinOp::Rem => 4,
        MirBinOp::Eq => 5,
        MirBinOp::Ne => 6,
        MirBinOp::Lt => 7,
        MirBinOp::Le => 8,
        MirBinOp::Gt => 9,
        MirBinOp::Ge => 10,
    }
}

fn prim_kind_code(kind: MirPrimKind) -> u8 {
    match kind {
        MirPrimKind::Int => 0,
        MirPrimKind::Long => 1,
        MirPrimKind::Float => 2,
        MirPrimKind::Double => 3,
        MirPrimKind::Boolean => 4,
        MirPrimKind::Char => 5,
        MirPrimKind::Ref => 6,
    }
}

fn invoke_kind_code(kind: InvokeKind) -> u8 {
    match kind {
        InvokeKind::Static => 0,
        InvokeKind::Virtual => 1,
        InvokeKind::Constructor => 2,
    }
}

/// Encode one method body, converting instruction-index jump targets and
/// handler ranges to byte offsets.
pub fn encode_method(
    method: &MirMethod,
    pool: &mut ConstantPool,
) -> Result<(Vec<u8>, Vec<(u16, u16, u16, u16)>), CompileError> {
    let span = Span::synthetic();

    // Byte offset of each instruction index (plus the end offset)
    let mut offsets = Vec::with_capacity(method.code.len() + 1);
    let mut position = 0usize;
    for inst in &method.code {
        offsets.push(position);
        position += width(inst);
    }
    offsets.push(position);

    let offset_of = |index: u16| -> Result<u16, CompileError> {
        let index = index as usize;
        if index >= offsets.len() {
            return Err(CompileError::internal(
                "codegen",
                span,
                "jump target out of range",
            ));
        }
        u16::try_from(offsets[index])
            .map_err(|_| CompileError::internal("codegen", span, "method body too large"))
    };

    let mut out = Vec::with_capacity(position);
    for inst in &method.code {
        match inst {
            MirInst::Const(constant) => match constant {
                MirConst::Null => out.push(opcodes::CONST_NULL),
                MirConst::Unit => out.push(opcodes::CONST_UNIT),
                MirConst::Bool(true) => out.push(opcodes::CONST_TRUE),
                MirConst::Bool(false) => out.push(opcodes::CONST_FALSE),
                other => {
                    out.push(opcodes::LDC);
                    let index = pool.constant(other)?;
                    out.extend_from_slice(&index.to_be_bytes());
                }
            },
            MirInst::LoadLocal(slot) => {
                out.push(opcodes::LOAD_LOCAL);
                out.extend_from_slice(&slot.to_be_bytes());
            }
            MirInst::StoreLocal(slot) => {
                out.push(opcodes::STORE_LOCAL);
                out.extend_from_slice(&slot.to_be_bytes());
            }
            MirInst::Pop => out.push(opcodes::POP),
            MirInst::Dup => out.push(opcodes::DUP),
            MirInst::Jump(target) => {
                out.push(opcodes::JUMP);
                out.extend_from_slice(&offset_of(*target)?.to_be_bytes());
            }
            MirInst::JumpIfFalse(target) => {
                out.push(opcodes::JUMP_IF_FALSE);
                out.extend_from_slice(&offset_of(*target)?.to_be_bytes());
            }
            MirInst::Binary(op, kind) => {
                out.push(opcodes::BINARY);
                out.push(bin_op_code(*op));
                out.push(prim_kind_code(*kind));
            }
            MirInst::Not => out.push(opcodes::NOT),
            MirInst::Neg(kind) => {
                out.push(opcodes::NEG);
                out.push(prim_kind_code(*kind));
            }
            MirInst::GetField {
                owner,
                name,
                descriptor,
            }
            | MirInst::SetField {
                owner,
                name,
                descriptor,
            }
            | MirInst::GetStatic {
                owner,
                name,
                descriptor,
            }
            | MirInst::SetStatic {
                owner,
                name,
                descriptor,
            } => {
                out.push(match inst {
                    MirInst::GetField { .. } => opcodes::GET_FIELD,
                    MirInst::SetField { .. } => opcodes::SET_FIELD,
                    MirInst::GetStatic { .. } => opcodes::GET_STATIC,
                    _ => opcodes::SET_STATIC,
                });
                out.extend_from_slice(&pool.utf8(owner)?.to_be_bytes());
                out.extend_from_slice(&pool.utf8(name)?.to_be_bytes());
                out.extend_from_slice(&pool.utf8(descriptor)?.to_be_bytes());
            }
            MirInst::Invoke {
                kind,
                owner,
                name,
                descriptor,
            } => {
                out.push(opcodes::INVOKE);
                out.push(invoke_kind_code(*kind));
                out.extend_from_slice(&pool.utf8(owner)?.to_be_bytes());
                out.extend_from_slice(&pool.utf8(name)?.to_be_bytes());
                out.extend_from_slice(&pool.utf8(descriptor)?.to_be_bytes());
            }
            MirInst::New { class } => {
                out.push(opcodes::NEW);
                out.extend_from_slice(&pool.utf8(class)?.to_be_bytes());
            }
            MirInst::NewList(n) => {
                out.push(opcodes::NEW_LIST);
                out.extend_from_slice(&n.to_be_bytes());
            }
            MirInst::NewMutableList(n) => {
                out.push(opcodes::NEW_MUTABLE_LIST);
                out.extend_from_slice(&n.to_be_bytes());
            }
            MirInst::NewSet(n) => {
                out.push(opcodes::NEW_SET);
                out.extend_from_slice(&n.to_be_bytes());
            }
            MirInst::NewMap(n) => {
                out.push(opcodes::NEW_MAP);
                out.extend_from_slice(&n.to_be_bytes());
            }
            MirInst::NewMapFromPairs(n) => {
                out.push(opcodes::NEW_MAP_PAIRS);
                out.extend_from_slice(&n.to_be_bytes());
            }
            MirInst::Closure {
                method,
                descriptor,
                captures,
            } => {
                out.push(opcodes::CLOSURE);
                out.extend_from_slice(&pool.utf8(method)?.to_be_bytes());
                out.extend_from_slice(&pool.utf8(descriptor)?.to_be_bytes());
                out.extend_from_slice(&captures.to_be_bytes());
            }
            MirInst::TypeCheck { class } => {
                out.push(opcodes::TYPE_CHECK);
                out.extend_from_slice(&pool.utf8(class)?.to_be_bytes());
            }
            MirInst::TypeCast { class, safe } => {
                out.push(opcodes::TYPE_CAST);
                out.extend_from_slice(&pool.utf8(class)?.to_be_bytes());
                out.push(u8::from(*safe));
            }
            MirInst::Return => out.push(opcodes::RETURN),
            MirInst::ReturnValue => out.push(opcodes::RETURN_VALUE),
            MirInst::Throw => out.push(opcodes::THROW),
        }
    }

    let mut handlers = Vec::with_capacity(method.handlers.len());
    for handler in &method.handlers {
        let class_index = pool.utf8(&handler.class_name)?;
        handlers.push((
            offset_of(handler.start)?,
            offset_of(handler.end)?,
            offset_of(handler.target)?,
            class_index,
        ));
    }

    Ok((out, handlers))
}

pub fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_deduplicates() {
        let mut pool = ConstantPool::new();
        let a = pool.utf8("hello").unwrap();
        let b = pool.utf8("hello").unwrap();
        let c = pool.utf8("world").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_pool_indices_are_one_based() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.utf8("first").unwrap(), 1);
        assert_eq!(pool.utf8("second").unwrap(), 2);
    }

    #[test]
    fn test_float_constants_dedupe_by_bits() {
        let mut pool = ConstantPool::new();
        let a = pool.constant(&MirConst::Double(1.5)).unwrap();
        let b = pool.constant(&MirConst::Double(1.5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_jump_targets_become_byte_offsets() {
        // 0: Const Int (3 bytes), 1: JumpIfFalse -> 3 (3 bytes),
        // 2: Pop (1 byte), 3: Return (1 byte)
        let method = MirMethod {
            name: "test".to_string(),
            descriptor: "()V".to_string(),
            flags: 0,
            max_locals: 0,
            code: vec![
                MirInst::Const(MirConst::Int(1)),
                MirInst::JumpIfFalse(3),
                MirInst::Pop,
                MirInst::Return,
            ],
            handlers: Vec::new(),
        };
        let mut pool = ConstantPool::new();
        let (bytes, handlers) = encode_method(&method, &mut pool).unwrap();

        assert!(handlers.is_empty());
        // Instruction 3 starts at byte 3 + 3 + 1 = 7
        assert_eq!(bytes[3], opcodes::JUMP_IF_FALSE);
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 7);
    }

    #[test]
    fn test_encoded_width_matches_layout() {
        let insts = vec![
            MirInst::Const(MirConst::Str("x".to_string())),
            MirInst::LoadLocal(0),
            MirInst::Dup,
            MirInst::Return,
        ];
        let method = MirMethod {
            name: "test".to_string(),
            descriptor: "()V".to_string(),
            flags: 0,
            max_locals: 1,
            code: insts.clone(),
            handlers: Vec::new(),
        };
        let mut pool = ConstantPool::new();
        let (bytes, _) = encode_method(&method, &mut pool).unwrap();
        let expected: usize = insts.iter().map(width).sum();
        assert_eq!(bytes.len(), expected);
    }
}
