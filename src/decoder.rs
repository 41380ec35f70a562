use serde::{Deserialize, Serialize};

use crate::bits;
use crate::encoder::{pc_base, OperandValue};
use crate::isa::{FieldKind, Instruction, IsaModel, OperandKind, Slot, TargetKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Index into [`IsaModel::instructions`].
    pub index: usize,
    pub address: u64,
    pub raw: u64,
    pub bytes: Vec<u8>,
    /// Per operand of the instruction; jump targets hold absolute addresses.
    pub values: Vec<OperandValue>,
}

impl DecodedInstruction {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn end(&self) -> u64 {
        self.address + self.bytes.len() as u64
    }

    /// Addresses this instruction refers to as jump or branch targets.
    pub fn targets<'a>(&'a self, model: &'a IsaModel) -> impl Iterator<Item = u64> + 'a {
        let inst = &model.instructions[self.index];
        inst.operands.iter().zip(&self.values).filter_map(|(spec, v)| match (spec.target, v) {
            (Some(_), OperandValue::Int { value, .. }) => u64::try_from(*value).ok(),
            _ => None,
        })
    }
}

/// Written form of one decoded operand, in syntax order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodedOperand {
    Register(usize),
    Imm(i64),
    Target(u64),
    Memory { offset: i64, base: usize },
}

impl DecodedInstruction {
    pub fn operands(&self, model: &IsaModel) -> Vec<DecodedOperand> {
        let inst = &model.instructions[self.index];
        let imm = |i: usize| match &self.values[i] {
            OperandValue::Int { value, .. } if inst.operands[i].is_target() => DecodedOperand::Target(*value as u64),
            OperandValue::Int { value, .. } => DecodedOperand::Imm(*value),
            OperandValue::Register(r) => DecodedOperand::Register(*r),
            OperandValue::Memory { offset, base } => DecodedOperand::Memory { offset: *offset, base: *base },
            OperandValue::Str(_) => DecodedOperand::Imm(0),
        };
        inst.slots
            .iter()
            .map(|slot| match *slot {
                Slot::Plain(i) => imm(i),
                Slot::Memory { offset, base } => match (&self.values[offset], &self.values[base]) {
                    (OperandValue::Int { value, .. }, OperandValue::Register(r)) => DecodedOperand::Memory { offset: *value, base: *r },
                    _ => imm(offset),
                },
            })
            .collect()
    }
}

pub trait Decoder {
    /// Decodes the instruction starting at `bytes[0]`, located at `address`.
    fn decode(&self, bytes: &[u8], address: u64) -> Option<DecodedInstruction>;
}

impl Decoder for IsaModel {
    fn decode(&self, bytes: &[u8], address: u64) -> Option<DecodedInstruction> {
        for (index, inst) in self.decode_order() {
            if !inst.encodes_fields() || bytes.len() < inst.size_bytes {
                continue;
            }
            let word = bits::from_bytes(&bytes[..inst.size_bytes], self.little_endian());
            if !inst.matches(word) {
                continue;
            }
            if let Some(values) = decode_fields(self, inst, word, address) {
                return Some(DecodedInstruction {
                    index,
                    address,
                    raw: word,
                    bytes: bytes[..inst.size_bytes].to_vec(),
                    values,
                });
            }
        }
        None
    }
}

/// Operand values held by `word`, or `None` when a field holds something the
/// model cannot name (such as an unknown register number).
pub fn decode_fields(model: &IsaModel, inst: &Instruction, word: u64, address: u64) -> Option<Vec<OperandValue>> {
    let mut values = Vec::with_capacity(inst.operands.len());
    for (i, spec) in inst.operands.iter().enumerate() {
        let feeding = inst.fields.iter().filter(|f| f.operand == Some(i));
        let value = match spec.kind {
            OperandKind::Register => {
                let f = feeding.into_iter().find(|f| f.kind == FieldKind::Register)?;
                OperandValue::Register(model.register_by_number(bits::extract(word, f.bits.high, f.bits.low))?)
            }
            OperandKind::Immediate => {
                let raw = feeding.fold(0u64, |acc, f| acc | bits::extract(word, f.bits.high, f.bits.low) << f.operand_bits.low);
                let v = if spec.signed { bits::sign_extend(raw, spec.width) } else { raw as i64 };
                let v = match spec.target {
                    Some(TargetKind::Relative) => (pc_base(model, inst, address) as i64).wrapping_add(v),
                    _ => v,
                };
                OperandValue::int(v)
            }
            OperandKind::Any => return None,
        };
        values.push(value);
    }
    Some(values)
}
