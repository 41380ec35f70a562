mod common;

use common::{asm, toy16, toy16_with, words};
use defasm::isa::BitRange;
use defasm::{Decoder, DecodedOperand, IsaError};
use pretty_assertions::assert_eq;

const SRC: &str = "
    li x1, -3
    add x3, x1
    addi x4, x3, 7
    sw x2, 12(sp)
    lw x5, 40(x6)
    beq x1, x2, 0
";

#[test]
fn split_store_immediate_lands_in_both_fields() {
    let model = toy16();
    // imm 12 = 0b001_100: hi part in [11:9], lo part in [2:0]
    assert_eq!(words(&asm(&model, "sw x2, 12(sp)\n")), vec![0x73D4]);
}

#[test]
fn field_declaration_order_does_not_matter() {
    let model = toy16();
    let reversed = toy16_with(|def| {
        for inst in &mut def.instructions {
            inst.encoding.fields.reverse();
        }
    })
    .unwrap();
    assert_eq!(asm(&reversed, SRC).bytes, asm(&model, SRC).bytes);
}

#[test]
fn written_order_follows_the_syntax_not_the_layout() {
    let model = toy16();
    let swapped = toy16_with(|def| {
        let sw = def.instructions.iter_mut().find(|i| i.mnemonic == "sw").unwrap();
        sw.syntax = "sw imm(rs1), rs2".into();
    })
    .unwrap();
    assert_eq!(asm(&swapped, "sw 12(sp), x2\n").bytes, asm(&model, "sw x2, 12(sp)\n").bytes);

    let bytes = asm(&swapped, "sw 12(sp), x2\n").bytes;
    let d = swapped.decode(&bytes, 0).unwrap();
    assert_eq!(d.operands(&swapped), vec![DecodedOperand::Memory { offset: 12, base: 7 }, DecodedOperand::Register(2)]);
    assert_eq!(defasm::fmt_decoded(&swapped, &d), "sw 12(x7), x2");
}

#[test]
fn operand_bits_must_fit_in_64_bits() {
    let with_off_bits = |high: u32, low: u32| {
        toy16_with(|def| {
            let j = def.instructions.iter_mut().find(|i| i.mnemonic == "j").unwrap();
            let off = j.encoding.fields.iter_mut().find(|f| f.name == "off").unwrap();
            off.operand_bits = Some(BitRange::new(high, low));
        })
    };
    let err = with_off_bits(75, 64).unwrap_err();
    assert!(matches!(&err, IsaError::InvalidEncoding { mnemonic, .. } if mnemonic == "j"), "{err:?}");

    let top = with_off_bits(63, 52).unwrap();
    assert!(top.decode(&[0x02, 0x40], 0).is_some());
}
