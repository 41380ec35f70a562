mod common;

use common::{asm, asm_err, toy16, words};
use defasm::AsmError;
use pretty_assertions::assert_eq;

#[test]
fn signed_immediate_bounds() {
    let model = toy16();
    // li: 9-bit signed
    assert_eq!(words(&asm(&model, "li x1, -256\nli x1, 255\n")), vec![0x1300, 0x12FF]);
    assert_eq!(
        asm_err(&model, "li x1, 256\n"),
        AsmError::ImmediateOutOfRange { operand: "imm".into(), value: 256, min: -256, max: 255 }
    );
    assert_eq!(
        asm_err(&model, "li x1, -257\n"),
        AsmError::ImmediateOutOfRange { operand: "imm".into(), value: -257, min: -256, max: 255 }
    );
}

#[test]
fn unsigned_immediate_bounds() {
    let model = toy16();
    // lw offset: 6-bit unsigned
    assert_eq!(words(&asm(&model, "lw x1, 63(x2)\n")), vec![0x62BF]);
    assert!(matches!(asm_err(&model, "lw x1, 64(x2)\n"), AsmError::ImmediateOutOfRange { value: 64, min: 0, max: 63, .. }));
    assert!(matches!(asm_err(&model, "lw x1, -1(x2)\n"), AsmError::ImmediateOutOfRange { value: -1, .. }));
}

#[test]
fn branch_offsets_are_range_and_alignment_checked() {
    let model = toy16();
    assert_eq!(asm_err(&model, "j 3\n"), AsmError::ImmediateMisaligned { operand: "off".into(), value: 3, align: 2 });
    assert!(matches!(asm_err(&model, "j 0x1000\n"), AsmError::ImmediateOutOfRange { value: 4096, max: 4095, .. }));
    // the farthest forward branch still fits
    assert_eq!(words(&asm(&model, "j 0xffe\n")), vec![0x47FF]);
}

#[test]
fn slices_are_checked_as_raw_bits() {
    let model = toy16();
    assert_eq!(words(&asm(&model, "lui x1, 0xabcd[15:8]\n")), vec![0x82AB]);
    assert!(matches!(asm_err(&model, "lui x1, 0x1ff\n"), AsmError::ImmediateOutOfRange { .. }));
}

#[test]
fn data_directives_reject_values_wider_than_their_unit() {
    let model = toy16();
    assert!(matches!(asm_err(&model, "    .byte x + 1\n.equ x, 255\n"), AsmError::ImmediateOutOfRange { value: 256, .. }));
    assert_eq!(asm(&model, "    .half -1\n    .word 0x12345678\n").bytes, vec![0xFF, 0xFF, 0x78, 0x56, 0x34, 0x12]);
}
