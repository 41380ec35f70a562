mod common;

use common::{asm, toy16};
use defasm::disasm::LineKind;
use defasm::{disassemble, BinaryImage, DisasmOptions};
use pretty_assertions::assert_eq;

const PROGRAM: &str = "
start:
    li x1, 10
    li x2, 0
loop:
    addi x2, x2, 1
    addi x1, x1, -1
    beq x1, zero, done
    j loop
done:
    sw x2, 12(sp)
    lw x3, 12(sp)
    halt
msg:
    .asciz \"hello, world\"
    .byte 1, 2, 3
";

#[test]
fn program_reassembles_from_its_listing() {
    let model = toy16();
    let img = asm(&model, PROGRAM);
    assert_eq!(img.bytes.len(), 34);

    let dis = disassemble(&model, &img, &DisasmOptions::default());
    let text = dis.text();
    assert!(text.starts_with("    .org 0x0\n"), "{text}");
    assert!(text.contains("L_0004:\n"), "{text}");
    assert!(text.contains("    beqz x1, L_000c"), "{text}");
    assert!(text.contains("    j L_0004\n"), "{text}");
    assert!(text.contains("    sw x2, 12(x7)\n"), "{text}");
    assert!(text.contains(".asciz \"hello, world\""), "{text}");
    assert!(text.contains(".byte 0x1, 0x2, 0x3"), "{text}");

    let again = asm(&model, &text);
    assert_eq!(again.base, img.base);
    assert_eq!(again.bytes, img.bytes);
    assert_eq!(again.regions, img.regions);
}

#[test]
fn pseudo_lines_carry_their_expansion() {
    let model = toy16();
    let img = asm(&model, PROGRAM);
    let dis = disassemble(&model, &img, &DisasmOptions::default());
    let inc = dis.lines.iter().find(|l| l.kind == LineKind::Pseudo && l.text == "inc x2").unwrap();
    assert_eq!(inc.address, 4);
    assert_eq!(inc.comment.as_deref(), Some("= addi x2, x2, 1"));

    let plain = disassemble(&model, &img, &DisasmOptions { reconstruct_pseudo: Some(false), ..Default::default() });
    assert!(plain.lines.iter().all(|l| l.kind != LineKind::Pseudo));
    assert!(plain.text().contains("    addi x2, x2, 1\n"));
}

#[test]
fn every_word_survives_a_round_trip() {
    let model = toy16();
    for op in 0u32..16 {
        let bytes: Vec<u8> = (0u32..0x1000).flat_map(|low| (((op << 12) | low) as u16).to_le_bytes()).collect();
        let img = BinaryImage::from_raw(0x2000, bytes);
        let text = disassemble(&model, &img, &DisasmOptions::default()).text();
        let again = asm(&model, &text);
        assert_eq!(again.base, 0x2000, "opcode {op:#x}");
        assert!(again.bytes == img.bytes, "opcode {op:#x} changed on reassembly");
    }
}
