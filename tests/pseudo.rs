mod common;

use common::{asm, asm_err, toy16, toy16_with, words};
use defasm::disasm::LineKind;
use defasm::isa::PseudoDef;
use defasm::{disassemble, AsmError, DisasmOptions};
use pretty_assertions::assert_eq;

#[test]
fn pseudos_expand_to_their_templates() {
    let model = toy16();
    assert_eq!(words(&asm(&model, "mv x1, x2\n")), vec![0x3280]);
    assert_eq!(words(&asm(&model, "push x3\n")), vec![0x3FFE, 0x71D8]);
    assert_eq!(words(&asm(&model, "la x1, 0x1234\n")), vec![0x8212, 0x9234]);
    // labels inside a two-line expansion account for both words
    assert_eq!(words(&asm(&model, "la x1, here\nhere:\n    nop\n")), vec![0x8200, 0x9204, 0x0000]);
}

#[test]
fn real_instructions_win_and_arity_selects_the_pseudo() {
    let model = toy16_with(|def| {
        def.pseudo_instructions.push(PseudoDef {
            mnemonic: "add".into(),
            syntax: "add rd, rs1, rs2".into(),
            expansion: vec!["addi rd, rs1, 0".into(), "add rd, rs2".into()],
        })
    })
    .unwrap();
    assert_eq!(words(&asm(&model, "add x1, x2\n")), vec![0x2280]);
    assert_eq!(words(&asm(&model, "add x1, x2, x3\n")), vec![0x3280, 0x22C0]);
    assert_eq!(asm_err(&model, "mv x1\n"), AsmError::UnknownMnemonic { mnemonic: "mv".into(), arity: 1 });
}

#[test]
fn expansion_errors_point_at_the_pseudo_line() {
    let model = toy16();
    let diags = defasm::assemble(&model, "    nop\n    push 5\n").unwrap_err();
    assert_eq!(diags.0[0].pos.as_ref().map(|p| p.line), Some(2));
}

#[test]
fn disassembly_prefers_the_longest_pseudo() {
    let model = toy16();
    let img = asm(&model, "    push x3\n    la x2, 0x8001\n    mv x4, x5\n");
    let dis = disassemble(&model, &img, &DisasmOptions::default());
    let pseudo: Vec<(&str, Option<&str>)> =
        dis.lines.iter().filter(|l| l.kind == LineKind::Pseudo).map(|l| (l.text.as_str(), l.comment.as_deref())).collect();
    assert_eq!(
        pseudo,
        vec![
            ("push x3", Some("= addi x7, x7, -2 / sw x3, 0(x7)")),
            ("la x2, -0x7fff", Some("= lui x2, 128 / ori x2, 1")),
            ("mv x4, x5", Some("= addi x4, x5, 0")),
        ]
    );
    assert_eq!(asm(&model, &dis.text()).bytes, img.bytes);
}

#[test]
fn label_inside_an_expansion_blocks_reconstruction() {
    let model = toy16();
    let img = asm(&model, "    la x1, 0x1234\n    j 2\n");
    let text = disassemble(&model, &img, &DisasmOptions::default()).text();
    assert!(text.contains("    lui x1, 18\nL_0002:\n    ori x1, 52\n"), "{text}");
    assert!(!text.contains(" la "), "{text}");
}
