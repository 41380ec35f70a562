mod common;

use common::{asm, asm_err, toy16, toy16_with};
use defasm::{disassemble, AsmError, DisasmOptions, Region, RegionKind};
use pretty_assertions::assert_eq;

#[test]
fn text_and_data_keep_separate_cursors() {
    let img = asm(&toy16(), ".text\n li x1, 5\n .data\n .le16 0x1234\n .text\n halt\n");
    assert_eq!(img.base, 0);
    assert_eq!(img.entry, Some(0));
    assert_eq!(&img.bytes[..4], &[0x05, 0x12, 0x00, 0xF0]);
    assert_eq!(img.read(0x8000, 2), Some(&[0x34, 0x12][..]));
    assert_eq!(
        img.regions,
        vec![
            Region { start: 0, length: 4, kind: RegionKind::Code },
            Region { start: 0x8000, length: 2, kind: RegionKind::Data },
        ]
    );
}

#[test]
fn align_and_space_pad_the_cursor() {
    let model = toy16();
    assert_eq!(asm(&model, ".byte 1\n.align 4\n.byte 2\n").bytes, vec![1, 0, 0, 0, 2]);
    assert_eq!(asm(&model, ".space 3, 0xaa\n.byte 1\n").bytes, vec![0xAA, 0xAA, 0xAA, 1]);
    assert_eq!(asm(&model, ".org 0x10\nhere: .half here\n").bytes, vec![0x10, 0]);
}

#[test]
fn script_cursor_moves_are_zero_filled() {
    let img = asm(&toy16(), ".byte 1\n.pad_to 4\n.byte 9\n");
    assert_eq!(img.bytes, vec![1, 0, 0, 0, 9]);
}

#[test]
fn append_scripts_extend_the_encoded_word() {
    let img = asm(&toy16(), "ldi x1, 0x1234\nhalt\n");
    assert_eq!(img.bytes, vec![0x00, 0xA2, 0x34, 0x12, 0x00, 0xF0]);
}

#[test]
fn overlapping_output_is_fatal() {
    let model = toy16();
    assert_eq!(asm_err(&model, ".org 4\nnop\n.org 4\nnop\n"), AsmError::OverlappingOutput { address: 4 });
}

#[test]
fn writes_past_the_address_space_fail() {
    let model = toy16();
    assert_eq!(asm_err(&model, ".org 0xfffe\nnop\nnop\n"), AsmError::AddressOutOfRange { address: 0x10000 });
}

#[test]
fn oversized_fills_are_range_errors() {
    let model = toy16();
    let past_end = AsmError::AddressOutOfRange { address: 0x10000 };
    assert_eq!(asm_err(&model, "    .space 0x7fffffffffff\n"), past_end);
    assert_eq!(asm_err(&model, ".byte 1\n.space 0x10000\n"), past_end);
    assert_eq!(asm_err(&model, ".byte 1\n.align 0x7fffffffffff\n"), past_end);
    assert_eq!(asm_err(&model, ".byte 1\n.pad_to 0x7fffffffffff\n"), past_end);
    assert_eq!(asm(&model, ".byte 1\n.space 0xffff\n").bytes.len(), 0x10000);
}

#[test]
fn hex_escapes_emit_single_bytes() {
    let model = toy16();
    assert_eq!(asm(&model, ".ascii \"\\xff\"\n").bytes, vec![0xFF]);
    assert_eq!(asm(&model, ".asciz \"a\\x80\"\n").bytes, vec![0x61, 0x80, 0]);
    assert_eq!(asm(&model, ".byte '\\'', '\\x7f'\n").bytes, vec![0x27, 0x7F]);
}

#[test]
fn high_bytes_in_strings_survive_the_listing() {
    let model = toy16_with(|def| def.disassembly.printable_max = 0xFF).unwrap();
    let img = asm(&model, ".org 0x8000\n.asciz \"caf\\xe9\\xff\"\n");
    let text = disassemble(&model, &img, &DisasmOptions::default()).text();
    assert!(text.contains(".asciz \"caf\\xe9\\xff\""), "{text}");
    assert_eq!(asm(&model, &text).bytes, img.bytes);
}

#[test]
fn runaway_expressions_are_parse_errors() {
    let model = toy16();
    let deep = format!(".byte {}1{}\n", "(".repeat(5000), ")".repeat(5000));
    assert!(matches!(asm_err(&model, &deep), AsmError::Parse { .. }));
    let chain = format!(".half 0{}\n", "+1".repeat(5000));
    assert!(matches!(asm_err(&model, &chain), AsmError::Parse { .. }));
    assert_eq!(asm(&model, ".half ((1 + 2) - -3)\n").bytes, vec![6, 0]);
}

#[test]
fn directive_names_and_arity_are_checked() {
    let model = toy16();
    assert_eq!(asm_err(&model, ".bogus 1\n"), AsmError::UnknownDirective { name: "bogus".into() });
    assert!(matches!(asm_err(&model, ".text 1\n"), AsmError::UnsupportedOperand { .. }));
    assert!(matches!(asm_err(&model, ".ascii 5\n"), AsmError::UnsupportedOperand { .. }));
}

#[test]
fn annotated_listing_shows_addresses_and_bytes() {
    let model = toy16();
    let img = asm(&model, "li x1, 5\n.byte 7\n");
    let opts = DisasmOptions { annotate: true, reconstruct_pseudo: Some(false), ..Default::default() };
    let d = disassemble(&model, &img, &opts);
    let comments: Vec<Option<String>> = d.lines.iter().skip(1).map(|l| l.comment.clone()).collect();
    assert_eq!(comments, vec![Some("0x0000: 05 12".to_string()), Some("0x0002: 07".to_string())]);
}
