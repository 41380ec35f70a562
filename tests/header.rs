mod common;

use common::{asm, toy16};
use defasm::disasm::LineKind;
use defasm::{disassemble, disassemble_bytes, AsmError, BinaryImage, DisasmOptions, Region, RegionKind};
use pretty_assertions::assert_eq;

const PROGRAM: &str = "
    .org 0x10
start:
    li x1, 5
    halt
    .byte 7, 8
";

#[test]
fn headered_image_survives_a_file_round_trip() {
    let image = asm(&toy16(), PROGRAM);
    assert_eq!(image.entry, Some(0x10));
    let file = image.to_headered().unwrap();
    assert!(BinaryImage::is_headered(&file));
    assert_eq!(&file[..4], b"DFAS");
    assert_eq!(BinaryImage::from_headered(&file).unwrap(), image);
}

#[test]
fn header_layout_is_little_endian() {
    let mut image = BinaryImage::from_raw(0x20, vec![0xAA, 0xBB]);
    image.regions = vec![Region { start: 0x21, length: 1, kind: RegionKind::Data }];
    image.entry = Some(0x20);
    let file = image.to_headered().unwrap();
    let mut expected = b"DFAS".to_vec();
    expected.extend_from_slice(&[1, 0, 1, 0]);
    expected.extend_from_slice(&0x20u64.to_le_bytes());
    expected.extend_from_slice(&0x20u64.to_le_bytes());
    expected.extend_from_slice(&0x21u64.to_le_bytes());
    expected.extend_from_slice(&1u64.to_le_bytes());
    expected.push(1);
    expected.extend_from_slice(&[0xAA, 0xBB]);
    assert_eq!(file, expected);
}

#[test]
fn headered_bytes_disassemble_like_the_image() {
    let model = toy16();
    let image = asm(&model, PROGRAM);
    let opts = DisasmOptions::default();
    let from_file = disassemble_bytes(&model, &image.to_headered().unwrap(), &opts).unwrap();
    let direct = disassemble(&model, &image, &opts);
    assert_eq!(from_file.text(), direct.text());
    assert_eq!(from_file.entry, Some(0x10));
    assert_eq!(from_file.regions, direct.regions);
}

#[test]
fn raw_bytes_load_at_the_requested_start() {
    let model = toy16();
    let opts = DisasmOptions { start: Some(0x40), ..Default::default() };
    let d = disassemble_bytes(&model, &[0x05, 0x12], &opts).unwrap();
    assert_eq!(d.base, 0x40);
    assert_eq!(d.lines[0].kind, LineKind::Org);
    assert_eq!(d.lines[0].text, ".org 0x40");
    assert_eq!(d.lines[1].text, "li x1, 5");
}

#[test]
fn raw_flag_ignores_a_header() {
    let model = toy16();
    let file = asm(&model, PROGRAM).to_headered().unwrap();
    let opts = DisasmOptions { raw: true, ..Default::default() };
    let d = disassemble_bytes(&model, &file, &opts).unwrap();
    assert_eq!(d.base, 0);
    assert_eq!(d.entry, None);
}

#[test]
fn malformed_headers_are_rejected() {
    let good = BinaryImage::from_raw(0, vec![1, 2]).to_headered().unwrap();

    let mut magic = good.clone();
    magic[0] = b'X';
    assert!(matches!(BinaryImage::from_headered(&magic), Err(AsmError::InvalidBinaryFormat(_))));

    let mut version = good.clone();
    version[4] = 2;
    assert_eq!(
        BinaryImage::from_headered(&version),
        Err(AsmError::InvalidBinaryFormat("unsupported version 2".into()))
    );

    assert!(matches!(BinaryImage::from_headered(&good[..10]), Err(AsmError::InvalidBinaryFormat(_))));

    let model = toy16();
    assert!(disassemble_bytes(&model, &version, &DisasmOptions::default()).is_err());
}

#[test]
fn regions_must_lie_inside_the_payload() {
    let mut image = BinaryImage::from_raw(0x10, vec![0; 4]);
    image.regions = vec![Region { start: 0x12, length: 8, kind: RegionKind::Code }];
    assert!(matches!(BinaryImage::from_headered(&image.to_headered().unwrap()), Err(AsmError::InvalidBinaryFormat(_))));

    image.regions = vec![Region { start: 0x10, length: 4, kind: RegionKind::Code }];
    let mut file = image.to_headered().unwrap();
    file[24 + 16] = 7;
    assert_eq!(
        BinaryImage::from_headered(&file),
        Err(AsmError::InvalidBinaryFormat("unknown region kind 7".into()))
    );
}
