mod common;

use common::toy16;
use defasm::disasm::LineKind;
use defasm::{disassemble, BinaryImage, DisasmOptions, Region, RegionKind};
use pretty_assertions::assert_eq;

fn listing(image: &BinaryImage, opts: &DisasmOptions) -> Vec<String> {
    disassemble(&toy16(), image, opts)
        .lines
        .into_iter()
        .filter(|l| l.kind != LineKind::Org)
        .map(|l| l.text)
        .collect()
}

fn zero_words(n: usize) -> BinaryImage {
    BinaryImage::from_raw(0, vec![0; n * 2])
}

#[test]
fn nine_identical_words_become_data() {
    assert_eq!(listing(&zero_words(9), &DisasmOptions::default()), vec![".space 18"]);
}

#[test]
fn seven_or_eight_identical_words_stay_code() {
    assert_eq!(listing(&zero_words(7), &DisasmOptions::default()), vec!["nop"; 7]);
    assert_eq!(listing(&zero_words(8), &DisasmOptions::default()), vec!["nop"; 8]);
}

#[test]
fn threshold_can_be_overridden() {
    let opts = DisasmOptions { data_run_threshold: Some(2), ..Default::default() };
    assert_eq!(listing(&zero_words(3), &opts), vec![".space 6"]);
}

#[test]
fn declared_code_skips_the_heuristic() {
    let mut img = zero_words(9);
    img.regions = vec![Region { start: 0, length: 18, kind: RegionKind::Code }];
    img.entry = Some(0);
    assert_eq!(listing(&img, &DisasmOptions::default()), vec!["nop"; 9]);
}

#[test]
fn data_regions_are_never_decoded() {
    // `li x1, 5` inside the ISA's ram region
    let img = BinaryImage::from_raw(0x8000, vec![0x05, 0x12]);
    assert_eq!(listing(&img, &DisasmOptions::default()), vec![".byte 0x5, 0x12"]);

    let mut tagged = BinaryImage::from_raw(0, vec![0x05, 0x12, 0x05, 0x12]);
    tagged.regions = vec![
        Region { start: 0, length: 2, kind: RegionKind::Code },
        Region { start: 2, length: 2, kind: RegionKind::Data },
    ];
    assert_eq!(listing(&tagged, &DisasmOptions::default()), vec!["li x1, 5", ".byte 0x5, 0x12"]);
}

#[test]
fn text_in_data_becomes_string_directives() {
    let mut bytes = b"Hi there\0".to_vec();
    bytes.extend_from_slice(b"tail");
    let img = BinaryImage::from_raw(0x8000, bytes);
    assert_eq!(listing(&img, &DisasmOptions::default()), vec![".asciz \"Hi there\"", ".ascii \"tail\""]);
}

#[test]
fn bytes_before_the_entry_point_are_data() {
    let mut img = BinaryImage::from_raw(0, vec![0x05, 0x12, 0x05, 0x12]);
    img.entry = Some(2);
    assert_eq!(listing(&img, &DisasmOptions::default()), vec![".byte 0x5, 0x12", "li x1, 5"]);
}
