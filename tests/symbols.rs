mod common;

use common::{asm, asm_err, toy16, words};
use defasm::symbols::Scope;
use defasm::{AsmError, Assembler, SourceUnit};
use pretty_assertions::assert_eq;

#[test]
fn forward_jump_resolves() {
    let model = toy16();
    // j at 0 jumps 4 bytes ahead: offset bits [12:1] = 2
    let img = asm(&model, "    j end\n    nop\nend:\n    halt\n");
    assert_eq!(words(&img), vec![0x4002, 0x0000, 0xF000]);
}

#[test]
fn equ_may_depend_on_later_labels() {
    let model = toy16();
    let img = asm(&model, "    .equ len, end - begin\nbegin:\n    .half len\n    .ascii \"abcd\"\nend:\n");
    assert_eq!(img.bytes, vec![6, 0, b'a', b'b', b'c', b'd']);
}

#[test]
fn locals_stay_inside_their_unit() {
    let model = toy16();
    let units = [
        SourceUnit::new("a.s", "start:\n.loop:\n    j .loop\n    j shared\n"),
        SourceUnit::new("b.s", "shared:\n.loop:\n    j .loop\n"),
    ];
    let a = Assembler::new(&model).assemble(&units).unwrap();
    assert_eq!(words(&a.image), vec![0x4000, 0x4001, 0x4000]);

    let locals: Vec<(Scope, Option<i64>)> = a.symbols.iter().filter(|s| s.name == ".loop").map(|s| (s.scope, s.value)).collect();
    assert_eq!(locals, vec![(Scope::Local(0), Some(0)), (Scope::Local(1), Some(4))]);
    assert_eq!(a.symbols.resolve("shared"), Some(4));
    assert!(a.symbols.labels().contains(&(0, "start".to_string())));
}

#[test]
fn local_from_another_unit_is_undefined() {
    let model = toy16();
    let units = [SourceUnit::new("a.s", ".only_a:\n    nop\n"), SourceUnit::new("b.s", "    j .only_a\n")];
    let err = Assembler::new(&model).assemble(&units).unwrap_err();
    assert_eq!(err.0[0].error, AsmError::UndefinedSymbol { name: ".only_a".into() });
    assert_eq!(err.0[0].pos.as_ref().map(|p| (p.file.as_str(), p.line)), Some(("b.s", 1)));
}

#[test]
fn unresolved_and_duplicate_symbols() {
    let model = toy16();
    assert_eq!(asm_err(&model, "    j nowhere\n"), AsmError::UndefinedSymbol { name: "nowhere".into() });
    assert_eq!(asm_err(&model, "a:\n    nop\na:\n"), AsmError::DuplicateSymbol { name: "a".into() });
    assert_eq!(asm_err(&model, "    .equ k, missing + 1\n"), AsmError::UndefinedSymbol { name: "k".into() });
}

#[test]
fn bitfield_slices_of_symbols() {
    let model = toy16();
    let img = asm(&model, "    .equ target, 0x1234\n    lui x2, target[15:8]\n    ori x2, target[7:0]\n");
    assert_eq!(words(&img), vec![0x8412, 0x9434]);
}
