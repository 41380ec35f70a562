mod common;

use common::toy16;
use defasm::{
    disassemble, AssembleOptions, Assembler, DecodedInstruction, Decoder, DisasmOptions, Executor, LinearMemory, MachineState,
    ScriptExecutor,
};
use pretty_assertions::assert_eq;

const SRC: &str = "LI x1, 5\nLI x2, -5\nADD x1, x2\n";

#[test]
fn li_li_add_assembles_decodes_and_executes() {
    let model = toy16();
    let asm = Assembler::new(&model)
        .with_options(AssembleOptions { origin: Some(0x20), ..Default::default() })
        .assemble_str(SRC)
        .unwrap();
    let img = asm.image;
    assert_eq!(img.base, 0x20);
    assert_eq!(img.entry, Some(0x20));
    assert_eq!(img.bytes, vec![0x05, 0x12, 0xFB, 0x15, 0x80, 0x22]);

    let dis = disassemble(&model, &img, &DisasmOptions::default());
    let text: Vec<&str> = dis.instructions().map(|l| l.text.as_str()).collect();
    assert_eq!(text, vec!["li x1, 5", "li x2, -5", "add x1, x2"]);

    let program: Vec<DecodedInstruction> = (0..3u64)
        .map(|i| model.decode(&img.bytes[(i * 2) as usize..], 0x20 + i * 2).unwrap())
        .collect();
    let mut state = MachineState::from_model(&model);
    let mut mem = LinearMemory::new(0x100);
    let exec = ScriptExecutor::new(&model);

    // assembling ran nothing
    assert_eq!(state.get("x1"), Some(0));
    assert_eq!(exec.run_all(&mut state, &mut mem, &program[..2]).unwrap(), 2);
    assert_eq!(state.get("x1"), Some(5));
    assert_eq!(state.get("x2"), Some(-5));
    assert_eq!(state.flag("z"), Some(false));

    exec.exec(&mut state, &mut mem, &program[2]).unwrap();
    assert_eq!(state.get("x1"), Some(0));
    assert_eq!(state.flag("z"), Some(true));
}

#[test]
fn memory_semantics_go_through_the_bus() {
    let model = toy16();
    let img = Assembler::new(&model).assemble_str("li x1, 0x40\nli x2, 0x1234\nsw x2, 2(x1)\nlw x3, 2(x1)\nhalt\n");
    // 0x1234 does not fit li's 9-bit immediate
    assert!(img.is_err());

    let img = Assembler::new(&model)
        .assemble_str("li x1, 0x40\nli x2, -2\nsw x2, 2(x1)\nlw x3, 2(x1)\nhalt\n")
        .unwrap()
        .image;
    let mut program = Vec::new();
    let mut pc = img.base;
    while let Some(d) = img.read(pc, 2).and_then(|b| model.decode(b, pc)) {
        pc = d.end();
        program.push(d);
    }
    assert_eq!(program.len(), 5);

    let mut state = MachineState::from_model(&model);
    let mut mem = LinearMemory::new(0x100);
    // halt has no semantics
    assert_eq!(ScriptExecutor::new(&model).run_all(&mut state, &mut mem, &program).unwrap(), 4);
    assert_eq!(&mem.mem[0x42..0x44], &[0xFE, 0xFF]);
    assert_eq!(state.get("x3"), Some(-2));
}

#[test]
fn zero_register_ignores_writes() {
    let model = toy16();
    let img = Assembler::new(&model).assemble_str("li zero, 7\n").unwrap().image;
    let d = model.decode(&img.bytes, 0).unwrap();
    let mut state = MachineState::from_model(&model);
    ScriptExecutor::new(&model).exec(&mut state, &mut LinearMemory::new(16), &d).unwrap();
    assert_eq!(state.get("x0"), Some(0));
}
