use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use defasm::{BinaryImage, Decoder, Executor, IsaModel, LinearMemory, MachineState, RegionKind, ScriptExecutor};
use defasm_disasm::{load_binary, load_isa, parse_u64};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run the semantics scripts of a straight-line program and dump the machine state"
)]
struct Opts {
    /// ISA definition: a JSON file or the name of a built-in ISA
    #[arg(long, default_value = "rv32-mini")]
    isa: String,
    /// Input binary path (headered image or raw bytes)
    #[arg(value_name = "BINFILE")]
    input: PathBuf,
    /// Treat the input as raw bytes even if it starts with a header
    #[arg(long)]
    raw: bool,
    /// Load address of raw input (hex or dec)
    #[arg(long, value_parser = parse_u64)]
    start: Option<u64>,
    /// First instruction to run; defaults to the image entry
    #[arg(short, long, value_parser = parse_u64)]
    entry: Option<u64>,
    /// Scratch memory appended after the image, in bytes
    #[arg(long, default_value_t = 0x1_0000usize)]
    scratch: usize,
    /// Stop after this many instructions
    #[arg(long, default_value_t = 100_000usize)]
    max_instr: usize,
    /// Also print registers that are still zero
    #[arg(long)]
    all: bool,
}

/// Decodes and executes instructions in address order from `entry` until
/// the image ends, a word does not decode, or `max_instr` is reached.
/// Returns how many instructions ran.
fn run_linear(
    model: &IsaModel,
    image: &BinaryImage,
    entry: u64,
    state: &mut MachineState,
    mem: &mut LinearMemory,
    max_instr: usize,
) -> Result<usize> {
    let exec = ScriptExecutor::new(model);
    let mut pc = entry;
    let mut count = 0;
    while count < max_instr && image.contains(pc) {
        if image.region_at(pc).is_some_and(|r| r.kind == RegionKind::Data) {
            break;
        }
        let rest = &image.bytes[(pc - image.base) as usize..];
        let Some(d) = model.decode(rest, pc) else {
            warn!(pc = format_args!("{pc:#x}"), "no instruction matches; stopping");
            break;
        };
        exec.exec(state, mem, &d).with_context(|| format!("executing `{}` at {pc:#x}", defasm::fmt_decoded(model, &d)))?;
        pc = d.end();
        count += 1;
    }
    debug!(count, pc = format_args!("{pc:#x}"), "stopped");
    Ok(count)
}

fn dump(state: &MachineState, all: bool) -> String {
    let mut buf = String::new();
    for (name, value) in state.registers() {
        if all || value != 0 {
            let _ = writeln!(buf, "{name:<6} {value:>20} {:#018x}", value as u64);
        }
    }
    for (name, set) in state.flags() {
        let _ = writeln!(buf, "flag {name} = {}", u8::from(set));
    }
    buf
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();
    let model = load_isa(&opts.isa)?;
    let data = load_binary(&opts.input, 0, None)?;
    let image = if !opts.raw && BinaryImage::is_headered(&data) {
        BinaryImage::from_headered(&data)?
    } else {
        BinaryImage::from_raw(opts.start.unwrap_or(model.address_space.default_code_start), data)
    };

    let mut bytes = image.bytes.clone();
    bytes.resize(bytes.len() + opts.scratch, 0);
    let mut mem = LinearMemory::with_base(image.base, bytes);
    let mut state = MachineState::from_model(&model);
    let entry = opts.entry.or(image.entry).unwrap_or(image.base);

    let count = run_linear(&model, &image, entry, &mut state, &mut mem, opts.max_instr)?;
    println!("ran {count} instruction(s) from {entry:#x}");
    print!("{}", dump(&state, opts.all));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_program_updates_registers_and_memory() {
        let model = load_isa("rv32-mini").unwrap();
        let src = "
            li a0, 40
            addi a0, a0, 2
            li t0, 0x100
            sw a0, 4(t0)
            lw a1, 4(t0)
            ebreak
        ";
        let image = defasm::assemble(&model, src).unwrap().image;
        let mut mem = LinearMemory::new(0x200);
        let mut state = MachineState::from_model(&model);
        let ran = run_linear(&model, &image, 0, &mut state, &mut mem, 100).unwrap();
        assert_eq!(ran, 6);
        assert_eq!(state.get("a0"), Some(42));
        assert_eq!(state.get("a1"), Some(42));
        assert_eq!(&mem.mem[0x104..0x108], &[42, 0, 0, 0]);
        assert!(dump(&state, false).contains("x10"));
    }

    #[test]
    fn instruction_budget_stops_the_run() {
        let model = load_isa("rv32-mini").unwrap();
        let image = defasm::assemble(&model, "nop\nnop\nnop\n").unwrap().image;
        let mut mem = LinearMemory::new(16);
        let mut state = MachineState::from_model(&model);
        assert_eq!(run_linear(&model, &image, 0, &mut state, &mut mem, 2).unwrap(), 2);
    }
}
