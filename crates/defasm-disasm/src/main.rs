use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use defasm::{disassemble_bytes, DisasmOptions, Disassembly};
use defasm_disasm::{load_binary, load_isa, parse_u64, read_labels, write_labels, write_output};

#[derive(Parser, Debug)]
#[command(author, version, about = "Disassembler for defasm ISA definitions", long_about = None)]
struct Cli {
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
    /// Skip N bytes at start of file before loading
    #[arg(long, default_value_t = 0usize)]
    skip: usize,
    /// Limit bytes loaded (default: to EOF after --skip)
    #[arg(long)]
    len: Option<usize>,
    /// Import labels from JSON (Vec<{ addr, name }>)
    #[arg(long, value_name = "FILE")]
    labels_in: Option<PathBuf>,
    /// Export the labels of the listing to JSON (Vec<{ addr, name }>)
    #[arg(long, value_name = "FILE")]
    labels_out: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the code and data regions the disassembler settled on
    Regions,
    /// Print a listing that reassembles to the same bytes
    List {
        /// Runs of identical words longer than this are treated as data
        #[arg(long)]
        data_run_threshold: Option<usize>,
        /// Keep expanded instruction sequences instead of folding pseudo-instructions
        #[arg(long)]
        no_pseudo: bool,
        /// Comment every line with its address and bytes
        #[arg(long)]
        annotate: bool,
        /// Output format: text or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Write output to file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn regions_table(d: &Disassembly) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "{:<6} {:<18} {:<18} {:>10}", "kind", "start", "end", "bytes");
    for r in &d.regions {
        let _ = writeln!(buf, "{:<6} {:#018x} {:#018x} {:>10}", r.kind.to_string(), r.start, r.end(), r.length);
    }
    if let Some(entry) = d.entry {
        let _ = writeln!(buf, "entry  {entry:#018x}");
    }
    buf
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let model = load_isa(&cli.isa)?;
    let data = load_binary(&cli.input, cli.skip, cli.len)?;
    let labels = match &cli.labels_in {
        Some(path) => read_labels(path)?,
        None => Vec::new(),
    };
    let mut opts = DisasmOptions { start: cli.start, raw: cli.raw, labels, ..Default::default() };

    let d = match cli.cmd {
        Command::Regions => {
            let d = disassemble_bytes(&model, &data, &opts)?;
            print!("{}", regions_table(&d));
            d
        }
        Command::List { data_run_threshold, no_pseudo, annotate, format, out } => {
            opts.data_run_threshold = data_run_threshold;
            opts.reconstruct_pseudo = no_pseudo.then_some(false);
            opts.annotate = annotate;
            let d = disassemble_bytes(&model, &data, &opts)?;
            let text = match format {
                OutputFormat::Text => d.text(),
                OutputFormat::Json => serde_json::to_string_pretty(&d)? + "\n",
            };
            write_output(out.as_deref(), &text)?;
            d
        }
    };

    if let Some(path) = &cli.labels_out {
        write_labels(path, &d.labels)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_table_lists_every_region() {
        let model = load_isa("rv32-mini").unwrap();
        let asm = defasm::assemble(&model, "  li a0, 1\n  ebreak\n  .ascii \"done\"\n").unwrap();
        let d = defasm::disassemble(&model, &asm.image, &DisasmOptions::default());
        let table = regions_table(&d);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("code"));
        assert!(lines[2].starts_with("data"));
        assert!(lines[3].starts_with("entry"));
    }

    #[test]
    fn cli_parses_list_flags() {
        let cli = Cli::try_parse_from(["defasm-disasm", "--start", "0x100", "prog.bin", "list", "--annotate", "--format", "json"]).unwrap();
        assert_eq!(cli.start, Some(0x100));
        assert!(matches!(cli.cmd, Command::List { annotate: true, format: OutputFormat::Json, .. }));
    }
}
