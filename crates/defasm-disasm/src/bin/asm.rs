use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use defasm::{AssembleOptions, Assembler, SourceUnit};
use defasm_disasm::{load_isa, parse_u64, symbol_labels, write_labels};

#[derive(Parser, Debug)]
#[command(author, version, about = "Assembler for defasm ISA definitions")]
struct Opts {
    /// ISA definition: a JSON file or the name of a built-in ISA
    #[arg(long, default_value = "rv32-mini")]
    isa: String,
    /// Input assembly files, laid out in the order given
    #[arg(required = true, value_name = "SRC")]
    inputs: Vec<PathBuf>,
    /// Output binary file
    #[arg(short, long)]
    output: PathBuf,
    /// Write the bare payload instead of a headered image
    #[arg(long)]
    raw: bool,
    /// Start of the text section (hex or dec)
    #[arg(long, value_parser = parse_u64)]
    origin: Option<u64>,
    /// Start of the data section (hex or dec)
    #[arg(long, value_parser = parse_u64)]
    data_origin: Option<u64>,
    /// Step budget for each directive script
    #[arg(long)]
    step_limit: Option<u64>,
    /// Export global labels to JSON (Vec<{ addr, name }>)
    #[arg(long, value_name = "FILE")]
    labels_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();
    let model = load_isa(&opts.isa)?;
    let mut units = Vec::with_capacity(opts.inputs.len());
    for path in &opts.inputs {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        units.push(SourceUnit::new(path.display().to_string(), text));
    }

    let options = AssembleOptions { origin: opts.origin, data_origin: opts.data_origin, step_limit: opts.step_limit };
    let assembly = match Assembler::new(&model).with_options(options).assemble(&units) {
        Ok(a) => a,
        Err(diags) => {
            for d in diags.iter() {
                eprintln!("error: {d}");
            }
            bail!("assembly failed with {} error(s)", diags.len());
        }
    };

    let image = &assembly.image;
    let bin = if opts.raw { image.to_raw() } else { image.to_headered()? };
    fs::write(&opts.output, &bin).with_context(|| format!("writing {}", opts.output.display()))?;
    info!(
        base = format_args!("{:#x}", image.base),
        bytes = image.bytes.len(),
        regions = image.regions.len(),
        output = %opts.output.display(),
        "assembled"
    );

    if let Some(path) = &opts.labels_out {
        write_labels(path, &symbol_labels(&assembly.symbols))?;
    }
    Ok(())
}
