use anyhow::Context;

pub mod labels;
pub mod loader;

// Shared by the `defasm-disasm`, `asm` and `run` binaries
pub use labels::{read_labels, symbol_labels, write_labels};
pub use loader::{builtin_isa, load_binary, load_isa, parse_u64, BUILTIN_ISAS};

/// Writes `text` to `out`, or stdout when no path is given.
pub fn write_output(out: Option<&std::path::Path>, text: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => std::fs::write(path, text).with_context(|| format!("writing {}", path.display())),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}
