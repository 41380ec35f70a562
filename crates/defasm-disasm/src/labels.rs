//! Known-label files: a JSON array of `{ "addr": .., "name": .. }`.

use std::path::Path;

use anyhow::{Context, Result};
use defasm::symbols::SymbolTable;
use defasm::KnownLabel;

pub fn read_labels(path: &Path) -> Result<Vec<KnownLabel>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading labels from {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing labels in {}", path.display()))
}

pub fn write_labels(path: &Path, labels: &[KnownLabel]) -> Result<()> {
    let json = serde_json::to_string_pretty(labels)?;
    std::fs::write(path, json).with_context(|| format!("writing labels to {}", path.display()))
}

/// Global labels of an assembled program, by address. Unit-local names are
/// left out since they may repeat across units.
pub fn symbol_labels(symbols: &SymbolTable) -> Vec<KnownLabel> {
    symbols
        .labels()
        .into_iter()
        .filter(|(_, name)| !name.starts_with('.'))
        .map(|(addr, name)| KnownLabel { addr, name })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_isa;
    use pretty_assertions::assert_eq;

    #[test]
    fn labels_survive_a_file_round_trip() {
        let path = std::env::temp_dir().join(format!("defasm_labels_{}.json", std::process::id()));
        let labels = vec![KnownLabel { addr: 0x10, name: "main".into() }, KnownLabel { addr: 0x40, name: "exit".into() }];
        write_labels(&path, &labels).unwrap();
        assert_eq!(read_labels(&path).unwrap(), labels);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn assembled_globals_become_known_labels() {
        let model = load_isa("rv32-mini").unwrap();
        let asm = defasm::assemble(&model, "main:\n  nop\n.skip:\n  nop\nend:\n  ebreak\n").unwrap();
        assert_eq!(
            symbol_labels(&asm.symbols),
            vec![KnownLabel { addr: 0, name: "main".into() }, KnownLabel { addr: 8, name: "end".into() }]
        );
    }
}
