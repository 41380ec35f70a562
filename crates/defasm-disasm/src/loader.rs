use std::path::Path;

use anyhow::{bail, Context, Result};
use defasm::{IsaDefinition, IsaModel};
use tracing::debug;

/// ISA definitions shipped with the tools, selectable by name.
pub const BUILTIN_ISAS: &[(&str, &str)] = &[("rv32-mini", include_str!("../isa/rv32-mini.json"))];

pub fn builtin_isa(name: &str) -> Option<&'static str> {
    BUILTIN_ISAS.iter().find(|(n, _)| *n == name).map(|(_, text)| *text)
}

/// Loads an ISA definition from a JSON file, falling back to a built-in
/// definition of that name.
pub fn load_isa(path_or_name: &str) -> Result<IsaModel> {
    let path = Path::new(path_or_name);
    let (origin, text) = if path.is_file() {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading ISA definition {}", path.display()))?;
        (path.display().to_string(), text)
    } else if let Some(text) = builtin_isa(path_or_name) {
        (format!("built-in {path_or_name}"), text.to_string())
    } else {
        let known: Vec<&str> = BUILTIN_ISAS.iter().map(|(n, _)| *n).collect();
        bail!("`{path_or_name}` is neither a file nor a built-in ISA ({})", known.join(", "));
    };
    let def: IsaDefinition = serde_json::from_str(&text).with_context(|| format!("parsing ISA definition {origin}"))?;
    let model = IsaModel::new(def).with_context(|| format!("building ISA model from {origin}"))?;
    debug!(isa = %model.name, %origin, instructions = model.instructions.len(), "loaded ISA");
    Ok(model)
}

/// Reads an input file, dropping `skip` leading bytes and keeping at most `len`.
pub fn load_binary(path: &Path, skip: usize, len: Option<usize>) -> Result<Vec<u8>> {
    let file = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    anyhow::ensure!(skip <= file.len(), "--skip exceeds file size");
    let mut payload = &file[skip..];
    if let Some(lim) = len {
        anyhow::ensure!(lim <= payload.len(), "--len exceeds remaining file size after skip");
        payload = &payload[..lim];
    }
    Ok(payload.to_vec())
}

/// Hex (`0x`), binary (`0b`) or decimal address for CLI flags.
pub fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.trim().replace('_', "");
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2)
    } else {
        s.parse::<u64>()
    };
    parsed.map_err(|e| format!("bad number `{s}`: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_u64_hex_bin_and_dec() {
        assert_eq!(parse_u64("0x10").unwrap(), 0x10);
        assert_eq!(parse_u64("0b101").unwrap(), 5);
        assert_eq!(parse_u64("16").unwrap(), 16);
        assert_eq!(parse_u64("0x1000_0000").unwrap(), 0x1000_0000);
        assert!(parse_u64("zz").is_err());
    }

    #[test]
    fn builtin_definitions_build() {
        for (name, _) in BUILTIN_ISAS {
            let model = load_isa(name).unwrap();
            assert_eq!(&model.name, name);
        }
        assert!(load_isa("no-such-isa").is_err());
    }

    #[test]
    fn loader_applies_skip_and_len() {
        let path = std::env::temp_dir().join(format!("defasm_loader_{}.bin", std::process::id()));
        std::fs::write(&path, [0u8, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(load_binary(&path, 2, Some(3)).unwrap(), vec![2, 3, 4]);
        assert_eq!(load_binary(&path, 4, None).unwrap(), vec![4, 5]);
        assert!(load_binary(&path, 7, None).is_err());
        assert!(load_binary(&path, 2, Some(5)).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
