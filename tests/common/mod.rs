#![allow(dead_code)]

use defasm::{assemble, BinaryImage, IsaDefinition, IsaError, IsaModel};

pub fn toy16_def() -> IsaDefinition {
    serde_json::from_str(include_str!("../fixtures/toy16.json")).unwrap()
}

pub fn toy16() -> IsaModel {
    IsaModel::new(toy16_def()).unwrap()
}

pub fn toy16_with(edit: impl FnOnce(&mut IsaDefinition)) -> Result<IsaModel, IsaError> {
    let mut def = toy16_def();
    edit(&mut def);
    IsaModel::new(def)
}

/// Assembles `src`, panicking with the rendered diagnostics on failure.
pub fn asm(model: &IsaModel, src: &str) -> BinaryImage {
    match assemble(model, src) {
        Ok(a) => a.image,
        Err(d) => panic!("assembly failed:\n{d}"),
    }
}

pub fn words(image: &BinaryImage) -> Vec<u16> {
    image.bytes.chunks(2).map(|c| u16::from_le_bytes([c[0], *c.get(1).unwrap_or(&0)])).collect()
}

/// First diagnostic of a failing assembly.
pub fn asm_err(model: &IsaModel, src: &str) -> defasm::AsmError {
    match assemble(model, src) {
        Ok(_) => panic!("assembly of {src:?} unexpectedly succeeded"),
        Err(d) => d.0[0].error.clone(),
    }
}
