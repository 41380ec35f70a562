//! Name → value bindings shared by both assembler passes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bits;
use crate::error::AsmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    /// Visible only inside the source unit with this index.
    Local(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Label,
    Constant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub value: Option<i64>,
    pub defined: bool,
    pub scope: Scope,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: BTreeMap<(Scope, String), Symbol>,
    unit: usize,
    current_address: u64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the source unit that dot-prefixed names belong to.
    pub fn set_unit(&mut self, unit: usize) {
        self.unit = unit;
    }

    pub fn set_current_address(&mut self, addr: u64) {
        self.current_address = addr;
    }

    pub fn current_address(&self) -> u64 {
        self.current_address
    }

    pub fn scope_of(&self, name: &str) -> Scope {
        if name.starts_with('.') {
            Scope::Local(self.unit)
        } else {
            Scope::Global
        }
    }

    /// Records a reference in `scope`; the symbol stays undefined until
    /// [`define`](Self::define). Callers normally pass [`scope_of`](Self::scope_of).
    pub fn declare(&mut self, name: &str, scope: Scope, kind: SymbolKind) -> &Symbol {
        self.symbols.entry((scope, name.to_string())).or_insert_with(|| Symbol {
            name: name.to_string(),
            value: None,
            defined: false,
            scope,
            kind,
        })
    }

    pub fn define(&mut self, name: &str, value: i64, kind: SymbolKind) -> Result<(), AsmError> {
        let scope = self.scope_of(name);
        let sym = self.symbols.entry((scope, name.to_string())).or_insert_with(|| Symbol {
            name: name.to_string(),
            value: None,
            defined: false,
            scope,
            kind,
        });
        if sym.defined {
            return Err(AsmError::DuplicateSymbol { name: name.to_string() });
        }
        sym.value = Some(value);
        sym.defined = true;
        sym.kind = kind;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(&(self.scope_of(name), name.to_string()))
    }

    pub fn resolve(&self, name: &str) -> Option<i64> {
        self.get(name).filter(|s| s.defined).and_then(|s| s.value)
    }

    /// `name[high:low]`, as an unsigned value.
    pub fn resolve_slice(&self, name: &str, high: u32, low: u32) -> Option<i64> {
        self.resolve(name).map(|v| bits::extract(v as u64, high, low) as i64)
    }

    pub fn undefined(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values().filter(|s| !s.defined)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    /// Defined labels as `(address, name)`, ordered by address.
    pub fn labels(&self) -> Vec<(u64, String)> {
        let mut out: Vec<(u64, String)> = self
            .symbols
            .values()
            .filter(|s| s.kind == SymbolKind::Label)
            .filter_map(|s| s.value.filter(|_| s.defined).map(|v| (v as u64, s.name.clone())))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn forward_reference_then_definition() {
        let mut st = SymbolTable::new();
        st.declare("loop", Scope::Global, SymbolKind::Label);
        assert_eq!(st.resolve("loop"), None);
        assert_eq!(st.undefined().count(), 1);
        st.define("loop", 0x40, SymbolKind::Label).unwrap();
        assert_eq!(st.resolve("loop"), Some(0x40));
        assert_eq!(st.undefined().count(), 0);
        assert_eq!(
            st.define("loop", 0x44, SymbolKind::Label),
            Err(AsmError::DuplicateSymbol { name: "loop".into() })
        );
    }

    #[test]
    fn local_symbols_are_per_unit() {
        let mut st = SymbolTable::new();
        st.set_unit(0);
        st.define(".l", 1, SymbolKind::Label).unwrap();
        st.define("g", 2, SymbolKind::Label).unwrap();
        st.set_unit(1);
        assert_eq!(st.resolve(".l"), None);
        assert_eq!(st.resolve("g"), Some(2));
        st.define(".l", 3, SymbolKind::Label).unwrap();
        assert_eq!(st.resolve(".l"), Some(3));

        let scope = st.scope_of(".m");
        assert_eq!(scope, Scope::Local(1));
        assert_eq!(st.declare(".m", scope, SymbolKind::Label).scope, Scope::Local(1));
        assert_eq!(st.scope_of("g"), Scope::Global);
    }

    #[test]
    fn slices_are_unsigned() {
        let mut st = SymbolTable::new();
        st.define("k", -1, SymbolKind::Constant).unwrap();
        assert_eq!(st.resolve_slice("k", 3, 0), Some(0xF));
        st.define("addr", 0x1234, SymbolKind::Label).unwrap();
        assert_eq!(st.resolve_slice("addr", 15, 8), Some(0x12));
        assert_eq!(st.labels(), vec![(0x1234, "addr".to_string())]);
    }
}
