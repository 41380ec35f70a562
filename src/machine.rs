//! Register file, flags and byte-addressable memory seen by semantics scripts.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::bits;
use crate::isa::IsaModel;
use crate::sandbox::{Host, SandboxError};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("unmapped address {addr:#x}")]
    Unmapped { addr: u64 },
    #[error("write to read-only address {addr:#x}")]
    ReadOnly { addr: u64 },
}

pub trait Bus {
    fn read_u8(&mut self, addr: u64) -> Result<u8, BusError>;
    fn write_u8(&mut self, addr: u64, val: u8) -> Result<(), BusError>;

    fn read_bytes(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, BusError> {
        (0..len as u64).map(|i| self.read_u8(addr.wrapping_add(i))).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearMemory {
    pub mem: Vec<u8>,
    pub base: u64,
}

impl LinearMemory {
    pub fn new(size: usize) -> Self {
        Self { mem: vec![0; size], base: 0 }
    }

    pub fn with_base(base: u64, bytes: Vec<u8>) -> Self {
        Self { mem: bytes, base }
    }

    fn offset(&self, addr: u64) -> Result<usize, BusError> {
        addr.checked_sub(self.base)
            .map(|o| o as usize)
            .filter(|o| *o < self.mem.len())
            .ok_or(BusError::Unmapped { addr })
    }
}

impl Bus for LinearMemory {
    fn read_u8(&mut self, addr: u64) -> Result<u8, BusError> {
        let off = self.offset(addr)?;
        Ok(self.mem[off])
    }

    fn write_u8(&mut self, addr: u64, val: u8) -> Result<(), BusError> {
        let off = self.offset(addr)?;
        self.mem[off] = val;
        Ok(())
    }
}

/// Reads as zero and discards writes; used while sizing statements in pass 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBus;

impl Bus for NullBus {
    fn read_u8(&mut self, _addr: u64) -> Result<u8, BusError> {
        Ok(0)
    }

    fn write_u8(&mut self, _addr: u64, _val: u8) -> Result<(), BusError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineState {
    names: Vec<String>,
    widths: Vec<u32>,
    hardwired: Vec<bool>,
    values: Vec<u64>,
    lookup: HashMap<String, usize>,
    case_sensitive: bool,
    flags: BTreeMap<String, bool>,
}

impl MachineState {
    /// Register file and flags declared by `model`, all cleared.
    pub fn from_model(model: &IsaModel) -> Self {
        let mut lookup = HashMap::new();
        for (i, r) in model.registers.iter().enumerate() {
            lookup.insert(model.fold(&r.name), i);
            for a in &r.aliases {
                lookup.insert(model.fold(a), i);
            }
        }
        Self {
            names: model.registers.iter().map(|r| r.name.clone()).collect(),
            widths: model.registers.iter().map(|r| r.width).collect(),
            hardwired: model.registers.iter().map(|r| r.is_zero()).collect(),
            values: vec![0; model.registers.len()],
            lookup,
            case_sensitive: model.syntax.case_sensitive,
            flags: model.flags.iter().map(|f| (f.clone(), false)).collect(),
        }
    }

    /// 64-bit registers with the given names; handy for tests and tools.
    pub fn with_registers(names: &[&str], flags: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            widths: vec![64; names.len()],
            hardwired: vec![false; names.len()],
            values: vec![0; names.len()],
            lookup: names.iter().enumerate().map(|(i, n)| (n.to_string(), i)).collect(),
            case_sensitive: true,
            flags: flags.iter().map(|f| (f.to_string(), false)).collect(),
        }
    }

    fn index(&self, name: &str) -> Option<usize> {
        if self.case_sensitive {
            self.lookup.get(name).copied()
        } else {
            self.lookup.get(&name.to_ascii_lowercase()).copied()
        }
    }

    /// Sign-extended value of a register.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.index(name).map(|i| bits::sign_extend(self.values[i], self.widths[i]))
    }

    pub fn set(&mut self, name: &str, value: i64) -> Option<()> {
        let i = self.index(name)?;
        if !self.hardwired[i] {
            self.values[i] = value as u64 & bits::mask(self.widths[i]);
        }
        Some(())
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied()
    }

    pub fn set_flag(&mut self, name: &str, value: bool) -> Option<()> {
        self.flags.get_mut(name).map(|f| *f = value)
    }

    pub fn registers(&self) -> impl Iterator<Item = (&str, i64)> {
        self.names.iter().enumerate().map(|(i, n)| (n.as_str(), bits::sign_extend(self.values[i], self.widths[i])))
    }

    pub fn flags(&self) -> impl Iterator<Item = (&str, bool)> {
        self.flags.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

/// Binds a machine state and a bus to the sandbox's capability surface.
pub struct MachineHost<'a> {
    state: &'a mut MachineState,
    bus: &'a mut dyn Bus,
    little_endian: bool,
}

impl<'a> MachineHost<'a> {
    pub fn new(state: &'a mut MachineState, bus: &'a mut dyn Bus, little_endian: bool) -> Self {
        Self { state, bus, little_endian }
    }
}

impl Host for MachineHost<'_> {
    fn register(&mut self, name: &str) -> Result<i64, SandboxError> {
        self.state.get(name).ok_or_else(|| SandboxError::Violation(format!("no register named `{name}`")))
    }

    fn set_register(&mut self, name: &str, value: i64) -> Result<(), SandboxError> {
        self.state.set(name, value).ok_or_else(|| SandboxError::Violation(format!("no register named `{name}`")))
    }

    fn flag(&mut self, name: &str) -> Result<bool, SandboxError> {
        self.state.flag(name).ok_or_else(|| SandboxError::Violation(format!("no flag named `{name}`")))
    }

    fn set_flag(&mut self, name: &str, value: bool) -> Result<(), SandboxError> {
        self.state.set_flag(name, value).ok_or_else(|| SandboxError::Violation(format!("no flag named `{name}`")))
    }

    fn read_memory(&mut self, addr: u64) -> Result<u8, SandboxError> {
        Ok(self.bus.read_u8(addr)?)
    }

    fn write_memory(&mut self, addr: u64, value: u8) -> Result<(), SandboxError> {
        Ok(self.bus.write_u8(addr, value)?)
    }

    fn little_endian(&self) -> bool {
        self.little_endian
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_memory_honours_base() {
        let mut mem = LinearMemory::with_base(0x100, vec![1, 2, 3]);
        assert_eq!(mem.read_u8(0x101).unwrap(), 2);
        assert_eq!(mem.read_u8(0xFF), Err(BusError::Unmapped { addr: 0xFF }));
        assert!(mem.write_u8(0x103, 9).is_err());
        assert_eq!(mem.read_bytes(0x100, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn registers_mask_and_sign_extend() {
        let mut st = MachineState::with_registers(&["r0"], &["c"]);
        st.set("r0", -5).unwrap();
        assert_eq!(st.get("r0"), Some(-5));
        assert!(st.set("r9", 1).is_none());
        st.set_flag("c", true).unwrap();
        assert_eq!(st.flag("c"), Some(true));
    }
}
