//! ISA definitions: the serde schema and the validated model built from it.

pub mod def;
mod model;

pub use def::{
    AddressSpaceDef, ArgType, BitRange, DirectiveAction, DirectiveDef, Endianness, FieldDef, FieldKind, InstructionDef,
    IsaDefinition, MemoryRegionDef, PcRelativeBase, PseudoDef, RegionKind, ScriptMode, SyntaxRules, TargetKind,
};
pub use model::{Directive, Field, Instruction, IsaModel, OperandKind, OperandSpec, Pseudo, PseudoSlot, Register, Slot};
