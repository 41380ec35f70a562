pub mod bits;
pub mod decoder;
pub mod disasm;
pub mod encoder;
pub mod error;
pub mod exec;
pub mod expand;
pub mod image;
pub mod isa;
pub mod machine;
pub mod parser;
pub mod sandbox;
pub mod symbols;

pub use decoder::{DecodedInstruction, DecodedOperand, Decoder};
pub use disasm::{disassemble, disassemble_bytes, fmt_decoded, DisasmOptions, Disassembly, KnownLabel};
pub use encoder::{assemble, AssembleOptions, Assembler, Assembly};
pub use error::{AsmError, Diagnostic, Diagnostics, IsaError, SourcePos};
pub use exec::{Executor, ScriptExecutor};
pub use image::{BinaryImage, Region};
pub use isa::{IsaDefinition, IsaModel, RegionKind};
pub use machine::{Bus, LinearMemory, MachineState};
pub use parser::SourceUnit;
