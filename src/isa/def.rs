//! Serde schema of an ISA definition document.
//!
//! The tools crate deserialises these from JSON; the core only consumes the
//! typed structures and turns them into an [`IsaModel`](super::IsaModel).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsaDefinition {
    pub name: String,
    /// bits
    pub word_size: u32,
    /// bits; the default size of every instruction
    pub instruction_size: u32,
    #[serde(default)]
    pub variable_length: bool,
    #[serde(default)]
    pub endianness: Endianness,
    pub registers: Vec<RegisterDef>,
    #[serde(default)]
    pub flags: Vec<String>,
    pub address_space: AddressSpaceDef,
    pub instructions: Vec<InstructionDef>,
    #[serde(default)]
    pub directives: Vec<DirectiveDef>,
    #[serde(default)]
    pub pseudo_instructions: Vec<PseudoDef>,
    #[serde(default, alias = "syntax")]
    pub assembly_syntax: SyntaxRules,
    #[serde(default)]
    pub disassembly: DisassemblyRules,
    #[serde(default)]
    pub pc_relative_base: PcRelativeBase,
    #[serde(default)]
    pub script_step_limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    pub fn is_little(self) -> bool {
        self == Endianness::Little
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcRelativeBase {
    /// Offsets are measured from the instruction's own address.
    #[default]
    Current,
    /// Offsets are measured from the address following the instruction.
    Next,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDef {
    pub name: String,
    /// bits
    #[serde(alias = "bit_width", alias = "width")]
    pub size: u32,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    /// Encoding number; defaults to the position in the register list.
    #[serde(default)]
    pub number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSpaceDef {
    #[serde(deserialize_with = "de_number")]
    pub size: u64,
    #[serde(default, deserialize_with = "de_number")]
    pub default_code_start: u64,
    #[serde(default, deserialize_with = "de_number")]
    pub default_data_start: u64,
    #[serde(default, deserialize_with = "de_number")]
    pub default_stack_start: u64,
    #[serde(default, alias = "named_regions", alias = "memory_layout")]
    pub regions: Vec<MemoryRegionDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRegionDef {
    pub name: String,
    #[serde(deserialize_with = "de_number")]
    pub start: u64,
    /// inclusive
    #[serde(deserialize_with = "de_number")]
    pub end: u64,
    #[serde(default)]
    pub kind: RegionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    #[default]
    Code,
    #[serde(alias = "data_section")]
    Data,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Code => f.write_str("code"),
            RegionKind::Data => f.write_str("data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionDef {
    pub mnemonic: String,
    #[serde(default)]
    pub format: Option<String>,
    /// Operand order as written, e.g. `"lw rd, imm(rs1)"`.
    pub syntax: String,
    /// bits; overrides `instruction_size` for variable-length ISAs
    #[serde(default)]
    pub size: Option<u32>,
    pub encoding: EncodingDef,
    #[serde(default)]
    pub semantics_script: Option<String>,
    #[serde(default)]
    pub semantics_mode: ScriptMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptMode {
    /// Only run when a caller explicitly executes the instruction's semantics.
    #[default]
    Execute,
    /// Script output replaces the field encoding.
    Encode,
    /// Script output is emitted after the encoded word.
    Append,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodingDef {
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(alias = "bit_range")]
    pub bits: BitRange,
    pub kind: FieldKind,
    #[serde(default, deserialize_with = "de_opt_number")]
    pub value: Option<u64>,
    #[serde(default)]
    pub signed: bool,
    /// Syntax operand fed by this field; defaults to the field name.
    #[serde(default)]
    pub operand: Option<String>,
    /// Slice of the logical operand stored in this field.
    #[serde(default)]
    pub operand_bits: Option<BitRange>,
    #[serde(default)]
    pub target: Option<TargetKind>,
    #[serde(default)]
    pub truncate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Fixed,
    Register,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Relative,
    Absolute,
}

/// Inclusive `high:low` bit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BitRangeRepr", into = "String")]
pub struct BitRange {
    pub high: u32,
    pub low: u32,
}

impl BitRange {
    pub fn new(high: u32, low: u32) -> Self {
        Self { high, low }
    }

    pub fn width(&self) -> u32 {
        self.high - self.low + 1
    }
}

impl fmt::Display for BitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.high, self.low)
    }
}

impl FromStr for BitRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('[').trim_end_matches(']');
        let (hi, lo) = match s.split_once(':') {
            Some((hi, lo)) => (hi, lo),
            None => (s, s),
        };
        let high = hi.trim().parse::<u32>().map_err(|e| format!("bad bit range `{s}`: {e}"))?;
        let low = lo.trim().parse::<u32>().map_err(|e| format!("bad bit range `{s}`: {e}"))?;
        if high < low {
            return Err(format!("bit range `{s}` has high < low"));
        }
        Ok(BitRange { high, low })
    }
}

impl From<BitRange> for String {
    fn from(r: BitRange) -> Self {
        r.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BitRangeRepr {
    Text(String),
    Pair([u32; 2]),
}

impl TryFrom<BitRangeRepr> for BitRange {
    type Error = String;

    fn try_from(r: BitRangeRepr) -> Result<Self, Self::Error> {
        match r {
            BitRangeRepr::Text(s) => s.parse(),
            BitRangeRepr::Pair([high, low]) if high >= low => Ok(BitRange { high, low }),
            BitRangeRepr::Pair([high, low]) => Err(format!("bit range {high}:{low} has high < low")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveDef {
    pub name: String,
    #[serde(default)]
    pub argument_types: Vec<ArgType>,
    #[serde(default)]
    pub action: DirectiveAction,
    #[serde(default)]
    pub semantics_script: Option<String>,
    /// bytes; static size of a script directive
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    Int,
    String,
    Symbol,
    Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveAction {
    #[serde(alias = "org")]
    Origin,
    Byte,
    Half,
    Word,
    Dword,
    Ascii,
    #[serde(alias = "asciiz")]
    Asciz,
    #[serde(alias = "zero", alias = "skip")]
    Space,
    Align,
    #[serde(alias = "set")]
    Equ,
    Text,
    Data,
    #[default]
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PseudoDef {
    pub mnemonic: String,
    #[serde(alias = "syntax_template")]
    pub syntax: String,
    #[serde(alias = "expansion_template")]
    pub expansion: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntaxRules {
    pub comment_chars: Vec<String>,
    pub label_suffix: String,
    pub register_prefix: String,
    pub immediate_prefix: String,
    pub hex_prefix: String,
    pub binary_prefix: String,
    pub directive_prefix: String,
    pub case_sensitive: bool,
}

impl Default for SyntaxRules {
    fn default() -> Self {
        Self {
            comment_chars: vec![";".into()],
            label_suffix: ":".into(),
            register_prefix: String::new(),
            immediate_prefix: String::new(),
            hex_prefix: "0x".into(),
            binary_prefix: "0b".into(),
            directive_prefix: ".".into(),
            case_sensitive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisassemblyRules {
    pub data_run_threshold: usize,
    pub min_string_length: usize,
    pub printable_min: u8,
    pub printable_max: u8,
    pub reconstruct_pseudo: bool,
}

impl Default for DisassemblyRules {
    fn default() -> Self {
        Self {
            data_run_threshold: 8,
            min_string_length: 4,
            printable_min: 0x20,
            printable_max: 0x7e,
            reconstruct_pseudo: true,
        }
    }
}

/// Parses `123`, `0x7b` or `0b1111011`.
pub fn parse_number(s: &str) -> Option<u64> {
    let t = s.trim().replace('_', "");
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2).ok()
    } else {
        t.parse::<u64>().ok()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Int(u64),
    Text(String),
}

impl NumberRepr {
    fn into_u64<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            NumberRepr::Int(v) => Ok(v),
            NumberRepr::Text(s) => parse_number(&s).ok_or_else(|| E::custom(format!("bad number `{s}`"))),
        }
    }
}

fn de_number<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    NumberRepr::deserialize(d)?.into_u64()
}

fn de_opt_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Option::<NumberRepr>::deserialize(d)?.map(NumberRepr::into_u64).transpose()
}
