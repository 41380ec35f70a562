use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sandbox::SandboxError;

/// Location of a statement in its source unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePos {
    pub unit: usize,
    pub file: String,
    /// 1-based
    pub line: u32,
    /// 1-based
    pub column: u32,
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    #[error("parse error: {message}")]
    Parse { message: String, column: u32 },
    #[error("undefined symbol `{name}`")]
    UndefinedSymbol { name: String },
    #[error("symbol `{name}` is already defined")]
    DuplicateSymbol { name: String },
    #[error("value {value:#x} does not fit field {field} ({width} bits)")]
    FieldOverflow { field: String, value: i64, width: u32 },
    #[error("immediate {value} out of range [{min}, {max}] for operand `{operand}`")]
    ImmediateOutOfRange { operand: String, value: i64, min: i64, max: i64 },
    #[error("immediate {value} for operand `{operand}` must be a multiple of {align}")]
    ImmediateMisaligned { operand: String, value: i64, align: u64 },
    #[error("unknown mnemonic `{mnemonic}` with {arity} operand(s)")]
    UnknownMnemonic { mnemonic: String, arity: usize },
    #[error("unknown directive `{name}`")]
    UnknownDirective { name: String },
    #[error("unsupported operand: {detail}")]
    UnsupportedOperand { detail: String },
    #[error("invalid binary format: {0}")]
    InvalidBinaryFormat(String),
    #[error("sandbox violation: {0}")]
    SandboxViolation(String),
    #[error("script execution failed: {0}")]
    ExecutionError(String),
    #[error("layout desync: pass 1 placed statement at {expected:#x}, pass 2 reached {actual:#x}")]
    LayoutDesync { expected: u64, actual: u64 },
    #[error("address {address:#x} is outside the address space")]
    AddressOutOfRange { address: u64 },
    #[error("output overlaps previously emitted bytes at {address:#x}")]
    OverlappingOutput { address: u64 },
}

impl AsmError {
    pub fn parse(message: impl Into<String>, column: u32) -> Self {
        AsmError::Parse { message: message.into(), column }
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        AsmError::UnsupportedOperand { detail: detail.into() }
    }

    /// Fatal errors abort pass 2; the rest are collected against their statement.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AsmError::SandboxViolation(_) | AsmError::ExecutionError(_) | AsmError::Parse { .. }
        )
    }
}

impl From<SandboxError> for AsmError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::Violation(msg) => AsmError::SandboxViolation(msg),
            other => AsmError::ExecutionError(other.to_string()),
        }
    }
}

/// Errors raised while building an `IsaModel` from a definition.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IsaError {
    #[error("duplicate register name `{0}`")]
    DuplicateRegister(String),
    #[error("instruction `{mnemonic}`: {detail}")]
    InvalidEncoding { mnemonic: String, detail: String },
    #[error("invalid syntax template `{template}`: {detail}")]
    InvalidSyntax { template: String, detail: String },
    #[error("pseudo-instruction `{mnemonic}`: {detail}")]
    InvalidPseudo { mnemonic: String, detail: String },
    #[error("script for `{owner}`: {source}")]
    Script {
        owner: String,
        #[source]
        source: SandboxError,
    },
    #[error("{0}")]
    Invalid(String),
}

/// One reported problem, with enough context to find the offending line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub error: AsmError,
    pub pos: Option<SourcePos>,
    pub text: Option<String>,
    pub address: Option<u64>,
}

impl Diagnostic {
    pub fn new(error: AsmError) -> Self {
        Self { error, pos: None, text: None, address: None }
    }

    pub fn at(mut self, pos: &SourcePos, text: &str) -> Self {
        let mut pos = pos.clone();
        if let AsmError::Parse { column, .. } = &self.error {
            pos.column = *column;
        }
        self.pos = Some(pos);
        self.text = Some(text.to_string());
        self
    }

    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = &self.pos {
            write!(f, "{pos}: ")?;
        }
        write!(f, "{}", self.error)?;
        if let Some(addr) = self.address {
            write!(f, " at {addr:#x}")?;
        }
        if let Some(text) = &self.text {
            write!(f, " in `{text}`")?;
        }
        Ok(())
    }
}

/// Batch of diagnostics returned by a failed assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn push(&mut self, d: Diagnostic) {
        self.0.push(d);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &AsmError> {
        self.0.iter().map(|d| &d.error)
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(d: Diagnostic) -> Self {
        Diagnostics(vec![d])
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}
