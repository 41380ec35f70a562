//! Restricted execution of ISA-supplied semantics scripts.
//!
//! A script only sees the bindings listed in [`Capabilities`]: the register
//! file, flags, memory, the address cursor, its argument list and the
//! `result` output. Everything else is rejected when the script is compiled
//! or, if only detectable at run time, when it executes.

pub mod script;
mod vm;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::machine::BusError;
use script::{Expr, Program, Stmt};

pub const DEFAULT_STEP_LIMIT: u64 = 100_000;

bitflags! {
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities: u16 {
const ARGS = 1 << 0;         // operand / argument list
const REGISTERS = 1 << 1;    // reg, set_reg
const FLAGS = 1 << 2;        // flag, set_flag
const MEMORY = 1 << 3;       // mem, set_mem
const CURSOR_READ = 1 << 4;
const CURSOR_WRITE = 1 << 5;
const EMIT = 1 << 6;         // result, emit
}
}

impl Capabilities {
    /// Surface granted to instruction scripts: everything but moving the cursor.
    pub const INSTRUCTION: Self =
        Self::from_bits_truncate(Self::all().bits() & !Self::CURSOR_WRITE.bits());
    pub const DIRECTIVE: Self = Self::all();
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax { line: u32, column: u32, message: String },
    #[error("{0}")]
    Violation(String),
    #[error("{0}")]
    Runtime(String),
    #[error("step budget of {0} exhausted")]
    StepLimit(u64),
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn int(&self) -> Result<i64, SandboxError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(SandboxError::Runtime(format!("expected integer, found {}", other.type_name()))),
        }
    }

    pub fn str(&self) -> Result<&str, SandboxError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(SandboxError::Runtime(format!("expected string, found {}", other.type_name()))),
        }
    }

    pub fn truthy(&self) -> Result<bool, SandboxError> {
        match self {
            Value::Int(v) => Ok(*v != 0),
            Value::List(l) => Ok(!l.is_empty()),
            Value::Str(s) => Ok(!s.is_empty()),
        }
    }

    fn into_list(self) -> Result<Vec<Value>, SandboxError> {
        match self {
            Value::List(l) => Ok(l),
            Value::Str(s) => Ok(s.bytes().map(|b| Value::Int(b as i64)).collect()),
            Value::Int(_) => Err(SandboxError::Runtime("expected list, found int".into())),
        }
    }

    fn index(&self, i: i64) -> Result<Value, SandboxError> {
        let oob = || SandboxError::Runtime(format!("index {i} out of bounds"));
        let i = usize::try_from(i).map_err(|_| oob())?;
        match self {
            Value::List(l) => l.get(i).cloned().ok_or_else(oob),
            Value::Str(s) => s.as_bytes().get(i).map(|b| Value::Int(*b as i64)).ok_or_else(oob),
            Value::Int(_) => Err(SandboxError::Runtime("cannot index an integer".into())),
        }
    }

    /// Flattens `result` into the byte sequence to emit.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SandboxError> {
        match self {
            Value::Int(v) if (-128..=255).contains(v) => Ok(vec![*v as u8]),
            Value::Int(v) => Err(SandboxError::Runtime(format!("result value {v} is not a byte"))),
            Value::Str(s) => Ok(s.as_bytes().to_vec()),
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.extend(item.to_bytes()?);
                }
                Ok(out)
            }
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }
}

/// Host side of the capability surface.
pub trait Host {
    fn register(&mut self, name: &str) -> Result<i64, SandboxError>;
    fn set_register(&mut self, name: &str, value: i64) -> Result<(), SandboxError>;
    fn flag(&mut self, name: &str) -> Result<bool, SandboxError>;
    fn set_flag(&mut self, name: &str, value: bool) -> Result<(), SandboxError>;
    fn read_memory(&mut self, addr: u64) -> Result<u8, SandboxError>;
    fn write_memory(&mut self, addr: u64, value: u8) -> Result<(), SandboxError>;
    fn little_endian(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct CompiledScript {
    pub source: String,
    pub required: Capabilities,
    program: Program,
}

/// Inputs bound for one execution.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub args: Vec<Value>,
    pub cursor: u64,
    pub step_limit: u64,
}

impl Invocation {
    pub fn new(args: Vec<Value>, cursor: u64) -> Self {
        Self { args, cursor, step_limit: DEFAULT_STEP_LIMIT }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub result: Vec<u8>,
    /// Set when the script assigned `cursor`.
    pub cursor: Option<u64>,
    pub steps: u64,
}

const HOST_CALLS: &[(&str, Capabilities)] = &[
    ("reg", Capabilities::REGISTERS),
    ("set_reg", Capabilities::REGISTERS),
    ("flag", Capabilities::FLAGS),
    ("set_flag", Capabilities::FLAGS),
    ("mem", Capabilities::MEMORY),
    ("set_mem", Capabilities::MEMORY),
    ("emit", Capabilities::EMIT),
];

const PURE_CALLS: &[&str] = &["len", "bytes", "bytes_le", "bytes_be", "bits", "sext", "min", "max", "abs", "push"];

/// Parses and statically checks `source` against the `granted` surface.
pub fn compile(source: &str, granted: Capabilities) -> Result<CompiledScript, SandboxError> {
    let program = script::parse(source)?;
    let mut check = Checker { required: Capabilities::empty(), scopes: vec![Vec::new()] };
    check.block(&program.body)?;
    let missing = check.required.difference(granted);
    if !missing.is_empty() {
        return Err(SandboxError::Violation(format!("script uses capabilities that are not bound here: {missing:?}")));
    }
    debug!(required = ?check.required, "compiled semantics script");
    Ok(CompiledScript { source: source.to_string(), required: check.required, program })
}

/// Runs a compiled script against `host`.
pub fn run(script: &CompiledScript, host: &mut dyn Host, inv: Invocation) -> Result<Outcome, SandboxError> {
    vm::Vm::new(host, inv).run(script)
}

struct Checker {
    required: Capabilities,
    scopes: Vec<Vec<String>>,
}

impl Checker {
    fn declared(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.iter().any(|n| n == name))
    }

    fn declare(&mut self, name: &str) -> Result<(), SandboxError> {
        if matches!(name, "args" | "cursor" | "result") {
            return Err(SandboxError::Violation(format!("`{name}` is a reserved binding")));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.to_string());
        }
        Ok(())
    }

    fn block(&mut self, body: &[Stmt]) -> Result<(), SandboxError> {
        self.scopes.push(Vec::new());
        let r = body.iter().try_for_each(|s| self.stmt(s));
        self.scopes.pop();
        r
    }

    fn stmt(&mut self, s: &Stmt) -> Result<(), SandboxError> {
        match s {
            Stmt::Let { name, value } => {
                self.expr(value)?;
                self.declare(name)
            }
            Stmt::Assign { name, value } => {
                self.expr(value)?;
                match name.as_str() {
                    "result" => self.required |= Capabilities::EMIT,
                    "cursor" => self.required |= Capabilities::CURSOR_WRITE,
                    "args" => return Err(SandboxError::Violation("`args` is read-only".into())),
                    other if self.declared(other) => {}
                    other => return Err(SandboxError::Violation(format!("assignment to unbound name `{other}`"))),
                }
                Ok(())
            }
            Stmt::If { cond, then, otherwise } => {
                self.expr(cond)?;
                self.block(then)?;
                self.block(otherwise)
            }
            Stmt::While { cond, body } => {
                self.expr(cond)?;
                self.block(body)
            }
            Stmt::For { var, start, end, body } => {
                self.expr(start)?;
                self.expr(end)?;
                self.scopes.push(Vec::new());
                self.declare(var)?;
                let r = self.block(body);
                self.scopes.pop();
                r
            }
            Stmt::Expr(e) => self.expr(e),
        }
    }

    fn expr(&mut self, e: &Expr) -> Result<(), SandboxError> {
        match e {
            Expr::Int(_) | Expr::Str(_) => Ok(()),
            Expr::List(items) => items.iter().try_for_each(|i| self.expr(i)),
            Expr::Var(name) => {
                match name.as_str() {
                    "args" => self.required |= Capabilities::ARGS,
                    "cursor" => self.required |= Capabilities::CURSOR_READ,
                    "result" => self.required |= Capabilities::EMIT,
                    other if self.declared(other) => {}
                    other => return Err(SandboxError::Violation(format!("no binding named `{other}`"))),
                }
                Ok(())
            }
            Expr::Index { base, index } => {
                self.expr(base)?;
                self.expr(index)
            }
            Expr::Unary { expr, .. } => self.expr(expr),
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(lhs)?;
                self.expr(rhs)
            }
            Expr::Call { name, args } => {
                if let Some((_, cap)) = HOST_CALLS.iter().find(|(n, _)| n == name) {
                    self.required |= *cap;
                } else if !PURE_CALLS.contains(&name.as_str()) {
                    return Err(SandboxError::Violation(format!("`{name}` is not a bound operation")));
                }
                args.iter().try_for_each(|a| self.expr(a))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{LinearMemory, MachineHost, MachineState};

    fn host_run(src: &str, granted: Capabilities, args: Vec<Value>) -> Result<Outcome, SandboxError> {
        let script = compile(src, granted)?;
        let mut state = MachineState::with_registers(&["x0", "x1", "x2"], &["z"]);
        let mut mem = LinearMemory::new(16);
        let mut host = MachineHost::new(&mut state, &mut mem, true);
        run(&script, &mut host, Invocation::new(args, 0x100))
    }

    #[test]
    fn emits_bytes_and_moves_cursor() {
        let out = host_run(
            "for i in 0..len(args) { emit(args[i]); } cursor = cursor + 8;",
            Capabilities::DIRECTIVE,
            vec![Value::Int(1), Value::Int(2)],
        )
        .unwrap();
        assert_eq!(out.result, vec![1, 2]);
        assert_eq!(out.cursor, Some(0x108));
    }

    #[test]
    fn instruction_scripts_cannot_move_cursor() {
        let err = compile("cursor = 4;", Capabilities::INSTRUCTION).unwrap_err();
        assert!(matches!(err, SandboxError::Violation(_)));
    }

    #[test]
    fn unknown_operations_fail_closed() {
        assert!(matches!(compile("read_file(\"/etc/passwd\");", Capabilities::all()), Err(SandboxError::Violation(_))));
        assert!(matches!(compile("x = 1;", Capabilities::all()), Err(SandboxError::Violation(_))));
    }

    #[test]
    fn runaway_loops_hit_the_step_budget() {
        let err = host_run("while 1 { }", Capabilities::all(), vec![]).unwrap_err();
        assert!(matches!(err, SandboxError::StepLimit(DEFAULT_STEP_LIMIT)));
    }

    #[test]
    fn string_growth_is_capped() {
        let out = host_run("let s = \"ab\"; for i in 0..19 { s = s + s; } emit(len(s) / 65536);", Capabilities::all(), vec![])
            .unwrap();
        assert_eq!(out.result, vec![16]);

        let err = host_run("let s = \"ab\"; for i in 0..24 { s = s + s; } emit(len(s) % 256);", Capabilities::all(), vec![])
            .unwrap_err();
        assert_eq!(err, SandboxError::Runtime("string size limit exceeded".into()));
    }

    #[test]
    fn undeclared_register_is_a_runtime_violation() {
        let err = host_run("let r = \"x9\"; set_reg(r, 1);", Capabilities::all(), vec![]).unwrap_err();
        assert!(matches!(err, SandboxError::Violation(_)));
    }
}
