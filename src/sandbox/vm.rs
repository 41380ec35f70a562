//! Tree-walking interpreter over a compiled script.

use std::collections::HashMap;

use tracing::trace;

use super::script::{BinaryOp, Expr, Stmt, UnaryOp};
use super::{CompiledScript, Host, Invocation, Outcome, SandboxError, Value};
use crate::bits;

const MAX_LIST: usize = 1 << 16;
const MAX_OUTPUT: usize = 1 << 20;

pub(super) struct Vm<'h> {
    host: &'h mut dyn Host,
    args: Value,
    cursor: i64,
    cursor_written: bool,
    result: Value,
    scopes: Vec<HashMap<String, Value>>,
    steps: u64,
    limit: u64,
}

impl<'h> Vm<'h> {
    pub(super) fn new(host: &'h mut dyn Host, inv: Invocation) -> Self {
        Self {
            host,
            args: Value::List(inv.args),
            cursor: inv.cursor as i64,
            cursor_written: false,
            result: Value::List(Vec::new()),
            scopes: vec![HashMap::new()],
            steps: 0,
            limit: inv.step_limit,
        }
    }

    pub(super) fn run(mut self, script: &CompiledScript) -> Result<Outcome, SandboxError> {
        self.block(&script.program.body)?;
        let result = self.result.to_bytes()?;
        if result.len() > MAX_OUTPUT {
            return Err(SandboxError::Runtime(format!("script emitted {} bytes", result.len())));
        }
        trace!(steps = self.steps, bytes = result.len(), "script finished");
        let cursor = if self.cursor_written {
            if self.cursor < 0 {
                return Err(SandboxError::Runtime(format!("cursor set to negative address {}", self.cursor)));
            }
            Some(self.cursor as u64)
        } else {
            None
        };
        Ok(Outcome { result, cursor, steps: self.steps })
    }

    fn tick(&mut self) -> Result<(), SandboxError> {
        self.steps += 1;
        if self.steps > self.limit {
            Err(SandboxError::StepLimit(self.limit))
        } else {
            Ok(())
        }
    }

    fn block(&mut self, body: &[Stmt]) -> Result<(), SandboxError> {
        self.scopes.push(HashMap::new());
        let r = body.iter().try_for_each(|s| self.stmt(s));
        self.scopes.pop();
        r
    }

    fn stmt(&mut self, s: &Stmt) -> Result<(), SandboxError> {
        self.tick()?;
        match s {
            Stmt::Let { name, value } => {
                let v = self.eval(value)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), v);
                }
            }
            Stmt::Assign { name, value } => {
                let v = self.eval(value)?;
                self.assign(name, v)?;
            }
            Stmt::If { cond, then, otherwise } => {
                if self.eval(cond)?.truthy()? {
                    self.block(then)?;
                } else {
                    self.block(otherwise)?;
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.truthy()? {
                    self.tick()?;
                    self.block(body)?;
                }
            }
            Stmt::For { var, start, end, body } => {
                let start = self.eval(start)?.int()?;
                let end = self.eval(end)?.int()?;
                for i in start..end {
                    self.tick()?;
                    self.scopes.push(HashMap::from([(var.clone(), Value::Int(i))]));
                    let r = self.block(body);
                    self.scopes.pop();
                    r?;
                }
            }
            Stmt::Expr(e) => {
                self.eval(e)?;
            }
        }
        Ok(())
    }

    fn assign(&mut self, name: &str, v: Value) -> Result<(), SandboxError> {
        match name {
            "result" => {
                self.result = v;
                Ok(())
            }
            "cursor" => {
                self.cursor = v.int()?;
                self.cursor_written = true;
                Ok(())
            }
            _ => {
                for scope in self.scopes.iter_mut().rev() {
                    if let Some(slot) = scope.get_mut(name) {
                        *slot = v;
                        return Ok(());
                    }
                }
                Err(SandboxError::Violation(format!("assignment to unbound name `{name}`")))
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, SandboxError> {
        match name {
            "args" => Ok(self.args.clone()),
            "cursor" => Ok(Value::Int(self.cursor)),
            "result" => Ok(self.result.clone()),
            _ => self
                .scopes
                .iter()
                .rev()
                .find_map(|s| s.get(name).cloned())
                .ok_or_else(|| SandboxError::Violation(format!("no binding named `{name}`"))),
        }
    }

    fn eval(&mut self, e: &Expr) -> Result<Value, SandboxError> {
        self.tick()?;
        match e {
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::List(items) => {
                let values = items.iter().map(|i| self.eval(i)).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(values))
            }
            Expr::Var(name) => self.lookup(name),
            Expr::Index { base, index } => {
                let base = self.eval(base)?;
                let i = self.eval(index)?.int()?;
                base.index(i)
            }
            Expr::Unary { op, expr } => {
                let v = self.eval(expr)?;
                Ok(match op {
                    UnaryOp::Neg => Value::Int(v.int()?.wrapping_neg()),
                    UnaryOp::Not => Value::Int(!v.truthy()? as i64),
                    UnaryOp::BitNot => Value::Int(!v.int()?),
                })
            }
            Expr::Binary { op: BinaryOp::And, lhs, rhs } => {
                let l = self.eval(lhs)?.truthy()?;
                Ok(Value::Int((l && self.eval(rhs)?.truthy()?) as i64))
            }
            Expr::Binary { op: BinaryOp::Or, lhs, rhs } => {
                let l = self.eval(lhs)?.truthy()?;
                Ok(Value::Int((l || self.eval(rhs)?.truthy()?) as i64))
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                binary(*op, l, r)
            }
            Expr::Call { name, args } => {
                let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                self.call(name, args)
            }
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, SandboxError> {
        let arg = |i: usize| -> Result<&Value, SandboxError> {
            args.get(i).ok_or_else(|| SandboxError::Runtime(format!("`{name}` expects argument {}", i + 1)))
        };
        match name {
            "reg" => Ok(Value::Int(self.host.register(arg(0)?.str()?)?)),
            "set_reg" => {
                let v = arg(1)?.int()?;
                self.host.set_register(arg(0)?.str()?, v)?;
                Ok(Value::Int(v))
            }
            "flag" => Ok(Value::Int(self.host.flag(arg(0)?.str()?)? as i64)),
            "set_flag" => {
                let v = arg(1)?.truthy()?;
                self.host.set_flag(arg(0)?.str()?, v)?;
                Ok(Value::Int(v as i64))
            }
            "mem" => Ok(Value::Int(self.host.read_memory(address(arg(0)?)?)? as i64)),
            "set_mem" => {
                let v = byte(arg(1)?.int()?)?;
                self.host.write_memory(address(arg(0)?)?, v)?;
                Ok(Value::Int(v as i64))
            }
            "emit" => {
                let mut out = std::mem::replace(&mut self.result, Value::List(Vec::new())).into_list()?;
                for v in &args {
                    match v {
                        Value::List(items) => out.extend(items.iter().cloned()),
                        Value::Str(s) => out.extend(s.bytes().map(|b| Value::Int(b as i64))),
                        Value::Int(_) => out.push(v.clone()),
                    }
                }
                if out.len() > MAX_OUTPUT {
                    return Err(SandboxError::Runtime("script output limit exceeded".into()));
                }
                self.result = Value::List(out);
                Ok(Value::Int(0))
            }
            "len" => Ok(Value::Int(match arg(0)? {
                Value::List(l) => l.len() as i64,
                Value::Str(s) => s.len() as i64,
                Value::Int(_) => return Err(SandboxError::Runtime("`len` of an integer".into())),
            })),
            "bytes" | "bytes_le" | "bytes_be" => {
                let v = arg(0)?.int()? as u64;
                let n = arg(1)?.int()?;
                if !(0..=8).contains(&n) {
                    return Err(SandboxError::Runtime(format!("`{name}` width {n} out of range")));
                }
                let little = match name {
                    "bytes_le" => true,
                    "bytes_be" => false,
                    _ => self.host.little_endian(),
                };
                let out = bits::to_bytes(v, n as usize, little);
                Ok(Value::List(out.into_iter().map(|b| Value::Int(b as i64)).collect()))
            }
            "bits" => {
                let (v, hi, lo) = (arg(0)?.int()?, arg(1)?.int()?, arg(2)?.int()?);
                if !(0..64).contains(&lo) || hi < lo || hi >= 64 {
                    return Err(SandboxError::Runtime(format!("bad bit range [{hi}:{lo}]")));
                }
                Ok(Value::Int(bits::extract(v as u64, hi as u32, lo as u32) as i64))
            }
            "sext" => {
                let (v, w) = (arg(0)?.int()?, arg(1)?.int()?);
                if !(1..=64).contains(&w) {
                    return Err(SandboxError::Runtime(format!("bad sign-extension width {w}")));
                }
                Ok(Value::Int(bits::sign_extend(v as u64 & bits::mask(w as u32), w as u32)))
            }
            "min" => Ok(Value::Int(arg(0)?.int()?.min(arg(1)?.int()?))),
            "max" => Ok(Value::Int(arg(0)?.int()?.max(arg(1)?.int()?))),
            "abs" => Ok(Value::Int(arg(0)?.int()?.wrapping_abs())),
            "push" => {
                let mut l = arg(0)?.clone().into_list()?;
                l.push(arg(1)?.clone());
                check_list(&l)?;
                Ok(Value::List(l))
            }
            _ => Err(SandboxError::Violation(format!("no binding named `{name}`"))),
        }
    }
}

fn address(v: &Value) -> Result<u64, SandboxError> {
    let a = v.int()?;
    u64::try_from(a).map_err(|_| SandboxError::Runtime(format!("negative address {a}")))
}

fn byte(v: i64) -> Result<u8, SandboxError> {
    if (-128..=255).contains(&v) {
        Ok(v as u8)
    } else {
        Err(SandboxError::Runtime(format!("value {v} does not fit in a byte")))
    }
}

fn check_list(l: &[Value]) -> Result<(), SandboxError> {
    if l.len() > MAX_LIST {
        Err(SandboxError::Runtime("list size limit exceeded".into()))
    } else {
        Ok(())
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, SandboxError> {
    use BinaryOp::*;
    match (op, l, r) {
        (Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            check_list(&a)?;
            Ok(Value::List(a))
        }
        (Add, Value::Str(a), Value::Str(b)) => {
            if a.len() + b.len() > MAX_OUTPUT {
                return Err(SandboxError::Runtime("string size limit exceeded".into()));
            }
            Ok(Value::Str(a + &b))
        }
        (Eq, a, b) => Ok(Value::Int((a == b) as i64)),
        (Ne, a, b) => Ok(Value::Int((a != b) as i64)),
        (op, l, r) => {
            let (a, b) = (l.int()?, r.int()?);
            let v = match op {
                Mul => a.wrapping_mul(b),
                Div | Rem if b == 0 => return Err(SandboxError::Runtime("division by zero".into())),
                Div => a.wrapping_div(b),
                Rem => a.wrapping_rem(b),
                Add => a.wrapping_add(b),
                Sub => a.wrapping_sub(b),
                Shl => a.wrapping_shl(b as u32),
                Shr => a.wrapping_shr(b as u32),
                BitAnd => a & b,
                BitXor => a ^ b,
                BitOr => a | b,
                Lt => (a < b) as i64,
                Le => (a <= b) as i64,
                Gt => (a > b) as i64,
                Ge => (a >= b) as i64,
                Eq | Ne | And | Or => unreachable!("handled above"),
            };
            Ok(Value::Int(v))
        }
    }
}
