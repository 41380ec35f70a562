//! Two-pass assembler: layout, then encoding into a [`BinaryImage`].

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bits;
use crate::error::{AsmError, Diagnostic, Diagnostics};
use crate::expand::expand;
use crate::image::{BinaryImage, ImageBuilder};
use crate::isa::{ArgType, Directive, DirectiveAction, FieldKind, Instruction, IsaModel, PcRelativeBase, RegionKind, ScriptMode, Slot, TargetKind};
use crate::machine::{Bus, MachineHost, MachineState, NullBus};
use crate::parser::{Expr, ExprOp, Operand, Parser, SourceUnit, Statement, StatementKind};
use crate::sandbox::{self, CompiledScript, Invocation, Outcome, Value};
use crate::symbols::{SymbolKind, SymbolTable};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssembleOptions {
    /// Overrides the ISA's `default_code_start`.
    pub origin: Option<u64>,
    /// Overrides the ISA's `default_data_start`.
    pub data_origin: Option<u64>,
    pub step_limit: Option<u64>,
}

/// Successful assembly.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub image: BinaryImage,
    pub symbols: SymbolTable,
}

/// An operand after symbol resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandValue {
    Register(usize),
    /// `sliced` marks `expr[hi:lo]`, which is range-checked as raw bits.
    Int { value: i64, sliced: bool },
    Str(Vec<u8>),
    Memory { offset: i64, base: usize },
}

impl OperandValue {
    pub fn int(value: i64) -> Self {
        OperandValue::Int { value, sliced: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Code = 0,
    Data = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Layout,
    Emit,
}

/// Where pass 1 placed a statement.
#[derive(Debug, Clone, Copy)]
struct Layout {
    addr: u64,
    size: u64,
    inst: Option<usize>,
}

pub struct Assembler<'m> {
    model: &'m IsaModel,
    options: AssembleOptions,
}

impl<'m> Assembler<'m> {
    pub fn new(model: &'m IsaModel) -> Self {
        Self { model, options: AssembleOptions::default() }
    }

    pub fn with_options(mut self, options: AssembleOptions) -> Self {
        self.options = options;
        self
    }

    /// Assembles the units in order; they share globals, the cursor and the image.
    pub fn assemble(&self, units: &[SourceUnit]) -> Result<Assembly, Diagnostics> {
        let parser = Parser::new(self.model);
        let mut stmts = Vec::new();
        let mut diags = Diagnostics::default();
        for (i, unit) in units.iter().enumerate() {
            let (s, d) = parser.parse_unit(i, unit);
            stmts.extend(s);
            diags.0.extend(d.0);
        }
        if !diags.is_empty() {
            return Err(diags);
        }
        let stmts = expand(self.model, stmts)?;
        debug!(units = units.len(), statements = stmts.len(), "parsed and expanded");

        let mut session = Session::new(self.model, &self.options);
        let layout = session.layout(&stmts)?;
        session.emit(&stmts, &layout)
    }

    pub fn assemble_str(&self, source: &str) -> Result<Assembly, Diagnostics> {
        self.assemble(&[SourceUnit::new("<input>", source)])
    }
}

/// Assembles a single source text with default options.
pub fn assemble(model: &IsaModel, source: &str) -> Result<Assembly, Diagnostics> {
    Assembler::new(model).assemble_str(source)
}

struct Session<'m> {
    model: &'m IsaModel,
    symbols: SymbolTable,
    state: MachineState,
    section: Section,
    cursors: [u64; 2],
    origins: [u64; 2],
    step_limit: u64,
}

impl<'m> Session<'m> {
    fn new(model: &'m IsaModel, opts: &AssembleOptions) -> Self {
        let origins = [
            opts.origin.unwrap_or(model.address_space.default_code_start),
            opts.data_origin.unwrap_or(model.address_space.default_data_start),
        ];
        Self {
            model,
            symbols: SymbolTable::new(),
            state: MachineState::from_model(model),
            section: Section::Code,
            cursors: origins,
            origins,
            step_limit: opts.step_limit.unwrap_or(model.step_limit),
        }
    }

    fn reset(&mut self) {
        self.cursors = self.origins;
        self.section = Section::Code;
    }

    fn cursor(&self) -> u64 {
        self.cursors[self.section as usize]
    }

    fn set_cursor(&mut self, addr: u64) {
        self.cursors[self.section as usize] = addr;
    }

    fn advance(&mut self, by: u64) -> Result<(), AsmError> {
        let here = self.cursor();
        let next = here.checked_add(by).ok_or(AsmError::AddressOutOfRange { address: here })?;
        self.set_cursor(next);
        Ok(())
    }

    fn eval(&self, e: &Expr, lenient: bool) -> Result<i64, AsmError> {
        eval_expr(e, &|name| self.symbols.resolve(name).or(lenient.then_some(0)))
    }

    /// Pass 1: sizes every statement and defines labels and constants.
    fn layout(&mut self, stmts: &[Statement]) -> Result<Vec<Layout>, Diagnostics> {
        self.reset();
        let mut diags = Diagnostics::default();
        let mut layout = Vec::with_capacity(stmts.len());
        let mut pending = Vec::new();
        for (i, stmt) in stmts.iter().enumerate() {
            self.symbols.set_unit(stmt.pos.unit);
            for r in stmt.references() {
                let scope = self.symbols.scope_of(r);
                self.symbols.declare(r, scope, SymbolKind::Label);
            }
            let addr = self.cursor();
            self.symbols.set_current_address(addr);
            let mut inst = None;
            let size = match self.size_of(stmt, addr, &mut inst) {
                Ok(Some(size)) => size,
                Ok(None) => {
                    pending.push(i);
                    0
                }
                Err(e) => {
                    diags.push(Diagnostic::new(e).at(&stmt.pos, &stmt.text).with_address(addr));
                    0
                }
            };
            layout.push(Layout { addr, size, inst });
            if let Err(e) = self.advance(size) {
                diags.push(Diagnostic::new(e).at(&stmt.pos, &stmt.text).with_address(addr));
                break;
            }
        }

        // constants defined in terms of later labels
        loop {
            let before = pending.len();
            pending.retain(|&i| match self.define_equ(&stmts[i]) {
                Ok(done) => !done,
                Err(e) => {
                    diags.push(Diagnostic::new(e).at(&stmts[i].pos, &stmts[i].text));
                    false
                }
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        for i in pending {
            let name = match &stmts[i].kind {
                StatementKind::Directive { args, .. } => equ_name(args).unwrap_or_default().to_string(),
                _ => String::new(),
            };
            let e = AsmError::UndefinedSymbol { name };
            diags.push(Diagnostic::new(e).at(&stmts[i].pos, &stmts[i].text));
        }

        debug!(statements = layout.len(), errors = diags.len(), "layout pass done");
        if diags.is_empty() {
            Ok(layout)
        } else {
            Err(diags)
        }
    }

    /// `Ok(None)` defers an `.equ` whose value depends on undefined symbols.
    fn size_of(&mut self, stmt: &Statement, addr: u64, inst: &mut Option<usize>) -> Result<Option<u64>, AsmError> {
        let model = self.model;
        match &stmt.kind {
            StatementKind::Label(name) => {
                self.symbols.define(name, addr as i64, SymbolKind::Label)?;
                Ok(Some(0))
            }
            StatementKind::RawData { bytes } => Ok(Some(bytes.len() as u64)),
            StatementKind::Instruction { mnemonic, operands } => {
                let idx = select(model, mnemonic, operands)?;
                *inst = Some(idx);
                let i = &model.instructions[idx];
                let base = if i.encodes_fields() { i.size_bytes as u64 } else { 0 };
                match (&i.script, i.mode) {
                    (Some(script), ScriptMode::Encode | ScriptMode::Append) => {
                        let args = self.script_args(operands, &[], true)?;
                        Ok(Some(base + self.provisional(script, args, addr)?))
                    }
                    _ => Ok(Some(base)),
                }
            }
            StatementKind::Directive { name, args } => {
                let dir = model.directive(name).ok_or_else(|| AsmError::UnknownDirective { name: name.clone() })?;
                check_directive_args(name, dir, args)?;
                if dir.action == DirectiveAction::Equ && !self.define_equ(stmt)? {
                    return Ok(None);
                }
                let prim = self.primitive(dir, args, Pass::Layout)?.len();
                let Some(script) = &dir.script else { return Ok(Some(prim)) };
                let extra = match dir.size {
                    Some(n) => n,
                    None => {
                        let args = self.script_args(args, &dir.argument_types, true)?;
                        let start = self.cursor() + prim;
                        self.provisional(script, args, start)?
                    }
                };
                Ok(Some(prim + extra))
            }
        }
    }

    /// Defines the constant of an `.equ`; `Ok(false)` while its value is unresolved.
    fn define_equ(&mut self, stmt: &Statement) -> Result<bool, AsmError> {
        let StatementKind::Directive { args, .. } = &stmt.kind else { return Ok(true) };
        self.symbols.set_unit(stmt.pos.unit);
        let name = equ_name(args).ok_or_else(|| AsmError::unsupported("`.equ` expects a symbol name"))?;
        let Some(Operand::Immediate(expr)) = args.get(1) else {
            return Err(AsmError::unsupported("`.equ` expects a value"));
        };
        match self.eval(expr, false) {
            Ok(v) => {
                self.symbols.define(name, v, SymbolKind::Constant)?;
                Ok(true)
            }
            Err(AsmError::UndefinedSymbol { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Dry run of a script in a throwaway machine; returns how far it advances.
    fn provisional(&self, script: &CompiledScript, args: Vec<Value>, start: u64) -> Result<u64, AsmError> {
        let mut state = self.state.clone();
        let mut bus = NullBus;
        let mut host = MachineHost::new(&mut state, &mut bus, self.model.little_endian());
        let inv = Invocation::new(args, start).with_step_limit(self.step_limit);
        let outcome = sandbox::run(script, &mut host, inv)?;
        let end = self.check_extent(start, script_extent(start, &outcome)?)?;
        Ok(end - start)
    }

    fn run_script(&mut self, script: &CompiledScript, args: Vec<Value>, start: u64, bus: &mut dyn Bus) -> Result<Vec<u8>, AsmError> {
        let mut host = MachineHost::new(&mut self.state, bus, self.model.little_endian());
        let inv = Invocation::new(args, start).with_step_limit(self.step_limit);
        let outcome = sandbox::run(script, &mut host, inv)?;
        trace!(steps = outcome.steps, bytes = outcome.result.len(), "script ran");
        let len = script_extent(start, &outcome)?;
        self.check_extent(start, len)?;
        let mut bytes = outcome.result;
        bytes.resize(len as usize, 0);
        Ok(bytes)
    }

    /// Registers by canonical name, immediates as integers, memory operands as
    /// offset followed by base.
    fn script_args(&self, operands: &[Operand], types: &[ArgType], lenient: bool) -> Result<Vec<Value>, AsmError> {
        let mut out = Vec::with_capacity(operands.len());
        for (i, op) in operands.iter().enumerate() {
            let ty = types.get(i).or(types.last());
            match op {
                Operand::Register(r) => out.push(Value::Str(self.model.registers[*r].name.clone())),
                Operand::Immediate(Expr::Symbol(s)) if ty == Some(&ArgType::Symbol) => out.push(Value::Str(s.clone())),
                Operand::Immediate(e) => out.push(Value::Int(self.eval(e, lenient)?)),
                Operand::Str(s) => out.push(match String::from_utf8(s.clone()) {
                    Ok(text) => Value::Str(text),
                    Err(e) => Value::List(e.into_bytes().into_iter().map(|b| Value::Int(b as i64)).collect()),
                }),
                Operand::Memory { offset, base } => {
                    out.push(Value::Int(self.eval(offset, lenient)?));
                    out.extend(self.script_args(std::slice::from_ref(&**base), &[], lenient)?);
                }
                Operand::Placeholder(p) => return Err(AsmError::unsupported(format!("unbound template parameter `{p}`"))),
            }
        }
        Ok(out)
    }

    /// End of `len` bytes placed at `start`, if they stay inside the address space.
    fn check_extent(&self, start: u64, len: u64) -> Result<u64, AsmError> {
        let end = start.checked_add(len).ok_or(AsmError::AddressOutOfRange { address: start })?;
        match self.model.address_space.size {
            0 => Ok(end),
            limit if end > limit => Err(AsmError::AddressOutOfRange { address: start.max(limit) }),
            _ => Ok(end),
        }
    }

    /// Built-in part of a directive. Moves the cursor or section where the
    /// action says so and returns what to emit at the (new) cursor.
    fn primitive(&mut self, dir: &Directive, args: &[Operand], pass: Pass) -> Result<Chunk, AsmError> {
        let lenient = pass == Pass::Layout;
        let little = self.model.little_endian();
        let int_arg = |s: &Self, i: usize| -> Result<i64, AsmError> {
            match args.get(i) {
                Some(Operand::Immediate(e)) => s.eval(e, false),
                _ => Err(AsmError::unsupported(format!("`{}` expects a numeric argument", dir.name))),
            }
        };
        let data = |width: usize| -> Result<Vec<u8>, AsmError> {
            let mut out = Vec::with_capacity(args.len() * width);
            for a in args {
                let Operand::Immediate(e) = a else {
                    return Err(AsmError::unsupported(format!("`{}` expects numeric values", dir.name)));
                };
                let v = self.eval(e, lenient)?;
                let w = (width * 8) as u32;
                if !(bits::fits_signed(v, w) || bits::fits_unsigned(v, w)) {
                    return Err(AsmError::ImmediateOutOfRange {
                        operand: dir.name.clone(),
                        value: v,
                        min: bits::signed_range(w).0,
                        max: bits::unsigned_range(w).1,
                    });
                }
                out.extend(bits::to_bytes(v as u64, width, little));
            }
            Ok(out)
        };
        Ok(match dir.action {
            DirectiveAction::Byte => Chunk::Bytes(data(1)?),
            DirectiveAction::Half => Chunk::Bytes(data(2)?),
            DirectiveAction::Word => Chunk::Bytes(data(4)?),
            DirectiveAction::Dword => Chunk::Bytes(data(8)?),
            DirectiveAction::Ascii | DirectiveAction::Asciz => {
                let mut out = Vec::new();
                for a in args {
                    let Operand::Str(s) = a else {
                        return Err(AsmError::unsupported(format!("`{}` expects string literals", dir.name)));
                    };
                    out.extend_from_slice(s);
                    if dir.action == DirectiveAction::Asciz {
                        out.push(0);
                    }
                }
                Chunk::Bytes(out)
            }
            DirectiveAction::Origin => {
                let v = int_arg(self, 0)?;
                let addr = u64::try_from(v).map_err(|_| AsmError::AddressOutOfRange { address: v as u64 })?;
                self.set_cursor(addr);
                Chunk::Bytes(Vec::new())
            }
            DirectiveAction::Space => {
                let n = int_arg(self, 0)?;
                let n = u64::try_from(n).map_err(|_| AsmError::unsupported(format!("negative size {n}")))?;
                let fill = if args.len() > 1 { int_arg(self, 1)? } else { 0 };
                self.check_extent(self.cursor(), n)?;
                Chunk::Fill { len: n, byte: fill as u8 }
            }
            DirectiveAction::Align => {
                let a = int_arg(self, 0)?;
                if a <= 0 {
                    return Err(AsmError::unsupported(format!("alignment {a} must be positive")));
                }
                let fill = if args.len() > 1 { int_arg(self, 1)? } else { 0 };
                let a = a as u64;
                let pad = (a - self.cursor() % a) % a;
                self.check_extent(self.cursor(), pad)?;
                Chunk::Fill { len: pad, byte: fill as u8 }
            }
            DirectiveAction::Text => {
                self.section = Section::Code;
                Chunk::Bytes(Vec::new())
            }
            DirectiveAction::Data => {
                self.section = Section::Data;
                Chunk::Bytes(Vec::new())
            }
            DirectiveAction::Equ | DirectiveAction::Custom => Chunk::Bytes(Vec::new()),
        })
    }

    /// Pass 2: encodes every statement at the address pass 1 gave it.
    fn emit(mut self, stmts: &[Statement], layout: &[Layout]) -> Result<Assembly, Diagnostics> {
        self.reset();
        let mut out = ImageBuilder::new(self.model.address_space.size);
        let mut diags = Diagnostics::default();
        let mut entry = None;
        for (stmt, lay) in stmts.iter().zip(layout) {
            self.symbols.set_unit(stmt.pos.unit);
            let addr = self.cursor();
            self.symbols.set_current_address(addr);
            let report = |e: AsmError| Diagnostic::new(e).at(&stmt.pos, &stmt.text).with_address(addr);
            let result = if addr != lay.addr {
                Err(AsmError::LayoutDesync { expected: lay.addr, actual: addr })
            } else {
                self.emit_one(stmt, lay, &mut out, &mut entry)
            };
            let step = match result {
                Ok(n) if n == lay.size => Ok(n),
                Ok(n) => Err(AsmError::LayoutDesync { expected: lay.addr + lay.size, actual: addr + n }),
                Err(e) if !e.is_fatal() => {
                    debug!(error = %e, "statement failed; zero-filling");
                    diags.push(report(e));
                    let here = self.cursor();
                    out.write(here, &vec![0; lay.size as usize], RegionKind::Data).map(|()| lay.size)
                }
                Err(e) => Err(e),
            };
            match step.and_then(|n| self.advance(n)) {
                Ok(()) => {}
                Err(e) => {
                    diags.push(report(e));
                    return Err(diags);
                }
            }
        }
        if !diags.is_empty() {
            return Err(diags);
        }
        let image = out.finish(entry);
        debug!(base = format_args!("{:#x}", image.base), bytes = image.bytes.len(), regions = image.regions.len(), "assembled");
        Ok(Assembly { image, symbols: self.symbols })
    }

    fn emit_one(&mut self, stmt: &Statement, lay: &Layout, out: &mut ImageBuilder, entry: &mut Option<u64>) -> Result<u64, AsmError> {
        let model = self.model;
        let addr = self.cursor();
        match &stmt.kind {
            StatementKind::Label(_) => Ok(0),
            StatementKind::RawData { bytes } => {
                out.write(addr, bytes, RegionKind::Data)?;
                Ok(bytes.len() as u64)
            }
            StatementKind::Instruction { operands, .. } => {
                let idx = lay.inst.ok_or_else(|| AsmError::unsupported("instruction was not selected during layout"))?;
                let inst = &model.instructions[idx];
                let values = bind_operands(inst, operands, &mut |e| self.eval(e, false))?;
                let mut bytes = if inst.encodes_fields() { encode_fields(model, inst, &values, addr)? } else { Vec::new() };
                if let (Some(script), ScriptMode::Encode | ScriptMode::Append) = (&inst.script, inst.mode) {
                    let args = self.script_args(operands, &[], false)?;
                    bytes.extend(self.run_script(script, args, addr, out)?);
                }
                trace!(addr = format_args!("{addr:#x}"), inst = %inst.mnemonic, "encoded");
                out.write(addr, &bytes, RegionKind::Code)?;
                entry.get_or_insert(addr);
                Ok(bytes.len() as u64)
            }
            StatementKind::Directive { name, args } => {
                let dir = model.directive(name).ok_or_else(|| AsmError::UnknownDirective { name: name.clone() })?;
                let mut bytes = self.primitive(dir, args, Pass::Emit)?.into_bytes();
                let start = self.cursor();
                if let Some(script) = &dir.script {
                    let script_args = self.script_args(args, &dir.argument_types, false)?;
                    let at = start + bytes.len() as u64;
                    bytes.extend(self.run_script(script, script_args, at, out)?);
                }
                out.write(start, &bytes, RegionKind::Data)?;
                Ok(bytes.len() as u64)
            }
        }
    }
}

fn equ_name(args: &[Operand]) -> Option<&str> {
    match args.first() {
        Some(Operand::Immediate(Expr::Symbol(s))) => Some(s),
        _ => None,
    }
}

/// Length of a script's output padded up to the cursor it left behind.
fn script_extent(start: u64, outcome: &Outcome) -> Result<u64, AsmError> {
    let len = outcome.result.len() as u64;
    match outcome.cursor {
        None => Ok(len),
        Some(cursor) => {
            let end = start.saturating_add(len);
            if cursor < end {
                return Err(AsmError::ExecutionError(format!(
                    "script moved the cursor to {cursor:#x}, inside its own output ending at {end:#x}"
                )));
            }
            Ok(cursor - start)
        }
    }
}

/// Bytes produced by a directive primitive. Fills stay symbolic until pass 2.
enum Chunk {
    Bytes(Vec<u8>),
    Fill { len: u64, byte: u8 },
}

impl Chunk {
    fn len(&self) -> u64 {
        match self {
            Chunk::Bytes(b) => b.len() as u64,
            Chunk::Fill { len, .. } => *len,
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        match self {
            Chunk::Bytes(b) => b,
            Chunk::Fill { len, byte } => vec![byte; len as usize],
        }
    }
}

fn check_directive_args(name: &str, dir: &Directive, args: &[Operand]) -> Result<(), AsmError> {
    let n = args.len();
    let arity_ok = match dir.action {
        DirectiveAction::Origin => n == 1,
        DirectiveAction::Space | DirectiveAction::Align => (1..=2).contains(&n),
        DirectiveAction::Equ => n == 2,
        DirectiveAction::Text | DirectiveAction::Data => n == 0,
        DirectiveAction::Byte
        | DirectiveAction::Half
        | DirectiveAction::Word
        | DirectiveAction::Dword
        | DirectiveAction::Ascii
        | DirectiveAction::Asciz => n >= 1,
        DirectiveAction::Custom => dir.argument_types.is_empty() || n == dir.argument_types.len(),
    };
    if !arity_ok {
        return Err(AsmError::unsupported(format!("`{name}` does not take {n} argument(s)")));
    }
    for (i, a) in args.iter().enumerate() {
        let Some(ty) = dir.argument_types.get(i).or(dir.argument_types.last()) else { break };
        let ok = match ty {
            ArgType::Int | ArgType::Expr => matches!(a, Operand::Immediate(_)),
            ArgType::Symbol => matches!(a, Operand::Immediate(Expr::Symbol(_))),
            ArgType::String => matches!(a, Operand::Str(_)),
        };
        if !ok {
            return Err(AsmError::unsupported(format!(
                "argument {} of `{name}` must be {ty:?}, found {}",
                i + 1,
                a.kind_name()
            )));
        }
    }
    Ok(())
}

/// Picks the form of `mnemonic` whose slots accept `operands`.
pub fn select(model: &IsaModel, mnemonic: &str, operands: &[Operand]) -> Result<usize, AsmError> {
    let forms: Vec<(usize, &Instruction)> =
        model.instructions_named(mnemonic).filter(|(_, i)| i.arity() == operands.len()).collect();
    if forms.is_empty() {
        return Err(AsmError::UnknownMnemonic { mnemonic: mnemonic.to_string(), arity: operands.len() });
    }
    forms.iter().find(|(_, i)| i.accepts(operands)).map(|(idx, _)| *idx).ok_or_else(|| {
        let expected: Vec<&str> = forms.iter().map(|(_, i)| i.syntax.as_str()).collect();
        let found: Vec<&str> = operands.iter().map(Operand::kind_name).collect();
        AsmError::unsupported(format!("`{mnemonic}` takes `{}`, found {}", expected.join("` or `"), found.join(", ")))
    })
}

pub fn eval_expr(e: &Expr, resolve: &dyn Fn(&str) -> Option<i64>) -> Result<i64, AsmError> {
    match e {
        Expr::Num(v) => Ok(*v),
        Expr::Symbol(name) => resolve(name).ok_or_else(|| AsmError::UndefinedSymbol { name: name.clone() }),
        Expr::Slice { expr, high, low } => Ok(bits::extract(eval_expr(expr, resolve)? as u64, *high, *low) as i64),
        Expr::Neg(inner) => Ok(eval_expr(inner, resolve)?.wrapping_neg()),
        Expr::Binary { op, lhs, rhs } => {
            let (l, r) = (eval_expr(lhs, resolve)?, eval_expr(rhs, resolve)?);
            Ok(match op {
                ExprOp::Add => l.wrapping_add(r),
                ExprOp::Sub => l.wrapping_sub(r),
            })
        }
        Expr::Placeholder(p) => Err(AsmError::unsupported(format!("unbound template parameter `{p}`"))),
    }
}

/// Resolves written operands into per-operand values, in the instruction's
/// operand order rather than the written order.
pub fn bind_operands(
    inst: &Instruction,
    operands: &[Operand],
    eval: &mut dyn FnMut(&Expr) -> Result<i64, AsmError>,
) -> Result<Vec<OperandValue>, AsmError> {
    let mut values: Vec<Option<OperandValue>> = vec![None; inst.operands.len()];
    for (slot, op) in inst.slots.iter().zip(operands) {
        match (slot, op) {
            (Slot::Plain(i), op) => values[*i] = Some(value_of(op, eval)?),
            (Slot::Memory { offset, base }, Operand::Memory { offset: e, base: b }) => {
                values[*offset] = Some(OperandValue::Int { value: eval(e)?, sliced: e.is_sliced() });
                values[*base] = Some(value_of(b, eval)?);
            }
            (_, op) => {
                return Err(AsmError::unsupported(format!("`{}` cannot take a {} operand here", inst.mnemonic, op.kind_name())))
            }
        }
    }
    values
        .into_iter()
        .zip(&inst.operands)
        .map(|(v, spec)| v.ok_or_else(|| AsmError::unsupported(format!("missing operand `{}`", spec.name))))
        .collect()
}

fn value_of(op: &Operand, eval: &mut dyn FnMut(&Expr) -> Result<i64, AsmError>) -> Result<OperandValue, AsmError> {
    Ok(match op {
        Operand::Register(r) => OperandValue::Register(*r),
        Operand::Immediate(e) => OperandValue::Int { value: eval(e)?, sliced: e.is_sliced() },
        Operand::Str(s) => OperandValue::Str(s.clone()),
        Operand::Memory { offset, base } => match **base {
            Operand::Register(r) => OperandValue::Memory { offset: eval(offset)?, base: r },
            _ => return Err(AsmError::unsupported("memory base must be a register")),
        },
        Operand::Placeholder(p) => return Err(AsmError::unsupported(format!("unbound template parameter `{p}`"))),
    })
}

/// Address a pc-relative operand of `inst` at `address` is measured from.
pub fn pc_base(model: &IsaModel, inst: &Instruction, address: u64) -> u64 {
    match model.pc_relative_base {
        PcRelativeBase::Current => address,
        PcRelativeBase::Next => address + inst.size_bytes as u64,
    }
}

/// Packs resolved operands into the instruction's fields.
pub fn encode_fields(model: &IsaModel, inst: &Instruction, values: &[OperandValue], address: u64) -> Result<Vec<u8>, AsmError> {
    let mut word = inst.fixed_value;
    let mut logical: Vec<Option<u64>> = vec![None; inst.operands.len()];
    for f in &inst.fields {
        let Some(i) = f.operand else { continue };
        let spec = &inst.operands[i];
        let raw = match (&values[i], f.kind) {
            (OperandValue::Register(r), FieldKind::Register) => model.registers[*r].number as u64,
            (OperandValue::Int { value, sliced }, FieldKind::Immediate) => {
                let v = match logical[i] {
                    Some(v) => v,
                    None => {
                        let v = immediate(model, inst, i, *value, *sliced, address)?;
                        logical[i] = Some(v);
                        v
                    }
                };
                bits::extract(v, f.operand_bits.high, f.operand_bits.low)
            }
            (v, _) => {
                return Err(AsmError::unsupported(format!(
                    "operand `{}` of `{}` cannot hold {v:?}",
                    spec.name, inst.mnemonic
                )))
            }
        };
        word = bits::insert(word, f.bits.high, f.bits.low, raw, f.truncate).map_err(|_| AsmError::FieldOverflow {
            field: f.name.clone(),
            value: raw as i64,
            width: f.bits.width(),
        })?;
    }
    Ok(bits::to_bytes(word, inst.size_bytes, model.little_endian()))
}

/// Range- and alignment-checked logical value of immediate operand `i`.
fn immediate(model: &IsaModel, inst: &Instruction, i: usize, value: i64, sliced: bool, address: u64) -> Result<u64, AsmError> {
    let spec = &inst.operands[i];
    let v = match spec.target {
        Some(TargetKind::Relative) => value.wrapping_sub(pc_base(model, inst, address) as i64),
        _ => value,
    };
    if !spec.truncate {
        let fits = if sliced {
            bits::fits_unsigned(v, spec.width) || (spec.signed && bits::fits_signed(v, spec.width))
        } else if spec.signed {
            bits::fits_signed(v, spec.width)
        } else {
            bits::fits_unsigned(v, spec.width)
        };
        if !fits {
            let (min, max) = if spec.signed { bits::signed_range(spec.width) } else { bits::unsigned_range(spec.width) };
            return Err(AsmError::ImmediateOutOfRange { operand: spec.name.clone(), value: v, min, max });
        }
        if spec.align_bits > 0 && v as u64 & bits::mask(spec.align_bits) != 0 {
            return Err(AsmError::ImmediateMisaligned { operand: spec.name.clone(), value: v, align: 1 << spec.align_bits });
        }
    }
    Ok(v as u64 & bits::mask(spec.width))
}
