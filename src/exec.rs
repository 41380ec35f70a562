//! Explicit execution of instruction semantics scripts.
//!
//! The assembler never runs `execute`-mode scripts; callers that want to see
//! an instruction's effect on the machine state go through an [`Executor`].

use tracing::trace;

use crate::decoder::{DecodedInstruction, DecodedOperand};
use crate::error::AsmError;
use crate::isa::{IsaModel, ScriptMode};
use crate::machine::{Bus, MachineHost, MachineState};
use crate::sandbox::{self, Invocation, Outcome, Value};

pub trait Executor {
    /// Runs the semantics of `d`. `Ok(None)` when it has nothing to run.
    fn exec(&self, state: &mut MachineState, bus: &mut dyn Bus, d: &DecodedInstruction) -> Result<Option<Outcome>, AsmError>;
}

pub struct ScriptExecutor<'m> {
    model: &'m IsaModel,
}

impl<'m> ScriptExecutor<'m> {
    pub fn new(model: &'m IsaModel) -> Self {
        Self { model }
    }

    /// Executes `program` in order; returns how many scripts ran.
    pub fn run_all(&self, state: &mut MachineState, bus: &mut dyn Bus, program: &[DecodedInstruction]) -> Result<usize, AsmError> {
        let mut ran = 0;
        for d in program {
            if self.exec(state, bus, d)?.is_some() {
                ran += 1;
            }
        }
        Ok(ran)
    }
}

impl Executor for ScriptExecutor<'_> {
    fn exec(&self, state: &mut MachineState, bus: &mut dyn Bus, d: &DecodedInstruction) -> Result<Option<Outcome>, AsmError> {
        let inst = &self.model.instructions[d.index];
        let Some(script) = inst.script.as_ref().filter(|_| inst.mode == ScriptMode::Execute) else {
            return Ok(None);
        };
        let mut args = Vec::with_capacity(inst.operands.len());
        for op in d.operands(self.model) {
            match op {
                DecodedOperand::Register(r) => args.push(Value::Str(self.model.registers[r].name.clone())),
                DecodedOperand::Imm(v) => args.push(Value::Int(v)),
                DecodedOperand::Target(a) => args.push(Value::Int(a as i64)),
                DecodedOperand::Memory { offset, base } => {
                    args.push(Value::Int(offset));
                    args.push(Value::Str(self.model.registers[base].name.clone()));
                }
            }
        }
        let mut host = MachineHost::new(state, bus, self.model.little_endian());
        let inv = Invocation::new(args, d.address).with_step_limit(self.model.step_limit);
        let outcome = sandbox::run(script, &mut host, inv)?;
        trace!(inst = %inst.mnemonic, addr = format_args!("{:#x}", d.address), steps = outcome.steps, "executed");
        Ok(Some(outcome))
    }
}
