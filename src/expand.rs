//! Pseudo-instruction expansion. Purely structural: operands are substituted
//! into the expansion templates, nothing is evaluated.

use std::collections::HashMap;

use tracing::trace;

use crate::error::{AsmError, Diagnostic, Diagnostics};
use crate::isa::{IsaModel, Pseudo, PseudoSlot};
use crate::parser::{Expr, Operand, Statement, StatementKind};

pub type Bindings = HashMap<String, Operand>;

/// Replaces pseudo statements by their expansions. Real instructions with the
/// same mnemonic and arity always take precedence.
pub fn expand(model: &IsaModel, stmts: Vec<Statement>) -> Result<Vec<Statement>, Diagnostics> {
    let mut out = Vec::with_capacity(stmts.len());
    let mut diags = Diagnostics::default();
    for stmt in stmts {
        let pseudo = match &stmt.kind {
            StatementKind::Instruction { mnemonic, operands } if !model.has_instruction(mnemonic, operands.len()) => {
                model.pseudo(mnemonic, operands.len())
            }
            _ => None,
        };
        let (Some(pseudo), StatementKind::Instruction { operands, .. }) = (pseudo, &stmt.kind) else {
            out.push(stmt);
            continue;
        };
        match bind(pseudo, operands).and_then(|b| instantiate(pseudo, &b)) {
            Ok(lines) => {
                trace!(pseudo = %pseudo.mnemonic, lines = lines.len(), "expanded");
                out.extend(lines.into_iter().map(|(mnemonic, operands)| Statement {
                    kind: StatementKind::Instruction { mnemonic, operands },
                    pos: stmt.pos.clone(),
                    text: stmt.text.clone(),
                }));
            }
            Err(e) => diags.push(Diagnostic::new(e).at(&stmt.pos, &stmt.text)),
        }
    }
    if diags.is_empty() {
        Ok(out)
    } else {
        Err(diags)
    }
}

/// Binds the written operands to the pseudo's parameters, positionally.
pub fn bind(pseudo: &Pseudo, operands: &[Operand]) -> Result<Bindings, AsmError> {
    let mut b = Bindings::new();
    for (slot, op) in pseudo.slots.iter().zip(operands) {
        match (slot, op) {
            (PseudoSlot::Plain(name), op) => {
                b.insert(name.clone(), op.clone());
            }
            (PseudoSlot::Memory { offset, base }, Operand::Memory { offset: o, base: r }) => {
                b.insert(offset.clone(), Operand::Immediate(o.clone()));
                b.insert(base.clone(), (**r).clone());
            }
            (PseudoSlot::Memory { .. }, other) => {
                return Err(AsmError::unsupported(format!(
                    "`{}` expects a memory operand, found {}",
                    pseudo.mnemonic,
                    other.kind_name()
                )))
            }
        }
    }
    Ok(b)
}

/// Expansion lines with every placeholder replaced.
pub fn instantiate(pseudo: &Pseudo, bindings: &Bindings) -> Result<Vec<(String, Vec<Operand>)>, AsmError> {
    pseudo
        .expansion
        .iter()
        .map(|(mnemonic, ops)| {
            let ops = ops.iter().map(|o| substitute(o, bindings)).collect::<Result<Vec<_>, _>>()?;
            Ok((mnemonic.clone(), ops))
        })
        .collect()
}

fn lookup<'b>(name: &str, bindings: &'b Bindings) -> Result<&'b Operand, AsmError> {
    bindings
        .get(name)
        .ok_or_else(|| AsmError::unsupported(format!("template parameter `{name}` is not bound")))
}

fn substitute(op: &Operand, bindings: &Bindings) -> Result<Operand, AsmError> {
    Ok(match op {
        Operand::Placeholder(name) => lookup(name, bindings)?.clone(),
        Operand::Immediate(e) => Operand::Immediate(substitute_expr(e, bindings)?),
        Operand::Memory { offset, base } => Operand::Memory {
            offset: substitute_expr(offset, bindings)?,
            base: Box::new(substitute(base, bindings)?),
        },
        Operand::Register(_) | Operand::Str(_) => op.clone(),
    })
}

fn substitute_expr(e: &Expr, bindings: &Bindings) -> Result<Expr, AsmError> {
    Ok(match e {
        Expr::Placeholder(name) => match lookup(name, bindings)? {
            Operand::Immediate(v) => v.clone(),
            other => {
                return Err(AsmError::unsupported(format!(
                    "`{name}` is used in an expression but was given a {} operand",
                    other.kind_name()
                )))
            }
        },
        Expr::Slice { expr, high, low } => Expr::Slice { expr: Box::new(substitute_expr(expr, bindings)?), high: *high, low: *low },
        Expr::Neg(inner) => Expr::Neg(Box::new(substitute_expr(inner, bindings)?)),
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op: *op,
            lhs: Box::new(substitute_expr(lhs, bindings)?),
            rhs: Box::new(substitute_expr(rhs, bindings)?),
        },
        Expr::Num(_) | Expr::Symbol(_) => e.clone(),
    })
}
