//! Validated, read-only view of an ISA definition.

use std::collections::HashMap;

use bitvec::prelude::*;
use tracing::debug;

use super::def::*;
use crate::bits;
use crate::error::IsaError;
use crate::parser::{Operand, Parser};
use crate::sandbox::{self, Capabilities, CompiledScript, DEFAULT_STEP_LIMIT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub name: String,
    /// bits
    pub width: u32,
    pub aliases: Vec<String>,
    pub purpose: Option<String>,
    /// Value stored in register fields.
    pub number: u32,
}

impl Register {
    /// Hardwired-zero registers read as zero and ignore writes.
    pub fn is_zero(&self) -> bool {
        self.purpose.as_deref().is_some_and(|p| p.eq_ignore_ascii_case("zero"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Register,
    Immediate,
    /// Not encoded by any field; only handed to the instruction's script.
    Any,
}

/// One logical operand of an instruction, possibly spread over several fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandSpec {
    pub name: String,
    pub kind: OperandKind,
    /// bits of the logical value
    pub width: u32,
    pub signed: bool,
    pub target: Option<TargetKind>,
    pub truncate: bool,
    /// Low bits that are implied zero (lowest `operand_bits.low` of any field).
    pub align_bits: u32,
}

impl OperandSpec {
    pub fn is_target(&self) -> bool {
        self.target.is_some()
    }
}

/// Position of an operand in the written syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Plain(usize),
    /// `offset(base)`
    Memory { offset: usize, base: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub bits: BitRange,
    pub kind: FieldKind,
    pub value: u64,
    pub signed: bool,
    /// Index into [`Instruction::operands`].
    pub operand: Option<usize>,
    pub operand_bits: BitRange,
    pub truncate: bool,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub mnemonic: String,
    pub format: Option<String>,
    pub syntax: String,
    pub slots: Vec<Slot>,
    pub operands: Vec<OperandSpec>,
    pub fields: Vec<Field>,
    pub fixed_mask: u64,
    pub fixed_value: u64,
    pub size_bytes: usize,
    pub script: Option<CompiledScript>,
    pub mode: ScriptMode,
}

impl Instruction {
    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub fn fixed_bit_count(&self) -> u32 {
        self.fixed_mask.count_ones()
    }

    pub fn matches(&self, word: u64) -> bool {
        word & self.fixed_mask == self.fixed_value
    }

    /// Whether parsed operands fit this instruction's slots.
    pub fn accepts(&self, operands: &[Operand]) -> bool {
        operands.len() == self.slots.len()
            && self.slots.iter().zip(operands).all(|(slot, op)| match (slot, op) {
                (Slot::Plain(i), op) => kind_accepts(self.operands[*i].kind, op),
                (Slot::Memory { offset, base }, Operand::Memory { base: b, .. }) => {
                    self.operands[*offset].kind != OperandKind::Register && kind_accepts(self.operands[*base].kind, b)
                }
                _ => false,
            })
    }

    /// Whether the field layout alone decides the bytes.
    pub fn encodes_fields(&self) -> bool {
        !(self.script.is_some() && self.mode == ScriptMode::Encode)
    }
}

fn kind_accepts(kind: OperandKind, op: &Operand) -> bool {
    match kind {
        OperandKind::Register => matches!(op, Operand::Register(_)),
        OperandKind::Immediate => matches!(op, Operand::Immediate(_)),
        OperandKind::Any => true,
    }
}

#[derive(Debug, Clone)]
pub struct Directive {
    /// Name without the directive prefix.
    pub name: String,
    pub argument_types: Vec<ArgType>,
    pub action: DirectiveAction,
    pub script: Option<CompiledScript>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Pseudo {
    pub mnemonic: String,
    pub params: Vec<String>,
    /// Written order of `params`, with memory-shaped slots.
    pub slots: Vec<PseudoSlot>,
    pub expansion: Vec<(String, Vec<Operand>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoSlot {
    Plain(String),
    Memory { offset: String, base: String },
}

impl Pseudo {
    pub fn arity(&self) -> usize {
        self.slots.len()
    }
}

const STANDARD_DIRECTIVES: &[(&str, DirectiveAction, &[ArgType])] = &[
    ("org", DirectiveAction::Origin, &[ArgType::Expr]),
    ("byte", DirectiveAction::Byte, &[ArgType::Expr]),
    ("half", DirectiveAction::Half, &[ArgType::Expr]),
    ("word", DirectiveAction::Word, &[ArgType::Expr]),
    ("dword", DirectiveAction::Dword, &[ArgType::Expr]),
    ("ascii", DirectiveAction::Ascii, &[ArgType::String]),
    ("asciz", DirectiveAction::Asciz, &[ArgType::String]),
    ("space", DirectiveAction::Space, &[ArgType::Expr]),
    ("align", DirectiveAction::Align, &[ArgType::Expr]),
    ("equ", DirectiveAction::Equ, &[ArgType::Symbol, ArgType::Expr]),
    ("text", DirectiveAction::Text, &[]),
    ("data", DirectiveAction::Data, &[]),
];

#[derive(Debug, Clone)]
pub struct IsaModel {
    pub name: String,
    pub word_size: u32,
    pub instruction_size: u32,
    pub variable_length: bool,
    pub endianness: Endianness,
    pub registers: Vec<Register>,
    pub flags: Vec<String>,
    pub address_space: AddressSpaceDef,
    pub instructions: Vec<Instruction>,
    pub directives: Vec<Directive>,
    pub pseudos: Vec<Pseudo>,
    pub syntax: SyntaxRules,
    pub disassembly: DisassemblyRules,
    pub pc_relative_base: PcRelativeBase,
    pub step_limit: u64,
    register_index: HashMap<String, usize>,
    register_numbers: HashMap<u32, usize>,
    by_mnemonic: HashMap<String, Vec<usize>>,
    decode_order: Vec<usize>,
    directive_index: HashMap<String, usize>,
    pseudo_index: HashMap<String, Vec<usize>>,
}

impl IsaModel {
    pub fn new(def: IsaDefinition) -> Result<Self, IsaError> {
        check_syntax_rules(&def.assembly_syntax)?;
        if def.instruction_size == 0 || def.instruction_size % 8 != 0 || def.instruction_size > bits::MAX_BITS {
            return Err(IsaError::Invalid(format!(
                "instruction_size {} must be a non-zero multiple of 8 up to 64",
                def.instruction_size
            )));
        }
        check_regions(&def.address_space)?;

        let mut model = IsaModel {
            name: def.name,
            word_size: def.word_size,
            instruction_size: def.instruction_size,
            variable_length: def.variable_length,
            endianness: def.endianness,
            registers: Vec::new(),
            flags: def.flags,
            address_space: def.address_space,
            instructions: Vec::new(),
            directives: Vec::new(),
            pseudos: Vec::new(),
            syntax: def.assembly_syntax,
            disassembly: def.disassembly,
            pc_relative_base: def.pc_relative_base,
            step_limit: def.script_step_limit.unwrap_or(DEFAULT_STEP_LIMIT),
            register_index: HashMap::new(),
            register_numbers: HashMap::new(),
            by_mnemonic: HashMap::new(),
            decode_order: Vec::new(),
            directive_index: HashMap::new(),
            pseudo_index: HashMap::new(),
        };

        for (i, r) in def.registers.into_iter().enumerate() {
            let number = r.number.unwrap_or(i as u32);
            for n in std::iter::once(&r.name).chain(&r.aliases) {
                let key = model.fold(n);
                if model.register_index.insert(key, i).is_some() {
                    return Err(IsaError::DuplicateRegister(n.clone()));
                }
            }
            if model.register_numbers.insert(number, i).is_some() {
                return Err(IsaError::Invalid(format!("register number {number} assigned twice")));
            }
            model.registers.push(Register { name: r.name, width: r.size, aliases: r.aliases, purpose: r.purpose, number });
        }

        for idef in def.instructions {
            let inst = model.build_instruction(idef)?;
            let key = model.fold(&inst.mnemonic);
            model.by_mnemonic.entry(key).or_default().push(model.instructions.len());
            model.instructions.push(inst);
        }
        let mut order: Vec<usize> = (0..model.instructions.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(model.instructions[i].fixed_bit_count()));
        model.decode_order = order;

        for (name, action, types) in STANDARD_DIRECTIVES {
            model.add_directive(Directive {
                name: name.to_string(),
                argument_types: types.to_vec(),
                action: *action,
                script: None,
                size: None,
            });
        }
        for d in def.directives {
            let script = d
                .semantics_script
                .as_deref()
                .map(|s| sandbox::compile(s, Capabilities::DIRECTIVE))
                .transpose()
                .map_err(|source| IsaError::Script { owner: d.name.clone(), source })?;
            if script.is_none() && d.action == DirectiveAction::Custom {
                return Err(IsaError::Invalid(format!("directive `{}` has neither an action nor a script", d.name)));
            }
            let name = model.strip_directive_prefix(&d.name).to_string();
            model.add_directive(Directive { name, argument_types: d.argument_types, action: d.action, script, size: d.size });
        }

        let pseudos = def
            .pseudo_instructions
            .iter()
            .map(|p| model.build_pseudo(p))
            .collect::<Result<Vec<_>, _>>()?;
        for p in pseudos {
            let key = model.fold(&p.mnemonic);
            model.pseudo_index.entry(key).or_default().push(model.pseudos.len());
            model.pseudos.push(p);
        }

        debug!(
            isa = %model.name,
            registers = model.registers.len(),
            instructions = model.instructions.len(),
            directives = model.directives.len(),
            pseudos = model.pseudos.len(),
            "built ISA model"
        );
        Ok(model)
    }

    /// Case folding for mnemonics, registers and directives.
    pub fn fold(&self, s: &str) -> String {
        if self.syntax.case_sensitive {
            s.to_string()
        } else {
            s.to_ascii_lowercase()
        }
    }

    pub fn little_endian(&self) -> bool {
        self.endianness.is_little()
    }

    pub fn register(&self, name: &str) -> Option<usize> {
        self.register_index.get(&self.fold(name)).copied()
    }

    pub fn register_by_number(&self, number: u64) -> Option<usize> {
        u32::try_from(number).ok().and_then(|n| self.register_numbers.get(&n).copied())
    }

    /// How a register is written in source.
    pub fn register_text(&self, index: usize) -> String {
        format!("{}{}", self.syntax.register_prefix, self.registers[index].name)
    }

    pub fn instructions_named(&self, mnemonic: &str) -> impl Iterator<Item = (usize, &Instruction)> {
        self.by_mnemonic
            .get(&self.fold(mnemonic))
            .into_iter()
            .flatten()
            .map(move |&i| (i, &self.instructions[i]))
    }

    pub fn has_instruction(&self, mnemonic: &str, arity: usize) -> bool {
        self.instructions_named(mnemonic).any(|(_, i)| i.arity() == arity)
    }

    /// Instructions tried by the decoder, most fixed bits first.
    pub fn decode_order(&self) -> impl Iterator<Item = (usize, &Instruction)> {
        self.decode_order.iter().map(move |&i| (i, &self.instructions[i]))
    }

    fn strip_directive_prefix<'a>(&self, name: &'a str) -> &'a str {
        let p = &self.syntax.directive_prefix;
        if p.is_empty() {
            name
        } else {
            name.strip_prefix(p.as_str()).unwrap_or(name)
        }
    }

    pub fn directive(&self, name: &str) -> Option<&Directive> {
        let key = self.fold(self.strip_directive_prefix(name));
        self.directive_index.get(&key).map(|&i| &self.directives[i])
    }

    /// Source spelling of the directive carrying `action`.
    pub fn directive_for(&self, action: DirectiveAction) -> Option<String> {
        self.directives
            .iter()
            .find(|d| d.action == action && d.script.is_none())
            .map(|d| format!("{}{}", self.syntax.directive_prefix, d.name))
    }

    pub fn pseudo(&self, mnemonic: &str, arity: usize) -> Option<&Pseudo> {
        self.pseudo_index
            .get(&self.fold(mnemonic))?
            .iter()
            .map(|&i| &self.pseudos[i])
            .find(|p| p.arity() == arity)
    }

    /// Declared region containing `addr`.
    pub fn region_at(&self, addr: u64) -> Option<&MemoryRegionDef> {
        self.address_space.regions.iter().find(|r| r.start <= addr && addr <= r.end)
    }

    fn add_directive(&mut self, d: Directive) {
        let key = self.fold(&d.name);
        if let Some(&i) = self.directive_index.get(&key) {
            self.directives[i] = d;
        } else {
            self.directive_index.insert(key, self.directives.len());
            self.directives.push(d);
        }
    }

    fn build_instruction(&self, def: InstructionDef) -> Result<Instruction, IsaError> {
        let bad = |detail: String| IsaError::InvalidEncoding { mnemonic: def.mnemonic.clone(), detail };
        let size_bits = def.size.unwrap_or(self.instruction_size);
        if size_bits == 0 || size_bits % 8 != 0 || size_bits > bits::MAX_BITS {
            return Err(bad(format!("size {size_bits} must be a non-zero multiple of 8 up to 64")));
        }
        if size_bits != self.instruction_size && !self.variable_length {
            return Err(bad(format!("size {size_bits} differs from the fixed instruction size")));
        }

        let (head, slot_names) = parse_syntax(&def.syntax)?;
        if self.fold(&head) != self.fold(&def.mnemonic) {
            return Err(IsaError::InvalidSyntax {
                template: def.syntax.clone(),
                detail: format!("does not start with `{}`", def.mnemonic),
            });
        }

        let mut names: Vec<String> = Vec::new();
        let mut slots = Vec::new();
        let intern = |n: &str, names: &mut Vec<String>| -> Result<usize, IsaError> {
            if names.iter().any(|x| x == n) {
                return Err(IsaError::InvalidSyntax { template: def.syntax.clone(), detail: format!("operand `{n}` appears twice") });
            }
            names.push(n.to_string());
            Ok(names.len() - 1)
        };
        for s in &slot_names {
            slots.push(match s {
                PseudoSlot::Plain(n) => Slot::Plain(intern(n, &mut names)?),
                PseudoSlot::Memory { offset, base } => Slot::Memory {
                    offset: intern(offset, &mut names)?,
                    base: intern(base, &mut names)?,
                },
            });
        }

        let mut used: BitVec<u64, Lsb0> = bitvec![u64, Lsb0; 0; size_bits as usize];
        let mut fields = Vec::new();
        let (mut fixed_mask, mut fixed_value) = (0u64, 0u64);
        for f in &def.encoding.fields {
            if f.bits.high >= size_bits {
                return Err(bad(format!("field `{}` [{}] exceeds the {size_bits}-bit instruction", f.name, f.bits)));
            }
            let span = &mut used[f.bits.low as usize..=f.bits.high as usize];
            if span.any() {
                return Err(bad(format!("field `{}` [{}] overlaps another field", f.name, f.bits)));
            }
            span.fill(true);

            let operand = match f.kind {
                FieldKind::Fixed => {
                    let v = f.value.ok_or_else(|| bad(format!("fixed field `{}` has no value", f.name)))?;
                    fixed_mask = bits::insert(fixed_mask, f.bits.high, f.bits.low, bits::mask(f.bits.width()), false)
                        .map_err(|e| bad(e.to_string()))?;
                    fixed_value = bits::insert(fixed_value, f.bits.high, f.bits.low, v, false)
                        .map_err(|_| bad(format!("fixed value {v:#x} does not fit field `{}`", f.name)))?;
                    None
                }
                FieldKind::Register | FieldKind::Immediate => {
                    let op = f.operand.as_deref().unwrap_or(&f.name);
                    let idx = names
                        .iter()
                        .position(|n| n == op)
                        .ok_or_else(|| bad(format!("field `{}` feeds `{op}`, which the syntax does not name", f.name)))?;
                    Some(idx)
                }
            };
            let operand_bits = f.operand_bits.unwrap_or(BitRange::new(f.bits.width() - 1, 0));
            if operand_bits.high >= 64 {
                return Err(bad(format!("field `{}` operand_bits {} reach past bit 63", f.name, operand_bits)));
            }
            if operand_bits.width() != f.bits.width() {
                return Err(bad(format!("field `{}` is {} bits but operand_bits {} is not", f.name, f.bits.width(), operand_bits)));
            }
            fields.push(Field {
                name: f.name.clone(),
                bits: f.bits,
                kind: f.kind,
                value: f.value.unwrap_or(0),
                signed: f.signed,
                operand,
                operand_bits,
                truncate: f.truncate,
            });
        }

        let mut operands = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let feeding: Vec<&Field> = fields.iter().filter(|f| f.operand == Some(i)).collect();
            let kinds_differ = feeding.windows(2).any(|w| w[0].kind != w[1].kind);
            if kinds_differ {
                return Err(bad(format!("operand `{name}` is fed by both register and immediate fields")));
            }
            let kind = match feeding.first().map(|f| f.kind) {
                Some(FieldKind::Register) => {
                    if feeding.len() > 1 {
                        return Err(bad(format!("register operand `{name}` is split over several fields")));
                    }
                    OperandKind::Register
                }
                Some(_) => OperandKind::Immediate,
                None if def.semantics_script.is_some() && def.semantics_mode != ScriptMode::Execute => OperandKind::Any,
                None => return Err(bad(format!("operand `{name}` is not encoded by any field"))),
            };
            let width = feeding.iter().map(|f| f.operand_bits.high + 1).max().unwrap_or(0);
            let mut cover: BitVec<u64, Lsb0> = bitvec![u64, Lsb0; 0; width as usize];
            for f in &feeding {
                let span = &mut cover[f.operand_bits.low as usize..=f.operand_bits.high as usize];
                if span.any() {
                    return Err(bad(format!("operand `{name}` bits {} are stored twice", f.operand_bits)));
                }
                span.fill(true);
            }
            let align_bits = feeding.iter().map(|f| f.operand_bits.low).min().unwrap_or(0);
            if cover[align_bits as usize..].not_all() {
                return Err(bad(format!("operand `{name}` has bits no field stores")));
            }
            operands.push(OperandSpec {
                name: name.clone(),
                kind,
                width,
                signed: feeding.iter().any(|f| f.signed),
                target: def.encoding.fields.iter().filter(|f| f.operand.as_deref().unwrap_or(&f.name) == name).find_map(|f| f.target),
                truncate: feeding.iter().any(|f| f.truncate),
                align_bits,
            });
        }

        let script = def
            .semantics_script
            .as_deref()
            .map(|s| sandbox::compile(s, Capabilities::INSTRUCTION))
            .transpose()
            .map_err(|source| IsaError::Script { owner: def.mnemonic.clone(), source })?;

        Ok(Instruction {
            mnemonic: def.mnemonic,
            format: def.format,
            syntax: def.syntax,
            slots,
            operands,
            fields,
            fixed_mask,
            fixed_value,
            size_bytes: (size_bits / 8) as usize,
            script,
            mode: def.semantics_mode,
        })
    }

    fn build_pseudo(&self, def: &PseudoDef) -> Result<Pseudo, IsaError> {
        let bad = |detail: String| IsaError::InvalidPseudo { mnemonic: def.mnemonic.clone(), detail };
        let (head, slots) = parse_syntax(&def.syntax)?;
        if self.fold(&head) != self.fold(&def.mnemonic) {
            return Err(bad(format!("syntax `{}` does not start with the mnemonic", def.syntax)));
        }
        let params: Vec<String> = slots
            .iter()
            .flat_map(|s| match s {
                PseudoSlot::Plain(n) => vec![n.clone()],
                PseudoSlot::Memory { offset, base } => vec![offset.clone(), base.clone()],
            })
            .collect();
        if def.expansion.is_empty() {
            return Err(bad("empty expansion".into()));
        }
        let parser = Parser::for_template(self, &params);
        let mut expansion = Vec::with_capacity(def.expansion.len());
        for line in &def.expansion {
            let (mnemonic, operands) = parser.parse_template(line).map_err(|e| bad(format!("`{line}`: {e}")))?;
            if !self.has_instruction(&mnemonic, operands.len()) {
                return Err(bad(format!("`{line}` does not name a real instruction")));
            }
            expansion.push((mnemonic, operands));
        }
        Ok(Pseudo { mnemonic: def.mnemonic.clone(), params, slots, expansion })
    }
}

/// `"lw rd, imm(rs1)"` → `("lw", [rd, imm(rs1)])`.
fn parse_syntax(template: &str) -> Result<(String, Vec<PseudoSlot>), IsaError> {
    let bad = |detail: &str| IsaError::InvalidSyntax { template: template.to_string(), detail: detail.to_string() };
    let t = template.trim();
    let (head, rest) = t.split_once(char::is_whitespace).unwrap_or((t, ""));
    if head.is_empty() {
        return Err(bad("missing mnemonic"));
    }
    let mut slots = Vec::new();
    if rest.trim().is_empty() {
        return Ok((head.to_string(), slots));
    }
    let ident = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    for part in rest.split(',') {
        let part = part.trim();
        if let Some((offset, base)) = part.strip_suffix(')').and_then(|p| p.split_once('(')) {
            let (offset, base) = (offset.trim(), base.trim());
            if !ident(offset) || !ident(base) {
                return Err(bad("memory operands must read `offset(base)`"));
            }
            slots.push(PseudoSlot::Memory { offset: offset.to_string(), base: base.to_string() });
        } else if ident(part) {
            slots.push(PseudoSlot::Plain(part.to_string()));
        } else {
            return Err(bad("operands must be plain names"));
        }
    }
    Ok((head.to_string(), slots))
}

fn check_syntax_rules(rules: &SyntaxRules) -> Result<(), IsaError> {
    for c in &rules.comment_chars {
        if c.is_empty() {
            return Err(IsaError::Invalid("empty comment marker".into()));
        }
        for (what, prefix) in [("register", &rules.register_prefix), ("immediate", &rules.immediate_prefix)] {
            if !prefix.is_empty() && prefix.starts_with(c.as_str()) {
                return Err(IsaError::Invalid(format!("comment marker `{c}` collides with the {what} prefix")));
            }
        }
    }
    Ok(())
}

fn check_regions(space: &AddressSpaceDef) -> Result<(), IsaError> {
    let mut regions: Vec<&MemoryRegionDef> = space.regions.iter().collect();
    regions.sort_by_key(|r| r.start);
    for r in &regions {
        if r.end < r.start {
            return Err(IsaError::Invalid(format!("region `{}` ends before it starts", r.name)));
        }
        if space.size != 0 && r.end >= space.size {
            return Err(IsaError::Invalid(format!("region `{}` lies outside the address space", r.name)));
        }
    }
    if let Some(w) = regions.windows(2).find(|w| w[1].start <= w[0].end) {
        return Err(IsaError::Invalid(format!("regions `{}` and `{}` overlap", w[0].name, w[1].name)));
    }
    Ok(())
}
