//! Byte stream → assembly listing that reassembles to the same bytes.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bits;
use crate::decoder::{DecodedInstruction, DecodedOperand, Decoder};
use crate::encoder::{bind_operands, encode_fields, eval_expr, select};
use crate::error::AsmError;
use crate::expand::{instantiate, Bindings};
use crate::image::{BinaryImage, Region};
use crate::isa::{DirectiveAction, IsaModel, Pseudo, PseudoSlot, RegionKind};
use crate::parser::{escape, Expr, Operand};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisasmOptions {
    /// Load address of raw input; defaults to the ISA's `default_code_start`.
    pub start: Option<u64>,
    /// Treat the input as raw even when it starts with the header magic.
    pub raw: bool,
    pub labels: Vec<KnownLabel>,
    pub reconstruct_pseudo: Option<bool>,
    pub data_run_threshold: Option<usize>,
    /// Comment every line with its address and bytes.
    pub annotate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownLabel {
    pub addr: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Org,
    Label,
    Instruction,
    Pseudo,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub address: u64,
    pub kind: LineKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bytes: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disassembly {
    pub base: u64,
    pub entry: Option<u64>,
    /// Code and data runs as the disassembler classified them.
    pub regions: Vec<Region>,
    pub labels: Vec<KnownLabel>,
    pub lines: Vec<Line>,
    #[serde(skip)]
    comment_marker: String,
}

impl Disassembly {
    pub fn text(&self) -> String {
        let mut out = String::new();
        for l in &self.lines {
            match l.kind {
                LineKind::Label => out.push_str(&l.text),
                _ => {
                    out.push_str("    ");
                    out.push_str(&l.text);
                }
            }
            if let Some(c) = &l.comment {
                out.push_str(&format!(" {} {c}", self.comment_marker));
            }
            out.push('\n');
        }
        out
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter().filter(|l| matches!(l.kind, LineKind::Instruction | LineKind::Pseudo))
    }
}

#[derive(Debug, Clone)]
enum Item {
    Inst(DecodedInstruction),
    Data { addr: u64, bytes: Vec<u8> },
}

impl Item {
    fn addr(&self) -> u64 {
        match self {
            Item::Inst(d) => d.address,
            Item::Data { addr, .. } => *addr,
        }
    }
}

/// Disassembles a headered image, or raw bytes loaded at `opts.start`.
pub fn disassemble_bytes(model: &IsaModel, data: &[u8], opts: &DisasmOptions) -> Result<Disassembly, AsmError> {
    let image = if !opts.raw && BinaryImage::is_headered(data) {
        BinaryImage::from_headered(data)?
    } else {
        BinaryImage::from_raw(opts.start.unwrap_or(model.address_space.default_code_start), data.to_vec())
    };
    Ok(disassemble(model, &image, opts))
}

pub fn disassemble(model: &IsaModel, image: &BinaryImage, opts: &DisasmOptions) -> Disassembly {
    let items = scan(model, image, opts);
    let labels = place_labels(model, image, &items, opts);
    let mut lines = Vec::new();
    if !image.bytes.is_empty() {
        let org = model.directive_for(DirectiveAction::Origin).unwrap_or_else(|| format!("{}org", model.syntax.directive_prefix));
        lines.push(Line {
            address: image.base,
            kind: LineKind::Org,
            text: format!("{org} {}", hex(model, image.base)),
            bytes: Vec::new(),
            comment: None,
        });
    }
    let reconstruct = opts.reconstruct_pseudo.unwrap_or(model.disassembly.reconstruct_pseudo);
    let mut pseudos: Vec<&Pseudo> = model.pseudos.iter().collect();
    pseudos.sort_by_key(|p| std::cmp::Reverse(p.expansion.len()));

    let mut i = 0;
    while i < items.len() {
        match &items[i] {
            Item::Inst(d) => {
                push_label(model, &labels, d.address, &mut lines);
                let pseudo = if reconstruct { pseudos.iter().find_map(|p| match_pseudo(model, p, &items[i..], &labels)) } else { None };
                match pseudo {
                    Some((text, covered)) => {
                        let run: Vec<&DecodedInstruction> = items[i..i + covered]
                            .iter()
                            .filter_map(|it| match it {
                                Item::Inst(d) => Some(d),
                                Item::Data { .. } => None,
                            })
                            .collect();
                        let expansion: Vec<String> = run.iter().map(|d| render_instruction(model, d, &labels)).collect();
                        let bytes: Vec<u8> = run.iter().flat_map(|d| d.bytes.iter().copied()).collect();
                        let mut comment = format!("= {}", expansion.join(" / "));
                        if opts.annotate {
                            comment.push_str(&format!(" @ {}", annotation(d.address, &bytes)));
                        }
                        lines.push(Line { address: d.address, kind: LineKind::Pseudo, text, bytes, comment: Some(comment) });
                        i += covered;
                    }
                    None => {
                        lines.push(Line {
                            address: d.address,
                            kind: LineKind::Instruction,
                            text: render_instruction(model, d, &labels),
                            bytes: d.bytes.clone(),
                            comment: opts.annotate.then(|| annotation(d.address, &d.bytes)),
                        });
                        i += 1;
                    }
                }
            }
            Item::Data { addr, bytes } => {
                render_data(model, *addr, bytes, &labels, opts.annotate, &mut lines);
                i += 1;
            }
        }
    }

    let mut regions: Vec<Region> = Vec::new();
    for it in &items {
        let (start, len, kind) = match it {
            Item::Inst(d) => (d.address, d.size() as u64, RegionKind::Code),
            Item::Data { addr, bytes } => (*addr, bytes.len() as u64, RegionKind::Data),
        };
        match regions.last_mut() {
            Some(r) if r.kind == kind && r.end() == start => r.length += len,
            _ => regions.push(Region { start, length: len, kind }),
        }
    }
    debug!(items = items.len(), labels = labels.len(), lines = lines.len(), "disassembled");
    Disassembly {
        base: image.base,
        entry: image.entry,
        regions,
        labels: labels.iter().map(|(&addr, name)| KnownLabel { addr, name: name.clone() }).collect(),
        lines,
        comment_marker: model.syntax.comment_chars.first().cloned().unwrap_or_else(|| ";".into()),
    }
}

/// Splits the image into decoded instructions and data runs.
fn scan(model: &IsaModel, image: &BinaryImage, opts: &DisasmOptions) -> Vec<Item> {
    let unit = ((model.instruction_size / 8) as usize).max(1);
    let threshold = opts.data_run_threshold.unwrap_or(model.disassembly.data_run_threshold);
    let start = image.entry.filter(|e| image.contains(*e)).unwrap_or(image.base);
    let kind_at = |addr: u64| image.region_at(addr).map(|r| r.kind).or_else(|| model.region_at(addr).map(|r| r.kind));

    let mut items = Vec::new();
    let mut pos = image.base;
    while pos < image.end() {
        let rest = &image.bytes[(pos - image.base) as usize..];
        let kind = kind_at(pos);
        if pos < start || kind == Some(RegionKind::Data) {
            push_data(&mut items, pos, &rest[..1]);
            pos += 1;
            continue;
        }
        if kind.is_none() {
            let run = identical_run(rest, unit);
            if run > threshold {
                trace!(addr = format_args!("{pos:#x}"), words = run, "identical run treated as data");
                push_data(&mut items, pos, &rest[..run * unit]);
                pos += (run * unit) as u64;
                continue;
            }
        }
        match model.decode(rest, pos) {
            Some(d) if kind_at(d.end() - 1) != Some(RegionKind::Data) => {
                pos = d.end();
                items.push(Item::Inst(d));
            }
            _ => {
                let n = unit.min(rest.len());
                push_data(&mut items, pos, &rest[..n]);
                pos += n as u64;
            }
        }
    }
    items
}

fn push_data(items: &mut Vec<Item>, addr: u64, bytes: &[u8]) {
    if let Some(Item::Data { addr: start, bytes: prev }) = items.last_mut() {
        if *start + prev.len() as u64 == addr {
            prev.extend_from_slice(bytes);
            return;
        }
    }
    items.push(Item::Data { addr, bytes: bytes.to_vec() });
}

/// Number of consecutive whole words equal to the first one.
fn identical_run(bytes: &[u8], unit: usize) -> usize {
    let Some(first) = bytes.get(..unit) else { return 0 };
    bytes.chunks_exact(unit).take_while(|w| *w == first).count()
}

/// Labels at jump targets and caller-known addresses that start an item
/// (or fall inside data, which can be split).
fn place_labels(model: &IsaModel, image: &BinaryImage, items: &[Item], opts: &DisasmOptions) -> BTreeMap<u64, String> {
    let starts: BTreeMap<u64, &Item> = items.iter().map(|it| (it.addr(), it)).collect();
    let placeable = |addr: u64| match starts.range(..=addr).next_back() {
        Some((_, Item::Inst(d))) => d.address == addr,
        Some((&a, Item::Data { bytes, .. })) => addr < a + bytes.len() as u64,
        None => false,
    };
    let mut labels = BTreeMap::new();
    for l in &opts.labels {
        if placeable(l.addr) {
            labels.insert(l.addr, l.name.clone());
        }
    }
    for it in items {
        if let Item::Inst(d) = it {
            for t in d.targets(model) {
                if image.contains(t) && placeable(t) {
                    labels.entry(t).or_insert_with(|| format!("L_{t:04x}"));
                }
            }
        }
    }
    labels
}

fn push_label(model: &IsaModel, labels: &BTreeMap<u64, String>, addr: u64, lines: &mut Vec<Line>) {
    if let Some(name) = labels.get(&addr) {
        lines.push(Line {
            address: addr,
            kind: LineKind::Label,
            text: format!("{name}{}", model.syntax.label_suffix),
            bytes: Vec::new(),
            comment: None,
        });
    }
}

fn annotation(addr: u64, bytes: &[u8]) -> String {
    let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{addr:#06x}: {}", hex.join(" "))
}

fn hex(model: &IsaModel, v: u64) -> String {
    if model.syntax.hex_prefix.is_empty() {
        v.to_string()
    } else {
        format!("{}{v:x}", model.syntax.hex_prefix)
    }
}

fn number(model: &IsaModel, v: i64) -> String {
    if (-256..=256).contains(&v) || model.syntax.hex_prefix.is_empty() {
        v.to_string()
    } else if v < 0 {
        format!("-{}", hex(model, v.unsigned_abs()))
    } else {
        hex(model, v as u64)
    }
}

fn render_operand(model: &IsaModel, op: DecodedOperand, labels: &BTreeMap<u64, String>) -> String {
    match op {
        DecodedOperand::Register(r) => model.register_text(r),
        DecodedOperand::Imm(v) => format!("{}{}", model.syntax.immediate_prefix, number(model, v)),
        DecodedOperand::Target(a) => labels.get(&a).cloned().unwrap_or_else(|| hex(model, a)),
        DecodedOperand::Memory { offset, base } => format!("{}({})", number(model, offset), model.register_text(base)),
    }
}

fn render_instruction(model: &IsaModel, d: &DecodedInstruction, labels: &BTreeMap<u64, String>) -> String {
    let inst = &model.instructions[d.index];
    let ops: Vec<String> = d.operands(model).into_iter().map(|op| render_operand(model, op, labels)).collect();
    if ops.is_empty() {
        inst.mnemonic.clone()
    } else {
        format!("{} {}", inst.mnemonic, ops.join(", "))
    }
}

/// One instruction in assembler syntax, with targets as plain addresses.
pub fn fmt_decoded(model: &IsaModel, d: &DecodedInstruction) -> String {
    render_instruction(model, d, &BTreeMap::new())
}

fn render_data(model: &IsaModel, addr: u64, bytes: &[u8], labels: &BTreeMap<u64, String>, annotate: bool, lines: &mut Vec<Line>) {
    let end = addr + bytes.len() as u64;
    let mut cuts: Vec<u64> = labels.range(addr..end).map(|(a, _)| *a).collect();
    cuts.push(end);
    let mut from = addr;
    for cut in cuts {
        if cut > from {
            push_label(model, labels, from, lines);
            let seg = &bytes[(from - addr) as usize..(cut - addr) as usize];
            render_segment(model, from, seg, annotate, lines);
        }
        from = from.max(cut);
    }
}

fn render_segment(model: &IsaModel, addr: u64, bytes: &[u8], annotate: bool, lines: &mut Vec<Line>) {
    let rules = &model.disassembly;
    let name = |action: DirectiveAction, fallback: &str| {
        model.directive_for(action).unwrap_or_else(|| format!("{}{fallback}", model.syntax.directive_prefix))
    };
    let printable = |b: u8| (rules.printable_min..=rules.printable_max).contains(&b);
    let zero_run = |at: usize| bytes[at..].iter().take_while(|b| **b == 0).count();
    let text_run = |at: usize| bytes[at..].iter().take_while(|b| printable(**b)).count();
    let starts_run = |at: usize| zero_run(at) >= 4 || text_run(at) >= rules.min_string_length.max(1);

    let mut i = 0;
    let push = |at: usize, len: usize, text: String, lines: &mut Vec<Line>| {
        let chunk = &bytes[at..at + len];
        let a = addr + at as u64;
        lines.push(Line {
            address: a,
            kind: LineKind::Data,
            text,
            bytes: chunk.to_vec(),
            comment: annotate.then(|| annotation(a, chunk)),
        });
    };
    while i < bytes.len() {
        let z = zero_run(i);
        if z >= 4 {
            push(i, z, format!("{} {z}", name(DirectiveAction::Space, "space")), lines);
            i += z;
            continue;
        }
        let t = text_run(i);
        if t >= rules.min_string_length.max(1) {
            let s = escape(&bytes[i..i + t]);
            if bytes.get(i + t) == Some(&0) {
                push(i, t + 1, format!("{} \"{s}\"", name(DirectiveAction::Asciz, "asciz")), lines);
                i += t + 1;
            } else {
                push(i, t, format!("{} \"{s}\"", name(DirectiveAction::Ascii, "ascii")), lines);
                i += t;
            }
            continue;
        }
        let mut j = i + 1;
        while j < bytes.len() && j - i < 8 && !starts_run(j) {
            j += 1;
        }
        let vals: Vec<String> = bytes[i..j].iter().map(|b| hex(model, *b as u64)).collect();
        push(i, j - i, format!("{} {}", name(DirectiveAction::Byte, "byte"), vals.join(", ")), lines);
        i = j;
    }
}

/// Renders `items` (starting at an instruction) as `pseudo` when re-expanding
/// the pseudo form reproduces exactly those instructions. Returns the text and
/// how many items it covers.
fn match_pseudo(model: &IsaModel, pseudo: &Pseudo, items: &[Item], labels: &BTreeMap<u64, String>) -> Option<(String, usize)> {
    let k = pseudo.expansion.len();
    let run: Vec<&DecodedInstruction> = items
        .get(..k)?
        .iter()
        .map(|it| match it {
            Item::Inst(d) => Some(d),
            Item::Data { .. } => None,
        })
        .collect::<Option<_>>()?;
    if run.windows(2).any(|w| w[0].end() != w[1].address) || run[1..].iter().any(|d| labels.contains_key(&d.address)) {
        return None;
    }

    let mut u = Unifier::default();
    for ((mnemonic, template), d) in pseudo.expansion.iter().zip(&run) {
        let inst = &model.instructions[d.index];
        if model.fold(mnemonic) != model.fold(&inst.mnemonic) || template.len() != inst.arity() {
            return None;
        }
        for (t, actual) in template.iter().zip(d.operands(model)) {
            u.operand(t, actual)?;
        }
    }
    let targets = std::mem::take(&mut u.targets);
    let bindings = u.finish(pseudo)?;

    let lines = instantiate(pseudo, &bindings).ok()?;
    for ((mnemonic, ops), d) in lines.iter().zip(&run) {
        let idx = select(model, mnemonic, ops).ok()?;
        let inst = &model.instructions[idx];
        let values = bind_operands(inst, ops, &mut |e| eval_expr(e, &|_| None)).ok()?;
        if encode_fields(model, inst, &values, d.address).ok()? != d.bytes {
            return None;
        }
    }

    let render = |name: &str| -> Option<String> {
        let op = match bindings.get(name)? {
            Operand::Register(r) => DecodedOperand::Register(*r),
            Operand::Immediate(Expr::Num(v)) if targets.contains(name) => DecodedOperand::Target(*v as u64),
            Operand::Immediate(Expr::Num(v)) => DecodedOperand::Imm(*v),
            _ => return None,
        };
        Some(render_operand(model, op, labels))
    };
    let mut ops = Vec::with_capacity(pseudo.slots.len());
    for slot in &pseudo.slots {
        ops.push(match slot {
            PseudoSlot::Plain(n) => render(n)?,
            PseudoSlot::Memory { offset, base } => {
                let off = match bindings.get(offset)? {
                    Operand::Immediate(Expr::Num(v)) => number(model, *v),
                    _ => return None,
                };
                format!("{off}({})", render(base)?)
            }
        });
    }
    let text = if ops.is_empty() { pseudo.mnemonic.clone() } else { format!("{} {}", pseudo.mnemonic, ops.join(", ")) };
    Some((text, k))
}

/// Binds template parameters against decoded operands.
#[derive(Default)]
struct Unifier {
    bound: Bindings,
    /// Parameters assembled from bit slices: (bits so far, highest bit + 1).
    partial: HashMap<String, (u64, u32)>,
    targets: HashSet<String>,
}

impl Unifier {
    fn bind(&mut self, name: &str, op: Operand) -> Option<()> {
        match self.bound.get(name) {
            Some(prev) if *prev != op => None,
            _ => {
                self.bound.insert(name.to_string(), op);
                Some(())
            }
        }
    }

    fn operand(&mut self, template: &Operand, actual: DecodedOperand) -> Option<()> {
        if let (Operand::Placeholder(n), DecodedOperand::Target(_)) = (template, actual) {
            self.targets.insert(n.clone());
        }
        match (template, actual) {
            (Operand::Placeholder(n), DecodedOperand::Register(r)) => self.bind(n, Operand::Register(r)),
            (Operand::Placeholder(n), DecodedOperand::Imm(v)) => self.bind(n, Operand::Immediate(Expr::Num(v))),
            (Operand::Placeholder(n), DecodedOperand::Target(a)) => self.bind(n, Operand::Immediate(Expr::Num(a as i64))),
            (Operand::Register(t), DecodedOperand::Register(r)) => (*t == r).then_some(()),
            (Operand::Immediate(e), DecodedOperand::Imm(v)) => self.expr(e, v),
            (Operand::Immediate(e), DecodedOperand::Target(a)) => {
                if let Expr::Placeholder(n) = e {
                    self.targets.insert(n.clone());
                }
                self.expr(e, a as i64)
            }
            (Operand::Memory { offset, base }, DecodedOperand::Memory { offset: o, base: b }) => {
                self.expr(offset, o)?;
                self.operand(base, DecodedOperand::Register(b))
            }
            _ => None,
        }
    }

    fn expr(&mut self, e: &Expr, v: i64) -> Option<()> {
        match e {
            Expr::Placeholder(n) => self.bind(n, Operand::Immediate(Expr::Num(v))),
            Expr::Slice { expr, high, low } => {
                if let Expr::Placeholder(n) = &**expr {
                    let part = (v as u64 & bits::mask(high - low + 1)) << low;
                    let entry = self.partial.entry(n.clone()).or_insert((0, 0));
                    entry.0 |= part;
                    entry.1 = entry.1.max(high + 1);
                }
                Some(())
            }
            Expr::Num(c) => (*c == v).then_some(()),
            // anything else is checked by re-encoding
            _ => Some(()),
        }
    }

    fn finish(mut self, pseudo: &Pseudo) -> Option<Bindings> {
        for (name, (acc, width)) in std::mem::take(&mut self.partial) {
            if !self.bound.contains_key(&name) {
                self.bound.insert(name, Operand::Immediate(Expr::Num(bits::sign_extend(acc, width))));
            }
        }
        pseudo.params.iter().all(|p| self.bound.contains_key(p)).then_some(self.bound)
    }
}
