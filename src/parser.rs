//! Assembly source → statement stream, driven by the ISA's syntax rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AsmError, Diagnostic, Diagnostics, SourcePos};
use crate::isa::{DirectiveAction, IsaModel};

/// One input file of a (possibly multi-file) assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUnit {
    pub name: String,
    pub text: String,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { name: name.into(), text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Num(i64),
    Symbol(String),
    /// `expr[high:low]`
    Slice { expr: Box<Expr>, high: u32, low: u32 },
    Neg(Box<Expr>),
    Binary { op: ExprOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// Pseudo-instruction template parameter.
    Placeholder(String),
}

impl Expr {
    pub fn symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Symbol(s) => out.push(s),
            Expr::Slice { expr, .. } | Expr::Neg(expr) => expr.symbols(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.symbols(out);
                rhs.symbols(out);
            }
            Expr::Num(_) | Expr::Placeholder(_) => {}
        }
    }

    pub fn is_sliced(&self) -> bool {
        matches!(self, Expr::Slice { .. })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(v) => write!(f, "{v}"),
            Expr::Symbol(s) | Expr::Placeholder(s) => f.write_str(s),
            Expr::Slice { expr, high, low } => match **expr {
                Expr::Num(_) | Expr::Symbol(_) | Expr::Placeholder(_) => write!(f, "{expr}[{high}:{low}]"),
                _ => write!(f, "({expr})[{high}:{low}]"),
            },
            Expr::Neg(e) => write!(f, "-{e}"),
            Expr::Binary { op, lhs, rhs } => {
                let op = if *op == ExprOp::Add { '+' } else { '-' };
                write!(f, "{lhs}{op}{rhs}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Index into the model's register list.
    Register(usize),
    Immediate(Expr),
    /// `offset(base)`
    Memory { offset: Expr, base: Box<Operand> },
    /// String literal with escapes already applied.
    Str(Vec<u8>),
    /// Pseudo-instruction template parameter.
    Placeholder(String),
}

impl Operand {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operand::Register(_) => "register",
            Operand::Immediate(_) => "immediate",
            Operand::Memory { .. } => "memory",
            Operand::Str(_) => "string",
            Operand::Placeholder(_) => "placeholder",
        }
    }

    pub fn symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Operand::Immediate(e) => e.symbols(out),
            Operand::Memory { offset, base } => {
                offset.symbols(out);
                base.symbols(out);
            }
            Operand::Register(_) | Operand::Str(_) | Operand::Placeholder(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Label(String),
    Instruction { mnemonic: String, operands: Vec<Operand> },
    Directive { name: String, args: Vec<Operand> },
    RawData { bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub pos: SourcePos,
    /// Source text of the line, comments stripped.
    pub text: String,
}

impl Statement {
    /// Symbols referenced by the statement's operands.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        match &self.kind {
            StatementKind::Instruction { operands, .. } => operands.iter().for_each(|o| o.symbols(&mut out)),
            StatementKind::Directive { args, .. } => args.iter().for_each(|o| o.symbols(&mut out)),
            StatementKind::Label(_) | StatementKind::RawData { .. } => {}
        }
        out
    }
}

/// Parses a single anonymous source unit.
pub fn parse(model: &IsaModel, source: &str) -> Result<Vec<Statement>, Diagnostics> {
    let (stmts, diags) = Parser::new(model).parse_unit(0, &SourceUnit::new("<input>", source));
    if diags.is_empty() {
        Ok(stmts)
    } else {
        Err(diags)
    }
}

pub struct Parser<'m> {
    model: &'m IsaModel,
    placeholders: &'m [String],
}

impl<'m> Parser<'m> {
    pub fn new(model: &'m IsaModel) -> Self {
        Self { model, placeholders: &[] }
    }

    /// Parser for pseudo-instruction templates, where `placeholders` name
    /// template parameters.
    pub(crate) fn for_template(model: &'m IsaModel, placeholders: &'m [String]) -> Self {
        Self { model, placeholders }
    }

    /// Parses every line of `unit`, collecting errors instead of stopping.
    pub fn parse_unit(&self, unit_index: usize, unit: &SourceUnit) -> (Vec<Statement>, Diagnostics) {
        let mut stmts = Vec::new();
        let mut diags = Diagnostics::default();
        for (i, line) in unit.text.lines().enumerate() {
            let pos = SourcePos { unit: unit_index, file: unit.name.clone(), line: i as u32 + 1, column: 1 };
            match self.parse_line(line, &pos) {
                Ok(mut s) => stmts.append(&mut s),
                Err(e) => diags.push(Diagnostic::new(e).at(&pos, line.trim())),
            }
        }
        (stmts, diags)
    }

    pub fn parse_line(&self, line: &str, pos: &SourcePos) -> Result<Vec<Statement>, AsmError> {
        let rules = &self.model.syntax;
        let code = strip_comment(line, &rules.comment_chars);
        let text = code.trim().to_string();
        let mut out = Vec::new();
        let mut rest = code;
        let mut col = 1u32;
        loop {
            let trimmed = rest.trim_start();
            col += (rest.len() - trimmed.len()) as u32;
            rest = trimmed;
            let ident_len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
            if ident_len == 0 || rules.label_suffix.is_empty() || !rest[ident_len..].starts_with(rules.label_suffix.as_str()) {
                break;
            }
            let name = &rest[..ident_len];
            if name.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(AsmError::parse(format!("label `{name}` must not start with a digit"), col));
            }
            out.push(Statement {
                kind: StatementKind::Label(name.to_string()),
                pos: SourcePos { column: col, ..pos.clone() },
                text: text.clone(),
            });
            let consumed = ident_len + rules.label_suffix.len();
            col += consumed as u32;
            rest = &rest[consumed..];
        }
        if rest.trim().is_empty() {
            return Ok(out);
        }

        let head_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let head = &rest[..head_len];
        let stmt_pos = SourcePos { column: col, ..pos.clone() };
        let operand_col = col + head_len as u32;
        let operands = split_operands(&rest[head_len..], operand_col)?
            .into_iter()
            .map(|(t, c)| self.operand(t, c))
            .collect::<Result<Vec<_>, _>>()?;

        let is_directive = !rules.directive_prefix.is_empty() && head.starts_with(rules.directive_prefix.as_str());
        let kind = if is_directive {
            self.lower_literal_data(head, &operands)
                .unwrap_or(StatementKind::Directive { name: head.to_string(), args: operands })
        } else {
            if !head.chars().all(is_ident_char) {
                return Err(AsmError::parse(format!("malformed mnemonic `{head}`"), col));
            }
            StatementKind::Instruction { mnemonic: head.to_string(), operands }
        };
        out.push(Statement { kind, pos: stmt_pos, text });
        Ok(out)
    }

    /// Template line → `(mnemonic, operands)`.
    pub(crate) fn parse_template(&self, line: &str) -> Result<(String, Vec<Operand>), AsmError> {
        let line = line.trim();
        let head_len = line.find(char::is_whitespace).unwrap_or(line.len());
        let operands = split_operands(&line[head_len..], head_len as u32 + 1)?
            .into_iter()
            .map(|(t, c)| self.operand(t, c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((line[..head_len].to_string(), operands))
    }

    /// `.byte`/`.ascii`/`.asciz` with literal-only arguments become raw data.
    fn lower_literal_data(&self, name: &str, args: &[Operand]) -> Option<StatementKind> {
        let dir = self.model.directive(name)?;
        if dir.script.is_some() || args.is_empty() {
            return None;
        }
        let mut bytes = Vec::new();
        match dir.action {
            DirectiveAction::Byte => {
                for a in args {
                    match a {
                        Operand::Immediate(Expr::Num(v)) if (-128..=255).contains(v) => bytes.push(*v as u8),
                        Operand::Immediate(Expr::Neg(e)) => match **e {
                            Expr::Num(v) if (0..=128).contains(&v) => bytes.push((-v) as u8),
                            _ => return None,
                        },
                        _ => return None,
                    }
                }
            }
            DirectiveAction::Ascii | DirectiveAction::Asciz => {
                for a in args {
                    let Operand::Str(s) = a else { return None };
                    bytes.extend_from_slice(s);
                    if dir.action == DirectiveAction::Asciz {
                        bytes.push(0);
                    }
                }
            }
            _ => return None,
        }
        Some(StatementKind::RawData { bytes })
    }

    fn operand(&self, text: &str, col: u32) -> Result<Operand, AsmError> {
        let rules = &self.model.syntax;
        let t = text.trim();
        if t.starts_with('"') {
            return parse_string(t, col).map(Operand::Str);
        }
        if !rules.register_prefix.is_empty() {
            if let Some(name) = t.strip_prefix(rules.register_prefix.as_str()) {
                return self
                    .model
                    .register(name)
                    .map(Operand::Register)
                    .ok_or_else(|| AsmError::parse(format!("unknown register `{t}`"), col));
            }
        }
        if t.chars().all(is_ident_char) {
            if self.placeholders.iter().any(|p| p == t) {
                return Ok(Operand::Placeholder(t.to_string()));
            }
            if let Some(r) = self.bare_register(t) {
                return Ok(Operand::Register(r));
            }
        }
        if t.ends_with(')') {
            if let Some(open) = matching_open(t) {
                let inner = t[open + 1..t.len() - 1].trim();
                let base = self.operand_base(inner);
                if let Some(base) = base {
                    let prefix = t[..open].trim();
                    let offset = if prefix.is_empty() { Expr::Num(0) } else { self.expr(prefix, col)? };
                    return Ok(Operand::Memory { offset, base: Box::new(base) });
                }
            }
        }
        let t = if rules.immediate_prefix.is_empty() { t } else { t.strip_prefix(rules.immediate_prefix.as_str()).unwrap_or(t) };
        self.expr(t, col).map(Operand::Immediate)
    }

    fn operand_base(&self, inner: &str) -> Option<Operand> {
        let prefix = &self.model.syntax.register_prefix;
        if self.placeholders.iter().any(|p| p == inner) {
            return Some(Operand::Placeholder(inner.to_string()));
        }
        if !prefix.is_empty() {
            return inner.strip_prefix(prefix.as_str()).and_then(|n| self.model.register(n)).map(Operand::Register);
        }
        self.model.register(inner).map(Operand::Register)
    }

    fn bare_register(&self, name: &str) -> Option<usize> {
        if self.model.syntax.register_prefix.is_empty() {
            self.model.register(name)
        } else {
            None
        }
    }

    fn expr(&self, text: &str, col: u32) -> Result<Expr, AsmError> {
        let tokens = tokenize(text, col, &self.model.syntax.hex_prefix, &self.model.syntax.binary_prefix)?;
        let mut p = ExprParser { tokens, pos: 0, col, parser: self, nodes: 0 };
        let e = p.sum()?;
        if let Some((_, c)) = p.tokens.get(p.pos) {
            return Err(AsmError::parse(format!("unexpected trailing input in `{text}`"), *c));
        }
        Ok(e)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '$')
}

/// Cuts the line at the first comment marker outside of quotes.
pub fn strip_comment<'a>(line: &'a str, comment_chars: &[String]) -> &'a str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c == '"' || (c == '\'' && line[i + 1..].chars().nth(1) == Some('\'')) {
            quote = Some(c);
            continue;
        }
        if comment_chars.iter().any(|cc| !cc.is_empty() && line[i..].starts_with(cc.as_str())) {
            return &line[..i];
        }
    }
    line
}

fn split_operands<'a>(s: &'a str, base_col: u32) -> Result<Vec<(&'a str, u32)>, AsmError> {
    let mut out = Vec::new();
    if s.trim().is_empty() {
        return Ok(out);
    }
    let (mut depth, mut start) = (0i32, 0usize);
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let push = |from: usize, to: usize, out: &mut Vec<(&'a str, u32)>| -> Result<(), AsmError> {
        let piece = &s[from..to];
        let lead = piece.len() - piece.trim_start().len();
        let col = base_col + (from + lead) as u32;
        if piece.trim().is_empty() {
            return Err(AsmError::parse("empty operand", col));
        }
        out.push((piece.trim(), col));
        Ok(())
    };
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' => quote = Some('"'),
            '\'' if s[i + 1..].chars().nth(1) == Some('\'') => quote = Some('\''),
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                push(start, i, &mut out)?;
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(AsmError::parse("unterminated string literal", base_col));
    }
    if depth != 0 {
        return Err(AsmError::parse("unbalanced brackets", base_col));
    }
    push(start, s.len(), &mut out)?;
    Ok(out)
}

fn matching_open(t: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in t.char_indices().rev() {
        match c {
            ')' => depth += 1,
            '(' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_string(t: &str, col: u32) -> Result<Vec<u8>, AsmError> {
    let inner = t
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|_| t.len() >= 2)
        .ok_or_else(|| AsmError::parse(format!("malformed string literal {t}"), col))?;
    unescape(inner).ok_or_else(|| AsmError::parse(format!("bad escape in {t}"), col))
}

/// Applies backslash escapes. `\xNN` yields the raw byte, other text its UTF-8 bytes.
fn unescape(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    let mut it = s.chars();
    while let Some(c) = it.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        out.push(match it.next()? {
            'n' => b'\n',
            't' => b'\t',
            'r' => b'\r',
            '0' => 0,
            '\\' => b'\\',
            '"' => b'"',
            '\'' => b'\'',
            'x' => {
                let hex: String = it.by_ref().take(2).collect();
                u8::from_str_radix(&hex, 16).ok()?
            }
            _ => return None,
        });
    }
    Some(out)
}

/// Escapes `s` for a string directive.
pub fn escape(s: &[u8]) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Num(i64),
    Ident(String),
    Punct(char),
}

fn tokenize(text: &str, col: u32, hex: &str, bin: &str) -> Result<Vec<(Tok, u32)>, AsmError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (off, c) = chars[i];
        let c_col = col + off as u32;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '\'' {
            let mut end = i + 1;
            let mut escaped = false;
            while end < chars.len() && (escaped || chars[end].1 != '\'') {
                escaped = !escaped && chars[end].1 == '\\';
                end += 1;
            }
            if end == chars.len() {
                return Err(AsmError::parse("unterminated character literal", c_col));
            }
            let lit: String = chars[i + 1..end].iter().map(|(_, c)| *c).collect();
            let body = unescape(&lit).ok_or_else(|| AsmError::parse("bad character literal", c_col))?;
            let value = match body.as_slice() {
                [b] => *b as i64,
                _ => match std::str::from_utf8(&body).ok().map(|s| s.chars()) {
                    Some(mut it) => match (it.next(), it.next()) {
                        (Some(ch), None) => ch as i64,
                        _ => return Err(AsmError::parse("character literal must hold one character", c_col)),
                    },
                    None => return Err(AsmError::parse("character literal must hold one character", c_col)),
                },
            };
            out.push((Tok::Num(value), c_col));
            i = end + 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().map(|(_, c)| *c).filter(|c| *c != '_').collect();
            let v = parse_int(&word, hex, bin).ok_or_else(|| AsmError::parse(format!("bad number `{word}`"), c_col))?;
            out.push((Tok::Num(v), c_col));
            continue;
        }
        if is_ident_char(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i].1) {
                i += 1;
            }
            let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            // prefixes such as `$` or `&` for hex are not identifier-shaped digits
            if let Some(v) = parse_int(&word, hex, bin).filter(|_| !hex.is_empty() && word.starts_with(hex)) {
                out.push((Tok::Num(v), c_col));
            } else {
                out.push((Tok::Ident(word), c_col));
            }
            continue;
        }
        if matches!(c, '+' | '-' | '(' | ')' | '[' | ']' | ':') {
            out.push((Tok::Punct(c), c_col));
            i += 1;
            continue;
        }
        return Err(AsmError::parse(format!("unexpected character `{c}`"), c_col));
    }
    Ok(out)
}

fn parse_int(word: &str, hex: &str, bin: &str) -> Option<i64> {
    let lower = word.to_ascii_lowercase();
    let (hex, bin) = (hex.to_ascii_lowercase(), bin.to_ascii_lowercase());
    let value = if let Some(h) = lower.strip_prefix(hex.as_str()).filter(|_| !hex.is_empty()) {
        u64::from_str_radix(h, 16).ok()?
    } else if let Some(b) = lower.strip_prefix(bin.as_str()).filter(|_| !bin.is_empty()) {
        u64::from_str_radix(b, 2).ok()?
    } else {
        lower.parse::<u64>().ok()?
    };
    Some(value as i64)
}

struct ExprParser<'p, 'm> {
    tokens: Vec<(Tok, u32)>,
    pos: usize,
    col: u32,
    parser: &'p Parser<'m>,
    nodes: usize,
}

/// Operators and parentheses allowed in one operand expression.
const MAX_EXPR_NODES: usize = 256;

impl ExprParser<'_, '_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn col(&self) -> u32 {
        self.tokens.get(self.pos).map(|(_, c)| *c).unwrap_or(self.col)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(&Tok::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn node(&mut self) -> Result<(), AsmError> {
        self.nodes += 1;
        if self.nodes > MAX_EXPR_NODES {
            return Err(AsmError::parse("expression too complex", self.col()));
        }
        Ok(())
    }

    fn sum(&mut self) -> Result<Expr, AsmError> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat('+') {
                ExprOp::Add
            } else if self.eat('-') {
                ExprOp::Sub
            } else {
                return Ok(lhs);
            };
            self.node()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn unary(&mut self) -> Result<Expr, AsmError> {
        if self.eat('-') {
            self.node()?;
            return match self.unary()? {
                Expr::Num(v) => Ok(Expr::Num(v.wrapping_neg())),
                e => Ok(Expr::Neg(Box::new(e))),
            };
        }
        if self.eat('+') {
            self.node()?;
            return self.unary();
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, AsmError> {
        let mut e = self.primary()?;
        while self.eat('[') {
            let col = self.col();
            let high = self.number()?;
            if !self.eat(':') {
                return Err(AsmError::parse("expected `:` in bit slice", self.col()));
            }
            let low = self.number()?;
            if !self.eat(']') {
                return Err(AsmError::parse("expected `]` after bit slice", self.col()));
            }
            if high < low || high >= 64 || low < 0 {
                return Err(AsmError::parse(format!("invalid bit slice [{high}:{low}]"), col));
            }
            e = Expr::Slice { expr: Box::new(e), high: high as u32, low: low as u32 };
        }
        Ok(e)
    }

    fn number(&mut self) -> Result<i64, AsmError> {
        match self.tokens.get(self.pos) {
            Some((Tok::Num(v), _)) => {
                let v = *v;
                self.pos += 1;
                Ok(v)
            }
            _ => Err(AsmError::parse("expected number", self.col())),
        }
    }

    fn primary(&mut self) -> Result<Expr, AsmError> {
        let col = self.col();
        let Some((tok, _)) = self.tokens.get(self.pos).cloned() else {
            return Err(AsmError::parse("expected operand", col));
        };
        self.pos += 1;
        match tok {
            Tok::Num(v) => Ok(Expr::Num(v)),
            Tok::Ident(name) => {
                if self.parser.placeholders.iter().any(|p| *p == name) {
                    Ok(Expr::Placeholder(name))
                } else if self.parser.bare_register(&name).is_some() {
                    Err(AsmError::parse(format!("register `{name}` cannot appear in an expression"), col))
                } else {
                    Ok(Expr::Symbol(name))
                }
            }
            Tok::Punct('(') => {
                self.node()?;
                let e = self.sum()?;
                if !self.eat(')') {
                    return Err(AsmError::parse("expected `)`", self.col()));
                }
                Ok(e)
            }
            Tok::Punct(c) => Err(AsmError::parse(format!("unexpected `{c}`"), col)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comments_outside_strings() {
        let cc = vec![";".to_string()];
        assert_eq!(strip_comment("add x1, x2 ; hi", &cc), "add x1, x2 ");
        assert_eq!(strip_comment(".ascii \"a;b\" ; c", &cc), ".ascii \"a;b\" ");
        assert_eq!(strip_comment("li x1, ';'", &cc), "li x1, ';'");
    }

    #[test]
    fn splits_operands_respecting_nesting() {
        let ops = split_operands(" x1, 4(x2), \"a,b\"", 4).unwrap();
        let texts: Vec<_> = ops.iter().map(|(t, _)| *t).collect();
        assert_eq!(texts, vec!["x1", "4(x2)", "\"a,b\""]);
        assert_eq!(ops[1].1, 9);
        assert!(split_operands("x1,,x2", 1).is_err());
    }

    #[test]
    fn escapes_round_trip() {
        assert_eq!(unescape(r#"a\n\x41"#).unwrap(), b"a\nA");
        assert_eq!(unescape(r#"\xff\x80"#).unwrap(), vec![0xFF, 0x80]);
        assert_eq!(unescape("é").unwrap(), "é".as_bytes());
        assert_eq!(escape(b"a\"\n\x01"), "a\\\"\\n\\x01");
    }

    #[test]
    fn integer_prefixes() {
        assert_eq!(parse_int("0x1F", "0x", "0b"), Some(31));
        assert_eq!(parse_int("0b101", "0x", "0b"), Some(5));
        assert_eq!(parse_int("42", "0x", "0b"), Some(42));
        assert_eq!(parse_int("4z", "0x", "0b"), None);
    }
}
