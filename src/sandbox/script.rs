//! Lexer and recursive-descent parser for semantics scripts.

use super::SandboxError;

/// Identifiers that name host facilities scripts never get access to.
const FORBIDDEN: &[&str] = &[
    "import", "use", "extern", "mod", "fn", "unsafe", "include", "require", "eval", "exec", "open",
    "system", "spawn", "socket", "env",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let { name: String, value: Expr },
    Assign { name: String, value: Expr },
    If { cond: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt> },
    While { cond: Expr, body: Vec<Stmt> },
    For { var: String, start: Expr, end: Expr, body: Vec<Stmt> },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Str(String),
    List(Vec<Expr>),
    Var(String),
    Index { base: Box<Expr>, index: Box<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    BitAnd,
    BitXor,
    BitOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: u32,
    column: u32,
}

const PUNCTS: &[&str] = &[
    "..", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+", "-", "*", "/", "%", "&", "|", "^",
    "~", "!", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ";",
];

fn lex(source: &str) -> Result<Vec<Token>, SandboxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::new();
    let (mut i, mut line, mut col) = (0usize, 1u32, 1u32);
    let err = |line, column, message: String| SandboxError::Syntax { line, column, message };
    while i < chars.len() {
        let c = chars[i];
        let (tl, tc) = (line, col);
        if c == '\n' {
            i += 1;
            line += 1;
            col = 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            col += 1;
            continue;
        }
        if c == '#' || (c == '/' && chars.get(i + 1) == Some(&'/')) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            col += (i - start) as u32;
            let lower = text.to_ascii_lowercase();
            let value = if let Some(h) = lower.strip_prefix("0x") {
                u64::from_str_radix(h, 16)
            } else if let Some(b) = lower.strip_prefix("0b") {
                u64::from_str_radix(b, 2)
            } else {
                lower.parse::<u64>()
            }
            .map_err(|_| err(tl, tc, format!("bad number `{text}`")))?;
            out.push(Token { tok: Tok::Int(value as i64), line: tl, column: tc });
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            col += (i - start) as u32;
            let word: String = chars[start..i].iter().collect();
            if chars.get(i) == Some(&':') && chars.get(i + 1) == Some(&':') {
                return Err(SandboxError::Violation(format!(
                    "path `{word}::` does not name a bound capability"
                )));
            }
            out.push(Token { tok: Tok::Ident(word), line: tl, column: tc });
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            col += 1;
            let mut s = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(err(tl, tc, "unterminated string".into()));
                };
                i += 1;
                col += 1;
                if ch == quote {
                    break;
                }
                if ch == '\\' {
                    let esc = chars.get(i).copied().ok_or_else(|| err(tl, tc, "bad escape".into()))?;
                    i += 1;
                    col += 1;
                    s.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        '0' => '\0',
                        'r' => '\r',
                        other => other,
                    });
                } else {
                    s.push(ch);
                }
            }
            if quote == '\'' {
                let mut it = s.chars();
                match (it.next(), it.next()) {
                    (Some(ch), None) => out.push(Token { tok: Tok::Int(ch as i64), line: tl, column: tc }),
                    _ => return Err(err(tl, tc, "character literal must hold one character".into())),
                }
            } else {
                out.push(Token { tok: Tok::Str(s), line: tl, column: tc });
            }
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let Some(p) = PUNCTS.iter().find(|p| rest.starts_with(**p)) else {
            return Err(err(tl, tc, format!("unexpected character `{c}`")));
        };
        i += p.len();
        col += p.len() as u32;
        out.push(Token { tok: Tok::Punct(*p), line: tl, column: tc });
    }
    out.push(Token { tok: Tok::Eof, line, column: col });
    Ok(out)
}

pub fn parse(source: &str) -> Result<Program, SandboxError> {
    let tokens = lex(source)?;
    let mut p = Parser { tokens, pos: 0, depth: 0 };
    let mut body = Vec::new();
    while !p.at_eof() {
        body.push(p.statement()?);
    }
    Ok(Program { body })
}

/// Bound on expression and block nesting, counting each chained binary operator.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, SandboxError>) -> Result<T, SandboxError> {
        self.enter()?;
        let r = f(self);
        self.depth -= 1;
        r
    }

    fn enter(&mut self) -> Result<(), SandboxError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at_eof(&self) -> bool {
        self.peek().tok == Tok::Eof
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        let t = self.peek();
        SandboxError::Syntax { line: t.line, column: t.column, message: message.into() }
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(&self.peek().tok, Tok::Punct(q) if *q == p)
    }

    fn eat(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: &str) -> Result<(), SandboxError> {
        if self.eat(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{p}`")))
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.peek().tok, Tok::Ident(w) if w == kw)
    }

    fn ident(&mut self) -> Result<String, SandboxError> {
        match self.advance().tok {
            Tok::Ident(w) => {
                check_forbidden(&w)?;
                Ok(w)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.expect("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.error("unterminated block"));
            }
            body.push(self.statement()?);
        }
        self.expect("}")?;
        Ok(body)
    }

    fn statement(&mut self) -> Result<Stmt, SandboxError> {
        if let Tok::Ident(w) = &self.peek().tok {
            check_forbidden(w)?;
        }
        if self.is_keyword("let") {
            self.advance();
            let name = self.ident()?;
            self.expect("=")?;
            let value = self.expr()?;
            self.expect(";")?;
            return Ok(Stmt::Let { name, value });
        }
        if self.is_keyword("if") {
            self.advance();
            let cond = self.expr()?;
            let then = self.block()?;
            let otherwise = if self.is_keyword("else") {
                self.advance();
                if self.is_keyword("if") {
                    vec![self.nested(Self::statement)?]
                } else {
                    self.block()?
                }
            } else {
                Vec::new()
            };
            return Ok(Stmt::If { cond, then, otherwise });
        }
        if self.is_keyword("while") {
            self.advance();
            let cond = self.expr()?;
            let body = self.block()?;
            return Ok(Stmt::While { cond, body });
        }
        if self.is_keyword("for") {
            self.advance();
            let var = self.ident()?;
            if !self.is_keyword("in") {
                return Err(self.error("expected `in`"));
            }
            self.advance();
            let start = self.expr()?;
            self.expect("..")?;
            let end = self.expr()?;
            let body = self.block()?;
            return Ok(Stmt::For { var, start, end, body });
        }
        // assignment: IDENT '=' expr ';'
        if let (Tok::Ident(name), Some(next)) = (&self.peek().tok, self.tokens.get(self.pos + 1)) {
            if next.tok == Tok::Punct("=") {
                let name = name.clone();
                self.advance();
                self.advance();
                let value = self.expr()?;
                self.expect(";")?;
                return Ok(Stmt::Assign { name, value });
            }
        }
        let e = self.expr()?;
        self.expect(";")?;
        Ok(Stmt::Expr(e))
    }

    fn expr(&mut self) -> Result<Expr, SandboxError> {
        self.nested(|p| p.binary(0))
    }

    fn binary(&mut self, level: usize) -> Result<Expr, SandboxError> {
        const LEVELS: &[&[(&str, BinaryOp)]] = &[
            &[("||", BinaryOp::Or)],
            &[("&&", BinaryOp::And)],
            &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
            &[("<=", BinaryOp::Le), (">=", BinaryOp::Ge), ("<", BinaryOp::Lt), (">", BinaryOp::Gt)],
            &[("|", BinaryOp::BitOr)],
            &[("^", BinaryOp::BitXor)],
            &[("&", BinaryOp::BitAnd)],
            &[("<<", BinaryOp::Shl), (">>", BinaryOp::Shr)],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        let mut chained = 0;
        let result = 'outer: loop {
            for (p, op) in LEVELS[level] {
                if self.eat(p) {
                    // left-nested trees grow one level per operator
                    if let Err(e) = self.enter() {
                        break 'outer Err(e);
                    }
                    chained += 1;
                    let rhs = match self.binary(level + 1) {
                        Ok(rhs) => rhs,
                        Err(e) => break 'outer Err(e),
                    };
                    lhs = Expr::Binary { op: *op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                    continue 'outer;
                }
            }
            break Ok(lhs);
        };
        self.depth -= chained;
        result
    }

    fn unary(&mut self) -> Result<Expr, SandboxError> {
        let op = if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("~") {
            UnaryOp::BitNot
        } else {
            return self.postfix();
        };
        Ok(Expr::Unary { op, expr: Box::new(self.nested(Self::unary)?) })
    }

    fn postfix(&mut self) -> Result<Expr, SandboxError> {
        let mut e = self.primary()?;
        while self.eat("[") {
            let index = self.expr()?;
            self.expect("]")?;
            e = Expr::Index { base: Box::new(e), index: Box::new(index) };
        }
        Ok(e)
    }

    fn primary(&mut self) -> Result<Expr, SandboxError> {
        let t = self.advance();
        match t.tok {
            Tok::Int(v) => Ok(Expr::Int(v)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Ident(name) => {
                check_forbidden(&name)?;
                if self.eat("(") {
                    let mut args = Vec::new();
                    if !self.eat(")") {
                        loop {
                            args.push(self.expr()?);
                            if self.eat(")") {
                                break;
                            }
                            self.expect(",")?;
                        }
                    }
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Tok::Punct("(") => {
                let e = self.expr()?;
                self.expect(")")?;
                Ok(e)
            }
            Tok::Punct("[") => {
                let mut items = Vec::new();
                if !self.eat("]") {
                    loop {
                        items.push(self.expr()?);
                        if self.eat("]") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                Ok(Expr::List(items))
            }
            _ => Err(SandboxError::Syntax {
                line: t.line,
                column: t.column,
                message: "expected expression".into(),
            }),
        }
    }
}

fn check_forbidden(word: &str) -> Result<(), SandboxError> {
    if FORBIDDEN.contains(&word) {
        Err(SandboxError::Violation(format!("`{word}` is not available to scripts")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loops_and_precedence() {
        let p = parse("let n = 1 + 2 * 3; for i in 0..n { emit(i & 0xff); }").unwrap();
        assert_eq!(p.body.len(), 2);
        match &p.body[0] {
            Stmt::Let { value: Expr::Binary { op: BinaryOp::Add, rhs, .. }, .. } => {
                assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_module_paths_and_imports() {
        assert!(matches!(parse("std::fs::read(\"x\");"), Err(SandboxError::Violation(_))));
        assert!(matches!(parse("import os;"), Err(SandboxError::Violation(_))));
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let deep = format!("emit({}1{});", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(parse(&deep), Err(SandboxError::Syntax { .. })));
        let negated = format!("emit({}1);", "-".repeat(10_000));
        assert!(matches!(parse(&negated), Err(SandboxError::Syntax { .. })));
        let chain = format!("emit(1{});", "+1".repeat(10_000));
        assert!(matches!(parse(&chain), Err(SandboxError::Syntax { .. })));

        let ok = format!("emit({}1{});", "(".repeat(40), ")".repeat(40));
        assert!(parse(&ok).is_ok());
    }

    #[test]
    fn reports_syntax_position() {
        match parse("let x = ;") {
            Err(SandboxError::Syntax { line: 1, column: 9, .. }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}
