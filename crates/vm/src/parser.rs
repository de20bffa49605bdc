//! Parser for the semicolon-separated instruction strings accepted by
//! process creation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::instruction::Instruction;

static PRINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^PRINT\s*\(?\s*"([^"]*)"\s*(?:\+\s*([A-Za-z_][A-Za-z0-9_]*))?\s*\)?$"#)
        .expect("print pattern")
});
static FOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^FOR_LOOP\s*\(?\s*(\d+)\s*,?\s*\[(.*)\]\s*\)?$").expect("for-loop pattern")
});
static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based index of the offending statement; 0 when the whole program
    /// is at fault.
    pub statement: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(statement: usize, message: impl Into<String>) -> Self {
        Self {
            statement,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.statement == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "statement {}: {}", self.statement, self.message)
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a full program body. Statements are separated by `;` at bracket
/// depth zero; separators inside a quoted PRINT message or a FOR_LOOP body
/// do not split.
pub fn parse_program(src: &str) -> Result<Vec<Instruction>, ParseError> {
    let statements = split_statements(src);
    if statements.is_empty() {
        return Err(ParseError::new(0, "program contains no instructions"));
    }
    statements
        .iter()
        .enumerate()
        .map(|(i, s)| parse_statement(s).map_err(|msg| ParseError::new(i + 1, msg)))
        .collect()
}

fn split_statements(src: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string = false;
    for ch in src.chars() {
        match ch {
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => depth = depth.saturating_sub(1),
            ';' if !in_string && depth == 0 => {
                statements.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    statements.push(current);
    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_statement(stmt: &str) -> Result<Instruction, String> {
    if let Some(caps) = PRINT_RE.captures(stmt) {
        return Ok(Instruction::Print {
            message: caps[1].to_string(),
            var: caps.get(2).map(|m| m.as_str().to_string()),
        });
    }
    if stmt.starts_with("FOR_LOOP") {
        let caps = FOR_RE
            .captures(stmt)
            .ok_or_else(|| "malformed FOR_LOOP; expected FOR_LOOP <count> [ ... ]".to_string())?;
        let count: u32 = caps[1]
            .parse()
            .map_err(|_| format!("bad repeat count `{}`", &caps[1]))?;
        let body_src = &caps[2];
        let body = parse_program(body_src).map_err(|e| format!("loop body: {e}"))?;
        return Ok(Instruction::ForLoop { count, body });
    }

    // Remaining forms are flat token lists; commas are operand separators.
    let normalized = stmt.replace(',', " ");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let Some((&op, args)) = tokens.split_first() else {
        return Err("empty statement".to_string());
    };
    match op {
        "DECLARE" => {
            expect_args(op, args, 2)?;
            Ok(Instruction::Declare {
                var: ident(args[0])?,
                value: parse_value(args[1])?,
            })
        }
        "ADD" => match args.len() {
            2 => Ok(Instruction::Add {
                var: ident(args[0])?,
                value: parse_value(args[1])?,
            }),
            3 => Ok(Instruction::AddVars {
                dst: ident(args[0])?,
                lhs: ident(args[1])?,
                rhs: ident(args[2])?,
            }),
            n => Err(format!("ADD takes 2 or 3 operands, got {n}")),
        },
        "SUBTRACT" => {
            expect_args(op, args, 2)?;
            Ok(Instruction::Subtract {
                var: ident(args[0])?,
                value: parse_value(args[1])?,
            })
        }
        "READ" => {
            expect_args(op, args, 2)?;
            Ok(Instruction::Read {
                var: ident(args[0])?,
                addr: parse_addr(args[1])?,
            })
        }
        "WRITE" => {
            expect_args(op, args, 2)?;
            Ok(Instruction::Write {
                addr: parse_addr(args[0])?,
                var: ident(args[1])?,
            })
        }
        "PRINT" => Err("malformed PRINT; expected PRINT \"message\" [+ var]".to_string()),
        other => Err(format!("unknown instruction `{other}`")),
    }
}

fn expect_args(op: &str, args: &[&str], n: usize) -> Result<(), String> {
    if args.len() == n {
        Ok(())
    } else {
        Err(format!("{op} takes {n} operands, got {}", args.len()))
    }
}

fn ident(token: &str) -> Result<String, String> {
    if IDENT_RE.is_match(token) {
        Ok(token.to_string())
    } else {
        Err(format!("`{token}` is not a valid variable name"))
    }
}

/// Integer literal clamped into 16 bits, the way every store is.
fn parse_value(token: &str) -> Result<u16, String> {
    let raw = parse_int(token)?;
    Ok(raw.rem_euclid(1 << 16) as u16)
}

/// Byte-address literal; range checking happens at execution time.
fn parse_addr(token: &str) -> Result<i64, String> {
    parse_int(token)
}

fn parse_int(token: &str) -> Result<i64, String> {
    let (digits, negative) = match token.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (token, false),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse(),
    }
    .map_err(|_| format!("`{token}` is not an integer"))?;
    Ok(if negative { -value } else { value })
}
