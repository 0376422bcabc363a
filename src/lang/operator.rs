use std::cmp::Ordering;
use std::fmt;

use rust_decimal::Decimal;

use super::builtin_type::{to_decimal, to_float};
use super::value::Object;
use crate::runtime::runtime_error::RuntimeError;

/// Operator token carried as the operand of `BinaryOp` and `Unary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Token {
    Add = 1,
    Sub,
    Mul,
    Quo,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    AndNot,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Not,
}

impl Token {
    pub fn from_u8(b: u8) -> Option<Self> {
        use Token::*;
        Some(match b {
            1 => Add,
            2 => Sub,
            3 => Mul,
            4 => Quo,
            5 => Rem,
            6 => And,
            7 => Or,
            8 => Xor,
            9 => Shl,
            10 => Shr,
            11 => AndNot,
            12 => Less,
            13 => LessEq,
            14 => Greater,
            15 => GreaterEq,
            16 => Not,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        use Token::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Quo => "/",
            Rem => "%",
            And => "&",
            Or => "|",
            Xor => "^",
            Shl => "<<",
            Shr => ">>",
            AndNot => "&^",
            Less => "<",
            LessEq => "<=",
            Greater => ">",
            GreaterEq => ">=",
            Not => "!",
        }
    }

    fn is_comparison(self) -> bool {
        matches!(
            self,
            Token::Less | Token::LessEq | Token::Greater | Token::GreaterEq
        )
    }

    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Token::Less => ord == Ordering::Less,
            Token::LessEq => ord != Ordering::Greater,
            Token::Greater => ord == Ordering::Greater,
            Token::GreaterEq => ord != Ordering::Less,
            _ => false,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Object {
    /// `self op right`, dispatched on the left operand's kind.
    pub fn binary_op(&self, op: Token, right: &Object) -> Result<Object, RuntimeError> {
        let invalid = || RuntimeError::InvalidOperator {
            op: op.symbol().to_string(),
            left: self.type_name().to_string(),
            right: right.type_name().to_string(),
        };
        match (self, right) {
            (Object::Int(a), Object::Int(b)) => int_op(op, *a, *b).ok_or_else(invalid)?,
            (Object::Int(a), Object::Uint(b)) => int_op(op, *a, *b as i64).ok_or_else(invalid)?,
            (Object::Int(a), Object::Char(b)) => int_op(op, *a, *b as i64).ok_or_else(invalid)?,
            (Object::Int(a), Object::Bool(b) | Object::Flag(b)) => {
                int_op(op, *a, *b as i64).ok_or_else(invalid)?
            }
            (Object::Bool(a) | Object::Flag(a), Object::Int(_) | Object::Uint(_) | Object::Bool(_)) => {
                Object::Int(*a as i64).binary_op(op, right)
            }
            (Object::Uint(a), Object::Uint(b)) => uint_op(op, *a, *b).ok_or_else(invalid)?,
            (Object::Uint(a), Object::Int(b)) => uint_op(op, *a, *b as u64).ok_or_else(invalid)?,
            (Object::Uint(a), Object::Char(b)) => uint_op(op, *a, *b as u64).ok_or_else(invalid)?,
            (Object::Char(a), Object::Char(b)) => {
                if op.is_comparison() {
                    Ok(Object::Bool(op.accepts(a.cmp(b))))
                } else {
                    char_op(op, *a, *b as i64).ok_or_else(invalid)
                }
            }
            (Object::Char(a), Object::Int(b)) => char_op(op, *a, *b).ok_or_else(invalid),
            (Object::Char(a), Object::Uint(b)) => char_op(op, *a, *b as i64).ok_or_else(invalid),
            (Object::Float(_) | Object::Int(_) | Object::Uint(_), Object::Float(_))
            | (Object::Float(_), Object::Int(_) | Object::Uint(_) | Object::Char(_)) => {
                match (to_float(self), to_float(right)) {
                    (Some(a), Some(b)) => float_op(op, a, b).ok_or_else(invalid),
                    _ => Err(invalid()),
                }
            }
            (
                Object::Decimal(_),
                Object::Decimal(_) | Object::Int(_) | Object::Uint(_) | Object::Float(_) | Object::Char(_),
            )
            | (Object::Int(_) | Object::Uint(_) | Object::Float(_), Object::Decimal(_)) => {
                match (to_decimal(self), to_decimal(right)) {
                    (Some(a), Some(b)) => decimal_op(op, a, b).ok_or_else(invalid)?,
                    _ => Err(invalid()),
                }
            }
            (Object::String(a), _) => match (op, right) {
                (Token::Add, Object::String(b)) => Ok(Object::string(format!("{}{}", a, b))),
                (Token::Add, other) => Ok(Object::string(format!("{}{}", a, other))),
                (_, Object::String(b)) if op.is_comparison() => {
                    Ok(Object::Bool(op.accepts(a.as_ref().cmp(b.as_ref()))))
                }
                _ => Err(invalid()),
            },
            (Object::Bytes(a), Object::Bytes(b)) => match op {
                Token::Add => Ok(Object::bytes([a.as_ref(), b.as_ref()].concat())),
                _ if op.is_comparison() => Ok(Object::Bool(op.accepts(a.cmp(b)))),
                _ => Err(invalid()),
            },
            (Object::Array(a), _) if op == Token::Add => {
                let mut items = a.to_vec();
                match right {
                    Object::Array(b) => items.extend(b.to_vec()),
                    other => items.push(other.clone()),
                }
                Ok(Object::array(items))
            }
            (Object::User(u), _) => u.binary_op(op, right),
            _ => Err(invalid()),
        }
    }

    /// `-x`, `+x`, `!x`, `^x`.
    pub fn unary_op(&self, op: Token) -> Result<Object, RuntimeError> {
        let invalid = || RuntimeError::InvalidOperator {
            op: op.symbol().to_string(),
            left: self.type_name().to_string(),
            right: String::new(),
        };
        match op {
            Token::Not => Ok(Object::Bool(self.is_falsy())),
            Token::Sub => match self {
                Object::Int(v) => Ok(Object::Int(v.wrapping_neg())),
                Object::Uint(v) => Ok(Object::Uint(v.wrapping_neg())),
                Object::Float(v) => Ok(Object::Float(-v)),
                Object::Decimal(v) => Ok(Object::Decimal(-*v)),
                Object::Char(c) => Ok(Object::Int(-(*c as i64))),
                Object::Bool(b) | Object::Flag(b) => Ok(Object::Int(-(*b as i64))),
                _ => Err(invalid()),
            },
            Token::Add => match self {
                Object::Int(_) | Object::Uint(_) | Object::Float(_) | Object::Decimal(_) | Object::Char(_) => {
                    Ok(self.clone())
                }
                Object::Bool(b) | Object::Flag(b) => Ok(Object::Int(*b as i64)),
                _ => Err(invalid()),
            },
            Token::Xor => match self {
                Object::Int(v) => Ok(Object::Int(!v)),
                Object::Uint(v) => Ok(Object::Uint(!v)),
                Object::Char(c) => Ok(Object::Int(!(*c as i64))),
                Object::Bool(b) | Object::Flag(b) => Ok(Object::Int(!(*b as i64))),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }
}

fn int_op(op: Token, a: i64, b: i64) -> Option<Result<Object, RuntimeError>> {
    let v = match op {
        Token::Add => a.wrapping_add(b),
        Token::Sub => a.wrapping_sub(b),
        Token::Mul => a.wrapping_mul(b),
        Token::Quo | Token::Rem if b == 0 => return Some(Err(RuntimeError::ZeroDivision)),
        Token::Quo => a.wrapping_div(b),
        Token::Rem => a.wrapping_rem(b),
        Token::And => a & b,
        Token::Or => a | b,
        Token::Xor => a ^ b,
        Token::AndNot => a & !b,
        Token::Shl => a.wrapping_shl(b as u32),
        Token::Shr => a.wrapping_shr(b as u32),
        cmp if cmp.is_comparison() => return Some(Ok(Object::Bool(cmp.accepts(a.cmp(&b))))),
        _ => return None,
    };
    Some(Ok(Object::Int(v)))
}

fn uint_op(op: Token, a: u64, b: u64) -> Option<Result<Object, RuntimeError>> {
    let v = match op {
        Token::Add => a.wrapping_add(b),
        Token::Sub => a.wrapping_sub(b),
        Token::Mul => a.wrapping_mul(b),
        Token::Quo | Token::Rem if b == 0 => return Some(Err(RuntimeError::ZeroDivision)),
        Token::Quo => a / b,
        Token::Rem => a % b,
        Token::And => a & b,
        Token::Or => a | b,
        Token::Xor => a ^ b,
        Token::AndNot => a & !b,
        Token::Shl => a.wrapping_shl(b as u32),
        Token::Shr => a.wrapping_shr(b as u32),
        cmp if cmp.is_comparison() => return Some(Ok(Object::Bool(cmp.accepts(a.cmp(&b))))),
        _ => return None,
    };
    Some(Ok(Object::Uint(v)))
}

fn char_op(op: Token, a: char, b: i64) -> Option<Object> {
    let code = a as i64;
    let v = match op {
        Token::Add => code.checked_add(b)?,
        Token::Sub => code.checked_sub(b)?,
        cmp if cmp.is_comparison() => return Some(Object::Bool(cmp.accepts(code.cmp(&b)))),
        _ => return None,
    };
    u32::try_from(v).ok().and_then(char::from_u32).map(Object::Char)
}

fn float_op(op: Token, a: f64, b: f64) -> Option<Object> {
    Some(Object::Float(match op {
        Token::Add => a + b,
        Token::Sub => a - b,
        Token::Mul => a * b,
        Token::Quo => a / b,
        Token::Rem => a % b,
        cmp if cmp.is_comparison() => {
            // NaN compares false against everything
            let ord = a.partial_cmp(&b);
            return Some(Object::Bool(ord.is_some_and(|ord| cmp.accepts(ord))));
        }
        _ => return None,
    }))
}

fn decimal_op(op: Token, a: Decimal, b: Decimal) -> Option<Result<Object, RuntimeError>> {
    let v = match op {
        Token::Add => a.checked_add(b),
        Token::Sub => a.checked_sub(b),
        Token::Mul => a.checked_mul(b),
        Token::Quo | Token::Rem if b.is_zero() => return Some(Err(RuntimeError::ZeroDivision)),
        Token::Quo => a.checked_div(b),
        Token::Rem => a.checked_rem(b),
        cmp if cmp.is_comparison() => return Some(Ok(Object::Bool(cmp.accepts(a.cmp(&b))))),
        _ => return None,
    };
    // overflow past the 96-bit mantissa is reported like any unsupported operation
    v.map(|d| Ok(Object::Decimal(d)))
}
