//! Operator and indexing semantics, independent of the frame machinery.

use std::cmp::Ordering;

use crate::ast::{BinaryOp, UnaryOp};
use crate::error::RuntimeErrorKind;
use crate::runtime::value::Value;

/// Numbers feed integer-style ops (modulo, bitwise, shifts) through
/// truncation.
fn as_int(n: f64) -> i64 {
    n.trunc() as i64
}

fn number_pair(
    op: &'static str,
    left: &Value,
    right: &Value,
) -> Result<(f64, f64), RuntimeErrorKind> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(RuntimeErrorKind::UnsupportedBinary {
            op,
            left: left.type_name().to_string(),
            right: right.type_name().to_string(),
        }),
    }
}

pub fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, RuntimeErrorKind> {
    match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::string(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::list(items))
            }
            _ => Err(RuntimeErrorKind::UnsupportedBinary {
                op: op.symbol(),
                left: left.type_name().to_string(),
                right: right.type_name().to_string(),
            }),
        },
        BinaryOp::Sub => {
            let (a, b) = number_pair(op.symbol(), &left, &right)?;
            Ok(Value::Number(a - b))
        }
        BinaryOp::Mul => {
            let (a, b) = number_pair(op.symbol(), &left, &right)?;
            Ok(Value::Number(a * b))
        }
        BinaryOp::Div => {
            let (a, b) = number_pair(op.symbol(), &left, &right)?;
            if b == 0.0 {
                return Err(RuntimeErrorKind::DivisionByZero);
            }
            // Division floors: 7 / 2 == 3, -7 / 2 == -4.
            Ok(Value::Number((a / b).floor()))
        }
        BinaryOp::Mod => {
            let (a, b) = number_pair(op.symbol(), &left, &right)?;
            let (a, b) = (as_int(a), as_int(b));
            if b == 0 {
                return Err(RuntimeErrorKind::DivisionByZero);
            }
            // Result takes the sign of the divisor.
            Ok(Value::Number((((a % b) + b) % b) as f64))
        }
        BinaryOp::Pow => {
            let (a, b) = number_pair(op.symbol(), &left, &right)?;
            Ok(Value::Number(a.powf(b)))
        }
        BinaryOp::Shl => {
            let (a, b) = number_pair(op.symbol(), &left, &right)?;
            Ok(Value::Number(as_int(a).wrapping_shl(as_int(b) as u32) as f64))
        }
        BinaryOp::Shr => {
            let (a, b) = number_pair(op.symbol(), &left, &right)?;
            Ok(Value::Number(as_int(a).wrapping_shr(as_int(b) as u32) as f64))
        }
        BinaryOp::BitAnd => {
            let (a, b) = number_pair(op.symbol(), &left, &right)?;
            Ok(Value::Number((as_int(a) & as_int(b)) as f64))
        }
        BinaryOp::BitOr => {
            let (a, b) = number_pair(op.symbol(), &left, &right)?;
            Ok(Value::Number((as_int(a) | as_int(b)) as f64))
        }
        BinaryOp::BitXor => {
            let (a, b) = number_pair(op.symbol(), &left, &right)?;
            Ok(Value::Number((as_int(a) ^ as_int(b)) as f64))
        }
        BinaryOp::Eq => Ok(Value::Bool(left.value_eq(&right))),
        BinaryOp::Ne => Ok(Value::Bool(!left.value_eq(&right))),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            let order = left
                .compare(&right)
                .ok_or_else(|| RuntimeErrorKind::NotComparable {
                    left: left.type_name().to_string(),
                    right: right.type_name().to_string(),
                })?;
            let holds = match op {
                BinaryOp::Lt => order == Ordering::Less,
                BinaryOp::Gt => order == Ordering::Greater,
                BinaryOp::Le => order != Ordering::Greater,
                _ => order != Ordering::Less,
            };
            Ok(Value::Bool(holds))
        }
        BinaryOp::In => match &right {
            Value::List(items) => Ok(Value::Bool(
                items.borrow().iter().any(|item| item.value_eq(&left)),
            )),
            Value::Str(haystack) => match &left {
                Value::Str(needle) => Ok(Value::Bool(haystack.contains(needle.as_ref()))),
                _ => Err(RuntimeErrorKind::UnsupportedBinary {
                    op: "in",
                    left: left.type_name().to_string(),
                    right: "string".to_string(),
                }),
            },
            Value::Dict(dict) => Ok(Value::Bool(dict.borrow().contains_key(&left))),
            other => Err(RuntimeErrorKind::NotAContainer {
                type_name: other.type_name().to_string(),
            }),
        },
        BinaryOp::Is => Ok(Value::Bool(left.is_same(&right))),
    }
}

pub fn unary(op: UnaryOp, operand: Value) -> Result<Value, RuntimeErrorKind> {
    let unsupported = |symbol: &'static str, operand: &Value| RuntimeErrorKind::UnsupportedUnary {
        op: symbol,
        type_name: operand.type_name().to_string(),
    };
    match op {
        UnaryOp::Neg => match operand {
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(unsupported("-", &other)),
        },
        UnaryOp::Pos => match operand {
            Value::Number(n) => Ok(Value::Number(n)),
            other => Err(unsupported("+", &other)),
        },
        UnaryOp::BitNot => match operand {
            Value::Number(n) => Ok(Value::Number(!as_int(n) as f64)),
            other => Err(unsupported("~", &other)),
        },
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
    }
}

/// Negative indices wrap once via `length + index`; the result must land in
/// range.
fn resolve_index(index: &Value, len: usize) -> Result<usize, RuntimeErrorKind> {
    let Value::Number(n) = index else {
        return Err(RuntimeErrorKind::InvalidIndex {
            type_name: index.type_name().to_string(),
        });
    };
    let raw = as_int(*n);
    let resolved = if raw < 0 { len as i64 + raw } else { raw };
    if resolved < 0 || resolved >= len as i64 {
        return Err(RuntimeErrorKind::IndexOutOfRange { index: raw, len });
    }
    Ok(resolved as usize)
}

pub fn index_value(object: &Value, index: &Value) -> Result<Value, RuntimeErrorKind> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let at = resolve_index(index, items.len())?;
            Ok(items[at].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let at = resolve_index(index, chars.len())?;
            Ok(Value::string(chars[at].to_string()))
        }
        Value::Dict(dict) => {
            dict.borrow()
                .get(index)
                .ok_or_else(|| RuntimeErrorKind::KeyNotFound {
                    key: index.to_repr(),
                })
        }
        other => Err(RuntimeErrorKind::NotIndexable {
            type_name: other.type_name().to_string(),
        }),
    }
}

pub fn set_index(object: &Value, index: &Value, value: Value) -> Result<(), RuntimeErrorKind> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let at = resolve_index(index, len)?;
            items[at] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            dict.borrow_mut().insert(index.clone(), value);
            Ok(())
        }
        other => Err(RuntimeErrorKind::NotIndexable {
            type_name: other.type_name().to_string(),
        }),
    }
}

/// Slice bounds wrap negatives once, then clamp into `[0, len]`.
fn slice_bound(value: Option<&Value>, default: i64, len: usize) -> Result<i64, RuntimeErrorKind> {
    let Some(value) = value else {
        return Ok(default);
    };
    let Value::Number(n) = value else {
        return Err(RuntimeErrorKind::InvalidIndex {
            type_name: value.type_name().to_string(),
        });
    };
    let mut raw = as_int(*n);
    if raw < 0 {
        raw += len as i64;
    }
    Ok(raw.clamp(0, len as i64))
}

/// Collects the slice into a new value. Only a positive step advances; a
/// zero or negative step yields an empty result.
pub fn slice_value(
    object: &Value,
    start: Option<&Value>,
    stop: Option<&Value>,
    step: Option<&Value>,
) -> Result<Value, RuntimeErrorKind> {
    let step = match step {
        None => 1,
        Some(Value::Number(n)) => as_int(*n),
        Some(other) => {
            return Err(RuntimeErrorKind::InvalidIndex {
                type_name: other.type_name().to_string(),
            });
        }
    };

    match object {
        Value::List(items) => {
            let items = items.borrow();
            let len = items.len();
            let from = slice_bound(start, 0, len)?;
            let to = slice_bound(stop, len as i64, len)?;
            let mut out = Vec::new();
            if step > 0 {
                let mut at = from;
                while at < to {
                    out.push(items[at as usize].clone());
                    at += step;
                }
            }
            Ok(Value::list(out))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len();
            let from = slice_bound(start, 0, len)?;
            let to = slice_bound(stop, len as i64, len)?;
            let mut out = String::new();
            if step > 0 {
                let mut at = from;
                while at < to {
                    out.push(chars[at as usize]);
                    at += step;
                }
            }
            Ok(Value::string(out))
        }
        other => Err(RuntimeErrorKind::NotSliceable {
            type_name: other.type_name().to_string(),
        }),
    }
}

/// Snapshot of an iterable for `for` loops and comprehensions: list
/// elements, string characters, or dict keys.
pub fn iterable_items(value: &Value) -> Result<Vec<Value>, RuntimeErrorKind> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
        Value::Dict(dict) => Ok(dict.borrow().keys()),
        other => Err(RuntimeErrorKind::NotIterable {
            type_name: other.type_name().to_string(),
        }),
    }
}
