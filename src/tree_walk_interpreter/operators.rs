//! Operator semantics shared by the tree walker and the bytecode VM.

use super::{RuntimeValue, ValueType};
use crate::ast::{BinaryOperator, UnaryOperator};
use std::cmp::Ordering;

pub const EPSILON: f64 = 1e-6;

/// The operand types an operator was applied to when it is not defined on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandMismatch {
    pub left: ValueType,
    pub right: ValueType,
}

type Outcome = Result<RuntimeValue, OperandMismatch>;

fn mismatch(left: &RuntimeValue, right: &RuntimeValue) -> OperandMismatch {
    OperandMismatch {
        left: left.type_of(),
        right: right.type_of(),
    }
}

pub fn values_equal(left: &RuntimeValue, right: &RuntimeValue) -> bool {
    use RuntimeValue::*;
    match (left, right) {
        (Number(a), Number(b)) => a == b,
        (String(a), String(b)) => a == b,
        (Boolean(a), Boolean(b)) => a == b,
        (Number(n), Boolean(b)) | (Boolean(b), Number(n)) => *n == if *b { 1.0 } else { 0.0 },
        (Undefined, Undefined) => true,
        _ => left == right,
    }
}

/// Applies `operation` pairwise up to the shorter length.
fn zip_arrays(
    left: &RuntimeValue,
    right: &RuntimeValue,
    operation: fn(&RuntimeValue, &RuntimeValue) -> Outcome,
) -> Option<Outcome> {
    let (a, b) = (left.as_array()?, right.as_array()?);
    Some(
        a.snapshot()
            .iter()
            .zip(b.snapshot().iter())
            .map(|(x, y)| operation(x, y))
            .collect::<Result<Vec<_>, _>>()
            .map(RuntimeValue::from),
    )
}

fn map_array(
    array: &RuntimeValue,
    operation: impl Fn(&RuntimeValue) -> Outcome,
) -> Option<Outcome> {
    let items = array.as_array()?.snapshot();
    Some(
        items
            .iter()
            .map(operation)
            .collect::<Result<Vec<_>, _>>()
            .map(RuntimeValue::from),
    )
}

fn add(left: &RuntimeValue, right: &RuntimeValue) -> Outcome {
    if let Some(result) = zip_arrays(left, right, add) {
        return result;
    }
    match (left, right) {
        (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok((a + b).into()),
        (RuntimeValue::String(_), _) | (_, RuntimeValue::String(_)) => {
            Ok(format!("{}{}", left, right).into())
        }
        _ => Err(mismatch(left, right)),
    }
}

fn subtract(left: &RuntimeValue, right: &RuntimeValue) -> Outcome {
    if let Some(result) = zip_arrays(left, right, subtract) {
        return result;
    }
    match (left, right) {
        (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok((a - b).into()),
        _ => Err(mismatch(left, right)),
    }
}

fn multiply(left: &RuntimeValue, right: &RuntimeValue) -> Outcome {
    match (left, right) {
        (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok((a * b).into()),
        (RuntimeValue::Array(a), RuntimeValue::Array(b)) => {
            let mut sum = 0.0;
            for (x, y) in a.snapshot().iter().zip(b.snapshot().iter()) {
                match (x, y) {
                    (RuntimeValue::Number(x), RuntimeValue::Number(y)) => sum += x * y,
                    _ => return Err(mismatch(x, y)),
                }
            }
            Ok(sum.into())
        }
        (RuntimeValue::Array(_), RuntimeValue::Number(_)) => {
            map_array(left, |item| multiply(item, right)).unwrap_or_else(|| Err(mismatch(left, right)))
        }
        (RuntimeValue::Number(_), RuntimeValue::Array(_)) => {
            map_array(right, |item| multiply(left, item)).unwrap_or_else(|| Err(mismatch(left, right)))
        }
        _ => Err(mismatch(left, right)),
    }
}

fn divide(left: &RuntimeValue, right: &RuntimeValue) -> Outcome {
    match (left, right) {
        (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok((a / b).into()),
        (RuntimeValue::Array(_), RuntimeValue::Number(_)) => {
            map_array(left, |item| divide(item, right)).unwrap_or_else(|| Err(mismatch(left, right)))
        }
        _ => Err(mismatch(left, right)),
    }
}

/// Mathematical modulo: the result has the sign of the divisor.
pub fn modulo_f64(a: f64, b: f64) -> f64 {
    a - b * (a / b).floor()
}

fn modulo(left: &RuntimeValue, right: &RuntimeValue) -> Outcome {
    match (left, right) {
        (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok(modulo_f64(*a, *b).into()),
        (RuntimeValue::Array(_), RuntimeValue::Number(_)) => {
            map_array(left, |item| modulo(item, right)).unwrap_or_else(|| Err(mismatch(left, right)))
        }
        _ => Err(mismatch(left, right)),
    }
}

fn compare(left: &RuntimeValue, right: &RuntimeValue) -> Result<Option<Ordering>, OperandMismatch> {
    match (left, right) {
        (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok(a.partial_cmp(b)),
        (RuntimeValue::String(a), RuntimeValue::String(b)) => Ok(Some(a.cmp(b))),
        _ => Err(mismatch(left, right)),
    }
}

/// Evaluates a binary operator on two already evaluated operands. `&&` and `||` return
/// the deciding operand; callers short-circuit before getting here.
pub fn binary(operator: BinaryOperator, left: &RuntimeValue, right: &RuntimeValue) -> Outcome {
    use BinaryOperator::*;
    let ordering = |accept: fn(Ordering) -> bool| -> Outcome {
        compare(left, right).map(|ordering| ordering.map_or(false, accept).into())
    };
    match operator {
        Equal => Ok(values_equal(left, right).into()),
        NotEqual => Ok((!values_equal(left, right)).into()),
        Approx => match (left, right) {
            (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok(((a - b).abs() < EPSILON).into()),
            _ => Err(mismatch(left, right)),
        },
        Less => ordering(|ordering| ordering == Ordering::Less),
        Greater => ordering(|ordering| ordering == Ordering::Greater),
        LessEqual => ordering(|ordering| ordering != Ordering::Greater),
        GreaterEqual => ordering(|ordering| ordering != Ordering::Less),
        Add => add(left, right),
        Subtract => subtract(left, right),
        Multiply => multiply(left, right),
        Divide => divide(left, right),
        Modulo => modulo(left, right),
        Power => match (left, right) {
            (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok(a.powf(*b).into()),
            _ => Err(mismatch(left, right)),
        },
        And => Ok(match left.is_truthy() {
            true => right.clone(),
            false => left.clone(),
        }),
        Or => Ok(match left.is_truthy() {
            true => left.clone(),
            false => right.clone(),
        }),
    }
}

/// Evaluates a unary operator. The error carries the operand type.
pub fn unary(operator: UnaryOperator, operand: &RuntimeValue) -> Result<RuntimeValue, ValueType> {
    match operator {
        UnaryOperator::Not => Ok((!operand.is_truthy()).into()),
        UnaryOperator::Negate => match operand {
            RuntimeValue::Number(value) => Ok((-value).into()),
            RuntimeValue::Array(array) => array
                .snapshot()
                .iter()
                .map(|item| unary(operator, item))
                .collect::<Result<Vec<_>, _>>()
                .map(RuntimeValue::from),
            other => Err(other.type_of()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn num(value: f64) -> RuntimeValue {
        value.into()
    }

    #[test]
    fn modulo_follows_the_divisor() {
        assert_eq!(binary(BinaryOperator::Modulo, &num(9.0), &num(-4.0)), Ok(num(-3.0)));
        assert_eq!(binary(BinaryOperator::Modulo, &num(-9.0), &num(4.0)), Ok(num(3.0)));
        assert_eq!(binary(BinaryOperator::Modulo, &num(7.5), &num(2.0)), Ok(num(1.5)));
    }

    #[test]
    fn vectors() {
        let a = RuntimeValue::numbers(vec![1.0, 2.0, 3.0]);
        let b = RuntimeValue::numbers(vec![4.0, 5.0]);
        assert_eq!(binary(BinaryOperator::Add, &a, &b).map(|v| v.to_string()), Ok("[5, 7]".to_string()));
        assert_eq!(binary(BinaryOperator::Multiply, &a, &b), Ok(num(14.0)));
        assert_eq!(
            binary(BinaryOperator::Multiply, &num(2.0), &a).map(|v| v.to_string()),
            Ok("[2, 4, 6]".to_string())
        );
        assert_eq!(
            binary(BinaryOperator::Divide, &num(2.0), &a),
            Err(OperandMismatch {
                left: ValueType::Number,
                right: ValueType::Array
            })
        );
    }

    #[test]
    fn plus_concatenates_strings() {
        let s = RuntimeValue::from("x");
        assert_eq!(binary(BinaryOperator::Add, &s, &num(1.5)), Ok("x1.5".into()));
        assert_eq!(binary(BinaryOperator::Add, &num(2.0), &s), Ok("2x".into()));
        assert_eq!(
            binary(BinaryOperator::Subtract, &s, &num(1.0)),
            Err(OperandMismatch {
                left: ValueType::String,
                right: ValueType::Number
            })
        );
    }

    #[test]
    fn equality_and_ordering() {
        assert!(values_equal(&num(1.0), &true.into()));
        assert!(!values_equal(&num(1.0), &"1".into()));
        assert!(values_equal(&RuntimeValue::Undefined, &RuntimeValue::Undefined));
        let array = RuntimeValue::numbers(vec![1.0]);
        assert!(values_equal(&array, &array.clone()));
        assert!(!values_equal(&array, &RuntimeValue::numbers(vec![1.0])));
        assert_eq!(binary(BinaryOperator::Less, &"a".into(), &"b".into()), Ok(true.into()));
        assert_eq!(binary(BinaryOperator::GreaterEqual, &num(f64::NAN), &num(1.0)), Ok(false.into()));
        assert_eq!(binary(BinaryOperator::Approx, &num(0.1 + 0.2), &num(0.3)), Ok(true.into()));
        assert!(binary(BinaryOperator::Less, &num(1.0), &"b".into()).is_err());
    }

    #[test]
    fn negation() {
        assert_eq!(unary(UnaryOperator::Negate, &num(2.0)), Ok(num(-2.0)));
        assert_eq!(unary(UnaryOperator::Not, &num(0.0)), Ok(true.into()));
        assert_eq!(unary(UnaryOperator::Negate, &"a".into()), Err(ValueType::String));
    }
}
