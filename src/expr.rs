//! Arithmetic expression evaluation for `{{#expr:}}` and `{{#ifexpr:}}`.

use crate::common::strtr;
use core::num::ParseFloatError;
use std::f64::consts::{E, PI};

/// An expression evaluation error.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The expression nested too deeply.
    #[error("expression too complex at {0}")]
    StackExhausted(usize),
    /// Encountered an unknown word or symbol.
    #[error("unrecognised word \"{1}\" at {0}")]
    UnknownToken(usize, String),
    /// Encountered a number where an operator was expected.
    #[error("unexpected number at {0}")]
    UnexpectedNumber(usize),
    /// Encountered an operator where a number was expected.
    #[error("unexpected operator {1} at {0}")]
    UnexpectedOperator(usize, &'static str),
    /// Encountered a close bracket without an open bracket.
    #[error("unexpected closing bracket at {0}")]
    UnexpectedCloseBracket(usize),
    /// An open bracket was never closed.
    #[error("unclosed bracket")]
    MissingCloseBracket,
    /// An operator was missing an operand.
    #[error("missing operand for {0}")]
    MissingOperand(&'static str),
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// A number could not be parsed.
    #[error("invalid number at {0}: {1}")]
    ParseFloat(usize, ParseFloatError),
}

/// The standard result type used by expression functions.
pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// The maximum number of pending operators or operands.
const MAX_STACK_SIZE: usize = 100;

/// Operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Op {
    /// Unary `-`.
    Negative,
    /// Unary `+`.
    Positive,
    /// `not`.
    Not,
    /// Scientific notation `e`.
    Exponent,
    /// `^`.
    Pow,
    /// `*`.
    Times,
    /// `/` or `div`.
    Divide,
    /// `mod`.
    Mod,
    /// Binary `+`.
    Plus,
    /// Binary `-`.
    Minus,
    /// `round`.
    Round,
    /// `=`.
    Equal,
    /// `<>` or `!=`.
    NotEqual,
    /// `<`.
    Less,
    /// `>`.
    Greater,
    /// `<=`.
    LessEqual,
    /// `>=`.
    GreaterEqual,
    /// `and`.
    And,
    /// `or`.
    Or,
    /// `(`.
    Open,
}

impl Op {
    /// Returns the operator for a word operator.
    fn word(word: &str) -> Option<Self> {
        Some(match word {
            "and" => Self::And,
            "div" => Self::Divide,
            "e" => Self::Exponent,
            "mod" => Self::Mod,
            "not" => Self::Not,
            "or" => Self::Or,
            "round" => Self::Round,
            _ => return None,
        })
    }

    /// The operator as written.
    const fn name(self) -> &'static str {
        match self {
            Self::Negative | Self::Minus => "-",
            Self::Positive | Self::Plus => "+",
            Self::Not => "not",
            Self::Exponent => "e",
            Self::Pow => "^",
            Self::Times => "*",
            Self::Divide => "/",
            Self::Mod => "mod",
            Self::Round => "round",
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessEqual => "<=",
            Self::GreaterEqual => ">=",
            Self::And => "and",
            Self::Or => "or",
            Self::Open => "(",
        }
    }

    /// The binding strength of the operator.
    const fn precedence(self) -> i8 {
        match self {
            Self::Negative | Self::Positive | Self::Exponent => 10,
            Self::Not => 9,
            Self::Pow => 8,
            Self::Times | Self::Divide | Self::Mod => 7,
            Self::Plus | Self::Minus => 6,
            Self::Round => 5,
            Self::Equal
            | Self::NotEqual
            | Self::Less
            | Self::Greater
            | Self::LessEqual
            | Self::GreaterEqual => 4,
            Self::And => 3,
            Self::Or => 2,
            Self::Open => -1,
        }
    }

    /// Pops the operands of this operator from `stack` and pushes the result.
    // Clippy: Truncation is the documented behaviour of `mod` and `round`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::float_cmp)]
    fn apply(self, stack: &mut Vec<f64>) -> Result {
        let missing = || Error::MissingOperand(self.name());
        let truth = |value: bool| if value { 1.0 } else { 0.0 };

        let value = match self {
            Self::Negative | Self::Positive | Self::Not => {
                let value = stack.pop().ok_or_else(missing)?;
                match self {
                    Self::Negative => -value,
                    Self::Not => truth(value == 0.0),
                    _ => value,
                }
            }
            Self::Open => return Err(Error::MissingCloseBracket),
            _ => {
                let right = stack.pop().ok_or_else(missing)?;
                let left = stack.pop().ok_or_else(missing)?;
                match self {
                    Self::Exponent => left * 10.0_f64.powf(right),
                    Self::Pow => left.powf(right),
                    Self::Times => left * right,
                    Self::Divide => {
                        if right == 0.0 {
                            return Err(Error::DivisionByZero);
                        }
                        left / right
                    }
                    Self::Mod => {
                        let (left, right) = (left as i64, right as i64);
                        if right == 0 {
                            return Err(Error::DivisionByZero);
                        }
                        (left % right) as f64
                    }
                    Self::Plus => left + right,
                    Self::Minus => left - right,
                    Self::Round => {
                        let factor = 10.0_f64.powi((right as i32).clamp(-15, 15));
                        (left * factor).round() / factor
                    }
                    Self::Equal => truth(left == right),
                    Self::NotEqual => truth(left != right),
                    Self::Less => truth(left < right),
                    Self::Greater => truth(left > right),
                    Self::LessEqual => truth(left <= right),
                    Self::GreaterEqual => truth(left >= right),
                    Self::And => truth(left != 0.0 && right != 0.0),
                    Self::Or => truth(left != 0.0 || right != 0.0),
                    Self::Negative | Self::Positive | Self::Not | Self::Open => {
                        return Err(missing());
                    }
                }
            }
        };
        stack.push(value);
        Ok(())
    }
}

/// Evaluates an infix arithmetic expression using the shunting yard
/// algorithm. An empty expression evaluates to `None`.
pub fn evaluate(expr: &str) -> Result<Option<f64>> {
    let expr = strtr(
        expr,
        &[("&minus;", "-"), ("&lt;", "<"), ("&gt;", ">"), ("−", "-")],
    );

    let mut operands = Vec::<f64>::new();
    let mut operators = Vec::<Op>::new();
    let mut expect_operand = true;
    let mut iter = expr.char_indices().peekable();

    while let Some((pos, c)) = iter.next() {
        if operands.len() >= MAX_STACK_SIZE || operators.len() >= MAX_STACK_SIZE {
            return Err(Error::StackExhausted(pos));
        }

        let op = match c {
            ' ' | '\t' | '\r' | '\n' => continue,
            '0'..='9' | '.' => {
                // “1.2.3” is 1.2: everything after a second separator is
                // consumed and ignored
                let mut end = pos + 1;
                let mut separators = usize::from(c == '.');
                while let Some((next_pos, next)) =
                    iter.next_if(|(_, c)| c.is_ascii_digit() || *c == '.')
                {
                    separators += usize::from(next == '.');
                    if separators < 2 {
                        end = next_pos + 1;
                    }
                }
                if !expect_operand {
                    return Err(Error::UnexpectedNumber(pos));
                }
                let number = expr[pos..end]
                    .parse::<f64>()
                    .map_err(|err| Error::ParseFloat(pos, err))?;
                operands.push(number);
                expect_operand = false;
                continue;
            }
            c if c.is_ascii_alphabetic() => {
                let mut end = pos + 1;
                while let Some((next_pos, _)) = iter.next_if(|(_, c)| c.is_ascii_alphabetic()) {
                    end = next_pos + 1;
                }
                let word = expr[pos..end].to_ascii_lowercase();
                if word == "pi" || (word == "e" && expect_operand) {
                    if !expect_operand {
                        return Err(Error::UnexpectedNumber(pos));
                    }
                    operands.push(if word == "pi" { PI } else { E });
                    expect_operand = false;
                    continue;
                }
                let op = Op::word(&word).ok_or(Error::UnknownToken(pos, word))?;
                if op == Op::Not {
                    if !expect_operand {
                        return Err(Error::UnexpectedOperator(pos, op.name()));
                    }
                    operators.push(op);
                    continue;
                }
                op
            }
            '+' | '-' if expect_operand => {
                operators.push(if c == '+' { Op::Positive } else { Op::Negative });
                continue;
            }
            '+' => Op::Plus,
            '-' => Op::Minus,
            '*' => Op::Times,
            '/' => Op::Divide,
            '^' => Op::Pow,
            '(' => {
                if !expect_operand {
                    return Err(Error::UnexpectedOperator(pos, "("));
                }
                operators.push(Op::Open);
                continue;
            }
            ')' => {
                loop {
                    match operators.pop() {
                        Some(Op::Open) => break,
                        Some(op) => op.apply(&mut operands)?,
                        None => return Err(Error::UnexpectedCloseBracket(pos)),
                    }
                }
                expect_operand = false;
                continue;
            }
            '=' => Op::Equal,
            '<' => {
                if iter.next_if(|(_, c)| *c == '=').is_some() {
                    Op::LessEqual
                } else if iter.next_if(|(_, c)| *c == '>').is_some() {
                    Op::NotEqual
                } else {
                    Op::Less
                }
            }
            '>' => {
                if iter.next_if(|(_, c)| *c == '=').is_some() {
                    Op::GreaterEqual
                } else {
                    Op::Greater
                }
            }
            '!' if iter.next_if(|(_, c)| *c == '=').is_some() => Op::NotEqual,
            _ => return Err(Error::UnknownToken(pos, c.to_string())),
        };

        if expect_operand {
            return Err(Error::UnexpectedOperator(pos, op.name()));
        }

        while let Some(&top) = operators.last()
            && op.precedence() <= top.precedence()
        {
            operators.pop();
            top.apply(&mut operands)?;
        }
        operators.push(op);
        expect_operand = true;
    }

    while let Some(op) = operators.pop() {
        op.apply(&mut operands)?;
    }

    match operands.len() {
        0 | 1 => Ok(operands.pop()),
        _ => Err(Error::UnexpectedNumber(expr.len())),
    }
}

/// Formats the result of an expression, rounded to at most eight decimal
/// places.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NAN".into();
    } else if value.is_infinite() {
        return if value < 0.0 { "-INF" } else { "INF" }.into();
    } else if value.abs() >= 1e15 {
        let formatted = format!("{value:E}");
        let (mantissa, exponent) = formatted.split_once('E').unwrap_or((&formatted, "0"));
        let dot = if mantissa.contains('.') { "" } else { ".0" };
        let sign = if exponent.starts_with('-') { "" } else { "+" };
        return format!("{mantissa}{dot}E{sign}{exponent}");
    }

    let rounded = (value * 1e8).round() / 1e8;
    let formatted = format!("{rounded:.8}");
    let formatted = formatted.trim_end_matches('0').trim_end_matches('.');
    if formatted == "-0" {
        "0".into()
    } else {
        formatted.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn eval(expr: &str) -> f64 {
        match evaluate(expr) {
            Ok(Some(value)) => value,
            other => panic!("'{expr}' failed: {other:?}"),
        }
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), 7.0);
        assert_eq!(eval("(1 + 2) * 3"), 9.0);
        assert_eq!(eval("2 ^ 3"), 8.0);
        assert_eq!(eval("7 mod 3"), 1.0);
        assert_eq!(eval("7 div 2"), 3.5);
        assert_eq!(eval("-3 + 1"), -2.0);
        assert_eq!(eval("1e3"), 1000.0, "scientific notation");
        assert_eq!(eval("2.5 round 0"), 3.0);
        assert_eq!(eval("1.2.3"), 1.2, "extra separators are ignored");
        assert_eq!(eval("3 &minus; 1"), 2.0, "entities are decoded");
        assert_eq!(evaluate("  "), Ok(None), "empty expression has no value");
    }

    #[test]
    fn logic() {
        assert_eq!(eval("1 < 2 and 2 > 3"), 0.0);
        assert_eq!(eval("1 < 2 or 2 > 3"), 1.0);
        assert_eq!(eval("not 0"), 1.0);
        assert_eq!(eval("3 = 3"), 1.0);
        assert_eq!(eval("1 <> 2"), 1.0);
        assert_eq!(eval("2 >= 2"), 1.0);
        assert_eq!(eval("1 + 1 = 2"), 1.0, "comparison binds looser than addition");
    }

    #[test]
    fn errors() {
        assert_eq!(evaluate("1/0"), Err(Error::DivisionByZero));
        assert_eq!(evaluate("(1"), Err(Error::MissingCloseBracket));
        assert_eq!(evaluate("1)"), Err(Error::UnexpectedCloseBracket(1)));
        assert_eq!(evaluate("foo"), Err(Error::UnknownToken(0, "foo".into())));
        assert_eq!(evaluate("1 2"), Err(Error::UnexpectedNumber(2)));
        assert_eq!(evaluate("1 +"), Err(Error::MissingOperand("+")));
        assert_eq!(evaluate("* 1"), Err(Error::UnexpectedOperator(0, "*")));
    }

    #[test]
    fn formatting() {
        assert_eq!(format_number(1.0 / 3.0), "0.33333333");
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1e21), "1.0E+21");
    }
}
