// src/core/eval.rs

use thiserror::Error;

/// Tolerance under which a generated value is rendered as an integer.
pub const INTEGER_TOLERANCE: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("invalid arithmetic expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
    #[error("the step expression in '{expr}' is pointing away from the target")]
    WrongDirection { expr: String },
    #[error("range expansion exceeded the maximum of {limit} values")]
    TooManyValues { limit: usize },
}

/// Evaluates a pure arithmetic expression.
///
/// Math only: `${...}` blocks cannot reach the host. Shell capture
/// (`$b{...}`) is the single escape hatch into it.
pub fn eval_number(expr: &str) -> Result<f64, EvalError> {
    fasteval::ez_eval(expr, &mut fasteval::EmptyNamespace).map_err(|e| EvalError::Invalid {
        expr: expr.to_string(),
        reason: format!("{e:?}"),
    })
}

/// Renders a number the way it reads in an input file: as an integer when it
/// is one (within `INTEGER_TOLERANCE`), otherwise as a decimal trimmed of
/// trailing zeros.
pub fn render_number(value: f64) -> String {
    if (value - value.round()).abs() < INTEGER_TOLERANCE && value.abs() < 1e15 {
        return format!("{}", value.round() as i64);
    }
    let text = format!("{value:.6}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    text.to_string()
}

/// Expands a `from F, to T, step V` declaration into the ordered value list.
///
/// Starting at `from`, the step expression is repeatedly appended to the
/// current value's rendered text and re-evaluated (`0` + `+2` → `0+2` → `2`),
/// collecting every visited value until the running value crosses `to` moving
/// away from `from`. The target itself is included when landed on exactly.
/// A step that increases the distance to the target is malformed input, and a
/// hard cap bounds the number of generated values.
pub fn expand_range(
    from: f64,
    to: f64,
    step: &str,
    cap: usize,
) -> Result<Vec<String>, EvalError> {
    let ascending = from <= to;
    let mut current = from;
    let mut old_dist = (current - to).abs();
    let mut values = Vec::new();

    loop {
        let rendered = render_number(current);
        values.push(rendered.clone());
        if values.len() > cap {
            return Err(EvalError::TooManyValues { limit: cap });
        }

        // The next step starts from the rendered text, so the generated list
        // and the arithmetic always agree on what the current value is.
        let step_expr = format!("{rendered}{step}");
        current = eval_number(&step_expr)?;

        let crossed = if ascending { current > to } else { current < to };
        if crossed {
            return Ok(values);
        }
        let new_dist = (current - to).abs();
        if new_dist > old_dist {
            return Err(EvalError::WrongDirection { expr: step_expr });
        }
        old_dist = new_dist;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_basic_arithmetic() {
        assert_eq!(eval_number("2*3").unwrap(), 6.0);
        assert_eq!(eval_number("(1+2)/2").unwrap(), 1.5);
        assert!(eval_number("2*").is_err());
    }

    #[test]
    fn test_render_number_integer_tolerance() {
        assert_eq!(render_number(4.0), "4");
        assert_eq!(render_number(4.0000001), "4");
        assert_eq!(render_number(0.3), "0.3");
        assert_eq!(render_number(0.8999999999999999), "0.9");
        assert_eq!(render_number(-2.5), "-2.5");
    }

    #[test]
    fn test_integer_range() {
        let values = expand_range(0.0, 10.0, "+2", 1000).unwrap();
        assert_eq!(values, vec!["0", "2", "4", "6", "8", "10"]);
    }

    #[test]
    fn test_fractional_range_stops_before_overshoot() {
        let values = expand_range(0.0, 1.0, "+0.3", 1000).unwrap();
        assert_eq!(values, vec!["0", "0.3", "0.6", "0.9"]);
    }

    #[test]
    fn test_descending_range() {
        let values = expand_range(10.0, 0.0, "-5", 1000).unwrap();
        assert_eq!(values, vec!["10", "5", "0"]);
    }

    #[test]
    fn test_multiplicative_step() {
        let values = expand_range(1.0, 8.0, "*2", 1000).unwrap();
        assert_eq!(values, vec!["1", "2", "4", "8"]);
    }

    #[test]
    fn test_wrong_direction_is_fatal() {
        let result = expand_range(0.0, 10.0, "-1", 1000);
        assert!(matches!(result, Err(EvalError::WrongDirection { .. })));
    }

    #[test]
    fn test_range_cap_is_fatal() {
        let result = expand_range(0.0, 100.0, "+1", 5);
        assert!(matches!(result, Err(EvalError::TooManyValues { limit: 5 })));
    }
}
