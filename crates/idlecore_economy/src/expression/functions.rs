//! Built-in function dispatch table.
//!
//! Every function declares its arity and whether it draws randomness.
//! Arity and argument kinds are validated at call time and reported as
//! typed [`EvalError`]s.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::{Value, Variables};
use crate::error::{EvalError, EvalResult};

/// Everything a built-in may read while running.
pub struct CallContext<'a> {
    /// Player variable snapshot.
    pub variables: &'a Variables,
    /// Shared formula RNG.
    pub rng: &'a parking_lot::Mutex<ChaCha8Rng>,
}

impl CallContext<'_> {
    /// Presence test: a variable that exists and is positive.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.variables.get(key).is_some_and(|v| *v > 0.0)
    }
}

type Builtin = fn(&str, &[Value], &CallContext<'_>) -> EvalResult<Value>;

/// A dispatch table entry.
pub struct FunctionSpec {
    /// Name as written in formulas.
    pub name: &'static str,
    /// Minimum argument count.
    pub min_args: usize,
    /// Maximum argument count (`None` for variadic).
    pub max_args: Option<usize>,
    /// Arity as shown in errors.
    pub arity_label: &'static str,
    /// True if the result depends on the RNG.
    pub random: bool,
    call: Builtin,
}

impl FunctionSpec {
    /// Checks arity and runs the function.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Arity`] or whatever the function itself raises.
    pub fn invoke(&self, args: &[Value], ctx: &CallContext<'_>) -> EvalResult<Value> {
        let within_max = self.max_args.map_or(true, |max| args.len() <= max);
        if args.len() < self.min_args || !within_max {
            return Err(EvalError::Arity {
                function: self.name.to_string(),
                expected: self.arity_label,
                got: args.len(),
            });
        }
        (self.call)(self.name, args, ctx)
    }
}

const fn exact(
    name: &'static str,
    count: usize,
    arity_label: &'static str,
    random: bool,
    call: Builtin,
) -> FunctionSpec {
    FunctionSpec {
        name,
        min_args: count,
        max_args: Some(count),
        arity_label,
        random,
        call,
    }
}

static FUNCTIONS: [FunctionSpec; 14] = [
    exact("have", 1, "1", false, have),
    exact("no", 1, "1", false, no),
    FunctionSpec {
        name: "random",
        min_args: 1,
        max_args: Some(2),
        arity_label: "1 or 2",
        random: true,
        call: random,
    },
    FunctionSpec {
        name: "frandom",
        min_args: 1,
        max_args: Some(2),
        arity_label: "1 or 2",
        random: true,
        call: frandom,
    },
    exact("chance", 1, "1", true, chance),
    exact("min", 2, "2", false, min),
    exact("max", 2, "2", false, max),
    exact("floor", 1, "1", false, floor),
    exact("ceil", 1, "1", false, ceil),
    exact("round", 1, "1", false, round),
    exact("roundr", 1, "1", true, roundr),
    exact("pow", 2, "2", false, pow),
    FunctionSpec {
        name: "and",
        min_args: 2,
        max_args: None,
        arity_label: "at least 2",
        random: false,
        call: and,
    },
    FunctionSpec {
        name: "or",
        min_args: 2,
        max_args: None,
        arity_label: "at least 2",
        random: false,
        call: or,
    },
];

/// Looks up a built-in by name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|function| function.name == name)
}

/// True if `name` is a built-in whose result depends on the RNG.
#[must_use]
pub fn is_random(name: &str) -> bool {
    lookup(name).is_some_and(|function| function.random)
}

// ============================================================================
// Argument helpers
// ============================================================================

fn number_arg(function: &str, value: &Value) -> EvalResult<f64> {
    value.as_number().ok_or_else(|| EvalError::ArgumentType {
        function: function.to_string(),
        expected: "numeric",
    })
}

fn numbers<const N: usize>(function: &str, args: &[Value]) -> EvalResult<[f64; N]> {
    let mut out = [0.0; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = number_arg(function, arg)?;
    }
    Ok(out)
}

fn key_arg<'a>(function: &str, value: &'a Value) -> EvalResult<&'a str> {
    match value {
        Value::Str(key) => Ok(key),
        _ => Err(EvalError::ArgumentType {
            function: function.to_string(),
            expected: "string",
        }),
    }
}

fn bool_args(function: &str, args: &[Value]) -> EvalResult<Vec<bool>> {
    args.iter()
        .map(|arg| match arg {
            Value::Bool(b) => Ok(*b),
            _ => Err(EvalError::ArgumentType {
                function: function.to_string(),
                expected: "boolean",
            }),
        })
        .collect()
}

/// `(min, max)` from `f(max)` or `f(min, max)`.
fn bounds(function: &str, args: &[Value]) -> EvalResult<(f64, f64)> {
    let (low, high) = match args {
        [high] => (0.0, number_arg(function, high)?),
        [low, high, ..] => (number_arg(function, low)?, number_arg(function, high)?),
        [] => unreachable_arity(function)?,
    };
    if low > high || !low.is_finite() || !high.is_finite() {
        return Err(EvalError::ArgumentType {
            function: function.to_string(),
            expected: "finite min <= max",
        });
    }
    Ok((low, high))
}

fn unreachable_arity(function: &str) -> EvalResult<(f64, f64)> {
    Err(EvalError::Arity {
        function: function.to_string(),
        expected: "1 or 2",
        got: 0,
    })
}

// ============================================================================
// Built-ins
// ============================================================================

fn have(name: &str, args: &[Value], ctx: &CallContext<'_>) -> EvalResult<Value> {
    Ok(Value::Bool(ctx.has(key_arg(name, &args[0])?)))
}

fn no(name: &str, args: &[Value], ctx: &CallContext<'_>) -> EvalResult<Value> {
    Ok(Value::Bool(!ctx.has(key_arg(name, &args[0])?)))
}

/// Uniform integer draw in `[min, max]`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn random(name: &str, args: &[Value], ctx: &CallContext<'_>) -> EvalResult<Value> {
    let (low, high) = bounds(name, args)?;
    let (low, high) = (low.ceil(), high.floor());
    if low > high {
        return Ok(Value::Number(low));
    }
    // Bounds are finite, so the casts only saturate on absurd catalogs.
    let drawn = ctx.rng.lock().gen_range(low as i64..=high as i64);
    Ok(Value::Number(drawn as f64))
}

/// Uniform real draw in `[min, max)`.
fn frandom(name: &str, args: &[Value], ctx: &CallContext<'_>) -> EvalResult<Value> {
    let (low, high) = bounds(name, args)?;
    if (high - low).abs() < f64::EPSILON {
        return Ok(Value::Number(low));
    }
    Ok(Value::Number(ctx.rng.lock().gen_range(low..high)))
}

/// True with probability `p / 100`.
fn chance(name: &str, args: &[Value], ctx: &CallContext<'_>) -> EvalResult<Value> {
    let [percent] = numbers::<1>(name, args)?;
    let roll: f64 = ctx.rng.lock().gen();
    Ok(Value::Bool(roll * 100.0 < percent))
}

fn min(name: &str, args: &[Value], _: &CallContext<'_>) -> EvalResult<Value> {
    let [a, b] = numbers::<2>(name, args)?;
    Ok(Value::Number(a.min(b)))
}

fn max(name: &str, args: &[Value], _: &CallContext<'_>) -> EvalResult<Value> {
    let [a, b] = numbers::<2>(name, args)?;
    Ok(Value::Number(a.max(b)))
}

fn floor(name: &str, args: &[Value], _: &CallContext<'_>) -> EvalResult<Value> {
    let [x] = numbers::<1>(name, args)?;
    Ok(Value::Number(x.floor()))
}

fn ceil(name: &str, args: &[Value], _: &CallContext<'_>) -> EvalResult<Value> {
    let [x] = numbers::<1>(name, args)?;
    Ok(Value::Number(x.ceil()))
}

fn round(name: &str, args: &[Value], _: &CallContext<'_>) -> EvalResult<Value> {
    let [x] = numbers::<1>(name, args)?;
    Ok(Value::Number(x.round()))
}

/// Stochastic rounding: up with probability equal to the fraction.
fn roundr(name: &str, args: &[Value], ctx: &CallContext<'_>) -> EvalResult<Value> {
    let [x] = numbers::<1>(name, args)?;
    let fraction = x - x.floor();
    if fraction == 0.0 {
        return Ok(Value::Number(x));
    }
    let roll: f64 = ctx.rng.lock().gen();
    Ok(Value::Number(if roll < fraction { x.ceil() } else { x.floor() }))
}

fn pow(name: &str, args: &[Value], _: &CallContext<'_>) -> EvalResult<Value> {
    let [base, exponent] = numbers::<2>(name, args)?;
    Ok(Value::Number(base.powf(exponent)))
}

/// Every argument is type-checked; there is no short circuit.
fn and(name: &str, args: &[Value], _: &CallContext<'_>) -> EvalResult<Value> {
    Ok(Value::Bool(bool_args(name, args)?.into_iter().all(|b| b)))
}

fn or(name: &str, args: &[Value], _: &CallContext<'_>) -> EvalResult<Value> {
    Ok(Value::Bool(bool_args(name, args)?.into_iter().any(|b| b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rand::SeedableRng;

    fn call(name: &str, args: &[Value]) -> EvalResult<Value> {
        let mut variables = Variables::new();
        variables.insert("gold".into(), 5.0);
        variables.insert("mine".into(), 0.0);
        let rng = Mutex::new(ChaCha8Rng::seed_from_u64(7));
        let ctx = CallContext {
            variables: &variables,
            rng: &rng,
        };
        lookup(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?
            .invoke(args, &ctx)
    }

    #[test]
    fn test_have_and_no() {
        assert_eq!(call("have", &[Value::Str("gold".into())]), Ok(Value::Bool(true)));
        assert_eq!(call("have", &[Value::Str("mine".into())]), Ok(Value::Bool(false)));
        assert_eq!(call("no", &[Value::Str("castle".into())]), Ok(Value::Bool(true)));
        assert!(matches!(
            call("have", &[Value::Number(1.0)]),
            Err(EvalError::ArgumentType { .. })
        ));
    }

    #[test]
    fn test_arity_checked() {
        assert!(matches!(
            call("pow", &[Value::Number(2.0)]),
            Err(EvalError::Arity { got: 1, .. })
        ));
        assert!(matches!(
            call("and", &[Value::Bool(true)]),
            Err(EvalError::Arity { expected: "at least 2", .. })
        ));
        assert!(call("random", &[]).is_err());
    }

    #[test]
    fn test_and_or_require_booleans() {
        let t = Value::Bool(true);
        let f = Value::Bool(false);
        assert_eq!(call("and", &[t.clone(), t.clone(), f.clone()]), Ok(Value::Bool(false)));
        assert_eq!(call("or", &[f.clone(), f.clone(), t.clone()]), Ok(Value::Bool(true)));
        assert!(matches!(
            call("or", &[t, Value::Number(1.0)]),
            Err(EvalError::ArgumentType { expected: "boolean", .. })
        ));
    }

    #[test]
    fn test_math() {
        let n = Value::Number;
        assert_eq!(call("max", &[n(1.0), n(3.0)]), Ok(n(3.0)));
        assert_eq!(call("min", &[n(1.0), n(3.0)]), Ok(n(1.0)));
        assert_eq!(call("floor", &[n(1.7)]), Ok(n(1.0)));
        assert_eq!(call("ceil", &[n(1.2)]), Ok(n(2.0)));
        assert_eq!(call("round", &[n(2.5)]), Ok(n(3.0)));
        assert_eq!(call("pow", &[n(2.0), n(10.0)]), Ok(n(1024.0)));
    }

    #[test]
    fn test_random_ranges() {
        for _ in 0..50 {
            let Ok(Value::Number(x)) = call("random", &[Value::Number(3.0), Value::Number(6.0)])
            else {
                panic!("random failed");
            };
            assert!((3.0..=6.0).contains(&x));
            assert_eq!(x.fract(), 0.0);

            let Ok(Value::Number(y)) = call("frandom", &[Value::Number(2.0)]) else {
                panic!("frandom failed");
            };
            assert!((0.0..2.0).contains(&y));
        }
        assert!(call("random", &[Value::Number(5.0), Value::Number(1.0)]).is_err());
    }

    #[test]
    fn test_roundr_and_chance_bounds() {
        let Ok(Value::Number(x)) = call("roundr", &[Value::Number(2.5)]) else {
            panic!("roundr failed");
        };
        assert!(x == 2.0 || x == 3.0);
        assert_eq!(call("roundr", &[Value::Number(4.0)]), Ok(Value::Number(4.0)));
        assert_eq!(call("chance", &[Value::Number(100.0)]), Ok(Value::Bool(true)));
        assert_eq!(call("chance", &[Value::Number(0.0)]), Ok(Value::Bool(false)));
    }

    #[test]
    fn test_random_flags() {
        assert!(is_random("random"));
        assert!(is_random("roundr"));
        assert!(!is_random("pow"));
        assert!(!is_random("nope"));
    }
}
