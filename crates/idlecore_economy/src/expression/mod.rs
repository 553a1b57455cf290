//! # Expression Engine
//!
//! Sandboxed formula evaluator used for yields, costs and unlock
//! conditions.
//!
//! ## Pipeline
//!
//! ```text
//! formula ──► `if` rewrite ──► tokens ──► Expr tree ──► Value ──► f64
//!                     │                                           │
//!                     └──────────── ExpirationCache ◄─────────────┘
//! ```
//!
//! ## Values
//!
//! Formulas compute with numbers, booleans and string literals. Arithmetic
//! coerces booleans to `1.0` / `0.0`, so `mine * 2 + have('pickaxe')` is
//! well-typed. The final result must be a number or a boolean.
//!
//! ## Memoization
//!
//! Results are cached under the exact formula text plus the serialized
//! variable snapshot. A cache hit skips preprocessing, parsing and
//! evaluation. Formulas calling `random`, `frandom`, `chance` or `roundr`
//! are never stored.
//!
//! The cache and RNG are constructor dependencies, so each test can run
//! against its own isolated, seeded engine.

mod functions;
mod lexer;
mod parser;
mod preprocess;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ExpirationCache;
use crate::error::{EvalError, EvalResult};

pub use functions::{lookup as lookup_function, FunctionSpec};
pub use parser::{BinaryOp, Expr, UnaryOp};
pub use preprocess::preprocess;

use functions::CallContext;

/// Default lifetime of a memoized result.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Variable bindings visible to a formula.
///
/// Ordered so that the cache key serialization is stable.
pub type Variables = BTreeMap<String, f64>;

/// Shared memoization store for formula results.
pub type FormulaCache = ExpirationCache<String, f64>;

/// A runtime value inside a formula.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Floating point number.
    Number(f64),
    /// Boolean.
    Bool(bool),
    /// String literal (only meaningful as a function argument).
    Str(String),
}

impl Value {
    /// Numeric view: numbers as-is, booleans as 1/0, strings none.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Str(_) => None,
        }
    }

    /// Truthiness: booleans as-is, numbers when non-zero.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Number(n) => Some(*n != 0.0),
            Self::Str(_) => None,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Number(_) => "numeric",
            Self::Bool(_) => "boolean",
            Self::Str(_) => "string",
        }
    }
}

/// Parses a formula, applying the `if` rewrite first.
///
/// # Errors
///
/// Returns [`EvalError::Syntax`] for malformed text.
pub fn parse_formula(formula: &str) -> EvalResult<Expr> {
    let rewritten = preprocess(formula)?;
    parser::parse(&rewritten)
}

/// Formula evaluator with memoization.
pub struct ExpressionEngine {
    cache: Arc<FormulaCache>,
    ttl: Duration,
    rng: Mutex<ChaCha8Rng>,
}

impl std::fmt::Debug for ExpressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionEngine")
            .field("cached", &self.cache.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ExpressionEngine {
    /// Creates an engine over an explicit cache and RNG.
    #[must_use]
    pub fn new(cache: Arc<FormulaCache>, ttl: Duration, rng: ChaCha8Rng) -> Self {
        Self {
            cache,
            ttl,
            rng: Mutex::new(rng),
        }
    }

    /// Engine with a private cache, default TTL and a fixed seed.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::new(
            Arc::new(FormulaCache::new()),
            DEFAULT_CACHE_TTL,
            ChaCha8Rng::seed_from_u64(seed),
        )
    }

    /// The memoization store.
    #[must_use]
    pub fn cache(&self) -> &Arc<FormulaCache> {
        &self.cache
    }

    /// Evaluates `formula` against `variables`.
    ///
    /// Booleans are returned as `1.0` / `0.0`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] on bad syntax, an undefined variable, a bad
    /// function call, division by zero or a non-numeric result.
    pub fn evaluate(&self, formula: &str, variables: &Variables) -> EvalResult<f64> {
        let key = cache_key(formula, variables);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let expr = parse_formula(formula)?;
        let ctx = CallContext {
            variables,
            rng: &self.rng,
        };
        let result = finish(eval(&expr, &ctx)?)?;

        if !expr.any_call(&functions::is_random) {
            self.cache.set(key, result, self.ttl);
        }
        Ok(result)
    }

    /// Evaluates a condition; any non-zero result is true.
    ///
    /// # Errors
    ///
    /// Same as [`ExpressionEngine::evaluate`].
    pub fn evaluate_condition(&self, formula: &str, variables: &Variables) -> EvalResult<bool> {
        Ok(self.evaluate(formula, variables)? != 0.0)
    }

    /// Draws from the formula RNG: true with probability `percent / 100`.
    pub fn roll_percent(&self, percent: f64) -> bool {
        let roll: f64 = self.rng.lock().gen();
        roll * 100.0 < percent
    }
}

/// `formula|k=v;k=v;...` over the sorted variable map.
fn cache_key(formula: &str, variables: &Variables) -> String {
    let mut key = String::with_capacity(formula.len() + variables.len() * 16);
    key.push_str(formula);
    key.push('|');
    for (name, value) in variables {
        // Writing into a String cannot fail.
        let _ = write!(key, "{name}={value};");
    }
    key
}

fn finish(value: Value) -> EvalResult<f64> {
    match value {
        Value::Number(n) if n.is_finite() => Ok(n),
        Value::Number(_) => Err(EvalError::ResultType("non-finite")),
        Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        Value::Str(_) => Err(EvalError::ResultType("string")),
    }
}

// ============================================================================
// Tree walker
// ============================================================================

fn eval(expr: &Expr, ctx: &CallContext<'_>) -> EvalResult<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Var(name) => match name.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => ctx
                .variables
                .get(name)
                .map(|v| Value::Number(*v))
                .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
        },
        Expr::Unary(op, inner) => {
            let value = eval(inner, ctx)?;
            match op {
                UnaryOp::Neg => Ok(Value::Number(-operand_number("-", &value)?)),
                UnaryOp::Not => Ok(Value::Bool(!operand_bool("!", &value)?)),
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),
        Expr::Ternary(cond, then, otherwise) => {
            if operand_bool("?:", &eval(cond, ctx)?)? {
                eval(then, ctx)
            } else {
                eval(otherwise, ctx)
            }
        }
        Expr::Call(name, args) => {
            let function = functions::lookup(name)
                .ok_or_else(|| EvalError::UnknownFunction(name.clone()))?;
            let values = args
                .iter()
                .map(|arg| eval(arg, ctx))
                .collect::<EvalResult<Vec<_>>>()?;
            function.invoke(&values, ctx)
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, ctx: &CallContext<'_>) -> EvalResult<Value> {
    // Logical operators short-circuit.
    match op {
        BinaryOp::And => {
            return Ok(Value::Bool(
                operand_bool("&&", &eval(lhs, ctx)?)? && operand_bool("&&", &eval(rhs, ctx)?)?,
            ))
        }
        BinaryOp::Or => {
            return Ok(Value::Bool(
                operand_bool("||", &eval(lhs, ctx)?)? || operand_bool("||", &eval(rhs, ctx)?)?,
            ))
        }
        _ => {}
    }

    let left = eval(lhs, ctx)?;
    let right = eval(rhs, ctx)?;

    if let (BinaryOp::Eq | BinaryOp::NotEq, Value::Str(a), Value::Str(b)) = (op, &left, &right) {
        return Ok(Value::Bool((a == b) == (op == BinaryOp::Eq)));
    }

    let a = operand_number(op.symbol(), &left)?;
    let b = operand_number(op.symbol(), &right)?;
    let value = match op {
        BinaryOp::Add => Value::Number(a + b),
        BinaryOp::Sub => Value::Number(a - b),
        BinaryOp::Mul => Value::Number(a * b),
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => Value::Number(a / b),
        BinaryOp::Rem => Value::Number(a % b),
        BinaryOp::Eq => Value::Bool((a - b).abs() < f64::EPSILON),
        BinaryOp::NotEq => Value::Bool((a - b).abs() >= f64::EPSILON),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::LtEq => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::GtEq => Value::Bool(a >= b),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };
    Ok(value)
}

fn operand_number(operator: &str, value: &Value) -> EvalResult<f64> {
    value.as_number().ok_or_else(|| EvalError::ArgumentType {
        function: operator.to_string(),
        expected: "numeric",
    })
}

fn operand_bool(operator: &str, value: &Value) -> EvalResult<bool> {
    value.as_bool().ok_or_else(|| EvalError::ArgumentType {
        function: format!("{operator} ({} operand)", value.kind()),
        expected: "boolean",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, f64)]) -> Variables {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn create_test_engine() -> ExpressionEngine {
        ExpressionEngine::seeded(42)
    }

    #[test]
    fn test_building_plus_have() {
        let engine = create_test_engine();
        let result = engine
            .evaluate("building*2 + have('upgrade_x')", &vars(&[("building", 3.0)]))
            .unwrap();
        assert!((result - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stat_variables() {
        let engine = create_test_engine();
        let v = vars(&[("gold", 5.0), ("gold:max", 40.0), ("gold:ps", 2.0)]);
        assert!((engine.evaluate("gold:max / 4 + gold:ps", &v).unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_if_rewrite() {
        let engine = create_test_engine();
        let v = vars(&[("gold", 20.0), ("mine", 1.0)]);
        assert!((engine.evaluate("if (gold > 10 and have('mine')) gold * 2", &v).unwrap() - 40.0).abs() < 1e-9);
        assert!((engine.evaluate("if (gold > 10 and no('mine'))", &v).unwrap()).abs() < 1e-9);
        assert!((engine.evaluate("if (gold > 10 or no('mine'))", &v).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_boolean_result_coerced() {
        let engine = create_test_engine();
        let v = vars(&[("gold", 100.0)]);
        assert!((engine.evaluate("gold >= 100", &v).unwrap() - 1.0).abs() < f64::EPSILON);
        assert!(engine.evaluate_condition("gold >= 100", &v).unwrap());
        assert!(!engine.evaluate_condition("gold < 100", &v).unwrap());
    }

    #[test]
    fn test_errors() {
        let engine = create_test_engine();
        let v = vars(&[("gold", 1.0)]);
        assert_eq!(engine.evaluate("gold / 0", &v), Err(EvalError::DivisionByZero));
        assert_eq!(
            engine.evaluate("silver + 1", &v),
            Err(EvalError::UndefinedVariable("silver".into()))
        );
        assert_eq!(
            engine.evaluate("teleport(1)", &v),
            Err(EvalError::UnknownFunction("teleport".into()))
        );
        assert!(matches!(engine.evaluate("'text'", &v), Err(EvalError::ResultType("string"))));
        assert!(matches!(engine.evaluate("gold +", &v), Err(EvalError::Syntax { .. })));
        assert!(matches!(engine.evaluate("pow(10, 400)", &v), Err(EvalError::ResultType(_))));
    }

    #[test]
    fn test_deterministic_across_cache_hits() {
        let engine = create_test_engine();
        let v = vars(&[("count", 7.0)]);

        let first = engine.evaluate("pow(count, 2) + floor(count / 2)", &v).unwrap();
        assert_eq!(engine.cache().len(), 1);
        let second = engine.evaluate("pow(count, 2) + floor(count / 2)", &v).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());

        engine.cache().clear();
        let third = engine.evaluate("pow(count, 2) + floor(count / 2)", &v).unwrap();
        assert_eq!(first.to_bits(), third.to_bits());
    }

    #[test]
    fn test_cache_keyed_by_variables() {
        let engine = create_test_engine();
        assert!((engine.evaluate("count * 2", &vars(&[("count", 1.0)])).unwrap() - 2.0).abs() < 1e-9);
        assert!((engine.evaluate("count * 2", &vars(&[("count", 4.0)])).unwrap() - 8.0).abs() < 1e-9);
        assert_eq!(engine.cache().len(), 2);
    }

    #[test]
    fn test_cache_bounded_when_snapshots_change() {
        let engine = ExpressionEngine::new(
            Arc::new(FormulaCache::new()),
            Duration::ZERO,
            ChaCha8Rng::seed_from_u64(1),
        );
        for gold in 0..2001_u32 {
            let v = vars(&[("count", 2.0), ("gold", f64::from(gold))]);
            assert!((engine.evaluate("count * 3", &v).unwrap() - 6.0).abs() < 1e-9);
        }
        assert!(engine.cache().len() <= 64, "len = {}", engine.cache().len());
    }

    #[test]
    fn test_deeply_nested_formula_is_a_syntax_error() {
        let engine = create_test_engine();
        let deep = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
        assert!(matches!(
            engine.evaluate(&deep, &Variables::new()),
            Err(EvalError::Syntax { .. })
        ));
        let calls = format!("{}1{}", "abs(".repeat(100), ")".repeat(100));
        assert!(matches!(
            engine.evaluate(&calls, &Variables::new()),
            Err(EvalError::Syntax { .. })
        ));
    }

    #[test]
    fn test_random_formulas_not_memoized() {
        let engine = create_test_engine();
        let v = Variables::new();
        let _ = engine.evaluate("random(1, 100)", &v).unwrap();
        let _ = engine.evaluate("if (chance(50)) 3", &v).unwrap();
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn test_seeded_randomness_reproducible() {
        let v = Variables::new();
        let a: Vec<f64> = {
            let engine = ExpressionEngine::seeded(9);
            (0..10).map(|_| engine.evaluate("random(1, 1000)", &v).unwrap()).collect()
        };
        let b: Vec<f64> = {
            let engine = ExpressionEngine::seeded(9);
            (0..10).map(|_| engine.evaluate("random(1, 1000)", &v).unwrap()).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_shared_cache_between_engines() {
        let cache = Arc::new(FormulaCache::new());
        let a = ExpressionEngine::new(Arc::clone(&cache), DEFAULT_CACHE_TTL, ChaCha8Rng::seed_from_u64(1));
        let b = ExpressionEngine::new(Arc::clone(&cache), DEFAULT_CACHE_TTL, ChaCha8Rng::seed_from_u64(2));

        let _ = a.evaluate("1 + 1", &Variables::new()).unwrap();
        assert_eq!(b.cache().len(), 1);
    }

    #[test]
    fn test_ternary_and_strings() {
        let engine = create_test_engine();
        let v = vars(&[("prestige", 2.0)]);
        assert!((engine.evaluate("prestige > 1 ? 10 : 1", &v).unwrap() - 10.0).abs() < 1e-9);
        assert!((engine.evaluate("'a' == 'a'", &v).unwrap() - 1.0).abs() < 1e-9);
        assert!((engine.evaluate("-prestige + !false", &v).unwrap() + 1.0).abs() < 1e-9);
    }
}
