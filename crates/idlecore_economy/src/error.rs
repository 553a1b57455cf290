//! # Economy Error Types
//!
//! All errors that can occur in the economy system.
//!
//! ## Taxonomy
//!
//! - [`ParseError`] - malformed catalog entry. Fatal at startup.
//! - [`EvalError`] - a formula could not be evaluated. Contained: the
//!   affected effect or condition is skipped.
//! - [`EconomyError`] - a player command failed (not found, unaffordable,
//!   already owned). Returned to the caller, state untouched.

use thiserror::Error;

/// A catalog entry could not be converted into a content item.
///
/// Any `ParseError` aborts the whole catalog load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed {category}.{key}: {reason}")]
pub struct ParseError {
    /// Category of the offending item.
    pub category: String,
    /// Key of the offending item.
    pub key: String,
    /// What was wrong with it.
    pub reason: String,
}

impl ParseError {
    /// Creates a parse error for an item.
    #[must_use]
    pub fn new(category: &str, key: &str, reason: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while parsing or evaluating a formula.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The formula text is not valid syntax.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset into the (preprocessed) formula.
        offset: usize,
        /// Description of the problem.
        message: String,
    },

    /// A variable was referenced that the context does not provide.
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    /// A function was called that is not in the dispatch table.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A function was called with the wrong number of arguments.
    #[error("{function} expects {expected} argument(s), got {got}")]
    Arity {
        /// Function name.
        function: String,
        /// Human readable arity ("1", "1 or 2", "at least 2").
        expected: &'static str,
        /// Number of arguments supplied.
        got: usize,
    },

    /// A function or operator received an argument of the wrong kind.
    #[error("{function} expects {expected} argument(s)")]
    ArgumentType {
        /// Function or operator name.
        function: String,
        /// Expected kind ("numeric", "boolean", "string").
        expected: &'static str,
    },

    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// The formula produced a value that is neither numeric nor boolean.
    #[error("formula produced a non-numeric {0} result")]
    ResultType(&'static str),
}

/// Result type for formula evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors that can occur in the economy system.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EconomyError {
    /// Content key not present in the catalog.
    #[error("content not found: {key} in category {category}")]
    NotFound {
        /// Category that was searched.
        category: String,
        /// Key that was missing.
        key: String,
    },

    /// Player ID is not known.
    #[error("unknown player: {0}")]
    UnknownPlayer(String),

    /// Attempted to sell a building the player does not own.
    #[error("no {0} buildings to sell")]
    NothingToSell(String),

    /// Attempted to buy an upgrade twice.
    #[error("upgrade already owned: {0}")]
    AlreadyOwned(String),

    /// Player lacks the resources for a purchase.
    #[error("insufficient {resource}: need {required}, have {available}")]
    Unaffordable {
        /// Resource that was short.
        resource: String,
        /// Amount required.
        required: f64,
        /// Amount available.
        available: u64,
    },

    /// Prerequisite keys are missing.
    #[error("requirements not met for {key}: missing {missing:?}")]
    RequirementsNotMet {
        /// Item being bought.
        key: String,
        /// Required keys the player does not have.
        missing: Vec<String>,
    },

    /// Catalog could not be loaded.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EconomyError {
    /// Shorthand for a [`EconomyError::NotFound`].
    #[must_use]
    pub fn not_found(category: &str, key: &str) -> Self {
        Self::NotFound {
            category: category.to_string(),
            key: key.to_string(),
        }
    }
}

/// Result type for economy operations.
pub type EconomyResult<T> = Result<T, EconomyError>;
