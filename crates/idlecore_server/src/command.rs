//! Text commands for the thin CLI.
//!
//! One command per line, verb first, case-insensitive:
//! `buy mine`, `sell mine`, `prestige`, `status`.

use crate::error::{ServiceError, ServiceResult};

/// Help text listing every verb.
pub const HELP: &str = "\
commands:
  create            create the player
  buy <key>         buy an upgrade or one building
  sell <key>        sell one building for half its base cost
  prestige          reset progress for a prestige level
  status            full player summary
  resources         resource balances
  buildings         building counts
  help              this text";

/// A parsed player command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create the player.
    Create,
    /// Buy an upgrade or building.
    Buy(String),
    /// Sell one building.
    Sell(String),
    /// Perform prestige.
    Prestige,
    /// Full summary.
    Status,
    /// Resource balances.
    Resources,
    /// Building counts.
    Buildings,
    /// Show [`HELP`].
    Help,
}

impl Command {
    /// Parses one line.
    ///
    /// # Errors
    ///
    /// [`ServiceError::BadCommand`] for an empty line, an unknown verb, a
    /// missing key or trailing arguments.
    pub fn parse(line: &str) -> ServiceResult<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ServiceError::BadCommand("empty command".into()));
        };
        let verb = verb.to_ascii_lowercase();
        let arg = words.next();
        if let Some(extra) = words.next() {
            return Err(ServiceError::BadCommand(format!("unexpected argument {extra:?}")));
        }

        let command = match (verb.as_str(), arg) {
            ("buy", Some(key)) => Self::Buy(key.to_string()),
            ("sell", Some(key)) => Self::Sell(key.to_string()),
            ("buy" | "sell", None) => {
                return Err(ServiceError::BadCommand(format!("{verb} needs an item key")));
            }
            ("create", None) => Self::Create,
            ("prestige", None) => Self::Prestige,
            ("status", None) => Self::Status,
            ("resources", None) => Self::Resources,
            ("buildings", None) => Self::Buildings,
            ("help" | "?", None) => Self::Help,
            (_, Some(arg)) if is_nullary(&verb) => {
                return Err(ServiceError::BadCommand(format!("{verb} takes no argument, got {arg:?}")));
            }
            _ => return Err(ServiceError::BadCommand(format!("unknown command {verb:?}"))),
        };
        Ok(command)
    }
}

fn is_nullary(verb: &str) -> bool {
    matches!(
        verb,
        "create" | "prestige" | "status" | "resources" | "buildings" | "help" | "?"
    )
}
