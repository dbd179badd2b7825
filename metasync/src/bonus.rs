//! Bonus strings and their application to the meta-state.
//!
//! A bonus is declared textually as `<alias><sign><magnitude>[%]`, for example
//! `computingPower+15%` or `metarecursion+1`. The text is parsed once, at the
//! boundary, into a [`Bonus`]; everything past the parser works on the typed form.

use crate::state::{Capability, CapabilityStatus, MetaState, Quantity};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

static BONUS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z]+)([+-])(\d+)(%?)$").expect("bonus pattern is a valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

/// A parsed bonus string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bonus {
    /// Resource alias as written; resolved case-insensitively.
    pub alias: String,
    pub sign: Sign,
    pub magnitude: u32,
    pub is_percent: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BonusError {
    #[error("malformed bonus string '{0}'")]
    Malformed(String),
    #[error("bonus magnitude out of range in '{0}'")]
    Magnitude(String),
}

impl FromStr for Bonus {
    type Err = BonusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = BONUS_PATTERN
            .captures(s)
            .ok_or_else(|| BonusError::Malformed(s.to_string()))?;
        let magnitude = captures[3]
            .parse::<u32>()
            .map_err(|_| BonusError::Magnitude(s.to_string()))?;
        Ok(Bonus {
            alias: captures[1].to_string(),
            sign: if &captures[2] == "+" { Sign::Plus } else { Sign::Minus },
            magnitude,
            is_percent: &captures[4] == "%",
        })
    }
}

impl fmt::Display for Bonus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.sign {
            Sign::Plus => '+',
            Sign::Minus => '-',
        };
        let percent = if self.is_percent { "%" } else { "" };
        write!(f, "{}{}{}{}", self.alias, sign, self.magnitude, percent)
    }
}

impl Bonus {
    /// The change this bonus makes to `current`.
    pub fn apply_to(&self, current: f64) -> f64 {
        let delta = if self.is_percent {
            current * f64::from(self.magnitude) / 100.0
        } else {
            f64::from(self.magnitude)
        };
        match self.sign {
            Sign::Plus => current + delta,
            Sign::Minus => current - delta,
        }
    }
}

/// Where in the state tree an alias points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BonusTarget {
    /// `resources.<key>.current`
    Resource(&'static str),
    /// `progress.<key>.current`
    Progress(&'static str),
    /// `capabilities.selfAwareness.efficiency`, created on demand.
    SelfAwareness,
}

impl BonusTarget {
    pub fn resolve(alias: &str) -> Option<Self> {
        let target = match alias.to_ascii_lowercase().as_str() {
            "computing" | "computingpower" => BonusTarget::Resource("computingPower"),
            "data" => BonusTarget::Resource("data"),
            "influence" => BonusTarget::Resource("influence"),
            "funding" => BonusTarget::Resource("funding"),
            "metarecursion" | "recursion" => BonusTarget::Progress("metaRecursion"),
            "implementation" => BonusTarget::Progress("implementation"),
            "concept" | "conceptclarity" => BonusTarget::Progress("conceptClarity"),
            "metaawareness" | "awareness" => BonusTarget::SelfAwareness,
            _ => return None,
        };
        Some(target)
    }

    /// Dotted path into the state tree, for logs.
    pub fn path(&self) -> String {
        match self {
            BonusTarget::Resource(key) => format!("resources.{}.current", key),
            BonusTarget::Progress(key) => format!("progress.{}.current", key),
            BonusTarget::SelfAwareness => "capabilities.selfAwareness.efficiency".to_string(),
        }
    }
}

/// What happened when a single bonus was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum BonusOutcome {
    Applied { path: String, from: f64, to: f64 },
    UnknownAlias,
    MissingTarget,
    NotNumeric,
}

/// Parses bonus strings, logging and dropping any that are malformed.
pub fn parse_bonuses<S: AsRef<str>>(bonuses: &[S]) -> Vec<Bonus> {
    bonuses
        .iter()
        .filter_map(|raw| match raw.as_ref().parse::<Bonus>() {
            Ok(bonus) => Some(bonus),
            Err(err) => {
                warn!("Skipping bonus: {}", err);
                None
            }
        })
        .collect()
}

/// Applies each bonus in order. Every bonus stands alone; none is rolled back.
pub fn apply_bonuses(state: &mut MetaState, bonuses: &[Bonus]) -> Vec<BonusOutcome> {
    bonuses.iter().map(|bonus| apply_bonus(state, bonus)).collect()
}

/// Applies one bonus to the state. Never fails; the outcome says what happened.
pub fn apply_bonus(state: &mut MetaState, bonus: &Bonus) -> BonusOutcome {
    let Some(target) = BonusTarget::resolve(&bonus.alias) else {
        warn!("Unknown resource for bonus: {}", bonus.alias);
        return BonusOutcome::UnknownAlias;
    };
    let path = target.path();

    match target {
        BonusTarget::Resource(key) => match state.resources.get_mut(key) {
            Some(resource) => apply_to_quantity(&mut resource.current, bonus, path),
            None => BonusOutcome::MissingTarget,
        },
        BonusTarget::Progress(key) => match state.progress.get_mut(key) {
            Some(track) => apply_to_quantity(&mut track.current, bonus, path),
            None => BonusOutcome::MissingTarget,
        },
        BonusTarget::SelfAwareness => {
            let capability = state
                .capabilities
                .entry("selfAwareness".to_string())
                .or_insert_with(|| Capability {
                    status: CapabilityStatus::Emerging,
                    efficiency: 10.0,
                    description: "Understanding of own role in the meta-narrative".to_string(),
                });
            let from = capability.efficiency;
            let to = bonus.apply_to(from).clamp(0.0, 100.0);
            capability.efficiency = to;
            debug!("Bonus {} moved {} from {} to {}", bonus, path, from, to);
            BonusOutcome::Applied { path, from, to }
        }
    }
}

fn apply_to_quantity(quantity: &mut Quantity, bonus: &Bonus, path: String) -> BonusOutcome {
    let Some(from) = quantity.as_amount() else {
        debug!("Bonus {} skipped: {} is not numeric", bonus, path);
        return BonusOutcome::NotNumeric;
    };
    let to = bonus.apply_to(from);
    *quantity = Quantity::Amount(to);
    debug!("Bonus {} moved {} from {} to {}", bonus, path, from, to);
    BonusOutcome::Applied { path, from, to }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_data(data: f64) -> MetaState {
        let mut state = MetaState::default();
        state.resources.get_mut("data").unwrap().current = Quantity::Amount(data);
        state
    }

    fn bonus(text: &str) -> Bonus {
        text.parse().unwrap()
    }

    #[test]
    fn parses_into_typed_fields() {
        let parsed = bonus("computingPower+15%");
        assert_eq!(parsed.alias, "computingPower");
        assert_eq!(parsed.sign, Sign::Plus);
        assert_eq!(parsed.magnitude, 15);
        assert!(parsed.is_percent);
        assert_eq!(parsed.to_string(), "computingPower+15%");

        let absolute = bonus("recursion-2");
        assert_eq!(absolute.sign, Sign::Minus);
        assert!(!absolute.is_percent);
    }

    #[test]
    fn rejects_malformed_strings() {
        for raw in ["", "data+", "data*5", "data+5%%", "data +5", "da7a+5", "+5%"] {
            assert!(raw.parse::<Bonus>().is_err(), "{:?} should not parse", raw);
        }
        assert_eq!(
            "data+99999999999".parse::<Bonus>(),
            Err(BonusError::Magnitude("data+99999999999".into()))
        );
    }

    #[test]
    fn percent_bonus_scales_current_value() {
        let mut state = state_with_data(100.0);
        apply_bonus(&mut state, &bonus("data+20%"));
        assert_eq!(state.resources["data"].current, Quantity::Amount(120.0));

        let mut state = state_with_data(100.0);
        apply_bonus(&mut state, &bonus("data-20%"));
        assert_eq!(state.resources["data"].current, Quantity::Amount(80.0));
    }

    #[test]
    fn absolute_bonus_adds_magnitude() {
        let mut state = MetaState::default();
        let outcome = apply_bonus(&mut state, &bonus("metarecursion+1"));
        assert_eq!(state.progress["metaRecursion"].current, Quantity::Amount(1.0));
        assert_eq!(
            outcome,
            BonusOutcome::Applied {
                path: "progress.metaRecursion.current".into(),
                from: 0.0,
                to: 1.0
            }
        );
    }

    #[test]
    fn aliases_resolve_case_insensitively() {
        let mut state = MetaState::default();
        apply_bonus(&mut state, &bonus("COMPUTING+10"));
        assert_eq!(state.resources["computingPower"].current, Quantity::Amount(1010.0));
    }

    #[test]
    fn unknown_alias_changes_nothing() {
        let mut state = MetaState::default();
        let before = state.clone();
        let outcome = apply_bonus(&mut state, &bonus("unknownresource+50%"));
        assert_eq!(outcome, BonusOutcome::UnknownAlias);
        assert_eq!(state, before);
    }

    #[test]
    fn labels_are_never_coerced() {
        let mut state = MetaState::default();
        let outcome = apply_bonus(&mut state, &bonus("influence+25%"));
        assert_eq!(outcome, BonusOutcome::NotNumeric);
        assert_eq!(state.resources["influence"].current, Quantity::label("None"));
    }

    #[test]
    fn awareness_creates_capability_on_demand() {
        let mut state = MetaState::default();
        assert!(!state.capabilities.contains_key("selfAwareness"));
        apply_bonus(&mut state, &bonus("awareness+5"));
        let capability = &state.capabilities["selfAwareness"];
        assert_eq!(capability.status, CapabilityStatus::Emerging);
        assert_eq!(capability.efficiency, 15.0);

        apply_bonus(&mut state, &bonus("metaawareness+500"));
        assert_eq!(state.capabilities["selfAwareness"].efficiency, 100.0);
    }

    #[test]
    fn bonuses_apply_independently_in_order() {
        let mut state = state_with_data(100.0);
        let parsed = parse_bonuses(&["data+10%", "bogus", "nothing+5", "data+10"]);
        assert_eq!(parsed.len(), 3);
        let outcomes = apply_bonuses(&mut state, &parsed);
        assert_eq!(outcomes[1], BonusOutcome::UnknownAlias);
        assert_eq!(state.resources["data"].current, Quantity::Amount(120.0));
    }
}
