//! Core types for locator system

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::LocatorError;

/// Locator strategy enumeration
///
/// How the driver interprets a locator value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorStrategy {
    /// CSS selector
    Css,

    /// XPath expression
    XPath,

    /// Element id attribute
    Id,

    /// Element name attribute
    Name,

    /// Visible text content
    Text,

    /// ARIA role / accessible name
    Aria,
}

impl LocatorStrategy {
    /// Get strategy name as string
    pub fn name(&self) -> &'static str {
        match self {
            LocatorStrategy::Css => "css",
            LocatorStrategy::XPath => "xpath",
            LocatorStrategy::Id => "id",
            LocatorStrategy::Name => "name",
            LocatorStrategy::Text => "text",
            LocatorStrategy::Aria => "aria",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Some(match prefix.to_ascii_lowercase().as_str() {
            "css" => LocatorStrategy::Css,
            "xpath" => LocatorStrategy::XPath,
            "id" => LocatorStrategy::Id,
            "name" => LocatorStrategy::Name,
            "text" => LocatorStrategy::Text,
            "aria" => LocatorStrategy::Aria,
            _ => return None,
        })
    }
}

/// One way of finding an element, written `strategy=value`.
///
/// A value without a known prefix is a CSS selector, or XPath when it starts
/// with `/` or `(`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl Locator {
    pub fn new(strategy: LocatorStrategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::Css, value)
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::XPath, value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::Text, value)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy.name(), self.value)
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(LocatorError::InvalidDefinition("empty locator".into()));
        }
        if let Some((prefix, value)) = raw.split_once('=') {
            if let Some(strategy) = LocatorStrategy::from_prefix(prefix.trim()) {
                let value = value.trim();
                if value.is_empty() {
                    return Err(LocatorError::InvalidDefinition(format!(
                        "locator '{raw}' has no value"
                    )));
                }
                return Ok(Locator::new(strategy, value));
            }
        }
        if raw.starts_with('/') || raw.starts_with('(') {
            Ok(Locator::xpath(raw))
        } else {
            Ok(Locator::css(raw))
        }
    }
}

impl TryFrom<String> for Locator {
    type Error = LocatorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locator> for String {
    fn from(value: Locator) -> Self {
        value.to_string()
    }
}

/// Opaque handle to a located element, produced by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRef(pub String);

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Candidate locators for one logical UI target, in preference order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorSet {
    pub logical_name: String,
    pub candidates: Vec<Locator>,
}

impl LocatorSet {
    pub fn new(logical_name: impl Into<String>, candidates: Vec<Locator>) -> Self {
        Self {
            logical_name: logical_name.into(),
            candidates,
        }
    }

    pub fn validate(&self) -> Result<(), LocatorError> {
        validate_candidates(&self.logical_name, &self.candidates)
    }
}

pub(crate) fn validate_candidates(
    logical_name: &str,
    candidates: &[Locator],
) -> Result<(), LocatorError> {
    if logical_name.trim().is_empty() {
        return Err(LocatorError::InvalidDefinition("empty logical name".into()));
    }
    if candidates.is_empty() {
        return Err(LocatorError::InvalidDefinition(format!(
            "'{logical_name}' has no candidate locators"
        )));
    }
    if let Some(blank) = candidates.iter().find(|c| c.value.trim().is_empty()) {
        return Err(LocatorError::InvalidDefinition(format!(
            "'{logical_name}' has a blank {} locator",
            blank.strategy.name()
        )));
    }
    Ok(())
}

/// Per-probe context handed to the driver.
#[derive(Debug, Clone)]
pub struct ProbeCtx {
    /// Time the probe may take before it is abandoned.
    pub budget: Duration,
    /// Fired when the probe lost the race or the caller gave up.
    pub cancel: CancellationToken,
}

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveSource {
    Cache,
    Race,
}

/// Successful resolution
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub logical_name: String,
    pub locator: Locator,
    pub element: ElementRef,
    pub source: ResolveSource,
    pub elapsed: Duration,
    /// Per-probe budget used for the race.
    pub budget: Duration,
}

impl ResolvedTarget {
    pub fn from_cache(&self) -> bool {
        self.source == ResolveSource::Cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_and_bare_locators() {
        let l: Locator = "text=Save order".parse().unwrap();
        assert_eq!(l, Locator::text("Save order"));
        let l: Locator = "button.primary".parse().unwrap();
        assert_eq!(l.strategy, LocatorStrategy::Css);
        let l: Locator = "//form//button[1]".parse().unwrap();
        assert_eq!(l.strategy, LocatorStrategy::XPath);
        let l: Locator = "input[name=email]".parse().unwrap();
        assert_eq!(l, Locator::css("input[name=email]"));
        assert!("id=".parse::<Locator>().is_err());
        assert!("  ".parse::<Locator>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let l = Locator::new(LocatorStrategy::Aria, "button[name='Submit']");
        assert_eq!(l.to_string().parse::<Locator>().unwrap(), l);
    }

    #[test]
    fn set_validation() {
        assert!(LocatorSet::new("submit", vec![Locator::css("#go")]).validate().is_ok());
        assert!(LocatorSet::new("", vec![Locator::css("#go")]).validate().is_err());
        assert!(LocatorSet::new("submit", vec![]).validate().is_err());
        assert!(LocatorSet::new("submit", vec![Locator::css(" ")]).validate().is_err());
    }
}
