//! Rule matching engine.
//!
//! Rules come from the config file and are checked in declared order:
//! - a `conditions` rule matches when every condition holds (AND)
//! - a `regex` rule matches when its pattern is found anywhere in the text
//! - a rule with neither matches every message
//!
//! The first matching rule wins and its target channels are returned.
//! All keyword and regex checks are case-insensitive.

use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::config::{ConditionConfig, Config, RuleConfig};
use crate::error::ConfigError;

/// One entry of a rule's AND-combined condition list.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Case-insensitive substring containment.
    Keyword(String),
    /// Compiled case-insensitive regex, matched anywhere in the text.
    Regex(Regex),
}

impl Condition {
    fn holds(&self, text: &str) -> bool {
        match self {
            Condition::Keyword(keyword) => {
                text.to_lowercase().contains(&keyword.to_lowercase())
            }
            Condition::Regex(regex) => regex.is_match(text),
        }
    }
}

/// How a rule decides whether a message matches.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Every condition must hold. Never empty.
    Conditions(Vec<Condition>),
    /// A single compiled regex.
    Regex(Regex),
    /// Matches every message.
    Always,
}

/// A routing rule: a predicate plus the channels a match is relayed to.
#[derive(Debug, Clone)]
pub struct Rule {
    /// What the message text must satisfy.
    pub predicate: Predicate,
    /// Channels a matching message is posted to. May be empty, which
    /// makes the rule swallow matching messages.
    pub targets: Vec<String>,
}

impl Rule {
    fn matches(&self, text: &str) -> bool {
        match &self.predicate {
            Predicate::Conditions(conditions) => conditions.iter().all(|c| c.holds(text)),
            Predicate::Regex(regex) => regex.is_match(text),
            Predicate::Always => true,
        }
    }
}

/// Ordered rules plus the channel they watch. Compiled once at startup,
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Channel id the rules apply to.
    pub source_channel: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile the raw config rules into their typed form, validating the
    /// shape of every rule and condition.
    pub fn compile(config: &Config) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for (index, raw) in config.rules.iter().enumerate() {
            rules.push(compile_rule(index, raw)?);
        }

        Ok(Self {
            source_channel: config.source_channel.clone(),
            rules,
        })
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate `text` against the rules in declared order.
    ///
    /// Returns the first matching rule's targets. An empty slice is a real
    /// match whose rule has nowhere to relay to; `None` means no rule
    /// matched at all.
    pub fn evaluate(&self, text: &str) -> Option<&[String]> {
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.matches(text) {
                info!(rule = index, targets = ?rule.targets, "Rule matched");
                return Some(&rule.targets);
            }
            debug!(rule = index, "Rule did not match");
        }

        debug!("No rule matched");
        None
    }
}

fn compile_rule(index: usize, raw: &RuleConfig) -> Result<Rule, ConfigError> {
    let predicate = match (&raw.conditions, &raw.regex) {
        (Some(_), Some(_)) => {
            return Err(invalid(
                index,
                "a rule takes either `conditions` or `regex`, not both",
            ));
        }
        (Some(conditions), None) => {
            if conditions.is_empty() {
                return Err(invalid(index, "`conditions` must not be empty"));
            }
            let compiled = conditions
                .iter()
                .map(|condition| compile_condition(index, condition))
                .collect::<Result<Vec<_>, _>>()?;
            Predicate::Conditions(compiled)
        }
        (None, Some(pattern)) => Predicate::Regex(compile_regex(index, pattern)?),
        (None, None) => Predicate::Always,
    };

    Ok(Rule {
        predicate,
        targets: raw.target_channels.clone(),
    })
}

fn compile_condition(index: usize, raw: &ConditionConfig) -> Result<Condition, ConfigError> {
    match (&raw.keyword, &raw.regex) {
        (Some(_), Some(_)) => Err(invalid(
            index,
            "a condition takes either `keyword` or `regex`, not both",
        )),
        (Some(keyword), None) => Ok(Condition::Keyword(keyword.clone())),
        (None, Some(pattern)) => Ok(Condition::Regex(compile_regex(index, pattern)?)),
        (None, None) => Err(invalid(index, "a condition needs a `keyword` or a `regex`")),
    }
}

fn compile_regex(index: usize, pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| invalid(index, &format!("bad regex `{pattern}`: {e}")))
}

fn invalid(index: usize, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: format!("rules[{index}]"),
        message: message.to_string(),
    }
}
