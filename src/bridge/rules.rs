//! Forwarding rules: endpoints, compilation and matching.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::filter::{CompiledPattern, MessageFilter};
use crate::common::{ConfigError, FieldError, InboundMessage};
use crate::config::schema::{validate_object, FieldSpec, FieldType};
use crate::config::types::RuleConfig;

/// Allowed fields of a rule object.
pub const RULE_FIELDS: &[FieldSpec] = &[
    FieldSpec::required(
        "from",
        FieldType::String,
        "The client and a channel to forward messages from, as channel@client_id.",
    ),
    FieldSpec::required(
        "send_to",
        FieldType::String,
        "The client and a channel to forward messages to, as channel@client_id.",
    ),
    FieldSpec::optional(
        "nicknames",
        FieldType::StringList,
        "Forward messages only from specified nicknames.",
    ),
    FieldSpec::optional(
        "ignore_nicknames",
        FieldType::StringList,
        "Ignore forwarding messages from specific nicknames.",
    ),
    FieldSpec::optional(
        "regexp",
        FieldType::String,
        "Forward only messages whose text contains a match of this pattern.",
    ),
];

/// A room on a specific client, written `channel@client_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub channel: String,
    pub client_id: String,
}

impl Endpoint {
    pub fn new(channel: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            client_id: client_id.into(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Split on the last `@`, so channel names may themselves contain `@`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (channel, client_id) = s
            .rsplit_once('@')
            .ok_or_else(|| format!("'{}' must be written as channel@client_id", s))?;
        if channel.is_empty() {
            return Err(format!("'{}' has an empty channel", s));
        }
        if client_id.is_empty() {
            return Err(format!("'{}' has an empty client id", s));
        }
        Ok(Endpoint::new(channel, client_id))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.channel, self.client_id)
    }
}

/// A compiled forwarding rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub from: Endpoint,
    pub to: Endpoint,
    pub filter: MessageFilter,
}

impl Rule {
    /// Build a rule from its document form.
    pub fn from_config(config: RuleConfig) -> Result<Self, Vec<FieldError>> {
        let mut errors = Vec::new();

        let from = config
            .from
            .parse::<Endpoint>()
            .map_err(|e| errors.push(FieldError::new("from", e)))
            .ok();
        let to = config
            .send_to
            .parse::<Endpoint>()
            .map_err(|e| errors.push(FieldError::new("send_to", e)))
            .ok();
        let pattern = match config.regexp.as_deref() {
            Some(p) => CompiledPattern::new(p)
                .map_err(|e| errors.push(FieldError::new("regexp", format!("is not a valid regex: {}", e))))
                .ok(),
            None => None,
        };

        match (from, to) {
            (Some(from), Some(to)) if errors.is_empty() => Ok(Rule {
                from,
                to,
                filter: MessageFilter::new(config.nicknames, config.ignore_nicknames, pattern),
            }),
            _ => Err(errors),
        }
    }

    /// Whether `msg` should be forwarded by this rule.
    pub fn matches(&self, msg: &InboundMessage) -> bool {
        if self.from.client_id != msg.origin_client_id || self.from.channel != msg.origin_channel {
            return false;
        }
        match self.filter.check(&msg.author, &msg.text) {
            Ok(()) => true,
            Err(reason) => {
                debug!(from = %self.from, to = %self.to, author = %msg.author, ?reason, "Rule filtered message");
                false
            }
        }
    }
}

/// Ordered, immutable list of compiled rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validate and compile raw rule objects.
    ///
    /// Any structurally malformed rule fails the whole set. Rules whose
    /// `from` or `send_to` names a client for which `is_known` returns false
    /// are dropped with a warning.
    pub fn compile(raw: &[Value], is_known: impl Fn(&str) -> bool) -> Result<Self, ConfigError> {
        let mut compiled = Vec::with_capacity(raw.len());
        let mut failures = Vec::new();

        for (i, value) in raw.iter().enumerate() {
            let index = i + 1;
            match compile_one(value) {
                Ok(rule) => compiled.push((index, rule)),
                Err(errors) => failures.push(ConfigError::InvalidRule { index, errors }),
            }
        }

        if failures.len() == 1 {
            return Err(failures.remove(0));
        }
        if !failures.is_empty() {
            return Err(ConfigError::Multiple(failures));
        }

        let mut rules = Vec::with_capacity(compiled.len());
        for (index, rule) in compiled {
            let missing: Vec<&str> = [rule.from.client_id.as_str(), rule.to.client_id.as_str()]
                .into_iter()
                .filter(|id| !is_known(id))
                .collect();
            if missing.is_empty() {
                rules.push(rule);
                continue;
            }
            for client_id in missing {
                warn!(
                    "The client '{}' is specified in rule #{} ({} -> {}), but is not configured. This rule will be ignored.",
                    client_id, index, rule.from, rule.to
                );
            }
        }

        info!("Compiled {} forwarding rule(s)", rules.len());
        Ok(Self { rules })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_one(value: &Value) -> Result<Rule, Vec<FieldError>> {
    let errors = validate_object(value, RULE_FIELDS);
    if !errors.is_empty() {
        return Err(errors);
    }
    let config: RuleConfig = serde_json::from_value(value.clone())
        .map_err(|e| vec![FieldError::new("<root>", e.to_string())])?;
    Rule::from_config(config)
}
