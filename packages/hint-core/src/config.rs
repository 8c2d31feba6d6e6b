//! Run configuration and its one-time resolution.
//!
//! [`HintConfig`] mirrors the configuration file:
//!
//! ```json
//! {
//!   "hints": {
//!     "no-http-redirects": ["warning", { "max-html-redirects": 1 }],
//!     "sri": "error",
//!     "apple-touch-icons": "off"
//!   },
//!   "hintsOptions": { "timeout": 5000 },
//!   "browserslist": ["last 2 versions", "ie 10"],
//!   "ignoredUrls": [{ "domain": "^https://example\\.com/.*", "hints": ["sri"] }],
//!   "language": "en-US"
//! }
//! ```
//!
//! [`ConfigResolver::resolve`] turns it into immutable per-rule
//! [`RuleOptions`] and compiled ignore rules once, at run start. Any bad
//! severity or pattern fails the whole run before an event is published.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::rule::RuleMeta;
use crate::severity::SeveritySetting;

/// Language used when the configuration does not name one.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Rule id wildcard in ignore entries.
pub const ALL_RULES: &str = "*";

/// Raw per-rule setting: `"warning"` or `["warning", { ...options }]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleSetting {
    Severity(String),
    WithOptions(String, Value),
}

impl RuleSetting {
    fn severity(&self) -> &str {
        match self {
            RuleSetting::Severity(severity) | RuleSetting::WithOptions(severity, _) => severity,
        }
    }

    fn options(&self) -> Option<&Value> {
        match self {
            RuleSetting::Severity(_) => None,
            RuleSetting::WithOptions(_, options) => Some(options),
        }
    }
}

/// URLs whose findings are suppressed for some rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoredUrl {
    /// Regular expression matched against the whole URL
    #[serde(alias = "pattern", alias = "urlPattern")]
    pub domain: String,
    /// Rule ids, or `"*"` for every rule
    #[serde(alias = "ruleIds")]
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintConfig {
    #[serde(default)]
    pub hints: BTreeMap<String, RuleSetting>,

    /// Options merged under every rule's explicit options.
    #[serde(default)]
    pub hints_options: Map<String, Value>,

    /// Target-browser identifiers.
    #[serde(default)]
    pub browserslist: Vec<String>,

    #[serde(default)]
    pub ignored_urls: Vec<IgnoredUrl>,

    #[serde(default)]
    pub language: Option<String>,
}

impl HintConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Set a rule's severity (`off`, `default`, `hint`, `warning`, `error`).
    pub fn with_rule(mut self, rule_id: impl Into<String>, severity: impl Into<String>) -> Self {
        self.hints
            .insert(rule_id.into(), RuleSetting::Severity(severity.into()));
        self
    }

    /// Set a rule's severity together with explicit options.
    pub fn with_rule_options(
        mut self,
        rule_id: impl Into<String>,
        severity: impl Into<String>,
        options: Value,
    ) -> Self {
        self.hints.insert(
            rule_id.into(),
            RuleSetting::WithOptions(severity.into(), options),
        );
        self
    }

    pub fn with_global_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.hints_options.insert(key.into(), value);
        self
    }

    pub fn with_browsers(mut self, browsers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.browserslist = browsers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ignored_url(
        mut self,
        pattern: impl Into<String>,
        rule_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.ignored_urls.push(IgnoredUrl {
            domain: pattern.into(),
            hints: rule_ids.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Resolved, immutable configuration for one rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOptions {
    pub rule_id: String,
    pub severity: SeveritySetting,
    /// Built-in defaults, overridden by global options, overridden by explicit options
    pub options: Map<String, Value>,
    pub targeted_browsers: Vec<String>,
    pub language: String,
}

#[derive(Debug)]
enum RuleSet {
    All,
    Only(HashSet<String>),
}

impl RuleSet {
    fn contains(&self, rule_id: &str) -> bool {
        match self {
            RuleSet::All => true,
            RuleSet::Only(ids) => ids.contains(rule_id),
        }
    }
}

/// A compiled ignore entry.
#[derive(Debug)]
pub struct IgnoreRule {
    pattern: Regex,
    rules: RuleSet,
}

impl IgnoreRule {
    pub fn new(pattern: &str, rule_ids: &[String]) -> Result<Self, ConfigError> {
        // Matched anywhere in the URL; patterns carry their own anchors.
        let compiled = Regex::new(pattern).map_err(|source| {
            ConfigError::InvalidIgnorePattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        let rules = if rule_ids.iter().any(|id| id == ALL_RULES) {
            RuleSet::All
        } else {
            RuleSet::Only(rule_ids.iter().cloned().collect())
        };

        Ok(Self {
            pattern: compiled,
            rules,
        })
    }

    pub fn suppresses(&self, rule_id: &str, url: &str) -> bool {
        self.rules.contains(rule_id) && self.pattern.is_match(url)
    }
}

/// Per-run configuration, resolved once.
#[derive(Debug)]
pub struct ConfigResolver {
    rules: HashMap<String, Arc<RuleOptions>>,
    ignores: Vec<IgnoreRule>,
    targeted_browsers: Vec<String>,
    language: String,
}

impl ConfigResolver {
    /// Resolve options for every registered rule and compile ignore patterns.
    pub fn resolve(config: &HintConfig, rules: &[RuleMeta]) -> Result<Self, ConfigError> {
        let language = config
            .language
            .clone()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let ignores = config
            .ignored_urls
            .iter()
            .map(|entry| IgnoreRule::new(&entry.domain, &entry.hints))
            .collect::<Result<Vec<_>, _>>()?;

        let mut resolved = HashMap::with_capacity(rules.len());
        for meta in rules {
            let setting = config.hints.get(&meta.id);

            let severity = match setting {
                Some(setting) => setting.severity().parse::<SeveritySetting>()?,
                None => SeveritySetting::Default,
            };

            let mut options = meta.default_options.clone();
            options.extend(config.hints_options.clone());
            match setting.and_then(RuleSetting::options) {
                Some(Value::Object(explicit)) => options.extend(explicit.clone()),
                Some(Value::Null) | None => {}
                Some(_) => {
                    return Err(ConfigError::OptionsNotObject {
                        rule_id: meta.id.clone(),
                    })
                }
            }

            debug!(
                rule = %meta.id,
                severity = %severity,
                options = options.len(),
                "resolved rule options"
            );

            resolved.insert(
                meta.id.clone(),
                Arc::new(RuleOptions {
                    rule_id: meta.id.clone(),
                    severity,
                    options,
                    targeted_browsers: config.browserslist.clone(),
                    language: language.clone(),
                }),
            );
        }

        // Settings for rules that were never registered are still validated.
        for (rule_id, setting) in &config.hints {
            if !resolved.contains_key(rule_id) {
                setting.severity().parse::<SeveritySetting>()?;
                warn!(rule = %rule_id, "configured rule is not registered");
            }
        }

        Ok(Self {
            rules: resolved,
            ignores,
            targeted_browsers: config.browserslist.clone(),
            language,
        })
    }

    pub fn options_for(&self, rule_id: &str) -> Option<Arc<RuleOptions>> {
        self.rules.get(rule_id).cloned()
    }

    /// True when the rule's severity setting is `off`.
    pub fn is_disabled(&self, rule_id: &str) -> bool {
        self.rules
            .get(rule_id)
            .is_some_and(|options| options.severity.is_off())
    }

    /// True when any ignore entry lists `rule_id` and matches `url`.
    pub fn is_ignored(&self, rule_id: &str, url: &str) -> bool {
        self.ignores.iter().any(|rule| rule.suppresses(rule_id, url))
    }

    pub fn targeted_browsers(&self) -> &[String] {
        &self.targeted_browsers
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}
