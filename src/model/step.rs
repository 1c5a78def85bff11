use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Opaque identifier shared by a step's structural ref and its data payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        StepId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        StepId(s.to_string())
    }
}

/// Identifier of a trigger/action definition in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionId(String);

impl DefinitionId {
    pub fn new(id: impl Into<String>) -> Self {
        DefinitionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DefinitionId {
    fn from(s: &str) -> Self {
        DefinitionId(s.to_string())
    }
}

/// The parent of an action step: either the workflow root or another step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentId {
    Root,
    Step(StepId),
}

impl ParentId {
    pub fn step(&self) -> Option<&StepId> {
        match self {
            ParentId::Root => None,
            ParentId::Step(id) => Some(id),
        }
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentId::Root => f.write_str("root"),
            ParentId::Step(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for ParentId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("root") {
            Ok(ParentId::Root)
        } else {
            Ok(ParentId::Step(StepId::new(s)))
        }
    }
}

/// Which slot of its parent a step occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    /// The single branch of the workflow root
    Root,
    /// Plain sequential body (e.g. a group step)
    Sequential,
    /// Taken when a conditional evaluates true
    ConditionalTrue,
    /// Taken when a conditional evaluates false
    ConditionalFalse,
    /// Repeated once per loop iteration
    LoopBody,
}

impl BranchKind {
    /// Short label used by the CLI and outline output
    pub fn label(self) -> &'static str {
        match self {
            BranchKind::Root => "root",
            BranchKind::Sequential => "body",
            BranchKind::ConditionalTrue => "then",
            BranchKind::ConditionalFalse => "else",
            BranchKind::LoopBody => "loop",
        }
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown branch kind: {0} (expected root, body, then, else or loop)")]
pub struct ParseBranchError(String);

impl FromStr for BranchKind {
    type Err = ParseBranchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "root" => Ok(BranchKind::Root),
            "body" | "sequential" => Ok(BranchKind::Sequential),
            "then" | "true" => Ok(BranchKind::ConditionalTrue),
            "else" | "false" => Ok(BranchKind::ConditionalFalse),
            "loop" => Ok(BranchKind::LoopBody),
            _ => Err(ParseBranchError(s.to_string())),
        }
    }
}

/// A sibling group: every child of `parent` that sits in `branch`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub parent: ParentId,
    pub branch: BranchKind,
}

impl GroupKey {
    pub fn new(parent: ParentId, branch: BranchKind) -> Self {
        GroupKey { parent, branch }
    }

    pub fn root() -> Self {
        GroupKey {
            parent: ParentId::Root,
            branch: BranchKind::Root,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.branch)
    }
}

/// Structural record of an action step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStepRef {
    pub id: StepId,
    pub parent: ParentId,
    pub branch: BranchKind,
    pub position: usize,
}

impl ActionStepRef {
    pub fn group(&self) -> GroupKey {
        GroupKey::new(self.parent.clone(), self.branch)
    }
}

/// A single configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ConfigValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            ConfigValue::Bool(_) => FieldKind::Bool,
            ConfigValue::Number(_) => FieldKind::Number,
            ConfigValue::Text(_) => FieldKind::Text,
        }
    }

    /// Parse a CLI-style literal: `true`/`false`, a number, or plain text
    pub fn parse_literal(raw: &str) -> Self {
        match raw {
            "true" => ConfigValue::Bool(true),
            "false" => ConfigValue::Bool(false),
            _ => match raw.parse::<f64>() {
                Ok(n) if n.is_finite() => ConfigValue::Number(n),
                _ => ConfigValue::Text(raw.to_string()),
            },
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Number(n) => write!(f, "{}", n),
            ConfigValue::Text(s) => f.write_str(s),
        }
    }
}

/// Declared type of a configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Bool,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Text => f.write_str("text"),
            FieldKind::Number => f.write_str("number"),
            FieldKind::Bool => f.write_str("bool"),
        }
    }
}

/// Per-action configuration, interpreted through the schema of `definition`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub definition: DefinitionId,
    #[serde(default)]
    pub values: IndexMap<String, ConfigValue>,
}

impl Configuration {
    pub fn empty(definition: DefinitionId) -> Self {
        Configuration {
            definition,
            values: IndexMap::new(),
        }
    }
}

/// Content payload of an action step, keyed by the same id as its ref
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStepData {
    pub id: StepId,
    pub definition: DefinitionId,
    pub title: String,
    #[serde(default)]
    pub comment: String,
    pub configuration: Configuration,
}

impl ActionStepData {
    /// New step data with an empty configuration for `definition`
    pub fn new(id: StepId, definition: DefinitionId, title: impl Into<String>) -> Self {
        ActionStepData {
            id,
            configuration: Configuration::empty(definition.clone()),
            definition,
            title: title.into(),
            comment: String::new(),
        }
    }

    /// Current value of an editable field
    pub fn field_value(&self, field: &StepField) -> Option<FieldValue> {
        match field {
            StepField::Title => Some(FieldValue::Text(self.title.clone())),
            StepField::Comment => Some(FieldValue::Text(self.comment.clone())),
            StepField::Config(key) => Some(match self.configuration.values.get(key) {
                Some(v) => FieldValue::Config(v.clone()),
                None => FieldValue::Unset,
            }),
        }
    }
}

/// The workflow's single entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerStep {
    pub id: StepId,
    pub definition: DefinitionId,
    pub title: String,
}

/// An editable field of an action step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepField {
    Title,
    Comment,
    Config(String),
}

impl fmt::Display for StepField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepField::Title => f.write_str("title"),
            StepField::Comment => f.write_str("comment"),
            StepField::Config(key) => write!(f, "config.{}", key),
        }
    }
}

impl FromStr for StepField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(StepField::Title),
            "comment" => Ok(StepField::Comment),
            _ => match s.strip_prefix("config.") {
                Some(key) if !key.is_empty() => Ok(StepField::Config(key.to_string())),
                _ => Err(format!(
                    "unknown field: {} (expected title, comment or config.<key>)",
                    s
                )),
            },
        }
    }
}

/// New value for a `StepField`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Text(String),
    Config(ConfigValue),
    /// Removes a configuration key
    Unset,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Config(v) => write!(f, "{}", v),
            FieldValue::Unset => f.write_str("(unset)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_kind_parses_labels_and_aliases() {
        assert_eq!("else".parse::<BranchKind>().unwrap(), BranchKind::ConditionalFalse);
        assert_eq!("THEN".parse::<BranchKind>().unwrap(), BranchKind::ConditionalTrue);
        assert_eq!("sequential".parse::<BranchKind>().unwrap(), BranchKind::Sequential);
        assert!("sideways".parse::<BranchKind>().is_err());
        for kind in [
            BranchKind::Root,
            BranchKind::Sequential,
            BranchKind::ConditionalTrue,
            BranchKind::ConditionalFalse,
            BranchKind::LoopBody,
        ] {
            assert_eq!(kind.label().parse::<BranchKind>().unwrap(), kind);
        }
    }

    #[test]
    fn parent_id_parses_root_case_insensitively() {
        assert_eq!("ROOT".parse::<ParentId>().unwrap(), ParentId::Root);
        assert_eq!(
            "step-3".parse::<ParentId>().unwrap(),
            ParentId::Step(StepId::new("step-3"))
        );
    }

    #[test]
    fn step_field_parses_config_keys() {
        assert_eq!("title".parse::<StepField>().unwrap(), StepField::Title);
        assert_eq!(
            "config.url".parse::<StepField>().unwrap(),
            StepField::Config("url".into())
        );
        assert!("config.".parse::<StepField>().is_err());
        assert!("colour".parse::<StepField>().is_err());
    }

    #[test]
    fn config_literal_parsing() {
        assert_eq!(ConfigValue::parse_literal("true"), ConfigValue::Bool(true));
        assert_eq!(ConfigValue::parse_literal("2.5"), ConfigValue::Number(2.5));
        assert_eq!(
            ConfigValue::parse_literal("https://example.com"),
            ConfigValue::Text("https://example.com".into())
        );
        assert_eq!(
            ConfigValue::parse_literal("NaN"),
            ConfigValue::Text("NaN".into())
        );
    }

    #[test]
    fn parent_id_serde_shape() {
        let json = serde_json::to_string(&ParentId::Root).unwrap();
        assert_eq!(json, "\"root\"");
        let json = serde_json::to_string(&ParentId::Step(StepId::new("a"))).unwrap();
        assert_eq!(json, r#"{"step":"a"}"#);
    }
}
