use serde::{Deserialize, Serialize};

use super::step::{BranchKind, ConfigValue, Configuration, DefinitionId, FieldKind};

/// Whether a definition starts a workflow or is a step inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Trigger,
    Action,
}

/// One declared configuration field of a definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

/// Read-only reference data describing a trigger or action type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: DefinitionId,
    pub title: String,
    #[serde(default = "default_kind")]
    pub kind: DefinitionKind,
    /// Branch slots this action exposes to children (empty for simple actions)
    #[serde(default)]
    pub branches: Vec<BranchKind>,
    /// Branch a dropped child lands in when the drop target names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<BranchKind>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

fn default_kind() -> DefinitionKind {
    DefinitionKind::Action
}

/// Configuration rejected by a definition's schema
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("{definition} has no field named {field}")]
    UnknownField {
        definition: DefinitionId,
        field: String,
    },
    #[error("field {field} of {definition} expects {expected}, got {actual}")]
    KindMismatch {
        definition: DefinitionId,
        field: String,
        expected: FieldKind,
        actual: FieldKind,
    },
    #[error("field {field} of {definition} is required")]
    MissingRequired {
        definition: DefinitionId,
        field: String,
    },
    #[error("configuration is keyed to {found}, but the step uses {expected}")]
    DefinitionMismatch {
        expected: DefinitionId,
        found: DefinitionId,
    },
}

impl ActionDefinition {
    pub fn allows_branch(&self, branch: BranchKind) -> bool {
        self.branches.contains(&branch)
    }

    /// Branch used when a caller does not name one
    pub fn preferred_branch(&self) -> Option<BranchKind> {
        self.default_branch.or_else(|| self.branches.first().copied())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check one value against the declared field type
    pub fn validate_value(&self, field: &str, value: &ConfigValue) -> Result<(), SchemaError> {
        let spec = self.field(field).ok_or_else(|| SchemaError::UnknownField {
            definition: self.id.clone(),
            field: field.to_string(),
        })?;
        if spec.kind != value.kind() {
            return Err(SchemaError::KindMismatch {
                definition: self.id.clone(),
                field: field.to_string(),
                expected: spec.kind,
                actual: value.kind(),
            });
        }
        Ok(())
    }

    /// Check a complete configuration, including required fields
    pub fn validate(&self, config: &Configuration) -> Result<(), SchemaError> {
        if config.definition != self.id {
            return Err(SchemaError::DefinitionMismatch {
                expected: self.id.clone(),
                found: config.definition.clone(),
            });
        }
        for (key, value) in &config.values {
            self.validate_value(key, value)?;
        }
        if let Some(missing) = self
            .fields
            .iter()
            .find(|f| f.required && !config.values.contains_key(&f.name))
        {
            return Err(SchemaError::MissingRequired {
                definition: self.id.clone(),
                field: missing.name.clone(),
            });
        }
        Ok(())
    }
}

/// Lookup of trigger/action definitions by id
pub trait DefinitionCatalog {
    fn lookup(&self, id: &DefinitionId) -> Option<&ActionDefinition>;
}

/// Catalog loaded from `catalog.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    pub definitions: Vec<ActionDefinition>,
}

impl StaticCatalog {
    pub fn new(definitions: Vec<ActionDefinition>) -> Self {
        StaticCatalog { definitions }
    }

    /// The catalog written by `flowedit init`
    pub fn builtin() -> Result<Self, toml::de::Error> {
        toml::from_str(BUILTIN_CATALOG)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &ActionDefinition> {
        self.definitions
            .iter()
            .filter(|d| d.kind == DefinitionKind::Trigger)
    }
}

impl DefinitionCatalog for StaticCatalog {
    fn lookup(&self, id: &DefinitionId) -> Option<&ActionDefinition> {
        self.definitions.iter().find(|d| &d.id == id)
    }
}

pub const BUILTIN_CATALOG: &str = r#"# Trigger and action definitions available to workflows.
# `branches` lists the child slots an action exposes:
# sequential, conditional_true, conditional_false, loop_body.

[[definitions]]
id = "schedule"
title = "On a schedule"
kind = "trigger"

[[definitions]]
id = "webhook"
title = "Incoming webhook"
kind = "trigger"

[[definitions]]
id = "http_request"
title = "HTTP request"

[[definitions.fields]]
name = "url"
kind = "text"
required = true

[[definitions.fields]]
name = "method"
kind = "text"

[[definitions]]
id = "log"
title = "Write to log"

[[definitions.fields]]
name = "message"
kind = "text"

[[definitions]]
id = "delay"
title = "Wait"

[[definitions.fields]]
name = "seconds"
kind = "number"

[[definitions]]
id = "if"
title = "If / else"
branches = ["conditional_true", "conditional_false"]
default_branch = "conditional_true"

[[definitions.fields]]
name = "expression"
kind = "text"

[[definitions]]
id = "loop"
title = "For each"
branches = ["loop_body"]

[[definitions.fields]]
name = "items"
kind = "text"

[[definitions]]
id = "group"
title = "Group"
branches = ["sequential"]
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn catalog() -> StaticCatalog {
        StaticCatalog::builtin().unwrap()
    }

    #[test]
    fn builtin_catalog_parses() {
        let cat = catalog();
        assert_eq!(cat.triggers().count(), 2);
        let cond = cat.lookup(&"if".into()).unwrap();
        assert!(cond.allows_branch(BranchKind::ConditionalFalse));
        assert!(!cond.allows_branch(BranchKind::LoopBody));
        assert_eq!(cond.preferred_branch(), Some(BranchKind::ConditionalTrue));
        let lp = cat.lookup(&"loop".into()).unwrap();
        assert_eq!(lp.preferred_branch(), Some(BranchKind::LoopBody));
        let log = cat.lookup(&"log".into()).unwrap();
        assert!(log.branches.is_empty());
        assert_eq!(log.preferred_branch(), None);
        assert!(cat.lookup(&"nope".into()).is_none());
    }

    #[test]
    fn validate_checks_kinds_and_required() {
        let cat = catalog();
        let http = cat.lookup(&"http_request".into()).unwrap();

        let mut config = Configuration::empty("http_request".into());
        assert!(matches!(
            http.validate(&config),
            Err(SchemaError::MissingRequired { .. })
        ));

        config
            .values
            .insert("url".into(), ConfigValue::Text("https://example.com".into()));
        assert!(http.validate(&config).is_ok());

        config.values.insert("method".into(), ConfigValue::Number(1.0));
        assert!(matches!(
            http.validate(&config),
            Err(SchemaError::KindMismatch { .. })
        ));

        let mut values = IndexMap::new();
        values.insert("colour".to_string(), ConfigValue::Text("red".into()));
        let bad = Configuration {
            definition: "http_request".into(),
            values,
        };
        assert!(matches!(
            http.validate(&bad),
            Err(SchemaError::UnknownField { .. })
        ));

        let other = Configuration::empty("log".into());
        assert!(matches!(
            http.validate(&other),
            Err(SchemaError::DefinitionMismatch { .. })
        ));
    }
}
