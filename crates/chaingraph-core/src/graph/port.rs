//! Port types: the typed connection points on a node.

use serde::{Deserialize, Serialize};

/// Closed set of port value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Enum,
    Stream,
    Any,
    Secret,
}

/// Tagged-union configuration for a port, one variant per [`PortKind`].
///
/// Mirrors the way workflow actions/events are modeled as a `#[serde(tag =
/// "kind")]` enum elsewhere in this crate: the kind discriminator and the
/// kind-specific fields travel together so a port's config round-trips
/// through JSON without a side-channel type tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PortConfig {
    String {
        #[serde(skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
    },
    Boolean,
    Array {
        item_config: Box<PortConfig>,
    },
    Object {
        schema: serde_json::Value,
    },
    Enum {
        options: Vec<String>,
    },
    Stream {
        item_config: Box<PortConfig>,
    },
    /// `any` carries an optional underlying kind, set once the port is
    /// connected, so editors and logs can show a concrete type without the
    /// engine losing runtime generality.
    Any {
        #[serde(skip_serializing_if = "Option::is_none")]
        underlying_type: Option<PortKind>,
    },
    /// Values are masked wherever a UI-facing serialization is produced.
    Secret,
}

impl PortConfig {
    /// The [`PortKind`] discriminator for this configuration.
    pub fn kind(&self) -> PortKind {
        match self {
            PortConfig::String { .. } => PortKind::String,
            PortConfig::Number { .. } => PortKind::Number,
            PortConfig::Boolean => PortKind::Boolean,
            PortConfig::Array { .. } => PortKind::Array,
            PortConfig::Object { .. } => PortKind::Object,
            PortConfig::Enum { .. } => PortKind::Enum,
            PortConfig::Stream { .. } => PortKind::Stream,
            PortConfig::Any { .. } => PortKind::Any,
            PortConfig::Secret => PortKind::Secret,
        }
    }

    /// Two configs are connectable if they share a kind, or either side is
    /// `any`. `secret` only connects to `secret` or `any` (masking must not
    /// be bypassed by a type-erased edge).
    pub fn is_compatible_with(&self, other: &PortConfig) -> bool {
        let (a, b) = (self.kind(), other.kind());
        if a == PortKind::Any || b == PortKind::Any {
            return true;
        }
        a == b
    }
}

/// Direction of a port relative to the node's data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
    /// Propagates its input value to its paired output without running the
    /// node body, the instant the input resolves.
    Passthrough,
    /// Engine-internal bookkeeping port, never shown in UI serializations.
    System,
}

/// A single typed connection point on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    /// Unique within the owning node.
    pub id: String,
    /// Stable key within the node's type (equals `id` for root ports).
    pub key: String,
    pub direction: PortDirection,
    pub config: PortConfig,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Marks the value as final for this execution; the engine will not
    /// deliver further updates along outgoing edges once resolved.
    #[serde(default)]
    pub resolved: bool,
}

impl Port {
    pub fn new(id: impl Into<String>, direction: PortDirection, config: PortConfig) -> Self {
        let id = id.into();
        Self {
            key: id.clone(),
            id,
            direction,
            config,
            required: false,
            default_value: None,
            value: None,
            resolved: false,
        }
    }

    pub fn is_system(&self) -> bool {
        self.direction == PortDirection::System
    }

    pub fn get_value(&self) -> Option<&serde_json::Value> {
        self.value.as_ref()
    }

    pub fn set_value(&mut self, value: serde_json::Value) {
        self.value = Some(value);
    }

    /// Validate the current value against this port's config. Secret and
    /// any-kind ports accept any JSON value; everything else must match its
    /// declared JSON shape.
    pub fn validate(&self) -> Result<(), String> {
        let Some(value) = &self.value else {
            return if self.required {
                Err(format!("port {} is required but has no value", self.id))
            } else {
                Ok(())
            };
        };
        let kind_ok = match &self.config {
            PortConfig::String { .. } => value.is_string(),
            PortConfig::Number { .. } => value.is_number(),
            PortConfig::Boolean => value.is_boolean(),
            PortConfig::Array { .. } | PortConfig::Stream { .. } => value.is_array(),
            PortConfig::Object { .. } => value.is_object(),
            PortConfig::Enum { options } => value
                .as_str()
                .map(|s| options.iter().any(|o| o == s))
                .unwrap_or(false),
            PortConfig::Any { .. } | PortConfig::Secret => true,
        };
        if kind_ok {
            Ok(())
        } else {
            Err(format!(
                "port {} value does not match kind {:?}",
                self.id,
                self.config.kind()
            ))
        }
    }

    /// Serialize for a UI-facing context: secret values are masked.
    pub fn serialize_masked(&self) -> serde_json::Value {
        let mut json = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if matches!(self.config, PortConfig::Secret) {
            if let Some(obj) = json.as_object_mut() {
                obj.insert("value".to_string(), serde_json::json!("••••••"));
            }
        }
        json
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_is_compatible_with_everything() {
        let any = PortConfig::Any { underlying_type: None };
        let string = PortConfig::String { min_length: None, max_length: None, pattern: None };
        assert!(any.is_compatible_with(&string));
        assert!(string.is_compatible_with(&any));
    }

    #[test]
    fn mismatched_kinds_are_incompatible() {
        let string = PortConfig::String { min_length: None, max_length: None, pattern: None };
        let number = PortConfig::Number { min: None, max: None, step: None };
        assert!(!string.is_compatible_with(&number));
    }

    #[test]
    fn secret_value_is_masked_in_ui_serialization() {
        let mut port = Port::new("api_key", PortDirection::Input, PortConfig::Secret);
        port.set_value(serde_json::json!("sk-super-secret"));
        let masked = port.serialize_masked();
        assert_eq!(masked["value"], serde_json::json!("••••••"));
    }

    #[test]
    fn required_port_without_value_fails_validation() {
        let mut port = Port::new("x", PortDirection::Input, PortConfig::Boolean);
        port.required = true;
        assert!(port.validate().is_err());
        port.set_value(serde_json::json!(true));
        assert!(port.validate().is_ok());
    }
}
