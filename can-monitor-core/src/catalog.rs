//! Rule catalog loading
//!
//! A catalog is a JSON document holding named configurations, each a list of
//! signal definitions:
//!
//! ```json
//! {
//!   "configurations": [
//!     {
//!       "name": "Engine",
//!       "signals": [
//!         { "name": "Ignition", "can_id": "0x123", "match_type": "exact",
//!           "data": ["0x01", 2, "3", 4, 5, 6, 7, 8] },
//!         { "name": "Throttle", "can_id": 1110, "match_type": "range",
//!           "data_byte_index": 0, "min_value": "0x0A", "max_value": 50 },
//!         { "name": "Brake", "can_id": "0x119", "match_type": "bit",
//!           "byte_index": 3, "bit_index": 0, "bit_value": 1 }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Numbers may be JSON integers, decimal strings or `0x` hex strings. Every
//! signal is converted and validated when the catalog is loaded, so a catalog
//! that loads successfully only contains rules the matcher will accept.

use crate::rules::{validate_rules, MatchRule, SignalRule};
use crate::types::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// A named, validated rule set
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub name: String,
    pub rules: Vec<SignalRule>,
}

/// All configurations from one catalog file, in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleCatalog {
    configurations: Vec<Configuration>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    configurations: Vec<ConfigurationRecord>,
}

#[derive(Debug, Deserialize)]
struct ConfigurationRecord {
    name: Option<String>,
    #[serde(default)]
    signals: Vec<SignalRecord>,
}

/// Loosely typed signal entry; shape errors become `InvalidRule`
#[derive(Debug, Deserialize)]
struct SignalRecord {
    name: Option<serde_json::Value>,
    can_id: Option<NumberValue>,
    match_type: Option<serde_json::Value>,
    data: Option<ListValue>,
    data_byte_index: Option<NumberValue>,
    min_value: Option<NumberValue>,
    max_value: Option<NumberValue>,
    byte_index: Option<NumberValue>,
    bit_index: Option<NumberValue>,
    bit_value: Option<NumberValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumberValue {
    Int(i64),
    Text(String),
    /// Anything else (bools, floats, out-of-range integers, objects)
    Other(serde_json::Value),
}

impl NumberValue {
    fn parse(&self) -> Result<i64, String> {
        match self {
            NumberValue::Int(value) => Ok(*value),
            NumberValue::Text(text) => parse_number(text),
            NumberValue::Other(value) => Err(format!(
                "expected an integer or numeric string, found {}",
                value
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ListValue {
    List(Vec<NumberValue>),
    Other(serde_json::Value),
}

/// Text field that must be a JSON string
fn text_field<'a>(value: &'a Option<serde_json::Value>, field: &str) -> Result<Option<&'a str>, String> {
    match value {
        None => Ok(None),
        Some(serde_json::Value::String(text)) => Ok(Some(text.as_str())),
        Some(other) => Err(format!("field '{}' must be a string, found {}", field, other)),
    }
}

/// Parse `"0x1A"`, `"0X1a"` or `"26"` into an integer
pub fn parse_number(text: &str) -> Result<i64, String> {
    let trimmed = text.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => trimmed.parse::<i64>(),
    };
    parsed.map_err(|_| format!("'{}' is not a decimal or 0x-prefixed hex number", text))
}

impl RuleCatalog {
    /// Load and validate a catalog file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::info!("Loading rule catalog: {:?}", path);
        let content = fs::read_to_string(path)?;
        let catalog = Self::from_json_str(&content)?;
        log::info!(
            "Rule catalog loaded: {} configurations from {:?}",
            catalog.configurations.len(),
            path
        );
        Ok(catalog)
    }

    /// Parse and validate a catalog held in memory
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let file: CatalogFile = serde_json::from_str(content)?;

        let mut configurations = Vec::with_capacity(file.configurations.len());
        for record in file.configurations {
            let name = record.name.unwrap_or_else(|| "Unnamed".to_string());
            let rules = record
                .signals
                .iter()
                .enumerate()
                .map(|(index, signal)| convert_signal(index, signal, &name))
                .collect::<Result<Vec<_>, _>>()?;
            validate_rules(&rules)?;

            log::debug!("Configuration '{}': {} rules", name, rules.len());
            configurations.push(Configuration { name, rules });
        }

        Ok(Self { configurations })
    }

    /// Configuration names in file order
    pub fn names(&self) -> Vec<&str> {
        self.configurations.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up a configuration by name
    pub fn get(&self, name: &str) -> Option<&Configuration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    /// Look up a configuration by name, failing if it does not exist
    pub fn require(&self, name: &str) -> Result<&Configuration, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::ConfigurationNotFound(name.to_string()))
    }

    pub fn configurations(&self) -> &[Configuration] {
        &self.configurations
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

fn convert_signal(index: usize, record: &SignalRecord, configuration: &str) -> Result<SignalRule, ConfigError> {
    let name_field = text_field(&record.name, "name");
    let name = name_field.clone().ok().flatten().unwrap_or_default().to_string();
    let invalid = |reason: String| ConfigError::InvalidRule {
        index,
        name: name.clone(),
        reason: format!("in configuration '{}': {}", configuration, reason),
    };

    name_field.map_err(&invalid)?;
    if name.trim().is_empty() {
        return Err(invalid("missing field 'name'".to_string()));
    }

    let id = required(&record.can_id, "can_id")
        .and_then(|v| in_range(v, "can_id", 0, i64::from(u32::MAX)))
        .map_err(&invalid)? as u32;

    let match_type = text_field(&record.match_type, "match_type")
        .map_err(&invalid)?
        .ok_or_else(|| invalid("missing field 'match_type'".to_string()))?;

    let rule = match match_type.to_ascii_lowercase().as_str() {
        "exact" => {
            let values = match &record.data {
                Some(ListValue::List(values)) => values,
                Some(ListValue::Other(other)) => {
                    return Err(invalid(format!("field 'data' must be a list, found {}", other)))
                }
                None => return Err(invalid("exact match requires a 'data' list".to_string())),
            };
            let expected_data = values
                .iter()
                .map(|v| {
                    v.parse()
                        .map_err(|e| format!("field 'data': {}", e))
                        .and_then(|n| in_range(n, "data", 0, 255))
                        .map(|n| n as u8)
                })
                .collect::<Result<Vec<u8>, String>>()
                .map_err(&invalid)?;
            MatchRule::Exact { id, expected_data }
        }
        "range" => {
            let byte_index = required(&record.data_byte_index, "data_byte_index")
                .and_then(|v| in_range(v, "data_byte_index", 0, 7))
                .map_err(&invalid)? as usize;
            let min_value = required(&record.min_value, "min_value")
                .and_then(|v| in_range(v, "min_value", 0, 255))
                .map_err(&invalid)? as u8;
            let max_value = required(&record.max_value, "max_value")
                .and_then(|v| in_range(v, "max_value", 0, 255))
                .map_err(&invalid)? as u8;
            MatchRule::Range {
                id,
                byte_index,
                min_value,
                max_value,
            }
        }
        "bit" => {
            let byte_index = required(&record.byte_index, "byte_index")
                .and_then(|v| in_range(v, "byte_index", 0, 7))
                .map_err(&invalid)? as usize;
            let bit_index = required(&record.bit_index, "bit_index")
                .and_then(|v| in_range(v, "bit_index", 0, 7))
                .map_err(&invalid)? as u8;
            let bit_value = required(&record.bit_value, "bit_value")
                .and_then(|v| in_range(v, "bit_value", 0, 1))
                .map_err(&invalid)?
                == 1;
            MatchRule::Bit {
                id,
                byte_index,
                bit_index,
                bit_value,
            }
        }
        other => return Err(invalid(format!("unknown match_type '{}'", other))),
    };

    Ok(SignalRule::new(name.clone(), rule))
}

fn required(value: &Option<NumberValue>, field: &str) -> Result<i64, String> {
    value
        .as_ref()
        .ok_or_else(|| format!("missing field '{}'", field))?
        .parse()
        .map_err(|e| format!("field '{}': {}", field, e))
}

fn in_range(value: i64, field: &str, min: i64, max: i64) -> Result<i64, String> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(format!("field '{}' = {} is outside {}..={}", field, value, min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"{
        "configurations": [
            {
                "name": "Engine",
                "signals": [
                    { "name": "Ignition", "can_id": "0x123", "match_type": "exact",
                      "data": ["0x01", 2, "3", 4, 5, 6, 7, "0x08"] },
                    { "name": "Throttle", "can_id": 1110, "match_type": "range",
                      "data_byte_index": 0, "min_value": "0x0A", "max_value": 50 },
                    { "name": "Brake", "can_id": "0x119", "match_type": "bit",
                      "byte_index": 3, "bit_index": "7", "bit_value": 1 }
                ]
            },
            { "name": "Empty", "signals": [] }
        ]
    }"#;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x123"), Ok(0x123));
        assert_eq!(parse_number("0XfF"), Ok(255));
        assert_eq!(parse_number("291"), Ok(291));
        assert_eq!(parse_number(" 42 "), Ok(42));
        assert!(parse_number("0xZZ").is_err());
        assert!(parse_number("twelve").is_err());
        assert!(parse_number("").is_err());
    }

    #[test]
    fn test_load_catalog_with_hex_values() {
        let catalog = RuleCatalog::from_json_str(CATALOG).unwrap();
        assert_eq!(catalog.names(), vec!["Engine", "Empty"]);

        let engine = catalog.require("Engine").unwrap();
        assert_eq!(engine.rules.len(), 3);
        assert_eq!(
            engine.rules[0].rule,
            MatchRule::Exact {
                id: 0x123,
                expected_data: vec![1, 2, 3, 4, 5, 6, 7, 8]
            }
        );
        assert_eq!(
            engine.rules[1].rule,
            MatchRule::Range {
                id: 0x456,
                byte_index: 0,
                min_value: 10,
                max_value: 50
            }
        );
        assert_eq!(
            engine.rules[2].rule,
            MatchRule::Bit {
                id: 0x119,
                byte_index: 3,
                bit_index: 7,
                bit_value: true
            }
        );
    }

    #[test]
    fn test_unknown_configuration() {
        let catalog = RuleCatalog::from_json_str(CATALOG).unwrap();
        assert!(catalog.get("Transmission").is_none());
        assert!(matches!(
            catalog.require("Transmission"),
            Err(ConfigError::ConfigurationNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_signal_is_named() {
        let json = r#"{ "configurations": [ { "name": "Bad", "signals": [
            { "name": "Fine", "can_id": 1, "match_type": "exact", "data": [] },
            { "name": "Speed", "can_id": 2, "match_type": "range",
              "data_byte_index": 0, "min_value": 10, "max_value": 300 }
        ] } ] }"#;

        match RuleCatalog::from_json_str(json) {
            Err(ConfigError::InvalidRule { index, name, reason }) => {
                assert_eq!(index, 1);
                assert_eq!(name, "Speed");
                assert!(reason.contains("max_value"), "reason: {}", reason);
            }
            other => panic!("expected InvalidRule, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_fields_and_bad_types() {
        let cases = [
            r#"{ "name": "A", "match_type": "exact", "data": [] }"#,
            r#"{ "name": "A", "can_id": 1, "data": [] }"#,
            r#"{ "name": "A", "can_id": 1, "match_type": "exact" }"#,
            r#"{ "name": "A", "can_id": 1, "match_type": "fuzzy" }"#,
            r#"{ "name": "A", "can_id": "0xG1", "match_type": "exact", "data": [] }"#,
            r#"{ "name": "A", "can_id": 1, "match_type": "range", "data_byte_index": 0, "min_value": 60, "max_value": 50 }"#,
            r#"{ "name": "A", "can_id": 1, "match_type": "bit", "byte_index": 0, "bit_index": 0, "bit_value": 2 }"#,
            r#"{ "can_id": 1, "match_type": "exact", "data": [] }"#,
            r#"{ "name": "A", "can_id": 1, "match_type": "bit", "byte_index": 0, "bit_index": 0, "bit_value": true }"#,
            r#"{ "name": "A", "can_id": 1.5, "match_type": "exact", "data": [] }"#,
            r#"{ "name": "A", "can_id": 1, "match_type": "exact", "data": "0102" }"#,
            r#"{ "name": "A", "can_id": 1, "match_type": "exact", "data": [1, 2.5] }"#,
            r#"{ "name": "A", "can_id": 18446744073709551615, "match_type": "exact", "data": [] }"#,
            r#"{ "name": "A", "can_id": 1, "match_type": "range", "data_byte_index": null, "min_value": 0, "max_value": 1 }"#,
            r#"{ "name": 7, "can_id": 1, "match_type": "exact", "data": [] }"#,
            r#"{ "name": "A", "can_id": 1, "match_type": ["exact"], "data": [] }"#,
        ];

        for signal in cases {
            let json = format!(
                r#"{{ "configurations": [ {{ "name": "C", "signals": [ {} ] }} ] }}"#,
                signal
            );
            assert!(
                matches!(RuleCatalog::from_json_str(&json), Err(ConfigError::InvalidRule { .. })),
                "accepted: {}",
                signal
            );
        }
    }

    #[test]
    fn test_wrong_type_names_the_rule() {
        let json = r#"{ "configurations": [ { "name": "Body", "signals": [
            { "name": "Door", "can_id": "0x3B0", "match_type": "bit",
              "byte_index": 0, "bit_index": 2, "bit_value": true }
        ] } ] }"#;

        match RuleCatalog::from_json_str(json) {
            Err(ConfigError::InvalidRule { index, name, reason }) => {
                assert_eq!(index, 0);
                assert_eq!(name, "Door");
                assert!(reason.contains("in configuration 'Body'"), "reason: {}", reason);
                assert!(reason.contains("bit_value"), "reason: {}", reason);
            }
            other => panic!("expected InvalidRule, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            RuleCatalog::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = RuleCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.configurations().len(), 2);
        assert!(!catalog.is_empty());

        let missing = RuleCatalog::load(Path::new("/nonexistent/catalog.json"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
