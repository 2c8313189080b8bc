//! Variant resolution.
//!
//! A cart selection such as `{"storage": "128gb", "color": "red", "variantPrice": 1}` maps to
//! the stock row keyed `color:red|storage:128gb`. [`VariantOptions::variant_key`] is the only
//! place that key is built; cart merging, stock checks, decrements and restores all go
//! through it.

use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use utoipa::ToSchema;

/// Separates `name:value` pairs inside a variant key
pub const KEY_DELIMITER: char = '|';
/// Separates an option name from its value
pub const PAIR_SEPARATOR: char = ':';

/// Display-only hints clients send along with a selection
const NON_STOCK_KEYS: [&str; 4] = ["variantPrice", "variantImage", "price", "image"];

/// Product category tag stored in `products.product_type`
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProductKind {
    Phone,
    Laptop,
    Accessory,
    Plain,
}

/// Canonical key of one stock-bearing configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantKey(String);

impl VariantKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stock-relevant option selection, sorted by option name.
///
/// Serializes as a flat JSON object; that object is what cart items and order items store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct VariantOptions(BTreeMap<String, String>);

impl VariantOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a selection from name/value pairs, dropping display-only keys and blank values.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::new();
        for (name, value) in pairs {
            options.insert(name.as_ref(), value.as_ref())?;
        }
        Ok(options)
    }

    fn insert(&mut self, name: &str, value: &str) -> Result<(), ServiceError> {
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() || value.is_empty() || NON_STOCK_KEYS.contains(&name) {
            return Ok(());
        }
        if name.contains([KEY_DELIMITER, PAIR_SEPARATOR]) || value.contains(KEY_DELIMITER) {
            return Err(ServiceError::MalformedOptions(format!(
                "option '{}' contains a reserved character",
                name
            )));
        }
        self.0.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Accepts `null` or a flat object of scalar values
    pub fn from_json_value(value: &Value) -> Result<Self, ServiceError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Self::from_json_map(map),
            other => Err(ServiceError::MalformedOptions(format!(
                "expected an object of options, got {}",
                json_kind(other)
            ))),
        }
    }

    fn from_json_map(map: &Map<String, Value>) -> Result<Self, ServiceError> {
        let mut options = Self::new();
        for (name, value) in map {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                // Display hints may carry structured data; they never reach the key.
                Value::Array(_) | Value::Object(_) if NON_STOCK_KEYS.contains(&name.as_str()) => {
                    continue
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(ServiceError::MalformedOptions(format!(
                        "option '{}' must be a scalar",
                        name
                    )))
                }
            };
            options.insert(name, &text)?;
        }
        Ok(options)
    }

    /// Parses a stored or client-supplied JSON blob; a missing or blank blob is no selection.
    pub fn parse_json(raw: Option<&str>) -> Result<Self, ServiceError> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(Self::new()),
            Some(text) => {
                let value: Value = serde_json::from_str(text)
                    .map_err(|e| ServiceError::MalformedOptions(e.to_string()))?;
                Self::from_json_value(&value)
            }
        }
    }

    /// Storage form; `None` when nothing stock-relevant was selected
    pub fn to_json(&self) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            serde_json::to_string(&self.0).ok()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical variant key, or `None` to use the product's own stock counter.
    pub fn variant_key(&self) -> Option<VariantKey> {
        if self.0.is_empty() {
            return None;
        }
        let key = self
            .0
            .iter()
            .map(|(name, value)| format!("{name}{PAIR_SEPARATOR}{value}"))
            .collect::<Vec<_>>()
            .join(&KEY_DELIMITER.to_string());
        Some(VariantKey(key))
    }

    /// Reads the selection through the product's category.
    ///
    /// Phones take `color` and `storage`, laptops take `config`; any other option name on
    /// those categories is `MalformedOptions`.
    pub fn typed(&self, kind: ProductKind) -> Result<TypedOptions, ServiceError> {
        if self.is_empty() {
            return Ok(TypedOptions::Base);
        }
        match kind {
            ProductKind::Phone => {
                self.only(kind, &["color", "storage"])?;
                Ok(TypedOptions::Phone(PhoneOptions {
                    color: self.get("color").map(str::to_string),
                    storage: self.get("storage").map(str::to_string),
                }))
            }
            ProductKind::Laptop => {
                self.only(kind, &["config"])?;
                let config = self.get("config").ok_or_else(|| {
                    ServiceError::MalformedOptions("laptop options need a config".to_string())
                })?;
                Ok(TypedOptions::Laptop(LaptopOptions {
                    config: config.to_string(),
                }))
            }
            ProductKind::Accessory | ProductKind::Plain => Ok(TypedOptions::Other(self.clone())),
        }
    }

    fn only(&self, kind: ProductKind, allowed: &[&str]) -> Result<(), ServiceError> {
        match self.0.keys().find(|name| !allowed.contains(&name.as_str())) {
            Some(name) => Err(ServiceError::MalformedOptions(format!(
                "{} products have no '{}' option",
                kind, name
            ))),
            None => Ok(()),
        }
    }
}

impl From<PhoneOptions> for VariantOptions {
    fn from(options: PhoneOptions) -> Self {
        let mut map = BTreeMap::new();
        if let Some(color) = options.color {
            map.insert("color".to_string(), color);
        }
        if let Some(storage) = options.storage {
            map.insert("storage".to_string(), storage);
        }
        Self(map)
    }
}

impl From<LaptopOptions> for VariantOptions {
    fn from(options: LaptopOptions) -> Self {
        Self(BTreeMap::from([("config".to_string(), options.config)]))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PhoneOptions {
    pub color: Option<String>,
    pub storage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LaptopOptions {
    pub config: String,
}

/// Category-aware view of a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedOptions {
    /// No stock-relevant selection
    Base,
    Phone(PhoneOptions),
    Laptop(LaptopOptions),
    Other(VariantOptions),
}

/// One selectable value in a product's variant definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VariantChoice {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Product-level variant definition stored in `products.variants`.
///
/// Phones list `colors` and `storages`; laptops list `configs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VariantDefinition {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub colors: Vec<VariantChoice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storages: Vec<VariantChoice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<VariantChoice>,
}

impl VariantDefinition {
    pub fn parse(raw: Option<&str>) -> Result<Option<Self>, ServiceError> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(text) => serde_json::from_str(text)
                .map(Some)
                .map_err(|e| ServiceError::MalformedOptions(e.to_string())),
        }
    }

    pub fn to_json(&self) -> Result<String, ServiceError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.storages.is_empty() && self.configs.is_empty()
    }

    /// Every stock-bearing combination the definition allows
    pub fn expand(&self) -> Result<Vec<VariantOptions>, ServiceError> {
        let mut combos = Vec::new();

        match (self.colors.is_empty(), self.storages.is_empty()) {
            (false, false) => {
                for color in &self.colors {
                    for storage in &self.storages {
                        combos.push(VariantOptions::from_pairs([
                            ("color", color.name.as_str()),
                            ("storage", storage.name.as_str()),
                        ])?);
                    }
                }
            }
            (false, true) => {
                for color in &self.colors {
                    combos.push(VariantOptions::from_pairs([("color", color.name.as_str())])?);
                }
            }
            (true, false) => {
                for storage in &self.storages {
                    combos.push(VariantOptions::from_pairs([(
                        "storage",
                        storage.name.as_str(),
                    )])?);
                }
            }
            (true, true) => {}
        }

        for config in &self.configs {
            combos.push(VariantOptions::from_pairs([("config", config.name.as_str())])?);
        }

        combos.retain(|options| !options.is_empty());
        Ok(combos)
    }

    /// Whether `key` names one of the expanded combinations
    pub fn allows(&self, key: &VariantKey) -> Result<bool, ServiceError> {
        Ok(self
            .expand()?
            .iter()
            .any(|options| options.variant_key().as_ref() == Some(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn key_is_sorted_by_option_name() {
        let options =
            VariantOptions::from_json_value(&json!({"storage": "128gb", "color": "red"})).unwrap();
        assert_eq!(
            options.variant_key().unwrap().as_str(),
            "color:red|storage:128gb"
        );
    }

    #[test]
    fn display_hints_and_blanks_are_stripped() {
        let options = VariantOptions::from_json_value(&json!({
            "color": "red",
            "variantPrice": 25990000,
            "variantImage": {"url": "x.png"},
            "price": 1,
            "image": "y.png",
            "storage": "  ",
            "engraving": null
        }))
        .unwrap();
        assert_eq!(options.variant_key().unwrap().as_str(), "color:red");
    }

    #[test]
    fn no_stock_relevant_option_means_product_stock() {
        assert_eq!(VariantOptions::parse_json(None).unwrap().variant_key(), None);
        assert_eq!(
            VariantOptions::parse_json(Some("{\"variantPrice\": 100}"))
                .unwrap()
                .variant_key(),
            None
        );
        assert_eq!(VariantOptions::new().to_json(), None);
    }

    #[test]
    fn scalars_are_stringified() {
        let options =
            VariantOptions::from_json_value(&json!({"storage": 256, "refurbished": false}))
                .unwrap();
        assert_eq!(
            options.variant_key().unwrap().as_str(),
            "refurbished:false|storage:256"
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            VariantOptions::parse_json(Some("{not json")),
            Err(ServiceError::MalformedOptions(_))
        ));
        assert!(matches!(
            VariantOptions::from_json_value(&json!(["red"])),
            Err(ServiceError::MalformedOptions(_))
        ));
        assert!(matches!(
            VariantOptions::from_json_value(&json!({"color": {"name": "red"}})),
            Err(ServiceError::MalformedOptions(_))
        ));
        assert!(matches!(
            VariantOptions::from_pairs([("co|lor", "red")]),
            Err(ServiceError::MalformedOptions(_))
        ));
    }

    #[test]
    fn stored_form_parses_back_to_the_same_key() {
        let options = VariantOptions::from_pairs([("storage", "512gb"), ("color", "blue")]).unwrap();
        let stored = options.to_json().unwrap();
        assert_eq!(stored, r#"{"color":"blue","storage":"512gb"}"#);
        let reparsed = VariantOptions::parse_json(Some(&stored)).unwrap();
        assert_eq!(reparsed.variant_key(), options.variant_key());
    }

    #[test]
    fn typed_views_follow_product_kind() {
        let phone = VariantOptions::from_pairs([("color", "red"), ("storage", "128gb")]).unwrap();
        assert_eq!(
            phone.typed(ProductKind::Phone).unwrap(),
            TypedOptions::Phone(PhoneOptions {
                color: Some("red".into()),
                storage: Some("128gb".into()),
            })
        );
        assert!(phone.typed(ProductKind::Laptop).is_err());
        assert!(matches!(
            VariantOptions::from_pairs([("color", "red"), ("ram", "8gb")])
                .unwrap()
                .typed(ProductKind::Phone),
            Err(ServiceError::MalformedOptions(_))
        ));
        assert_eq!("Laptop".parse::<ProductKind>().unwrap(), ProductKind::Laptop);

        let laptop: VariantOptions = LaptopOptions {
            config: "i7-16gb".into(),
        }
        .into();
        assert_eq!(laptop.variant_key().unwrap().as_str(), "config:i7-16gb");
        assert_eq!(
            VariantOptions::new().typed(ProductKind::Phone).unwrap(),
            TypedOptions::Base
        );
    }

    #[test]
    fn phone_definition_expands_to_color_storage_grid() {
        let definition = VariantDefinition::parse(Some(
            r#"{"colors":[{"name":"red"},{"name":"black","image":"b.png"}],
                "storages":[{"name":"128gb"},{"name":"256gb","price":27990000}]}"#,
        ))
        .unwrap()
        .unwrap();

        let keys: Vec<String> = definition
            .expand()
            .unwrap()
            .iter()
            .filter_map(VariantOptions::variant_key)
            .map(|k| k.to_string())
            .collect();
        assert_eq!(
            keys,
            vec![
                "color:red|storage:128gb",
                "color:red|storage:256gb",
                "color:black|storage:128gb",
                "color:black|storage:256gb",
            ]
        );
        let key = VariantOptions::from_pairs([("storage", "256gb"), ("color", "black")])
            .unwrap()
            .variant_key()
            .unwrap();
        assert!(definition.allows(&key).unwrap());
    }

    #[test]
    fn laptop_definition_expands_to_configs() {
        let definition = VariantDefinition {
            configs: vec![
                VariantChoice {
                    name: "i5-8gb".into(),
                    price: None,
                    image: None,
                },
                VariantChoice {
                    name: "i7-16gb".into(),
                    price: Some(32_000_000),
                    image: None,
                },
            ],
            ..Default::default()
        };
        assert_eq!(definition.expand().unwrap().len(), 2);
        assert!(VariantDefinition::parse(Some("")).unwrap().is_none());
    }

    fn option_pairs() -> impl Strategy<Value = (Vec<(String, String)>, Vec<(String, String)>)> {
        prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{1,8}", 0..6).prop_flat_map(|map| {
            let pairs: Vec<(String, String)> = map.into_iter().collect();
            (Just(pairs.clone()), Just(pairs).prop_shuffle())
        })
    }

    proptest! {
        #[test]
        fn key_ignores_insertion_order((ordered, shuffled) in option_pairs()) {
            let a = VariantOptions::from_pairs(ordered).unwrap();
            let b = VariantOptions::from_pairs(shuffled).unwrap();
            prop_assert_eq!(a.variant_key(), b.variant_key());
        }

        #[test]
        fn json_object_order_does_not_matter((ordered, shuffled) in option_pairs()) {
            let to_object = |pairs: &[(String, String)]| {
                let body = pairs
                    .iter()
                    .map(|(k, v)| format!("\"{}\":\"{}\"", k, v))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{{{}}}", body)
            };
            let a = VariantOptions::parse_json(Some(&to_object(&ordered))).unwrap();
            let b = VariantOptions::parse_json(Some(&to_object(&shuffled))).unwrap();
            prop_assert_eq!(a.variant_key(), b.variant_key());
        }
    }
}
