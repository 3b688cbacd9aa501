//! Declarative selector rules and their on-disk form.
//!
//! A [`SelectorConfig`] maps top-level field keys (`title`, `reviews`, ...) to
//! [`SelectorRule`]s. Composite fields nest further rules by name, and any
//! rule in the tree is addressable by a dotted key such as
//! `reviews.review_block.reviewer`.

use chrono::{DateTime, Utc};
use scraper::node::Element;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::utils::fs::write_atomic;
use crate::utils::{AppError, Result};

/// Field keys understood by the extractor.
pub mod keys {
    pub const TITLE: &str = "title";
    pub const PRICE: &str = "price";
    pub const DESCRIPTION: &str = "description";
    pub const CHARACTERISTICS: &str = "characteristics";
    pub const RATING: &str = "rating";
    pub const REVIEWS: &str = "reviews";

    // Nested rule names
    pub const PAIR: &str = "pair";
    pub const KEY: &str = "key";
    pub const VALUE: &str = "value";
    pub const EXCLUDE: &str = "exclude";
    pub const REVIEW_BLOCK: &str = "review_block";
    pub const REVIEWER: &str = "reviewer";
    pub const DATE: &str = "date";
    pub const COMMENT: &str = "comment";
    pub const PRODUCT_COLOR: &str = "product_color";
    pub const MEDIA: &str = "media";
    pub const ICON: &str = "icon";
}

const DEFAULT_TEMPLATE: &str = include_str!("../config/selectors.default.json");

/// Tag + class locator for one field, with optional nested rules for
/// composite fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorRule {
    /// Element name, or `*` for any element.
    pub tag: String,
    /// Class string. One token matches any element carrying it; several
    /// tokens must equal the element's whole class list, in order.
    pub class: Option<String>,
    /// Attribute to read instead of text content.
    pub attr: Option<String>,
    /// Inline-style fragment marking an "active" rating icon.
    pub highlight_color: Option<String>,
    pub nested: BTreeMap<String, SelectorRule>,
}

impl SelectorRule {
    pub fn new(tag: impl Into<String>, class: Option<&str>) -> Self {
        Self {
            tag: tag.into(),
            class: class.map(str::to_string),
            attr: None,
            highlight_color: None,
            nested: BTreeMap::new(),
        }
    }

    pub fn with_nested(mut self, name: impl Into<String>, rule: SelectorRule) -> Self {
        self.nested.insert(name.into(), rule);
        self
    }

    pub fn nested(&self, name: &str) -> Option<&SelectorRule> {
        self.nested.get(name)
    }

    pub fn matches(&self, element: &Element) -> bool {
        if self.tag != "*" && !element.name().eq_ignore_ascii_case(&self.tag) {
            return false;
        }

        let Some(class) = &self.class else {
            return true;
        };
        let wanted: Vec<&str> = class.split_whitespace().collect();
        let actual: Vec<&str> = element
            .attr("class")
            .map(|raw| raw.split_whitespace().collect())
            .unwrap_or_default();

        match wanted.as_slice() {
            [] => true,
            [single] => actual.contains(single),
            _ => wanted == actual,
        }
    }

    /// Builds a rule from a JSON object. Returns `None` when the object has
    /// no string `tag`. Unknown scalar keys are ignored; object-valued keys
    /// that are themselves valid rules become nested rules.
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let tag = object.get("tag")?.as_str()?.to_string();
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

        let mut rule = SelectorRule {
            tag,
            class: text("class"),
            attr: text("attr"),
            highlight_color: text("highlight_color"),
            nested: BTreeMap::new(),
        };

        for (name, child) in object {
            if !child.is_object() {
                continue;
            }
            match SelectorRule::from_value(child) {
                Some(nested) => {
                    rule.nested.insert(name.clone(), nested);
                }
                None => debug!(rule = %name, "ignoring nested object without a tag"),
            }
        }

        Some(rule)
    }

    fn walk<F: FnMut(&str, &SelectorRule)>(&self, key: &str, f: &mut F) {
        f(key, self);
        for (name, child) in &self.nested {
            child.walk(&format!("{}.{}", key, name), f);
        }
    }

    fn walk_mut<F: FnMut(&str, &mut SelectorRule)>(&mut self, key: &str, f: &mut F) {
        f(key, self);
        for (name, child) in self.nested.iter_mut() {
            child.walk_mut(&format!("{}.{}", key, name), f);
        }
    }
}

impl Serialize for SelectorRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("tag", &self.tag)?;
        if let Some(class) = &self.class {
            map.serialize_entry("class", class)?;
        }
        if let Some(attr) = &self.attr {
            map.serialize_entry("attr", attr)?;
        }
        if let Some(color) = &self.highlight_color {
            map.serialize_entry("highlight_color", color)?;
        }
        for (name, child) in &self.nested {
            map.serialize_entry(name, child)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SelectorRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        SelectorRule::from_value(&value).ok_or_else(|| D::Error::custom("selector rule requires a string \"tag\""))
    }
}

/// Versioned rule set for one target site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectorConfig {
    /// Bumped on every repair that changes a rule.
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    selectors: BTreeMap<String, SelectorRule>,
}

impl SelectorConfig {
    pub fn new(version: u64, selectors: BTreeMap<String, SelectorRule>) -> Self {
        Self {
            version,
            updated_at: None,
            selectors,
        }
    }

    /// Reads a config file. Only an unreadable file is an error; broken
    /// content degrades to an empty rule set.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| AppError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&text);
        debug!(path = %path.display(), version = config.version, rules = config.len(), "selector config loaded");
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Self {
        let root: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "selector config is not valid JSON, using empty rule set");
                return Self::default();
            }
        };

        let version = root.get("version").and_then(Value::as_u64).unwrap_or(0);
        let updated_at = root
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let mut selectors = BTreeMap::new();
        match root.get("selectors").and_then(Value::as_object) {
            Some(section) => {
                for (key, value) in section {
                    match SelectorRule::from_value(value) {
                        Some(rule) => {
                            selectors.insert(key.clone(), rule);
                        }
                        None => warn!(field = %key, "skipping malformed selector rule"),
                    }
                }
            }
            None => warn!("selector config has no \"selectors\" object, using empty rule set"),
        }

        Self {
            version,
            updated_at,
            selectors,
        }
    }

    /// Built-in rules for the original target site.
    pub fn default_template() -> Self {
        Self::from_json_str(DEFAULT_TEMPLATE)
    }

    /// Pretty JSON with non-ASCII text left unescaped, newline-terminated.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');
        Ok(data)
    }

    /// Writes [`Self::to_json_bytes`] atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = self.to_json_bytes()?;
        write_atomic(path, &data).map_err(|source| AppError::persist(path, source))?;
        debug!(path = %path.display(), version = self.version, "selector config saved");
        Ok(())
    }

    /// Looks up a dotted field key. `None` is the "not found" sentinel.
    pub fn resolve(&self, field_key: &str) -> Option<&SelectorRule> {
        let mut parts = field_key.split('.');
        let mut rule = self.selectors.get(parts.next()?)?;
        for part in parts {
            rule = rule.nested.get(part)?;
        }
        Some(rule)
    }

    pub fn insert(&mut self, field_key: impl Into<String>, rule: SelectorRule) {
        self.selectors.insert(field_key.into(), rule);
    }

    /// Number of top-level rules.
    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// Visits every rule, nested ones included, depth first with its dotted key.
    pub fn for_each_rule<F: FnMut(&str, &SelectorRule)>(&self, mut f: F) {
        for (key, rule) in &self.selectors {
            rule.walk(key, &mut f);
        }
    }

    pub fn for_each_rule_mut<F: FnMut(&str, &mut SelectorRule)>(&mut self, mut f: F) {
        for (key, rule) in self.selectors.iter_mut() {
            rule.walk_mut(key, &mut f);
        }
    }
}

/// Shared holder of the live config. Readers take cheap snapshots; repair
/// takes the write guard for the whole patch-and-persist step.
pub struct SelectorStore {
    path: PathBuf,
    current: RwLock<Arc<SelectorConfig>>,
}

impl SelectorStore {
    /// Loads `path`, falling back to an empty rule set when it cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match SelectorConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "continuing with empty selector rules");
                SelectorConfig::default()
            }
        };
        info!(path = %path.display(), version = config.version, rules = config.len(), "selector store ready");
        Self::with_config(path, config)
    }

    pub fn with_config(path: impl Into<PathBuf>, config: SelectorConfig) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consistent view for one extraction; never changes underneath the caller.
    pub async fn snapshot(&self) -> Arc<SelectorConfig> {
        self.current.read().await.clone()
    }

    /// Exclusive access. Readers wait until the guard is dropped.
    pub async fn write(&self) -> RwLockWriteGuard<'_, Arc<SelectorConfig>> {
        self.current.write().await
    }

    pub async fn reload(&self) -> Result<()> {
        let config = SelectorConfig::load(&self.path)?;
        *self.current.write().await = Arc::new(config);
        Ok(())
    }
}
