//! Option catalogs supplied by the backend and the bundle merge.
//!
//! The backend's open reply carries two read-only catalogs:
//!
//! - `availableoptions.spark_options`: known option names, used for
//!   suggestions while the user types
//! - `availablebundles.bundled_options`: named presets of option values
//!
//! ## Merge semantics
//!
//! [`merge_options`] starts from the user's explicit options and applies the
//! chosen bundles in the order they were chosen. A bundle option whose name
//! is not yet set is inserted. When the name is already set, the bundle value
//! is appended with the option's `concatenate` separator if it declares a
//! non-empty one; otherwise the existing value wins.

use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::metadata::SparkOpt;

/// Placeholder in option suggestions that the user replaces with an
/// environment variable name (e.g. `spark.executorEnv.[EnvironmentVariableName]`).
pub const ENV_VAR_PLACEHOLDER: &str = "[EnvironmentVariableName]";

/// Category used when a catalog entry does not declare one.
pub const DEFAULT_CATEGORY: &str = "Spark";

/// The backend sent catalog data that does not match the expected shape.
///
/// This is a contract mismatch between backend and panel, not a runtime
/// condition: the phase that needed the catalog is not rendered.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{field} must be {expected}")]
    WrongShape {
        field: &'static str,
        expected: &'static str,
    },

    #[error("spark option #{index} is invalid: {reason}")]
    InvalidOption { index: usize, reason: &'static str },

    #[error("bundle {name:?} is malformed: {source}")]
    InvalidBundle {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

// ── Bundles ──────────────────────────────────────────────────────────

/// One option inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct BundleOption {
    pub name: String,
    pub value: String,
    /// Separator used to append this value to a user-set value of the same name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concatenate: Option<String>,
}

impl BundleOption {
    fn separator(&self) -> Option<&str> {
        self.concatenate.as_deref().filter(|s| !s.is_empty())
    }
}

/// A named preset of option values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionBundle {
    #[serde(default)]
    pub options: Vec<BundleOption>,
    /// Spark versions this bundle is offered for. Empty means all.
    #[serde(default)]
    pub spark_version_filter: Vec<String>,
    /// Clusters this bundle is offered for. Empty means all.
    #[serde(default)]
    pub cluster_filter: Vec<String>,
}

impl OptionBundle {
    /// Whether the bundle should be offered for this cluster context.
    ///
    /// An unknown version or cluster does not exclude a bundle.
    pub fn applies_to(&self, spark_version: Option<&str>, cluster: Option<&str>) -> bool {
        fn allowed(filter: &[String], value: Option<&str>) -> bool {
            match value {
                Some(v) if !filter.is_empty() => filter.iter().any(|f| f == v),
                _ => true,
            }
        }
        allowed(&self.spark_version_filter, spark_version) && allowed(&self.cluster_filter, cluster)
    }
}

/// All bundles offered by the backend, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleCatalog {
    bundles: BTreeMap<String, OptionBundle>,
}

impl BundleCatalog {
    /// Parse the `availablebundles` value of an open reply.
    pub fn from_value(value: Option<&Value>) -> Result<Self, CatalogError> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(Self::default());
        };
        let root = value.as_object().ok_or(CatalogError::WrongShape {
            field: "availablebundles",
            expected: "an object",
        })?;
        let Some(entries) = root.get("bundled_options").filter(|v| !v.is_null()) else {
            return Ok(Self::default());
        };
        let entries = entries.as_object().ok_or(CatalogError::WrongShape {
            field: "availablebundles.bundled_options",
            expected: "an object",
        })?;

        let mut bundles = BTreeMap::new();
        for (name, entry) in entries {
            let bundle = OptionBundle::deserialize(entry).map_err(|source| {
                CatalogError::InvalidBundle {
                    name: name.clone(),
                    source,
                }
            })?;
            bundles.insert(name.clone(), bundle);
        }
        Ok(Self { bundles })
    }

    pub fn get(&self, name: &str) -> Option<&OptionBundle> {
        self.bundles.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, bundle: OptionBundle) {
        self.bundles.insert(name.into(), bundle);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionBundle)> {
        self.bundles.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Bundles offered for a given cluster context, by name.
    pub fn available_for<'a>(
        &'a self,
        spark_version: Option<&'a str>,
        cluster: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a str, &'a OptionBundle)> + 'a {
        self.iter()
            .filter(move |(_, b)| b.applies_to(spark_version, cluster))
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

/// Merge explicit options with the chosen bundles.
///
/// Deterministic: the result depends only on `options`, the order of
/// `chosen` and the catalog. Chosen bundles missing from the catalog are
/// skipped.
pub fn merge_options(
    options: &[SparkOpt],
    chosen: &[String],
    catalog: &BundleCatalog,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = options
        .iter()
        .map(|o| (o.name.clone(), o.value.clone()))
        .collect();

    for bundle_name in chosen {
        let Some(bundle) = catalog.get(bundle_name) else {
            warn!("[bundles] Skipping unknown bundle {:?}", bundle_name);
            continue;
        };
        for option in &bundle.options {
            match merged.get_mut(&option.name) {
                Some(existing) => {
                    if let Some(separator) = option.separator() {
                        existing.push_str(separator);
                        existing.push_str(&option.value);
                    }
                }
                None => {
                    merged.insert(option.name.clone(), option.value.clone());
                }
            }
        }
    }
    merged
}

// ── Option catalog ───────────────────────────────────────────────────

/// A known option name with its display category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct CatalogOption {
    pub value: String,
    pub category: String,
}

/// Known option names, used for suggestions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionCatalog {
    options: Vec<CatalogOption>,
}

impl OptionCatalog {
    /// Parse the `availableoptions` value of an open reply.
    ///
    /// Each `spark_options` entry is either a primitive (the option name) or
    /// an object `{"value": <primitive>, "data": {"category": <primitive>}}`.
    pub fn from_value(value: Option<&Value>) -> Result<Self, CatalogError> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(Self::default());
        };
        let root = value.as_object().ok_or(CatalogError::WrongShape {
            field: "availableoptions",
            expected: "an object",
        })?;
        let Some(entries) = root.get("spark_options").filter(|v| !v.is_null()) else {
            return Ok(Self::default());
        };
        let entries = entries.as_array().ok_or(CatalogError::WrongShape {
            field: "availableoptions.spark_options",
            expected: "an array",
        })?;

        let options = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| parse_catalog_entry(index, entry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { options })
    }

    pub fn from_options(options: Vec<CatalogOption>) -> Self {
        Self { options }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogOption> {
        self.options.iter()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Option names containing `query`, case-insensitively, in catalog order.
    pub fn suggestions(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();
        self.options
            .iter()
            .map(|o| o.value.as_str())
            .filter(|v| v.to_lowercase().contains(&query))
            .collect()
    }

    /// Option names grouped by category.
    pub fn groups(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for option in &self.options {
            groups
                .entry(option.category.as_str())
                .or_default()
                .push(option.value.as_str());
        }
        groups
    }
}

fn primitive_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_catalog_entry(index: usize, entry: &Value) -> Result<CatalogOption, CatalogError> {
    if let Some(value) = primitive_to_string(entry) {
        return Ok(CatalogOption {
            value,
            category: DEFAULT_CATEGORY.to_string(),
        });
    }
    let object = entry.as_object().ok_or(CatalogError::InvalidOption {
        index,
        reason: "spark option value not found",
    })?;
    let value = object
        .get("value")
        .and_then(primitive_to_string)
        .ok_or(CatalogError::InvalidOption {
            index,
            reason: "spark option invalid",
        })?;
    let category = object
        .get("data")
        .and_then(|d| d.get("category"))
        .and_then(primitive_to_string)
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
    Ok(CatalogOption { value, category })
}

/// The editable prefix of a suggestion containing [`ENV_VAR_PLACEHOLDER`].
///
/// Choosing `spark.executorEnv.[EnvironmentVariableName]` leaves the user
/// with `spark.executorEnv.` to complete.
pub fn env_var_prefix(suggestion: &str) -> Option<&str> {
    suggestion
        .find(ENV_VAR_PLACEHOLDER)
        .map(|idx| &suggestion[..idx])
}
