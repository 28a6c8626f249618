use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::dump::split_model_dump;
use super::ensemble::{Ensemble, LoadOptions, LoadedEnsemble};
use super::FeatureMap;

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Per-tree dump texts from a file.
///
/// `.json` files hold an array of strings (one per tree, as returned by
/// `Booster.get_dump()`); anything else is `dump_model` text, optionally
/// with `booster[N]:` headers.
pub fn load_tree_dumps(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read model dump {}", path.display()))?;

    let dumps = if is_json(path) {
        serde_json::from_str::<Vec<String>>(&text)
            .with_context(|| format!("Failed to parse JSON dump array in {}", path.display()))?
    } else {
        split_model_dump(&text).with_context(|| format!("Invalid model dump {}", path.display()))?
    };

    info!("Loaded {} tree dump(s) from {}", dumps.len(), path.display());
    Ok(dumps)
}

/// Ordered feature names: a JSON array, or one name per line
/// (blank lines and `#` comments skipped)
pub fn load_feature_names(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read feature list {}", path.display()))?;

    let names: Vec<String> = if is_json(path) {
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse JSON feature list in {}", path.display()))?
    } else {
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    };

    Ok(names)
}

pub fn load_ensemble(
    dump_path: impl AsRef<Path>,
    features_path: impl AsRef<Path>,
    options: &LoadOptions,
) -> Result<LoadedEnsemble> {
    let names = load_feature_names(features_path)?;
    let feature_map = FeatureMap::new(names)?;
    let dumps = load_tree_dumps(dump_path)?;
    Ok(Ensemble::load(&dumps, feature_map, options)?)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Rows {
    One(HashMap<String, Option<f64>>),
    Many(Vec<HashMap<String, Option<f64>>>),
}

/// Named feature rows from JSON: one object or an array of objects.
/// `null` values are left out so they evaluate as missing.
pub fn load_feature_rows(path: impl AsRef<Path>) -> Result<Vec<HashMap<String, f64>>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read feature rows {}", path.display()))?;
    let rows: Rows = serde_json::from_str(&text)
        .map_err(|e| anyhow!("Failed to parse feature rows in {}: {}", path.display(), e))?;

    let rows = match rows {
        Rows::One(row) => vec![row],
        Rows::Many(rows) => rows,
    };

    Ok(rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .filter_map(|(name, value)| value.map(|v| (name, v)))
                .collect()
        })
        .collect())
}
