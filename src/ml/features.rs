use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureMapError {
    #[error("feature name at slot {slot} is blank")]
    BlankName { slot: usize },
    #[error("feature '{name}' declared at slots {first} and {second}")]
    DuplicateName {
        name: String,
        first: usize,
        second: usize,
    },
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
}

/// Ordered feature name -> slot mapping, in the order the model sees features
/// at inference time. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureMap {
    names: Vec<String>,
    slots: HashMap<String, usize>,
}

impl FeatureMap {
    pub fn new<I, S>(names: I) -> Result<Self, FeatureMapError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut slots = HashMap::new();

        for (slot, name) in names.into_iter().enumerate() {
            let name: String = name.into();
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(FeatureMapError::BlankName { slot });
            }
            if let Some(&first) = slots.get(&name) {
                return Err(FeatureMapError::DuplicateName {
                    name,
                    first,
                    second: slot,
                });
            }
            slots.insert(name.clone(), slot);
            ordered.push(name);
        }

        Ok(Self {
            names: ordered,
            slots,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn slot(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    pub fn name(&self, slot: usize) -> Option<&str> {
        self.names.get(slot).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Slots in ascending order with their names
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i, n.as_str()))
    }

    /// Build an ordered feature buffer from named values.
    /// Features without a value become NaN, which evaluators treat as missing.
    pub fn vectorize(&self, values: &HashMap<String, f64>) -> Result<Vec<f64>, FeatureMapError> {
        let mut buffer = vec![f64::NAN; self.names.len()];
        for (name, &value) in values {
            let slot = self
                .slot(name)
                .ok_or_else(|| FeatureMapError::UnknownFeature(name.clone()))?;
            buffer[slot] = value;
        }
        Ok(buffer)
    }
}
