use std::collections::BTreeMap;

use pausegate_core::errors::BindingError;
use pausegate_core::traits::{ArtifactStore, ParameterDefinition};
use pausegate_core::types::{BoundValue, ParameterValue, RawEntry};
use serde_json::Value;

/// A submission that passed every definition but has not touched storage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prepared {
    values: BTreeMap<String, ParameterValue>,
    injected: Option<(String, String)>,
}

/// Match each raw entry to its definition and materialize it.
///
/// Each entry must match a definition by name. Definitions may decline an
/// entry, which is skipped. `injected` adds a `(slot, principal name)`
/// entry. Nothing is stored, so a failure here leaves no trace.
pub fn prepare<D: ParameterDefinition>(
    defs: &[D],
    raw: &[RawEntry],
    injected: Option<(&str, &str)>,
) -> Result<Prepared, BindingError> {
    let mut values = BTreeMap::new();
    for entry in raw {
        let def = defs
            .iter()
            .rev()
            .find(|d| d.name() == entry.name)
            .ok_or_else(|| BindingError::UnknownParameter(entry.name.clone()))?;

        if let Some(value) = def.create_value(entry)? {
            values.insert(entry.name.clone(), value);
        }
    }
    Ok(Prepared {
        values,
        injected: injected.map(|(slot, name)| (slot.to_string(), name.to_string())),
    })
}

impl Prepared {
    /// Write uploads into `artifacts` under the parameter name and build the
    /// value handed to the resumed graph. Uploads bind as their stored path.
    /// Zero entries bind to `None`, one to that value, more to a name-keyed
    /// map.
    pub fn store(self, artifacts: &dyn ArtifactStore) -> Result<Option<BoundValue>, BindingError> {
        let mut bound: BTreeMap<String, Value> = BTreeMap::new();
        for (name, value) in self.values {
            let value = match value {
                ParameterValue::Plain(v) => v,
                ParameterValue::Upload(content) => {
                    let stored = artifacts
                        .store_artifact(&name, &mut content.as_slice())
                        .map_err(|source| BindingError::Storage {
                            name: name.clone(),
                            source,
                        })?;
                    Value::String(stored.display().to_string())
                }
            };
            bound.insert(name, value);
        }

        if let Some((slot, principal)) = self.injected {
            bound.insert(slot, Value::String(principal));
        }

        Ok(match bound.len() {
            0 => None,
            1 => bound.into_values().next().map(BoundValue::Single),
            _ => Some(BoundValue::Map(bound)),
        })
    }
}
