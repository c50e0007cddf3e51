use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::{Mirror, Scope, Stores};

pub const FILTERS_KEY: &str = "ezamFilters";
pub const PRESETS_KEY: &str = "ezamFilterPresets";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub values: BTreeMap<String, String>,
}

/// Named filter snapshots plus the last filter fields used on this device.
pub struct PresetStore {
    presets: Vec<Preset>,
    local: Mirror,
}

impl PresetStore {
    pub fn detached() -> Self {
        Self {
            presets: Vec::new(),
            local: Mirror::detached(Scope::Local),
        }
    }

    pub fn load(stores: &Stores) -> Self {
        let mut local = Mirror::new(stores.local.clone(), Scope::Local);
        let presets = local.read(PRESETS_KEY).unwrap_or_default();
        Self { presets, local }
    }

    pub fn list(&self) -> &[Preset] {
        &self.presets
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|preset| preset.name == name)
    }

    /// A preset saved under an existing name replaces it and moves to the end.
    pub fn save(&mut self, name: &str, values: BTreeMap<String, String>) {
        self.presets.retain(|preset| preset.name != name);
        self.presets.push(Preset {
            name: name.to_string(),
            values,
        });
        self.local.write(PRESETS_KEY, &self.presets);
    }

    pub fn remember_fields(&mut self, fields: &BTreeMap<String, String>) {
        self.local.write(FILTERS_KEY, fields);
    }

    pub fn remembered_fields(&mut self) -> Option<BTreeMap<String, String>> {
        self.local.read(FILTERS_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::KeyValueStore;
    use serde_json::json;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn last_write_wins_on_name() {
        let stores = Stores::in_memory();
        let mut presets = PresetStore::load(&stores);
        presets.save("krakow", fields(&[("city", "Kraków")]));
        presets.save("soon", fields(&[("status", "closingSoon")]));
        presets.save("krakow", fields(&[("city", "Kraków"), ("starredOnly", "true")]));

        let names: Vec<_> = presets.list().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["soon", "krakow"]);
        assert_eq!(presets.get("krakow").unwrap().values.len(), 2);

        let reloaded = PresetStore::load(&stores);
        assert_eq!(reloaded.list(), presets.list());
    }

    #[test]
    fn remembered_fields_roundtrip() {
        let stores = Stores::in_memory();
        let mut presets = PresetStore::load(&stores);
        assert_eq!(presets.remembered_fields(), None);
        presets.remember_fields(&fields(&[("city", "Łódź")]));
        assert_eq!(
            stores.local.get(FILTERS_KEY).unwrap(),
            Some(json!({"city": "Łódź"}))
        );
        assert_eq!(presets.remembered_fields(), Some(fields(&[("city", "Łódź")])));
    }
}
