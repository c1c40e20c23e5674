use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

pub type Attributes = HashMap<String, Value>;

//One attribute map per charge point plus a single site-wide grid map.
//Writes come from the connector loop only, reads from any host task.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    charge_points: HashMap<String, Attributes>,
    grid: Attributes,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    //merge; keys not present in values keep their previous value
    pub fn upsert(&self, evse_id: &str, values: Attributes) {
        let mut inner = self.write();
        let charge_point = inner.charge_points.entry(evse_id.to_string()).or_default();

        for (key, value) in values {
            charge_point.insert(key, value);
        }
    }

    //grid telemetry always arrives as a complete snapshot, so replace
    pub fn set_grid(&self, values: Attributes) {
        self.write().grid = values;
    }

    pub fn charge_point(&self, evse_id: &str) -> Option<Attributes> {
        self.read().charge_points.get(evse_id).cloned()
    }

    pub fn charge_point_ids(&self) -> Vec<String> {
        self.read().charge_points.keys().cloned().collect()
    }

    pub fn grid(&self) -> Attributes {
        self.read().grid.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    fn attributes(value: serde_json::Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn upserts_merge_per_key() {
        let store = StateStore::new();

        store.upsert("101", attributes(json!({"model_type": "X", "actual_kwh": 2})));
        store.upsert("101", attributes(json!({"actual_kwh": 3, "activity": "charging"})));

        assert_json_eq!(
            serde_json::to_value(store.charge_point("101").unwrap()).unwrap(),
            json!({"model_type": "X", "actual_kwh": 3, "activity": "charging"})
        );
    }

    #[test]
    fn charge_points_are_independent() {
        let store = StateStore::new();

        store.upsert("101", attributes(json!({"model_type": "X"})));
        store.upsert("102", attributes(json!({"model_type": "Y"})));

        let mut ids = store.charge_point_ids();
        ids.sort();
        assert_eq!(ids, vec!["101", "102"]);
        assert_eq!(
            store.charge_point("102").unwrap().get("model_type"),
            Some(&json!("Y"))
        );
    }

    #[test]
    fn unknown_charge_point_is_none() {
        assert!(StateStore::new().charge_point("999").is_none());
    }

    #[test]
    fn grid_is_replaced_wholesale() {
        let store = StateStore::new();

        store.set_grid(attributes(json!({"grid_actual_p1": 12, "grid_actual_p2": 14})));
        store.set_grid(attributes(json!({"grid_actual_p1": 10})));

        assert_json_eq!(
            serde_json::to_value(store.grid()).unwrap(),
            json!({"grid_actual_p1": 10})
        );
    }
}
