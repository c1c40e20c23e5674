use std::collections::HashMap;

use anyhow::{Context, bail};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::state::Attributes;

pub const ACTIVITY: &str = "activity";
pub const AVAILABLE: &str = "available";
pub const EVSE_ID: &str = "evse_id";
pub const UNAVAILABLE: &str = "unavailable";

const RESULT: &str = "result";

const VALUE_OBJECTS: [&str; 2] = ["CH_STATUS", "CH_SETTINGS"];
const SETTING_OBJECTS: [&str; 3] = ["AVAILABLE", "PUBLIC_CHARGING", "PLUG_AND_CHARGE"];
const COMMAND_OBJECTS: [&str; 4] = ["SOFT_RESET", "REBOOT", "START_SESSION", "STOP_SESSION"];

//Vendor timestamps arrive as e.g. "20230118 14:11:23" (UTC)
const TIMESTAMP_KEYS: [&str; 3] = ["start_session", "stop_session", "offline_since"];
const VENDOR_TIMESTAMP_FORMAT: &str = "%Y%m%d %H:%M:%S";

//Setting and command acknowledgments carry their fields (evse_id, result) at
//the top level, everything else nests under data.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    pub object: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTopic {
    ChargePointList,
    ChargePointValues,
    GridStatus,
    SettingResult,
    CommandResult,
    Unknown,
}

impl ApiMessage {
    pub fn topic(&self) -> MessageTopic {
        let object = self.object.as_str();

        if object == "CHARGE_POINTS" {
            MessageTopic::ChargePointList
        } else if VALUE_OBJECTS.contains(&object) {
            MessageTopic::ChargePointValues
        } else if object == "GRID_STATUS" {
            MessageTopic::GridStatus
        } else if SETTING_OBJECTS.contains(&object) {
            MessageTopic::SettingResult
        } else if COMMAND_OBJECTS.contains(&object) {
            MessageTopic::CommandResult
        } else {
            MessageTopic::Unknown
        }
    }

    pub fn evse_id(&self) -> Option<&str> {
        self.extra.get(EVSE_ID).and_then(Value::as_str)
    }

    //list entries: id plus the remaining fields (model_type, name, ...) as
    //initial attributes
    pub(crate) fn charge_point_list(&self) -> anyhow::Result<Vec<(String, Attributes)>> {
        let data = self
            .data
            .as_ref()
            .and_then(Value::as_array)
            .context("charge point list without data array")?;

        data.iter()
            .map(|entry| {
                let entry = entry.as_object().context("charge point entry is not an object")?;
                let mut attributes: Attributes = entry
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();

                match attributes.remove(EVSE_ID).as_ref().and_then(Value::as_str) {
                    Some(evse_id) => Ok((evse_id.to_string(), attributes)),
                    None => bail!("charge point entry without evse_id: {:?}", entry),
                }
            })
            .collect()
    }

    pub(crate) fn charge_point_values(&self) -> anyhow::Result<(String, Attributes)> {
        let mut values = self.data_object()?;

        match values.remove(EVSE_ID).as_ref().and_then(Value::as_str) {
            Some(evse_id) => Ok((evse_id.to_string(), values)),
            None => bail!("{} message without evse_id", self.object),
        }
    }

    pub(crate) fn grid_values(&self) -> anyhow::Result<Attributes> {
        self.data_object()
    }

    pub(crate) fn setting_result(&self) -> anyhow::Result<(String, Value)> {
        let evse_id = self
            .evse_id()
            .with_context(|| format!("{} result without evse_id", self.object))?;
        let result = self
            .extra
            .get(RESULT)
            .with_context(|| format!("{} message without result", self.object))?;

        Ok((evse_id.to_string(), result.clone()))
    }

    fn data_object(&self) -> anyhow::Result<Attributes> {
        let data = self
            .data
            .as_ref()
            .and_then(Value::as_object)
            .with_context(|| format!("{} message without data object", self.object))?;

        Ok(data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

//translations applied to charge point values before they are merged
pub(crate) fn apply_value_translations(values: &mut Attributes) {
    derive_availability(values);
    normalize_timestamps(values);
}

//The vendor reports either an activity string (status) or an availability
//flag (settings). The counterpart is derived so consumers see both.
fn derive_availability(values: &mut Attributes) {
    let activity = values
        .get(ACTIVITY)
        .and_then(Value::as_str)
        .map(|activity| activity == AVAILABLE);

    if let Some(available) = activity {
        values.insert(AVAILABLE.to_string(), Value::Bool(available));
        return;
    }

    if let Some(available) = values.get(AVAILABLE).and_then(Value::as_bool) {
        let activity = if available { AVAILABLE } else { UNAVAILABLE };
        values.insert(ACTIVITY.to_string(), Value::String(activity.to_string()));
    }
}

fn normalize_timestamps(values: &mut Attributes) {
    for key in TIMESTAMP_KEYS {
        let normalized = match values.get(key).and_then(Value::as_str) {
            Some(raw) => match NaiveDateTime::parse_from_str(raw, VENDOR_TIMESTAMP_FORMAT) {
                Ok(timestamp) => Some(timestamp.and_utc().to_rfc3339()),
                Err(_) => {
                    tracing::debug!("Leaving {} timestamp as-is: {:?}", key, raw);
                    None
                }
            },
            None => None,
        };

        if let Some(timestamp) = normalized {
            values.insert(key.to_string(), Value::String(timestamp));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    fn message(value: Value) -> ApiMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn classifies_by_object() {
        let cases = [
            ("CHARGE_POINTS", MessageTopic::ChargePointList),
            ("CH_STATUS", MessageTopic::ChargePointValues),
            ("CH_SETTINGS", MessageTopic::ChargePointValues),
            ("GRID_STATUS", MessageTopic::GridStatus),
            ("AVAILABLE", MessageTopic::SettingResult),
            ("PUBLIC_CHARGING", MessageTopic::SettingResult),
            ("PLUG_AND_CHARGE", MessageTopic::SettingResult),
            ("SOFT_RESET", MessageTopic::CommandResult),
            ("REBOOT", MessageTopic::CommandResult),
            ("START_SESSION", MessageTopic::CommandResult),
            ("STOP_SESSION", MessageTopic::CommandResult),
            ("FUTURE_OBJECT", MessageTopic::Unknown),
        ];

        for (object, expected) in cases {
            assert_eq!(message(json!({"object": object})).topic(), expected, "{}", object);
        }
    }

    #[test]
    fn splits_evse_id_from_values() {
        let msg = message(json!({
            "object": "CH_STATUS",
            "data": {"evse_id": "101", "activity": "charging", "actual_kwh": 11.2}
        }));

        let (evse_id, values) = msg.charge_point_values().unwrap();
        assert_eq!(evse_id, "101");
        assert_json_eq!(
            serde_json::to_value(values).unwrap(),
            json!({"activity": "charging", "actual_kwh": 11.2})
        );
    }

    #[test]
    fn values_without_evse_id_are_rejected() {
        let msg = message(json!({"object": "CH_STATUS", "data": {"activity": "charging"}}));
        assert!(msg.charge_point_values().is_err());
    }

    #[test]
    fn parses_charge_point_list() {
        let msg = message(json!({
            "object": "CHARGE_POINTS",
            "data": [
                {"evse_id": "101", "model_type": "X", "name": "Driveway"},
                {"evse_id": "102", "model_type": "Y", "name": ""}
            ]
        }));

        let entries = msg.charge_point_list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "101");
        assert_json_eq!(
            serde_json::to_value(&entries[0].1).unwrap(),
            json!({"model_type": "X", "name": "Driveway"})
        );
    }

    #[test]
    fn setting_result_uses_top_level_fields() {
        let msg = message(json!({
            "object": "PUBLIC_CHARGING",
            "evse_id": "101",
            "result": false
        }));

        let (evse_id, result) = msg.setting_result().unwrap();
        assert_eq!(evse_id, "101");
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn available_activity_derives_available_flag() {
        let mut values: Attributes =
            serde_json::from_value(json!({"activity": "available"})).unwrap();
        apply_value_translations(&mut values);

        assert_eq!(values.get(AVAILABLE), Some(&Value::Bool(true)));
    }

    #[test]
    fn any_other_activity_is_unavailable() {
        for activity in ["charging", "offline", "error", ""] {
            let mut values: Attributes =
                serde_json::from_value(json!({"activity": activity})).unwrap();
            apply_value_translations(&mut values);

            assert_eq!(values.get(AVAILABLE), Some(&Value::Bool(false)), "{}", activity);
        }
    }

    #[test]
    fn available_flag_derives_activity() {
        let mut values: Attributes = serde_json::from_value(json!({"available": true})).unwrap();
        apply_value_translations(&mut values);
        assert_eq!(
            values.get(ACTIVITY),
            Some(&Value::String("available".to_string()))
        );

        let mut values: Attributes = serde_json::from_value(json!({"available": false})).unwrap();
        apply_value_translations(&mut values);
        assert_eq!(
            values.get(ACTIVITY),
            Some(&Value::String("unavailable".to_string()))
        );
    }

    #[test]
    fn activity_wins_over_stale_available_flag() {
        let mut values: Attributes =
            serde_json::from_value(json!({"activity": "charging", "available": true})).unwrap();
        apply_value_translations(&mut values);

        assert_eq!(values.get(AVAILABLE), Some(&Value::Bool(false)));
    }

    #[test]
    fn vendor_timestamps_become_rfc3339() {
        let mut values: Attributes =
            serde_json::from_value(json!({"start_session": "20230118 14:11:23"})).unwrap();
        apply_value_translations(&mut values);

        assert_eq!(
            values.get("start_session"),
            Some(&Value::String("2023-01-18T14:11:23+00:00".to_string()))
        );
    }

    #[test]
    fn unparsable_timestamps_pass_through() {
        let mut values: Attributes =
            serde_json::from_value(json!({"offline_since": "not a date"})).unwrap();
        apply_value_translations(&mut values);

        assert_eq!(
            values.get("offline_since"),
            Some(&Value::String("not a date".to_string()))
        );
    }
}
