use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

/// Payment notification as PortOne posts it. Every key is optional and
/// unknown keys are ignored. A value of an unexpected type decodes as absent,
/// so only a body that is not a JSON object is rejected.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortOneWebhookRequest {
    #[serde(default, deserialize_with = "lenient_id")]
    pub payment_id: Option<String>,
    #[serde(default, deserialize_with = "string_only")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_amount: Option<Number>,
    #[serde(default)]
    pub custom_data: Option<Value>,
}

/// Correlation ids the checkout page echoes through `customData`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomData {
    #[serde(default, deserialize_with = "lenient_id")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub project_id: Option<String>,
}

impl CustomData {
    fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Object(_) => serde_json::from_value(value),
            _ => Ok(Self::default()),
        }
    }
}

impl PortOneWebhookRequest {
    /// `customData` may arrive as an object or as a JSON-encoded string.
    /// Anything that is not an object carries no ids.
    pub fn custom_data(&self) -> Result<CustomData, serde_json::Error> {
        let value = match &self.custom_data {
            Some(Value::String(raw)) if !raw.is_empty() => serde_json::from_str(raw)?,
            Some(value) => value.clone(),
            None => return Ok(CustomData::default()),
        };
        CustomData::from_value(value)
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(id) => Some(id),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    })
}

fn string_only<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(value) => Some(value),
        _ => None,
    })
}

/// Accepts a number or a string holding one, e.g. `"5000"`.
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<Number>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(amount) => Some(amount),
        Value::String(amount) => serde_json::from_str::<Number>(amount.trim()).ok(),
        _ => None,
    })
}
