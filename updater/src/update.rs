use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One reading pushed by the wireless tag manager.
///
/// The tag manager is configured to call this service with a JSON template
/// like:
///
/// ```text
/// {"tag_name":"{0}","tag_id":"{1}","degrees_c":{2},"humidity":{3},"now":"{5}","battery":{6}}
/// ```
///
/// Every field is optional. Missing or `null` strings decode as empty and
/// missing or `null` numbers as zero. A missing `now` leaves the timestamp
/// unset so that each sink stamps the reading when it writes it.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Update {
    #[serde(rename = "tag_name", deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "tag_id", deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub degrees_c: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub humidity: f64,
    #[serde(rename = "battery", deserialize_with = "null_as_default")]
    pub battery_voltage: f64,
    #[serde(rename = "now")]
    pub timestamp: Option<DateTime<Utc>>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Update {
    /// Decodes the first JSON value in `body`, ignoring anything after it.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let mut values = serde_json::Deserializer::from_slice(body).into_iter::<Update>();
        match values.next() {
            Some(update) => update,
            // Only reachable for empty or whitespace-only bodies.
            None => serde_json::from_slice(body),
        }
    }

    /// The reading's own timestamp, or the current time if it has none.
    pub fn timestamp_or_now(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}
