use std::fmt;

use serde::{Deserialize, Serialize};

use edgechat_core::ChatError;

/// A reading published by an environment sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub humidity: f64,
    pub temperature: f64,
}

impl SensorReading {
    /// Decode a JSON payload. Both fields are required; extra fields are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, ChatError> {
        serde_json::from_slice(payload).map_err(|e| ChatError::Decode(e.to_string()))
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `{:?}` keeps the decimal point on whole numbers: 21.0, not 21.
        write!(
            f,
            "SensorReading(humidity={:?}, temperature={:?})",
            self.humidity, self.temperature
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reading() {
        let reading = SensorReading::decode(br#"{"humidity":55.2,"temperature":21.0}"#).unwrap();
        assert_eq!(reading.humidity, 55.2);
        assert_eq!(reading.temperature, 21.0);
    }

    #[test]
    fn test_decode_integers_and_extra_fields() {
        let reading =
            SensorReading::decode(br#"{"humidity":40,"temperature":-3,"battery":0.8}"#).unwrap();
        assert_eq!(reading.humidity, 40.0);
        assert_eq!(reading.temperature, -3.0);
    }

    #[test]
    fn test_decode_rejects_non_conforming() {
        assert!(matches!(
            SensorReading::decode(br#"{"bad":1}"#),
            Err(ChatError::Decode(_))
        ));
        assert!(SensorReading::decode(br#"{"humidity":"wet","temperature":1}"#).is_err());
        assert!(SensorReading::decode(b"not json").is_err());
        assert!(SensorReading::decode(b"").is_err());
    }

    #[test]
    fn test_display_keeps_decimals() {
        let reading = SensorReading {
            humidity: 55.2,
            temperature: 21.0,
        };
        assert_eq!(
            reading.to_string(),
            "SensorReading(humidity=55.2, temperature=21.0)"
        );
    }
}
