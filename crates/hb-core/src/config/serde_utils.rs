//! Serde helpers shared by the configuration types

/// `Duration` as whole seconds
///
/// Serializes as an integer. Deserializes from an integer or from a string
/// with an `s`, `m` or `h` suffix (`"90s"`, `"5m"`, `"1h"`), which reads
/// better for long timeouts in TOML.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Timeouts {
///     #[serde(with = "hb_core::config::serde_utils::duration_secs")]
///     submit: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    /// Parse `"<n>"`, `"<n>s"`, `"<n>m"` or `"<n>h"`
    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let (digits, multiplier) = match text.chars().last() {
            Some('s') => (&text[..text.len() - 1], 1),
            Some('m') => (&text[..text.len() - 1], 60),
            Some('h') => (&text[..text.len() - 1], 3600),
            _ => (text, 1),
        };
        let value: u64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {:?}", text))?;
        Ok(Duration::from_secs(value.saturating_mul(multiplier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "duration_secs")]
        submit: Duration,
    }

    #[test]
    fn test_serializes_as_seconds() {
        let t = Timeouts {
            submit: Duration::from_secs(10),
        };
        assert_eq!(serde_json::to_string(&t).unwrap(), r#"{"submit":10}"#);
    }

    #[test]
    fn test_deserializes_integer_and_suffixed_strings() {
        let t: Timeouts = serde_json::from_str(r#"{"submit":45}"#).unwrap();
        assert_eq!(t.submit, Duration::from_secs(45));

        let t: Timeouts = serde_json::from_str(r#"{"submit":"5m"}"#).unwrap();
        assert_eq!(t.submit, Duration::from_secs(300));

        let t: Timeouts = serde_json::from_str(r#"{"submit":"2h"}"#).unwrap();
        assert_eq!(t.submit, Duration::from_secs(7200));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(serde_json::from_str::<Timeouts>(r#"{"submit":"soon"}"#).is_err());
        assert!(duration_secs::parse("").is_err());
    }
}
