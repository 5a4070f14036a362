//! JSON has no representation for NaN or infinities. A diverging run or an
//! untouched `monitor_best` produces exactly those, so they are written as
//! the strings `"NaN"`, `"inf"` and `"-inf"` and read back losslessly.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Number(f64),
    Tag(String),
}

pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_sign_positive() {
        serializer.serialize_str("inf")
    } else {
        serializer.serialize_str("-inf")
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Repr::deserialize(deserializer)? {
        Repr::Number(value) => Ok(value),
        Repr::Tag(tag) => match tag.as_str() {
            "NaN" => Ok(f64::NAN),
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            other => Err(serde::de::Error::custom(format!(
                "expected a number, 'NaN', 'inf' or '-inf', got '{other}'"
            ))),
        },
    }
}

#[derive(Serialize, Deserialize)]
struct Scalar(#[serde(with = "self")] f64);

/// Same encoding for every value of a name -> scalar map.
pub mod map {
    use super::*;

    pub fn serialize<S: Serializer>(
        values: &BTreeMap<String, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(values.iter().map(|(k, v)| (k, Scalar(*v))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, f64>, D::Error> {
        let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "crate::serde_float")]
        value: f64,
        #[serde(with = "crate::serde_float::map")]
        values: BTreeMap<String, f64>,
    }

    #[test]
    fn test_non_finite_values_survive_json() {
        let mut values = BTreeMap::new();
        values.insert("loss".to_string(), f64::NAN);
        values.insert("gap".to_string(), -0.25);
        let holder = Holder {
            value: f64::INFINITY,
            values,
        };

        let json = serde_json::to_string(&holder).unwrap();
        assert!(json.contains("\"inf\""));
        assert!(json.contains("\"NaN\""));

        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, f64::INFINITY);
        assert!(back.values["loss"].is_nan());
        assert_eq!(back.values["gap"], -0.25);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let json = r#"{"value": "infinity", "values": {}}"#;
        assert!(serde_json::from_str::<Holder>(json).is_err());
    }
}
