use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Number, Value};
use strum_macros::EnumIter;
use thiserror::Error;

use crate::config::ApiKey;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, EnumIter)]
pub enum Field {
    Field1,
    Field2,
    Field3,
    Field4,
    Field5,
    Field6,
    Field7,
    Field8,
}

impl Field {
    pub fn number(self) -> u8 {
        match self {
            Field::Field1 => 1,
            Field::Field2 => 2,
            Field::Field3 => 3,
            Field::Field4 => 4,
            Field::Field5 => 5,
            Field::Field6 => 6,
            Field::Field7 => 7,
            Field::Field8 => 8,
        }
    }

    pub fn from_number(n: u8) -> Option<Field> {
        match n {
            1 => Some(Field::Field1),
            2 => Some(Field::Field2),
            3 => Some(Field::Field3),
            4 => Some(Field::Field4),
            5 => Some(Field::Field5),
            6 => Some(Field::Field6),
            7 => Some(Field::Field7),
            8 => Some(Field::Field8),
            _ => None,
        }
    }

    /// Json key of the field, `field<n>`
    pub fn key(self) -> String {
        format!("field{}", self.number())
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "field{}", self.number())
    }
}

#[derive(Error, Debug)]
#[error("Invalid field {0:?}, expected 1-8 or field1-field8")]
pub struct InvalidField(String);

impl FromStr for Field {
    type Err = InvalidField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        lower
            .strip_prefix("field")
            .unwrap_or(&lower)
            .parse::<u8>()
            .ok()
            .and_then(Field::from_number)
            .ok_or_else(|| InvalidField(s.to_string()))
    }
}

/// Raw value of a field. The channel hands values back as strings, but
/// numbers are accepted too.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldValue(String);

impl FieldValue {
    pub fn new<S: Into<String>>(raw: S) -> FieldValue {
        FieldValue(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.0
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(Number),
            Bool(bool),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => FieldValue(s),
            Raw::Number(n) => FieldValue(n.to_string()),
            Raw::Bool(b) => FieldValue(if b { "1" } else { "0" }.to_string()),
        })
    }
}

/// One channel entry, as returned by `feeds/last.json` and
/// `fields/<n>/last.json`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub entry_id: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    field1: Option<FieldValue>,
    #[serde(default)]
    field2: Option<FieldValue>,
    #[serde(default)]
    field3: Option<FieldValue>,
    #[serde(default)]
    field4: Option<FieldValue>,
    #[serde(default)]
    field5: Option<FieldValue>,
    #[serde(default)]
    field6: Option<FieldValue>,
    #[serde(default)]
    field7: Option<FieldValue>,
    #[serde(default)]
    field8: Option<FieldValue>,
}

impl Feed {
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.slot(field).as_ref()
    }

    pub fn set(&mut self, field: Field, value: Option<FieldValue>) {
        *self.slot_mut(field) = value;
    }

    pub fn with(mut self, field: Field, value: FieldValue) -> Feed {
        self.set(field, Some(value));
        self
    }

    /// Copies `field` of `other` into this entry.
    pub fn merge_field(&mut self, field: Field, other: &Feed) {
        self.set(field, other.get(field).cloned());
    }

    fn slot(&self, field: Field) -> &Option<FieldValue> {
        match field {
            Field::Field1 => &self.field1,
            Field::Field2 => &self.field2,
            Field::Field3 => &self.field3,
            Field::Field4 => &self.field4,
            Field::Field5 => &self.field5,
            Field::Field6 => &self.field6,
            Field::Field7 => &self.field7,
            Field::Field8 => &self.field8,
        }
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<FieldValue> {
        match field {
            Field::Field1 => &mut self.field1,
            Field::Field2 => &mut self.field2,
            Field::Field3 => &mut self.field3,
            Field::Field4 => &mut self.field4,
            Field::Field5 => &mut self.field5,
            Field::Field6 => &mut self.field6,
            Field::Field7 => &mut self.field7,
            Field::Field8 => &mut self.field8,
        }
    }
}

impl Display for Feed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use strum::IntoEnumIterator;

        let values = Field::iter()
            .filter_map(|field| self.get(field).map(|v| format!("{}: {}", field, v)))
            .join(", ");
        match self.entry_id {
            Some(id) => write!(f, "#{} {{ {} }}", id, values),
            None => write!(f, "{{ {} }}", values),
        }
    }
}

/// Values for a `POST update` request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    values: BTreeMap<Field, Number>,
}

impl Update {
    pub fn new() -> Update {
        Update::default()
    }

    pub fn set<N: Into<Number>>(mut self, field: Field, value: N) -> Update {
        self.values.insert(field, value.into());
        self
    }

    /// Non-finite values are skipped.
    pub fn set_float(mut self, field: Field, value: f64) -> Update {
        match Number::from_f64(value) {
            Some(n) => {
                self.values.insert(field, n);
            }
            None => warn!("skipping non-finite value {} for {}", value, field),
        }
        self
    }

    pub fn get(&self, field: Field) -> Option<&Number> {
        self.values.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (Field, &Number)> {
        self.values.iter().map(|(f, n)| (*f, n))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_body(&self, key: &ApiKey) -> Value {
        let mut body = Map::new();
        body.insert("api_key".to_string(), Value::String(key.expose().to_string()));
        for (field, value) in self.fields() {
            body.insert(field.key(), Value::Number(value.clone()));
        }
        Value::Object(body)
    }
}

impl Display for Update {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let values = self
            .fields()
            .map(|(field, value)| format!("{}: {}", field, value))
            .join(", ");
        write!(f, "{{ {} }}", values)
    }
}
