//! Domain records and their queue wire format.
//!
//! The queue carries one JSON object per credit using the Portuguese
//! camelCase keys the upstream integration already emits
//! (`numeroCredito`, `valorIssqn`, ...). Keys are matched case-insensitively
//! when reading, decimals are exact, and dates are ISO-8601.

pub mod audit;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

pub use audit::AuditEvent;

/// Canonical wire keys, in serialization order.
const WIRE_FIELDS: [&str; 10] = [
    "numeroCredito",
    "numeroNfse",
    "dataConstituicao",
    "valorIssqn",
    "tipoCredito",
    "simplesNacional",
    "aliquota",
    "valorFaturado",
    "valorDeducao",
    "baseCalculo",
];

/// One constituted credit as handed to the publisher.
///
/// Immutable once built: the consumer only reads it and turns it into a
/// [`CreditRecord`] through the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionRecord {
    #[serde(rename = "numeroCredito", default, deserialize_with = "nullable_string")]
    pub credit_number: String,

    #[serde(rename = "numeroNfse", default, deserialize_with = "nullable_string")]
    pub invoice_number: String,

    #[serde(rename = "dataConstituicao", with = "wire_date")]
    pub constitution_date: NaiveDate,

    #[serde(
        rename = "valorIssqn",
        default,
        with = "rust_decimal::serde::arbitrary_precision"
    )]
    pub tax_amount: Decimal,

    #[serde(rename = "tipoCredito", default, deserialize_with = "nullable_string")]
    pub credit_type: String,

    #[serde(rename = "simplesNacional", default)]
    pub simplified_tax_regime: bool,

    #[serde(
        rename = "aliquota",
        default,
        with = "rust_decimal::serde::arbitrary_precision"
    )]
    pub tax_rate: Decimal,

    #[serde(
        rename = "valorFaturado",
        default,
        with = "rust_decimal::serde::arbitrary_precision"
    )]
    pub billed_amount: Decimal,

    #[serde(
        rename = "valorDeducao",
        default,
        with = "rust_decimal::serde::arbitrary_precision"
    )]
    pub deduction_amount: Decimal,

    #[serde(
        rename = "baseCalculo",
        default,
        with = "rust_decimal::serde::arbitrary_precision"
    )]
    pub calculation_base: Decimal,
}

/// Width of the text columns in `credit_consult`, in characters.
pub const MAX_TEXT_LEN: usize = 50;

/// Reasons a well-formed record is still refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("numeroCredito is required")]
    MissingCreditNumber,

    #[error("{field} exceeds {max} characters")]
    FieldTooLong { field: &'static str, max: usize },
}

impl IngestionRecord {
    /// Parse a queue payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(payload)?;
        Self::from_value(value)
    }

    /// Build a record from an already parsed JSON value, ignoring key case.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let value = match value {
            Value::Object(map) => Value::Object(canonicalize_keys(map)),
            other => other,
        };
        serde_json::from_value(value)
    }

    /// Serialize to the queue wire format.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Checks that the record fits the credit table. A record that fails
    /// here fails the same way on every delivery.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.credit_number.trim().is_empty() {
            return Err(RecordError::MissingCreditNumber);
        }
        let text_fields = [
            ("numeroCredito", &self.credit_number),
            ("numeroNfse", &self.invoice_number),
            ("tipoCredito", &self.credit_type),
        ];
        for (field, value) in text_fields {
            if value.chars().count() > MAX_TEXT_LEN {
                return Err(RecordError::FieldTooLong {
                    field,
                    max: MAX_TEXT_LEN,
                });
            }
        }
        Ok(())
    }
}

/// A credit as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditRecord {
    pub id: i64,
    pub record: IngestionRecord,
}

fn canonicalize_keys(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| {
            let canonical = WIRE_FIELDS
                .iter()
                .find(|field| field.eq_ignore_ascii_case(&key))
                .map(|field| field.to_string())
                .unwrap_or(key);
            (canonical, value)
        })
        .collect()
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// ISO-8601 calendar dates.
///
/// Written as `YYYY-MM-DD`. Read leniently: a plain date, a naive date-time
/// or an RFC 3339 timestamp are all accepted and reduced to their date.
pub mod wire_date {
    use super::*;

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&date.format("%Y-%m-%d"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_date(&raw).ok_or_else(|| de::Error::custom(format!("invalid date: {raw}")))
    }

    pub fn parse_date(raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        raw.parse::<NaiveDate>()
            .ok()
            .or_else(|| raw.parse::<NaiveDateTime>().ok().map(|dt| dt.date()))
            .or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|dt| dt.date_naive())
            })
    }
}
