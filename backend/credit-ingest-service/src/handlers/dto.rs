//! Request and response bodies for the credit endpoints.
//!
//! The integration contract carries `simplesNacional` as the text
//! `"Sim"`/`"Não"`; plain booleans are accepted too. Responses always render
//! the text form.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{wire_date, CreditRecord, IngestionRecord};

const YES: &str = "Sim";
const NO: &str = "Não";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditRequest {
    #[serde(default)]
    pub numero_credito: String,
    #[serde(default)]
    pub numero_nfse: String,
    #[serde(with = "wire_date")]
    pub data_constituicao: NaiveDate,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    pub valor_issqn: Decimal,
    #[serde(default)]
    pub tipo_credito: String,
    #[serde(default, deserialize_with = "yes_no")]
    pub simples_nacional: bool,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    pub aliquota: Decimal,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    pub valor_faturado: Decimal,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    pub valor_deducao: Decimal,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    pub base_calculo: Decimal,
}

impl From<CreditRequest> for IngestionRecord {
    fn from(dto: CreditRequest) -> Self {
        IngestionRecord {
            credit_number: dto.numero_credito,
            invoice_number: dto.numero_nfse,
            constitution_date: dto.data_constituicao,
            tax_amount: dto.valor_issqn,
            credit_type: dto.tipo_credito,
            simplified_tax_regime: dto.simples_nacional,
            tax_rate: dto.aliquota,
            billed_amount: dto.valor_faturado,
            deduction_amount: dto.valor_deducao,
            calculation_base: dto.base_calculo,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditResponse {
    pub id: i64,
    pub numero_credito: String,
    pub numero_nfse: String,
    #[serde(with = "wire_date")]
    pub data_constituicao: NaiveDate,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub valor_issqn: Decimal,
    pub tipo_credito: String,
    pub simples_nacional: &'static str,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub aliquota: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub valor_faturado: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub valor_deducao: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub base_calculo: Decimal,
}

impl From<CreditRecord> for CreditResponse {
    fn from(credit: CreditRecord) -> Self {
        let record = credit.record;
        CreditResponse {
            id: credit.id,
            numero_credito: record.credit_number,
            numero_nfse: record.invoice_number,
            data_constituicao: record.constitution_date,
            valor_issqn: record.tax_amount,
            tipo_credito: record.credit_type,
            simples_nacional: if record.simplified_tax_regime { YES } else { NO },
            aliquota: record.tax_rate,
            valor_faturado: record.billed_amount,
            valor_deducao: record.deduction_amount,
            base_calculo: record.calculation_base,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationAccepted {
    pub message: String,
    pub count: usize,
}

/// `"Sim"` (any case) or `true` is yes; anything else is no.
fn yes_no<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(value)) => value,
        Some(Flag::Text(text)) => text.trim().eq_ignore_ascii_case(YES),
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_request_accepts_text_and_bool_flags() {
        let text: CreditRequest = serde_json::from_value(json!({
            "numeroCredito": "123456",
            "dataConstituicao": "2024-02-25",
            "simplesNacional": "Sim",
            "valorIssqn": 1500.75
        }))
        .unwrap();
        assert!(text.simples_nacional);
        assert_eq!(text.valor_issqn, Decimal::from_str("1500.75").unwrap());

        let no: CreditRequest = serde_json::from_value(json!({
            "numeroCredito": "1",
            "dataConstituicao": "2024-02-25",
            "simplesNacional": "Não"
        }))
        .unwrap();
        assert!(!no.simples_nacional);

        let boolean: CreditRequest = serde_json::from_value(json!({
            "numeroCredito": "1",
            "dataConstituicao": "2024-02-25T00:00:00",
            "simplesNacional": true
        }))
        .unwrap();
        assert!(boolean.simples_nacional);
    }

    #[test]
    fn test_response_renders_flag_as_text() {
        let body = r#"{
            "numeroCredito": "42",
            "dataConstituicao": "2024-02-25",
            "simplesNacional": "sim",
            "aliquota": 5.00
        }"#;
        let record: IngestionRecord = serde_json::from_str::<CreditRequest>(body)
            .unwrap()
            .into();

        let response = CreditResponse::from(CreditRecord { id: 9, record });
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["id"], json!(9));
        assert_eq!(value["simplesNacional"], json!("Sim"));
        assert_eq!(value["dataConstituicao"], json!("2024-02-25"));
        assert_eq!(value["aliquota"].to_string(), "5.00");
    }
}
