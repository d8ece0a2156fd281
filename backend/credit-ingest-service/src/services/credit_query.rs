//! Read, update and delete path over the store.
//!
//! Lookups by credit number and by invoice number are audited; the audit is
//! detached and never delays the response.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;

use crate::models::{CreditRecord, IngestionRecord};
use crate::services::audit::{ConsultationAuditor, RequestContext};
use crate::store::{CreditFilter, Store, StoreError};

pub struct CreditQueryService {
    store: Arc<dyn Store>,
    auditor: ConsultationAuditor,
}

impl CreditQueryService {
    pub fn new(store: Arc<dyn Store>, auditor: ConsultationAuditor) -> Self {
        Self { store, auditor }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<CreditRecord>, StoreError> {
        self.store.get_by_id(id).await
    }

    pub async fn get_all(&self) -> Result<Vec<CreditRecord>, StoreError> {
        self.store.get_all().await
    }

    pub async fn get_by_credit_number(
        &self,
        credit_number: &str,
        context: &RequestContext,
    ) -> Result<Vec<CreditRecord>, StoreError> {
        let credits = self
            .store
            .find(&CreditFilter::CreditNumber(credit_number.to_string()))
            .await?;

        self.auditor.record(
            "GetByNumeroCredito",
            json!({ "numeroCredito": credit_number }),
            json!({ "count": credits.len() }),
            context,
        );
        Ok(credits)
    }

    pub async fn get_by_invoice_number(
        &self,
        invoice_number: &str,
        context: &RequestContext,
    ) -> Result<Vec<CreditRecord>, StoreError> {
        let credits = self
            .store
            .find(&CreditFilter::InvoiceNumber(invoice_number.to_string()))
            .await?;

        self.auditor.record(
            "GetByNumeroNfse",
            json!({ "numeroNfse": invoice_number }),
            json!({ "count": credits.len() }),
            context,
        );
        Ok(credits)
    }

    pub async fn get_by_credit_type(&self, credit_type: &str) -> Result<Vec<CreditRecord>, StoreError> {
        self.store
            .find(&CreditFilter::CreditType(credit_type.to_string()))
            .await
    }

    pub async fn get_by_constitution_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<CreditRecord>, StoreError> {
        self.store.find(&CreditFilter::ConstitutionDate(date)).await
    }

    pub async fn get_by_simplified_regime(
        &self,
        simplified: bool,
    ) -> Result<Vec<CreditRecord>, StoreError> {
        self.store
            .find(&CreditFilter::SimplifiedTaxRegime(simplified))
            .await
    }

    pub async fn update(
        &self,
        id: i64,
        record: &IngestionRecord,
    ) -> Result<CreditRecord, StoreError> {
        self.store.update(id, record).await
    }

    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.store.delete(id).await
    }
}
