use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use super::{CreditFilter, Store, StoreError};
use crate::models::{CreditRecord, IngestionRecord};

const COLUMNS: &str = "id, numero_credito, numero_nfse, data_constituicao, valor_issqn, \
     tipo_credito, simples_nacional, aliquota, valor_faturado, valor_deducao, base_calculo";

/// `credit_consult` table in PostgreSQL.
#[derive(Clone)]
pub struct PgCreditStore {
    pool: PgPool,
}

impl PgCreditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_credit(row: &PgRow) -> Result<CreditRecord, sqlx::Error> {
    Ok(CreditRecord {
        id: row.try_get("id")?,
        record: IngestionRecord {
            credit_number: row.try_get("numero_credito")?,
            invoice_number: row.try_get("numero_nfse")?,
            constitution_date: row.try_get("data_constituicao")?,
            tax_amount: row.try_get("valor_issqn")?,
            credit_type: row.try_get("tipo_credito")?,
            simplified_tax_regime: row.try_get("simples_nacional")?,
            tax_rate: row.try_get("aliquota")?,
            billed_amount: row.try_get("valor_faturado")?,
            deduction_amount: row.try_get("valor_deducao")?,
            calculation_base: row.try_get("base_calculo")?,
        },
    })
}

#[async_trait]
impl Store for PgCreditStore {
    async fn add(&self, record: &IngestionRecord) -> Result<CreditRecord, StoreError> {
        let sql = format!(
            "INSERT INTO credit_consult (numero_credito, numero_nfse, data_constituicao, \
             valor_issqn, tipo_credito, simples_nacional, aliquota, valor_faturado, \
             valor_deducao, base_calculo) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(&record.credit_number)
            .bind(&record.invoice_number)
            .bind(record.constitution_date)
            .bind(record.tax_amount)
            .bind(&record.credit_type)
            .bind(record.simplified_tax_regime)
            .bind(record.tax_rate)
            .bind(record.billed_amount)
            .bind(record.deduction_amount)
            .bind(record.calculation_base)
            .fetch_one(&self.pool)
            .await?;

        Ok(row_to_credit(&row)?)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<CreditRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM credit_consult WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(row_to_credit).transpose()?)
    }

    async fn get_all(&self) -> Result<Vec<CreditRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM credit_consult ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        Ok(rows.iter().map(row_to_credit).collect::<Result<_, _>>()?)
    }

    async fn update(&self, id: i64, record: &IngestionRecord) -> Result<CreditRecord, StoreError> {
        let sql = format!(
            "UPDATE credit_consult SET numero_credito = $1, numero_nfse = $2, \
             data_constituicao = $3, valor_issqn = $4, tipo_credito = $5, \
             simples_nacional = $6, aliquota = $7, valor_faturado = $8, \
             valor_deducao = $9, base_calculo = $10 \
             WHERE id = $11 \
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(&record.credit_number)
            .bind(&record.invoice_number)
            .bind(record.constitution_date)
            .bind(record.tax_amount)
            .bind(&record.credit_type)
            .bind(record.simplified_tax_regime)
            .bind(record.tax_rate)
            .bind(record.billed_amount)
            .bind(record.deduction_amount)
            .bind(record.calculation_base)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row_to_credit(&row)?),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM credit_consult WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, filter: &CreditFilter) -> Result<Vec<CreditRecord>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM credit_consult WHERE {} = $1 \
             ORDER BY data_constituicao DESC, id DESC",
            filter.column()
        );

        let query = sqlx::query(&sql);
        let query = match filter {
            CreditFilter::CreditNumber(value)
            | CreditFilter::InvoiceNumber(value)
            | CreditFilter::CreditType(value) => query.bind(value.as_str()),
            CreditFilter::ConstitutionDate(date) => query.bind(*date),
            CreditFilter::SimplifiedTaxRegime(flag) => query.bind(*flag),
        };

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_credit).collect::<Result<_, _>>()?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
