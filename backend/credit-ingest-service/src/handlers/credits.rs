use actix_web::{web, HttpRequest, HttpResponse};
use tracing::info;

use super::dto::{CreditRequest, CreditResponse, IntegrationAccepted};
use super::{request_context, AppState};
use crate::error::{AppError, Result};
use crate::models::{wire_date, CreditRecord, IngestionRecord};

fn render(credits: Vec<CreditRecord>) -> Vec<CreditResponse> {
    credits.into_iter().map(CreditResponse::from).collect()
}

/// Queue a batch of credits for asynchronous persistence.
pub async fn integrate(
    state: web::Data<AppState>,
    body: web::Json<Vec<CreditRequest>>,
) -> Result<HttpResponse> {
    let records: Vec<IngestionRecord> = body
        .into_inner()
        .into_iter()
        .map(IngestionRecord::from)
        .collect();

    for (position, record) in records.iter().enumerate() {
        record
            .validate()
            .map_err(|e| AppError::Validation(format!("{e} (item {position})")))?;
    }

    let count = state.publisher.publish_batch(&records).await?;
    info!(count, "Credit batch accepted for integration");

    Ok(HttpResponse::Accepted().json(IntegrationAccepted {
        message: "Credits queued for integration".to_string(),
        count,
    }))
}

pub async fn list_credits(state: web::Data<AppState>) -> Result<HttpResponse> {
    let credits = state.queries.get_all().await?;
    Ok(HttpResponse::Ok().json(render(credits)))
}

pub async fn get_credit(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse> {
    let id = path.into_inner();
    match state.queries.get_by_id(id).await? {
        Some(credit) => Ok(HttpResponse::Ok().json(CreditResponse::from(credit))),
        None => Err(AppError::NotFound(format!(
            "Credit consult with id {id} not found"
        ))),
    }
}

pub async fn by_credit_number(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let context = request_context(&req);
    let credits = state
        .queries
        .get_by_credit_number(&path.into_inner(), &context)
        .await?;
    Ok(HttpResponse::Ok().json(render(credits)))
}

pub async fn by_invoice_number(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let context = request_context(&req);
    let credits = state
        .queries
        .get_by_invoice_number(&path.into_inner(), &context)
        .await?;
    Ok(HttpResponse::Ok().json(render(credits)))
}

pub async fn by_credit_type(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let credits = state.queries.get_by_credit_type(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(render(credits)))
}

pub async fn by_constitution_date(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let raw = path.into_inner();
    let date = wire_date::parse_date(&raw)
        .ok_or_else(|| AppError::Validation(format!("invalid date: {raw}")))?;
    let credits = state.queries.get_by_constitution_date(date).await?;
    Ok(HttpResponse::Ok().json(render(credits)))
}

pub async fn by_simplified_regime(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let raw = path.into_inner();
    let flag = parse_flag(&raw)
        .ok_or_else(|| AppError::Validation(format!("invalid simplesNacional flag: {raw}")))?;
    let credits = state.queries.get_by_simplified_regime(flag).await?;
    Ok(HttpResponse::Ok().json(render(credits)))
}

/// `Sim`/`Não` as rendered in responses, or `true`/`false`.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "sim" | "true" => Some(true),
        "não" | "nao" | "false" => Some(false),
        _ => None,
    }
}

pub async fn update_credit(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<CreditRequest>,
) -> Result<HttpResponse> {
    let record = IngestionRecord::from(body.into_inner());
    record
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let credit = state.queries.update(path.into_inner(), &record).await?;
    Ok(HttpResponse::Ok().json(CreditResponse::from(credit)))
}

pub async fn delete_credit(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    if state.queries.delete(id).await? {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Err(AppError::NotFound(format!(
            "Credit consult with id {id} not found"
        )))
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/credit-consult")
            .route("", web::get().to(list_credits))
            .route("/integrate", web::post().to(integrate))
            .route("/numero-credito/{numero_credito}", web::get().to(by_credit_number))
            .route("/numero-nfse/{numero_nfse}", web::get().to(by_invoice_number))
            .route("/tipo-credito/{tipo_credito}", web::get().to(by_credit_type))
            .route(
                "/data-constituicao/{data_constituicao}",
                web::get().to(by_constitution_date),
            )
            .route(
                "/simples-nacional/{simples_nacional}",
                web::get().to(by_simplified_regime),
            )
            .route("/{id}", web::get().to(get_credit))
            .route("/{id}", web::put().to(update_credit))
            .route("/{id}", web::delete().to(delete_credit)),
    );
}
