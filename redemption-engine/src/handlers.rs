use crate::errors::RedemptionEngineError;
use crate::metrics;
use crate::models::{
    ApproveSessionRequest, MarkNoShowRequest, ResolveDisputeRequest, SubmitDisputeRequest,
    VerifyRedemptionRequest,
};
use crate::security_middleware::{Claims, JwtAuth};
use crate::services::RedemptionService;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "redemption-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Redemption authorization check (no side effects)
pub async fn verify_redemption(
    service: web::Data<Arc<RedemptionService>>,
    request: web::Json<VerifyRedemptionRequest>,
) -> Result<HttpResponse, RedemptionEngineError> {
    let request = request.into_inner();
    let decision = service
        .authorize(&request.customer_address, &request.shop_id, request.amount)
        .await?;
    Ok(HttpResponse::Ok().json(decision))
}

/// Create a redemption session (shop device)
pub async fn create_session(
    service: web::Data<Arc<RedemptionService>>,
    request: web::Json<VerifyRedemptionRequest>,
) -> Result<HttpResponse, RedemptionEngineError> {
    let response = service.create_session(request.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    status: Option<String>,
    customer_address: Option<String>,
}

/// List sessions for the customer approval UI
pub async fn list_sessions(
    service: web::Data<Arc<RedemptionService>>,
    query: web::Query<SessionQuery>,
) -> Result<HttpResponse, RedemptionEngineError> {
    let sessions = service
        .list_sessions(query.status.as_deref(), query.customer_address.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "sessions": sessions })))
}

/// Approve a session (customer device, carries the wallet signature)
pub async fn approve_session(
    service: web::Data<Arc<RedemptionService>>,
    session_id: web::Path<Uuid>,
    request: web::Json<ApproveSessionRequest>,
) -> Result<HttpResponse, RedemptionEngineError> {
    let response = service
        .approve_session(*session_id, &request.signature)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Reject a session (customer device)
pub async fn reject_session(
    service: web::Data<Arc<RedemptionService>>,
    session_id: web::Path<Uuid>,
) -> Result<HttpResponse, RedemptionEngineError> {
    let response = service.reject_session(*session_id).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Consume an approved session (shop device, JWT-authenticated)
pub async fn consume_session(
    service: web::Data<Arc<RedemptionService>>,
    session_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<HttpResponse, RedemptionEngineError> {
    let shop_id = req
        .extensions()
        .get::<Claims>()
        .map(|claims| claims.sub.clone())
        .ok_or_else(|| RedemptionEngineError::Unauthorized("missing shop identity".to_string()))?;

    let response = service.consume_session(*session_id, &shop_id).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Record a no-show (booking collaborator, JWT-authenticated)
pub async fn mark_no_show(
    service: web::Data<Arc<RedemptionService>>,
    customer_address: web::Path<String>,
    request: web::Json<MarkNoShowRequest>,
) -> Result<HttpResponse, RedemptionEngineError> {
    let response = service
        .mark_no_show(&customer_address, request.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Record a completed appointment (booking collaborator, JWT-authenticated)
pub async fn complete_appointment(
    service: web::Data<Arc<RedemptionService>>,
    customer_address: web::Path<String>,
) -> Result<HttpResponse, RedemptionEngineError> {
    service.record_completed_appointment(&customer_address).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

/// Submit a dispute against a no-show event (customer)
pub async fn submit_dispute(
    service: web::Data<Arc<RedemptionService>>,
    request: web::Json<SubmitDisputeRequest>,
) -> Result<HttpResponse, RedemptionEngineError> {
    let response = service.submit_dispute(request.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Resolve a pending dispute (shop, JWT-authenticated)
pub async fn resolve_dispute(
    service: web::Data<Arc<RedemptionService>>,
    order_id: web::Path<String>,
    request: web::Json<ResolveDisputeRequest>,
) -> Result<HttpResponse, RedemptionEngineError> {
    let response = service.resolve_dispute(&order_id, request.approve).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Trust status for the booking collaborator and customer UI
pub async fn no_show_status(
    service: web::Data<Arc<RedemptionService>>,
    customer_address: web::Path<String>,
) -> Result<HttpResponse, RedemptionEngineError> {
    let response = service.no_show_status(&customer_address).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    match metrics::metrics_handler() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig, jwt_secret: &str) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::scope("/redemption")
                    .route("/verify", web::post().to(verify_redemption))
                    .route("/sessions", web::post().to(create_session))
                    .route("/sessions", web::get().to(list_sessions))
                    .route(
                        "/sessions/{session_id}/approve",
                        web::post().to(approve_session),
                    )
                    .route(
                        "/sessions/{session_id}/reject",
                        web::post().to(reject_session),
                    )
                    .service(
                        web::resource("/sessions/{session_id}/consume")
                            .wrap(JwtAuth::new(jwt_secret.to_string()))
                            .route(web::post().to(consume_session)),
                    ),
            )
            .service(
                web::scope("/noshow")
                    // Fixed segments before the {customer_address} captures
                    .route("/disputes", web::post().to(submit_dispute))
                    .service(
                        web::resource("/disputes/{order_id}/resolve")
                            .wrap(JwtAuth::new(jwt_secret.to_string()))
                            .route(web::post().to(resolve_dispute)),
                    )
                    .route("/{customer_address}/status", web::get().to(no_show_status))
                    .service(
                        web::resource("/{customer_address}/mark")
                            .wrap(JwtAuth::new(jwt_secret.to_string()))
                            .route(web::post().to(mark_no_show)),
                    )
                    .service(
                        web::resource("/{customer_address}/complete")
                            .wrap(JwtAuth::new(jwt_secret.to_string()))
                            .route(web::post().to(complete_appointment)),
                    ),
            ),
    )
    .route("/metrics", web::get().to(metrics_endpoint))
    .route("/health", web::get().to(health_check));
}
