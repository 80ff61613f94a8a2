use crate::errors::WalletError;
use crate::metrics;
use crate::models::AdjustBalanceRequest;
use crate::security_middleware::{AuthenticatedUser, JwtAuth, Role};
use crate::services::WalletService;
use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};
use prometheus::Registry;
use serde_json::json;
use std::sync::Arc;

const STAFF: &[Role] = &[Role::Admin, Role::Manager, Role::Support];

/// Health check endpoint
pub async fn health_check(service: web::Data<Arc<WalletService>>) -> HttpResponse {
    let ledger_ok = service.health_check().await.is_ok();

    let body = json!({
        "status": if ledger_ok { "healthy" } else { "degraded" },
        "service": "wallet-engine",
        "version": env!("CARGO_PKG_VERSION")
    });

    if ledger_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// Adjust a client's balance (admin only)
pub async fn adjust_balance(
    service: web::Data<Arc<WalletService>>,
    user: AuthenticatedUser,
    client_id: web::Path<String>,
    request: web::Json<AdjustBalanceRequest>,
) -> Result<HttpResponse, WalletError> {
    user.require_role(&[Role::Admin])?;

    let adjustment = service
        .adjust_balance(&client_id, request.into_inner(), user.user_id)
        .await?;

    Ok(HttpResponse::Ok().json(adjustment))
}

/// List clients (back-office staff)
pub async fn list_clients(
    service: web::Data<Arc<WalletService>>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, WalletError> {
    user.require_role(STAFF)?;

    let clients = service.list_clients().await?;
    Ok(HttpResponse::Ok().json(json!({ "clients": clients })))
}

/// Balance adjustment audit trail for one client (back-office staff)
pub async fn client_audit_trail(
    service: web::Data<Arc<WalletService>>,
    user: AuthenticatedUser,
    client_id: web::Path<String>,
) -> Result<HttpResponse, WalletError> {
    user.require_role(STAFF)?;

    let entries = service.audit_trail(&client_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "entries": entries })))
}

/// Clients referred by the calling partner
pub async fn referred_clients(
    service: web::Data<Arc<WalletService>>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, WalletError> {
    user.require_role(&[Role::Partner])?;

    let clients = service.referred_clients(user.user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "clients": clients })))
}

/// Dashboard of the calling client
pub async fn dashboard(
    service: web::Data<Arc<WalletService>>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, WalletError> {
    user.require_role(&[Role::Client])?;

    let dashboard = service.dashboard(user.user_id).await?;
    Ok(HttpResponse::Ok().json(dashboard))
}

/// Transaction history of the calling client
pub async fn transactions(
    service: web::Data<Arc<WalletService>>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, WalletError> {
    user.require_role(&[Role::Client])?;

    let transactions = service.transactions_for_user(user.user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "transactions": transactions })))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint(registry: web::Data<Registry>) -> Result<HttpResponse, WalletError> {
    render_metrics(metrics::metrics_handler(&registry))
}

fn render_metrics(
    gathered: std::result::Result<String, Box<dyn std::error::Error>>,
) -> Result<HttpResponse, WalletError> {
    let body = gathered
        .map_err(|e| WalletError::Internal(format!("Failed to gather metrics: {}", e)))?;

    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

/// Malformed JSON bodies are input errors in the same envelope as the rest.
fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    WalletError::Validation(format!("Malformed request body: {}", err)).into()
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig, jwt_secret: &str) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(
            web::scope("/api")
                .wrap(JwtAuth::new(jwt_secret))
                .service(
                    web::scope("/backoffice")
                        .route("/clients", web::get().to(list_clients))
                        .route(
                            "/clients/{client_id}/adjust-balance",
                            web::post().to(adjust_balance),
                        )
                        .route("/clients/{client_id}/audit", web::get().to(client_audit_trail)),
                )
                .service(web::scope("/partner").route("/clients", web::get().to(referred_clients)))
                .service(
                    web::scope("/client")
                        .route("/dashboard", web::get().to(dashboard))
                        .route("/transactions", web::get().to(transactions)),
                ),
        )
        .route("/metrics", web::get().to(metrics_endpoint))
        .route("/health", web::get().to(health_check));
}
