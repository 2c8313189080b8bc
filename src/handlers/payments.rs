use crate::{
    auth::AuthUser,
    errors::ServiceError,
    gateways::MomoIpn,
    handlers::AppState,
    services::payments::{
        BankQrRequest, BankQrResponse, CallbackResult, PaymentCheck, PaymentView,
        ProcessPaymentRequest, ProcessPaymentResponse, VnpayIpnResponse,
    },
    ApiResponse,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use std::collections::BTreeMap;

const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

/// Routes mounted under `/payments`. Gateway callbacks carry no bearer token; they are
/// authenticated by their signatures.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/process", post(process_payment))
        .route("/check/:order_id", get(check_payment))
        .route("/bank-qr", post(bank_qr))
        .route("/confirm/:payment_id", post(confirm_payment))
        .route("/vnpay/return", get(vnpay_return))
        .route("/vnpay/ipn", get(vnpay_ipn))
        .route("/momo/notify", post(momo_notify))
}

/// First hop of `X-Forwarded-For`, as VNPay wants the payer's address
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(FALLBACK_CLIENT_IP)
        .to_string()
}

/// Start a payment for an order
#[utoipa::path(
    post,
    path = "/api/v1/payments/process",
    request_body = ProcessPaymentRequest,
    responses(
        (status = 201, description = "Payment intent created", body = ApiResponse<ProcessPaymentResponse>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order or bank account not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway error", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn process_payment(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<ProcessPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProcessPaymentResponse>>), ServiceError> {
    let response = state
        .services
        .payments
        .process_payment(user, request, &client_ip(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/check/{order_id}",
    params(("order_id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Payment status", body = ApiResponse<PaymentCheck>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn check_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<i32>,
) -> Result<Json<ApiResponse<PaymentCheck>>, ServiceError> {
    let check = state.services.payments.check_payment(user, order_id).await?;
    Ok(Json(ApiResponse::success(check)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/bank-qr",
    request_body = BankQrRequest,
    responses(
        (status = 200, description = "VietQR transfer instructions", body = ApiResponse<BankQrResponse>),
        (status = 404, description = "Order or bank account not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn bank_qr(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<BankQrRequest>,
) -> Result<Json<ApiResponse<BankQrResponse>>, ServiceError> {
    let qr = state.services.payments.bank_qr(user, request).await?;
    Ok(Json(ApiResponse::success(qr)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm/{payment_id}",
    params(("payment_id" = i32, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment confirmed", body = ApiResponse<PaymentView>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(payment_id): Path<i32>,
) -> Result<Json<ApiResponse<PaymentView>>, ServiceError> {
    let payment = state
        .services
        .payments
        .confirm_payment(user, payment_id)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Redirect target after the VNPay hosted page
#[utoipa::path(
    get,
    path = "/api/v1/payments/vnpay/return",
    responses(
        (status = 200, description = "Payment completed", body = ApiResponse<CallbackResult>),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 402, description = "Payment declined", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn vnpay_return(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<ApiResponse<CallbackResult>>, ServiceError> {
    let result = state.services.payments.vnpay_return(params).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// Server-to-server notification from VNPay
#[utoipa::path(
    get,
    path = "/api/v1/payments/vnpay/ipn",
    responses((status = 200, description = "VNPay acknowledgement", body = VnpayIpnResponse)),
    tag = "Payments"
)]
pub async fn vnpay_ipn(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Json<VnpayIpnResponse> {
    Json(state.services.payments.vnpay_ipn(params).await)
}

/// Instant payment notification from Momo
#[utoipa::path(
    post,
    path = "/api/v1/payments/momo/notify",
    responses(
        (status = 204, description = "Notification applied or already applied"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 402, description = "Payment declined", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn momo_notify(
    State(state): State<AppState>,
    Json(ipn): Json<MomoIpn>,
) -> Result<StatusCode, ServiceError> {
    state.services.payments.momo_callback(ipn).await?;
    Ok(StatusCode::NO_CONTENT)
}
