use crate::{
    auth::AuthUser,
    config::AppConfig,
    db::with_transaction,
    entities::{
        bank_account,
        order::{self, OrderPaymentStatus},
        payment, PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    gateways::{
        GatewayError, MomoGateway, MomoIpn, MomoPaymentRequest, VietQrGateway, VietQrRequest,
        VnpayCallback, VnpayGateway, VnpayPaymentRequest,
    },
    services::orders::{
        ensure_not_cancelled, find_order, latest_payment, pay_order, set_payment_status,
    },
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

/// `TXN` + unix millis + 6 random digits
pub fn generate_transaction_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("TXN{}{:06}", Utc::now().timestamp_millis(), suffix)
}

/// Human-traceable bank transfer code: `DH` + order date (GMT+7) + zero-padded id
pub fn order_code(order_id: i32, created_at: DateTime<Utc>) -> String {
    let local = created_at + ChronoDuration::hours(7);
    format!("DH{}{:06}", local.format("%Y%m%d"), order_id)
}

pub fn transfer_memo(code: &str) -> String {
    format!("Thanh toan don hang {}", code)
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProcessPaymentRequest {
    pub order_id: i32,
    pub payment_method: PaymentMethod,
    /// Must match the method's gateway when given
    #[serde(default)]
    pub provider: Option<String>,
    /// Restricts bank transfer instructions to one account
    #[serde(default)]
    pub bank_account_id: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BankQrRequest {
    pub order_id: i32,
    #[serde(default)]
    pub bank_account_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BankTransferAccount {
    pub id: i32,
    pub bank_name: String,
    pub account_number: String,
    pub account_holder: String,
    pub qr_url: String,
}

/// What the payer needs to complete the payment
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentIntent {
    BankTransfer {
        order_code: String,
        transfer_memo: String,
        amount: i64,
        bank_accounts: Vec<BankTransferAccount>,
    },
    Redirect {
        provider: String,
        pay_url: String,
        deeplink: Option<String>,
        qr_code_url: Option<String>,
    },
    CashOnDelivery {
        amount: i64,
    },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProcessPaymentResponse {
    pub payment_id: i32,
    pub order_id: i32,
    pub transaction_id: String,
    pub payment_method: String,
    pub amount: i64,
    pub status: String,
    pub intent: PaymentIntent,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentView {
    pub id: i32,
    pub order_id: i32,
    pub transaction_id: String,
    pub payment_method: String,
    pub payment_provider: Option<String>,
    pub amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<payment::Model> for PaymentView {
    fn from(model: payment::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            transaction_id: model.transaction_id,
            payment_method: model.payment_method,
            payment_provider: model.payment_provider,
            amount: model.amount,
            status: model.status,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentCheck {
    pub order_id: i32,
    pub order_status: String,
    pub payment_status: String,
    pub payment_method: String,
    pub total_amount: i64,
    pub latest_payment: Option<PaymentView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BankQrResponse {
    pub order_id: i32,
    pub order_code: String,
    pub transfer_memo: String,
    pub amount: i64,
    pub bank_account: BankTransferAccount,
}

/// Result of a verified success callback
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CallbackResult {
    pub transaction_id: String,
    pub order_id: i32,
    pub payment_status: String,
    /// True when the callback was a replay of one already applied
    pub already_processed: bool,
}

/// Body VNPay expects in reply to an IPN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct VnpayIpnResponse {
    #[serde(rename = "RspCode")]
    pub rsp_code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

impl VnpayIpnResponse {
    fn new(code: &str, message: &str) -> Self {
        Self {
            rsp_code: code.to_string(),
            message: message.to_string(),
        }
    }
}

enum Settlement {
    Applied(payment::Model),
    Replayed(payment::Model),
    AmountMismatch { expected: i64, received: i64 },
}

/// Payment intents, gateway callbacks and manual confirmation
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    momo: MomoGateway,
    vnpay: VnpayGateway,
    vietqr: VietQrGateway,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        momo: MomoGateway,
        vnpay: VnpayGateway,
        vietqr: VietQrGateway,
    ) -> Self {
        Self {
            db,
            momo,
            vnpay,
            vietqr,
        }
    }

    pub fn from_config(db: Arc<DatabaseConnection>, config: &AppConfig) -> Result<Self, GatewayError> {
        Ok(Self::new(
            db,
            MomoGateway::new(config.momo.clone(), config.gateway_timeout())?,
            VnpayGateway::new(config.vnpay.clone()),
            VietQrGateway::new(config.vietqr.clone()),
        ))
    }

    /// Produces a payment intent for the order and records a pending payment.
    ///
    /// Gateway failures surface as `ProviderError` before anything is written.
    #[instrument(skip(self, request, client_ip), fields(user_id = caller.user_id, order_id = request.order_id, method = %request.payment_method))]
    pub async fn process_payment(
        &self,
        caller: AuthUser,
        request: ProcessPaymentRequest,
        client_ip: &str,
    ) -> Result<ProcessPaymentResponse, ServiceError> {
        let db = self.db.as_ref();
        let order = payable_order(db, caller, request.order_id).await?;
        let method = request.payment_method;
        if let Some(provider) = request.provider.as_deref() {
            if method.provider() != Some(provider) {
                return Err(ServiceError::BadRequest(format!(
                    "provider '{}' does not handle {}",
                    provider, method
                )));
            }
        }

        let transaction_id = generate_transaction_id();
        let amount = order.total_amount;
        let order_info = transfer_memo(&order_code(order.id, order.created_at));

        let intent = match method {
            PaymentMethod::BankTransfer => {
                let accounts = self.bank_accounts(request.bank_account_id).await?;
                let code = order_code(order.id, order.created_at);
                let memo = transfer_memo(&code);
                let bank_accounts = accounts
                    .into_iter()
                    .map(|account| self.transfer_account(account, amount, &memo))
                    .collect::<Result<Vec<_>, _>>()?;
                PaymentIntent::BankTransfer {
                    order_code: code,
                    transfer_memo: memo,
                    amount,
                    bank_accounts,
                }
            }
            PaymentMethod::Momo => {
                let response = self
                    .momo
                    .create_payment(&MomoPaymentRequest {
                        order_id: transaction_id.clone(),
                        request_id: transaction_id.clone(),
                        amount,
                        order_info,
                        extra_data: String::new(),
                    })
                    .await?;
                PaymentIntent::Redirect {
                    provider: "momo".to_string(),
                    pay_url: response.pay_url.unwrap_or_default(),
                    deeplink: response.deeplink,
                    qr_code_url: response.qr_code_url,
                }
            }
            PaymentMethod::Vnpay => {
                let signed = self.vnpay.build_payment_url(&VnpayPaymentRequest {
                    txn_ref: transaction_id.clone(),
                    amount,
                    order_info,
                    ip_addr: client_ip.to_string(),
                    created_at: Utc::now(),
                })?;
                PaymentIntent::Redirect {
                    provider: "vnpay".to_string(),
                    pay_url: signed.url,
                    deeplink: None,
                    qr_code_url: None,
                }
            }
            PaymentMethod::Cod => PaymentIntent::CashOnDelivery { amount },
        };

        let payment_data = serde_json::to_string(&json!({ "request": intent }))?;
        let order_details = serde_json::to_string(&json!({
            "transaction_id": transaction_id,
            "method": method.to_string(),
        }))?;
        let order_id = order.id;
        let txn_id = transaction_id.clone();

        let payment = with_transaction(db, move |txn| {
            Box::pin(async move {
                let now = Utc::now();
                let payment = payment::ActiveModel {
                    order_id: Set(order_id),
                    payment_method: Set(method.to_string()),
                    payment_provider: Set(method.provider().map(str::to_string)),
                    transaction_id: Set(txn_id),
                    amount: Set(amount),
                    status: Set(PaymentStatus::Pending.to_string()),
                    payment_data: Set(Some(payment_data)),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await?;

                let mut active: order::ActiveModel = order.into();
                active.payment_details = Set(Some(order_details));
                active.updated_at = Set(now);
                active.update(txn).await?;

                Ok::<_, ServiceError>(payment)
            })
        })
        .await?;

        info!(
            payment_id = payment.id,
            transaction_id = %payment.transaction_id,
            amount,
            "payment initiated"
        );

        Ok(ProcessPaymentResponse {
            payment_id: payment.id,
            order_id: payment.order_id,
            transaction_id: payment.transaction_id,
            payment_method: payment.payment_method,
            amount: payment.amount,
            status: payment.status,
            intent,
        })
    }

    pub async fn check_payment(
        &self,
        caller: AuthUser,
        order_id: i32,
    ) -> Result<PaymentCheck, ServiceError> {
        let db = self.db.as_ref();
        let order = find_order(db, order_id).await?;
        caller.ensure_owner_or_admin(order.user_id)?;
        let latest = latest_payment(db, order_id).await?;

        Ok(PaymentCheck {
            order_id,
            order_status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            total_amount: order.total_amount,
            latest_payment: latest.map(PaymentView::from),
        })
    }

    /// VietQR transfer instructions for one active bank account
    pub async fn bank_qr(
        &self,
        caller: AuthUser,
        request: BankQrRequest,
    ) -> Result<BankQrResponse, ServiceError> {
        let order = payable_order(self.db.as_ref(), caller, request.order_id).await?;
        let account = self
            .bank_accounts(request.bank_account_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::NotFound("No active bank account".to_string()))?;

        let code = order_code(order.id, order.created_at);
        let memo = transfer_memo(&code);
        let bank_account = self.transfer_account(account, order.total_amount, &memo)?;

        Ok(BankQrResponse {
            order_id: order.id,
            order_code: code,
            transfer_memo: memo,
            amount: order.total_amount,
            bank_account,
        })
    }

    /// Admin confirmation of a payment received out of band. Re-confirming is a no-op.
    #[instrument(skip(self), fields(user_id = caller.user_id))]
    pub async fn confirm_payment(
        &self,
        caller: AuthUser,
        payment_id: i32,
    ) -> Result<PaymentView, ServiceError> {
        caller.ensure_admin()?;
        let confirmed_by = caller.user_id;

        let payment = with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                let payment = payment::Entity::find_by_id(payment_id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Payment {} not found", payment_id))
                    })?;
                if payment.status == PaymentStatus::Completed.as_ref() {
                    return Ok::<_, ServiceError>(payment);
                }

                let order_id = payment.order_id;
                let data = merge_payment_data(
                    payment.payment_data.as_deref(),
                    "confirmation",
                    json!({ "confirmed_by": confirmed_by, "confirmed_at": Utc::now() }),
                )?;
                pay_order(txn, order_id, None).await?;
                let payment =
                    set_payment_status(txn, payment, PaymentStatus::Completed, Some(data)).await?;
                Ok(payment)
            })
        })
        .await?;

        info!(payment_id, order_id = payment.order_id, "payment confirmed by admin");
        Ok(payment.into())
    }

    /// Momo IPN. Verified before any field is trusted; replays are no-ops.
    #[instrument(skip(self, ipn), fields(order_id = %ipn.order_id, result_code = ipn.result_code))]
    pub async fn momo_callback(&self, ipn: MomoIpn) -> Result<CallbackResult, ServiceError> {
        if !self.momo.verify_callback(&ipn)? {
            warn!("momo callback signature mismatch");
            return Err(ServiceError::InvalidSignature(
                "momo callback signature mismatch".to_string(),
            ));
        }
        if !ipn.is_success() {
            info!(message = %ipn.message, "momo reported a failed payment");
            return Err(ServiceError::PaymentFailed(format!(
                "momo result {}: {}",
                ipn.result_code, ipn.message
            )));
        }

        let payload = serde_json::to_value(&ipn)?;
        let settlement = self.settle(ipn.order_id.clone(), ipn.amount, payload).await?;
        callback_result(&ipn.order_id, settlement)
    }

    /// VNPay return URL. Same rules as the IPN, reported as a regular API result.
    #[instrument(skip(self, params))]
    pub async fn vnpay_return(
        &self,
        params: BTreeMap<String, String>,
    ) -> Result<CallbackResult, ServiceError> {
        let callback = self.verified_vnpay(&params)?;
        if !callback.is_success() {
            return Err(ServiceError::PaymentFailed(format!(
                "vnpay response code {}",
                callback.response_code
            )));
        }
        let settlement = self
            .settle(callback.txn_ref.clone(), callback.amount, json!(params))
            .await?;
        callback_result(&callback.txn_ref, settlement)
    }

    /// VNPay IPN, answered in VNPay's `RspCode` format
    #[instrument(skip(self, params))]
    pub async fn vnpay_ipn(&self, params: BTreeMap<String, String>) -> VnpayIpnResponse {
        let callback = match self.verified_vnpay(&params) {
            Ok(callback) => callback,
            Err(ServiceError::InvalidSignature(_)) => {
                return VnpayIpnResponse::new("97", "Invalid signature")
            }
            Err(_) => return VnpayIpnResponse::new("99", "Invalid request"),
        };
        if !callback.is_success() {
            info!(response_code = %callback.response_code, "vnpay reported a failed payment");
            return VnpayIpnResponse::new("00", "Confirm Success");
        }

        match self
            .settle(callback.txn_ref.clone(), callback.amount, json!(params))
            .await
        {
            Ok(Settlement::Applied(_)) => VnpayIpnResponse::new("00", "Confirm Success"),
            Ok(Settlement::Replayed(_)) => VnpayIpnResponse::new("02", "Order already confirmed"),
            Ok(Settlement::AmountMismatch { .. }) => VnpayIpnResponse::new("04", "Invalid amount"),
            Err(ServiceError::NotFound(_)) => VnpayIpnResponse::new("01", "Order not found"),
            Err(ServiceError::InvalidStateTransition(_)) => {
                VnpayIpnResponse::new("02", "Order is not awaiting payment")
            }
            Err(e) => {
                error!(error = %e, "vnpay ipn processing failed");
                VnpayIpnResponse::new("99", "Unknown error")
            }
        }
    }

    fn verified_vnpay(&self, params: &BTreeMap<String, String>) -> Result<VnpayCallback, ServiceError> {
        if !self.vnpay.verify_callback(params)? {
            warn!("vnpay callback signature mismatch");
            return Err(ServiceError::InvalidSignature(
                "vnpay callback signature mismatch".to_string(),
            ));
        }
        VnpayCallback::from_params(params).map_err(|e| ServiceError::BadRequest(e.to_string()))
    }

    /// Applies a verified success callback to the payment it names.
    ///
    /// Only ever sets statuses, so applying the same callback twice leaves the same state.
    /// A payment whose order was cancelled in the meantime is refused and nothing changes.
    async fn settle(
        &self,
        transaction_id: String,
        amount: i64,
        payload: Value,
    ) -> Result<Settlement, ServiceError> {
        let settlement = with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                let payment = payment::Entity::find()
                    .filter(payment::Column::TransactionId.eq(transaction_id.as_str()))
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Payment {} not found", transaction_id))
                    })?;

                if payment.status == PaymentStatus::Completed.as_ref() {
                    return Ok::<_, ServiceError>(Settlement::Replayed(payment));
                }
                if payment.amount != amount {
                    return Ok(Settlement::AmountMismatch {
                        expected: payment.amount,
                        received: amount,
                    });
                }

                let order_id = payment.order_id;
                let data = merge_payment_data(payment.payment_data.as_deref(), "callback", payload)?;
                let details = serde_json::to_string(&json!({
                    "transaction_id": transaction_id,
                    "method": payment.payment_method,
                    "paid_at": Utc::now(),
                }))?;
                pay_order(txn, order_id, Some(details)).await?;
                let payment =
                    set_payment_status(txn, payment, PaymentStatus::Completed, Some(data)).await?;
                Ok(Settlement::Applied(payment))
            })
        })
        .await?;

        match &settlement {
            Settlement::Applied(payment) => info!(
                payment_id = payment.id,
                order_id = payment.order_id,
                "payment completed by gateway callback"
            ),
            Settlement::Replayed(payment) => {
                info!(payment_id = payment.id, "gateway callback replayed")
            }
            Settlement::AmountMismatch { expected, received } => {
                warn!(expected, received, "gateway callback amount mismatch")
            }
        }
        Ok(settlement)
    }

    async fn bank_accounts(
        &self,
        account_id: Option<i32>,
    ) -> Result<Vec<bank_account::Model>, ServiceError> {
        let mut query = bank_account::Entity::find()
            .filter(bank_account::Column::IsActive.eq(true))
            .order_by_asc(bank_account::Column::Id);
        if let Some(id) = account_id {
            query = query.filter(bank_account::Column::Id.eq(id));
        }
        let accounts = query.all(self.db.as_ref()).await?;
        if accounts.is_empty() {
            return Err(ServiceError::NotFound(match account_id {
                Some(id) => format!("Bank account {} not found", id),
                None => "No active bank account".to_string(),
            }));
        }
        Ok(accounts)
    }

    fn transfer_account(
        &self,
        account: bank_account::Model,
        amount: i64,
        memo: &str,
    ) -> Result<BankTransferAccount, GatewayError> {
        let qr_url = self.vietqr.image_url(&VietQrRequest {
            bank: &account.bank_name,
            account_number: &account.account_number,
            account_holder: &account.account_holder,
            amount,
            memo,
        })?;
        Ok(BankTransferAccount {
            id: account.id,
            bank_name: account.bank_name,
            account_number: account.account_number,
            account_holder: account.account_holder,
            qr_url,
        })
    }
}

/// Loads an order the caller may pay for
async fn payable_order(
    db: &DatabaseConnection,
    caller: AuthUser,
    order_id: i32,
) -> Result<order::Model, ServiceError> {
    let order = find_order(db, order_id).await?;
    caller.ensure_owner_or_admin(order.user_id)?;
    if order.payment_status == OrderPaymentStatus::Paid.as_ref() {
        return Err(ServiceError::AlreadyPaid(order_id));
    }
    ensure_not_cancelled(&order)?;
    Ok(order)
}

/// Adds `value` under `key` in the stored payment JSON, keeping what was there
fn merge_payment_data(existing: Option<&str>, key: &str, value: Value) -> Result<String, ServiceError> {
    let mut data = match existing.map(serde_json::from_str::<Value>).transpose()? {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = serde_json::Map::new();
            map.insert("request".to_string(), other);
            map
        }
        None => serde_json::Map::new(),
    };
    data.insert(key.to_string(), value);
    Ok(Value::Object(data).to_string())
}

fn callback_result(transaction_id: &str, settlement: Settlement) -> Result<CallbackResult, ServiceError> {
    let (payment, already_processed) = match settlement {
        Settlement::Applied(payment) => (payment, false),
        Settlement::Replayed(payment) => (payment, true),
        Settlement::AmountMismatch { expected, received } => {
            return Err(ServiceError::ProviderError(format!(
                "callback amount {} does not match payment {} amount {}",
                received, transaction_id, expected
            )))
        }
    };
    Ok(CallbackResult {
        transaction_id: payment.transaction_id,
        order_id: payment.order_id,
        payment_status: payment.status,
        already_processed,
    })
}
