use super::{constant_time_eq, hmac_sha512_hex, GatewayError, SignedRequest};
use crate::config::VnpayConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use url::Url;

const SECURE_HASH: &str = "vnp_SecureHash";
const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";
const SUCCESS_CODE: &str = "00";

/// Parameters of one VNPay payment intent
#[derive(Debug, Clone)]
pub struct VnpayPaymentRequest {
    /// Our transaction id, sent as `vnp_TxnRef`
    pub txn_ref: String,
    /// Amount in VND; VNPay expects it multiplied by 100
    pub amount: i64,
    pub order_info: String,
    pub ip_addr: String,
    pub created_at: DateTime<Utc>,
}

/// Verified fields of a return-URL or IPN callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnpayCallback {
    pub txn_ref: String,
    /// Amount in VND
    pub amount: i64,
    pub response_code: String,
    pub transaction_status: Option<String>,
    pub transaction_no: Option<String>,
    pub bank_code: Option<String>,
}

impl VnpayCallback {
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self, GatewayError> {
        let field = |name: &str| {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| GatewayError::Malformed(format!("missing {}", name)))
        };
        let raw_amount: i64 = field("vnp_Amount")?
            .parse()
            .map_err(|_| GatewayError::Malformed("vnp_Amount is not a number".to_string()))?;

        Ok(Self {
            txn_ref: field("vnp_TxnRef")?,
            amount: raw_amount / 100,
            response_code: field("vnp_ResponseCode")?,
            transaction_status: params.get("vnp_TransactionStatus").cloned(),
            transaction_no: params.get("vnp_TransactionNo").cloned(),
            bank_code: params.get("vnp_BankCode").cloned(),
        })
    }

    pub fn is_success(&self) -> bool {
        self.response_code == SUCCESS_CODE
            && self
                .transaction_status
                .as_deref()
                .map_or(true, |status| status == SUCCESS_CODE)
    }
}

/// Encodes like `encodeURIComponent`, then turns `%20` into `+`
pub fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Sorted, encoded `key=value&..` string that VNPay signs
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(key, _)| key.as_str() != SECURE_HASH && key.as_str() != SECURE_HASH_TYPE)
        .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// VNPay hosted payment page adapter (HMAC-SHA512)
#[derive(Clone)]
pub struct VnpayGateway {
    config: VnpayConfig,
}

impl VnpayGateway {
    pub fn new(config: VnpayConfig) -> Self {
        Self { config }
    }

    pub fn sign(&self, params: &BTreeMap<String, String>) -> Result<String, GatewayError> {
        hmac_sha512_hex(&self.config.hash_secret, &canonical_query(params))
    }

    /// Request parameters before signing
    pub fn payment_params(&self, request: &VnpayPaymentRequest) -> BTreeMap<String, String> {
        // VNPay timestamps are GMT+7 wall-clock time.
        let local = request.created_at + ChronoDuration::hours(7);
        let expires = local + ChronoDuration::minutes(self.config.expire_minutes);

        let mut params = BTreeMap::new();
        params.insert("vnp_Version".to_string(), self.config.version.clone());
        params.insert("vnp_Command".to_string(), "pay".to_string());
        params.insert("vnp_TmnCode".to_string(), self.config.tmn_code.clone());
        params.insert("vnp_Amount".to_string(), (request.amount * 100).to_string());
        params.insert("vnp_CurrCode".to_string(), "VND".to_string());
        params.insert("vnp_TxnRef".to_string(), request.txn_ref.clone());
        params.insert("vnp_OrderInfo".to_string(), request.order_info.clone());
        params.insert("vnp_OrderType".to_string(), "other".to_string());
        params.insert("vnp_Locale".to_string(), self.config.locale.clone());
        params.insert("vnp_ReturnUrl".to_string(), self.config.return_url.clone());
        params.insert("vnp_IpAddr".to_string(), request.ip_addr.clone());
        params.insert(
            "vnp_CreateDate".to_string(),
            local.format("%Y%m%d%H%M%S").to_string(),
        );
        params.insert(
            "vnp_ExpireDate".to_string(),
            expires.format("%Y%m%d%H%M%S").to_string(),
        );
        params
    }

    /// Builds the redirect URL to the hosted payment page; nothing is sent.
    pub fn build_payment_url(
        &self,
        request: &VnpayPaymentRequest,
    ) -> Result<SignedRequest, GatewayError> {
        let base = Url::parse(&self.config.pay_url)?;
        let params = self.payment_params(request);
        let signature = self.sign(&params)?;
        let url = format!(
            "{}?{}&{}={}",
            base.as_str().trim_end_matches('?'),
            canonical_query(&params),
            SECURE_HASH,
            signature
        );
        Ok(SignedRequest { url, signature })
    }

    /// Checks `vnp_SecureHash` against the remaining query parameters
    pub fn verify_callback(&self, params: &BTreeMap<String, String>) -> Result<bool, GatewayError> {
        let Some(received) = params.get(SECURE_HASH) else {
            return Ok(false);
        };
        let expected = self.sign(params)?;
        Ok(constant_time_eq(
            expected.as_bytes(),
            received.to_ascii_lowercase().as_bytes(),
        ))
    }
}
