use super::{constant_time_eq, hmac_sha256_hex, GatewayError};
use crate::config::MomoConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Parameters of one Momo payment intent
#[derive(Debug, Clone)]
pub struct MomoPaymentRequest {
    /// Our transaction id; Momo echoes it back as `orderId`
    pub order_id: String,
    pub request_id: String,
    pub amount: i64,
    pub order_info: String,
    pub extra_data: String,
}

/// Body POSTed to the Momo create endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MomoCreateBody {
    pub partner_code: String,
    pub request_id: String,
    pub amount: i64,
    pub order_id: String,
    pub order_info: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub request_type: String,
    pub extra_data: String,
    pub lang: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomoCreateResponse {
    pub partner_code: String,
    pub order_id: String,
    pub request_id: String,
    pub amount: i64,
    #[serde(default)]
    pub response_time: i64,
    pub message: String,
    pub result_code: i64,
    #[serde(default)]
    pub pay_url: Option<String>,
    #[serde(default)]
    pub deeplink: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
}

/// Instant payment notification sent by Momo to `ipnUrl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MomoIpn {
    pub partner_code: String,
    pub order_id: String,
    pub request_id: String,
    pub amount: i64,
    #[serde(default)]
    pub order_info: String,
    #[serde(default)]
    pub order_type: String,
    #[serde(default)]
    pub trans_id: i64,
    pub result_code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub pay_type: String,
    #[serde(default)]
    pub response_time: i64,
    #[serde(default)]
    pub extra_data: String,
    pub signature: String,
}

impl MomoIpn {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }
}

/// Momo wallet adapter (HMAC-SHA256)
#[derive(Clone)]
pub struct MomoGateway {
    config: MomoConfig,
    client: reqwest::Client,
}

impl MomoGateway {
    pub fn new(config: MomoConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { config, client })
    }

    /// String signed for a create request, fields in alphabetical order
    pub fn create_signature_payload(&self, request: &MomoPaymentRequest) -> String {
        format!(
            "accessKey={}&amount={}&extraData={}&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
            self.config.access_key,
            request.amount,
            request.extra_data,
            self.config.ipn_url,
            request.order_id,
            request.order_info,
            self.config.partner_code,
            self.config.redirect_url,
            request.request_id,
            self.config.request_type,
        )
    }

    /// String signed by Momo for an IPN or redirect callback
    pub fn callback_signature_payload(&self, ipn: &MomoIpn) -> String {
        format!(
            "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}&orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}&transId={}",
            self.config.access_key,
            ipn.amount,
            ipn.extra_data,
            ipn.message,
            ipn.order_id,
            ipn.order_info,
            ipn.order_type,
            ipn.partner_code,
            ipn.pay_type,
            ipn.request_id,
            ipn.response_time,
            ipn.result_code,
            ipn.trans_id,
        )
    }

    pub fn build_signed_request(
        &self,
        request: &MomoPaymentRequest,
    ) -> Result<MomoCreateBody, GatewayError> {
        let signature =
            hmac_sha256_hex(&self.config.secret_key, &self.create_signature_payload(request))?;
        Ok(MomoCreateBody {
            partner_code: self.config.partner_code.clone(),
            request_id: request.request_id.clone(),
            amount: request.amount,
            order_id: request.order_id.clone(),
            order_info: request.order_info.clone(),
            redirect_url: self.config.redirect_url.clone(),
            ipn_url: self.config.ipn_url.clone(),
            request_type: self.config.request_type.clone(),
            extra_data: request.extra_data.clone(),
            lang: self.config.lang.clone(),
            signature,
        })
    }

    /// Creates the payment at Momo and returns its pay URL.
    ///
    /// Transport failures and any non-zero `resultCode` are errors; nothing is retried.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount))]
    pub async fn create_payment(
        &self,
        request: &MomoPaymentRequest,
    ) -> Result<MomoCreateResponse, GatewayError> {
        let body = self.build_signed_request(request)?;
        let response: MomoCreateResponse = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if response.result_code != 0 {
            warn!(
                result_code = response.result_code,
                message = %response.message,
                "momo rejected payment creation"
            );
            return Err(GatewayError::Rejected {
                code: response.result_code,
                message: response.message,
            });
        }
        if response.pay_url.is_none() {
            return Err(GatewayError::Malformed(
                "momo response carries no payUrl".to_string(),
            ));
        }
        debug!("momo payment created");
        Ok(response)
    }

    pub fn verify_callback(&self, ipn: &MomoIpn) -> Result<bool, GatewayError> {
        let expected =
            hmac_sha256_hex(&self.config.secret_key, &self.callback_signature_payload(ipn))?;
        Ok(constant_time_eq(
            expected.as_bytes(),
            ipn.signature.to_ascii_lowercase().as_bytes(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sandbox() -> MomoConfig {
        MomoConfig {
            redirect_url: "https://shop.test/payment/momo/return".into(),
            ipn_url: "https://api.shop.test/api/v1/payments/momo/notify".into(),
            ..MomoConfig::default()
        }
    }

    fn request() -> MomoPaymentRequest {
        MomoPaymentRequest {
            order_id: "TXN1700000000000123456".into(),
            request_id: "TXN1700000000000123456".into(),
            amount: 150000,
            order_info: "Thanh toan don hang 42".into(),
            extra_data: String::new(),
        }
    }

    fn ipn() -> MomoIpn {
        MomoIpn {
            partner_code: "MOMO".into(),
            order_id: "TXN1700000000000123456".into(),
            request_id: "TXN1700000000000123456".into(),
            amount: 150000,
            order_info: "Thanh toan don hang 42".into(),
            order_type: "momo_wallet".into(),
            trans_id: 4088878653,
            result_code: 0,
            message: "Successful.".into(),
            pay_type: "qr".into(),
            response_time: 1700000123456,
            extra_data: String::new(),
            signature: IPN_SIGNATURE.into(),
        }
    }

    const CREATE_SIGNATURE: &str = "d12732f5b6ebe3122e4256350242447074558676cdc9cd08abd0212fd3f14f8d";
    const IPN_SIGNATURE: &str = "1d9ed41c4c94dd1c19be0f7a9b457313667c5bb2452f492f68cf2f7ff5ed8ecf";

    #[test]
    fn signs_create_request_over_alphabetical_fields() {
        let gateway = MomoGateway::new(sandbox(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            gateway.create_signature_payload(&request()),
            "accessKey=F8BBA842ECF85&amount=150000&extraData=&ipnUrl=https://api.shop.test/api/v1/payments/momo/notify&orderId=TXN1700000000000123456&orderInfo=Thanh toan don hang 42&partnerCode=MOMO&redirectUrl=https://shop.test/payment/momo/return&requestId=TXN1700000000000123456&requestType=captureWallet"
        );
        let body = gateway.build_signed_request(&request()).unwrap();
        assert_eq!(body.signature, CREATE_SIGNATURE);
    }

    #[test]
    fn verifies_sample_ipn() {
        let gateway = MomoGateway::new(sandbox(), Duration::from_secs(5)).unwrap();
        assert!(gateway.verify_callback(&ipn()).unwrap());
    }

    #[test]
    fn rejects_ipn_with_one_altered_byte() {
        let gateway = MomoGateway::new(sandbox(), Duration::from_secs(5)).unwrap();

        let mut tampered = ipn();
        tampered.amount = 150001;
        assert!(!gateway.verify_callback(&tampered).unwrap());

        let mut tampered = ipn();
        tampered.order_info = "Thanh toan don hang 43".into();
        assert!(!gateway.verify_callback(&tampered).unwrap());

        let mut bad_sig = ipn();
        bad_sig.signature.replace_range(0..1, "0");
        if bad_sig.signature == IPN_SIGNATURE {
            bad_sig.signature.replace_range(0..1, "1");
        }
        assert!(!gateway.verify_callback(&bad_sig).unwrap());
    }

    #[tokio::test]
    async fn create_payment_returns_pay_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/gateway/api/create"))
            .and(body_partial_json(serde_json::json!({
                "orderId": "TXN1700000000000123456",
                "amount": 150000,
                "signature": CREATE_SIGNATURE,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "partnerCode": "MOMO",
                "orderId": "TXN1700000000000123456",
                "requestId": "TXN1700000000000123456",
                "amount": 150000,
                "responseTime": 1700000000999i64,
                "message": "Successful.",
                "resultCode": 0,
                "payUrl": "https://test-payment.momo.vn/v2/gateway/pay?t=abc"
            })))
            .mount(&server)
            .await;

        let config = MomoConfig {
            endpoint: format!("{}/v2/gateway/api/create", server.uri()),
            ..sandbox()
        };
        let gateway = MomoGateway::new(config, Duration::from_secs(5)).unwrap();
        let response = gateway.create_payment(&request()).await.unwrap();
        assert_eq!(
            response.pay_url.as_deref(),
            Some("https://test-payment.momo.vn/v2/gateway/pay?t=abc")
        );
    }

    #[tokio::test]
    async fn non_zero_result_code_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "partnerCode": "MOMO",
                "orderId": "TXN1700000000000123456",
                "requestId": "TXN1700000000000123456",
                "amount": 150000,
                "message": "Bad format request.",
                "resultCode": 20
            })))
            .mount(&server)
            .await;

        let config = MomoConfig {
            endpoint: server.uri(),
            ..sandbox()
        };
        let gateway = MomoGateway::new(config, Duration::from_secs(5)).unwrap();
        let err = gateway.create_payment(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { code: 20, .. }));
    }
}
