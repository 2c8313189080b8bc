use super::GatewayError;
use crate::config::VietQrConfig;
use url::Url;

/// Transfer details rendered into a VietQR image
#[derive(Debug, Clone)]
pub struct VietQrRequest<'a> {
    /// Bank short name or BIN understood by the image service, e.g. `VCB`
    pub bank: &'a str,
    pub account_number: &'a str,
    pub account_holder: &'a str,
    pub amount: i64,
    pub memo: &'a str,
}

/// Builds VietQR image URLs; the image itself is rendered by the remote service.
#[derive(Clone)]
pub struct VietQrGateway {
    config: VietQrConfig,
}

impl VietQrGateway {
    pub fn new(config: VietQrConfig) -> Self {
        Self { config }
    }

    pub fn image_url(&self, request: &VietQrRequest<'_>) -> Result<String, GatewayError> {
        let mut url = Url::parse(&self.config.image_base_url)?;
        url.path_segments_mut()
            .map_err(|_| {
                GatewayError::Malformed(format!(
                    "{} cannot carry a path",
                    self.config.image_base_url
                ))
            })?
            .pop_if_empty()
            .push(&format!(
                "{}-{}-{}.png",
                request.bank, request.account_number, self.config.template
            ));
        url.query_pairs_mut()
            .append_pair("amount", &request.amount.to_string())
            .append_pair("addInfo", request.memo)
            .append_pair("accountName", request.account_holder);
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_image_url_with_transfer_details() {
        let gateway = VietQrGateway::new(VietQrConfig::default());
        let url = gateway
            .image_url(&VietQrRequest {
                bank: "VCB",
                account_number: "0011004455667",
                account_holder: "CONG TY TECHSHOP",
                amount: 150000,
                memo: "Thanh toan don hang DH20240309000042",
            })
            .unwrap();

        assert_eq!(
            url,
            "https://img.vietqr.io/image/VCB-0011004455667-compact2.png?amount=150000&addInfo=Thanh+toan+don+hang+DH20240309000042&accountName=CONG+TY+TECHSHOP"
        );
    }

    #[test]
    fn trailing_slash_in_base_url_is_tolerated() {
        let gateway = VietQrGateway::new(VietQrConfig {
            image_base_url: "https://img.vietqr.io/image/".into(),
            ..VietQrConfig::default()
        });
        let url = gateway
            .image_url(&VietQrRequest {
                bank: "MB",
                account_number: "123",
                account_holder: "A",
                amount: 1,
                memo: "m",
            })
            .unwrap();
        assert!(url.starts_with("https://img.vietqr.io/image/MB-123-compact2.png?"));
    }
}
