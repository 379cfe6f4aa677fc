use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{instrument, warn};

/// Remote payment session created at the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOrder {
    pub id: String,
}

/// Thin boundary to the external payment provider. Any provider failure
/// surfaces as `ServiceError::GatewayError`; the caller must not persist a
/// payment record unless a provider order id actually came back.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_order(
        &self,
        amount: Decimal,
        currency: &str,
        metadata: serde_json::Value,
    ) -> Result<ProviderOrder, ServiceError>;
}

/// Calls the gateway with bounded retries. Only gateway-class errors are
/// retried; the final error is returned unchanged.
#[instrument(skip(gateway, metadata))]
pub async fn create_with_retry(
    gateway: &dyn PaymentGateway,
    amount: Decimal,
    currency: &str,
    metadata: serde_json::Value,
    max_attempts: u32,
) -> Result<ProviderOrder, ServiceError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match gateway
            .create_payment_order(amount, currency, metadata.clone())
            .await
        {
            Ok(order) => return Ok(order),
            Err(ServiceError::GatewayError(msg)) if attempt < max_attempts => {
                warn!(attempt, "Gateway create-payment-order failed, retrying: {}", msg);
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Converts a decimal amount into the provider's minor currency units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount out of range: {}", amount)))
}

#[derive(Debug, Deserialize)]
struct ProviderOrderResponse {
    id: String,
}

/// HTTP client for the payment provider's order API.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, key_id: String, key_secret: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            key_id,
            key_secret,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, metadata))]
    async fn create_payment_order(
        &self,
        amount: Decimal,
        currency: &str,
        metadata: serde_json::Value,
    ) -> Result<ProviderOrder, ServiceError> {
        let body = json!({
            "amount": to_minor_units(amount)?,
            "currency": currency,
            "notes": metadata,
        });

        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::GatewayError(format!(
                "provider returned {}: {}",
                status, text
            )));
        }

        let parsed: ProviderOrderResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("invalid provider response: {}", e)))?;

        Ok(ProviderOrder { id: parsed.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn amounts_convert_to_minor_units() {
        assert_eq!(to_minor_units(dec!(1700)).unwrap(), 170000);
        assert_eq!(to_minor_units(dec!(19.99)).unwrap(), 1999);
        assert_eq!(to_minor_units(Decimal::ZERO).unwrap(), 0);
    }

    #[tokio::test]
    async fn retry_stops_after_bounded_attempts() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment_order()
            .times(3)
            .returning(|_, _, _| Err(ServiceError::GatewayError("503".to_string())));

        let result =
            create_with_retry(&gateway, dec!(100), "USD", serde_json::Value::Null, 3).await;
        assert!(matches!(result, Err(ServiceError::GatewayError(_))));
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let mut gateway = MockPaymentGateway::new();
        let mut calls = 0;
        gateway
            .expect_create_payment_order()
            .times(2)
            .returning(move |_, _, _| {
                calls += 1;
                if calls == 1 {
                    Err(ServiceError::GatewayError("timeout".to_string()))
                } else {
                    Ok(ProviderOrder {
                        id: "order_abc".to_string(),
                    })
                }
            });

        let order = create_with_retry(&gateway, dec!(100), "USD", serde_json::Value::Null, 3)
            .await
            .unwrap();
        assert_eq!(order.id, "order_abc");
    }

    #[tokio::test]
    async fn non_gateway_errors_are_not_retried() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment_order()
            .times(1)
            .returning(|_, _, _| Err(ServiceError::InternalError("bug".to_string())));

        let result =
            create_with_retry(&gateway, dec!(100), "USD", serde_json::Value::Null, 3).await;
        assert!(matches!(result, Err(ServiceError::InternalError(_))));
    }
}
