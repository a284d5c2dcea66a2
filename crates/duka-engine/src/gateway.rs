//! # Mobile-Money Gateway Client
//!
//! STK-push initiation against a Daraja-style mobile-money API.
//!
//! ## Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        STK Push Initiation                              │
//! │                                                                         │
//! │  1. GET  /oauth/v1/generate?grant_type=client_credentials               │
//! │       basic auth: consumer key / consumer secret                        │
//! │       → { access_token }                                                │
//! │                                                                         │
//! │  2. POST /mpesa/stkpush/v1/processrequest                               │
//! │       bearer: access_token                                              │
//! │       password = base64(shortcode + passkey + timestamp)                │
//! │       → { CheckoutRequestID, MerchantRequestID, ResponseCode }          │
//! │                                                                         │
//! │  ResponseCode "0" means ACCEPTED, not paid: the customer still has      │
//! │  to approve on their handset. Settlement arrives later as an async      │
//! │  callback, correlated by CheckoutRequestID (see `reconcile`).           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The committer talks to [`PaymentGateway`], not to this client directly;
//! tests substitute a scripted double behind the same trait.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use duka_core::Money;

// =============================================================================
// Errors
// =============================================================================

/// Gateway client errors.
///
/// All of them mean "no payment was initiated"; the committer puts allocated
/// stock back and surfaces the failure without persisting a sale.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network-level failure: timeout, refused connection, DNS.
    #[error("Gateway unreachable: {0}")]
    Unreachable(String),

    /// Credential rejection during the OAuth handshake.
    #[error("Gateway authentication failed: {0}")]
    Auth(String),

    /// The gateway understood the request and said no.
    #[error("Gateway rejected STK push ({code}): {description}")]
    Rejected { code: String, description: String },

    /// A 2xx response whose body doesn't carry the fields it must.
    #[error("Unexpected gateway response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Unreachable(err.to_string())
    }
}

// =============================================================================
// Trait
// =============================================================================

/// The gateway's acknowledgement of an accepted push.
///
/// `checkout_request_id` is the correlation key every later callback carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StkPushAck {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
}

/// The seam between the commit pipeline and the payment provider.
///
/// One method on purpose: initiation is the only moment the engine calls
/// out; everything after that arrives as a callback.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Asks the gateway to push a payment prompt to the customer's phone.
    ///
    /// `account_reference` shows up on the customer's statement; the
    /// committer passes the sale number.
    async fn initiate_stk_push(
        &self,
        phone_number: &str,
        amount: Money,
        account_reference: &str,
    ) -> Result<StkPushAck, GatewayError>;
}

// =============================================================================
// Daraja Client
// =============================================================================

/// Connection settings for the Daraja-style gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub business_short_code: String,
    pub passkey: String,
    /// Where the gateway posts settlement callbacks.
    pub callback_url: String,
    pub timeout: Duration,
}

impl GatewayConfig {
    /// Sandbox settings with caller-supplied credentials.
    pub fn sandbox(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        passkey: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        GatewayConfig {
            base_url: "https://sandbox.safaricom.co.ke".to_string(),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            business_short_code: "174379".to_string(),
            passkey: passkey.into(),
            callback_url: callback_url.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the real gateway.
#[derive(Debug, Clone)]
pub struct DarajaGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Debug, Deserialize)]
struct OauthResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    call_back_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'static str,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

impl DarajaGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        Ok(DarajaGateway { client, config })
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: OauthResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(body.access_token)
    }
}

/// Daraja takes whole currency units; round up so the push always covers
/// the sale.
fn whole_units(amount: Money) -> i64 {
    (amount.cents() + 99) / 100
}

/// `base64(shortcode + passkey + timestamp)`, as the protocol demands.
fn stk_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{short_code}{passkey}{timestamp}"))
}

#[async_trait]
impl PaymentGateway for DarajaGateway {
    async fn initiate_stk_push(
        &self,
        phone_number: &str,
        amount: Money,
        account_reference: &str,
    ) -> Result<StkPushAck, GatewayError> {
        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();

        let request = StkPushRequest {
            business_short_code: &self.config.business_short_code,
            password: stk_password(
                &self.config.business_short_code,
                &self.config.passkey,
                &timestamp,
            ),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: whole_units(amount),
            party_a: phone_number,
            party_b: &self.config.business_short_code,
            phone_number,
            call_back_url: &self.config.callback_url,
            account_reference,
            transaction_desc: "POS sale",
        };

        debug!(
            account_reference = %account_reference,
            amount = %amount,
            "Initiating STK push"
        );

        let url = format!(
            "{}/mpesa/stkpush/v1/processrequest",
            self.config.base_url
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let body: StkPushResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if let Some(code) = body.error_code {
            warn!(code = %code, "Gateway rejected STK push");
            return Err(GatewayError::Rejected {
                code,
                description: body.error_message.unwrap_or_default(),
            });
        }

        match body.response_code.as_deref() {
            Some("0") => {}
            Some(code) => {
                warn!(code = %code, "Gateway declined STK push");
                return Err(GatewayError::Rejected {
                    code: code.to_string(),
                    description: body.response_description.unwrap_or_default(),
                });
            }
            None => {
                return Err(GatewayError::InvalidResponse(
                    "missing ResponseCode".to_string(),
                ))
            }
        }

        let (Some(checkout_request_id), Some(merchant_request_id)) =
            (body.checkout_request_id, body.merchant_request_id)
        else {
            return Err(GatewayError::InvalidResponse(
                "accepted push without correlation ids".to_string(),
            ));
        };

        info!(
            checkout_request_id = %checkout_request_id,
            account_reference = %account_reference,
            "STK push accepted"
        );

        Ok(StkPushAck {
            checkout_request_id,
            merchant_request_id,
        })
    }
}

// =============================================================================
// Test Double
// =============================================================================

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted gateway for engine tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy)]
    pub enum MockBehavior {
        Accept,
        Reject,
        Unreachable,
    }

    pub struct MockGateway {
        behavior: Mutex<MockBehavior>,
        calls: AtomicUsize,
    }

    impl MockGateway {
        pub fn accepting() -> Self {
            Self::with_behavior(MockBehavior::Accept)
        }

        pub fn rejecting() -> Self {
            Self::with_behavior(MockBehavior::Reject)
        }

        pub fn with_behavior(behavior: MockBehavior) -> Self {
            MockGateway {
                behavior: Mutex::new(behavior),
                calls: AtomicUsize::new(0),
            }
        }

        /// Number of initiation attempts seen so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn initiate_stk_push(
            &self,
            _phone_number: &str,
            _amount: Money,
            account_reference: &str,
        ) -> Result<StkPushAck, GatewayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match *self.behavior.lock().unwrap() {
                MockBehavior::Accept => Ok(StkPushAck {
                    checkout_request_id: format!("ws_CO_{account_reference}_{n}"),
                    merchant_request_id: format!("mr_{n}"),
                }),
                MockBehavior::Reject => Err(GatewayError::Rejected {
                    code: "1".to_string(),
                    description: "The initiator information is invalid".to_string(),
                }),
                MockBehavior::Unreachable => {
                    Err(GatewayError::Unreachable("connection refused".to_string()))
                }
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
