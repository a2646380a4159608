use async_trait::async_trait;
use serde::Deserialize;

use super::{CarrierError, CarrierGateway, SendOutcome};
use crate::config::types::TwilioConfig;
use crate::dispatch::types::Recipient;

/// Twilio Programmable Messaging adapter
#[derive(Debug)]
pub struct TwilioCarrier {
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResource {
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    message: Option<String>,
}

impl TwilioCarrier {
    pub fn new(config: &TwilioConfig) -> Result<Self, CarrierError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

/// Carrier id placed on accepted messages whose response carried no sid
const UNKNOWN_SID: &str = "unknown";

fn accepted_outcome(body: &str) -> SendOutcome {
    match serde_json::from_str::<MessageResource>(body) {
        Ok(message) => {
            tracing::debug!(
                sid = %message.sid,
                status = message.status.as_deref().unwrap_or("unknown"),
                "Carrier accepted message"
            );
            SendOutcome::Accepted {
                carrier_id: message.sid,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Carrier accepted message but its response was unreadable");
            SendOutcome::Accepted {
                carrier_id: UNKNOWN_SID.to_string(),
            }
        }
    }
}

#[async_trait]
impl CarrierGateway for TwilioCarrier {
    async fn send(&self, recipient: &Recipient, body: &str) -> Result<SendOutcome, CarrierError> {
        let params = [
            ("To", recipient.as_str()),
            ("From", self.from_number.as_str()),
            ("Body", body),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { CarrierError::Timeout } else { e.into() })?;

        let status = response.status();

        if status.is_success() {
            // The message is already queued at the carrier, whatever the body says
            let text = response.text().await.unwrap_or_default();
            return Ok(accepted_outcome(&text));
        }

        let text = response.text().await.unwrap_or_default();

        if status.is_client_error() {
            // 4xx means the carrier looked at the message and refused it
            let reason = match serde_json::from_str::<ErrorResource>(&text) {
                Ok(ErrorResource {
                    code: Some(code),
                    message: Some(message),
                }) => format!("{} (code {})", message, code),
                Ok(ErrorResource {
                    message: Some(message),
                    ..
                }) => message,
                _ => format!("HTTP {}", status.as_u16()),
            };
            return Ok(SendOutcome::Rejected { reason });
        }

        Err(CarrierError::Status {
            status: status.as_u16(),
            message: text,
        })
    }

    fn kind(&self) -> &'static str {
        "twilio"
    }
}
