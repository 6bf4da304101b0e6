use crate::protocol::{MixerParam, MixerUpdateRequest, MixerUpdateResponse};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

const UPDATE_PATH: &str = "update-dsp-mixer";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum MixerHttpError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bad base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("mixer update failed: status={status} body={body}")]
    BadStatus { status: StatusCode, body: String },
    #[error("device rejected {param}: {reason}")]
    Rejected { param: MixerParam, reason: String },
}

/// Client for the device's mixer endpoint.
#[derive(Debug, Clone)]
pub struct MixerHttpClient {
    client: reqwest::Client,
    url: Url,
}

impl MixerHttpClient {
    pub fn new(base: &Url) -> Result<Self, MixerHttpError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: base.join(UPDATE_PATH)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn update(&self, param: MixerParam, value: f64) -> Result<(), MixerHttpError> {
        let body = MixerUpdateRequest { param, value };
        let resp = self.client.post(self.url.clone()).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MixerHttpError::BadStatus { status, body });
        }

        let reply: MixerUpdateResponse = resp.json().await?;
        if !reply.success {
            return Err(MixerHttpError::Rejected {
                param,
                reason: reply.error.unwrap_or_else(|| "no reason given".to_string()),
            });
        }
        debug!(%param, value, "mixer updated over http");
        Ok(())
    }

    /// Fire-and-forget variant: failures end up in the log only.
    pub async fn update_logged(&self, param: MixerParam, value: f64) -> bool {
        match self.update(param, value).await {
            Ok(()) => true,
            Err(e) => {
                error!(%param, value, error = %e, "mixer http update failed");
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::one_shot;
    use super::*;

    #[tokio::test]
    async fn posts_param_and_value() {
        let (base, server) = one_shot("200 OK", r#"{"success":true}"#).await;
        let client = MixerHttpClient::new(&base).unwrap();
        assert_eq!(client.url().path(), "/update-dsp-mixer");

        client.update(MixerParam::Pan, -0.5).await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /update-dsp-mixer"));
        assert!(request.contains(r#""param":"pan""#));
        assert!(request.contains(r#""value":-0.5"#));
    }

    #[tokio::test]
    async fn device_rejection_is_an_error() {
        let (base, _server) = one_shot(
            "200 OK",
            r#"{"success":false,"message":"Pan value must be between -1.0 and 1.0"}"#,
        )
        .await;
        let client = MixerHttpClient::new(&base).unwrap();
        match client.update(MixerParam::Pan, 3.0).await {
            Err(MixerHttpError::Rejected { param, reason }) => {
                assert_eq!(param, MixerParam::Pan);
                assert!(reason.starts_with("Pan value"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_logged_not_raised() {
        let (base, _server) = one_shot("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let client = MixerHttpClient::new(&base).unwrap();
        assert!(!client.update_logged(MixerParam::MasterGain, 1.0).await);
    }
}
