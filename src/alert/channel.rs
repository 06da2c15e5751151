//! Outbound notification transports.
//!
//! A channel never fails the caller: transport errors are logged and
//! reported as `false` from `send`.

use std::sync::Arc;

/// Outbound message capability consumed by the notifier.
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver one human-readable message. Returns false when delivery failed.
    fn send(&self, message: &str) -> bool;
}

/// Console fallback: writes alerts to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogChannel;

impl NotificationChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&self, message: &str) -> bool {
        log::warn!("[alert] {}", message);
        true
    }
}

/// SMS credentials for the Twilio transport.
#[derive(Clone, Debug, Default)]
pub struct TwilioCredentials {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl TwilioCredentials {
    pub fn is_complete(&self) -> bool {
        [&self.account_sid, &self.auth_token, &self.from, &self.to]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

#[cfg(feature = "notify-twilio")]
pub use twilio::TwilioChannel;

#[cfg(feature = "notify-twilio")]
mod twilio {
    use anyhow::{anyhow, Context, Result};
    use url::Url;

    use super::{NotificationChannel, TwilioCredentials};

    const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01/Accounts";

    /// Sends alerts as SMS through the Twilio Messages API.
    pub struct TwilioChannel {
        endpoint: Url,
        from: String,
        to: String,
    }

    impl TwilioChannel {
        pub fn new(creds: &TwilioCredentials) -> Result<Self> {
            let field = |v: &Option<String>, name: &str| {
                v.clone()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| anyhow!("twilio {} missing", name))
            };
            let sid = field(&creds.account_sid, "account sid")?;
            let token = field(&creds.auth_token, "auth token")?;
            let mut endpoint = Url::parse(&format!("{}/{}/Messages.json", TWILIO_API_BASE, sid))
                .context("build twilio endpoint")?;
            endpoint
                .set_username(&sid)
                .map_err(|_| anyhow!("twilio endpoint rejects credentials"))?;
            endpoint
                .set_password(Some(&token))
                .map_err(|_| anyhow!("twilio endpoint rejects credentials"))?;
            Ok(Self {
                endpoint,
                from: field(&creds.from, "sender number")?,
                to: field(&creds.to, "recipient number")?,
            })
        }
    }

    impl NotificationChannel for TwilioChannel {
        fn name(&self) -> &'static str {
            "twilio"
        }

        fn send(&self, message: &str) -> bool {
            let result = ureq::post(self.endpoint.as_str()).send_form(&[
                ("Body", message),
                ("From", self.from.as_str()),
                ("To", self.to.as_str()),
            ]);
            match result {
                Ok(_) => {
                    log::info!("sms alert sent to {}", self.to);
                    true
                }
                Err(e) => {
                    log::error!("twilio send failed: {}", e);
                    false
                }
            }
        }
    }
}

/// Pick the SMS transport when fully configured, otherwise the log channel.
pub fn channel_from_config(creds: &TwilioCredentials) -> Arc<dyn NotificationChannel> {
    if !creds.is_complete() {
        log::info!("sms credentials not configured; alerts go to the log");
        return Arc::new(LogChannel);
    }
    build_sms_channel(creds)
}

#[cfg(feature = "notify-twilio")]
fn build_sms_channel(creds: &TwilioCredentials) -> Arc<dyn NotificationChannel> {
    match TwilioChannel::new(creds) {
        Ok(channel) => Arc::new(channel),
        Err(e) => {
            log::warn!("{}; alerts go to the log", e);
            Arc::new(LogChannel)
        }
    }
}

#[cfg(not(feature = "notify-twilio"))]
fn build_sms_channel(_creds: &TwilioCredentials) -> Arc<dyn NotificationChannel> {
    log::warn!("sms credentials set but notify-twilio feature disabled; alerts go to the log");
    Arc::new(LogChannel)
}
