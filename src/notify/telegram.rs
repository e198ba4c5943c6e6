//! Telegram Bot API transport

use super::{format_alert, format_update, Alert, DeliveryOutcome, Notifier, NotifyError};
use crate::tracker::PerformanceUpdate;
use crate::config::TelegramConfig;
use crate::exchange::{ExchangeError, RetryPolicy};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Telegram Bot API base URL
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Envelope every Bot API method answers with
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    username: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Sends HTML messages to one chat
pub struct TelegramNotifier {
    base_url: String,
    bot_token: String,
    chat_id: String,
    client: Client,
    retry: RetryPolicy,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, retry: RetryPolicy) -> Result<Self, NotifyError> {
        if config.bot_token.trim().is_empty() || config.chat_id.trim().is_empty() {
            return Err(NotifyError::Invalid(
                "bot_token and chat_id are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(ExchangeError::from)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            client,
            retry,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    /// Check the token with `getMe`, returning the bot username
    pub async fn validate(&self) -> Result<String, NotifyError> {
        let url = self.url("getMe");
        let user: BotUser = self
            .retry
            .run("telegram_get_me", |_attempt| {
                let url = &url;
                async move {
                    let response = self.client.get(url).send().await?;
                    read_response(response).await
                }
            })
            .await?;

        let username = user.username.unwrap_or_default();
        tracing::info!(bot = %username, "Telegram bot validated");
        Ok(username)
    }

    /// Send one HTML message, retrying transient failures
    pub async fn send_text(&self, text: &str) -> DeliveryOutcome {
        let url = self.url("sendMessage");
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let result: Result<serde_json::Value, ExchangeError> = self
            .retry
            .run("telegram_send_message", |_attempt| {
                let url = &url;
                let body = &body;
                async move {
                    let response = self.client.post(url).json(body).send().await?;
                    read_response(response).await
                }
            })
            .await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Telegram send failed");
        }
        DeliveryOutcome::from_result(&result)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, alert: &Alert) -> DeliveryOutcome {
        self.send_text(&format_alert(alert)).await
    }

    async fn deliver_update(&self, update: &PerformanceUpdate) -> DeliveryOutcome {
        self.send_text(&format_update(update)).await
    }

    async fn send_startup(&self, summary: &str) -> DeliveryOutcome {
        let text = format!(
            "🤖 <b>Volume Scanner Started</b>\n\n{}\n\nScanner is now running …",
            summary
        );
        self.send_text(&text).await
    }
}

/// Map a Bot API answer onto the shared error taxonomy
async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
    let status = response.status();
    if status.is_server_error() {
        return Err(ExchangeError::Server {
            status: status.as_u16(),
        });
    }

    let body = response.text().await?;
    let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => {
            return Err(ExchangeError::Client {
                status: status.as_u16(),
                body,
            })
        }
        Err(e) => return Err(ExchangeError::Decode(e.to_string())),
    };

    if parsed.ok {
        return parsed
            .result
            .ok_or_else(|| ExchangeError::Decode("missing result".to_string()));
    }

    let code = parsed.error_code.unwrap_or(status.as_u16());
    if code == StatusCode::TOO_MANY_REQUESTS.as_u16() {
        return Err(ExchangeError::RateLimited {
            retry_after: parsed
                .parameters
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs),
        });
    }
    Err(ExchangeError::Client {
        status: code,
        body: parsed.description.unwrap_or_default(),
    })
}
