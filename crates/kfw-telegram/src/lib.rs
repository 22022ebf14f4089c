//! Telegram adapter (teloxide).
//!
//! This crate implements the `kfw-core` MessagingPort over the Telegram Bot API.

use async_trait::async_trait;

use reqwest::Url;
use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode},
};

use tokio::time::sleep;
use tracing::warn;

use kfw_core::{
    domain::UserId,
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{LinkButton, MessagingCapabilities, OutgoingMessage},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self::new(Bot::new(token))
    }

    fn tg_chat(user: UserId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(user.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, teloxide::RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn send_text(
        &self,
        user: UserId,
        html: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> std::result::Result<(), teloxide::RequestError> {
        self.with_retry(|| {
            let mut req = self
                .bot
                .send_message(Self::tg_chat(user), html.to_string())
                .parse_mode(ParseMode::Html)
                .disable_web_page_preview(true);
            if let Some(m) = markup.clone() {
                req = req.reply_markup(m);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        user: UserId,
        photo: Url,
        caption_html: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> std::result::Result<(), teloxide::RequestError> {
        self.with_retry(|| {
            let mut req = self
                .bot
                .send_photo(Self::tg_chat(user), InputFile::url(photo.clone()))
                .caption(caption_html.to_string())
                .parse_mode(ParseMode::Html);
            if let Some(m) = markup.clone() {
                req = req.reply_markup(m);
            }
            req
        })
        .await?;
        Ok(())
    }
}

fn link_markup(button: Option<&LinkButton>) -> Option<InlineKeyboardMarkup> {
    let button = button?;
    let url = Url::parse(&button.url).ok()?;
    Some(InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
        button.label.clone(),
        url,
    )]]))
}

/// Telegram could not fetch the photo URL itself; the text is still deliverable.
fn is_photo_fetch_error(e: &teloxide::RequestError) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("http url content") || msg.contains("wrong file identifier")
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_photos: true,
            max_caption_len: 1024,
        }
    }

    async fn send(&self, to: UserId, message: &OutgoingMessage) -> Result<()> {
        match message {
            OutgoingMessage::Text { html, button } => self
                .send_text(to, html, link_markup(button.as_ref()))
                .await
                .map_err(Self::map_err),
            OutgoingMessage::Photo {
                photo_url,
                caption_html,
                button,
            } => {
                let markup = link_markup(button.as_ref());
                let Ok(photo) = Url::parse(photo_url) else {
                    return self
                        .send_text(to, caption_html, markup)
                        .await
                        .map_err(Self::map_err);
                };
                match self
                    .send_photo(to, photo, caption_html, markup.clone())
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(e) if is_photo_fetch_error(&e) => {
                        warn!(chat_id = to.0, error = %e, "photo rejected, sending as text");
                        self.send_text(to, caption_html, markup)
                            .await
                            .map_err(Self::map_err)
                    }
                    Err(e) => Err(Self::map_err(e)),
                }
            }
        }
    }
}
