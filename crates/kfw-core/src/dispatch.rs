//! Fan-out of one rendered listing to every subscriber of a query.

use std::{collections::BTreeSet, sync::Arc};

use tracing::{debug, warn};

use crate::{
    domain::{DeliveryStatus, ListingId, NotificationOutcome, UserId},
    formatting::RenderedMessage,
    messaging::{
        port::MessagingPort,
        types::{LinkButton, MessagingCapabilities, OutgoingMessage},
    },
};

#[derive(Clone)]
pub struct Dispatcher {
    messenger: Arc<dyn MessagingPort>,
}

impl Dispatcher {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self { messenger }
    }

    pub fn capabilities(&self) -> MessagingCapabilities {
        self.messenger.capabilities()
    }

    /// Deliver to each recipient in turn. A failure for one recipient is logged
    /// and recorded; it never stops delivery to the others.
    pub async fn deliver(
        &self,
        listing: ListingId,
        message: &RenderedMessage,
        recipients: &BTreeSet<UserId>,
    ) -> Vec<NotificationOutcome> {
        let outgoing = build_outgoing(message, &self.capabilities());
        let mut outcomes = Vec::with_capacity(recipients.len());

        for &recipient in recipients {
            let status = match self.messenger.send(recipient, &outgoing).await {
                Ok(()) => {
                    debug!(listing = %listing, chat_id = recipient.0, "notification delivered");
                    DeliveryStatus::Delivered
                }
                Err(e) => {
                    warn!(listing = %listing, chat_id = recipient.0, error = %e, "notification failed");
                    DeliveryStatus::Failed(e.to_string())
                }
            };
            outcomes.push(NotificationOutcome {
                listing,
                recipient,
                status,
            });
        }

        outcomes
    }
}

/// Photo-with-caption when the listing has a photo and the messenger takes
/// photos, plain text otherwise.
pub fn build_outgoing(message: &RenderedMessage, caps: &MessagingCapabilities) -> OutgoingMessage {
    let button = message.link.as_deref().map(LinkButton::open_listing);
    match message.photo_url.as_ref().filter(|_| caps.supports_photos) {
        Some(photo_url) => OutgoingMessage::Photo {
            photo_url: photo_url.clone(),
            caption_html: message.html.clone(),
            button,
        },
        None => OutgoingMessage::Text {
            html: message.html.clone(),
            button,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::Error, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails for chat ids listed in `blocked`.
    #[derive(Default)]
    struct FlakyMessenger {
        blocked: Vec<i64>,
        sent: Mutex<Vec<(i64, OutgoingMessage)>>,
    }

    #[async_trait]
    impl MessagingPort for FlakyMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_photos: true,
                max_caption_len: 1024,
            }
        }

        async fn send(&self, to: UserId, message: &OutgoingMessage) -> Result<()> {
            if self.blocked.contains(&to.0) {
                return Err(Error::External("Forbidden: bot was blocked by the user".into()));
            }
            self.sent.lock().unwrap().push((to.0, message.clone()));
            Ok(())
        }
    }

    fn rendered(photo: Option<&str>) -> RenderedMessage {
        RenderedMessage {
            html: "<b>x</b>".to_string(),
            photo_url: photo.map(str::to_string),
            link: Some("https://www.kufar.by/item/1".to_string()),
        }
    }

    #[tokio::test]
    async fn one_failing_recipient_does_not_block_the_rest() {
        let messenger = Arc::new(FlakyMessenger {
            blocked: vec![2],
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(messenger.clone());
        let recipients: BTreeSet<_> = [UserId(1), UserId(2), UserId(3)].into_iter().collect();

        let outcomes = dispatcher
            .deliver(ListingId(7), &rendered(None), &recipients)
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_delivered());
        assert!(matches!(outcomes[1].status, DeliveryStatus::Failed(_)));
        assert!(outcomes[2].is_delivered());
        let sent: Vec<i64> = messenger.sent.lock().unwrap().iter().map(|(c, _)| *c).collect();
        assert_eq!(sent, vec![1, 3]);
    }

    const PHOTOS: MessagingCapabilities = MessagingCapabilities {
        supports_photos: true,
        max_caption_len: 1024,
    };

    #[test]
    fn photo_listing_becomes_captioned_photo() {
        match build_outgoing(&rendered(Some("https://rms.kufar.by/v1/gallery/a.jpg")), &PHOTOS) {
            OutgoingMessage::Photo {
                photo_url,
                caption_html,
                button,
            } => {
                assert_eq!(photo_url, "https://rms.kufar.by/v1/gallery/a.jpg");
                assert_eq!(caption_html, "<b>x</b>");
                assert_eq!(button.unwrap().url, "https://www.kufar.by/item/1");
            }
            other => panic!("expected photo, got {other:?}"),
        }
        assert!(matches!(
            build_outgoing(&rendered(None), &PHOTOS),
            OutgoingMessage::Text { .. }
        ));
    }

    #[test]
    fn text_only_messenger_gets_text_even_with_a_photo() {
        let caps = MessagingCapabilities {
            supports_photos: false,
            ..PHOTOS
        };
        match build_outgoing(&rendered(Some("https://rms.kufar.by/v1/gallery/a.jpg")), &caps) {
            OutgoingMessage::Text { html, button } => {
                assert_eq!(html, "<b>x</b>");
                assert!(button.is_some());
            }
            other => panic!("expected text, got {other:?}"),
        }
    }
}
