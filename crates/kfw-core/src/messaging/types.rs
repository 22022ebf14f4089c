/// Inline URL button attached under a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

impl LinkButton {
    pub fn open_listing(url: impl Into<String>) -> Self {
        Self {
            label: "Открыть объявление".to_string(),
            url: url.into(),
        }
    }
}

/// One outbound notification, already rendered to HTML.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutgoingMessage {
    /// Photo by URL with an HTML caption.
    Photo {
        photo_url: String,
        caption_html: String,
        button: Option<LinkButton>,
    },
    /// Plain HTML text message (web page preview disabled).
    Text {
        html: String,
        button: Option<LinkButton>,
    },
}

impl OutgoingMessage {
    pub fn html(&self) -> &str {
        match self {
            Self::Photo { caption_html, .. } => caption_html,
            Self::Text { html, .. } => html,
        }
    }
}

/// What a messenger can deliver. The dispatcher renders within these limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessagingCapabilities {
    /// `false` turns every photo notification into a text message.
    pub supports_photos: bool,
    /// Upper bound for a photo caption, in characters.
    pub max_caption_len: usize,
}
