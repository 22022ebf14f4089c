//! Listing → Telegram HTML rendering.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Listing, Price};

pub const NEGOTIABLE_PRICE: &str = "Договорная";
pub const UNKNOWN_PRICE: &str = "Цена не указана";
pub const UNTITLED: &str = "Без заголовка";
const ELLIPSIS: &str = "…";

#[derive(Clone, Copy, Debug)]
pub struct RenderOptions {
    /// Max caption length in characters (Telegram: 1024).
    pub caption_limit: usize,
    pub utc_offset_hours: i64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            caption_limit: 1024,
            utc_offset_hours: 3,
        }
    }
}

/// A listing rendered once and delivered to every subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMessage {
    pub html: String,
    pub photo_url: Option<String>,
    pub link: Option<String>,
}

/// Escape the two characters Telegram HTML reserves in free text.
pub fn escape_angle_brackets(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

/// Make a URL safe inside a single-quoted `href` attribute.
pub fn escape_href(url: &str) -> String {
    url.replace('&', "&amp;")
        .replace('\'', "%27")
        .replace('<', "%3C")
        .replace('>', "%3E")
}

pub fn format_price(price: &Price) -> String {
    if price.is_negotiable() {
        return NEGOTIABLE_PRICE.to_string();
    }
    match (price.byn_major(), price.usd_major()) {
        (Some(byn), Some(usd)) => format!("{byn} BYN / {usd}$"),
        (Some(byn), None) => format!("{byn} BYN"),
        (None, Some(usd)) => format!("{usd}$"),
        (None, None) => UNKNOWN_PRICE.to_string(),
    }
}

/// `dd.mm.yyyy в HH:MM:SS` in the display timezone.
pub fn format_published(at: DateTime<Utc>, utc_offset_hours: i64) -> String {
    let local = at + Duration::hours(utc_offset_hours);
    local.format("%d.%m.%Y в %H:%M:%S").to_string()
}

pub fn render_listing(listing: &Listing, opts: RenderOptions) -> RenderedMessage {
    let header = render_header(listing, opts);
    let body = listing
        .body
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty());

    let html = match body {
        Some(body) => {
            let budget = opts
                .caption_limit
                .saturating_sub(header.chars().count() + 2);
            match fit_body(body, budget) {
                Some(body) => format!("{header}\n\n{body}"),
                None => header,
            }
        }
        None => header,
    };

    let link = Some(listing.link.trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string);

    RenderedMessage {
        html,
        photo_url: listing.photo_url.clone(),
        link,
    }
}

fn render_header(listing: &Listing, opts: RenderOptions) -> String {
    let title = if listing.title.trim().is_empty() {
        UNTITLED.to_string()
    } else {
        escape_angle_brackets(listing.title.trim())
    };

    let mut lines = vec![
        format!("<b><a href='{}'>{title}</a></b>", escape_href(listing.link.trim())),
        format!("<b>Цена:</b> {}", format_price(&listing.price)),
    ];

    let locality = listing.locality();
    if !locality.is_empty() {
        lines.push(format!("<b>Город:</b> {}", escape_angle_brackets(&locality)));
    }
    if let Some(at) = listing.published_at {
        lines.push(format!(
            "<b>Дата:</b> {}",
            format_published(at, opts.utc_offset_hours)
        ));
    }
    match (&listing.seller_name, listing.seller_listing_count) {
        (Some(name), Some(count)) => lines.push(format!(
            "<b>Продавец:</b> {} (объявлений: {count})",
            escape_angle_brackets(name)
        )),
        (Some(name), None) => {
            lines.push(format!("<b>Продавец:</b> {}", escape_angle_brackets(name)))
        }
        (None, Some(count)) => lines.push(format!("<b>Объявлений у продавца:</b> {count}")),
        (None, None) => {}
    }
    if let Some(phone) = &listing.phone {
        lines.push(format!("<b>Телефон:</b> {}", escape_angle_brackets(phone)));
    }

    lines.join("\n")
}

/// Escape `body` and cut it so the escaped result is at most `budget` chars,
/// ending in an ellipsis when cut. Cuts never split an escape sequence.
fn fit_body(body: &str, budget: usize) -> Option<String> {
    let escaped = escape_angle_brackets(body);
    if escaped.chars().count() <= budget {
        return Some(escaped);
    }

    let ellipsis_len = ELLIPSIS.chars().count();
    if budget <= ellipsis_len {
        return None;
    }
    let room = budget - ellipsis_len;

    let mut out = String::new();
    let mut used = 0usize;
    for ch in body.chars() {
        let piece = match ch {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            c => c.to_string(),
        };
        let len = piece.chars().count();
        if used + len > room {
            break;
        }
        used += len;
        out.push_str(&piece);
    }

    let trimmed = out.trim_end();
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("{trimmed}{ELLIPSIS}"))
}
