//! Listing detail page scraping and phone lookup parsing.
//!
//! Kufar renders its item pages with hashed CSS class names, so every field is
//! looked up through a list of selectors, most specific first. A field that
//! none of them finds is simply left empty.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use kfw_core::domain::ListingDetails;

const DESCRIPTION_SELECTORS: &[&str] = &[
    "[itemprop='description']",
    "[data-name='description']",
    "div[class*='description_content']",
    "div[class*='styles_description']",
];

const SELLER_NAME_SELECTORS: &[&str] = &[
    "[data-name='seller-name']",
    "[data-testid='seller-name']",
    "div[class*='seller_name']",
    "div[class*='styles_name']",
];

const SELLER_BLOCK_SELECTORS: &[&str] = &[
    "[data-name='seller-block']",
    "div[class*='styles_seller']",
    "div[class*='seller']",
];

const OG_DESCRIPTION: &str = "meta[property='og:description']";

fn listing_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d[\d\s]*)\s*объявлени").expect("valid regex"))
}

pub fn parse_detail_page(html: &str) -> ListingDetails {
    let doc = Html::parse_document(html);

    let body = first_match(&doc, DESCRIPTION_SELECTORS)
        .map(|el| block_text(&el))
        .filter(|t| !t.is_empty())
        .or_else(|| meta_content(&doc, OG_DESCRIPTION));

    let seller_name = first_match(&doc, SELLER_NAME_SELECTORS)
        .map(|el| inline_text(&el))
        .filter(|t| !t.is_empty());

    let seller_listing_count = first_match(&doc, SELLER_BLOCK_SELECTORS)
        .map(|el| inline_text(&el))
        .and_then(|t| parse_listing_count(&t));

    ListingDetails {
        body,
        seller_name,
        seller_listing_count,
        phone: None,
    }
}

/// "24 объявления" / "1 234 объявлений" → count.
pub fn parse_listing_count(text: &str) -> Option<u32> {
    let caps = listing_count_re().captures(text)?;
    let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Phone lookup responses: `{"phone": ".."}`, `{"data": {"phone": ".."}}`
/// or `{"phones": [".."]}`.
pub fn parse_phone_response(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let phone = v
        .get("phone")
        .and_then(|p| p.as_str())
        .or_else(|| v.pointer("/data/phone").and_then(|p| p.as_str()))
        .or_else(|| v.pointer("/phones/0").and_then(|p| p.as_str()))?;
    let phone = phone.trim();
    if phone.is_empty() {
        None
    } else {
        Some(phone.to_string())
    }
}

fn first_match<'a>(doc: &'a Html, selectors: &[&str]) -> Option<ElementRef<'a>> {
    selectors.iter().find_map(|raw| {
        let selector = Selector::parse(raw).ok()?;
        doc.select(&selector).next()
    })
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Text nodes on separate lines (keeps paragraph / `<br>` breaks).
fn block_text(el: &ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn inline_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <meta property="og:description" content="short og text">
</head><body>
  <div class="styles_description_content__x1">Продаю телефон.<br>Торг уместен.</div>
  <div class="styles_seller__a9">
    <div class="styles_name__Qy">  Иван
      Петров </div>
    <span>1 234 объявлений</span>
  </div>
</body></html>"#;

    #[test]
    fn extracts_description_seller_and_count() {
        let d = parse_detail_page(PAGE);
        assert_eq!(d.body.as_deref(), Some("Продаю телефон.\nТорг уместен."));
        assert_eq!(d.seller_name.as_deref(), Some("Иван Петров"));
        assert_eq!(d.seller_listing_count, Some(1234));
        assert!(d.phone.is_none());
    }

    #[test]
    fn falls_back_to_og_description() {
        let d = parse_detail_page(
            r#"<html><head><meta property="og:description" content="og body"></head><body></body></html>"#,
        );
        assert_eq!(d.body.as_deref(), Some("og body"));
        assert!(d.seller_name.is_none());
        assert!(d.seller_listing_count.is_none());
    }

    #[test]
    fn empty_page_yields_empty_details() {
        assert_eq!(parse_detail_page(""), ListingDetails::default());
    }

    #[test]
    fn listing_count_variants() {
        assert_eq!(parse_listing_count("24 объявления"), Some(24));
        assert_eq!(parse_listing_count("Всего 1 объявление"), Some(1));
        assert_eq!(parse_listing_count("на Куфаре с 2019"), None);
    }

    #[test]
    fn phone_response_shapes() {
        assert_eq!(
            parse_phone_response(r#"{"phone": "+375 29 111-22-33"}"#).as_deref(),
            Some("+375 29 111-22-33")
        );
        assert_eq!(
            parse_phone_response(r#"{"data": {"phone": "+375291112233"}}"#).as_deref(),
            Some("+375291112233")
        );
        assert_eq!(
            parse_phone_response(r#"{"phones": ["+375331234567"]}"#).as_deref(),
            Some("+375331234567")
        );
        assert_eq!(parse_phone_response(r#"{"phone": ""}"#), None);
        assert_eq!(parse_phone_response("not json"), None);
    }
}
