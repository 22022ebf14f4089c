//! Search request parameters and `rendered-paginated` response parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::warn;

use kfw_core::{
    domain::{Listing, ListingId, Price, QuerySpec},
    errors::Error,
    Result,
};

pub const SORT_NEWEST_FIRST: &str = "lst.d";
const RMS_GALLERY_URL: &str = "https://rms.kufar.by/v1/gallery";

/// Upstream query parameters for one search.
///
/// Locality and price range are deliberately absent: both are filtered
/// client-side because the upstream taxonomy does not match user labels.
pub fn search_params(query: &QuerySpec, lang: &str, default_limit: u32) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("query", query.term.trim().to_string()),
        ("size", query.limit.unwrap_or(default_limit).to_string()),
    ];
    if query.title_only {
        params.push(("ot", "1".to_string()));
    }
    params.push(("lang", lang.to_string()));
    params.push(("sort", SORT_NEWEST_FIRST.to_string()));
    params
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    ads: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawAd {
    #[serde(default, deserialize_with = "lenient_i64")]
    ad_id: Option<i64>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    price_byn: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    price_usd: Option<i64>,
    #[serde(default)]
    list_time: Option<String>,
    #[serde(default)]
    ad_link: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    images: Vec<RawImage>,
    #[serde(default)]
    ad_parameters: Vec<RawParam>,
    #[serde(default)]
    account_parameters: Vec<RawParam>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(default)]
    media_storage: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawParam {
    #[serde(default)]
    p: String,
    #[serde(default)]
    v: serde_json::Value,
    #[serde(default)]
    vl: serde_json::Value,
}

/// Numbers arrive either as JSON numbers or as numeric strings.
fn lenient_i64<'de, D>(d: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(v.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

/// Parse a search response body into listings, preserving upstream order
/// (newest first). Individual malformed ads are skipped.
pub fn parse_search_response(body: &str) -> Result<Vec<Listing>> {
    let resp: SearchResponse = serde_json::from_str(body)
        .map_err(|e| Error::Parse(format!("kufar search response: {e}")))?;

    let mut out = Vec::with_capacity(resp.ads.len());
    for raw in resp.ads {
        match serde_json::from_value::<RawAd>(raw) {
            Ok(ad) => match ad.into_listing() {
                Some(listing) => out.push(listing),
                None => warn!("skipping kufar ad without ad_id"),
            },
            Err(e) => warn!(error = %e, "skipping malformed kufar ad"),
        }
    }
    Ok(out)
}

impl RawAd {
    fn into_listing(self) -> Option<Listing> {
        let id = ListingId(self.ad_id?);
        let photo_url = self.images.first().and_then(photo_url);
        let published_at = self.list_time.as_deref().and_then(parse_list_time);
        let region = param_label(&self.ad_parameters, "region");
        let area = param_label(&self.ad_parameters, "area");
        let seller_name = param_value(&self.account_parameters, "name");

        Some(Listing {
            id,
            title: self.subject.unwrap_or_default(),
            price: Price {
                byn_minor: self.price_byn,
                usd_minor: self.price_usd,
            },
            published_at,
            region,
            area,
            photo_url,
            link: self.ad_link.unwrap_or_default(),
            body: self.body.filter(|b| !b.trim().is_empty()),
            seller_name,
            seller_listing_count: None,
            phone: None,
        })
    }
}

fn photo_url(image: &RawImage) -> Option<String> {
    if image.media_storage.as_deref() != Some("rms") {
        return None;
    }
    let path = image.path.as_deref()?.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    Some(format!("{RMS_GALLERY_URL}/{path}"))
}

/// `2024-05-01T10:00:00Z` (any RFC 3339 offset accepted).
pub fn parse_list_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn param_label(params: &[RawParam], name: &str) -> Option<String> {
    params
        .iter()
        .find(|p| p.p == name)
        .and_then(|p| json_text(&p.vl))
}

fn param_value(params: &[RawParam], name: &str) -> Option<String> {
    params
        .iter()
        .find(|p| p.p == name)
        .and_then(|p| json_text(&p.v))
}

fn json_text(v: &serde_json::Value) -> Option<String> {
    let s = match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        _ => return None,
    };
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
      "ads": [
        {
          "ad_id": 2002,
          "subject": "iPhone 13 Pro",
          "price_byn": "150000",
          "price_usd": "45099",
          "list_time": "2024-05-01T10:00:00Z",
          "ad_link": "https://www.kufar.by/item/2002",
          "images": [{"media_storage": "rms", "path": "adim1/abc.jpg"}],
          "ad_parameters": [
            {"p": "region", "v": "7", "vl": "Минск"},
            {"p": "area", "v": "22", "vl": "Фрунзенский"}
          ],
          "account_parameters": [{"p": "name", "v": "Андрей", "vl": ""}]
        },
        {
          "ad_id": "2001",
          "subject": "iPhone 12",
          "price_byn": 0,
          "price_usd": 0,
          "ad_link": "https://www.kufar.by/item/2001",
          "images": [{"media_storage": "yams", "path": "x.jpg"}]
        },
        {"subject": "no id"},
        "garbage"
      ],
      "pagination": {}
    }"#;

    #[test]
    fn params_forward_term_limit_and_title_flag_but_not_locality() {
        let mut q = QuerySpec::new("iphone").with_locality("Минск");
        q.limit = Some(5);
        q.title_only = true;
        q.price_min = Some(10);

        let params = search_params(&q, "ru", 10);
        assert_eq!(
            params,
            vec![
                ("query", "iphone".to_string()),
                ("size", "5".to_string()),
                ("ot", "1".to_string()),
                ("lang", "ru".to_string()),
                ("sort", "lst.d".to_string()),
            ]
        );
    }

    #[test]
    fn params_default_limit_without_title_flag() {
        let params = search_params(&QuerySpec::new("bike"), "ru", 10);
        assert!(params.contains(&("size", "10".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "ot"));
    }

    #[test]
    fn parses_ads_in_upstream_order() {
        let listings = parse_search_response(FIXTURE).unwrap();
        assert_eq!(listings.len(), 2);

        let first = &listings[0];
        assert_eq!(first.id, ListingId(2002));
        assert_eq!(first.title, "iPhone 13 Pro");
        assert_eq!(first.price.byn_major(), Some(1500));
        assert_eq!(first.price.usd_major(), Some(450));
        assert_eq!(
            first.photo_url.as_deref(),
            Some("https://rms.kufar.by/v1/gallery/adim1/abc.jpg")
        );
        assert_eq!(first.locality(), "Минск / Фрунзенский");
        assert_eq!(first.seller_name.as_deref(), Some("Андрей"));
        assert_eq!(
            first.published_at.map(|t| t.to_rfc3339()),
            Some("2024-05-01T10:00:00+00:00".to_string())
        );

        let second = &listings[1];
        assert_eq!(second.id, ListingId(2001));
        assert!(second.price.is_negotiable());
        assert!(second.photo_url.is_none());
        assert!(second.published_at.is_none());
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(parse_search_response("<html>captcha</html>").is_err());
        assert!(parse_search_response("{}").unwrap().is_empty());
    }

    #[test]
    fn list_time_rejects_garbage() {
        assert!(parse_list_time("yesterday").is_none());
        assert!(parse_list_time("2024-05-01T10:00:00+03:00").is_some());
    }
}
