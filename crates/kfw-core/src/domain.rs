use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Telegram chat id of a subscriber (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

/// Kufar listing id (`ad_id`). The dedup key across cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(pub i64);

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// City label the query front end stores for "search the whole country".
pub const ANY_LOCALITY_LABEL: &str = "Вся Беларусь";

/// Target locality of a query.
///
/// Matching is advisory substring containment: the upstream region/area vocabulary
/// does not line up exactly with the labels users pick.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Locality {
    #[default]
    Any,
    Named(String),
}

impl Locality {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim) else {
            return Self::Any;
        };
        if raw.is_empty() || raw == ANY_LOCALITY_LABEL || raw.eq_ignore_ascii_case("any") {
            return Self::Any;
        }
        Self::Named(raw.to_string())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Case-insensitive substring match against a listing's combined locality string.
    pub fn matches(&self, listing_locality: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Named(name) => listing_locality
                .to_lowercase()
                .contains(&name.to_lowercase()),
        }
    }
}

impl From<Option<String>> for Locality {
    fn from(v: Option<String>) -> Self {
        Self::parse(v.as_deref())
    }
}

impl From<Locality> for Option<String> {
    fn from(v: Locality) -> Self {
        match v {
            Locality::Any => None,
            Locality::Named(name) => Some(name),
        }
    }
}

/// One saved search, as written by the query front end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(rename = "query")]
    pub term: String,
    #[serde(rename = "city", default, skip_serializing_if = "Locality::is_any")]
    pub locality: Locality,
    /// Lower price bound in whole BYN.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "positive_or_unset")]
    pub price_min: Option<u64>,
    /// Upper price bound in whole BYN.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "positive_or_unset")]
    pub price_max: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "positive_or_unset")]
    pub limit: Option<u32>,
    #[serde(rename = "only_title_search", default)]
    pub title_only: bool,
}

impl QuerySpec {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            locality: Locality::Any,
            price_min: None,
            price_max: None,
            limit: None,
            title_only: false,
        }
    }

    pub fn with_locality(mut self, locality: &str) -> Self {
        self.locality = Locality::parse(Some(locality));
        self
    }

    pub fn fingerprint(&self) -> QueryFingerprint {
        QueryFingerprint {
            term: self.term.trim().to_string(),
            locality: self.locality.clone(),
            price_min: self.price_min,
            price_max: self.price_max,
            limit: self.limit,
            title_only: self.title_only,
        }
    }

    /// Whether a listing price (whole BYN) falls into the configured range.
    ///
    /// Negotiable (zero) and unknown prices always pass.
    pub fn accepts_price(&self, byn_major: Option<i64>) -> bool {
        let Some(price) = byn_major.filter(|p| *p > 0) else {
            return true;
        };
        let above_min = self.price_min.map_or(true, |min| price >= min as i64);
        let below_max = self.price_max.map_or(true, |max| price <= max as i64);
        above_min && below_max
    }
}

/// The front end stores bounds straight from user input: numbers, numeric
/// strings, zero or negatives. Anything not strictly positive means "unset".
fn positive_or_unset<'de, D, T>(d: D) -> std::result::Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: TryFrom<i64>,
{
    let raw = Option::<serde_json::Value>::deserialize(d)?;
    let n = match raw {
        Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    Ok(n.filter(|v| *v > 0).and_then(|v| T::try_from(v).ok()))
}

/// Canonical dedup key of a [`QuerySpec`].
///
/// A plain tagged record: two specs that are field-wise equal produce equal
/// fingerprints no matter how their stored JSON objects were ordered.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryFingerprint {
    term: String,
    locality: Locality,
    price_min: Option<u64>,
    price_max: Option<u64>,
    limit: Option<u32>,
    title_only: bool,
}

impl QueryFingerprint {
    /// Short stable hex digest, for logs.
    pub fn digest(&self) -> String {
        let locality = match &self.locality {
            Locality::Any => String::new(),
            Locality::Named(n) => n.clone(),
        };
        let canonical = format!(
            "term={}\nlocality={}\nprice_min={:?}\nprice_max={:?}\nlimit={:?}\ntitle_only={}",
            self.term, locality, self.price_min, self.price_max, self.limit, self.title_only
        );
        let hash = Sha256::digest(canonical.as_bytes());
        hash.iter().take(6).map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest())
    }
}

/// Query Store snapshot: user -> ordered saved searches.
pub type QuerySnapshot = BTreeMap<UserId, Vec<QuerySpec>>;

#[derive(Clone, Debug)]
pub struct Subscription {
    pub spec: QuerySpec,
    pub subscribers: BTreeSet<UserId>,
}

/// Fingerprint -> subscribers, rebuilt from every snapshot and never persisted.
///
/// Backed by a `BTreeMap`, so iteration order is stable across cycles.
#[derive(Clone, Debug, Default)]
pub struct SubscriberIndex {
    entries: BTreeMap<QueryFingerprint, Subscription>,
}

impl SubscriberIndex {
    pub fn build(snapshot: &QuerySnapshot) -> Self {
        let mut entries: BTreeMap<QueryFingerprint, Subscription> = BTreeMap::new();
        for (user, specs) in snapshot {
            for spec in specs {
                entries
                    .entry(spec.fingerprint())
                    .or_insert_with(|| Subscription {
                        spec: spec.clone(),
                        subscribers: BTreeSet::new(),
                    })
                    .subscribers
                    .insert(*user);
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QueryFingerprint, &Subscription)> {
        self.entries.iter()
    }

    pub fn subscribers(&self, fingerprint: &QueryFingerprint) -> Option<&BTreeSet<UserId>> {
        self.entries.get(fingerprint).map(|s| &s.subscribers)
    }
}

/// Prices as sent by Kufar: integer minor units (kopecks / cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Price {
    pub byn_minor: Option<i64>,
    pub usd_minor: Option<i64>,
}

impl Price {
    /// Whole BYN, truncated.
    pub fn byn_major(&self) -> Option<i64> {
        self.byn_minor.map(|v| v / 100)
    }

    /// Whole USD, truncated.
    pub fn usd_major(&self) -> Option<i64> {
        self.usd_minor.map(|v| v / 100)
    }

    pub fn is_negotiable(&self) -> bool {
        self.byn_minor == Some(0)
    }
}

/// Fields scraped from a listing's detail page. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingDetails {
    pub body: Option<String>,
    pub seller_name: Option<String>,
    pub seller_listing_count: Option<u32>,
    pub phone: Option<String>,
}

/// Normalized marketplace listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    pub id: ListingId,
    pub title: String,
    pub price: Price,
    pub published_at: Option<DateTime<Utc>>,
    pub region: Option<String>,
    pub area: Option<String>,
    pub photo_url: Option<String>,
    pub link: String,
    pub body: Option<String>,
    pub seller_name: Option<String>,
    pub seller_listing_count: Option<u32>,
    pub phone: Option<String>,
}

impl Listing {
    /// `region / area`, skipping empty parts.
    pub fn locality(&self) -> String {
        [self.region.as_deref(), self.area.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" / ")
    }

    /// Merge enrichment; detail-page values win over search-response values.
    pub fn apply_details(&mut self, details: ListingDetails) {
        if details.body.is_some() {
            self.body = details.body;
        }
        if details.seller_name.is_some() {
            self.seller_name = details.seller_name;
        }
        if details.seller_listing_count.is_some() {
            self.seller_listing_count = details.seller_listing_count;
        }
        if details.phone.is_some() {
            self.phone = details.phone;
        }
    }
}

/// Listing ids already notified. Grow-only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeenSet(HashSet<ListingId>);

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the id was not present before.
    pub fn insert(&mut self, id: ListingId) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: ListingId) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Union with another set (e.g. a freshly reloaded store copy).
    pub fn merge(&mut self, other: SeenSet) {
        self.0.extend(other.0);
    }

    pub fn to_sorted_vec(&self) -> Vec<ListingId> {
        let mut ids: Vec<_> = self.0.iter().copied().collect();
        ids.sort();
        ids
    }
}

impl FromIterator<ListingId> for SeenSet {
    fn from_iter<T: IntoIterator<Item = ListingId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<ListingId> for SeenSet {
    fn extend<T: IntoIterator<Item = ListingId>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
}

/// Per (listing, recipient) delivery result. Logged, never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationOutcome {
    pub listing: ListingId,
    pub recipient: UserId,
    pub status: DeliveryStatus,
}

impl NotificationOutcome {
    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_from(json: &str) -> QuerySpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn fingerprint_ignores_field_order() {
        let a = spec_from(
            r#"{"query":"iphone","city":"Минск","price_min":100,"price_max":500,"limit":5,"only_title_search":true}"#,
        );
        let b = spec_from(
            r#"{"only_title_search":true,"limit":5,"price_max":500,"city":"Минск","price_min":100,"query":"iphone"}"#,
        );
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().digest(), b.fingerprint().digest());
    }

    #[test]
    fn non_positive_bounds_and_limits_are_unset() {
        let spec = spec_from(
            r#"{"query":"iphone","price_min":-1,"price_max":"500","limit":0}"#,
        );
        assert_eq!(spec.price_min, None);
        assert_eq!(spec.price_max, Some(500));
        assert_eq!(spec.limit, None);
        assert_eq!(spec.fingerprint(), {
            let mut plain = QuerySpec::new("iphone");
            plain.price_max = Some(500);
            plain.fingerprint()
        });
    }

    #[test]
    fn fingerprint_distinguishes_field_values() {
        let a = QuerySpec::new("iphone");
        let mut b = QuerySpec::new("iphone");
        b.title_only = true;
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(
            a.fingerprint(),
            QuerySpec::new("iphone").with_locality("Гомель").fingerprint()
        );
    }

    #[test]
    fn missing_optional_fields_equal_their_defaults() {
        let a = spec_from(r#"{"query":"bike"}"#);
        let b = spec_from(r#"{"query":"bike","city":"Вся Беларусь","only_title_search":false}"#);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.locality.is_any());
    }

    #[test]
    fn locality_matches_by_substring() {
        let minsk = Locality::parse(Some("Минск"));
        assert!(minsk.matches("Минск / Фрунзенский"));
        assert!(minsk.matches("Минская область / Борисов"));
        assert!(!minsk.matches("Гомель / Центральный"));
        assert!(Locality::Any.matches(""));
        assert!(Locality::parse(Some("Minsk")).matches("minsk"));
    }

    #[test]
    fn subscriber_index_groups_identical_queries() {
        let mut snapshot = QuerySnapshot::new();
        snapshot.insert(UserId(1), vec![QuerySpec::new("iphone"), QuerySpec::new("bike")]);
        snapshot.insert(UserId(2), vec![QuerySpec::new("iphone")]);
        snapshot.insert(UserId(3), vec![QuerySpec::new("iphone"), QuerySpec::new("iphone")]);

        let index = SubscriberIndex::build(&snapshot);
        assert_eq!(index.len(), 2);
        let subs = index
            .subscribers(&QuerySpec::new("iphone").fingerprint())
            .unwrap();
        assert_eq!(
            subs.iter().copied().collect::<Vec<_>>(),
            vec![UserId(1), UserId(2), UserId(3)]
        );
    }

    #[test]
    fn price_display_units_truncate() {
        let p = Price {
            byn_minor: Some(150_099),
            usd_minor: Some(4_599),
        };
        assert_eq!(p.byn_major(), Some(1500));
        assert_eq!(p.usd_major(), Some(45));
        assert!(!p.is_negotiable());
    }

    #[test]
    fn price_range_filter_skips_negotiable() {
        let mut spec = QuerySpec::new("sofa");
        spec.price_min = Some(100);
        spec.price_max = Some(500);
        assert!(spec.accepts_price(Some(100)));
        assert!(spec.accepts_price(Some(500)));
        assert!(!spec.accepts_price(Some(99)));
        assert!(!spec.accepts_price(Some(501)));
        assert!(spec.accepts_price(Some(0)));
        assert!(spec.accepts_price(None));
    }

    #[test]
    fn seen_set_merge_is_union() {
        let mut seen: SeenSet = [ListingId(1), ListingId(2)].into_iter().collect();
        seen.merge([ListingId(2), ListingId(3)].into_iter().collect());
        assert_eq!(
            seen.to_sorted_vec(),
            vec![ListingId(1), ListingId(2), ListingId(3)]
        );
        assert!(!seen.insert(ListingId(1)));
    }

    #[test]
    fn listing_locality_joins_present_parts() {
        let mut l = Listing {
            region: Some("Минск".into()),
            area: Some("Центральный".into()),
            ..Listing::default()
        };
        assert_eq!(l.locality(), "Минск / Центральный");
        l.area = None;
        assert_eq!(l.locality(), "Минск");
    }
}
