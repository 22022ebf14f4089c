//! Kufar adapter: search API + detail page enrichment.
//!
//! Implements the `kfw-core` [`Marketplace`] port. Every upstream failure is
//! logged here and degraded to an empty result; nothing propagates to the poller.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use kfw_core::{
    config::Config,
    domain::{Listing, ListingDetails, ListingId, QuerySpec},
    errors::Error,
    ports::Marketplace,
    Result,
};

pub mod detail;
pub mod search;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Clone, Debug)]
pub struct KufarConfig {
    pub search_url: String,
    /// Phone lookup URL with an `{ad_id}` placeholder.
    pub phone_url: String,
    /// Phone lookup credential; `None` disables the phone step.
    pub token: Option<String>,
    pub lang: String,
    pub default_limit: u32,
    pub timeout: Duration,
}

impl From<&Config> for KufarConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            search_url: cfg.kufar_search_url.clone(),
            phone_url: cfg.kufar_phone_url.clone(),
            token: cfg.kufar_token.clone(),
            lang: cfg.kufar_lang.clone(),
            default_limit: cfg.search_default_limit,
            timeout: cfg.http_timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct KufarClient {
    cfg: KufarConfig,
    http: reqwest::Client,
}

impl KufarClient {
    pub fn new(cfg: KufarConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self { cfg, http })
    }

    pub async fn try_search(&self, query: &QuerySpec) -> Result<Vec<Listing>> {
        let params = search::search_params(query, &self.cfg.lang, self.cfg.default_limit);
        debug!(url = %self.cfg.search_url, ?params, "kufar search request");

        let body = self
            .get_text(self.http.get(&self.cfg.search_url).query(&params))
            .await?;
        search::parse_search_response(&body)
    }

    pub fn phone_url(&self, id: ListingId) -> String {
        self.cfg.phone_url.replace("{ad_id}", &id.to_string())
    }

    async fn fetch_phone(&self, id: ListingId, token: &str) -> Result<Option<String>> {
        let body = self
            .get_text(self.http.get(self.phone_url(id)).bearer_auth(token))
            .await?;
        Ok(detail::parse_phone_response(&body))
    }

    async fn get_text(&self, req: reqwest::RequestBuilder) -> Result<String> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Http(format!("kufar request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "kufar responded {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        resp.text()
            .await
            .map_err(|e| Error::Http(format!("kufar body read error: {e}")))
    }
}

impl KufarClient {
    /// Adds the phone number when a token is configured. A failed lookup keeps
    /// whatever the detail page gave.
    async fn with_phone(&self, mut details: ListingDetails, id: ListingId) -> ListingDetails {
        let Some(token) = self.cfg.token.as_deref() else {
            return details;
        };
        match self.fetch_phone(id, token).await {
            Ok(Some(phone)) => details.phone = Some(phone),
            Ok(None) => debug!(listing = %id, "phone lookup returned no number"),
            Err(e) => error!(listing = %id, error = %e, "phone lookup failed"),
        }
        details
    }
}

#[async_trait]
impl Marketplace for KufarClient {
    async fn search(&self, query: &QuerySpec) -> Vec<Listing> {
        match self.try_search(query).await {
            Ok(listings) => listings,
            Err(e) => {
                error!(term = %query.term, error = %e, "kufar search failed");
                Vec::new()
            }
        }
    }

    async fn enrich(&self, link: &str, id: ListingId) -> ListingDetails {
        let details = if link.trim().is_empty() {
            ListingDetails::default()
        } else {
            match self.get_text(self.http.get(link)).await {
                Ok(html) => detail::parse_detail_page(&html),
                Err(e) => {
                    error!(listing = %id, error = %e, "detail page fetch failed");
                    ListingDetails::default()
                }
            }
        };
        self.with_phone(details, id).await
    }
}
