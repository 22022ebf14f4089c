//! Poll / dedup / notify engine.
//!
//! Two phases:
//! - `WarmUp` runs once at startup: fetch every unique query and mark all
//!   returned listings as seen without notifying anyone, then commit once.
//! - `SteadyState` loops forever: reload stores, group queries by fingerprint,
//!   fetch each once, notify subscribers about unseen listings oldest-first,
//!   then commit the seen-set once per cycle if anything new was seen.
//!
//! Everything runs on one task, sequentially. Suspension points are the
//! marketplace/messenger calls and the pacing sleeps.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    dispatch::Dispatcher,
    domain::{Listing, QueryFingerprint, SeenSet, SubscriberIndex, Subscription},
    formatting::{render_listing, RenderOptions},
    ports::{Marketplace, QueryStore, SeenStore},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    WarmUp,
    SteadyState,
}

#[derive(Clone, Copy, Debug)]
pub struct PollerSettings {
    pub delay_between_queries: Duration,
    pub delay_main_loop: Duration,
    /// Pause after every notified listing.
    pub notify_pause: Duration,
    pub enrich_details: bool,
    pub latency_warn_threshold: Option<Duration>,
    pub render: RenderOptions,
}

impl From<&Config> for PollerSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            delay_between_queries: cfg.delay_between_queries,
            delay_main_loop: cfg.delay_main_loop,
            notify_pause: cfg.notify_pause,
            enrich_details: cfg.enrich_details,
            latency_warn_threshold: cfg.latency_warn_threshold,
            render: RenderOptions {
                caption_limit: cfg.caption_limit,
                utc_offset_hours: cfg.display_utc_offset_hours,
            },
        }
    }
}

/// Counters for one warm-up pass or one cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleReport {
    pub phase: Phase,
    pub fingerprints: usize,
    pub fetched: usize,
    pub already_seen: usize,
    pub filtered: usize,
    /// Listings newly marked seen (primed during warm-up, notified afterwards).
    pub newly_seen: usize,
    pub delivery_failures: usize,
    pub committed: bool,
}

impl CycleReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            fingerprints: 0,
            fetched: 0,
            already_seen: 0,
            filtered: 0,
            newly_seen: 0,
            delivery_failures: 0,
            committed: false,
        }
    }
}

pub struct Poller {
    settings: PollerSettings,
    queries: Arc<dyn QueryStore>,
    seen_store: Arc<dyn SeenStore>,
    market: Arc<dyn Marketplace>,
    dispatcher: Dispatcher,
    phase: Phase,
    seen: SeenSet,
}

impl Poller {
    pub fn new(
        settings: PollerSettings,
        queries: Arc<dyn QueryStore>,
        seen_store: Arc<dyn SeenStore>,
        market: Arc<dyn Marketplace>,
        dispatcher: Dispatcher,
    ) -> Self {
        let mut settings = settings;
        let max_caption = dispatcher.capabilities().max_caption_len;
        if settings.render.caption_limit > max_caption {
            debug!(
                configured = settings.render.caption_limit,
                max_caption, "caption limit capped by messenger"
            );
            settings.render.caption_limit = max_caption;
        }
        Self {
            settings,
            queries,
            seen_store,
            market,
            dispatcher,
            phase: Phase::WarmUp,
            seen: SeenSet::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Run until the process is terminated.
    pub async fn run(mut self) {
        loop {
            let report = self.tick().await;
            info!(
                phase = ?report.phase,
                queries = report.fingerprints,
                fetched = report.fetched,
                new = report.newly_seen,
                already_seen = report.already_seen,
                filtered = report.filtered,
                failed_deliveries = report.delivery_failures,
                committed = report.committed,
                "cycle finished, sleeping {:?}",
                self.settings.delay_main_loop
            );
            sleep(self.settings.delay_main_loop).await;
        }
    }

    /// Advance the state machine by one step: the warm-up pass while in
    /// `WarmUp` (then switch to `SteadyState`), otherwise one poll cycle.
    pub async fn tick(&mut self) -> CycleReport {
        match self.phase {
            Phase::WarmUp => {
                let report = self.warm_up().await;
                self.phase = Phase::SteadyState;
                report
            }
            Phase::SteadyState => self.run_cycle().await,
        }
    }

    async fn warm_up(&mut self) -> CycleReport {
        let mut report = CycleReport::new(Phase::WarmUp);
        self.seen.merge(self.seen_store.load());

        let index = SubscriberIndex::build(&self.queries.load());
        if index.is_empty() {
            info!("warm-up: no queries registered, nothing to prime");
            return report;
        }
        report.fingerprints = index.len();
        info!(queries = index.len(), "warm-up: priming seen-set");

        for (fingerprint, sub) in index.iter() {
            let listings = self.market.search(&sub.spec).await;
            report.fetched += listings.len();
            let primed = listings
                .iter()
                .filter(|listing| self.seen.insert(listing.id))
                .count();
            report.newly_seen += primed;
            debug!(query = %fingerprint, fetched = listings.len(), primed, "warm-up query done");
            pace(self.settings.delay_between_queries).await;
        }

        report.committed = self.commit();
        report
    }

    async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::new(Phase::SteadyState);

        // Another writer (the query front end) may have added ids since our last commit.
        self.seen.merge(self.seen_store.load());
        let index = SubscriberIndex::build(&self.queries.load());
        if index.is_empty() {
            debug!("no queries registered, skipping cycle");
            return report;
        }
        report.fingerprints = index.len();

        for (fingerprint, sub) in index.iter() {
            self.process_query(fingerprint, sub, &mut report).await;
            pace(self.settings.delay_between_queries).await;
        }

        if report.newly_seen > 0 {
            report.committed = self.commit();
        }
        report
    }

    async fn process_query(
        &mut self,
        fingerprint: &QueryFingerprint,
        sub: &Subscription,
        report: &mut CycleReport,
    ) {
        let listings = self.market.search(&sub.spec).await;
        report.fetched += listings.len();
        debug!(query = %fingerprint, term = %sub.spec.term, fetched = listings.len(), "query fetched");

        // Upstream returns newest first; notify in chronological order.
        for mut listing in listings.into_iter().rev() {
            if self.seen.contains(listing.id) {
                report.already_seen += 1;
                continue;
            }
            if !sub.spec.locality.matches(&listing.locality()) {
                debug!(listing = %listing.id, locality = %listing.locality(), "filtered by locality");
                report.filtered += 1;
                continue;
            }
            if !sub.spec.accepts_price(listing.price.byn_major()) {
                debug!(listing = %listing.id, "filtered by price range");
                report.filtered += 1;
                continue;
            }

            if self.settings.enrich_details {
                let details = self.market.enrich(&listing.link, listing.id).await;
                listing.apply_details(details);
            }

            self.seen.insert(listing.id);
            report.newly_seen += 1;
            self.check_latency(&listing);

            let message = render_listing(&listing, self.settings.render);
            let outcomes = self
                .dispatcher
                .deliver(listing.id, &message, &sub.subscribers)
                .await;
            let failed = outcomes.iter().filter(|o| !o.is_delivered()).count();
            report.delivery_failures += failed;
            info!(
                listing = %listing.id,
                query = %fingerprint,
                recipients = outcomes.len(),
                failed,
                "new listing notified"
            );

            pace(self.settings.notify_pause).await;
        }
    }

    fn check_latency(&self, listing: &Listing) {
        let (Some(threshold), Some(published)) =
            (self.settings.latency_warn_threshold, listing.published_at)
        else {
            return;
        };
        let Ok(delay) = (Utc::now() - published).to_std() else {
            return;
        };
        if delay > threshold {
            warn!(
                listing = %listing.id,
                delay_secs = delay.as_secs(),
                "listing discovered long after publication (upstream staleness?)"
            );
        }
    }

    /// Persist the whole seen-set. Failures are logged; the in-memory set is kept
    /// and merged with the store on the next reload.
    fn commit(&self) -> bool {
        match self.seen_store.save(&self.seen) {
            Ok(()) => {
                debug!(ids = self.seen.len(), "seen-set committed");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to persist seen-set");
                false
            }
        }
    }
}

async fn pace(d: Duration) {
    if !d.is_zero() {
        sleep(d).await;
    }
}
