use async_trait::async_trait;

use crate::{
    domain::{Listing, ListingDetails, ListingId, QuerySnapshot, QuerySpec, SeenSet},
    Result,
};

/// Marketplace client port.
///
/// Both operations are infallible at this boundary: implementations log
/// transport/parse failures and degrade to an empty result, which the poller
/// treats as "nothing new for this query this cycle".
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Newest-first listings for one query. Locality is filtered by the caller.
    async fn search(&self, query: &QuerySpec) -> Vec<Listing>;

    /// Detail-page enrichment; absent fields stay `None`.
    async fn enrich(&self, link: &str, id: ListingId) -> ListingDetails;
}

/// Read side of the Query Store. Unreadable storage yields an empty snapshot.
pub trait QueryStore: Send + Sync {
    fn load(&self) -> QuerySnapshot;
}

/// Durable set of already-notified listing ids.
///
/// `load` treats a missing/empty/corrupt store as the empty set; `save` is a
/// whole-set overwrite.
pub trait SeenStore: Send + Sync {
    fn load(&self) -> SeenSet;
    fn save(&self, seen: &SeenSet) -> Result<()>;
}
