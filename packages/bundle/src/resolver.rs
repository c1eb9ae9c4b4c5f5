//! Cached, de-duplicated bundle resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

use blockframe_protocol::{BlockIdentity, Bundle};

use crate::archive;
use crate::error::Result;
use crate::guard::ImportGuard;
use crate::source::BundleSource;

/// Default freshness window for cached bundles.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(5 * 60);

struct Slot {
    created: Instant,
    bundle: Arc<OnceCell<Arc<Bundle>>>,
}

/// Resolves Block identities to guarded bundles.
///
/// Within the freshness window the resolver is idempotent: every caller asking
/// for the same identity gets the same bundle, and callers that arrive while
/// a fetch is in flight wait for it instead of starting their own. A failed
/// fetch is not cached; the next caller tries again.
pub struct BundleResolver {
    source: Arc<dyn BundleSource>,
    guard: ImportGuard,
    freshness: Duration,
    slots: Mutex<HashMap<BlockIdentity, Slot>>,
}

impl BundleResolver {
    pub fn new(source: Arc<dyn BundleSource>, guard: ImportGuard, freshness: Duration) -> Self {
        Self {
            source,
            guard,
            freshness,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolver with the default import whitelist and freshness window.
    pub fn with_defaults(source: Arc<dyn BundleSource>) -> Self {
        Self::new(source, ImportGuard::default(), DEFAULT_FRESHNESS)
    }

    pub fn guard(&self) -> &ImportGuard {
        &self.guard
    }

    /// Resolve an identity, fetching at most once per freshness window.
    pub async fn resolve(&self, identity: &BlockIdentity) -> Result<Arc<Bundle>> {
        let cell = {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            match slots.get(identity) {
                Some(slot) if now.duration_since(slot.created) < self.freshness => {
                    Arc::clone(&slot.bundle)
                }
                _ => {
                    let cell = Arc::new(OnceCell::new());
                    slots.insert(
                        identity.clone(),
                        Slot {
                            created: now,
                            bundle: Arc::clone(&cell),
                        },
                    );
                    cell
                }
            }
        };

        let bundle = cell.get_or_try_init(|| self.load(identity)).await?;
        Ok(Arc::clone(bundle))
    }

    /// Drop the cached entry for an identity. Returns whether one existed.
    pub async fn invalidate(&self, identity: &BlockIdentity) -> bool {
        self.slots.lock().await.remove(identity).is_some()
    }

    /// Whether a fresh, loaded bundle is cached for the identity.
    pub async fn is_cached(&self, identity: &BlockIdentity) -> bool {
        let slots = self.slots.lock().await;
        slots.get(identity).is_some_and(|slot| {
            slot.bundle.initialized() && slot.created.elapsed() < self.freshness
        })
    }

    async fn load(&self, identity: &BlockIdentity) -> Result<Arc<Bundle>> {
        tracing::debug!(block = %identity, "fetching bundle");
        let archive = self.source.fetch(identity).await?;
        let files = archive::unpack(&identity.id, &archive)?;
        let bundle = self.guard.guard_bundle(Bundle::new(identity.id.clone(), files));
        tracing::info!(block = %identity, files = bundle.files.len(), "bundle resolved");
        Ok(Arc::new(bundle))
    }
}
