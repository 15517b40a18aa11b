//! Run-scoped bookkeeping shared by all download workers: which coordinate
//! keys already have an image, and how many locations failed or collided.

use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

use crate::coordinate_key::CoordinateKey;
use crate::imagery::{FetchError, Panorama, ResolveError};
use crate::metadata::{ImageRecord, MetadataStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    /// Same position, bit for bit.
    Exact,
    /// Different position, same rounded key.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    New(CoordinateKey),
    Collision(CoordinateKey, CollisionKind),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollisionStats {
    pub exact: usize,
    pub close: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailStats {
    pub request_failed: usize,
    pub download_failed: usize,
    pub no_image: usize,
    pub no_lat_lng: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub downloaded: usize,
    pub collisions: CollisionStats,
    pub fails: FailStats,
}

#[derive(Default)]
struct Counters {
    downloaded: AtomicUsize,
    exact: AtomicUsize,
    close: AtomicUsize,
    request_failed: AtomicUsize,
    download_failed: AtomicUsize,
    no_image: AtomicUsize,
    no_lat_lng: AtomicUsize,
}

#[derive(Default)]
pub struct DedupTracker {
    records: Mutex<HashMap<CoordinateKey, ImageRecord>>,
    counters: Counters,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the key of `panorama` for `region`. Exactly one caller per key
    /// gets [`Recorded::New`] and should go on to fetch the image; everyone
    /// else gets a counted collision.
    pub fn record(&self, panorama: &Panorama, region: &str, heading: f64) -> Recorded {
        let key = CoordinateKey::from(panorama.point);
        let (lat, lng) = (panorama.point.y(), panorama.point.x());

        let mut records = self.lock();
        match records.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(ImageRecord {
                    lat,
                    lng,
                    pano_id: panorama.pano_id.clone(),
                    heading,
                    cell: region.to_string(),
                });
                Recorded::New(key)
            }
            Entry::Occupied(existing) => {
                let existing = existing.get();
                let kind = if existing.lat.to_bits() == lat.to_bits()
                    && existing.lng.to_bits() == lng.to_bits()
                {
                    self.counters.exact.fetch_add(1, Ordering::Relaxed);
                    CollisionKind::Exact
                } else {
                    self.counters.close.fetch_add(1, Ordering::Relaxed);
                    CollisionKind::Close
                };
                warn!(
                    "Image for {} already downloaded ({:?}); new image: lat={}, lng={}, cell={}",
                    key, existing, lat, lng, region
                );
                Recorded::Collision(key, kind)
            }
        }
    }

    /// Drops a claimed key whose image never made it to disk.
    pub fn release(&self, key: &CoordinateKey) {
        self.lock().remove(key);
    }

    pub fn count_downloaded(&self) {
        self.counters.downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_resolve_failure(&self, error: &ResolveError) {
        let counter = match error {
            ResolveError::RequestFailed(_) => &self.counters.request_failed,
            ResolveError::NoImage(_) => &self.counters.no_image,
            ResolveError::NoCoordinate => &self.counters.no_lat_lng,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_fetch_failure(&self, error: &FetchError) {
        match error {
            FetchError::DownloadFailed(_) => {
                self.counters.download_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn stats(&self) -> RunStats {
        let c = &self.counters;
        RunStats {
            downloaded: c.downloaded.load(Ordering::Relaxed),
            collisions: CollisionStats {
                exact: c.exact.load(Ordering::Relaxed),
                close: c.close.load(Ordering::Relaxed),
            },
            fails: FailStats {
                request_failed: c.request_failed.load(Ordering::Relaxed),
                download_failed: c.download_failed.load(Ordering::Relaxed),
                no_image: c.no_image.load(Ordering::Relaxed),
                no_lat_lng: c.no_lat_lng.load(Ordering::Relaxed),
            },
        }
    }

    pub fn into_store(self) -> MetadataStore {
        let records = self
            .records
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.into_iter().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CoordinateKey, ImageRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
