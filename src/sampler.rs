//! Balanced sampling of locations per region.
//!
//! Every region gets about `per_region_cap` samples, split over its
//! sub-regions in proportion to their size. Each non-empty sub-region yields
//! at least one sample and never more than it holds, so a region with many
//! small sub-regions can end up over the cap.

use std::collections::HashMap;
use std::hash::Hash;
use tracing::{debug, info};

use crate::locations::Location;

/// Insertion-ordered map.
struct Buckets<K, V> {
    index: HashMap<K, usize>,
    entries: Vec<(K, V)>,
}

impl<K: Eq + Hash + Clone, V: Default> Buckets<K, V> {
    fn new() -> Self {
        Buckets {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn get_or_default(&mut self, key: K) -> &mut V {
        let i = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                let i = self.entries.len();
                self.index.insert(key.clone(), i);
                self.entries.push((key, V::default()));
                i
            }
        };
        &mut self.entries[i].1
    }

    fn into_inner(self) -> Vec<(K, V)> {
        self.entries
    }
}

impl<K: Eq + Hash + Clone, V: Default> Default for Buckets<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionSample<K, T> {
    pub region: K,
    pub items: Vec<T>,
}

pub type SampledSet = Vec<RegionSample<String, Location>>;

/// Share of `per_region_cap` given to a sub-region of `sub_count` items in a
/// region of `region_count` items.
pub fn allocation(sub_count: usize, region_count: usize, per_region_cap: usize) -> usize {
    if sub_count == 0 || region_count == 0 {
        return 0;
    }
    let share = (sub_count as f64 / region_count as f64 * per_region_cap as f64).round() as usize;
    share.clamp(1, sub_count)
}

/// Evenly spaced, order-preserving pick of `count` indices out of `len`.
pub fn stride_indices(len: usize, count: usize) -> impl Iterator<Item = usize> {
    let count = count.min(len);
    (0..count).map(move |i| i * len / count)
}

pub fn sample<T, K, S>(
    items: Vec<T>,
    region_key: impl Fn(&T) -> K,
    sub_region_key: impl Fn(&T) -> S,
    per_region_cap: usize,
) -> Vec<RegionSample<K, T>>
where
    K: Eq + Hash + Clone,
    S: Eq + Hash + Clone,
{
    let mut regions: Buckets<K, Buckets<S, Vec<T>>> = Buckets::new();

    for item in items {
        let region = region_key(&item);
        let sub_region = sub_region_key(&item);
        regions
            .get_or_default(region)
            .get_or_default(sub_region)
            .push(item);
    }

    regions
        .into_inner()
        .into_iter()
        .map(|(region, subs)| {
            let subs = subs.into_inner();
            let region_count: usize = subs.iter().map(|(_, members)| members.len()).sum();
            let mut picked = Vec::new();

            for (_, mut members) in subs {
                let take = allocation(members.len(), region_count, per_region_cap);
                let len = members.len();
                let mut keep = stride_indices(len, take).peekable();
                let mut position = 0;
                members.retain(|_| {
                    let hit = keep.next_if_eq(&position).is_some();
                    position += 1;
                    hit
                });
                picked.append(&mut members);
            }

            RegionSample {
                region,
                items: picked,
            }
        })
        .collect()
}

/// Samples locations by region (municipality) and sub-region (city).
pub fn sample_locations(locations: Vec<Location>, per_region_cap: usize) -> SampledSet {
    let total = locations.len();
    let sampled = sample(
        locations,
        |location| location.region.clone(),
        |location| location.sub_region.clone(),
        per_region_cap,
    );

    for region in &sampled {
        info!("{}: {} locations", region.region, region.items.len());
    }
    debug!(
        total,
        regions = sampled.len(),
        sampled = sampled.iter().map(|r| r.items.len()).sum::<usize>(),
        "sampling done"
    );

    sampled
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    fn loc(region: &str, sub: Option<&str>, n: usize) -> Location {
        Location {
            point: Point::new(n as f64, n as f64),
            region: region.to_string(),
            sub_region: sub.map(str::to_string),
        }
    }

    #[test]
    fn stride_is_even_and_ordered() {
        assert_eq!(stride_indices(10, 5).collect::<Vec<_>>(), vec![0, 2, 4, 6, 8]);
        assert_eq!(stride_indices(10, 3).collect::<Vec<_>>(), vec![0, 3, 6]);
        assert_eq!(stride_indices(3, 3).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(stride_indices(3, 7).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(stride_indices(4, 0).count(), 0);
    }

    #[test]
    fn allocation_is_proportional_and_clamped() {
        assert_eq!(allocation(6, 10, 5), 3);
        assert_eq!(allocation(3, 10, 5), 2);
        assert_eq!(allocation(1, 10, 5), 1);
        assert_eq!(allocation(1, 1000, 5), 1);
        assert_eq!(allocation(4, 4, 50), 4);
        // a zero cap still yields one per sub-region
        assert_eq!(allocation(7, 10, 0), 1);
    }

    #[test]
    fn splits_cap_across_sub_regions() {
        let mut locations = Vec::new();
        for i in 0..6 {
            locations.push(loc("R", Some("A"), i));
        }
        for i in 6..9 {
            locations.push(loc("R", Some("B"), i));
        }
        locations.push(loc("R", Some("C"), 9));

        let sampled = sample_locations(locations, 5);
        assert_eq!(sampled.len(), 1);

        let picked: Vec<usize> = sampled[0].items.iter().map(|l| l.point.x() as usize).collect();
        // A: 3 of 6, B: 2 of 3, C: 1 of 1
        assert_eq!(picked, vec![0, 2, 4, 6, 7, 9]);
    }

    #[test]
    fn single_sub_region_is_plain_stride_sampling() {
        let locations: Vec<Location> = (0..100).map(|i| loc("R", None, i)).collect();
        let sampled = sample_locations(locations, 10);

        let picked: Vec<usize> = sampled[0].items.iter().map(|l| l.point.x() as usize).collect();
        assert_eq!(picked, (0..10).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn regions_and_sub_regions_keep_encounter_order() {
        let locations = vec![
            loc("Second", Some("y"), 0),
            loc("First", Some("a"), 1),
            loc("Second", Some("x"), 2),
            loc("Second", Some("y"), 3),
        ];
        let sampled = sample_locations(locations, 10);

        assert_eq!(sampled[0].region, "Second");
        assert_eq!(sampled[1].region, "First");
        let second: Vec<usize> = sampled[0].items.iter().map(|l| l.point.x() as usize).collect();
        assert_eq!(second, vec![0, 3, 2]);
    }

    #[test]
    fn sub_region_bounds_hold_for_many_shapes() {
        for cap in 1..20 {
            for subs in 1..6 {
                let mut locations = Vec::new();
                let mut sizes = HashMap::new();
                for s in 0..subs {
                    let size = (s * 7 + cap) % 13 + 1;
                    sizes.insert(s.to_string(), size);
                    for i in 0..size {
                        locations.push(loc("R", Some(&s.to_string()), i));
                    }
                }

                let sampled = sample_locations(locations, cap);
                let mut per_sub: HashMap<String, usize> = HashMap::new();
                for l in &sampled[0].items {
                    *per_sub.entry(l.sub_region.clone().unwrap()).or_default() += 1;
                }

                for (sub, size) in &sizes {
                    let got = per_sub.get(sub).copied().unwrap_or_default();
                    assert!(got >= 1, "cap {cap}: sub-region {sub} got nothing");
                    assert!(got <= *size, "cap {cap}: sub-region {sub} oversampled");
                }
            }
        }
    }

    #[test]
    fn cap_of_zero_still_samples_every_sub_region() {
        let locations = vec![loc("R", Some("a"), 0), loc("R", Some("b"), 1), loc("R", Some("b"), 2)];
        let sampled = sample_locations(locations, 0);
        assert_eq!(sampled[0].items.len(), 2);
    }

    #[test]
    fn sample_groups_any_item_by_both_keys() {
        let items = vec![("x", 1, 'a'), ("y", 1, 'b'), ("x", 2, 'c'), ("x", 1, 'd'), ("x", 1, 'e')];
        let sampled = sample(items, |item| item.0, |item| item.1, 2);

        assert_eq!(sampled.len(), 2);
        assert_eq!(sampled[0].region, "x");
        // sub-region 1 holds 3 of 4 and gets 2, sub-region 2 still gets its one
        let picked: Vec<char> = sampled[0].items.iter().map(|item| item.2).collect();
        assert_eq!(picked, vec!['a', 'd', 'c']);
        assert_eq!(sampled[1].items, vec![("y", 1, 'b')]);
    }

    #[test]
    fn empty_input_gives_empty_set() {
        assert!(sample_locations(Vec::new(), 50).is_empty());
    }
}
