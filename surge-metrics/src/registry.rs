use dashmap::DashMap;
use parking_lot::RwLock;

use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricStorage, MetricValue};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: KeyId,
    kind: MetricKind,
}

/// Name-registered metrics with one lazily created series per tag set.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    storage: DashMap<MetricId, DashMap<TagSet, MetricStorage>>,
}

impl Registry {
    /// Registers `name`, or returns the existing id. The first registration fixes the kind.
    pub fn register(&self, name: &str, kind: MetricKind) -> MetricId {
        let name_id = self.interner.get_or_intern(name);

        let mut defs = self.defs.write();
        if let Some(idx) = defs.iter().position(|d| d.name == name_id) {
            return MetricId(idx as u32);
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.storage.insert(id, DashMap::new());
        id
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        TagSet::from_unsorted(tags.iter().map(|(k, v)| {
            (
                self.interner.get_or_intern(k),
                self.interner.get_or_intern(v),
            )
        }))
    }

    pub fn get_handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let series_map = self.storage.get(&metric)?;

        if let Some(storage) = series_map.get(&tags) {
            return Some(storage.handle());
        }

        let kind = self.defs.read().get(metric.0 as usize)?.kind;
        let handle = series_map
            .entry(tags)
            .or_insert_with(|| MetricStorage::new(kind))
            .handle();
        Some(handle)
    }

    /// Sum of every counter series of `name` whose tags include all of `filter`.
    pub fn counter_total(&self, name: &str, filter: &[(&str, &str)]) -> u64 {
        self.fold_matching(name, filter, 0u64, |acc, v| match v {
            MetricValue::Counter(c) => acc.saturating_add(c),
            _ => acc,
        })
    }

    /// Sum of every gauge series of `name` whose tags include all of `filter`.
    pub fn gauge_total(&self, name: &str, filter: &[(&str, &str)]) -> i64 {
        self.fold_matching(name, filter, 0i64, |acc, v| match v {
            MetricValue::Gauge(g) => acc.saturating_add(g),
            _ => acc,
        })
    }

    /// Number of observations across matching histogram series.
    pub fn histogram_count(&self, name: &str, filter: &[(&str, &str)]) -> u64 {
        self.fold_matching(name, filter, 0u64, |acc, v| match v {
            MetricValue::Histogram(h) => acc.saturating_add(h.count),
            _ => acc,
        })
    }

    fn fold_matching<T>(
        &self,
        name: &str,
        filter: &[(&str, &str)],
        init: T,
        f: impl Fn(T, MetricValue) -> T,
    ) -> T {
        let Some(name_id) = self.interner.lookup(name) else {
            return init;
        };
        let Some(idx) = self.defs.read().iter().position(|d| d.name == name_id) else {
            return init;
        };

        let mut pairs = Vec::with_capacity(filter.len());
        for (k, v) in filter {
            match (self.interner.lookup(k), self.interner.lookup(v)) {
                (Some(k), Some(v)) => pairs.push((k, v)),
                // A filter value never seen can't match any series.
                _ => return init,
            }
        }
        let wanted = TagSet::from_unsorted(pairs);

        let Some(series_map) = self.storage.get(&MetricId(idx as u32)) else {
            return init;
        };

        series_map
            .iter()
            .filter(|series| series.key().is_superset_of(&wanted))
            .fold(init, |acc, series| f(acc, series.value().value()))
    }

    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let resolve = |id: KeyId| {
            self.interner
                .resolve(id)
                .map(|s| s.to_string())
                .unwrap_or_default()
        };

        let defs = self.defs.read();
        let mut out = Vec::new();

        for entry in self.storage.iter() {
            let Some(def) = defs.get(entry.key().0 as usize) else {
                continue;
            };
            let name = resolve(def.name);

            for series in entry.value().iter() {
                out.push(MetricSeriesSummary {
                    name: name.clone(),
                    kind: def.kind,
                    tags: series
                        .key()
                        .iter()
                        .map(|(k, v)| (resolve(k), resolve(v)))
                        .collect(),
                    values: series.value().value(),
                });
            }
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn register_is_idempotent_by_name() {
        let r = Registry::default();
        let a = r.register("requests", MetricKind::Counter);
        let b = r.register("requests", MetricKind::Gauge);
        assert_eq!(a, b);
    }

    #[test]
    fn totals_filter_by_tag_subset() {
        let r = Registry::default();
        let id = r.register("failed", MetricKind::Counter);

        let tags = r.resolve_tags(&[("scenario", "a"), ("step", "login")]);
        r.get_handle(id, tags).into_iter().for_each(|h| h.add(2));
        let tags = r.resolve_tags(&[("scenario", "a"), ("step", "pay")]);
        r.get_handle(id, tags).into_iter().for_each(|h| h.add(3));
        let tags = r.resolve_tags(&[("scenario", "b"), ("step", "pay")]);
        r.get_handle(id, tags).into_iter().for_each(|h| h.add(7));

        assert_eq!(r.counter_total("failed", &[]), 12);
        assert_eq!(r.counter_total("failed", &[("scenario", "a")]), 5);
        assert_eq!(r.counter_total("failed", &[("step", "pay")]), 10);
        assert_eq!(r.counter_total("failed", &[("step", "nope")]), 0);
        assert_eq!(r.counter_total("missing", &[]), 0);
    }

    #[test]
    fn summarize_reports_every_series() {
        let r = Registry::default();
        let hist = r.register("latency", MetricKind::Histogram);
        let gauge = r.register("users", MetricKind::Gauge);

        let tags = r.resolve_tags(&[("scenario", "a")]);
        if let Some(h) = r.get_handle(hist, tags.clone()) {
            h.record(Duration::from_millis(3));
        }
        if let Some(g) = r.get_handle(gauge, tags) {
            g.add(4);
        }

        let series = r.summarize();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name, "latency");
        assert_eq!(series[0].tag("scenario"), Some("a"));
        assert_eq!(r.histogram_count("latency", &[("scenario", "a")]), 1);
        assert_eq!(r.gauge_total("users", &[]), 4);
    }
}
