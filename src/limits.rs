use chrono::{DateTime, Utc};
use std::fmt;

/// Rate-limit accounting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    pub const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    /// Suffix used by the `x-ratelimit-*` response headers.
    pub fn header_suffix(self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Window::Minute => "Minute",
            Window::Hour => "Hourly",
            Window::Day => "Daily",
        }
    }

    fn index(self) -> usize {
        match self {
            Window::Minute => 0,
            Window::Hour => 1,
            Window::Day => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Requests,
    Tokens,
}

impl Resource {
    pub const ALL: [Resource; 2] = [Resource::Requests, Resource::Tokens];

    pub fn header_suffix(self) -> &'static str {
        match self {
            Resource::Requests => "requests",
            Resource::Tokens => "tokens",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Resource::Requests => "Requests",
            Resource::Tokens => "Tokens",
        }
    }

    fn index(self) -> usize {
        match self {
            Resource::Requests => 0,
            Resource::Tokens => 1,
        }
    }
}

/// Fixed table holding one value per (window, resource) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowTable<T> {
    cells: [[T; 2]; 3],
}

impl<T> WindowTable<T> {
    pub fn get(&self, window: Window, resource: Resource) -> &T {
        &self.cells[window.index()][resource.index()]
    }

    pub fn get_mut(&mut self, window: Window, resource: Resource) -> &mut T {
        &mut self.cells[window.index()][resource.index()]
    }

    /// Iterates pairs in display order: minute, hour, day; requests before tokens.
    pub fn iter(&self) -> impl Iterator<Item = (Window, Resource, &T)> {
        Window::ALL.into_iter().flat_map(move |window| {
            Resource::ALL
                .into_iter()
                .map(move |resource| (window, resource, self.get(window, resource)))
        })
    }

    pub fn map<U: Default>(&self, mut f: impl FnMut(&T) -> U) -> WindowTable<U> {
        let mut out = WindowTable::<U>::default();
        for (window, resource, value) in self.iter() {
            *out.get_mut(window, resource) = f(value);
        }
        out
    }
}

/// Values for one pair exactly as a source reported them. `None` means the
/// source did not report the value; reported counters may be negative or
/// exceed the limit and are only clamped by [`RawQuota::settle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawQuota {
    pub limit: Option<i64>,
    pub used: Option<i64>,
    pub remaining: Option<i64>,
    pub reset_in: Option<u64>,
}

impl RawQuota {
    /// A limit of zero or below (upstream uses `-1` for "unlimited") is unknown.
    pub fn known_limit(&self) -> Option<u64> {
        self.limit.filter(|limit| *limit > 0).map(|limit| limit as u64)
    }

    /// A direct usage counter also pins `remaining`, so it counts as supplied.
    pub fn remaining_known(&self) -> bool {
        self.remaining.is_some() || self.used.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.used.is_none()
            && self.remaining.is_none()
            && self.reset_in.is_none()
    }

    /// Copies values from `other` only where this side has none.
    pub fn fill_from(&mut self, other: &RawQuota) {
        if self.known_limit().is_none() && other.known_limit().is_some() {
            self.limit = other.limit;
        }
        if !self.remaining_known() {
            self.remaining = other.remaining;
            if self.remaining.is_none() {
                self.used = other.used;
            }
        }
        if self.reset_in.is_none() {
            self.reset_in = other.reset_in;
        }
    }

    /// Derives the final, clamped values for the pair.
    pub fn settle(&self) -> QuotaWindow {
        let reset_in = self.reset_in.unwrap_or(0);
        match self.known_limit() {
            Some(limit) => {
                let used = match (self.used, self.remaining) {
                    (Some(used), _) => clamp_count(used, limit),
                    (None, Some(remaining)) => limit - clamp_count(remaining, limit),
                    (None, None) => 0,
                };
                QuotaWindow {
                    limit,
                    used,
                    remaining: limit - used,
                    reset_in,
                }
            }
            None => QuotaWindow {
                limit: 0,
                used: self.used.map(non_negative).unwrap_or(0),
                remaining: self.remaining.map(non_negative).unwrap_or(0),
                reset_in,
            },
        }
    }
}

fn clamp_count(value: i64, limit: u64) -> u64 {
    non_negative(value).min(limit)
}

fn non_negative(value: i64) -> u64 {
    value.max(0) as u64
}

/// Which remote interfaces contributed to a reading or snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sources {
    pub quota: bool,
    pub headers: bool,
}

impl fmt::Display for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.quota, self.headers) {
            (true, true) => write!(f, "quota/usage + response headers"),
            (true, false) => write!(f, "quota/usage"),
            (false, true) => write!(f, "response headers"),
            (false, false) => write!(f, "none"),
        }
    }
}

/// Normalized output of one source adapter, before derivation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceReading {
    pub model_id: Option<String>,
    pub region_id: Option<String>,
    pub max_sequence_length: Option<u64>,
    pub max_completion_tokens: Option<u64>,
    pub quotas: WindowTable<RawQuota>,
    pub sources: Sources,
    pub notes: Vec<String>,
}

impl SourceReading {
    pub fn has_rate_data(&self) -> bool {
        self.quotas.iter().any(|(_, _, raw)| !raw.is_empty())
    }

    /// Fill-only merge: `self` stays authoritative wherever it has a value.
    pub fn enrich_from(&mut self, other: &SourceReading) {
        for window in Window::ALL {
            for resource in Resource::ALL {
                let theirs = *other.quotas.get(window, resource);
                self.quotas.get_mut(window, resource).fill_from(&theirs);
            }
        }
        if self.model_id.is_none() {
            self.model_id = other.model_id.clone();
        }
        if self.region_id.is_none() {
            self.region_id = other.region_id.clone();
        }
        if self.max_sequence_length.is_none() {
            self.max_sequence_length = other.max_sequence_length;
        }
        if self.max_completion_tokens.is_none() {
            self.max_completion_tokens = other.max_completion_tokens;
        }
        self.sources.quota |= other.sources.quota;
        self.sources.headers |= other.sources.headers;
        self.notes.extend(other.notes.iter().cloned());
    }
}

/// Settled values for one (window, resource) pair. `limit == 0` and
/// `reset_in == 0` mean unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaWindow {
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub reset_in: u64,
}

impl QuotaWindow {
    pub fn is_known(&self) -> bool {
        self.limit > 0
    }

    /// `None` when the limit is unknown; otherwise clamped to `0..=100`.
    pub fn percent_used(&self) -> Option<f64> {
        if self.limit == 0 {
            return None;
        }
        let percent = self.used as f64 / self.limit as f64 * 100.0;
        Some(percent.clamp(0.0, 100.0))
    }
}

/// One complete, immutable rate-limit picture for a refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSnapshot {
    pub model_id: String,
    pub region_id: Option<String>,
    pub organization_id: Option<String>,
    pub max_sequence_length: Option<u64>,
    pub max_completion_tokens: Option<u64>,
    pub windows: WindowTable<QuotaWindow>,
    pub sources: Sources,
    pub notes: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl RateLimitSnapshot {
    pub fn from_reading(
        reading: SourceReading,
        target_model: &str,
        organization_id: Option<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            model_id: reading
                .model_id
                .unwrap_or_else(|| target_model.to_string()),
            region_id: reading.region_id,
            organization_id,
            max_sequence_length: reading.max_sequence_length,
            max_completion_tokens: reading.max_completion_tokens,
            windows: reading.quotas.map(RawQuota::settle),
            sources: reading.sources,
            notes: reading.notes,
            fetched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(limit: i64, used: Option<i64>, remaining: Option<i64>) -> RawQuota {
        RawQuota {
            limit: Some(limit),
            used,
            remaining,
            reset_in: None,
        }
    }

    #[test]
    fn remaining_is_clamped_for_inconsistent_upstream_values() {
        let limits = [1_i64, 10, 28_800, 275_000];
        let reported = [-50_000_i64, -1, 0, 1, 9, 10, 11, 28_799, 1_000_000];
        for limit in limits {
            for remaining in reported {
                let settled = raw(limit, None, Some(remaining)).settle();
                assert!(settled.remaining <= settled.limit, "{limit}/{remaining}");
                assert_eq!(settled.remaining + settled.used, settled.limit);
                let settled = raw(limit, Some(remaining), None).settle();
                assert!(settled.used <= settled.limit, "{limit}/{remaining}");
                assert_eq!(settled.remaining, settled.limit - settled.used);
            }
        }
    }

    #[test]
    fn unmatched_usage_assumes_full_capacity() {
        let settled = raw(28_800, None, None).settle();
        assert_eq!(settled.used, 0);
        assert_eq!(settled.remaining, 28_800);
    }

    #[test]
    fn direct_usage_wins_over_reported_remaining() {
        let settled = raw(100, Some(30), Some(90)).settle();
        assert_eq!(settled.used, 30);
        assert_eq!(settled.remaining, 70);
    }

    #[test]
    fn non_positive_limit_is_unknown() {
        for limit in [0, -1] {
            let settled = raw(limit, Some(5), Some(7)).settle();
            assert_eq!(settled.limit, 0);
            assert!(settled.percent_used().is_none());
            assert_eq!(settled.used, 5);
            assert_eq!(settled.remaining, 7);
        }
    }

    #[test]
    fn fill_never_overwrites_supplied_values() {
        let mut quota = RawQuota {
            limit: Some(1_000),
            used: Some(10),
            remaining: None,
            reset_in: Some(30),
        };
        let header = RawQuota {
            limit: Some(5_000),
            used: None,
            remaining: Some(4_000),
            reset_in: Some(45),
        };
        quota.fill_from(&header);
        assert_eq!(quota.limit, Some(1_000));
        assert_eq!(quota.used, Some(10));
        assert_eq!(quota.remaining, None);
        assert_eq!(quota.reset_in, Some(30));
    }

    #[test]
    fn fill_plugs_unknown_limit_and_reset() {
        let mut quota = RawQuota::default();
        let header = RawQuota {
            limit: Some(275_000),
            used: None,
            remaining: Some(190_760),
            reset_in: Some(30),
        };
        quota.fill_from(&header);
        assert_eq!(quota, header);
        let settled = quota.settle();
        assert_eq!(settled.used, 84_240);
    }

    #[test]
    fn percent_is_clamped() {
        let window = QuotaWindow {
            limit: 200,
            used: 50,
            remaining: 150,
            reset_in: 0,
        };
        assert_eq!(window.percent_used(), Some(25.0));
        let unknown = QuotaWindow::default();
        assert_eq!(unknown.percent_used(), None);
    }

    #[test]
    fn table_iterates_in_display_order() {
        let table = WindowTable::<u8>::default();
        let order: Vec<_> = table.iter().map(|(w, r, _)| (w, r)).collect();
        assert_eq!(order.len(), 6);
        assert_eq!(order[0], (Window::Minute, Resource::Requests));
        assert_eq!(order[1], (Window::Minute, Resource::Tokens));
        assert_eq!(order[5], (Window::Day, Resource::Tokens));
    }
}
