//! Option structs for the coordinator's public surface.

use std::time::Duration;

/// Options accepted by `Coordinator::get`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Return a structural copy of the value rather than a shared reference.
    /// Values in this crate are always owned/cloned out of the coordinator,
    /// so this exists for API-shape fidelity and is otherwise a no-op.
    pub clone: bool,
}

/// Options accepted by `Coordinator::set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub stale_time: Option<Duration>,
    pub gc_time: Option<Duration>,
    pub tags: Vec<String>,
}

/// Fluent builder for [`SetOptions`], mirroring the ergonomics of a typical
/// cache options builder: chainable setters, `build()` at the end.
#[derive(Debug, Clone, Default)]
pub struct CacheOpts(SetOptions);

impl CacheOpts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stale_time(mut self, duration: Duration) -> Self {
        self.0.stale_time = Some(duration);
        self
    }

    pub fn stale_secs(self, seconds: u64) -> Self {
        self.stale_time(Duration::from_secs(seconds))
    }

    pub fn gc_time(mut self, duration: Duration) -> Self {
        self.0.gc_time = Some(duration);
        self
    }

    pub fn gc_secs(self, seconds: u64) -> Self {
        self.gc_time(Duration::from_secs(seconds))
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.0.tags.push(tag.into());
        self
    }

    pub fn build(self) -> SetOptions {
        self.0
    }
}

impl From<CacheOpts> for SetOptions {
    fn from(opts: CacheOpts) -> Self {
        opts.0
    }
}

impl From<Duration> for SetOptions {
    fn from(stale_time: Duration) -> Self {
        SetOptions {
            stale_time: Some(stale_time),
            ..Default::default()
        }
    }
}

/// Options accepted by `Coordinator::get_or_set` (the SWR orchestrator).
/// Superset of [`SetOptions`] plus loader-control knobs.
#[derive(Debug, Clone, Default)]
pub struct GetOrSetOptions {
    pub stale_time: Option<Duration>,
    pub gc_time: Option<Duration>,
    pub tags: Vec<String>,
    pub timeout: Option<Duration>,
    pub retries: u32,
    pub fresh: bool,
    pub abort_on_timeout: bool,
    /// Fraction of the fresh window, in `[0, 1]`, past which a hit spawns a
    /// background refresh even though the entry is not yet stale.
    pub eager_refresh: Option<f64>,
}

impl GetOrSetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stale_time(mut self, duration: Duration) -> Self {
        self.stale_time = Some(duration);
        self
    }

    pub fn gc_time(mut self, duration: Duration) -> Self {
        self.gc_time = Some(duration);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    pub fn abort_on_timeout(mut self, abort: bool) -> Self {
        self.abort_on_timeout = abort;
        self
    }

    pub fn eager_refresh(mut self, fraction: f64) -> Self {
        self.eager_refresh = Some(fraction);
        self
    }

    pub fn set_options(&self) -> SetOptions {
        SetOptions {
            stale_time: self.stale_time,
            gc_time: self.gc_time,
            tags: self.tags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let opts = CacheOpts::new().build();
        assert!(opts.stale_time.is_none());
        assert!(opts.tags.is_empty());
    }

    #[test]
    fn builder_fluent() {
        let opts = CacheOpts::new()
            .stale_secs(30)
            .gc_secs(300)
            .tags(["a", "b"])
            .tag("c")
            .build();
        assert_eq!(opts.stale_time, Some(Duration::from_secs(30)));
        assert_eq!(opts.gc_time, Some(Duration::from_secs(300)));
        assert_eq!(opts.tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn from_duration() {
        let opts: SetOptions = Duration::from_secs(5).into();
        assert_eq!(opts.stale_time, Some(Duration::from_secs(5)));
    }

    #[test]
    fn get_or_set_options_projects_set_options() {
        let opts = GetOrSetOptions::new()
            .stale_time(Duration::from_secs(1))
            .tags(["t"])
            .retries(3);
        let set_opts = opts.set_options();
        assert_eq!(set_opts.stale_time, Some(Duration::from_secs(1)));
        assert_eq!(set_opts.tags, vec!["t"]);
    }
}
