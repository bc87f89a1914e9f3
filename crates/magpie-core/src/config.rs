use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Inter-page pacing and error-wait delays, per stage.
///
/// The pager itself is delay-agnostic; each stage sleeps between pages
/// according to these knobs. Error waits are the long sleeps used by the
/// retry-same-page-indefinitely loops of discovery and relation crawl.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Pause between topic pages during discovery.
    pub topic_page_delay: Duration,
    /// Pause between follower pages during relation crawl.
    pub follower_page_delay: Duration,
    /// Wait after an exhausted topic-page fetch before retrying it.
    pub topic_retry_wait: Duration,
    /// Wait after an exhausted follower-page fetch before retrying it.
    pub follower_retry_wait: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            topic_page_delay: Duration::from_millis(1200),
            follower_page_delay: Duration::from_secs(1),
            topic_retry_wait: Duration::from_secs(30),
            follower_retry_wait: Duration::from_secs(10),
        }
    }
}

/// Configuration for one harvest run, constructed once and passed into
/// the pipeline. No process-wide settings singletons.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// How many unique authors to select from discovery.
    pub target_authors: usize,
    /// Client-side truncation of each author's post listing.
    pub posts_per_author: usize,
    /// Maximum follow edges accepted per author, regardless of how many
    /// followers exist remotely.
    pub follower_cap: usize,
    pub retry: BackoffPolicy,
    pub pacing: Pacing,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            target_authors: 100,
            posts_per_author: 10,
            follower_cap: 30,
            retry: BackoffPolicy::default(),
            pacing: Pacing::default(),
        }
    }
}

impl HarvestConfig {
    pub fn with_target_authors(mut self, target: usize) -> Self {
        self.target_authors = target;
        self
    }

    pub fn with_follower_cap(mut self, cap: usize) -> Self {
        self.follower_cap = cap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_schedule() {
        let config = HarvestConfig::default();
        assert_eq!(config.target_authors, 100);
        assert_eq!(config.posts_per_author, 10);
        assert_eq!(config.follower_cap, 30);
        assert_eq!(config.pacing.topic_retry_wait, Duration::from_secs(30));
        assert_eq!(config.pacing.follower_retry_wait, Duration::from_secs(10));
    }

    #[test]
    fn builder_overrides() {
        let config = HarvestConfig::default()
            .with_target_authors(5)
            .with_follower_cap(3);
        assert_eq!(config.target_authors, 5);
        assert_eq!(config.follower_cap, 3);
    }
}
