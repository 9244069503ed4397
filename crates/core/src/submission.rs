//! Submission payload sent once per connection.
//!
//! A [`SubmitRequest`] carries the ordered work items (URLs) plus the run
//! configuration the remote proxy simulation needs. It serializes to the
//! single outbound JSON frame:
//!
//! ```json
//! {"urls": ["..."], "cacheStrategy": "LRU", "loadBalancer": "round-robin",
//!  "numNodes": 3, "cacheSize": 32}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Worker node count used when the caller does not choose one.
pub const DEFAULT_NUM_NODES: u32 = 3;

/// Cache capacity used when the caller does not choose one. Matches the
/// fixed capacity of the proxy service.
pub const DEFAULT_CACHE_SIZE: u32 = 32;

// ---------------------------------------------------------------------------
// Cache strategy
// ---------------------------------------------------------------------------

/// Cache-eviction strategy the service should simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStrategy {
    /// Least recently used.
    #[default]
    Lru,
    /// Least frequently used.
    Lfu,
    /// First in, first out.
    Fifo,
    /// Adaptive replacement cache.
    Arc,
    /// Random replacement.
    Rr,
}

impl CacheStrategy {
    pub const ALL: [CacheStrategy; 5] = [
        CacheStrategy::Lru,
        CacheStrategy::Lfu,
        CacheStrategy::Fifo,
        CacheStrategy::Arc,
        CacheStrategy::Rr,
    ];

    /// Wire tag, e.g. `"LRU"`.
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStrategy::Lru => "LRU",
            CacheStrategy::Lfu => "LFU",
            CacheStrategy::Fifo => "FIFO",
            CacheStrategy::Arc => "ARC",
            CacheStrategy::Rr => "RR",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown cache strategy \"{tag}\" (expected one of LRU, LFU, FIFO, ARC, RR)"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Load balancer policy
// ---------------------------------------------------------------------------

/// Load-balancing policy the service should use across its worker nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancerPolicy {
    #[default]
    RoundRobin,
    LeastConnections,
    Random,
    WeightedRoundRobin,
    IpHash,
}

impl LoadBalancerPolicy {
    pub const ALL: [LoadBalancerPolicy; 5] = [
        LoadBalancerPolicy::RoundRobin,
        LoadBalancerPolicy::LeastConnections,
        LoadBalancerPolicy::Random,
        LoadBalancerPolicy::WeightedRoundRobin,
        LoadBalancerPolicy::IpHash,
    ];

    /// Wire tag, e.g. `"round-robin"`.
    pub fn as_str(self) -> &'static str {
        match self {
            LoadBalancerPolicy::RoundRobin => "round-robin",
            LoadBalancerPolicy::LeastConnections => "least-connections",
            LoadBalancerPolicy::Random => "random",
            LoadBalancerPolicy::WeightedRoundRobin => "weighted-round-robin",
            LoadBalancerPolicy::IpHash => "ip-hash",
        }
    }
}

impl fmt::Display for LoadBalancerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalancerPolicy {
    type Err = CoreError;

    /// Accepts the kebab-case wire tag in any case; underscores are treated
    /// as hyphens so `ROUND_ROBIN` from an env var parses too.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|policy| policy.as_str().eq_ignore_ascii_case(&tag))
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown load balancer \"{}\" (expected one of round-robin, \
                     least-connections, random, weighted-round-robin, ip-hash)",
                    s.trim()
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// SubmitRequest
// ---------------------------------------------------------------------------

/// One job submission: the work items plus run configuration.
///
/// Built once per submission and never mutated afterwards; the fields are
/// private and only readable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(rename = "urls")]
    #[validate(
        length(min = 1, message = "At least one work item is required"),
        custom(function = "validate_work_items")
    )]
    work_items: Vec<String>,
    cache_strategy: CacheStrategy,
    load_balancer: LoadBalancerPolicy,
    #[validate(range(min = 1, message = "numNodes must be at least 1"))]
    num_nodes: u32,
    #[validate(range(min = 1, message = "cacheSize must be at least 1"))]
    cache_size: u32,
}

impl SubmitRequest {
    /// Create a request for `work_items` with default run configuration.
    pub fn new(work_items: Vec<String>) -> Self {
        Self {
            work_items,
            cache_strategy: CacheStrategy::default(),
            load_balancer: LoadBalancerPolicy::default(),
            num_nodes: DEFAULT_NUM_NODES,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }

    pub fn with_cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = strategy;
        self
    }

    pub fn with_load_balancer(mut self, policy: LoadBalancerPolicy) -> Self {
        self.load_balancer = policy;
        self
    }

    pub fn with_num_nodes(mut self, num_nodes: u32) -> Self {
        self.num_nodes = num_nodes;
        self
    }

    pub fn with_cache_size(mut self, cache_size: u32) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn work_items(&self) -> &[String] {
        &self.work_items
    }

    pub fn cache_strategy(&self) -> CacheStrategy {
        self.cache_strategy
    }

    pub fn load_balancer(&self) -> LoadBalancerPolicy {
        self.load_balancer
    }

    pub fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    pub fn cache_size(&self) -> u32 {
        self.cache_size
    }

    /// Number of progress frames a clean run is expected to produce.
    pub fn expected_count(&self) -> u64 {
        self.work_items.len() as u64
    }

    /// Check the request against the submission rules.
    ///
    /// Rules:
    /// - At least one work item.
    /// - No work item may be empty or whitespace-only.
    /// - `num_nodes >= 1` and `cache_size >= 1`.
    pub fn ensure_valid(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))
    }

    /// Serialize to the outbound JSON text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reject blank work items. Duplicates are allowed.
fn validate_work_items(items: &[String]) -> Result<(), ValidationError> {
    if let Some(index) = items.iter().position(|item| item.trim().is_empty()) {
        let mut err = ValidationError::new("blank_work_item");
        err.message = Some(format!("Work item at index {index} must not be blank").into());
        return Err(err);
    }
    Ok(())
}

/// Split newline-separated input into work items.
///
/// Lines are trimmed and blank lines dropped; order and duplicates are kept.
pub fn parse_work_items(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
