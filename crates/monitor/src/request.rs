//! Build the submission from command-line arguments and environment.

use std::path::PathBuf;

use cachewatch_client::config::{parse_var, ConfigError};
use cachewatch_core::error::CoreError;
use cachewatch_core::submission::{
    parse_work_items, CacheStrategy, LoadBalancerPolicy, SubmitRequest, DEFAULT_CACHE_SIZE,
    DEFAULT_NUM_NODES,
};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("no work items: pass URLs as arguments or set URLS_FILE")]
    NoWorkItems,

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

/// Run parameters beyond the submission itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Fetch the cached content after a completed run.
    pub fetch_cached_content: bool,
}

/// Assemble a validated [`SubmitRequest`].
///
/// Positional arguments take precedence over `URLS_FILE`. Each argument is
/// one work item; the file is split one item per line.
pub fn build_request(
    args: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SubmitRequest, RequestError> {
    let work_items = if args.is_empty() {
        match lookup("URLS_FILE").filter(|p| !p.trim().is_empty()) {
            Some(path) => {
                let path = PathBuf::from(path.trim());
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| RequestError::ReadFile { path, source })?;
                parse_work_items(&text)
            }
            None => Vec::new(),
        }
    } else {
        parse_work_items(&args.join("\n"))
    };

    if work_items.is_empty() {
        return Err(RequestError::NoWorkItems);
    }

    let strategy: CacheStrategy = parse_var(&lookup, "CACHE_STRATEGY", CacheStrategy::default())?;
    let balancer: LoadBalancerPolicy =
        parse_var(&lookup, "LOAD_BALANCER", LoadBalancerPolicy::default())?;
    let num_nodes: u32 = parse_var(&lookup, "NUM_NODES", DEFAULT_NUM_NODES)?;
    let cache_size: u32 = parse_var(&lookup, "CACHE_SIZE", DEFAULT_CACHE_SIZE)?;

    let request = SubmitRequest::new(work_items)
        .with_cache_strategy(strategy)
        .with_load_balancer(balancer)
        .with_num_nodes(num_nodes)
        .with_cache_size(cache_size);
    request.ensure_valid()?;
    Ok(request)
}

pub fn run_options(lookup: impl Fn(&str) -> Option<String>) -> Result<RunOptions, RequestError> {
    Ok(RunOptions {
        fetch_cached_content: parse_var(&lookup, "FETCH_CACHED_CONTENT", false)?,
    })
}
