//! # Commerce Redis
//!
//! Redis implementations of the ranking infrastructure traits:
//!
//! - [`RedisSortedSetStore`]: daily ranking sorted sets (`ZINCRBY`,
//!   `ZREVRANGE WITHSCORES`, `ZREVRANK`, `ZCARD`, `EXPIRE … NX`, weighted
//!   `ZUNIONSTORE`)
//! - [`RedisKVCache`]: JSON values with TTL for catalog hot reads
//!
//! Integration tests are `#[ignore]`d and need a running Redis
//! (`docker run -d -p 6379:6379 redis:7-alpine`).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod error;
mod sorted_set;

pub use cache::RedisKVCache;
pub use sorted_set::RedisSortedSetStore;
