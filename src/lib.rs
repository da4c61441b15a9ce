//! StrataCache - Multi-Tier Caching Engine
//!
//! A key/value cache layered over a stack of storage tiers: in-process
//! memory, an optional networked shared store, and a local persistent store.
//! Reads walk the stack fastest-first and promote hits upward; writes go
//! through every enabled tier. Values pass through a codec pipeline that can
//! compress, encrypt, and sign payloads on the way down.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Cache Manager                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Memory Tier         │ Shared Tier        │ Disk Tier         │
//! │  ┌───────────────┐   │ ┌───────────────┐  │ ┌──────────────┐  │
//! │  │ LRU/FIFO/LFU  │   │ │ SharedBackend │  │ │ Keyed store  │  │
//! │  │ bounded map   │   │ │ (abstract)    │  │ │ + sidecars   │  │
//! │  └───────────────┘   │ └───────────────┘  │ └──────────────┘  │
//! │          │                    │                    │          │
//! │          └─────────── read-through / promotion ────┘          │
//! │                                                               │
//! │   codec pipeline: serialize → compress → encrypt → sign       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stratacache::{CacheConfig, CacheManager};
//!
//! # async fn demo() -> stratacache::Result<()> {
//! let cache = CacheManager::new(CacheConfig::default()).await?;
//! cache.set("user:1", "alice", Some(60.0)).await?;
//! let value = cache.get("user:1").await?;
//! assert_eq!(value.unwrap().as_str(), Some("alice"));
//! cache.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`adaptive_ttl`] - Access-driven effective-TTL policy
//! - [`codec`] - Value serialization, compression, encryption, signing
//! - [`config`] - Engine configuration
//! - [`error`] - Error types
//! - [`guard`] - Retry/backoff and per-tier circuit breakers
//! - [`invalidation`] - Cross-instance key-expiry notifications
//! - [`manager`] - The tier orchestrator
//! - [`namespace`] - Key validation and namespacing
//! - [`stats`] - Operation statistics
//! - [`tiers`] - The tier contract and its implementations
//! - [`warmup`] - Startup cache seeding

pub mod adaptive_ttl;
mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod guard;
pub mod invalidation;
pub mod manager;
pub mod namespace;
pub mod stats;
pub mod tiers;
pub mod warmup;

// Re-export commonly used types
pub use codec::{CacheValue, Codec};
pub use config::{CacheConfig, EvictionPolicy, SigningAlgorithm, TierLayerConfig};
pub use error::{Error, Result};
pub use manager::CacheManager;
pub use stats::StatsSnapshot;
pub use tiers::{
    CacheTier, DiskTier, InMemorySharedBackend, MemoryTier, SharedBackend, SharedTier, TierEntry,
    TierKind,
};
