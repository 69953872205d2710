//! # scene-sync
//!
//! Keeps downstream stores in step with the published Landsat 8 scene
//! catalog.
//!
//! The catalog is one large CSV file, newest scenes first. A sync reads it
//! (streamed, or from a cached download), keeps the rows inside an
//! acquisition-date window, and writes each scene to every selected sink
//! through a bounded worker pool.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────┐   ┌──────────┐   ┌──────────────┐
//! │ SourceFetcher│──▶│ parse  │──▶│  filter  │──▶│ DispatchPool │
//! │ stream/cache │   │ record │   │  window  │   │  bounded     │
//! └──────────────┘   └────────┘   └──────────┘   └──────┬───────┘
//!                                                       │
//!                   ┌──────────┬──────────┬─────────────┼──────────┐
//!                   ▼          ▼          ▼             ▼          ▼
//!                  s3         es         db          disk      thumbs
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! scene-sync init                                  # create the scene store
//! scene-sync sync disk db --start 2015-01-01 --end 2015-01-05
//! scene-sync sync s3 es --since-last-sync --concurrency 20
//! scene-sync last-synced
//! scene-sync reindex --batch-size 200
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Catalog records and scene documents |
//! | [`parse`] | Catalog row parsing |
//! | [`filter`] | Acquisition-date window |
//! | [`source`] | Catalog streaming and cached download |
//! | [`dispatch`] | Bounded, failure-isolated sink fan-out |
//! | [`sinks`] | The five storage sinks |
//! | [`s3`] | Minimal signed S3 client |
//! | [`probe`] | Last-synced day lookup |
//! | [`ingest`] | The sync pipeline |
//! | [`reindex`] | Rebuild the search index from the scene store |
//! | [`progress`] | Progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod probe;
pub mod progress;
pub mod reindex;
pub mod s3;
pub mod sinks;
pub mod source;
