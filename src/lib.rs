//! # Evaluation System
//!
//! The plugin execution and data-indexing core of the freva climate
//! evaluation framework.
//!
//! Scientists register *plugins* (analysis tools with typed parameters)
//! and run them over large catalogs of NetCDF/GRIB files. Every run is
//! recorded in a history database, may execute locally or on a batch
//! system, and its data outputs are indexed so later searches find them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────────┐
//! │ Registry │──▶│  Invoke  │──▶│ Scheduler │──▶│ sbatch/qsub… │
//! │ plugins  │   │  engine  │   └───────────┘   └──────────────┘
//! └──────────┘   └────┬─────┘
//!                     │
//!          ┌──────────┼──────────┐
//!          ▼          ▼          ▼
//!     ┌─────────┐ ┌────────┐ ┌──────────┐   ┌────────────┐
//!     │ History │ │ Plugin │ │ Crawler  │──▶│ files /    │
//!     │ SQLite  │ │ runner │ │ DRS      │   │ latest core│
//!     └─────────┘ └────────┘ └──────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! freva plugin list
//! freva plugin run DummyPlugin the_number=42
//! freva history --limit 5
//! freva crawl dump /data/cmip5 cmip5.manifest.gz
//! freva crawl load cmip5.manifest.gz
//! freva databrowser project=cmip5 variable=ua --count
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | INI configuration, vault secrets, config swapping |
//! | [`parameters`] | Typed plugin parameters |
//! | [`drs`] | Directory reference syntax paths |
//! | [`solr`] | Search index cores |
//! | [`crawler`] | Crawl manifests and indexing |
//! | [`databrowser`] | Faceted file search |
//! | [`history`] | Run history database |
//! | [`scheduler`] | Batch job scripts and drivers |
//! | [`plugin`] | Plugin manifests and runners |
//! | [`registry`] | Plugin discovery |
//! | [`invoke`] | Running a plugin end to end |

pub mod config;
pub mod crawler;
pub mod databrowser;
pub mod db;
pub mod drs;
pub mod error;
pub mod history;
pub mod invoke;
pub mod migrate;
pub mod models;
pub mod parameters;
pub mod plugin;
pub mod registry;
pub mod scheduler;
pub mod solr;
pub mod suggest;
pub mod template;
pub mod user;

pub use error::{Error, Result};
