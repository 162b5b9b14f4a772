//! # Datascope
//!
//! A search-and-retrieval pipeline for statistical indicator data.
//!
//! Datascope wraps a statistical data API (searchable dataset catalog,
//! indicator metadata, paginated observation data) in typed operations,
//! layers best-effort AI query enhancement and result selection on top,
//! and exposes everything via a CLI and an MCP-compatible HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Enhance    │──▶│    Search    │──▶│    Select    │
//! │  (AI, opt.)  │   │  (remote)    │   │  (AI, opt.)  │
//! └──────────────┘   └──────┬───────┘   └──────────────┘
//!                           │
//!                           ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │   Retrieve   │──▶│    Shape     │
//!                    │ (paginated)  │   │ filter/sort  │
//!                    └──────┬───────┘   └──────────────┘
//!                           │
//!              ┌────────────┤
//!              ▼            ▼
//!         ┌─────────┐  ┌─────────┐
//!         │   CLI   │  │  HTTP   │
//!         │ (dscope)│  │  (MCP)  │
//!         └─────────┘  └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dscope search "population of Kenya"      # find matching datasets
//! dscope coverage WB_WDI_SP_POP_TOTL WB_WDI
//! dscope retrieve WB_WDI_SP_POP_TOTL WB_WDI --year 2023
//! dscope indicators popular                # bundled catalog, no network
//! dscope agent "latest GDP figures for East Africa"
//! dscope serve mcp                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`client`] | HTTP client with paginated fetching |
//! | [`search`] | Remote dataset search |
//! | [`retrieve`] | Observation retrieval and result shaping |
//! | [`coverage`] | Temporal coverage lookup |
//! | [`catalog`] | Bundled indicator catalog with local scoring |
//! | [`completion`] | Chat-completion provider abstraction |
//! | [`enhance`] | AI query enhancement |
//! | [`select`] | AI result selection |
//! | [`orchestrate`] | End-to-end search pipeline |
//! | [`agent`] | Bounded tool-calling agent loop |
//! | [`tools`] | Tool trait, registry, and built-ins |
//! | [`server`] | MCP HTTP server |

pub mod aggregates;
pub mod agent;
pub mod catalog;
pub mod client;
pub mod completion;
pub mod config;
pub mod coverage;
pub mod enhance;
pub mod models;
pub mod orchestrate;
pub mod retrieve;
pub mod search;
pub mod select;
pub mod server;
pub mod tools;
