//! GeoSource data adapters - uniform record access over tenant data sources.
//!
//! A tenant's records live either in a hosted table API or in a spreadsheet
//! reached through the tenant's OAuth connection. This crate hides which one
//! behind the [`DataAdapter`] trait and carries the setup steps that turn a
//! freshly connected account into a configured source.
//!
//! # Architecture
//!
//! ```text
//!   Setup UI / GIS server
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       SetupService / setup API           │
//! │  - List spreadsheets and tabs            │
//! │  - Preview rows, propose field mapping   │
//! │  - Save selection, configure table API   │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       AdapterFactory                     │
//! │  - Load active source config             │
//! │  - Refresh expiring tokens               │
//! │  - Decrypt credentials                   │
//! └─────────────────────────────────────────┘
//!          ↓
//!   SourceAdapter::{TableApi, Spreadsheet}
//!          ↓
//!   Table service / spreadsheet provider
//! ```
//!
//! # Core Types
//!
//! - [`DataAdapter`] - Record operations every backend supports
//! - [`SourceAdapter`] - Backend selected for a tenant
//! - [`AdapterFactory`] - Builds a tenant's adapter
//! - [`SetupService`] - Onboarding steps for a connected source

pub mod adapter;
pub mod adapters;
pub mod api;
pub mod cache;
pub mod detect;
pub mod factory;
pub mod geometry;
pub mod rate_limit;
pub mod setup;

pub use adapter::{DataAdapter, Pagination, RecordFields, RecordPage, SourceAdapter, SourceRecord, TableSchema};
pub use detect::{detect_fields, FieldProposal};
pub use factory::AdapterFactory;
pub use geometry::Geometry;
pub use setup::SetupService;
