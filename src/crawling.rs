//! # Crawling Module
//!
//! The acquisition core and its driver:
//! - `field_parser`: pure normalization of raw field strings
//! - `item_extractor`: reads one item in an isolated browsing context
//! - `pagination`: drives a listing to full expansion
//! - `walker`: pagination, tile enumeration and lazy extraction per listing
//! - `orchestrator`: sequences walks and persists what they yield

pub mod errors;
pub mod field_parser;
pub mod item_extractor;
pub mod orchestrator;
pub mod pagination;
pub mod state;
pub mod walker;

pub use errors::{ExtractionError, ItemField, PaginationFailure, PriceLabelError};
pub use field_parser::parse_price;
pub use item_extractor::ItemExtractor;
pub use orchestrator::{CrawlingOrchestrator, OrchestratorConfig, OrchestratorError, RunReport};
pub use pagination::PaginationEngine;
pub use state::{LastError, ListingPhase, ListingState};
pub use walker::{CatalogWalker, ListingWalk, WalkContext, WalkSummary};
