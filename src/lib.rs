pub mod bank_service;
pub mod bank_transfer;
pub mod compact_export;
pub mod config;
pub mod content_hash;
pub mod contribution_pack;
pub mod database;
pub mod errors;
pub mod logging;
pub mod merge_engine;
pub mod models;
pub mod normalize;
pub mod practice_service;
pub mod resource_cache;
pub mod scheduler;
pub mod scoring;
pub mod store;

pub use bank_service::BankService;
pub use config::Config;
pub use content_hash::compute_content_hash;
pub use contribution_pack::{ContributionPack, build_contribution_pack};
pub use database::Database;
pub use errors::*;
pub use merge_engine::{ContributionMerger, MergeOptions, MergeSummary, parse_contribution_pack};
pub use models::*;
pub use normalize::{normalize_text, slugify};
pub use practice_service::PracticeService;
pub use resource_cache::{FsResourceFetcher, ResourceCache, ResourceFetcher};
pub use scheduler::ReviewScheduler;
pub use store::EntityStore;
