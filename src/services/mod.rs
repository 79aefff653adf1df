//! Service layer for the mirror monitor.
//!
//! - Mirror crawling (`MirrorCrawler`)

mod crawler;

pub use crawler::MirrorCrawler;
