mod config;
mod crawler;
mod spider;

pub use config::{CrawlerConfig, OnError};
pub use crawler::crawl_site;
pub use spider::{CountedTx, DupeFilter, Output, Request, Response, Spider, Yielded};

pub use anyhow;
pub use url;
