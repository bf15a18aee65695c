pub mod extract;
pub mod geo;
pub mod items;
pub mod jsobject;
pub mod productcenter;
pub mod purchases;
pub mod wildberries;
pub mod writer;

pub use items::{ProducerRecord, ProductRecord, Record};
pub use productcenter::{ProductcenterConfig, ProductcenterSpider};
pub use wildberries::{WildberriesConfig, WildberriesSpider};

pub use anyhow;
