//! Records emitted by the spiders, and the loaders that build them.
//!
//! A loader is bound to one detail page. It collects fields while the page is
//! extracted, may travel inside a request callback, and is sealed exactly once
//! by `load_item`, which consumes it.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::geo::Coords;

pub const MARKETPLACE: &str = "wildberries";

/// Flat record with a stable list of field names.
pub trait Record: Serialize {
    /// Field names in output order, as serialized.
    const FIELDS: &'static [&'static str];
}

pub fn parse_date() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProducerRecord {
    pub producer_name: Option<String>,
    pub producer_about: Option<String>,
    pub producer_phone: Option<String>,
    pub producer_email: Option<String>,
    pub producer_website: Option<String>,
    pub producer_address: Option<String>,
    pub producer_logo: Option<String>,
    pub producer_coords: Option<Coords>,
    pub producer_distance: Option<f64>,
    pub category_name: Option<String>,
    pub category_url: Option<String>,
    pub producer_goods_count: Option<u64>,
    pub producer_price_lists: Vec<String>,
    /// Not published by the site anymore
    pub producer_rating: Option<f64>,
    pub producer_url: String,
    pub parse_date: String,
}

impl Record for ProducerRecord {
    const FIELDS: &'static [&'static str] = &[
        "producer_name",
        "producer_about",
        "producer_phone",
        "producer_email",
        "producer_website",
        "producer_address",
        "producer_logo",
        "producer_coords",
        "producer_distance",
        "category_name",
        "category_url",
        "producer_goods_count",
        "producer_price_lists",
        "producer_rating",
        "producer_url",
        "parse_date",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub wb_id: Option<u64>,
    pub product_name: Option<String>,
    pub product_url: String,
    pub marketplace: String,
    pub wb_price: Option<f64>,
    pub wb_rating: Option<f64>,
    pub wb_reviews_count: Option<u64>,
    pub wb_first_review_date: Option<String>,
    pub wb_brand_name: Option<String>,
    pub wb_brand_url: Option<String>,
    pub wb_brand_logo: Option<String>,
    pub wb_brand_country: Option<String>,
    pub wb_manufacture_country: Option<String>,
    pub wb_category_name: Option<String>,
    pub wb_category_url: Option<String>,
    pub wb_category_position: Option<u64>,
    pub wb_parent_id: Option<u64>,
    pub features: BTreeMap<String, String>,
    pub image_urls: Vec<String>,
    pub wb_purchases_count: Option<u64>,
    pub parse_date: String,
}

impl ProductRecord {
    pub fn new(product_url: String) -> Self {
        Self {
            wb_id: None,
            product_name: None,
            product_url,
            marketplace: MARKETPLACE.to_string(),
            wb_price: None,
            wb_rating: None,
            wb_reviews_count: None,
            wb_first_review_date: None,
            wb_brand_name: None,
            wb_brand_url: None,
            wb_brand_logo: None,
            wb_brand_country: None,
            wb_manufacture_country: None,
            wb_category_name: None,
            wb_category_url: None,
            wb_category_position: None,
            wb_parent_id: None,
            features: BTreeMap::new(),
            image_urls: Vec::new(),
            wb_purchases_count: None,
            parse_date: parse_date(),
        }
    }
}

impl Record for ProductRecord {
    const FIELDS: &'static [&'static str] = &[
        "wb_id",
        "product_name",
        "product_url",
        "marketplace",
        "wb_price",
        "wb_rating",
        "wb_reviews_count",
        "wb_first_review_date",
        "wb_brand_name",
        "wb_brand_url",
        "wb_brand_logo",
        "wb_brand_country",
        "wb_manufacture_country",
        "wb_category_name",
        "wb_category_url",
        "wb_category_position",
        "wb_parent_id",
        "features",
        "image_urls",
        "wb_purchases_count",
        "parse_date",
    ];
}

#[derive(Debug)]
pub struct ProducerLoader {
    item: ProducerRecord,
}

impl ProducerLoader {
    pub fn new(producer_url: &Url) -> Self {
        Self {
            item: ProducerRecord {
                producer_url: producer_url.to_string(),
                parse_date: parse_date(),
                ..Default::default()
            },
        }
    }

    pub fn load_item(self) -> ProducerRecord {
        self.item
    }
}

impl Deref for ProducerLoader {
    type Target = ProducerRecord;

    fn deref(&self) -> &Self::Target {
        &self.item
    }
}

impl DerefMut for ProducerLoader {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.item
    }
}

#[derive(Debug, Clone)]
pub struct ProductLoader {
    item: ProductRecord,
}

impl ProductLoader {
    pub fn new(product_url: &Url) -> Self {
        Self {
            item: ProductRecord::new(product_url.to_string()),
        }
    }

    pub fn load_item(self) -> ProductRecord {
        self.item
    }
}

impl Deref for ProductLoader {
    type Target = ProductRecord;

    fn deref(&self) -> &Self::Target {
        &self.item
    }
}

impl DerefMut for ProductLoader {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.item
    }
}
