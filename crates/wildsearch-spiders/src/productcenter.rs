//! Producer listings of productcenter.ru

use anyhow::{anyhow, Context};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;
use wildsearch_crawler::{Output, Request, Response, Spider};

use crate::extract::{
    all_attrs, canonical_mismatch, first_attr, first_text, full_text, on_site_root, parse_count,
    without_query,
};
use crate::geo::{distance_km, Coords};
use crate::items::{ProducerLoader, ProducerRecord};

pub const FRONT_PAGE: &str = "https://productcenter.ru";
pub const GOODS_COUNT_TITLE: &str = "Все товары производителя";

lazy_static! {
    static ref MENU_LEAF: Selector = Selector::parse(".hcm_producers li ul li").unwrap();
    static ref FIRST_LINK: Selector = Selector::parse("a:nth-of-type(1)").unwrap();
    static ref H1: Selector = Selector::parse("h1").unwrap();
    static ref CARD: Selector = Selector::parse("#content .items .item").unwrap();
    static ref CARD_LINK: Selector = Selector::parse("a.link:nth-of-type(1)").unwrap();
    static ref CARD_GOODS: Selector =
        Selector::parse(&format!(r#"a[title="{GOODS_COUNT_TITLE}"]"#)).unwrap();
    static ref NEXT_PAGE: Selector = Selector::parse(".page_links a:last-child").unwrap();
    static ref NAME: Selector = Selector::parse("h1.cfix").unwrap();
    static ref ABOUT: Selector = Selector::parse("#box_description .box_text").unwrap();
    static ref PHONE: Selector = Selector::parse(r#"span[itemprop="telephone"]"#).unwrap();
    static ref EMAIL: Selector = Selector::parse(r#"span[itemprop="email"]"#).unwrap();
    static ref WEBSITE: Selector = Selector::parse("#producer_link").unwrap();
    static ref REGION: Selector = Selector::parse(r#"span[itemprop="addressRegion"]"#).unwrap();
    static ref LOCALITY: Selector =
        Selector::parse(r#"span[itemprop="addressLocality"]"#).unwrap();
    static ref STREET: Selector = Selector::parse(r#"span[itemprop="streetAddress"]"#).unwrap();
    static ref LOGO: Selector =
        Selector::parse(r#"a.fancybox[data-fancybox-group="producer"]"#).unwrap();
    static ref PRICE_LISTS: Selector = Selector::parse("#box_files a").unwrap();
    static ref COORDINATES_RE: Regex =
        Regex::new(r"coordinates: \[(\d+\.\d+, \d+\.\d+)]").unwrap();
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductcenterConfig {
    /// Start from this category listing
    #[serde(default)]
    pub category_url: Option<String>,
    /// Start from this producer page
    #[serde(default)]
    pub producer_url: Option<String>,
    /// Region path segment injected in menu links, e.g. `r-moscow`
    #[serde(default)]
    pub only_region: Option<String>,
    /// `"lat, lon"` of the office used to compute producer distances
    #[serde(default)]
    pub office_coords: Option<String>,
}

impl ProductcenterConfig {
    pub fn office(&self) -> anyhow::Result<Option<Coords>> {
        self.office_coords
            .as_deref()
            .map(|coords| {
                coords
                    .parse::<Coords>()
                    .context("Invalid productcenter config, `officeCoords`")
            })
            .transpose()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (key, url) in [
            ("categoryUrl", &self.category_url),
            ("producerUrl", &self.producer_url),
        ] {
            if let Some(url) = url {
                Url::parse(url).with_context(|| {
                    format!("Invalid productcenter config, `{key}` is not an absolute URL: {url}")
                })?;
            }
        }
        if let Some(region) = &self.only_region {
            if region.trim().is_empty() || region.contains('/') {
                anyhow::bail!("Invalid productcenter config, `onlyRegion` must be a path segment");
            }
        }
        self.office()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRef {
    pub url: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
    Front,
    Category(Option<CategoryRef>),
    Producer {
        category: Option<CategoryRef>,
        goods_count: Option<u64>,
    },
}

pub struct ProductcenterSpider {
    config: ProductcenterConfig,
    office: Option<Coords>,
}

impl Spider for ProductcenterSpider {
    type Config = ProductcenterConfig;
    type Callback = Callback;
    type Item = ProducerRecord;

    fn new(config: &Self::Config) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            office: config.office()?,
        })
    }

    fn name(&self) -> &'static str {
        "productcenter_producers"
    }

    fn start_requests(&self) -> anyhow::Result<Vec<Request<Callback>>> {
        let request = if let Some(url) = &self.config.category_url {
            Request::new(url, Callback::Category(None))?
        } else if let Some(url) = &self.config.producer_url {
            Request::new(
                url,
                Callback::Producer {
                    category: None,
                    goods_count: None,
                },
            )?
        } else {
            Request::new(FRONT_PAGE, Callback::Front)?
        };
        Ok(vec![request])
    }

    fn parse(
        &self,
        response: &Response,
        callback: Callback,
    ) -> anyhow::Result<Output<Callback, ProducerRecord>> {
        let html = Html::parse_document(response.text());
        match callback {
            Callback::Front => self.parse_front(response, &html),
            Callback::Category(category) => self.parse_category(response, &html, category),
            Callback::Producer {
                category,
                goods_count,
            } => self.parse_producer(response, &html, category, goods_count),
        }
    }
}

impl ProductcenterSpider {
    fn with_region(&self, href: &str) -> String {
        match &self.config.only_region {
            Some(region) if !href.contains(region.as_str()) => {
                href.replace("/producers", &format!("/producers/{region}"))
            }
            _ => href.to_string(),
        }
    }

    fn parse_front(
        &self,
        response: &Response,
        html: &Html,
    ) -> anyhow::Result<Output<Callback, ProducerRecord>> {
        let mut output = Output::new();
        for leaf in html.select(&MENU_LEAF) {
            let Some(href) = first_attr(leaf, &FIRST_LINK, "href") else {
                continue;
            };
            let Some(url) = on_site_root(&response.request_url, &self.with_region(&href)) else {
                log::warn!("Skipping menu link {href} on {}", response.url);
                continue;
            };
            let category = CategoryRef {
                url: url.to_string(),
                name: first_text(leaf, &FIRST_LINK),
            };
            output.request(Request::from_url(url, Callback::Category(Some(category))));
        }
        log::debug!("Found {} categories on {}", output.len(), response.url);
        Ok(output)
    }

    fn parse_category(
        &self,
        response: &Response,
        html: &Html,
        category: Option<CategoryRef>,
    ) -> anyhow::Result<Output<Callback, ProducerRecord>> {
        let category = category.unwrap_or_else(|| CategoryRef {
            url: without_query(&response.url).to_string(),
            name: first_text(html.root_element(), &H1),
        });

        let mut output = Output::new();
        for card in html.select(&CARD) {
            let Some(href) = first_attr(card, &CARD_LINK, "href") else {
                continue;
            };
            let goods_count = first_text(card, &CARD_GOODS).and_then(|t| parse_count(&t));
            output.request(response.follow(
                &href,
                Callback::Producer {
                    category: Some(category.clone()),
                    goods_count,
                },
            )?);
        }

        for href in all_attrs(html.root_element(), &NEXT_PAGE, "href") {
            output.request(response.follow(&href, Callback::Category(Some(category.clone())))?);
        }

        Ok(output)
    }

    fn parse_producer(
        &self,
        response: &Response,
        html: &Html,
        category: Option<CategoryRef>,
        goods_count: Option<u64>,
    ) -> anyhow::Result<Output<Callback, ProducerRecord>> {
        let mut output = Output::new();

        if let Some(canonical) = canonical_mismatch(html, &response.url) {
            log::debug!("Following canonical {canonical} of {}", response.url);
            output.request(Request::from_url(
                canonical,
                Callback::Producer {
                    category,
                    goods_count,
                },
            ));
            return Ok(output);
        }

        let root = html.root_element();
        let mut loader = ProducerLoader::new(&response.url);

        loader.producer_name = first_text(root, &NAME);
        loader.producer_about = root.select(&ABOUT).find_map(full_text);
        loader.producer_phone = first_text(root, &PHONE);
        loader.producer_email = first_text(root, &EMAIL);
        loader.producer_website = first_text(root, &WEBSITE);

        let address: Vec<String> = [&*REGION, &*LOCALITY, &*STREET]
            .into_iter()
            .filter_map(|selector| first_text(root, selector))
            .collect();
        if !address.is_empty() {
            loader.producer_address = Some(address.join(" "));
        }

        loader.producer_logo = first_attr(root, &LOGO, "href")
            .and_then(|href| on_site_root(&response.url, &href))
            .map(String::from);

        for href in all_attrs(root, &PRICE_LISTS, "href") {
            if let Some(url) = on_site_root(&response.url, &href).map(String::from) {
                if !loader.producer_price_lists.contains(&url) {
                    loader.producer_price_lists.push(url);
                }
            }
        }

        let coords = COORDINATES_RE
            .captures(response.text())
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| anyhow!("No producer coordinates found on {}", response.url))?
            .as_str()
            .parse::<Coords>()?;
        loader.producer_coords = Some(coords);
        loader.producer_distance = self.office.map(|office| distance_km(office, coords));

        if let Some(category) = category {
            loader.category_url = Some(category.url);
            loader.category_name = category.name;
        }
        loader.producer_goods_count = goods_count;

        output.item(loader.load_item());
        Ok(output)
    }
}
