//! Product listings of wildberries.ru
//!
//! Categories come either as a server rendered listing or as a shell whose
//! products are served page by page by the catalog API. Every product detail
//! ends with a sub-fetch of its oldest review, the unsealed loader travels in
//! the callback of that request.

use anyhow::{anyhow, bail, Context};
use lazy_static::lazy_static;
use regex::{NoExpand, Regex};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use wildsearch_crawler::{Output, Request, Response, Spider};

use crate::extract::{
    all_attrs, canonical_mismatch, clean_text, first_attr, first_text, parse_count,
    parse_decimal, parse_price, without_query,
};
use crate::items::{ProductLoader, ProductRecord};
use crate::purchases::{purchases_count, DOM_READY_MARKER, SPA_MARKER};

pub const SITEMAP_URL: &str = "https://www.wildberries.ru/services/karta-sayta";
pub const MAIN_MENU_URL: &str = "https://www.wildberries.ru/menu/getrendered?lang=ru&burger=true";
pub const CATALOG_API_URL: &str = "https://wbxcatalog-ru.wildberries.ru/nm-2-card/catalog";

pub const BRAND_COUNTRY_LABEL: &str = "Страна бренда";
pub const MANUFACTURE_COUNTRY_LABEL: &str = "Страна производитель";

const XHR_HEADER: (&str, &str) = ("x-requested-with", "XMLHttpRequest");

lazy_static! {
    static ref ANY_LINK: Selector = Selector::parse("a").unwrap();
    static ref SITEMAP_LINK: Selector = Selector::parse("#sitemap a").unwrap();
    static ref H1: Selector = Selector::parse("h1").unwrap();
    static ref CATALOG: Selector = Selector::parse("#catalog").unwrap();
    static ref ANY_CARD: Selector = Selector::parse(".j-card-item").unwrap();
    static ref LISTING_CARD: Selector = Selector::parse(".catalog-content .j-card-item").unwrap();
    static ref CARD_LINK: Selector = Selector::parse("a.ref_goods_n_p").unwrap();
    static ref CARD_NAME: Selector = Selector::parse(".goods-name").unwrap();
    static ref CARD_REVIEWS: Selector = Selector::parse(".dtList-comments-count").unwrap();
    static ref CARD_PRICE: Selector = Selector::parse(".lower-price").unwrap();
    static ref CARD_BRAND: Selector = Selector::parse(".brand-name").unwrap();
    static ref NEXT_PAGE: Selector = Selector::parse(".pager-bottom a.pagination-next").unwrap();
    static ref PARAM: Selector = Selector::parse(".params .pp").unwrap();
    static ref PARAM_LABEL: Selector = Selector::parse("span:nth-of-type(1) b").unwrap();
    static ref PARAM_VALUE: Selector = Selector::parse("span:nth-of-type(2)").unwrap();
    static ref ARTICLE: Selector = Selector::parse("div.article span").unwrap();
    static ref NAME: Selector = Selector::parse(".brand-and-name .name").unwrap();
    static ref BRAND: Selector = Selector::parse(".brand-and-name .brand").unwrap();
    static ref REVIEWS_COUNT: Selector = Selector::parse(".count-review i").unwrap();
    static ref PRICE: Selector = Selector::parse(".final-cost").unwrap();
    static ref RATING: Selector = Selector::parse(".product-rating span").unwrap();
    static ref BRAND_URL: Selector = Selector::parse(".brand-logo a").unwrap();
    static ref BRAND_LOGO: Selector = Selector::parse(".brand-logo img").unwrap();
    static ref IMAGES: Selector = Selector::parse(".pv-carousel .swiper-slide img").unwrap();
    static ref SCRIPT: Selector = Selector::parse("script").unwrap();
    static ref REVIEWS_LINK: Selector = Selector::parse("#Comments a.show-more").unwrap();
    static ref VARIANTS: Selector = Selector::parse(".options ul li a").unwrap();
    static ref COMMENT: Selector = Selector::parse(".comment").unwrap();
    static ref COMMENT_TIME: Selector = Selector::parse(".time").unwrap();
    static ref PRODUCT_ID_RE: Regex = Regex::new(r"/catalog/(\d{1,20})/detail\.aspx").unwrap();
    static ref DETAIL_SUFFIX_RE: Regex = Regex::new(r"detail\.aspx.*$").unwrap();
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WildberriesConfig {
    /// Comma separated category URLs to start from
    #[serde(default)]
    pub category_urls: Option<String>,
    /// Comma separated product URLs to start from
    #[serde(default)]
    pub good_urls: Option<String>,
    /// Start from the sitemap instead of the main menu
    #[serde(default)]
    pub use_sitemap: bool,
    /// Emit listing level records without fetching product pages
    #[serde(default)]
    pub skip_details: bool,
    #[serde(default)]
    pub skip_images: bool,
    #[serde(default)]
    pub skip_variants: bool,
    /// Fetch product pages again when listed under another position
    #[serde(default)]
    pub allow_dupes: bool,
}

impl WildberriesConfig {
    fn url_list(key: &str, list: &Option<String>) -> anyhow::Result<Vec<Url>> {
        list.iter()
            .flat_map(|list| list.split(','))
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| {
                Url::parse(url).with_context(|| {
                    format!("Invalid wildberries config, `{key}` has a relative or invalid URL: {url}")
                })
            })
            .collect()
    }

    pub fn category_urls(&self) -> anyhow::Result<Vec<Url>> {
        Self::url_list("categoryUrls", &self.category_urls)
    }

    pub fn good_urls(&self) -> anyhow::Result<Vec<Url>> {
        Self::url_list("goodUrls", &self.good_urls)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.category_urls()?;
        self.good_urls()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRef {
    pub url: String,
    pub name: Option<String>,
}

/// The product a variant page was reached from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParentRef {
    pub wb_id: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductContext {
    pub position: Option<u64>,
    pub category: Option<CategoryRef>,
    pub parent: Option<ParentRef>,
}

#[derive(Debug, Clone)]
pub enum Callback {
    MainMenu,
    Sitemap,
    /// Category page, listing position carried over from the previous page
    Category { position: Option<u64> },
    /// Catalog API page, position of the product preceding its first one
    CategoryJson { position: u64, category: CategoryRef },
    Product(ProductContext),
    FirstReviewDate(Box<ProductLoader>),
}

pub struct WildberriesSpider {
    config: WildberriesConfig,
    category_urls: Vec<Url>,
    good_urls: Vec<Url>,
}

impl Spider for WildberriesSpider {
    type Config = WildberriesConfig;
    type Callback = Callback;
    type Item = ProductRecord;

    fn new(config: &Self::Config) -> anyhow::Result<Self> {
        Ok(Self {
            config: config.clone(),
            category_urls: config.category_urls()?,
            good_urls: config.good_urls()?,
        })
    }

    fn name(&self) -> &'static str {
        "wb"
    }

    fn start_requests(&self) -> anyhow::Result<Vec<Request<Callback>>> {
        if !self.category_urls.is_empty() {
            return Ok(self
                .category_urls
                .iter()
                .map(|url| Request::from_url(url.clone(), Callback::Category { position: None }))
                .collect());
        }

        if !self.good_urls.is_empty() {
            return Ok(self
                .good_urls
                .iter()
                .map(|url| {
                    Request::from_url(url.clone(), Callback::Product(ProductContext::default()))
                })
                .collect());
        }

        let request = if self.config.use_sitemap {
            Request::new(SITEMAP_URL, Callback::Sitemap)?
        } else {
            Request::new(MAIN_MENU_URL, Callback::MainMenu)?.header(XHR_HEADER.0, XHR_HEADER.1)
        };
        Ok(vec![request])
    }

    fn parse(
        &self,
        response: &Response,
        callback: Callback,
    ) -> anyhow::Result<Output<Callback, ProductRecord>> {
        match callback {
            Callback::MainMenu => self.parse_links(response, &ANY_LINK),
            Callback::Sitemap => self.parse_links(response, &SITEMAP_LINK),
            Callback::Category { position } => self.parse_category(response, position),
            Callback::CategoryJson { position, category } => {
                self.parse_category_json(response, position, category)
            }
            Callback::Product(ctx) => self.parse_product(response, ctx),
            Callback::FirstReviewDate(loader) => Ok(self.parse_first_review_date(response, *loader)),
        }
    }

    fn on_error(
        &self,
        url: &Url,
        callback: Callback,
        error: &anyhow::Error,
    ) -> Output<Callback, ProductRecord> {
        let mut output = Output::new();
        match callback {
            Callback::FirstReviewDate(loader) => {
                log::debug!("No review date from {url} got: {error}");
                output.item(loader.load_item());
            }
            callback => log::warn!("Skipping {url} ({callback:?}) got: {error}"),
        }
        output
    }
}

impl WildberriesSpider {
    fn parse_links(
        &self,
        response: &Response,
        selector: &Selector,
    ) -> anyhow::Result<Output<Callback, ProductRecord>> {
        let html = Html::parse_document(response.text());
        let mut output = Output::new();
        for href in all_attrs(html.root_element(), selector, "href") {
            match response.follow(&href, Callback::Category { position: None }) {
                Ok(request) => output.request(request),
                Err(e) => log::warn!("Skipping link {href} got: {e}"),
            }
        }
        log::debug!("Found {} categories on {}", output.len(), response.url);
        Ok(output)
    }

    fn parse_category(
        &self,
        response: &Response,
        position: Option<u64>,
    ) -> anyhow::Result<Output<Callback, ProductRecord>> {
        let html = Html::parse_document(response.text());
        let root = html.root_element();
        let category = CategoryRef {
            url: without_query(&response.url).to_string(),
            name: first_text(root, &H1),
        };

        if first_attr(root, &CATALOG, "data-xcatalog-path").is_some() {
            self.parse_category_api(response, root, category)
        } else {
            self.parse_category_listing(response, root, category, position.unwrap_or(1))
        }
    }

    /// Issues one catalog API request per page of the category.
    fn parse_category_api(
        &self,
        response: &Response,
        root: ElementRef,
        category: CategoryRef,
    ) -> anyhow::Result<Output<Callback, ProductRecord>> {
        let items_on_page = root.select(&ANY_CARD).count() as u64;
        if items_on_page == 0 {
            bail!("No product cards on catalog page {}", response.url);
        }
        let total: u64 = first_attr(root, &CATALOG, "data-xcatalog-total")
            .ok_or_else(|| anyhow!("Missing catalog total on {}", response.url))?
            .parse()
            .with_context(|| format!("Invalid catalog total on {}", response.url))?;
        let query = first_attr(root, &CATALOG, "data-xcatalog-query").unwrap_or_default();

        let pages = (total + items_on_page - 1) / items_on_page;
        log::debug!("Category {} has {total} products on {pages} pages", category.url);

        let mut output = Output::new();
        for page in 1..=pages {
            let url = format!("{CATALOG_API_URL}?{query}&page={page}");
            output.request(Request::new(
                &url,
                Callback::CategoryJson {
                    position: (page - 1) * items_on_page,
                    category: category.clone(),
                },
            )?);
        }
        Ok(output)
    }

    fn parse_category_listing(
        &self,
        response: &Response,
        root: ElementRef,
        category: CategoryRef,
        mut position: u64,
    ) -> anyhow::Result<Output<Callback, ProductRecord>> {
        let mut output = Output::new();

        for card in root.select(&LISTING_CARD) {
            let Some(href) = first_attr(card, &CARD_LINK, "href") else {
                position += 1;
                continue;
            };
            let product_url = without_query(&response.join(&href)?);

            if self.config.skip_details {
                let wb_id = PRODUCT_ID_RE
                    .captures(product_url.path())
                    .and_then(|caps| caps[1].parse::<u64>().ok())
                    .ok_or_else(|| anyhow!("No product id in {product_url}"))?;
                let mut item = ProductRecord::new(product_url.to_string());
                item.wb_id = Some(wb_id);
                item.product_name = first_text(card, &CARD_NAME);
                item.wb_reviews_count = first_text(card, &CARD_REVIEWS).and_then(|t| parse_count(&t));
                item.wb_price = first_text(card, &CARD_PRICE).and_then(|t| parse_price(&t));
                item.wb_brand_name = first_text(card, &CARD_BRAND);
                item.wb_category_url = Some(category.url.clone());
                item.wb_category_name = category.name.clone();
                item.wb_category_position = Some(position);
                output.item(item);
            } else {
                let ctx = ProductContext {
                    position: Some(position),
                    category: Some(category.clone()),
                    parent: None,
                };
                output.request(
                    Request::from_url(product_url, Callback::Product(ctx))
                        .dont_filter(self.config.allow_dupes),
                );
            }

            position += 1;
        }

        for href in all_attrs(root, &NEXT_PAGE, "href") {
            output.request(response.follow(
                &href,
                Callback::Category {
                    position: Some(position),
                },
            )?);
        }

        Ok(output)
    }

    fn parse_category_json(
        &self,
        response: &Response,
        mut position: u64,
        category: CategoryRef,
    ) -> anyhow::Result<Output<Callback, ProductRecord>> {
        let data: Value = serde_json::from_str(response.text())
            .with_context(|| format!("Invalid catalog JSON from {}", response.url))?;
        let products = data
            .pointer("/data/products")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("No `data.products` in catalog JSON from {}", response.url))?;

        let mut output = Output::new();
        for product in products {
            position += 1;

            let Some(wb_id) = product.get("id").and_then(Value::as_u64) else {
                log::warn!("Skipping catalog product without id from {}", response.url);
                continue;
            };
            let product_url = format!(
                "{}://www.wildberries.ru/catalog/{wb_id}/detail.aspx",
                response.url.scheme()
            );

            if self.config.skip_details {
                let mut item = ProductRecord::new(product_url);
                item.wb_id = Some(wb_id);
                item.product_name = product.get("name").and_then(as_text);
                item.wb_reviews_count = product.get("feedbackCount").and_then(Value::as_u64);
                item.wb_price = product.get("salePrice").and_then(Value::as_f64);
                item.wb_brand_name = product.get("brand").and_then(as_text);
                item.wb_category_url = Some(category.url.clone());
                item.wb_category_name = category.name.clone();
                item.wb_category_position = Some(position);
                output.item(item);
            } else {
                let ctx = ProductContext {
                    position: Some(position),
                    category: Some(category.clone()),
                    parent: None,
                };
                output.request(
                    Request::new(&product_url, Callback::Product(ctx))?
                        .dont_filter(self.config.allow_dupes),
                );
            }
        }
        Ok(output)
    }

    fn parse_product(
        &self,
        response: &Response,
        ctx: ProductContext,
    ) -> anyhow::Result<Output<Callback, ProductRecord>> {
        let html = Html::parse_document(response.text());
        let root = html.root_element();
        let mut output = Output::new();

        if let Some(canonical) = canonical_mismatch(&html, &response.url) {
            log::debug!("Following canonical {canonical} of {}", response.url);
            output.request(
                Request::from_url(canonical, Callback::Product(ctx))
                    .dont_filter(self.config.allow_dupes),
            );
            return Ok(output);
        }

        let mut loader = ProductLoader::new(&response.url);

        for param in root.select(&PARAM) {
            let (Some(label), Some(value)) =
                (first_text(param, &PARAM_LABEL), first_text(param, &PARAM_VALUE))
            else {
                continue;
            };
            match label.as_str() {
                BRAND_COUNTRY_LABEL => loader.wb_brand_country = Some(value.clone()),
                MANUFACTURE_COUNTRY_LABEL => loader.wb_manufacture_country = Some(value.clone()),
                _ => {}
            }
            loader.features.insert(label, value);
        }

        let article = first_text(root, &ARTICLE);
        loader.wb_id = article.as_deref().and_then(|a| a.parse().ok());
        loader.product_name = first_text(root, &NAME);
        loader.wb_reviews_count = first_text(root, &REVIEWS_COUNT).and_then(|t| parse_count(&t));
        loader.wb_price = first_text(root, &PRICE).and_then(|t| parse_price(&t));
        loader.wb_rating = first_text(root, &RATING).and_then(|t| parse_decimal(&t));
        loader.wb_brand_name = first_text(root, &BRAND);
        loader.wb_brand_url = first_attr(root, &BRAND_URL, "href")
            .and_then(|href| response.join(&href).ok())
            .map(String::from);
        loader.wb_brand_logo = first_attr(root, &BRAND_LOGO, "src")
            .and_then(|src| response.join(&src).ok())
            .map(String::from);

        loader.wb_category_position = ctx.position;
        if let Some(category) = ctx.category {
            loader.wb_category_url = Some(category.url);
            loader.wb_category_name = category.name;
        }

        if !self.config.skip_images {
            loader.image_urls = all_attrs(root, &IMAGES, "src")
                .iter()
                .filter_map(|src| response.join(src).ok())
                .map(full_size_image)
                .collect();
        }

        for script in root.select(&SCRIPT) {
            let text: String = script.text().collect();
            if !text.contains(DOM_READY_MARKER) && !text.contains(SPA_MARKER) {
                continue;
            }
            if let Some(count) = purchases_count(&text, article.as_deref())? {
                loader.wb_purchases_count = Some(count);
                break;
            }
        }

        loader.wb_parent_id = ctx.parent.and_then(|parent| parent.wb_id);

        let wb_id = loader.wb_id;
        let reviews_url = reviews_url(&response.url, first_attr(root, &REVIEWS_LINK, "data-link"));
        output.request(
            Request::new(&reviews_url, Callback::FirstReviewDate(Box::new(loader)))?
                .header(XHR_HEADER.0, XHR_HEADER.1)
                .dont_filter(true),
        );

        if !self.config.skip_variants && ctx.parent.is_none() {
            for href in all_attrs(root, &VARIANTS, "href") {
                let variant_url = without_query(&response.join(&href)?);
                if variant_url == response.url {
                    continue;
                }
                let ctx = ProductContext {
                    parent: Some(ParentRef { wb_id }),
                    ..Default::default()
                };
                output.request(Request::from_url(variant_url, Callback::Product(ctx)));
            }
        }

        Ok(output)
    }

    fn parse_first_review_date(
        &self,
        response: &Response,
        mut loader: ProductLoader,
    ) -> Output<Callback, ProductRecord> {
        let html = Html::parse_document(response.text());
        loader.wb_first_review_date = html
            .select(&COMMENT)
            .next()
            .and_then(|comment| first_attr(comment, &COMMENT_TIME, "content"));

        let mut output = Output::new();
        output.item(loader.load_item());
        output
    }
}

/// Oldest reviews first, `link` identifies the product card.
pub fn reviews_url(product_url: &Url, link: Option<String>) -> String {
    let replacement = match link {
        Some(link) => format!("otzyvy?field=Date&order=Asc&link={link}"),
        None => "otzyvy?field=Date&order=Asc".to_string(),
    };
    DETAIL_SUFFIX_RE
        .replace(product_url.as_str(), NoExpand(replacement.as_str()))
        .into_owned()
}

/// Swaps the thumbnail `tm` path segment for the full size `big` one.
pub fn full_size_image(mut url: Url) -> String {
    let segments: Option<Vec<String>> = url.path_segments().map(|segments| {
        segments
            .map(|s| if s == "tm" { "big" } else { s }.to_string())
            .collect()
    });
    if let Some(segments) = segments {
        url.set_path(&format!("/{}", segments.join("/")));
    }
    url.into()
}

fn as_text(value: &Value) -> Option<String> {
    value.as_str().and_then(clean_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_lists() {
        let config = WildberriesConfig {
            category_urls: Some(
                "https://www.wildberries.ru/catalog/zhenshchinam, ,https://www.wildberries.ru/catalog/muzhchinam".into(),
            ),
            ..Default::default()
        };
        assert_eq!(config.category_urls().unwrap().len(), 2);
        assert!(config.good_urls().unwrap().is_empty());

        let config = WildberriesConfig {
            good_urls: Some("/catalog/1/detail.aspx".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn start_request_priority() {
        let spider = WildberriesSpider::new(&WildberriesConfig {
            category_urls: Some("https://www.wildberries.ru/catalog/a,https://www.wildberries.ru/catalog/b".into()),
            good_urls: Some("https://www.wildberries.ru/catalog/1/detail.aspx".into()),
            use_sitemap: true,
            ..Default::default()
        })
        .unwrap();
        let requests = spider.start_requests().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(matches!(requests[0].callback, Callback::Category { position: None }));

        let spider = WildberriesSpider::new(&WildberriesConfig {
            use_sitemap: true,
            ..Default::default()
        })
        .unwrap();
        let requests = spider.start_requests().unwrap();
        assert_eq!(requests[0].url.as_str(), SITEMAP_URL);

        let spider = WildberriesSpider::new(&WildberriesConfig::default()).unwrap();
        let requests = spider.start_requests().unwrap();
        assert!(matches!(requests[0].callback, Callback::MainMenu));
        assert_eq!(
            requests[0].headers,
            vec![("x-requested-with".to_string(), "XMLHttpRequest".to_string())]
        );
    }

    #[test]
    fn review_links() {
        let url = Url::parse("https://www.wildberries.ru/catalog/8685970/detail.aspx?targetUrl=GP").unwrap();
        assert_eq!(
            reviews_url(&url, Some("12345".into())),
            "https://www.wildberries.ru/catalog/8685970/otzyvy?field=Date&order=Asc&link=12345"
        );
        assert_eq!(
            reviews_url(&url, None),
            "https://www.wildberries.ru/catalog/8685970/otzyvy?field=Date&order=Asc"
        );
    }

    #[test]
    fn image_sizes() {
        let url = Url::parse("https://img1.wbstatic.net/tm/new/8680000/8685970-1.jpg").unwrap();
        assert_eq!(
            full_size_image(url),
            "https://img1.wbstatic.net/big/new/8680000/8685970-1.jpg"
        );
        let url = Url::parse("https://img1.wbstatic.net/html/8685970-tm.jpg").unwrap();
        assert_eq!(full_size_image(url), "https://img1.wbstatic.net/html/8685970-tm.jpg");
    }
}
