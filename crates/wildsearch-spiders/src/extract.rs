//! Selection and normalization helpers shared by the spiders.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

lazy_static! {
    static ref NUMBER_RE: Regex = Regex::new(r"\d+(?:[.,]\d+)?").unwrap();
    static ref CANONICAL: Selector = Selector::parse("link[rel=canonical]").unwrap();
}

/// Collapses whitespace runs and trims, empty text is `None`.
pub fn clean_text(text: &str) -> Option<String> {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Text nodes that are direct children of the element.
pub fn own_text(elem: ElementRef) -> Option<String> {
    let mut text = String::new();
    for node in elem.children() {
        if let Some(t) = node.value().as_text() {
            text.push_str(t);
        }
    }
    clean_text(&text)
}

/// All descendant text of the element.
pub fn full_text(elem: ElementRef) -> Option<String> {
    clean_text(&elem.text().collect::<Vec<_>>().join(" "))
}

/// First non empty own text among the elements matching `selector`.
pub fn first_text(scope: ElementRef, selector: &Selector) -> Option<String> {
    scope.select(selector).find_map(own_text)
}

/// First value of `attr` among the elements matching `selector`.
pub fn first_attr(scope: ElementRef, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .find_map(|e| e.value().attr(attr))
        .and_then(clean_text)
}

/// Every value of `attr` among the elements matching `selector`.
pub fn all_attrs(scope: ElementRef, selector: &Selector, attr: &str) -> Vec<String> {
    scope
        .select(selector)
        .filter_map(|e| e.value().attr(attr))
        .filter_map(clean_text)
        .collect()
}

pub fn canonical_href(html: &Html) -> Option<String> {
    first_attr(html.root_element(), &CANONICAL, "href")
}

/// The query-less canonical URL of the page when it differs from `page_url`.
///
/// Pages without a canonical link are taken as canonical.
pub fn canonical_mismatch(html: &Html, page_url: &Url) -> Option<Url> {
    let href = canonical_href(html)?;
    let canonical = without_query(&page_url.join(&href).ok()?);
    if &canonical == page_url {
        None
    } else {
        Some(canonical)
    }
}

/// Digits only, e.g. `"1 234 отзыва"` is 1234.
pub fn parse_count(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Price without currency sign and thousands separators.
pub fn parse_price(text: &str) -> Option<f64> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    parse_decimal(&compact)
}

/// First decimal number in the text, comma or dot separated.
pub fn parse_decimal(text: &str) -> Option<f64> {
    NUMBER_RE
        .find(text)
        .and_then(|m| m.as_str().replace(',', ".").parse().ok())
}

pub fn without_query(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Rebuilds `href` as the scheme and host of `base` followed by the path of `href`.
pub fn on_site_root(base: &Url, href: &str) -> Option<Url> {
    let joined = base.join(href.trim()).ok()?;
    let mut url = base.clone();
    url.set_path(joined.path());
    url.set_query(None);
    url.set_fragment(None);
    Some(url)
}
