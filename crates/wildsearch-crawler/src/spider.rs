use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::sync::mpsc;
use url::Url;

/// Callback-driven scraping logic hosted by [`crawl_site`](crate::crawl_site).
///
/// Every parse step is named by a variant of `Callback`, which also carries the
/// immutable context that the step needs (category, position, parent...).
pub trait Spider {
    type Config: Clone + Send + 'static;
    type Callback: fmt::Debug + Send + 'static;
    type Item: Send + 'static;

    fn new(config: &Self::Config) -> anyhow::Result<Self>
    where
        Self: Sized;

    fn name(&self) -> &'static str;

    fn start_requests(&self) -> anyhow::Result<Vec<Request<Self::Callback>>>;

    fn parse(
        &self,
        response: &Response,
        callback: Self::Callback,
    ) -> anyhow::Result<Output<Self::Callback, Self::Item>>;

    /// Called instead of [`parse`](Spider::parse) when the download failed.
    fn on_error(
        &self,
        url: &Url,
        callback: Self::Callback,
        error: &anyhow::Error,
    ) -> Output<Self::Callback, Self::Item> {
        log::warn!("Skipping {url} ({callback:?}) got: {error}");
        Output::new()
    }
}

#[derive(Debug, Clone)]
pub struct Request<C> {
    pub url: Url,
    pub callback: C,
    pub headers: Vec<(String, String)>,
    pub dont_filter: bool,
}

impl<C> Request<C> {
    pub fn new(url: &str, callback: C) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid request URL: {url}"))?;
        Ok(Self::from_url(url, callback))
    }

    pub fn from_url(url: Url, callback: C) -> Self {
        Self {
            url,
            callback,
            headers: Vec::new(),
            dont_filter: false,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn dont_filter(mut self, dont_filter: bool) -> Self {
        self.dont_filter = dont_filter;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL, after redirects
    pub url: Url,
    pub request_url: Url,
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(url: Url, body: impl Into<String>) -> Self {
        Self {
            request_url: url.clone(),
            url,
            status: 200,
            body: body.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    /// Resolves a possibly relative link against the final URL.
    pub fn join(&self, href: &str) -> anyhow::Result<Url> {
        self.url
            .join(href.trim())
            .with_context(|| format!("Couldn't resolve {href} against {}", self.url))
    }

    pub fn follow<C>(&self, href: &str, callback: C) -> anyhow::Result<Request<C>> {
        Ok(Request::from_url(self.join(href)?, callback))
    }
}

pub enum Yielded<C, I> {
    Request(Request<C>),
    Item(I),
}

pub struct Output<C, I> {
    yielded: Vec<Yielded<C, I>>,
}

impl<C, I> Default for Output<C, I> {
    fn default() -> Self {
        Self {
            yielded: Vec::new(),
        }
    }
}

impl<C, I> Output<C, I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, request: Request<C>) {
        self.yielded.push(Yielded::Request(request));
    }

    pub fn item(&mut self, item: I) {
        self.yielded.push(Yielded::Item(item));
    }

    pub fn extend(&mut self, other: Output<C, I>) {
        self.yielded.extend(other.yielded);
    }

    pub fn requests(&self) -> impl Iterator<Item = &Request<C>> {
        self.yielded.iter().filter_map(|y| match y {
            Yielded::Request(r) => Some(r),
            Yielded::Item(_) => None,
        })
    }

    pub fn items(&self) -> impl Iterator<Item = &I> {
        self.yielded.iter().filter_map(|y| match y {
            Yielded::Item(i) => Some(i),
            Yielded::Request(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.yielded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.yielded.is_empty()
    }
}

impl<C, I> IntoIterator for Output<C, I> {
    type Item = Yielded<C, I>;
    type IntoIter = std::vec::IntoIter<Yielded<C, I>>;

    fn into_iter(self) -> Self::IntoIter {
        self.yielded.into_iter()
    }
}

impl<C: fmt::Debug, I> fmt::Debug for Output<C, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("requests", &self.requests().collect::<Vec<_>>())
            .field("items", &self.items().count())
            .finish()
    }
}

/// Remembers every URL already scheduled.
#[derive(Debug, Default)]
pub struct DupeFilter {
    seen: Mutex<HashSet<String>>,
}

impl DupeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time a URL is seen. Fragments are ignored.
    pub fn first_seen(&self, url: &Url) -> bool {
        let mut fingerprint = url.clone();
        fingerprint.set_fragment(None);
        match self.seen.lock() {
            Ok(mut seen) => seen.insert(fingerprint.into()),
            Err(poisoned) => poisoned.into_inner().insert(fingerprint.into()),
        }
    }
}

/// Request sender counting every request actually scheduled.
#[derive(Debug)]
pub struct CountedTx<C> {
    tx: mpsc::UnboundedSender<Request<C>>,
    counter: Arc<AtomicUsize>,
    filter: Arc<DupeFilter>,
}

impl<C> Clone for CountedTx<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            counter: self.counter.clone(),
            filter: self.filter.clone(),
        }
    }
}

impl<C> CountedTx<C> {
    pub fn new(
        tx: mpsc::UnboundedSender<Request<C>>,
        counter: Arc<AtomicUsize>,
        filter: Arc<DupeFilter>,
    ) -> Self {
        Self {
            tx,
            counter,
            filter,
        }
    }

    pub fn send(&self, request: Request<C>) {
        if !self.filter.first_seen(&request.url) && !request.dont_filter {
            log::debug!("Filtered duplicate request: {}", request.url);
            return;
        }
        // Counted before sending so the downloader can never see an uncounted request
        self.counter.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.tx.send(request) {
            self.counter.fetch_sub(1, Ordering::SeqCst);
            log::error!("Couldn't send request: {}", e.0.url);
        }
    }
}
