use std::future::Future;
use std::io::prelude::*;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Error, Result};
use crossbeam_channel::Sender;
use flate2::read::GzDecoder;
use futures::{try_join, StreamExt};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::{CrawlerConfig, OnError};
use crate::spider::{CountedTx, DupeFilter, Request, Response, Spider, Yielded};

const DONE_POLL: Duration = Duration::from_millis(250);

struct Fetched<C> {
    request: Request<C>,
    result: Result<Response>,
}

fn http_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::ClientBuilder::new()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .gzip(true)
        .deflate(true)
        .build()?;
    Ok(client)
}

async fn download<C>(client: &reqwest::Client, request: &Request<C>) -> Result<Response> {
    let mut builder = client.get(request.url.clone());
    for (name, value) in &request.headers {
        builder = builder.header(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(value)?,
        );
    }
    let resp = builder.send().await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow!("Got HTTP {status} for {}", request.url));
    }
    let url = resp.url().clone();

    let body = match resp.headers().get(CONTENT_TYPE) {
        Some(c) if c == "application/x-gzip" || c == "application/gzip" => {
            let compressed = resp.bytes().await?;
            let mut gz = GzDecoder::new(&compressed[..]);
            let mut page = String::new();
            gz.read_to_string(&mut page)?;
            page
        }
        _ => resp.text().await?,
    };

    Ok(Response {
        url,
        request_url: request.url.clone(),
        status: status.as_u16(),
        body,
    })
}

/// Handles one fetched page, returns the number of items produced.
fn process<T>(
    spider: &T,
    fetched: Fetched<T::Callback>,
    tx_req: &CountedTx<T::Callback>,
    tx_item: &Sender<T::Item>,
) -> Result<usize>
where
    T: Spider,
{
    let Fetched { request, result } = fetched;
    let output = match result {
        Ok(response) => spider.parse(&response, request.callback).map_err(|e| {
            anyhow!("Couldn't scrap {} got: {e:#}", request.url)
        })?,
        Err(e) => spider.on_error(&request.url, request.callback, &e),
    };

    let mut items = 0;
    for yielded in output {
        match yielded {
            Yielded::Request(r) => tx_req.send(r),
            Yielded::Item(i) => {
                items += 1;
                tx_item.send(i).ok();
            }
        }
    }
    Ok(items)
}

/// Crawls from the spider's start requests until no request is left.
///
/// Items are sent to `tx_item` as soon as they are yielded.
pub async fn crawl_site<T>(
    crawler_conf: &CrawlerConfig,
    spider_conf: &T::Config,
    tx_item: Sender<T::Item>,
) -> anyhow::Result<()>
where
    T: Spider + 'static,
{
    crawler_conf.validate()?;

    let client = http_client(crawler_conf)?;

    let pages_in = Arc::new(AtomicUsize::new(0));
    let pages_out = Arc::new(AtomicUsize::new(0));
    let items_out = Arc::new(AtomicUsize::new(0));

    let (tx_stop, rx_stop) = crossbeam_channel::unbounded::<()>();
    let (tx_url, rx_url) = mpsc::unbounded_channel::<Request<T::Callback>>();
    let (tx_page, rx_page) =
        crossbeam_channel::bounded::<Fetched<T::Callback>>(crawler_conf.page_buffer);

    let tx_url = CountedTx::new(tx_url, pages_in.clone(), Arc::new(DupeFilter::new()));

    // Workers

    let failed = Arc::new(AtomicBool::new(false));
    let mut workers = vec![];
    for id in 0..crawler_conf.num_workers {
        let rx_stop = rx_stop.clone();
        let rx_page = rx_page.clone();
        let tx_url = tx_url.clone();
        let tx_item = tx_item.clone();
        let pages_out = pages_out.clone();
        let items_out = items_out.clone();
        let spider_conf = spider_conf.clone();
        let on_scrap_error = crawler_conf.on_scrap_error;
        let failed = failed.clone();
        let worker = thread::Builder::new()
            .name(format!("{id}"))
            .spawn(move || {
                let spider = <T as Spider>::new(&spider_conf)?;
                loop {
                    crossbeam_channel::select! {
                        recv(rx_page) -> fetched => {
                            if let Ok(fetched) = fetched {
                                match process(&spider, fetched, &tx_url, &tx_item) {
                                    Ok(n) => {
                                        items_out.fetch_add(n, Ordering::SeqCst);
                                    }
                                    Err(e) => match on_scrap_error {
                                        OnError::SkipAndLog => {
                                            log::error!("Skipping page: {e}");
                                        }
                                        OnError::Fail => {
                                            failed.store(true, Ordering::SeqCst);
                                            return Err(e);
                                        }
                                    },
                                }
                                pages_out.fetch_add(1, Ordering::SeqCst);
                            } else {
                                break
                            }
                        },
                        recv(rx_stop) -> _ => break
                    }
                }
                Ok::<(), Error>(())
            })?;
        workers.push(worker);
    }
    drop(tx_item);
    let workers = async move {
        tokio::task::spawn_blocking(|| {
            for w in workers {
                w.join().map_err(|_| anyhow!("Worker thread panicked"))??;
            }
            Ok::<(), Error>(())
        })
        .await?
    };

    // Downloader

    let delay = crawler_conf.delay();
    let on_dl_error = crawler_conf.on_dl_error;
    let client = &client;
    let downloader = async move {
        let fetched = UnboundedReceiverStream::new(rx_url)
            .then(move |request| async move {
                if let Some(delay) = delay {
                    sleep(delay).await;
                }
                request
            })
            .map(|request| async move {
                let result = download(client, &request).await;
                Fetched { request, result }
            })
            .buffer_unordered(crawler_conf.concurrent_downloads);
        let mut fetched = Box::pin(fetched);

        while let Some(page) = fetched.next().await {
            if let Err(e) = &page.result {
                match on_dl_error {
                    OnError::SkipAndLog => log::warn!("Download failed: {e}"),
                    OnError::Fail => return Err(anyhow!("Download failed: {e}")),
                }
            }
            if tx_page.send(page).is_err() {
                break;
            }
        }

        Ok::<(), Error>(())
    };

    // Seed

    let spider = <T as Spider>::new(spider_conf)?;
    let name = spider.name();
    let seed: Pin<Box<dyn Future<Output = Result<()>>>> = {
        let requests = spider.start_requests()?;
        log::info!("Starting {name} with {} request(s)", requests.len());
        requests.into_iter().for_each(|r| tx_url.send(r));
        drop(tx_url);
        Box::pin(async move { Ok(()) })
    };

    // Run all tasks

    let handle_sigint = crawler_conf.handle_sigint;
    let num_workers = crawler_conf.num_workers;
    let items_done = items_out.clone();
    let done = Box::pin(async move {
        loop {
            if handle_sigint {
                if timeout(DONE_POLL, tokio::signal::ctrl_c()).await.is_ok() {
                    for _ in 0..num_workers {
                        tx_stop.send(()).ok();
                    }
                    return Err::<(), _>(anyhow!("Interrupted"));
                }
            } else {
                sleep(DONE_POLL).await;
            }

            if failed.load(Ordering::SeqCst) {
                for _ in 0..num_workers {
                    tx_stop.send(()).ok();
                }
                return Err(anyhow!("Crawl aborted after a page error"));
            }

            if pages_out.load(Ordering::SeqCst) == pages_in.load(Ordering::SeqCst) {
                for _ in 0..num_workers {
                    tx_stop.send(()).ok();
                }
                return Ok::<_, Error>(());
            }
        }
    });

    let res = try_join!(workers, downloader, seed, done);
    log::info!(
        "Finished {name}: {} item(s) scraped",
        items_done.load(Ordering::SeqCst)
    );
    res?;

    Ok(())
}
