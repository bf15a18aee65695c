use url::Url;
use wildsearch_crawler::{crawl_site, CrawlerConfig, OnError, Output, Request, Response, Spider};

// Nothing listens on port 1, downloads fail right away
const UNREACHABLE: &str = "http://127.0.0.1:1/page";

#[derive(Debug)]
enum Step {
    Page,
}

struct UnreachableSpider;

impl Spider for UnreachableSpider {
    type Config = ();
    type Callback = Step;
    type Item = String;

    fn new(_config: &Self::Config) -> anyhow::Result<Self> {
        Ok(Self)
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }

    fn start_requests(&self) -> anyhow::Result<Vec<Request<Step>>> {
        Ok(vec![
            Request::new(UNREACHABLE, Step::Page)?,
            Request::new(UNREACHABLE, Step::Page)?,
        ])
    }

    fn parse(&self, response: &Response, _callback: Step) -> anyhow::Result<Output<Step, String>> {
        let mut output = Output::new();
        output.item(response.text().to_string());
        Ok(output)
    }

    fn on_error(&self, url: &Url, _callback: Step, _error: &anyhow::Error) -> Output<Step, String> {
        let mut output = Output::new();
        output.item(format!("failed {url}"));
        output
    }
}

fn config() -> CrawlerConfig {
    CrawlerConfig {
        num_workers: 2,
        request_timeout: 5,
        handle_sigint: false,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_download_goes_to_errback() {
    let (tx_item, rx_item) = crossbeam_channel::unbounded();

    crawl_site::<UnreachableSpider>(&config(), &(), tx_item)
        .await
        .unwrap();

    // the duplicate start request is filtered
    let items: Vec<_> = rx_item.try_iter().collect();
    assert_eq!(items, vec![format!("failed {UNREACHABLE}")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_download_aborts_when_failing() {
    let crawler_conf = CrawlerConfig {
        on_dl_error: OnError::Fail,
        ..config()
    };
    let (tx_item, _rx_item) = crossbeam_channel::unbounded();

    let res = crawl_site::<UnreachableSpider>(&crawler_conf, &(), tx_item).await;
    assert!(res.is_err());
}
