use wildsearch_crawler::{
    crawl_site, CrawlerConfig, Output, Request, Response, Spider,
};

struct DummySpider;

impl Spider for DummySpider {
    type Config = ();
    type Callback = ();
    type Item = String;

    fn new(_config: &Self::Config) -> anyhow::Result<Self>
    where
        Self: Sized,
    {
        Ok(Self)
    }

    fn name(&self) -> &'static str {
        "dummy"
    }

    fn start_requests(&self) -> anyhow::Result<Vec<Request<()>>> {
        Ok(vec![])
    }

    fn parse(&self, response: &Response, _callback: ()) -> anyhow::Result<Output<(), String>> {
        let mut output = Output::new();
        output.item(response.text().to_string());
        Ok(output)
    }
}

#[tokio::test]
#[should_panic(expected = "Invalid crawler config, `numWorkers` must be at least 1")]
async fn validate_num_workers() {
    let crawler_conf = CrawlerConfig {
        num_workers: 0,
        ..Default::default()
    };
    let (tx_item, _rx_item) = crossbeam_channel::unbounded();

    crawl_site::<DummySpider>(&crawler_conf, &(), tx_item)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn no_start_requests_terminates() {
    let crawler_conf = CrawlerConfig {
        num_workers: 1,
        handle_sigint: false,
        ..Default::default()
    };
    let (tx_item, rx_item) = crossbeam_channel::unbounded();

    crawl_site::<DummySpider>(&crawler_conf, &(), tx_item)
        .await
        .unwrap();

    assert!(rx_item.try_recv().is_err());
}
