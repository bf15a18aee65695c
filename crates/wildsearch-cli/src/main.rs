use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgGroup, CommandFactory, Parser};
use clap_complete::{generate, Shell};
use tokio::runtime;
use url::Url;
use wildsearch_crawler::{crawl_site, CrawlerConfig, OnError, Response, Spider, Yielded};
use wildsearch_spiders::productcenter::{self, ProductcenterConfig, ProductcenterSpider};
use wildsearch_spiders::wildberries::{self, ProductContext, WildberriesConfig, WildberriesSpider};
use wildsearch_spiders::writer::{spawn_writer, FileMode, Format, RecordWriter};
use wildsearch_spiders::Record;

const DEFAULT_LOG_FILTER: &str = "wildsearch_spiders=info,wildsearch_crawler=warn";

/// Producer and product crawlers for productcenter.ru and wildberries.ru
#[derive(Debug, Parser)]
#[command(name = "wildsearch", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum SubCommand {
    /// Crawl a site and write the scraped records
    #[command(subcommand)]
    Crawl(CrawlSpider),
    /// Scrap a single detail page and print its records as JSON lines
    #[command(subcommand)]
    Scrap(ScrapSpider),
    #[command(hide = true)]
    Completion,
}

#[derive(Debug, clap::Subcommand)]
pub enum CrawlSpider {
    /// Producers of productcenter.ru
    Productcenter {
        #[command(flatten)]
        spider: ProductcenterArgs,
        #[command(flatten)]
        crawl: CrawlArgs,
    },
    /// Products of wildberries.ru
    Wb {
        #[command(flatten)]
        spider: WildberriesArgs,
        #[command(flatten)]
        crawl: CrawlArgs,
    },
}

#[derive(Debug, clap::Args)]
pub struct ProductcenterArgs {
    /// Start from this category listing
    #[arg(long)]
    pub category_url: Option<String>,
    /// Start from this producer page
    #[arg(long)]
    pub producer_url: Option<String>,
    /// Only crawl producers of this region, e.g. r-moscow
    #[arg(long)]
    pub only_region: Option<String>,
    /// Office coordinates as "lat, lon", adds the distance to each producer
    #[arg(long)]
    pub office_coords: Option<String>,
}

impl From<&ProductcenterArgs> for ProductcenterConfig {
    fn from(args: &ProductcenterArgs) -> Self {
        Self {
            category_url: args.category_url.clone(),
            producer_url: args.producer_url.clone(),
            only_region: args.only_region.clone(),
            office_coords: args.office_coords.clone(),
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct WildberriesArgs {
    /// Comma separated category URLs to start from
    #[arg(long)]
    pub category_url: Option<String>,
    /// Comma separated product URLs to start from
    #[arg(long)]
    pub good_url: Option<String>,
    /// Start from the sitemap instead of the main menu
    #[arg(long)]
    pub use_sitemap: bool,
    /// Emit records from category listings without visiting products
    #[arg(long)]
    pub skip_details: bool,
    #[arg(long)]
    pub skip_images: bool,
    /// Don't follow the variants of a product
    #[arg(long)]
    pub skip_variants: bool,
    /// Visit a product again when it is listed under another position
    #[arg(long)]
    pub allow_dupes: bool,
}

impl From<&WildberriesArgs> for WildberriesConfig {
    fn from(args: &WildberriesArgs) -> Self {
        Self {
            category_urls: args.category_url.clone(),
            good_urls: args.good_url.clone(),
            use_sitemap: args.use_sitemap,
            skip_details: args.skip_details,
            skip_images: args.skip_images,
            skip_variants: args.skip_variants,
            allow_dupes: args.allow_dupes,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct CrawlArgs {
    /// Path to the output file that will contain scraped records, stdout if absent
    #[arg(long, short)]
    pub output_file: Option<PathBuf>,
    #[arg(value_enum, long, default_value_t = Format::Csv)]
    pub format: Format,
    /// How to open the output file
    #[arg(value_enum, long, default_value_t = FileMode::Create)]
    pub file_mode: FileMode,
    /// Optional default crawler yaml configuration file
    #[arg(env = "WILDSEARCH_CRAWLER_CONFIG", long)]
    pub crawler_config: Option<PathBuf>,
    /// Override crawler's user agent
    #[arg(long)]
    pub user_agent: Option<String>,
    /// Override crawler's page buffer size
    #[arg(long)]
    pub page_buffer: Option<usize>,
    /// Override crawler's maximum concurrent page downloads
    #[arg(long)]
    pub concurrent_downloads: Option<usize>,
    /// Override crawler's number of CPU workers used to parse pages
    #[arg(long)]
    pub num_workers: Option<usize>,
    /// Override crawler's delay in seconds between two downloads
    #[arg(long)]
    pub download_delay: Option<f32>,
    /// Override crawler's request timeout in seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,
    /// No SIGINT handling
    #[arg(long)]
    pub no_sigint: bool,
    /// Override crawler's download error handling strategy
    #[arg(value_enum, long)]
    pub on_dl_error: Option<OnError>,
    /// Override crawler's scrap error handling strategy
    #[arg(value_enum, long)]
    pub on_scrap_error: Option<OnError>,
    /// When quiet no logs are outputted
    #[arg(long, short)]
    pub quiet: bool,
}

impl TryFrom<&CrawlArgs> for CrawlerConfig {
    type Error = anyhow::Error;

    fn try_from(args: &CrawlArgs) -> Result<Self, Self::Error> {
        let mut conf = if let Some(file) = args.crawler_config.as_ref().map(File::open) {
            serde_yaml::from_reader(file?)?
        } else {
            CrawlerConfig::default()
        };
        if let Some(user_agent) = &args.user_agent {
            conf.user_agent = user_agent.to_string();
        }
        if let Some(page_buffer) = args.page_buffer {
            conf.page_buffer = page_buffer;
        }
        if let Some(concurrent_downloads) = args.concurrent_downloads {
            conf.concurrent_downloads = concurrent_downloads;
        }
        if let Some(num_workers) = args.num_workers {
            conf.num_workers = num_workers;
        }
        if let Some(download_delay) = args.download_delay {
            conf.download_delay = Some(download_delay);
        }
        if let Some(request_timeout) = args.request_timeout {
            conf.request_timeout = request_timeout;
        }
        if let Some(on_dl_error) = args.on_dl_error {
            conf.on_dl_error = on_dl_error;
        }
        if let Some(on_scrap_error) = args.on_scrap_error {
            conf.on_scrap_error = on_scrap_error;
        }
        if args.no_sigint {
            conf.handle_sigint = false;
        }
        conf.validate()?;
        Ok(conf)
    }
}

pub fn crawl<T>(spider_conf: &T::Config, args: &CrawlArgs) -> anyhow::Result<()>
where
    T: Spider + 'static,
    T::Item: Record,
{
    let crawler_conf: CrawlerConfig = args.try_into()?;

    let wtr = match &args.output_file {
        Some(path) => RecordWriter::to_file(path, args.format, args.file_mode)?,
        None => RecordWriter::to_stdout(args.format),
    };
    let (tx_item, rx_item) = crossbeam_channel::unbounded::<T::Item>();
    let writer = spawn_writer(wtr, rx_item);

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let res = rt.block_on(crawl_site::<T>(&crawler_conf, spider_conf, tx_item));

    let written = writer
        .join()
        .map_err(|_| anyhow!("Record writer thread panicked"))?;
    log::info!("Wrote {written} record(s)");
    res
}

#[derive(Debug, clap::Subcommand)]
pub enum ScrapSpider {
    /// A producer page of productcenter.ru
    Productcenter {
        #[command(flatten)]
        page: PageArgs,
        /// Office coordinates as "lat, lon", adds the distance to the producer
        #[arg(long)]
        office_coords: Option<String>,
    },
    /// A product page of wildberries.ru
    Wb {
        #[command(flatten)]
        page: PageArgs,
        #[arg(long)]
        skip_images: bool,
    },
}

#[derive(Debug, clap::Args)]
#[command(group = ArgGroup::new("page").required(true))]
pub struct PageArgs {
    /// A local html page to scrap
    #[arg(group = "page", long)]
    pub file: Option<PathBuf>,
    /// A distant html page to scrap
    #[arg(group = "page", long)]
    pub url: Option<String>,
    /// URL the local page was saved from
    #[arg(long, required_unless_present = "url")]
    pub page_url: Option<String>,
    /// Custom user agent to download the page
    #[arg(long, conflicts_with = "file")]
    pub ua: Option<String>,
}

impl PageArgs {
    pub fn response(&self) -> anyhow::Result<Response> {
        if let Some(url) = &self.url {
            let mut builder = reqwest::blocking::ClientBuilder::new();
            if let Some(ua) = &self.ua {
                builder = builder.user_agent(ua);
            }
            let client = builder.build()?;
            let resp = client.get(url).send()?.error_for_status()?;
            let final_url = resp.url().clone();
            let mut response = Response::new(final_url, resp.text()?);
            response.request_url = Url::parse(url)?;
            Ok(response)
        } else if let Some(path) = &self.file {
            let page_url = self
                .page_url
                .as_deref()
                .ok_or_else(|| anyhow!("Missing `page-url` for {}", path.display()))?;
            Ok(Response::new(Url::parse(page_url)?, fs::read_to_string(path)?))
        } else {
            anyhow::bail!("Missing `url` or `file`");
        }
    }
}

/// Runs one parse step offline, requests it yields are handed to the errback.
pub fn scrap_page<T>(
    spider_conf: &T::Config,
    response: &Response,
    callback: T::Callback,
) -> anyhow::Result<()>
where
    T: Spider,
    T::Item: Record,
{
    let spider = T::new(spider_conf)?;
    let mut items = vec![];
    for yielded in spider.parse(response, callback)? {
        match yielded {
            Yielded::Item(item) => items.push(item),
            Yielded::Request(request) => {
                log::info!("Not following {}", request.url);
                let not_fetched = anyhow!("Pages are not followed when scraping");
                for yielded in spider.on_error(&request.url, request.callback, &not_fetched) {
                    if let Yielded::Item(item) = yielded {
                        items.push(item);
                    }
                }
            }
        }
    }

    let mut wtr = RecordWriter::to_stdout(Format::Jsonl);
    for item in &items {
        wtr.write(item)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn scrap(spider: ScrapSpider) -> anyhow::Result<()> {
    match spider {
        ScrapSpider::Productcenter {
            page,
            office_coords,
        } => {
            let conf = ProductcenterConfig {
                office_coords,
                ..Default::default()
            };
            let callback = productcenter::Callback::Producer {
                category: None,
                goods_count: None,
            };
            scrap_page::<ProductcenterSpider>(&conf, &page.response()?, callback)
        }
        ScrapSpider::Wb { page, skip_images } => {
            let conf = WildberriesConfig {
                skip_images,
                skip_variants: true,
                ..Default::default()
            };
            let callback = wildberries::Callback::Product(ProductContext::default());
            scrap_page::<WildberriesSpider>(&conf, &page.response()?, callback)
        }
    }
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER))
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.cmd {
        SubCommand::Crawl(CrawlSpider::Productcenter { spider, crawl }) => {
            if !crawl.quiet {
                init_logger();
            }
            let conf = ProductcenterConfig::from(&spider);
            conf.validate()?;
            self::crawl::<ProductcenterSpider>(&conf, &crawl)
        }
        SubCommand::Crawl(CrawlSpider::Wb { spider, crawl }) => {
            if !crawl.quiet {
                init_logger();
            }
            let conf = WildberriesConfig::from(&spider);
            conf.validate()?;
            self::crawl::<WildberriesSpider>(&conf, &crawl)
        }
        SubCommand::Scrap(spider) => {
            init_logger();
            scrap(spider)
        }
        SubCommand::Completion => {
            generate(Shell::Bash, &mut Args::command(), "wildsearch", &mut io::stdout());
            Ok(())
        }
    }
}
