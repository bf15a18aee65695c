use url::Url;
use wildsearch_crawler::{Output, Request, Response, Spider, Yielded};
use wildsearch_spiders::geo::Coords;
use wildsearch_spiders::productcenter::{Callback, CategoryRef};
use wildsearch_spiders::{ProducerRecord, ProductcenterConfig, ProductcenterSpider};

const FRONT: &str = r#"
<html><body>
<div class="hcm_producers"><ul>
  <li><a href="/producers">Все производители</a>
    <ul>
      <li><a href="/producers/c-food">Продукты питания</a></li>
      <li><a href="https://productcenter.ru/producers/c-textile?sort=1">Текстиль</a></li>
    </ul>
  </li>
</ul></div>
</body></html>
"#;

const CATEGORY: &str = r#"
<html><body>
<h1>Продукты питания</h1>
<div id="content"><div class="items">
  <div class="item">
    <a class="link" href="/producers/1/romashka">Ромашка</a>
    <a title="Все товары производителя" href="/products/1">1 234 товара</a>
  </div>
  <div class="item">
    <a class="link" href="/producers/2/vasilek">Василек</a>
  </div>
</div></div>
<div class="page_links"><a href="?page=1">1</a><a href="?page=3">3</a></div>
</body></html>
"#;

const PRODUCER: &str = r#"
<html><head>
<link rel="canonical" href="https://productcenter.ru/producers/1/romashka">
</head><body>
<h1 class="cfix">ООО Ромашка</h1>
<div id="box_description"><div class="box_text"><p>Производим <b>чай</b></p></div></div>
<span itemprop="telephone">+7 (495) 000-00-00</span>
<span itemprop="email">info@romashka.ru</span>
<a id="producer_link">romashka.ru</a>
<span itemprop="addressRegion">Москва</span>
<span itemprop="addressLocality">г. Москва</span>
<span itemprop="streetAddress">ул. Ленина, 1</span>
<a class="fancybox" data-fancybox-group="producer" href="/images/logo.png?v=1"></a>
<div id="box_files">
  <a href="/files/price.xls">Прайс</a>
  <a href="/files/price.xls">Прайс</a>
  <a href="http://cdn.productcenter.ru/files/b.pdf">Каталог</a>
</div>
<script>ymaps.ready(function () { var map = {coordinates: [59.93, 30.34], zoom: 12}; });</script>
</body></html>
"#;

fn split<C, I>(output: Output<C, I>) -> (Vec<Request<C>>, Vec<I>) {
    let mut requests = vec![];
    let mut items = vec![];
    for yielded in output {
        match yielded {
            Yielded::Request(r) => requests.push(r),
            Yielded::Item(i) => items.push(i),
        }
    }
    (requests, items)
}

fn response(url: &str, body: &str) -> Response {
    Response::new(Url::parse(url).unwrap(), body)
}

fn spider(config: ProductcenterConfig) -> ProductcenterSpider {
    ProductcenterSpider::new(&config).unwrap()
}

fn food() -> CategoryRef {
    CategoryRef {
        url: "https://productcenter.ru/producers/c-food".into(),
        name: Some("Продукты питания".into()),
    }
}

#[test]
fn front_menu_with_region() {
    let spider = spider(ProductcenterConfig {
        only_region: Some("r-moscow".into()),
        ..Default::default()
    });
    let output = spider
        .parse(&response("https://productcenter.ru/", FRONT), Callback::Front)
        .unwrap();
    let (requests, items) = split(output);

    assert!(items.is_empty());
    let urls: Vec<_> = requests.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://productcenter.ru/producers/r-moscow/c-food",
            "https://productcenter.ru/producers/r-moscow/c-textile",
        ]
    );
    assert_eq!(
        requests[0].callback,
        Callback::Category(Some(CategoryRef {
            url: "https://productcenter.ru/producers/r-moscow/c-food".into(),
            name: Some("Продукты питания".into()),
        }))
    );
}

#[test]
fn category_cards_and_pagination() {
    let spider = spider(ProductcenterConfig::default());
    let output = spider
        .parse(
            &response("https://productcenter.ru/producers/c-food?page=2", CATEGORY),
            Callback::Category(None),
        )
        .unwrap();
    let (requests, items) = split(output);

    assert!(items.is_empty());
    assert_eq!(requests.len(), 3);

    assert_eq!(
        requests[0].url.as_str(),
        "https://productcenter.ru/producers/1/romashka"
    );
    assert_eq!(
        requests[0].callback,
        Callback::Producer {
            category: Some(food()),
            goods_count: Some(1234),
        }
    );
    assert_eq!(
        requests[1].callback,
        Callback::Producer {
            category: Some(food()),
            goods_count: None,
        }
    );

    assert_eq!(
        requests[2].url.as_str(),
        "https://productcenter.ru/producers/c-food?page=3"
    );
    assert_eq!(requests[2].callback, Callback::Category(Some(food())));
}

#[test]
fn producer_details() {
    let spider = spider(ProductcenterConfig {
        office_coords: Some("55.75, 37.61".into()),
        ..Default::default()
    });
    let output = spider
        .parse(
            &response("https://productcenter.ru/producers/1/romashka", PRODUCER),
            Callback::Producer {
                category: Some(food()),
                goods_count: Some(1234),
            },
        )
        .unwrap();
    let (requests, mut items) = split(output);

    assert!(requests.is_empty());
    assert_eq!(items.len(), 1);
    let item: ProducerRecord = items.remove(0);

    assert_eq!(item.producer_name.as_deref(), Some("ООО Ромашка"));
    assert_eq!(item.producer_about.as_deref(), Some("Производим чай"));
    assert_eq!(item.producer_phone.as_deref(), Some("+7 (495) 000-00-00"));
    assert_eq!(item.producer_email.as_deref(), Some("info@romashka.ru"));
    assert_eq!(item.producer_website.as_deref(), Some("romashka.ru"));
    assert_eq!(
        item.producer_address.as_deref(),
        Some("Москва г. Москва ул. Ленина, 1")
    );
    assert_eq!(
        item.producer_logo.as_deref(),
        Some("https://productcenter.ru/images/logo.png")
    );
    assert_eq!(
        item.producer_price_lists,
        vec![
            "https://productcenter.ru/files/price.xls".to_string(),
            "https://productcenter.ru/files/b.pdf".to_string(),
        ]
    );
    assert_eq!(item.producer_coords, Some(Coords::new(59.93, 30.34)));
    assert_eq!(item.producer_distance, Some(634.27));
    assert_eq!(item.category_name.as_deref(), Some("Продукты питания"));
    assert_eq!(
        item.category_url.as_deref(),
        Some("https://productcenter.ru/producers/c-food")
    );
    assert_eq!(item.producer_goods_count, Some(1234));
    assert_eq!(item.producer_rating, None);
    assert_eq!(item.producer_url, "https://productcenter.ru/producers/1/romashka");
    assert!(!item.parse_date.is_empty());
}

#[test]
fn no_distance_without_office() {
    let spider = spider(ProductcenterConfig::default());
    let output = spider
        .parse(
            &response("https://productcenter.ru/producers/1/romashka", PRODUCER),
            Callback::Producer {
                category: None,
                goods_count: None,
            },
        )
        .unwrap();
    let (_, items) = split(output);

    assert_eq!(items[0].producer_distance, None);
    assert_eq!(items[0].category_url, None);
}

#[test]
fn canonical_mismatch_refetches() {
    let spider = spider(ProductcenterConfig::default());
    let page = PRODUCER.replace(
        r#"href="https://productcenter.ru/producers/1/romashka""#,
        r#"href="https://productcenter.ru/producers/1/romashka-new?from=list""#,
    );
    let callback = Callback::Producer {
        category: Some(food()),
        goods_count: Some(3),
    };
    let output = spider
        .parse(
            &response("https://productcenter.ru/producers/1/romashka", &page),
            callback.clone(),
        )
        .unwrap();
    let (requests, items) = split(output);

    assert!(items.is_empty());
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].url.as_str(),
        "https://productcenter.ru/producers/1/romashka-new"
    );
    assert_eq!(requests[0].callback, callback);
}

#[test]
fn missing_coordinates_is_a_page_error() {
    let spider = spider(ProductcenterConfig::default());
    let page = PRODUCER.replace("coordinates: [59.93, 30.34]", "center: null");
    let result = spider.parse(
        &response("https://productcenter.ru/producers/1/romashka", &page),
        Callback::Producer {
            category: None,
            goods_count: None,
        },
    );

    assert!(result.is_err());
}
