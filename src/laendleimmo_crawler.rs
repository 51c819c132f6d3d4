//! Crawler for laendleimmo.at search result pages.

use crate::crawler::Crawler;
use crate::error::CrawlError;
use crate::models::Expose;
use rand::Rng;
use regex::Regex;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const BASE_URL: &str = "https://www.laendleimmo.at";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const NAME: &str = "Laendleimmo";
/// Upper bound on pages when no limit is given.
const PAGE_LIMIT: usize = 20;
const POLITE_DELAY_MS: u64 = 500;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://(www\.)?laendleimmo\.at/").expect("valid regex"));
static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\d+)/?(?:[?#].*)?$").expect("valid regex"));
static PRICE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"€\s*\d[\d.,]*|\d[\d.,]*\s*€").expect("valid regex")
});
static SIZE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d.,]*\s*m²").expect("valid regex"));
static ROOMS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)\s*Zimmer").expect("valid regex"));

static CARD_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("article, div.property-card").expect("valid selector"));
static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='/immobilien/']").expect("valid selector"));
static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2, h3, .title").expect("valid selector"));
static IMAGE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src]").expect("valid selector"));
static JSON_LD_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script[type='application/ld+json']").expect("valid selector")
});
static LOCATION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".px-8.py-4.text-lg.uppercase").expect("valid selector"));

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn absolute_url(href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{}{}", BASE_URL, href)
    }
}

fn page_url(url: &str, page: usize) -> String {
    if page == 1 {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&page={}", url, page)
    } else {
        format!("{}?page={}", url, page)
    }
}

/// Turns one listing card into an expose. The address is the detail URL and
/// gets resolved later, once the expose turned out to be interesting.
fn parse_card(card: ElementRef<'_>) -> Option<Expose> {
    let link = card.select(&LINK_SELECTOR).find(|a| {
        a.value()
            .attr("href")
            .is_some_and(|href| href.contains("/vorarlberg/"))
    })?;
    let url = absolute_url(link.value().attr("href")?);
    let id = ID_REGEX.captures(&url)?.get(1)?.as_str().parse().ok()?;

    let title = card
        .select(&TITLE_SELECTOR)
        .next()
        .map(text_of)
        .unwrap_or_else(|| text_of(link));
    let text = text_of(card);
    let find = |regex: &Regex| regex.find(&text).map(|m| m.as_str().to_string());

    Some(Expose {
        id,
        title,
        price: find(&*PRICE_REGEX).unwrap_or_default(),
        size: find(&*SIZE_REGEX).unwrap_or_default(),
        rooms: ROOMS_REGEX
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        address: url.clone(),
        image: card
            .select(&IMAGE_SELECTOR)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(absolute_url),
        url,
        crawler: NAME.to_string(),
        available_from: None,
        durations: None,
    })
}

/// All exposes on a search result page, in page order, without duplicates.
pub fn parse_listing_page(body: &str) -> Vec<Expose> {
    let document = Html::parse_document(body);
    let mut exposes: Vec<Expose> = Vec::new();
    for expose in document.select(&CARD_SELECTOR).filter_map(parse_card) {
        if !exposes.iter().any(|e| e.id == expose.id) {
            exposes.push(expose);
        }
    }
    exposes
}

fn address_from_json_ld(json: &serde_json::Value) -> Option<String> {
    let address = if json["location"]["address"].is_object() {
        &json["location"]["address"]
    } else {
        &json["address"]
    };
    let street = address["streetAddress"].as_str().unwrap_or("").trim();
    let locality = address["addressLocality"].as_str().unwrap_or("").trim();
    match (street.is_empty(), locality.is_empty()) {
        (false, false) => Some(format!("{}, {}", street, locality)),
        (false, true) => Some(street.to_string()),
        (true, false) => Some(locality.to_string()),
        (true, true) => None,
    }
}

/// Street address from a detail page: JSON-LD first, then the location header.
pub fn parse_address(body: &str) -> Option<String> {
    let document = Html::parse_document(body);

    let from_json_ld = document
        .select(&JSON_LD_SELECTOR)
        .map(|script| script.text().collect::<String>())
        .filter_map(|json| serde_json::from_str::<serde_json::Value>(&json).ok())
        .find_map(|json| address_from_json_ld(&json));
    if from_json_ld.is_some() {
        return from_json_ld;
    }

    let location = text_of(document.select(&LOCATION_SELECTOR).next()?);
    let street = match location.rfind(',') {
        Some(comma) => location[comma + 1..].trim(),
        None => location.trim(),
    };
    (!street.is_empty()).then(|| street.to_string())
}

fn looks_like_captcha(status: u16, body: &str) -> bool {
    (status == 403 || status == 429) && body.to_lowercase().contains("captcha")
}

pub struct LaendleimmoCrawler {
    client: Client,
}

impl LaendleimmoCrawler {
    pub fn new() -> Result<Self, CrawlError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    fn fetch(&self, url: &str) -> Result<String, CrawlError> {
        debug!(url, "Fetching page");
        let response = self.client.get(url).send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        if looks_like_captcha(status, &body) {
            return Err(CrawlError::Captcha {
                url: url.to_string(),
            });
        }
        if !(200..300).contains(&status) {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(body)
    }

    fn polite_delay(&self) {
        let jitter = rand::thread_rng().gen_range(0..POLITE_DELAY_MS);
        thread::sleep(Duration::from_millis(POLITE_DELAY_MS + jitter));
    }
}

impl Crawler for LaendleimmoCrawler {
    fn name(&self) -> &str {
        NAME
    }

    fn url_pattern(&self) -> &Regex {
        &URL_PATTERN
    }

    fn crawl(&self, url: &str, max_pages: Option<usize>) -> Result<Vec<Expose>, CrawlError> {
        let pages = max_pages.unwrap_or(PAGE_LIMIT).max(1);
        let mut exposes: Vec<Expose> = Vec::new();

        for page in 1..=pages {
            if page > 1 {
                self.polite_delay();
            }
            let found = parse_listing_page(&self.fetch(&page_url(url, page))?);
            if found.is_empty() {
                debug!(page, "No exposes on page, stopping");
                break;
            }
            let before = exposes.len();
            for expose in found {
                if !exposes.iter().any(|e| e.id == expose.id) {
                    exposes.push(expose);
                }
            }
            // the site repeats the last page for out-of-range page numbers
            if exposes.len() == before {
                break;
            }
        }

        info!(url, count = exposes.len(), "Found exposes on laendleimmo.at");
        Ok(exposes)
    }

    fn load_address(&self, url: &str) -> Result<Option<String>, CrawlError> {
        let body = self.fetch(url)?;
        Ok(parse_address(&body))
    }
}
