use crate::error::CrawlError;
use crate::models::Expose;
use crate::processor::ExposeStream;
use regex::Regex;
use tracing::{info, warn};

/// A listing site adapter.
pub trait Crawler: Send + Sync {
    fn name(&self) -> &str;

    /// Search URLs this crawler is responsible for.
    fn url_pattern(&self) -> &Regex;

    fn matches(&self, url: &str) -> bool {
        self.url_pattern().is_match(url)
    }

    /// Loads the exposes listed under `url`, following up to `max_pages` result pages.
    fn crawl(&self, url: &str, max_pages: Option<usize>) -> Result<Vec<Expose>, CrawlError>;

    /// Resolves the address of an expose whose `address` field is a URL.
    fn load_address(&self, _url: &str) -> Result<Option<String>, CrawlError> {
        Ok(None)
    }
}

/// Lazily crawls every URL with every crawler whose pattern matches it.
///
/// A failing (crawler, url) pair is logged and contributes nothing; the other
/// pairs still run.
pub fn crawl_for_exposes<'a>(
    crawlers: &'a [Box<dyn Crawler>],
    urls: &'a [String],
    max_pages: Option<usize>,
) -> ExposeStream<'a> {
    Box::new(crawlers.iter().flat_map(move |crawler| {
        urls.iter()
            .filter(move |url| crawler.matches(url))
            .flat_map(move |url| crawl_one(crawler.as_ref(), url, max_pages))
            .map(Ok)
    }))
}

fn crawl_one(crawler: &dyn Crawler, url: &str, max_pages: Option<usize>) -> Vec<Expose> {
    match crawler.crawl(url, max_pages) {
        Ok(exposes) => {
            info!(crawler = crawler.name(), url = %url, count = exposes.len(), "Crawled exposes");
            exposes
        }
        Err(CrawlError::Captcha { .. }) => {
            warn!(
                crawler = crawler.name(),
                url = %url,
                "Captcha unsolvable, skipping source this cycle"
            );
            Vec::new()
        }
        Err(e) => {
            warn!(crawler = crawler.name(), url = %url, error = %e, "Crawl failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubCrawler {
        name: &'static str,
        pattern: Regex,
        outcome: fn(&str) -> Result<Vec<Expose>, CrawlError>,
        calls: Arc<AtomicUsize>,
    }

    impl Crawler for StubCrawler {
        fn name(&self) -> &str {
            self.name
        }

        fn url_pattern(&self) -> &Regex {
            &self.pattern
        }

        fn crawl(&self, url: &str, _max_pages: Option<usize>) -> Result<Vec<Expose>, CrawlError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(url)
        }
    }

    fn expose(id: i64, url: &str) -> Expose {
        Expose {
            id,
            url: url.to_string(),
            title: "Wohnung".to_string(),
            price: "800 €".to_string(),
            size: "60 m²".to_string(),
            rooms: "2".to_string(),
            address: "Dorfstraße 1".to_string(),
            image: None,
            crawler: "Stub".to_string(),
            available_from: None,
            durations: None,
        }
    }

    fn two_results(url: &str) -> Result<Vec<Expose>, CrawlError> {
        Ok(vec![expose(1, url), expose(2, url)])
    }

    fn captcha(url: &str) -> Result<Vec<Expose>, CrawlError> {
        Err(CrawlError::Captcha {
            url: url.to_string(),
        })
    }

    fn stub(
        name: &'static str,
        pattern: &str,
        outcome: fn(&str) -> Result<Vec<Expose>, CrawlError>,
    ) -> Box<dyn Crawler> {
        Box::new(StubCrawler {
            name,
            pattern: Regex::new(pattern).unwrap(),
            outcome,
            calls: Arc::default(),
        })
    }

    #[test]
    fn routes_urls_to_matching_crawlers() {
        let crawlers = vec![
            stub("a", r"https://a\.example", two_results),
            stub("b", r"https://b\.example", two_results),
        ];
        let urls = vec![
            "https://a.example/search".to_string(),
            "https://c.example/search".to_string(),
        ];

        let exposes: Vec<Expose> = crawl_for_exposes(&crawlers, &urls, None)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(exposes.len(), 2);
        assert!(exposes.iter().all(|e| e.url == "https://a.example/search"));
    }

    #[test]
    fn failing_source_does_not_abort_others() {
        let crawlers = vec![
            stub("blocked", r"example", captcha),
            stub("ok", r"example", two_results),
        ];
        let urls = vec![
            "https://a.example/search".to_string(),
            "https://b.example/search".to_string(),
        ];

        let exposes: Vec<Expose> = crawl_for_exposes(&crawlers, &urls, Some(1))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(exposes.len(), 4);
    }

    #[test]
    fn crawling_starts_only_when_pulled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let crawler = StubCrawler {
            name: "lazy",
            pattern: Regex::new("example").unwrap(),
            outcome: two_results,
            calls: Arc::clone(&calls),
        };
        let crawlers: Vec<Box<dyn Crawler>> = vec![Box::new(crawler)];
        let urls = vec![
            "https://a.example/1".to_string(),
            "https://a.example/2".to_string(),
        ];

        let mut stream = crawl_for_exposes(&crawlers, &urls, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        stream.next().unwrap().unwrap();
        stream.next().unwrap().unwrap();
        // both exposes came from the first url
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
