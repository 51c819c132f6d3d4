use laendlehunter::config::{Config, FilterConfig};
use laendlehunter::crawler::Crawler;
use chrono::{DateTime, Utc};
use laendlehunter::error::{CrawlError, NotifyError, StorageError};
use laendlehunter::filter::Filter;
use laendlehunter::hunter::Hunter;
use laendlehunter::models::{Expose, StoredExpose};
use laendlehunter::notifier::{ChatSender, Notifier};
use laendlehunter::storage::{SqliteStorage, Storage, StorageResult, UserSettings};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::sync::{Arc, Mutex};

const TEST_URL: &str = "https://www.example-immo.at/suche";

struct DummyCrawler {
    pattern: Regex,
    exposes: Vec<Expose>,
}

impl DummyCrawler {
    fn new(exposes: Vec<Expose>) -> Self {
        Self {
            pattern: Regex::new(r"https://www\.example-immo\.at/").unwrap(),
            exposes,
        }
    }
}

impl Crawler for DummyCrawler {
    fn name(&self) -> &str {
        "Dummy"
    }

    fn url_pattern(&self) -> &Regex {
        &self.pattern
    }

    fn crawl(&self, _url: &str, _max_pages: Option<usize>) -> Result<Vec<Expose>, CrawlError> {
        Ok(self.exposes.clone())
    }
}

struct CaptchaCrawler {
    pattern: Regex,
}

impl Crawler for CaptchaCrawler {
    fn name(&self) -> &str {
        "Captcha"
    }

    fn url_pattern(&self) -> &Regex {
        &self.pattern
    }

    fn crawl(&self, url: &str, _max_pages: Option<usize>) -> Result<Vec<Expose>, CrawlError> {
        Err(CrawlError::Captcha {
            url: url.to_string(),
        })
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingChats {
    sent: Arc<Mutex<Vec<i64>>>,
}

impl ChatSender for RecordingChats {
    fn send_to(&self, chat_id: i64, _message: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(chat_id);
        if chat_id == 3 {
            return Err(NotifyError::BotBlocked { receiver: chat_id });
        }
        Ok(())
    }
}

/// SQLite storage whose expose writes fail.
struct FailingStorage {
    inner: SqliteStorage,
}

impl Storage for FailingStorage {
    fn is_processed(&self, expose_id: i64) -> StorageResult<bool> {
        self.inner.is_processed(expose_id)
    }

    fn mark_processed(&self, expose_id: i64) -> StorageResult<()> {
        self.inner.mark_processed(expose_id)
    }

    fn mark_if_unseen(&self, expose_id: i64) -> StorageResult<bool> {
        self.inner.mark_if_unseen(expose_id)
    }

    fn save_expose(&self, _expose: &Expose) -> StorageResult<()> {
        Err(StorageError::LockPoisoned)
    }

    fn get_exposes_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<StoredExpose>> {
        self.inner.get_exposes_since(since)
    }

    fn get_recent_exposes(
        &self,
        count: usize,
        filter: Option<&Filter<'_>>,
    ) -> anyhow::Result<Vec<StoredExpose>> {
        self.inner.get_recent_exposes(count, filter)
    }

    fn get_settings_for_user(&self, user_id: i64) -> StorageResult<Option<UserSettings>> {
        self.inner.get_settings_for_user(user_id)
    }

    fn save_settings_for_user(&self, user_id: i64, settings: &UserSettings) -> StorageResult<()> {
        self.inner.save_settings_for_user(user_id, settings)
    }

    fn get_user_settings(&self) -> StorageResult<Vec<(i64, UserSettings)>> {
        self.inner.get_user_settings()
    }

    fn get_last_run_time(&self) -> StorageResult<Option<DateTime<Utc>>> {
        self.inner.get_last_run_time()
    }

    fn update_last_run_time(&self) -> StorageResult<DateTime<Utc>> {
        self.inner.update_last_run_time()
    }
}

fn expose(id: i64, title: &str, price: i64) -> Expose {
    Expose {
        id,
        url: format!("https://www.example-immo.at/expose/{}", id),
        title: title.to_string(),
        price: format!("{} €", price),
        size: "60 m²".to_string(),
        rooms: "2".to_string(),
        address: "Hauptstraße 1, Dornbirn".to_string(),
        image: None,
        crawler: "Dummy".to_string(),
        available_from: None,
        durations: None,
    }
}

fn config(filters: Option<FilterConfig>) -> Config {
    Config {
        urls: vec![TEST_URL.to_string()],
        filters,
        ..Config::default()
    }
}

fn hunter(
    config: Config,
    crawlers: Vec<Box<dyn Crawler>>,
    storage: Arc<dyn Storage>,
    notifier: &RecordingNotifier,
) -> Hunter {
    let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(notifier.clone())];
    Hunter::new(config, crawlers, storage, notifiers).unwrap()
}

#[test]
fn only_exposes_above_min_price_are_returned() {
    let mut rng = StdRng::seed_from_u64(42);
    let exposes: Vec<Expose> = (1..=30)
        .map(|id| expose(id, &format!("Wohnung {}", id), rng.gen_range(300..=3000)))
        .collect();
    let expected: Vec<i64> = exposes
        .iter()
        .filter(|e| e.price_value().unwrap() >= 700.0)
        .map(|e| e.id)
        .collect();

    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let notifier = RecordingNotifier::default();
    let filters = FilterConfig {
        min_price: Some(700.0),
        ..FilterConfig::default()
    };
    let mut config = config(Some(filters));
    config.message = Some("{price}".to_string());
    let hunter = hunter(
        config,
        vec![Box::new(DummyCrawler::new(exposes))],
        Arc::clone(&storage) as Arc<dyn Storage>,
        &notifier,
    );

    let found = hunter.hunt(None).unwrap();
    assert_eq!(found.iter().map(|e| e.id).collect::<Vec<_>>(), expected);

    // everything is persisted and marked, interesting or not
    let saved = storage.get_recent_exposes(100, None).unwrap();
    assert_eq!(saved.len(), 30);
    assert_eq!(storage.processed_ids().unwrap().len(), 30);

    let saved_above_min = saved
        .iter()
        .filter(|s| s.expose.price_value().unwrap() >= 700.0)
        .count();
    assert_eq!(notifier.count(), saved_above_min);
    let messages = notifier.messages.lock().unwrap();
    for message in messages.iter() {
        let price: f64 = message.trim_end_matches(" €").parse().unwrap();
        assert!(price >= 700.0, "notified listing priced {}", price);
    }
}

#[test]
fn failed_persistence_aborts_the_hunt() {
    let storage = Arc::new(FailingStorage {
        inner: SqliteStorage::in_memory().unwrap(),
    });
    let notifier = RecordingNotifier::default();
    let exposes: Vec<Expose> = (1..=3).map(|id| expose(id, "Wohnung", 900)).collect();
    let hunter = hunter(
        config(None),
        vec![Box::new(DummyCrawler::new(exposes))],
        Arc::clone(&storage) as Arc<dyn Storage>,
        &notifier,
    );

    let err = hunter.hunt(None).unwrap_err();
    assert!(format!("{:#}", err).contains("Hunt aborted"));
    assert_eq!(notifier.count(), 0);
    assert_eq!(hunter.last_run_time().unwrap(), None);
    assert_eq!(storage.inner.get_last_run_time().unwrap(), None);
}

#[test]
fn second_hunt_skips_known_exposes() {
    let exposes: Vec<Expose> = (1..=10).map(|id| expose(id, "Wohnung", 900)).collect();
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let notifier = RecordingNotifier::default();
    let hunter = hunter(
        config(None),
        vec![Box::new(DummyCrawler::new(exposes))],
        Arc::clone(&storage) as Arc<dyn Storage>,
        &notifier,
    );

    assert_eq!(hunter.hunt(None).unwrap().len(), 10);
    assert!(hunter.hunt(None).unwrap().is_empty());

    assert_eq!(storage.processed_ids().unwrap().len(), 10);
    assert_eq!(notifier.count(), 10);
    assert!(hunter.last_run_time().unwrap().is_some());
}

#[test]
fn excluded_titles_are_not_notified() {
    let exposes = vec![
        expose(1, "Schöne 2-Zimmer-Wohnung", 800),
        expose(2, "Zimmer in netter WG", 400),
        expose(3, "Wohnung mit Garten", 950),
    ];
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let notifier = RecordingNotifier::default();
    let mut config = config(None);
    config.excluded_titles = Some(vec!["wg".to_string()]);
    let hunter = hunter(
        config,
        vec![Box::new(DummyCrawler::new(exposes))],
        storage,
        &notifier,
    );

    let found = hunter.hunt(None).unwrap();

    assert_eq!(found.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 3]);
    let messages = notifier.messages.lock().unwrap();
    assert!(messages.iter().all(|m| !m.contains("WG")));
}

#[test]
fn blocked_source_does_not_stop_the_hunt() {
    let exposes: Vec<Expose> = (1..=3).map(|id| expose(id, "Wohnung", 900)).collect();
    let crawlers: Vec<Box<dyn Crawler>> = vec![
        Box::new(CaptchaCrawler {
            pattern: Regex::new("example-immo").unwrap(),
        }),
        Box::new(DummyCrawler::new(exposes)),
    ];
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let notifier = RecordingNotifier::default();
    let hunter = hunter(config(None), crawlers, storage, &notifier);

    assert_eq!(hunter.hunt(Some(1)).unwrap().len(), 3);
    assert_eq!(notifier.count(), 3);
}

#[test]
fn duplicates_within_one_crawl_are_notified_once() {
    let exposes = vec![
        expose(5, "Wohnung", 900),
        expose(5, "Wohnung", 900),
        expose(6, "Wohnung", 900),
    ];
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let notifier = RecordingNotifier::default();
    let hunter = hunter(
        config(None),
        vec![Box::new(DummyCrawler::new(exposes))],
        storage,
        &notifier,
    );

    let found = hunter.hunt(None).unwrap();
    assert_eq!(found.iter().map(|e| e.id).collect::<Vec<_>>(), vec![5, 6]);
    assert_eq!(notifier.count(), 2);
}

#[test]
fn recent_exposes_apply_configured_criteria() {
    let exposes = vec![
        expose(1, "Günstig", 500),
        expose(2, "Teuer", 1500),
        expose(3, "Mittel", 900),
    ];
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let notifier = RecordingNotifier::default();
    let filters = FilterConfig {
        max_price: Some(1000.0),
        ..FilterConfig::default()
    };
    let hunter = hunter(
        config(Some(filters)),
        vec![Box::new(DummyCrawler::new(exposes))],
        storage,
        &notifier,
    );
    hunter.hunt(None).unwrap();

    let recent = hunter.recent_exposes(10).unwrap();
    let mut ids: Vec<i64> = recent.iter().map(|s| s.expose.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn registered_users_get_matching_offers() {
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let picky = UserSettings {
        filters: Some(FilterConfig {
            max_price: Some(850.0),
            ..FilterConfig::default()
        }),
        mute: false,
    };
    storage.save_settings_for_user(1, &UserSettings::default()).unwrap();
    storage.save_settings_for_user(2, &picky).unwrap();
    storage.save_settings_for_user(3, &UserSettings::default()).unwrap();

    let exposes = vec![expose(1, "Wohnung", 800), expose(2, "Wohnung", 900)];
    let notifier = RecordingNotifier::default();
    let chats = RecordingChats::default();
    let hunter = hunter(
        config(None),
        vec![Box::new(DummyCrawler::new(exposes))],
        Arc::clone(&storage) as Arc<dyn Storage>,
        &notifier,
    )
    .with_user_broadcast(chats.clone());

    assert_eq!(hunter.hunt(None).unwrap().len(), 2);

    // user 3 blocked the bot on the first offer and is muted from then on
    assert_eq!(*chats.sent.lock().unwrap(), vec![1, 2, 3, 1]);
    assert!(storage.get_settings_for_user(3).unwrap().unwrap().mute);
    assert_eq!(notifier.count(), 2);
}
