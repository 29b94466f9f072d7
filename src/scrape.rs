use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::catalog::{CatalogSink, LocalFsCatalogStore};
use crate::cli::{LinksArgs, ProductsArgs};
use crate::extract::{Extractor, ExtractorConfig, HttpExtractor};
use crate::formats::ProductRecord;
use crate::progress::{IngestionProgress, ProgressObserver};

/// Upper bound on detail links kept from one catalog page.
pub const MAX_CANDIDATE_LINKS: usize = 50;

pub const CONCURRENCY_TIERS: [usize; 3] = [5, 7, 10];

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("save scraped products: {0:#}")]
    AggregateFailure(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct ScrapeOptions {
    pub concurrency_limit: usize,
    pub call_timeout: Duration,
}

impl ScrapeOptions {
    pub fn new(concurrency_limit: usize, call_timeout: Duration) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            call_timeout,
        }
    }
}

/// Hardware hints used to size the extraction pool.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostSignals {
    pub cores: Option<usize>,
    pub free_memory_gb: Option<f64>,
}

impl HostSignals {
    pub fn detect() -> Self {
        let cores = std::thread::available_parallelism()
            .ok()
            .map(|n| n.get());
        let free_memory_gb = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|meminfo| mem_available_gb(&meminfo));
        Self {
            cores,
            free_memory_gb,
        }
    }
}

fn mem_available_gb(meminfo: &str) -> Option<f64> {
    let line = meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))?;
    let kb: f64 = line
        .trim_start_matches("MemAvailable:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kb / 1024.0 / 1024.0)
}

/// Maps host signals onto one of [`CONCURRENCY_TIERS`]; unknown signals
/// get the lowest tier.
pub fn estimate_concurrency(signals: HostSignals) -> usize {
    let (Some(cores), Some(free_gb)) = (signals.cores, signals.free_memory_gb) else {
        return CONCURRENCY_TIERS[0];
    };
    if cores >= 8 && free_gb >= 8.0 {
        CONCURRENCY_TIERS[2]
    } else if cores >= 6 && free_gb >= 4.0 {
        CONCURRENCY_TIERS[1]
    } else {
        CONCURRENCY_TIERS[0]
    }
}

/// Detail-page links for a catalog page: fragments stripped, duplicates
/// removed (first occurrence wins), capped at [`MAX_CANDIDATE_LINKS`].
pub async fn scrape_links(
    extractor: &dyn Extractor,
    root_url: &Url,
) -> anyhow::Result<Vec<Url>> {
    if root_url.scheme() != "http" && root_url.scheme() != "https" {
        anyhow::bail!("catalog url must be http/https: {root_url}");
    }

    let candidates = extractor
        .candidate_links(root_url)
        .await
        .with_context(|| format!("fetch candidate links: {root_url}"))?;
    let found = candidates.len();

    let mut seen = HashSet::new();
    let links = candidates
        .into_iter()
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .filter(|url| seen.insert(url.as_str().to_owned()))
        .take(MAX_CANDIDATE_LINKS)
        .collect::<Vec<_>>();

    tracing::info!(root = %root_url, found, kept = links.len(), "scraped candidate links");
    Ok(links)
}

/// Drains `urls` through the extractor with at most
/// `options.concurrency_limit` calls in flight.
///
/// URLs are admitted in input order; results come back in completion
/// order. A failing URL contributes nothing. Once `cancel` fires no new
/// URL is admitted, but in-flight calls finish and their records are kept.
pub async fn scrape_products(
    extractor: Arc<dyn Extractor>,
    urls: &[Url],
    options: ScrapeOptions,
    observer: &dyn ProgressObserver,
    cancel: &CancellationToken,
) -> Vec<ProductRecord> {
    let limit = options.concurrency_limit.max(1);
    let mut progress = IngestionProgress::new(urls.len());
    observer.on_progress(&progress);

    let mut join_set = tokio::task::JoinSet::new();
    let mut next_idx = 0usize;
    let mut records = Vec::new();
    let mut failed = 0usize;

    tracing::info!(total = urls.len(), concurrency = limit, "scrape products: start");

    loop {
        while next_idx < urls.len() && join_set.len() < limit && !cancel.is_cancelled() {
            let url = urls[next_idx].clone();
            let extractor = Arc::clone(&extractor);
            let call_timeout = options.call_timeout;
            join_set.spawn(async move {
                let outcome = match tokio::time::timeout(call_timeout, extractor.product(&url)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!(
                        "extraction timed out after {}s",
                        call_timeout.as_secs_f64()
                    )),
                };
                (url, outcome)
            });
            next_idx += 1;
            progress.active_units = join_set.len();
            observer.on_progress(&progress);
        }

        let Some(joined) = join_set.join_next().await else {
            break;
        };

        match joined {
            Ok((_, Ok(Some(record)))) => records.push(record),
            Ok((url, Ok(None))) => {
                tracing::debug!(%url, "no product extracted");
            }
            Ok((url, Err(err))) => {
                failed += 1;
                tracing::warn!(%url, err = %format!("{err:#}"), "product extraction failed; skipping");
            }
            Err(err) => {
                failed += 1;
                tracing::warn!(?err, "product extraction task aborted; skipping");
            }
        }

        progress.active_units = join_set.len();
        progress.completed_units += 1;
        observer.on_progress(&progress);
    }

    // A token that fires after the last admission cancelled nothing.
    if cancel.is_cancelled() && next_idx < urls.len() {
        progress.cancelled = true;
        observer.on_progress(&progress);
    }

    tracing::info!(
        total = urls.len(),
        completed = progress.completed_units,
        extracted = records.len(),
        failed,
        cancelled = progress.cancelled,
        "scrape products: drained"
    );
    records
}

/// Runs [`scrape_products`], gives every record a fresh id, then writes the
/// whole result to `sink` as one batch.
pub async fn ingest_products(
    extractor: Arc<dyn Extractor>,
    urls: &[Url],
    options: ScrapeOptions,
    observer: &dyn ProgressObserver,
    cancel: &CancellationToken,
    sink: &dyn CatalogSink,
) -> Result<Vec<ProductRecord>, IngestionError> {
    let mut records = scrape_products(extractor, urls, options, observer, cancel).await;
    for record in &mut records {
        record.id = Some(Uuid::new_v4());
    }

    if records.is_empty() {
        tracing::info!("no products extracted; nothing to save");
        return Ok(records);
    }

    sink.save_many(&records)
        .await
        .map_err(IngestionError::AggregateFailure)?;
    Ok(records)
}

pub async fn run_links(args: LinksArgs) -> anyhow::Result<()> {
    let root_url = Url::parse(args.url.trim()).context("parse --url")?;
    let extractor = HttpExtractor::new(&ExtractorConfig::from_env()?)?;
    for link in scrape_links(&extractor, &root_url).await? {
        println!("{link}");
    }
    Ok(())
}

/// CLI ingestion: Ctrl-C stops admission and waits for in-flight calls.
pub async fn run_products(data_dir: &Path, args: ProductsArgs) -> anyhow::Result<()> {
    let mut config = ExtractorConfig::from_env()?;
    if let Some(secs) = args.timeout_secs {
        config.timeout = Duration::from_secs(secs.max(1));
    }
    let extractor: Arc<dyn Extractor> = Arc::new(HttpExtractor::new(&config)?);

    let urls = if !args.links.is_empty() {
        args.links
            .iter()
            .map(|raw| Url::parse(raw.trim()).with_context(|| format!("parse --link: {raw}")))
            .collect::<anyhow::Result<Vec<_>>>()?
    } else if let Some(raw) = &args.url {
        let root_url = Url::parse(raw.trim()).context("parse --url")?;
        scrape_links(extractor.as_ref(), &root_url).await?
    } else {
        anyhow::bail!("either --link or --url is required");
    };

    let limit = args
        .concurrency
        .unwrap_or_else(|| estimate_concurrency(HostSignals::detect()));

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; waiting for in-flight extractions");
                cancel.cancel();
            }
        }
    });

    let observer = |progress: &IngestionProgress| {
        tracing::info!(
            completed = progress.completed_units,
            active = progress.active_units,
            total = progress.total_units,
            percent = progress.percent(),
            "progress"
        );
    };
    let sink = LocalFsCatalogStore::new(data_dir);
    let result = ingest_products(
        extractor,
        &urls,
        ScrapeOptions::new(limit, config.timeout),
        &observer,
        &cancel,
        &sink,
    )
    .await;
    interrupt.abort();

    let records = result?;
    let json = serde_json::to_string_pretty(&records).context("serialize products")?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::progress::NoopProgress;

    #[derive(Clone, Copy)]
    enum Behavior {
        Product,
        Empty,
        Fail,
        Hang,
    }

    struct MockExtractor {
        links: Vec<Url>,
        behaviors: HashMap<String, Behavior>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl MockExtractor {
        fn new(delay: Duration) -> Self {
            Self {
                links: Vec::new(),
                behaviors: HashMap::new(),
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with(mut self, url: &Url, behavior: Behavior) -> Self {
            self.behaviors.insert(url.to_string(), behavior);
            self
        }
    }

    #[async_trait]
    impl Extractor for MockExtractor {
        async fn candidate_links(&self, _root_url: &Url) -> anyhow::Result<Vec<Url>> {
            Ok(self.links.clone())
        }

        async fn product(&self, url: &Url) -> anyhow::Result<Option<ProductRecord>> {
            self.calls.lock().unwrap().push(url.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let behavior = self
                .behaviors
                .get(url.as_str())
                .copied()
                .unwrap_or(Behavior::Product);
            let delay = match behavior {
                Behavior::Hang => Duration::from_secs(3600),
                _ => self.delay,
            };
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match behavior {
                Behavior::Product | Behavior::Hang => Ok(Some(product_for(url))),
                Behavior::Empty => Ok(None),
                Behavior::Fail => anyhow::bail!("boom"),
            }
        }
    }

    fn product_for(url: &Url) -> ProductRecord {
        ProductRecord {
            id: None,
            external_id: url.path().to_owned(),
            name: url.path().trim_start_matches('/').to_owned(),
            images: Vec::new(),
            is_available: true,
            quantity: 1,
            url: url.to_string(),
            display_price: 10.0,
            list_price: Some(10.0),
            category: String::new(),
            vendor: String::new(),
            description: String::new(),
            sku: String::new(),
            parameters: Vec::new(),
        }
    }

    fn urls(n: usize) -> Vec<Url> {
        (0..n)
            .map(|i| Url::parse(&format!("https://shop.example/p{i}")).unwrap())
            .collect()
    }

    fn options(limit: usize) -> ScrapeOptions {
        ScrapeOptions::new(limit, Duration::from_secs(30))
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<ProductRecord>>>,
        fail: bool,
    }

    #[async_trait]
    impl CatalogSink for RecordingSink {
        async fn save_many(&self, records: &[ProductRecord]) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.batches.lock().unwrap().push(records.to_vec());
            Ok(())
        }

        async fn find(&self, _id: Uuid) -> anyhow::Result<Option<ProductRecord>> {
            Ok(None)
        }

        async fn list(&self) -> anyhow::Result<Vec<ProductRecord>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn concurrency_tiers_follow_host_signals() {
        let tier = |cores, mem| {
            estimate_concurrency(HostSignals {
                cores: Some(cores),
                free_memory_gb: Some(mem),
            })
        };
        assert_eq!(tier(16, 32.0), 10);
        assert_eq!(tier(8, 6.0), 7);
        assert_eq!(tier(6, 4.0), 7);
        assert_eq!(tier(4, 64.0), 5);
        assert_eq!(estimate_concurrency(HostSignals::default()), 5);
        assert_eq!(
            estimate_concurrency(HostSignals {
                cores: Some(32),
                free_memory_gb: None,
            }),
            5
        );
    }

    #[test]
    fn mem_available_is_read_from_meminfo() {
        let meminfo = "MemTotal:       16384000 kB\nMemAvailable:    8388608 kB\n";
        assert_eq!(mem_available_gb(meminfo), Some(8.0));
        assert_eq!(mem_available_gb("MemTotal: 1 kB\n"), None);
    }

    #[tokio::test]
    async fn scrape_links_dedupes_strips_fragments_and_caps() -> anyhow::Result<()> {
        let mut extractor = MockExtractor::new(Duration::ZERO);
        extractor.links = vec![
            Url::parse("https://shop.example/a#top")?,
            Url::parse("https://shop.example/a")?,
            Url::parse("https://shop.example/b")?,
        ];
        extractor
            .links
            .extend((0..80).map(|i| Url::parse(&format!("https://shop.example/x{i}")).unwrap()));

        let root = Url::parse("https://shop.example/catalog")?;
        let links = scrape_links(&extractor, &root).await?;
        assert_eq!(links.len(), MAX_CANDIDATE_LINKS);
        assert_eq!(links[0].as_str(), "https://shop.example/a");
        assert_eq!(links[1].as_str(), "https://shop.example/b");
        Ok(())
    }

    #[tokio::test]
    async fn scrape_links_rejects_non_http_root() {
        let extractor = MockExtractor::new(Duration::ZERO);
        let root = Url::parse("ftp://shop.example/catalog").unwrap();
        assert!(scrape_links(&extractor, &root).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency_limit() {
        for (limit, n) in [(1, 0), (1, 4), (3, 10), (5, 12), (10, 3)] {
            let extractor = Arc::new(MockExtractor::new(Duration::from_millis(50)));
            let max_active = AtomicUsize::new(0);
            let observer = |p: &IngestionProgress| {
                max_active.fetch_max(p.active_units, Ordering::SeqCst);
            };
            let cancel = CancellationToken::new();

            let records = scrape_products(
                extractor.clone(),
                &urls(n),
                options(limit),
                &observer,
                &cancel,
            )
            .await;

            assert_eq!(records.len(), n);
            assert!(extractor.max_in_flight.load(Ordering::SeqCst) <= limit);
            assert!(max_active.load(Ordering::SeqCst) <= limit);
            assert_eq!(extractor.in_flight.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_skipped_not_fatal() {
        let input = urls(6);
        let extractor = Arc::new(
            MockExtractor::new(Duration::from_millis(10))
                .with(&input[1], Behavior::Fail)
                .with(&input[3], Behavior::Empty),
        );
        let last = Mutex::new(IngestionProgress::default());
        let observer = |p: &IngestionProgress| *last.lock().unwrap() = *p;

        let records = scrape_products(
            extractor,
            &input,
            options(2),
            &observer,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(records.len(), 4);
        let last = *last.lock().unwrap();
        assert_eq!(last.completed_units, 6);
        assert_eq!(last.active_units, 0);
        assert!(!last.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_extraction_times_out() {
        let input = urls(3);
        let extractor = Arc::new(
            MockExtractor::new(Duration::from_millis(10)).with(&input[0], Behavior::Hang),
        );

        let records = scrape_products(
            extractor,
            &input,
            ScrapeOptions::new(3, Duration::from_secs(5)),
            &NoopProgress,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_admission_yields_nothing() {
        let extractor = Arc::new(MockExtractor::new(Duration::from_millis(10)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let last = Mutex::new(IngestionProgress::default());
        let observer = |p: &IngestionProgress| *last.lock().unwrap() = *p;

        let records =
            scrape_products(extractor.clone(), &urls(8), options(5), &observer, &cancel).await;

        assert!(records.is_empty());
        assert!(extractor.calls.lock().unwrap().is_empty());
        let last = *last.lock().unwrap();
        assert!(last.cancelled);
        assert_eq!(last.completed_units, 0);
        assert!(last.is_drained());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_k_completions_keeps_exactly_k() {
        const K: usize = 3;
        let extractor = Arc::new(MockExtractor::new(Duration::from_millis(10)));
        let cancel = CancellationToken::new();
        let observer = |p: &IngestionProgress| {
            if p.completed_units == K {
                cancel.cancel();
            }
        };

        let records =
            scrape_products(extractor.clone(), &urls(10), options(1), &observer, &cancel).await;

        assert_eq!(records.len(), K);
        assert_eq!(extractor.calls.lock().unwrap().len(), K);
        assert_eq!(extractor.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_lets_in_flight_calls_finish() {
        let extractor = Arc::new(MockExtractor::new(Duration::from_millis(10)));
        let cancel = CancellationToken::new();
        let observer = |p: &IngestionProgress| {
            if p.active_units == 4 {
                cancel.cancel();
            }
        };

        let records =
            scrape_products(extractor.clone(), &urls(20), options(4), &observer, &cancel).await;

        assert_eq!(records.len(), 4);
        assert_eq!(extractor.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_every_url_was_admitted_is_not_a_cancelled_run() {
        let extractor = Arc::new(MockExtractor::new(Duration::from_millis(10)));
        let cancel = CancellationToken::new();
        let last = Mutex::new(IngestionProgress::default());
        let observer = |p: &IngestionProgress| {
            if p.active_units == 3 {
                cancel.cancel();
            }
            *last.lock().unwrap() = *p;
        };

        let records =
            scrape_products(extractor.clone(), &urls(3), options(5), &observer, &cancel).await;

        assert!(cancel.is_cancelled());
        assert_eq!(records.len(), 3);
        let last = *last.lock().unwrap();
        assert_eq!(last.completed_units, 3);
        assert!(!last.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn admission_follows_input_order() {
        let input = urls(5);
        let extractor = Arc::new(MockExtractor::new(Duration::from_millis(10)));

        scrape_products(
            extractor.clone(),
            &input,
            options(1),
            &NoopProgress,
            &CancellationToken::new(),
        )
        .await;

        let calls = extractor.calls.lock().unwrap().clone();
        let expected = input.iter().map(|u| u.to_string()).collect::<Vec<_>>();
        assert_eq!(calls, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn twelve_links_reach_one_hundred_percent_once_and_save_one_batch() {
        let extractor = Arc::new(MockExtractor::new(Duration::from_millis(25)));
        let sink = RecordingSink::default();
        let percents = Mutex::new(Vec::new());
        let observer = |p: &IngestionProgress| percents.lock().unwrap().push((p.completed_units, p.percent()));

        let records = ingest_products(
            extractor,
            &urls(12),
            options(5),
            &observer,
            &CancellationToken::new(),
            &sink,
        )
        .await
        .unwrap();

        let percents = percents.into_inner().unwrap();
        let hundred = percents.iter().filter(|(_, pct)| *pct == 100).collect::<Vec<_>>();
        assert!(!hundred.is_empty());
        assert!(hundred.iter().all(|(completed, _)| *completed == 12));
        let first_hundred = percents.iter().position(|(_, pct)| *pct == 100).unwrap();
        assert!(percents[..first_hundred].iter().all(|(c, _)| *c < 12));
        assert!(percents.windows(2).all(|w| w[0].0 <= w[1].0));

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 12);
        assert!(records.iter().all(|r| r.id.is_some()));
        let ids = records.iter().filter_map(|r| r.id).collect::<HashSet<_>>();
        assert_eq!(ids.len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failure_is_an_aggregate_failure() {
        let extractor = Arc::new(MockExtractor::new(Duration::from_millis(1)));
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };

        let err = ingest_products(
            extractor,
            &urls(2),
            options(2),
            &NoopProgress,
            &CancellationToken::new(),
            &sink,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IngestionError::AggregateFailure(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
