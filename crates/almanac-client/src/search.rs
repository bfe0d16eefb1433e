//! Debounced typeahead that never lets a superseded answer through.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use crate::api::SearchApi;
use crate::error::Result;
use crate::model::SearchHit;

/// Backend of a typeahead field.
#[async_trait]
pub trait SearchSource: Send + Sync + 'static {
    type Item: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;

    async fn query(&self, text: &str) -> Result<Vec<Self::Item>>;

    /// Value written into the field when `item` is picked.
    fn display_value(&self, item: &Self::Item) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchTiming {
    pub debounce: Duration,
    /// Delay before hiding results on focus loss, so a click on a result
    /// can land first.
    pub dismiss_delay: Duration,
}

impl Default for SearchTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            dismiss_delay: Duration::from_millis(200),
        }
    }
}

/// Field view-model. `results == None` means the list is hidden.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchView<T> {
    pub value: String,
    pub generation: u64,
    pub results: Option<Vec<T>>,
    /// A query for the current generation is scheduled or in flight.
    pub searching: bool,
}

impl<T> Default for SearchView<T> {
    fn default() -> Self {
        Self {
            value: String::new(),
            generation: 0,
            results: None,
            searching: false,
        }
    }
}

#[derive(Default)]
struct Pending {
    generation: u64,
    debounce: Option<JoinHandle<()>>,
    dismiss: Option<JoinHandle<()>>,
}

struct SearchInner<S: SearchSource> {
    source: Arc<S>,
    timing: SearchTiming,
    view: watch::Sender<SearchView<S::Item>>,
    pending: Mutex<Pending>,
}

/// One typeahead field.
pub struct SearchController<S: SearchSource> {
    inner: Arc<SearchInner<S>>,
}

impl<S: SearchSource> SearchController<S> {
    pub fn new(source: Arc<S>, timing: SearchTiming) -> Self {
        let (view, _) = watch::channel(SearchView::default());
        Self {
            inner: Arc::new(SearchInner {
                source,
                timing,
                view,
                pending: Mutex::new(Pending::default()),
            }),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SearchView<S::Item>> {
        self.inner.view.subscribe()
    }

    #[must_use]
    pub fn view(&self) -> SearchView<S::Item> {
        self.inner.view.borrow().clone()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.pending.lock().generation
    }

    /// Handles an edit of the field.
    pub fn input_changed(&self, value: &str) {
        let generation = self.inner.edit(value);
        let text = value.trim();
        if text.is_empty() {
            self.inner.view.send_modify(|view| view.results = None);
            return;
        }
        self.inner.view.send_modify(|view| view.searching = true);
        let inner = Arc::clone(&self.inner);
        let text = text.to_string();
        let handle = tokio::spawn(async move {
            time::sleep(inner.timing.debounce).await;
            // the request itself is detached so a later keystroke cannot abort it
            tokio::spawn(SearchInner::run_query(inner, generation, text));
        });
        self.inner.pending.lock().debounce = Some(handle);
    }

    /// Schedules the result list to hide. A query still waiting out its
    /// debounce is dropped; one already issued may still answer.
    pub fn focus_lost(&self) {
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.timing.dismiss_delay;
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            inner.view.send_modify(|view| view.results = None);
        });
        let debouncing = {
            let mut pending = self.inner.pending.lock();
            if let Some(previous) = pending.dismiss.replace(handle) {
                previous.abort();
            }
            pending.debounce.take().is_some_and(|handle| {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            })
        };
        if debouncing {
            self.inner.view.send_modify(|view| view.searching = false);
        }
    }

    /// Starts a new focus session; answers from earlier sessions are dropped.
    pub fn focus_gained(&self) {
        let value = {
            let mut pending = self.inner.pending.lock();
            if let Some(handle) = pending.dismiss.take() {
                handle.abort();
            }
            self.inner.view.borrow().value.clone()
        };
        if value.trim().is_empty() {
            self.inner.edit(&value);
        } else {
            self.input_changed(&value);
        }
    }

    /// Picks a result: the field takes its display value and the list hides.
    ///
    /// Watchers see the same change as for a typed edit; no new query is
    /// scheduled for the picked value.
    pub fn select(&self, item: &S::Item) {
        let value = self.inner.source.display_value(item);
        self.inner.edit(&value);
        self.inner.view.send_modify(|view| view.results = None);
    }
}

impl<S: SearchSource> Drop for SearchController<S> {
    fn drop(&mut self) {
        let mut pending = self.inner.pending.lock();
        for handle in [pending.debounce.take(), pending.dismiss.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

impl<S: SearchSource> SearchInner<S> {
    /// Records a new field value: bumps the generation, drops the pending
    /// debounce and publishes the change.
    fn edit(&self, value: &str) -> u64 {
        let generation = {
            let mut pending = self.pending.lock();
            if let Some(handle) = pending.debounce.take() {
                handle.abort();
            }
            pending.generation += 1;
            pending.generation
        };
        self.view.send_modify(|view| {
            view.value = value.to_string();
            view.generation = generation;
            view.searching = false;
        });
        generation
    }

    async fn run_query(this: Arc<Self>, generation: u64, text: String) {
        debug!(generation, %text, "search issued");
        let outcome = this.source.query(&text).await;
        let current = this.pending.lock().generation;
        if current != generation {
            debug!(generation, current, "dropping stale search response");
            return;
        }
        let results = match outcome {
            Ok(items) if !items.is_empty() => Some(items),
            Ok(_) => None,
            Err(err) => {
                debug!(error = %err, "search failed");
                None
            }
        };
        this.view.send_modify(|view| {
            view.results = results;
            view.searching = false;
        });
    }
}

/// Instrument lookup by code or name.
pub struct StockSearch {
    api: Arc<dyn SearchApi>,
    limit: usize,
}

impl StockSearch {
    pub fn new(api: Arc<dyn SearchApi>, limit: usize) -> Self {
        Self { api, limit }
    }
}

#[async_trait]
impl SearchSource for StockSearch {
    type Item = SearchHit;

    async fn query(&self, text: &str) -> Result<Vec<SearchHit>> {
        self.api.search_stocks(text, self.limit).await
    }

    fn display_value(&self, item: &SearchHit) -> String {
        item.display_symbol().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use tokio::time::Instant;

    /// Answers `"{text}-hit"` after a per-text latency.
    struct EchoSource {
        origin: Instant,
        issued: Mutex<Vec<(u128, String)>>,
        latency: fn(&str) -> Duration,
    }

    impl EchoSource {
        fn new(latency: fn(&str) -> Duration) -> Arc<Self> {
            Arc::new(Self {
                origin: Instant::now(),
                issued: Mutex::new(Vec::new()),
                latency,
            })
        }

        fn issued(&self) -> Vec<(u128, String)> {
            self.issued.lock().clone()
        }
    }

    #[async_trait]
    impl SearchSource for EchoSource {
        type Item = String;

        async fn query(&self, text: &str) -> Result<Vec<String>> {
            self.issued
                .lock()
                .push((self.origin.elapsed().as_millis(), text.to_string()));
            time::sleep((self.latency)(text)).await;
            match text {
                "boom" => Err(ClientError::transport("connection reset")),
                "none" => Ok(Vec::new()),
                _ => Ok(vec![format!("{text}-hit")]),
            }
        }

        fn display_value(&self, item: &String) -> String {
            item.trim_end_matches("-hit").to_string()
        }
    }

    fn instant(_: &str) -> Duration {
        Duration::ZERO
    }

    async fn at_ms(origin: Instant, ms: u64) {
        time::sleep_until(origin + Duration::from_millis(ms)).await;
    }

    fn controller(source: &Arc<EchoSource>) -> SearchController<EchoSource> {
        SearchController::new(Arc::clone(source), SearchTiming::default())
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn keystroke_burst_issues_one_query_after_last_key() {
        let source = EchoSource::new(instant);
        let search = controller(&source);
        search.input_changed("6");
        at_ms(source.origin, 50).await;
        search.input_changed("60");
        at_ms(source.origin, 120).await;
        search.input_changed("600");
        at_ms(source.origin, 280).await;
        search.input_changed("6005");
        assert!(search.view().searching);

        at_ms(source.origin, 2000).await;
        assert!(!search.view().searching);
        assert_eq!(source.issued(), vec![(580, "6005".to_string())]);
        assert_eq!(search.view().results, Some(vec!["6005-hit".to_string()]));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn slow_stale_response_never_overwrites_newer_results() {
        fn latency(text: &str) -> Duration {
            if text == "slow" {
                Duration::from_millis(1000)
            } else {
                Duration::from_millis(10)
            }
        }
        let source = EchoSource::new(latency);
        let search = controller(&source);
        let mut views = search.subscribe();

        search.input_changed("slow");
        at_ms(source.origin, 400).await;
        search.input_changed("fast");
        at_ms(source.origin, 720).await;
        assert_eq!(search.view().results, Some(vec!["fast-hit".to_string()]));

        views.mark_unchanged();
        at_ms(source.origin, 1500).await;
        assert_eq!(
            source.issued(),
            vec![(300, "slow".to_string()), (700, "fast".to_string())]
        );
        assert_eq!(search.view().results, Some(vec!["fast-hit".to_string()]));
        assert!(!views.has_changed().expect("sender alive"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn blank_input_hides_immediately_without_query() {
        let source = EchoSource::new(instant);
        let search = controller(&source);
        search.input_changed("ab");
        at_ms(source.origin, 400).await;
        assert!(search.view().results.is_some());

        search.input_changed("   ");
        assert_eq!(search.view().results, None);
        assert!(!search.view().searching);
        at_ms(source.origin, 2000).await;
        assert_eq!(source.issued().len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn empty_or_failed_answers_hide_the_list() {
        let source = EchoSource::new(instant);
        let search = controller(&source);
        search.input_changed("ab");
        at_ms(source.origin, 400).await;
        search.input_changed("none");
        at_ms(source.origin, 800).await;
        assert_eq!(search.view().results, None);

        search.input_changed("ab");
        at_ms(source.origin, 1200).await;
        search.input_changed("boom");
        at_ms(source.origin, 1600).await;
        assert_eq!(search.view().results, None);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn focus_loss_hides_after_dismiss_delay() {
        let source = EchoSource::new(instant);
        let search = controller(&source);
        search.input_changed("600");
        at_ms(source.origin, 400).await;
        search.focus_lost();
        at_ms(source.origin, 590).await;
        assert!(search.view().results.is_some());
        at_ms(source.origin, 610).await;
        assert_eq!(search.view().results, None);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn focus_loss_during_debounce_issues_no_query() {
        let source = EchoSource::new(instant);
        let search = controller(&source);
        search.input_changed("600");
        at_ms(source.origin, 150).await;
        search.focus_lost();
        assert!(!search.view().searching);

        at_ms(source.origin, 1000).await;
        assert!(source.issued().is_empty());
        assert_eq!(search.view().results, None);
        assert_eq!(search.view().value, "600");

        search.focus_gained();
        at_ms(source.origin, 1400).await;
        assert_eq!(source.issued(), vec![(1300, "600".to_string())]);
        assert_eq!(search.view().results, Some(vec!["600-hit".to_string()]));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn new_focus_session_drops_in_flight_answers() {
        fn latency(_: &str) -> Duration {
            Duration::from_millis(500)
        }
        let source = EchoSource::new(latency);
        let search = controller(&source);
        search.input_changed("600");
        let first = search.generation();
        at_ms(source.origin, 400).await;
        search.focus_lost();
        search.focus_gained();
        assert!(search.generation() > first);

        // the 300 ms query answers at 800 ms and is dropped;
        // the re-triggered one is issued at 700 ms and answers at 1200 ms
        at_ms(source.origin, 900).await;
        assert_eq!(search.view().results, None);
        at_ms(source.origin, 1300).await;
        assert_eq!(search.view().results, Some(vec!["600-hit".to_string()]));
        assert_eq!(source.issued().len(), 2);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn selection_sets_value_and_notifies_like_an_edit() {
        let source = EchoSource::new(instant);
        let search = controller(&source);
        search.input_changed("6005");
        at_ms(source.origin, 400).await;
        let mut views = search.subscribe();
        views.mark_unchanged();
        let before = search.generation();

        search.select(&"600519-hit".to_string());
        assert!(views.has_changed().expect("sender alive"));
        let view = search.view();
        assert_eq!(view.value, "600519");
        assert_eq!(view.results, None);
        assert_eq!(view.generation, before + 1);

        at_ms(source.origin, 2000).await;
        assert_eq!(source.issued().len(), 1);
    }
}
