//! Conversation store: the synchronization core.
//!
//! Merges four sources into one ordered, per-contact timeline:
//!   1. the authoritative history fetch when a contact is selected,
//!   2. a fixed-interval poll that re-fetches the full history and replaces
//!      the timeline wholesale (the dedup backstop),
//!   3. push events from the live channel, appended immediately,
//!   4. locally-originated optimistic sends.
//!
//! Poll replacement is last-write-wins: an optimistic or push-delivered entry
//! may transiently duplicate or reorder until the next refresh, which is
//! idempotent on content. Responses are tagged with a selection generation so
//! a late fetch for a previously selected contact can never overwrite the
//! current timeline.
use crate::channel::{ChannelEvent, LiveChannel};
use crate::error::{ClientError, Result};
use crate::types::{Contact, Message, UserId};
use chrono::Utc;
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Where conversation history lives. `ApiClient` implements this against the
/// backend; isolating the full-replacement contract here lets a delta-fetch
/// implementation slot in later without touching the store.
pub trait MessageBackend: Send + Sync {
    /// Fetch the complete history for the `{self, contact}` pair.
    fn fetch_history(&self, self_id: &str, contact_id: &str)
        -> BoxFuture<'_, Result<Vec<Message>>>;

    /// Persist one locally-created message.
    fn persist_message(&self, message: Message) -> BoxFuture<'_, Result<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    /// No contact selected
    Idle,
    /// Contact selected, initial history fetch in flight
    Loading,
    /// History loaded; poll refresh and push subscription active
    Live,
}

/// Pure timeline state machine. All mutations happen here, single-threaded
/// under the store's lock; the async driver around it owns the timers.
#[derive(Debug)]
pub struct TimelineState {
    phase: ConversationPhase,
    selected: Option<Contact>,
    generation: u64,
    timeline: Vec<Message>,
}

impl TimelineState {
    pub fn new() -> Self {
        Self {
            phase: ConversationPhase::Idle,
            selected: None,
            generation: 0,
            timeline: Vec::new(),
        }
    }

    /// Select a contact: discard the previous timeline and hand out the new
    /// selection generation. Responses carrying an older generation are void.
    pub fn begin_selection(&mut self, contact: Contact) -> u64 {
        self.generation += 1;
        self.timeline.clear();
        self.selected = Some(contact);
        self.phase = ConversationPhase::Loading;
        self.generation
    }

    /// Back to Idle; the timeline is not persisted.
    pub fn clear_selection(&mut self) {
        self.generation += 1;
        self.timeline.clear();
        self.selected = None;
        self.phase = ConversationPhase::Idle;
    }

    /// Full-state refresh from a history fetch or poll. Replaces the entire
    /// timeline with the server's snapshot, sorted ascending by timestamp
    /// (stable, so equal timestamps keep arrival order). Returns false when
    /// the response belongs to a stale selection and was discarded.
    pub fn apply_refresh(&mut self, generation: u64, mut messages: Vec<Message>) -> bool {
        if generation != self.generation || self.selected.is_none() {
            debug!("Discarding history response for stale selection");
            return false;
        }
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        self.timeline = messages;
        self.phase = ConversationPhase::Live;
        true
    }

    /// Push delivery: append iff the message belongs to the selected
    /// conversation. Events for other contacts never touch the timeline.
    pub fn apply_push(&mut self, message: Message) -> bool {
        let matches = self
            .selected
            .as_ref()
            .map(|c| message.sender_id == c.contact_id || message.receiver_id == c.contact_id)
            .unwrap_or(false);
        if matches {
            self.timeline.push(message);
        }
        matches
    }

    /// Optimistic insert of a locally-created message. Unordered with
    /// respect to the next poll; the following refresh is authoritative.
    pub fn apply_local(&mut self, message: Message) {
        self.timeline.push(message);
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn selected(&self) -> Option<&Contact> {
        self.selected.as_ref()
    }

    pub fn timeline(&self) -> &[Message] {
        &self.timeline
    }
}

impl Default for TimelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Async driver around `TimelineState`: owns the poll timer, the push pump
/// and the optimistic send path.
pub struct ConversationStore {
    self_id: UserId,
    poll_interval: Duration,
    state: Arc<RwLock<TimelineState>>,
    backend: Arc<dyn MessageBackend>,
    channel: Option<Arc<LiveChannel>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    push_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationStore {
    pub fn new(
        self_id: UserId,
        backend: Arc<dyn MessageBackend>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            self_id,
            poll_interval,
            state: Arc::new(RwLock::new(TimelineState::new())),
            backend,
            channel: None,
            poll_task: Mutex::new(None),
            push_task: Mutex::new(None),
        }
    }

    /// Attach the live channel: outgoing sends are mirrored onto it and
    /// inbound `receiveMessage` events are appended without waiting for the
    /// next poll.
    pub fn with_channel(mut self, channel: Arc<LiveChannel>) -> Self {
        let state = self.state.clone();
        let mut rx = channel.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ChannelEvent::ReceiveMessage { message }) => {
                        state.write().await.apply_push(message);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // The next poll refresh repairs anything missed
                        debug!("Push pump lagged {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.push_task.lock().unwrap() = Some(task);
        self.channel = Some(channel);
        self
    }

    /// Open a conversation. Cancels the previous poll timer, discards the
    /// previous timeline, fetches history and arms the refresh loop.
    pub async fn select_contact(&self, contact: Contact) {
        let generation = self.state.write().await.begin_selection(contact.clone());

        if let Some(task) = self.poll_task.lock().unwrap().take() {
            task.abort();
        }

        let state = self.state.clone();
        let backend = self.backend.clone();
        let self_id = self.self_id.clone();
        let contact_id = contact.contact_id;
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                // First tick fires immediately: the initial history fetch.
                ticker.tick().await;
                match backend.fetch_history(&self_id, &contact_id).await {
                    Ok(messages) => {
                        if !state.write().await.apply_refresh(generation, messages) {
                            // Selection moved on while we were in flight
                            break;
                        }
                    }
                    // Background refresh: swallow and retry next tick
                    Err(e) => debug!("History refresh failed: {}", e),
                }
            }
        });
        *self.poll_task.lock().unwrap() = Some(task);
    }

    /// Close the conversation: stop polling, drop the timeline. The live
    /// channel itself stays up until the screen unmounts.
    pub async fn deselect(&self) {
        if let Some(task) = self.poll_task.lock().unwrap().take() {
            task.abort();
        }
        self.state.write().await.clear_selection();
    }

    /// Send a message to the selected contact: optimistic timeline insert,
    /// then fire-and-forget channel publish and an async persist call.
    /// Publish/persist failures are logged, never retried and never rolled
    /// back; the optimistic entry stands until the next poll.
    pub async fn send_message(&self, content: &str) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("Message content is empty".to_string()));
        }

        let receiver_id = {
            let state = self.state.read().await;
            match state.selected() {
                Some(contact) => contact.contact_id.clone(),
                None => {
                    return Err(ClientError::Validation("No contact selected".to_string()))
                }
            }
        };

        let message = Message {
            sender_id: self.self_id.clone(),
            receiver_id: receiver_id.clone(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };

        self.state.write().await.apply_local(message.clone());

        if let Some(channel) = &self.channel {
            let event = ChannelEvent::SendMessage {
                sender_id: message.sender_id.clone(),
                receiver_id: message.receiver_id.clone(),
                content: message.content.clone(),
            };
            if let Err(e) = channel.publish(&event) {
                warn!("Live channel publish failed: {}", e);
            }
        }

        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.persist_message(message).await {
                error!("Failed to persist message: {}", e);
            }
        });

        Ok(())
    }

    /// Snapshot of the current timeline.
    pub async fn timeline(&self) -> Vec<Message> {
        self.state.read().await.timeline().to_vec()
    }

    pub async fn phase(&self) -> ConversationPhase {
        self.state.read().await.phase()
    }

    pub async fn selected(&self) -> Option<Contact> {
        self.state.read().await.selected().cloned()
    }
}

impl Drop for ConversationStore {
    fn drop(&mut self) {
        for slot in [&self.poll_task, &self.push_task] {
            if let Ok(mut guard) = slot.lock() {
                if let Some(task) = guard.take() {
                    task.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(sender: &str, receiver: &str, content: &str, secs: i64) -> Message {
        Message {
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            content: content.to_string(),
            timestamp: chrono::Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn contact(id: &str) -> Contact {
        Contact {
            contact_id: id.to_string(),
            name: id.to_uppercase(),
            last_message: None,
        }
    }

    // ─── TimelineState ───────────────────────────────────────────────────────

    #[test]
    fn refresh_replaces_timeline_sorted_ascending() {
        let mut state = TimelineState::new();
        let gen = state.begin_selection(contact("bob"));
        assert_eq!(state.phase(), ConversationPhase::Loading);

        let applied = state.apply_refresh(
            gen,
            vec![
                msg("bob", "me", "late", 30),
                msg("me", "bob", "early", 10),
                msg("bob", "me", "middle", 20),
            ],
        );
        assert!(applied);
        assert_eq!(state.phase(), ConversationPhase::Live);
        let contents: Vec<_> = state.timeline().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["early", "middle", "late"]);

        // A later refresh replaces, never merges
        state.apply_refresh(gen, vec![msg("me", "bob", "only", 40)]);
        assert_eq!(state.timeline().len(), 1);
        assert_eq!(state.timeline()[0].content, "only");
    }

    #[test]
    fn refresh_sort_is_stable_on_equal_timestamps() {
        let mut state = TimelineState::new();
        let gen = state.begin_selection(contact("bob"));
        state.apply_refresh(
            gen,
            vec![
                msg("me", "bob", "first", 10),
                msg("bob", "me", "second", 10),
            ],
        );
        let contents: Vec<_> = state.timeline().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn stale_generation_is_discarded() {
        let mut state = TimelineState::new();
        let old_gen = state.begin_selection(contact("alice"));
        let new_gen = state.begin_selection(contact("bob"));

        // Late response for alice must not overwrite bob's timeline
        assert!(!state.apply_refresh(old_gen, vec![msg("alice", "me", "stale", 5)]));
        assert!(state.timeline().is_empty());
        assert_eq!(state.phase(), ConversationPhase::Loading);

        assert!(state.apply_refresh(new_gen, vec![msg("bob", "me", "fresh", 5)]));
        assert_eq!(state.timeline()[0].content, "fresh");
    }

    #[test]
    fn push_appends_only_for_selected_contact() {
        let mut state = TimelineState::new();
        let gen = state.begin_selection(contact("bob"));
        state.apply_refresh(gen, vec![]);

        assert!(state.apply_push(msg("bob", "me", "from bob", 10)));
        assert!(state.apply_push(msg("me", "bob", "echo of my own", 11)));
        assert!(!state.apply_push(msg("carol", "me", "other thread", 12)));
        assert_eq!(state.timeline().len(), 2);
    }

    #[test]
    fn optimistic_then_poll_echo_does_not_duplicate() {
        // History [t=1 "hi"], send "yo" at t=5, then the poll returns both:
        // replacement yields identical content, no duplicate.
        let mut state = TimelineState::new();
        let gen = state.begin_selection(contact("bob"));
        state.apply_refresh(gen, vec![msg("bob", "me", "hi", 1)]);

        state.apply_local(msg("me", "bob", "yo", 5));
        let contents: Vec<_> = state.timeline().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "yo"]);

        state.apply_refresh(gen, vec![msg("bob", "me", "hi", 1), msg("me", "bob", "yo", 5)]);
        let contents: Vec<_> = state.timeline().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "yo"]);
    }

    #[test]
    fn clear_selection_discards_timeline() {
        let mut state = TimelineState::new();
        let gen = state.begin_selection(contact("bob"));
        state.apply_refresh(gen, vec![msg("bob", "me", "hi", 1)]);

        state.clear_selection();
        assert_eq!(state.phase(), ConversationPhase::Idle);
        assert!(state.timeline().is_empty());
        assert!(!state.apply_push(msg("bob", "me", "late push", 2)));
    }

    // ─── ConversationStore ───────────────────────────────────────────────────

    struct StubBackend {
        history: Mutex<Vec<Message>>,
        fetches: AtomicUsize,
        persisted: Mutex<Vec<Message>>,
    }

    impl StubBackend {
        fn new(history: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                history: Mutex::new(history),
                fetches: AtomicUsize::new(0),
                persisted: Mutex::new(Vec::new()),
            })
        }
    }

    impl MessageBackend for StubBackend {
        fn fetch_history(
            &self,
            _self_id: &str,
            _contact_id: &str,
        ) -> BoxFuture<'_, Result<Vec<Message>>> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                Ok(self.history.lock().unwrap().clone())
            })
        }

        fn persist_message(&self, message: Message) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.persisted.lock().unwrap().push(message);
                Ok(())
            })
        }
    }

    const POLL: Duration = Duration::from_millis(25);
    const SETTLE: Duration = Duration::from_millis(150);

    #[tokio::test]
    async fn select_fetches_history_and_polls() {
        let backend = StubBackend::new(vec![msg("bob", "me", "hi", 1)]);
        let store = ConversationStore::new("me".to_string(), backend.clone(), POLL);

        store.select_contact(contact("bob")).await;
        tokio::time::sleep(SETTLE).await;

        assert_eq!(store.phase().await, ConversationPhase::Live);
        assert_eq!(store.timeline().await.len(), 1);
        // The poll keeps re-fetching after the initial load
        assert!(backend.fetches.load(Ordering::SeqCst) >= 3);

        // New server state wins on the next tick
        backend
            .history
            .lock()
            .unwrap()
            .push(msg("me", "bob", "yo", 5));
        tokio::time::sleep(SETTLE).await;
        let contents: Vec<String> = store
            .timeline()
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["hi".to_string(), "yo".to_string()]);
    }

    #[tokio::test]
    async fn reselect_stops_previous_poll() {
        let backend = StubBackend::new(vec![]);
        let store = ConversationStore::new("me".to_string(), backend.clone(), POLL);

        store.select_contact(contact("alice")).await;
        tokio::time::sleep(SETTLE).await;
        store.deselect().await;

        let after_deselect = backend.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(backend.fetches.load(Ordering::SeqCst), after_deselect);
        assert_eq!(store.phase().await, ConversationPhase::Idle);
    }

    #[tokio::test]
    async fn send_appends_optimistically_and_persists() {
        // Long poll interval: only the initial history fetch runs, so the
        // optimistic entry cannot be replaced mid-assertion.
        let backend = StubBackend::new(vec![]);
        let store =
            ConversationStore::new("me".to_string(), backend.clone(), Duration::from_secs(60));
        store.select_contact(contact("bob")).await;
        tokio::time::sleep(SETTLE).await;
        assert_eq!(store.phase().await, ConversationPhase::Live);

        store.send_message("  yo  ").await.unwrap();
        let timeline = store.timeline().await;
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].content, "yo");
        assert_eq!(timeline[0].receiver_id, "bob");

        tokio::time::sleep(SETTLE).await;
        let persisted = backend.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].content, "yo");
    }

    #[tokio::test]
    async fn empty_send_is_rejected_without_side_effects() {
        let backend = StubBackend::new(vec![]);
        let store = ConversationStore::new("me".to_string(), backend.clone(), POLL);
        store.select_contact(contact("bob")).await;
        tokio::time::sleep(SETTLE).await;

        let err = store.send_message("   ").await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(store.timeline().await.is_empty());

        tokio::time::sleep(SETTLE).await;
        assert!(backend.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_without_selection_is_rejected() {
        let backend = StubBackend::new(vec![]);
        let store = ConversationStore::new("me".to_string(), backend.clone(), POLL);

        let err = store.send_message("hello").await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(backend.persisted.lock().unwrap().is_empty());
    }
}
