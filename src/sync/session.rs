//! Chat session: owns the conversation cache and applies every update
//!
//! The session runs as a single task. Commands, poll ticks, pushed channel
//! events and completed network calls all arrive here and are handled one
//! at a time, so the cache needs no lock. Network calls run in their own
//! tasks and report back through `Completion`.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::api::chat::Delivered;
use crate::channel::ChannelEvent;
use crate::config::Role;
use crate::error::ChatError;
use crate::models::Message;

use super::cache::ConversationCache;
use super::render::{render, View};
use super::transport::{Delivery, Transport};

/// Result of a send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send after trimming; no network call was made.
    Skipped,
    Delivered { handoff: bool },
}

/// State of the link to the server, for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Polling,
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Polling => "polling",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Closed => "closed",
        }
    }
}

enum Command {
    Reload,
    Send {
        text: String,
        reply: oneshot::Sender<Result<SendOutcome, ChatError>>,
    },
    Shutdown,
}

enum Completion {
    Opened(Result<Option<mpsc::UnboundedReceiver<ChannelEvent>>, ChatError>),
    Loaded {
        seq: u64,
        result: Result<Vec<Message>, ChatError>,
    },
    Sent {
        result: Result<Delivered, ChatError>,
        reply: oneshot::Sender<Result<SendOutcome, ChatError>>,
    },
}

/// Cloneable front of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    view_rx: watch::Receiver<View>,
    link_rx: watch::Receiver<LinkStatus>,
}

impl SessionHandle {
    /// Rendered conversation; changes only when the visible list changes.
    pub fn view(&self) -> watch::Receiver<View> {
        self.view_rx.clone()
    }

    pub fn link(&self) -> watch::Receiver<LinkStatus> {
        self.link_rx.clone()
    }

    /// Request a full reload of the conversation.
    pub fn reload(&self) {
        let _ = self.cmd_tx.send(Command::Reload);
    }

    /// Send one message. Whitespace-only input is a silent no-op.
    ///
    /// A failure is final; the caller keeps the text for a manual retry.
    pub async fn send(&self, text: &str) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Skipped);
        }

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                text: text.to_string(),
                reply,
            })
            .map_err(|_| ChatError::ChannelUnavailable)?;
        rx.await.unwrap_or(Err(ChatError::ChannelUnavailable))
    }

    /// Stop polling, close the channel and end the session task.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

/// Join handle of the session task.
pub struct SessionTask {
    join: JoinHandle<()>,
}

impl SessionTask {
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::error!("Chat session task failed: {}", e);
        }
    }
}

/// Start a session for `role` over `transport`.
pub fn start(transport: Arc<dyn Transport>, role: Role) -> (SessionHandle, SessionTask) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(View::default());
    let initial_link = match transport.delivery() {
        Delivery::Pull { .. } => LinkStatus::Polling,
        Delivery::Push => LinkStatus::Connecting,
    };
    let (link_tx, link_rx) = watch::channel(initial_link);

    let session = Session {
        transport,
        role,
        cache: ConversationCache::new(),
        view_tx,
        link_tx,
        done_tx,
        next_seq: 1,
        applied_seq: 0,
        loads_in_flight: 0,
        recent_pushes: Vec::new(),
        published_once: false,
    };
    let join = tokio::spawn(session.run(cmd_rx, done_rx));

    (
        SessionHandle {
            cmd_tx,
            view_rx,
            link_rx,
        },
        SessionTask { join },
    )
}

struct Session {
    transport: Arc<dyn Transport>,
    role: Role,
    cache: ConversationCache,
    view_tx: watch::Sender<View>,
    link_tx: watch::Sender<LinkStatus>,
    done_tx: mpsc::UnboundedSender<Completion>,
    /// Sequence number of the next load request.
    next_seq: u64,
    /// Sequence number of the newest load applied to the cache.
    applied_seq: u64,
    loads_in_flight: usize,
    /// Messages pushed while a load was outstanding, tagged with the first
    /// load sequence number issued after them. Loads older than the tag
    /// cannot contain the message.
    recent_pushes: Vec<(u64, Message)>,
    /// The first applied load is always published, even when empty.
    published_once: bool,
}

impl Session {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut done_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        let mut poll: Option<Interval> = None;
        let mut inbound: Option<mpsc::UnboundedReceiver<ChannelEvent>> = None;

        match self.transport.delivery() {
            Delivery::Pull { interval } => {
                tracing::info!("Polling conversation every {}ms", interval.as_millis());
                self.spawn_load();
                let mut timer = time::interval_at(Instant::now() + interval, interval);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                poll = Some(timer);
            }
            Delivery::Push => self.spawn_open(),
        }

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Reload) => self.spawn_load(),
                    Some(Command::Send { text, reply }) => self.spawn_send(text, reply),
                    Some(Command::Shutdown) | None => break,
                },
                _ = next_tick(&mut poll) => self.spawn_load(),
                event = next_event(&mut inbound) => match event {
                    Some(ChannelEvent::Message(message)) => self.apply_pushed(message),
                    Some(ChannelEvent::Closed(reason)) => {
                        if let Some(reason) = reason {
                            tracing::warn!("Chat channel closed: {}", reason);
                        }
                        inbound = None;
                        self.link_tx.send_replace(LinkStatus::Disconnected);
                    }
                    None => {
                        inbound = None;
                        self.link_tx.send_replace(LinkStatus::Disconnected);
                    }
                },
                Some(done) = done_rx.recv() => {
                    if let Some(events) = self.complete(done) {
                        inbound = Some(events);
                    }
                }
            }
        }

        drop(poll);
        self.transport.close().await;
        self.link_tx.send_replace(LinkStatus::Closed);
        tracing::debug!("Chat session stopped");
    }

    /// Apply a finished network call. Returns the channel event stream
    /// when the push channel has just opened.
    fn complete(&mut self, done: Completion) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        match done {
            Completion::Opened(result) => {
                // Resync after connecting: covers messages sent before the
                // channel existed. On failure the view is still loaded once.
                let events = match result {
                    Ok(Some(events)) => {
                        self.link_tx.send_replace(LinkStatus::Connected);
                        Some(events)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!("Chat channel unavailable: {}", e);
                        self.link_tx.send_replace(LinkStatus::Disconnected);
                        None
                    }
                };
                self.spawn_load();
                events
            }
            Completion::Loaded { seq, result } => {
                self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
                self.apply_loaded(seq, result);
                if self.loads_in_flight == 0 {
                    self.recent_pushes.clear();
                }
                None
            }
            Completion::Sent { result, reply } => {
                let outcome = match result {
                    Ok(delivered) => {
                        // Pull mode has no echo; push mode waits for chat_message.
                        if matches!(self.transport.delivery(), Delivery::Pull { .. }) {
                            self.spawn_load();
                        }
                        Ok(SendOutcome::Delivered {
                            handoff: delivered.handoff,
                        })
                    }
                    Err(e) => {
                        tracing::warn!("Send failed: {}", e);
                        Err(e)
                    }
                };
                let _ = reply.send(outcome);
                None
            }
        }
    }

    fn apply_loaded(&mut self, seq: u64, result: Result<Vec<Message>, ChatError>) {
        if seq <= self.applied_seq {
            tracing::debug!(
                "Dropping stale load #{} (newest applied is #{})",
                seq,
                self.applied_seq
            );
            return;
        }
        match result {
            Ok(messages) => {
                self.applied_seq = seq;
                let mut changed = self.cache.replace(messages);

                // Pushes newer than this snapshot go back on top of it.
                self.recent_pushes.retain(|(tag, _)| *tag > seq);
                for (_, message) in &self.recent_pushes {
                    changed |= self.cache.merge(message.clone());
                }

                if changed || !self.published_once {
                    self.publish();
                }
            }
            Err(e) => tracing::warn!("Failed to load messages: {}", e),
        }
    }

    fn apply_pushed(&mut self, message: Message) {
        let from_counterpart = self.role.is_counterpart(message.is_admin);
        tracing::debug!("Pushed message #{}", message.id);
        if self.loads_in_flight > 0 {
            self.recent_pushes.push((self.next_seq, message.clone()));
        }
        if self.cache.merge(message) {
            self.publish();
        }
        // Reloading marks the counterpart's message read on the server.
        if from_counterpart {
            self.spawn_load();
        }
    }

    fn publish(&mut self) {
        self.published_once = true;
        self.view_tx.send_replace(render(&self.cache));
    }

    fn spawn_open(&self) {
        let transport = Arc::clone(&self.transport);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = transport.open().await;
            let _ = done_tx.send(Completion::Opened(result));
        });
    }

    fn spawn_load(&mut self) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.loads_in_flight += 1;
        let transport = Arc::clone(&self.transport);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = transport.fetch().await;
            let _ = done_tx.send(Completion::Loaded { seq, result });
        });
    }

    fn spawn_send(&self, text: String, reply: oneshot::Sender<Result<SendOutcome, ChatError>>) {
        let transport = Arc::clone(&self.transport);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = transport.send(&text).await;
            let _ = done_tx.send(Completion::Sent { result, reply });
        });
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_event(
    inbound: &mut Option<mpsc::UnboundedReceiver<ChannelEvent>>,
) -> Option<ChannelEvent> {
    match inbound {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{message, MockTransport};
    use std::time::Duration;

    const POLL: Duration = Duration::from_millis(3000);

    async fn settle() {
        time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_loads_on_each_tick() {
        let mock = MockTransport::pull(POLL);
        let (handle, task) = start(mock.clone(), Role::Customer);

        time::sleep(Duration::from_millis(9_500)).await;
        // Initial load plus ticks at 3s, 6s and 9s.
        assert_eq!(mock.fetch_count(), 4);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_loads_after_teardown() {
        let mock = MockTransport::pull(POLL);
        let (handle, task) = start(mock.clone(), Role::Customer);
        time::sleep(Duration::from_millis(3_500)).await;

        handle.shutdown();
        task.join().await;
        let at_teardown = mock.fetch_count();

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.fetch_count(), at_teardown);
        assert_eq!(*handle.link().borrow(), LinkStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_replaces_view() {
        let mock = MockTransport::pull(POLL);
        mock.set_conversation(vec![message(2, false), message(1, true)]);
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;

        let view = handle.view().borrow().clone();
        let ids: Vec<u64> = view.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_reload_does_not_republish() {
        let mock = MockTransport::pull(POLL);
        mock.set_conversation(vec![message(1, false)]);
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;

        let mut view_rx = handle.view();
        view_rx.borrow_and_update();
        handle.reload();
        handle.reload();
        settle().await;

        assert_eq!(mock.fetch_count(), 3);
        assert!(!view_rx.has_changed().unwrap());

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_keeps_view() {
        let mock = MockTransport::pull(POLL);
        mock.set_conversation(vec![message(1, false)]);
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;

        mock.fail_fetches(true);
        handle.reload();
        settle().await;

        assert_eq!(handle.view().borrow().entries.len(), 1);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_load_response_is_dropped() {
        let mock = MockTransport::pull(Duration::from_secs(600));
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;

        // Older request answers last.
        mock.set_conversation(vec![message(1, false)]);
        mock.push_fetch_delay(Duration::from_millis(500));
        handle.reload();
        settle().await;

        mock.set_conversation(vec![message(1, false), message(2, true)]);
        mock.push_fetch_delay(Duration::from_millis(10));
        handle.reload();

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.view().borrow().entries.len(), 2);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_send_makes_no_call() {
        let mock = MockTransport::pull(POLL);
        let (handle, task) = start(mock.clone(), Role::Customer);

        assert_eq!(handle.send("").await.unwrap(), SendOutcome::Skipped);
        assert_eq!(handle.send("   ").await.unwrap(), SendOutcome::Skipped);
        assert_eq!(mock.send_count(), 0);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_send_reloads_and_trims() {
        let mock = MockTransport::pull(POLL);
        mock.set_handoff(true);
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;
        assert_eq!(mock.fetch_count(), 1);

        let outcome = handle.send("  where is my order?  ").await.unwrap();
        assert_eq!(outcome, SendOutcome::Delivered { handoff: true });
        assert_eq!(mock.sent_texts(), vec!["where is my order?".to_string()]);

        settle().await;
        assert_eq!(mock.fetch_count(), 2);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_send_is_reported_without_reload() {
        let mock = MockTransport::pull(POLL);
        mock.reject_sends(Some("error"));
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;

        let err = handle.send("hello").await.unwrap_err();
        assert!(matches!(err, ChatError::Protocol(ref d) if d == "error"));
        settle().await;
        assert_eq!(mock.fetch_count(), 1);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_resyncs_on_connect_and_upserts() {
        let (mock, events) = MockTransport::push();
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;
        assert_eq!(mock.fetch_count(), 1);
        assert_eq!(*handle.link().borrow(), LinkStatus::Connected);

        // Customer sees an admin reply: merged, then reloaded to mark it read.
        mock.set_conversation(vec![message(1, false), message(3, true)]);
        events.send(ChannelEvent::Message(message(3, true))).unwrap();
        settle().await;
        assert_eq!(mock.fetch_count(), 2);

        // Own echo: merged in order, no extra reload.
        events.send(ChannelEvent::Message(message(2, false))).unwrap();
        settle().await;
        assert_eq!(mock.fetch_count(), 2);

        let ids: Vec<u64> = handle.view().borrow().entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        // Duplicate delivery leaves the view alone.
        let mut view_rx = handle.view();
        view_rx.borrow_and_update();
        events.send(ChannelEvent::Message(message(2, false))).unwrap();
        settle().await;
        assert!(!view_rx.has_changed().unwrap());

        handle.shutdown();
        task.join().await;
        assert!(mock.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_survives_older_load_answering_late() {
        let (mock, events) = MockTransport::push();
        // The resync after connect is slow and predates the push.
        mock.push_fetch_delay(Duration::from_millis(500));
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;

        events.send(ChannelEvent::Message(message(1, false))).unwrap();
        settle().await;
        assert_eq!(handle.view().borrow().entries.len(), 1);

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(mock.fetch_count(), 1);
        let ids: Vec<u64> = handle.view().borrow().entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1]);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_before_newer_load_is_not_reapplied() {
        let (mock, events) = MockTransport::push();
        mock.push_fetch_delay(Duration::from_millis(500));
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;

        // Pushed, then deleted server side before a later reload is issued.
        events.send(ChannelEvent::Message(message(1, false))).unwrap();
        settle().await;
        handle.reload();
        time::sleep(Duration::from_secs(1)).await;

        assert!(handle.view().borrow().entries.is_empty());

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_empty_load_is_published() {
        let mock = MockTransport::pull(POLL);
        let (handle, task) = start(mock.clone(), Role::Customer);
        let mut view_rx = handle.view();
        view_rx.borrow_and_update();
        settle().await;

        assert!(view_rx.has_changed().unwrap());
        assert!(view_rx.borrow_and_update().is_empty());

        handle.reload();
        settle().await;
        assert!(!view_rx.has_changed().unwrap());

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_marks_customer_messages_read() {
        let (mock, events) = MockTransport::push();
        let (handle, task) = start(mock.clone(), Role::Admin { user_id: 4 });
        settle().await;

        events.send(ChannelEvent::Message(message(1, false))).unwrap();
        settle().await;
        assert_eq!(mock.fetch_count(), 2);

        events.send(ChannelEvent::Message(message(2, true))).unwrap();
        settle().await;
        assert_eq!(mock.fetch_count(), 2);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_send_relies_on_echo() {
        let (mock, _events) = MockTransport::push();
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;

        handle.send("hi").await.unwrap();
        settle().await;
        assert_eq!(mock.fetch_count(), 1);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_down_still_loads_and_refuses_sends() {
        let mock = MockTransport::push_failing();
        mock.set_conversation(vec![message(1, true)]);
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;

        assert_eq!(*handle.link().borrow(), LinkStatus::Disconnected);
        assert_eq!(handle.view().borrow().entries.len(), 1);

        let err = handle.send("anyone there?").await.unwrap_err();
        assert!(matches!(err, ChatError::ChannelUnavailable));

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_close_marks_link_down() {
        let (mock, events) = MockTransport::push();
        let (handle, task) = start(mock.clone(), Role::Customer);
        settle().await;

        events
            .send(ChannelEvent::Closed(Some("heartbeat timed out".to_string())))
            .unwrap();
        settle().await;
        assert_eq!(*handle.link().borrow(), LinkStatus::Disconnected);

        handle.shutdown();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_shutdown_is_unavailable() {
        let mock = MockTransport::pull(POLL);
        let (handle, task) = start(mock.clone(), Role::Customer);
        handle.shutdown();
        task.join().await;

        let err = handle.send("late").await.unwrap_err();
        assert!(matches!(err, ChatError::ChannelUnavailable));
    }
}
