//! Scriptable transport for session tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::api::chat::Delivered;
use crate::channel::ChannelEvent;
use crate::error::ChatError;
use crate::models::Message;

use super::transport::{Delivery, Transport};

pub fn message(id: u64, is_admin: bool) -> Message {
    Message {
        id,
        sender: if is_admin { "support" } else { "customer" }.to_string(),
        text: format!("message {}", id),
        is_admin,
        created_at: "12:00".to_string(),
        sender_id: None,
        receiver_id: None,
    }
}

pub struct MockTransport {
    delivery: Delivery,
    conversation: Mutex<Vec<Message>>,
    fetch_delays: Mutex<VecDeque<Duration>>,
    fetches: AtomicUsize,
    fail_fetches: AtomicBool,
    sent: Mutex<Vec<String>>,
    rejection: Mutex<Option<String>>,
    handoff: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
    open_fails: bool,
    opened: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    fn new(delivery: Delivery, open_fails: bool) -> Self {
        Self {
            delivery,
            conversation: Mutex::new(Vec::new()),
            fetch_delays: Mutex::new(VecDeque::new()),
            fetches: AtomicUsize::new(0),
            fail_fetches: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            rejection: Mutex::new(None),
            handoff: AtomicBool::new(false),
            events: Mutex::new(None),
            open_fails,
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn pull(interval: Duration) -> Arc<Self> {
        Arc::new(Self::new(Delivery::Pull { interval }, false))
    }

    /// Push transport plus the sender that feeds its channel events.
    pub fn push() -> (Arc<Self>, mpsc::UnboundedSender<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mock = Self::new(Delivery::Push, false);
        *mock.events.lock().unwrap() = Some(rx);
        (Arc::new(mock), tx)
    }

    /// Push transport whose channel never connects.
    pub fn push_failing() -> Arc<Self> {
        Arc::new(Self::new(Delivery::Push, true))
    }

    pub fn set_conversation(&self, messages: Vec<Message>) {
        *self.conversation.lock().unwrap() = messages;
    }

    /// Delay applied to the next fetch that has no delay queued before it.
    pub fn push_fetch_delay(&self, delay: Duration) {
        self.fetch_delays.lock().unwrap().push_back(delay);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Make every send come back with this error detail, or succeed again.
    pub fn reject_sends(&self, detail: Option<&str>) {
        *self.rejection.lock().unwrap() = detail.map(str::to_string);
    }

    pub fn set_handoff(&self, handoff: bool) {
        self.handoff.store(handoff, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn delivery(&self) -> Delivery {
        self.delivery
    }

    async fn open(&self) -> Result<Option<mpsc::UnboundedReceiver<ChannelEvent>>, ChatError> {
        if self.open_fails {
            return Err(ChatError::Network("connection refused".to_string()));
        }
        let events = self.events.lock().unwrap().take();
        if events.is_some() {
            self.opened.store(true, Ordering::SeqCst);
        }
        Ok(events)
    }

    async fn fetch(&self) -> Result<Vec<Message>, ChatError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.conversation.lock().unwrap().clone();
        let failing = self.fail_fetches.load(Ordering::SeqCst);
        let delay = self.fetch_delays.lock().unwrap().pop_front();

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(ChatError::Network("connection reset".to_string()));
        }
        Ok(snapshot)
    }

    async fn send(&self, text: &str) -> Result<Delivered, ChatError> {
        if self.delivery == Delivery::Push && !self.opened.load(Ordering::SeqCst) {
            return Err(ChatError::ChannelUnavailable);
        }
        self.sent.lock().unwrap().push(text.to_string());
        if let Some(detail) = self.rejection.lock().unwrap().clone() {
            return Err(ChatError::Protocol(detail));
        }
        Ok(Delivered {
            handoff: self.handoff.load(Ordering::SeqCst),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
