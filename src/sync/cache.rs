//! In-memory conversation cache

use crate::models::Message;

/// Messages of one conversation, ascending by id, no duplicate ids.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConversationCache {
    messages: Vec<Message>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Upsert one message: insert in id order, or replace the entry with the
    /// same id. Returns whether the cache changed.
    pub fn merge(&mut self, message: Message) -> bool {
        match self.messages.binary_search_by_key(&message.id, |m| m.id) {
            Ok(pos) => {
                if self.messages[pos] == message {
                    false
                } else {
                    self.messages[pos] = message;
                    true
                }
            }
            Err(pos) => {
                self.messages.insert(pos, message);
                true
            }
        }
    }

    /// Replace the whole conversation with a freshly loaded list.
    ///
    /// Servers return ascending ids; the list is still normalised so the
    /// ordering holds for any input. A repeated id keeps its last occurrence.
    /// Returns whether the cache changed.
    pub fn replace(&mut self, mut messages: Vec<Message>) -> bool {
        if !messages.windows(2).all(|w| w[0].id < w[1].id) {
            // Stable sort keeps delivery order among equal ids, so the last
            // delivered copy ends up last and survives the dedup below.
            messages.sort_by_key(|m| m.id);
            let mut deduped: Vec<Message> = Vec::with_capacity(messages.len());
            for message in messages {
                match deduped.last_mut() {
                    Some(last) if last.id == message.id => *last = message,
                    _ => deduped.push(message),
                }
            }
            messages = deduped;
        }

        if messages == self.messages {
            return false;
        }
        self.messages = messages;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: u64, text: &str) -> Message {
        Message {
            id,
            sender: "alice".to_string(),
            text: text.to_string(),
            is_admin: false,
            created_at: "10:00".to_string(),
            sender_id: None,
            receiver_id: None,
        }
    }

    fn ids(cache: &ConversationCache) -> Vec<u64> {
        cache.get().iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_merge_inserts_in_order() {
        let mut cache = ConversationCache::new();
        cache.replace(vec![msg(1, "a"), msg(3, "c")]);

        assert!(cache.merge(msg(2, "b")));
        assert_eq!(ids(&cache), vec![1, 2, 3]);
    }

    #[test]
    fn test_merge_replaces_same_id() {
        let mut cache = ConversationCache::new();
        cache.merge(msg(4, "draft"));
        assert!(cache.merge(msg(4, "final")));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get()[0].text, "final");
    }

    #[test]
    fn test_duplicate_merge_is_idempotent() {
        let mut once = ConversationCache::new();
        once.merge(msg(1, "a"));
        once.merge(msg(5, "e"));

        let mut twice = once.clone();
        assert!(!twice.merge(msg(5, "e")));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_any_merge_sequence_stays_sorted_and_unique() {
        // Deterministic pseudo-random id sequence with plenty of repeats.
        let mut cache = ConversationCache::new();
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        for round in 0..500 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let id = state % 64;
            cache.merge(msg(id, &format!("r{}", round)));

            let current = ids(&cache);
            assert!(current.windows(2).all(|w| w[0] < w[1]), "unsorted: {:?}", current);
        }
        assert!(cache.len() <= 64);
    }

    #[test]
    fn test_replace_reports_change() {
        let mut cache = ConversationCache::new();
        assert!(cache.replace(vec![msg(1, "a"), msg(2, "b")]));
        assert!(!cache.replace(vec![msg(1, "a"), msg(2, "b")]));
        assert!(cache.replace(vec![msg(1, "a"), msg(2, "edited")]));
    }

    #[test]
    fn test_replace_normalises_unordered_input() {
        let mut cache = ConversationCache::new();
        cache.replace(vec![msg(3, "c"), msg(1, "a"), msg(3, "c2"), msg(2, "b")]);

        assert_eq!(ids(&cache), vec![1, 2, 3]);
        assert_eq!(cache.get()[2].text, "c2");
    }

    #[test]
    fn test_replace_with_empty_clears() {
        let mut cache = ConversationCache::new();
        cache.merge(msg(1, "a"));
        assert!(cache.replace(Vec::new()));
        assert!(cache.is_empty());
    }
}
