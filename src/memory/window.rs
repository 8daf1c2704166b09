//! Short-term conversation window.

use std::collections::VecDeque;

use crate::llm::ChatMessage;

/// Bounded FIFO of recent messages. Appending when full evicts the oldest.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
}

impl ConversationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a message, evicting from the front while over capacity.
    pub fn push(&mut self, message: ChatMessage) {
        if self.capacity == 0 {
            return;
        }
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    /// Messages oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    /// Owned copy, for use outside a lock.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_under_capacity_keeps_everything() {
        let mut window = ConversationWindow::new(10);
        window.push(ChatMessage::user("a"));
        window.push(ChatMessage::assistant("b"));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut window = ConversationWindow::new(10);
        for i in 0..25 {
            window.push(ChatMessage::user(i.to_string()));
        }

        assert_eq!(window.len(), 10);
        let contents: Vec<_> = window.messages().map(|m| m.content.clone()).collect();
        let expected: Vec<_> = (15..25).map(|i| i.to_string()).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_clear() {
        let mut window = ConversationWindow::new(3);
        window.push(ChatMessage::user("x"));
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.capacity(), 3);
    }

    #[test]
    fn test_zero_capacity_stays_empty() {
        let mut window = ConversationWindow::new(0);
        window.push(ChatMessage::user("x"));
        assert!(window.is_empty());
    }
}
