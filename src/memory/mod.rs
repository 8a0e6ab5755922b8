//! Short-term conversational memory.
//!
//! A [`MemoryWindow`] keeps the most recent turns of one conversation. It is
//! owned by exactly one agent and never shared between phone numbers.
//!
//! Capacity counts single turns, not exchanges: the default of 10 keeps the
//! last five user/assistant pairs. With an odd capacity the oldest kept turn
//! can be an assistant reply; the Gemini client drops such a leading turn
//! when building the request.

use std::collections::VecDeque;

use crate::llm::ConversationTurn;

/// Bounded FIFO of conversation turns, oldest first.
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl MemoryWindow {
    /// Create a window holding at most `capacity` turns (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a turn, evicting the oldest ones beyond capacity.
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    /// Ordered copy of the current turns.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TurnRole;

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = MemoryWindow::new(4);
        for i in 0..25 {
            window.append(ConversationTurn::user(format!("msg {}", i)));
            assert!(window.len() <= 4);
        }

        let texts: Vec<String> = window.snapshot().into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["msg 21", "msg 22", "msg 23", "msg 24"]);
    }

    #[test]
    fn test_snapshot_preserves_order_and_roles() {
        let mut window = MemoryWindow::new(10);
        window.append(ConversationTurn::user("Hola"));
        window.append(ConversationTurn::assistant("¡Hola! ¿En qué puedo ayudarte?"));

        let snapshot = window.snapshot();
        assert_eq!(snapshot[0].role, TurnRole::User);
        assert_eq!(snapshot[1].role, TurnRole::Assistant);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = MemoryWindow::new(0);
        assert_eq!(window.capacity(), 1);
        window.append(ConversationTurn::user("a"));
        window.append(ConversationTurn::user("b"));
        assert_eq!(window.snapshot(), vec![ConversationTurn::user("b")]);
    }

    #[test]
    fn test_clear_empties_window() {
        let mut window = MemoryWindow::new(2);
        window.append(ConversationTurn::user("a"));
        window.clear();
        assert!(window.is_empty());
    }
}
