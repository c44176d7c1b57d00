//! The per-window stack of active flows.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::model::FlowKey;

/// One active flow instance and the last view displayed while it was on top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowFrame {
    pub flow: FlowKey,
    pub last_displayed_view_id: Option<String>,
}

/// Active flows of one client window, top first.
///
/// `return_depth` frames at the top are looked through while a return is
/// computing its target. The stack lives in the session under
/// [`FlowStack::session_key_for`] and is written back after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStack {
    session_key: String,
    return_depth: usize,
    frames: VecDeque<FlowFrame>,
}

impl FlowStack {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            return_depth: 0,
            frames: VecDeque::new(),
        }
    }

    /// `<windowId>_flowStack`
    pub fn session_key_for(client_window_id: &str) -> String {
        format!("{client_window_id}_flowStack")
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn size(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn return_depth(&self) -> usize {
        self.return_depth
    }

    /// Frames from top to bottom.
    pub fn iter(&self) -> impl Iterator<Item = &FlowFrame> {
        self.frames.iter()
    }

    pub fn push(&mut self, flow: FlowKey, last_displayed_view_id: Option<String>) {
        self.frames.push_front(FlowFrame {
            flow,
            last_displayed_view_id,
        });
    }

    pub fn pop(&mut self) -> Option<FlowFrame> {
        self.frames.pop_front()
    }

    pub fn peek(&self) -> Option<&FlowFrame> {
        self.frames.front()
    }

    /// The frame below the `return_depth` looked-through frames.
    pub fn current(&self) -> Option<&FlowFrame> {
        if self.frames.len() <= self.return_depth {
            return None;
        }
        self.frames.get(self.return_depth)
    }

    pub fn current_flow_depth(&self) -> usize {
        self.frames.len().saturating_sub(self.return_depth)
    }

    pub fn last_displayed_view_id(&self) -> Option<&str> {
        self.current()
            .and_then(|frame| frame.last_displayed_view_id.as_deref())
    }

    pub fn contains(&self, flow: &FlowKey) -> bool {
        self.frames.iter().any(|frame| &frame.flow == flow)
    }

    pub fn enter_return_mode(&mut self) {
        self.return_depth += 1;
    }

    pub fn leave_return_mode(&mut self) {
        self.return_depth = self.return_depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> FlowKey {
        FlowKey::new("", id)
    }

    fn stack_of(ids: &[&str]) -> FlowStack {
        let mut stack = FlowStack::new(FlowStack::session_key_for("w"));
        for id in ids {
            stack.push(key(id), Some(format!("/{id}.xhtml")));
        }
        stack
    }

    #[test]
    fn session_key_uses_window_id() {
        assert_eq!(FlowStack::session_key_for("abc"), "abc_flowStack");
        assert_eq!(stack_of(&[]).session_key(), "w_flowStack");
    }

    #[test]
    fn push_pop_symmetry() {
        let mut stack = stack_of(&["f1"]);
        let before = stack.current_flow_depth();
        stack.push(key("f2"), None);
        assert_eq!(stack.size(), 2);
        assert_eq!(stack.pop().unwrap().flow.id, "f2");
        assert_eq!(stack.current_flow_depth(), before);
    }

    #[test]
    fn return_depth_looks_through_top_frames() {
        let mut stack = stack_of(&["f1", "f2", "f3"]);
        assert_eq!(stack.current().unwrap().flow.id, "f3");
        stack.enter_return_mode();
        assert_eq!(stack.current().unwrap().flow.id, "f2");
        assert_eq!(stack.current_flow_depth(), 2);
        assert_eq!(stack.last_displayed_view_id(), Some("/f2.xhtml"));

        stack.enter_return_mode();
        stack.enter_return_mode();
        assert!(stack.current().is_none());
        assert_eq!(stack.current_flow_depth(), 0);

        for _ in 0..4 {
            stack.leave_return_mode();
        }
        assert_eq!(stack.return_depth(), 0);
    }

    #[test]
    fn contains_scans_every_frame() {
        let stack = stack_of(&["f1", "f2"]);
        assert!(stack.contains(&key("f1")));
        assert!(!stack.contains(&key("f9")));
        assert_eq!(stack.peek().unwrap().flow.id, "f2");
    }

    #[test]
    fn serializes_for_session_storage() {
        let stack = stack_of(&["f1"]);
        let json = serde_json::to_string(&stack).unwrap();
        let back: FlowStack = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stack);
    }
}
