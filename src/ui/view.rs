use crossterm::event::KeyEvent;
use ratatui::prelude::*;

/// A keyboard shortcut hint for display in the header
#[derive(Debug, Clone)]
pub struct Shortcut {
  pub key: &'static str,
  pub label: &'static str,
  pub priority: u8, // Lower = shown first
}

impl Shortcut {
  pub const fn new(key: &'static str, label: &'static str) -> Self {
    Self {
      key,
      label,
      priority: 100,
    }
  }

  pub const fn with_priority(mut self, priority: u8) -> Self {
    self.priority = priority;
    self
  }
}

/// Actions that a view can request in response to user input
pub enum ViewAction {
  /// No action needed
  None,
  /// Push a new view onto the stack
  Push(Box<dyn View>),
  /// Pop current view from stack (go back)
  Pop,
}

/// Trait for view behavior
///
/// Views handle their own input and return actions for the App to execute.
/// Views that load data own a `ViewSync` and poll it in `tick()`; dropping
/// the view releases its subscriptions.
pub trait View {
  /// Handle a key event, returning an action for App to execute
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction;

  /// Render the view to the frame
  fn render(&mut self, frame: &mut Frame, area: Rect);

  /// Get the breadcrumb label for this view
  fn breadcrumb_label(&self) -> String;

  /// Called on each tick, for every view on the stack
  fn tick(&mut self) {}

  /// Called when the view above this one was popped
  fn resume(&mut self) {}

  /// Outcome of the last action, shown in the footer
  fn status(&self) -> Option<&str> {
    None
  }

  /// Get keyboard shortcuts to display in the header
  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("r", "refresh").with_priority(10),
      Shortcut::new("q", "back").with_priority(30),
    ]
  }
}
