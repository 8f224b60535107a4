use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::portal::{CachedPortalClient, PackKind};
use crate::ui;
use crate::ui::view::{View, ViewAction};
use crate::ui::views::{GroupListView, PackListView};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::{stdout, Stdout};
use std::time::Duration;
use tracing::info;

/// Main application state
pub struct App {
  /// Navigation stack - root is always at index 0
  view_stack: Vec<Box<dyn View>>,

  /// Shown in the header: store host, or "demo"
  store_label: String,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(client: CachedPortalClient, config: &Config, store_label: String) -> Self {
    let mut view_stack: Vec<Box<dyn View>> = vec![Box::new(GroupListView::new(client.clone()))];

    // Open straight into the configured group
    if let Some(group) = &config.default_group {
      view_stack.push(Box::new(PackListView::new(
        client,
        group.clone(),
        group.clone(),
        PackKind::Course,
      )));
    }

    Self {
      view_stack,
      store_label,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = self.event_loop(&mut terminal).await;

    // Cleanup terminal, even if the loop failed
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    let mut events = EventHandler::new(Duration::from_millis(250));

    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(Event::Key(key)) => self.handle_key(key),
        Some(Event::Tick) => self.tick(),
        None => break,
      }
    }

    info!("shutting down");
    Ok(())
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    let action = match self.view_stack.last_mut() {
      Some(view) => view.handle_key(key),
      None => ViewAction::Pop,
    };
    self.apply(action);
  }

  fn apply(&mut self, action: ViewAction) {
    match action {
      ViewAction::None => {}
      ViewAction::Push(view) => self.view_stack.push(view),
      ViewAction::Pop => {
        if self.view_stack.len() > 1 {
          // Dropping the view releases its subscriptions
          self.view_stack.pop();
          if let Some(parent) = self.view_stack.last_mut() {
            parent.resume();
          }
        } else {
          self.should_quit = true;
        }
      }
    }
  }

  /// Every mounted view keeps draining its subscriptions, not just the visible one.
  fn tick(&mut self) {
    for view in &mut self.view_stack {
      view.tick();
    }
  }

  // Accessors for UI rendering
  pub fn current_view(&self) -> Option<&dyn View> {
    self.view_stack.last().map(|v| v.as_ref())
  }

  pub fn current_view_mut(&mut self) -> Option<&mut Box<dyn View>> {
    self.view_stack.last_mut()
  }

  pub fn store_label(&self) -> &str {
    &self.store_label
  }

  pub fn view_breadcrumb(&self) -> Vec<String> {
    self
      .view_stack
      .iter()
      .map(|v| v.breadcrumb_label())
      .collect()
  }

  pub fn depth(&self) -> usize {
    self.view_stack.len()
  }
}
