use crate::portal::{CachedPortalClient, Group, PackKind, PortalKey};
use crate::query::QueryState;
use crate::sync::ViewSync;
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::truncate;
use crate::ui::view::{Shortcut, View, ViewAction};
use crate::ui::views::{PackListView, UserListView};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

/// Root view: every student group
pub struct GroupListView {
  client: CachedPortalClient,
  sync: ViewSync<Vec<Group>, PortalKey>,
  list_state: ListState,
}

impl GroupListView {
  pub fn new(client: CachedPortalClient) -> Self {
    let sync = client.mount_groups();
    Self {
      client,
      sync,
      list_state: ListState::default(),
    }
  }

  fn groups(&self) -> &[Group] {
    self.sync.data().map(|v| v.as_slice()).unwrap_or(&[])
  }

  fn selected_group(&self) -> Option<&Group> {
    self.list_state.selected().and_then(|i| self.groups().get(i))
  }
}

impl View for GroupListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('r') => self.sync.force_refresh(),
      KeyCode::Char('u') => {
        return ViewAction::Push(Box::new(UserListView::new(self.client.clone(), None)));
      }
      KeyCode::Enter => {
        if let Some(group) = self.selected_group() {
          return ViewAction::Push(Box::new(PackListView::new(
            self.client.clone(),
            group.id.clone(),
            group.name.clone(),
            PackKind::Course,
          )));
        }
      }
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.groups().len();
    ensure_valid_selection(&mut self.list_state, len);

    let title = match self.sync.state() {
      QueryState::Loading => " Groups (loading...) ".to_string(),
      QueryState::Error(e) => format!(" Groups (error: {}) ", e),
      _ => format!(" Groups ({}) ", len),
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if len == 0 && !self.sync.is_loading() {
      let content = if self.sync.error().is_some() {
        "Failed to load groups. Press 'r' to retry."
      } else {
        "No groups found."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = self
      .groups()
      .iter()
      .map(|group| {
        ListItem::new(Line::from(vec![
          Span::styled(
            format!("{:<12}", truncate(&group.id, 12)),
            Style::default().fg(Color::Cyan),
          ),
          Span::raw(" "),
          Span::raw(format!("{:<32}", truncate(&group.name, 32))),
          Span::raw(" "),
          Span::styled(
            truncate(group.description.as_deref().unwrap_or(""), 40),
            Style::default().fg(Color::DarkGray),
          ),
        ]))
      })
      .collect();

    let list = List::new(items)
      .block(block)
      .highlight_style(
        Style::default()
          .bg(Color::DarkGray)
          .add_modifier(Modifier::BOLD),
      )
      .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut self.list_state);
  }

  fn breadcrumb_label(&self) -> String {
    "Groups".to_string()
  }

  fn tick(&mut self) {
    self.sync.poll();
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("enter", "packs").with_priority(5),
      Shortcut::new("u", "users").with_priority(8),
      Shortcut::new("r", "refresh").with_priority(10),
      Shortcut::new("q", "quit").with_priority(30),
    ]
  }
}
