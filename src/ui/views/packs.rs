use crate::portal::{CachedPortalClient, Pack, PackKind, PortalKey};
use crate::query::QueryState;
use crate::sync::ViewSync;
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{status_color, truncate};
use crate::ui::view::{Shortcut, View, ViewAction};
use crate::ui::views::{SelectionListView, UserListView};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

/// Packs of one group, switchable between course and exchange packs
pub struct PackListView {
  client: CachedPortalClient,
  group_id: String,
  group_name: String,
  kind: PackKind,
  sync: ViewSync<Vec<Pack>, PortalKey>,
  list_state: ListState,
}

impl PackListView {
  pub fn new(
    client: CachedPortalClient,
    group_id: String,
    group_name: String,
    kind: PackKind,
  ) -> Self {
    let sync = client.mount_packs(&group_id, kind);
    Self {
      client,
      group_id,
      group_name,
      kind,
      sync,
      list_state: ListState::default(),
    }
  }

  fn packs(&self) -> &[Pack] {
    self.sync.data().map(|v| v.as_slice()).unwrap_or(&[])
  }

  /// Swap to the other pack family. The old subscriptions go with the old sync.
  fn toggle_kind(&mut self) {
    self.kind = self.kind.toggle();
    self.sync = self.client.mount_packs(&self.group_id, self.kind);
    self.list_state = ListState::default();
  }
}

impl View for PackListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('r') => self.sync.force_refresh(),
      KeyCode::Tab | KeyCode::Char('t') => self.toggle_kind(),
      KeyCode::Char('u') => {
        return ViewAction::Push(Box::new(UserListView::new(
          self.client.clone(),
          Some(self.group_id.clone()),
        )));
      }
      KeyCode::Enter => {
        let selected = self.list_state.selected().and_then(|i| self.packs().get(i));
        if let Some(pack) = selected {
          return ViewAction::Push(Box::new(SelectionListView::new(
            self.client.clone(),
            self.group_id.clone(),
            pack,
          )));
        }
      }
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.packs().len();
    ensure_valid_selection(&mut self.list_state, len);

    let label = format!("{} [{}]", self.kind.label(), self.group_name);
    let title = match self.sync.state() {
      QueryState::Loading => format!(" {} (loading...) ", label),
      QueryState::Error(e) => format!(" {} (error: {}) ", label, e),
      _ => format!(" {} ({}) ", label, len),
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if len == 0 && !self.sync.is_loading() {
      let content = if self.sync.error().is_some() {
        "Failed to load packs. Press 'r' to retry."
      } else {
        "No packs in this group. Press Tab to switch pack type."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = self
      .packs()
      .iter()
      .map(|pack| {
        let status = pack.status.as_str();
        ListItem::new(Line::from(vec![
          Span::styled(
            format!("{:<10}", truncate(status, 10)),
            Style::default().fg(status_color(status)),
          ),
          Span::raw(" "),
          Span::raw(format!("{:<40}", truncate(&pack.title, 40))),
          Span::raw(" "),
          Span::styled(
            pack
              .deadline
              .as_deref()
              .map(|d| format!("due {}", d))
              .unwrap_or_default(),
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
    format!("{} [{}]", self.kind.label(), self.group_name)
  }

  fn tick(&mut self) {
    self.sync.poll();
  }

  /// A detail view may have requested a refresh of this list before popping.
  fn resume(&mut self) {
    self.sync.reload();
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("enter", "selections").with_priority(5),
      Shortcut::new("tab", "course/exchange").with_priority(6),
      Shortcut::new("u", "users").with_priority(8),
      Shortcut::new("r", "refresh").with_priority(10),
      Shortcut::new("q", "back").with_priority(30),
    ]
  }
}
