use crate::portal::{CachedPortalClient, PortalKey, Role, User};
use crate::query::QueryState;
use crate::sync::ViewSync;
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::truncate;
use crate::ui::view::{View, ViewAction};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

fn role_color(role: Role) -> Color {
  match role {
    Role::Admin => Color::Magenta,
    Role::Manager => Color::Yellow,
    Role::Student => Color::White,
  }
}

/// Read-only list of user profiles, for one group or everyone
pub struct UserListView {
  group_id: Option<String>,
  sync: ViewSync<Vec<User>, PortalKey>,
  list_state: ListState,
}

impl UserListView {
  pub fn new(client: CachedPortalClient, group_id: Option<String>) -> Self {
    let sync = client.mount_users(group_id.as_deref());
    Self {
      group_id,
      sync,
      list_state: ListState::default(),
    }
  }

  fn users(&self) -> &[User] {
    self.sync.data().map(|v| v.as_slice()).unwrap_or(&[])
  }
}

impl View for UserListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('r') => self.sync.force_refresh(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.users().len();
    ensure_valid_selection(&mut self.list_state, len);

    let label = self.breadcrumb_label();
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
      let paragraph = Paragraph::new("No users found.")
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = self
      .users()
      .iter()
      .map(|user| {
        let role = format!("{:?}", user.role).to_lowercase();
        ListItem::new(Line::from(vec![
          Span::styled(
            format!("{:<8}", role),
            Style::default().fg(role_color(user.role)),
          ),
          Span::raw(" "),
          Span::raw(format!("{:<28}", truncate(user.display_name(), 28))),
          Span::raw(" "),
          Span::styled(
            truncate(&user.email, 40),
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
    match &self.group_id {
      Some(g) => format!("Users [{}]", g),
      None => "Users".to_string(),
    }
  }

  fn tick(&mut self) {
    self.sync.poll();
  }
}
