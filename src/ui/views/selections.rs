use crate::portal::keys::packs_flag;
use crate::portal::{
  CachedPortalClient, Pack, PackKind, PackStatus, PortalKey, Selection, SelectionStatus,
};
use crate::query::QueryState;
use crate::sync::{PendingMutation, ViewSync};
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{status_color, truncate};
use crate::ui::view::{Shortcut, View, ViewAction};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use tracing::info;

/// Replace the matching selection with the confirmed record.
fn apply_selection(selections: &mut Vec<Selection>, updated: &Selection) {
  for selection in selections.iter_mut().filter(|s| s.id == updated.id) {
    *selection = updated.clone();
  }
}

/// Pack detail: the pack header plus every submitted selection
pub struct SelectionListView {
  client: CachedPortalClient,
  group_id: String,
  pack_id: String,
  pack_title: String,
  kind: PackKind,
  pack: ViewSync<Pack, PortalKey>,
  selections: ViewSync<Vec<Selection>, PortalKey>,
  list_state: ListState,
  pending_status: Option<PendingMutation<Selection>>,
  pending_publish: Option<PendingMutation<Pack>>,
  /// Set once a write was confirmed; the parent list is refreshed on the way out
  mutated: bool,
  message: Option<String>,
}

impl SelectionListView {
  pub fn new(client: CachedPortalClient, group_id: String, pack: &Pack) -> Self {
    let kind = pack.kind;
    let pack_sync = client.mount_pack(&group_id, &pack.id, kind);
    let selections = client.mount_selections(&group_id, &pack.id, kind);
    Self {
      client,
      group_id,
      pack_id: pack.id.clone(),
      pack_title: pack.title.clone(),
      kind,
      pack: pack_sync,
      selections,
      list_state: ListState::default(),
      pending_status: None,
      pending_publish: None,
      mutated: false,
      message: None,
    }
  }

  fn rows(&self) -> &[Selection] {
    self.selections.data().map(|v| v.as_slice()).unwrap_or(&[])
  }

  fn is_busy(&self) -> bool {
    self.pending_status.is_some() || self.pending_publish.is_some()
  }

  fn set_status(&mut self, status: SelectionStatus) {
    if self.is_busy() {
      return;
    }
    let index = self.list_state.selected().unwrap_or(0);
    let Some(selection) = self.rows().get(index) else {
      return;
    };
    if selection.status == status {
      return;
    }

    let client = self.client.clone();
    let kind = self.kind;
    let id = selection.id.clone();
    self.message = Some(format!("Saving {}...", status.as_str()));
    self.pending_status = Some(PendingMutation::spawn(async move {
      client.set_selection_status(kind, &id, status).await
    }));
  }

  fn publish(&mut self) {
    if self.is_busy() {
      return;
    }
    if self.pack.data().map(|p| p.status) != Some(PackStatus::Draft) {
      self.message = Some("Only draft packs can be published".to_string());
      return;
    }

    let client = self.client.clone();
    let kind = self.kind;
    let id = self.pack_id.clone();
    self.message = Some("Publishing...".to_string());
    self.pending_publish = Some(PendingMutation::spawn(async move {
      client.publish_pack(kind, &id).await
    }));
  }

  /// Apply finished writes: patch local state, invalidate, report.
  fn settle_mutations(&mut self) {
    if let Some(outcome) = self.pending_status.as_mut().and_then(|p| p.poll()) {
      self.pending_status = None;
      self.message = Some(match self.selections.confirm(outcome, &[], apply_selection) {
        Ok(updated) => {
          self.mutated = true;
          info!(selection = %updated.id, status = updated.status.as_str(), "selection updated");
          format!(
            "{} {}",
            updated.student_name.as_deref().unwrap_or(&updated.student_id),
            updated.status.as_str()
          )
        }
        Err(e) => format!("Update failed: {}", e),
      });
    }

    if let Some(outcome) = self.pending_publish.as_mut().and_then(|p| p.poll()) {
      self.pending_publish = None;
      let list_key = PortalKey::packs(&self.group_id, self.kind);
      self.message = Some(
        match self
          .pack
          .confirm(outcome, &[&list_key], |pack, updated| *pack = updated.clone())
        {
          Ok(updated) => {
            self.mutated = true;
            info!(pack = %updated.id, "pack published");
            format!("{} published", updated.title)
          }
          Err(e) => format!("Publish failed: {}", e),
        },
      );
    }
  }

  fn render_header(&self, frame: &mut Frame, area: Rect) {
    let line = match self.pack.state() {
      QueryState::Ready(pack) => {
        let status = pack.status.as_str();
        Line::from(vec![
          Span::styled(" Status: ", Style::default().fg(Color::DarkGray)),
          Span::styled(status, Style::default().fg(status_color(status))),
          Span::styled("   Deadline: ", Style::default().fg(Color::DarkGray)),
          Span::raw(pack.deadline.as_deref().unwrap_or("none")),
          Span::styled("   Type: ", Style::default().fg(Color::DarkGray)),
          Span::raw(self.kind.label()),
        ])
      }
      QueryState::Error(e) => Line::from(Span::styled(
        format!(" Pack unavailable: {}", e),
        Style::default().fg(Color::Red),
      )),
      _ => Line::from(Span::styled(
        " Loading pack...",
        Style::default().fg(Color::DarkGray),
      )),
    };
    frame.render_widget(Paragraph::new(line), area);
  }

  fn render_list(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.rows().len();
    ensure_valid_selection(&mut self.list_state, len);

    let title = match self.selections.state() {
      QueryState::Loading => format!(" {} (loading...) ", self.pack_title),
      QueryState::Error(e) => format!(" {} (error: {}) ", self.pack_title, e),
      _ => format!(" {} ({} selections) ", self.pack_title, len),
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if len == 0 && !self.selections.is_loading() {
      let content = if self.selections.error().is_some() {
        "Failed to load selections. Press 'r' to retry."
      } else {
        "No selections submitted yet."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = self
      .rows()
      .iter()
      .map(|selection| {
        let status = selection.status.as_str();
        let student = selection
          .student_name
          .as_deref()
          .unwrap_or(&selection.student_id);
        ListItem::new(Line::from(vec![
          Span::styled(
            format!("{:<10}", status),
            Style::default().fg(status_color(status)),
          ),
          Span::raw(" "),
          Span::styled(
            format!("{:<24}", truncate(student, 24)),
            Style::default().fg(Color::Cyan),
          ),
          Span::raw(" "),
          Span::raw(truncate(&selection.choices.join(", "), 60)),
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
}

impl View for SelectionListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('a') => self.set_status(SelectionStatus::Approved),
      KeyCode::Char('x') => self.set_status(SelectionStatus::Rejected),
      KeyCode::Char('p') => self.publish(),
      KeyCode::Char('r') => {
        self.pack.force_refresh();
        self.selections.force_refresh();
      }
      KeyCode::Char('q') | KeyCode::Esc => {
        if self.mutated {
          self.client.request_refresh(packs_flag(self.kind));
        }
        return ViewAction::Pop;
      }
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([Constraint::Length(1), Constraint::Min(1)])
      .split(area);

    self.render_header(frame, chunks[0]);
    self.render_list(frame, chunks[1]);
  }

  fn breadcrumb_label(&self) -> String {
    self.pack_title.clone()
  }

  fn tick(&mut self) {
    self.pack.poll();
    self.selections.poll();
    self.settle_mutations();
  }

  fn status(&self) -> Option<&str> {
    self.message.as_deref()
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("a", "approve").with_priority(5),
      Shortcut::new("x", "reject").with_priority(6),
      Shortcut::new("p", "publish").with_priority(7),
      Shortcut::new("r", "refresh").with_priority(10),
      Shortcut::new("q", "back").with_priority(30),
    ]
  }
}
