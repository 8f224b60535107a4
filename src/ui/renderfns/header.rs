use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::ui::view::Shortcut;

/// Draw the header bar with logo, backend, and the current view's shortcuts
pub fn draw_header(frame: &mut Frame, area: Rect, store_url: &str, shortcuts: &[Shortcut]) {
  let mut spans = vec![
    Span::styled(" elective-sync ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", extract_domain(store_url)),
      Style::default().fg(Color::White),
    ),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::raw(" "),
  ];

  let mut sorted: Vec<&Shortcut> = shortcuts.iter().collect();
  sorted.sort_by_key(|s| s.priority);

  for shortcut in sorted {
    // Keys and brackets highlighted, descriptions dimmed
    spans.push(Span::styled(
      format!("<{}>", shortcut.key),
      Style::default().fg(Color::Cyan),
    ));
    spans.push(Span::styled(
      format!(" {}   ", shortcut.label),
      Style::default().fg(Color::DarkGray),
    ));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));

  frame.render_widget(paragraph, area);
}

/// Extract the host from the store URL
fn extract_domain(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extract_domain() {
    assert_eq!(extract_domain("https://abc.supabase.co"), "abc.supabase.co");
    assert_eq!(
      extract_domain("https://portal.uni.edu/rest/v1"),
      "portal.uni.edu"
    );
    assert_eq!(extract_domain("http://localhost:54321"), "localhost:54321");
    assert_eq!(extract_domain("demo"), "demo");
  }
}
