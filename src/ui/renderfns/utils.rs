use ratatui::prelude::Color;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Get the display color for a pack or selection status
pub fn status_color(status: &str) -> Color {
  match status {
    "approved" | "published" => Color::Green,
    "pending" | "draft" => Color::Yellow,
    "rejected" | "closed" => Color::Red,
    _ => Color::White,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_short_string() {
    assert_eq!(truncate("hello", 10), "hello");
  }

  #[test]
  fn test_truncate_exact_length() {
    assert_eq!(truncate("hello", 5), "hello");
  }

  #[test]
  fn test_truncate_long_string() {
    assert_eq!(truncate("hello world", 8), "hello...");
  }

  #[test]
  fn test_truncate_counts_characters() {
    assert_eq!(truncate("Zoë Müller-Łukasiewicz", 8), "Zoë M...");
  }

  #[test]
  fn test_status_color_settled() {
    assert_eq!(status_color("approved"), Color::Green);
    assert_eq!(status_color("published"), Color::Green);
    assert_eq!(status_color("rejected"), Color::Red);
    assert_eq!(status_color("closed"), Color::Red);
  }

  #[test]
  fn test_status_color_open() {
    assert_eq!(status_color("pending"), Color::Yellow);
    assert_eq!(status_color("draft"), Color::Yellow);
  }

  #[test]
  fn test_status_color_default() {
    assert_eq!(status_color("archived"), Color::White);
  }
}
