//! Unit tests for `ClipboardHistory`.

use spellhost::clipboard::{ClipboardHistory, MAX_HISTORY};

fn history_of(texts: &[&str]) -> ClipboardHistory {
    let mut history = ClipboardHistory::new();
    for (i, text) in texts.iter().enumerate() {
        history.add(text, 1_700_000_000_000 + i as u64);
    }
    history
}

#[test]
fn newest_entry_is_first_and_current() {
    let history = history_of(&["one", "two", "three"]);

    let texts: Vec<&str> = history.items(None).iter().map(|i| i.text.as_str()).collect();
    assert_eq!(texts, vec!["three", "two", "one"]);
    assert_eq!(history.current(), "three");
}

#[test]
fn blank_and_repeated_text_is_ignored() {
    let mut history = history_of(&["one"]);
    assert!(!history.add("   ", 1));
    assert!(!history.add("one", 2));
    assert_eq!(history.len(), 1);
}

#[test]
fn re_copied_text_moves_to_front() {
    let mut history = history_of(&["one", "two"]);
    assert!(history.add("one", 3));

    let texts: Vec<&str> = history.items(None).iter().map(|i| i.text.as_str()).collect();
    assert_eq!(texts, vec!["one", "two"]);
}

#[test]
fn timestamp_comes_from_agent_millis() {
    let mut history = ClipboardHistory::new();
    history.add("x", 1_700_000_000_123);
    assert_eq!(history.items(None)[0].timestamp.timestamp_millis(), 1_700_000_000_123);
}

#[test]
fn cycle_wraps_in_both_directions() {
    let mut history = history_of(&["one", "two", "three"]);

    assert_eq!(history.cycle(1), Some("two"));
    assert_eq!(history.cycle(1), Some("one"));
    assert_eq!(history.cycle(1), Some("three"));
    assert_eq!(history.cycle(-1), Some("one"));
    assert_eq!(history.current(), "one");
}

#[test]
fn cycle_on_empty_history_is_none() {
    let mut history = ClipboardHistory::new();
    assert_eq!(history.cycle(1), None);
}

#[test]
fn history_is_capped() {
    let mut history = ClipboardHistory::new();
    for i in 0..(MAX_HISTORY + 5) {
        history.add(&format!("entry {i}"), 0);
    }
    assert_eq!(history.len(), MAX_HISTORY);
    assert_eq!(history.items(Some(1))[0].text, format!("entry {}", MAX_HISTORY + 4));
}

#[test]
fn remove_and_clear() {
    let mut history = history_of(&["one", "two"]);
    let id = history.items(None)[1].id;

    assert!(history.remove(id));
    assert!(!history.remove(id));
    assert_eq!(history.len(), 1);

    history.clear();
    assert!(history.is_empty());
}
