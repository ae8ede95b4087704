pub mod calendar;
pub mod chat_platform;
pub mod doc_store;
pub mod group_chat;
pub mod issue_tracker;
pub mod local_vault;
pub mod mail;
pub mod message_bus;
pub mod structured_notes;

use std::sync::Arc;

use crate::registry::Registry;

/// Populates a registry with every bundled provider, at its default base
/// URL. Tests that need a mock server construct providers directly
/// instead of going through this.
pub fn register_all(registry: &Registry) {
    registry.register(Arc::new(chat_platform::ChatPlatformProvider::new()));
    registry.register(Arc::new(message_bus::MessageBusProvider::new()));
    registry.register(Arc::new(group_chat::GroupChatProvider::new()));
    registry.register(Arc::new(mail::MailProvider::new()));
    registry.register(Arc::new(issue_tracker::IssueTrackerProvider::new()));
    registry.register(Arc::new(calendar::CalendarProvider::new()));
    registry.register(Arc::new(doc_store::DocStoreProvider::new()));
    registry.register(Arc::new(structured_notes::StructuredNotesProvider::new()));
    registry.register(Arc::new(local_vault::LocalVaultProvider::new()));
}

/// Lowercases, replaces runs of non-alnum with `-`, trims edge dashes.
/// Used to build the human-readable `source` path for chat-style
/// providers (`guild/<sanitized>/channel/<sanitized>/msg/<id>`).
pub(crate) fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for ch in raw.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_name_collapses_and_trims() {
        assert_eq!(sanitize_name("Launch Thread!!"), "launch-thread");
        assert_eq!(sanitize_name("  --weird--  "), "weird");
        assert_eq!(sanitize_name("already-ok"), "already-ok");
    }
}
