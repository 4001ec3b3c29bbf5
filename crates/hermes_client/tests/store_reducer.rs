//! Conversation store: intents, invariants and derived reads. Pure, no runtime.

use chrono::{TimeDelta, Utc};
use hermes_client::store::{truncate_title, DEFAULT_TITLE, GREETING, TITLE_ELLIPSIS};
use hermes_client::{
    reduce, AssistantUpdate, ChatState, Conversation, ConversationStore, Intent, Role,
};

fn store_with_id(id: &str) -> ConversationStore {
    ConversationStore::from_state(ChatState::with_conversation(Conversation::seeded_with_id(
        id,
        Utc::now(),
    )))
}

#[test]
fn new_store_holds_one_greeting_conversation() {
    let store = ConversationStore::new();
    assert_eq!(store.conversations().len(), 1);
    let current = store.current().expect("current conversation");
    assert_eq!(current.title, DEFAULT_TITLE);
    assert_eq!(current.messages.len(), 1);
    assert_eq!(current.messages[0].role, Role::Assistant);
    assert_eq!(current.messages[0].content, GREETING);
}

#[test]
fn additions_are_appended_in_order() {
    let mut store = store_with_id("c1");
    let now = Utc::now();
    let texts = ["first", "second", "third", "fourth"];
    for (i, text) in texts.iter().enumerate() {
        if i % 2 == 0 {
            store.add_user_message("c1", text, now);
        } else {
            store.add_assistant_message("c1", text, now);
        }
    }
    let conv = store.conversation("c1").unwrap();
    // Greeting plus one message per addition.
    assert_eq!(conv.messages.len(), 1 + texts.len());
    let contents: Vec<&str> = conv.messages[1..].iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, texts);
    assert_eq!(conv.messages[1].role, Role::User);
    assert_eq!(conv.messages[2].role, Role::Assistant);
}

#[test]
fn add_to_unknown_conversation_is_a_noop() {
    let mut store = store_with_id("c1");
    let before = store.state().clone();
    store.add_user_message("missing", "hello", Utc::now());
    assert_eq!(store.state(), &before);
}

#[test]
fn assistant_update_is_noop_when_last_message_is_from_user() {
    let mut store = store_with_id("c1");
    store.add_user_message("c1", "question", Utc::now());
    let before = store.state().clone();

    store.update_assistant_message("c1", AssistantUpdate::Append("ignored".into()));
    store.set_sources("c1", vec!["doc.pdf".into()], Some("rag".into()));
    let ran = store.update_assistant_message_with("c1", |m| m.content.clear());

    assert!(!ran);
    assert_eq!(store.state(), &before);
}

#[test]
fn non_rag_token_replaces_accumulated_content() {
    let mut store = store_with_id("c1");
    store.add_assistant_message("c1", "A", Utc::now());
    store.update_assistant_message(
        "c1",
        AssistantUpdate::Token {
            content: "B".into(),
            mode: Some("chat".into()),
        },
    );
    let last = store.conversation("c1").unwrap().last_message().unwrap();
    assert_eq!(last.content, "B");
    assert_eq!(last.mode.as_deref(), Some("chat"));
}

#[test]
fn rag_token_appends_to_accumulated_content() {
    let mut store = store_with_id("c1");
    store.add_assistant_message("c1", "A", Utc::now());
    store.update_assistant_message(
        "c1",
        AssistantUpdate::Token {
            content: "B".into(),
            mode: Some("rag".into()),
        },
    );
    let last = store.conversation("c1").unwrap().last_message().unwrap();
    assert_eq!(last.content, "AB");
}

#[test]
fn token_without_mode_replaces() {
    let mut store = store_with_id("c1");
    store.add_assistant_message("c1", "partial", Utc::now());
    store.update_assistant_message(
        "c1",
        AssistantUpdate::Token {
            content: "full answer".into(),
            mode: None,
        },
    );
    let last = store.conversation("c1").unwrap().last_message().unwrap();
    assert_eq!(last.content, "full answer");
    assert_eq!(last.mode, None);
}

#[test]
fn set_sources_and_fail_touch_only_the_last_assistant_message() {
    let mut store = store_with_id("c1");
    store.add_user_message("c1", "q", Utc::now());
    store.add_assistant_message("c1", "", Utc::now());
    store.set_sources("c1", vec!["a.pdf".into(), "b.pdf".into()], Some("rag".into()));

    let last = store.conversation("c1").unwrap().last_message().unwrap().clone();
    assert_eq!(last.sources, Some(vec!["a.pdf".to_string(), "b.pdf".to_string()]));
    assert_eq!(last.mode.as_deref(), Some("rag"));

    store.update_assistant_message("c1", AssistantUpdate::Fail("Σφάλμα: x".into()));
    let last = store.conversation("c1").unwrap().last_message().unwrap();
    assert_eq!(last.content, "Σφάλμα: x");
    assert_eq!(last.mode.as_deref(), Some("error"));
    // The greeting is untouched.
    assert_eq!(store.conversation("c1").unwrap().messages[0].content, GREETING);
}

#[test]
fn answer_update_writes_content_sources_and_mode_together() {
    let mut store = store_with_id("c1");
    store.add_user_message("c1", "q", Utc::now());
    store.add_assistant_message("c1", "", Utc::now());
    let before = store.conversation("c1").unwrap().updated_at;

    store.update_assistant_message(
        "c1",
        AssistantUpdate::Answer {
            content: "full".into(),
            sources: vec!["a.pdf".into()],
            mode: Some("rag".into()),
        },
    );
    let conv = store.conversation("c1").unwrap();
    let last = conv.last_message().unwrap();
    assert_eq!(last.content, "full");
    assert_eq!(last.sources, Some(vec!["a.pdf".to_string()]));
    assert_eq!(last.mode.as_deref(), Some("rag"));
    assert!(conv.updated_at > before);

    // No sources leaves the field unset.
    store.update_assistant_message(
        "c1",
        AssistantUpdate::Answer {
            content: "plain".into(),
            sources: vec![],
            mode: Some("chat".into()),
        },
    );
    let last = store.conversation("c1").unwrap().last_message().unwrap();
    assert_eq!(last.content, "plain");
    assert_eq!(last.sources, Some(vec!["a.pdf".to_string()]));
}

#[test]
fn set_mode_changes_only_the_mode() {
    let mut store = store_with_id("c1");
    store.add_assistant_message("c1", "text", Utc::now());
    store.set_mode("c1", "chat");
    let last = store.conversation("c1").unwrap().last_message().unwrap();
    assert_eq!(last.content, "text");
    assert_eq!(last.mode.as_deref(), Some("chat"));
}

#[test]
fn title_truncation() {
    let long = "a".repeat(45);
    let title = truncate_title(&long);
    assert_eq!(title, format!("{}{}", "a".repeat(40), TITLE_ELLIPSIS));

    let exact = "b".repeat(40);
    assert_eq!(truncate_title(&exact), exact);
    assert_eq!(truncate_title("short"), "short");

    // Characters, not bytes.
    let greek = "Ποιες είναι οι διαδικασίες για άδεια στρατιωτικού προσωπικού;";
    let title = truncate_title(greek);
    assert_eq!(title.chars().count(), 40 + TITLE_ELLIPSIS.chars().count());
    assert!(greek.starts_with(title.trim_end_matches(TITLE_ELLIPSIS)));
}

#[test]
fn update_title_truncates() {
    let mut store = store_with_id("c1");
    store.update_title("c1", &"x".repeat(45));
    assert_eq!(
        store.conversation("c1").unwrap().title,
        format!("{}...", "x".repeat(40))
    );
}

#[test]
fn new_conversation_goes_to_the_head_and_becomes_current() {
    let mut store = store_with_id("c1");
    store.new_conversation(Conversation::seeded_with_id("c2", Utc::now()));
    assert_eq!(store.current_id(), "c2");
    let ids: Vec<&str> = store.conversations().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["c2", "c1"]);
}

#[test]
fn deleting_the_only_conversation_leaves_a_fresh_one() {
    let mut store = store_with_id("only");
    store.delete_conversation("only");
    assert_eq!(store.conversations().len(), 1);
    let current = store.current().expect("replacement is current");
    assert_ne!(current.id, "only");
    assert_eq!(current.messages.len(), 1);
    assert_eq!(current.messages[0].content, GREETING);
}

#[test]
fn deleting_current_selects_first_remaining() {
    let mut store = store_with_id("c1");
    store.new_conversation(Conversation::seeded_with_id("c2", Utc::now()));
    store.new_conversation(Conversation::seeded_with_id("c3", Utc::now()));
    assert_eq!(store.current_id(), "c3");

    store.delete_conversation("c3");
    assert_eq!(store.current_id(), "c2");
    assert_eq!(store.conversations().len(), 2);
}

#[test]
fn deleting_another_conversation_keeps_selection() {
    let mut store = store_with_id("c1");
    store.new_conversation(Conversation::seeded_with_id("c2", Utc::now()));
    store.delete_conversation("c1");
    assert_eq!(store.current_id(), "c2");
    assert_eq!(store.conversations().len(), 1);
}

#[test]
fn switching_to_unknown_conversation_is_ignored() {
    let mut store = store_with_id("c1");
    store.set_current_conversation("nope");
    assert_eq!(store.current_id(), "c1");

    store.new_conversation(Conversation::seeded_with_id("c2", Utc::now()));
    store.set_current_conversation("c1");
    assert_eq!(store.current_id(), "c1");
}

#[test]
fn updated_at_strictly_advances_even_with_a_frozen_clock() {
    let now = Utc::now();
    let mut state = ChatState::with_conversation(Conversation::seeded_with_id("c1", now));
    let mut last = state.conversations[0].updated_at;
    for i in 0..5 {
        state = reduce(
            state,
            Intent::AddUserMessage {
                conversation_id: "c1".into(),
                content: format!("m{i}"),
                timestamp: now,
            },
            now,
        );
        let updated = state.conversations[0].updated_at;
        assert!(updated > last, "updated_at must advance");
        last = updated;
    }

    // A later clock reading is taken as is.
    let later = now + TimeDelta::seconds(10);
    state = reduce(
        state,
        Intent::UpdateTitle {
            conversation_id: "c1".into(),
            title: "t".into(),
        },
        later,
    );
    assert_eq!(state.conversations[0].updated_at, later);
}

#[test]
fn visible_messages_hide_empty_placeholders() {
    let mut store = store_with_id("c1");
    store.add_user_message("c1", "q", Utc::now());
    store.add_assistant_message("c1", "", Utc::now());
    let visible = store.visible_messages("c1");
    assert_eq!(visible.len(), 2);
    assert_eq!(visible.last().unwrap().content, "q");
}

#[test]
fn first_user_turn_only_before_any_question() {
    let mut store = store_with_id("c1");
    assert!(store.is_first_user_turn("c1"));
    store.add_user_message("c1", "q", Utc::now());
    assert!(!store.is_first_user_turn("c1"));
}

#[test]
fn search_filters_titles_case_insensitively() {
    let mut store = store_with_id("c1");
    store.update_title("c1", "Leave Procedures");
    store.new_conversation(Conversation::seeded_with_id("c2", Utc::now()));
    store.update_title("c2", "Equipment rules");

    let hits: Vec<&str> = store.search("leave").iter().map(|c| c.id.as_str()).collect();
    assert_eq!(hits, ["c1"]);
    assert_eq!(store.search("").len(), 2);
    assert!(store.search("nothing").is_empty());
}
