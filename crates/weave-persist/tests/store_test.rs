use std::sync::Arc;

use weave_persist::{InMemoryStore, MessageStore};
use weave_types::{Conversation, MediaKind, MediaRef, NewMessage};

#[tokio::test]
async fn test_store_behind_trait_object() {
    let memory = Arc::new(InMemoryStore::new());
    memory.insert_conversation(Conversation { id: "conv-1".to_string(), ..Conversation::new("Chat") }).await;
    let store: Arc<dyn MessageStore> = memory.clone();

    let mut with_media = NewMessage::user("");
    with_media.media = Some(MediaRef::new("https://cdn/a.ogg", MediaKind::Audio));
    store.append_message("conv-1", with_media).await.unwrap();
    store.append_message("conv-1", NewMessage::assistant("Transcrevi o áudio.")).await.unwrap();

    let messages = store.list_messages("conv-1").await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].media.as_ref().unwrap().kind, MediaKind::Audio);
    assert!(messages[0].transcription_status.is_none());
    assert!(messages[0].created_at <= messages[1].created_at);
}

#[tokio::test]
async fn test_concurrent_appends_all_land() {
    let store = Arc::new(InMemoryStore::new());
    let conversation = store.create_conversation("Chat").await.unwrap();

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let store = store.clone();
            let id = conversation.id.clone();
            tokio::spawn(async move { store.append_message(&id, NewMessage::user(format!("m{}", i))).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.list_messages(&conversation.id).await.unwrap().len(), 10);
    assert_eq!(store.append_calls(), 10);
}
