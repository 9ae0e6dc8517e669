use orbit_db::{ChatStore, Database, NewChat, NewMessage};
use orbit_types::models::{Chat, User};

fn seed(db: &Database) -> (User, Chat) {
    let user = db.create_user("ada", "hash").unwrap().unwrap();
    let chat = db
        .create_chat(NewChat {
            name: "first",
            public: false,
            user_id: user.id,
            creator: &user.username,
        })
        .unwrap();
    (user, chat)
}

fn say(db: &Database, chat: &Chat, content: &str, from_client: bool) -> orbit_types::models::Message {
    db.insert_message(NewMessage {
        chat_id: chat.id,
        user_id: Some(chat.user_id),
        sender: if from_client { "ada" } else { "Orbit" },
        content,
        from_client,
    })
    .unwrap()
}

#[test]
fn messages_come_back_in_insertion_order_with_increasing_timestamps() {
    let db = Database::open_in_memory().unwrap();
    let (_, chat) = seed(&db);

    let ids: Vec<String> = (0..20)
        .map(|i| say(&db, &chat, &format!("m{}", i), i % 2 == 0).id)
        .collect();

    let loaded = db.get_chat_with_messages(chat.id).unwrap().unwrap();
    let loaded_ids: Vec<String> = loaded.messages.iter().map(|m| m.id.clone()).collect();
    assert_eq!(loaded_ids, ids);
    assert!(loaded.messages.windows(2).all(|w| w[0].created_at < w[1].created_at));
}

#[test]
fn delete_messages_from_cuts_target_and_everything_after() {
    let db = Database::open_in_memory().unwrap();
    let (_, chat) = seed(&db);

    let m1 = say(&db, &chat, "one", true);
    say(&db, &chat, "reply one", false);
    let m3 = say(&db, &chat, "two", true);
    say(&db, &chat, "reply two", false);

    let removed = db.delete_messages_from(chat.id, m3.created_at).unwrap();
    assert_eq!(removed, 2);

    let loaded = db.get_chat_with_messages(chat.id).unwrap().unwrap();
    assert_eq!(loaded.messages.len(), 2);
    assert_eq!(loaded.messages[0].id, m1.id);
    assert!(db.get_message(&m3.id).unwrap().is_none());
}

#[test]
fn update_message_content_fills_placeholder() {
    let db = Database::open_in_memory().unwrap();
    let (_, chat) = seed(&db);

    let placeholder = say(&db, &chat, "", false);
    assert!(placeholder.is_pending_placeholder());

    let filled = db.update_message_content(&placeholder.id, "hello").unwrap();
    assert_eq!(filled.content, "hello");
    assert_eq!(filled.created_at, placeholder.created_at);
    assert!(db.update_message_content("missing", "x").is_err());
}

#[test]
fn delete_chat_removes_messages_first() {
    let db = Database::open_in_memory().unwrap();
    let (user, chat) = seed(&db);
    let m = say(&db, &chat, "one", true);

    assert!(db.delete_chat(chat.id).unwrap());
    assert!(db.get_chat(chat.id).unwrap().is_none());
    assert!(db.get_message(&m.id).unwrap().is_none());
    assert!(db.list_chats_for_user(user.id).unwrap().is_empty());
    assert!(!db.delete_chat(chat.id).unwrap());
}

#[test]
fn delete_user_cascades_through_chats() {
    let db = Database::open_in_memory().unwrap();
    let (user, chat) = seed(&db);
    let m = say(&db, &chat, "one", true);

    assert!(db.delete_user(user.id).unwrap());
    assert!(db.get_user(user.id).unwrap().is_none());
    assert!(db.get_chat(chat.id).unwrap().is_none());
    assert!(db.get_message(&m.id).unwrap().is_none());
}

#[test]
fn public_chats_are_listed_newest_update_first() {
    let db = Database::open_in_memory().unwrap();
    let (user, older) = seed(&db);
    db.update_chat(older.id, "first", true).unwrap();
    let newer = db
        .create_chat(NewChat {
            name: "second",
            public: true,
            user_id: user.id,
            creator: &user.username,
        })
        .unwrap();
    db.create_chat(NewChat {
        name: "hidden",
        public: false,
        user_id: user.id,
        creator: &user.username,
    })
    .unwrap();

    say(&db, &older, "bump", true);

    let public: Vec<_> = db.list_public_chats().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(public, vec![older.id, newer.id]);
}

#[test]
fn credentials_and_populated_user() {
    let db = Database::open_in_memory().unwrap();
    let (user, chat) = seed(&db);
    say(&db, &chat, "one", true);

    let (found, hash) = db.get_credentials("ada").unwrap().unwrap();
    assert_eq!(found.id, user.id);
    assert_eq!(hash, "hash");
    assert!(db.get_credentials("bob").unwrap().is_none());

    let populated = db.get_user_with_chats(user.id).unwrap().unwrap();
    assert_eq!(populated.chats.len(), 1);
    assert_eq!(populated.chats[0].messages.len(), 1);
}

#[test]
fn calls_fail_after_close() {
    let db = Database::open_in_memory().unwrap();
    seed(&db);
    ChatStore::close(&db).unwrap();
    ChatStore::close(&db).unwrap();
    assert!(db.get_credentials("ada").is_err());
}

#[test]
fn duplicate_username_is_refused_without_an_error() {
    let db = Database::open_in_memory().unwrap();
    let (user, _) = seed(&db);

    assert!(db.create_user("ada", "other").unwrap().is_none());
    let (found, hash) = db.get_credentials("ada").unwrap().unwrap();
    assert_eq!(found.id, user.id);
    assert_eq!(hash, "hash");
}
