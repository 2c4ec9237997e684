//! Tests for the session store over both backends.
//!
//! JSON-mode tests run against a temporary workspace; SQLite-mode tests use
//! the workspace database so reopening the store exercises the load path.

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use tempfile::TempDir;

    use crate::config::{PersistenceType, StoreConfig};
    use crate::db::Database;
    use crate::error::StoreError;
    use crate::model::{Message, Role, Session};
    use crate::session::SessionStore;
    use crate::snapshot;

    fn json_store(dir: &TempDir) -> SessionStore {
        SessionStore::open(&StoreConfig::new(dir.path(), PersistenceType::Json))
    }

    fn sqlite_store(dir: &TempDir) -> SessionStore {
        SessionStore::open(&StoreConfig::new(dir.path(), PersistenceType::Sqlite))
    }

    fn contents(history: &[Message]) -> Vec<&str> {
        history.iter().map(|m| m.content.as_str()).collect()
    }

    // =========================================================================
    // Cache semantics
    // =========================================================================

    #[test]
    fn get_or_create_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);

        let first = store.get_or_create("telegram:1");
        store.add_message("telegram:1", Role::User, "hi").unwrap();
        let second = store.get_or_create("telegram:1");

        assert_eq!(first.key, second.key);
        assert_eq!(first.created, second.created);
        assert_eq!(contents(&second.messages), vec!["hi"]);
        assert_eq!(store.session_keys(), vec!["telegram:1"]);
    }

    #[test]
    fn history_keeps_insertion_order() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);
        for i in 0..10 {
            store.add_message("k", Role::User, format!("m{}", i)).unwrap();
        }
        let expected: Vec<String> = (0..10).map(|i| format!("m{}", i)).collect();
        assert_eq!(contents(&store.get_history("k")), expected);
    }

    #[test]
    fn history_is_a_copy() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);
        store.add_message("k", Role::User, "original").unwrap();

        let mut history = store.get_history("k");
        history.push(Message::user("sneaky"));
        history[0].content = "edited".into();

        assert_eq!(contents(&store.get_history("k")), vec!["original"]);
    }

    #[test]
    fn unknown_keys_read_empty_and_ignore_updates() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);

        assert!(store.get_history("nobody").is_empty());
        assert!(store.get_summary("nobody").is_none());

        store.set_summary("nobody", "summary").unwrap();
        store.set_history("nobody", vec![Message::user("x")]).unwrap();
        store.truncate_history("nobody", 0).unwrap();
        store.save("nobody").unwrap();

        assert!(store.session_keys().is_empty());
        assert!(!store.storage_dir().join("nobody.json").exists());
    }

    #[test]
    fn add_full_message_creates_session_and_keeps_tool_fields() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);

        let mut message = Message::new(Role::Tool, "42");
        message.tool_call_id = Some("call_1".into());
        store.add_full_message("fresh", message.clone()).unwrap();

        assert_eq!(store.get_history("fresh"), vec![message]);
    }

    #[test]
    fn summary_set_and_cleared() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);
        let before = store.get_or_create("k").updated;

        store.set_summary("k", "talked about rust").unwrap();
        assert_eq!(store.get_summary("k").as_deref(), Some("talked about rust"));
        assert!(store.get_or_create("k").updated >= before);

        store.set_summary("k", "").unwrap();
        assert!(store.get_summary("k").is_none());
    }

    #[test]
    fn truncate_keeps_tail_in_order() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);
        for i in 1..=5 {
            store.add_message("k", Role::User, format!("m{}", i)).unwrap();
        }

        store.truncate_history("k", 2).unwrap();
        assert_eq!(contents(&store.get_history("k")), vec!["m4", "m5"]);

        store.truncate_history("k", 2).unwrap();
        store.truncate_history("k", 10).unwrap();
        assert_eq!(contents(&store.get_history("k")), vec!["m4", "m5"]);

        store.truncate_history("k", 0).unwrap();
        assert!(store.get_history("k").is_empty());
    }

    #[test]
    fn truncate_within_bound_leaves_timestamp_alone() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);
        store.add_message("k", Role::User, "only").unwrap();
        let updated = store.get_or_create("k").updated;

        store.truncate_history("k", 1).unwrap();
        assert_eq!(store.get_or_create("k").updated, updated);
    }

    #[test]
    fn set_history_replaces_wholesale() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);
        store.add_message("k", Role::User, "a").unwrap();
        store.add_message("k", Role::Assistant, "b").unwrap();

        store
            .set_history("k", vec![Message::system("compacted")])
            .unwrap();
        assert_eq!(store.get_history("k"), vec![Message::system("compacted")]);
    }

    // =========================================================================
    // JSON backend
    // =========================================================================

    #[test]
    fn json_mode_writes_only_on_save() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);
        store.add_message("cli:abc", Role::User, "hello").unwrap();

        let path = store.storage_dir().join("cli_abc.json");
        assert!(!path.exists());

        store.save("cli:abc").unwrap();
        assert!(path.exists());
        assert_eq!(store.persistence(), PersistenceType::Json);
        assert!(store.database().is_none());
    }

    #[test]
    fn save_rejects_unsafe_keys() {
        let dir = TempDir::new().unwrap();
        let store = json_store(&dir);

        for key in ["..", "../../etc/passwd", "a/b", "."] {
            store.add_message(key, Role::User, "x").unwrap();
            let err = store.save(key).unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidSessionKey(_)),
                "{:?}: {}",
                key,
                err
            );
        }
        // Rejected even when nothing is cached under the key.
        assert!(store.save("../never-cached").is_err());

        assert_eq!(fs::read_dir(store.storage_dir()).unwrap().count(), 0);
    }

    #[test]
    fn json_round_trip_through_fresh_store() {
        let dir = TempDir::new().unwrap();
        {
            let store = json_store(&dir);
            store.add_message("discord:9", Role::User, "ping").unwrap();
            store.add_message("discord:9", Role::Assistant, "pong").unwrap();
            store.set_summary("discord:9", "greetings").unwrap();
            store.save("discord:9").unwrap();
        }

        let reopened = json_store(&dir);
        let session = reopened.get_or_create("discord:9");
        assert_eq!(session.summary.as_deref(), Some("greetings"));
        assert_eq!(
            session.messages,
            vec![Message::user("ping"), Message::assistant("pong")]
        );
    }

    // =========================================================================
    // SQLite backend
    // =========================================================================

    #[test]
    fn sqlite_mode_persists_every_mutation() {
        let dir = TempDir::new().unwrap();
        {
            let store = sqlite_store(&dir);
            assert_eq!(store.persistence(), PersistenceType::Sqlite);
            store.get_or_create("empty");
            for i in 1..=4 {
                store.add_message("k", Role::User, format!("m{}", i)).unwrap();
            }
            store.truncate_history("k", 3).unwrap();
            store.set_summary("k", "numbers").unwrap();
            store.close().unwrap();
            store.close().unwrap();
        }

        let reopened = sqlite_store(&dir);
        assert_eq!(reopened.session_keys(), vec!["empty", "k"]);
        assert_eq!(contents(&reopened.get_history("k")), vec!["m2", "m3", "m4"]);
        assert_eq!(reopened.get_summary("k").as_deref(), Some("numbers"));

        let db = reopened.database().unwrap();
        assert_eq!(db.message_count().unwrap(), 3);
        assert_eq!(db.session_count().unwrap(), 2);
        assert!(!reopened.storage_dir().join("k.json").exists());
    }

    #[test]
    fn sqlite_save_accepts_any_key() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);
        store.add_message("a/b", Role::User, "x").unwrap();
        store.save("a/b").unwrap();
    }

    #[test]
    fn closed_database_surfaces_errors_but_keeps_cache() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);
        store.close().unwrap();

        let err = store.add_message("k", Role::User, "late").unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable(_)));
        assert_eq!(contents(&store.get_history("k")), vec!["late"]);
    }

    #[test]
    fn unopenable_database_falls_back_to_json() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path(), PersistenceType::Sqlite);
        fs::create_dir_all(config.database_path()).unwrap();

        let store = SessionStore::open(&config);
        assert_eq!(store.persistence(), PersistenceType::Json);

        store.add_message("k", Role::User, "still works").unwrap();
        store.save("k").unwrap();
        assert!(store.storage_dir().join("k.json").exists());
    }

    const REJECT_MESSAGES: &str = "CREATE TRIGGER reject_messages BEFORE INSERT ON messages \
         BEGIN SELECT RAISE(ABORT, 'messages are read-only'); END;";

    fn set_message_trigger(db: &Database, enabled: bool) {
        let sql = if enabled {
            REJECT_MESSAGES
        } else {
            "DROP TRIGGER reject_messages;"
        };
        db.with_conn(|conn| conn.execute_batch(sql)).unwrap();
    }

    #[test]
    fn failed_migration_is_written_whole_by_next_append() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path(), PersistenceType::Sqlite);
        fs::create_dir_all(config.sessions_dir()).unwrap();
        let mut legacy = Session::new("k");
        legacy.messages = (0..3).map(|i| Message::user(format!("m{}", i))).collect();
        let file = config.sessions_dir().join("k.json");
        snapshot::write_atomic(&file, &legacy).unwrap();

        let db = Database::open(config.database_path()).unwrap();
        set_message_trigger(&db, true);
        db.close().unwrap();

        let store = SessionStore::open(&config);
        assert!(file.exists());
        assert_eq!(store.database().unwrap().message_count().unwrap(), 0);

        set_message_trigger(store.database().unwrap(), false);
        store.add_message("k", Role::User, "new").unwrap();
        store.close().unwrap();

        let reopened = SessionStore::open(&config);
        assert_eq!(
            contents(&reopened.get_history("k")),
            vec!["m0", "m1", "m2", "new"]
        );
        assert_eq!(reopened.database().unwrap().message_count().unwrap(), 4);
        assert!(!file.exists());
        assert!(snapshot::archive_path(&file).exists());
    }

    #[test]
    fn failed_append_is_repaired_by_next_write() {
        let dir = TempDir::new().unwrap();
        {
            let store = sqlite_store(&dir);
            store.add_message("k", Role::User, "one").unwrap();

            set_message_trigger(store.database().unwrap(), true);
            assert!(store.add_message("k", Role::User, "two").is_err());
            set_message_trigger(store.database().unwrap(), false);

            store.set_summary("k", "numbers").unwrap();
            store.close().unwrap();
        }

        let reopened = sqlite_store(&dir);
        assert_eq!(contents(&reopened.get_history("k")), vec!["one", "two"]);
        assert_eq!(reopened.get_summary("k").as_deref(), Some("numbers"));
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    fn concurrent_appends(store: &SessionStore) {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 25;

        store.add_message("shared", Role::System, "seed").unwrap();
        thread::scope(|scope| {
            for t in 0..THREADS {
                scope.spawn(move || {
                    for i in 0..PER_THREAD {
                        store
                            .add_message("shared", Role::User, format!("{}-{}", t, i))
                            .unwrap();
                        let _ = store.get_history("shared");
                    }
                });
            }
        });

        let history = store.get_history("shared");
        assert_eq!(history.len(), THREADS * PER_THREAD + 1);

        let mut seen: Vec<&str> = contents(&history[1..]);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), THREADS * PER_THREAD);
    }

    #[test]
    fn concurrent_appends_json() {
        let dir = TempDir::new().unwrap();
        concurrent_appends(&json_store(&dir));
    }

    #[test]
    fn concurrent_appends_sqlite_match_database_order() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);
        concurrent_appends(&store);

        let cached = store.get_history("shared");
        let stored = store.database().unwrap().load_sessions().unwrap();
        let shared = stored.iter().find(|s| s.key == "shared").unwrap();
        assert_eq!(shared.messages, cached);
    }
}
