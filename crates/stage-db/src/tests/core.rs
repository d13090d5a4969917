use super::test_db;

#[test]
fn test_open_and_migrate() {
    let db = test_db();
    let settings = db.get_all_settings().unwrap();
    assert!(settings.is_empty());
    assert!(db.list_leases().unwrap().is_empty());
}

#[test]
fn test_settings_crud() {
    let db = test_db();
    db.set_setting("SERVER_PORT", "8080", false).unwrap();
    assert_eq!(db.get_setting("SERVER_PORT").unwrap(), Some("8080".into()));

    db.set_setting("SERVER_PORT", "9090", false).unwrap();
    db.set_setting("ADMIN_TOKEN", "secret-value", true).unwrap();
    assert_eq!(db.get_setting("SERVER_PORT").unwrap(), Some("9090".into()));
    assert_eq!(db.get_all_settings().unwrap().len(), 2);

    assert!(db.delete_setting("SERVER_PORT").unwrap());
    assert!(!db.delete_setting("SERVER_PORT").unwrap());
    assert_eq!(db.get_setting("SERVER_PORT").unwrap(), None);
    assert!(db.set_setting(" ", "x", false).is_err());
}

#[test]
fn test_reopen_file_database_keeps_rows() {
    let dir = std::env::temp_dir().join(format!("stage-db-reopen-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("local.db");
    let _ = std::fs::remove_file(&path);

    {
        let db = crate::Database::open(&path).unwrap();
        db.create_event("ev1", 100, 100).unwrap();
    }
    let db = crate::Database::open(&path).unwrap();
    assert!(db.get_event("ev1").unwrap().is_some());

    drop(db);
    let _ = std::fs::remove_dir_all(&dir);
}
