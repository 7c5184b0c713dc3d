use chrono::Utc;
use tempfile::TempDir;

use super::{PersonalizationStore, StoreError};

fn temp_store() -> (TempDir, PersonalizationStore) {
    let temp = TempDir::new().expect("tempdir");
    let store = PersonalizationStore::new(temp.path().join("assistant.db")).expect("store");
    (temp, store)
}

#[test]
fn create_user_normalizes_email_and_defaults_active() {
    let (_temp, store) = temp_store();
    let user = store
        .create_user(" Jane@Example.Com ", "crypto and science")
        .expect("create");
    assert_eq!(user.email, "jane@example.com");
    assert!(user.is_active);

    let loaded = store.user_by_id(&user.id).expect("load");
    assert_eq!(loaded.email, "jane@example.com");
    assert_eq!(loaded.prompt, "crypto and science");
}

#[test]
fn duplicate_email_is_rejected_and_first_row_untouched() {
    let (_temp, store) = temp_store();
    let first = store.create_user("jane@example.com", "original").expect("create");

    let err = store
        .create_user("JANE@example.com", "other prompt")
        .expect_err("duplicate");
    assert!(matches!(err, StoreError::DuplicateEmail(_)));
    assert!(err.to_string().contains("duplicate"));

    let loaded = store.user_by_email("jane@example.com").expect("load");
    assert_eq!(loaded.id, first.id);
    assert_eq!(loaded.prompt, "original");
}

#[test]
fn invalid_email_is_rejected() {
    let (_temp, store) = temp_store();
    let err = store.create_user("not-an-email", "p").expect_err("invalid");
    assert!(matches!(err, StoreError::InvalidEmail(_)));
}

#[test]
fn unknown_lookups_report_not_found_distinctly() {
    let (_temp, store) = temp_store();
    assert!(matches!(
        store.user_by_id("missing"),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.user_by_email("ghost@example.com"),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.update_prompt("missing", "p"),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn list_active_users_excludes_deactivated() {
    let (_temp, store) = temp_store();
    let active = store.create_user("a@example.com", "p").expect("create");
    let inactive = store.create_user("b@example.com", "p").expect("create");
    store.set_active(&inactive.id, false).expect("deactivate");

    let users = store.list_active_users().expect("list");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, active.id);
}

#[test]
fn customizations_append_in_order() {
    let (_temp, store) = temp_store();
    let user = store.create_user("a@example.com", "p").expect("create");
    store
        .append_customization(&user.id, "reply", "more crypto")
        .expect("append");
    store
        .append_customization(&user.id, "reply", "less sports")
        .expect("append");

    let rows = store.customizations_for_user(&user.id).expect("list");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].content, "more crypto");
    assert_eq!(rows[1].content, "less sports");
    assert!(rows.iter().all(|row| row.kind == "reply"));
}

#[test]
fn update_prompt_persists() {
    let (_temp, store) = temp_store();
    let user = store.create_user("a@example.com", "old").expect("create");
    store.update_prompt(&user.id, "old\n\nnew").expect("update");
    let loaded = store.user_by_id(&user.id).expect("load");
    assert_eq!(loaded.prompt, "old\n\nnew");
}

#[test]
fn newsletter_rows_round_trip_and_gate_same_day_reruns() {
    let (_temp, store) = temp_store();
    let user = store.create_user("a@example.com", "p").expect("create");
    let now = Utc::now();
    let today = now.date_naive();

    assert!(!store.newsletter_exists_on(&user.id, today).expect("check"));
    store
        .insert_newsletter(&user.id, "today's digest", now)
        .expect("insert");
    assert!(store.newsletter_exists_on(&user.id, today).expect("check"));

    let other_day = today.pred_opt().expect("previous day");
    assert!(!store.newsletter_exists_on(&user.id, other_day).expect("check"));

    let rows = store.newsletters_for_user(&user.id).expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "today's digest");
}
