mod test_support;

use std::sync::Arc;

use axum::http::StatusCode;
use tempfile::TempDir;

use service_module::inbound::outcome_status;
use service_module::store::PersonalizationStore;
use service_module::{InboundFields, InboundOutcome, InboundPipeline, ServiceError};
use test_support::{test_route_config, FakeGenerator, FakeSender};

struct Harness {
    _temp: TempDir,
    store: Arc<PersonalizationStore>,
    generator: Arc<FakeGenerator>,
    sender: Arc<FakeSender>,
    pipeline: InboundPipeline,
}

fn harness() -> Harness {
    let temp = TempDir::new().expect("tempdir");
    let store =
        Arc::new(PersonalizationStore::new(temp.path().join("assistant.db")).expect("store"));
    let generator = Arc::new(FakeGenerator::new());
    let sender = Arc::new(FakeSender::new());
    let pipeline = InboundPipeline::new(
        store.clone(),
        generator.clone(),
        sender.clone(),
        test_route_config(),
    );
    Harness {
        _temp: temp,
        store,
        generator,
        sender,
        pipeline,
    }
}

fn fields(from: &str, to: &str, text: &str, headers: Option<&str>) -> InboundFields {
    InboundFields {
        from: Some(from.to_string()),
        to: Some(to.to_string()),
        subject: Some("Question".to_string()),
        text: Some(text.to_string()),
        headers: headers.map(|value| value.to_string()),
    }
}

#[test]
fn direct_question_is_answered_and_sent_back() {
    let h = harness();
    let outcome = h
        .pipeline
        .process(&fields("a@x.com", "assistant@service.test", "hi", Some("{}")))
        .expect("process");

    let InboundOutcome::ReplySent { to, body } = &outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(to, "a@x.com");
    assert!(!body.trim().is_empty());
    assert_eq!(outcome_status(&outcome), StatusCode::OK);

    let sent = h.sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@x.com");
    assert_eq!(sent[0].from, "assistant@service.test");
}

#[test]
fn direct_reply_threads_onto_the_incoming_message() {
    let h = harness();
    let headers = r#"[
        {"Name": "Message-ID", "Value": "<m2@x.com>"},
        {"Name": "References", "Value": "<m1@x.com>"}
    ]"#;
    h.pipeline
        .process(&fields("a@x.com", "assistant@service.test", "hi", Some(headers)))
        .expect("process");

    let sent = h.sender.sent.lock().unwrap();
    assert_eq!(sent[0].in_reply_to.as_deref(), Some("<m2@x.com>"));
    assert_eq!(sent[0].references, vec!["<m1@x.com>", "<m2@x.com>"]);
    assert_eq!(sent[0].subject, "Re: Question");
}

#[test]
fn quoted_reply_records_only_the_new_feedback() {
    let h = harness();
    let user = h.store.create_user("jane@example.com", "base").expect("create");
    let to = format!("reply+{}@service.test", user.id);

    let outcome = h
        .pipeline
        .process(&fields(
            "jane@example.com",
            &to,
            "New feedback here\n\n> old text",
            None,
        ))
        .expect("process");

    assert_eq!(
        outcome,
        InboundOutcome::FeedbackRecorded {
            user_id: user.id.clone()
        }
    );
    let rows = h.store.customizations_for_user(&user.id).expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "New feedback here");

    let updated = h.store.user_by_id(&user.id).expect("load");
    assert_eq!(updated.prompt, "base\n\nNew feedback here");
    // Feedback path never generates or sends anything.
    assert!(h.generator.calls.lock().unwrap().is_empty());
    assert!(h.sender.sent.lock().unwrap().is_empty());
}

#[test]
fn unknown_reply_token_is_recipient_not_found() {
    let h = harness();
    let outcome = h
        .pipeline
        .process(&fields(
            "jane@example.com",
            "reply+not-a-real-id@service.test",
            "feedback",
            None,
        ))
        .expect("process");

    assert_eq!(
        outcome,
        InboundOutcome::UnknownRecipient {
            token: "not-a-real-id".to_string()
        }
    );
    assert_eq!(outcome_status(&outcome), StatusCode::NOT_FOUND);
    let rows = h
        .store
        .customizations_for_user("not-a-real-id")
        .expect("list");
    assert!(rows.is_empty());
}

#[test]
fn empty_feedback_is_a_no_op_success() {
    let h = harness();
    let user = h.store.create_user("jane@example.com", "base").expect("create");
    let to = format!("reply+{}@service.test", user.id);

    let outcome = h
        .pipeline
        .process(&fields("jane@example.com", &to, "> quoted only\n> nothing new", None))
        .expect("process");

    assert!(matches!(outcome, InboundOutcome::NothingToDo { .. }));
    assert_eq!(outcome_status(&outcome), StatusCode::OK);
    assert!(h.store.customizations_for_user(&user.id).expect("list").is_empty());
    let unchanged = h.store.user_by_id(&user.id).expect("load");
    assert_eq!(unchanged.prompt, "base");
}

#[test]
fn feedback_from_unregistered_sender_is_rejected_without_audit() {
    let h = harness();
    let user = h.store.create_user("jane@example.com", "base").expect("create");
    let to = format!("reply+{}@service.test", user.id);

    let outcome = h
        .pipeline
        .process(&fields("intruder@example.com", &to, "malicious feedback", None))
        .expect("process");

    assert!(matches!(outcome, InboundOutcome::NothingToDo { .. }));
    assert!(h.store.customizations_for_user(&user.id).expect("list").is_empty());
}

#[test]
fn unrecognized_recipient_is_ignored_with_success() {
    let h = harness();
    let outcome = h
        .pipeline
        .process(&fields("a@x.com", "stranger@elsewhere.test", "hi", None))
        .expect("process");
    assert!(matches!(outcome, InboundOutcome::Unrecognized { .. }));
    assert_eq!(outcome_status(&outcome), StatusCode::OK);
}

#[test]
fn missing_required_fields_are_malformed() {
    let h = harness();
    let mut missing_from = fields("a@x.com", "assistant@service.test", "hi", None);
    missing_from.from = None;
    let err = h.pipeline.process(&missing_from).expect_err("should fail");
    assert!(matches!(err, ServiceError::MalformedInput(_)));

    let mut missing_to = fields("a@x.com", "assistant@service.test", "hi", None);
    missing_to.to = None;
    let err = h.pipeline.process(&missing_to).expect_err("should fail");
    assert!(matches!(err, ServiceError::MalformedInput(_)));
}

#[test]
fn missing_message_id_still_produces_a_reply() {
    let h = harness();
    h.pipeline
        .process(&fields("a@x.com", "assistant@service.test", "hi", None))
        .expect("process");
    let sent = h.sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].in_reply_to, None);
    assert!(sent[0].references.is_empty());
}
