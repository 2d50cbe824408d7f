//! End-to-end tests for generating a link from one session and opening it
//! in another.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use pbkdf2::pbkdf2_hmac;
use serde_json::json;
use sha2::Sha256;
use std::collections::BTreeMap;

use sharelink::crypto::{MIN_ITERATIONS, TAG_LEN};
use sharelink::envelope::{SHARED_MARKER, build_link, encode, parse_link};
use sharelink::{
    ChatMessage, ChatState, Config, ConsumeOutcome, Envelope, KeyState, QueuedPrompt,
    SessionKeyCoordinator, ShareError, ShareField, ShareSelection, consume_incoming_link,
    estimate_length, generate_link,
};

fn fast_config() -> Config {
    Config {
        page_url: "https://x.test/app.html".to_string(),
        kdf_iterations: MIN_ITERATIONS,
        ..Config::default()
    }
}

fn sender_state() -> ChatState {
    ChatState {
        base_url: Some("https://api.openai.com/v1".into()),
        api_key: Some("sk-ABCD1234EFGH".into()),
        model: Some("gpt-4o-mini".into()),
        messages: vec![
            ChatMessage::user("first question"),
            ChatMessage::assistant("first answer"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello there"),
        ],
        prompt_library: Some(json!([{"name": "concise", "prompt": "Answer briefly."}])),
        function_library: Some(json!({"get_weather": {"params": ["city"]}})),
        mcp_connections: BTreeMap::from([("github".into(), "ghp_secret".into())]),
        welcome_message: Some("Welcome to the team workspace".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_configuration_roundtrip() {
    let config = fast_config();
    let sender = sender_state();
    let mut outgoing = SessionKeyCoordinator::new(config.kdf_iterations);
    let selection = ShareSelection::all(2);

    let link = generate_link(&mut outgoing, &selection, &sender, &config, Some("pw"), false)
        .await
        .unwrap();
    assert!(link.starts_with("https://x.test/app.html#shared="));

    let mut receiver = ChatState {
        current_url: Some(link.clone()),
        ..Default::default()
    };
    let mut incoming = SessionKeyCoordinator::new(config.kdf_iterations);
    let mut prompt = QueuedPrompt::new(["pw"]);
    let outcome = consume_incoming_link(&mut incoming, &link, &mut prompt, &mut receiver)
        .await
        .unwrap();

    assert_eq!(outcome, ConsumeOutcome::Applied(ShareField::ALL.to_vec()));
    assert_eq!(receiver.api_key, sender.api_key);
    assert_eq!(receiver.model, sender.model);
    assert_eq!(receiver.base_url, sender.base_url);
    assert_eq!(receiver.messages, sender.messages[2..].to_vec());
    assert_eq!(receiver.prompt_library, sender.prompt_library);
    assert_eq!(receiver.function_library, sender.function_library);
    assert_eq!(receiver.mcp_connections, sender.mcp_connections);
    assert_eq!(receiver.welcome_message, sender.welcome_message);
    assert_eq!(receiver.current_url.as_deref(), Some("https://x.test/app.html"));
    assert_eq!(receiver.notices.len(), ShareField::ALL.len());
}

#[tokio::test]
async fn test_link_never_contains_secrets_in_clear() {
    let config = fast_config();
    let mut coordinator = SessionKeyCoordinator::new(config.kdf_iterations);
    let link = generate_link(
        &mut coordinator,
        &ShareSelection::all(10),
        &sender_state(),
        &config,
        Some("pw"),
        true,
    )
    .await
    .unwrap();

    assert!(!link.contains("sk-ABCD1234EFGH"));
    assert!(!link.contains("ghp_secret"));
    let hash = link.find('#').unwrap();
    assert_eq!(&link[hash..hash + SHARED_MARKER.len()], SHARED_MARKER);
    assert!(!link[..hash].contains('?'));
}

#[tokio::test]
async fn test_empty_password_and_selection_errors() {
    let config = fast_config();
    let mut coordinator = SessionKeyCoordinator::new(config.kdf_iterations);
    let key_only = ShareSelection {
        api_key: true,
        ..Default::default()
    };

    let err = generate_link(&mut coordinator, &key_only, &sender_state(), &config, Some(""), false)
        .await
        .unwrap_err();
    assert_eq!(err, ShareError::EmptyPassword);

    let err = generate_link(&mut coordinator, &key_only, &sender_state(), &config, Some("   "), false)
        .await
        .unwrap_err();
    assert_eq!(err, ShareError::EmptyPassword);

    let err = generate_link(
        &mut coordinator,
        &ShareSelection::default(),
        &sender_state(),
        &config,
        Some("pw"),
        false,
    )
    .await
    .unwrap_err();
    assert_eq!(err, ShareError::EmptySelection);
}

#[tokio::test]
async fn test_remembered_key_is_reused_for_team_sharing() {
    let config = fast_config();
    let mut lead = SessionKeyCoordinator::new(config.kdf_iterations);
    let first = generate_link(
        &mut lead,
        &ShareSelection::all(1),
        &sender_state(),
        &config,
        Some("team-secret"),
        true,
    )
    .await
    .unwrap();
    assert_eq!(lead.context().state(), KeyState::Locked);

    // once locked, a different supplied password is ignored
    let second = generate_link(
        &mut lead,
        &ShareSelection {
            model: true,
            ..Default::default()
        },
        &sender_state(),
        &config,
        Some("something else"),
        false,
    )
    .await
    .unwrap();
    assert_ne!(first, second);

    let mut member = SessionKeyCoordinator::new(config.kdf_iterations);
    let mut state = ChatState::default();
    let mut prompt = QueuedPrompt::new(["team-secret"]);
    consume_incoming_link(&mut member, &first, &mut prompt, &mut state)
        .await
        .unwrap();
    assert_eq!(member.context().secret(), Some("team-secret"));

    // the second link opens silently with the remembered key
    let mut silent = QueuedPrompt::new(Vec::<String>::new());
    let outcome = consume_incoming_link(&mut member, &second, &mut silent, &mut state)
        .await
        .unwrap();
    assert_eq!(outcome, ConsumeOutcome::Applied(vec![ShareField::Model]));
    assert_eq!(silent.times_asked(), 0);
}

#[tokio::test]
async fn test_wrong_password_then_cancel() {
    let config = fast_config();
    let mut coordinator = SessionKeyCoordinator::new(config.kdf_iterations);
    let link = generate_link(
        &mut coordinator,
        &ShareSelection::all(1),
        &sender_state(),
        &config,
        Some("pw1"),
        false,
    )
    .await
    .unwrap();

    let mut receiver = ChatState::default();
    let mut incoming = SessionKeyCoordinator::new(config.kdf_iterations);
    let mut prompt = QueuedPrompt::new(["pw2"]);
    let outcome = consume_incoming_link(&mut incoming, &link, &mut prompt, &mut receiver)
        .await
        .unwrap();

    assert_eq!(outcome, ConsumeOutcome::Cancelled);
    assert_eq!(prompt.last_error(), Some(&ShareError::WrongPasswordOrCorrupted));
    assert_eq!(receiver, ChatState::default());
}

#[test]
fn test_plain_url_has_no_shared_data() {
    assert_eq!(parse_link("https://x.test/app.html"), None);
}

#[tokio::test]
async fn test_corrupted_link_is_malformed() {
    let mut coordinator = SessionKeyCoordinator::new(MIN_ITERATIONS);
    let mut prompt = QueuedPrompt::new(["pw"]);
    let mut state = ChatState::default();
    let err = consume_incoming_link(
        &mut coordinator,
        "https://x.test/app.html#shared=%%%",
        &mut prompt,
        &mut state,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ShareError::MalformedEnvelope(_)));
    assert_eq!(prompt.times_asked(), 0);
}

#[tokio::test]
async fn test_estimate_never_undershoots_real_link() {
    let config = fast_config();
    let mut coordinator = SessionKeyCoordinator::new(config.kdf_iterations);
    let mut state = sender_state();
    state.messages.clear();

    for i in 0..40 {
        state.messages.push(ChatMessage::user(format!("q{i}\nok?")));
        state.messages.push(ChatMessage::assistant(format!("line\n\"a{i}\"\nend")));

        let selection = ShareSelection::all(state.messages.len());
        let estimate = estimate_length(&selection, &state, &config);
        let link = generate_link(&mut coordinator, &selection, &state, &config, Some("pw"), false)
            .await
            .unwrap();

        assert!(
            estimate.bytes >= link.len(),
            "estimate {} below actual {} at {} messages",
            estimate.bytes,
            link.len(),
            state.messages.len()
        );
        if link.len() > config.max_link_length {
            assert!(estimate.exceeds_max());
        }
    }
}

/// Seal raw JSON with the same layout the crate writes.
fn seal_raw_json(json: &[u8], password: &str) -> Envelope {
    let salt = [7u8; 16];
    let nonce = [9u8; 12];
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, MIN_ITERATIONS, &mut key);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let mut sealed = cipher.encrypt(Nonce::from_slice(&nonce), json).unwrap();
    let tag = sealed.split_off(sealed.len() - TAG_LEN);
    Envelope {
        salt,
        nonce,
        iterations: MIN_ITERATIONS,
        ciphertext: sealed,
        auth_tag: tag.try_into().unwrap(),
    }
}

#[tokio::test]
async fn test_legacy_system_prompt_link_is_rejected() {
    let envelope = seal_raw_json(br#"{"systemPrompt":"You are helpful."}"#, "pw");
    let link = build_link("https://x.test/app.html", &encode(&envelope));

    let mut receiver = ChatState {
        current_url: Some(link.clone()),
        ..Default::default()
    };
    let before = receiver.clone();
    let mut coordinator = SessionKeyCoordinator::new(MIN_ITERATIONS);
    let mut prompt = QueuedPrompt::new(["pw"]);
    let err = consume_incoming_link(&mut coordinator, &link, &mut prompt, &mut receiver)
        .await
        .unwrap_err();

    assert!(matches!(err, ShareError::SerializationError(_)));
    assert_eq!(prompt.times_asked(), 1);
    assert_eq!(receiver, before);
    assert_eq!(receiver.current_url.as_deref(), Some(link.as_str()));
}
