// =============================================================================
// Relay Flow Integration Tests
// =============================================================================
// Drives authenticate → verify → submit → poll against the in-memory
// forwarder:
// - Alice relays once, confirms, and her replay reports the current nonce
// - Concurrent submissions of one signed request land exactly once
// - Operator nonces stay unique under concurrent relays from many senders
// - Dropped relays are surfaced and can be retried explicitly

use crate::utils::{setup_relay, TestRelay};
use alloy::primitives::U256;
use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use forwarder_relayer::auth::Role;
use forwarder_relayer::submitter::RelayStatus;
use forwarder_relayer::RelayError;
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn test_alice_relay_confirms_and_replay_reports_current_nonce() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::User));
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;

    let handle = relay
        .state
        .relayer
        .relay(Some(&token), request.clone(), signature.clone())
        .await?;

    let mut status = relay.state.relayer.status(handle).await?;
    for _ in 0..10 {
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = relay.state.relayer.status(handle).await?;
    }
    match status {
        RelayStatus::Confirmed { inner_result } => assert_eq!(inner_result.tx_hash, handle),
        other => panic!("expected confirmed, got {other:?}"),
    }
    assert_eq!(relay.chain.user_nonce(alice.address()), U256::from(1));

    let err = relay
        .state
        .relayer
        .relay(Some(&token), request, signature)
        .await
        .unwrap_err();
    match &err {
        RelayError::NonceMismatch { current, provided, .. } => {
            assert_eq!(*current, U256::from(1));
            assert_eq!(*provided, U256::ZERO);
        }
        other => panic!("expected NonceMismatch, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert_eq!(err.details()["currentNonce"], "1");
    assert_eq!(relay.chain.executed().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_duplicates_land_once() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    relay.chain.set_auto_mine(false);
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::User));
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;

    let attempts = (0..8).map(|_| {
        let state = relay.state.clone();
        let token = token.clone();
        let request = request.clone();
        let signature = signature.clone();
        tokio::spawn(async move { state.relayer.relay(Some(&token), request, signature).await })
    });
    let mut accepted = 0;
    for task in attempts.collect::<Vec<_>>() {
        match task.await? {
            Ok(_) => accepted += 1,
            Err(RelayError::AlreadyRelayed { .. } | RelayError::NonceMismatch { .. }) => {}
            Err(other) => panic!("ambiguous rejection: {other:?}"),
        }
    }
    assert_eq!(accepted, 1);

    relay.chain.mine();
    assert_eq!(relay.chain.executed().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_many_senders_get_distinct_operator_nonces() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let mut tasks = Vec::new();
    for i in 0..16 {
        let user = PrivateKeySigner::random();
        let token = relay.credential(&format!("user-{i}"), user.address(), Some(Role::User));
        let request = relay.request(user.address(), 0);
        let signature = relay.sign(&user, &request)?;
        let state = relay.state.clone();
        tasks.push(tokio::spawn(async move {
            state.relayer.relay(Some(&token), request, signature).await
        }));
    }

    let mut operator_nonces = HashSet::new();
    for task in tasks {
        let handle = task.await??;
        let attempt = relay
            .state
            .submitter()
            .attempt(&handle)
            .expect("attempt recorded");
        assert!(operator_nonces.insert(attempt.operator_nonce));
    }
    assert_eq!(operator_nonces.len(), 16);
    assert_eq!(relay.chain.executed().len(), 16);
    Ok(())
}

#[tokio::test]
async fn test_sequential_relays_use_increasing_nonces() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::User));

    for nonce in 0..5 {
        let request = relay.request(alice.address(), nonce);
        let signature = relay.sign(&alice, &request)?;
        relay.state.relayer.relay(Some(&token), request, signature).await?;
    }

    let nonces: Vec<U256> = relay.chain.executed().iter().map(|r| r.nonce).collect();
    assert!(nonces.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(nonces.len(), 5);

    // A nonce ahead of the forwarder's is refused with the current value.
    let request = relay.request(alice.address(), 9);
    let signature = relay.sign(&alice, &request)?;
    let err = relay
        .state
        .relayer
        .relay(Some(&token), request, signature)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::NonceMismatch { current, .. } if current == U256::from(5)));
    Ok(())
}

#[tokio::test]
async fn test_dropped_relay_is_surfaced_and_retried() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let mut settings = relay.settings.clone();
    settings.confirmation_timeout = Duration::from_millis(30);
    let relay = TestRelay::start(relay.issuer, settings).await?;
    relay.chain.set_auto_mine(false);

    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::User));
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;
    let first = relay
        .state
        .relayer
        .relay(Some(&token), request, signature)
        .await?;

    relay.chain.evict_mempool();
    tokio::time::sleep(Duration::from_millis(60)).await;
    relay.state.submitter().sweep().await;
    assert_eq!(
        relay.state.relayer.status(first).await?,
        RelayStatus::Dropped {
            may_still_confirm: true
        }
    );

    relay.chain.set_auto_mine(true);
    let second = relay.state.relayer.retry(Some(&token), first).await?;
    assert_ne!(first, second);
    assert!(matches!(
        relay.state.relayer.status(second).await?,
        RelayStatus::Confirmed { .. }
    ));

    // The original is gone for good, but a second retry must not double-submit.
    let err = relay.state.relayer.retry(Some(&token), first).await.unwrap_err();
    assert!(matches!(
        err,
        RelayError::NonceMismatch { .. } | RelayError::AlreadyRelayed { .. }
    ));
    assert_eq!(relay.chain.executed().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_admin_only_relay() -> Result<()> {
    let relay = setup_relay(|cfg| cfg.required_role_for_relay = Some("admin".into())).await?;
    let alice = PrivateKeySigner::random();
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;

    let user_token = relay.credential("alice", alice.address(), Some(Role::User));
    let err = relay
        .state
        .relayer
        .relay(Some(&user_token), request.clone(), signature.clone())
        .await
        .unwrap_err();
    match err {
        RelayError::InsufficientRole { required, actual } => {
            assert_eq!(required, vec![Role::Admin]);
            assert_eq!(actual, Role::User);
        }
        other => panic!("expected InsufficientRole, got {other:?}"),
    }

    let admin_token = relay.credential("alice", alice.address(), Some(Role::Admin));
    relay
        .state
        .relayer
        .relay(Some(&admin_token), request, signature)
        .await?;
    Ok(())
}
