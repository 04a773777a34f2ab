//! Call round trips, concurrency, and error surfacing.

use std::sync::Arc;

use tether_wire::{RpcValue, RPC_ERROR_BANNER, TIMEOUT_ERROR_PREFIX};

use super::harness::loopback_with;
use crate::client::ClientSession;
use crate::error::RpcError;
use crate::session::SessionError;

fn echo_server() -> super::harness::Loopback {
    loopback_with(tether_wire::DEFAULT_MAX_TRANSFER_BYTES, |sess| {
        sess.register("echo", |args| Ok(args.to_vec()));
        sess.register("fail", |_args| {
            Err(SessionError::new("boom"))
        });
        sess.register("lease", |_args| {
            Err(SessionError::new(format!(
                "{TIMEOUT_ERROR_PREFIX}device lease expired"
            )))
        });
    })
}

#[test]
fn echo_int_roundtrip() {
    let lb = echo_server();
    let session = ClientSession::new(lb.client.clone());

    let echo = session.find_function("echo").unwrap().unwrap();
    let out = session.call_remote(&echo, &[RpcValue::Int(42)]).unwrap();
    assert_eq!(out, vec![RpcValue::Int(42)]);

    // Exactly one release per materialized ref.
    assert_eq!(lb.tap.sent_count(tether_wire::Opcode::FreeHandle), 0);
    drop(echo);
    assert_eq!(lb.tap.sent_count(tether_wire::Opcode::FreeHandle), 1);

    drop(session);
    lb.client.shutdown();
    lb.join_server().unwrap();
}

#[test]
fn string_roundtrip_including_empty() {
    let lb = echo_server();
    let session = ClientSession::new(lb.client.clone());

    let echo = session.find_function("echo").unwrap().unwrap();
    let out = session
        .call_remote(
            &echo,
            &[RpcValue::Str("abc".into()), RpcValue::Str(String::new())],
        )
        .unwrap();
    assert_eq!(
        out,
        vec![RpcValue::Str("abc".into()), RpcValue::Str(String::new())]
    );

    drop(echo);
    drop(session);
    lb.client.shutdown();
    lb.join_server().unwrap();
}

#[test]
fn mixed_value_kinds_echo_verbatim() {
    let lb = echo_server();
    let session = ClientSession::new(lb.client.clone());
    let echo = session.find_function("echo").unwrap().unwrap();

    let args = vec![
        RpcValue::Null,
        RpcValue::Bool(false),
        RpcValue::Int(-7),
        RpcValue::Float64(3.5),
        RpcValue::Bytes(vec![0, 1, 255]),
    ];
    let out = session.call_remote(&echo, &args).unwrap();
    assert_eq!(out, args);

    drop(echo);
    drop(session);
    lb.client.shutdown();
    lb.join_server().unwrap();
}

#[test]
fn concurrent_callers_each_get_their_own_reply() {
    let lb = echo_server();
    let session = Arc::new(ClientSession::new(lb.client.clone()));
    let echo = Arc::new(session.find_function("echo").unwrap().unwrap());

    let mut workers = Vec::new();
    for t in 0..4i64 {
        let session = session.clone();
        let echo = echo.clone();
        workers.push(std::thread::spawn(move || {
            for i in 0..25i64 {
                let tag = t * 1000 + i;
                let out = session
                    .call_remote(&echo, &[RpcValue::Int(tag), RpcValue::Str(tag.to_string())])
                    .unwrap();
                assert_eq!(
                    out,
                    vec![RpcValue::Int(tag), RpcValue::Str(tag.to_string())]
                );
            }
        }));
    }
    for w in workers {
        w.join().unwrap();
    }

    drop(echo);
    drop(session);
    lb.client.shutdown();
    lb.join_server().unwrap();
}

#[test]
fn exception_carries_banner_and_message() {
    let lb = echo_server();
    let session = ClientSession::new(lb.client.clone());

    let fail = session.find_function("fail").unwrap().unwrap();
    let err = session.call_remote(&fail, &[]).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("boom"), "message lost: {text}");
    assert!(text.starts_with(RPC_ERROR_BANNER), "banner missing: {text}");
    assert!(!text.contains(TIMEOUT_ERROR_PREFIX));

    // The connection survives the exception.
    let echo = session.find_function("echo").unwrap().unwrap();
    let out = session.call_remote(&echo, &[RpcValue::Int(1)]).unwrap();
    assert_eq!(out, vec![RpcValue::Int(1)]);

    drop(fail);
    drop(echo);
    drop(session);
    lb.client.shutdown();
    lb.join_server().unwrap();
}

#[test]
fn timeout_errors_pass_through_verbatim() {
    let lb = echo_server();
    let session = ClientSession::new(lb.client.clone());

    let lease = session.find_function("lease").unwrap().unwrap();
    let err = session.call_remote(&lease, &[]).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("{TIMEOUT_ERROR_PREFIX}device lease expired")
    );

    drop(lease);
    drop(session);
    lb.client.shutdown();
    lb.join_server().unwrap();
}

#[test]
fn missing_function_lookup_returns_none() {
    let lb = echo_server();
    let session = ClientSession::new(lb.client.clone());
    assert!(session.find_function("no-such-function").unwrap().is_none());

    drop(session);
    lb.client.shutdown();
    lb.join_server().unwrap();
}

#[test]
fn session_masked_devices_are_rejected_before_the_wire() {
    let lb = echo_server();
    let session = ClientSession::new(lb.client.clone());
    let echo = session.find_function("echo").unwrap().unwrap();

    let masked = tether_wire::Device::host().with_session_mask();
    let err = session
        .call_remote(&echo, &[RpcValue::Device(masked)])
        .unwrap_err();
    assert!(matches!(err, RpcError::InvalidArgument(_)), "got {err:?}");

    // The endpoint itself is unharmed.
    let out = session.call_remote(&echo, &[RpcValue::Int(5)]).unwrap();
    assert_eq!(out, vec![RpcValue::Int(5)]);

    drop(echo);
    drop(session);
    lb.client.shutdown();
    lb.join_server().unwrap();
}

#[test]
fn freed_function_handles_reject_further_calls() {
    let lb = echo_server();
    let session = ClientSession::new(lb.client.clone());

    let echo = session.find_function("echo").unwrap().unwrap();
    let raw = echo.handle();
    drop(echo); // sends FreeHandle

    let err = lb.client.call_func(raw, &[RpcValue::Int(1)]).unwrap_err();
    assert!(matches!(err, RpcError::Remote(_)), "got {err:?}");

    drop(session);
    lb.client.shutdown();
    lb.join_server().unwrap();
}

#[test]
fn device_exists_shortcuts_on_host() {
    let lb = echo_server();
    let session = ClientSession::new(lb.client.clone());

    assert!(session.device_exists(tether_wire::Device::host()).unwrap());
    let accel = tether_wire::Device { kind: 2, id: 0 };
    assert!(!session.device_exists(accel).unwrap());

    drop(session);
    lb.client.shutdown();
    lb.join_server().unwrap();
}
