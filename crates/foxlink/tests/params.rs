// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parameter get/set correlation.

mod common;

use common::{eventually, ready_session};
use foxlink::protocol::memory::MemoryServer;
use foxlink::protocol::{ClientOp, Parameter, ServerEvent};
use foxlink::Param;
use serde_json::json;

/// Request ids of recorded gets, in send order.
fn get_ids(server: &MemoryServer) -> Vec<(Vec<String>, String)> {
    server
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            ClientOp::GetParameters { names, id } => Some((names, id)),
            _ => None,
        })
        .collect()
}

fn set_ids(server: &MemoryServer) -> Vec<(Vec<Parameter>, String)> {
    server
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            ClientOp::SetParameters { parameters, id } => Some((parameters, id)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_set_then_get_returns_stored_value() {
    let (session, server) = ready_session(&["cdr"]).await;
    let param = Param::new(&session, "a.b");

    let set = {
        let param = param.clone();
        tokio::spawn(async move { param.set(json!(5)).await })
    };
    eventually(|| set_ids(&server).len() == 1).await;
    let (parameters, id) = set_ids(&server).remove(0);
    assert_eq!(parameters, [Parameter::new("a.b", json!(5))]);
    server
        .send(ServerEvent::ParameterValues {
            id: Some(id),
            parameters,
        })
        .await
        .unwrap();
    assert_eq!(set.await.unwrap().unwrap().value, json!(5));

    let get = {
        let param = param.clone();
        tokio::spawn(async move { param.get().await })
    };
    eventually(|| get_ids(&server).len() == 1).await;
    let (names, id) = get_ids(&server).remove(0);
    assert_eq!(names, ["a.b"]);
    server
        .send(ServerEvent::ParameterValues {
            id: Some(id),
            parameters: vec![Parameter::new("a.b", json!(5))],
        })
        .await
        .unwrap();
    assert_eq!(get.await.unwrap().unwrap(), json!(5));
}

#[tokio::test]
async fn test_concurrent_requests_do_not_cross_resolve() {
    let (session, server) = ready_session(&["cdr"]).await;

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.get_parameter("x").await })
    };
    let second = {
        let session = session.clone();
        tokio::spawn(async move { session.get_parameter("y").await })
    };
    eventually(|| session.outstanding_requests().1 == 2).await;

    let requests = get_ids(&server);
    assert_ne!(requests[0].1, requests[1].1);
    for (names, id) in requests.into_iter().rev() {
        let value = if names[0] == "x" { json!(1) } else { json!("two") };
        // A reply carrying the wrong name is not a match.
        server
            .send(ServerEvent::ParameterValues {
                id: Some(id.clone()),
                parameters: vec![Parameter::new("other", json!(0))],
            })
            .await
            .unwrap();
        server
            .send(ServerEvent::ParameterValues {
                id: Some(id),
                parameters: vec![Parameter::new(names[0].clone(), value)],
            })
            .await
            .unwrap();
    }

    assert_eq!(first.await.unwrap().unwrap(), json!(1));
    assert_eq!(second.await.unwrap().unwrap(), json!("two"));
    assert_eq!(session.outstanding_requests(), (0, 0));
}

#[tokio::test]
async fn test_unset_parameter_is_null() {
    let (session, server) = ready_session(&["cdr"]).await;
    let get = {
        let session = session.clone();
        tokio::spawn(async move { session.get_parameter("missing").await })
    };
    eventually(|| get_ids(&server).len() == 1).await;
    let (_, id) = get_ids(&server).remove(0);
    server
        .send(ServerEvent::ParameterValues {
            id: Some(id),
            parameters: Vec::new(),
        })
        .await
        .unwrap();
    assert!(get.await.unwrap().unwrap().is_null());
}

#[tokio::test]
async fn test_param_names_use_dots() {
    let (session, _server) = ready_session(&["cdr"]).await;
    assert_eq!(Param::new(&session, "node:gain").name(), "node.gain");
    assert_eq!(Param::new(&session, "node:a:b").name(), "node.a:b");
    assert_eq!(Param::new(&session, "plain").name(), "plain");
}
