// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/response correlation.
//!
//! Service calls are keyed by (service id, call id); parameter requests by a
//! string id. Each entry resolves exactly once and is removed when it does.
//! There is no timeout: an unanswered request stays until the session closes.

use crate::codec::MessageReader;
use crate::error::{Error, Result};
use crate::protocol::Parameter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Outstanding service call.
pub(crate) struct PendingCall {
    service: String,
    reader: Arc<dyn MessageReader>,
    tx: oneshot::Sender<Result<Value>>,
}

impl PendingCall {
    /// Decode the response and hand it to the caller.
    pub fn resolve(self, data: &[u8]) {
        let result = self.reader.read_message(data).map_err(Error::from);
        let _ = self.tx.send(result);
    }

    pub fn fail(self, message: String) {
        let _ = self.tx.send(Err(Error::ServiceCallFailed {
            service: self.service,
            message,
        }));
    }

    fn close(self) {
        let _ = self.tx.send(Err(Error::Closed));
    }
}

struct PendingParam {
    name: String,
    tx: oneshot::Sender<Result<Parameter>>,
}

pub(crate) struct Correlator {
    /// None once u32 ids are used up.
    next_call_id: Option<u32>,
    calls: HashMap<(u32, u32), PendingCall>,
    next_param_id: u64,
    params: HashMap<String, PendingParam>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self {
            next_call_id: Some(0),
            calls: HashMap::new(),
            next_param_id: 0,
            params: HashMap::new(),
        }
    }
}

impl Correlator {
    pub fn begin_call(
        &mut self,
        service_id: u32,
        service: &str,
        reader: Arc<dyn MessageReader>,
    ) -> Result<(u32, oneshot::Receiver<Result<Value>>)> {
        let call_id = self.next_call_id.ok_or(Error::Exhausted)?;
        self.next_call_id = call_id.checked_add(1);

        let (tx, rx) = oneshot::channel();
        self.calls.insert(
            (service_id, call_id),
            PendingCall {
                service: service.to_string(),
                reader,
                tx,
            },
        );
        Ok((call_id, rx))
    }

    /// Remove the entry matching a response. None for unknown or repeated ids.
    pub fn take_call(&mut self, service_id: u32, call_id: u32) -> Option<PendingCall> {
        self.calls.remove(&(service_id, call_id))
    }

    pub fn begin_param(&mut self, name: &str) -> (String, oneshot::Receiver<Result<Parameter>>) {
        let id = self.next_param_id.to_string();
        self.next_param_id += 1;

        let (tx, rx) = oneshot::channel();
        self.params.insert(
            id.clone(),
            PendingParam {
                name: name.to_string(),
                tx,
            },
        );
        (id, rx)
    }

    /// Match a `parameterValues` reply on id and first parameter name.
    ///
    /// An empty list answers a get for an unset parameter with `null`.
    pub fn complete_param(&mut self, id: Option<&str>, parameters: Vec<Parameter>) -> bool {
        let Some(id) = id else {
            return false;
        };
        let matches = match (self.params.get(id), parameters.first()) {
            (Some(pending), Some(first)) => first.name == pending.name,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return false;
        }
        let Some(pending) = self.params.remove(id) else {
            return false;
        };
        let parameter = parameters
            .into_iter()
            .next()
            .unwrap_or_else(|| Parameter::new(pending.name, Value::Null));
        let _ = pending.tx.send(Ok(parameter));
        true
    }

    /// Forget a call whose request never left.
    pub fn abandon_call(&mut self, service_id: u32, call_id: u32) {
        self.calls.remove(&(service_id, call_id));
    }

    pub fn abandon_param(&mut self, id: &str) {
        self.params.remove(id);
    }

    /// (service calls, parameter requests) still outstanding.
    pub fn outstanding(&self) -> (usize, usize) {
        (self.calls.len(), self.params.len())
    }

    /// Wake every outstanding request with `Error::Closed`.
    pub fn close_all(&mut self) {
        for (_, call) in self.calls.drain() {
            call.close();
        }
        for (_, param) in self.params.drain() {
            let _ = param.tx.send(Err(Error::Closed));
        }
    }
}
