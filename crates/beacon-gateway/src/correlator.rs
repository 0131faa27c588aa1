//! Pending-request table
//!
//! Every outbound request registers a responder keyed by its request id.
//! Removing the entry is what settles it, so a request resolves, times out or
//! fails with the connection exactly once, whichever happens first.

use crate::protocol::ActionResponse;
use beacon_core::{GatewayError, Result, request_id};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Channel half that settles one request
pub type Responder = oneshot::Sender<Result<ActionResponse>>;

#[derive(Debug)]
struct Pending {
    action: String,
    deadline: Instant,
    responder: Responder,
}

/// What happened to an inbound response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Handed to the waiting caller
    Delivered { action: String },
    /// No pending request with that id; it timed out or never existed
    Unknown,
    /// The caller stopped waiting before the response arrived
    CallerGone { action: String },
}

/// Requests in flight on one connection
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<String, Pending>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh request id that no in-flight request is using
    pub fn new_request_id(&self) -> String {
        loop {
            let id = request_id::generate();
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Track a request until it settles
    pub fn register(
        &mut self,
        request_id: String,
        action: impl Into<String>,
        deadline: Instant,
        responder: Responder,
    ) {
        self.pending.insert(
            request_id,
            Pending {
                action: action.into(),
                deadline,
                responder,
            },
        );
    }

    /// Match a response to its pending request
    pub fn resolve(&mut self, response: ActionResponse) -> Settlement {
        let Some(pending) = self.pending.remove(&response.request_id) else {
            return Settlement::Unknown;
        };
        match pending.responder.send(Ok(response)) {
            Ok(()) => Settlement::Delivered {
                action: pending.action,
            },
            Err(_) => Settlement::CallerGone {
                action: pending.action,
            },
        }
    }

    /// Settle one request with an error. Returns false if it was not pending.
    pub fn fail(&mut self, request_id: &str, error: GatewayError) -> bool {
        match self.pending.remove(request_id) {
            Some(pending) => {
                let _ = pending.responder.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Earliest deadline among pending requests
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Fail every request whose deadline has passed. Returns how many expired.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(pending) = self.pending.remove(id) {
                tracing::warn!("Request {} ({}) timed out", pending.action, id);
                let _ = pending.responder.send(Err(GatewayError::Timeout {
                    action: pending.action,
                    request_id: id.clone(),
                }));
            }
        }
        expired.len()
    }

    /// Fail everything with `ConnectionClosed`. Returns how many were pending.
    pub fn fail_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.responder.send(Err(GatewayError::ConnectionClosed));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};
    use std::time::Duration;

    fn response(id: &str, payload: Value) -> ActionResponse {
        ActionResponse {
            request_id: id.into(),
            result: Some("OK".into()),
            message: None,
            payload: Some(payload),
            extra: Map::new(),
        }
    }

    fn track(
        correlator: &mut Correlator,
        action: &str,
        timeout: Duration,
    ) -> (String, oneshot::Receiver<Result<ActionResponse>>) {
        let (tx, rx) = oneshot::channel();
        let id = correlator.new_request_id();
        correlator.register(id.clone(), action, Instant::now() + timeout, tx);
        (id, rx)
    }

    #[tokio::test]
    async fn test_responses_in_any_order() {
        let mut correlator = Correlator::new();
        let mut waiting = Vec::new();
        for i in 0..5 {
            let (id, rx) = track(&mut correlator, &format!("action.{}", i), Duration::from_secs(5));
            waiting.push((i, id, rx));
        }
        assert_eq!(correlator.len(), 5);

        for (i, id, _) in waiting.iter().rev() {
            let settled = correlator.resolve(response(id, json!({"n": i})));
            assert_eq!(
                settled,
                Settlement::Delivered {
                    action: format!("action.{}", i)
                }
            );
        }
        assert!(correlator.is_empty());

        for (i, id, rx) in waiting {
            let resp = rx.await.unwrap().unwrap();
            assert_eq!(resp.request_id, id);
            assert_eq!(resp.payload(), &json!({"n": i}));
        }
    }

    #[tokio::test]
    async fn test_unknown_response() {
        let mut correlator = Correlator::new();
        assert_eq!(
            correlator.resolve(response("nobody000000", Value::Null)),
            Settlement::Unknown
        );
    }

    #[tokio::test]
    async fn test_timeout_is_exclusive_with_response() {
        let mut correlator = Correlator::new();
        let (id, rx) = track(&mut correlator, "beacon:ping", Duration::from_millis(50));
        let deadline = correlator.next_deadline().unwrap();

        assert_eq!(correlator.expire(deadline - Duration::from_millis(1)), 0);
        assert_eq!(correlator.expire(deadline), 1);

        match rx.await.unwrap() {
            Err(GatewayError::Timeout { action, request_id }) => {
                assert_eq!(action, "beacon:ping");
                assert_eq!(request_id, id);
            }
            other => panic!("Expected timeout, got {:?}", other),
        }

        // Late response finds nothing to settle
        assert_eq!(correlator.resolve(response(&id, Value::Null)), Settlement::Unknown);
        assert_eq!(correlator.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_on_paused_clock() {
        let mut correlator = Correlator::new();
        let (_, rx) = track(&mut correlator, "mtr:get_depot_trains", Duration::from_millis(50));

        tokio::time::advance(Duration::from_millis(49)).await;
        assert_eq!(correlator.expire(Instant::now()), 0);
        assert_eq!(correlator.len(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(correlator.expire(Instant::now()), 1);
        assert!(matches!(rx.await.unwrap(), Err(GatewayError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_next_deadline_is_earliest() {
        let mut correlator = Correlator::new();
        let (_, _slow) = track(&mut correlator, "slow", Duration::from_secs(30));
        let before = Instant::now();
        let (_, _fast) = track(&mut correlator, "fast", Duration::from_secs(1));

        let next = correlator.next_deadline().unwrap();
        assert!(next >= before + Duration::from_secs(1));
        assert!(next < before + Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_fail_all_drains_pending() {
        let mut correlator = Correlator::new();
        let receivers: Vec<_> = (0..3)
            .map(|_| track(&mut correlator, "mtr:list_nodes_paginated", Duration::from_secs(5)).1)
            .collect();

        assert_eq!(correlator.fail_all(), 3);
        assert!(correlator.is_empty());
        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(GatewayError::ConnectionClosed)));
        }
        assert_eq!(correlator.fail_all(), 0);
    }

    #[tokio::test]
    async fn test_fail_single_request() {
        let mut correlator = Correlator::new();
        let (id, rx) = track(&mut correlator, "beacon:ping", Duration::from_secs(5));

        assert!(correlator.fail(&id, GatewayError::Transport("write failed".into())));
        assert!(!correlator.fail(&id, GatewayError::ConnectionClosed));
        assert!(matches!(rx.await.unwrap(), Err(GatewayError::Transport(_))));
    }

    #[tokio::test]
    async fn test_caller_gone() {
        let mut correlator = Correlator::new();
        let (id, rx) = track(&mut correlator, "beacon:ping", Duration::from_secs(5));
        drop(rx);
        assert_eq!(
            correlator.resolve(response(&id, Value::Null)),
            Settlement::CallerGone {
                action: "beacon:ping".into()
            }
        );
    }

    #[test]
    fn test_request_ids_are_valid() {
        let correlator = Correlator::new();
        let id = correlator.new_request_id();
        assert!(request_id::is_valid(&id));
    }
}
