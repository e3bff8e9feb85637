//! Pending-request table
//!
//! Each entry is removed exactly once, either by its matching response, by
//! its own timeout, or by the connection closing. Removal hands out the only
//! sender, so a request can never be settled twice.

use std::collections::HashMap;

use rmpv::Value;
use tokio::sync::oneshot;

use crate::error::RpcError;

pub(crate) type Settlement = Result<Value, RpcError>;

/// A request waiting for its response
pub(crate) struct PendingRequest {
    pub method: String,
    tx: oneshot::Sender<Settlement>,
}

impl PendingRequest {
    /// Resolve the waiting caller. Returns false if it already gave up.
    pub fn settle(self, result: Settlement) -> bool {
        self.tx.send(result).is_ok()
    }
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
}

impl PendingTable {
    pub fn insert(&mut self, id: u64, method: &str) -> oneshot::Receiver<Settlement> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                tx,
            },
        );
        rx
    }

    pub fn remove(&mut self, id: u64) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Settle the request `id`. Returns false if no such request is pending.
    pub fn settle(&mut self, id: u64, result: Settlement) -> bool {
        match self.entries.remove(&id) {
            Some(pending) => {
                pending.settle(result);
                true
            }
            None => false,
        }
    }

    /// Fail every pending request and clear the table
    pub fn fail_all(&mut self, error: RpcError) -> usize {
        let count = self.entries.len();
        for (_, pending) in self.entries.drain() {
            pending.settle(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_once() {
        let mut table = PendingTable::default();
        let mut rx = table.insert(1, "Authenticate");

        assert!(table.settle(1, Ok(Value::from(1))));
        assert!(!table.settle(1, Ok(Value::from(2))));
        assert!(table.is_empty());

        assert_eq!(rx.try_recv().unwrap(), Ok(Value::from(1)));
    }

    #[test]
    fn test_fail_all_clears() {
        let mut table = PendingTable::default();
        let mut a = table.insert(1, "a");
        let mut b = table.insert(2, "b");

        assert_eq!(table.fail_all(RpcError::Closed), 2);
        assert_eq!(table.len(), 0);
        assert_eq!(a.try_recv().unwrap(), Err(RpcError::Closed));
        assert_eq!(b.try_recv().unwrap(), Err(RpcError::Closed));
    }

    #[test]
    fn test_remove_drops_without_settling() {
        let mut table = PendingTable::default();
        let mut rx = table.insert(5, "JoinRoom");

        let pending = table.remove(5).unwrap();
        assert_eq!(pending.method, "JoinRoom");
        drop(pending);

        assert!(rx.try_recv().is_err());
    }
}
