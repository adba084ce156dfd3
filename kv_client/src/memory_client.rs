use std::{cell::RefCell, collections::HashMap};

use bytes::Bytes;
use key_value::{ErrorKind, Operation, OperationResult};

use crate::{ClientOperations, Completions};

/// In-process store private to one worker. Results are posted to the
/// completion channel like a remote client's would be, so the worker still
/// consumes them on a later turn of its loop.
#[derive(Debug)]
pub struct MemoryClient {
    data: RefCell<HashMap<String, Bytes>>,
    completions: Completions,
}

impl MemoryClient {
    pub fn new(completions: Completions) -> Self {
        Self {
            data: RefCell::new(HashMap::new()),
            completions,
        }
    }
}

impl ClientOperations for MemoryClient {
    fn get(&self, key: &str) {
        let result = if self.data.borrow().contains_key(key) {
            OperationResult::ok(Operation::Get)
        } else {
            OperationResult::failed(Operation::Get, ErrorKind::NotFound)
        };
        let _ = self.completions.send(result);
    }

    fn set(&self, key: &str, value: &Bytes) {
        self.data.borrow_mut().insert(key.to_string(), value.clone());
        let _ = self.completions.send(OperationResult::ok(Operation::Set));
    }
}
