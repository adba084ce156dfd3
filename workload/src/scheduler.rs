use bytes::Bytes;
use key_value::{Operation, key_space::KeySpace};
use kv_client::ClientOperations;
use rand::Rng;

use crate::mix::OperationMix;

/// Issues one batch of `slice` operations per timer tick.
///
/// The batch is always issued in full, even when the worker's quota will be
/// overshot; nothing here looks at the completion count. Slots go out in
/// increasing order, back to back, without waiting on any completion.
#[derive(Debug)]
pub struct BatchScheduler {
    keys: KeySpace,
    slice: usize,
    payload: Bytes,
    ticks: u64,
    issued: u64,
}

impl BatchScheduler {
    pub fn new(keys: KeySpace, slice: usize, payload: Bytes) -> Self {
        Self {
            keys,
            slice,
            payload,
            ticks: 0,
            issued: 0,
        }
    }

    pub fn fire<C, R>(&mut self, client: &C, mix: &mut OperationMix<R>) -> usize
    where
        C: ClientOperations,
        R: Rng,
    {
        self.ticks += 1;
        for slot in 0..self.slice {
            let key = self.keys.key(slot);
            match mix.choose() {
                Operation::Set => client.set(&key, &self.payload),
                Operation::Get => client.get(&key),
            }
        }
        self.issued += self.slice as u64;
        self.slice
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }
}
