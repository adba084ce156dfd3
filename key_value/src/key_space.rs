use bytes::Bytes;

const FILLER: u8 = b'.';

/// Deterministic key naming for one worker: `{prefix}worker-{n}:{slot % width}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
    worker: usize,
    width: usize,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>, worker: usize, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            worker,
            width: width.max(1),
        }
    }

    pub fn key(&self, slot: usize) -> String {
        format!("{}worker-{}:{}", self.prefix, self.worker, slot % self.width)
    }
}

/// Value written by every SET of a worker: its identity padded with filler
/// bytes, always exactly `size` bytes long.
pub fn payload(identity: &str, size: usize) -> Bytes {
    let mut value = Vec::with_capacity(size);
    value.extend(identity.bytes().take(size));
    value.resize(size, FILLER);
    Bytes::from(value)
}
