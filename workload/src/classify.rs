use key_value::{ErrorKind, Operation, OperationResult};

/// How a resolved operation is reported. Every outcome counts toward the
/// worker's quota; none of them stops the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success(Operation),
    Ignorable(Operation, ErrorKind),
    Reportable(Operation, ErrorKind),
}

impl Outcome {
    pub fn classify(result: &OperationResult, ignored: &[ErrorKind]) -> Self {
        match result.error {
            None => Outcome::Success(result.operation),
            Some(kind) if ignored.contains(&kind) => Outcome::Ignorable(result.operation, kind),
            Some(kind) => Outcome::Reportable(result.operation, kind),
        }
    }

    /// Progress marker: expected noise looks exactly like a success.
    pub fn marker(&self) -> u8 {
        match self {
            Outcome::Success(operation) | Outcome::Ignorable(operation, _) => operation.marker(),
            Outcome::Reportable(..) => b'E',
        }
    }
}
