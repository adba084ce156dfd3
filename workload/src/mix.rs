use key_value::Operation;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Chooses GET or SET for each scheduled slot.
///
/// `ratio` is the probability of a GET: a uniform draw `u` in `[0, 1)` above
/// the ratio yields a SET, anything else a GET. A ratio of `1.0` therefore
/// never issues a SET and `0.0` never issues a GET.
#[derive(Debug)]
pub struct OperationMix<R = StdRng> {
    ratio: f64,
    rng: R,
}

impl OperationMix<StdRng> {
    pub fn new(ratio: f64) -> Self {
        Self::with_rng(ratio, StdRng::from_os_rng())
    }
}

impl<R: Rng> OperationMix<R> {
    pub fn with_rng(ratio: f64, rng: R) -> Self {
        Self { ratio, rng }
    }

    pub fn choose(&mut self) -> Operation {
        let u: f64 = self.rng.random();
        if u > self.ratio {
            Operation::Set
        } else {
            Operation::Get
        }
    }
}
