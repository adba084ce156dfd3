use std::io::{self, Write};

pub const TICK_MARKER: u8 = b'.';

/// One-character progress markers (`.` per tick, `s`/`g`/`E` per completion),
/// written only when the run is verbose.
pub struct ProgressMarkers {
    out: Option<Box<dyn Write + Send>>,
}

impl ProgressMarkers {
    pub fn stderr(verbose: bool) -> Self {
        if verbose {
            Self::to_writer(io::stderr())
        } else {
            Self::disabled()
        }
    }

    pub fn to_writer(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Some(Box::new(out)),
        }
    }

    pub fn disabled() -> Self {
        Self { out: None }
    }

    pub fn mark(&mut self, marker: u8) {
        if let Some(out) = self.out.as_mut() {
            // a closed stderr must not take the worker down
            let _ = out.write_all(&[marker]).and_then(|_| out.flush());
        }
    }
}

impl std::fmt::Debug for ProgressMarkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressMarkers")
            .field("enabled", &self.out.is_some())
            .finish()
    }
}
