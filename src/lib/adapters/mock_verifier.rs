use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use alloy::primitives::B256;

use crate::domain::signals::ProofKind;
use crate::ports::verifier::{ProofVerifier, VerifierError};

/// Verifier returning a fixed answer. Rejects signal vectors of the wrong
/// length like the real circuit verifiers do.
#[derive(Debug)]
pub struct MockVerifier {
    accept: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockVerifier {
    pub fn accepting() -> Self {
        Self {
            accept: AtomicBool::new(true),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting() -> Self {
        let verifier = Self::accepting();
        verifier.set_accept(false);
        verifier
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockVerifier {
    fn default() -> Self {
        Self::accepting()
    }
}

impl ProofVerifier for MockVerifier {
    async fn verify(
        &self,
        kind: ProofKind,
        proof: &[u8],
        public_signals: &[B256],
    ) -> Result<bool, VerifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if proof.is_empty() {
            return Err(VerifierError::MalformedProof("empty proof".into()));
        }
        if public_signals.len() != kind.arity() {
            return Ok(false);
        }
        Ok(self.accept.load(Ordering::SeqCst))
    }
}
