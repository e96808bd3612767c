use std::path::PathBuf;

use alloy::primitives::{B256, U256};
use tokio::process::Command;
use tracing::debug;

use crate::config::VerifierConfig;
use crate::domain::signals::ProofKind;
use crate::ports::verifier::{ProofVerifier, VerifierError};

/// Groth16 verifier that shells out to `snarkjs groth16 verify`.
///
/// The proof bytes are the snarkjs `proof.json` document. Public signals are
/// written as the decimal-string array snarkjs expects.
pub struct SnarkjsVerifier {
    snarkjs_bin: String,
    withdraw_vkey: PathBuf,
    split_withdraw_vkey: PathBuf,
    compliance_vkey: PathBuf,
}

impl SnarkjsVerifier {
    pub fn new(config: &VerifierConfig) -> Self {
        Self {
            snarkjs_bin: config.snarkjs_bin.clone(),
            withdraw_vkey: config.withdraw_vkey.clone(),
            split_withdraw_vkey: config.split_withdraw_vkey.clone(),
            compliance_vkey: config.compliance_vkey.clone(),
        }
    }

    fn vkey(&self, kind: ProofKind) -> Result<&PathBuf, VerifierError> {
        let path = match kind {
            ProofKind::Withdraw => &self.withdraw_vkey,
            ProofKind::SplitWithdraw => &self.split_withdraw_vkey,
            ProofKind::Compliance => &self.compliance_vkey,
        };
        if !path.exists() {
            return Err(VerifierError::MissingKey(format!(
                "{kind} ({})",
                path.display()
            )));
        }
        Ok(path)
    }
}

/// snarkjs reads public signals as decimal strings.
fn public_json(public_signals: &[B256]) -> Result<String, VerifierError> {
    let decimals: Vec<String> = public_signals
        .iter()
        .map(|s| U256::from_be_bytes(s.0).to_string())
        .collect();
    serde_json::to_string(&decimals).map_err(|e| VerifierError::VerifierFailed(e.to_string()))
}

fn check_proof_json(proof: &[u8]) -> Result<(), VerifierError> {
    let value: serde_json::Value =
        serde_json::from_slice(proof).map_err(|e| VerifierError::MalformedProof(e.to_string()))?;
    for field in ["pi_a", "pi_b", "pi_c"] {
        if value.get(field).is_none() {
            return Err(VerifierError::MalformedProof(format!("missing {field}")));
        }
    }
    Ok(())
}

impl ProofVerifier for SnarkjsVerifier {
    async fn verify(
        &self,
        kind: ProofKind,
        proof: &[u8],
        public_signals: &[B256],
    ) -> Result<bool, VerifierError> {
        let vkey = self.vkey(kind)?;
        check_proof_json(proof)?;

        let dir = tempfile::tempdir()?;
        let proof_path = dir.path().join("proof.json");
        let public_path = dir.path().join("public.json");
        tokio::fs::write(&proof_path, proof).await?;
        tokio::fs::write(&public_path, public_json(public_signals)?).await?;

        let output = Command::new(&self.snarkjs_bin)
            .arg("groth16")
            .arg("verify")
            .arg(vkey)
            .arg(&public_path)
            .arg(&proof_path)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(%kind, status = ?output.status, "snarkjs finished");

        if output.status.success() && stdout.contains("OK") {
            return Ok(true);
        }
        if stdout.contains("Invalid proof") || stderr.contains("Invalid proof") {
            return Ok(false);
        }
        Err(VerifierError::VerifierFailed(format!(
            "snarkjs exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}
