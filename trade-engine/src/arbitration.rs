//! Admin arbitration
//!
//! Resolves disputed (or paid but stuck) trades. The admin must present every
//! configured authorization factor; each is hashed with SHA-256 and compared
//! in constant time against the configured digest at the same position.
//! Nothing is read or mutated until all factors match.

use crate::{
    config::ArbitrationConfig,
    engine::TradeEngine,
    types::{Resolution, Trade},
    Error, Result,
};
use escrow_ledger::Settlement;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::{Choice, ConstantTimeEq};
use tracing::{info, warn};
use uuid::Uuid;

/// Hex SHA-256 digest of a factor secret, as stored in configuration
pub fn digest_factor(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Result of an admin resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationOutcome {
    /// Trade after resolution
    pub trade: Trade,

    /// Ledger settlement of the escrow hold
    pub settlement: Settlement,

    /// True if the trade was already resolved this way and nothing moved
    pub already_resolved: bool,
}

/// Positional factor check
#[derive(Debug)]
struct FactorAuthorizer {
    digests: Vec<[u8; 32]>,
    required: usize,
}

impl FactorAuthorizer {
    fn new(config: &ArbitrationConfig) -> Result<Self> {
        let digests = config
            .factor_digests
            .iter()
            .map(|digest| {
                let bytes = hex::decode(digest.trim())
                    .map_err(|e| Error::Config(format!("invalid factor digest: {}", e)))?;
                <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| Error::Config("factor digest must be 32 bytes".to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        if digests.is_empty() {
            warn!("No arbitration factor digests configured; all resolutions will be rejected");
        }

        Ok(Self {
            digests,
            required: config.required_factors,
        })
    }

    fn authorize(&self, factors: &[String]) -> bool {
        if self.digests.is_empty()
            || self.digests.len() != self.required
            || factors.len() != self.required
        {
            return false;
        }

        let mut matched = Choice::from(1u8);
        for (factor, expected) in factors.iter().zip(&self.digests) {
            let actual = Sha256::digest(factor.as_bytes());
            matched &= actual.as_slice().ct_eq(&expected[..]);
        }
        matched.into()
    }
}

/// Admin-only dispute resolution
#[derive(Debug)]
pub struct ArbitrationService {
    engine: Arc<TradeEngine>,
    authorizer: FactorAuthorizer,
}

impl ArbitrationService {
    /// Create service over `engine`
    pub fn new(engine: Arc<TradeEngine>, config: &ArbitrationConfig) -> Result<Self> {
        Ok(Self {
            engine,
            authorizer: FactorAuthorizer::new(config)?,
        })
    }

    /// Number of factors an admin must present
    pub fn required_factors(&self) -> usize {
        self.authorizer.required
    }

    /// Resolve a trade as RELEASE_TO_BUYER or REFUND_TO_SELLER
    ///
    /// Repeating a resolution returns the first settlement with
    /// `already_resolved` set.
    pub async fn resolve(
        &self,
        trade_id: Uuid,
        resolution: Resolution,
        auth_factors: &[String],
    ) -> Result<ArbitrationOutcome> {
        if !self.authorizer.authorize(auth_factors) {
            self.engine.metrics().record_auth_failure();
            warn!(
                %trade_id,
                presented = auth_factors.len(),
                required = self.authorizer.required,
                "Arbitration authorization rejected"
            );
            return Err(Error::AuthFactorMismatch);
        }

        let outcome = self.engine.apply_resolution(trade_id, resolution).await?;

        info!(
            %trade_id,
            ?resolution,
            status = %outcome.trade.status,
            credited = %outcome.settlement.credited,
            fee = %outcome.settlement.fee,
            already_resolved = outcome.already_resolved,
            "Arbitration applied"
        );

        Ok(outcome)
    }
}
