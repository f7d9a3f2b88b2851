use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;

use commons_core::{CredentialRecord, Said, Verification, VerificationConfig};
use commons_crypto::{said_matches, verify_record};
use commons_store::CredentialStore;

use crate::agent::{KeyStateResolver, RevocationNotice, RevocationRegistry};
use crate::error::VerifyError;
use crate::retry::{bounded, retry_transient};

/// An individual verification check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCheck {
    /// Name of the check.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Optional detail message.
    pub detail: Option<String>,
}

impl VerificationCheck {
    fn pass(name: &str) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: None,
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

/// Result of running a record through the gate.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub said: Said,
    /// Outcome as persisted on the record.
    pub verification: Verification,
    /// Individual check results.
    pub checks: Vec<VerificationCheck>,
    /// Whether a still-fresh earlier outcome was reused.
    pub cached: bool,
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        self.verification.is_verified()
    }

    pub fn is_invalid(&self) -> bool {
        self.verification.is_invalid()
    }
}

/// Counts from a [`VerificationGate::verify_pending`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingReport {
    pub verified: usize,
    pub invalid: usize,
    /// Left unverified after a transient failure.
    pub deferred: usize,
}

struct Evaluation {
    verification: Verification,
    checks: Vec<VerificationCheck>,
    cached: bool,
    agent_revocation: Option<RevocationNotice>,
}

/// Sits between the store and every consumer that needs trusted records.
///
/// Verification is recomputed rather than cached forever: a `Verified`
/// outcome is reused only inside the staleness window and while the issuer's
/// key state has not moved. `Invalid` outcomes are permanent. Transient agent
/// failures never mark a record invalid.
pub struct VerificationGate {
    store: Arc<CredentialStore>,
    resolver: Arc<dyn KeyStateResolver>,
    revocations: Option<Arc<dyn RevocationRegistry>>,
    config: VerificationConfig,
}

impl VerificationGate {
    pub fn new(
        store: Arc<CredentialStore>,
        resolver: Arc<dyn KeyStateResolver>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            revocations: None,
            config,
        }
    }

    /// Also consult the identity agent's revocation lookup.
    pub fn with_revocation_registry(mut self, registry: Arc<dyn RevocationRegistry>) -> Self {
        self.revocations = Some(registry);
        self
    }

    /// Deadline covering every agent call and retry of one verification.
    pub fn default_deadline(&self) -> Instant {
        let attempts = self.config.max_retries + 1;
        let backoff = self.config.retry_base_delay() * (2u32.saturating_pow(self.config.max_retries));
        Instant::now() + self.config.agent_timeout() * (attempts + 1) + backoff
    }

    /// Verify a stored record and persist the outcome.
    ///
    /// Fails with `NotFound` for unknown SAIDs, `IssuerUnresolvable` when the
    /// agent stays unreachable after retries, `Timeout` when `deadline`
    /// passes and `ContentChanged` when the record was replaced while it was
    /// being evaluated. Nothing is persisted on failure.
    pub async fn verify(
        &self,
        said: &Said,
        deadline: Instant,
    ) -> Result<VerificationOutcome, VerifyError> {
        let record = self.store.get(said)?;

        let evaluation = match tokio::time::timeout_at(deadline, self.evaluate(&record)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(said = %said, "verification deadline exceeded");
                return Err(VerifyError::Timeout(format!("verification of {}", said)));
            }
        };

        if !evaluation.cached {
            if let Some(notice) = &evaluation.agent_revocation {
                self.store.mark_revoked(
                    said,
                    notice.revocation_said.clone(),
                    notice.reason.clone(),
                )?;
            }
            if !self
                .store
                .set_verification_if(&record, evaluation.verification.clone())?
            {
                tracing::warn!(said = %said, "record replaced during verification");
                return Err(VerifyError::ContentChanged(said.clone()));
            }
            tracing::info!(
                said = %said,
                issuer = %record.issuer,
                status = %evaluation.verification.status,
                "credential verification recorded"
            );
        }

        Ok(VerificationOutcome {
            said: said.clone(),
            verification: evaluation.verification,
            checks: evaluation.checks,
            cached: evaluation.cached,
        })
    }

    /// Verify every record whose outcome is missing or stale.
    pub async fn verify_pending(&self) -> Result<PendingReport, VerifyError> {
        let now = Utc::now();
        let pending = self
            .store
            .pending_verification(now, self.config.staleness_window())?;
        let mut report = PendingReport::default();

        for record in pending {
            match self.verify(&record.said, self.default_deadline()).await {
                Ok(outcome) if outcome.is_verified() => report.verified += 1,
                Ok(_) => report.invalid += 1,
                Err(e) if e.is_transient() => {
                    tracing::debug!(said = %record.said, error = %e, "verification deferred");
                    report.deferred += 1;
                }
                Err(VerifyError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if report != PendingReport::default() {
            tracing::info!(
                verified = report.verified,
                invalid = report.invalid,
                deferred = report.deferred,
                "pending verification pass complete"
            );
        }
        Ok(report)
    }

    async fn evaluate(&self, record: &CredentialRecord) -> Result<Evaluation, VerifyError> {
        let now = Utc::now();

        if record.verification.is_invalid() {
            return Ok(Evaluation {
                verification: record.verification.clone(),
                checks: vec![VerificationCheck::fail(
                    "previously_invalid",
                    record.verification.status.to_string(),
                )],
                cached: true,
                agent_revocation: None,
            });
        }

        // Step 1: latest key-state sequence, used for freshness and recorded
        // with the outcome.
        let latest_sequence = self.latest_sequence(record).await?;

        if record.verification.is_verified()
            && !record.is_revoked()
            && !record.verification.is_stale(
                now,
                self.config.staleness_window(),
                Some(latest_sequence),
            )
        {
            return Ok(Evaluation {
                verification: record.verification.clone(),
                checks: vec![VerificationCheck::pass("fresh_outcome")],
                cached: true,
                agent_revocation: None,
            });
        }

        // Step 2: key state as of issuance.
        let aid = record.issuer.clone();
        let issued_at = record.issued_at;
        let key_state = retry_transient(
            self.config.max_retries,
            self.config.retry_base_delay(),
            "resolve_key_state",
            || {
                bounded(
                    self.config.agent_timeout(),
                    "resolve_key_state",
                    self.resolver.resolve_key_state(&aid, issued_at),
                )
            },
        )
        .await
        .map_err(|e| unresolvable(record, e))?;

        let mut checks = vec![VerificationCheck::pass("issuer_resolved")];

        // Step 3: content address and signature.
        if !said_matches(record)? {
            checks.push(VerificationCheck::fail(
                "said_matches_content",
                "SAID does not match credential content",
            ));
            return Ok(invalid(now, "said mismatch", checks));
        }
        checks.push(VerificationCheck::pass("said_matches_content"));

        if record.signature.is_none() {
            checks.push(VerificationCheck::fail("signature_present", "credential is not signed"));
            return Ok(invalid(now, "missing signature", checks));
        }
        checks.push(VerificationCheck::pass("signature_present"));

        if let Err(e) = verify_record(record, &key_state.public_key) {
            checks.push(VerificationCheck::fail(
                "signature_valid",
                format!("{} (key sequence {})", e, key_state.sequence),
            ));
            return Ok(invalid(now, "invalid signature", checks));
        }
        checks.push(VerificationCheck::pass("signature_valid"));

        // Step 4: revocation, local index first.
        if let Some(revocation) = &record.revocation {
            checks.push(VerificationCheck::fail("not_revoked", revocation.reason.clone()));
            return Ok(invalid(now, format!("revoked: {}", revocation.reason), checks));
        }
        let agent_revocation = self.agent_revocation(record).await?;
        if let Some(notice) = agent_revocation {
            checks.push(VerificationCheck::fail("not_revoked", notice.reason.clone()));
            let mut evaluation = invalid(now, format!("revoked: {}", notice.reason), checks);
            evaluation.agent_revocation = Some(notice);
            return Ok(evaluation);
        }
        checks.push(VerificationCheck::pass("not_revoked"));

        Ok(Evaluation {
            verification: Verification::verified(now, latest_sequence),
            checks,
            cached: false,
            agent_revocation: None,
        })
    }

    async fn latest_sequence(&self, record: &CredentialRecord) -> Result<u64, VerifyError> {
        let aid = &record.issuer;
        retry_transient(
            self.config.max_retries,
            self.config.retry_base_delay(),
            "latest_sequence",
            || {
                bounded(
                    self.config.agent_timeout(),
                    "latest_sequence",
                    self.resolver.latest_sequence(aid),
                )
            },
        )
        .await
        .map_err(|e| unresolvable(record, e))
    }

    async fn agent_revocation(
        &self,
        record: &CredentialRecord,
    ) -> Result<Option<RevocationNotice>, VerifyError> {
        let Some(registry) = &self.revocations else {
            return Ok(None);
        };
        retry_transient(
            self.config.max_retries,
            self.config.retry_base_delay(),
            "is_revoked",
            || bounded(self.config.agent_timeout(), "is_revoked", registry.is_revoked(&record.said)),
        )
        .await
    }
}

fn invalid(
    now: chrono::DateTime<Utc>,
    reason: impl Into<String>,
    checks: Vec<VerificationCheck>,
) -> Evaluation {
    Evaluation {
        verification: Verification::invalid(now, reason),
        checks,
        cached: false,
        agent_revocation: None,
    }
}

fn unresolvable(record: &CredentialRecord, e: VerifyError) -> VerifyError {
    if e.is_transient() {
        VerifyError::IssuerUnresolvable {
            aid: record.issuer.clone(),
            reason: e.to_string(),
        }
    } else {
        e
    }
}
