//! Main orchestrator for pipeline runs.
//!
//! One run ingests from every enabled source, then walks each unprocessed
//! candidate through evaluation, specification, the bounded draft/verify
//! loop, listing and publishing. Candidates are processed strictly one at a
//! time so the run's cost governor always sees consistent totals.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{CallError, Generator, Source, Storefront};
use crate::config::Settings;
use crate::domain::{
    AuditAction, AuditEntry, Candidate, CandidateState, OutcomeStatus, PublishedProduct, RunId, RunReport,
    Stage, StageOutcome, SuppressionDecision, Verdict,
};

use super::artifacts::ArtifactStore;
use super::audit::AuditLogger;
use super::feedback::{FeedbackSettings, SalesFeedback};
use super::governor::{BudgetLimits, CostGovernor, Pricing};
use super::ledger::Ledger;
use super::retry::{RetryCategory, RetryHandler, RetrySettings};
use super::stages::{spec_rejection, StageRunner};

/// Options consumed by the orchestrator
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub budget: BudgetLimits,
    pub pricing: Pricing,
    pub retry: RetrySettings,
    pub feedback: FeedbackSettings,

    /// Extra draft/verify rounds after the first
    pub max_regeneration_attempts: u32,

    /// Short-circuit every run before any work begins
    pub kill_switch: bool,

    pub artifacts_dir: PathBuf,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            budget: settings.budget.clone(),
            pricing: settings.pricing.clone(),
            retry: settings.retry.clone(),
            feedback: settings.sales.clone(),
            max_regeneration_attempts: settings.pipeline.max_regeneration_attempts,
            kill_switch: settings.pipeline.kill_switch,
            artifacts_dir: settings.artifacts_dir(),
        }
    }
}

/// External collaborators of a run
pub struct Services {
    pub sources: Vec<Box<dyn Source>>,
    pub generator: Arc<dyn Generator>,
    pub storefront: Arc<dyn Storefront>,
}

/// A candidate-scoped failure and the stage it happened in
#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    error: CallError,
}

fn at(stage: Stage) -> impl FnOnce(CallError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    ledger: Ledger,
    audit: AuditLogger,
    artifacts: ArtifactStore,
    retry: Arc<RetryHandler>,
    feedback: SalesFeedback,
    sources: Vec<Box<dyn Source>>,
    generator: Arc<dyn Generator>,
    storefront: Arc<dyn Storefront>,
    options: PipelineOptions,
    cancelled: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(ledger: Ledger, services: Services, options: PipelineOptions) -> Self {
        let retry = Arc::new(RetryHandler::new(options.retry.clone()));
        let feedback = SalesFeedback::new(
            ledger.clone(),
            services.storefront.clone(),
            retry.clone(),
            options.feedback.clone(),
        );
        Self {
            audit: AuditLogger::new(ledger.clone()),
            artifacts: ArtifactStore::new(options.artifacts_dir.clone()),
            ledger,
            retry,
            feedback,
            sources: services.sources,
            generator: services.generator,
            storefront: services.storefront,
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between candidates; set it to stop the run early
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn feedback(&self) -> &SalesFeedback {
        &self.feedback
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Execute one run. Always produces a report, however the run ends.
    #[instrument(skip(self))]
    pub async fn run(&self) -> RunReport {
        let run_id = RunId::new();
        let mut governor = CostGovernor::for_run(
            run_id,
            self.ledger.clone(),
            self.options.budget.clone(),
            self.options.pricing.clone(),
            self.options.artifacts_dir.clone(),
        );
        let mut report = RunReport::new(governor.run_stats());

        if self.options.kill_switch {
            warn!(%run_id, "Kill switch active, skipping run");
            report.killed = true;
            report.finished_at = Utc::now();
            return report;
        }

        info!(%run_id, "Starting pipeline run");
        self.audit.record(AuditEntry::new(AuditAction::RunStarted).for_run(run_id));

        let suppression = self.check_suppression(run_id);
        report.ingested = self.ingest(Some(run_id)).await;

        if suppression.suppress {
            warn!(%run_id, reason = %suppression.reason, "Publishing suppressed");
            self.audit.record(
                AuditEntry::new(AuditAction::PublishingSuppressed)
                    .for_run(run_id)
                    .with_details(json!({ "reason": suppression.reason })),
            );
            report.suppressed = Some(suppression.reason);
        } else {
            let candidates = match self.ledger.unprocessed_candidates() {
                Ok(candidates) => candidates,
                Err(e) => {
                    error!(error = %e, "Failed to load unprocessed candidates");
                    self.audit.record(
                        AuditEntry::new(AuditAction::ErrorOccurred)
                            .for_run(run_id)
                            .with_details(json!({ "stage": "selection", "error": e.to_string() })),
                    );
                    Vec::new()
                }
            };
            info!(%run_id, count = candidates.len(), "Processing unprocessed candidates");

            let mut runner = StageRunner::new(self.generator.as_ref(), &self.retry, &mut governor);
            for candidate in &candidates {
                if self.cancelled.load(Ordering::SeqCst) {
                    warn!(%run_id, "Run interrupted, stopping before next candidate");
                    report.interrupted = true;
                    break;
                }

                let state = match self.process_candidate(&mut runner, run_id, candidate).await {
                    Ok(state) => state,
                    Err(failure) => self.handle_failure(run_id, candidate, failure).await,
                };
                report.tally(&state);

                if state == CandidateState::CostLimitExceeded {
                    // Budget violations end the run, not just the candidate
                    break;
                }
            }
        }

        report.stats = governor.run_stats();
        report.lifetime_cost_usd = self.ledger.lifetime_cost().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read lifetime cost");
            0.0
        });
        report.retry = self.retry.stats();
        report.finished_at = Utc::now();

        self.audit.record(
            AuditEntry::new(AuditAction::RunFinished)
                .for_run(run_id)
                .with_details(json!({
                    "tokens_sent": report.stats.tokens_sent,
                    "tokens_received": report.stats.tokens_received,
                    "cost_usd": report.stats.cost_usd,
                    "aborted": report.stats.aborted,
                    "abort_reason": report.stats.abort_reason,
                    "processed": report.processed,
                    "published": report.published,
                    "interrupted": report.interrupted,
                })),
        );
        info!(
            %run_id,
            processed = report.processed,
            published = report.published,
            cost_usd = report.stats.cost_usd,
            aborted = report.stats.aborted,
            "Run finished"
        );

        report
    }

    /// Fetch from every source and store new candidates. Returns how many
    /// candidates were new. A failing source is audited and skipped.
    pub async fn ingest(&self, run_id: Option<RunId>) -> u64 {
        let mut new_candidates = 0;

        for source in &self.sources {
            let fetched = self
                .retry
                .with_retry(RetryCategory::Source, || source.fetch_candidates())
                .await;

            let candidates = match fetched {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Source fetch failed");
                    let mut entry = AuditEntry::new(AuditAction::ErrorOccurred).with_details(json!({
                        "stage": Stage::Ingestion.as_str(),
                        "source": source.name(),
                        "error": e.to_string(),
                    }));
                    entry.run_id = run_id;
                    self.audit.record(entry);
                    continue;
                }
            };

            info!(source = source.name(), fetched = candidates.len(), "Fetched candidates");
            for candidate in candidates {
                match self.ledger.insert_candidate(&candidate) {
                    Ok(true) => {
                        new_candidates += 1;
                        if let Err(e) = self.ledger.append_stage_outcome(&StageOutcome::new(
                            &candidate.id,
                            Stage::Ingestion,
                            OutcomeStatus::Completed,
                        )) {
                            warn!(candidate_id = %candidate.id, error = %e, "Failed to record ingestion");
                        }
                        let mut entry = AuditEntry::new(AuditAction::PostIngested)
                            .for_candidate(&candidate.id)
                            .with_details(json!({ "source": candidate.source, "title": candidate.title }));
                        entry.run_id = run_id;
                        self.audit.record(entry);
                    }
                    Ok(false) => debug!(candidate_id = %candidate.id, "Candidate already known"),
                    Err(e) => {
                        error!(candidate_id = %candidate.id, error = %e, "Failed to store candidate");
                        let mut entry = AuditEntry::new(AuditAction::ErrorOccurred)
                            .for_candidate(&candidate.id)
                            .with_details(json!({ "stage": Stage::Ingestion.as_str(), "error": e.to_string() }));
                        entry.run_id = run_id;
                        self.audit.record(entry);
                    }
                }
            }
        }

        new_candidates
    }

    /// Ask the feedback engine whether to suppress publishing. Fails open.
    fn check_suppression(&self, run_id: RunId) -> SuppressionDecision {
        match self.feedback.should_suppress_publishing() {
            Ok(decision) => decision,
            Err(e) => {
                error!(error = %e, "Sales feedback check failed, allowing publishing");
                self.audit.record(
                    AuditEntry::new(AuditAction::ErrorOccurred)
                        .for_run(run_id)
                        .with_details(json!({
                            "component": "sales_feedback",
                            "error": e.to_string(),
                            "detail": "failsafe: allowing publishing",
                        })),
                );
                SuppressionDecision::allow()
            }
        }
    }

    /// Advance one candidate to a terminal state.
    ///
    /// Business outcomes (discarded, rejected) are `Ok`; errors carry the
    /// stage they happened in.
    #[instrument(skip(self, runner, candidate), fields(candidate_id = %candidate.id))]
    async fn process_candidate(
        &self,
        runner: &mut StageRunner<'_>,
        run_id: RunId,
        candidate: &Candidate,
    ) -> Result<CandidateState, StageFailure> {
        let id = candidate.id.as_str();

        // Ingested -> Evaluated
        let evaluation = runner.evaluate(candidate).await.map_err(at(Stage::Evaluation))?;
        let path = self
            .save_json(id, Stage::Evaluation, &evaluation)
            .await
            .map_err(at(Stage::Evaluation))?;

        if evaluation.discard {
            let reason = "not_monetizable";
            self.audit_candidate(AuditAction::PostDiscarded, id, run_id, json!({ "reason": reason }));
            self.record(
                StageOutcome::new(id, Stage::Evaluation, OutcomeStatus::Discarded)
                    .with_artifact(path)
                    .with_error(reason),
            )
            .map_err(at(Stage::Evaluation))?;
            return Ok(CandidateState::Discarded {
                reason: reason.to_string(),
            });
        }

        self.audit_candidate(
            AuditAction::ProblemExtracted,
            id,
            run_id,
            json!({ "urgency_score": evaluation.urgency_score }),
        );
        self.record(StageOutcome::new(id, Stage::Evaluation, OutcomeStatus::Completed).with_artifact(path))
            .map_err(at(Stage::Evaluation))?;

        // Evaluated -> Specified
        let spec = runner.specify(&evaluation).await.map_err(at(Stage::Specification))?;
        let path = self
            .save_json(id, Stage::Specification, &spec)
            .await
            .map_err(at(Stage::Specification))?;

        if let Some(reason) = spec_rejection(&spec) {
            info!(candidate_id = id, %reason, "Spec rejected");
            self.audit_candidate(
                AuditAction::SpecRejected,
                id,
                run_id,
                json!({ "reason": reason, "confidence": spec.confidence }),
            );
            self.record(
                StageOutcome::new(id, Stage::Specification, OutcomeStatus::Rejected)
                    .with_artifact(path)
                    .with_error(&reason),
            )
            .map_err(at(Stage::Specification))?;
            return Ok(CandidateState::Rejected { reason });
        }

        self.audit_candidate(
            AuditAction::SpecGenerated,
            id,
            run_id,
            json!({
                "working_title": spec.working_title,
                "confidence": spec.confidence,
                "price_cents": spec.price_cents(),
            }),
        );
        self.record(StageOutcome::new(id, Stage::Specification, OutcomeStatus::Completed).with_artifact(path))
            .map_err(at(Stage::Specification))?;

        // Specified -> Drafted -> Verified, bounded
        let max_attempts = self.options.max_regeneration_attempts.saturating_add(1);
        let mut previous: Option<Verdict> = None;
        let mut attempt = 0u32;

        let content = loop {
            attempt += 1;

            let content = match runner.draft(&spec, previous.as_ref()).await {
                Ok(content) => content,
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(candidate_id = id, attempt, error = %e, "Draft failed, using next regeneration slot");
                    self.audit_candidate(
                        AuditAction::ErrorOccurred,
                        id,
                        run_id,
                        json!({ "stage": Stage::Drafting.as_str(), "attempt": attempt, "error": e.to_string() }),
                    );
                    self.record(
                        StageOutcome::new(id, Stage::Drafting, OutcomeStatus::Failed).with_error(e.to_string()),
                    )
                    .map_err(at(Stage::Drafting))?;
                    continue;
                }
                Err(e) => return Err(at(Stage::Drafting)(e)),
            };

            let path = self
                .save_text(id, Stage::Drafting, &content)
                .await
                .map_err(at(Stage::Drafting))?;
            self.audit_candidate(
                AuditAction::ContentGenerated,
                id,
                run_id,
                json!({ "attempt": attempt, "chars": content.chars().count() }),
            );
            self.record(StageOutcome::new(id, Stage::Drafting, OutcomeStatus::Completed).with_artifact(path))
                .map_err(at(Stage::Drafting))?;

            let verdict = runner.verify(&content).await.map_err(at(Stage::Verification))?;
            let path = self
                .save_json(id, Stage::Verification, &verdict)
                .await
                .map_err(at(Stage::Verification))?;

            if verdict.passed {
                self.audit_candidate(
                    AuditAction::ContentVerified,
                    id,
                    run_id,
                    json!({ "attempt": attempt, "example_quality_score": verdict.example_quality_score }),
                );
                self.record(
                    StageOutcome::new(id, Stage::Verification, OutcomeStatus::Completed).with_artifact(path),
                )
                .map_err(at(Stage::Verification))?;
                break content;
            }

            let exhausted = attempt >= max_attempts;
            self.audit_candidate(
                AuditAction::ContentRejected,
                id,
                run_id,
                json!({
                    "attempt": attempt,
                    "reasons": verdict.reasons,
                    "missing_elements": verdict.missing_elements,
                    "example_quality_score": verdict.example_quality_score,
                }),
            );

            if exhausted {
                let reason = "verification_failed";
                self.audit_candidate(
                    AuditAction::PostDiscarded,
                    id,
                    run_id,
                    json!({ "reason": reason, "attempts": attempt }),
                );
                self.record(
                    StageOutcome::new(id, Stage::Verification, OutcomeStatus::Discarded)
                        .with_artifact(path)
                        .with_error(reason),
                )
                .map_err(at(Stage::Verification))?;
                return Ok(CandidateState::Discarded {
                    reason: reason.to_string(),
                });
            }

            self.record(
                StageOutcome::new(id, Stage::Verification, OutcomeStatus::Rejected)
                    .with_artifact(path)
                    .with_error(verdict.reasons.join("; ")),
            )
            .map_err(at(Stage::Verification))?;
            previous = Some(verdict);
        };

        // Verified -> Listed
        let (listing, listing_text) = runner
            .write_listing(&spec, &content)
            .await
            .map_err(at(Stage::Listing))?;
        let path = self
            .save_text(id, Stage::Listing, &listing_text)
            .await
            .map_err(at(Stage::Listing))?;
        self.audit_candidate(
            AuditAction::ListingCreated,
            id,
            run_id,
            json!({ "title": listing.title, "price_cents": listing.price_cents }),
        );
        self.record(StageOutcome::new(id, Stage::Listing, OutcomeStatus::Completed).with_artifact(path))
            .map_err(at(Stage::Listing))?;

        // Listed -> Published
        let storefront = self.storefront.clone();
        let receipt = self
            .retry
            .with_retry(RetryCategory::Storefront, || storefront.create_listing(&listing))
            .await
            .map_err(at(Stage::Publishing))?;

        self.ledger
            .record_published_product(&PublishedProduct {
                candidate_id: id.to_string(),
                product_id: receipt.id.clone(),
                product_name: listing.title.clone(),
                product_url: receipt.url.clone(),
                published_at: Utc::now(),
            })
            .map_err(|e| at(Stage::Publishing)(e.into()))?;
        self.audit_candidate(
            AuditAction::ProductPublished,
            id,
            run_id,
            json!({ "product_id": receipt.id, "url": receipt.url, "price_cents": listing.price_cents }),
        );

        let mut outcome = StageOutcome::new(id, Stage::Publishing, OutcomeStatus::Completed);
        outcome.artifact_ref = receipt.url.or(Some(receipt.id));
        self.record(outcome).map_err(at(Stage::Publishing))?;

        info!(candidate_id = id, "Candidate published");
        Ok(CandidateState::Published)
    }

    /// Audit, persist an error record, then write the failure outcome.
    /// Returns the candidate's terminal state.
    async fn handle_failure(&self, run_id: RunId, candidate: &Candidate, failure: StageFailure) -> CandidateState {
        let StageFailure { stage, error } = failure;
        let message = error.to_string();

        let (state, category) = if error.as_budget().is_some() {
            error!(candidate_id = %candidate.id, stage = stage.as_str(), error = %message, "Budget exceeded");
            self.audit_candidate(
                AuditAction::CostLimitExceeded,
                &candidate.id,
                run_id,
                json!({ "stage": stage.as_str(), "reason": message }),
            );
            (CandidateState::CostLimitExceeded, "cost_limit")
        } else {
            error!(candidate_id = %candidate.id, stage = stage.as_str(), error = %message, "Candidate failed");
            self.audit_candidate(
                AuditAction::ErrorOccurred,
                &candidate.id,
                run_id,
                json!({ "stage": stage.as_str(), "error": message }),
            );
            let category = if error.is_transient() { "transient" } else { "fatal" };
            (
                CandidateState::Failed {
                    error: message.clone(),
                },
                category,
            )
        };

        let record = json!({
            "candidate_id": candidate.id,
            "run_id": run_id,
            "stage": stage.as_str(),
            "error_type": error.kind(),
            "message": message,
            "category": category,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let mut outcome = StageOutcome::new(&candidate.id, stage, state.outcome_status()).with_error(message);
        match self.artifacts.save_error(&candidate.id, &record).await {
            Ok(path) => outcome = outcome.with_artifact(path.display().to_string()),
            Err(e) => warn!(candidate_id = %candidate.id, error = %e, "Failed to save error record"),
        }

        if let Err(e) = self.ledger.append_stage_outcome(&outcome) {
            error!(candidate_id = %candidate.id, error = %e, "Failed to record failure outcome");
        }

        state
    }

    fn record(&self, outcome: StageOutcome) -> Result<(), CallError> {
        debug!(
            candidate_id = %outcome.candidate_id,
            stage = outcome.stage.as_str(),
            status = outcome.status.as_str(),
            "Stage outcome"
        );
        self.ledger.append_stage_outcome(&outcome)?;
        Ok(())
    }

    fn audit_candidate(&self, action: AuditAction, candidate_id: &str, run_id: RunId, details: serde_json::Value) {
        self.audit.record(
            AuditEntry::new(action)
                .for_candidate(candidate_id)
                .for_run(run_id)
                .with_details(details),
        );
    }

    async fn save_json<T: serde::Serialize>(
        &self,
        candidate_id: &str,
        stage: Stage,
        value: &T,
    ) -> Result<String, CallError> {
        let value = serde_json::to_value(value)?;
        let path = self.artifacts.save_json(candidate_id, stage, &value).await?;
        Ok(path.display().to_string())
    }

    async fn save_text(&self, candidate_id: &str, stage: Stage, text: &str) -> Result<String, CallError> {
        let path = self.artifacts.save_text(candidate_id, stage, text).await?;
        Ok(path.display().to_string())
    }
}
