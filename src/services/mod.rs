//! Analysis and triage services.
//!
//! Services sit between the CLI and the infrastructure layer:
//!
//! ```text
//!        CLI (main.rs)
//!          |
//!          v
//!    TriageService
//!          |
//!          v
//! Reconciliation -> AnalysisService -> CandidateSelector
//!          |              |
//!          v              v
//!   Mailbox ports    ScoringPort, SummaryPort, SafetyPolicy, RecordStore
//! ```
//!
//! # Services Overview
//!
//! - [`reconcile`]: merges a mailbox snapshot into the stored record set
//! - [`SafetyPolicy`]: rules that keep important mail out of cleanup
//! - [`AnalysisService`]: batch scoring with per-batch saves
//! - [`CandidateSelector`]: ranks the most disposable analyzed messages
//! - [`Digest`]: period overview in bullet, paragraph or keyword form
//! - [`TriageService`]: the workflow the CLI drives

mod analysis_service;
mod candidate_selector;
mod reconciliation;
mod report;
mod safety_policy;
mod triage_service;

pub use analysis_service::{
    AnalysisError, AnalysisReport, AnalysisService, ChannelObserver, MessageOutcome, NoopObserver,
    Outcome, ProgressObserver, TracingObserver,
};
pub use candidate_selector::{Candidate, CandidateSelector};
pub use reconciliation::{reconcile, reconcile_with_report, SyncReport};
pub use report::{
    CategoryGroup, CleanupSummary, Digest, DigestEntry, DigestStyle, ImportanceSummary,
};
pub use safety_policy::{DeletionCheck, SafetyPolicy, SafetyVerdict};
pub use triage_service::{Explanation, Result, TriageError, TriageService};
