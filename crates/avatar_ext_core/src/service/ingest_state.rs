//! Per-run ingestion state machine.
//!
//! # Responsibility
//! - Track the stage of one ingestion run and each of its assets.
//! - Emit one log event per transition, tagged with the run id.
//!
//! # Invariants
//! - `FatalReject` and `Complete` are terminal.
//! - Asset states never move backwards; there is no retry state.
//! - Invalid transitions are logged and ignored, never applied.

use super::extension_service::{IngestError, IngestReport, SkipReason, SkippedAsset};
use crate::logging::sanitize_for_log;
use log::{debug, error, info, warn};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Where a run's manifest comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSource {
    Url,
    Files,
}

impl IngestSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Files => "files",
        }
    }
}

/// Stage of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    FetchingManifest,
    ValidatingManifest,
    FatalReject,
    ClearingOldAssets,
    WritingAbstract,
    ResolvingAssets,
    Complete,
}

impl IngestStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchingManifest => "fetching_manifest",
            Self::ValidatingManifest => "validating_manifest",
            Self::FatalReject => "fatal_reject",
            Self::ClearingOldAssets => "clearing_old_assets",
            Self::WritingAbstract => "writing_abstract",
            Self::ResolvingAssets => "resolving_assets",
            Self::Complete => "complete",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::FatalReject | Self::Complete)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use IngestStage::*;
        matches!(
            (self, next),
            (FetchingManifest, ValidatingManifest)
                | (FetchingManifest, FatalReject)
                | (ValidatingManifest, ClearingOldAssets)
                | (ValidatingManifest, FatalReject)
                | (ClearingOldAssets, WritingAbstract)
                | (ClearingOldAssets, FatalReject)
                | (WritingAbstract, ResolvingAssets)
                | (WritingAbstract, FatalReject)
                | (ResolvingAssets, Complete)
        )
    }
}

/// State of one declared asset within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Pending,
    Fetching,
    Reading,
    Validating,
    Stored,
    Skipped,
}

impl AssetState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Reading => "reading",
            Self::Validating => "validating",
            Self::Stored => "stored",
            Self::Skipped => "skipped",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use AssetState::*;
        match (self, next) {
            (Stored | Skipped, _) => false,
            (_, Skipped) => true,
            (Pending, Fetching | Reading) => true,
            (Fetching | Reading, Validating) => true,
            (Validating, Stored) => true,
            _ => false,
        }
    }
}

/// One ingestion run: id, source and current stage.
#[derive(Debug)]
pub struct IngestRun {
    run_id: Uuid,
    source: IngestSource,
    stage: Mutex<IngestStage>,
}

impl IngestRun {
    /// Starts a run in `FetchingManifest`.
    pub fn start(source: IngestSource) -> Self {
        let run = Self {
            run_id: Uuid::new_v4(),
            source,
            stage: Mutex::new(IngestStage::FetchingManifest),
        };
        info!(
            "event=ingest_run module=service status=start run_id={} source={} stage={}",
            run.run_id,
            source.as_str(),
            IngestStage::FetchingManifest.as_str()
        );
        run
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stage(&self) -> IngestStage {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `next`; returns whether the transition was applied.
    pub fn advance(&self, next: IngestStage) -> bool {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *stage;
        if !current.can_transition_to(next) {
            error!(
                "event=ingest_stage module=service status=error run_id={} from={} to={} reason=invalid_transition",
                self.run_id,
                current.as_str(),
                next.as_str()
            );
            return false;
        }
        *stage = next;
        debug!(
            "event=ingest_stage module=service status=ok run_id={} from={} to={}",
            self.run_id,
            current.as_str(),
            next.as_str()
        );
        true
    }

    /// Ends the run in `FatalReject`.
    pub fn reject(&self, err: &IngestError) {
        let from = self.stage();
        if !from.is_terminal() {
            self.advance(IngestStage::FatalReject);
        }
        warn!(
            "event=ingest_run module=service status=error run_id={} source={} stage={} error_kind={}",
            self.run_id,
            self.source.as_str(),
            from.as_str(),
            err.kind()
        );
    }

    /// Ends the run in `Complete`.
    pub fn complete(&self, report: &IngestReport) {
        self.advance(IngestStage::Complete);
        info!(
            "event=ingest_run module=service status=ok run_id={} source={} extension={} stored={} skipped={}",
            self.run_id,
            self.source.as_str(),
            sanitize_for_log(&report.extension_key),
            report.stored.len(),
            report.skipped.len()
        );
    }

    /// Tracks one asset of this run, starting in `Pending`.
    pub fn asset(&self, image_key: &str) -> AssetProgress<'_> {
        AssetProgress {
            run: self,
            image_key: image_key.to_string(),
            state: AssetState::Pending,
        }
    }
}

/// Progress of one asset; consumed by `stored` or `skip`.
#[derive(Debug)]
pub struct AssetProgress<'run> {
    run: &'run IngestRun,
    image_key: String,
    state: AssetState,
}

impl AssetProgress<'_> {
    pub fn state(&self) -> AssetState {
        self.state
    }

    pub fn advance(&mut self, next: AssetState) {
        if !self.state.can_transition_to(next) {
            error!(
                "event=ingest_asset module=service status=error run_id={} image={} from={} to={} reason=invalid_transition",
                self.run.run_id,
                sanitize_for_log(&self.image_key),
                self.state.as_str(),
                next.as_str()
            );
            return;
        }
        debug!(
            "event=ingest_asset module=service status=ok run_id={} image={} from={} to={}",
            self.run.run_id,
            sanitize_for_log(&self.image_key),
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
    }

    /// Marks the asset stored and returns its image key.
    pub fn stored(mut self) -> String {
        self.advance(AssetState::Stored);
        self.image_key
    }

    /// Marks the asset skipped with `reason`.
    pub fn skip(mut self, reason: SkipReason) -> SkippedAsset {
        let from = self.state;
        self.advance(AssetState::Skipped);
        warn!(
            "event=ingest_asset module=service status=skip run_id={} image={} from={} reason={}",
            self.run.run_id,
            sanitize_for_log(&self.image_key),
            from.as_str(),
            sanitize_for_log(&reason.to_string())
        );
        SkippedAsset {
            image_key: self.image_key,
            reason,
        }
    }
}
