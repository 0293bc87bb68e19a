use tracing::{debug, info};

use opencatalog_core::{
    edit::{EditRecord, EntityKind},
    ids::{ActorId, EditId, RoleId, TargetId},
};
use opencatalog_storage::{SqliteStorage, Storage};

use crate::collab::ActivityFeed;
use crate::conflict::ConflictDetector;
use crate::error::EngineError;
use crate::inverse::InverseApplier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndoMode {
    /// Refuse when later edits touch the same data.
    #[default]
    Strict,
    /// Undo the later conflicting edits first, newest to oldest, then
    /// the target.
    Cascade,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UndoOptions {
    pub mode: UndoMode,
    /// Skip the conflict gate in strict mode. Cascade ignores this.
    pub force: bool,
    /// Report what would happen without writing anything.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct UndoPreview {
    pub target: EditId,
    pub mode: UndoMode,
    /// Ledger entries that would be undone, in application order.
    pub will_undo: Vec<EditId>,
    /// Later edits that overlap the target.
    pub conflicts: Vec<EditId>,
}

#[derive(Debug)]
pub enum UndoOutcome {
    Applied {
        entity: EntityKind,
        target_id: TargetId,
        /// Edits undone, in application order.
        undone: Vec<EditId>,
        /// The undo entries appended, parallel to `undone`.
        inverses: Vec<EditId>,
    },
    Preview(UndoPreview),
}

/// Drives a full undo: load, conflict scan, chain construction, and
/// transactional application of the inverses.
pub struct UndoOrchestrator {
    detector: ConflictDetector,
    applier: InverseApplier,
}

impl Default for UndoOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoOrchestrator {
    pub fn new() -> Self {
        Self {
            detector: ConflictDetector,
            applier: InverseApplier,
        }
    }

    pub fn undo(
        &self,
        storage: &mut SqliteStorage,
        feed: &dyn ActivityFeed,
        edit_id: EditId,
        actor_id: ActorId,
        actor_role: RoleId,
        options: UndoOptions,
    ) -> Result<UndoOutcome, EngineError> {
        let record = storage
            .get_edit(edit_id)?
            .ok_or_else(|| EngineError::EditNotFound(edit_id.to_string()))?;
        if let Some(undone_by) = storage.find_undo_of(edit_id)? {
            return Err(EngineError::AlreadyUndone {
                edit_id: edit_id.to_string(),
                undone_by: undone_by.to_string(),
            });
        }

        let later = storage.get_later_edits(record.entity, record.target_id, edit_id)?;
        let overlapping: Vec<EditRecord> = later
            .into_iter()
            .filter(|other| self.detector.overlaps(&record, other))
            .collect();
        debug!(
            edit = %edit_id,
            conflicts = overlapping.len(),
            mode = ?options.mode,
            "undo conflict scan"
        );

        if options.mode == UndoMode::Strict && !overlapping.is_empty() && !options.force {
            return Err(EngineError::UndoConflict {
                conflicts: overlapping.iter().map(|e| e.id).collect(),
            });
        }

        // Newest first, so each inverse sees the state its edit left
        // behind; the target goes last.
        let mut chain: Vec<&EditRecord> = Vec::new();
        if options.mode == UndoMode::Cascade {
            chain.extend(overlapping.iter().rev());
        }
        chain.push(&record);

        if options.dry_run {
            return Ok(UndoOutcome::Preview(UndoPreview {
                target: edit_id,
                mode: options.mode,
                will_undo: chain.iter().map(|e| e.id).collect(),
                conflicts: overlapping.iter().map(|e| e.id).collect(),
            }));
        }

        storage.begin_immediate()?;
        let result = (|| {
            let mut undone = Vec::with_capacity(chain.len());
            let mut inverses = Vec::with_capacity(chain.len());
            for entry in &chain {
                // Re-check inside the transaction: a concurrent undo
                // may have landed between the scan and the lock.
                if let Some(undone_by) = storage.find_undo_of(entry.id)? {
                    return Err(EngineError::AlreadyUndone {
                        edit_id: entry.id.to_string(),
                        undone_by: undone_by.to_string(),
                    });
                }
                let inverse =
                    self.applier
                        .apply_inverse(storage, feed, entry, actor_id, actor_role)?;
                undone.push(entry.id);
                inverses.push(inverse.id);
            }
            Ok((undone, inverses))
        })();
        match result {
            Ok((undone, inverses)) => {
                storage.commit()?;
                info!(
                    edit = %edit_id,
                    undone = undone.len(),
                    "undo applied"
                );
                Ok(UndoOutcome::Applied {
                    entity: record.entity,
                    target_id: record.target_id,
                    undone,
                    inverses,
                })
            }
            Err(e) => {
                storage.rollback()?;
                Err(e)
            }
        }
    }
}
