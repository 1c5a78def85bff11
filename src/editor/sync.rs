//! Optimistic application and persistence reconciliation.
//!
//! The bridge performs no I/O. Submitting a command updates the optimistic
//! workflow at once and queues a request in the outbox; the host drains the
//! outbox, talks to the store however it likes and feeds responses back in
//! any order. Retries are scheduled against a caller-supplied clock and
//! re-queued by `poll`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::io::store::{FieldVersion, StoreError};
use crate::model::catalog::DefinitionCatalog;
use crate::model::config::SyncConfig;
use crate::model::step::{
    ActionStepData, ActionStepRef, FieldValue, GroupKey, StepField, StepId, TriggerStep,
};
use crate::model::workflow::Workflow;
use crate::ops::tree_ops::TreeError;

use super::command::{Change, Command, Effect, Intent};

/// Identifies one submitted command across retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateStep {
    pub step: ActionStepRef,
    pub data: ActionStepData,
}

/// Full ordered membership of one sibling group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupListing {
    pub group: GroupKey,
    pub steps: Vec<StepId>,
}

/// One structural change, persisted as a unit
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuralBatch {
    pub creates: Vec<CreateStep>,
    pub deletes: Vec<StepId>,
    pub groups: Vec<GroupListing>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PersistRequest {
    StructuralBatch(StructuralBatch),
    UpdateStepField {
        step: StepId,
        field: StepField,
        value: FieldValue,
        version: u64,
    },
    SetTrigger {
        trigger: Option<TriggerStep>,
    },
}

/// A request waiting to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub ticket: Ticket,
    /// 1 for the first try
    pub attempt: u32,
    pub request: PersistRequest,
}

#[derive(Debug)]
pub struct PersistResponse {
    pub ticket: Ticket,
    pub result: Result<(), StoreError>,
}

/// Things the session should tell the user about
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Retrying {
        ticket: Ticket,
        attempt: u32,
        delay: Duration,
    },
    /// A command failed for good; the workflow was rebuilt from the last
    /// confirmed state. `dropped` lists pending commands that no longer applied.
    RolledBack {
        ticket: Ticket,
        command: String,
        error: String,
        dropped: Vec<String>,
    },
    /// The store holds a newer value than our latest edit
    Conflict { step: StepId, field: StepField },
}

/// Result of a successful submit
#[derive(Debug, Clone)]
pub struct Submitted {
    pub ticket: Ticket,
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    InFlight,
    RetryAt(Instant),
    Acked,
    /// Resolved without effect on the store
    Discarded,
}

#[derive(Debug, Clone)]
struct Pending {
    ticket: Ticket,
    forward: Intent,
    request: PersistRequest,
    attempts: u32,
    status: Status,
}

#[derive(Debug)]
pub struct SyncBridge {
    confirmed: Workflow,
    optimistic: Workflow,
    pending: VecDeque<Pending>,
    outbox: Vec<Outgoing>,
    versions: HashMap<(StepId, StepField), u64>,
    next_ticket: u64,
    config: SyncConfig,
    needs_resync: bool,
    events: Vec<SyncEvent>,
}

impl SyncBridge {
    pub fn new(workflow: Workflow, versions: &[FieldVersion], config: SyncConfig) -> Self {
        let mut bridge = SyncBridge {
            confirmed: workflow.clone(),
            optimistic: workflow,
            pending: VecDeque::new(),
            outbox: Vec::new(),
            versions: HashMap::new(),
            next_ticket: 1,
            config,
            needs_resync: false,
            events: Vec::new(),
        };
        bridge.merge_versions(versions);
        bridge
    }

    /// What the UI renders
    pub fn optimistic(&self) -> &Workflow {
        &self.optimistic
    }

    /// Last state the store is known to hold
    pub fn confirmed(&self) -> &Workflow {
        &self.confirmed
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// No unresolved commands and nothing waiting to be sent
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.outbox.is_empty()
    }

    /// Local version of a field (0 if never edited)
    pub fn version(&self, step: &StepId, field: &StepField) -> u64 {
        self.versions
            .get(&(step.clone(), field.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Earliest scheduled retry, if any
    pub fn next_retry(&self) -> Option<Instant> {
        self.pending
            .iter()
            .filter_map(|p| match p.status {
                Status::RetryAt(due) => Some(due),
                _ => None,
            })
            .min()
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Submit
    // -----------------------------------------------------------------------

    /// Apply `intent` to the optimistic workflow and queue its persistence.
    /// Returns `None` when the intent changes nothing.
    pub fn submit(
        &mut self,
        intent: Intent,
        catalog: &dyn DefinitionCatalog,
    ) -> Result<Option<Submitted>, TreeError> {
        let effect = intent.apply(&self.optimistic, catalog)?;
        if effect.workflow == self.optimistic {
            tracing::debug!(%intent, "intent changes nothing; not persisted");
            return Ok(None);
        }

        let request = self.build_request(&effect);
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        tracing::debug!(%ticket, %intent, "applied optimistically");

        self.outbox.push(Outgoing {
            ticket,
            attempt: 1,
            request: request.clone(),
        });
        self.pending.push_back(Pending {
            ticket,
            forward: intent.clone(),
            request,
            attempts: 1,
            status: Status::InFlight,
        });
        self.optimistic = effect.workflow;

        Ok(Some(Submitted {
            ticket,
            command: Command {
                forward: intent,
                inverse: effect.inverse,
            },
        }))
    }

    fn build_request(&mut self, effect: &Effect) -> PersistRequest {
        let tree = &effect.workflow.tree;
        match &effect.change {
            Change::Structural {
                affected,
                created,
                removed,
            } => PersistRequest::StructuralBatch(StructuralBatch {
                creates: created
                    .iter()
                    .filter_map(|id| {
                        Some(CreateStep {
                            step: tree.get(id)?,
                            data: tree.data(id)?.clone(),
                        })
                    })
                    .collect(),
                deletes: removed.clone(),
                groups: affected
                    .iter()
                    .map(|g| GroupListing {
                        group: g.clone(),
                        steps: tree.group(g).to_vec(),
                    })
                    .collect(),
            }),
            Change::Field { step, field, value } => {
                let version = self
                    .versions
                    .entry((step.clone(), field.clone()))
                    .or_insert(0);
                *version += 1;
                PersistRequest::UpdateStepField {
                    step: step.clone(),
                    field: field.clone(),
                    value: value.clone(),
                    version: *version,
                }
            }
            Change::Trigger(trigger) => PersistRequest::SetTrigger {
                trigger: trigger.clone(),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Responses
    // -----------------------------------------------------------------------

    /// Fold one store response back in. Responses may arrive in any order.
    pub fn on_response(
        &mut self,
        response: PersistResponse,
        now: Instant,
        catalog: &dyn DefinitionCatalog,
    ) {
        let PersistResponse { ticket, result } = response;
        let Some(idx) = self.pending.iter().position(|p| p.ticket == ticket) else {
            tracing::debug!(%ticket, "response for resolved ticket ignored");
            return;
        };
        let stale = self.is_superseded(idx);

        match result {
            Ok(()) => {
                if stale {
                    tracing::debug!(%ticket, "stale field write acknowledged; newer edit shown");
                }
                self.pending[idx].status = Status::Acked;
            }
            Err(StoreError::VersionConflict {
                step,
                field,
                sent,
                current,
            }) => {
                self.pending[idx].status = Status::Discarded;
                if stale {
                    tracing::debug!(%ticket, %step, %field, sent, "superseded write rejected");
                } else {
                    tracing::warn!(%ticket, %step, %field, sent, current, "store holds a newer value");
                    self.needs_resync = true;
                    self.events.push(SyncEvent::Conflict { step, field });
                }
            }
            Err(e) if e.is_transient() && self.pending[idx].attempts < self.config.max_attempts => {
                let entry = &mut self.pending[idx];
                let delay = self.config.backoff(entry.attempts);
                entry.status = Status::RetryAt(now + delay);
                tracing::debug!(%ticket, attempt = entry.attempts, ?delay, error = %e, "scheduling retry");
                self.events.push(SyncEvent::Retrying {
                    ticket,
                    attempt: entry.attempts + 1,
                    delay,
                });
            }
            Err(e) => {
                if stale {
                    tracing::debug!(%ticket, error = %e, "superseded write failed; newer edit pending");
                    self.pending[idx].status = Status::Discarded;
                } else {
                    self.roll_back(idx, &e, catalog);
                }
            }
        }

        self.advance_confirmed(catalog);
    }

    /// Re-queue retries that are due. Returns how many were queued.
    pub fn poll(&mut self, now: Instant) -> usize {
        let mut queued = 0;
        for i in 0..self.pending.len() {
            let Status::RetryAt(due) = self.pending[i].status else {
                continue;
            };
            if due > now {
                continue;
            }
            if self.is_superseded(i) {
                self.pending[i].status = Status::Discarded;
                continue;
            }
            let entry = &mut self.pending[i];
            entry.attempts += 1;
            entry.status = Status::InFlight;
            self.outbox.push(Outgoing {
                ticket: entry.ticket,
                attempt: entry.attempts,
                request: entry.request.clone(),
            });
            queued += 1;
        }
        queued
    }

    /// Replace both copies with a freshly loaded store snapshot and forget
    /// every pending command.
    pub fn resync(&mut self, workflow: Workflow, versions: &[FieldVersion]) {
        tracing::info!(dropped = self.pending.len(), "resyncing from store");
        self.confirmed = workflow.clone();
        self.optimistic = workflow;
        self.pending.clear();
        self.outbox.clear();
        self.merge_versions(versions);
        self.needs_resync = false;
    }

    fn merge_versions(&mut self, versions: &[FieldVersion]) {
        for v in versions {
            let local = self
                .versions
                .entry((v.step.clone(), v.field.clone()))
                .or_insert(0);
            *local = (*local).max(v.version);
        }
    }

    /// A field write followed by a later write of the same field that is
    /// still live. Rolled-back and discarded writes no longer count, so the
    /// older edit becomes the current one again once its successor fails.
    fn is_superseded(&self, idx: usize) -> bool {
        let PersistRequest::UpdateStepField { step, field, .. } = &self.pending[idx].request else {
            return false;
        };
        self.pending.iter().skip(idx + 1).any(|later| {
            later.status != Status::Discarded
                && matches!(
                    &later.request,
                    PersistRequest::UpdateStepField { step: s, field: f, .. } if s == step && f == field
                )
        })
    }

    /// Fold acknowledged commands into `confirmed` in issue order.
    fn advance_confirmed(&mut self, catalog: &dyn DefinitionCatalog) {
        while let Some(front) = self.pending.front() {
            let status = front.status;
            match status {
                Status::Acked => {}
                Status::Discarded => {
                    self.pending.pop_front();
                    continue;
                }
                Status::InFlight | Status::RetryAt(_) => break,
            }
            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            match entry.forward.apply(&self.confirmed, catalog) {
                Ok(effect) => {
                    tracing::info!(ticket = %entry.ticket, command = %entry.forward, "persisted");
                    self.confirmed = effect.workflow;
                }
                Err(e) => {
                    tracing::warn!(ticket = %entry.ticket, error = %e, "acknowledged command does not fit confirmed state");
                    self.needs_resync = true;
                }
            }
        }
    }

    /// Drop the failed command, rebuild the optimistic workflow from the
    /// confirmed one and replay whatever is still pending on top.
    fn roll_back(&mut self, idx: usize, error: &StoreError, catalog: &dyn DefinitionCatalog) {
        let Some(failed) = self.pending.remove(idx) else {
            return;
        };
        tracing::warn!(ticket = %failed.ticket, command = %failed.forward, %error, "persistence failed; rolling back");

        let mut rebuilt = self.confirmed.clone();
        let mut dropped = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for entry in self.pending.drain(..) {
            if entry.status == Status::Discarded {
                kept.push_back(entry);
                continue;
            }
            match entry.forward.apply(&rebuilt, catalog) {
                Ok(effect) => {
                    rebuilt = effect.workflow;
                    kept.push_back(entry);
                }
                Err(e) => {
                    tracing::warn!(ticket = %entry.ticket, command = %entry.forward, error = %e, "pending command dropped after rollback");
                    if matches!(entry.status, Status::InFlight | Status::Acked) {
                        // The store may already hold it
                        self.needs_resync = true;
                    }
                    dropped.push(entry.forward.to_string());
                }
            }
        }
        self.pending = kept;
        let live: Vec<Ticket> = self.pending.iter().map(|p| p.ticket).collect();
        self.outbox.retain(|o| live.contains(&o.ticket));
        self.optimistic = rebuilt;

        self.events.push(SyncEvent::RolledBack {
            ticket: failed.ticket,
            command: failed.forward.to_string(),
            error: error.to_string(),
            dropped,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::{InMemoryStore, RemoteStore, Snapshot};
    use crate::model::catalog::StaticCatalog;
    use crate::model::step::{BranchKind, DefinitionId, ParentId};
    use crate::ops::tree_ops::NewStep;
    use pretty_assertions::assert_eq;

    fn catalog() -> StaticCatalog {
        StaticCatalog::builtin().unwrap()
    }

    fn insert(id: &str, position: usize) -> Intent {
        Intent::Insert {
            parent: ParentId::Root,
            branch: BranchKind::Root,
            steps: vec![NewStep {
                data: ActionStepData::new(id.into(), DefinitionId::new("log"), id.to_uppercase()),
                position,
            }],
        }
    }

    fn title(id: &str, t: &str) -> Intent {
        Intent::EditField {
            step: id.into(),
            field: StepField::Title,
            value: FieldValue::Text(t.into()),
        }
    }

    fn title_of(wf: &Workflow, id: &str) -> String {
        wf.tree.data(&id.into()).map(|d| d.title.clone()).unwrap_or_default()
    }

    /// Bridge with one confirmed step `a`
    fn bridge() -> SyncBridge {
        let cat = catalog();
        let wf = insert("a", 0)
            .apply(&Workflow::new("wf"), &cat)
            .unwrap()
            .workflow;
        SyncBridge::new(wf, &[], SyncConfig::default())
    }

    fn ok(ticket: Ticket) -> PersistResponse {
        PersistResponse {
            ticket,
            result: Ok(()),
        }
    }

    fn unavailable(ticket: Ticket) -> PersistResponse {
        PersistResponse {
            ticket,
            result: Err(StoreError::Unavailable("down".into())),
        }
    }

    #[test]
    fn submit_applies_immediately_and_queues() {
        let cat = catalog();
        let mut b = bridge();
        let sub = b.submit(insert("b", 1), &cat).unwrap().unwrap();
        assert_eq!(b.optimistic().tree.len(), 2);
        assert_eq!(b.confirmed().tree.len(), 1);

        let out = b.take_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ticket, sub.ticket);
        match &out[0].request {
            PersistRequest::StructuralBatch(batch) => {
                assert_eq!(batch.creates.len(), 1);
                assert_eq!(batch.creates[0].step.position, 1);
                assert_eq!(
                    batch.groups,
                    vec![GroupListing {
                        group: GroupKey::root(),
                        steps: vec!["a".into(), "b".into()],
                    }]
                );
            }
            other => panic!("unexpected request {:?}", other),
        }

        b.on_response(ok(sub.ticket), Instant::now(), &cat);
        assert_eq!(b.confirmed(), b.optimistic());
        assert!(b.is_idle());
    }

    #[test]
    fn no_op_intent_is_not_persisted() {
        let cat = catalog();
        let mut b = bridge();
        assert!(b.submit(title("a", "A"), &cat).unwrap().is_none());
        assert!(b.take_outbox().is_empty());
    }

    #[test]
    fn rejected_intent_leaves_state_alone() {
        let cat = catalog();
        let mut b = bridge();
        let err = b.submit(title("ghost", "x"), &cat).unwrap_err();
        assert_eq!(err, TreeError::StepNotFound("ghost".into()));
        assert!(b.is_idle());
    }

    #[test]
    fn confirmed_advances_in_issue_order() {
        let cat = catalog();
        let mut b = bridge();
        let t1 = b.submit(insert("b", 1), &cat).unwrap().unwrap().ticket;
        let t2 = b.submit(title("b", "Bee"), &cat).unwrap().unwrap().ticket;

        // Second acked first: nothing folds until the first resolves
        b.on_response(ok(t2), Instant::now(), &cat);
        assert_eq!(b.confirmed().tree.len(), 1);
        b.on_response(ok(t1), Instant::now(), &cat);
        assert_eq!(title_of(b.confirmed(), "b"), "Bee");
        assert!(b.is_idle());
    }

    #[test]
    fn stale_response_never_wins() {
        let cat = catalog();
        let mut b = bridge();
        let t1 = b.submit(title("a", "first"), &cat).unwrap().unwrap().ticket;
        let t2 = b.submit(title("a", "second"), &cat).unwrap().unwrap().ticket;
        assert_eq!(b.version(&"a".into(), &StepField::Title), 2);

        b.on_response(ok(t2), Instant::now(), &cat);
        assert_eq!(title_of(b.optimistic(), "a"), "second");
        b.on_response(ok(t1), Instant::now(), &cat);
        assert_eq!(title_of(b.optimistic(), "a"), "second");
        assert_eq!(title_of(b.confirmed(), "a"), "second");
    }

    #[test]
    fn stale_failure_does_not_roll_back() {
        let cat = catalog();
        let mut b = bridge();
        let t1 = b.submit(title("a", "first"), &cat).unwrap().unwrap().ticket;
        let _t2 = b.submit(title("a", "second"), &cat).unwrap().unwrap().ticket;
        b.on_response(
            PersistResponse {
                ticket: t1,
                result: Err(StoreError::Rejected("nope".into())),
            },
            Instant::now(),
            &cat,
        );
        assert_eq!(title_of(b.optimistic(), "a"), "second");
        assert!(b.take_events().is_empty());
    }

    #[test]
    fn retries_with_backoff_then_rolls_back() {
        let cat = catalog();
        let mut b = bridge();
        let t0 = Instant::now();
        let ticket = b.submit(title("a", "Renamed"), &cat).unwrap().unwrap().ticket;
        b.take_outbox();

        let mut now = t0;
        for attempt in 1..4u32 {
            b.on_response(unavailable(ticket), now, &cat);
            let due = b.next_retry().unwrap();
            assert_eq!(due - now, SyncConfig::default().backoff(attempt));
            // Not due yet
            assert_eq!(b.poll(now), 0);
            now = due;
            assert_eq!(b.poll(now), 1);
            let out = b.take_outbox();
            assert_eq!(out[0].attempt, attempt + 1);
            assert_eq!(title_of(b.optimistic(), "a"), "Renamed");
        }

        // Fourth failure exhausts max_attempts
        b.on_response(unavailable(ticket), now, &cat);
        assert_eq!(title_of(b.optimistic(), "a"), "A");
        assert!(b.is_idle());
        let events = b.take_events();
        assert!(matches!(events.last(), Some(SyncEvent::RolledBack { .. })));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SyncEvent::Retrying { .. }))
                .count(),
            3
        );
    }

    fn rejected(ticket: Ticket) -> PersistResponse {
        PersistResponse {
            ticket,
            result: Err(StoreError::Rejected("nope".into())),
        }
    }

    #[test]
    fn older_edit_rolls_back_after_newer_failed() {
        let cat = catalog();
        let mut b = bridge();
        let t1 = b.submit(title("a", "first"), &cat).unwrap().unwrap().ticket;
        let t2 = b.submit(title("a", "second"), &cat).unwrap().unwrap().ticket;
        b.take_outbox();

        b.on_response(rejected(t2), Instant::now(), &cat);
        assert_eq!(title_of(b.optimistic(), "a"), "first");
        b.on_response(rejected(t1), Instant::now(), &cat);

        assert_eq!(b.optimistic(), b.confirmed());
        assert_eq!(title_of(b.optimistic(), "a"), "A");
        assert!(b.is_idle());
        let rolled: Vec<Ticket> = b
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::RolledBack { ticket, .. } => Some(ticket),
                _ => None,
            })
            .collect();
        assert_eq!(rolled, vec![t2, t1]);
    }

    #[test]
    fn older_edit_retries_after_newer_failed() {
        let cat = catalog();
        let mut b = bridge();
        let now = Instant::now();
        let t1 = b.submit(title("a", "first"), &cat).unwrap().unwrap().ticket;
        let t2 = b.submit(title("a", "second"), &cat).unwrap().unwrap().ticket;
        b.take_outbox();

        b.on_response(unavailable(t1), now, &cat);
        b.on_response(rejected(t2), now, &cat);
        assert_eq!(title_of(b.optimistic(), "a"), "first");

        let due = b.next_retry().unwrap();
        assert_eq!(b.poll(due), 1);
        let out = b.take_outbox();
        assert_eq!(out[0].ticket, t1);
        b.on_response(ok(t1), due, &cat);
        assert_eq!(title_of(b.confirmed(), "a"), "first");
        assert_eq!(b.optimistic(), b.confirmed());
        assert!(b.is_idle());
    }

    #[test]
    fn rollback_replays_later_commands() {
        let cat = catalog();
        let mut b = bridge();
        let t1 = b.submit(insert("b", 1), &cat).unwrap().unwrap().ticket;
        let _t2 = b.submit(title("b", "Bee"), &cat).unwrap().unwrap().ticket;
        let _t3 = b.submit(insert("c", 0), &cat).unwrap().unwrap().ticket;

        b.on_response(
            PersistResponse {
                ticket: t1,
                result: Err(StoreError::Rejected("no".into())),
            },
            Instant::now(),
            &cat,
        );
        // b is gone, so its title edit cannot replay; c still applies
        let ids: Vec<&str> = b
            .optimistic()
            .tree
            .children(&ParentId::Root, BranchKind::Root)
            .iter()
            .map(|s| s.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a"]);
        assert!(b.needs_resync());
        match b.take_events().pop() {
            Some(SyncEvent::RolledBack { dropped, .. }) => assert_eq!(dropped.len(), 1),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn conflict_on_current_version_flags_resync() {
        let cat = catalog();
        let mut b = bridge();
        let t = b.submit(title("a", "mine"), &cat).unwrap().unwrap().ticket;
        b.on_response(
            PersistResponse {
                ticket: t,
                result: Err(StoreError::VersionConflict {
                    step: "a".into(),
                    field: StepField::Title,
                    sent: 1,
                    current: 5,
                }),
            },
            Instant::now(),
            &cat,
        );
        assert!(b.needs_resync());
        assert_eq!(
            b.take_events(),
            vec![SyncEvent::Conflict {
                step: "a".into(),
                field: StepField::Title
            }]
        );
        assert!(b.is_idle());
    }

    #[test]
    fn round_trip_against_memory_store() {
        let cat = catalog();
        let mut store = InMemoryStore::new(Snapshot::new(bridge().confirmed().to_definition()));
        let mut b = bridge();
        b.submit(insert("b", 0), &cat).unwrap();
        b.submit(
            Intent::Move {
                step: "a".into(),
                parent: ParentId::Root,
                branch: BranchKind::Root,
                position: 0,
            },
            &cat,
        )
        .unwrap();
        b.submit(title("b", "Bee"), &cat).unwrap();
        b.submit(
            Intent::Delete {
                steps: vec!["a".into()],
            },
            &cat,
        )
        .unwrap();

        for out in b.take_outbox() {
            let result = store.execute(&out.request);
            b.on_response(
                PersistResponse {
                    ticket: out.ticket,
                    result,
                },
                Instant::now(),
                &cat,
            );
        }
        assert!(b.is_idle());
        let (stored, warnings) = Workflow::from_definition(store.load().unwrap().workflow);
        assert!(warnings.is_empty());
        assert_eq!(&stored, b.confirmed());
        assert_eq!(b.confirmed(), b.optimistic());
    }

    #[test]
    fn resync_replaces_everything() {
        let cat = catalog();
        let mut b = bridge();
        b.submit(insert("b", 1), &cat).unwrap();
        b.resync(
            Workflow::new("fresh"),
            &[FieldVersion {
                step: "a".into(),
                field: StepField::Title,
                version: 9,
            }],
        );
        assert!(b.is_idle());
        assert!(b.optimistic().tree.is_empty());
        assert_eq!(b.version(&"a".into(), &StepField::Title), 9);
    }
}
