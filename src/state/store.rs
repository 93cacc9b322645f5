//! Canonical device state and the staged-edit protocol.
//!
//! The canonical [`DeviceState`] lives behind an `RwLock<Arc<_>>`. Readers
//! clone the `Arc`; every write builds a complete new state and swaps it in,
//! so a reader never observes a partial change.
//!
//! A device has one edit lock. A session entering a nested configuration
//! context takes it through [`DeviceStore::open_edit`] and gets a
//! [`StagedEdit`] holding a private copy of the state. While the lock is
//! held, direct commits from other sessions are refused. Dropping the
//! `StagedEdit` without committing releases the lock and discards the copy.
//!
//! Lock order is `edit_owner` before `active`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use log::{debug, trace};

use super::{DeviceState, ont};
use crate::error::CommandError;

/// Identifies a session to the edit lock.
pub type SessionId = u64;

#[derive(Debug)]
pub struct DeviceStore {
    active: RwLock<Arc<DeviceState>>,
    generation: AtomicU64,
    edit_owner: Mutex<Option<SessionId>>,
}

impl DeviceStore {
    /// Takes ownership of `state`. Unregistered ONTs with no discovery time
    /// are stamped with the load time.
    pub fn new(mut state: DeviceState) -> Self {
        let stamped = ont::stamp_discovered(&mut state, Utc::now());
        if stamped > 0 {
            trace!("stamped discovery time on {stamped} autofind ONTs");
        }
        Self {
            active: RwLock::new(Arc::new(state)),
            generation: AtomicU64::new(0),
            edit_owner: Mutex::new(None),
        }
    }

    /// Current canonical state.
    pub fn snapshot(&self) -> Arc<DeviceState> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of commits applied so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Session currently holding the edit lock.
    pub fn edit_owner(&self) -> Option<SessionId> {
        *self.edit_owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the edit lock for `session` and returns a staged copy.
    pub fn open_edit(self: &Arc<Self>, session: SessionId) -> Result<StagedEdit, CommandError> {
        let mut owner = self.edit_owner.lock().unwrap_or_else(PoisonError::into_inner);
        match *owner {
            Some(holder) if holder != session => return Err(CommandError::Busy),
            Some(_) => {
                return Err(CommandError::Rejected(
                    "An edit is already open on this terminal".to_string(),
                ));
            }
            None => {}
        }
        *owner = Some(session);
        let base = self.snapshot();
        debug!(
            "session {session} opened staged edit at generation {}",
            self.generation()
        );
        Ok(StagedEdit {
            store: Arc::clone(self),
            session,
            base_generation: self.generation(),
            state: (*base).clone(),
        })
    }

    /// Applies `f` to a copy of canonical state and swaps the result in.
    ///
    /// Refused with [`CommandError::Busy`] while another session holds the
    /// edit lock. When `f` fails nothing changes.
    pub fn apply<T, F>(&self, session: SessionId, f: F) -> Result<T, CommandError>
    where
        F: FnOnce(&mut DeviceState) -> Result<T, CommandError>,
    {
        let owner = self.edit_owner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(holder) = *owner
            && holder != session
        {
            return Err(CommandError::Busy);
        }
        let mut next = (*self.snapshot()).clone();
        let out = f(&mut next)?;
        self.swap(next);
        drop(owner);
        trace!("session {session} applied direct commit");
        Ok(out)
    }

    fn swap(&self, next: DeviceState) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        *active = Arc::new(next);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, session: SessionId) {
        let mut owner = self.edit_owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == Some(session) {
            *owner = None;
            debug!("session {session} released edit lock");
        }
    }
}

/// A session's private working copy. Holds the device edit lock until it is
/// committed or dropped.
#[derive(Debug)]
pub struct StagedEdit {
    store: Arc<DeviceStore>,
    session: SessionId,
    base_generation: u64,
    state: DeviceState,
}

impl StagedEdit {
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Store generation the copy was taken from.
    pub fn base_generation(&self) -> u64 {
        self.base_generation
    }

    /// Applies `f` to the staged copy. When `f` fails the copy is unchanged.
    pub fn apply<T, F>(&mut self, f: F) -> Result<T, CommandError>
    where
        F: FnOnce(&mut DeviceState) -> Result<T, CommandError>,
    {
        let mut next = self.state.clone();
        let out = f(&mut next)?;
        self.state = next;
        Ok(out)
    }

    /// Cross-collection reference check of the staged copy.
    pub fn validate(&self) -> Result<(), CommandError> {
        self.state.validate_references()
    }

    /// Validates and atomically replaces canonical state with the staged
    /// copy, then releases the edit lock. Returns the new generation.
    ///
    /// On validation failure the edit is handed back untouched.
    pub fn commit(self) -> Result<u64, (Self, CommandError)> {
        if let Err(err) = self.validate() {
            return Err((self, err));
        }
        let owner = self
            .store
            .edit_owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.store.swap(self.state.clone());
        drop(owner);
        let generation = self.store.generation();
        debug!(
            "session {} committed staged edit, generation {} -> {generation}",
            self.session, self.base_generation
        );
        Ok(generation)
    }

    /// Drops the copy and releases the lock.
    pub fn discard(self) {
        debug!("session {} discarded staged edit", self.session);
    }
}

impl Drop for StagedEdit {
    fn drop(&mut self) {
        self.store.release(self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DbaProfile, Tcont};
    use crate::templates;
    use std::thread;

    fn store() -> Arc<DeviceStore> {
        Arc::new(DeviceStore::new(
            templates::sample_state("huawei_smartax").expect("sample"),
        ))
    }

    fn profile(id: u32) -> DbaProfile {
        DbaProfile {
            profile_id: id,
            profile_name: format!("test{id}"),
            dba_type: 3,
            bandwidth_compensation: false,
            fix_delay: false,
            fix_kbps: 0,
            assure_kbps: 1000,
            max_kbps: 2000,
            additional_bandwidth: "best-effort".to_string(),
            best_effort_priority: 0,
            best_effort_weight: 0,
            bind_times: 0,
        }
    }

    #[test]
    fn second_session_cannot_open_edit() {
        let store = store();
        let edit = store.open_edit(1).expect("first edit");
        let err = match store.open_edit(2) {
            Ok(_) => panic!("second edit should be refused"),
            Err(err) => err,
        };
        assert_eq!(err, CommandError::Busy);
        drop(edit);
        assert_eq!(store.edit_owner(), None);
        store.open_edit(2).expect("lock released on drop");
    }

    #[test]
    fn direct_commit_refused_while_other_session_edits() {
        let store = store();
        let _edit = store.open_edit(1).expect("edit");
        let before = store.snapshot().fingerprint();
        let result = store.apply(2, |state| {
            state.dba_profiles.push(profile(60));
            Ok(())
        });
        assert_eq!(result, Err(CommandError::Busy));
        assert_eq!(store.snapshot().fingerprint(), before);
    }

    #[test]
    fn failed_apply_leaves_state_unchanged() {
        let store = store();
        let before = store.snapshot().fingerprint();
        let result: Result<(), CommandError> = store.apply(1, |state| {
            state.dba_profiles.clear();
            Err(CommandError::InvalidInput("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.snapshot().fingerprint(), before);
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn discard_restores_canonical_fingerprint() {
        let store = store();
        let before = store.snapshot().fingerprint();
        let mut edit = store.open_edit(1).expect("edit");
        edit.apply(|state| {
            state.dba_profiles.push(profile(70));
            Ok(())
        })
        .expect("staged change");
        assert_ne!(edit.state().fingerprint(), before);
        edit.discard();
        assert_eq!(store.snapshot().fingerprint(), before);
        assert_eq!(store.edit_owner(), None);
    }

    #[test]
    fn commit_with_broken_reference_hands_edit_back() {
        let store = store();
        let mut edit = store.open_edit(1).expect("edit");
        edit.apply(|state| {
            state.tconts.push(Tcont {
                lineprofile_id: 1,
                tcont_id: 9,
                dba_profile_id: 9999,
            });
            Ok(())
        })
        .expect("staged change");
        let (edit, err) = match edit.commit() {
            Ok(_) => panic!("dangling reference should block commit"),
            Err(pair) => pair,
        };
        assert!(matches!(err, CommandError::MissingReference(_)));
        assert_eq!(store.edit_owner(), Some(1));
        assert_eq!(store.generation(), 0);
        drop(edit);
    }

    #[test]
    fn concurrent_readers_see_whole_states() {
        let store = store();
        let baseline = store.snapshot();
        let base_count = baseline.dba_profiles.len();

        let readers = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let snap = store.snapshot();
                        let n = snap.dba_profiles.len();
                        assert!(n == base_count || n == base_count + 2, "torn read: {n}");
                        let has_a = snap.dba_profile(80).is_some();
                        let has_b = snap.dba_profile(81).is_some();
                        assert_eq!(has_a, has_b);
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut edit = store.open_edit(1).expect("edit");
        edit.apply(|state| {
            state.dba_profiles.push(profile(80));
            state.dba_profiles.push(profile(81));
            Ok(())
        })
        .expect("staged change");
        edit.commit().map_err(|(_, e)| e).expect("commit");

        for reader in readers {
            reader.join().expect("reader thread");
        }
        assert_eq!(baseline.dba_profiles.len(), base_count);
        assert_eq!(store.snapshot().dba_profiles.len(), base_count + 2);
        assert_eq!(store.edit_owner(), None);
    }
}
