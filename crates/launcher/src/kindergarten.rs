//! Registry of children whose invoker is waiting for their exit status.
//!
//! Tables stay small (dozens of entries) so lookups are a linear scan and
//! the steady state never allocates. Capacity doubles when full, up to a
//! configured ceiling.

use std::os::unix::net::UnixStream;

use nix::unistd::Pid;
use tracing::debug;

pub const INITIAL_SLOTS: usize = 16;
pub const DEFAULT_MAX_SLOTS: usize = 4096;

#[derive(Debug)]
pub struct ChildRecord {
    pub name: String,
    pub socket: UnixStream,
    pub pid: Pid,
}

/// Growth failed; the caller gets its record back and must not expect a
/// reap-time reply for it.
#[derive(Debug)]
pub struct Untracked(pub ChildRecord);

#[derive(Debug)]
pub struct Kindergarten {
    slots: Vec<Option<ChildRecord>>,
    used: usize,
    max_slots: usize,
}

impl Default for Kindergarten {
    fn default() -> Self {
        Self::new(INITIAL_SLOTS, DEFAULT_MAX_SLOTS)
    }
}

impl Kindergarten {
    pub fn new(initial_slots: usize, max_slots: usize) -> Self {
        let max_slots = max_slots.max(1);
        let initial = initial_slots.clamp(1, max_slots);
        let mut slots = Vec::with_capacity(initial);
        slots.resize_with(initial, || None);
        Self {
            slots,
            used: 0,
            max_slots,
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn assign(&mut self, child: ChildRecord) -> Result<(), Untracked> {
        if self.find_by_pid(child.pid).is_some() {
            // a pid can only be live once; a stale entry means we missed a
            // reap and the old socket is useless now
            debug!("replacing stale record for pid {}", child.pid);
            self.release(child.pid);
        }
        if self.used == self.slots.len() && !self.grow() {
            return Err(Untracked(child));
        }
        let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) else {
            return Err(Untracked(child));
        };
        *slot = Some(child);
        self.used += 1;
        Ok(())
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<&ChildRecord> {
        self.slots.iter().flatten().find(|c| c.pid == pid)
    }

    pub fn release(&mut self, pid: Pid) -> Option<ChildRecord> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|c| c.pid == pid))?;
        self.used -= 1;
        slot.take()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildRecord> {
        self.slots.iter().flatten()
    }

    /// Drop every record without replying; used in forked children, which
    /// must not hold other invokers' sockets open.
    pub fn forget_all(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.used = 0;
    }

    fn grow(&mut self) -> bool {
        let current = self.slots.len();
        let wanted = (current * 2).min(self.max_slots);
        if wanted <= current {
            return false;
        }
        if self.slots.try_reserve_exact(wanted - current).is_err() {
            return false;
        }
        self.slots.resize_with(wanted, || None);
        debug!("kindergarten grew from {current} to {wanted} slots");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: i32) -> ChildRecord {
        let (socket, _peer) = UnixStream::pair().unwrap();
        ChildRecord {
            name: format!("app-{pid}"),
            socket,
            pid: Pid::from_raw(pid),
        }
    }

    fn check_invariant(kg: &Kindergarten) {
        assert!(kg.used() <= kg.capacity());
        assert_eq!(kg.iter().count(), kg.used());
    }

    #[test]
    fn assign_find_release() {
        let mut kg = Kindergarten::default();
        kg.assign(record(100)).unwrap();
        kg.assign(record(200)).unwrap();
        check_invariant(&kg);

        assert_eq!(kg.find_by_pid(Pid::from_raw(200)).unwrap().name, "app-200");
        let released = kg.release(Pid::from_raw(100)).unwrap();
        assert_eq!(released.pid, Pid::from_raw(100));
        assert!(kg.find_by_pid(Pid::from_raw(100)).is_none());
        assert_eq!(kg.used(), 1);
        check_invariant(&kg);
    }

    #[test]
    fn releasing_unknown_pid_is_a_noop() {
        let mut kg = Kindergarten::default();
        kg.assign(record(7)).unwrap();
        assert!(kg.release(Pid::from_raw(8)).is_none());
        assert_eq!(kg.used(), 1);
    }

    #[test]
    fn capacity_doubles_when_full() {
        let mut kg = Kindergarten::new(2, 64);
        for pid in 1..=5 {
            kg.assign(record(pid)).unwrap();
            check_invariant(&kg);
        }
        assert_eq!(kg.capacity(), 8);
        assert_eq!(kg.used(), 5);
    }

    #[test]
    fn freed_slots_are_reused_before_growing() {
        let mut kg = Kindergarten::new(2, 64);
        kg.assign(record(1)).unwrap();
        kg.assign(record(2)).unwrap();
        kg.release(Pid::from_raw(1));
        kg.assign(record(3)).unwrap();
        assert_eq!(kg.capacity(), 2);
        check_invariant(&kg);
    }

    #[test]
    fn exhausted_registry_hands_the_record_back() {
        let mut kg = Kindergarten::new(1, 2);
        kg.assign(record(1)).unwrap();
        kg.assign(record(2)).unwrap();
        let Untracked(back) = kg.assign(record(3)).unwrap_err();
        assert_eq!(back.pid, Pid::from_raw(3));
        assert_eq!(kg.used(), 2);
        assert!(kg.find_by_pid(Pid::from_raw(3)).is_none());
        check_invariant(&kg);
    }

    #[test]
    fn same_pid_is_tracked_once() {
        let mut kg = Kindergarten::default();
        kg.assign(record(9)).unwrap();
        kg.assign(record(9)).unwrap();
        assert_eq!(kg.used(), 1);
        check_invariant(&kg);
    }

    #[test]
    fn forget_all_empties_the_table() {
        let mut kg = Kindergarten::default();
        kg.assign(record(1)).unwrap();
        kg.assign(record(2)).unwrap();
        kg.forget_all();
        assert!(kg.is_empty());
        check_invariant(&kg);
    }
}
