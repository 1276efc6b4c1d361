//! RPC-facing types shared between the coordinator and the worker.
//!
//! These are the only types that cross the wire: everything here must
//! stay plain, `Serialize`/`Deserialize`, and free of coordinator-only
//! bookkeeping (e.g. `TimeAssigned` lives on the coordinator's internal
//! task table, not here, since a monotonic instant carries no meaning
//! once it crosses a process boundary).

use serde::{Deserialize, Serialize};

/// Which phase a task belongs to. Kept as its own type, distinct from
/// `Stage`, so the two can never be compared to one another by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Map,
    Reduce,
}

/// A task's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Complete,
}

/// The task record as it crosses the wire. `AssignTask` returns one of
/// these to the worker; `UpdateTaskStatus` sends one back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub kind: TaskKind,
    pub task_id: u32,
    pub status: TaskStatus,
    /// Map tasks: path to the input shard. Reduce tasks: unused.
    pub filepath: String,
    pub n_reduce: u32,
}

impl Default for Task {
    /// The "no task available right now" sentinel: all fields zeroed.
    /// Not an error — the worker backs off and re-polls.
    fn default() -> Self {
        Self {
            kind: TaskKind::Map,
            task_id: 0,
            status: TaskStatus::NotStarted,
            filepath: String::new(),
            n_reduce: 0,
        }
    }
}

impl Task {
    /// True for the zero-valued sentinel `AssignTask` hands back when
    /// nothing is eligible for assignment right now.
    pub fn is_empty(&self) -> bool {
        *self == Task::default()
    }

    /// The coordinator-signalled shutdown reply: `Stage == Complete`.
    pub fn shutdown() -> Self {
        Self {
            status: TaskStatus::Complete,
            ..Task::default()
        }
    }
}

/// One intermediate key/value pair, the unit the shuffle moves around.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Non-negative 31-bit FNV-1a hash of a key's UTF-8 bytes, used to pick
/// the reduce partition a key belongs to. `p = ihash(key) % n_reduce`.
pub fn ihash(key: &str) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash & 0x7fff_ffff
}

/// RPC surface the coordinator serves and the worker calls. tarpc derives
/// the wire method names from these (`CoordinatorRpc.assign_task`,
/// `CoordinatorRpc.update_task_status`), the Rust-idiomatic equivalent of
/// the `<ServiceName>.AssignTask` naming convention.
#[tarpc::service]
pub trait CoordinatorRpc {
    /// Ask for a task to run. Returns the zero-valued `Task` if nothing
    /// is eligible right now, or a `Complete`-status `Task` once the job
    /// is done. Never blocks waiting for work.
    async fn assign_task() -> Task;

    /// Report that a task finished. Idempotent: reporting an
    /// already-complete task is a no-op.
    async fn update_task_status(task: Task);
}

/// A process-unique local socket path, namespaced by the invoking
/// user's id so that two users on the same host never collide.
pub fn coordinator_sock() -> String {
    let uid = unsafe { libc::getuid() };
    format!("/var/tmp/824-mr-{}", uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihash_is_deterministic_and_non_negative() {
        for key in ["a", "hello", "", "the quick brown fox"] {
            let h1 = ihash(key);
            let h2 = ihash(key);
            assert_eq!(h1, h2);
            assert!(h1 <= 0x7fff_ffff);
        }
    }

    #[test]
    fn ihash_partitioning_is_stable_for_n_reduce() {
        let n_reduce = 7u32;
        let key = "consistent-key";
        let p1 = ihash(key) % n_reduce;
        let p2 = ihash(key) % n_reduce;
        assert_eq!(p1, p2);
    }

    #[test]
    fn default_task_is_empty_sentinel() {
        let t = Task::default();
        assert!(t.is_empty());
        assert_eq!(t.status, TaskStatus::NotStarted);
    }

    #[test]
    fn shutdown_task_is_not_empty() {
        let t = Task::shutdown();
        assert!(!t.is_empty());
        assert_eq!(t.status, TaskStatus::Complete);
    }
}
