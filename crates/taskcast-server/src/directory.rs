//! Access-control collaborator consumed by the channel endpoints.
//!
//! The hub owns no user or task data. It asks a [`Directory`] to resolve
//! token subjects and to rule on task access; deployments implement the
//! trait against their own user/task store. [`MemoryDirectory`] backs the
//! standalone binary and the tests.

use async_trait::async_trait;
use dashmap::DashMap;
use taskcast_core::ids::{TaskId, UserId};
use thiserror::Error;

/// A resolved user identity.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    /// Stable numeric id, used to scope user-targeted deliveries.
    pub id: UserId,
    /// Token subject this identity resolves from.
    pub subject: String,
    /// Superusers pass every task-access check.
    pub superuser: bool,
}

/// A task as seen by the access check.
#[derive(Debug, Clone, Copy)]
pub struct TaskRef {
    pub id: TaskId,
    pub owner: UserId,
}

/// Why a task-access check failed.
#[derive(Debug, Error)]
pub enum AccessError {
    /// No task exists with this id.
    #[error("task {0} not found")]
    UnknownTask(TaskId),
    /// The user is neither the task's owner nor a superuser.
    #[error("access denied")]
    Denied,
}

/// Resolves token subjects to users and rules on task access.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve a token subject to a user identity.
    async fn resolve_user(&self, subject: &str) -> Option<UserIdentity>;

    /// Check whether `user` may join the channel of `task`.
    ///
    /// The task is looked up before the permission check, so an unknown id
    /// fails for superusers too; the endpoints report both failures with
    /// the same "Access denied" close.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError`] when the task is unknown or the user is
    /// neither its owner nor a superuser.
    async fn task_access(&self, task: TaskId, user: &UserIdentity) -> Result<TaskRef, AccessError>;
}

/// In-memory directory used by the standalone binary and the tests.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: DashMap<String, UserIdentity>,
    tasks: DashMap<TaskId, TaskRef>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user, keyed by token subject.
    pub fn insert_user(&self, user: UserIdentity) {
        self.users.insert(user.subject.clone(), user);
    }

    /// Add a task.
    pub fn insert_task(&self, task: TaskRef) {
        self.tasks.insert(task.id, task);
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn resolve_user(&self, subject: &str) -> Option<UserIdentity> {
        self.users.get(subject).map(|entry| entry.value().clone())
    }

    async fn task_access(&self, task: TaskId, user: &UserIdentity) -> Result<TaskRef, AccessError> {
        let task_ref = match self.tasks.get(&task) {
            Some(entry) => *entry,
            None => return Err(AccessError::UnknownTask(task)),
        };

        if user.superuser || task_ref.owner == user.id {
            Ok(task_ref)
        } else {
            Err(AccessError::Denied)
        }
    }
}
