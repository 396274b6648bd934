//! Connection registry: live connections and channel memberships.
//!
//! Connections are owned by a central arena keyed by [`ConnectionId`]; the
//! per-channel membership structures hold only ids. Membership operations
//! are idempotent and never error: joining twice is a no-op, leaving a
//! channel the connection never joined is a no-op.
//!
//! Task channels are created lazily on first join and removed when their
//! last member leaves, so the task map never carries an empty set.

use crate::ids::{ConnectionId, TaskId, UserId};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

/// Sender half of a connection's outbound frame queue.
///
/// The registry clones it into fan-out snapshots; the receiving half is
/// owned by the connection's writer task. A failed send means the writer is
/// gone and the connection is dead.
pub type OutboundSender = mpsc::UnboundedSender<String>;

/// Selects one of the three channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Account-wide notifications.
    Global,
    /// Events scoped to a single task.
    Task(TaskId),
    /// Reminder deliveries.
    Reminders,
}

impl Channel {
    /// Channel kind without the task id, for metric labels.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Channel::Global => "global",
            Channel::Task(_) => "task",
            Channel::Reminders => "reminders",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Global => f.write_str("global"),
            Channel::Task(task) => write!(f, "task:{}", task),
            Channel::Reminders => f.write_str("reminders"),
        }
    }
}

/// One delivery target from a membership snapshot.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub connection: ConnectionId,
    pub user: UserId,
    pub sender: OutboundSender,
}

struct ConnectionEntry {
    user: UserId,
    sender: OutboundSender,
}

/// Registry snapshot counts, served by `/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub connections: usize,
    pub task_channels: usize,
    pub global_subscribers: usize,
    pub reminder_subscribers: usize,
}

/// In-memory registry of live connections and their channel memberships.
///
/// All operations take `&self`; the registry is shared behind an `Arc` and
/// mutated concurrently by endpoints and the dispatcher.
pub struct Registry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    global: DashSet<ConnectionId>,
    tasks: DashMap<TaskId, HashSet<ConnectionId>>,
    reminders: DashSet<ConnectionId>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            global: DashSet::new(),
            tasks: DashMap::new(),
            reminders: DashSet::new(),
        }
    }

    /// Enter a connection into the arena and mint its id.
    pub fn register(&self, user: UserId, sender: OutboundSender) -> ConnectionId {
        let connection = ConnectionId::next();
        self.connections
            .insert(connection, ConnectionEntry { user, sender });

        debug!(connection = %connection, user = %user, "connection registered");
        connection
    }

    /// Remove a connection from the arena.
    ///
    /// Channel memberships are left to their own `leave` calls; a stale
    /// membership is skipped by snapshots and pruned on the next sweep.
    pub fn deregister(&self, connection: ConnectionId) {
        if self.connections.remove(&connection).is_some() {
            debug!(connection = %connection, "connection deregistered");
        }
    }

    /// Add a connection to a channel. Idempotent.
    pub fn join(&self, channel: Channel, connection: ConnectionId) {
        let added = match channel {
            Channel::Global => self.global.insert(connection),
            Channel::Task(task) => self.tasks.entry(task).or_default().insert(connection),
            Channel::Reminders => self.reminders.insert(connection),
        };

        if added {
            debug!(connection = %connection, channel = %channel, "joined channel");
        }
    }

    /// Remove a connection from a channel. Idempotent.
    ///
    /// Dropping the last member of a task channel removes the channel's
    /// entry from the task map.
    pub fn leave(&self, channel: Channel, connection: ConnectionId) {
        let removed = match channel {
            Channel::Global => self.global.remove(&connection).is_some(),
            Channel::Task(task) => {
                let removed = self
                    .tasks
                    .get_mut(&task)
                    .map(|mut members| members.remove(&connection))
                    .unwrap_or(false);
                self.tasks.remove_if(&task, |_, members| members.is_empty());
                removed
            }
            Channel::Reminders => self.reminders.remove(&connection).is_some(),
        };

        if removed {
            debug!(connection = %connection, channel = %channel, "left channel");
        }
    }

    /// Whether any connection is currently subscribed to this task.
    #[must_use]
    pub fn has_task_channel(&self, task: TaskId) -> bool {
        self.tasks.contains_key(&task)
    }

    /// Snapshot the members of a channel.
    ///
    /// The returned recipients are stable against concurrent joins and
    /// leaves; connections that left the arena since joining are skipped.
    /// An unknown task yields an empty snapshot.
    #[must_use]
    pub fn members(&self, channel: Channel) -> Vec<Recipient> {
        let ids: Vec<ConnectionId> = match channel {
            Channel::Global => self.global.iter().map(|id| *id).collect(),
            Channel::Task(task) => self
                .tasks
                .get(&task)
                .map(|members| members.iter().copied().collect())
                .unwrap_or_default(),
            Channel::Reminders => self.reminders.iter().map(|id| *id).collect(),
        };

        ids.into_iter()
            .filter_map(|connection| {
                self.connections.get(&connection).map(|entry| Recipient {
                    connection,
                    user: entry.user,
                    sender: entry.sender.clone(),
                })
            })
            .collect()
    }

    /// Snapshot every membership entry belonging to `user`, across all three
    /// channel kinds. A connection joined to several channels appears once
    /// per membership.
    #[must_use]
    pub fn user_recipients(&self, user: UserId) -> Vec<(Channel, Recipient)> {
        let mut memberships: Vec<(Channel, ConnectionId)> = Vec::new();

        for id in self.global.iter() {
            memberships.push((Channel::Global, *id));
        }
        for entry in self.tasks.iter() {
            for id in entry.value() {
                memberships.push((Channel::Task(*entry.key()), *id));
            }
        }
        for id in self.reminders.iter() {
            memberships.push((Channel::Reminders, *id));
        }

        memberships
            .into_iter()
            .filter_map(|(channel, connection)| {
                let entry = self.connections.get(&connection)?;
                if entry.user != user {
                    return None;
                }
                Some((
                    channel,
                    Recipient {
                        connection,
                        user: entry.user,
                        sender: entry.sender.clone(),
                    },
                ))
            })
            .collect()
    }

    /// Current registry counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connections.len(),
            task_channels: self.tasks.len(),
            global_subscribers: self.global.len(),
            reminder_subscribers: self.reminders.len(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
