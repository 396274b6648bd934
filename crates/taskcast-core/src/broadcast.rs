//! Event fan-out.
//!
//! Domain mutations enqueue events through a [`Broadcaster`] handle; the
//! queue never blocks and never reports failure to the caller. A dedicated
//! [`Dispatcher`] drains the queue and sweeps the matching registry members,
//! delivering to a snapshot taken at sweep start. Entries that fail delivery
//! are collected during the sweep and removed from the swept channel after
//! it, so a disconnect mid-broadcast never aborts the fan-out.

use crate::ids::{ConnectionId, TaskId, UserId};
use crate::registry::{Channel, Recipient, Registry};
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use taskcast_protocol::{Envelope, EventKind};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Metric names emitted by the dispatcher. Described and exported by the
/// server crate.
pub mod names {
    pub const EVENTS_TOTAL: &str = "taskcast_events_total";
    pub const DELIVERIES_TOTAL: &str = "taskcast_deliveries_total";
    pub const DELIVERY_FAILURES_TOTAL: &str = "taskcast_delivery_failures_total";
}

/// One unit of fan-out work.
#[derive(Debug)]
pub enum Dispatch {
    /// Deliver to every member of a channel.
    Channel {
        channel: Channel,
        kind: EventKind,
        payload: Value,
    },
    /// Deliver to every membership entry belonging to a user, across all
    /// channel kinds.
    User {
        user: UserId,
        kind: EventKind,
        payload: Value,
    },
}

/// Create a connected broadcaster/dispatcher pair over `registry`.
///
/// The [`Dispatcher`] must be driven (usually `tokio::spawn(dispatcher.run())`)
/// for enqueued events to go anywhere.
#[must_use]
pub fn channel(registry: Arc<Registry>) -> (Broadcaster, Dispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Broadcaster { tx }, Dispatcher { registry, rx })
}

/// Cheaply cloneable handle used by event sources to enqueue fan-out work.
///
/// Every method is fire-and-forget: it never blocks, never errors, and
/// returns before any delivery happens.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl Broadcaster {
    /// Enqueue an event for every member of `channel`.
    pub fn broadcast(&self, channel: Channel, kind: EventKind, payload: Value) {
        self.enqueue(Dispatch::Channel {
            channel,
            kind,
            payload,
        });
    }

    /// Enqueue an event for every membership entry belonging to `user`.
    pub fn send_to_user(&self, user: UserId, kind: EventKind, payload: Value) {
        self.enqueue(Dispatch::User {
            user,
            kind,
            payload,
        });
    }

    /// A task changed.
    pub fn notify_task_updated(&self, task: TaskId, payload: Value) {
        self.broadcast(Channel::Task(task), EventKind::TaskUpdated, payload);
    }

    /// A comment was added to a task.
    pub fn notify_comment_created(&self, task: TaskId, payload: Value) {
        self.broadcast(Channel::Task(task), EventKind::CommentCreated, payload);
    }

    /// A subtask was added to a task.
    pub fn notify_subtask_created(&self, task: TaskId, payload: Value) {
        self.broadcast(Channel::Task(task), EventKind::SubtaskCreated, payload);
    }

    /// An attachment was uploaded to a task.
    pub fn notify_attachment_created(&self, task: TaskId, payload: Value) {
        self.broadcast(Channel::Task(task), EventKind::AttachmentCreated, payload);
    }

    /// A reminder fired; deliver to the reminders channel.
    pub fn notify_reminder(&self, payload: Value) {
        self.broadcast(Channel::Reminders, EventKind::Reminder, payload);
    }

    /// A reminder fired for one user; deliver to every connection they hold.
    pub fn notify_user_reminder(&self, user: UserId, payload: Value) {
        self.send_to_user(user, EventKind::Reminder, payload);
    }

    /// An account-wide notification; deliver to the global channel.
    pub fn notify_global(&self, payload: Value) {
        self.broadcast(Channel::Global, EventKind::Notification, payload);
    }

    fn enqueue(&self, dispatch: Dispatch) {
        if self.tx.send(dispatch).is_err() {
            debug!("dispatcher gone, dropping event");
        }
    }
}

/// Owns the receiving side of the dispatch queue and performs the sweeps.
pub struct Dispatcher {
    registry: Arc<Registry>,
    rx: mpsc::UnboundedReceiver<Dispatch>,
}

impl Dispatcher {
    /// Drain the queue until every [`Broadcaster`] handle is dropped.
    pub async fn run(mut self) {
        while let Some(dispatch) = self.rx.recv().await {
            self.dispatch(dispatch);
        }
        debug!("dispatch queue closed, dispatcher exiting");
    }

    /// Perform one unit of fan-out work.
    pub fn dispatch(&self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Channel {
                channel,
                kind,
                payload,
            } => self.sweep_channel(channel, kind, &payload),
            Dispatch::User {
                user,
                kind,
                payload,
            } => self.sweep_user(user, kind, &payload),
        }
    }

    fn sweep_channel(&self, channel: Channel, kind: EventKind, payload: &Value) {
        counter!(names::EVENTS_TOTAL, "kind" => kind.as_str()).increment(1);

        let recipients = self.registry.members(channel);
        if recipients.is_empty() {
            return;
        }

        let mut failed = Vec::new();
        for recipient in &recipients {
            if !deliver(recipient, channel, kind, payload) {
                failed.push(recipient.connection);
            }
        }
        for connection in &failed {
            warn!(connection = %connection, channel = %channel, "delivery failed, pruning connection");
            self.registry.leave(channel, *connection);
        }

        trace!(
            channel = %channel,
            kind = %kind,
            recipients = recipients.len(),
            failed = failed.len(),
            "broadcast swept"
        );
    }

    fn sweep_user(&self, user: UserId, kind: EventKind, payload: &Value) {
        counter!(names::EVENTS_TOTAL, "kind" => kind.as_str()).increment(1);

        let entries = self.registry.user_recipients(user);
        if entries.is_empty() {
            return;
        }

        let mut failed: Vec<(Channel, ConnectionId)> = Vec::new();
        for (channel, recipient) in &entries {
            if !deliver(recipient, *channel, kind, payload) {
                failed.push((*channel, recipient.connection));
            }
        }
        for (channel, connection) in &failed {
            warn!(connection = %connection, channel = %channel, "delivery failed, pruning connection");
            self.registry.leave(*channel, *connection);
        }

        trace!(
            user = %user,
            kind = %kind,
            entries = entries.len(),
            failed = failed.len(),
            "user event swept"
        );
    }
}

/// Stamp, encode, and push one event onto a recipient's outbound queue.
///
/// Returns `false` when the delivery failed and the entry should be pruned.
fn deliver(recipient: &Recipient, channel: Channel, kind: EventKind, payload: &Value) -> bool {
    let event = Envelope::event(kind, payload.clone());
    let ok = match event.to_text() {
        Ok(text) => recipient.sender.send(text).is_ok(),
        Err(error) => {
            warn!(connection = %recipient.connection, %error, "failed to encode event");
            false
        }
    };

    if ok {
        counter!(names::DELIVERIES_TOTAL, "channel" => channel.kind_label()).increment(1);
    } else {
        counter!(names::DELIVERY_FAILURES_TOTAL, "channel" => channel.kind_label()).increment(1);
    }
    ok
}
