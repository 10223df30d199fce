//! Work deferred to the next turn of the loop.
//!
//! Some work must not happen inside the call that caused it: a profile the
//! media graph may still hold, a notification that would re-enter the group
//! while it iterates its streams. Such work is queued here and run by
//! [`crate::StreamsGroup::handle_timeout`].

use std::collections::VecDeque;

use crate::engine::ProfileId;

/// Reference to a stream slot that survives the stream being replaced.
///
/// The generation is bumped every time a slot gets a new stream, so a task
/// queued for a replaced stream can tell it is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    /// Stream index.
    pub index: usize,
    /// Slot generation when the handle was made.
    pub generation: u32,
}

/// Where audio is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRoute {
    /// Phone earpiece.
    Earpiece,
    /// Loudspeaker.
    Speaker,
    /// Bluetooth headset.
    Bluetooth,
    /// Wired headset.
    Headset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Task {
    /// Release a profile the graph held until the stream stopped.
    ReleaseProfile(ProfileId),
    /// Emit one encryption changed event for all streams.
    NotifyEncryptionChanged,
    /// Adapt an audio stream to a new route.
    AudioRouteChanged(StreamHandle, AudioRoute),
    /// Point a stream at the pair ICE selected.
    UpdateIceDestinations(StreamHandle),
    /// Tell the listener ICE needs a restart.
    IceRestartNeeded,
}

#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    queue: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue::default()
    }

    /// Queue a task.
    ///
    /// [`Task::NotifyEncryptionChanged`] and [`Task::IceRestartNeeded`] are
    /// queued at most once. Returns false if the task was already pending.
    pub fn push(&mut self, task: Task) -> bool {
        let coalesce = matches!(task, Task::NotifyEncryptionChanged | Task::IceRestartNeeded);
        if coalesce && self.queue.contains(&task) {
            trace!("Task already pending: {:?}", task);
            return false;
        }
        self.queue.push_back(task);
        true
    }

    /// Take everything queued so far. Tasks queued while running these go
    /// to the next turn.
    pub fn take(&mut self) -> Vec<Task> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
