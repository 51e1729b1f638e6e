//! The three message envelope shapes the bus carries.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A fire-and-forget notification with no reply expected, e.g.
/// `subscribers_changed` or a workflow's terminal `workflow_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub message_type: String,
    #[serde(default)]
    pub data: Json,
}

impl Event {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            data: Json::Null,
        }
    }

    pub fn with_data(mut self, data: Json) -> Self {
        self.data = data;
        self
    }
}

/// A request for work emitted by a workflow step, addressed to every
/// subscriber of `message_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub message_type: String,
    pub task_id: String,
    pub step_name: String,
    #[serde(default)]
    pub data: Json,
}

impl Action {
    pub fn new(message_type: impl Into<String>, task_id: impl Into<String>, step_name: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            task_id: task_id.into(),
            step_name: step_name.into(),
            data: Json::Null,
        }
    }
}

/// A subscriber's acknowledgement that it finished the work requested by
/// an [`Action`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDone {
    pub message_type: String,
    pub task_id: String,
    pub step_name: String,
    pub subscriber_id: String,
    #[serde(default)]
    pub data: Json,
}

impl ActionDone {
    pub fn new(
        message_type: impl Into<String>,
        task_id: impl Into<String>,
        step_name: impl Into<String>,
        subscriber_id: impl Into<String>,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            task_id: task_id.into(),
            step_name: step_name.into(),
            subscriber_id: subscriber_id.into(),
            data: Json::Null,
        }
    }
}

/// Any message carried on the bus. Each variant keys delivery by its own
/// `message_type`/topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Message {
    Event(Event),
    Action(Action),
    ActionDone(ActionDone),
}

impl Message {
    /// The topic this message is delivered on.
    pub fn topic(&self) -> &str {
        match self {
            Message::Event(e) => &e.message_type,
            Message::Action(a) => &a.message_type,
            Message::ActionDone(d) => &d.message_type,
        }
    }
}

impl From<Event> for Message {
    fn from(e: Event) -> Self {
        Message::Event(e)
    }
}

impl From<Action> for Message {
    fn from(a: Action) -> Self {
        Message::Action(a)
    }
}

impl From<ActionDone> for Message {
    fn from(d: ActionDone) -> Self {
        Message::ActionDone(d)
    }
}
