use crate::contact::ContactId;
use crate::message::Message;
use crate::scheduler::TurnState;

/// Progress notifications for whatever renders the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    TurnStateChanged {
        conversation_id: ContactId,
        state: TurnState,
    },
    /// The streaming draft grew; `content` is the full text so far.
    DraftUpdated {
        conversation_id: ContactId,
        content: String,
    },
    /// Messages appended to the log (user input, reply segments or an error bubble).
    MessagesCommitted {
        conversation_id: ContactId,
        messages: Vec<Message>,
    },
    PersistenceFailed {
        conversation_id: ContactId,
        error: String,
    },
}
