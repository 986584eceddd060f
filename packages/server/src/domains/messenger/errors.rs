use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessengerError {
    #[error("Not a participant of this conversation")]
    NotParticipant,

    #[error("Message not found")]
    NotFound,

    #[error("Only the sender can do that")]
    NotAuthorized,

    #[error("Invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("Reaction already exists")]
    DuplicateReaction,

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
