pub mod api;

pub mod cache_client;

pub mod emitter;

pub mod ledger;

pub mod orchestrator;

pub mod sweep;

use gacha_core::{
    CardId,
    DrawError,
};

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pending result {0} not found")]
    PendingNotFound(String),
    #[error("pending result {0} belongs to another user")]
    NotOwner(String),
    #[error("inventory entry {0} not found")]
    InventoryNotFound(String),
    #[error("inventory entry {0} is not owned by the sender")]
    NotSender(String),
    #[error("card {0} is not in the catalog")]
    UnknownCard(CardId),
    #[error("{0}")]
    Invalid(String),
    /// The probability table or card table cannot produce a draw.
    #[error("gacha unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<DrawError> for Error {
    fn from(e: DrawError) -> Self {
        Error::Unavailable(e.to_string())
    }
}

/// 128-bit random hex id used for every row the ledger creates.
pub fn new_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
