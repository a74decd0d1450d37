pub mod app;

pub mod snapshot;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("collection actor for {0} is unavailable")]
    ActorGone(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
