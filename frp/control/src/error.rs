use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("control session has no free work-connection pool capacity")]
    WorkConnPoolFull,

    #[error("control session is shutting down")]
    SessionClosed,

    #[error(transparent)]
    Auth(#[from] frp_auth::AuthError),

    #[error(transparent)]
    Wire(#[from] frp_wire::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
