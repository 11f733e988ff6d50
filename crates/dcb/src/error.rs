//! Unifies the lower layers' errors at the facade boundary. `dcb-store`'s
//! `AppendError`/`QueryError` are `snafu`-based with a `Location`; everything
//! else in the stack below here is `thiserror`-based. Both implement
//! `std::error::Error`, so a plain `#[from]` aggregation works either way.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DcbError {
    #[error(transparent)]
    Append(#[from] dcb_store::error::AppendError),

    #[error(transparent)]
    Query(#[from] dcb_store::error::QueryError),

    #[error(transparent)]
    Facade(#[from] dcb_streams::FacadeError),

    #[error(transparent)]
    Write(#[from] dcb_streams::StreamWriteError),

    #[error(transparent)]
    Codec(#[from] dcb_codec::CodecError),

    #[error(transparent)]
    Upcast(#[from] dcb_upcast::UpcastError),

    #[error(transparent)]
    Registry(#[from] dcb_upcast::RegistryError),
}
