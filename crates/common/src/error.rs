//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Mailbox is full")]
    MailboxFull,

    #[error("Mailbox is closed")]
    MailboxClosed,

    #[error("Logging error: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
