//! Service abstractions.
//!
//! This module contains the gate and reclaimer logic plus traits for the
//! external collaborators (blob storage, email) the core depends on. Each
//! collaborator is abstracted behind a trait to enable mocking in tests.
//!
//! ## Services
//!
//! - **gate** - the redemption state machine (the only writer of terminal
//!   lifecycle transitions besides the sweep)
//! - **reclaimer** - background sweep deleting blobs and retiring metadata
//! - **blob** - blob storage via S3
//! - **email** - OTP code delivery via Resend (prod) or SMTP (dev)

mod blob;
mod email;
mod gate;
mod reclaimer;

pub use blob::{BlobStore, S3BlobStore};
pub use email::{EmailSender, EmailSenderImpl};
pub use gate::{AccessGate, Denial, GateOutcome, RedeemRequest, hash_password};
pub use reclaimer::{Reclaimer, SweepReport};

#[cfg(test)]
pub use blob::MockBlobStore;
#[cfg(test)]
pub use email::MockEmailSender;
