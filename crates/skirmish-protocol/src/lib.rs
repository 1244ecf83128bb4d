//! Shared vocabulary for Skirmish.
//!
//! This crate defines the pieces every other layer agrees on:
//!
//! - **Identity** ([`PlayerId`], [`SessionId`], [`EntityId`],
//!   [`Controller`]): opaque ids. The engine never stores display names;
//!   an external identity service maps ids to people.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how commands and
//!   updates are turned into bytes for whatever channel carries them.
//! - **Errors** ([`ProtocolError`]): what can go wrong while encoding or
//!   decoding.
//!
//! # Architecture
//!
//! ```text
//! Channel (bytes) → Protocol (ids, codec) → Combat rules → Session actor
//! ```
//!
//! The protocol layer knows nothing about turns or dice. It only knows
//! who is who and how to serialize things.

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{Controller, EntityId, PlayerId, SessionId};
