//! # relay-core
//!
//! Foundation types for the Relay presence-and-fanout chat core.
//!
//! This crate provides the shared vocabulary the server crate builds on:
//!
//! - **Branded IDs**: [`ids::UserId`], [`ids::GroupId`], [`ids::MessageId`],
//!   [`ids::ConnectionId`], [`ids::ChatId`] as newtypes
//! - **Wire protocol**: [`protocol::ClientEvent`] and [`protocol::ServerEvent`],
//!   tagged enums matching the deployed client event names exactly
//! - **Status machine**: [`status::MessageStatus`] — the strictly monotonic
//!   `sending → sent → delivered → seen` delivery lifecycle
//! - **Errors**: [`errors::ProtocolError`] for boundary decode failures
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `relay-server` and the `relay` binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod protocol;
pub mod status;
