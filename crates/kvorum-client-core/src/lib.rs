//! Client core for the Kvorum MKD quorum tracker.
//!
//! Everything here is transport-agnostic: the REST client lives in
//! `kvorum-api-client` and plugs in through [`locator::PremisesSource`] and
//! [`telegram::TelegramExchange`].

pub mod auth;
pub mod contact;
pub mod error;
pub mod format;
pub mod locator;
pub mod session;
pub mod telegram;

#[cfg(target_arch = "wasm32")]
pub mod browser;

pub(crate) mod encoding;
