// SPDX-License-Identifier: Apache-2.0

//! Errors for the barrier crate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("barrier '{0}' initialized with zero participants")]
    ZeroParticipants(String),
}
