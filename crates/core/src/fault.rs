// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of Granary.
//
// Granary is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Granary is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Granary. If not, see <https://www.gnu.org/licenses/>.

//! Call-path fault taxonomy.
//!
//! ## Propagation Policy
//! - [`GrainFault::Retryable`]: retried automatically at the call boundary, a small
//!   bounded number of times, never past the caller's deadline
//! - [`GrainFault::Conflict`]: surfaced to grain logic, never retried automatically
//! - [`GrainFault::Fatal`]: aborts the call and reaches the external caller; during
//!   activation it reverts the activation to `Unactivated`
//! - [`GrainFault::Application`]: an error returned by grain logic itself
//!
//! Faults cross process boundaries inside call envelopes, hence the serde derives.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for grain calls.
pub type GrainResult<T> = Result<T, GrainFault>;

/// Why a call may succeed if attempted again.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryReason {
    /// Caller and callee disagree on membership or on grain ownership
    #[error("stale routing")]
    StaleRouting,

    /// The caller's deadline elapsed before a result arrived
    #[error("timeout")]
    Timeout,
}

/// Why a write was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictReason {
    /// The supplied etag does not match the stored one
    #[error("stale etag")]
    StaleEtag,
}

/// Why a call cannot succeed without outside intervention.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FatalReason {
    /// The grain could not be activated
    #[error("activation failure: {0}")]
    ActivationFailure(String),

    /// No usable membership view
    #[error("membership unavailable: {0}")]
    MembershipUnavailable(String),
}

/// Fault raised on the grain call path.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrainFault {
    /// Transient; retried at the call boundary
    #[error("retryable fault: {0}")]
    Retryable(RetryReason),

    /// Optimistic-concurrency conflict; surfaced to grain logic
    #[error("conflict: {0}")]
    Conflict(ConflictReason),

    /// Unrecoverable for this call
    #[error("fatal fault: {0}")]
    Fatal(FatalReason),

    /// Error returned by grain logic
    #[error("grain error: {0}")]
    Application(String),
}

impl GrainFault {
    /// `Retryable(StaleRouting)`
    pub fn stale_routing() -> Self {
        GrainFault::Retryable(RetryReason::StaleRouting)
    }

    /// `Retryable(Timeout)`
    pub fn timeout() -> Self {
        GrainFault::Retryable(RetryReason::Timeout)
    }

    /// `Conflict(StaleEtag)`
    pub fn stale_etag() -> Self {
        GrainFault::Conflict(ConflictReason::StaleEtag)
    }

    /// `Fatal(ActivationFailure)`
    pub fn activation_failure(msg: impl Into<String>) -> Self {
        GrainFault::Fatal(FatalReason::ActivationFailure(msg.into()))
    }

    /// `Fatal(MembershipUnavailable)`
    pub fn membership_unavailable(msg: impl Into<String>) -> Self {
        GrainFault::Fatal(FatalReason::MembershipUnavailable(msg.into()))
    }

    /// Application error.
    pub fn application(msg: impl Into<String>) -> Self {
        GrainFault::Application(msg.into())
    }

    /// Whether the call boundary may retry this fault.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GrainFault::Retryable(_))
    }

    /// Short, stable label used for span attributes and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GrainFault::Retryable(RetryReason::StaleRouting) => "stale_routing",
            GrainFault::Retryable(RetryReason::Timeout) => "timeout",
            GrainFault::Conflict(ConflictReason::StaleEtag) => "stale_etag",
            GrainFault::Fatal(FatalReason::ActivationFailure(_)) => "activation_failure",
            GrainFault::Fatal(FatalReason::MembershipUnavailable(_)) => "membership_unavailable",
            GrainFault::Application(_) => "application",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_retryable_is_retryable() {
        assert!(GrainFault::stale_routing().is_retryable());
        assert!(GrainFault::timeout().is_retryable());
        assert!(!GrainFault::stale_etag().is_retryable());
        assert!(!GrainFault::activation_failure("x").is_retryable());
        assert!(!GrainFault::application("x").is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(GrainFault::stale_etag().to_string(), "conflict: stale etag");
        assert_eq!(
            GrainFault::membership_unavailable("no view").to_string(),
            "fatal fault: membership unavailable: no view"
        );
    }

    #[test]
    fn test_fault_crosses_serde() {
        let fault = GrainFault::activation_failure("boom");
        let json = serde_json::to_string(&fault).unwrap();
        let back: GrainFault = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fault);
        assert_eq!(back.kind(), "activation_failure");
    }
}
