// SPDX-License-Identifier: MIT OR Apache-2.0
//! Upload permits: HMAC-SHA256 signed capability tokens, quota accounting,
//! and key-rotated issuance.
//!
//! A permit names a user, its tier, a lifetime total-upload cap, a daily
//! rate, and an expiry. The signed message is a canonical byte string — no
//! JSON — so the signature is stable across serializers. Usage counters
//! live beside the permit but are never covered by the signature.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod issue;
pub mod keyring;
pub mod ledger;
pub mod model;
pub mod quota;

pub use issue::{DEFAULT_VALID_DAYS, IssueError, PermitIssuer};
pub use ledger::{KvPermitLedger, LedgerError, QuotaCheck};
pub use keyring::{
    KeyRing, MemorySecretSource, SecretFetchError, SecretSource, SigningKey, VerifyError,
};
pub use model::{canonical_timestamp, Permit};
pub use quota::{check_can_upload, DenyReason, QuotaDecision, StoredPermit};
