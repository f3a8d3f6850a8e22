// SPDX-License-Identifier: MIT OR Apache-2.0
//! OCR orchestration: the instant per-object path, the batch path with its
//! manifest and idempotency barrier, and the result handler that ingests
//! vendor output into the transactions table.
//!
//! Everything a vision model returns passes through the airlock before it
//! touches the core: fence-stripped, JSON-decoded, schema-validated.
//! Validation failures never crash the pipeline — the row is written in
//! `needs_review` for downstream repair.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod airlock;
pub mod batch;
pub mod instant;
pub mod jst;
pub mod results;
pub mod vision;

pub use airlock::{AirlockRejection, ExtractedTransaction, airlock_decode};
pub use batch::{BatchOrchestrator, BatchSubmitError, BatchSubmitOutcome, BatchSubmitRequest};
pub use instant::{InstantError, InstantOutcome, InstantProcessor};
pub use jst::jst_date;
pub use results::{ResultError, ResultHandler, ResultSummary};
pub use vision::{EXTRACTION_PROMPT, MockVisionModel, VisionError, VisionModel};
