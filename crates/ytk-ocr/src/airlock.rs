// SPDX-License-Identifier: MIT OR Apache-2.0
//! The airlock: schema validation of untrusted model output.
//!
//! The vision model is prompted for a fixed JSON shape but is still an
//! untrusted party. Its text is fence-stripped, JSON-decoded, validated
//! against the compiled extraction schema, and only then deserialised into
//! [`ExtractedTransaction`]. Every failure is collected, not thrown.

use chrono::NaiveDate;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use ytk_core::{Category, Money, TransactionType};

/// The fixed extraction shape the model is prompted for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExtractedTransaction {
    /// Amount in minor units. Never fractional.
    pub amount: u64,
    /// `income` or `expense`.
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Transaction date.
    pub date: NaiveDate,
    /// Merchant name.
    pub merchant: String,
    /// One of the closed category vocabulary.
    pub category: Category,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

impl ExtractedTransaction {
    /// The amount as core money.
    pub fn money(&self) -> Money {
        Money::from_minor(self.amount)
    }
}

/// Why a payload was refused at the airlock.
///
/// Carried into the `needs_review` row; never discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirlockRejection {
    /// Accumulated validation failures.
    pub errors: Vec<String>,
}

fn validator() -> &'static jsonschema::Validator {
    static VALIDATOR: OnceLock<jsonschema::Validator> = OnceLock::new();
    VALIDATOR.get_or_init(|| {
        let schema = serde_json::to_value(schema_for!(ExtractedTransaction))
            .expect("extraction schema serialises");
        jsonschema::validator_for(&schema).expect("extraction schema compiles")
    })
}

/// Strip Markdown code fences the model may wrap its JSON in.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Decode one model response into an [`ExtractedTransaction`].
pub fn airlock_decode(raw: &str) -> Result<ExtractedTransaction, AirlockRejection> {
    let body = strip_code_fences(raw);

    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| AirlockRejection {
        errors: vec![format!("not valid JSON: {e}")],
    })?;

    let errors: Vec<String> = validator()
        .iter_errors(&value)
        .map(|err| format!("{}: {}", err.instance_path, err))
        .collect();
    if !errors.is_empty() {
        return Err(AirlockRejection { errors });
    }

    serde_json::from_value(value).map_err(|e| AirlockRejection {
        errors: vec![format!("schema passed but decode failed: {e}")],
    })
}
