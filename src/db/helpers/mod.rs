use std::collections::BTreeSet;

use anyhow::{Context, Result};

use crate::models::ConfidenceSignal;

pub fn signals_to_json(signals: &BTreeSet<ConfidenceSignal>) -> Result<String> {
    serde_json::to_string(signals).context("failed to serialize confidence signals")
}

pub fn parse_signals(value: &str, field: &str) -> Result<BTreeSet<ConfidenceSignal>> {
    serde_json::from_str(value).with_context(|| format!("failed to parse {field}"))
}
