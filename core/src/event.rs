//! The transaction event log — read-only input to every stage.
//!
//! RULE: events are ingested once and never mutated. Every stage receives
//! the same `EventLog` and filters it by its own as-of boundary; nothing
//! downstream may look past the boundary it declares.

use crate::types::CustomerId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One normalized purchase line, as supplied by the external event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub customer_id: CustomerId,
    pub invoice_id:  String,
    pub date:        NaiveDate,
    pub quantity:    f64,
    pub unit_price:  f64,
    pub total_price: f64,
    pub stock_code:  Option<String>,
    pub country:     Option<String>,
}

/// Strip the float-cast artifact some upstream feeds leave on customer ids
/// ("17850.0" → "17850") and surrounding whitespace.
pub fn clean_customer_id(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}

/// A validated, chronologically sorted event collection.
///
/// Sorting is part of the contract: `through` and `between` rely on it, and
/// a stable (date, customer, invoice) order keeps every downstream table
/// byte-identical across re-runs.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: Vec<TransactionEvent>,
}

impl EventLog {
    /// Build a log from raw rows. Rows with an empty customer or invoice id
    /// are dropped; a missing/non-finite total price is re-derived from
    /// quantity × unit price rather than failing the row.
    pub fn from_rows(rows: Vec<TransactionEvent>) -> Self {
        let mut events: Vec<TransactionEvent> = rows
            .into_iter()
            .filter_map(|mut e| {
                e.customer_id = clean_customer_id(&e.customer_id);
                e.invoice_id = e.invoice_id.trim().to_string();
                if e.customer_id.is_empty() || e.invoice_id.is_empty() {
                    return None;
                }
                if !e.quantity.is_finite() {
                    e.quantity = 0.0;
                }
                if !e.unit_price.is_finite() {
                    e.unit_price = 0.0;
                }
                if !e.total_price.is_finite() || e.total_price == 0.0 {
                    e.total_price = e.quantity * e.unit_price;
                }
                Some(e)
            })
            .collect();

        events.sort_by(|a, b| {
            (a.date, &a.customer_id, &a.invoice_id)
                .cmp(&(b.date, &b.customer_id, &b.invoice_id))
        });

        Self { events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[TransactionEvent] {
        &self.events
    }

    /// Earliest event date, if any events exist.
    pub fn min_date(&self) -> Option<NaiveDate> {
        self.events.first().map(|e| e.date)
    }

    /// Latest event date — the global observation horizon used for
    /// right-censoring.
    pub fn max_date(&self) -> Option<NaiveDate> {
        self.events.last().map(|e| e.date)
    }

    /// Events with `date <= as_of` (the leakage boundary).
    pub fn through(&self, as_of: NaiveDate) -> &[TransactionEvent] {
        let end = self.events.partition_point(|e| e.date <= as_of);
        &self.events[..end]
    }

    /// Events with `start <= date <= end`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> &[TransactionEvent] {
        let lo = self.events.partition_point(|e| e.date < start);
        let hi = self.events.partition_point(|e| e.date <= end);
        &self.events[lo..hi]
    }

    /// Distinct customers with at least one event in `[start, end]`.
    pub fn buyers_between(&self, start: NaiveDate, end: NaiveDate) -> BTreeSet<&str> {
        self.between(start, end)
            .iter()
            .map(|e| e.customer_id.as_str())
            .collect()
    }

    /// Number of distinct customers over the whole log.
    pub fn customer_count(&self) -> usize {
        self.events
            .iter()
            .map(|e| e.customer_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}
