//! SQLite persistence layer.
//!
//! RULE: Only store.rs talks to the database.
//! Stages call store methods — they never execute SQL directly.
//!
//! Every load uses a deterministic ORDER BY so two runs over the same
//! database see rows in the same order.

use crate::{
    campaign::{CampaignActionRecord, Priority, ValueTier},
    error::PipelineResult,
    event::TransactionEvent,
    features::CustomerSnapshotFeature,
    labels::{ChurnLabel, LabeledFeature},
    scoring::{RiskBucket, ScoredRecord},
    segmentation::{RfmSnapshot, Segment},
};
use chrono::NaiveDate;
use rusqlite::{params, Connection};

pub struct PipelineStore {
    conn: Connection,
}

fn parse_date(text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn bad_enum(what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unknown {what} '{value}'").into(),
    )
}

impl PipelineStore {
    /// Open (or create) the pipeline database at `path`.
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_pipeline.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(
        &self,
        run_id: &str,
        seed: u64,
        version: &str,
        started_at: &str,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, started_at],
        )?;
        Ok(())
    }

    // ── Transactions ───────────────────────────────────────────

    pub fn insert_transactions(&self, events: &[TransactionEvent]) -> PipelineResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO transactions
                 (customer_id, invoice_id, event_date, quantity, unit_price, total_price,
                  stock_code, country)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for e in events {
                stmt.execute(params![
                    e.customer_id,
                    e.invoice_id,
                    e.date.to_string(),
                    e.quantity,
                    e.unit_price,
                    e.total_price,
                    e.stock_code,
                    e.country,
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    pub fn load_transactions(&self) -> PipelineResult<Vec<TransactionEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, invoice_id, event_date, quantity, unit_price, total_price,
                    stock_code, country
             FROM transactions
             ORDER BY event_date ASC, customer_id ASC, invoice_id ASC, id ASC",
        )?;
        let events = stmt
            .query_map([], |row| {
                Ok(TransactionEvent {
                    customer_id: row.get(0)?,
                    invoice_id:  row.get(1)?,
                    date:        parse_date(&row.get::<_, String>(2)?)?,
                    quantity:    row.get(3)?,
                    unit_price:  row.get(4)?,
                    total_price: row.get(5)?,
                    stock_code:  row.get(6)?,
                    country:     row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    // ── Features + labels ──────────────────────────────────────

    pub fn insert_features(&self, run_id: &str, rows: &[LabeledFeature]) -> PipelineResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO customer_features
                 (run_id, customer_id, snapshot_date, first_purchase, last_purchase,
                  tenure_days, total_orders, total_revenue, total_items, unique_skus,
                  avg_basket_value, avg_items_per_order, avg_unique_skus,
                  avg_days_between_orders, median_days_between_orders, recency_days,
                  revenue_last_30d, orders_last_30d, revenue_last_90d, orders_last_90d,
                  churn_flag)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21)",
            )?;
            for row in rows {
                let f = &row.feature;
                stmt.execute(params![
                    run_id,
                    f.customer_id,
                    f.snapshot_date.to_string(),
                    f.first_purchase.to_string(),
                    f.last_purchase.to_string(),
                    f.tenure_days,
                    f.total_orders,
                    f.total_revenue,
                    f.total_items,
                    f.unique_skus,
                    f.avg_basket_value,
                    f.avg_items_per_order,
                    f.avg_unique_skus,
                    f.avg_days_between_orders,
                    f.median_days_between_orders,
                    f.recency_days,
                    f.revenue_last_30d,
                    f.orders_last_30d,
                    f.revenue_last_90d,
                    f.orders_last_90d,
                    row.label.as_flag(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn load_features(&self, run_id: &str) -> PipelineResult<Vec<LabeledFeature>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, snapshot_date, first_purchase, last_purchase,
                    tenure_days, total_orders, total_revenue, total_items, unique_skus,
                    avg_basket_value, avg_items_per_order, avg_unique_skus,
                    avg_days_between_orders, median_days_between_orders, recency_days,
                    revenue_last_30d, orders_last_30d, revenue_last_90d, orders_last_90d,
                    churn_flag
             FROM customer_features WHERE run_id = ?1
             ORDER BY snapshot_date ASC, customer_id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(LabeledFeature {
                    feature: CustomerSnapshotFeature {
                        customer_id:    row.get(0)?,
                        snapshot_date:  parse_date(&row.get::<_, String>(1)?)?,
                        first_purchase: parse_date(&row.get::<_, String>(2)?)?,
                        last_purchase:  parse_date(&row.get::<_, String>(3)?)?,
                        tenure_days:    row.get(4)?,
                        total_orders:   row.get(5)?,
                        total_revenue:  row.get(6)?,
                        total_items:    row.get(7)?,
                        unique_skus:    row.get(8)?,
                        avg_basket_value:           row.get(9)?,
                        avg_items_per_order:        row.get(10)?,
                        avg_unique_skus:            row.get(11)?,
                        avg_days_between_orders:    row.get(12)?,
                        median_days_between_orders: row.get(13)?,
                        recency_days:     row.get(14)?,
                        revenue_last_30d: row.get(15)?,
                        orders_last_30d:  row.get(16)?,
                        revenue_last_90d: row.get(17)?,
                        orders_last_90d:  row.get(18)?,
                    },
                    label: ChurnLabel::from_flag(row.get::<_, Option<u8>>(19)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Segment snapshots ──────────────────────────────────────

    pub fn insert_segments(&self, run_id: &str, rows: &[RfmSnapshot]) -> PipelineResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO segment_snapshots
                 (run_id, customer_id, snapshot_date, year_month, recency_days, frequency,
                  monetary, r_score, f_score, m_score, rfm_score, segment)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for s in rows {
                stmt.execute(params![
                    run_id,
                    s.customer_id,
                    s.snapshot_date.to_string(),
                    s.year_month,
                    s.recency_days,
                    s.frequency,
                    s.monetary,
                    s.r_score,
                    s.f_score,
                    s.m_score,
                    s.rfm_score,
                    s.segment.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn load_segments(&self, run_id: &str) -> PipelineResult<Vec<RfmSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, snapshot_date, year_month, recency_days, frequency,
                    monetary, r_score, f_score, m_score, rfm_score, segment
             FROM segment_snapshots WHERE run_id = ?1
             ORDER BY snapshot_date ASC, customer_id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let segment_name: String = row.get(10)?;
                Ok(RfmSnapshot {
                    customer_id:   row.get(0)?,
                    snapshot_date: parse_date(&row.get::<_, String>(1)?)?,
                    year_month:    row.get(2)?,
                    recency_days:  row.get(3)?,
                    frequency:     row.get(4)?,
                    monetary:      row.get(5)?,
                    r_score:       row.get(6)?,
                    f_score:       row.get(7)?,
                    m_score:       row.get(8)?,
                    rfm_score:     row.get(9)?,
                    segment:       Segment::parse(&segment_name)
                        .ok_or_else(|| bad_enum("segment", &segment_name))?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Churn scores ───────────────────────────────────────────

    pub fn insert_scores(&self, run_id: &str, rows: &[ScoredRecord]) -> PipelineResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO churn_scores
                 (run_id, customer_id, snapshot_date, churn_flag_label, churn_probability,
                  risk_bucket, total_revenue, total_orders, recency_days, tenure_days,
                  segment, rfm_score, dynamic_threshold, churn_flag, expected_loss,
                  action_flag_top15)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;
            for r in rows {
                stmt.execute(params![
                    run_id,
                    r.customer_id,
                    r.snapshot_date.to_string(),
                    r.churn_label.as_flag(),
                    r.churn_probability,
                    r.risk_bucket.to_string(),
                    r.total_revenue,
                    r.total_orders,
                    r.recency_days,
                    r.tenure_days,
                    r.segment.map(|s| s.to_string()),
                    r.rfm_score,
                    r.dynamic_threshold,
                    r.churn_flag,
                    r.expected_loss,
                    r.action_flag_top15,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn load_scores(&self, run_id: &str) -> PipelineResult<Vec<ScoredRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, snapshot_date, churn_flag_label, churn_probability,
                    risk_bucket, total_revenue, total_orders, recency_days, tenure_days,
                    segment, rfm_score, dynamic_threshold, churn_flag, expected_loss,
                    action_flag_top15
             FROM churn_scores WHERE run_id = ?1
             ORDER BY snapshot_date ASC, customer_id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let bucket_name: String = row.get(4)?;
                let segment_name: Option<String> = row.get(9)?;
                let segment = match segment_name {
                    Some(name) => {
                        Some(Segment::parse(&name).ok_or_else(|| bad_enum("segment", &name))?)
                    }
                    None => None,
                };
                Ok(ScoredRecord {
                    customer_id:       row.get(0)?,
                    snapshot_date:     parse_date(&row.get::<_, String>(1)?)?,
                    churn_label:       ChurnLabel::from_flag(row.get::<_, Option<u8>>(2)?),
                    churn_probability: row.get(3)?,
                    risk_bucket:       RiskBucket::parse(&bucket_name)
                        .ok_or_else(|| bad_enum("risk bucket", &bucket_name))?,
                    total_revenue:     row.get(5)?,
                    total_orders:      row.get(6)?,
                    recency_days:      row.get(7)?,
                    tenure_days:       row.get(8)?,
                    segment,
                    rfm_score:         row.get(10)?,
                    dynamic_threshold: row.get(11)?,
                    churn_flag:        row.get(12)?,
                    expected_loss:     row.get(13)?,
                    action_flag_top15: row.get(14)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Campaign actions ───────────────────────────────────────

    pub fn insert_actions(
        &self,
        run_id: &str,
        rows: &[CampaignActionRecord],
    ) -> PipelineResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO campaign_actions
                 (run_id, customer_id, snapshot_date, churn_flag_label, churn_probability,
                  risk_bucket, dynamic_threshold, churn_flag, expected_loss,
                  action_flag_top15, total_revenue, total_orders, recency_days, tenure_days,
                  segment, rfm_score, value_tier, priority, action, offer_type,
                  message_angle, budget_suggestion)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
            )?;
            for a in rows {
                stmt.execute(params![
                    run_id,
                    a.customer_id,
                    a.snapshot_date.to_string(),
                    a.churn_label.as_flag(),
                    a.churn_probability,
                    a.risk_bucket.to_string(),
                    a.dynamic_threshold,
                    a.churn_flag,
                    a.expected_loss,
                    a.action_flag_top15,
                    a.total_revenue,
                    a.total_orders,
                    a.recency_days,
                    a.tenure_days,
                    a.segment.map(|s| s.to_string()),
                    a.rfm_score,
                    a.value_tier.to_string(),
                    a.priority.to_string(),
                    a.action,
                    a.offer_type,
                    a.message_angle,
                    a.budget_suggestion,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn load_actions(&self, run_id: &str) -> PipelineResult<Vec<CampaignActionRecord>> {
        self.query_actions(
            run_id,
            "SELECT customer_id, snapshot_date, churn_flag_label, churn_probability,
                    risk_bucket, dynamic_threshold, churn_flag, expected_loss,
                    action_flag_top15, total_revenue, total_orders, recency_days,
                    tenure_days, segment, rfm_score, value_tier, priority, action,
                    offer_type, message_angle, budget_suggestion
             FROM campaign_actions WHERE run_id = ?1
             ORDER BY snapshot_date ASC, customer_id ASC",
        )
    }

    /// Actions at the run's most recent snapshot only — the rows an outreach
    /// team would actually work.
    pub fn latest_actions(&self, run_id: &str) -> PipelineResult<Vec<CampaignActionRecord>> {
        self.query_actions(
            run_id,
            "SELECT customer_id, snapshot_date, churn_flag_label, churn_probability,
                    risk_bucket, dynamic_threshold, churn_flag, expected_loss,
                    action_flag_top15, total_revenue, total_orders, recency_days,
                    tenure_days, segment, rfm_score, value_tier, priority, action,
                    offer_type, message_angle, budget_suggestion
             FROM campaign_actions
             WHERE run_id = ?1
               AND snapshot_date = (SELECT MAX(snapshot_date) FROM campaign_actions
                                    WHERE run_id = ?1)
             ORDER BY priority ASC, expected_loss DESC, customer_id ASC",
        )
    }

    fn query_actions(&self, run_id: &str, sql: &str) -> PipelineResult<Vec<CampaignActionRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let bucket_name: String = row.get(4)?;
                let segment_name: Option<String> = row.get(13)?;
                let segment = match segment_name {
                    Some(name) => {
                        Some(Segment::parse(&name).ok_or_else(|| bad_enum("segment", &name))?)
                    }
                    None => None,
                };
                let tier_name: String = row.get(15)?;
                let priority_name: String = row.get(16)?;
                Ok(CampaignActionRecord {
                    customer_id:       row.get(0)?,
                    snapshot_date:     parse_date(&row.get::<_, String>(1)?)?,
                    churn_label:       ChurnLabel::from_flag(row.get::<_, Option<u8>>(2)?),
                    churn_probability: row.get(3)?,
                    risk_bucket:       RiskBucket::parse(&bucket_name)
                        .ok_or_else(|| bad_enum("risk bucket", &bucket_name))?,
                    dynamic_threshold: row.get(5)?,
                    churn_flag:        row.get(6)?,
                    expected_loss:     row.get(7)?,
                    action_flag_top15: row.get(8)?,
                    total_revenue:     row.get(9)?,
                    total_orders:      row.get(10)?,
                    recency_days:      row.get(11)?,
                    tenure_days:       row.get(12)?,
                    segment,
                    rfm_score:         row.get(14)?,
                    value_tier:        ValueTier::parse(&tier_name)
                        .ok_or_else(|| bad_enum("value tier", &tier_name))?,
                    priority:          Priority::parse(&priority_name)
                        .ok_or_else(|| bad_enum("priority", &priority_name))?,
                    action:            row.get(17)?,
                    offer_type:        row.get(18)?,
                    message_angle:     row.get(19)?,
                    budget_suggestion: row.get(20)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
