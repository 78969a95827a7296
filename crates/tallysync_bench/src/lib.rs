//! Benchmark utilities.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::Rng;
use tallysync_engine::FieldRules;
use tallysync_protocol::{FieldMap, Record};

/// Instant all generated rows are relative to.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Generate `count` transcript rows spread over `clients` clients.
pub fn generate_rows(count: usize, clients: usize) -> Vec<Record> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let client = format!("client-{}", i % clients.max(1));
            let month = format!("{}-{:02}", 2000 + i / 12, i % 12 + 1);
            let mut record = Record::new(format!("row-{i}"), FieldMap::new(), epoch())
                .with_field("client", client)
                .with_field("month", month)
                .with_field("count", rng.gen_range(0..10_000i64));
            record.updated_at = epoch() + Duration::seconds(rng.gen_range(0..86_400));
            record
        })
        .collect()
}

/// Copy `rows` and perturb roughly `percent` of them: bumped counts,
/// dropped rows and rows that were never uploaded.
pub fn diverge(rows: &[Record], percent: u32) -> Vec<Record> {
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if rng.gen_range(0..100) >= percent {
            out.push(row.clone());
            continue;
        }
        match rng.gen_range(0..3) {
            0 => out.push(row.clone().with_field("count", rng.gen_range(0..10_000i64))),
            1 => {}
            _ => {
                out.push(row.clone());
                out.push(
                    Record::new(format!("local-{i}"), FieldMap::new(), epoch())
                        .with_field("client", "local")
                        .with_field("month", format!("m{i}"))
                        .with_field("count", 1),
                );
            }
        }
    }
    out
}

/// Audit rules for generated rows.
pub fn rules() -> FieldRules {
    FieldRules::new()
        .with_key_fields(["client", "month"])
        .with_required(["client", "month"])
        .with_non_negative(["count"])
}
