//! Aggregate region classification.
//!
//! Statistical APIs report observations for individual countries alongside
//! computed aggregates (regions, income groups, lending categories). The
//! aggregate codes share the REF_AREA namespace with country codes, so
//! telling them apart requires a fixed classification table.
//!
//! The table covers regional rollups (e.g. `EAS` East Asia & Pacific,
//! `SSF` Sub-Saharan Africa), income groups (`HIC`, `LIC`, `LMC`, `UMC`),
//! lending categories (`IDA`, `IBD`), demographic dividend groups, and the
//! world total (`WLD`).

use std::collections::HashSet;
use std::sync::OnceLock;

/// Region and income-group aggregate codes, as published by the upstream API.
const AGGREGATE_CODES: [&str; 49] = [
    "AFE", "AFW", "ARB", "CEB", "CSS", "EAP", "EAR", "EAS", "ECA", "ECS", "EMU", "EUU", "FCS",
    "HIC", "HPC", "IBD", "IBT", "IDA", "IDB", "IDX", "INX", "LAC", "LCN", "LDC", "LIC", "LMC",
    "LMY", "LTE", "MEA", "MIC", "MNA", "NAC", "OED", "OSS", "PRE", "PSS", "PST", "SAS", "SSA",
    "SSF", "SST", "TEA", "TEC", "TLA", "TMN", "TSA", "TSS", "UMC", "WLD",
];

fn aggregate_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| AGGREGATE_CODES.iter().copied().collect())
}

/// Returns `true` if the region code denotes an aggregate rather than an
/// individual country. Unknown codes are treated as countries.
pub fn is_aggregate(code: &str) -> bool {
    aggregate_set().contains(code)
}
