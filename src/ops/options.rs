// `options()` — reports the effective value of the cluster-relevant sysvars
// across every reachable member, for display and drift detection. Ported
// from `modules/adminapi/cluster/options.cc`.

use crate::instance::Instance;
use serde::Serialize;

/// Sysvars the original surfaces in `options()` output (spec.md §6).
pub const REPORTED_SYSVARS: &[&str] = &[
    "group_replication_single_primary_mode",
    "group_replication_group_name",
    "group_replication_member_weight",
    "group_replication_consistency",
    "auto_increment_increment",
    "auto_increment_offset",
];

#[derive(Debug, Clone, Serialize)]
pub struct InstanceOptions {
    pub uuid: String,
    pub values: Vec<(String, String)>,
}

pub async fn read_instance_options(instance: &Instance) -> crate::Result<InstanceOptions> {
    let mut values = Vec::with_capacity(REPORTED_SYSVARS.len());
    for sysvar in REPORTED_SYSVARS {
        let value = instance.query_string(sysvar, true).await.unwrap_or_default();
        values.push((sysvar.to_string(), value));
    }
    Ok(InstanceOptions { uuid: instance.uuid().to_string(), values })
}

/// Sysvars whose value differs across `instances` — a drifted cluster
/// should show up here even if GR itself still reports healthy.
pub fn detect_drift(reports: &[InstanceOptions]) -> Vec<String> {
    let mut drifted = Vec::new();
    if let Some(first) = reports.first() {
        for (name, value) in &first.values {
            if reports.iter().any(|r| r.values.iter().any(|(n, v)| n == name && v != value)) {
                drifted.push(name.clone());
            }
        }
    }
    drifted
}
