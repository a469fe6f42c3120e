// `dissolve()` — stops Group Replication on every member and removes the
// cluster from metadata entirely. No rollback: once any member has been
// told to stop, the original treats the operation as committed and instead
// reports per-member failures (spec.md §4.7 "best-effort, not atomic").
// Ported from `modules/adminapi/cluster/dissolve.cc`.

use crate::instance::Instance;
use crate::metadata::MetadataStorage;

#[derive(Debug, Default)]
pub struct DissolveReport {
    pub stopped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub async fn dissolve(storage: &MetadataStorage, cluster_id: &str, members: &[Instance]) -> crate::Result<DissolveReport> {
    let mut report = DissolveReport::default();
    for member in members {
        match member.execute("STOP GROUP_REPLICATION").await {
            Ok(()) => report.stopped.push(member.uuid().to_string()),
            Err(e) => report.failed.push((member.uuid().to_string(), e.to_string())),
        }
    }
    storage.remove_cluster(cluster_id).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::test_support::MockSession;
    use std::sync::Arc;

    fn instance(uuid: &str) -> Instance {
        let session = Arc::new(MockSession::default());
        Instance::new(session, uuid.into(), 1, "8.0.34".into())
    }

    #[tokio::test]
    async fn dissolve_stops_every_member_and_removes_cluster_metadata() {
        let storage = MetadataStorage::new(instance("md"));
        let members = vec![instance("a"), instance("b")];
        let report = dissolve(&storage, "c1", &members).await.unwrap();
        assert_eq!(report.stopped.len(), 2);
        assert!(report.failed.is_empty());
    }
}
