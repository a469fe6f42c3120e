// `Transaction_undo` — records inverse statements for a logical metadata
// change so callers can compose a higher-level rollback across several
// metadata operations plus server-side changes (spec.md §4.3).

/// A log of inverse SQL statements, executed in reverse on `rollback()`.
#[derive(Debug, Default, Clone)]
pub struct UndoLog {
    statements: Vec<String>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, inverse_sql: impl Into<String>) {
        self.statements.push(inverse_sql.into());
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Runs every recorded inverse statement, last recorded first, via
    /// `instance`. Errors are logged but never stop the rest from running —
    /// rollback is best-effort (spec.md §4.6).
    pub async fn rollback(&self, instance: &crate::instance::Instance) {
        for sql in self.statements.iter().rev() {
            if let Err(e) = instance.execute(sql).await {
                tracing::warn!(target: "metadata::undo", error = %e, sql = %sql, "undo statement failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::test_support::MockSession;
    use crate::instance::Instance;
    use std::sync::Arc;

    #[tokio::test]
    async fn rollback_runs_statements_in_reverse_order() {
        let session = Arc::new(MockSession::default());
        let instance = Instance::new(session.clone(), "u".into(), 1, "8.0".into());

        let mut undo = UndoLog::new();
        undo.record("DELETE FROM instances WHERE id = 2");
        undo.record("DELETE FROM instances WHERE id = 1");

        undo.rollback(&instance).await;

        let queries = session.queries.lock().unwrap();
        assert_eq!(
            *queries,
            vec![
                "DELETE FROM instances WHERE id = 1".to_string(),
                "DELETE FROM instances WHERE id = 2".to_string(),
            ]
        );
    }

    #[test]
    fn empty_log_reports_empty() {
        assert!(UndoLog::new().is_empty());
    }
}
