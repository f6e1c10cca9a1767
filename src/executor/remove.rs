use super::SubjectOperationExecutor;
use crate::core::{DbError, Result, ValueMap};
use crate::metadata::EntityMetadata;
use crate::subject::Subject;
use tracing::{Level, event};

impl SubjectOperationExecutor {
    /// Deletes rows strictly one subject at a time, in subject order. A
    /// class-table child loses its child row before the parent row.
    pub(super) async fn execute_remove_operations(
        &self,
        subjects: &[Subject],
        indices: &[usize],
    ) -> Result<()> {
        for &index in indices {
            let subject = &subjects[index];
            let metadata = &subject.metadata;
            self.runner
                .delete(&metadata.table_name, removal_conditions(subject, metadata)?)
                .await?;
            if let Some(parent) = metadata.parent() {
                self.runner
                    .delete(&parent.table_name, removal_conditions(subject, parent)?)
                    .await?;
            }
        }
        event!(Level::DEBUG, count = indices.len(), "rows removed");
        Ok(())
    }
}

fn removal_conditions(subject: &Subject, table: &EntityMetadata) -> Result<ValueMap> {
    subject.identity_for(table).ok_or_else(|| {
        DbError::Internal(format!(
            "Cannot get id of the removed entity in table '{}'",
            table.table_name
        ))
    })
}
