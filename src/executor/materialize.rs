use super::update::next_version;
use crate::core::Value;
use crate::entity::EntityRef;
use crate::metadata::ColumnMode;
use crate::subject::Subject;

/// Writes what the database now holds back onto the subject's entity:
/// generated ids, timestamps, versions and tree levels for inserts, the
/// refreshed timestamp and version for updates, cleared ids for removes.
///
/// Runs once the unit of work succeeded; never after a failure.
pub fn apply_generated_values(subject: &Subject) {
    let Some(entity) = &subject.entity else {
        return;
    };
    if subject.must_be_inserted {
        apply_insert(subject, entity);
    } else if subject.must_be_updated {
        apply_update(subject, entity);
    }
    if subject.must_be_removed {
        apply_remove(subject, entity);
    }
}

fn apply_insert(subject: &Subject, entity: &EntityRef) {
    let metadata = &subject.metadata;
    for column in metadata.identity_columns() {
        if let Some(value) = subject.generated_value(column) {
            entity.set_value(&column.property, value);
        }
    }
    for column in metadata.all_columns() {
        let value = match column.mode {
            ColumnMode::CreateDate | ColumnMode::UpdateDate => Value::Timestamp(subject.date()),
            ColumnMode::Version => Value::Integer(1),
            ColumnMode::TreeLevel => match subject.tree_level() {
                Some(level) => Value::Integer(level),
                None => continue,
            },
            ColumnMode::Regular
                if column.nullable
                    && !column.primary
                    && !column.property.is_embedded()
                    && column.value_of(entity).is_none() =>
            {
                Value::Null
            }
            _ => continue,
        };
        entity.set_value(&column.property, value);
    }
}

fn apply_update(subject: &Subject, entity: &EntityRef) {
    // Nothing was written without diffs.
    if subject.diff_columns.is_empty() && subject.diff_relations.is_empty() {
        return;
    }
    for column in subject.metadata.all_columns() {
        let value = match column.mode {
            ColumnMode::UpdateDate => Value::Timestamp(subject.date()),
            ColumnMode::Version => Value::Integer(next_version(subject, column)),
            _ => continue,
        };
        entity.set_value(&column.property, value);
    }
}

fn apply_remove(subject: &Subject, entity: &EntityRef) {
    let metadata = &subject.metadata;
    for column in metadata
        .identity_columns()
        .into_iter()
        .chain(metadata.parent_id_columns.iter())
    {
        entity.unset(&column.property);
    }
}
