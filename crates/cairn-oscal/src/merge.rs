//! Identity-based merge of OSCAL documents.
//!
//! Collections are matched by UUID: a match is combined (containers) or
//! replaced by the incoming entry (leaves), unmatched incoming entries are
//! appended and existing-only entries are kept. Non-empty incoming scalars
//! win. Merging with an empty document is the identity.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::MergeError;
use crate::model::*;
use crate::OscalResult;

/// Merge `incoming` into `existing`.
pub fn merge(existing: OscalModel, incoming: OscalModel) -> OscalResult<OscalModel> {
    validate(&existing)?;
    validate(&incoming)?;

    Ok(OscalModel {
        component_definition: merge_option(
            existing.component_definition,
            incoming.component_definition,
            merge_component_definition,
        ),
        assessment_results: merge_option(
            existing.assessment_results,
            incoming.assessment_results,
            merge_assessment_results,
        ),
        extra: merge_extra(existing.extra, incoming.extra),
    })
}

fn ensure_unique<T: Identified>(items: &[T], collection: &'static str) -> OscalResult<()> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.uuid()) {
            return Err(MergeError::DuplicateUuid {
                collection,
                uuid: item.uuid().to_string(),
            });
        }
    }
    Ok(())
}

fn validate(model: &OscalModel) -> OscalResult<()> {
    if let Some(def) = &model.component_definition {
        ensure_unique(&def.components, "component")?;
        for component in &def.components {
            ensure_unique(&component.control_implementations, "control-implementation")?;
            for ci in &component.control_implementations {
                ensure_unique(&ci.implemented_requirements, "implemented-requirement")?;
            }
        }
        if let Some(bm) = &def.back_matter {
            ensure_unique(&bm.resources, "back-matter resource")?;
        }
    }
    if let Some(ar) = &model.assessment_results {
        ensure_unique(&ar.results, "result")?;
        if let Some(bm) = &ar.back_matter {
            ensure_unique(&bm.resources, "back-matter resource")?;
        }
    }
    Ok(())
}

fn merge_option<T>(existing: Option<T>, incoming: Option<T>, combine: fn(T, T) -> T) -> Option<T> {
    match (existing, incoming) {
        (Some(e), Some(i)) => Some(combine(e, i)),
        (e, i) => i.or(e),
    }
}

fn merge_by_uuid<T: Identified + Default>(
    existing: Vec<T>,
    incoming: Vec<T>,
    combine: fn(T, T) -> T,
) -> Vec<T> {
    let mut merged = existing;
    for item in incoming {
        match merged.iter().position(|e| e.uuid() == item.uuid()) {
            Some(idx) => {
                let current = std::mem::take(&mut merged[idx]);
                merged[idx] = combine(current, item);
            }
            None => merged.push(item),
        }
    }
    merged
}

fn replace<T>(_existing: T, incoming: T) -> T {
    incoming
}

fn pick(existing: String, incoming: String) -> String {
    if incoming.is_empty() {
        existing
    } else {
        incoming
    }
}

fn merge_extra(mut existing: Extra, incoming: Extra) -> Extra {
    for (key, value) in incoming {
        let merged = match existing.remove(&key) {
            Some(current) => merge_values(current, value),
            None => value,
        };
        existing.insert(key, merged);
    }
    existing
}

/// Untyped merge for fields kept in `extra`: objects merge per key, arrays of
/// UUID-bearing objects merge by UUID, everything else takes the incoming value.
fn merge_values(existing: Value, incoming: Value) -> Value {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(new)) => {
            let merged = merge_extra(current.into_iter().collect(), new.into_iter().collect());
            Value::Object(merged.into_iter().collect())
        }
        (Value::Array(current), Value::Array(new))
            if current.iter().chain(new.iter()).all(|v| v.get("uuid").is_some()) =>
        {
            let mut merged = current;
            for item in new {
                match merged.iter().position(|e| e.get("uuid") == item.get("uuid")) {
                    Some(idx) => merged[idx] = item,
                    None => merged.push(item),
                }
            }
            Value::Array(merged)
        }
        (_, new) => new,
    }
}

fn merge_metadata(existing: Metadata, incoming: Metadata) -> Metadata {
    Metadata {
        title: pick(existing.title, incoming.title),
        last_modified: pick(existing.last_modified, incoming.last_modified),
        version: pick(existing.version, incoming.version),
        oscal_version: pick(existing.oscal_version, incoming.oscal_version),
        remarks: incoming.remarks.or(existing.remarks),
        extra: merge_extra(existing.extra, incoming.extra),
    }
}

fn merge_back_matter(existing: BackMatter, incoming: BackMatter) -> BackMatter {
    BackMatter {
        resources: merge_by_uuid(existing.resources, incoming.resources, replace),
        extra: merge_extra(existing.extra, incoming.extra),
    }
}

fn merge_component_definition(
    existing: ComponentDefinition,
    incoming: ComponentDefinition,
) -> ComponentDefinition {
    ComponentDefinition {
        uuid: existing.uuid,
        metadata: merge_metadata(existing.metadata, incoming.metadata),
        components: merge_by_uuid(existing.components, incoming.components, merge_component),
        back_matter: merge_option(existing.back_matter, incoming.back_matter, merge_back_matter),
        extra: merge_extra(existing.extra, incoming.extra),
    }
}

fn merge_component(existing: DefinedComponent, incoming: DefinedComponent) -> DefinedComponent {
    DefinedComponent {
        uuid: existing.uuid,
        kind: pick(existing.kind, incoming.kind),
        title: pick(existing.title, incoming.title),
        description: pick(existing.description, incoming.description),
        control_implementations: merge_by_uuid(
            existing.control_implementations,
            incoming.control_implementations,
            merge_control_implementation,
        ),
        extra: merge_extra(existing.extra, incoming.extra),
    }
}

fn merge_control_implementation(
    existing: ControlImplementation,
    incoming: ControlImplementation,
) -> ControlImplementation {
    ControlImplementation {
        uuid: existing.uuid,
        source: pick(existing.source, incoming.source),
        description: pick(existing.description, incoming.description),
        implemented_requirements: merge_by_uuid(
            existing.implemented_requirements,
            incoming.implemented_requirements,
            replace,
        ),
        extra: merge_extra(existing.extra, incoming.extra),
    }
}

fn merge_assessment_results(
    existing: AssessmentResults,
    incoming: AssessmentResults,
) -> AssessmentResults {
    AssessmentResults {
        uuid: existing.uuid,
        metadata: merge_metadata(existing.metadata, incoming.metadata),
        import_ap: incoming.import_ap.or(existing.import_ap),
        results: merge_by_uuid(existing.results, incoming.results, replace),
        back_matter: merge_option(existing.back_matter, incoming.back_matter, merge_back_matter),
        extra: merge_extra(existing.extra, incoming.extra),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn requirement(uuid: &str, control: &str, description: &str) -> ImplementedRequirement {
        ImplementedRequirement {
            uuid: uuid.to_string(),
            control_id: control.to_string(),
            description: description.to_string(),
            ..Default::default()
        }
    }

    fn definition(title: &str, reqs: Vec<ImplementedRequirement>) -> OscalModel {
        OscalModel::from_component_definition(ComponentDefinition {
            uuid: "cd-1".to_string(),
            metadata: Metadata {
                title: title.to_string(),
                version: "1".to_string(),
                ..Default::default()
            },
            components: vec![DefinedComponent {
                uuid: "comp-1".to_string(),
                kind: "software".to_string(),
                title: "podinfo".to_string(),
                control_implementations: vec![ControlImplementation {
                    uuid: "ci-1".to_string(),
                    source: "catalog.yaml".to_string(),
                    implemented_requirements: reqs,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    fn reqs_of(model: &OscalModel) -> &[ImplementedRequirement] {
        &model.component_definition.as_ref().unwrap().components[0].control_implementations[0]
            .implemented_requirements
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let m = definition("t", vec![requirement("r1", "ac-1", "x")]);
        assert_eq!(merge(m.clone(), OscalModel::default()).unwrap(), m);
        assert_eq!(merge(OscalModel::default(), m.clone()).unwrap(), m);
    }

    #[test]
    fn test_matching_uuid_replaced_and_new_appended() {
        let existing = definition(
            "old",
            vec![requirement("r1", "ac-1", "old"), requirement("r2", "ac-2", "keep")],
        );
        let incoming = definition(
            "new",
            vec![requirement("r1", "ac-1", "updated"), requirement("r3", "ac-3", "added")],
        );
        let merged = merge(existing, incoming).unwrap();

        let reqs = reqs_of(&merged);
        let summary: Vec<(&str, &str)> = reqs
            .iter()
            .map(|r| (r.uuid.as_str(), r.description.as_str()))
            .collect();
        assert_eq!(summary, vec![("r1", "updated"), ("r2", "keep"), ("r3", "added")]);
        assert_eq!(merged.component_definition.unwrap().metadata.title, "new");
    }

    #[test]
    fn test_absent_kind_is_added() {
        let def = definition("t", vec![]);
        let results = OscalModel::from_assessment_results(AssessmentResults {
            uuid: "ar-1".to_string(),
            ..Default::default()
        });
        let merged = merge(def, results).unwrap();
        assert!(merged.component_definition.is_some());
        assert!(merged.assessment_results.is_some());
    }

    #[test]
    fn test_duplicate_uuid_is_rejected() {
        let bad = definition("t", vec![requirement("r1", "a", ""), requirement("r1", "b", "")]);
        let err = merge(bad, OscalModel::default()).unwrap_err();
        assert!(matches!(err, MergeError::DuplicateUuid { .. }));
    }

    #[test]
    fn test_extra_arrays_merge_by_uuid() {
        let merged = merge_values(
            json!({"parties": [{"uuid": "a", "name": "A"}, {"uuid": "b", "name": "B"}]}),
            json!({"parties": [{"uuid": "b", "name": "B2"}, {"uuid": "c", "name": "C"}]}),
        );
        assert_eq!(
            merged["parties"],
            json!([
                {"uuid": "a", "name": "A"},
                {"uuid": "b", "name": "B2"},
                {"uuid": "c", "name": "C"}
            ])
        );
    }

    #[test]
    fn test_empty_incoming_scalars_do_not_erase() {
        let merged = merge_metadata(
            Metadata {
                title: "keep".to_string(),
                version: "2".to_string(),
                ..Default::default()
            },
            Metadata {
                last_modified: "2025-01-01T00:00:00Z".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(merged.title, "keep");
        assert_eq!(merged.version, "2");
        assert_eq!(merged.last_modified, "2025-01-01T00:00:00Z");
    }
}
