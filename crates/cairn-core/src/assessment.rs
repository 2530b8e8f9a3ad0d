//! OSCAL assessment results for a finished run.
//!
//! One result per run, one observation per distinct validation and one
//! finding per requirement, linked through `related-observations`.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use cairn_oscal::{
    AssessmentResult, AssessmentResults, Finding, FindingTarget, Metadata, ObjectiveStatus,
    Observation, RelatedObservation, OSCAL_VERSION,
};

use crate::store::{Requirement, RunReport, ValidationRecord};
use crate::validation::ENGINE_VERSION;

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn observation_remarks(record: &ValidationRecord) -> String {
    match (&record.result, &record.error) {
        (Some(result), _) => {
            let mut out = format!("passing: {}\nfailing: {}", result.passing, result.failing);
            for (key, message) in &result.observations {
                out.push_str(&format!("\n{key}: {message}"));
            }
            out
        }
        (None, error) => format!("error: {}", error.as_deref().unwrap_or("no result")),
    }
}

/// Build assessment results for `report`; findings follow `requirements` order.
pub fn assessment_results(report: &RunReport, requirements: &[Requirement]) -> AssessmentResults {
    let collected = timestamp(&report.finished);

    let mut observation_ids: HashMap<(&str, &str), String> = HashMap::new();
    let mut observations = Vec::new();
    for record in report.validations() {
        let uuid = Uuid::new_v4().to_string();
        observation_ids.insert((record.identity.as_str(), record.link.as_str()), uuid.clone());
        observations.push(Observation {
            uuid,
            title: (!record.name.is_empty()).then(|| record.name.clone()),
            description: format!("[TEST]: {} - {}", record.identity, record.label()),
            methods: vec!["TEST".to_string()],
            collected: collected.clone(),
            remarks: Some(observation_remarks(record)),
            ..Default::default()
        });
    }

    let findings = requirements
        .iter()
        .filter_map(|req| {
            let outcome = report.requirements.get(&req.uuid)?;
            let related_observations = outcome
                .results
                .iter()
                .filter_map(|r| observation_ids.get(&(r.identity.as_str(), r.link.as_str())))
                .map(|uuid| RelatedObservation {
                    observation_uuid: uuid.clone(),
                    ..Default::default()
                })
                .collect();
            Some(Finding {
                uuid: Uuid::new_v4().to_string(),
                title: format!("Validation Result - Control: {}", req.control_id),
                description: req.description.clone(),
                target: FindingTarget {
                    kind: "objective-id".to_string(),
                    target_id: req.control_id.clone(),
                    status: ObjectiveStatus {
                        state: outcome.status.as_str().to_string(),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                related_observations,
                remarks: Some(outcome.remarks.clone()),
                ..Default::default()
            })
        })
        .collect();

    AssessmentResults {
        uuid: Uuid::new_v4().to_string(),
        metadata: Metadata {
            title: "[cairn] Assessment Results".to_string(),
            last_modified: collected.clone(),
            version: ENGINE_VERSION.to_string(),
            oscal_version: OSCAL_VERSION.to_string(),
            ..Default::default()
        },
        results: vec![AssessmentResult {
            uuid: Uuid::new_v4().to_string(),
            title: "Validation run".to_string(),
            description: format!(
                "Run {} assessing {} requirements",
                report.run_id,
                report.requirements.len()
            ),
            start: timestamp(&report.started),
            end: Some(collected),
            findings,
            observations,
            ..Default::default()
        }],
        ..Default::default()
    }
}
