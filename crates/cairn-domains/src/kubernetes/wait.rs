//! Readiness checks used by `wait`.

use std::time::Duration;

use serde_json::Value;

/// Interval between readiness polls.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Whether `object` counts as ready.
///
/// With a `condition`, the object is ready once
/// `status.conditions[type == condition].status == "True"`. Without one, the
/// check depends on the resource kind; unknown kinds are ready once they exist.
pub fn is_ready(resource: &str, object: &Value, condition: Option<&str>) -> bool {
    if let Some(condition) = condition {
        return condition_true(object, condition);
    }

    let status = &object["status"];
    match resource.to_lowercase().as_str() {
        "pods" | "pod" => match status["phase"].as_str() {
            Some("Succeeded") => true,
            Some("Running") => condition_true(object, "Ready"),
            _ => false,
        },
        "deployments" | "statefulsets" | "replicasets" => {
            let desired = object["spec"]["replicas"].as_u64().unwrap_or(1);
            let ready = status["readyReplicas"].as_u64().unwrap_or(0);
            ready >= desired
        }
        "daemonsets" => {
            let desired = status["desiredNumberScheduled"].as_u64();
            let ready = status["numberReady"].as_u64().unwrap_or(0);
            desired.is_some_and(|d| ready == d)
        }
        "jobs" => {
            status["succeeded"].as_u64().unwrap_or(0) >= 1 || condition_true(object, "Complete")
        }
        "namespaces" => status["phase"].as_str() == Some("Active"),
        "persistentvolumeclaims" => status["phase"].as_str() == Some("Bound"),
        _ => true,
    }
}

fn condition_true(object: &Value, condition: &str) -> bool {
    object["status"]["conditions"]
        .as_array()
        .into_iter()
        .flatten()
        .any(|c| {
            c["type"]
                .as_str()
                .is_some_and(|t| t.eq_ignore_ascii_case(condition))
                && c["status"].as_str() == Some("True")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pod_needs_running_and_ready() {
        let pending = json!({"status": {"phase": "Pending"}});
        assert!(!is_ready("pods", &pending, None));

        let running_unready = json!({"status": {"phase": "Running", "conditions": [
            {"type": "Ready", "status": "False"}
        ]}});
        assert!(!is_ready("pods", &running_unready, None));

        let ready = json!({"status": {"phase": "Running", "conditions": [
            {"type": "Ready", "status": "True"}
        ]}});
        assert!(is_ready("pods", &ready, None));
    }

    #[test]
    fn test_deployment_ready_replicas() {
        let d = json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 2}});
        assert!(!is_ready("deployments", &d, None));
        let d = json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 3}});
        assert!(is_ready("deployments", &d, None));
    }

    #[test]
    fn test_daemonset_requires_reported_desired() {
        assert!(!is_ready("daemonsets", &json!({"status": {}}), None));
        let ds = json!({"status": {"desiredNumberScheduled": 2, "numberReady": 2}});
        assert!(is_ready("daemonsets", &ds, None));
    }

    #[test]
    fn test_named_condition_overrides_kind() {
        let job = json!({"status": {"conditions": [{"type": "Failed", "status": "True"}]}});
        assert!(is_ready("jobs", &job, Some("failed")));
        assert!(!is_ready("jobs", &job, None));
    }

    #[test]
    fn test_unknown_kind_is_ready_when_present() {
        assert!(is_ready("configmaps", &json!({"data": {}}), None));
    }
}
