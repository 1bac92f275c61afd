use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::ResourceRecommendation;
use crate::{CloudwrightError, CloudwrightResult};

/// Dependencies of `rec` restricted to the confirmed set
pub fn confirmed_dependencies<'a>(
    rec: &'a ResourceRecommendation,
    confirmed: &HashSet<&str>,
) -> Vec<&'a str> {
    rec.depends_on
        .iter()
        .map(String::as_str)
        .filter(|dep| confirmed.contains(dep))
        .collect()
}

/// Group confirmed resources into submission layers; each layer only depends on
/// earlier ones. Unconfirmed dependencies are ignored.
pub fn dependency_layers(selected: &[&ResourceRecommendation]) -> CloudwrightResult<Vec<Vec<String>>> {
    let confirmed: HashSet<&str> = selected.iter().map(|r| r.name.as_str()).collect();

    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for rec in selected {
        let deps = confirmed_dependencies(rec, &confirmed);
        indegree.insert(rec.name.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(rec.name.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut layers = Vec::new();
    let mut placed = 0;

    while !ready.is_empty() {
        let layer: Vec<&str> = ready.iter().copied().collect();
        ready.clear();
        for name in &layer {
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = indegree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }
        placed += layer.len();
        layers.push(layer.into_iter().map(str::to_string).collect());
    }

    if placed != selected.len() {
        let mut stuck: Vec<&str> = indegree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(name, _)| *name)
            .collect();
        stuck.sort_unstable();
        return Err(CloudwrightError::invalid_request(format!(
            "dependency cycle among confirmed resources: {}",
            stuck.join(", ")
        )));
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResourceType;

    fn rec(name: &str, deps: &[&str]) -> ResourceRecommendation {
        let mut r = ResourceRecommendation::new(ResourceType::Compute, name, "", 0.0);
        r.depends_on = deps.iter().map(|d| d.to_string()).collect();
        r
    }

    #[test]
    fn test_layers_follow_dependencies() {
        let vcn = rec("WebsiteVCN", &[]);
        let server = rec("WebServer", &[]);
        let db = rec("WebsiteDB", &["WebsiteVCN"]);
        let storage = rec("WebsiteStorage", &["WebServer"]);
        let layers = dependency_layers(&[&vcn, &server, &db, &storage]).unwrap();

        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0], vec!["WebServer", "WebsiteVCN"]);
        assert_eq!(layers[1], vec!["WebsiteDB", "WebsiteStorage"]);
    }

    #[test]
    fn test_unconfirmed_dependencies_are_ignored() {
        let db = rec("WebsiteDB", &["WebsiteVCN"]);
        let layers = dependency_layers(&[&db]).unwrap();
        assert_eq!(layers, vec![vec!["WebsiteDB".to_string()]]);
    }

    #[test]
    fn test_cycle_is_invalid_request() {
        let a = rec("A", &["B"]);
        let b = rec("B", &["A"]);
        let c = rec("C", &[]);
        match dependency_layers(&[&a, &b, &c]) {
            Err(CloudwrightError::InvalidRequest { message }) => {
                assert!(message.contains("A, B"));
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }
}
