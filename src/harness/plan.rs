//! Run plan and scenario selection
//!
//! A plan file is optional YAML:
//!
//! ```yaml
//! scenarios: [register, register_verify, login]
//! account:
//!   email: someone@example.io
//! ```
//!
//! Without a plan, the library's default order runs. `--only` filters that
//! order (or the plan's own order) down to the named labels.

use std::path::Path;

use serde::Deserialize;

use crate::common::config::Account;
use crate::common::{Error, Result};

use super::scenarios::Scenario;

/// Contents of a plan file
#[derive(Debug, Default, Deserialize)]
pub struct RunPlan {
    /// Explicit run order; empty means the default order
    #[serde(default)]
    pub scenarios: Vec<String>,
    /// Overrides the configured fixture account
    #[serde(default)]
    pub account: Option<Account>,
}

impl RunPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Resolve the scenarios to run. Every label is checked before anything runs.
pub fn select(plan: Option<&RunPlan>, only: &[String]) -> Result<Vec<Scenario>> {
    let order = match plan {
        Some(plan) if !plan.scenarios.is_empty() => plan
            .scenarios
            .iter()
            .map(|label| label.parse())
            .collect::<Result<Vec<Scenario>>>()?,
        _ => Scenario::ALL.to_vec(),
    };

    if only.is_empty() {
        return Ok(order);
    }

    let wanted = only
        .iter()
        .map(|label| label.parse())
        .collect::<Result<Vec<Scenario>>>()?;

    Ok(order
        .into_iter()
        .filter(|scenario| wanted.contains(scenario))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let selected = select(None, &[]).unwrap();
        assert_eq!(selected, Scenario::ALL.to_vec());
        assert_eq!(selected[0], Scenario::Register);
        assert_eq!(selected.last(), Some(&Scenario::DeleteUser));
    }

    #[test]
    fn test_only_keeps_default_order() {
        let only = vec!["login".to_string(), "register".to_string()];
        let selected = select(None, &only).unwrap();
        assert_eq!(selected, vec![Scenario::Register, Scenario::Login]);
    }

    #[test]
    fn test_plan_order_wins() {
        let plan = RunPlan::parse("scenarios: [retrieve_count, register]\n").unwrap();
        let selected = select(Some(&plan), &[]).unwrap();
        assert_eq!(selected, vec![Scenario::RetrieveCount, Scenario::Register]);

        let only = vec!["register".to_string()];
        assert_eq!(select(Some(&plan), &only).unwrap(), vec![Scenario::Register]);
    }

    #[test]
    fn test_unknown_labels_are_rejected() {
        let plan = RunPlan::parse("scenarios: [register, registr]\n").unwrap();
        assert!(matches!(
            select(Some(&plan), &[]),
            Err(Error::UnknownScenario(ref label)) if label == "registr"
        ));

        let only = vec!["nope".to_string()];
        assert!(matches!(select(None, &only), Err(Error::UnknownScenario(_))));
    }

    #[test]
    fn test_plan_account_override() {
        let plan = RunPlan::parse(
            "account:\n  email: a@b.io\n  password: p\n  first_name: A\n  last_name: B\n",
        )
        .unwrap();
        assert!(plan.scenarios.is_empty());

        let account = plan.account.unwrap();
        assert_eq!(account.email, "a@b.io");
        assert_eq!(account.gender, "m");
    }

    #[test]
    fn test_load_missing_plan() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunPlan::load(&dir.path().join("plan.yaml")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
