use crate::policy::PhaseStatus;

pub struct DecisionPrompts;

impl DecisionPrompts {
    pub fn next_action(
        target: &str,
        catalogue: &[(String, String)],
        status: &[PhaseStatus],
        history_json: &str,
    ) -> String {
        format!(
            r#"You are the orchestration assistant for a reconnaissance framework.

TARGET: {target}

AVAILABLE MODULES:
{catalogue}

MODULE EXECUTION STATUS:
{status}

RECON HISTORY:
{history_json}

Based on the above information, which module should run next?

INSTRUCTIONS:
1. Analyze the current state of reconnaissance
2. Decide which module would be most logical to run next
3. DO NOT select a module that has reached its maximum execution count
4. If a module failed previously, consider retrying it
5. Provide a brief reason for your decision
6. Reply with a single JSON object and nothing else:

{{
  "phase": "module_name",
  "params": {{}},
  "reason": "brief explanation"
}}

If all modules have been completed or no further action is needed, reply with:
{{
  "phase": "none",
  "params": {{}},
  "reason": "all reconnaissance completed"
}}"#,
            target = target,
            catalogue = render_catalogue(catalogue),
            status = render_status(status),
            history_json = history_json,
        )
    }

    pub fn recovery(
        target: &str,
        error: &str,
        failed_phase: Option<&str>,
        status: &[PhaseStatus],
        history_json: &str,
    ) -> String {
        format!(
            r#"You are the orchestration assistant for a reconnaissance framework.

TARGET: {target}

ERROR OCCURRED: {error}
MODULE THAT FAILED: {failed}

MODULE EXECUTION STATUS:
{status}

RECON HISTORY:
{history_json}

Based on the above information, how should the run recover from this error?

INSTRUCTIONS:
1. Analyze the error and determine the best recovery action
2. Choose one of these actions:
   - "retry": run the same module again (network timeouts, temporary issues)
   - "skip": skip this module and move to the next logical one
   - "alternative": run a different module instead (name it in "phase")
3. Provide a brief reason for your decision
4. Reply with a single JSON object and nothing else:

{{
  "action": "retry|skip|alternative",
  "phase": "module_name_if_alternative",
  "reason": "brief explanation"
}}"#,
            target = target,
            error = error,
            failed = failed_phase.unwrap_or("unknown"),
            status = render_status(status),
            history_json = history_json,
        )
    }
}

fn render_catalogue(catalogue: &[(String, String)]) -> String {
    catalogue
        .iter()
        .map(|(name, description)| {
            if description.is_empty() {
                format!("- {name}")
            } else {
                format!("- {name}: {description}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_status(status: &[PhaseStatus]) -> String {
    status
        .iter()
        .map(|s| {
            format!(
                "- {}: executed {}/{} times, status: {}",
                s.phase, s.count, s.budget, s.state
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PhaseState;

    fn status() -> Vec<PhaseStatus> {
        vec![
            PhaseStatus {
                phase: "passive".to_string(),
                count: 1,
                budget: 1,
                state: PhaseState::Completed,
            },
            PhaseStatus {
                phase: "subdomain".to_string(),
                count: 1,
                budget: 2,
                state: PhaseState::RetryRecommended,
            },
        ]
    }

    #[test]
    fn test_next_action_prompt_contents() {
        let catalogue = vec![
            ("passive".to_string(), "DNS lookups".to_string()),
            ("subdomain".to_string(), String::new()),
        ];
        let prompt = DecisionPrompts::next_action("example.com", &catalogue, &status(), "[]");

        assert!(prompt.contains("TARGET: example.com"));
        assert!(prompt.contains("- passive: DNS lookups"));
        assert!(prompt.contains("- subdomain\n"));
        assert!(prompt.contains("- passive: executed 1/1 times, status: completed"));
        assert!(prompt.contains("- subdomain: executed 1/2 times, status: failed (retry recommended)"));
        assert!(prompt.contains(r#""phase": "none""#));
    }

    #[test]
    fn test_recovery_prompt_contents() {
        let prompt = DecisionPrompts::recovery(
            "example.com",
            "Phase portscan failed: timeout",
            Some("portscan"),
            &status(),
            "[]",
        );
        assert!(prompt.contains("ERROR OCCURRED: Phase portscan failed: timeout"));
        assert!(prompt.contains("MODULE THAT FAILED: portscan"));
        assert!(prompt.contains(r#""action": "retry|skip|alternative""#));

        let unknown = DecisionPrompts::recovery("example.com", "boom", None, &[], "[]");
        assert!(unknown.contains("MODULE THAT FAILED: unknown"));
    }
}
