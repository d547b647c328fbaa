use anyhow::Context as _;
use std::path::Path;
use std::time::Duration;

use surge_core::{DurationValue, TestDefinition};

/// CLI values that take precedence over the YAML document.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub duration: Option<Duration>,
    pub seed: Option<u64>,
}

pub async fn load(path: &Path) -> anyhow::Result<TestDefinition> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read test definition: {}", path.display()))?;
    parse(&bytes).with_context(|| format!("failed to parse YAML: {}", path.display()))
}

pub fn parse(bytes: &[u8]) -> anyhow::Result<TestDefinition> {
    let def: TestDefinition = serde_yaml::from_slice(bytes)?;
    if def.scenarios.is_empty() {
        anyhow::bail!("test `{}` defines no scenarios", def.name);
    }
    Ok(def)
}

/// Applies CLI overrides and fills in a run id when the document has none.
pub fn finalize(mut def: TestDefinition, overrides: Overrides) -> TestDefinition {
    if let Some(duration) = overrides.duration {
        def.total_duration = DurationValue::from(duration);
    }
    if let Some(seed) = overrides.seed {
        for scenario in &mut def.scenarios {
            scenario.seed = Some(seed);
        }
    }
    if def.id.is_none() {
        def.id = Some(uuid::Uuid::new_v4().to_string());
    }
    def
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use surge_core::ScenarioKind;
    use surge_core::runner::RampAction;

    const CHECKOUT: &str = r#"
name: checkout
totalDuration: 2m
scenarios:
  - name: browse
    pacing: 1s
    pacingDelta: 0.2
    holdUntilStopped: false
    steps:
      - action: start
        totalUsersCount: 20
        usersPerBatch: 5
        period: 2s
      - action: duration
        period: 1m
      - action: stop
        countUsersByPeriod: 5
        totalUsersCount: 20
        period: 500ms
    script:
      name: browse
      variables:
        user:
          scope: scenario
          generationRegex: "[0-9]{6}"
          insertingRegex: '"user": "(.*?)"'
      steps:
        - name: home
          url: http://localhost:8080/
        - name: cart
          target: http://localhost:8080/cart
          method: POST
          timeout: 2s
          headers:
            content-type: application/json
          body: '{"user": "0"}'
"#;

    #[test]
    fn parses_a_full_document() {
        let def = parse(CHECKOUT.as_bytes()).unwrap();
        assert_eq!(def.name, "checkout");
        assert_eq!(def.total_duration.into_inner(), Duration::from_secs(120));

        let scenario = &def.scenarios[0];
        assert_eq!(scenario.kind, ScenarioKind::Http);
        assert_eq!(scenario.pacing.into_inner(), Duration::from_secs(1));
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.steps[1].action, RampAction::Duration);
        assert_eq!(scenario.steps[2].users_per_batch, 5);
        assert_eq!(scenario.steps[2].period.into_inner(), Duration::from_millis(500));

        let script = &scenario.script;
        assert_eq!(script.steps[0].target, "http://localhost:8080/");
        assert_eq!(script.steps[0].method, "GET");
        assert_eq!(script.steps[1].method, "POST");
        assert_eq!(
            script.steps[1].timeout.map(DurationValue::into_inner),
            Some(Duration::from_secs(2))
        );
        assert_eq!(script.variables["user"].generate, "[0-9]{6}");

        let config = def.compile().unwrap();
        assert_eq!(config.scenarios[0].ramp.len(), 3);
        assert_eq!(config.scenarios[0].script.steps[1].method.as_str(), "POST");
    }

    #[test]
    fn numeric_durations_are_seconds() {
        let yaml = r#"
name: t
totalDuration: 90
scenarios:
  - name: s
    pacing: 0.5
    script:
      name: s
      steps:
        - name: only
          url: http://localhost/
"#;
        let def = parse(yaml.as_bytes()).unwrap();
        assert_eq!(def.total_duration.into_inner(), Duration::from_secs(90));
        assert_eq!(def.scenarios[0].pacing.into_inner(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(parse(b"name: t\ntotalDuration: 1m\nscenarios: []\n").is_err());
        assert!(parse(b"name: t\ntotalDuration: soon\nscenarios: []\n").is_err());
        assert!(parse(b"name: t\ntotalDuration: -5\nscenarios: []\n").is_err());
        assert!(parse(b"[1, 2]").is_err());
    }

    #[test]
    fn overrides_win_and_id_is_filled() {
        let def = parse(CHECKOUT.as_bytes()).unwrap();
        let def = finalize(
            def,
            Overrides {
                duration: Some(Duration::from_secs(30)),
                seed: Some(9),
            },
        );
        assert_eq!(def.total_duration.into_inner(), Duration::from_secs(30));
        assert_eq!(def.scenarios[0].seed, Some(9));
        let id = def.id.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok(), "{id}");
    }

    #[test]
    fn explicit_id_is_kept() {
        let yaml = CHECKOUT.replacen("name: checkout", "name: checkout\nid: nightly-7", 1);
        let def = finalize(parse(yaml.as_bytes()).unwrap(), Overrides::default());
        assert_eq!(def.id.as_deref(), Some("nightly-7"));
    }
}
