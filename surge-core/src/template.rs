use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;

use rand::Rng;
use regex::Regex;

use crate::error::{Error, Result};
use crate::generator::ValueGenerator;

/// How often a variable's value is regenerated for a virtual user.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    serde::Deserialize,
    serde::Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    /// Once per virtual user.
    Scenario,
    /// At the start of every iteration.
    Iteration,
    /// Right before each step's message is built.
    Step,
}

#[derive(Debug, Clone)]
pub struct Variable {
    name: Arc<str>,
    scope: VariableScope,
    generator: ValueGenerator,
    insertion: Regex,
}

impl Variable {
    /// `insertion` must have exactly one capture group: the span that gets replaced.
    pub fn new(name: &str, scope: VariableScope, generation: &str, insertion: &str) -> Result<Self> {
        let generator =
            ValueGenerator::compile(generation).map_err(|source| Error::GenerationPattern {
                name: name.to_string(),
                source: Box::new(source),
            })?;
        let insertion = Regex::new(insertion).map_err(|source| Error::InsertionPattern {
            name: name.to_string(),
            source,
        })?;
        single_capture_group(&insertion)?;

        Ok(Self {
            name: Arc::from(name),
            scope,
            generator,
            insertion,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> VariableScope {
        self.scope
    }

    /// Byte span of the capture group in the first match, if any.
    pub fn locate(&self, template: &str) -> Option<Range<usize>> {
        self.insertion
            .captures(template)
            .and_then(|caps| caps.get(1))
            .map(|m| m.range())
    }
}

pub(crate) fn single_capture_group(re: &Regex) -> Result<()> {
    // Group 0 is the whole match.
    let found = re.captures_len().saturating_sub(1);
    if found != 1 {
        return Err(Error::CaptureGroups {
            pattern: re.as_str().to_string(),
            found,
        });
    }
    Ok(())
}

/// A virtual user's current variable values, keyed by variable name.
#[derive(Debug, Default, Clone)]
pub struct Bindings {
    values: HashMap<Arc<str>, String>,
}

impl Bindings {
    /// Regenerates every variable of `scope`, overwriting previous values in place.
    pub fn regenerate<R: Rng>(
        &mut self,
        variables: &BTreeMap<Arc<str>, Variable>,
        scope: VariableScope,
        rng: &mut R,
    ) {
        for var in variables.values().filter(|v| v.scope == scope) {
            let value = var.generator.generate(rng);
            match self.values.get_mut(&var.name) {
                Some(slot) => *slot = value,
                None => {
                    self.values.insert(var.name.clone(), value);
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Substitutes every generated variable into `template`.
    ///
    /// Variables whose insertion rule doesn't match are skipped and their placeholder
    /// stays as written.
    pub fn render<'a>(
        &self,
        variables: &BTreeMap<Arc<str>, Variable>,
        template: &'a str,
    ) -> Cow<'a, str> {
        let mut spans: Vec<(Range<usize>, &str)> = Vec::with_capacity(self.values.len());
        for var in variables.values() {
            let Some(value) = self.values.get(&var.name) else {
                continue;
            };
            match var.locate(template) {
                Some(span) => spans.push((span, value.as_str())),
                None => tracing::debug!(
                    variable = %var.name,
                    "insertion pattern matched nothing; leaving template untouched"
                ),
            }
        }

        if spans.is_empty() {
            return Cow::Borrowed(template);
        }
        Cow::Owned(splice(template, spans))
    }
}

/// Replaces each span of `template` with its value in one left-to-right pass.
///
/// A span that overlaps an earlier one is dropped.
pub fn splice(template: &str, mut spans: Vec<(Range<usize>, &str)>) -> String {
    spans.sort_by_key(|(span, _)| span.start);

    let extra: usize = spans.iter().map(|(_, v)| v.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut cursor = 0;

    for (span, value) in spans {
        if span.start < cursor || span.end > template.len() {
            tracing::warn!(
                start = span.start,
                end = span.end,
                "overlapping substitution span skipped"
            );
            continue;
        }
        out.push_str(&template[cursor..span.start]);
        out.push_str(value);
        cursor = span.end;
    }
    out.push_str(&template[cursor..]);
    out
}
