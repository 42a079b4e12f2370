//! Declarative command dispatch.
//!
//! Stations describe commands as data: trigger phrases, typed parameter
//! extractors and an HTTP side effect. A matched command fires the request
//! and answers with its confirmation text, so "set channel to one four
//! six five two" never touches the LLM.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::normalize_command;

/// Consulted by the router before any fixed rule. `Some(confirmation)`
/// means the transcript was handled and the text should be spoken.
pub trait CommandDispatcher: Send + 'static {
    fn dispatch(&self, transcript: &str) -> Option<String>;
}

/// How one parameter is pulled out of the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ParamSpec {
    /// First number spoken anywhere in the transcript.
    FirstNumber,
    /// Second number spoken.
    SecondNumber,
    /// First word matching one of the choices.
    Keyword { choices: Vec<String> },
}

/// One declarative command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    /// Any of these substrings (normalized) triggers the command.
    pub phrases: Vec<String>,
    /// Parameter name → extractor. All must extract for a match.
    #[serde(default)]
    pub params: Vec<(String, ParamSpec)>,
    /// Side-effect endpoint; `{param}` placeholders are substituted.
    pub url: String,
    /// Spoken on success; `{param}` placeholders are substituted.
    pub confirmation: String,
}

/// Dispatcher that fires command side effects over HTTP POST.
pub struct HttpCommandDispatcher {
    specs: Vec<CommandSpec>,
    http: reqwest::blocking::Client,
    timeout: Duration,
}

impl HttpCommandDispatcher {
    pub fn new(specs: Vec<CommandSpec>, timeout: Duration) -> Self {
        Self {
            specs,
            http: reqwest::blocking::Client::new(),
            timeout,
        }
    }
}

impl CommandDispatcher for HttpCommandDispatcher {
    fn dispatch(&self, transcript: &str) -> Option<String> {
        let (spec, params) = match_spec(&self.specs, transcript)?;

        let url = render_template(&spec.url, &params);
        debug!(command = spec.name.as_str(), url = url.as_str(), "dispatching command");

        let sent = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(&params)
            .send();

        match sent {
            Ok(response) if response.status().is_success() => {
                Some(render_template(&spec.confirmation, &params))
            }
            Ok(response) => {
                warn!(
                    command = spec.name.as_str(),
                    status = %response.status(),
                    "command side effect rejected"
                );
                Some("Unable to comply.".into())
            }
            Err(e) => {
                warn!(command = spec.name.as_str(), error = %e, "command side effect failed");
                Some("Unable to comply.".into())
            }
        }
    }
}

/// Find the first spec whose trigger matches and whose parameters all
/// extract.
fn match_spec<'a>(
    specs: &'a [CommandSpec],
    transcript: &str,
) -> Option<(&'a CommandSpec, HashMap<String, String>)> {
    let normalized = normalize_command(transcript);
    for spec in specs {
        let triggered = spec
            .phrases
            .iter()
            .any(|p| normalized.contains(&normalize_command(p)));
        if !triggered {
            continue;
        }
        if let Some(params) = extract_params(&spec.params, &normalized) {
            return Some((spec, params));
        }
        debug!(command = spec.name.as_str(), "trigger matched but parameters missing");
    }
    None
}

fn extract_params(
    params: &[(String, ParamSpec)],
    normalized: &str,
) -> Option<HashMap<String, String>> {
    let numbers: Vec<&str> = normalized
        .split_whitespace()
        .filter(|w| w.parse::<f64>().is_ok())
        .collect();

    let mut out = HashMap::new();
    for (name, spec) in params {
        let value = match spec {
            ParamSpec::FirstNumber => numbers.first().copied(),
            ParamSpec::SecondNumber => numbers.get(1).copied(),
            ParamSpec::Keyword { choices } => normalized
                .split_whitespace()
                .find(|w| choices.iter().any(|c| c.eq_ignore_ascii_case(w))),
        }?;
        out.insert(name.clone(), value.to_string());
    }
    Some(out)
}

fn render_template(template: &str, params: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in params {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}
