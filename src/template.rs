// src/template.rs

//! Placeholder resolution for node specs.
//!
//! Spec strings may embed `{{ path }}` placeholders. A path is a
//! dot-separated lookup into three namespaces:
//!
//! - `vars.<name>` — workflow variables (after CLI overrides),
//! - `outputs.<node-id>` — the output record of a finished dependency,
//!   e.g. `outputs.build.result.exit_code`,
//! - the fan-out item binding (`item` unless renamed via `item_var`);
//!   `{{ item }}` is the whole item, `{{ item.field }}` indexes into it.
//!
//! A string that is exactly one placeholder resolves to the raw JSON value,
//! which is how a fan-out `over` expression can produce an array. A
//! placeholder embedded in a larger string stringifies scalars and
//! JSON-encodes composites.
//!
//! Fan-out sub-specs resolve in two phases: the node-level pass substitutes
//! `vars` and `outputs` but re-emits item references untouched, and each
//! dispatched item then resolves the remainder with its item bound. The
//! intermediate form is what gets fingerprinted for the cache, so variable
//! changes alter the fingerprint even when the item list does not.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::dag::node::{
    AgentSpec, CommandSpec, ItemSpec, NodeId, NodeSpec, OutputCheck, ResolvedSpec,
};
use crate::errors::TemplateError;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*\}\}").expect("valid regex"));

/// The fan-out item currently bound into the scope.
#[derive(Debug, Clone, Copy)]
pub struct ItemBinding<'a> {
    pub name: &'a str,
    pub value: &'a Value,
}

/// Read-only view of everything templates may reference.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    vars: &'a BTreeMap<String, Value>,
    outputs: &'a BTreeMap<NodeId, Value>,
    item: Option<ItemBinding<'a>>,
    /// Root segment whose placeholders are left verbatim for a later pass.
    deferred: Option<&'a str>,
}

enum Lookup {
    Value(Value),
    /// Re-emit the placeholder unchanged; a later pass owns this root.
    Deferred,
}

impl<'a> Scope<'a> {
    pub fn new(vars: &'a BTreeMap<String, Value>, outputs: &'a BTreeMap<NodeId, Value>) -> Self {
        Self {
            vars,
            outputs,
            item: None,
            deferred: None,
        }
    }

    /// Same scope with a fan-out item bound under `name`.
    pub fn with_item(&self, name: &'a str, value: &'a Value) -> Scope<'a> {
        Scope {
            item: Some(ItemBinding { name, value }),
            deferred: None,
            ..*self
        }
    }

    /// Same scope, but placeholders rooted at `name` are passed through
    /// untouched instead of failing as unknown.
    fn deferring(&self, name: &'a str) -> Scope<'a> {
        Scope {
            deferred: Some(name),
            ..*self
        }
    }

    /// Resolve every placeholder in `input`, splicing values into the text.
    pub fn resolve_str(&self, input: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(input) {
            let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&input[last..whole.start()]);
            match self.lookup(path.as_str())? {
                Lookup::Value(value) => out.push_str(&value_to_string(&value)),
                Lookup::Deferred => out.push_str(whole.as_str()),
            }
            last = whole.end();
        }
        out.push_str(&input[last..]);
        Ok(out)
    }

    /// Resolve `input` to a JSON value. A bare placeholder yields the
    /// referenced value itself; anything else goes through [`resolve_str`]
    /// and comes back as a string.
    ///
    /// [`resolve_str`]: Scope::resolve_str
    pub fn resolve_value(&self, input: &str) -> Result<Value, TemplateError> {
        let trimmed = input.trim();
        if let Some(caps) = PLACEHOLDER.captures(trimmed) {
            if let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) {
                if whole.start() == 0 && whole.end() == trimmed.len() {
                    return match self.lookup(path.as_str())? {
                        Lookup::Value(value) => Ok(value),
                        Lookup::Deferred => Ok(Value::String(input.to_string())),
                    };
                }
            }
        }
        Ok(Value::String(self.resolve_str(input)?))
    }

    /// Resolve placeholders in every string found inside a JSON tree.
    pub fn resolve_value_deep(&self, value: &Value) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => self.resolve_value(s),
            Value::Array(items) => {
                let resolved: Result<Vec<Value>, TemplateError> =
                    items.iter().map(|v| self.resolve_value_deep(v)).collect();
                Ok(Value::Array(resolved?))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, v) in map.iter() {
                    out.insert(key.clone(), self.resolve_value_deep(v)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolve a node spec into its dispatchable form.
    ///
    /// Fan-out resolves `over` to the item list and pre-resolves its
    /// sub-spec with item references deferred; fan-in resolves its sub-spec
    /// completely since the upstream outputs are already in scope.
    pub fn resolve_spec(&self, spec: &NodeSpec) -> Result<ResolvedSpec, TemplateError> {
        match spec {
            NodeSpec::Command(cmd) => Ok(ResolvedSpec::Command(self.resolve_command(cmd)?)),
            NodeSpec::Agent(agent) => Ok(ResolvedSpec::Agent(self.resolve_agent(agent)?)),
            NodeSpec::FanOut(fan) => {
                let source = self.resolve_value(&fan.over)?;
                let Value::Array(items) = source else {
                    return Err(TemplateError::NotAnArray {
                        expr: fan.over.clone(),
                        actual: json_type_name(&source),
                    });
                };
                let spec = self.deferring(&fan.item_var).resolve_item(&fan.spec)?;
                Ok(ResolvedSpec::FanOut {
                    items,
                    item_var: fan.item_var.clone(),
                    parallel: fan.parallel,
                    spec,
                })
            }
            NodeSpec::FanIn(fan) => Ok(ResolvedSpec::FanIn(self.resolve_item(&fan.spec)?)),
        }
    }

    pub fn resolve_item(&self, spec: &ItemSpec) -> Result<ItemSpec, TemplateError> {
        match spec {
            ItemSpec::Command(cmd) => Ok(ItemSpec::Command(self.resolve_command(cmd)?)),
            ItemSpec::Agent(agent) => Ok(ItemSpec::Agent(self.resolve_agent(agent)?)),
        }
    }

    pub fn resolve_command(&self, spec: &CommandSpec) -> Result<CommandSpec, TemplateError> {
        Ok(CommandSpec {
            cmd: self.resolve_str(&spec.cmd)?,
            args: spec
                .args
                .iter()
                .map(|a| self.resolve_str(a))
                .collect::<Result<_, _>>()?,
            env: self.resolve_env(&spec.env)?,
            cwd: self.resolve_opt(&spec.cwd)?,
            timeout_secs: spec.timeout_secs,
            check: spec
                .check
                .as_ref()
                .map(|check| self.resolve_check(check))
                .transpose()?,
        })
    }

    pub fn resolve_agent(&self, spec: &AgentSpec) -> Result<AgentSpec, TemplateError> {
        Ok(AgentSpec {
            agent: self.resolve_str(&spec.agent)?,
            prompt: self.resolve_str(&spec.prompt)?,
            inputs: spec
                .inputs
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve_value_deep(v)?)))
                .collect::<Result<_, TemplateError>>()?,
            env: self.resolve_env(&spec.env)?,
            cwd: self.resolve_opt(&spec.cwd)?,
            timeout_secs: spec.timeout_secs,
        })
    }

    fn resolve_check(&self, check: &OutputCheck) -> Result<OutputCheck, TemplateError> {
        Ok(OutputCheck {
            artifacts: check
                .artifacts
                .iter()
                .map(|p| self.resolve_str(p))
                .collect::<Result<_, _>>()?,
            parse_result: self.resolve_opt(&check.parse_result)?,
        })
    }

    fn resolve_env(
        &self,
        env: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, TemplateError> {
        // Keys stay literal; only values are templated.
        env.iter()
            .map(|(k, v)| Ok((k.clone(), self.resolve_str(v)?)))
            .collect()
    }

    fn resolve_opt(&self, value: &Option<String>) -> Result<Option<String>, TemplateError> {
        value.as_deref().map(|s| self.resolve_str(s)).transpose()
    }

    fn lookup(&self, path: &str) -> Result<Lookup, TemplateError> {
        let mut segments = path.split('.');
        let root = segments.next().unwrap_or(path);
        let rest: Vec<&str> = segments.collect();

        if let Some(binding) = &self.item {
            if binding.name == root {
                return walk(binding.value, path, &rest).map(|v| Lookup::Value(v.clone()));
            }
        }
        if self.deferred == Some(root) {
            return Ok(Lookup::Deferred);
        }

        let map = match root {
            "vars" => self.vars,
            "outputs" => self.outputs,
            _ => {
                return Err(TemplateError::UnknownPath {
                    path: path.to_string(),
                })
            }
        };
        let Some((key, tail)) = rest.split_first() else {
            return Err(TemplateError::UnknownPath {
                path: path.to_string(),
            });
        };
        let Some(value) = map.get(*key) else {
            return Err(TemplateError::UnknownPath {
                path: path.to_string(),
            });
        };
        walk(value, path, tail).map(|v| Lookup::Value(v.clone()))
    }
}

fn walk<'v>(mut value: &'v Value, path: &str, segments: &[&str]) -> Result<&'v Value, TemplateError> {
    for segment in segments {
        value = match value {
            Value::Object(map) => map.get(*segment).ok_or_else(|| TemplateError::UnknownPath {
                path: path.to_string(),
            })?,
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| TemplateError::BadSegment {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })?;
                items.get(index).ok_or_else(|| TemplateError::UnknownPath {
                    path: path.to_string(),
                })?
            }
            _ => {
                return Err(TemplateError::BadSegment {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })
            }
        };
    }
    Ok(value)
}

/// Scalars splice in bare; composites splice in as compact JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
