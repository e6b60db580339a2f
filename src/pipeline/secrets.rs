use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use log::debug;

use crate::error::{Result, StagegateError};

/// An opaque credential. Formatting never reveals the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Source of named secrets: an optional TOML file, overridden by the
/// process environment.
#[derive(Debug, Default, Clone)]
pub struct SecretStore {
    file: HashMap<String, Secret>,
    env: HashMap<String, Secret>,
}

impl SecretStore {
    /// Loads the secrets file (a flat `NAME = "value"` table) if one is given
    /// and snapshots the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a flat table of
    /// strings.
    pub fn load(secrets_file: Option<&Path>) -> Result<Self> {
        let file = match secrets_file {
            Some(path) => Self::read_file(path)?,
            None => HashMap::new(),
        };

        let env = std::env::vars().map(|(k, v)| (k, Secret::from(v))).collect();

        Ok(Self { file, env })
    }

    fn read_file(path: &Path) -> Result<HashMap<String, Secret>> {
        let contents = std::fs::read_to_string(path)?;
        let table: HashMap<String, String> = toml::from_str(&contents).map_err(|e| {
            StagegateError::Definition(format!(
                "failed to parse secrets file {}: {e}",
                path.display()
            ))
        })?;

        debug!("Loaded {} secrets from {}", table.len(), path.display());
        Ok(table.into_iter().map(|(k, v)| (k, Secret::from(v))).collect())
    }

    /// Builds a store from explicit values, without reading the environment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            file: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Secret::from(v.into())))
                .collect(),
            env: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Secret> {
        self.env.get(name).or_else(|| self.file.get(name))
    }

    /// Resolves every named secret.
    ///
    /// # Errors
    ///
    /// Returns [`StagegateError::MissingSecrets`] listing all names that could
    /// not be found.
    pub fn resolve(&self, names: &[String]) -> Result<ResolvedSecrets> {
        let mut resolved = IndexMap::new();
        let mut missing = Vec::new();

        for name in names {
            match self.get(name) {
                Some(secret) => {
                    resolved.insert(name.clone(), secret.clone());
                }
                None => missing.push(name.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(StagegateError::MissingSecrets(missing));
        }

        Ok(ResolvedSecrets(resolved))
    }
}

/// The secrets a run declared, resolved to values.
#[derive(Debug, Default, Clone)]
pub struct ResolvedSecrets(IndexMap<String, Secret>);

impl ResolvedSecrets {
    pub fn get(&self, name: &str) -> Option<&Secret> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Secret)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replaces every secret value occurring in `text` with `***`.
    ///
    /// Longer values are masked first so a secret that contains another is
    /// not partially revealed.
    pub fn mask(&self, text: &str) -> String {
        let mut values: Vec<&str> = self
            .0
            .values()
            .map(Secret::expose)
            .filter(|v| !v.is_empty())
            .collect();
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));

        values
            .into_iter()
            .fold(text.to_string(), |acc, value| acc.replace(value, "***"))
    }
}

/// Values available to `${{ namespace.NAME }}` expressions.
pub struct InterpolationContext<'a> {
    pub secrets: &'a ResolvedSecrets,
    pub env: &'a IndexMap<String, String>,
    pub run_id: u64,
    pub pipeline: &'a str,
    pub trigger: &'a str,
}

/// Expands `${{ secrets.NAME }}`, `${{ env.NAME }}` and `${{ run.* }}`
/// expressions in `template`.
///
/// # Errors
///
/// Returns [`StagegateError::Interpolation`] for an unterminated expression,
/// an unknown namespace, or a name with no value.
pub fn interpolate(template: &str, ctx: &InterpolationContext<'_>) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 3..];

        let Some(end) = after.find("}}") else {
            return Err(StagegateError::Interpolation(format!(
                "unterminated expression in '{template}'"
            )));
        };

        let expression = after[..end].trim();
        output.push_str(&resolve_expression(expression, ctx)?);
        rest = &after[end + 2..];
    }

    output.push_str(rest);
    Ok(output)
}

fn resolve_expression(expression: &str, ctx: &InterpolationContext<'_>) -> Result<String> {
    let Some((namespace, key)) = expression.split_once('.') else {
        return Err(StagegateError::Interpolation(format!(
            "expected 'namespace.name', got '{expression}'"
        )));
    };

    let value = match namespace.trim() {
        "secrets" => ctx.secrets.get(key.trim()).map(|s| s.expose().to_string()),
        "env" => ctx.env.get(key.trim()).cloned(),
        "run" => match key.trim() {
            "id" => Some(ctx.run_id.to_string()),
            "pipeline" => Some(ctx.pipeline.to_string()),
            "trigger" => Some(ctx.trigger.to_string()),
            _ => None,
        },
        other => {
            return Err(StagegateError::Interpolation(format!(
                "unknown namespace '{other}' in '{expression}'"
            )))
        }
    };

    value.ok_or_else(|| {
        StagegateError::Interpolation(format!("'{expression}' has no value"))
    })
}
