//! Error kinds raised by the evaluation system core.
//!
//! Every layer returns [`Result`]; the CLI converts these into `anyhow`
//! errors and exit codes. Variants that come with "did you mean"
//! candidates render them as part of the message.

use thiserror::Error;

use crate::models::Status;

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or incomplete configuration (config file, plugin setup).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A parameter value or argument list failed validation.
    #[error("{0}")]
    Validation(String),

    /// No plugin with this name is registered.
    #[error("Plugin '{name}' not found{}", did_you_mean(.suggestions))]
    PluginNotFound {
        name: String,
        suggestions: Vec<String>,
    },

    /// No parameter with this name is declared.
    #[error("Parameter '{name}' not found{}", did_you_mean(.suggestions))]
    ParameterNotFound {
        name: String,
        suggestions: Vec<String>,
    },

    /// Transport or protocol failure talking to the search index.
    #[error("Index error: {0}")]
    Index(String),

    /// The batch system rejected a job or could not be reached.
    #[error("Batch submission failed: {0}")]
    BatchSubmit(String),

    /// A history status transition would move backwards.
    #[error("Cannot change status of history entry {id} from '{from}' to '{to}'")]
    StatusDowngrade { id: i64, from: Status, to: Status },

    /// A path does not follow the directory reference syntax of its type.
    #[error("Cannot parse '{path}' as DRS type '{drs_type}': {reason}")]
    DrsParse {
        path: String,
        drs_type: String,
        reason: String,
    },

    /// The plugin process could not be run or reported failure.
    #[error("Plugin '{name}' failed: {reason}")]
    PluginFailed { name: String, reason: String },

    /// History row does not exist (or belongs to another user).
    #[error("History entry {0} not found")]
    EntryNotFound(i64),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
}

/// Result type using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

fn did_you_mean(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(". Did you mean: {}?", suggestions.join(", "))
    }
}

impl Error {
    /// Whether the error stems from bad user arguments (exit code 2).
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::ParameterNotFound { .. } | Error::PluginNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggestions_are_rendered() {
        let err = Error::PluginNotFound {
            name: "dummyplugn".to_string(),
            suggestions: vec!["dummyplugin".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Plugin 'dummyplugn' not found. Did you mean: dummyplugin?"
        );
    }

    #[test]
    fn no_suggestions_no_suffix() {
        let err = Error::ParameterNotFound {
            name: "x".to_string(),
            suggestions: vec![],
        };
        assert_eq!(err.to_string(), "Parameter 'x' not found");
    }
}
