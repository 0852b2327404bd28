use std::collections::BTreeMap;

/// Mapping of process type (`web`, `worker`, ...) to the command line the
/// release runs for it.
pub type ProcessTable = BTreeMap<String, String>;

#[derive(thiserror::Error, Debug)]
#[error("invalid Procfile: {raw_error_message}")]
pub struct ProcfileError {
    pub raw_error_message: String,
}

/// Decodes a Procfile. The only accepted shape is a YAML mapping of string
/// process names to string commands.
pub fn parse_procfile(content: &[u8]) -> Result<ProcessTable, ProcfileError> {
    serde_yaml::from_slice::<ProcessTable>(content).map_err(|err| ProcfileError {
        raw_error_message: err.to_string(),
    })
}
