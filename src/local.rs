//! Local dry runs through a compiler and virtual machine.
//!
//! A [`LocalExecutor`] is only ever used to check a program and its inputs on the client before
//! a network session is started. It is never part of the distributed protocol.
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::value::{NamedInput, Value};

/// Identifies a compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

impl Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the local executor knows about a compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramMetadata {
    /// The compiled program.
    pub artifact: ArtifactId,
    /// The function executed by a run, usually `main`.
    pub entry_point: String,
    /// Names of the inputs the program expects, in parameter order.
    pub expected_inputs: Vec<String>,
}

/// The compiler and virtual machine used for dry runs.
pub trait LocalExecutor {
    /// The error returned by the executor.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Compile program source into an artifact.
    fn compile(&self, source: &str) -> Result<ArtifactId, Self::Error>;

    /// Metadata of a compiled program.
    fn program_info(&self, artifact: &ArtifactId) -> Result<ProgramMetadata, Self::Error>;

    /// Execute the program in the clear with the given inputs, in parameter order.
    fn execute_locally(
        &self,
        artifact: &ArtifactId,
        inputs: &[NamedInput],
    ) -> Result<Value, Self::Error>;
}

/// A dry run could not be performed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DryRunError {
    /// The program expects an input that is not set.
    #[error("input '{name}' expected by {artifact} is not set")]
    MissingInput {
        /// The program.
        artifact: ArtifactId,
        /// The missing input.
        name: String,
    },
    /// The executor failed.
    #[error("local execution failed")]
    Executor(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Order the inputs as the program expects them and execute it locally.
///
/// Inputs the program does not expect are ignored.
pub fn dry_run<X: LocalExecutor>(
    executor: &X,
    artifact: &ArtifactId,
    inputs: &[NamedInput],
) -> Result<Value, DryRunError> {
    let info = executor
        .program_info(artifact)
        .map_err(|err| DryRunError::Executor(Box::new(err)))?;
    let mut ordered = Vec::with_capacity(info.expected_inputs.len());
    for name in &info.expected_inputs {
        let input = inputs.iter().find(|input| &input.name == name).ok_or_else(|| {
            DryRunError::MissingInput {
                artifact: artifact.clone(),
                name: name.clone(),
            }
        })?;
        ordered.push(input.clone());
    }
    tracing::debug!(%artifact, entry_point = %info.entry_point, "executing program locally");
    executor
        .execute_locally(artifact, &ordered)
        .map_err(|err| DryRunError::Executor(Box::new(err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("unknown artifact")]
    struct Unknown;

    /// Compiles every source to an adder of its declared inputs.
    struct Adder;

    impl LocalExecutor for Adder {
        type Error = Unknown;

        fn compile(&self, source: &str) -> Result<ArtifactId, Unknown> {
            Ok(ArtifactId(source.to_string()))
        }

        fn program_info(&self, artifact: &ArtifactId) -> Result<ProgramMetadata, Unknown> {
            if artifact.0.is_empty() {
                return Err(Unknown);
            }
            Ok(ProgramMetadata {
                artifact: artifact.clone(),
                entry_point: "main".into(),
                expected_inputs: artifact.0.split(',').map(str::to_string).collect(),
            })
        }

        fn execute_locally(
            &self,
            _artifact: &ArtifactId,
            inputs: &[NamedInput],
        ) -> Result<Value, Unknown> {
            let sum = inputs
                .iter()
                .map(|input| match input.value {
                    Value::Int(i) => i,
                    _ => 0,
                })
                .sum::<i64>();
            Ok(Value::Int(sum))
        }
    }

    #[test]
    fn orders_and_checks_inputs() {
        let artifact = Adder.compile("a,b").unwrap();
        let inputs = [
            NamedInput::public("unused", 1000_i64),
            NamedInput::secret("b", 17_i64),
            NamedInput::secret("a", 25_i64),
        ];
        assert_eq!(dry_run(&Adder, &artifact, &inputs).unwrap(), Value::Int(42));
        assert!(matches!(
            dry_run(&Adder, &artifact, &inputs[..2]),
            Err(DryRunError::MissingInput { name, .. }) if name == "a"
        ));
        assert!(matches!(
            dry_run(&Adder, &ArtifactId(String::new()), &inputs),
            Err(DryRunError::Executor(_))
        ));
    }
}
