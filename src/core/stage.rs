//! Stage kinds and the typed stage abstraction

use crate::core::results::SequenceResults;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Source,
    Build,
    Archive,
    Distribute,
    Notify,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Source,
        StageKind::Build,
        StageKind::Archive,
        StageKind::Distribute,
        StageKind::Notify,
    ];

    /// A mandatory stage fails when it has nothing to run
    pub fn is_mandatory(self) -> bool {
        matches!(self, StageKind::Build)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Build => "build",
            StageKind::Archive => "archive",
            StageKind::Distribute => "distribute",
            StageKind::Notify => "notify",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category-specific data carried by a step result
pub trait Payload:
    fmt::Debug + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Payload for T where
    T: fmt::Debug + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Compile-time description of one stage: what it consumes and what its steps produce
pub trait Stage: Send + Sync + 'static {
    const KIND: StageKind;

    /// Results of the previous stage handed to each step
    type Input: fmt::Debug + Serialize + Send + Sync + 'static;

    /// Payload of each step result in this stage
    type Output: Payload;
}

#[derive(Debug, Clone, Copy)]
pub struct Source;

#[derive(Debug, Clone, Copy)]
pub struct Build;

#[derive(Debug, Clone, Copy)]
pub struct Archive;

#[derive(Debug, Clone, Copy)]
pub struct Distribute;

#[derive(Debug, Clone, Copy)]
pub struct Notify;

impl Stage for Source {
    const KIND: StageKind = StageKind::Source;
    type Input = ();
    type Output = SourceOutput;
}

impl Stage for Build {
    const KIND: StageKind = StageKind::Build;
    type Input = SequenceResults<SourceOutput>;
    type Output = BuildOutput;
}

impl Stage for Archive {
    const KIND: StageKind = StageKind::Archive;
    type Input = SequenceResults<BuildOutput>;
    type Output = ArchiveOutput;
}

impl Stage for Distribute {
    const KIND: StageKind = StageKind::Distribute;
    type Input = SequenceResults<ArchiveOutput>;
    type Output = DistributeOutput;
}

impl Stage for Notify {
    const KIND: StageKind = StageKind::Notify;
    type Input = SequenceResults<DistributeOutput>;
    type Output = NotifyOutput;
}

/// Source step payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceOutput {
    /// Commit or changelist the working copy ended up on
    #[serde(default)]
    pub commit: Option<String>,
}

/// Build step payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOutput {
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// Archive step payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveOutput {
    /// File name of the produced archive
    #[serde(default)]
    pub archive_file: Option<String>,
}

/// Distribute step payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributeOutput {
    /// Where the archive was uploaded to
    #[serde(default)]
    pub location: Option<String>,
}

/// Notify step payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyOutput {
    #[serde(default)]
    pub delivered_to: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_build_is_mandatory() {
        let mandatory: Vec<_> = StageKind::ALL
            .iter()
            .filter(|kind| kind.is_mandatory())
            .collect();
        assert_eq!(mandatory, vec![&StageKind::Build]);
    }

    #[test]
    fn test_stage_kind_serializes_lowercase() {
        let json = serde_json::to_string(&StageKind::Distribute).unwrap();
        assert_eq!(json, "\"distribute\"");
        let kind: StageKind = serde_json::from_str("\"notify\"").unwrap();
        assert_eq!(kind, StageKind::Notify);
    }

    #[test]
    fn test_stage_order() {
        assert!(StageKind::Source < StageKind::Build);
        assert!(StageKind::Distribute < StageKind::Notify);
    }
}
