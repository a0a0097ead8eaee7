//! Immutable, versioned stage outputs.
//!
//! An [`Artifact`] is created by a task executor on success and is never
//! mutated afterwards; a revision produces a new artifact with the next
//! revision number that replaces the old one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{MetricsSnapshot, StageId, Timestamp};

/// Output of one stage run, with the metadata needed to audit how it was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact<T> {
    stage: StageId,
    revision: u32,
    created_at: Timestamp,
    metrics: MetricsSnapshot,
    payload: T,
}

impl<T> Artifact<T> {
    /// First artifact for a stage (revision 1).
    pub fn first(stage: StageId, payload: T, metrics: MetricsSnapshot) -> Self {
        Self {
            stage,
            revision: 1,
            created_at: Timestamp::now(),
            metrics,
            payload,
        }
    }

    /// Successor of `prior`, for the same stage, at `prior.revision() + 1`.
    pub fn revision_of<U>(prior: &Artifact<U>, payload: T, metrics: MetricsSnapshot) -> Self {
        Self {
            stage: prior.stage,
            revision: prior.revision + 1,
            created_at: Timestamp::now(),
            metrics,
            payload,
        }
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Metrics of the run that produced this artifact.
    pub fn metrics(&self) -> &MetricsSnapshot {
        &self.metrics
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Same metadata, different payload representation.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Artifact<U> {
        Artifact {
            stage: self.stage,
            revision: self.revision,
            created_at: self.created_at,
            metrics: self.metrics,
            payload: f(self.payload),
        }
    }
}

impl<T: Serialize> Artifact<T> {
    /// Erases the payload type for storage alongside other stages' artifacts.
    pub fn to_json(&self) -> Result<Artifact<Value>, serde_json::Error> {
        let payload = serde_json::to_value(&self.payload)?;
        Ok(Artifact {
            stage: self.stage,
            revision: self.revision,
            created_at: self.created_at,
            metrics: self.metrics,
            payload,
        })
    }
}

impl Artifact<Value> {
    /// Recovers a typed payload from an erased artifact.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Artifact<T>, serde_json::Error> {
        let payload = T::deserialize(&self.payload)?;
        Ok(Artifact {
            stage: self.stage,
            revision: self.revision,
            created_at: self.created_at,
            metrics: self.metrics,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Draft {
        title: String,
    }

    #[test]
    fn revisions_are_monotonic_and_keep_the_stage() {
        let first = Artifact::first(
            StageId::Framing,
            Draft {
                title: "v1".into(),
            },
            MetricsSnapshot::default(),
        );
        let second = Artifact::revision_of(
            &first,
            Draft {
                title: "v2".into(),
            },
            MetricsSnapshot::default(),
        );
        assert_eq!(first.revision(), 1);
        assert_eq!(second.revision(), 2);
        assert_eq!(second.stage(), StageId::Framing);
        assert!(second.created_at() >= first.created_at());
        assert_eq!(first.payload().title, "v1");
    }

    #[test]
    fn erased_artifacts_decode_back_to_their_payload() {
        let typed = Artifact::first(
            StageId::SurveyDesign,
            Draft {
                title: "Survey".into(),
            },
            MetricsSnapshot::default(),
        );
        let erased = typed.to_json().unwrap();
        assert_eq!(erased.payload()["title"], "Survey");
        let back: Artifact<Draft> = erased.decode().unwrap();
        assert_eq!(back, typed);
    }
}
