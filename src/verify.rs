use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::err::Error;

/// Distance reported when the model cannot produce a verdict.
pub const MAX_DISTANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceMatch {
    pub matched: bool,
    pub distance: f64,
}

/// The external face-comparison capability. Implementations may fail; the
/// wrapper around them may not.
pub trait FaceModel: Send + Sync + 'static {
    fn compare(&self, reference: &Path, probe: &Path) -> anyhow::Result<FaceMatch>;
}

/// Fail-closed front of a [`FaceModel`]. Model faults (corrupt image, crashed
/// comparator, bad output) become `matched: false` at maximum distance, so a
/// malfunction can never read as a successful match. The model runs on the
/// blocking pool under a deadline; only a deadline breach surfaces as an
/// error, because a timeout is a policy abort rather than a verdict.
pub struct FaceVerifier {
    model: Arc<dyn FaceModel>,
    timeout: Duration,
}

impl FaceVerifier {
    pub fn new(model: impl FaceModel, timeout: Duration) -> Self {
        Self {
            model: Arc::new(model),
            timeout,
        }
    }

    pub async fn verify(&self, reference: PathBuf, probe: PathBuf) -> Result<FaceMatch, Error> {
        let model = Arc::clone(&self.model);
        let task = tokio::task::spawn_blocking(move || model.compare(&reference, &probe));
        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(Error::VerificationTimeout {
                message: format!(
                    "face comparison exceeded {}s",
                    self.timeout.as_secs_f64()
                ),
            }),
            Ok(Err(join)) => {
                log::error!("face model task aborted: {}", join);
                Ok(Self::no_match())
            }
            Ok(Ok(Err(err))) => {
                log::warn!("face model failed, treating as mismatch: {:#}", err);
                Ok(Self::no_match())
            }
            Ok(Ok(Ok(verdict))) => Ok(verdict),
        }
    }

    fn no_match() -> FaceMatch {
        FaceMatch {
            matched: false,
            distance: MAX_DISTANCE,
        }
    }
}

/// Runs a configured comparator process with the two image paths and reads
/// `{"verified": bool, "distance": f64}` from its stdout.
pub struct CommandModel {
    program: String,
}

#[derive(Debug, Deserialize)]
struct CommandVerdict {
    verified: bool,
    distance: f64,
}

impl CommandModel {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl FaceModel for CommandModel {
    fn compare(&self, reference: &Path, probe: &Path) -> anyhow::Result<FaceMatch> {
        let output = Command::new(&self.program)
            .arg(reference)
            .arg(probe)
            .output()
            .with_context(|| format!("spawning comparator `{}`", self.program))?;
        if !output.status.success() {
            bail!("comparator `{}` exited with {}", self.program, output.status);
        }
        let verdict: CommandVerdict =
            serde_json::from_slice(&output.stdout).context("parsing comparator output")?;
        Ok(FaceMatch {
            matched: verdict.verified,
            distance: verdict.distance,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct FixedModel(pub FaceMatch);

    impl FaceModel for FixedModel {
        fn compare(&self, _: &Path, _: &Path) -> anyhow::Result<FaceMatch> {
            Ok(self.0)
        }
    }

    pub(crate) struct BrokenModel;

    impl FaceModel for BrokenModel {
        fn compare(&self, _: &Path, _: &Path) -> anyhow::Result<FaceMatch> {
            bail!("embedding backend crashed")
        }
    }

    struct SlowModel(Duration);

    impl FaceModel for SlowModel {
        fn compare(&self, _: &Path, _: &Path) -> anyhow::Result<FaceMatch> {
            std::thread::sleep(self.0);
            Ok(FaceMatch {
                matched: true,
                distance: 0.1,
            })
        }
    }

    fn paths() -> (PathBuf, PathBuf) {
        (PathBuf::from("ref.jpg"), PathBuf::from("probe.jpg"))
    }

    #[tokio::test]
    async fn passes_through_model_verdict() {
        let verifier = FaceVerifier::new(
            FixedModel(FaceMatch {
                matched: true,
                distance: 0.27,
            }),
            Duration::from_secs(5),
        );
        let (r, p) = paths();
        let verdict = verifier.verify(r, p).await.unwrap();
        assert!(verdict.matched);
        assert_eq!(verdict.distance, 0.27);
    }

    #[tokio::test]
    async fn model_failure_is_a_mismatch_not_an_error() {
        let verifier = FaceVerifier::new(BrokenModel, Duration::from_secs(5));
        let (r, p) = paths();
        let verdict = verifier.verify(r, p).await.unwrap();
        assert!(!verdict.matched);
        assert_eq!(verdict.distance, MAX_DISTANCE);
    }

    #[tokio::test]
    async fn deadline_breach_reports_timeout() {
        let verifier = FaceVerifier::new(
            SlowModel(Duration::from_millis(300)),
            Duration::from_millis(30),
        );
        let (r, p) = paths();
        assert!(matches!(
            verifier.verify(r, p).await,
            Err(Error::VerificationTimeout { .. })
        ));
    }
}
