use std::path::{Path, PathBuf};

use async_trait::async_trait;
use courier_core::classify::{ImageJob, Prediction};
use courier_core::{Handler, ProcessError};

/// Demo model: checks the image is in the upload folder and labels it by
/// its file stem.
pub struct StemClassifier {
    upload_dir: PathBuf,
}

impl StemClassifier {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }
}

#[async_trait]
impl Handler for StemClassifier {
    type Input = ImageJob;
    type Output = Prediction;

    async fn handle(&self, job: ImageJob) -> Result<Prediction, ProcessError> {
        let name = Path::new(&job.image_name);
        // plain file names only; nothing outside the upload folder
        if name.file_name() != Some(name.as_os_str()) {
            return Err(ProcessError::InvalidPayload(format!(
                "not a plain file name: {}",
                job.image_name
            )));
        }

        let path = self.upload_dir.join(name);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ProcessError::failed(format!("{}: {e}", path.display())))?;
        if !exists {
            return Err(ProcessError::NotFound(path.display().to_string()));
        }

        let label = name
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| ProcessError::InvalidPayload(job.image_name.clone()))?;
        Ok(Prediction::new(label, 1.0))
    }
}
