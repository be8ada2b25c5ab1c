//! Request orchestration: validate, acquire, edit, persist.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use image::DynamicImage;
use uuid::Uuid;

use crate::{acquire, EditError, EditOptions, EditRequest, Editor, ImageSource};

/// Owns the one loaded model and the directory edited images are written to.
///
/// The model sits behind a mutex, so concurrent requests are served one edit
/// at a time instead of contending for the same weights.
pub struct EditService {
    editor: Arc<Mutex<dyn Editor>>,
    options: EditOptions,
    output_dir: PathBuf,
}

impl EditService {
    pub fn new(
        editor: Arc<Mutex<dyn Editor>>,
        options: EditOptions,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self { editor, options, output_dir: output_dir.into() }
    }

    /// Runs one edit end to end and returns the path of the freshly written
    /// PNG. Every request gets its own output file.
    pub async fn handle(
        &self,
        instruction: String,
        file: Option<Vec<u8>>,
        url: Option<String>,
    ) -> Result<PathBuf, EditError> {
        let request = EditRequest::new(instruction, file, url)?;
        let image = match &request.source {
            ImageSource::Upload(bytes) => {
                tracing::info!(bytes = bytes.len(), "decoding uploaded image");
                acquire::from_bytes(bytes)?
            }
            ImageSource::Url(url) => {
                tracing::info!(url, "downloading image");
                acquire::from_url(url).await?
            }
        };
        tracing::info!(instruction = %request.instruction, "editing image");
        let edited = self.edit(image, request.instruction).await?;
        self.persist(&edited)
    }

    async fn edit(
        &self,
        image: DynamicImage,
        instruction: String,
    ) -> Result<DynamicImage, EditError> {
        let editor = Arc::clone(&self.editor);
        let options = self.options;
        tokio::task::spawn_blocking(move || {
            // A panicked edit poisons the lock; the model itself holds no
            // half-written state, so later requests may keep using it.
            let mut editor = editor.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            editor.edit(&image, &instruction, &options)
        })
        .await
        .map_err(|join_error| EditError::Inference(anyhow::anyhow!(join_error)))?
    }

    fn persist(&self, image: &DynamicImage) -> Result<PathBuf, EditError> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;
        let path = self.output_dir.join(format!("edited-{}.png", Uuid::new_v4()));
        image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "edited image written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    struct MirrorEditor;

    impl Editor for MirrorEditor {
        fn edit(
            &mut self,
            image: &DynamicImage,
            _instruction: &str,
            _options: &EditOptions,
        ) -> Result<DynamicImage, EditError> {
            Ok(image.fliph())
        }
    }

    fn service(editor: impl Editor + 'static) -> EditService {
        let output_dir = std::env::temp_dir().join(format!("pixie-service-{}", Uuid::new_v4()));
        EditService::new(Arc::new(Mutex::new(editor)), EditOptions::default(), output_dir)
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 9, 9])));
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
        bytes
    }

    #[tokio::test]
    async fn writes_the_edited_image_as_png() {
        let path = service(MirrorEditor)
            .handle("mirror it".to_string(), Some(png_bytes(48, 32)), None)
            .await
            .unwrap();
        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (48, 32));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
    }

    #[tokio::test]
    async fn each_request_gets_its_own_output_file() {
        let service = service(MirrorEditor);
        let bytes = png_bytes(32, 32);
        let first = service.handle("a".to_string(), Some(bytes.clone()), None).await.unwrap();
        let second = service.handle("b".to_string(), Some(bytes), None).await.unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[tokio::test]
    async fn rejects_requests_with_two_sources() {
        let err = service(MirrorEditor)
            .handle(
                "mirror it".to_string(),
                Some(png_bytes(32, 32)),
                Some("http://localhost/cat.png".to_string()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_requests_with_no_source() {
        let err = service(MirrorEditor)
            .handle("mirror it".to_string(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_uploads_that_do_not_decode() {
        let err = service(MirrorEditor)
            .handle("mirror it".to_string(), Some(b"not an image".to_vec()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::InvalidImage));
    }

    struct FlakyEditor {
        calls: usize,
    }

    impl Editor for FlakyEditor {
        fn edit(
            &mut self,
            image: &DynamicImage,
            _instruction: &str,
            _options: &EditOptions,
        ) -> Result<DynamicImage, EditError> {
            self.calls += 1;
            if self.calls == 1 {
                panic!("libtorch aborted");
            }
            Ok(image.fliph())
        }
    }

    #[tokio::test]
    async fn keeps_serving_after_a_panicked_edit() {
        let service = service(FlakyEditor { calls: 0 });
        let err = service
            .handle("mirror it".to_string(), Some(png_bytes(32, 32)), None)
            .await
            .unwrap_err();
        assert!(!err.is_client_error());

        let path = service
            .handle("mirror it".to_string(), Some(png_bytes(32, 32)), None)
            .await
            .unwrap();
        assert!(path.exists());
    }
}
