pub mod acquire;
pub mod error;
pub mod loader;
pub mod service;

mod pix2pix;
mod util;

pub use diffusers::utils::DeviceSetup;
pub use error::EditError;
use image::DynamicImage;
pub use loader::*;
pub use pix2pix::{Pix2PixLoader, Pix2PixModel};
use serde::{Deserialize, Serialize};
pub use service::EditService;
pub(crate) use util::*;

// Define the request types.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct EditOptions {
    pub steps: usize,
    pub image_guidance_scale: f64,
    pub text_guidance_scale: f64,
    pub seed: Option<i64>,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self { steps: 20, image_guidance_scale: 1.5, text_guidance_scale: 7.0, seed: None }
    }
}

/// The image to edit arrives either as uploaded bytes or as a URL to fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Upload(Vec<u8>),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub instruction: String,
    pub source: ImageSource,
}

impl EditRequest {
    /// Builds a request from raw form fields, enforcing that exactly one
    /// image source is present. Empty field values count as absent.
    pub fn new(
        instruction: String,
        file: Option<Vec<u8>>,
        url: Option<String>,
    ) -> Result<Self, EditError> {
        let file = file.filter(|bytes| !bytes.is_empty());
        let url = url.filter(|url| !url.is_empty());
        let source = match (file, url) {
            (Some(bytes), None) => ImageSource::Upload(bytes),
            (None, Some(url)) => ImageSource::Url(url),
            _ => {
                return Err(EditError::Validation(
                    "Please provide either an image file or a URL, but not both.".to_string(),
                ))
            }
        };
        Ok(Self { instruction, source })
    }
}

pub trait Editor: Send {
    fn edit(
        &mut self,
        image: &DynamicImage,
        instruction: &str,
        options: &EditOptions,
    ) -> Result<DynamicImage, EditError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_deployment_values() {
        let options = EditOptions::default();
        assert_eq!(options.steps, 20);
        assert_eq!(options.image_guidance_scale, 1.5);
        assert_eq!(options.text_guidance_scale, 7.0);
        assert_eq!(options.seed, None);
    }

    #[test]
    fn request_accepts_a_single_upload() {
        let request = EditRequest::new("add a hat".to_string(), Some(vec![1, 2, 3]), None).unwrap();
        assert_eq!(request.source, ImageSource::Upload(vec![1, 2, 3]));
    }

    #[test]
    fn request_accepts_a_single_url() {
        let request =
            EditRequest::new("add a hat".to_string(), None, Some("http://x/y.png".to_string()))
                .unwrap();
        assert_eq!(request.source, ImageSource::Url("http://x/y.png".to_string()));
    }

    #[test]
    fn request_rejects_both_sources() {
        let err = EditRequest::new(
            "add a hat".to_string(),
            Some(vec![1]),
            Some("http://x/y.png".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, EditError::Validation(_)));
        assert_eq!(
            err.to_string(),
            "Please provide either an image file or a URL, but not both."
        );
    }

    #[test]
    fn request_rejects_missing_source() {
        let err = EditRequest::new("add a hat".to_string(), None, None).unwrap_err();
        assert!(matches!(err, EditError::Validation(_)));
    }

    #[test]
    fn request_treats_empty_fields_as_absent() {
        let err =
            EditRequest::new("add a hat".to_string(), None, Some(String::new())).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Please provide either an image file or a URL, but not both."
        );

        let request = EditRequest::new(
            "add a hat".to_string(),
            Some(vec![1, 2, 3]),
            Some(String::new()),
        )
        .unwrap();
        assert_eq!(request.source, ImageSource::Upload(vec![1, 2, 3]));

        let request = EditRequest::new(
            "add a hat".to_string(),
            Some(Vec::new()),
            Some("http://x/y.png".to_string()),
        )
        .unwrap();
        assert_eq!(request.source, ImageSource::Url("http://x/y.png".to_string()));
    }
}
