//! Typed views of a completed job's `result` object.
//!
//! Each [`Operation`](crate::Operation) names the shape it produces through
//! [`ResultKind`]; [`Operation::parse_result`](crate::Operation::parse_result)
//! picks the matching type. Fields the types do not model stay reachable in
//! `extra`.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::JobResponse;

/// Result of the image editing operations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageResult {
    pub image_url: String,
    /// Sent by generative edits such as background replacement.
    pub seed: Option<i64>,
    pub refined_prompt: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of image generation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedImageResult {
    pub image_url: String,
    pub seed: Option<i64>,
    /// The structured prompt the image was generated from.
    pub structured_prompt: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of structured prompt generation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructuredPromptResult {
    pub seed: i64,
    pub structured_prompt: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of the video editing and generation operations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoResult {
    pub video_url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of video segmentation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MaskResult {
    pub mask_url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Which result type an operation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Image,
    GeneratedImage,
    StructuredPrompt,
    Video,
    Mask,
}

impl ResultKind {
    /// Deserialize the response's result as this kind. `Ok(None)` when the
    /// response has no result.
    pub fn parse(self, response: &JobResponse) -> serde_json::Result<Option<OperationResult>> {
        Ok(match self {
            Self::Image => response.result_as()?.map(OperationResult::Image),
            Self::GeneratedImage => response.result_as()?.map(OperationResult::GeneratedImage),
            Self::StructuredPrompt => response.result_as()?.map(OperationResult::StructuredPrompt),
            Self::Video => response.result_as()?.map(OperationResult::Video),
            Self::Mask => response.result_as()?.map(OperationResult::Mask),
        })
    }
}

/// A result decoded according to its operation's [`ResultKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Image(ImageResult),
    GeneratedImage(GeneratedImageResult),
    StructuredPrompt(StructuredPromptResult),
    Video(VideoResult),
    Mask(MaskResult),
}

impl OperationResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Image(_) => ResultKind::Image,
            Self::GeneratedImage(_) => ResultKind::GeneratedImage,
            Self::StructuredPrompt(_) => ResultKind::StructuredPrompt,
            Self::Video(_) => ResultKind::Video,
            Self::Mask(_) => ResultKind::Mask,
        }
    }

    /// URL of the produced file, for the kinds that produce one. Pass it to
    /// `wait_for_file` before downloading.
    pub fn file_url(&self) -> Option<&str> {
        match self {
            Self::Image(r) => Some(&r.image_url),
            Self::GeneratedImage(r) => Some(&r.image_url),
            Self::StructuredPrompt(_) => None,
            Self::Video(r) => Some(&r.video_url),
            Self::Mask(r) => Some(&r.mask_url),
        }
    }
}
