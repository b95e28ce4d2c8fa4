//! Known engine operations.
//!
//! Each entry pairs an endpoint path (relative to `/v2/`) with the family it
//! belongs to and the result it produces; the family supplies polling
//! defaults. Pass [`Operation::path`] to `run`/`submit`,
//! [`Operation::poll_options`] to `poll`, and the finished response to
//! [`Operation::parse_result`].

use std::time::Duration;

use crate::models::JobResponse;
use crate::poller::PollOptions;
use crate::results::{OperationResult, ResultKind};

/// Groups of operations that share latency characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationFamily {
    ImageEditing,
    ImageGeneration,
    StructuredPrompt,
    VideoEditing,
    VideoGeneration,
    VideoSegmentation,
}

impl OperationFamily {
    /// Polling defaults for this family.
    ///
    /// Video jobs routinely run for minutes, so they poll less often and wait
    /// up to six minutes.
    pub fn poll_options(self) -> PollOptions {
        match self {
            Self::ImageEditing | Self::ImageGeneration | Self::StructuredPrompt => {
                PollOptions::default()
            }
            Self::VideoEditing | Self::VideoGeneration | Self::VideoSegmentation => {
                PollOptions::new(Duration::from_secs(5), Duration::from_secs(360))
            }
        }
    }

    /// The result every operation of this family produces.
    pub const fn result_kind(self) -> ResultKind {
        match self {
            Self::ImageEditing => ResultKind::Image,
            Self::ImageGeneration => ResultKind::GeneratedImage,
            Self::StructuredPrompt => ResultKind::StructuredPrompt,
            Self::VideoEditing | Self::VideoGeneration => ResultKind::Video,
            Self::VideoSegmentation => ResultKind::Mask,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub path: &'static str,
    pub family: OperationFamily,
    pub result: ResultKind,
}

impl Operation {
    pub const fn new(name: &'static str, path: &'static str, family: OperationFamily) -> Self {
        Self {
            name,
            path,
            family,
            result: family.result_kind(),
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        self.family.poll_options()
    }

    /// Decode a response's result as this operation's [`ResultKind`].
    pub fn parse_result(
        &self,
        response: &JobResponse,
    ) -> serde_json::Result<Option<OperationResult>> {
        self.result.parse(response)
    }
}

use OperationFamily::*;

pub const REMOVE_BACKGROUND: Operation =
    Operation::new("remove_background", "image/edit/remove_background", ImageEditing);
pub const REPLACE_BACKGROUND: Operation =
    Operation::new("replace_background", "image/edit/replace_background", ImageEditing);
pub const BLUR_BACKGROUND: Operation =
    Operation::new("blur_background", "image/edit/blur_background", ImageEditing);
pub const ERASE_FOREGROUND: Operation =
    Operation::new("erase_foreground", "image/edit/erase_foreground", ImageEditing);
pub const CROP_FOREGROUND: Operation =
    Operation::new("crop_foreground", "image/edit/crop_foreground", ImageEditing);
pub const ERASE: Operation = Operation::new("erase", "image/edit/erase", ImageEditing);
pub const GEN_FILL: Operation = Operation::new("gen_fill", "image/edit/gen_fill", ImageEditing);
pub const EXPAND_IMAGE: Operation = Operation::new("expand", "image/edit/expand", ImageEditing);
pub const ENHANCE_IMAGE: Operation = Operation::new("enhance", "image/edit/enhance", ImageEditing);
pub const INCREASE_RESOLUTION: Operation =
    Operation::new("increase_resolution", "image/edit/increase_resolution", ImageEditing);

pub const GENERATE_IMAGE: Operation = Operation::new("generate", "image/generate", ImageGeneration);
pub const GENERATE_IMAGE_LITE: Operation =
    Operation::new("generate_lite", "image/generate/lite", ImageGeneration);

pub const GENERATE_STRUCTURED_PROMPT: Operation =
    Operation::new("structured_prompt", "structured_prompt/generate", StructuredPrompt);
pub const GENERATE_STRUCTURED_PROMPT_LITE: Operation = Operation::new(
    "structured_prompt_lite",
    "structured_prompt/generate/lite",
    StructuredPrompt,
);

pub const VIDEO_REMOVE_BACKGROUND: Operation =
    Operation::new("video_remove_background", "video/edit/remove_background", VideoEditing);
pub const VIDEO_INCREASE_RESOLUTION: Operation = Operation::new(
    "video_increase_resolution",
    "video/edit/increase_resolution",
    VideoEditing,
);
pub const VIDEO_ERASE: Operation = Operation::new("video_erase", "video/edit/erase", VideoEditing);

pub const VIDEO_FROM_TAILORED_IMAGE: Operation = Operation::new(
    "video_from_tailored_image",
    "video/generate/tailored/image-to-video",
    VideoGeneration,
);
pub const VIDEO_FOREGROUND_MASK: Operation = Operation::new(
    "video_foreground_mask",
    "video/generate/foreground_mask",
    VideoGeneration,
);

pub const VIDEO_MASK_BY_PROMPT: Operation =
    Operation::new("mask_by_prompt", "video/segment/mask_by_prompt", VideoSegmentation);
pub const VIDEO_MASK_BY_KEY_POINTS: Operation = Operation::new(
    "mask_by_key_points",
    "video/segment/mask_by_key_points",
    VideoSegmentation,
);

/// Every known operation.
pub static OPERATIONS: &[Operation] = &[
    REMOVE_BACKGROUND,
    REPLACE_BACKGROUND,
    BLUR_BACKGROUND,
    ERASE_FOREGROUND,
    CROP_FOREGROUND,
    ERASE,
    GEN_FILL,
    EXPAND_IMAGE,
    ENHANCE_IMAGE,
    INCREASE_RESOLUTION,
    GENERATE_IMAGE,
    GENERATE_IMAGE_LITE,
    GENERATE_STRUCTURED_PROMPT,
    GENERATE_STRUCTURED_PROMPT_LITE,
    VIDEO_REMOVE_BACKGROUND,
    VIDEO_INCREASE_RESOLUTION,
    VIDEO_ERASE,
    VIDEO_FROM_TAILORED_IMAGE,
    VIDEO_FOREGROUND_MASK,
    VIDEO_MASK_BY_PROMPT,
    VIDEO_MASK_BY_KEY_POINTS,
];

/// Look an operation up by name.
pub fn find(name: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().find(|op| op.name == name)
}
