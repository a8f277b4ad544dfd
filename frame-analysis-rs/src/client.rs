//! The seam to the external multimodal reasoning service.

use async_trait::async_trait;
use resilience::ServiceError;

use crate::schema::TaskKind;

/// A black-box service that answers a prompt about an image.
///
/// Callers bound each call with a deadline by dropping the returned future.
/// Dropping only stops waiting: a request already sent may still run to
/// completion on the remote side, and its answer is discarded.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Ask `prompt` about `image` (a base64 data URI) and return the
    /// narrative answer.
    async fn infer(&self, image: &str, prompt: &str) -> Result<String, ServiceError>;
}

/// Produces the prompt sent for a task
pub trait PromptBuilder: Send + Sync {
    fn build(&self, task: TaskKind, context: &str) -> String;
}

/// Prompts asking for the labelled lines the result parser understands
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrompts;

impl PromptBuilder for DefaultPrompts {
    fn build(&self, task: TaskKind, context: &str) -> String {
        let instructions = match task {
            TaskKind::Vision => {
                "Describe the scene in this image in one or two short paragraphs: \
                 setting, people, notable objects, weather and time of day. \
                 Finish with a line 'Confidence: <very low|low|medium|high|very high>'."
            }
            TaskKind::TextExtraction => {
                "Transcribe every piece of visible text in this image. Quote each \
                 snippet exactly, one per line. If there is no text, answer \
                 'No visible text detected.'"
            }
            TaskKind::ObjectDetection => {
                "List the distinct objects visible in this image as a bulleted list, \
                 one object per line, most prominent first."
            }
            TaskKind::Geolocation => {
                "Estimate where this image was taken. Answer with the lines \
                 'Country:', 'City:', 'District:', 'Street:' (use 'unknown' when \
                 unsure), 'Coordinates: <lat>, <lon>' if you can estimate them, \
                 'Confidence: <very low|low|medium|high|very high>', then \
                 'Key clues:' followed by up to five bullet points. Write clues \
                 that name a place component as key=value, for example \
                 'city=Lisbon'."
            }
        };

        let context = context.trim();
        if context.is_empty() {
            instructions.to_string()
        } else {
            format!("{}\n\nAdditional context:\n{}", instructions, context)
        }
    }
}
