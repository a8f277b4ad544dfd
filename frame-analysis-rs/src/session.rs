//! Multi-frame analysis with context accumulated across frames.
//!
//! Frames run strictly in order. Before each frame the session renders the
//! clues gathered from the frames before it into the frame's context, and
//! after the frame it folds the new clues in. A frame never sees clues from
//! itself or from later frames.

use std::collections::VecDeque;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::ContextCaps;
use crate::error::{AnalysisError, Result};
use crate::geo_merge::{merge_geolocation, GeoObservation, MergedGeolocation};
use crate::image::ImageInput;
use crate::orchestrator::{excerpt, Orchestrator};
use crate::report::AnalysisReport;
use crate::schema::{TaskKind, TaskPayload};

/// Narratives at or below this length carry no useful clue
const MIN_CLUE_CHARS: usize = 10;
const TEXT_SNIPPET_CHARS: usize = 200;
const OBJECT_MENTION_CHARS: usize = 150;
const SUMMARY_CLUES: usize = 10;

/// One image of a sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub image: String,
    pub description: Option<String>,
}

impl Frame {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Options of a multi-frame run
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceOptions {
    /// Feed clues from earlier frames into later frames' context
    pub accumulate_context: bool,
    /// Tasks run on every frame
    pub tasks: Vec<TaskKind>,
    /// Caller context prepended to every frame's context
    pub context: String,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            accumulate_context: true,
            tasks: TaskKind::ALL.to_vec(),
            context: String::new(),
        }
    }
}

/// Bounded rolling lists of clues gathered so far
#[derive(Debug, Clone, PartialEq)]
pub struct FrameContext {
    caps: ContextCaps,
    geo_clues: VecDeque<String>,
    text_snippets: VecDeque<String>,
    object_mentions: VecDeque<String>,
}

fn push_bounded(list: &mut VecDeque<String>, cap: usize, item: String) {
    if cap == 0 || list.iter().any(|existing| existing.eq_ignore_ascii_case(&item)) {
        return;
    }
    while list.len() >= cap {
        list.pop_front();
    }
    list.push_back(item);
}

impl FrameContext {
    pub fn new(caps: ContextCaps) -> Self {
        Self {
            caps,
            geo_clues: VecDeque::new(),
            text_snippets: VecDeque::new(),
            object_mentions: VecDeque::new(),
        }
    }

    pub fn add_geo_clue(&mut self, clue: impl Into<String>) {
        push_bounded(&mut self.geo_clues, self.caps.geo_clues, clue.into());
    }

    pub fn add_text_snippet(&mut self, snippet: impl Into<String>) {
        push_bounded(&mut self.text_snippets, self.caps.text_snippets, snippet.into());
    }

    pub fn add_object_mention(&mut self, mention: impl Into<String>) {
        push_bounded(&mut self.object_mentions, self.caps.object_mentions, mention.into());
    }

    pub fn geo_clues(&self) -> Vec<String> {
        self.geo_clues.iter().cloned().collect()
    }

    pub fn text_snippets(&self) -> Vec<String> {
        self.text_snippets.iter().cloned().collect()
    }

    pub fn object_mentions(&self) -> Vec<String> {
        self.object_mentions.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.geo_clues.is_empty() && self.text_snippets.is_empty() && self.object_mentions.is_empty()
    }

    /// Context block handed to the next frame, empty when nothing is known
    pub fn render(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut out = String::from("Context from previous frames:");
        let sections = [
            ("Location clues", &self.geo_clues),
            ("Text seen", &self.text_snippets),
            ("Objects seen", &self.object_mentions),
        ];
        for (label, list) in sections {
            if !list.is_empty() {
                let items: Vec<&str> = list.iter().map(String::as_str).collect();
                let _ = write!(out, "\n{}: {}", label, items.join("; "));
            }
        }
        out
    }

    /// Fold the clues of frame `frame` (1-based) into the context
    pub fn absorb(&mut self, frame: usize, report: &AnalysisReport) {
        for result in report.tasks.values() {
            let Some(success) = result.success() else {
                continue;
            };
            let narrative = success.narrative.trim();

            match success.payload {
                TaskPayload::Geolocation(ref geo) => {
                    for clue in &geo.key_clues {
                        self.add_geo_clue(clue.trim());
                    }
                }
                TaskPayload::TextExtraction(ref text) => {
                    if text.has_text && narrative.chars().count() > MIN_CLUE_CHARS {
                        self.add_text_snippet(format!(
                            "Frame {}: {}",
                            frame,
                            excerpt(narrative, TEXT_SNIPPET_CHARS)
                        ));
                    }
                }
                TaskPayload::ObjectDetection(_) => {
                    if narrative.chars().count() > MIN_CLUE_CHARS {
                        self.add_object_mention(excerpt(narrative, OBJECT_MENTION_CHARS));
                    }
                }
                TaskPayload::Vision(_) => {}
            }
        }
    }
}

/// Result of one frame inside a sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    /// 1-based position in the sequence
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Exact context string the frame was analyzed with
    pub context: String,
    /// Location clues available to this frame
    pub clues_available: Vec<String>,
    pub report: AnalysisReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiFrameReport {
    pub frames: Vec<FrameReport>,
    pub merged_geolocation: MergedGeolocation,
    pub summary: String,
    pub total_frames: usize,
    pub context_accumulation_enabled: bool,
}

/// Sequential driver over the single-frame orchestrator
pub struct MultiFrameSession<'a> {
    orchestrator: &'a Orchestrator,
    options: SequenceOptions,
}

impl<'a> MultiFrameSession<'a> {
    pub fn new(orchestrator: &'a Orchestrator, options: SequenceOptions) -> Self {
        Self { orchestrator, options }
    }

    /// Validate every frame up front, then analyze them in order
    pub async fn run(&self, frames: &[Frame]) -> Result<MultiFrameReport> {
        let settings = self.orchestrator.settings();
        let max_frames = settings.max_frames;

        if frames.len() < 2 {
            return Err(AnalysisError::validation(format!(
                "a sequence needs at least 2 frames, got {}",
                frames.len()
            )));
        }
        if frames.len() > max_frames {
            return Err(AnalysisError::validation(format!(
                "a sequence allows at most {} frames, got {}",
                max_frames,
                frames.len()
            )));
        }
        if self.options.tasks.is_empty() {
            return Err(AnalysisError::validation("at least one task must be requested"));
        }

        let inputs = frames
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                ImageInput::parse(&frame.image, settings.max_image_bytes)
                    .map_err(|e| AnalysisError::validation(format!("frame {}: {}", i + 1, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let session_id = Uuid::new_v4();
        let span = info_span!("sequence", %session_id, frames = frames.len());

        async move {
            let total = frames.len();
            let mut context = FrameContext::new(settings.context_caps);
            let mut reports = Vec::with_capacity(total);

            for (i, (frame, input)) in frames.iter().zip(&inputs).enumerate() {
                let index = i + 1;
                let frame_context = self.frame_context(index, total, frame, &context);
                let clues_available = context.geo_clues();

                debug!(frame = index, clues = clues_available.len(), "Analyzing frame");
                let report = self
                    .orchestrator
                    .analyze_input(input, &frame_context, &self.options.tasks)
                    .await?;

                context.absorb(index, &report);

                reports.push(FrameReport {
                    index,
                    description: frame.description.clone(),
                    context: frame_context,
                    clues_available,
                    report,
                });
            }

            let observations: Vec<GeoObservation> = reports
                .iter()
                .filter_map(|frame| {
                    let success = frame.report.get(TaskKind::Geolocation)?.success()?;
                    let payload = success.payload.as_geolocation()?;
                    Some(GeoObservation {
                        frame: frame.index,
                        payload: payload.clone(),
                        confidence: success.confidence,
                    })
                })
                .collect();

            let merged = merge_geolocation(&observations, &settings.geo_thresholds);
            let summary = render_summary(&reports, &merged);

            info!(
                frames = total,
                clues = merged.total_clues_found,
                confidence = %merged.confidence,
                "Sequence finished"
            );

            Ok::<_, AnalysisError>(MultiFrameReport {
                frames: reports,
                merged_geolocation: merged,
                summary,
                total_frames: total,
                context_accumulation_enabled: self.options.accumulate_context,
            })
        }
        .instrument(span)
        .await
    }

    fn frame_context(&self, index: usize, total: usize, frame: &Frame, accumulated: &FrameContext) -> String {
        let mut out = String::new();

        let base = self.options.context.trim();
        if !base.is_empty() {
            out.push_str(base);
            out.push_str("\n\n");
        }

        let _ = write!(out, "Frame {} of {}", index, total);
        if let Some(ref description) = frame.description {
            let _ = write!(out, ": {}", description.trim());
        }

        if self.options.accumulate_context {
            let rendered = accumulated.render();
            if !rendered.is_empty() {
                out.push_str("\n\n");
                out.push_str(&rendered);
            }
        }

        out
    }
}

impl Orchestrator {
    /// Analyze a sequence with default options
    pub async fn analyze_sequence(&self, frames: &[Frame]) -> Result<MultiFrameReport> {
        self.analyze_sequence_with(frames, SequenceOptions::default()).await
    }

    /// Analyze a sequence with explicit options
    pub async fn analyze_sequence_with(&self, frames: &[Frame], options: SequenceOptions) -> Result<MultiFrameReport> {
        MultiFrameSession::new(self, options).run(frames).await
    }
}

fn render_summary(frames: &[FrameReport], merged: &MergedGeolocation) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Multi-frame analysis of {} frames", frames.len());

    match merged.most_likely_location {
        Some(ref location) => {
            let _ = writeln!(
                out,
                "Most likely location: {} (confidence: {}, supported by {} frame(s))",
                location, merged.confidence, merged.supporting_frames
            );
        }
        None => {
            let _ = writeln!(out, "Location could not be determined (confidence: {})", merged.confidence);
        }
    }

    let _ = writeln!(out, "Clues found: {}", merged.total_clues_found);
    for clue in merged.combined_clues.iter().take(SUMMARY_CLUES) {
        let _ = writeln!(out, "- {}", clue);
    }

    for frame in frames {
        let statuses: Vec<String> = frame
            .report
            .tasks
            .iter()
            .map(|(kind, result)| format!("{}={}", kind, result.status()))
            .collect();
        let _ = writeln!(out, "Frame {}: {}", frame.index, statuses.join(", "));
    }

    out.trim_end().to_string()
}
