use serde::{Deserialize, Serialize};

/// One finalized (or interim) transcript chunk.
///
/// `seq` is dense per event starting at 1 and is only ever assigned to
/// finalized chunks; interim chunks carry the seq they will finalize as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub seq: u64,
    /// Capture timestamp, unix millis.
    pub at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
    /// Durable row id once persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_id: Option<String>,
}

impl TranscriptChunk {
    /// Render as a `[speaker] text` context bullet line.
    pub fn bullet(&self) -> String {
        match self.speaker.as_deref() {
            Some(s) if !s.is_empty() => format!("[{s}] {}", self.text),
            _ => self.text.clone(),
        }
    }
}

/// Metadata carried between an audio append and the transcript the
/// provider eventually emits for it.
#[derive(Debug, Clone, Default)]
pub struct PendingTranscriptMeta {
    pub speaker: Option<String>,
    pub encoding: Option<String>,
    pub sample_rate: Option<u32>,
    pub duration_ms: Option<u64>,
    /// Caller-assigned seq, if any; otherwise the processor assigns one.
    pub seq: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullet_includes_speaker_when_present() {
        let chunk = TranscriptChunk {
            seq: 1,
            at_ms: 0,
            speaker: Some("Ana".into()),
            text: "hello".into(),
            is_final: true,
            transcript_id: None,
        };
        assert_eq!(chunk.bullet(), "[Ana] hello");
    }

    #[test]
    fn bullet_omits_empty_speaker() {
        let chunk = TranscriptChunk {
            seq: 1,
            at_ms: 0,
            speaker: Some(String::new()),
            text: "hello".into(),
            is_final: true,
            transcript_id: None,
        };
        assert_eq!(chunk.bullet(), "hello");
    }
}
