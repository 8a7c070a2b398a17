//! Media sinks
//!
//! The session only forwards media: RTP payloads go through a
//! [`MediaDecoder`] supplied by the codec stack, and whatever it produces is
//! handed to the [`VideoSink`] or [`AudioPlayout`] attached for that
//! participant.

pub mod audio;
pub mod video;

pub use audio::AudioPlayout;
pub use video::{VideoFrame, VideoSink};

use crate::peer::TrackKind;
use std::sync::Arc;

/// Output of a decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMedia {
    Video(VideoFrame),
    /// Interleaved stereo PCM at 48 kHz
    Audio(Vec<i16>),
}

/// Turns RTP payloads into frames or samples
///
/// Implemented by the codec collaborator. Called once per RTP packet from the
/// track reader; returning `None` means "nothing complete yet".
pub trait MediaDecoder: Send + Sync {
    fn decode(&self, kind: TrackKind, payload: &[u8]) -> Option<DecodedMedia>;
}

/// Decoder that discards every packet
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDecoder;

impl MediaDecoder for NullDecoder {
    fn decode(&self, _kind: TrackKind, _payload: &[u8]) -> Option<DecodedMedia> {
        None
    }
}

/// Where one participant's media ends up
#[derive(Clone)]
pub struct MediaSinks {
    pub video: Option<Arc<dyn VideoSink>>,
    pub audio: Option<Arc<AudioPlayout>>,
    pub decoder: Arc<dyn MediaDecoder>,
}

impl MediaSinks {
    pub fn new(decoder: Arc<dyn MediaDecoder>) -> Self {
        Self {
            video: None,
            audio: None,
            decoder,
        }
    }

    pub fn with_video(mut self, sink: Arc<dyn VideoSink>) -> Self {
        self.video = Some(sink);
        self
    }

    pub fn with_audio(mut self, playout: Arc<AudioPlayout>) -> Self {
        self.audio = Some(playout);
        self
    }

    /// Decode one RTP payload and deliver the result
    pub fn handle_payload(&self, kind: TrackKind, payload: &[u8]) {
        if let Some(decoded) = self.decoder.decode(kind, payload) {
            self.deliver(decoded);
        }
    }

    pub fn deliver(&self, media: DecodedMedia) {
        match media {
            DecodedMedia::Video(frame) => {
                if let Some(sink) = &self.video {
                    sink.on_frame(&frame);
                }
            }
            DecodedMedia::Audio(pcm) => {
                if let Some(playout) = &self.audio {
                    playout.push(&pcm);
                }
            }
        }
    }
}

impl Default for MediaSinks {
    fn default() -> Self {
        Self::new(Arc::new(NullDecoder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Video payloads become 1x1 frames, audio payloads become one sample per byte
    struct ByteDecoder;

    impl MediaDecoder for ByteDecoder {
        fn decode(&self, kind: TrackKind, payload: &[u8]) -> Option<DecodedMedia> {
            match kind {
                TrackKind::Video => Some(DecodedMedia::Video(VideoFrame::black(1, 1))),
                TrackKind::Audio => Some(DecodedMedia::Audio(
                    payload.iter().map(|b| *b as i16).collect(),
                )),
            }
        }
    }

    #[test]
    fn test_payloads_reach_sinks() {
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);
        let playout = Arc::new(AudioPlayout::new());

        let sinks = MediaSinks::new(Arc::new(ByteDecoder))
            .with_video(Arc::new(move |_: &VideoFrame| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .with_audio(Arc::clone(&playout));

        sinks.handle_payload(TrackKind::Video, &[0xAA]);
        sinks.handle_payload(TrackKind::Audio, &[1, 2]);

        assert_eq!(frames.load(Ordering::SeqCst), 1);
        let mut out = [0i16; 2];
        assert_eq!(playout.fill(&mut out), 2);
        assert_eq!(out, [1, 2]);
    }

    #[test]
    fn test_null_decoder_drops_everything() {
        let playout = Arc::new(AudioPlayout::new());
        let sinks = MediaSinks::default().with_audio(Arc::clone(&playout));
        sinks.handle_payload(TrackKind::Audio, &[1, 2, 3]);
        assert_eq!(playout.buffered(), 0);
    }
}
