// MIDI output from event trees.
//
// Converts a simultaneous event (usually `Composition::to_simultaneous()`)
// into a Standard MIDI File for playback. Every sequential track found in the
// tree becomes one MIDI track, named after the nearest tag. Beats map to
// quarter notes; exact durations are rounded onto the tick grid only here.
// Rests and control spans only advance time.
//
// Uses the `midly` crate for MIDI writing. Output is SMF Format 1 (multi-track).

use crate::duration::Duration;
use crate::event::{Event, SimpleKind, SimultaneousEvent};
use midly::{
    Format, Header, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;
use tracing::debug;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

/// General MIDI percussion channel, skipped for pitched tracks.
const DRUM_CHANNEL: u8 = 9;

/// Largest value a tempo meta event can carry (24 bits).
const MAX_TEMPO_MICROSECONDS: u32 = 0xFF_FFFF;

/// Convert an event tree to MIDI and write it to a file.
pub fn write_midi(piece: &SimultaneousEvent, tempo_bpm: u16, path: &Path) -> std::io::Result<()> {
    let smf = piece_to_smf(piece, tempo_bpm);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    std::fs::write(path, &buf)?;
    debug!(path = %path.display(), tracks = smf.tracks.len(), bytes = buf.len(), "wrote midi");
    Ok(())
}

/// A run of leaves that becomes one MIDI track.
struct Voice<'a> {
    name: Option<&'a str>,
    start: Duration,
    event: &'a Event,
}

fn collect_voices<'a>(event: &'a Event, start: Duration, name: Option<&'a str>, out: &mut Vec<Voice<'a>>) {
    match event {
        Event::Simultaneous(sim) => {
            let name = sim.tag.as_deref().or(name);
            for child in &sim.events {
                collect_voices(child, start.clone(), name, out);
            }
        }
        _ => out.push(Voice {
            name: event.tag().or(name),
            start,
            event,
        }),
    }
}

fn channel_for(index: usize) -> u4 {
    let channel = (index % 15) as u8;
    u4::new(if channel >= DRUM_CHANNEL { channel + 1 } else { channel })
}

fn ticks(at: &Duration) -> u32 {
    at.to_ticks(TICKS_PER_QUARTER as u32).clamp(0, u32::MAX as i64) as u32
}

/// Microseconds per quarter note. Tempos below 4 bpm do not fit in a tempo
/// event and are clamped to the slowest one that does.
fn tempo_microseconds(tempo_bpm: u16) -> u32 {
    (60_000_000 / tempo_bpm.max(1) as u32).min(MAX_TEMPO_MICROSECONDS)
}

/// Convert an event tree to an in-memory SMF.
fn piece_to_smf(piece: &SimultaneousEvent, tempo_bpm: u16) -> Smf<'_> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // Track 0: tempo track
    let mut tempo_track: Track<'_> = Vec::new();
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(midly::MetaMessage::Tempo(u24::new(tempo_microseconds(tempo_bpm)))),
    });
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(midly::MetaMessage::EndOfTrack),
    });
    smf.tracks.push(tempo_track);

    let mut voices = Vec::new();
    for child in &piece.events {
        collect_voices(child, Duration::zero(), piece.tag.as_deref(), &mut voices);
    }

    for (index, voice) in voices.iter().enumerate() {
        let channel = channel_for(index);
        let mut track: Track<'_> = Vec::new();

        if let Some(name) = voice.name {
            track.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(midly::MetaMessage::TrackName(name.as_bytes())),
            });
        }

        // (tick, is_on, pitch, velocity); note-offs sort before note-ons at
        // the same tick so repeated pitches re-attack cleanly.
        let mut messages: Vec<(u32, bool, u8, u8)> = Vec::new();
        voice.event.for_each_leaf(voice.start.clone(), &mut |at, leaf| {
            if let SimpleKind::Note { pitch, velocity } = leaf.kind {
                let on = ticks(&at);
                let off = ticks(&(&at + &leaf.duration));
                if off > on {
                    messages.push((on, true, pitch, velocity));
                    messages.push((off, false, pitch, 0));
                }
            }
        });
        messages.sort_unstable();

        let mut last_event_tick: u32 = 0;
        for (tick, is_on, pitch, velocity) in messages {
            let message = if is_on {
                MidiMessage::NoteOn {
                    key: u7::new(pitch.min(127)),
                    vel: u7::new(velocity.min(127)),
                }
            } else {
                MidiMessage::NoteOff {
                    key: u7::new(pitch.min(127)),
                    vel: u7::new(0),
                }
            };
            track.push(TrackEvent {
                delta: u28::new(tick - last_event_tick),
                kind: TrackEventKind::Midi { channel, message },
            });
            last_event_tick = tick;
        }

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(midly::MetaMessage::EndOfTrack),
        });

        smf.tracks.push(track);
    }

    smf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{SequentialEvent, SimpleEvent};

    fn note_ons(track: &Track<'_>) -> Vec<(u32, u8)> {
        let mut now = 0;
        let mut out = Vec::new();
        for event in track {
            now += event.delta.as_int();
            if let TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, .. },
                ..
            } = event.kind
            {
                out.push((now, key.as_int()));
            }
        }
        out
    }

    #[test]
    fn test_piece_to_smf_basic() {
        let melody = SequentialEvent::tagged(
            "melody",
            vec![
                SimpleEvent::note(60, Duration::from_integer(1)).into(),
                SimpleEvent::rest(Duration::new(1, 2)).into(),
                SimpleEvent::note(64, Duration::new(1, 2)).into(),
            ],
        );
        let control = SequentialEvent::tagged("control", vec![SimpleEvent::span(true, Duration::from_integer(2)).into()]);
        let piece = SimultaneousEvent::new(vec![melody.into(), control.into()]);

        let smf = piece_to_smf(&piece, 120);
        // 1 tempo track + 2 voice tracks
        assert_eq!(smf.tracks.len(), 3);
        assert_eq!(note_ons(&smf.tracks[1]), vec![(0, 60), (720, 64)]);
        assert!(note_ons(&smf.tracks[2]).is_empty());
    }

    #[test]
    fn nested_groups_become_separate_tracks() {
        let voice = |pitch| -> Event {
            SequentialEvent::new(vec![SimpleEvent::note(pitch, Duration::from_integer(1)).into()]).into()
        };
        let group = SimultaneousEvent::tagged("strings", vec![voice(60), voice(67)]);
        let piece = SimultaneousEvent::new(vec![group.into()]);
        let smf = piece_to_smf(&piece, 60);
        assert_eq!(smf.tracks.len(), 3);
        assert_eq!(
            smf.tracks[1][0].kind,
            TrackEventKind::Meta(midly::MetaMessage::TrackName(b"strings"))
        );
    }

    #[test]
    fn slow_tempos_are_clamped_into_the_tempo_event() {
        assert_eq!(tempo_microseconds(120), 500_000);
        assert_eq!(tempo_microseconds(4), 15_000_000);
        for bpm in [0, 1, 2, 3] {
            assert_eq!(tempo_microseconds(bpm), MAX_TEMPO_MICROSECONDS);
        }

        let piece = SimultaneousEvent::new(vec![
            SequentialEvent::new(vec![SimpleEvent::note(60, Duration::from_integer(1)).into()]).into(),
        ]);
        let smf = piece_to_smf(&piece, 1);
        assert_eq!(
            smf.tracks[0][0].kind,
            TrackEventKind::Meta(midly::MetaMessage::Tempo(u24::new(MAX_TEMPO_MICROSECONDS)))
        );
    }

    #[test]
    fn channels_skip_percussion() {
        assert_eq!(channel_for(8).as_int(), 8);
        assert_eq!(channel_for(9).as_int(), 10);
        assert_eq!(channel_for(14).as_int(), 15);
        assert_eq!(channel_for(15).as_int(), 0);
    }
}
