//! File playback integration tests
//!
//! Generated WAV files go through the real symphonia probe and decoder, the
//! rubato converter and, for the end-to-end case, the null output device.

mod helpers;

use dplay_audio::audio::{
    ChannelLayout, FileSource, NullDevice, PacketQueue, PlaybackClock, SampleFormatConverter,
};
use dplay_audio::playback::LifecycleState;
use dplay_audio::{AudioPlayer, DecodeResampleEngine};
use dplay_common::config::{AudioSettings, ResamplerQuality};
use dplay_common::events::{EventBus, PlayerEvent};
use dplay_common::status::{PlayerStatus, ThreadMode};
use helpers::{generate_silent_wav, generate_sine_wav};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Decode and convert every packet of `path`, returning the interleaved
/// output samples and the final clock value.
fn render(path: &std::path::Path) -> (Vec<i16>, f64, usize) {
    let source = FileSource::open(path).unwrap();
    let analysis = source.analyse(1152).unwrap();
    let frame_size = analysis.descriptor.frame_size;

    let packets = Arc::new(PacketQueue::new(0));
    let status = Arc::new(PlayerStatus::new());
    let fed = source.feed(&packets, &status);
    assert!(fed > 0);
    assert!(packets.is_closed());

    let converter =
        SampleFormatConverter::new(&analysis.descriptor, ResamplerQuality::Fast).unwrap();
    let clock = Arc::new(PlaybackClock::new());
    let mut engine = DecodeResampleEngine::new(
        analysis.decoder,
        converter,
        analysis.time_base,
        packets,
        status,
        Arc::clone(&clock),
    );

    let mut samples = Vec::new();
    loop {
        let buffer = engine.produce_next_buffer();
        if buffer.is_empty() {
            break;
        }
        samples.extend(
            buffer
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
    }
    assert_eq!(engine.stats().packets_rejected, 0);

    (samples, clock.current(), frame_size)
}

#[test]
fn test_wav_analysis_reports_stream_parameters() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mono_48k.wav");
    generate_silent_wav(&path, 48000, 1, 100).unwrap();

    let source = FileSource::open(&path).unwrap();
    let analysis = source.analyse(1152).unwrap();

    assert_eq!(analysis.descriptor.source_layout, ChannelLayout::Mono);
    assert_eq!(analysis.descriptor.source_rate, 48000);
    assert!(analysis.descriptor.frame_size > 0);
    assert!(analysis.descriptor.has_supported_target());
    assert!(analysis.time_base.as_secs_f64() > 0.0);
}

#[test]
fn test_open_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    assert!(FileSource::open(dir.path().join("missing.wav")).is_err());
}

#[test]
fn test_stereo_44k_passes_through_sample_exact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stereo_44k.wav");
    generate_sine_wav(&path, 44100, 2, 440.0, 500).unwrap();

    let (samples, clock, _) = render(&path);

    assert_eq!(samples.len(), 22050 * 2);
    assert!(clock > 0.0 && clock < 0.5, "clock = {}", clock);

    // Half-scale sine survives the f32 round trip within a step or two
    let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
    assert!((peak as i32 - i16::MAX as i32 / 2).abs() < 64, "peak = {}", peak);
}

#[test]
fn test_mono_48k_is_resampled_and_duplicated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mono_48k.wav");
    generate_sine_wav(&path, 48000, 1, 440.0, 500).unwrap();

    let (samples, _, frame_size) = render(&path);

    assert_eq!(samples.len() % 2, 0);
    for pair in samples.chunks_exact(2) {
        assert_eq!(pair[0], pair[1]);
    }

    // The tail shorter than one resampler chunk is flushed at end of stream
    let frames = (samples.len() / 2) as f64;
    let expected = 22050.0;
    assert!(
        (frames - expected).abs() <= 64.0,
        "frames = {}, frame_size = {}",
        frames,
        frame_size
    );
}

#[test]
fn test_end_to_end_with_null_device() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.wav");
    generate_sine_wav(&path, 44100, 2, 440.0, 300).unwrap();

    let status = Arc::new(PlayerStatus::new());
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let mut player = AudioPlayer::new(AudioSettings::default(), Arc::clone(&status), events);

    let source = FileSource::open(&path).unwrap();
    let analysis = source.analyse(1152).unwrap();
    player
        .on_analysis_stream(ThreadMode::Main, analysis)
        .unwrap();
    let feeder = source
        .spawn_feeder(player.packet_queue(), Arc::clone(&status))
        .unwrap();

    player.play(NullDevice::factory()).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut reached_end = false;
    let mut reached_playing = false;
    while std::time::Instant::now() < deadline && !reached_end {
        match rx.try_recv() {
            Ok(PlayerEvent::EndOfStream) => reached_end = true,
            Ok(PlayerEvent::StateChanged {
                state: LifecycleState::Playing,
            }) => reached_playing = true,
            Ok(_) => {}
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    }

    assert!(reached_playing);
    assert!(reached_end);
    assert!(player.current_time() > 0.2 && player.current_time() < 0.3);

    status.request_exit();
    player.release();
    assert!(feeder.join().unwrap() > 0);
    assert_eq!(player.state(), LifecycleState::Released);
}
