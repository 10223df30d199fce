use std::time::Instant;

use callstreams::{AudioRoute, MediaConfig, MediaError, SessionState, StreamType};

mod common;
use common::{audio, group, init_log, media, round, text, video};

#[test]
fn real_time_text() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078), text(11078)]);
    let remote = media("10.0.0.1", vec![audio(7078), text(11078)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    group.send_text(1, 'h').unwrap();
    group.send_text(1, 'i').unwrap();
    assert!(engine.borrow().has("send_text_char 2 h"));
    assert_eq!(group.stream(1).unwrap().as_text().unwrap().sent_chars(), 2);

    assert!(matches!(
        group.send_text(0, 'x'),
        Err(MediaError::WrongCapability(0, StreamType::Text))
    ));
    assert!(matches!(group.send_text(5, 'x'), Err(MediaError::NoSuchStream(5))));

    group.stop();
    assert!(matches!(group.send_text(1, 'x'), Err(MediaError::NotRunning(1))));
}

#[test]
fn audio_route_applied_next_turn() {
    init_log();
    let (mut group, _engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    group.audio_route_changed(AudioRoute::Headset);
    let audio_state = |g: &callstreams::StreamsGroup| g.stream(0).unwrap().as_audio().unwrap().route();
    assert_eq!(audio_state(&group), None);

    group.handle_timeout(Instant::now());
    assert_eq!(audio_state(&group), Some(AudioRoute::Headset));
    let a = group.stream(0).unwrap().as_audio().unwrap();
    assert!(!a.echo_canceller());
}

#[test]
fn audio_route_for_replaced_stream_is_dropped() {
    init_log();
    let (mut group, _engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(&mut group, local, remote.clone(), true, SessionState::StreamsRunning);

    group.audio_route_changed(AudioRoute::Bluetooth);

    // Switching to multicast replaces the stream before the task runs.
    let mut local = media("192.168.1.2", vec![audio(7078)]);
    local.streams[0].rtp_addr = "224.1.2.3".into();
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    group.handle_timeout(Instant::now());
    let a = group.stream(0).unwrap().as_audio().unwrap();
    assert_eq!(a.route(), None);
    assert!(a.echo_canceller());
}

#[test]
fn hold_music_when_pausing() {
    init_log();
    let config = MediaConfig::new().set_hold_music_file(Some("/usr/share/sounds/hold.wav"));
    let (mut group, engine) = group(config);

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(&mut group, local, remote, true, SessionState::Paused);

    assert!(engine.borrow().has("play_file 1 /usr/share/sounds/hold.wav"));
    assert!(group.stream(0).unwrap().as_audio().unwrap().playing_hold_file());

    group.stop();
    assert!(!group.stream(0).unwrap().as_audio().unwrap().playing_hold_file());
}

#[test]
fn no_hold_music_without_file() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(&mut group, local, remote, true, SessionState::Paused);

    assert_eq!(engine.borrow().count("play_file"), 0);
}

#[test]
fn main_streams() {
    init_log();
    let (mut group, _engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![video(9078), audio(7078), video(9080)]);
    let remote = media("10.0.0.1", vec![video(9078), audio(7078), video(9080)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    assert_eq!(group.lookup_main_stream(StreamType::Video).unwrap().index(), 0);
    assert_eq!(group.lookup_main_stream(StreamType::Audio).unwrap().index(), 1);
    assert!(group.lookup_main_stream(StreamType::Text).is_none());
    assert!(!group.stream(2).unwrap().is_main());

    assert!(matches!(
        group.set_stream_main(2),
        Err(MediaError::MainStreamExists(StreamType::Video))
    ));
    assert!(group.set_stream_main(0).is_ok());
    assert!(matches!(group.set_stream_main(7), Err(MediaError::NoSuchStream(7))));
}

#[test]
fn controls_need_matching_stream_type() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078), video(9078)]);
    let remote = media("10.0.0.1", vec![audio(7078), video(9078)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    assert!(group.audio_control(1).is_none());
    assert!(group.video_control(0).is_none());

    group.audio_control(0).unwrap().set_mic_muted(true);
    assert!(engine.borrow().has("set_muted 1 true"));
    assert!(group.is_muted());

    group.video_control(1).unwrap().enable_camera(false);
    assert!(!group.stream(1).unwrap().as_video().unwrap().camera_enabled());

    let mut ctl = group.audio_control(0).unwrap();
    ctl.set_speaker_volume(3.0);
    assert_eq!(ctl.stream().as_audio().unwrap().speaker_volume(), 1.0);
}
