use std::time::{Duration, Instant};

use callstreams::{CallParams, DtlsRole, EngineEvent, GroupEvent, MediaConfig, MediaEncryption};
use callstreams::{NativeStreamId, Proto, SessionState, StreamState, StreamsGroup};
use callstreams::{TerminationReason, MediaDescription};

mod common;
use common::{audio, group, init_log, media, round, video};

fn events(group: &mut StreamsGroup) -> Vec<GroupEvent> {
    std::iter::from_fn(|| group.poll_event()).collect()
}

fn audio_call(group: &mut StreamsGroup) {
    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(group, local, remote, true, SessionState::StreamsRunning);
}

fn dtls(addr: &str) -> MediaDescription {
    let mut md = media(addr, vec![audio(7078)]);
    md.streams[0].proto = Proto::UdpTlsRtpSavp;
    md
}

#[test]
fn telephone_events_become_dtmf() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());
    audio_call(&mut group);

    {
        let mut e = engine.borrow_mut();
        e.queue_event(NativeStreamId(1), EngineEvent::TelephoneEvent(11));
        // Out of the DTMF range, dropped.
        e.queue_event(NativeStreamId(1), EngineEvent::TelephoneEvent(20));
        e.queue_event(NativeStreamId(1), EngineEvent::TelephoneEvent(1));
    }
    group.handle_timeout(Instant::now());

    let dtmfs: Vec<char> = events(&mut group)
        .into_iter()
        .filter_map(|e| match e {
            GroupEvent::DtmfReceived { index: 0, dtmf } => Some(dtmf),
            _ => None,
        })
        .collect();
    assert_eq!(dtmfs, vec!['#', '1']);
    assert_eq!(group.stream(0).unwrap().stats().received_dtmfs, "#1");
}

#[test]
fn encryption_change_is_reported_once() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078), video(9078)]);
    let remote = media("10.0.0.1", vec![audio(7078), video(9078)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);
    assert!(!group.all_streams_encrypted());

    {
        let mut e = engine.borrow_mut();
        let ev = EngineEvent::DtlsEncryptionChanged { encrypted: true };
        e.queue_event(NativeStreamId(1), ev.clone());
        e.queue_event(NativeStreamId(2), ev);
    }
    group.handle_timeout(Instant::now());

    let changed: Vec<_> = events(&mut group)
        .into_iter()
        .filter(|e| matches!(e, GroupEvent::EncryptionChanged { .. }))
        .collect();
    assert_eq!(
        changed,
        vec![GroupEvent::EncryptionChanged {
            all_encrypted: true
        }]
    );
    assert!(group.all_streams_encrypted());
    assert!(group.stream(1).unwrap().stats().encrypted);
}

#[test]
fn zrtp_on_main_audio_starts_video() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());
    group.set_params(CallParams::new().set_media_encryption(MediaEncryption::Zrtp));

    let local = media("192.168.1.2", vec![audio(7078), video(9078)]);
    let remote = media("10.0.0.1", vec![audio(7078), video(9078)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    assert!(engine.borrow().has("start_zrtp 1"));
    // Video waits for the main audio stream to be encrypted.
    assert!(!engine.borrow().has("start_zrtp 2"));

    {
        let mut e = engine.borrow_mut();
        e.queue_event(
            NativeStreamId(1),
            EngineEvent::ZrtpEncryptionChanged { encrypted: true },
        );
        e.queue_event(
            NativeStreamId(1),
            EngineEvent::ZrtpSasReady {
                token: "4fa2".into(),
                verified: false,
            },
        );
    }
    group.handle_timeout(Instant::now());

    assert!(engine.borrow().has("start_zrtp 2"));
    assert!(group.stream(1).unwrap().zrtp_started());
    assert!(events(&mut group).contains(&GroupEvent::AuthTokenReady {
        token: "4fa2".into(),
        verified: false,
    }));
    assert_eq!(group.auth_token(), Some("4fa2"));
    assert!(!group.auth_token_verified());

    group.set_auth_token_verified(true);
    assert!(group.auth_token_verified());
}

#[test]
fn media_lost_reported_once() {
    init_log();
    let config = MediaConfig::new().set_no_rtp_timeout(Some(Duration::from_secs(5)));
    let (mut group, _engine) = group(config);
    audio_call(&mut group);

    let media_lost = |evs: Vec<GroupEvent>| {
        evs.iter()
            .filter(|e| matches!(e, GroupEvent::MediaLost { index: 0 }))
            .count()
    };

    let t0 = Instant::now();
    group.handle_timeout(t0);
    assert_eq!(media_lost(events(&mut group)), 0);

    group.handle_timeout(t0 + Duration::from_secs(6));
    assert_eq!(media_lost(events(&mut group)), 1);

    group.handle_timeout(t0 + Duration::from_secs(8));
    assert_eq!(media_lost(events(&mut group)), 0);
}

#[test]
fn recent_rtp_is_not_media_loss() {
    init_log();
    let config = MediaConfig::new().set_no_rtp_timeout(Some(Duration::from_secs(5)));
    let (mut group, engine) = group(config);
    audio_call(&mut group);

    let t0 = Instant::now();
    group.handle_timeout(t0);
    engine.borrow_mut().last_rtp = Some(t0 + Duration::from_secs(4));
    group.handle_timeout(t0 + Duration::from_secs(6));

    assert!(!events(&mut group)
        .iter()
        .any(|e| matches!(e, GroupEvent::MediaLost { .. })));
}

#[test]
fn missing_certificate_with_mandatory_encryption() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());
    group.set_params(CallParams::new().set_encryption_mandatory(true));
    engine.borrow_mut().dtls_fingerprint = None;

    round(
        &mut group,
        dtls("192.168.1.2"),
        dtls("10.0.0.1"),
        true,
        SessionState::StreamsRunning,
    );

    assert_eq!(group.stream(0).unwrap().state(), StreamState::Stopped);
    assert_eq!(engine.borrow().count("start_stream"), 0);
    assert!(events(&mut group).contains(&GroupEvent::TerminationRequired(
        TerminationReason::NotAcceptable
    )));
}

#[test]
fn missing_certificate_without_mandatory_encryption() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());
    engine.borrow_mut().dtls_fingerprint = None;

    round(
        &mut group,
        dtls("192.168.1.2"),
        dtls("10.0.0.1"),
        true,
        SessionState::StreamsRunning,
    );

    assert_eq!(group.stream(0).unwrap().state(), StreamState::Stopped);
    assert!(!events(&mut group)
        .iter()
        .any(|e| matches!(e, GroupEvent::TerminationRequired(_))));
}

#[test]
fn dtls_starts_after_render() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let mut remote = dtls("10.0.0.1");
    remote.streams[0].dtls_role = DtlsRole::Client;
    remote.streams[0].dtls_fingerprint = "sha-256 11:22:33".into();
    let ctx = round(
        &mut group,
        dtls("192.168.1.2"),
        remote,
        true,
        SessionState::StreamsRunning,
    );

    let local = ctx.local().unwrap();
    assert_eq!(local.streams[0].dtls_fingerprint, "sha-256 AB:CD:EF");
    assert_eq!(local.streams[0].dtls_role, DtlsRole::Unset);

    {
        let e = engine.borrow();
        assert!(e.has("set_dtls_peer_fingerprint 1 sha-256 11:22:33"));
        assert!(e.has("start_dtls 1 Client"));
    }
    assert!(group.stream(0).unwrap().dtls_started());

    // Started once only.
    group.render(&ctx, SessionState::StreamsRunning);
    assert_eq!(engine.borrow().count("start_dtls"), 1);
}

#[test]
fn quality_is_mean_of_rated_streams() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());
    assert_eq!(group.current_quality(), -1.0);

    audio_call(&mut group);
    assert_eq!(group.current_quality(), -1.0);

    engine.borrow_mut().quality.insert(NativeStreamId(1), 4.0);
    assert_eq!(group.current_quality(), 4.0);
    // Not rated by the engine.
    assert_eq!(group.average_quality(), -1.0);
}

#[test]
fn stats_reported_every_second() {
    init_log();
    let (mut group, _engine) = group(MediaConfig::new());
    audio_call(&mut group);

    let stats = |group: &mut StreamsGroup| {
        events(group)
            .into_iter()
            .filter_map(|e| match e {
                GroupEvent::StatsUpdated(s) => Some(s),
                _ => None,
            })
            .collect::<Vec<_>>()
    };

    let t0 = Instant::now();
    group.handle_timeout(t0);
    let s = stats(&mut group);
    assert_eq!(s.len(), 1);
    assert_eq!(s[0].index, 0);
    assert_eq!(s[0].bandwidth.upload, 64.0);
    assert_eq!(s[0].start_count, 1);

    group.handle_timeout(t0 + Duration::from_millis(500));
    assert!(stats(&mut group).is_empty());

    group.handle_timeout(t0 + Duration::from_secs(1));
    assert_eq!(stats(&mut group).len(), 1);
    assert_eq!(group.poll_timeout(), Some(t0 + Duration::from_millis(1020)));
}
