use callstreams::{Direction, MediaConfig, OfferAnswerContext, SessionState, SrtpCrypto, SrtpSuite};
use callstreams::{Proto, StreamState, StreamType};

mod common;
use common::{audio, group, init_log, media, result_of, round, video};

#[test]
fn same_round_twice_restarts_nothing() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    let ctx = round(&mut group, local, remote, true, SessionState::StreamsRunning);

    let s = group.stream(0).unwrap();
    assert_eq!(s.state(), StreamState::Running);
    assert!(s.is_main());
    assert_eq!(engine.borrow().count("start_stream"), 1);

    let dest = engine.borrow().started[0].1.dest;
    assert_eq!(dest.rtp, "10.0.0.1:7078".parse().unwrap());
    assert_eq!(dest.rtcp, "10.0.0.1:7079".parse().unwrap());

    group.render(&ctx, SessionState::StreamsRunning);

    let e = engine.borrow();
    assert_eq!(e.count("start_stream"), 1);
    assert_eq!(e.count("stop_stream"), 0);
    assert_eq!(group.stream(0).unwrap().state(), StreamState::Running);
}

#[test]
fn direction_change_restarts() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(&mut group, local.clone(), remote.clone(), true, SessionState::StreamsRunning);

    let mut remote = remote;
    remote.streams[0].dir = Direction::SendOnly;
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    let e = engine.borrow();
    assert_eq!(e.count("stop_stream"), 1);
    assert_eq!(e.count("start_stream"), 2);
    assert_eq!(e.started[1].1.dir, Direction::RecvOnly);
    assert_eq!(group.stream(0).unwrap().stats().start_count, 2);
}

#[test]
fn new_destination_patches_running_stream() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(&mut group, local.clone(), remote, true, SessionState::StreamsRunning);

    let remote = media("10.0.0.1", vec![audio(7090)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    let e = engine.borrow();
    assert!(e.has("update_destinations 1 10.0.0.1:7090"));
    assert_eq!(e.count("stop_stream"), 0);
    assert_eq!(e.count("start_stream"), 1);
}

#[test]
fn unspecified_bandwidth_is_not_a_change() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let mut remote = media("10.0.0.1", vec![audio(7078)]);
    remote.streams[0].bandwidth = 128;
    round(&mut group, local.clone(), remote.clone(), true, SessionState::StreamsRunning);

    remote.streams[0].bandwidth = 0;
    round(&mut group, local.clone(), remote.clone(), true, SessionState::StreamsRunning);
    assert_eq!(engine.borrow().count("stop_stream"), 0);

    remote.streams[0].bandwidth = 64;
    round(&mut group, local, remote, true, SessionState::StreamsRunning);
    assert_eq!(engine.borrow().count("stop_stream"), 1);
    assert_eq!(engine.borrow().count("start_stream"), 2);
}

#[test]
fn srtp_rekey_without_restart() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let mut local = media("192.168.1.2", vec![audio(7078)]);
    local.streams[0].proto = Proto::RtpSavp;
    let mut remote = media("10.0.0.1", vec![audio(7078)]);
    remote.streams[0].proto = Proto::RtpSavp;
    remote.streams[0].crypto.push(SrtpCrypto {
        tag: 1,
        suite: SrtpSuite::AES_CM_128_HMAC_SHA1_80,
        master_key: "a".repeat(40),
    });
    let ctx = round(&mut group, local, remote.clone(), true, SessionState::StreamsRunning);

    // Crypto lines were generated for the local description.
    let local = ctx.local().unwrap().clone();
    assert_eq!(local.streams[0].crypto.len(), 2);
    assert_eq!(local.streams[0].crypto[0].tag, 1);

    let recv_a = format!("set_srtp_recv_key 1 {}", "a".repeat(40));
    let send = format!("set_srtp_send_key 1 {}", local.streams[0].crypto[0].master_key);
    assert!(engine.borrow().has(&recv_a));
    assert!(engine.borrow().has(&send));

    remote.streams[0].crypto[0].master_key = "b".repeat(40);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    let e = engine.borrow();
    assert!(e.has(&format!("set_srtp_recv_key 1 {}", "b".repeat(40))));
    assert_eq!(e.count("stop_stream"), 0);
    assert_eq!(e.count("start_stream"), 1);
}

#[test]
fn same_codec_new_payload_table_is_patched() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(&mut group, local.clone(), remote.clone(), true, SessionState::StreamsRunning);

    // Telephone events are dropped, PCMU stays the send codec.
    let mut remote = remote;
    remote.streams[0].payloads.truncate(1);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    {
        let e = engine.borrow();
        assert_eq!(e.count("set_profile 1"), 1);
        assert_eq!(e.count("stop_stream"), 0);
        // The old profile goes on the next turn.
        assert_eq!(e.count("release_profile"), 0);
    }

    group.handle_timeout(std::time::Instant::now());
    assert_eq!(engine.borrow().count("release_profile"), 1);
    let profile = group.stream(0).unwrap().rtp_profile().unwrap();
    assert_eq!(profile.payloads.len(), 1);
}

#[test]
fn stream_rejected_by_answerer() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(0)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    assert_eq!(group.stream(0).unwrap().state(), StreamState::Stopped);
    assert_eq!(engine.borrow().count("start_stream"), 0);
    assert!(!group.is_started());
}

#[test]
fn stream_declined_locally_is_not_created() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let mut ctx = OfferAnswerContext::new();
    ctx.set_remote(media("10.0.0.1", vec![audio(7078), video(9078)]));
    ctx.set_local(media("192.168.1.2", vec![audio(7078), video(0)]));
    ctx.set_local_is_offerer(false);
    group.create_streams(&ctx);

    assert_eq!(group.len(), 2);
    assert!(group.stream(0).is_some());
    assert!(group.stream(1).is_none());
    assert_eq!(engine.borrow().count("create_sessions"), 1);
}

#[test]
fn indexes_survive_rejection_and_removal() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078), video(9078)]);
    let remote = media("10.0.0.1", vec![audio(7078), video(9078)]);
    round(&mut group, local.clone(), remote, true, SessionState::StreamsRunning);
    assert_eq!(group.active_streams_count(), 2);

    let remote = media("10.0.0.1", vec![audio(7078), video(0)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    let v = group.stream(1).unwrap();
    assert_eq!(v.index(), 1);
    assert_eq!(v.stream_type(), StreamType::Video);
    assert_eq!(v.state(), StreamState::Stopped);
    assert_eq!(group.stream(0).unwrap().state(), StreamState::Running);

    // A round with fewer streams destroys the ones beyond.
    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    assert!(group.stream(1).is_none());
    let e = engine.borrow();
    assert!(e.has("destroy_stream 2"));
    assert!(e.has("release_sessions 2"));
    assert!(!group.is_port_used(9078));
}

#[test]
fn unicast_to_multicast_replaces_stream() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(&mut group, local, remote.clone(), true, SessionState::StreamsRunning);
    let before = group.stream_handle(0).unwrap();

    let mut local = media("192.168.1.2", vec![audio(7078)]);
    local.streams[0].rtp_addr = "224.1.2.3".into();
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    let after = group.stream_handle(0).unwrap();
    assert_eq!(before.index, after.index);
    assert_ne!(before.generation, after.generation);

    let e = engine.borrow();
    assert!(e.has("destroy_stream 1"));
    assert_eq!(e.count("create_sessions"), 2);
    assert_eq!(group.stream(0).unwrap().state(), StreamState::Running);
}

#[test]
fn early_media_is_muted_until_running() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    let ctx = round(&mut group, local, remote, false, SessionState::IncomingEarlyMedia);

    assert!(engine.borrow().started[0].1.muted);
    assert!(group.is_muted());

    group.render(&ctx, SessionState::StreamsRunning);
    assert!(engine.borrow().has("set_muted 1 false"));
    assert!(!group.is_muted());
    assert_eq!(engine.borrow().count("start_stream"), 1);
}

#[test]
fn early_media_forking() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    let ctx = round(&mut group, local, remote, true, SessionState::OutgoingEarlyMedia);

    let mut fork = OfferAnswerContext::new();
    fork.set_result(result_of(&media("10.0.0.9", vec![audio(8000)])));
    group.try_early_media_forking(&fork);
    assert!(engine.borrow().has("add_aux_destination 1 10.0.0.9:8000"));

    // Another codec in the fork is not forked.
    let mut other = media("10.0.0.10", vec![audio(8000)]);
    other.streams[0].payloads[0] = callstreams::PayloadType::new(8, "PCMA", 8000);
    let mut fork = OfferAnswerContext::new();
    fork.set_result(result_of(&other));
    group.try_early_media_forking(&fork);
    assert_eq!(engine.borrow().count("add_aux_destination"), 1);

    group.render(&ctx, SessionState::StreamsRunning);
    assert!(engine.borrow().has("clear_aux_destinations 1"));
}

#[test]
fn stop_keeps_transport() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    let ctx = round(&mut group, local, remote, true, SessionState::StreamsRunning);

    group.stop();
    assert_eq!(group.stream(0).unwrap().state(), StreamState::Stopped);
    assert!(group.is_port_used(7078));
    assert_eq!(engine.borrow().count("release_sessions"), 0);
    assert!(group.poll_timeout().is_some());

    group.render(&ctx, SessionState::StreamsRunning);
    assert_eq!(engine.borrow().count("start_stream"), 2);
}

#[test]
fn finish_releases_everything() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    group.finish();
    assert!(group.is_finished());
    assert!(group.stream(0).is_none());
    assert!(!group.is_port_used(7078));

    let e = engine.borrow();
    assert!(e.has("stop_stream 1"));
    assert!(e.has("destroy_stream 1"));
    assert!(e.has("release_sessions 1"));
    // Profiles are released right away, not on a later turn.
    assert_eq!(e.count("release_profile"), 1);
    assert!(group.poll_timeout().is_none());
}

#[test]
#[should_panic(expected = "finished")]
fn render_after_finish_panics() {
    init_log();
    let (mut group, _engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let remote = media("10.0.0.1", vec![audio(7078)]);
    let ctx = round(&mut group, local, remote, true, SessionState::StreamsRunning);

    group.finish();
    group.render(&ctx, SessionState::StreamsRunning);
}

#[test]
fn ice_restart_restarts_stream() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let mut remote = media("10.0.0.1", vec![audio(7078)]);
    remote.streams[0].ice_ufrag = "aaaa".into();
    round(&mut group, local.clone(), remote.clone(), true, SessionState::StreamsRunning);

    remote.streams[0].ice_ufrag = "bbbb".into();
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    let e = engine.borrow();
    assert_eq!(e.count("stop_stream"), 1);
    assert_eq!(e.count("start_stream"), 2);
}

#[test]
fn ptime_matching_codec_fmtp_is_not_a_change() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let mut remote = media("10.0.0.1", vec![audio(7078)]);
    remote.streams[0].payloads[0].send_fmtp = Some("ptime=40".into());
    remote.streams[0].ptime = 20;
    round(&mut group, local.clone(), remote.clone(), true, SessionState::StreamsRunning);

    remote.streams[0].ptime = 40;
    round(&mut group, local.clone(), remote.clone(), true, SessionState::StreamsRunning);
    assert_eq!(engine.borrow().count("stop_stream"), 0);

    // Any other ptime needs a restart.
    remote.streams[0].ptime = 60;
    round(&mut group, local, remote, true, SessionState::StreamsRunning);
    assert_eq!(engine.borrow().count("stop_stream"), 1);
}

#[test]
fn header_extension_id_change_restarts() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078), video(9078)]);
    let mut remote = media("10.0.0.1", vec![audio(7078), video(9078)]);
    round(&mut group, local.clone(), remote.clone(), true, SessionState::StreamsRunning);

    remote.streams[0].mixer_to_client_extension_id = 3;
    round(&mut group, local.clone(), remote.clone(), true, SessionState::StreamsRunning);
    assert!(engine.borrow().has("stop_stream 1"));
    assert_eq!(engine.borrow().count("stop_stream 2"), 0);

    remote.streams[1].frame_marking_extension_id = 4;
    round(&mut group, local, remote, true, SessionState::StreamsRunning);
    assert!(engine.borrow().has("stop_stream 2"));
    assert_eq!(engine.borrow().count("stop_stream"), 2);
}

#[test]
fn final_answer_without_sdp_keeps_remote() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078)]);
    let mut remote = media("10.0.0.1", vec![audio(7078)]);
    remote.streams[0].zrtp_hash = Some("1.10 abcdef".into());
    let early = round(&mut group, local, remote, true, SessionState::OutgoingEarlyMedia);

    let mut ctx = OfferAnswerContext::new();
    ctx.set_local(early.local().unwrap().clone());
    ctx.set_result(early.result().unwrap().clone());
    ctx.set_local_is_offerer(true);
    group.render(&ctx, SessionState::StreamsRunning);

    let current = group.current_offer_answer();
    let remote = current.remote().unwrap();
    assert_eq!(remote.streams[0].zrtp_hash.as_deref(), Some("1.10 abcdef"));
    assert_eq!(engine.borrow().count("stop_stream"), 0);
    assert_eq!(group.stream(0).unwrap().state(), StreamState::Running);
}

#[test]
fn render_without_result_keeps_streams() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let local = media("192.168.1.2", vec![audio(7078), video(9078)]);
    let remote = media("10.0.0.1", vec![audio(7078), video(9078)]);
    let full = round(&mut group, local, remote, true, SessionState::StreamsRunning);

    let mut ctx = OfferAnswerContext::new();
    ctx.set_local(full.local().unwrap().clone());
    ctx.set_local_is_offerer(true);
    group.render(&ctx, SessionState::StreamsRunning);

    assert_eq!(group.stream(0).unwrap().state(), StreamState::Running);
    assert_eq!(group.stream(1).unwrap().state(), StreamState::Running);
    {
        let e = engine.borrow();
        assert_eq!(e.count("destroy_stream"), 0);
        assert_eq!(e.count("stop_stream"), 0);
    }

    // The next round compares against the last negotiated result.
    group.render(&full, SessionState::StreamsRunning);
    assert_eq!(engine.borrow().count("stop_stream"), 0);
    assert_eq!(engine.borrow().count("start_stream"), 2);
}
