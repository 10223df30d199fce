use callstreams::{Bundle, BundleMembership, MediaConfig, MediaDescription, SessionState};
use callstreams::{StreamState, StreamsGroup};

mod common;
use common::{audio, group, init_log, media, round, video};

fn bundled(addr: &str) -> MediaDescription {
    let mut a = audio(7078);
    a.mid = "a".into();
    let mut v = video(9078);
    v.mid = "v".into();
    let mut md = media(addr, vec![a, v]);
    md.bundles.push(Bundle::new(["a", "v"]));
    md
}

fn membership(group: &StreamsGroup, index: usize) -> &BundleMembership {
    group.stream(index).unwrap().bundle()
}

#[test]
fn secondary_stream_rides_on_owner() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let mut remote = bundled("10.0.0.1");
    remote.streams[1].rtp_port = 0;
    remote.streams[1].bundle_only = true;
    let ctx = round(
        &mut group,
        bundled("192.168.1.2"),
        remote,
        true,
        SessionState::StreamsRunning,
    );

    {
        let e = engine.borrow();
        assert!(e.has("bundle_create 3 1 a"));
        assert!(e.has("bundle_add 3 2 v"));
    }

    let owner = membership(&group, 0).bundle().unwrap();
    assert_eq!(owner.owner(), 0);
    assert_eq!(owner.members(), &[1]);
    assert_eq!(
        membership(&group, 1),
        &BundleMembership::Secondary { owner: 0 }
    );
    assert!(!group.stream(1).unwrap().is_transport_owner());

    // The secondary stream offers no port of its own.
    let local = ctx.local().unwrap();
    assert_eq!(local.streams[1].rtp_port, 0);
    assert!(local.streams[1].bundle_only);
    assert!(local.streams[1].enabled());

    // Both streams send to the owner's destination.
    let e = engine.borrow();
    assert_eq!(e.started.len(), 2);
    for (_, params) in &e.started {
        assert_eq!(params.dest.rtp, "10.0.0.1:7078".parse().unwrap());
    }
    assert_eq!(group.stream(1).unwrap().state(), StreamState::Running);
}

#[test]
fn unbundling_destroys_bundle() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let mut remote = bundled("10.0.0.1");
    remote.streams[1].rtp_port = 0;
    remote.streams[1].bundle_only = true;
    round(
        &mut group,
        bundled("192.168.1.2"),
        remote,
        true,
        SessionState::StreamsRunning,
    );

    let local = media("192.168.1.2", vec![audio(7078), video(9078)]);
    let remote = media("10.0.0.1", vec![audio(7078), video(9078)]);
    round(&mut group, local, remote, true, SessionState::StreamsRunning);

    assert_eq!(membership(&group, 0), &BundleMembership::None);
    assert_eq!(membership(&group, 1), &BundleMembership::None);

    let e = engine.borrow();
    assert!(e.has("bundle_destroy 3"));
    assert_eq!(e.count("bundle_remove"), 0);
    // The video stream gets a transport of its own.
    assert!(e.has("stop_stream 2"));
    let (_, params) = e.started.last().unwrap();
    assert_eq!(params.dest.rtp, "10.0.0.1:9078".parse().unwrap());
    assert_eq!(e.count("stop_stream 1"), 0);
}

#[test]
fn finishing_owner_destroys_bundle() {
    init_log();
    let (mut group, engine) = group(MediaConfig::new());

    let mut remote = bundled("10.0.0.1");
    remote.streams[1].rtp_port = 0;
    remote.streams[1].bundle_only = true;
    round(
        &mut group,
        bundled("192.168.1.2"),
        remote,
        true,
        SessionState::StreamsRunning,
    );

    group.finish();
    assert_eq!(engine.borrow().count("bundle_destroy"), 1);
}
